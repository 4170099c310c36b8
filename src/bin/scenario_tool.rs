//! Decode a scenario file against a schema, optionally dump it and check the round trip.
//!
//! Usage:
//!   scenario_tool SCHEMA FILE [--dump] [--roundtrip] [--out PATH]
//!
//! Options:
//!   --dump        Print every decoded piece
//!   --roundtrip   Re-encode and compare with the input bytes
//!   --out PATH    Write the re-encoded scenario to PATH
//!
//! Exit status is non-zero on schema, decode or version errors, and when a round trip differs.

use anyhow::{bail, Context};
use piececodec::{decode_scenario, dump_piece, encode_scenario, load_schema, Codec, CodecError};
use std::path::PathBuf;

const CHUNK_SIZE: usize = 64 * 1024;

fn usage() -> ! {
    eprintln!("Usage: scenario_tool SCHEMA FILE [--dump] [--roundtrip] [--out PATH]");
    std::process::exit(2);
}

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let dump = if let Some(pos) = args.iter().position(|a| a == "--dump") {
        args.remove(pos);
        true
    } else {
        false
    };
    let roundtrip = if let Some(pos) = args.iter().position(|a| a == "--roundtrip") {
        args.remove(pos);
        true
    } else {
        false
    };
    let out_path = if let Some(pos) = args.iter().position(|a| a == "--out") {
        if pos + 1 >= args.len() {
            usage();
        }
        let path = PathBuf::from(args.remove(pos + 1));
        args.remove(pos);
        Some(path)
    } else {
        None
    };
    if args.len() != 2 || args.iter().any(|a| a.starts_with("--")) {
        usage();
    }

    let schema = load_schema(&args[0]).with_context(|| format!("loading schema {}", args[0]))?;
    let codec = Codec::new(schema);
    let input = std::fs::read(&args[1]).with_context(|| format!("reading {}", args[1]))?;

    let mut decoded = match decode_scenario(&codec, input.chunks(CHUNK_SIZE)) {
        Ok(d) => d,
        Err(CodecError::Version { found, expected }) => {
            bail!("{}: unsupported version {:?} (this schema reads {:?})", args[1], found, expected)
        }
        Err(e) => return Err(e).with_context(|| format!("decoding {}", args[1])),
    };
    println!(
        "{}: {} pieces, {} bytes",
        args[1],
        decoded.decoded.len(),
        decoded.byte_length
    );
    if let Some(t) = &decoded.trailing {
        println!(
            "warning: {} trailing bytes at offset {} (absorbed by {}.{})",
            t.bytes.len(),
            t.offset,
            t.piece,
            t.field
        );
    }

    if dump {
        for piece in decoded.registry.iter() {
            print!("{}", dump_piece(piece));
        }
    }

    if roundtrip || out_path.is_some() {
        let encoded = encode_scenario(&codec, &mut decoded.registry).context("re-encoding")?;
        if roundtrip {
            if encoded == input {
                println!("round trip: identical ({} bytes)", encoded.len());
            } else {
                let first_diff = encoded
                    .iter()
                    .zip(&input)
                    .position(|(a, b)| a != b)
                    .unwrap_or_else(|| encoded.len().min(input.len()));
                bail!(
                    "round trip differs: {} bytes in, {} bytes out, first difference at offset {}",
                    input.len(),
                    encoded.len(),
                    first_diff
                );
            }
        }
        if let Some(path) = out_path {
            std::fs::write(&path, &encoded).with_context(|| format!("writing {}", path.display()))?;
            println!("wrote {} ({} bytes)", path.display(), encoded.len());
        }
    }
    Ok(())
}
