//! Whole-file driver: every declared piece, in order, over one shared stream.

use crate::codec::{Codec, CodecError, TrailingData};
use crate::piece::PieceRegistry;
use crate::stream::ByteStream;
use log::{debug, info};

/// Result of decoding a whole scenario.
#[derive(Debug)]
pub struct ScenarioDecodeResult {
    pub registry: PieceRegistry,
    /// Total bytes consumed, trailing data included.
    pub byte_length: usize,
    /// Pieces actually decoded, in order.
    pub decoded: Vec<String>,
    pub trailing: Option<TrailingData>,
}

/// Decode every piece in declaration order. Decoding stops after the piece whose sentinel
/// consumed the rest of the stream; pieces after it keep their fresh, unpopulated instances.
pub fn decode_scenario<C>(codec: &Codec, chunks: C) -> Result<ScenarioDecodeResult, CodecError>
where
    C: IntoIterator,
    C::Item: AsRef<[u8]>,
{
    let mut registry = codec.new_registry();
    let mut stream = ByteStream::new(chunks);
    let mut decoded = Vec::new();
    let mut trailing = None;

    let names: Vec<String> = codec.schema().pieces.iter().map(|p| p.name.clone()).collect();
    for name in names {
        let result = codec.decode_piece(&mut registry, &name, &mut stream)?;
        decoded.push(name);
        if result.trailing.is_some() {
            trailing = result.trailing;
        }
        if result.end_of_file {
            break;
        }
    }
    if let Some(last) = decoded.last() {
        if decoded.len() < codec.schema().pieces.len() {
            debug!("end of stream reached in {}; remaining pieces not decoded", last);
        }
    }

    let byte_length = stream.position();
    info!("decoded {} pieces, {} bytes", decoded.len(), byte_length);
    Ok(ScenarioDecodeResult {
        registry,
        byte_length,
        decoded,
        trailing,
    })
}

/// Encode every registered piece in order into one buffer. A top-level field without a value is
/// an error here: a scenario file with a hole in it would not decode again.
pub fn encode_scenario(codec: &Codec, registry: &mut PieceRegistry) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let names: Vec<String> = registry.names().map(str::to_string).collect();
    for name in names {
        let encoded = codec.encode_piece(registry, &name)?;
        if let Some(gap) = encoded.gaps.first() {
            return Err(CodecError::MissingValue(format!("{}.{}", name, gap)));
        }
        debug!("encoded {} ({} bytes)", name, encoded.bytes.len());
        out.extend(encoded.bytes);
    }
    Ok(out)
}
