//! Text dump of decoded pieces: one line per field, nested records indented.

use crate::piece::{Field, Piece};
use crate::value::Value;
use std::fmt::Write;

/// Longest byte payload printed in full; longer payloads are elided in the middle.
const HEX_LIMIT: usize = 32;

/// Render a piece as `name (type): value` lines under a section header.
pub fn dump_piece(piece: &Piece) -> String {
    let mut out = String::new();
    let length = piece
        .byte_length()
        .map(|n| format!(" ({} bytes)", n))
        .unwrap_or_default();
    let _ = writeln!(out, "[{}]{}", piece.name(), length);
    write_fields(&mut out, piece.fields(), 1);
    out
}

fn write_fields(out: &mut String, fields: &[Field], depth: usize) {
    let indent = "  ".repeat(depth);
    for field in fields {
        let ty = field.datatype().to_string();
        let ty = if field.repeat == 1 { ty } else { format!("{}[{}]", ty, field.repeat) };
        match field.value() {
            None => {
                let _ = writeln!(out, "{}{} ({}): <unset>", indent, field.name(), ty);
            }
            Some(Value::Struct(p)) => {
                let _ = writeln!(out, "{}{} ({}):", indent, field.name(), ty);
                write_fields(out, p.fields(), depth + 1);
            }
            Some(Value::List(items)) if items.iter().any(|v| matches!(v, Value::Struct(_))) => {
                let _ = writeln!(out, "{}{} ({}):", indent, field.name(), ty);
                for (i, item) in items.iter().enumerate() {
                    let _ = writeln!(out, "{}  #{}", indent, i);
                    if let Value::Struct(p) = item {
                        write_fields(out, p.fields(), depth + 2);
                    }
                }
            }
            Some(v) => {
                let _ = writeln!(out, "{}{} ({}): {}", indent, field.name(), ty, format_value(v));
            }
        }
    }
}

/// One-line rendering of a non-record value.
pub fn format_value(v: &Value) -> String {
    match v {
        Value::U8(x) => x.to_string(),
        Value::U16(x) => x.to_string(),
        Value::U32(x) => x.to_string(),
        Value::U64(x) => x.to_string(),
        Value::I8(x) => x.to_string(),
        Value::I16(x) => x.to_string(),
        Value::I32(x) => x.to_string(),
        Value::I64(x) => x.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Double(x) => x.to_string(),
        Value::Str(s) => format!("{:?} [{}]", s, hex(s.as_bytes())),
        Value::Bytes(b) => format!("[{}]", hex(b)),
        Value::Struct(p) => format!("<{}>", p.name()),
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}

/// Space-separated hex, elided past [`HEX_LIMIT`] bytes.
pub fn hex(bytes: &[u8]) -> String {
    let render = |b: &[u8]| b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ");
    if bytes.len() <= HEX_LIMIT {
        return render(bytes);
    }
    let half = HEX_LIMIT / 2;
    format!(
        "{} .. {} ({} bytes)",
        render(&bytes[..half]),
        render(&bytes[bytes.len() - half..]),
        bytes.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_elides_long_payloads() {
        assert_eq!(hex(&[0x00, 0xab]), "00 ab");
        let long = vec![0u8; 100];
        assert!(hex(&long).ends_with("(100 bytes)"));
    }

    #[test]
    fn values_render_on_one_line() {
        assert_eq!(format_value(&Value::List(vec![Value::U8(1), Value::I16(-2)])), "[1, -2]");
        assert_eq!(format_value(&Value::Str("1.40".into())), "\"1.40\" [31 2e 34 30]");
    }
}
