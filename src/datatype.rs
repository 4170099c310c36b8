//! Datatype resolver: compact type tokens (`u16`, `str16`, `c4`, `struct:Name`, `32`) to a
//! category and a byte width.

use crate::codec::CodecError;
use std::fmt;

/// Semantic category of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    SignedInt,
    UnsignedInt,
    Float,
    FixedChars,
    LengthPrefixedString,
    RawBytes,
    NestedRecord(String),
}

/// Resolved layout of one field element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    pub category: Category,
    /// Bytes per element. 0 for nested records (resolved per instance); for length-prefixed
    /// strings, the width of the length prefix.
    pub width: usize,
}

impl DataType {
    /// Resolve a type token.
    ///
    /// Integer, float and string tokens carry a bit width (`u16` is 2 bytes); fixed chars and raw
    /// bytes carry a byte count (`c4` is 4 bytes, `256` is 256 bytes).
    pub fn parse(token: &str) -> Result<Self, CodecError> {
        if let Some(name) = token.strip_prefix("struct:") {
            if name.is_empty() {
                return Err(CodecError::Schema(format!("type '{}': missing struct name", token)));
            }
            return Ok(DataType {
                category: Category::NestedRecord(name.to_string()),
                width: 0,
            });
        }

        let digits: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
        let code: String = token.chars().filter(|c| c.is_ascii_alphabetic()).collect();
        if digits.is_empty() {
            return Err(CodecError::Schema(format!("type '{}': missing width", token)));
        }
        let n: usize = digits
            .parse()
            .map_err(|_| CodecError::Schema(format!("type '{}': width out of range", token)))?;

        let category = match code.as_str() {
            "s" => Category::SignedInt,
            "u" => Category::UnsignedInt,
            "f" => Category::Float,
            "c" => Category::FixedChars,
            "str" => Category::LengthPrefixedString,
            "" => Category::RawBytes,
            other => {
                return Err(CodecError::Schema(format!(
                    "type '{}': unknown category '{}'",
                    token, other
                )))
            }
        };

        let width = match category {
            Category::FixedChars | Category::RawBytes => n,
            // f4/f8 are accepted as byte widths next to the f32/f64 bit widths.
            Category::Float if n == 4 || n == 8 => n,
            _ => n / 8,
        };

        match category {
            Category::SignedInt | Category::UnsignedInt | Category::LengthPrefixedString
                if !matches!(width, 1 | 2 | 4 | 8) || n % 8 != 0 =>
            {
                Err(CodecError::Schema(format!(
                    "type '{}': width must be 8, 16, 32 or 64 bits",
                    token
                )))
            }
            Category::Float if width != 4 && width != 8 => Err(CodecError::Schema(format!(
                "type '{}': float must be 32 or 64 bits",
                token
            ))),
            Category::FixedChars | Category::RawBytes if width == 0 => Err(CodecError::Schema(
                format!("type '{}': width must be at least one byte", token),
            )),
            _ => Ok(DataType { category, width }),
        }
    }

    /// Name of the nested record template, for struct types.
    pub fn struct_name(&self) -> Option<&str> {
        match &self.category {
            Category::NestedRecord(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.category {
            Category::SignedInt => write!(f, "s{}", self.width * 8),
            Category::UnsignedInt => write!(f, "u{}", self.width * 8),
            Category::Float => write!(f, "f{}", self.width * 8),
            Category::FixedChars => write!(f, "c{}", self.width),
            Category::LengthPrefixedString => write!(f, "str{}", self.width * 8),
            Category::RawBytes => write!(f, "{}", self.width),
            Category::NestedRecord(name) => write!(f, "struct:{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(token: &str) -> (Category, usize) {
        let dt = DataType::parse(token).expect("resolve");
        (dt.category, dt.width)
    }

    #[test]
    fn resolves_core_tokens() {
        assert_eq!(resolve("u16"), (Category::UnsignedInt, 2));
        assert_eq!(resolve("s32"), (Category::SignedInt, 4));
        assert_eq!(resolve("f4"), (Category::Float, 4));
        assert_eq!(resolve("f8"), (Category::Float, 8));
        assert_eq!(resolve("f32"), (Category::Float, 4));
        assert_eq!(resolve("f64"), (Category::Float, 8));
        assert_eq!(resolve("c4"), (Category::FixedChars, 4));
        assert_eq!(resolve("str16"), (Category::LengthPrefixedString, 2));
        assert_eq!(resolve("str32"), (Category::LengthPrefixedString, 4));
        assert_eq!(resolve("struct:Foo"), (Category::NestedRecord("Foo".into()), 0));
        assert_eq!(resolve("256"), (Category::RawBytes, 256));
        assert_eq!(resolve("u8"), (Category::UnsignedInt, 1));
    }

    #[test]
    fn rejects_bad_tokens() {
        assert!(matches!(DataType::parse("x16"), Err(CodecError::Schema(_))));
        assert!(matches!(DataType::parse("int32"), Err(CodecError::Schema(_))));
        assert!(matches!(DataType::parse("u"), Err(CodecError::Schema(_))));
        assert!(matches!(DataType::parse("u24"), Err(CodecError::Schema(_))));
        assert!(matches!(DataType::parse("f16"), Err(CodecError::Schema(_))));
        assert!(matches!(DataType::parse("c0"), Err(CodecError::Schema(_))));
        assert!(matches!(DataType::parse("struct:"), Err(CodecError::Schema(_))));
    }

    #[test]
    fn display_round_trips_token() {
        for token in ["u16", "s32", "f32", "c4", "str16", "struct:Foo", "12"] {
            assert_eq!(DataType::parse(token).unwrap().to_string(), token);
        }
    }
}
