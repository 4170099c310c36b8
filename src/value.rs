//! Runtime values for encoding/decoding (codec representation).

use crate::piece::Piece;

/// A single decoded value (field or compound).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Float(f32),
    Double(f64),
    /// Fixed-width or length-prefixed text that decoded as UTF-8.
    Str(String),
    /// Raw bytes, or text payloads that are not valid UTF-8.
    Bytes(Vec<u8>),
    /// One nested-record instance.
    Struct(Box<Piece>),
    List(Vec<Value>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U8(x) => Some(*x as u64),
            Value::U16(x) => Some(*x as u64),
            Value::U32(x) => Some(*x as u64),
            Value::U64(x) => Some(*x),
            Value::I8(_) | Value::I16(_) | Value::I32(_) | Value::I64(_) => {
                self.as_i64().and_then(|x| u64::try_from(x).ok())
            }
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(x) => Some(*x as i64),
            Value::I16(x) => Some(*x as i64),
            Value::I32(x) => Some(*x as i64),
            Value::I64(x) => Some(*x),
            Value::U8(x) => Some(*x as i64),
            Value::U16(x) => Some(*x as i64),
            Value::U32(x) => Some(*x as i64),
            Value::U64(x) => i64::try_from(*x).ok(),
            _ => None,
        }
    }

    /// Any numeric value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            Value::U64(x) => Some(*x as f64),
            _ => self.as_i64().map(|x| x as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Byte payload of a text or raw value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(s) => Some(s.as_bytes()),
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_piece(&self) -> Option<&Piece> {
        match self {
            Value::Struct(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_piece_mut(&mut self) -> Option<&mut Piece> {
        match self {
            Value::Struct(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// Integer value widened enough to range-check against any 64-bit field.
    pub(crate) fn as_i128(&self) -> Option<i128> {
        match self {
            Value::U64(x) => Some(*x as i128),
            _ => self.as_i64().map(|x| x as i128),
        }
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Struct(_) => "struct",
            Value::List(_) => "list",
        }
    }
}

/// Scalar/sequence unification: a one-element sequence is presented as its single element when
/// the field collapses to a scalar; otherwise the whole sequence is kept.
pub fn unify(mut values: Vec<Value>, collapses_to_scalar: bool) -> Value {
    if collapses_to_scalar && values.len() == 1 {
        values.remove(0)
    } else {
        Value::List(values)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_collapses_single_element() {
        assert_eq!(unify(vec![Value::U8(3)], true), Value::U8(3));
        assert_eq!(unify(vec![Value::U8(3)], false), Value::List(vec![Value::U8(3)]));
        assert_eq!(
            unify(vec![Value::U8(1), Value::U8(2)], true),
            Value::List(vec![Value::U8(1), Value::U8(2)])
        );
        assert_eq!(unify(vec![], true), Value::List(vec![]));
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::I16(-4).as_i64(), Some(-4));
        assert_eq!(Value::I16(-4).as_u64(), None);
        assert_eq!(Value::U64(u64::MAX).as_i64(), None);
        assert_eq!(Value::U64(u64::MAX).as_i128(), Some(u64::MAX as i128));
        assert_eq!(Value::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Str("ab".into()).as_bytes(), Some(&b"ab"[..]));
    }
}
