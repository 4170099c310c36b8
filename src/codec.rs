//! Decode and encode pieces against a resolved schema.
//!
//! All integers are little-endian. Fields are processed in declaration order; construct hooks run
//! before a field is read and commit hooks before it is written. Nested-record fields recurse into
//! fresh struct instances.

use crate::ast::Phase;
use crate::datatype::Category;
use crate::dependency;
use crate::expr::{evaluate, Env};
use crate::piece::{Field, Owner, Piece, PieceRegistry};
use crate::schema::{FieldSpec, ResolvedSchema};
use crate::stream::ByteStream;
use crate::value::{unify, Value};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, trace, warn};
use std::io::{self, Read};
use std::rc::Rc;

/// Upper bound on elements reserved ahead of reading; counts come from untrusted input.
const PREALLOC_LIMIT: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    #[error("Schema: {0}")]
    Schema(String),
    #[error("Decode: {0}")]
    Decode(String),
    #[error("Unsupported version {found:?} (expected {expected:?})")]
    Version { found: String, expected: String },
    #[error("Expression: {0}")]
    Expression(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Missing value: {0}")]
    MissingValue(String),
}

/// Bytes found after the declared fields, absorbed by the end-of-stream sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingData {
    pub piece: String,
    pub field: String,
    /// Stream offset of the first trailing byte.
    pub offset: usize,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PieceDecodeResult {
    pub byte_length: usize,
    /// The sentinel was reached and the stream is fully consumed.
    pub end_of_file: bool,
    pub trailing: Option<TrailingData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPiece {
    pub bytes: Vec<u8>,
    /// Top-level fields that had no value and were skipped.
    pub gaps: Vec<String>,
}

#[derive(Default)]
struct DecodeContext {
    piece: String,
    end_of_file: bool,
    trailing: Option<TrailingData>,
}

pub struct Codec {
    schema: Rc<ResolvedSchema>,
}

impl Codec {
    pub fn new(schema: ResolvedSchema) -> Self {
        Codec {
            schema: Rc::new(schema),
        }
    }

    pub fn schema(&self) -> &ResolvedSchema {
        &self.schema
    }

    pub fn new_registry(&self) -> PieceRegistry {
        self.schema.new_registry()
    }

    /// Decode one piece from the stream into the registry, replacing any previous instance.
    pub fn decode_piece<I>(
        &self,
        registry: &mut PieceRegistry,
        name: &str,
        stream: &mut ByteStream<I>,
    ) -> Result<PieceDecodeResult, CodecError>
    where
        I: Iterator,
        I::Item: AsRef<[u8]>,
    {
        let id = self
            .schema
            .piece_id(name)
            .ok_or_else(|| CodecError::Schema(format!("Unknown piece: {}", name)))?;
        // A previous instance is dropped; hooks see the piece being decoded, never the stale one.
        if registry.checkout(id).is_ok() {
            debug!("{}: replacing the previous instance", name);
        }
        let mut piece = self.schema.instantiate_piece(id);
        let mut ctx = DecodeContext {
            piece: name.to_string(),
            ..DecodeContext::default()
        };
        let start = stream.position();
        let result = self.decode_fields(&mut piece.fields, Owner::piece(id), stream, registry, &mut ctx);
        if result.is_ok() {
            piece.byte_length = Some(stream.position() - start);
        }
        registry.restore(piece);
        result?;

        let byte_length = stream.position() - start;
        debug!("decoded {} ({} bytes)", name, byte_length);
        Ok(PieceDecodeResult {
            byte_length,
            end_of_file: ctx.end_of_file,
            trailing: ctx.trailing,
        })
    }

    pub fn decode_piece_bytes(
        &self,
        registry: &mut PieceRegistry,
        name: &str,
        bytes: &[u8],
    ) -> Result<PieceDecodeResult, CodecError> {
        self.decode_piece(registry, name, &mut ByteStream::new(std::iter::once(bytes)))
    }

    fn decode_fields<I>(
        &self,
        fields: &mut [Field],
        owner: Owner<'_>,
        stream: &mut ByteStream<I>,
        registry: &mut PieceRegistry,
        ctx: &mut DecodeContext,
    ) -> Result<(), CodecError>
    where
        I: Iterator,
        I::Item: AsRef<[u8]>,
    {
        for i in 0..fields.len() {
            dependency::resolve_in(fields, i, Phase::Construct, owner, registry)?;
            let spec = Rc::clone(&fields[i].spec);
            if spec.name == self.schema.format.sentinel {
                self.decode_sentinel(&mut fields[i], stream, ctx);
                continue;
            }

            let repeat = fields[i].repeat;
            let mut values = Vec::with_capacity(repeat.min(PREALLOC_LIMIT));
            match spec.struct_id {
                Some(sid) => {
                    let view = owner.view(fields);
                    let inner = Owner::nested(view.as_ref().or(owner.held));
                    for _ in 0..repeat {
                        let mut inst = self.schema.instantiate_struct(sid);
                        let start = stream.position();
                        self.decode_fields(&mut inst.fields, inner, stream, registry, ctx)
                            .map_err(|e| in_field(&spec, e))?;
                        let consumed = stream.position() - start;
                        // Records that occupy no bytes never hit end of stream, so the count is all
                        // that bounds the loop.
                        if consumed == 0 && repeat > PREALLOC_LIMIT {
                            return Err(CodecError::Decode(format!(
                                "{}: {} records of zero width",
                                spec.name, repeat
                            )));
                        }
                        inst.byte_length = Some(consumed);
                        values.push(Value::Struct(Box::new(inst)));
                    }
                }
                None => {
                    for _ in 0..repeat {
                        values.push(self.decode_element(stream, &spec).map_err(|e| in_field(&spec, e))?);
                    }
                }
            }
            let value = unify(values, spec.collapses_to_scalar);
            if spec.name == self.schema.format.version_field
                && spec.datatype.category == Category::FixedChars
            {
                self.check_version(&value)?;
            }
            trace!("{} = {:?}", spec.name, value);
            fields[i].value = Some(value);
        }
        Ok(())
    }

    fn decode_sentinel<I>(&self, field: &mut Field, stream: &mut ByteStream<I>, ctx: &mut DecodeContext)
    where
        I: Iterator,
        I::Item: AsRef<[u8]>,
    {
        let offset = stream.position();
        let rest = stream.drain();
        ctx.end_of_file = true;
        if rest.is_empty() {
            field.repeat = 0;
            field.value = Some(Value::List(Vec::new()));
            return;
        }
        warn!(
            "{}: {} trailing bytes after the last declared field (offset {})",
            ctx.piece,
            rest.len(),
            offset
        );
        field.repeat = 1;
        field.value = Some(Value::Bytes(rest.clone()));
        ctx.trailing = Some(TrailingData {
            piece: ctx.piece.clone(),
            field: field.name().to_string(),
            offset,
            bytes: rest,
        });
    }

    fn check_version(&self, value: &Value) -> Result<(), CodecError> {
        let expected = &self.schema.format.version;
        let found = value.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned());
        match found {
            Some(found) if found == *expected => Ok(()),
            Some(found) => Err(CodecError::Version {
                found,
                expected: expected.clone(),
            }),
            None => Err(CodecError::Version {
                found: format!("{:?}", value),
                expected: expected.clone(),
            }),
        }
    }

    fn decode_element<R: Read>(&self, r: &mut R, spec: &FieldSpec) -> Result<Value, CodecError> {
        let width = spec.datatype.width;
        let v = match &spec.datatype.category {
            Category::UnsignedInt => match width {
                1 => Value::U8(r.read_u8().map_err(read_error)?),
                2 => Value::U16(r.read_u16::<LittleEndian>().map_err(read_error)?),
                4 => Value::U32(r.read_u32::<LittleEndian>().map_err(read_error)?),
                _ => Value::U64(r.read_u64::<LittleEndian>().map_err(read_error)?),
            },
            Category::SignedInt => match width {
                1 => Value::I8(r.read_i8().map_err(read_error)?),
                2 => Value::I16(r.read_i16::<LittleEndian>().map_err(read_error)?),
                4 => Value::I32(r.read_i32::<LittleEndian>().map_err(read_error)?),
                _ => Value::I64(r.read_i64::<LittleEndian>().map_err(read_error)?),
            },
            Category::Float => match width {
                4 => Value::Float(r.read_f32::<LittleEndian>().map_err(read_error)?),
                _ => Value::Double(r.read_f64::<LittleEndian>().map_err(read_error)?),
            },
            Category::FixedChars => text_value(read_bytes(r, width)?),
            Category::RawBytes => Value::Bytes(read_bytes(r, width)?),
            Category::LengthPrefixedString => {
                let len = r.read_int::<LittleEndian>(width).map_err(read_error)?;
                let len = usize::try_from(len)
                    .map_err(|_| CodecError::Decode(format!("negative string length {}", len)))?;
                text_value(read_bytes(r, len)?)
            }
            Category::NestedRecord(name) => {
                return Err(CodecError::Schema(format!("struct {} decoded as a scalar", name)))
            }
        };
        Ok(v)
    }

    /// Encode one registered piece. Top-level fields without a value are skipped and reported as
    /// gaps; nested-record fields fall back to their defaults instead.
    pub fn encode_piece(&self, registry: &mut PieceRegistry, name: &str) -> Result<EncodedPiece, CodecError> {
        let id = self
            .schema
            .piece_id(name)
            .ok_or_else(|| CodecError::Schema(format!("Unknown piece: {}", name)))?;
        let mut piece = registry.checkout(id)?;
        let result = self.encode_top(&mut piece, id, registry);
        registry.restore(piece);
        result
    }

    fn encode_top(&self, piece: &mut Piece, id: usize, registry: &mut PieceRegistry) -> Result<EncodedPiece, CodecError> {
        let mut out = Vec::new();
        let mut gaps = Vec::new();
        for i in 0..piece.fields.len() {
            if !self.encode_field(&mut piece.fields, i, Owner::piece(id), registry, &mut out)? {
                debug!("{}.{}: no value, skipped", piece.name(), piece.fields[i].name());
                gaps.push(piece.fields[i].name().to_string());
            }
        }
        piece.byte_length = Some(out.len());
        Ok(EncodedPiece { bytes: out, gaps })
    }

    /// Write one field. Returns false, writing nothing, when the field has no value.
    fn encode_field(
        &self,
        fields: &mut [Field],
        index: usize,
        owner: Owner<'_>,
        registry: &mut PieceRegistry,
        out: &mut Vec<u8>,
    ) -> Result<bool, CodecError> {
        dependency::resolve_in(fields, index, Phase::Commit, owner, registry)?;
        let spec = Rc::clone(&fields[index].spec);
        // The value leaves its slot while it is written so that nested records can read the rest
        // of the owner's fields.
        let Some(mut value) = fields[index].value.take() else {
            return Ok(false);
        };
        if let Value::List(items) = &value {
            fields[index].repeat = items.len();
        }
        let repeat = fields[index].repeat;

        let view = owner.view(fields);
        let inner = Owner::nested(view.as_ref().or(owner.held));
        let result = self.write_value(&spec, &mut value, repeat, inner, registry, out);
        fields[index].value = Some(value);
        result.map(|()| true)
    }

    fn write_value(
        &self,
        spec: &FieldSpec,
        value: &mut Value,
        repeat: usize,
        owner: Owner<'_>,
        registry: &mut PieceRegistry,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        if spec.name == self.schema.format.sentinel {
            match value {
                Value::List(items) => {
                    for item in items.iter() {
                        out.extend_from_slice(item_bytes(spec, item)?);
                    }
                }
                other => out.extend_from_slice(item_bytes(spec, other)?),
            }
            return Ok(());
        }

        match value {
            Value::List(items) => {
                for item in items.iter_mut() {
                    self.encode_item(spec, item, owner, registry, out)?;
                }
            }
            other => {
                for _ in 0..repeat {
                    self.encode_item(spec, other, owner, registry, out)?;
                }
            }
        }
        Ok(())
    }

    fn encode_item(
        &self,
        spec: &FieldSpec,
        item: &mut Value,
        owner: Owner<'_>,
        registry: &mut PieceRegistry,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        if spec.struct_id.is_none() {
            return encode_element(out, spec, item);
        }
        match item {
            Value::Struct(piece) => self
                .encode_struct(piece, owner, registry, out)
                .map_err(|e| in_field(spec, e)),
            other => Err(CodecError::InvalidValue(format!(
                "{}: expected a struct, got {}",
                spec.name,
                other.kind()
            ))),
        }
    }

    fn encode_struct(
        &self,
        piece: &mut Piece,
        owner: Owner<'_>,
        registry: &mut PieceRegistry,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        let start = out.len();
        for j in 0..piece.fields.len() {
            if self.encode_field(&mut piece.fields, j, owner, registry, out)? {
                continue;
            }
            let default = self.default_value(&piece.fields[j], owner, registry)?;
            debug!("{}.{}: filled from default", piece.name(), piece.fields[j].name());
            piece.fields[j].set_value(default);
            if !self.encode_field(&mut piece.fields, j, owner, registry, out)? {
                return Err(CodecError::MissingValue(format!(
                    "{}.{}",
                    piece.name(),
                    piece.fields[j].name()
                )));
            }
        }
        piece.byte_length = Some(out.len() - start);
        Ok(())
    }

    /// Fallback value for an unpopulated nested-record field.
    fn default_value(&self, field: &Field, owner: Owner<'_>, registry: &PieceRegistry) -> Result<Value, CodecError> {
        let spec = &field.spec;
        match (&spec.default, spec.struct_id) {
            (Some(expr), _) => evaluate(expr, &Env::with_held(registry, owner.held)),
            (None, Some(sid)) => Ok(unify(
                (0..field.repeat)
                    .map(|_| Value::Struct(Box::new(self.schema.instantiate_struct(sid))))
                    .collect(),
                spec.collapses_to_scalar,
            )),
            (None, None) => Err(CodecError::Schema(format!(
                "{}: no value and no default",
                spec.name
            ))),
        }
    }
}

fn in_field(spec: &FieldSpec, e: CodecError) -> CodecError {
    match e {
        CodecError::Decode(msg) => CodecError::Decode(format!("{}: {}", spec.name, msg)),
        CodecError::InvalidValue(msg) => CodecError::InvalidValue(format!("{}: {}", spec.name, msg)),
        other => other,
    }
}

fn read_error(e: io::Error) -> CodecError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::Decode("unexpected end of stream".into())
    } else {
        CodecError::Io(e)
    }
}

/// Read exactly `n` bytes without trusting `n` for the initial allocation.
fn read_bytes<R: Read>(r: &mut R, n: usize) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(n.min(PREALLOC_LIMIT * 16));
    let got = r.take(n as u64).read_to_end(&mut buf)?;
    if got < n {
        return Err(CodecError::Decode(format!(
            "unexpected end of stream ({} of {} bytes)",
            got, n
        )));
    }
    Ok(buf)
}

fn text_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(s) => Value::Str(s),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

fn item_bytes<'a>(spec: &FieldSpec, v: &'a Value) -> Result<&'a [u8], CodecError> {
    v.as_bytes().ok_or_else(|| {
        CodecError::InvalidValue(format!("{}: expected bytes, got {}", spec.name, v.kind()))
    })
}

fn encode_element(w: &mut Vec<u8>, spec: &FieldSpec, v: &Value) -> Result<(), CodecError> {
    let width = spec.datatype.width;
    let bits = (width * 8) as u32;
    match &spec.datatype.category {
        Category::UnsignedInt => {
            let n = int_in_range(spec, v, 0, (1i128 << bits) - 1)?;
            w.write_uint::<LittleEndian>(n as u64, width)?;
        }
        Category::SignedInt => {
            let n = int_in_range(spec, v, -(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)?;
            w.write_int::<LittleEndian>(n as i64, width)?;
        }
        Category::Float => match (width, v) {
            (4, Value::Float(f)) => w.write_f32::<LittleEndian>(*f)?,
            (4, other) => w.write_f32::<LittleEndian>(float_of(spec, other)? as f32)?,
            (_, other) => w.write_f64::<LittleEndian>(float_of(spec, other)?)?,
        },
        Category::FixedChars => {
            let bytes = item_bytes(spec, v)?;
            if bytes.len() > width {
                return Err(CodecError::InvalidValue(format!(
                    "{}: {} bytes do not fit in c{}",
                    spec.name,
                    bytes.len(),
                    width
                )));
            }
            w.extend_from_slice(bytes);
            w.resize(w.len() + width - bytes.len(), 0);
        }
        Category::RawBytes => {
            let bytes = item_bytes(spec, v)?;
            if bytes.len() != width {
                return Err(CodecError::InvalidValue(format!(
                    "{}: expected {} raw bytes, got {}",
                    spec.name,
                    width,
                    bytes.len()
                )));
            }
            w.extend_from_slice(bytes);
        }
        Category::LengthPrefixedString => {
            let bytes = item_bytes(spec, v)?;
            let max = (1i128 << (bits - 1)) - 1;
            if bytes.len() as i128 > max {
                return Err(CodecError::InvalidValue(format!(
                    "{}: string of {} bytes exceeds the {}-bit length prefix",
                    spec.name,
                    bytes.len(),
                    bits
                )));
            }
            w.write_int::<LittleEndian>(bytes.len() as i64, width)?;
            w.extend_from_slice(bytes);
        }
        Category::NestedRecord(name) => {
            return Err(CodecError::InvalidValue(format!(
                "{}: struct {} encoded as a scalar",
                spec.name, name
            )))
        }
    }
    Ok(())
}

fn int_in_range(spec: &FieldSpec, v: &Value, min: i128, max: i128) -> Result<i128, CodecError> {
    let n = v.as_i128().ok_or_else(|| {
        CodecError::InvalidValue(format!("{}: expected an integer, got {}", spec.name, v.kind()))
    })?;
    if n < min || n > max {
        return Err(CodecError::InvalidValue(format!(
            "{}: {} out of range for {}",
            spec.name, n, spec.datatype
        )));
    }
    Ok(n)
}

fn float_of(spec: &FieldSpec, v: &Value) -> Result<f64, CodecError> {
    v.as_f64().ok_or_else(|| {
        CodecError::InvalidValue(format!("{}: expected a number, got {}", spec.name, v.kind()))
    })
}
