//! Record sections ("pieces"), their fields, and the registry that holds the live pieces of one
//! decode or encode pass.

use crate::ast::Phase;
use crate::codec::CodecError;
use crate::datatype::DataType;
use crate::dependency;
use crate::schema::{FieldSpec, SectionKind, SectionSpec};
use crate::value::{unify, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// One named, typed, possibly repeating value slot.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) spec: Rc<FieldSpec>,
    /// Current repeat count; starts at the declared repeat and may be overridden by hooks.
    pub repeat: usize,
    pub value: Option<Value>,
}

impl Field {
    pub(crate) fn from_spec(spec: Rc<FieldSpec>) -> Self {
        Field {
            repeat: spec.repeat,
            value: None,
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    pub fn datatype(&self) -> &DataType {
        &self.spec.datatype
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Assign a value through the unification rule. A sequence also fixes the repeat count.
    pub fn set_value(&mut self, value: Value) {
        let value = match value {
            Value::List(items) => {
                self.repeat = items.len();
                unify(items, self.spec.collapses_to_scalar)
            }
            other => other,
        };
        self.value = Some(value);
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.spec.name == other.spec.name && self.repeat == other.repeat && self.value == other.value
    }
}

/// An ordered collection of fields: one top-level piece or one nested-record instance.
#[derive(Debug, Clone)]
pub struct Piece {
    spec: Rc<SectionSpec>,
    pub(crate) fields: Vec<Field>,
    pub(crate) byte_length: Option<usize>,
}

/// Fields of a piece that is checked out further up the call chain. They stay readable (by nested
/// records and by other pieces' hooks) but cannot be written until the piece is restored.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeldPiece<'a> {
    id: usize,
    fields: &'a [Field],
    outer: Option<&'a HeldPiece<'a>>,
}

impl<'a> HeldPiece<'a> {
    /// Fields of piece `id`, searching `held` and everything held outside it.
    pub(crate) fn find(mut held: Option<&HeldPiece<'a>>, id: usize) -> Option<&'a [Field]> {
        while let Some(h) = held {
            if h.id == id {
                return Some(h.fields);
            }
            held = h.outer;
        }
        None
    }
}

/// Where a slice of fields being resolved or coded lives: the piece it belongs to, when it is a
/// top-level piece's own field list, and the pieces held by the callers.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Owner<'a> {
    pub(crate) piece: Option<usize>,
    pub(crate) held: Option<&'a HeldPiece<'a>>,
}

impl<'a> Owner<'a> {
    pub(crate) fn piece(id: usize) -> Self {
        Owner {
            piece: Some(id),
            held: None,
        }
    }

    /// Fields of a nested record: no piece of their own, same held pieces as the record's owner.
    pub(crate) fn nested(held: Option<&'a HeldPiece<'a>>) -> Self {
        Owner { piece: None, held }
    }

    /// The owner's own fields as a held piece, to hand down while they are borrowed read-only.
    /// Chain it in front of the other held pieces with `view.as_ref().or(owner.held)`.
    pub(crate) fn view<'b>(&self, fields: &'b [Field]) -> Option<HeldPiece<'b>>
    where
        'a: 'b,
    {
        self.piece.map(|id| HeldPiece {
            id,
            fields,
            outer: self.held,
        })
    }
}

impl Piece {
    pub fn new(spec: Rc<SectionSpec>) -> Self {
        let fields = spec.fields.iter().cloned().map(Field::from_spec).collect();
        Piece {
            spec,
            fields,
            byte_length: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &SectionSpec {
        &self.spec
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// How the dependency engine sees this piece's fields while it is checked out.
    pub(crate) fn owner(&self) -> Owner<'static> {
        match self.spec.kind {
            SectionKind::Piece => Owner::piece(self.spec.id),
            SectionKind::Struct => Owner::default(),
        }
    }

    /// Bytes consumed or produced by the last full decode/encode pass.
    pub fn byte_length(&self) -> Option<usize> {
        self.byte_length
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.spec.field_index(name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.field_index(name).map(|i| &self.fields[i])
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.field_index(name).map(move |i| &mut self.fields[i])
    }

    /// Current value of a field, if it has one.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.field(name).and_then(Field::value)
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<(), CodecError> {
        let section = self.spec.name.clone();
        let field = self
            .field_mut(name)
            .ok_or_else(|| CodecError::Schema(format!("{}: unknown field {}", section, name)))?;
        field.set_value(value);
        Ok(())
    }

    /// Assign every field positionally, re-running construct hooks for each assigned field.
    pub fn set_values(&mut self, values: Vec<Value>, registry: &mut PieceRegistry) -> Result<(), CodecError> {
        if values.len() != self.fields.len() {
            return Err(CodecError::Schema(format!(
                "{}: {} values given for {} fields",
                self.spec.name,
                values.len(),
                self.fields.len()
            )));
        }
        let owner = self.owner();
        for (i, value) in values.into_iter().enumerate() {
            self.fields[i].set_value(value);
            if self.fields[i].spec.has_hooks(Phase::Construct) {
                dependency::resolve_in(&mut self.fields, i, Phase::Construct, owner, registry)?;
            }
        }
        Ok(())
    }
}

impl PartialEq for Piece {
    fn eq(&self, other: &Self) -> bool {
        self.spec.name == other.spec.name && self.fields == other.fields
    }
}

/// Live pieces of one decode or encode pass, in insertion order.
///
/// A piece being processed is checked out of its slot for the duration of the pass; while it is
/// out, registry lookups miss it and its fields are only reachable read-only through `HeldPiece`.
#[derive(Debug, Default)]
pub struct PieceRegistry {
    slots: Vec<Option<Piece>>,
    names: Vec<String>,
    by_name: HashMap<String, usize>,
    by_piece_id: HashMap<usize, usize>,
}

impl PieceRegistry {
    pub fn new() -> Self {
        PieceRegistry::default()
    }

    /// Add a piece, or replace the piece of the same name in place. Returns the replaced piece.
    pub fn insert(&mut self, piece: Piece) -> Option<Piece> {
        if let Some(&slot) = self.by_name.get(piece.name()) {
            return self.slots[slot].replace(piece);
        }
        let slot = self.slots.len();
        if piece.spec.kind == SectionKind::Piece {
            self.by_piece_id.insert(piece.spec.id, slot);
        }
        self.by_name.insert(piece.name().to_string(), slot);
        self.names.push(piece.name().to_string());
        self.slots.push(Some(piece));
        None
    }

    pub fn get(&self, name: &str) -> Option<&Piece> {
        self.by_name.get(name).and_then(|&i| self.slots[i].as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Piece> {
        match self.by_name.get(name) {
            Some(&i) => self.slots[i].as_mut(),
            None => None,
        }
    }

    /// Piece by schema piece id (the form hook targets are resolved to).
    pub fn by_id(&self, id: usize) -> Option<&Piece> {
        self.by_piece_id.get(&id).and_then(|&i| self.slots[i].as_ref())
    }

    /// Schema piece id registered under `name`, whether or not the piece is checked out.
    pub(crate) fn piece_id(&self, name: &str) -> Option<usize> {
        let slot = self.by_name.get(name)?;
        self.by_piece_id
            .iter()
            .find(|(_, s)| *s == slot)
            .map(|(&id, _)| id)
    }

    /// Names in insertion order, including pieces currently checked out.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Pieces in insertion order (checked-out pieces are skipped).
    pub fn iter(&self) -> impl Iterator<Item = &Piece> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub(crate) fn checkout(&mut self, id: usize) -> Result<Piece, CodecError> {
        self.by_piece_id
            .get(&id)
            .and_then(|&i| self.slots[i].take())
            .ok_or_else(|| CodecError::Schema(format!("piece #{} is not available in the registry", id)))
    }

    pub(crate) fn checkout_by_name(&mut self, name: &str) -> Result<Piece, CodecError> {
        self.by_name
            .get(name)
            .and_then(|&i| self.slots[i].take())
            .ok_or_else(|| CodecError::Schema(format!("piece {} is not available in the registry", name)))
    }

    pub(crate) fn restore(&mut self, piece: Piece) {
        self.insert(piece);
    }

    /// Bulk-assign a registered piece's fields (see [`Piece::set_values`]).
    pub fn set_values(&mut self, name: &str, values: Vec<Value>) -> Result<(), CodecError> {
        let mut piece = self.checkout_by_name(name)?;
        let result = piece.set_values(values, self);
        self.restore(piece);
        result
    }

    /// Run the refresh hooks of one field of a registered piece.
    pub fn refresh(&mut self, name: &str, field: &str) -> Result<(), CodecError> {
        let mut piece = self.checkout_by_name(name)?;
        let result = match piece.field_index(field) {
            Some(i) => {
                let owner = piece.owner();
                dependency::resolve_in(&mut piece.fields, i, Phase::Refresh, owner, self)
            }
            None => Err(CodecError::Schema(format!("{}: unknown field {}", name, field))),
        };
        self.restore(piece);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::load_schema_str;

    const SRC: &str = r#"
piece Header {
	a: u8;
	b: u16 [2];
}
piece Body {
	c: u32;
}
"#;

    #[test]
    fn named_access() {
        let schema = load_schema_str(SRC).unwrap();
        let mut piece = schema.instantiate_piece(0);
        assert_eq!(piece.get("a"), None);
        piece.set("a", Value::U8(7)).unwrap();
        assert_eq!(piece.get("a"), Some(&Value::U8(7)));
        assert!(matches!(piece.set("zz", Value::U8(1)), Err(CodecError::Schema(_))));

        piece.set("b", Value::List(vec![Value::U16(1)])).unwrap();
        assert_eq!(piece.field("b").unwrap().repeat, 1);
        assert_eq!(piece.get("b"), Some(&Value::List(vec![Value::U16(1)])));
    }

    #[test]
    fn bulk_set_checks_arity() {
        let schema = load_schema_str(SRC).unwrap();
        let mut registry = schema.new_registry();
        let err = registry.set_values("Header", vec![Value::U8(1)]).unwrap_err();
        assert!(matches!(err, CodecError::Schema(_)));
        registry
            .set_values("Header", vec![Value::U8(1), Value::List(vec![Value::U16(2), Value::U16(3)])])
            .unwrap();
        assert_eq!(registry.get("Header").unwrap().get("a"), Some(&Value::U8(1)));
        // The piece is back in its slot after the call, failed or not.
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Header", "Body"]);
        assert_eq!(registry.iter().count(), 2);
    }

    #[test]
    fn checkout_hides_piece() {
        let schema = load_schema_str(SRC).unwrap();
        let mut registry = schema.new_registry();
        let body = registry.checkout(1).unwrap();
        assert!(registry.get("Body").is_none());
        assert!(registry.by_id(1).is_none());
        assert!(registry.checkout(1).is_err());
        registry.restore(body);
        assert!(registry.by_id(1).is_some());
    }
}
