//! Dependency resolution: runs a field's hooks for one lifecycle phase.
//!
//! Construct hooks run before a field is read, commit hooks before it is written, refresh hooks on
//! demand (and whenever another hook asks for a recompute). Every hook of the requested phase runs,
//! in declaration order.

use crate::ast::Phase;
use crate::codec::CodecError;
use crate::expr::{evaluate, Env};
use crate::piece::{Field, HeldPiece, Owner, Piece, PieceRegistry};
use crate::schema::{Action, Formula, Scope, TargetRef};
use crate::value::Value;
use log::trace;
use std::rc::Rc;

/// Refresh chains deeper than this are treated as a cycle in the schema.
const MAX_DEPTH: usize = 64;

/// Run the `phase` hooks of `fields[index]`. `fields` is the section that owns the field; other
/// pieces are reached through `registry`.
pub fn resolve(
    fields: &mut [Field],
    index: usize,
    phase: Phase,
    registry: &mut PieceRegistry,
) -> Result<(), CodecError> {
    resolve_in(fields, index, phase, Owner::default(), registry)
}

/// [`resolve`] for fields whose piece (or whose callers' pieces) may be checked out of `registry`.
/// Targets in those pieces are read through `owner` instead.
pub(crate) fn resolve_in(
    fields: &mut [Field],
    index: usize,
    phase: Phase,
    owner: Owner<'_>,
    registry: &mut PieceRegistry,
) -> Result<(), CodecError> {
    resolve_at(fields, index, phase, owner, registry, 0)
}

fn resolve_at(
    fields: &mut [Field],
    index: usize,
    phase: Phase,
    owner: Owner<'_>,
    registry: &mut PieceRegistry,
    depth: usize,
) -> Result<(), CodecError> {
    let spec = Rc::clone(&fields[index].spec);
    if depth > MAX_DEPTH {
        return Err(CodecError::Schema(format!(
            "{}: dependency chain deeper than {} (refresh cycle?)",
            spec.name, MAX_DEPTH
        )));
    }
    for hook in spec.hooks.iter().filter(|h| h.phase == phase) {
        match &hook.action {
            Action::RecomputeSelf => resolve_at(fields, index, Phase::Refresh, owner, registry, depth + 1)?,
            Action::RecomputeTarget(targets) => {
                for target in targets {
                    refresh_target(fields, target, owner, registry, depth + 1)?;
                }
            }
            Action::OverrideValue(formula) => {
                for target in &formula.targets {
                    let input = read_target(fields, target, owner, registry)?;
                    let value = apply(formula, input)?;
                    trace!("{} <- {} (via {})", spec.name, value.kind(), target.label);
                    fields[index].set_value(value);
                }
            }
            Action::OverrideRepeatCount(formula) => {
                for target in &formula.targets {
                    let input = read_target(fields, target, owner, registry)?;
                    let value = apply(formula, input)?;
                    let count = value
                        .as_i64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| {
                            CodecError::Expression(format!(
                                "{}: repeat count must be a non-negative integer, got {:?}",
                                spec.name, value
                            ))
                        })?;
                    trace!("{} repeat <- {} (via {})", spec.name, count, target.label);
                    fields[index].repeat = count;
                }
            }
        }
    }
    Ok(())
}

fn refresh_target(
    fields: &mut [Field],
    target: &TargetRef,
    owner: Owner<'_>,
    registry: &mut PieceRegistry,
    depth: usize,
) -> Result<(), CodecError> {
    match target.scope {
        Scope::Own => resolve_at(fields, target.field, Phase::Refresh, owner, registry, depth),
        Scope::Piece(id) if owner.piece == Some(id) => {
            resolve_at(fields, target.field, Phase::Refresh, owner, registry, depth)
        }
        Scope::Piece(id) => {
            let Ok(mut piece) = registry.checkout(id) else {
                if HeldPiece::find(owner.held, id).is_some() {
                    return Err(CodecError::Schema(format!(
                        "target {}: piece is being processed and cannot be refreshed",
                        target.label
                    )));
                }
                return Err(unavailable(target));
            };
            // The caller's fields stay readable while the target piece runs its hooks.
            let view = owner.view(fields);
            let inner = Owner {
                piece: Some(id),
                held: view.as_ref().or(owner.held),
            };
            let result = resolve_at(&mut piece.fields, target.field, Phase::Refresh, inner, registry, depth);
            registry.restore(piece);
            result
        }
    }
}

fn unavailable(target: &TargetRef) -> CodecError {
    CodecError::Schema(format!("target {}: piece is not available in the registry", target.label))
}

/// Current value of a target field. A field that was never populated reads as its default, or 0.
fn read_target(
    fields: &[Field],
    target: &TargetRef,
    owner: Owner<'_>,
    registry: &PieceRegistry,
) -> Result<Value, CodecError> {
    let section = match target.scope {
        Scope::Own => fields,
        Scope::Piece(id) if owner.piece == Some(id) => fields,
        Scope::Piece(id) => registry
            .by_id(id)
            .map(Piece::fields)
            .or_else(|| HeldPiece::find(owner.held, id))
            .ok_or_else(|| unavailable(target))?,
    };
    let field = section
        .get(target.field)
        .ok_or_else(|| CodecError::Schema(format!("target {}: unknown field", target.label)))?;

    match (&field.value, &field.spec.default) {
        (Some(v), _) => Ok(v.clone()),
        (None, Some(default)) => {
            let view = owner.view(fields);
            evaluate(default, &Env::with_held(registry, view.as_ref().or(owner.held)))
        }
        (None, None) => Ok(Value::I64(0)),
    }
}

/// Evaluate a formula against one target value in a scope of its constants and bindings only.
fn apply(formula: &Formula, input: Value) -> Result<Value, CodecError> {
    let mut env = Env::new();
    for (name, value) in &formula.constants {
        env.bind(name.clone(), value.clone());
    }
    match &formula.bindings {
        Some(names) => {
            let items = match input {
                Value::List(items) => items,
                other => vec![other],
            };
            for (name, item) in names.iter().zip(items) {
                env.bind(name.clone(), item);
            }
        }
        None => env.bind("x", input),
    }
    evaluate(&formula.expr, &env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::load_schema_str;

    #[test]
    fn override_value_doubles_target() {
        let schema = load_schema_str(
            r#"
piece P {
	b: u32;
	a: u32 {
		on_construct: set_value(self.b) = x * 2;
	}
}
"#,
        )
        .unwrap();
        let mut registry = schema.new_registry();
        let mut piece = schema.instantiate_piece(0);
        piece.set("b", Value::U32(21)).unwrap();
        resolve(&mut piece.fields, 1, Phase::Construct, &mut registry).unwrap();
        assert_eq!(piece.get("a"), Some(&Value::I64(42)));
        // Refresh hooks are separate: nothing declared, nothing changes.
        piece.set("b", Value::U32(5)).unwrap();
        resolve(&mut piece.fields, 1, Phase::Refresh, &mut registry).unwrap();
        assert_eq!(piece.get("a"), Some(&Value::I64(42)));
    }

    #[test]
    fn refresh_cycle_is_reported() {
        let schema = load_schema_str(
            r#"
piece P {
	a: u8 {
		on_refresh: refresh_self;
	}
}
"#,
        )
        .unwrap();
        let mut registry = schema.new_registry();
        let mut piece = schema.instantiate_piece(0);
        let err = resolve(&mut piece.fields, 0, Phase::Refresh, &mut registry).unwrap_err();
        assert!(matches!(err, CodecError::Schema(_)));
    }

    #[test]
    fn unpopulated_target_reads_default() {
        let schema = load_schema_str(
            r#"
piece P {
	b: u32 = 7;
	a: u32 {
		on_construct: set_value(self.b) = x + 1;
	}
}
"#,
        )
        .unwrap();
        let mut registry = schema.new_registry();
        let mut piece = schema.instantiate_piece(0);
        resolve(&mut piece.fields, 1, Phase::Construct, &mut registry).unwrap();
        assert_eq!(piece.get("a"), Some(&Value::I64(8)));
    }
}
