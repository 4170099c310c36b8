//! Evaluator for the closed expression language used by dependency formulas and defaults.
//!
//! Integers are evaluated as checked `i64`; any float operand promotes the operation to `f64`.
//! Comparisons yield `1`/`0`. Variables come only from the [`Env`] the caller seeds, so a formula
//! cannot observe anything but its bound target values and declared constants.

use crate::ast::{BinOp, Expr, Func, Literal};
use crate::codec::CodecError;
use crate::piece::{Field, HeldPiece, PieceRegistry};
use crate::value::Value;
use std::collections::HashMap;

/// Evaluation scope: bound variables plus, for default expressions, read access to the registry.
#[derive(Default)]
pub struct Env<'a> {
    vars: HashMap<String, Value>,
    registry: Option<&'a PieceRegistry>,
    held: Option<&'a HeldPiece<'a>>,
}

impl<'a> Env<'a> {
    pub fn new() -> Self {
        Env::default()
    }

    /// Scope that may also resolve `Piece.field` references against `registry`.
    pub fn with_registry(registry: &'a PieceRegistry) -> Self {
        Env::with_held(registry, None)
    }

    /// Like [`Env::with_registry`], also seeing pieces that are checked out while they are coded.
    pub(crate) fn with_held(registry: &'a PieceRegistry, held: Option<&'a HeldPiece<'a>>) -> Self {
        Env {
            vars: HashMap::new(),
            registry: Some(registry),
            held,
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

pub fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(i) => Value::I64(*i),
        Literal::Float(f) => Value::Double(*f),
        Literal::String(s) => Value::Str(s.clone()),
        Literal::Bytes(b) => Value::Bytes(b.clone()),
    }
}

pub fn evaluate(expr: &Expr, env: &Env) -> Result<Value, CodecError> {
    match expr {
        Expr::Int(i) => Ok(Value::I64(*i)),
        Expr::Float(f) => Ok(Value::Double(*f)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bytes(b) => Ok(Value::Bytes(b.clone())),
        Expr::List(items) => items
            .iter()
            .map(|e| evaluate(e, env))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Var(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| CodecError::Expression(format!("unbound variable '{}'", name))),
        Expr::FieldRef(piece, field) => {
            let registry = env.registry.ok_or_else(|| {
                CodecError::Expression(format!("{}.{}: field references need a registry", piece, field))
            })?;
            let fields = match registry.get(piece) {
                Some(p) => p.fields(),
                None => registry
                    .piece_id(piece)
                    .and_then(|id| HeldPiece::find(env.held, id))
                    .ok_or_else(|| CodecError::Schema(format!("piece '{}' not in registry", piece)))?,
            };
            Ok(fields
                .iter()
                .find(|f| f.name() == field)
                .and_then(Field::value)
                .cloned()
                .unwrap_or(Value::I64(0)))
        }
        Expr::Neg(inner) => match evaluate(inner, env)? {
            Value::Float(f) => Ok(Value::Double(-(f as f64))),
            Value::Double(f) => Ok(Value::Double(-f)),
            v => {
                let i = int_operand(&v, "-")?;
                i.checked_neg()
                    .map(Value::I64)
                    .ok_or_else(|| CodecError::Expression("integer overflow in negation".into()))
            }
        },
        Expr::Binary(op, lhs, rhs) => {
            let l = evaluate(lhs, env)?;
            let r = evaluate(rhs, env)?;
            binary(*op, &l, &r)
        }
        Expr::Call(func, args) => {
            let args = args
                .iter()
                .map(|e| evaluate(e, env))
                .collect::<Result<Vec<_>, _>>()?;
            call(*func, &args)
        }
    }
}

fn is_float(v: &Value) -> bool {
    matches!(v, Value::Float(_) | Value::Double(_))
}

fn int_operand(v: &Value, op: &str) -> Result<i64, CodecError> {
    v.as_i64().ok_or_else(|| {
        CodecError::Expression(format!("operator '{}' expects a number, got {}", op, v.kind()))
    })
}

fn float_operand(v: &Value, op: &str) -> Result<f64, CodecError> {
    v.as_f64().ok_or_else(|| {
        CodecError::Expression(format!("operator '{}' expects a number, got {}", op, v.kind()))
    })
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, CodecError> {
    let sym = op_symbol(op);
    if matches!(op, BinOp::Eq | BinOp::Ne) && !(l.as_f64().is_some() && r.as_f64().is_some()) {
        let equal = match (l.as_bytes(), r.as_bytes()) {
            (Some(a), Some(b)) => a == b,
            _ => l == r,
        };
        return Ok(Value::I64((equal == (op == BinOp::Eq)) as i64));
    }
    if is_float(l) || is_float(r) {
        let a = float_operand(l, sym)?;
        let b = float_operand(r, sym)?;
        let v = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div | BinOp::Rem if b == 0.0 => {
                return Err(CodecError::Expression(format!("division by zero in '{}'", sym)))
            }
            BinOp::Div => a / b,
            BinOp::Rem => a % b,
            BinOp::Eq => return Ok(Value::I64((a == b) as i64)),
            BinOp::Ne => return Ok(Value::I64((a != b) as i64)),
            BinOp::Lt => return Ok(Value::I64((a < b) as i64)),
            BinOp::Le => return Ok(Value::I64((a <= b) as i64)),
            BinOp::Gt => return Ok(Value::I64((a > b) as i64)),
            BinOp::Ge => return Ok(Value::I64((a >= b) as i64)),
        };
        return Ok(Value::Double(v));
    }
    let a = int_operand(l, sym)?;
    let b = int_operand(r, sym)?;
    let v = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => {
            return Err(CodecError::Expression(format!("division by zero in '{}'", sym)))
        }
        BinOp::Div => a.checked_div(b),
        BinOp::Rem => a.checked_rem(b),
        BinOp::Eq => Some((a == b) as i64),
        BinOp::Ne => Some((a != b) as i64),
        BinOp::Lt => Some((a < b) as i64),
        BinOp::Le => Some((a <= b) as i64),
        BinOp::Gt => Some((a > b) as i64),
        BinOp::Ge => Some((a >= b) as i64),
    };
    v.map(Value::I64)
        .ok_or_else(|| CodecError::Expression(format!("integer overflow in '{}'", sym)))
}

fn call(func: Func, args: &[Value]) -> Result<Value, CodecError> {
    match func {
        Func::Len => match &args[0] {
            Value::List(items) => Ok(Value::I64(items.len() as i64)),
            Value::Str(s) => Ok(Value::I64(s.len() as i64)),
            Value::Bytes(b) => Ok(Value::I64(b.len() as i64)),
            // A lone value is a one-element sequence.
            _ => Ok(Value::I64(1)),
        },
        Func::Sum => {
            let items = match &args[0] {
                Value::List(items) => items.as_slice(),
                other => std::slice::from_ref(other),
            };
            items
                .iter()
                .try_fold(Value::I64(0), |acc, v| binary(BinOp::Add, &acc, v))
        }
        Func::Min | Func::Max => {
            let less = binary(BinOp::Lt, &args[0], &args[1])?.as_i64() == Some(1);
            let pick_first = (func == Func::Min) == less;
            Ok(if pick_first { args[0].clone() } else { args[1].clone() })
        }
        Func::Abs => match &args[0] {
            Value::Float(f) => Ok(Value::Double((*f as f64).abs())),
            Value::Double(f) => Ok(Value::Double(f.abs())),
            v => int_operand(v, "abs")?
                .checked_abs()
                .map(Value::I64)
                .ok_or_else(|| CodecError::Expression("integer overflow in abs()".into())),
        },
        Func::Select => {
            let cond = args[0].as_f64().ok_or_else(|| {
                CodecError::Expression(format!("select() condition must be a number, got {}", args[0].kind()))
            })?;
            Ok(if cond != 0.0 { args[1].clone() } else { args[2].clone() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;

    fn eval_with(src: &str, vars: &[(&str, Value)]) -> Result<Value, CodecError> {
        let mut env = Env::new();
        for (k, v) in vars {
            env.bind(*k, v.clone());
        }
        evaluate(&parse_expr(src).expect("parse"), &env)
    }

    #[test]
    fn field_references_reach_checked_out_pieces() {
        let schema = crate::schema::load_schema_str("piece H {\n\tn: u8;\n}\n").unwrap();
        let mut registry = schema.new_registry();
        registry.get_mut("H").unwrap().set("n", Value::U8(4)).unwrap();
        let expr = parse_expr("H.n + 1").unwrap();
        assert_eq!(evaluate(&expr, &Env::with_registry(&registry)).unwrap(), Value::I64(5));

        let held = registry.checkout(0).unwrap();
        let err = evaluate(&expr, &Env::with_registry(&registry)).unwrap_err();
        assert!(matches!(err, CodecError::Schema(_)));
        let view = held.owner().view(held.fields());
        assert_eq!(evaluate(&expr, &Env::with_held(&registry, view.as_ref())).unwrap(), Value::I64(5));
    }

    #[test]
    fn integer_arithmetic() {
        assert_eq!(eval_with("x * 2", &[("x", Value::U32(21))]).unwrap(), Value::I64(42));
        assert_eq!(eval_with("7 / 2", &[]).unwrap(), Value::I64(3));
        assert_eq!(eval_with("7 % 4", &[]).unwrap(), Value::I64(3));
        assert_eq!(eval_with("-x + 1", &[("x", Value::I8(-3))]).unwrap(), Value::I64(4));
    }

    #[test]
    fn float_promotion() {
        assert_eq!(eval_with("x * 2", &[("x", Value::Float(1.5))]).unwrap(), Value::Double(3.0));
        assert_eq!(eval_with("1 + 0.5", &[]).unwrap(), Value::Double(1.5));
    }

    #[test]
    fn comparisons_and_select() {
        assert_eq!(eval_with("select(x > 3, 10, 20)", &[("x", Value::U8(5))]).unwrap(), Value::I64(10));
        assert_eq!(eval_with("x == \"1.40\"", &[("x", Value::Str("1.40".into()))]).unwrap(), Value::I64(1));
        assert_eq!(eval_with("min(4, 9) + max(4, 9)", &[]).unwrap(), Value::I64(13));
    }

    #[test]
    fn sequence_functions() {
        let list = Value::List(vec![Value::U16(1), Value::U16(2), Value::U16(3)]);
        assert_eq!(eval_with("len(x)", &[("x", list.clone())]).unwrap(), Value::I64(3));
        assert_eq!(eval_with("sum(x)", &[("x", list)]).unwrap(), Value::I64(6));
        assert_eq!(eval_with("len(x)", &[("x", Value::U8(9))]).unwrap(), Value::I64(1));
    }

    #[test]
    fn failures() {
        assert!(matches!(eval_with("1 / 0", &[]), Err(CodecError::Expression(_))));
        assert!(matches!(eval_with("y + 1", &[]), Err(CodecError::Expression(_))));
        assert!(matches!(
            eval_with("x + 1", &[("x", Value::Str("a".into()))]),
            Err(CodecError::Expression(_))
        ));
        assert!(matches!(
            eval_with("9223372036854775807 + 1", &[]),
            Err(CodecError::Expression(_))
        ));
        assert!(matches!(eval_with("Piece.field", &[]), Err(CodecError::Expression(_))));
    }
}
