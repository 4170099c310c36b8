//! Parse schema DSL source into AST using PEST.

use crate::ast::*;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SchemaParser;

/// Parse schema source into AST.
pub fn parse(source: &str) -> Result<Schema, String> {
    let pairs = SchemaParser::parse(Rule::schema, source)
        .map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    build_schema(pair)
}

/// Parse a standalone expression (used by tests and tooling).
pub fn parse_expr(source: &str) -> Result<Expr, String> {
    let mut pairs = SchemaParser::parse(Rule::expr, source.trim())
        .map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.next().ok_or("Empty expression")?;
    if pair.as_str().len() != source.trim().len() {
        return Err(format!("Parse error: trailing input after '{}'", pair.as_str()));
    }
    build_expr(pair)
}

fn build_schema(pair: Pair<Rule>) -> Result<Schema, String> {
    let mut schema = Schema::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::format_section => {
                if schema.format.is_some() {
                    return Err("Duplicate format section".to_string());
                }
                schema.format = Some(build_format(inner)?);
            }
            Rule::piece_section => schema.pieces.push(build_section(inner)?),
            Rule::struct_section => schema.structs.push(build_section(inner)?),
            _ => {}
        }
    }
    Ok(schema)
}

fn build_format(pair: Pair<Rule>) -> Result<FormatSection, String> {
    let mut entries = Vec::new();
    for entry in pair.into_inner() {
        if entry.as_rule() != Rule::format_entry {
            continue;
        }
        let mut it = entry.into_inner();
        let key = it.next().ok_or("format entry: key")?.as_str().to_string();
        let value = build_literal(it.next().ok_or("format entry: value")?)?;
        entries.push((key, value));
    }
    Ok(FormatSection { entries })
}

fn build_section(pair: Pair<Rule>) -> Result<SectionDef, String> {
    let mut name = String::new();
    let mut fields = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::field => fields.push(build_field(inner)?),
            _ => {}
        }
    }
    Ok(SectionDef { name, fields })
}

fn build_field(pair: Pair<Rule>) -> Result<FieldDef, String> {
    let mut name = String::new();
    let mut type_token = None;
    let mut repeat = 1;
    let mut default = None;
    let mut hooks = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::type_token => type_token = Some(inner.as_str().to_string()),
            Rule::repeat_spec => {
                let n = inner.into_inner().next().ok_or("repeat: missing count")?;
                repeat = parse_unsigned(n.as_str())?;
            }
            Rule::default_spec => {
                let e = inner.into_inner().next().ok_or("default: missing expression")?;
                default = Some(build_expr(e)?);
            }
            Rule::hook_block => {
                for hook in inner.into_inner() {
                    hooks.push(build_hook(hook)?);
                }
            }
            _ => {}
        }
    }

    Ok(FieldDef {
        type_token: type_token.ok_or_else(|| format!("field {}: missing type", name))?,
        name,
        repeat,
        default,
        hooks,
    })
}

fn build_hook(pair: Pair<Rule>) -> Result<HookDef, String> {
    let mut it = pair.into_inner();
    let phase_pair = it.next().ok_or("hook: missing phase")?;
    let phase = match phase_pair.as_str() {
        "on_construct" => Phase::Construct,
        "on_commit" => Phase::Commit,
        "on_refresh" => Phase::Refresh,
        other => return Err(format!("Unknown hook phase: {}", other)),
    };
    let action_pair = it.next().ok_or("hook: missing action")?;
    let action = match action_pair.as_rule() {
        Rule::refresh_self => ActionDef::RefreshSelf,
        Rule::refresh_action => {
            let list = action_pair.into_inner().next().ok_or("refresh: missing targets")?;
            ActionDef::Refresh(build_targets(list)?)
        }
        Rule::set_value => ActionDef::SetValue(build_formula(first_inner(action_pair)?)?),
        Rule::set_repeat => ActionDef::SetRepeat(build_formula(first_inner(action_pair)?)?),
        other => return Err(format!("Unhandled hook action: {:?}", other)),
    };
    Ok(HookDef { phase, action })
}

fn first_inner(pair: Pair<Rule>) -> Result<Pair<Rule>, String> {
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| format!("{:?}: empty", rule))
}

fn build_formula(pair: Pair<Rule>) -> Result<FormulaDef, String> {
    let mut targets = Vec::new();
    let mut bindings = None;
    let mut expr = None;
    let mut constants = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::target_list => targets = build_targets(inner)?,
            Rule::bindings => {
                bindings = Some(inner.into_inner().map(|p| p.as_str().to_string()).collect());
            }
            Rule::expr => expr = Some(build_expr(inner)?),
            Rule::constants => {
                for c in inner.into_inner() {
                    let mut it = c.into_inner();
                    let name = it.next().ok_or("constant: name")?.as_str().to_string();
                    let value = build_literal(it.next().ok_or("constant: value")?)?;
                    constants.push((name, value));
                }
            }
            _ => {}
        }
    }
    Ok(FormulaDef {
        targets,
        bindings,
        expr: expr.ok_or("formula: missing expression")?,
        constants,
    })
}

fn build_targets(pair: Pair<Rule>) -> Result<Vec<TargetName>, String> {
    let mut out = Vec::new();
    for target in pair.into_inner() {
        let mut it = target.into_inner();
        let section = it.next().ok_or("target: section")?.as_str().to_string();
        let field = it.next().ok_or("target: field")?.as_str().to_string();
        out.push(TargetName { section, field });
    }
    Ok(out)
}

fn build_literal(pair: Pair<Rule>) -> Result<Literal, String> {
    let inner = if pair.as_rule() == Rule::literal {
        first_inner(pair)?
    } else {
        pair
    };
    match inner.as_rule() {
        Rule::signed_int => {
            let s = inner.as_str();
            match s.strip_prefix('-') {
                Some(rest) => {
                    let v = parse_unsigned(rest)?;
                    let v = i64::try_from(v).map_err(|_| format!("Integer out of range: {}", s))?;
                    Ok(Literal::Int(-v))
                }
                None => {
                    let v = parse_unsigned(s)?;
                    Ok(Literal::Int(
                        i64::try_from(v).map_err(|_| format!("Integer out of range: {}", s))?,
                    ))
                }
            }
        }
        Rule::signed_float => inner
            .as_str()
            .parse()
            .map(Literal::Float)
            .map_err(|e| format!("Bad float {}: {}", inner.as_str(), e)),
        Rule::string => Ok(Literal::String(unescape(first_inner(inner)?.as_str())?)),
        Rule::bytes_lit => Ok(Literal::Bytes(parse_hex(first_inner(inner)?.as_str())?)),
        other => Err(format!("Unhandled literal: {:?}", other)),
    }
}

fn parse_unsigned(s: &str) -> Result<u64, String> {
    let r = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    r.map_err(|e| format!("Bad integer {}: {}", s, e))
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err(format!("Hex literal must have an even number of digits: {}", s));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

fn unescape(s: &str) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => return Err(format!("Unknown escape: \\{}", other)),
            None => return Err("Dangling escape at end of string".to_string()),
        }
    }
    Ok(out)
}

// ==================== Expressions ====================

fn pratt() -> PrattParser<Rule> {
    PrattParser::new()
        .op(Op::infix(Rule::eq, Assoc::Left)
            | Op::infix(Rule::ne, Assoc::Left)
            | Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::neg))
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr, String> {
    build_expr_pairs(pair.into_inner())
}

fn build_expr_pairs(pairs: Pairs<Rule>) -> Result<Expr, String> {
    pratt()
        .map_primary(build_primary)
        .map_prefix(|op, rhs| match op.as_rule() {
            Rule::neg => Ok(Expr::Neg(Box::new(rhs?))),
            other => Err(format!("Unknown prefix operator: {:?}", other)),
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::add => BinOp::Add,
                Rule::sub => BinOp::Sub,
                Rule::mul => BinOp::Mul,
                Rule::div => BinOp::Div,
                Rule::rem => BinOp::Rem,
                Rule::eq => BinOp::Eq,
                Rule::ne => BinOp::Ne,
                Rule::lt => BinOp::Lt,
                Rule::le => BinOp::Le,
                Rule::gt => BinOp::Gt,
                Rule::ge => BinOp::Ge,
                other => return Err(format!("Unknown operator: {:?}", other)),
            };
            Ok(Expr::Binary(op, Box::new(lhs?), Box::new(rhs?)))
        })
        .parse(pairs)
}

fn build_primary(pair: Pair<Rule>) -> Result<Expr, String> {
    match pair.as_rule() {
        Rule::expr => build_expr(pair),
        Rule::int => parse_unsigned(pair.as_str()).and_then(|v| {
            i64::try_from(v)
                .map(Expr::Int)
                .map_err(|_| format!("Integer out of range: {}", pair.as_str()))
        }),
        Rule::float => pair
            .as_str()
            .parse()
            .map(Expr::Float)
            .map_err(|e| format!("Bad float {}: {}", pair.as_str(), e)),
        Rule::string => Ok(Expr::Str(unescape(first_inner(pair)?.as_str())?)),
        Rule::bytes_lit => Ok(Expr::Bytes(parse_hex(first_inner(pair)?.as_str())?)),
        Rule::ident => Ok(Expr::Var(pair.as_str().to_string())),
        Rule::field_ref => {
            let mut it = pair.into_inner();
            let section = it.next().ok_or("field ref: section")?.as_str().to_string();
            let field = it.next().ok_or("field ref: field")?.as_str().to_string();
            Ok(Expr::FieldRef(section, field))
        }
        Rule::list_expr => pair
            .into_inner()
            .map(build_expr)
            .collect::<Result<Vec<_>, _>>()
            .map(Expr::List),
        Rule::call => {
            let mut it = pair.into_inner();
            let name = it.next().ok_or("call: name")?.as_str();
            let func = Func::from_name(name).ok_or_else(|| format!("Unknown function: {}", name))?;
            let args = it.map(build_expr).collect::<Result<Vec<_>, _>>()?;
            if args.len() != func.arity() {
                return Err(format!(
                    "{}() takes {} argument(s), got {}",
                    name,
                    func.arity(),
                    args.len()
                ));
            }
            Ok(Expr::Call(func, args))
        }
        other => Err(format!("Unhandled expression: {:?}", other)),
    }
}
