//! Resolved schema: sections and fields by index, typed dependency references, format settings.
//!
//! Resolution happens once, when the schema is loaded. Every hook target becomes a
//! [`TargetRef`] (scope + field index), every type token a [`DataType`], and every field gets its
//! precomputed `collapses_to_scalar` flag, so decode/encode never search by name.

use crate::ast::*;
use crate::codec::CodecError;
use crate::datatype::DataType;
use crate::expr::literal_value;
use crate::piece::{Piece, PieceRegistry};
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;

pub const DEFAULT_VERSION: &str = "1.40";
pub const DEFAULT_VERSION_FIELD: &str = "version";
pub const DEFAULT_SENTINEL: &str = "__END_OF_FILE_MARK__";

/// Settings from the `format { }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatConfig {
    /// The single supported value of the version field.
    pub version: String,
    /// Name of the fixed-chars field checked against `version`.
    pub version_field: String,
    /// Name of the field that absorbs the rest of the stream.
    pub sentinel: String,
}

impl Default for FormatConfig {
    fn default() -> Self {
        FormatConfig {
            version: DEFAULT_VERSION.to_string(),
            version_field: DEFAULT_VERSION_FIELD.to_string(),
            sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }
}

impl FormatConfig {
    fn from_section(section: Option<&FormatSection>) -> Result<Self, CodecError> {
        let mut config = FormatConfig::default();
        let Some(section) = section else {
            return Ok(config);
        };
        for (key, value) in &section.entries {
            let text = value
                .as_str()
                .ok_or_else(|| CodecError::Schema(format!("format.{}: expected a string", key)))?
                .to_string();
            match key.as_str() {
                "version" => config.version = text,
                "version_field" => config.version_field = text,
                "sentinel" => config.sentinel = text,
                other => return Err(CodecError::Schema(format!("Unknown format key: {}", other))),
            }
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Piece,
    Struct,
}

/// Where a hook target lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The section holding the hook (`self`, or the section's own name).
    Own,
    /// Another top-level piece, by piece id.
    Piece(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetRef {
    pub scope: Scope,
    pub field: usize,
    /// `section.field` as written, for diagnostics.
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Formula {
    pub targets: Vec<TargetRef>,
    pub bindings: Option<Vec<String>>,
    pub expr: Expr,
    pub constants: Vec<(String, Value)>,
}

#[derive(Debug, Clone)]
pub enum Action {
    RecomputeSelf,
    RecomputeTarget(Vec<TargetRef>),
    OverrideValue(Formula),
    OverrideRepeatCount(Formula),
}

#[derive(Debug, Clone)]
pub struct Hook {
    pub phase: Phase,
    pub action: Action,
}

#[derive(Debug)]
pub struct FieldSpec {
    pub name: String,
    pub datatype: DataType,
    /// Struct template id, for nested-record fields.
    pub struct_id: Option<usize>,
    pub repeat: usize,
    pub default: Option<Expr>,
    pub hooks: Vec<Hook>,
    pub collapses_to_scalar: bool,
}

impl FieldSpec {
    pub fn has_hooks(&self, phase: Phase) -> bool {
        self.hooks.iter().any(|h| h.phase == phase)
    }
}

#[derive(Debug)]
pub struct SectionSpec {
    pub name: String,
    pub kind: SectionKind,
    pub id: usize,
    pub fields: Vec<Rc<FieldSpec>>,
    fields_by_name: HashMap<String, usize>,
}

impl SectionSpec {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields_by_name.get(name).copied()
    }
}

/// Resolved schema: pieces and struct templates by name, ready for the codec.
#[derive(Debug)]
pub struct ResolvedSchema {
    pub format: FormatConfig,
    pub pieces: Vec<Rc<SectionSpec>>,
    pub structs: Vec<Rc<SectionSpec>>,
    pieces_by_name: HashMap<String, usize>,
    structs_by_name: HashMap<String, usize>,
}

/// Parse and resolve schema source.
pub fn load_schema_str(source: &str) -> Result<ResolvedSchema, CodecError> {
    let schema = crate::parser::parse(source).map_err(CodecError::Schema)?;
    ResolvedSchema::resolve(schema)
}

/// Read, parse and resolve a schema file.
pub fn load_schema(path: impl AsRef<Path>) -> Result<ResolvedSchema, CodecError> {
    let source = std::fs::read_to_string(path)?;
    load_schema_str(&source)
}

impl ResolvedSchema {
    pub fn resolve(schema: Schema) -> Result<Self, CodecError> {
        let format = FormatConfig::from_section(schema.format.as_ref())?;

        let mut pieces_by_name = HashMap::new();
        let mut structs_by_name = HashMap::new();
        for (i, p) in schema.pieces.iter().enumerate() {
            if pieces_by_name.insert(p.name.clone(), i).is_some() {
                return Err(CodecError::Schema(format!("Duplicate piece name: {}", p.name)));
            }
        }
        for (i, s) in schema.structs.iter().enumerate() {
            if structs_by_name.insert(s.name.clone(), i).is_some() {
                return Err(CodecError::Schema(format!("Duplicate struct name: {}", s.name)));
            }
        }

        let resolver = Resolver {
            schema: &schema,
            pieces_by_name: &pieces_by_name,
            structs_by_name: &structs_by_name,
        };
        let pieces = schema
            .pieces
            .iter()
            .enumerate()
            .map(|(i, def)| resolver.section(def, SectionKind::Piece, i).map(Rc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let structs = schema
            .structs
            .iter()
            .enumerate()
            .map(|(i, def)| resolver.section(def, SectionKind::Struct, i).map(Rc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let resolved = ResolvedSchema {
            format,
            pieces,
            structs,
            pieces_by_name,
            structs_by_name,
        };
        resolved.check_struct_cycles()?;
        Ok(resolved)
    }

    pub fn piece_id(&self, name: &str) -> Option<usize> {
        self.pieces_by_name.get(name).copied()
    }

    pub fn struct_id(&self, name: &str) -> Option<usize> {
        self.structs_by_name.get(name).copied()
    }

    pub fn get_piece(&self, name: &str) -> Option<&Rc<SectionSpec>> {
        self.piece_id(name).map(|i| &self.pieces[i])
    }

    pub fn get_struct(&self, name: &str) -> Option<&Rc<SectionSpec>> {
        self.struct_id(name).map(|i| &self.structs[i])
    }

    /// Fresh, unpopulated instance of a top-level piece.
    pub fn instantiate_piece(&self, id: usize) -> Piece {
        Piece::new(Rc::clone(&self.pieces[id]))
    }

    /// Fresh, unpopulated instance of a struct template.
    pub fn instantiate_struct(&self, id: usize) -> Piece {
        Piece::new(Rc::clone(&self.structs[id]))
    }

    /// Registry holding one fresh instance of every piece, in declaration order.
    pub fn new_registry(&self) -> PieceRegistry {
        let mut registry = PieceRegistry::new();
        for id in 0..self.pieces.len() {
            registry.insert(self.instantiate_piece(id));
        }
        registry
    }

    fn check_struct_cycles(&self) -> Result<(), CodecError> {
        fn visit(
            schema: &ResolvedSchema,
            id: usize,
            stack: &mut Vec<usize>,
            done: &mut HashSet<usize>,
        ) -> Result<(), CodecError> {
            if done.contains(&id) {
                return Ok(());
            }
            if stack.contains(&id) {
                let path: Vec<&str> = stack.iter().map(|&i| schema.structs[i].name.as_str()).collect();
                return Err(CodecError::Schema(format!(
                    "Struct cycle: {} -> {}",
                    path.join(" -> "),
                    schema.structs[id].name
                )));
            }
            stack.push(id);
            for field in &schema.structs[id].fields {
                if let Some(child) = field.struct_id {
                    visit(schema, child, stack, done)?;
                }
            }
            stack.pop();
            done.insert(id);
            Ok(())
        }

        let mut done = HashSet::new();
        for id in 0..self.structs.len() {
            visit(self, id, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }
}

struct Resolver<'a> {
    schema: &'a Schema,
    pieces_by_name: &'a HashMap<String, usize>,
    structs_by_name: &'a HashMap<String, usize>,
}

impl Resolver<'_> {
    fn section(&self, def: &SectionDef, kind: SectionKind, id: usize) -> Result<SectionSpec, CodecError> {
        let mut fields_by_name = HashMap::new();
        for (i, f) in def.fields.iter().enumerate() {
            if fields_by_name.insert(f.name.clone(), i).is_some() {
                return Err(CodecError::Schema(format!(
                    "{}: duplicate field name: {}",
                    def.name, f.name
                )));
            }
        }
        let fields = def
            .fields
            .iter()
            .map(|f| {
                self.field(def, kind, &fields_by_name, f)
                    .map(Rc::new)
                    .map_err(|e| match e {
                        CodecError::Schema(msg) => {
                            CodecError::Schema(format!("{}.{}: {}", def.name, f.name, msg))
                        }
                        other => other,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SectionSpec {
            name: def.name.clone(),
            kind,
            id,
            fields,
            fields_by_name,
        })
    }

    fn field(
        &self,
        section: &SectionDef,
        kind: SectionKind,
        own_fields: &HashMap<String, usize>,
        def: &FieldDef,
    ) -> Result<FieldSpec, CodecError> {
        let datatype = DataType::parse(&def.type_token)?;
        let struct_id = match datatype.struct_name() {
            Some(name) => Some(
                *self
                    .structs_by_name
                    .get(name)
                    .ok_or_else(|| CodecError::Schema(format!("Unknown struct: {}", name)))?,
            ),
            None => None,
        };
        let repeat = usize::try_from(def.repeat)
            .map_err(|_| CodecError::Schema(format!("repeat {} out of range", def.repeat)))?;

        let mut hooks = Vec::with_capacity(def.hooks.len());
        for hook in &def.hooks {
            let action = match &hook.action {
                ActionDef::RefreshSelf => Action::RecomputeSelf,
                ActionDef::Refresh(targets) => Action::RecomputeTarget(
                    targets
                        .iter()
                        .map(|t| self.target(section, kind, own_fields, t))
                        .collect::<Result<_, _>>()?,
                ),
                ActionDef::SetValue(f) => {
                    Action::OverrideValue(self.formula(section, kind, own_fields, f)?)
                }
                ActionDef::SetRepeat(f) => {
                    Action::OverrideRepeatCount(self.formula(section, kind, own_fields, f)?)
                }
            };
            hooks.push(Hook {
                phase: hook.phase,
                action,
            });
        }

        if let Some(default) = &def.default {
            self.check_default(default)?;
        }

        let collapses_to_scalar = repeat == 1
            && !hooks
                .iter()
                .any(|h| matches!(h.action, Action::OverrideRepeatCount(_)));

        Ok(FieldSpec {
            name: def.name.clone(),
            datatype,
            struct_id,
            repeat,
            default: def.default.clone(),
            hooks,
            collapses_to_scalar,
        })
    }

    fn target(
        &self,
        section: &SectionDef,
        kind: SectionKind,
        own_fields: &HashMap<String, usize>,
        target: &TargetName,
    ) -> Result<TargetRef, CodecError> {
        let label = format!("{}.{}", target.section, target.field);
        let own = target.section == "self" || (kind == SectionKind::Piece && target.section == section.name);
        if own {
            let field = *own_fields
                .get(&target.field)
                .ok_or_else(|| CodecError::Schema(format!("target {}: unknown field", label)))?;
            return Ok(TargetRef {
                scope: Scope::Own,
                field,
                label,
            });
        }
        let piece_id = *self
            .pieces_by_name
            .get(&target.section)
            .ok_or_else(|| CodecError::Schema(format!("target {}: unknown piece", label)))?;
        let field = self.schema.pieces[piece_id]
            .fields
            .iter()
            .position(|f| f.name == target.field)
            .ok_or_else(|| CodecError::Schema(format!("target {}: unknown field", label)))?;
        Ok(TargetRef {
            scope: Scope::Piece(piece_id),
            field,
            label,
        })
    }

    fn formula(
        &self,
        section: &SectionDef,
        kind: SectionKind,
        own_fields: &HashMap<String, usize>,
        def: &FormulaDef,
    ) -> Result<Formula, CodecError> {
        let targets = def
            .targets
            .iter()
            .map(|t| self.target(section, kind, own_fields, t))
            .collect::<Result<Vec<_>, _>>()?;

        let mut bound: HashSet<&str> = def.constants.iter().map(|(k, _)| k.as_str()).collect();
        match &def.bindings {
            Some(names) => bound.extend(names.iter().map(String::as_str)),
            None => {
                bound.insert("x");
            }
        }
        let mut problem = None;
        def.expr.walk(&mut |e| match e {
            Expr::FieldRef(p, f) if problem.is_none() => {
                problem = Some(format!(
                    "field reference {}.{} is not allowed in a formula; use a target",
                    p, f
                ));
            }
            Expr::Var(name) if problem.is_none() && !bound.contains(name.as_str()) => {
                problem = Some(format!("unbound variable '{}'", name));
            }
            _ => {}
        });
        if let Some(msg) = problem {
            return Err(CodecError::Schema(msg));
        }

        Ok(Formula {
            targets,
            bindings: def.bindings.clone(),
            expr: def.expr.clone(),
            constants: def
                .constants
                .iter()
                .map(|(k, v)| (k.clone(), literal_value(v)))
                .collect(),
        })
    }

    fn check_default(&self, expr: &Expr) -> Result<(), CodecError> {
        let mut problem = None;
        expr.walk(&mut |e| match e {
            Expr::Var(name) if problem.is_none() => {
                problem = Some(format!("default cannot use variable '{}'", name));
            }
            Expr::FieldRef(p, f) if problem.is_none() => {
                let known = self
                    .pieces_by_name
                    .get(p)
                    .map(|&i| self.schema.pieces[i].fields.iter().any(|x| &x.name == f))
                    .unwrap_or(false);
                if !known {
                    problem = Some(format!("default references unknown field {}.{}", p, f));
                }
            }
            _ => {}
        });
        match problem {
            Some(msg) => Err(CodecError::Schema(msg)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_flag_is_precomputed() {
        let schema = load_schema_str(
            r#"
piece P {
	count: u8;
	one: u16;
	three: u16 [3];
	dynamic: u16 {
		on_construct: set_repeat(self.count) = x;
	}
}
"#,
        )
        .expect("schema");
        let p = schema.get_piece("P").unwrap();
        let flags: Vec<bool> = p.fields.iter().map(|f| f.collapses_to_scalar).collect();
        assert_eq!(flags, vec![true, true, false, false]);
    }

    #[test]
    fn targets_resolve_to_indices() {
        let schema = load_schema_str(
            r#"
piece A {
	n: u32;
}
piece B {
	m: u32;
	items: u8 {
		on_construct: set_repeat(A.n) = x;
		on_commit: refresh(B.m);
	}
}
"#,
        )
        .expect("schema");
        let b = schema.get_piece("B").unwrap();
        let hooks = &b.fields[1].hooks;
        match &hooks[0].action {
            Action::OverrideRepeatCount(f) => {
                assert_eq!(f.targets[0].scope, Scope::Piece(0));
                assert_eq!(f.targets[0].field, 0);
            }
            other => panic!("unexpected action {:?}", other),
        }
        match &hooks[1].action {
            Action::RecomputeTarget(t) => assert_eq!(t[0].scope, Scope::Own),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn format_defaults_and_overrides() {
        let schema = load_schema_str("piece P { a: u8; }").unwrap();
        assert_eq!(schema.format, FormatConfig::default());
        let schema = load_schema_str(
            "format { version: \"1.41\"; sentinel: \"__END__\"; } piece P { a: u8; }",
        )
        .unwrap();
        assert_eq!(schema.format.version, "1.41");
        assert_eq!(schema.format.sentinel, "__END__");
        assert!(load_schema_str("format { colour: \"red\"; }").is_err());
    }
}
