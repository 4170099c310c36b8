//! Abstract Syntax Tree for the scenario schema DSL.

/// Root schema definition: format block, top-level pieces, struct templates.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub format: Option<FormatSection>,
    pub pieces: Vec<SectionDef>,
    pub structs: Vec<SectionDef>,
}

#[derive(Debug, Clone, Default)]
pub struct FormatSection {
    pub entries: Vec<(String, Literal)>,
}

/// A `piece` or `struct` block: an ordered list of fields.
#[derive(Debug, Clone)]
pub struct SectionDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    /// Raw type token, resolved later by [`DataType::parse`](crate::datatype::DataType::parse).
    pub type_token: String,
    pub repeat: u64,
    pub default: Option<Expr>,
    pub hooks: Vec<HookDef>,
}

/// Lifecycle phase a hook runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Construct,
    Commit,
    Refresh,
}

#[derive(Debug, Clone)]
pub struct HookDef {
    pub phase: Phase,
    pub action: ActionDef,
}

#[derive(Debug, Clone)]
pub enum ActionDef {
    RefreshSelf,
    Refresh(Vec<TargetName>),
    SetValue(FormulaDef),
    SetRepeat(FormulaDef),
}

/// `(targets) as (names) = expr where k = v, ...`
#[derive(Debug, Clone)]
pub struct FormulaDef {
    pub targets: Vec<TargetName>,
    pub bindings: Option<Vec<String>>,
    pub expr: Expr,
    pub constants: Vec<(String, Literal)>,
}

/// `section.field`, where `section` may be `self`.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetName {
    pub section: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Expr>),
    Var(String),
    /// `Piece.field`; only allowed in default expressions.
    FieldRef(String, String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Built-in functions available to expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Len,
    Sum,
    Min,
    Max,
    Abs,
    Select,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "len" => Some(Func::Len),
            "sum" => Some(Func::Sum),
            "min" => Some(Func::Min),
            "max" => Some(Func::Max),
            "abs" => Some(Func::Abs),
            "select" => Some(Func::Select),
            _ => None,
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Func::Len | Func::Sum | Func::Abs => 1,
            Func::Min | Func::Max => 2,
            Func::Select => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Literal {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Expr {
    /// Visit every node of the expression tree, depth first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::List(items) | Expr::Call(_, items) => {
                for item in items {
                    item.walk(visit);
                }
            }
            Expr::Neg(inner) => inner.walk(visit),
            Expr::Binary(_, lhs, rhs) => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            _ => {}
        }
    }
}
