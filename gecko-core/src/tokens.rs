//! Token tree handed to the core by the front-end parser.
//!
//! The parser itself lives outside this crate. Everything here is plain
//! data so that a front end can hand it over in-process or as JSON.

use serde::{Deserialize, Serialize};

use crate::span::Position;

/// One parsed source file plus the files it imports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub package: String,
    #[serde(default)]
    pub entries: Vec<Entry>,
    /// Already-parsed imported files, resolved by the front end.
    #[serde(default)]
    pub imports: Vec<File>,
    #[serde(default)]
    pub name: Option<String>,
}

impl File {
    pub fn new(package: impl Into<String>, entries: Vec<Entry>) -> Self {
        File {
            package: package.into(),
            entries,
            imports: Vec::new(),
            name: None,
        }
    }

    pub fn with_import(mut self, import: File) -> Self {
        self.imports.push(import);
        self
    }

    /// Names listed by `import` entries, in source order.
    pub fn import_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| match &entry.kind {
            EntryKind::Import(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub position: Option<Position>,
    pub kind: EntryKind,
}

impl Entry {
    pub fn new(kind: EntryKind) -> Self {
        Entry {
            position: None,
            kind,
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

impl From<EntryKind> for Entry {
    fn from(kind: EntryKind) -> Self {
        Entry::new(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Verbatim target-language code.
    NativeCode(String),
    If(Branch),
    ElseIf(Branch),
    Else(Vec<Entry>),
    Call(FuncCall),
    Method(Method),
    Class(Class),
    Type(TypeDecl),
    Schema(Vec<Field>),
    Enum(EnumDecl),
    Field(Field),
    Assign(Assignment),
    Return(Option<Literal>),
    ForOf(ForOf),
    Import(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
    Protected,
    External,
}

impl Visibility {
    /// Convention used when a declaration carries no annotation.
    pub fn default_for(name: &str) -> Visibility {
        if name.starts_with('_') {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub guard: Expression,
    #[serde(default)]
    pub body: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    #[serde(default)]
    pub visibility: Option<Visibility>,
    pub name: String,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub members: Vec<ClassMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassMember {
    Field(Field),
    Method(Method),
}

/// A user record type: `type Name { field: T, callable(args): R }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    #[serde(default)]
    pub visibility: Option<Visibility>,
    pub name: String,
    #[serde(default)]
    pub implements: Option<String>,
    #[serde(default)]
    pub fields: Vec<TypeField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeField {
    pub name: String,
    /// Present when the field is callable.
    #[serde(default)]
    pub arguments: Option<Vec<Param>>,
    pub ty: TypeRef,
    #[serde(default)]
    pub value: Option<Literal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    #[serde(default)]
    pub cases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(default)]
    pub visibility: Option<Visibility>,
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub value: Option<Literal>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeRef, value: Option<Literal>) -> Self {
        Field {
            visibility: None,
            name: name.into(),
            ty,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    #[serde(default)]
    pub visibility: Option<Visibility>,
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    pub ty: TypeRef,
    #[serde(default)]
    pub body: Vec<Entry>,
}

impl Method {
    pub fn new(name: impl Into<String>, params: Vec<Param>, ty: TypeRef, body: Vec<Entry>) -> Self {
        Method {
            visibility: None,
            name: name.into(),
            params,
            ty,
            body,
        }
    }
}

/// A declared method parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    #[serde(default)]
    pub external: bool,
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub default: Option<Literal>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Param {
            external: false,
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Literal) -> Self {
        self.default = Some(default);
        self
    }
}

/// An argument at a call site, optionally named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(default)]
    pub name: Option<String>,
    pub value: Literal,
}

impl Argument {
    pub fn positional(value: Literal) -> Self {
        Argument { name: None, value }
    }

    pub fn named(name: impl Into<String>, value: Literal) -> Self {
        Argument {
            name: Some(name.into()),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncCall {
    pub function: String,
    #[serde(default)]
    pub arguments: Vec<Argument>,
    #[serde(default)]
    pub position: Option<Position>,
}

impl FuncCall {
    pub fn new(function: impl Into<String>, arguments: Vec<Argument>) -> Self {
        FuncCall {
            function: function.into(),
            arguments,
            position: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub target: String,
    pub value: Literal,
}

/// `for binding: ty of source { body }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForOf {
    pub binding: String,
    pub ty: TypeRef,
    pub source: Literal,
    #[serde(default)]
    pub body: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRef {
    Named(String),
    Array(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn array_of(inner: TypeRef) -> Self {
        TypeRef::Array(Box::new(inner))
    }

    /// Name of the innermost element type.
    pub fn innermost(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::Array(inner) => inner.innermost(),
        }
    }

    /// Number of array (pointer) levels around the innermost type.
    pub fn depth(&self) -> usize {
        match self {
            TypeRef::Named(_) => 0,
            TypeRef::Array(inner) => 1 + inner.depth(),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, TypeRef::Array(_))
    }

    /// True for a plain (non-array) reference to `name`.
    pub fn is(&self, name: &str) -> bool {
        matches!(self, TypeRef::Named(n) if n == name)
    }
}

/// A literal value in the token tree.
///
/// Exactly one tag is populated. Folding rewrites `Expression` literals
/// in place into one of the concrete tags. A `Symbol` literal is a
/// reference that is either a source name or an already-mangled path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    /// Numeric source text; may contain `_` separators.
    Number(String),
    /// String source text including its quote framing.
    String(String),
    Symbol(String),
    Array(Vec<Literal>),
    Object(Vec<ObjectEntry>),
    Index {
        base: Box<Literal>,
        index: Box<Literal>,
    },
    Expression(Box<Expression>),
    Call(FuncCall),
}

impl Literal {
    pub fn number(value: impl ToString) -> Self {
        Literal::Number(value.to_string())
    }

    /// Builds a string literal from unquoted text.
    pub fn quoted(text: &str) -> Self {
        Literal::String(format!("\"{text}\""))
    }

    pub fn expression(expr: impl Into<Expression>) -> Self {
        Literal::Expression(Box::new(expr.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub key: String,
    pub value: Literal,
}

// ---------------------------------------------------------------------
// Expression cascade: equality -> comparison -> addition ->
// multiplication -> unary -> primary. Each binary level chains to a
// `next` node of the same level when an operator is present.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    #[serde(default)]
    pub position: Option<Position>,
    pub equality: Equality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equality {
    pub comparison: Comparison,
    #[serde(default)]
    pub op: Option<EqualityOp>,
    #[serde(default)]
    pub next: Option<Box<Equality>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualityOp {
    Eq,
    NotEq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub addition: Addition,
    #[serde(default)]
    pub op: Option<ComparisonOp>,
    #[serde(default)]
    pub next: Option<Box<Comparison>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Greater,
    GreaterEq,
    Less,
    LessEq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addition {
    pub multiplication: Multiplication,
    #[serde(default)]
    pub op: Option<AdditionOp>,
    #[serde(default)]
    pub next: Option<Box<Addition>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdditionOp {
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multiplication {
    pub unary: Unary,
    #[serde(default)]
    pub op: Option<MultiplicationOp>,
    #[serde(default)]
    pub next: Option<Box<Multiplication>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiplicationOp {
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unary {
    Op(UnaryOp, Box<Unary>),
    Primary(Primary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primary {
    Call(FuncCall),
    Bool(bool),
    /// Includes the quote framing.
    String(String),
    Symbol(String),
    Number(String),
    SubExpression(Box<Expression>),
}

impl Primary {
    pub fn number(value: impl ToString) -> Self {
        Primary::Number(value.to_string())
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Primary::Symbol(name.into())
    }

    pub fn quoted(text: &str) -> Self {
        Primary::String(format!("\"{text}\""))
    }
}

impl Addition {
    pub fn chain(lhs: impl Into<Multiplication>, op: AdditionOp, next: impl Into<Addition>) -> Self {
        Addition {
            multiplication: lhs.into(),
            op: Some(op),
            next: Some(Box::new(next.into())),
        }
    }
}

impl Multiplication {
    pub fn chain(
        lhs: impl Into<Unary>,
        op: MultiplicationOp,
        next: impl Into<Multiplication>,
    ) -> Self {
        Multiplication {
            unary: lhs.into(),
            op: Some(op),
            next: Some(Box::new(next.into())),
        }
    }
}

impl Comparison {
    pub fn chain(lhs: impl Into<Addition>, op: ComparisonOp, next: impl Into<Comparison>) -> Self {
        Comparison {
            addition: lhs.into(),
            op: Some(op),
            next: Some(Box::new(next.into())),
        }
    }
}

impl Equality {
    pub fn chain(lhs: impl Into<Comparison>, op: EqualityOp, next: impl Into<Equality>) -> Self {
        Equality {
            comparison: lhs.into(),
            op: Some(op),
            next: Some(Box::new(next.into())),
        }
    }
}

impl Unary {
    pub fn op(op: UnaryOp, operand: impl Into<Unary>) -> Self {
        Unary::Op(op, Box::new(operand.into()))
    }
}

impl From<Primary> for Unary {
    fn from(primary: Primary) -> Self {
        Unary::Primary(primary)
    }
}

impl From<Unary> for Multiplication {
    fn from(unary: Unary) -> Self {
        Multiplication {
            unary,
            op: None,
            next: None,
        }
    }
}

impl From<Multiplication> for Addition {
    fn from(multiplication: Multiplication) -> Self {
        Addition {
            multiplication,
            op: None,
            next: None,
        }
    }
}

impl From<Addition> for Comparison {
    fn from(addition: Addition) -> Self {
        Comparison {
            addition,
            op: None,
            next: None,
        }
    }
}

impl From<Comparison> for Equality {
    fn from(comparison: Comparison) -> Self {
        Equality {
            comparison,
            op: None,
            next: None,
        }
    }
}

impl From<Equality> for Expression {
    fn from(equality: Equality) -> Self {
        Expression {
            position: None,
            equality,
        }
    }
}

/// Lifts a lower cascade level to every level above it.
macro_rules! lift {
    ($from:ty => $via:ty => $($to:ty),+) => {
        $(
            impl From<$from> for $to {
                fn from(value: $from) -> Self {
                    <$to>::from(<$via>::from(value))
                }
            }
        )+
    };
}

lift!(Primary => Unary => Multiplication);
lift!(Primary => Multiplication => Addition);
lift!(Primary => Addition => Comparison);
lift!(Primary => Comparison => Equality);
lift!(Primary => Equality => Expression);
lift!(Unary => Multiplication => Addition);
lift!(Unary => Addition => Comparison);
lift!(Unary => Comparison => Equality);
lift!(Unary => Equality => Expression);
lift!(Multiplication => Addition => Comparison);
lift!(Multiplication => Comparison => Equality);
lift!(Multiplication => Equality => Expression);
lift!(Addition => Comparison => Equality);
lift!(Addition => Equality => Expression);
lift!(Comparison => Equality => Expression);

impl Expression {
    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Returns the primary when the expression is a single operand.
    pub fn as_primary(&self) -> Option<&Primary> {
        let eq = &self.equality;
        let cmp = &eq.comparison;
        let add = &cmp.addition;
        let mul = &add.multiplication;
        if eq.op.is_some() || cmp.op.is_some() || add.op.is_some() || mul.op.is_some() {
            return None;
        }
        match &mul.unary {
            Unary::Primary(primary) => Some(primary),
            Unary::Op(..) => None,
        }
    }
}
