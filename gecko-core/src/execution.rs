//! Resolved instruction model produced by the builder.
//!
//! Every name stored here is already mangled; the code generator only
//! needs the scope ids to lower type references.

use std::collections::HashMap;

use crate::scope::ScopeId;
use crate::tokens::{Param, TypeRef, UnaryOp};

/// Resolved expression tree for values that do not fold.
#[derive(Debug, Clone, PartialEq)]
pub enum Rvalue {
    Bool(bool),
    Number(String),
    /// Quote framing included.
    Str(String),
    /// Mangled or external name, possibly with a member access suffix.
    Symbol(String),
    Array(Vec<Rvalue>),
    Object(Vec<(String, Rvalue)>),
    Index {
        base: Box<Rvalue>,
        index: Box<Rvalue>,
    },
    AddressOf(String),
    Unary(UnaryOp, Box<Rvalue>),
    Binary {
        op: BinaryOp,
        lhs: Box<Rvalue>,
        rhs: Box<Rvalue>,
    },
    Call(Box<MethodCall>),
}

impl Rvalue {
    /// True when the value is a C constant expression usable in a
    /// static initializer.
    pub fn is_constant(&self) -> bool {
        match self {
            Rvalue::Bool(_) | Rvalue::Number(_) | Rvalue::Str(_) => true,
            Rvalue::Array(items) => items.iter().all(Rvalue::is_constant),
            Rvalue::Object(entries) => entries.iter().all(|(_, v)| v.is_constant()),
            Rvalue::Unary(_, operand) => operand.is_constant(),
            Rvalue::Binary { lhs, rhs, .. } => lhs.is_constant() && rhs.is_constant(),
            Rvalue::Symbol(_)
            | Rvalue::Index { .. }
            | Rvalue::AddressOf(_)
            | Rvalue::Call(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// A resolved call site.
///
/// Arguments stay keyed the way they were passed; the generator orders
/// them against `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Name as written at the call site.
    pub method: String,
    /// Emitted function name.
    pub target: String,
    pub external: bool,
    /// Declared parameters, in order, including any implicit `self`.
    pub params: Vec<Param>,
    pub named: HashMap<String, Rvalue>,
    pub unnamed: Vec<Rvalue>,
    pub defaults: HashMap<String, Rvalue>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, target: impl Into<String>, params: Vec<Param>) -> Self {
        MethodCall {
            method: method.into(),
            target: target.into(),
            external: false,
            params,
            named: HashMap::new(),
            unnamed: Vec::new(),
            defaults: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    If,
    ElseIf,
    Else,
    /// A branch whose guard is statically true; emitted unguarded.
    Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub kind: BranchKind,
    pub guard: Option<Rvalue>,
    pub body: Vec<Step>,
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub ty: TypeRef,
    pub value: Option<Rvalue>,
    /// Scope the type reference resolves in.
    pub scope: ScopeId,
}

/// A lowered `for binding of source` loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    pub counter: String,
    pub array: String,
    pub binding: String,
    pub element_ty: TypeRef,
    pub source: Rvalue,
    pub body: Vec<Step>,
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Call(MethodCall),
    Conditional(Conditional),
    Declare(Declaration),
    Assign { target: String, value: Rvalue },
    Return(Option<Rvalue>),
    Loop(Loop),
    Native(String),
}

/// A record layout for a class.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDefinition {
    /// Emitted type name.
    pub name: String,
    pub fields: Vec<(String, TypeRef)>,
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDefinition {
    Record {
        name: String,
        fields: Vec<(String, TypeRef)>,
        callables: Vec<(String, Vec<Param>, TypeRef)>,
        scope: ScopeId,
    },
    Enum {
        name: String,
        cases: Vec<String>,
    },
}

/// Function header of a lowered method.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub full_path: String,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub scope: ScopeId,
    pub return_type: Option<TypeRef>,
    /// Present for method bodies.
    pub signature: Option<Signature>,
    pub steps: Vec<Step>,
    pub methods: Vec<ExecutionContext>,
    pub classes: Vec<ObjectDefinition>,
    pub types: Vec<TypeDefinition>,
}

impl ExecutionContext {
    pub fn new(scope: ScopeId) -> Self {
        ExecutionContext {
            scope,
            return_type: None,
            signature: None,
            steps: Vec::new(),
            methods: Vec::new(),
            classes: Vec::new(),
            types: Vec::new(),
        }
    }

    /// Concatenates another context's contents after this one's.
    pub fn merge(&mut self, other: ExecutionContext) {
        self.steps.extend(other.steps);
        self.methods.extend(other.methods);
        self.classes.extend(other.classes);
        self.types.extend(other.types);
    }

    /// Number of method bodies in this context and every nested one.
    pub fn method_count(&self) -> usize {
        self.methods
            .iter()
            .map(|m| 1 + m.method_count())
            .sum()
    }

    /// Finds a lowered method by full path anywhere in the tree.
    pub fn find_method(&self, full_path: &str) -> Option<&ExecutionContext> {
        self.methods.iter().find_map(|method| {
            let matches = method
                .signature
                .as_ref()
                .is_some_and(|s| s.full_path == full_path);
            if matches {
                Some(method)
            } else {
                method.find_method(full_path)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(scope: usize, path: &str) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(ScopeId(scope));
        ctx.signature = Some(Signature {
            name: path.rsplit("__").next().unwrap_or(path).to_string(),
            full_path: path.to_string(),
            params: Vec::new(),
            return_type: TypeRef::named("void"),
        });
        ctx
    }

    #[test]
    fn merge_concatenates_in_order() {
        let mut a = ExecutionContext::new(ScopeId(0));
        a.steps.push(Step::Native("a".into()));
        a.methods.push(method(1, "Main__f"));
        let mut b = ExecutionContext::new(ScopeId(2));
        b.steps.push(Step::Native("b".into()));
        b.methods.push(method(3, "util__g"));

        a.merge(b);

        assert_eq!(
            a.steps,
            vec![Step::Native("a".into()), Step::Native("b".into())]
        );
        assert_eq!(a.method_count(), 2);
        assert_eq!(a.scope, ScopeId(0));
    }

    #[test]
    fn finds_nested_methods() {
        let mut root = ExecutionContext::new(ScopeId(0));
        let mut outer = method(1, "Main__outer");
        outer.methods.push(method(2, "Main__inner"));
        root.methods.push(outer);
        assert!(root.find_method("Main__inner").is_some());
        assert!(root.find_method("Main__missing").is_none());
        assert_eq!(root.method_count(), 2);
    }

    #[test]
    fn constant_rvalues() {
        let sum = Rvalue::Binary {
            op: BinaryOp::Add,
            lhs: Box::new(Rvalue::Number("1".into())),
            rhs: Box::new(Rvalue::Number("2".into())),
        };
        assert!(sum.is_constant());
        assert!(!Rvalue::Symbol("Main__x".into()).is_constant());
        assert_eq!(BinaryOp::GreaterEq.symbol(), ">=");
    }
}
