//! Compile-time evaluation of expressions.
//!
//! The evaluator walks the precedence cascade top-down. A `None` result
//! means "not foldable" (mismatched operand kinds, overflow, division by
//! zero, or an unresolved operand); it never stands for zero or `false`.

use crate::builder::CONSTRUCTOR;
use crate::diagnostic::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::options::GuardPolicy;
use crate::scope::{ScopeArena, ScopeId, TypeKind};
use crate::span::Position;
use crate::tokens::{
    Addition, AdditionOp, Comparison, ComparisonOp, Equality, EqualityOp, Expression, FuncCall,
    Literal, Multiplication, MultiplicationOp, Primary, TypeRef, Unary, UnaryOp,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    /// String source text, quote framing included.
    Str(String),
    /// A runtime reference to an already-mangled name.
    Symbol { path: String, ty: Option<TypeRef> },
    /// An opaque call; never a compile-time constant.
    Call(FuncCall),
}

impl Value {
    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Value::Bool(false))
    }

    /// True for values that can replace an expression literal.
    pub fn is_constant(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Str(_))
    }

    pub fn into_literal(self) -> Option<Literal> {
        match self {
            Value::Bool(b) => Some(Literal::Bool(b)),
            Value::Int(n) => Some(Literal::Number(n.to_string())),
            Value::Str(s) => Some(Literal::String(s)),
            Value::Symbol { .. } | Value::Call(_) => None,
        }
    }
}

/// A symbol resolved to its mangled spelling.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSymbol {
    pub path: String,
    pub ty: Option<TypeRef>,
}

/// Resolves `name` from `scope` outwards.
///
/// Each scope is checked for the exact name first and then, for dotted
/// names, for a variable named by the head segment. Member access
/// through a pointer-typed head renders as `->`.
pub fn resolve_symbol(arena: &ScopeArena, scope: ScopeId, name: &str) -> Option<ResolvedSymbol> {
    for id in arena.ancestry(scope) {
        let variables = &arena.get(id).variables;
        if let Some(variable) = variables.get(name) {
            return Some(ResolvedSymbol {
                path: arena.variable_path(variable),
                ty: Some(variable.ty.clone()),
            });
        }
        if let Some((head, rest)) = name.split_once('.') {
            if let Some(variable) = variables.get(head) {
                let separator = if variable.ty.is_pointer() { "->" } else { "." };
                return Some(ResolvedSymbol {
                    path: format!("{}{separator}{rest}", arena.variable_path(variable)),
                    ty: member_type(arena, id, &variable.ty, rest),
                });
            }
        }
    }
    None
}

/// Declared type of `owner_ty.member` when the owner is a class or record.
pub fn member_type(
    arena: &ScopeArena,
    scope: ScopeId,
    owner_ty: &TypeRef,
    member: &str,
) -> Option<TypeRef> {
    let field = member.split('.').next().unwrap_or(member);
    let owner = owner_ty.innermost();
    if let Some(class) = arena.lookup_class(scope, owner) {
        return arena
            .get(class.scope)
            .variables
            .get(field)
            .map(|v| v.ty.clone());
    }
    match &arena.lookup_type(scope, owner)?.kind {
        TypeKind::Record { fields, methods } => fields
            .get(field)
            .map(|v| v.ty.clone())
            .or_else(|| methods.get(field).map(|m| m.return_type.clone())),
        TypeKind::Enum { .. } => None,
    }
}

/// Declared return type of the method a call names, if it can be found.
pub fn call_return_type(arena: &ScopeArena, scope: ScopeId, function: &str) -> Option<TypeRef> {
    if let Some(method) = arena.lookup_method(scope, function) {
        return Some(method.return_type.clone());
    }
    let (head, tail) = function.rsplit_once('.')?;
    let receiver = arena.lookup_variable(scope, head)?;
    let class = arena.lookup_class(scope, receiver.ty.innermost())?;
    arena
        .get(class.scope)
        .methods
        .get(tail)
        .map(|m| m.return_type.clone())
}

/// Scope that declares the method a call to `function` dispatches to:
/// a method in reach, a method of a variable's class, or a class
/// constructor.
pub fn callee_scope(arena: &ScopeArena, scope: ScopeId, function: &str) -> Option<ScopeId> {
    if let Some(method) = arena.lookup_method(scope, function) {
        return Some(method.owner);
    }
    if let Some((head, tail)) = function.rsplit_once('.') {
        let through_receiver = resolve_symbol(arena, scope, head)
            .and_then(|owner| owner.ty)
            .and_then(|ty| arena.lookup_class(scope, ty.innermost()))
            .and_then(|class| arena.get(class.scope).methods.get(tail))
            .map(|method| method.owner);
        if through_receiver.is_some() {
            return through_receiver;
        }
    }
    arena
        .lookup_class(scope, function)
        .and_then(|class| arena.get(class.scope).methods.get(CONSTRUCTOR))
        .map(|method| method.owner)
}

/// Whether a call to `function` can be dispatched from `scope`. Class
/// names count even without a constructor.
pub fn is_callable(arena: &ScopeArena, scope: ScopeId, function: &str) -> bool {
    callee_scope(arena, scope, function).is_some() || arena.lookup_class(scope, function).is_some()
}

fn parse_number(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| *c != '_').collect();
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16).ok();
    }
    digits.parse().ok()
}

fn splice(lhs: &str, rhs: &str) -> String {
    let left = lhs.strip_suffix('"').unwrap_or(lhs);
    let right = rhs.strip_prefix('"').unwrap_or(rhs);
    format!("{left}{right}")
}

pub struct Evaluator<'a> {
    arena: &'a ScopeArena,
    scope: ScopeId,
    position: Option<Position>,
    errors: Vec<Diagnostic>,
}

impl<'a> Evaluator<'a> {
    pub fn new(arena: &'a ScopeArena, scope: ScopeId) -> Self {
        Evaluator {
            arena,
            scope,
            position: None,
            errors: Vec::new(),
        }
    }

    pub fn evaluate(&mut self, expr: &Expression) -> Option<Value> {
        let saved = match &expr.position {
            Some(position) => self.position.replace(position.clone()),
            None => self.position.clone(),
        };
        let value = self.equality(&expr.equality);
        self.position = saved;
        value
    }

    pub fn into_errors(self) -> Vec<Diagnostic> {
        self.errors
    }

    fn equality(&mut self, eq: &Equality) -> Option<Value> {
        let lhs = self.comparison(&eq.comparison);
        let (Some(op), Some(next)) = (eq.op, eq.next.as_deref()) else {
            return lhs;
        };
        let rhs = self.equality(next);
        let equal = match (lhs?, rhs?) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => return None,
        };
        Some(Value::Bool(match op {
            EqualityOp::Eq => equal,
            EqualityOp::NotEq => !equal,
        }))
    }

    fn comparison(&mut self, cmp: &Comparison) -> Option<Value> {
        let lhs = self.addition(&cmp.addition);
        let (Some(op), Some(next)) = (cmp.op, cmp.next.as_deref()) else {
            return lhs;
        };
        let rhs = self.comparison(next);
        let (Value::Int(a), Value::Int(b)) = (lhs?, rhs?) else {
            return None;
        };
        Some(Value::Bool(match op {
            ComparisonOp::Greater => a > b,
            ComparisonOp::GreaterEq => a >= b,
            ComparisonOp::Less => a < b,
            ComparisonOp::LessEq => a <= b,
        }))
    }

    fn addition(&mut self, add: &Addition) -> Option<Value> {
        let lhs = self.multiplication(&add.multiplication);
        let (Some(op), Some(next)) = (add.op, add.next.as_deref()) else {
            return lhs;
        };
        let rhs = self.addition(next);
        match (op, lhs?, rhs?) {
            (AdditionOp::Add, Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int),
            (AdditionOp::Add, Value::Str(a), Value::Str(b)) => Some(Value::Str(splice(&a, &b))),
            (AdditionOp::Sub, Value::Int(a), Value::Int(b)) => a.checked_sub(b).map(Value::Int),
            _ => None,
        }
    }

    fn multiplication(&mut self, mul: &Multiplication) -> Option<Value> {
        let lhs = self.unary(&mul.unary);
        let (Some(op), Some(next)) = (mul.op, mul.next.as_deref()) else {
            return lhs;
        };
        let rhs = self.multiplication(next);
        let (Value::Int(a), Value::Int(b)) = (lhs?, rhs?) else {
            return None;
        };
        match op {
            MultiplicationOp::Mul => a.checked_mul(b),
            MultiplicationOp::Div => a.checked_div(b),
        }
        .map(Value::Int)
    }

    fn unary(&mut self, unary: &Unary) -> Option<Value> {
        match unary {
            Unary::Primary(primary) => self.primary(primary),
            Unary::Op(op, operand) => match (op, self.unary(operand)?) {
                (UnaryOp::Not, Value::Bool(b)) => Some(Value::Bool(!b)),
                (UnaryOp::Negate, Value::Int(n)) => n.checked_neg().map(Value::Int),
                (UnaryOp::Plus, Value::Int(n)) => Some(Value::Int(n)),
                _ => None,
            },
        }
    }

    fn primary(&mut self, primary: &Primary) -> Option<Value> {
        match primary {
            Primary::Bool(b) => Some(Value::Bool(*b)),
            Primary::Number(text) => parse_number(text).map(Value::Int),
            Primary::String(text) => Some(Value::Str(text.clone())),
            Primary::Call(call) => {
                if !is_callable(self.arena, self.scope, &call.function) {
                    self.report_missing_method(&call.function);
                }
                Some(Value::Call(call.clone()))
            }
            Primary::SubExpression(expr) => self.evaluate(expr),
            Primary::Symbol(name) => match resolve_symbol(self.arena, self.scope, name) {
                Some(ResolvedSymbol { path, ty }) => Some(Value::Symbol { path, ty }),
                None => {
                    self.report_unresolved(name);
                    None
                }
            },
        }
    }

    fn report_unresolved(&mut self, name: &str) {
        self.errors.push(
            Diagnostic::new(
                DiagnosticKind::UnresolvedSymbol,
                format!("Symbol '{name}' not found"),
            )
            .at(self.position.clone())
            .with_trace(self.arena.stack_trace(self.scope)),
        );
    }

    fn report_missing_method(&mut self, name: &str) {
        self.errors.push(
            Diagnostic::new(
                DiagnosticKind::UnresolvedSymbol,
                format!("Method '{name}' not found"),
            )
            .at(self.position.clone())
            .with_trace(self.arena.stack_trace(self.scope)),
        );
    }

    /// Folds a literal in place.
    ///
    /// Expressions with a constant value are replaced by it; anything
    /// else stays an expression for runtime lowering.
    pub fn fold(&mut self, literal: &mut Literal) {
        match literal {
            Literal::Expression(expr) => {
                if let Some(folded) = self.evaluate(expr).and_then(Value::into_literal) {
                    *literal = folded;
                }
            }
            Literal::Array(items) => {
                for item in items {
                    self.fold(item);
                }
            }
            Literal::Object(entries) => {
                for entry in entries {
                    self.fold(&mut entry.value);
                }
            }
            Literal::Index { base, index } => {
                self.fold(base);
                self.fold(index);
            }
            Literal::Symbol(name) => {
                if resolve_symbol(self.arena, self.scope, name).is_none() {
                    let name = name.clone();
                    self.report_unresolved(&name);
                }
            }
            Literal::Call(call) => {
                if !is_callable(self.arena, self.scope, &call.function) {
                    let name = call.function.clone();
                    self.report_missing_method(&name);
                }
                // Arguments resolve in the callee's declaring scope first.
                let callee = callee_scope(self.arena, self.scope, &call.function);
                for argument in &mut call.arguments {
                    let folded = callee.and_then(|scope| {
                        trial_literal(self.arena, scope, &argument.value, self.position.as_ref())
                            .ok()
                    });
                    match folded {
                        Some(folded) => argument.value = folded,
                        None => self.fold(&mut argument.value),
                    }
                }
            }
            Literal::Bool(_) | Literal::Number(_) | Literal::String(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: Option<Value>,
    pub errors: Vec<Diagnostic>,
}

pub fn evaluate(arena: &ScopeArena, scope: ScopeId, expr: &Expression) -> Evaluation {
    let mut evaluator = Evaluator::new(arena, scope);
    let value = evaluator.evaluate(expr);
    Evaluation {
        value,
        errors: evaluator.into_errors(),
    }
}

/// Folds `literal` in place, reporting errors into `diagnostics`.
pub fn fold_literal(
    arena: &ScopeArena,
    scope: ScopeId,
    literal: &mut Literal,
    position: Option<&Position>,
    diagnostics: &mut Diagnostics,
) {
    let mut evaluator = Evaluator::new(arena, scope);
    evaluator.position = position.cloned();
    evaluator.fold(literal);
    diagnostics.extend(evaluator.into_errors());
}

/// Outcome of a speculative evaluation that tolerates one error.
#[derive(Debug, Clone, PartialEq)]
pub enum Trial<T> {
    Ok(T),
    /// Exactly one error occurred and was swallowed.
    Suppressed(Diagnostic),
    /// The first error was swallowed but more followed.
    Err {
        suppressed: Diagnostic,
        errors: Vec<Diagnostic>,
    },
}

impl<T> Trial<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Trial::Ok(value) => Some(value),
            Trial::Suppressed(_) | Trial::Err { .. } => None,
        }
    }
}

/// Folds a copy of `literal` without recording any diagnostics.
pub fn trial_literal(
    arena: &ScopeArena,
    scope: ScopeId,
    literal: &Literal,
    position: Option<&Position>,
) -> Trial<Literal> {
    let mut folded = literal.clone();
    let mut evaluator = Evaluator::new(arena, scope);
    evaluator.position = position.cloned();
    evaluator.fold(&mut folded);
    let mut errors = evaluator.into_errors().into_iter();
    match errors.next() {
        None => Trial::Ok(folded),
        Some(suppressed) => {
            let errors: Vec<_> = errors.collect();
            if errors.is_empty() {
                Trial::Suppressed(suppressed)
            } else {
                Trial::Err { suppressed, errors }
            }
        }
    }
}

/// Whether a guard value can stand in for a boolean.
pub fn could_be_bool(
    value: Option<&Value>,
    arena: &ScopeArena,
    scope: ScopeId,
    policy: GuardPolicy,
) -> bool {
    match value {
        Some(Value::Bool(_)) => true,
        Some(Value::Call(call)) => {
            call_return_type(arena, scope, &call.function).is_some_and(|ty| ty.is("bool"))
        }
        Some(Value::Symbol { ty, .. }) => ty.as_ref().is_some_and(|ty| ty.is("bool")),
        Some(Value::Int(n)) => policy == GuardPolicy::Lenient && (*n == 0 || *n == 1),
        Some(Value::Str(_)) | None => false,
    }
}
