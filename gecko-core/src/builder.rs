//! Lowers token-tree entries into an [`ExecutionContext`].
//!
//! Every symbol is resolved here exactly once. Guards are decided at
//! compile time where possible; calls bind their arguments against the
//! callee's declared parameters and trigger lazy, memoized lowering of
//! the callee's body.

use tracing::{debug, trace};

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::error::CoreError;
use crate::evaluate::{Evaluator, Trial, Value, could_be_bool, resolve_symbol, trial_literal};
use crate::execution::{
    BinaryOp, BranchKind, Conditional, Declaration, ExecutionContext, Loop, MethodCall,
    ObjectDefinition, Rvalue, Signature, Step, TypeDefinition,
};
use crate::populate::{self, SELF_PARAM};
use crate::scope::{Class, Method, NATIVE_TYPE_FIELD, ScopeId, TypeKind, Variable};
use crate::session::Session;
use crate::span::Position;
use crate::tokens::{
    Addition, AdditionOp, Comparison, ComparisonOp, Entry, EntryKind, Equality, EqualityOp,
    Expression, Field, ForOf, FuncCall, Literal, Multiplication, MultiplicationOp, Primary, Unary,
    Visibility,
};

/// Name of the method a class call like `Point(...)` dispatches to.
pub const CONSTRUCTOR: &str = "constructor";

/// Builds the context for entries that were already populated into
/// `scope`. With `build_all`, every declared method is lowered even if
/// nothing calls it.
pub fn build_context(
    session: &mut Session,
    entries: &[Entry],
    scope: ScopeId,
    build_all: bool,
) -> Result<ExecutionContext, CoreError> {
    let mut builder = Builder {
        session,
        build_all,
        frames: Vec::new(),
    };
    builder.context(entries, scope)
}

#[derive(Debug, Default)]
struct Frame {
    methods: Vec<ExecutionContext>,
    classes: Vec<ObjectDefinition>,
    types: Vec<TypeDefinition>,
}

/// Where an `if` chain stands after its latest branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chain {
    None,
    /// No branch taken yet; `runtime` once a guard was left for run time.
    Open { runtime: bool },
    /// A statically true branch was emitted.
    Taken,
}

#[derive(Debug)]
enum Guard {
    Static(bool),
    Runtime(Rvalue),
    Invalid,
}

struct Builder<'s> {
    session: &'s mut Session,
    build_all: bool,
    frames: Vec<Frame>,
}

impl Builder<'_> {
    fn context(&mut self, entries: &[Entry], scope: ScopeId) -> Result<ExecutionContext, CoreError> {
        self.frames.push(Frame::default());
        let steps = self.block(entries, scope, true);
        let frame = self.frames.pop().unwrap_or_default();
        Ok(ExecutionContext {
            scope,
            return_type: None,
            signature: None,
            steps: steps?,
            methods: frame.methods,
            classes: frame.classes,
            types: frame.types,
        })
    }

    fn frame(&mut self) -> &mut Frame {
        if self.frames.is_empty() {
            self.frames.push(Frame::default());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn report(
        &mut self,
        kind: DiagnosticKind,
        message: String,
        scope: ScopeId,
        position: Option<&Position>,
    ) {
        let trace = self.session.arena.stack_trace(scope);
        self.session.report(
            Diagnostic::new(kind, message)
                .at(position.cloned())
                .with_trace(trace),
        );
    }

    /// Lowers a list of entries. `declared` is true when the entries were
    /// populated into `scope` beforehand (unit and class level).
    fn block(
        &mut self,
        entries: &[Entry],
        scope: ScopeId,
        declared: bool,
    ) -> Result<Vec<Step>, CoreError> {
        let mut steps = Vec::new();
        let mut chain = Chain::None;

        for entry in entries {
            let position = entry.position.as_ref();
            match &entry.kind {
                EntryKind::If(branch) => {
                    chain = self.conditional(
                        &mut steps,
                        Chain::Open { runtime: false },
                        Some(&branch.guard),
                        &branch.body,
                        scope,
                        position,
                    )?;
                    continue;
                }
                EntryKind::ElseIf(branch) => {
                    chain = match chain {
                        Chain::None => {
                            self.dangling("elif", scope, position);
                            Chain::None
                        }
                        Chain::Taken => {
                            trace!("dropping unreachable elif branch");
                            Chain::Taken
                        }
                        open => self.conditional(
                            &mut steps,
                            open,
                            Some(&branch.guard),
                            &branch.body,
                            scope,
                            position,
                        )?,
                    };
                    continue;
                }
                EntryKind::Else(body) => {
                    match chain {
                        Chain::None => self.dangling("else", scope, position),
                        Chain::Taken => trace!("dropping unreachable else branch"),
                        open => {
                            self.conditional(&mut steps, open, None, body, scope, position)?;
                        }
                    }
                    chain = Chain::None;
                    continue;
                }
                _ => chain = Chain::None,
            }

            match &entry.kind {
                EntryKind::NativeCode(code) => {
                    if !declared {
                        steps.push(Step::Native(code.clone()));
                    }
                }
                EntryKind::Call(call) => {
                    let call = self.call(call, scope, position, None)?;
                    steps.push(Step::Call(call));
                }
                EntryKind::Method(method) => {
                    if !declared {
                        populate::declare_method(self.session, method, scope, position, None);
                    }
                    if self.build_all {
                        let declared_method =
                            self.session.arena.get(scope).methods.get(&method.name).cloned();
                        if let Some(declared_method) = declared_method {
                            self.lower_method(&declared_method)?;
                        }
                    }
                }
                EntryKind::Class(class) => {
                    if !declared {
                        populate::declare_class(self.session, class, scope, position);
                    }
                    let declared_class =
                        self.session.arena.get(scope).classes.get(&class.name).cloned();
                    if let Some(declared_class) = declared_class {
                        self.emit_class(&declared_class)?;
                    }
                }
                EntryKind::Type(decl) => {
                    if !declared {
                        populate::declare_type(self.session, decl, scope, position);
                    }
                    self.emit_type(scope, &decl.name);
                }
                EntryKind::Enum(decl) => {
                    if !declared {
                        populate::declare_enum(self.session, decl, scope, position);
                    }
                    self.emit_type(scope, &decl.name);
                }
                EntryKind::Schema(fields) => {
                    trace!("skipping schema with {} field(s)", fields.len());
                }
                EntryKind::Field(field) => {
                    self.field(&mut steps, field, scope, declared, position)?;
                }
                EntryKind::Assign(assignment) => {
                    let target = self.symbol_path(&assignment.target, scope, position);
                    let value = self.lower_literal(&assignment.value, scope, position)?;
                    steps.push(Step::Assign { target, value });
                }
                EntryKind::Return(value) => {
                    if declared {
                        trace!("ignoring return outside of a method body");
                        continue;
                    }
                    let value = match value {
                        Some(literal) => Some(self.lower_literal(literal, scope, position)?),
                        None => None,
                    };
                    steps.push(Step::Return(value));
                }
                EntryKind::ForOf(lp) => {
                    let lowered = self.for_of(lp, scope, position)?;
                    steps.push(Step::Loop(lowered));
                }
                EntryKind::Import(name) => {
                    trace!("import {name} is resolved by the compile pass");
                }
                EntryKind::If(_) | EntryKind::ElseIf(_) | EntryKind::Else(_) => {}
            }
        }

        Ok(steps)
    }

    fn dangling(&mut self, keyword: &str, scope: ScopeId, position: Option<&Position>) {
        self.report(
            DiagnosticKind::DanglingBranch,
            format!("'{keyword}' without a preceding 'if'"),
            scope,
            position,
        );
    }

    /// Lowers one branch of an `if` chain. `chain` is the state before
    /// this branch; an `if` always starts a fresh chain.
    fn conditional(
        &mut self,
        steps: &mut Vec<Step>,
        chain: Chain,
        guard: Option<&Expression>,
        body: &[Entry],
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Chain, CoreError> {
        let after_runtime = chain == Chain::Open { runtime: true };
        let unguarded = if after_runtime {
            BranchKind::Else
        } else {
            BranchKind::Block
        };

        let Some(guard) = guard else {
            let body = self.block(body, scope, false)?;
            steps.push(Step::Conditional(Conditional {
                kind: unguarded,
                guard: None,
                body,
                scope,
            }));
            return Ok(Chain::None);
        };

        match self.guard(guard, scope, position)? {
            Guard::Static(true) => {
                let body = self.block(body, scope, false)?;
                steps.push(Step::Conditional(Conditional {
                    kind: unguarded,
                    guard: None,
                    body,
                    scope,
                }));
                Ok(Chain::Taken)
            }
            Guard::Static(false) => {
                trace!("dropping statically false branch");
                Ok(chain)
            }
            Guard::Runtime(rvalue) => {
                let body = self.block(body, scope, false)?;
                steps.push(Step::Conditional(Conditional {
                    kind: if after_runtime {
                        BranchKind::ElseIf
                    } else {
                        BranchKind::If
                    },
                    guard: Some(rvalue),
                    body,
                    scope,
                }));
                Ok(Chain::Open { runtime: true })
            }
            Guard::Invalid => Ok(chain),
        }
    }

    fn guard(
        &mut self,
        expr: &Expression,
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Guard, CoreError> {
        let position = expr.position.as_ref().or(position);
        let mut evaluator = Evaluator::new(&self.session.arena, scope);
        let value = evaluator.evaluate(expr);
        let errors = evaluator.into_errors();
        if !errors.is_empty() {
            self.session.diagnostics.extend(errors);
            return Ok(Guard::Invalid);
        }

        let policy = self.session.options.guard_policy;
        if !could_be_bool(value.as_ref(), &self.session.arena, scope, policy) {
            self.report(
                DiagnosticKind::NonBooleanGuard,
                "Expression does not evaluate to a bool".to_string(),
                scope,
                position,
            );
            return Ok(Guard::Invalid);
        }

        Ok(match value {
            Some(Value::Bool(b)) => Guard::Static(b),
            Some(Value::Int(n)) => Guard::Static(n == 1),
            _ => Guard::Runtime(self.lower_expression(expr, scope, position)?),
        })
    }

    fn field(
        &mut self,
        steps: &mut Vec<Step>,
        field: &Field,
        scope: ScopeId,
        declared: bool,
        position: Option<&Position>,
    ) -> Result<(), CoreError> {
        if let Some(Literal::Call(call)) = &field.value {
            if self.is_constructor(scope, &call.function) {
                let variable = self.declared_variable(field, scope, declared, position);
                let path = self.session.arena.variable_path(&variable);
                steps.push(Step::Declare(Declaration {
                    name: path.clone(),
                    ty: field.ty.clone(),
                    value: None,
                    scope,
                }));
                let receiver = if variable.ty.is_pointer() {
                    Rvalue::Symbol(path)
                } else {
                    Rvalue::AddressOf(path)
                };
                let call = self.call(call, scope, position, Some(receiver))?;
                steps.push(Step::Call(call));
                return Ok(());
            }
        }

        let value = match &field.value {
            Some(literal) => Some(self.lower_literal(literal, scope, position)?),
            None => None,
        };
        let variable = self.declared_variable(field, scope, declared, position);
        if variable.is_external() && value.is_none() {
            trace!("external {} is defined elsewhere", variable.name);
            return Ok(());
        }
        steps.push(Step::Declare(Declaration {
            name: self.session.arena.variable_path(&variable),
            ty: field.ty.clone(),
            value,
            scope,
        }));
        Ok(())
    }

    fn declared_variable(
        &mut self,
        field: &Field,
        scope: ScopeId,
        declared: bool,
        position: Option<&Position>,
    ) -> Variable {
        let existing = if declared {
            self.session.arena.get(scope).variables.get(&field.name).cloned()
        } else {
            None
        };
        match existing {
            Some(variable) => variable,
            None => populate::declare_field(self.session, field, scope, position),
        }
    }

    fn is_constructor(&self, scope: ScopeId, function: &str) -> bool {
        let arena = &self.session.arena;
        arena.lookup_method(scope, function).is_none()
            && arena
                .lookup_class(scope, function)
                .is_some_and(|class| arena.get(class.scope).methods.contains_key(CONSTRUCTOR))
    }

    fn for_of(
        &mut self,
        lp: &ForOf,
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Loop, CoreError> {
        let id = self.session.next_loop_id();
        let scope_path = self.session.arena.full_path(scope);
        let source = self.lower_literal(&lp.source, scope, position)?;

        let mut binding = Variable::new(lp.binding.clone(), lp.ty.clone(), scope);
        binding.visibility = Some(Visibility::Public);
        binding.position = position.cloned();
        let binding_path = self.session.arena.variable_path(&binding);

        let variables = &mut self.session.arena.get_mut(scope).variables;
        let shadowed = variables.remove(&lp.binding);
        variables.insert(lp.binding.clone(), binding);

        let body = self.block(&lp.body, scope, false);

        let variables = &mut self.session.arena.get_mut(scope).variables;
        variables.remove(&lp.binding);
        if let Some(shadowed) = shadowed {
            variables.insert(lp.binding.clone(), shadowed);
        }

        Ok(Loop {
            counter: format!("{scope_path}__counter{id}"),
            array: format!("{scope_path}__array{id}"),
            binding: binding_path,
            element_ty: lp.ty.clone(),
            source,
            body: body?,
            scope,
        })
    }

    // -----------------------------------------------------------------
    // Calls and methods
    // -----------------------------------------------------------------

    fn call(
        &mut self,
        call: &FuncCall,
        scope: ScopeId,
        position: Option<&Position>,
        receiver: Option<Rvalue>,
    ) -> Result<MethodCall, CoreError> {
        debug!("building call step for {}", call.function);
        let position = call.position.as_ref().or(position);
        let (method, self_binding) = self.resolve_call(call, scope, position, receiver)?;
        self.lower_method(&method)?;

        let external = method.visibility == Some(Visibility::External);
        let target = if external {
            method.name.clone()
        } else {
            self.session.arena.method_path(&method)
        };
        let mut lowered = MethodCall::new(call.function.clone(), target, method.params.clone());
        lowered.external = external;

        for param in &method.params {
            if let Some(default) = &param.default {
                let value = self.lower_literal(default, method.owner, position)?;
                lowered.defaults.insert(param.name.clone(), value);
            }
        }

        let trial_scope = self.session.call_scope(&method);
        for argument in &call.arguments {
            let value = self.argument(&argument.value, trial_scope, scope, position)?;
            match &argument.name {
                Some(name) => {
                    lowered.named.insert(name.clone(), value);
                }
                None => lowered.unnamed.push(value),
            }
        }
        if let Some(binding) = self_binding {
            lowered.named.insert(SELF_PARAM.to_string(), binding);
        }
        Ok(lowered)
    }

    /// Resolves an argument in the callee's scope, retrying once in the
    /// caller's scope when that fails.
    fn argument(
        &mut self,
        literal: &Literal,
        callee_scope: ScopeId,
        caller_scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Rvalue, CoreError> {
        match trial_literal(&self.session.arena, callee_scope, literal, position) {
            Trial::Ok(folded) => self.lower_literal(&folded, callee_scope, position),
            Trial::Suppressed(suppressed) | Trial::Err { suppressed, .. } => {
                debug!(
                    "retrying argument in caller scope: {}",
                    suppressed.message
                );
                self.lower_literal(literal, caller_scope, position)
            }
        }
    }

    /// Finds the method a call names and the value bound to its `self`.
    fn resolve_call(
        &self,
        call: &FuncCall,
        scope: ScopeId,
        position: Option<&Position>,
        receiver: Option<Rvalue>,
    ) -> Result<(Method, Option<Rvalue>), CoreError> {
        let arena = &self.session.arena;

        if let Some(method) = arena.lookup_method(scope, &call.function) {
            let binding = if method.receiver.is_some() {
                resolve_symbol(arena, scope, SELF_PARAM).map(|s| Rvalue::Symbol(s.path))
            } else {
                None
            };
            return Ok((method.clone(), binding));
        }

        if let Some((head, tail)) = call.function.rsplit_once('.') {
            if let Some(owner) = resolve_symbol(arena, scope, head) {
                let class = owner
                    .ty
                    .as_ref()
                    .and_then(|ty| arena.lookup_class(scope, ty.innermost()));
                let method = class.and_then(|class| arena.get(class.scope).methods.get(tail));
                if let (Some(method), Some(ty)) = (method, owner.ty.as_ref()) {
                    let binding = if ty.is_pointer() {
                        Rvalue::Symbol(owner.path)
                    } else {
                        Rvalue::AddressOf(owner.path)
                    };
                    return Ok((method.clone(), Some(binding)));
                }
            }
        }

        if let Some(class) = arena.lookup_class(scope, &call.function) {
            if let Some(constructor) = arena.get(class.scope).methods.get(CONSTRUCTOR) {
                return match receiver {
                    Some(binding) => Ok((constructor.clone(), Some(binding))),
                    None => Err(CoreError::MissingReceiver {
                        class: call.function.clone(),
                    }),
                };
            }
        }

        Err(CoreError::UnresolvedMethod {
            name: call.function.clone(),
            position: position.cloned(),
            trace: arena.stack_trace(scope),
        })
    }

    /// Lowers a method body once per session.
    fn lower_method(&mut self, method: &Method) -> Result<(), CoreError> {
        if method.visibility == Some(Visibility::External) {
            return Ok(());
        }
        let full_path = self.session.arena.method_path(method);
        if !self.session.mark_built(&full_path) {
            return Ok(());
        }
        debug!("building execution context for method '{}'", method.name);

        let scope = self.session.method_scope(method);
        let mut steps = Vec::new();
        for param in method.params.iter().filter(|p| p.external) {
            let local = self.session.arena.get(scope).variables.get(&param.name);
            if let Some(local) = local {
                steps.push(Step::Declare(Declaration {
                    name: self.session.arena.variable_path(local),
                    ty: param.ty.clone(),
                    value: Some(Rvalue::Symbol(param.name.clone())),
                    scope,
                }));
            }
        }

        self.frames.push(Frame::default());
        let body = self.block(&method.body, scope, false);
        let frame = self.frames.pop().unwrap_or_default();
        steps.extend(body?);

        let context = ExecutionContext {
            scope,
            return_type: Some(method.return_type.clone()),
            signature: Some(Signature {
                name: method.name.clone(),
                full_path,
                params: method.params.clone(),
                return_type: method.return_type.clone(),
            }),
            steps,
            methods: frame.methods,
            classes: frame.classes,
            types: frame.types,
        };
        self.frame().methods.push(context);
        Ok(())
    }

    fn emit_class(&mut self, class: &Class) -> Result<(), CoreError> {
        let arena = &self.session.arena;
        let native = arena.native_type(class);
        let path = arena.class_path(class);
        let key = native.clone().unwrap_or_else(|| path.clone());
        if !self.session.mark_class_emitted(&key) {
            return Ok(());
        }

        let members = self.session.arena.get(class.scope);
        let fields: Vec<_> = members
            .variables
            .iter()
            .filter(|(name, _)| *name != NATIVE_TYPE_FIELD)
            .map(|(name, variable)| (name.to_string(), variable.ty.clone()))
            .collect();
        let methods: Vec<Method> = members
            .methods
            .values()
            .filter(|m| m.owner == class.scope)
            .cloned()
            .collect();

        if native.is_none() {
            self.frame().classes.push(ObjectDefinition {
                name: path,
                fields,
                scope: class.scope,
            });
        }
        if self.build_all {
            for method in &methods {
                self.lower_method(method)?;
            }
        }
        Ok(())
    }

    fn emit_type(&mut self, scope: ScopeId, name: &str) {
        let Some(ty) = self.session.arena.get(scope).types.get(name).cloned() else {
            return;
        };
        let path = self.session.arena.type_path(&ty);
        if !self.session.mark_type_emitted(&path) {
            return;
        }
        let definition = match ty.kind {
            TypeKind::Record { fields, methods } => TypeDefinition::Record {
                name: path,
                fields: fields
                    .values()
                    .map(|v| (v.name.clone(), v.ty.clone()))
                    .collect(),
                callables: methods
                    .values()
                    .map(|m| (m.name.clone(), m.params.clone(), m.return_type.clone()))
                    .collect(),
                scope,
            },
            TypeKind::Enum { cases } => TypeDefinition::Enum { name: path, cases },
        };
        self.frame().types.push(definition);
    }

    // -----------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------

    fn symbol(&mut self, name: &str, scope: ScopeId, position: Option<&Position>) -> Rvalue {
        Rvalue::Symbol(self.symbol_path(name, scope, position))
    }

    /// Mangled spelling of `name`; unresolved names are reported and kept.
    fn symbol_path(&mut self, name: &str, scope: ScopeId, position: Option<&Position>) -> String {
        match resolve_symbol(&self.session.arena, scope, name) {
            Some(resolved) => resolved.path,
            None => {
                self.report(
                    DiagnosticKind::UnresolvedSymbol,
                    format!("Symbol '{name}' not found"),
                    scope,
                    position,
                );
                name.to_string()
            }
        }
    }

    fn lower_literal(
        &mut self,
        literal: &Literal,
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Rvalue, CoreError> {
        Ok(match literal {
            Literal::Bool(b) => Rvalue::Bool(*b),
            Literal::Number(text) => Rvalue::Number(text.clone()),
            Literal::String(text) => Rvalue::Str(text.clone()),
            Literal::Symbol(name) => self.symbol(name, scope, position),
            Literal::Array(items) => Rvalue::Array(
                items
                    .iter()
                    .map(|item| self.lower_literal(item, scope, position))
                    .collect::<Result<_, _>>()?,
            ),
            Literal::Object(entries) => Rvalue::Object(
                entries
                    .iter()
                    .map(|entry| -> Result<_, CoreError> {
                        Ok((
                            entry.key.clone(),
                            self.lower_literal(&entry.value, scope, position)?,
                        ))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Literal::Index { base, index } => Rvalue::Index {
                base: Box::new(self.lower_literal(base, scope, position)?),
                index: Box::new(self.lower_literal(index, scope, position)?),
            },
            Literal::Expression(expr) => self.lower_expression(expr, scope, position)?,
            Literal::Call(call) => Rvalue::Call(Box::new(self.call(call, scope, position, None)?)),
        })
    }

    /// Lowers an expression, folding it first when it is constant.
    fn lower_expression(
        &mut self,
        expr: &Expression,
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Rvalue, CoreError> {
        let position = expr.position.as_ref().or(position);
        let constant = Evaluator::new(&self.session.arena, scope)
            .evaluate(expr)
            .and_then(Value::into_literal);
        match constant {
            Some(literal) => self.lower_literal(&literal, scope, position),
            None => self.equality(&expr.equality, scope, position),
        }
    }

    fn binary(op: BinaryOp, lhs: Rvalue, rhs: Rvalue) -> Rvalue {
        Rvalue::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn equality(
        &mut self,
        eq: &Equality,
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Rvalue, CoreError> {
        let lhs = self.comparison(&eq.comparison, scope, position)?;
        let (Some(op), Some(next)) = (eq.op, eq.next.as_deref()) else {
            return Ok(lhs);
        };
        let op = match op {
            EqualityOp::Eq => BinaryOp::Eq,
            EqualityOp::NotEq => BinaryOp::NotEq,
        };
        let rhs = self.equality(next, scope, position)?;
        Ok(Self::binary(op, lhs, rhs))
    }

    fn comparison(
        &mut self,
        cmp: &Comparison,
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Rvalue, CoreError> {
        let lhs = self.addition(&cmp.addition, scope, position)?;
        let (Some(op), Some(next)) = (cmp.op, cmp.next.as_deref()) else {
            return Ok(lhs);
        };
        let op = match op {
            ComparisonOp::Greater => BinaryOp::Greater,
            ComparisonOp::GreaterEq => BinaryOp::GreaterEq,
            ComparisonOp::Less => BinaryOp::Less,
            ComparisonOp::LessEq => BinaryOp::LessEq,
        };
        let rhs = self.comparison(next, scope, position)?;
        Ok(Self::binary(op, lhs, rhs))
    }

    fn addition(
        &mut self,
        add: &Addition,
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Rvalue, CoreError> {
        let lhs = self.multiplication(&add.multiplication, scope, position)?;
        let (Some(op), Some(next)) = (add.op, add.next.as_deref()) else {
            return Ok(lhs);
        };
        let op = match op {
            AdditionOp::Add => BinaryOp::Add,
            AdditionOp::Sub => BinaryOp::Sub,
        };
        let rhs = self.addition(next, scope, position)?;
        Ok(Self::binary(op, lhs, rhs))
    }

    fn multiplication(
        &mut self,
        mul: &Multiplication,
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Rvalue, CoreError> {
        let lhs = self.unary(&mul.unary, scope, position)?;
        let (Some(op), Some(next)) = (mul.op, mul.next.as_deref()) else {
            return Ok(lhs);
        };
        let op = match op {
            MultiplicationOp::Mul => BinaryOp::Mul,
            MultiplicationOp::Div => BinaryOp::Div,
        };
        let rhs = self.multiplication(next, scope, position)?;
        Ok(Self::binary(op, lhs, rhs))
    }

    fn unary(
        &mut self,
        unary: &Unary,
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Rvalue, CoreError> {
        match unary {
            Unary::Op(op, operand) => Ok(Rvalue::Unary(
                *op,
                Box::new(self.unary(operand, scope, position)?),
            )),
            Unary::Primary(primary) => self.primary(primary, scope, position),
        }
    }

    fn primary(
        &mut self,
        primary: &Primary,
        scope: ScopeId,
        position: Option<&Position>,
    ) -> Result<Rvalue, CoreError> {
        Ok(match primary {
            Primary::Bool(b) => Rvalue::Bool(*b),
            Primary::Number(text) => Rvalue::Number(text.clone()),
            Primary::String(text) => Rvalue::Str(text.clone()),
            Primary::Symbol(name) => self.symbol(name, scope, position),
            Primary::SubExpression(expr) => self.lower_expression(expr, scope, position)?,
            Primary::Call(call) => Rvalue::Call(Box::new(self.call(call, scope, position, None)?)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{CompileOptions, GuardPolicy};
    use crate::populate::populate;
    use crate::tokens::{
        Argument, Branch, ClassMember, Param, TypeRef, UnaryOp,
    };

    fn entry(kind: EntryKind) -> Entry {
        Entry::new(kind)
    }

    fn method(name: &str, params: Vec<Param>, ty: &str, body: Vec<Entry>) -> Entry {
        entry(EntryKind::Method(crate::tokens::Method::new(
            name,
            params,
            TypeRef::named(ty),
            body,
        )))
    }

    fn call(name: &str, args: Vec<Argument>) -> Entry {
        entry(EntryKind::Call(FuncCall::new(name, args)))
    }

    fn field(name: &str, ty: TypeRef, value: Option<Literal>) -> Entry {
        entry(EntryKind::Field(Field::new(name, ty, value)))
    }

    fn guard(primary: Primary) -> Expression {
        Expression::from(primary)
    }

    fn build(
        entries: Vec<Entry>,
        options: CompileOptions,
    ) -> (Session, ScopeId, Result<ExecutionContext, CoreError>) {
        let mut session = Session::new(options);
        let root = session.arena.new_root("Main");
        populate(&mut session, &entries, root);
        let ctx = build_context(&mut session, &entries, root, true);
        (session, root, ctx)
    }

    fn calls_in(steps: &[Step]) -> Vec<&MethodCall> {
        let mut calls = Vec::new();
        for step in steps {
            match step {
                Step::Call(call) => calls.push(call),
                Step::Conditional(c) => calls.extend(calls_in(&c.body)),
                Step::Loop(l) => calls.extend(calls_in(&l.body)),
                _ => {}
            }
        }
        calls
    }

    fn external_printer() -> Entry {
        let mut printer = crate::tokens::Method::new(
            "log",
            vec![Param::new("n", TypeRef::named("int"))],
            TypeRef::named("void"),
            Vec::new(),
        );
        printer.visibility = Some(Visibility::External);
        entry(EntryKind::Method(printer))
    }

    #[test]
    fn false_branch_is_dropped_and_else_kept() {
        let entries = vec![
            external_printer(),
            method(
                "Main",
                Vec::new(),
                "int",
                vec![
                    entry(EntryKind::If(Branch {
                        guard: guard(Primary::Bool(false)),
                        body: vec![call("log", vec![Argument::positional(Literal::number(1))])],
                    })),
                    entry(EntryKind::Else(vec![call(
                        "log",
                        vec![Argument::positional(Literal::number(2))],
                    )])),
                ],
            ),
        ];
        let (session, _, ctx) = build(entries, CompileOptions::default());
        let ctx = ctx.expect("build");
        assert!(session.diagnostics.is_empty());
        let main = ctx.find_method("Main__Main").expect("Main lowered");
        let calls = calls_in(&main.steps);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].unnamed, vec![Rvalue::Number("2".into())]);
        assert!(matches!(
            &main.steps[0],
            Step::Conditional(Conditional { kind: BranchKind::Block, guard: None, .. })
        ));
    }

    #[test]
    fn opaque_bool_call_keeps_runtime_conditional() {
        let entries = vec![
            external_printer(),
            method("ready", Vec::new(), "bool", vec![entry(EntryKind::Return(Some(Literal::Bool(true))))]),
            method(
                "Main",
                Vec::new(),
                "int",
                vec![entry(EntryKind::If(Branch {
                    guard: guard(Primary::Call(FuncCall::new("ready", Vec::new()))),
                    body: vec![call("log", vec![Argument::positional(Literal::number(1))])],
                }))],
            ),
        ];
        let (session, _, ctx) = build(entries, CompileOptions::default());
        let ctx = ctx.expect("build");
        assert!(session.diagnostics.is_empty());
        let main = ctx.find_method("Main__Main").expect("Main lowered");
        match &main.steps[0] {
            Step::Conditional(c) => {
                assert_eq!(c.kind, BranchKind::If);
                match &c.guard {
                    Some(Rvalue::Call(call)) => assert_eq!(call.target, "Main__ready"),
                    other => panic!("unexpected guard: {other:?}"),
                }
                assert_eq!(calls_in(&c.body).len(), 1);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn else_after_runtime_guard_stays_else() {
        let entries = vec![
            method("ready", Vec::new(), "bool", Vec::new()),
            method(
                "Main",
                Vec::new(),
                "int",
                vec![
                    entry(EntryKind::If(Branch {
                        guard: guard(Primary::Call(FuncCall::new("ready", Vec::new()))),
                        body: Vec::new(),
                    })),
                    entry(EntryKind::ElseIf(Branch {
                        guard: guard(Primary::Bool(false)),
                        body: Vec::new(),
                    })),
                    entry(EntryKind::Else(Vec::new())),
                ],
            ),
        ];
        let (_, _, ctx) = build(entries, CompileOptions::default());
        let ctx = ctx.expect("build");
        let main = ctx.find_method("Main__Main").expect("Main lowered");
        let kinds: Vec<_> = main
            .steps
            .iter()
            .filter_map(|s| match s {
                Step::Conditional(c) => Some(c.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![BranchKind::If, BranchKind::Else]);
    }

    #[test]
    fn taken_branch_drops_rest_of_chain() {
        let entries = vec![method(
            "Main",
            Vec::new(),
            "int",
            vec![
                entry(EntryKind::If(Branch {
                    guard: guard(Primary::Bool(true)),
                    body: vec![entry(EntryKind::Return(Some(Literal::number(1))))],
                })),
                entry(EntryKind::Else(vec![entry(EntryKind::Return(Some(
                    Literal::number(2),
                )))])),
            ],
        )];
        let (_, _, ctx) = build(entries, CompileOptions::default());
        let main_ctx = ctx.expect("build");
        let main = main_ctx.find_method("Main__Main").expect("Main lowered");
        assert_eq!(main.steps.len(), 1);
        match &main.steps[0] {
            Step::Conditional(c) => {
                assert_eq!(c.body, vec![Step::Return(Some(Rvalue::Number("1".into())))]);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn non_boolean_guard_is_reported() {
        let entries = vec![method(
            "Main",
            Vec::new(),
            "int",
            vec![entry(EntryKind::If(Branch {
                guard: guard(Primary::number("7")),
                body: Vec::new(),
            }))],
        )];
        let (session, _, ctx) = build(entries, CompileOptions::default());
        ctx.expect("build");
        assert_eq!(session.diagnostics.count(DiagnosticKind::NonBooleanGuard), 1);
    }

    #[test]
    fn lenient_policy_accepts_zero_and_one() {
        let body = vec![entry(EntryKind::If(Branch {
            guard: guard(Primary::number("0")),
            body: vec![entry(EntryKind::Return(Some(Literal::number(1))))],
        }))];
        let entries = vec![method("Main", Vec::new(), "int", body)];
        let options = CompileOptions::default().with_guard_policy(GuardPolicy::Lenient);
        let (session, _, ctx) = build(entries, options);
        let ctx = ctx.expect("build");
        assert!(session.diagnostics.is_empty());
        assert!(ctx.find_method("Main__Main").expect("Main").steps.is_empty());
    }

    #[test]
    fn dangling_else_is_reported() {
        let entries = vec![method(
            "Main",
            Vec::new(),
            "int",
            vec![entry(EntryKind::Else(Vec::new()))],
        )];
        let (session, _, ctx) = build(entries, CompileOptions::default());
        ctx.expect("build");
        assert_eq!(session.diagnostics.count(DiagnosticKind::DanglingBranch), 1);
    }

    #[test]
    fn method_is_lowered_once_for_many_calls() {
        let helper = method(
            "helper",
            vec![Param::new("n", TypeRef::named("int"))],
            "void",
            Vec::new(),
        );
        let body = (1..=3)
            .map(|n| call("helper", vec![Argument::positional(Literal::number(n))]))
            .collect();
        let entries = vec![helper, method("Main", Vec::new(), "int", body)];
        let (_, _, ctx) = build(entries, CompileOptions::default());
        let ctx = ctx.expect("build");
        assert_eq!(ctx.method_count(), 2);
        let main = ctx.find_method("Main__Main").expect("Main lowered");
        let calls = calls_in(&main.steps);
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.target == "Main__helper"));
    }

    #[test]
    fn unresolved_method_is_fatal() {
        let entries = vec![method(
            "Main",
            Vec::new(),
            "int",
            vec![call("nowhere", Vec::new())],
        )];
        let (_, _, ctx) = build(entries, CompileOptions::default());
        match ctx {
            Err(CoreError::UnresolvedMethod { name, trace, .. }) => {
                assert_eq!(name, "nowhere");
                assert_eq!(trace.last().map(String::as_str), Some("Main"));
            }
            other => panic!("expected an unresolved method, got {other:?}"),
        }
    }

    fn counter_class() -> Entry {
        entry(EntryKind::Class(crate::tokens::Class {
            visibility: None,
            name: "Counter".into(),
            extends: Vec::new(),
            members: vec![
                ClassMember::Field(Field::new("count", TypeRef::named("int"), None)),
                ClassMember::Method(crate::tokens::Method::new(
                    CONSTRUCTOR,
                    vec![Param::new("start", TypeRef::named("int"))],
                    TypeRef::named("void"),
                    vec![entry(EntryKind::Assign(crate::tokens::Assignment {
                        target: "self.count".into(),
                        value: Literal::Symbol("start".into()),
                    }))],
                )),
                ClassMember::Method(crate::tokens::Method::new(
                    "bump",
                    Vec::new(),
                    TypeRef::named("void"),
                    vec![call("reset", Vec::new())],
                )),
                ClassMember::Method(crate::tokens::Method::new(
                    "reset",
                    Vec::new(),
                    TypeRef::named("void"),
                    Vec::new(),
                )),
            ],
        }))
    }

    #[test]
    fn class_calls_bind_self() {
        let entries = vec![
            counter_class(),
            method(
                "Main",
                Vec::new(),
                "int",
                vec![
                    field(
                        "c",
                        TypeRef::named("Counter"),
                        Some(Literal::Call(FuncCall::new(
                            "Counter",
                            vec![Argument::named("start", Literal::number(3))],
                        ))),
                    ),
                    call("c.bump", Vec::new()),
                ],
            ),
        ];
        let (session, _, ctx) = build(entries, CompileOptions::default());
        let ctx = ctx.expect("build");
        assert!(session.diagnostics.is_empty(), "{:?}", session.diagnostics);

        assert_eq!(ctx.classes.len(), 1);
        assert_eq!(ctx.classes[0].name, "Main__Counter");

        let main = ctx.find_method("Main__Main").expect("Main lowered");
        let calls = calls_in(&main.steps);
        assert_eq!(calls[0].target, "Main__Counter__constructor");
        assert_eq!(
            calls[0].named.get(SELF_PARAM),
            Some(&Rvalue::AddressOf("Main__Main__c".into()))
        );
        assert_eq!(calls[1].target, "Main__Counter__bump");
        assert_eq!(
            calls[1].named.get(SELF_PARAM),
            Some(&Rvalue::AddressOf("Main__Main__c".into()))
        );

        let ctor = ctx
            .find_method("Main__Counter__constructor")
            .expect("constructor lowered");
        assert_eq!(
            ctor.steps,
            vec![Step::Assign {
                target: "self->count".into(),
                value: Rvalue::Symbol("start".into()),
            }]
        );

        let bump = ctx.find_method("Main__Counter__bump").expect("bump lowered");
        let inner = calls_in(&bump.steps);
        assert_eq!(inner[0].named.get(SELF_PARAM), Some(&Rvalue::Symbol("self".into())));
    }

    #[test]
    fn constructor_without_receiver_fails() {
        let entries = vec![
            counter_class(),
            method(
                "Main",
                Vec::new(),
                "int",
                vec![call("Counter", vec![Argument::positional(Literal::number(1))])],
            ),
        ];
        let (_, _, ctx) = build(entries, CompileOptions::default());
        assert!(matches!(ctx, Err(CoreError::MissingReceiver { class }) if class == "Counter"));
    }

    #[test]
    fn arguments_fall_back_to_caller_scope() {
        let entries = vec![
            method(
                "show",
                vec![Param::new("value", TypeRef::named("int"))],
                "void",
                Vec::new(),
            ),
            method(
                "Main",
                vec![Param::new("argc", TypeRef::named("int"))],
                "int",
                vec![call("show", vec![Argument::positional(Literal::Symbol("argc".into()))])],
            ),
        ];
        let (session, _, ctx) = build(entries, CompileOptions::default());
        let ctx = ctx.expect("build");
        assert!(session.diagnostics.is_empty(), "{:?}", session.diagnostics);
        let main = ctx.find_method("Main__Main").expect("Main lowered");
        assert_eq!(calls_in(&main.steps)[0].unnamed, vec![Rvalue::Symbol("argc".into())]);
    }

    #[test]
    fn external_params_are_copied_on_entry() {
        let mut copied = Param::new("limit", TypeRef::named("int"));
        copied.external = true;
        let entries = vec![method(
            "clamp",
            vec![copied],
            "int",
            vec![entry(EntryKind::Return(Some(Literal::Symbol("limit".into()))))],
        )];
        let (_, _, ctx) = build(entries, CompileOptions::library());
        let ctx = ctx.expect("build");
        let clamp = ctx.find_method("Main__clamp").expect("clamp lowered");
        assert_eq!(
            clamp.steps[0],
            Step::Declare(Declaration {
                name: "Main__clamp__limit".into(),
                ty: TypeRef::named("int"),
                value: Some(Rvalue::Symbol("limit".into())),
                scope: clamp.scope,
            })
        );
        assert_eq!(
            clamp.steps[1],
            Step::Return(Some(Rvalue::Symbol("Main__clamp__limit".into())))
        );
    }

    #[test]
    fn loop_binding_is_scoped_to_loop() {
        let entries = vec![
            external_printer(),
            method(
                "Main",
                Vec::new(),
                "int",
                vec![entry(EntryKind::ForOf(ForOf {
                    binding: "n".into(),
                    ty: TypeRef::named("int"),
                    source: Literal::Array(vec![Literal::number(1), Literal::number(2)]),
                    body: vec![call("log", vec![Argument::positional(Literal::Symbol("n".into()))])],
                }))],
            ),
        ];
        let (session, _, ctx) = build(entries, CompileOptions::default());
        let ctx = ctx.expect("build");
        let main = ctx.find_method("Main__Main").expect("Main lowered");
        match &main.steps[0] {
            Step::Loop(lp) => {
                assert_eq!(lp.binding, "Main__Main__n");
                assert_eq!(lp.counter, "Main__Main__counter0");
                assert_eq!(lp.array, "Main__Main__array0");
                assert_eq!(
                    calls_in(&lp.body)[0].unnamed,
                    vec![Rvalue::Symbol("Main__Main__n".into())]
                );
                assert!(!session.arena.get(lp.scope).variables.contains_key("n"));
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn runtime_expressions_are_lowered_with_mangled_names() {
        let sum = Literal::expression(Addition::chain(
            Primary::symbol("base"),
            AdditionOp::Add,
            Primary::SubExpression(Box::new(Expression::from(Multiplication::chain(
                Primary::number("2"),
                MultiplicationOp::Mul,
                Primary::number("3"),
            )))),
        ));
        let entries = vec![
            field("base", TypeRef::named("int"), Some(Literal::number(1))),
            field("total", TypeRef::named("int"), Some(sum)),
            field(
                "flag",
                TypeRef::named("bool"),
                Some(Literal::expression(Unary::op(UnaryOp::Not, Primary::Bool(true)))),
            ),
        ];
        let (session, _, ctx) = build(entries, CompileOptions::library());
        let ctx = ctx.expect("build");
        assert!(session.diagnostics.is_empty());
        assert_eq!(
            ctx.steps[1],
            Step::Declare(Declaration {
                name: "Main__total".into(),
                ty: TypeRef::named("int"),
                value: Some(Rvalue::Binary {
                    op: BinaryOp::Add,
                    lhs: Box::new(Rvalue::Symbol("Main__base".into())),
                    rhs: Box::new(Rvalue::Number("6".into())),
                }),
                scope: ctx.scope,
            })
        );
        match &ctx.steps[2] {
            Step::Declare(d) => assert_eq!(d.value, Some(Rvalue::Bool(false))),
            other => panic!("unexpected step: {other:?}"),
        }
    }
}
