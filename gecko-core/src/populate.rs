//! Registers declarations from token-tree entries into a scope.

use tracing::{debug, trace};

use crate::evaluate::fold_literal;
use crate::scope::{
    CallableField, Class, Method, ScopeId, SymbolMut, SymbolTable, TypeKind, UserType, Variable,
};
use crate::session::Session;
use crate::span::Position;
use crate::tokens::{self, ClassMember, EntryKind, Param, TypeRef, Visibility};

/// Name of the implicit receiver parameter of class methods.
pub const SELF_PARAM: &str = "self";

pub fn populate(session: &mut Session, entries: &[tokens::Entry], scope: ScopeId) {
    for entry in entries {
        populate_entry(session, entry, scope);
    }
}

pub fn populate_entry(session: &mut Session, entry: &tokens::Entry, scope: ScopeId) {
    let position = entry.position.as_ref();
    match &entry.kind {
        EntryKind::Field(field) => {
            declare_field(session, field, scope, position);
        }
        EntryKind::Method(method) => {
            declare_method(session, method, scope, position, None);
        }
        EntryKind::Class(class) => {
            declare_class(session, class, scope, position);
        }
        EntryKind::Type(decl) => declare_type(session, decl, scope, position),
        EntryKind::Enum(decl) => declare_enum(session, decl, scope, position),
        EntryKind::NativeCode(code) => {
            let preamble = &mut session.arena.get_mut(scope).native_preamble;
            preamble.push_str(code);
            preamble.push('\n');
        }
        EntryKind::Schema(fields) => {
            trace!("skipping schema with {} field(s)", fields.len());
        }
        EntryKind::If(_)
        | EntryKind::ElseIf(_)
        | EntryKind::Else(_)
        | EntryKind::Call(_)
        | EntryKind::Assign(_)
        | EntryKind::Return(_)
        | EntryKind::ForOf(_)
        | EntryKind::Import(_) => {}
    }
}

/// Folds the field's value and registers it, replacing any variable of
/// the same name in `scope`.
pub fn declare_field(
    session: &mut Session,
    field: &tokens::Field,
    scope: ScopeId,
    position: Option<&Position>,
) -> Variable {
    let mut value = field.value.clone();
    if let Some(literal) = value.as_mut() {
        fold_literal(
            &session.arena,
            scope,
            literal,
            position,
            &mut session.diagnostics,
        );
    }
    let mut variable = Variable {
        name: field.name.clone(),
        ty: field.ty.clone(),
        value,
        visibility: field.visibility,
        owner: scope,
        position: position.cloned(),
    };
    SymbolMut::Variable(&mut variable).assign_default_visibility();
    session
        .arena
        .get_mut(scope)
        .variables
        .insert(field.name.clone(), variable.clone());
    variable
}

pub fn declare_method(
    session: &mut Session,
    method: &tokens::Method,
    scope: ScopeId,
    position: Option<&Position>,
    receiver: Option<&str>,
) -> Method {
    let mut params = method.params.clone();
    for param in &mut params {
        if let Some(default) = param.default.as_mut() {
            fold_literal(
                &session.arena,
                scope,
                default,
                position,
                &mut session.diagnostics,
            );
        }
    }
    if let Some(class) = receiver {
        params.insert(
            0,
            Param::new(SELF_PARAM, TypeRef::array_of(TypeRef::named(class))),
        );
    }
    let declared = Method {
        name: method.name.clone(),
        params,
        return_type: method.ty.clone(),
        visibility: method.visibility,
        body: method.body.clone(),
        owner: scope,
        position: position.cloned(),
        receiver: receiver.map(str::to_string),
    };
    session
        .arena
        .get_mut(scope)
        .methods
        .insert(method.name.clone(), declared.clone());
    declared
}

pub fn declare_class(
    session: &mut Session,
    class: &tokens::Class,
    scope: ScopeId,
    position: Option<&Position>,
) -> Class {
    let class_scope = session.arena.new_child(scope, class.name.clone());
    session.arena.get_mut(class_scope).initialize();

    for member in &class.members {
        match member {
            ClassMember::Field(field) => {
                declare_field(session, field, class_scope, position);
            }
            ClassMember::Method(method) => {
                declare_method(session, method, class_scope, position, Some(&class.name));
            }
        }
    }

    for base in &class.extends {
        match session.arena.lookup_class(scope, base).map(|c| c.scope) {
            Some(base_scope) => {
                debug!("class {} inherits members of {base}", class.name);
                session.arena.merge(class_scope, base_scope);
            }
            None => trace!("base class {base} of {} is not declared here", class.name),
        }
    }

    let mut declared = Class {
        name: class.name.clone(),
        visibility: class.visibility,
        scope: class_scope,
        parent: scope,
        extends: class.extends.clone(),
        position: position.cloned(),
    };
    SymbolMut::Class(&mut declared).assign_default_visibility();
    session
        .arena
        .get_mut(scope)
        .classes
        .insert(class.name.clone(), declared.clone());
    declared
}

pub fn declare_type(
    session: &mut Session,
    decl: &tokens::TypeDecl,
    scope: ScopeId,
    position: Option<&Position>,
) {
    let mut fields = SymbolTable::new();
    let mut methods = SymbolTable::new();
    for field in &decl.fields {
        match &field.arguments {
            Some(arguments) => methods.insert(
                field.name.clone(),
                CallableField {
                    name: field.name.clone(),
                    params: arguments.clone(),
                    return_type: field.ty.clone(),
                },
            ),
            None => {
                let mut variable = Variable::new(field.name.clone(), field.ty.clone(), scope);
                variable.value = field.value.clone();
                fields.insert(field.name.clone(), variable);
            }
        }
    }
    let declared = UserType {
        name: decl.name.clone(),
        owner: scope,
        visibility: decl.visibility,
        kind: TypeKind::Record { fields, methods },
        position: position.cloned(),
    };
    session
        .arena
        .get_mut(scope)
        .types
        .insert(decl.name.clone(), declared);
}

/// Registers the enum and one public variable per case, keyed
/// `Enum.Case`.
pub fn declare_enum(
    session: &mut Session,
    decl: &tokens::EnumDecl,
    scope: ScopeId,
    position: Option<&Position>,
) {
    let declared = UserType {
        name: decl.name.clone(),
        owner: scope,
        visibility: None,
        kind: TypeKind::Enum {
            cases: decl.cases.clone(),
        },
        position: position.cloned(),
    };
    let table = session.arena.get_mut(scope);
    table.types.insert(decl.name.clone(), declared);
    for case in &decl.cases {
        let key = format!("{}.{case}", decl.name);
        let mut variable = Variable::new(key.clone(), TypeRef::named(decl.name.clone()), scope);
        variable.visibility = Some(Visibility::Public);
        variable.position = position.cloned();
        table.variables.insert(key, variable);
    }
}
