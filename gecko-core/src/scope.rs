//! Scope model: named symbol tables arranged as a tree.
//!
//! Scopes live in a [`ScopeArena`] and refer to their parent by
//! [`ScopeId`]. Entities keep the id of the scope that declared them so
//! their mangled path stays stable no matter which table they were merged
//! into.

use std::collections::HashMap;

use tracing::debug;

use crate::span::Position;
use crate::tokens::{Entry, Literal, Param, TypeRef, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

/// Insertion-ordered name -> entity map.
///
/// Generated code follows declaration order, so a plain `HashMap` is not
/// enough here.
#[derive(Debug, Clone)]
pub struct SymbolTable<T> {
    entries: Vec<(String, T)>,
    index: HashMap<String, usize>,
}

impl<T> Default for SymbolTable<T> {
    fn default() -> Self {
        SymbolTable {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: PartialEq> PartialEq for SymbolTable<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<T> SymbolTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `key`, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    /// Inserts only when `key` is absent. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: T) -> bool {
        let key = key.into();
        if self.index.contains_key(&key) {
            return false;
        }
        self.insert(key, value);
        true
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).map(|&slot| &self.entries[slot].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        match self.index.get(key) {
            Some(&slot) => Some(&mut self.entries[slot].1),
            None => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let slot = self.index.remove(key)?;
        let (_, value) = self.entries.remove(slot);
        for position in self.index.values_mut() {
            if *position > slot {
                *position -= 1;
            }
        }
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: TypeRef,
    pub value: Option<Literal>,
    pub visibility: Option<Visibility>,
    pub owner: ScopeId,
    pub position: Option<Position>,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: TypeRef, owner: ScopeId) -> Self {
        Variable {
            name: name.into(),
            ty,
            value: None,
            visibility: None,
            owner,
            position: None,
        }
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
            .unwrap_or_else(|| Visibility::default_for(&self.name))
    }

    pub fn is_external(&self) -> bool {
        self.visibility == Some(Visibility::External)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
    pub visibility: Option<Visibility>,
    pub body: Vec<Entry>,
    pub owner: ScopeId,
    pub position: Option<Position>,
    /// Class name when the method takes an implicit `self`.
    pub receiver: Option<String>,
}

/// A callable field of a record type, lowered to a function pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct CallableField {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Record {
        fields: SymbolTable<Variable>,
        methods: SymbolTable<CallableField>,
    },
    Enum {
        cases: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserType {
    pub name: String,
    pub owner: ScopeId,
    pub visibility: Option<Visibility>,
    pub kind: TypeKind,
    pub position: Option<Position>,
}

impl UserType {
    pub fn record(name: impl Into<String>, owner: ScopeId) -> Self {
        UserType {
            name: name.into(),
            owner,
            visibility: None,
            kind: TypeKind::Record {
                fields: SymbolTable::new(),
                methods: SymbolTable::new(),
            },
            position: None,
        }
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.kind, TypeKind::Enum { .. })
    }
}

/// A class: a record layout whose members live in their own scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub name: String,
    pub visibility: Option<Visibility>,
    /// The class body.
    pub scope: ScopeId,
    /// The declaring scope.
    pub parent: ScopeId,
    pub extends: Vec<String>,
    pub position: Option<Position>,
}

/// Field that overrides the C type used for a class.
pub const NATIVE_TYPE_FIELD: &str = "__ctype__";

#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub name: String,
    pub parent: Option<ScopeId>,
    pub variables: SymbolTable<Variable>,
    pub methods: SymbolTable<Method>,
    pub types: SymbolTable<UserType>,
    pub classes: SymbolTable<Class>,
    pub native_preamble: String,
}

impl Scope {
    pub fn new(name: impl Into<String>, parent: Option<ScopeId>) -> Self {
        Scope {
            name: name.into(),
            parent,
            ..Scope::default()
        }
    }

    /// Empties every table and the preamble.
    pub fn initialize(&mut self) {
        self.variables.clear();
        self.methods.clear();
        self.types.clear();
        self.classes.clear();
        self.native_preamble.clear();
    }
}

/// Borrowed view of any symbol kind.
#[derive(Debug, Clone, Copy)]
pub enum Symbol<'a> {
    Variable(&'a Variable),
    Method(&'a Method),
    Type(&'a UserType),
    Class(&'a Class),
}

/// Symbols that carry a visibility annotation.
#[derive(Debug)]
pub enum SymbolMut<'a> {
    Variable(&'a mut Variable),
    Class(&'a mut Class),
}

impl SymbolMut<'_> {
    /// Fills in the conventional visibility when none was annotated.
    pub fn assign_default_visibility(self) {
        match self {
            SymbolMut::Variable(variable) => {
                if variable.visibility.is_none() {
                    variable.visibility = Some(Visibility::default_for(&variable.name));
                }
            }
            SymbolMut::Class(class) => {
                if class.visibility.is_none() {
                    class.visibility = Some(Visibility::default_for(&class.name));
                }
            }
        }
    }
}

/// Owner of every scope created during one compile session.
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

fn mangle(segment: &str) -> String {
    segment.replace('.', "__")
}

fn qualify(prefix: &str, key: &str) -> String {
    let bare = key
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(key);
    format!("{prefix}.{bare}")
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_root(&mut self, name: impl Into<String>) -> ScopeId {
        self.push(Scope::new(name, None))
    }

    pub fn new_child(&mut self, parent: ScopeId, name: impl Into<String>) -> ScopeId {
        self.push(Scope::new(name, Some(parent)))
    }

    fn push(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(scope);
        id
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.get(id).parent
    }

    /// Copies every symbol of `source` missing from `target`.
    ///
    /// Names already present in `target` are never replaced.
    pub fn merge(&mut self, target: ScopeId, source: ScopeId) {
        if target == source {
            return;
        }
        debug!(
            "merging {} into '{}'",
            self.full_path(source),
            self.full_path(target)
        );
        let source = self.get(source).clone();
        let target = self.get_mut(target);
        target.native_preamble.push_str(&source.native_preamble);
        for (name, variable) in source.variables.entries {
            target.variables.insert_if_absent(name, variable);
        }
        for (name, method) in source.methods.entries {
            if target.methods.insert_if_absent(name.as_str(), method) {
                debug!("merging method {name} from {} into '{}'", source.name, target.name);
            }
        }
        for (name, ty) in source.types.entries {
            target.types.insert_if_absent(name, ty);
        }
        for (name, class) in source.classes.entries {
            target.classes.insert_if_absent(name, class);
        }
    }

    /// Merges an imported unit under its own name as a `name.member` prefix.
    ///
    /// Variables are filtered by visibility; everything else is merged.
    pub fn merge_import(&mut self, target: ScopeId, imported: ScopeId) {
        let importer_name = self.get(target).name.clone();
        let source = self.get(imported).clone();
        debug!("merging import {} into '{}'", source.name, importer_name);

        let mut variables = Vec::new();
        for (key, variable) in source.variables.entries {
            let visible = match variable.visibility() {
                Visibility::Public => true,
                Visibility::Protected => self.get(variable.owner).name == importer_name,
                Visibility::Private | Visibility::External => false,
            };
            if visible {
                variables.push((qualify(&source.name, &key), variable));
            }
        }

        let target = self.get_mut(target);
        for (key, variable) in variables {
            target.variables.insert(key, variable);
        }
        for (key, method) in source.methods.entries {
            let key = qualify(&source.name, &key);
            debug!(
                "merging method {key} from imported package {} into '{}'",
                source.name, importer_name
            );
            target.methods.insert(key, method);
        }
        for (key, ty) in source.types.entries {
            target.types.insert(qualify(&source.name, &key), ty);
        }
        for (key, class) in source.classes.entries {
            target.classes.insert(qualify(&source.name, &key), class);
        }
    }

    /// Merges every ancestor into `id`, nearest first.
    pub fn merge_with_parents(&mut self, id: ScopeId) {
        let mut parent = self.parent(id);
        while let Some(ancestor) = parent {
            self.merge(id, ancestor);
            parent = self.parent(ancestor);
        }
    }

    /// `__`-joined chain of ancestor names, with `.` rendered as `__`.
    pub fn full_path(&self, id: ScopeId) -> String {
        let scope = self.get(id);
        match scope.parent {
            Some(parent) => format!("{}__{}", self.full_path(parent), mangle(&scope.name)),
            None => mangle(&scope.name),
        }
    }

    /// Mangled name of a variable; external variables keep their bare name.
    pub fn variable_path(&self, variable: &Variable) -> String {
        if variable.is_external() {
            variable.name.clone()
        } else {
            format!("{}__{}", self.full_path(variable.owner), mangle(&variable.name))
        }
    }

    pub fn method_path(&self, method: &Method) -> String {
        format!("{}__{}", self.full_path(method.owner), mangle(&method.name))
    }

    pub fn type_path(&self, ty: &UserType) -> String {
        format!("{}__{}", self.full_path(ty.owner), mangle(&ty.name))
    }

    pub fn class_path(&self, class: &Class) -> String {
        self.full_path(class.scope)
    }

    /// C type spelled by a class's `__ctype__` field, quotes stripped.
    pub fn native_type(&self, class: &Class) -> Option<String> {
        let field = self.get(class.scope).variables.get(NATIVE_TYPE_FIELD)?;
        match &field.value {
            Some(Literal::String(text)) => Some(text.trim_matches('"').to_string()),
            _ => None,
        }
    }

    /// Frames from `id` up to the root: `parent.child`, then the root name.
    pub fn stack_trace(&self, id: ScopeId) -> Vec<String> {
        let mut frames = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            frames.push(format!("{}.{}", self.get(parent).name, self.get(current).name));
            current = parent;
        }
        frames.push(self.get(current).name.clone());
        frames
    }

    /// `id` followed by its ancestors, nearest first.
    pub fn ancestry(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Root of the tree containing `id`.
    pub fn root(&self, id: ScopeId) -> ScopeId {
        self.ancestry(id).last().copied().unwrap_or(id)
    }

    pub fn lookup_variable(&self, id: ScopeId, name: &str) -> Option<&Variable> {
        self.ancestry(id)
            .into_iter()
            .find_map(|scope| self.get(scope).variables.get(name))
    }

    pub fn lookup_method(&self, id: ScopeId, name: &str) -> Option<&Method> {
        self.ancestry(id)
            .into_iter()
            .find_map(|scope| self.get(scope).methods.get(name))
    }

    pub fn lookup_type(&self, id: ScopeId, name: &str) -> Option<&UserType> {
        self.ancestry(id)
            .into_iter()
            .find_map(|scope| self.get(scope).types.get(name))
    }

    pub fn lookup_class(&self, id: ScopeId, name: &str) -> Option<&Class> {
        self.ancestry(id)
            .into_iter()
            .find_map(|scope| self.get(scope).classes.get(name))
    }

    /// Any symbol named `name`, checking each scope's tables in turn.
    pub fn lookup(&self, id: ScopeId, name: &str) -> Option<Symbol<'_>> {
        self.ancestry(id).into_iter().find_map(|scope| {
            let scope = self.get(scope);
            scope
                .variables
                .get(name)
                .map(Symbol::Variable)
                .or_else(|| scope.methods.get(name).map(Symbol::Method))
                .or_else(|| scope.classes.get(name).map(Symbol::Class))
                .or_else(|| scope.types.get(name).map(Symbol::Type))
        })
    }

    /// Creates the transient scope a method body resolves in.
    ///
    /// Plain parameters are external (referenced verbatim); parameters
    /// flagged external are mangled locals copied at method entry.
    pub fn materialize_method(&mut self, method: &Method) -> ScopeId {
        let id = self.new_child(method.owner, method.name.clone());
        for param in &method.params {
            let mut variable = Variable::new(param.name.clone(), param.ty.clone(), id);
            variable.visibility = Some(if param.external {
                Visibility::Public
            } else {
                Visibility::External
            });
            self.get_mut(id).variables.insert(param.name.clone(), variable);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_var(arena: &mut ScopeArena, scope: ScopeId, name: &str) -> Variable {
        let mut variable = Variable::new(name, TypeRef::named("int"), scope);
        SymbolMut::Variable(&mut variable).assign_default_visibility();
        arena.get_mut(scope).variables.insert(name, variable.clone());
        variable
    }

    #[test]
    fn merge_keeps_existing_names() {
        let mut arena = ScopeArena::new();
        let a = arena.new_root("A");
        let b = arena.new_root("B");
        int_var(&mut arena, a, "x");
        int_var(&mut arena, b, "x");
        int_var(&mut arena, b, "y");

        arena.merge(a, b);

        let scope = arena.get(a);
        assert_eq!(scope.variables.get("x").expect("x").owner, a);
        assert_eq!(scope.variables.get("y").expect("y").owner, b);
    }

    #[test]
    fn merging_empty_scope_is_noop() {
        let mut arena = ScopeArena::new();
        let a = arena.new_root("A");
        let empty = arena.new_root("E");
        int_var(&mut arena, a, "x");
        arena.get_mut(a).native_preamble.push_str("#include <stdio.h>\n");

        arena.merge(a, empty);

        assert_eq!(arena.get(a).variables.len(), 1);
        assert_eq!(arena.get(a).native_preamble, "#include <stdio.h>\n");
    }

    #[test]
    fn merge_appends_preamble() {
        let mut arena = ScopeArena::new();
        let a = arena.new_root("A");
        let b = arena.new_root("B");
        arena.get_mut(a).native_preamble.push_str("a\n");
        arena.get_mut(b).native_preamble.push_str("b\n");
        arena.merge(a, b);
        assert_eq!(arena.get(a).native_preamble, "a\nb\n");
    }

    #[test]
    fn import_is_qualified_once() {
        let mut arena = ScopeArena::new();
        let main = arena.new_root("Main");
        let pkg = arena.new_root("pkg");
        int_var(&mut arena, pkg, "v");
        // already-qualified key must not be qualified twice
        let twice = Variable::new("w", TypeRef::named("int"), pkg);
        arena.get_mut(pkg).variables.insert("pkg.w", twice);

        arena.merge_import(main, pkg);

        let vars = &arena.get(main).variables;
        assert!(vars.contains_key("pkg.v"));
        assert!(vars.contains_key("pkg.w"));
        assert!(!vars.contains_key("pkg.pkg.v"));
        assert!(!vars.contains_key("pkg.pkg.w"));
    }

    #[test]
    fn import_filters_by_visibility() {
        let mut arena = ScopeArena::new();
        let main = arena.new_root("Main");
        let pkg = arena.new_root("pkg");
        int_var(&mut arena, pkg, "_hidden");
        let mut protected = Variable::new("guarded", TypeRef::named("int"), pkg);
        protected.visibility = Some(Visibility::Protected);
        arena.get_mut(pkg).variables.insert("guarded", protected);

        arena.merge_import(main, pkg);

        assert!(arena.get(main).variables.is_empty());
    }

    #[test]
    fn full_path_normalizes_dots() {
        let mut arena = ScopeArena::new();
        let root = arena.new_root("std.io");
        let child = arena.new_child(root, "Writer");
        let again = arena.new_root("std.io");
        let again_child = arena.new_child(again, "Writer");
        assert_eq!(arena.full_path(child), "std__io__Writer");
        assert_eq!(arena.full_path(child), arena.full_path(again_child));
        assert_eq!(arena.full_path(root), "std__io");
    }

    #[test]
    fn merge_with_parents_preserves_shadowing() {
        let mut arena = ScopeArena::new();
        let root = arena.new_root("Main");
        let child = arena.new_child(root, "Run");
        int_var(&mut arena, root, "x");
        int_var(&mut arena, root, "z");
        int_var(&mut arena, child, "x");

        arena.merge_with_parents(child);

        let vars = &arena.get(child).variables;
        assert_eq!(vars.get("x").expect("x").owner, child);
        assert_eq!(vars.get("z").expect("z").owner, root);
    }

    #[test]
    fn stack_trace_lists_frames_to_root() {
        let mut arena = ScopeArena::new();
        let root = arena.new_root("Main");
        let class = arena.new_child(root, "Point");
        let method = arena.new_child(class, "move");
        assert_eq!(
            arena.stack_trace(method),
            vec!["Point.move".to_string(), "Main.Point".into(), "Main".into()]
        );
    }

    #[test]
    fn external_variables_keep_bare_name() {
        let mut arena = ScopeArena::new();
        let root = arena.new_root("Main");
        let mut ext = Variable::new("errno", TypeRef::named("int"), root);
        ext.visibility = Some(Visibility::External);
        let local = Variable::new("count", TypeRef::named("int"), root);
        assert_eq!(arena.variable_path(&ext), "errno");
        assert_eq!(arena.variable_path(&local), "Main__count");
    }

    #[test]
    fn default_visibility_respects_annotation() {
        let mut arena = ScopeArena::new();
        let root = arena.new_root("Main");
        let mut hidden = Variable::new("_secret", TypeRef::named("int"), root);
        SymbolMut::Variable(&mut hidden).assign_default_visibility();
        assert_eq!(hidden.visibility, Some(Visibility::Private));

        let mut class = Class {
            name: "_Internal".into(),
            visibility: Some(Visibility::Public),
            scope: root,
            parent: root,
            extends: Vec::new(),
            position: None,
        };
        SymbolMut::Class(&mut class).assign_default_visibility();
        assert_eq!(class.visibility, Some(Visibility::Public));
    }

    #[test]
    fn symbol_table_remove_keeps_order() {
        let mut table = SymbolTable::new();
        table.insert("a", 1);
        table.insert("b", 2);
        table.insert("c", 3);
        assert_eq!(table.remove("b"), Some(2));
        let keys: Vec<_> = table.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(table.get("c"), Some(&3));
    }

    #[test]
    fn materialized_method_scope_binds_params() {
        let mut arena = ScopeArena::new();
        let root = arena.new_root("Main");
        let mut copied = Param::new("n", TypeRef::named("int"));
        copied.external = true;
        let method = Method {
            name: "Run".into(),
            params: vec![Param::new("argc", TypeRef::named("int")), copied],
            return_type: TypeRef::named("int"),
            visibility: None,
            body: Vec::new(),
            owner: root,
            position: None,
            receiver: None,
        };
        let scope = arena.materialize_method(&method);
        let argc = arena.get(scope).variables.get("argc").expect("argc");
        assert_eq!(arena.variable_path(argc), "argc");
        let n = arena.get(scope).variables.get("n").expect("n");
        assert_eq!(arena.variable_path(n), "Main__Run__n");
    }
}
