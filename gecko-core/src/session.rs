//! Per-compilation state shared by the populate, build and codegen stages.

use std::collections::{HashMap, HashSet};

use crate::diagnostic::{Diagnostic, Diagnostics};
use crate::options::CompileOptions;
use crate::scope::{Method, ScopeArena, ScopeId};

/// Everything one `compile` call owns.
///
/// Nothing here is global: two sessions in one process never see each
/// other's lowered methods or emitted classes.
#[derive(Debug, Default)]
pub struct Session {
    pub arena: ScopeArena,
    pub diagnostics: Diagnostics,
    pub options: CompileOptions,
    built_methods: HashSet<String>,
    emitted_classes: HashSet<String>,
    emitted_types: HashSet<String>,
    method_scopes: HashMap<String, ScopeId>,
    call_scopes: HashMap<String, ScopeId>,
    compiled_units: HashMap<String, ScopeId>,
    loop_counter: usize,
}

impl Session {
    pub fn new(options: CompileOptions) -> Self {
        Session {
            options,
            ..Session::default()
        }
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Records `full_path` as lowered. Returns false if it already was.
    pub fn mark_built(&mut self, full_path: &str) -> bool {
        self.built_methods.insert(full_path.to_string())
    }

    pub fn mark_class_emitted(&mut self, key: &str) -> bool {
        self.emitted_classes.insert(key.to_string())
    }

    pub fn mark_type_emitted(&mut self, key: &str) -> bool {
        self.emitted_types.insert(key.to_string())
    }

    /// Scope a method body resolves in, created on first use.
    pub fn method_scope(&mut self, method: &Method) -> ScopeId {
        let path = self.arena.method_path(method);
        if let Some(&id) = self.method_scopes.get(&path) {
            return id;
        }
        let id = self.arena.materialize_method(method);
        self.arena.merge_with_parents(id);
        self.method_scopes.insert(path, id);
        id
    }

    /// Bare child of the callee's declaring scope, used to try call
    /// arguments before falling back to the caller's scope.
    pub fn call_scope(&mut self, method: &Method) -> ScopeId {
        let path = self.arena.method_path(method);
        if let Some(&id) = self.call_scopes.get(&path) {
            return id;
        }
        let id = self.arena.new_child(method.owner, method.name.clone());
        self.call_scopes.insert(path, id);
        id
    }

    pub fn compiled_unit(&self, package: &str) -> Option<ScopeId> {
        self.compiled_units.get(package).copied()
    }

    pub fn register_unit(&mut self, package: &str, scope: ScopeId) {
        self.compiled_units.insert(package.to_string(), scope);
    }

    pub fn next_loop_id(&mut self) -> usize {
        let id = self.loop_counter;
        self.loop_counter += 1;
        id
    }
}
