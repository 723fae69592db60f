//! Compile driver: imports first, then populate, build and generate.

use tracing::{debug, info};

use crate::builder::build_context;
use crate::codegen_c::{self, CompilationArtifact, ENTRY_POINT};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::error::CoreError;
use crate::execution::ExecutionContext;
use crate::options::{CompileOptions, OutputKind};
use crate::populate::populate;
use crate::scope::ScopeId;
use crate::session::Session;
use crate::tokens::File;

/// Compiles `file` and everything it imports into C.
///
/// Diagnostics from the whole pass are collected before anything is
/// generated; if there are any, no output is produced.
pub fn compile(file: &File, options: CompileOptions) -> Result<CompilationArtifact, CoreError> {
    let mut session = Session::new(options);
    let (root, ctx) = compile_pass(&mut session, file)?;

    let has_entry = session.arena.get(root).methods.contains_key(ENTRY_POINT);
    if options.kind == OutputKind::Executable && !has_entry {
        let trace = session.arena.stack_trace(root);
        session.report(
            Diagnostic::new(
                DiagnosticKind::MissingEntryPoint,
                "No 'Main' function in file. Did you mean to build an object file?",
            )
            .with_trace(trace),
        );
    }

    if !session.diagnostics.is_empty() {
        return Err(CoreError::CompilationFailed(session.diagnostics.take()));
    }

    codegen_c::generate(&session.arena, root, &ctx, options.kind)
}

/// Populates and lowers one compilation unit, compiling its imports first.
///
/// A package already compiled in this session is not compiled again; its
/// scope is returned with an empty context.
pub fn compile_pass(
    session: &mut Session,
    file: &File,
) -> Result<(ScopeId, ExecutionContext), CoreError> {
    if let Some(scope) = session.compiled_unit(&file.package) {
        debug!("package {} already compiled", file.package);
        return Ok((scope, ExecutionContext::new(scope)));
    }

    info!("compiling package {}", file.package);
    let root = session.arena.new_root(file.package.clone());
    session.arena.get_mut(root).initialize();
    session.register_unit(&file.package, root);

    let mut ctx = ExecutionContext::new(root);
    for import in &file.imports {
        let fresh = session.compiled_unit(&import.package).is_none();
        let (imported, imported_ctx) = compile_pass(session, import)?;
        if fresh {
            let preamble = session.arena.get(imported).native_preamble.clone();
            session.arena.get_mut(root).native_preamble.push_str(&preamble);
        }
        ctx.merge(imported_ctx);
        session.arena.merge_import(root, imported);
    }

    populate(session, &file.entries, root);
    let own = build_context(session, &file.entries, root, true)?;
    ctx.merge(own);
    Ok((root, ctx))
}
