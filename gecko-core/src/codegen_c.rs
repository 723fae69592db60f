//! C code generation from a lowered [`ExecutionContext`].
//!
//! Output is assembled from independent sections so that every type and
//! forward signature precedes the first body that needs it:
//!
//!   preamble -> types -> globals -> signatures -> bodies -> init -> main
//!
//! Library builds additionally get a header with the declarations only.

use std::collections::HashSet;

use tracing::debug;

use crate::error::CoreError;
use crate::execution::{
    BranchKind, Declaration, ExecutionContext, Loop, MethodCall, ObjectDefinition, Rvalue,
    Signature, Step, TypeDefinition,
};
use crate::options::OutputKind;
use crate::scope::{Method, ScopeArena, ScopeId};
use crate::tokens::{Param, TypeRef, UnaryOp};
use crate::types;

const INDENT: &str = "    ";

/// Name of the method an executable starts in.
pub const ENTRY_POINT: &str = "Main";

/// Generated C text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationArtifact {
    pub source: String,
    /// Present for library builds.
    pub header: Option<String>,
}

/// Renders `ctx`, whose root scope is `root`, as C.
pub fn generate(
    arena: &ScopeArena,
    root: ScopeId,
    ctx: &ExecutionContext,
    kind: OutputKind,
) -> Result<CompilationArtifact, CoreError> {
    let mut generator = CodeGenerator::new(arena, root);
    generator.context(ctx)?;
    Ok(generator.finish(kind))
}

fn line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

/// `T name`, without a space after a pointer star.
fn declarator(c_type: &str, name: &str) -> String {
    if c_type.ends_with('*') {
        format!("{c_type}{name}")
    } else {
        format!("{c_type} {name}")
    }
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Not => "!",
        UnaryOp::Negate => "-",
        UnaryOp::Plus => "+",
    }
}

pub struct CodeGenerator<'a> {
    arena: &'a ScopeArena,
    root: ScopeId,
    types: String,
    globals: String,
    externs: String,
    signatures: String,
    bodies: String,
    init: String,
    emitted: HashSet<String>,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(arena: &'a ScopeArena, root: ScopeId) -> Self {
        CodeGenerator {
            arena,
            root,
            types: String::new(),
            globals: String::new(),
            externs: String::new(),
            signatures: String::new(),
            bodies: String::new(),
            init: String::new(),
            emitted: HashSet::new(),
        }
    }

    /// Lowers a source type reference to its C spelling.
    ///
    /// User types and classes win over the builtin table; array depth is
    /// applied to the innermost element type.
    pub fn c_type(&self, ty: &TypeRef, scope: ScopeId) -> String {
        let name = ty.innermost();
        let base = if let Some(user) = self.arena.lookup_type(scope, name) {
            self.arena.type_path(user)
        } else if let Some(class) = self.arena.lookup_class(scope, name) {
            self.arena
                .native_type(class)
                .unwrap_or_else(|| self.arena.class_path(class))
        } else if let Some(native) = types::builtin(name) {
            native.to_string()
        } else {
            name.to_string()
        };
        types::pointer_to(&base, ty.depth())
    }

    fn context(&mut self, ctx: &ExecutionContext) -> Result<(), CoreError> {
        self.definitions(ctx);
        for method in &ctx.methods {
            self.method(method)?;
        }
        for step in &ctx.steps {
            self.top_level(step)?;
        }
        Ok(())
    }

    fn definitions(&mut self, ctx: &ExecutionContext) {
        for object in &ctx.classes {
            self.object(object);
        }
        for definition in &ctx.types {
            self.type_definition(definition);
        }
    }

    fn object(&mut self, object: &ObjectDefinition) {
        if !self.emitted.insert(format!("struct {}", object.name)) {
            return;
        }
        if object.fields.is_empty() {
            // Methods only ever see the class through `self` pointers.
            self.types
                .push_str(&format!("typedef struct {0} {0};\n\n", object.name));
            return;
        }
        let mut out = format!("typedef struct {} {{\n", object.name);
        for (name, ty) in &object.fields {
            let field = declarator(&self.c_type(ty, object.scope), name);
            line(&mut out, 1, &format!("{field};"));
        }
        out.push_str(&format!("}} {};\n\n", object.name));
        self.types.push_str(&out);
    }

    fn type_definition(&mut self, definition: &TypeDefinition) {
        let mut out = String::new();
        match definition {
            TypeDefinition::Record {
                name,
                fields,
                callables,
                scope,
            } => {
                out.push_str("typedef struct {\n");
                for (field, ty) in fields {
                    let field = declarator(&self.c_type(ty, *scope), field);
                    line(&mut out, 1, &format!("{field};"));
                }
                for (callable, params, ret) in callables {
                    let ret = self.c_type(ret, *scope);
                    let params = self.parameters(params, *scope);
                    line(&mut out, 1, &format!("{ret} (*{callable})({params});"));
                }
                out.push_str(&format!("}} {name};\n\n"));
            }
            TypeDefinition::Enum { name, cases } => {
                out.push_str("typedef enum {\n");
                for case in cases {
                    line(&mut out, 1, &format!("{name}__{case},"));
                }
                out.push_str(&format!("}} {name};\n\n"));
            }
        }
        self.types.push_str(&out);
    }

    fn parameters(&self, params: &[Param], scope: ScopeId) -> String {
        if params.is_empty() {
            return "void".to_string();
        }
        params
            .iter()
            .map(|p| declarator(&self.c_type(&p.ty, scope), &p.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn signature(&self, signature: &Signature, scope: ScopeId) -> String {
        let ret = self.c_type(&signature.return_type, scope);
        let params = self.parameters(&signature.params, scope);
        format!("{}({params})", declarator(&ret, &signature.full_path))
    }

    fn method(&mut self, ctx: &ExecutionContext) -> Result<(), CoreError> {
        self.definitions(ctx);
        for nested in &ctx.methods {
            self.method(nested)?;
        }
        let Some(signature) = &ctx.signature else {
            return Ok(());
        };
        if !self.emitted.insert(signature.full_path.clone()) {
            return Ok(());
        }
        debug!("emitting body of {}", signature.full_path);

        let header = self.signature(signature, ctx.scope);
        let mut body = String::new();
        for step in &ctx.steps {
            self.step(&mut body, step, 1)?;
        }
        self.signatures.push_str(&format!("{header};\n"));
        self.bodies.push_str(&format!("{header} {{\n{body}}}\n\n"));
        Ok(())
    }

    /// Declarations become globals; every other step runs in the init
    /// function.
    fn top_level(&mut self, step: &Step) -> Result<(), CoreError> {
        let Step::Declare(declaration) = step else {
            let mut out = String::new();
            self.step(&mut out, step, 1)?;
            self.init.push_str(&out);
            return Ok(());
        };

        let head = self.declaration_head(declaration);
        self.externs.push_str(&format!("extern {head};\n"));
        match &declaration.value {
            Some(value) if !value.is_constant() && !matches!(value, Rvalue::Array(_)) => {
                self.globals.push_str(&format!("{head};\n"));
                let value = self.rvalue(value)?;
                line(&mut self.init, 1, &format!("{} = {value};", declaration.name));
            }
            Some(value) => {
                let value = self.rvalue(value)?;
                self.globals.push_str(&format!("{head} = {value};\n"));
            }
            None => self.globals.push_str(&format!("{head};\n")),
        }
        Ok(())
    }

    fn declaration_head(&self, declaration: &Declaration) -> String {
        match (&declaration.ty, &declaration.value) {
            (TypeRef::Array(inner), Some(Rvalue::Array(_))) => {
                let element = self.c_type(inner, declaration.scope);
                format!("{}[]", declarator(&element, &declaration.name))
            }
            (ty, _) => declarator(&self.c_type(ty, declaration.scope), &declaration.name),
        }
    }

    fn step(&self, out: &mut String, step: &Step, depth: usize) -> Result<(), CoreError> {
        match step {
            Step::Call(call) => line(out, depth, &format!("{};", self.call(call)?)),
            Step::Conditional(conditional) => {
                let opener = match (conditional.kind, &conditional.guard) {
                    (BranchKind::If, Some(guard)) => format!("if ({}) {{", self.rvalue(guard)?),
                    (BranchKind::ElseIf, Some(guard)) => {
                        format!("else if ({}) {{", self.rvalue(guard)?)
                    }
                    (BranchKind::Else, _) => "else {".to_string(),
                    _ => "{".to_string(),
                };
                line(out, depth, &opener);
                for step in &conditional.body {
                    self.step(out, step, depth + 1)?;
                }
                line(out, depth, "}");
            }
            Step::Declare(declaration) => {
                let head = self.declaration_head(declaration);
                match &declaration.value {
                    Some(value) => {
                        line(out, depth, &format!("{head} = {};", self.rvalue(value)?))
                    }
                    None => line(out, depth, &format!("{head};")),
                }
            }
            Step::Assign { target, value } => {
                line(out, depth, &format!("{target} = {};", self.rvalue(value)?));
            }
            Step::Return(Some(value)) => {
                line(out, depth, &format!("return {};", self.rvalue(value)?));
            }
            Step::Return(None) => line(out, depth, "return;"),
            Step::Loop(lp) => self.lowered_loop(out, lp, depth)?,
            Step::Native(code) => {
                for text in code.lines() {
                    line(out, depth, text);
                }
            }
        }
        Ok(())
    }

    fn lowered_loop(&self, out: &mut String, lp: &Loop, depth: usize) -> Result<(), CoreError> {
        let element = self.c_type(&lp.element_ty, lp.scope);
        line(out, depth, "{");
        let inner = depth + 1;
        line(out, inner, &format!("int {} = 0;", lp.counter));
        let array = match &lp.source {
            Rvalue::Array(_) => {
                let items = self.rvalue(&lp.source)?;
                let head = format!("{}[]", declarator(&element, &lp.array));
                line(out, inner, &format!("{head} = {items};"));
                lp.array.clone()
            }
            other => self.rvalue(other)?,
        };
        line(out, inner, &format!("{};", declarator(&element, &lp.binding)));
        line(
            out,
            inner,
            &format!(
                "while ({} < sizeof({array}) / sizeof({element})) {{",
                lp.counter
            ),
        );
        line(out, inner + 1, &format!("{} = {array}[{}];", lp.binding, lp.counter));
        for step in &lp.body {
            self.step(out, step, inner + 1)?;
        }
        line(out, inner + 1, &format!("{}++;", lp.counter));
        line(out, inner, "}");
        line(out, depth, "}");
        Ok(())
    }

    /// Orders arguments by declared parameter: a named argument first,
    /// then the next positional one, then the default. Positional
    /// arguments left over are appended for variadic foreign functions.
    pub fn call(&self, call: &MethodCall) -> Result<String, CoreError> {
        let mut unnamed = call.unnamed.iter();
        let mut args = Vec::with_capacity(call.params.len());
        for param in &call.params {
            let value = call
                .named
                .get(&param.name)
                .or_else(|| unnamed.next())
                .or_else(|| call.defaults.get(&param.name))
                .ok_or_else(|| CoreError::MissingArgument {
                    method: call.method.clone(),
                    parameter: param.name.clone(),
                })?;
            args.push(self.rvalue(value)?);
        }
        for extra in unnamed {
            args.push(self.rvalue(extra)?);
        }
        Ok(format!("{}({})", call.target, args.join(", ")))
    }

    pub fn rvalue(&self, value: &Rvalue) -> Result<String, CoreError> {
        Ok(match value {
            Rvalue::Bool(true) => "true".to_string(),
            Rvalue::Bool(false) => "false".to_string(),
            Rvalue::Number(text) => text.chars().filter(|c| *c != '_').collect(),
            Rvalue::Str(text) | Rvalue::Symbol(text) => text.clone(),
            Rvalue::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.rvalue(item))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{{{}}}", items.join(", "))
            }
            Rvalue::Object(entries) => {
                let entries = entries
                    .iter()
                    .map(|(key, value)| Ok(format!(".{key} = {}", self.rvalue(value)?)))
                    .collect::<Result<Vec<_>, CoreError>>()?;
                format!("{{{}}}", entries.join(", "))
            }
            Rvalue::Index { base, index } => {
                format!("{}[{}]", self.operand(base)?, self.rvalue(index)?)
            }
            Rvalue::AddressOf(path) => format!("&{path}"),
            Rvalue::Unary(op, operand) => {
                format!("{}{}", unary_symbol(*op), self.operand(operand)?)
            }
            Rvalue::Binary { op, lhs, rhs } => format!(
                "{} {} {}",
                self.operand(lhs)?,
                op.symbol(),
                self.operand(rhs)?
            ),
            Rvalue::Call(call) => self.call(call)?,
        })
    }

    /// Operand of another operator; compound expressions are parenthesized.
    fn operand(&self, value: &Rvalue) -> Result<String, CoreError> {
        let rendered = self.rvalue(value)?;
        Ok(match value {
            Rvalue::Binary { .. } | Rvalue::Unary(..) => format!("({rendered})"),
            _ => rendered,
        })
    }

    fn entry_wrapper(&self, main: &Method, init: Option<&str>) -> String {
        let path = self.arena.method_path(main);
        let params = self.parameters(&main.params, main.owner);
        let args = main
            .params
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let ret = self.c_type(&main.return_type, main.owner);

        let mut out = format!("int main({params}) {{\n");
        if let Some(init) = init {
            line(&mut out, 1, &format!("{init}();"));
        }
        if types::is_native_integer(&ret) {
            line(&mut out, 1, &format!("return {path}({args});"));
        } else {
            line(&mut out, 1, &format!("{path}({args});"));
            line(&mut out, 1, "return 0;");
        }
        out.push_str("}\n");
        out
    }

    fn finish(self, kind: OutputKind) -> CompilationArtifact {
        let preamble = &self.arena.get(self.root).native_preamble;
        let init_path = format!("{}__init", self.arena.full_path(self.root));
        let init = (!self.init.is_empty()).then_some(init_path.as_str());

        let mut source = String::from("#include <stdbool.h>\n");
        for section in [preamble, &self.types, &self.globals, &self.signatures, &self.bodies] {
            if !section.is_empty() {
                source.push('\n');
                source.push_str(section);
            }
        }
        if let Some(init) = init {
            source.push_str(&format!("\nvoid {init}(void) {{\n{}}}\n", self.init));
        }

        let mut header = None;
        match kind {
            OutputKind::Executable => {
                if let Some(main) = self.arena.get(self.root).methods.get(ENTRY_POINT) {
                    source.push('\n');
                    source.push_str(&self.entry_wrapper(main, init));
                }
            }
            OutputKind::Library => {
                let mut text = String::from("#pragma once\n#include <stdbool.h>\n");
                for section in [preamble, &self.types, &self.externs, &self.signatures] {
                    if !section.is_empty() {
                        text.push('\n');
                        text.push_str(section);
                    }
                }
                if let Some(init) = init {
                    text.push_str(&format!("void {init}(void);\n"));
                }
                header = Some(text);
            }
            OutputKind::Object => {}
        }

        CompilationArtifact { source, header }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_context;
    use crate::execution::BinaryOp;
    use crate::options::CompileOptions;
    use crate::populate::populate;
    use crate::session::Session;
    use crate::tokens::{
        self, Argument, ClassMember, EntryKind, EnumDecl, Field, FuncCall, Literal,
    };

    fn entry(kind: EntryKind) -> tokens::Entry {
        tokens::Entry::new(kind)
    }

    fn render(entries: Vec<tokens::Entry>, options: CompileOptions) -> CompilationArtifact {
        let mut session = Session::new(options);
        let root = session.arena.new_root("Main");
        populate(&mut session, &entries, root);
        let ctx = build_context(&mut session, &entries, root, true).expect("build");
        assert!(session.diagnostics.is_empty(), "{:?}", session.diagnostics);
        generate(&session.arena, root, &ctx, options.kind).expect("generate")
    }

    #[test]
    fn lowers_type_references() {
        let entries = vec![
            entry(EntryKind::Class(tokens::Class {
                visibility: None,
                name: "File".into(),
                extends: Vec::new(),
                members: vec![ClassMember::Field(Field::new(
                    "__ctype__",
                    TypeRef::named("string"),
                    Some(Literal::quoted("FILE")),
                ))],
            })),
            entry(EntryKind::Enum(EnumDecl {
                name: "Color".into(),
                cases: vec!["Red".into()],
            })),
        ];
        let mut session = Session::default();
        let root = session.arena.new_root("Main");
        populate(&mut session, &entries, root);
        let generator = CodeGenerator::new(&session.arena, root);

        let file_ptr = TypeRef::array_of(TypeRef::named("File"));
        assert_eq!(generator.c_type(&file_ptr, root), "FILE *");
        assert_eq!(generator.c_type(&TypeRef::named("Color"), root), "Main__Color");
        assert_eq!(generator.c_type(&TypeRef::named("string"), root), "char *");
        let argv = TypeRef::array_of(TypeRef::named("string"));
        assert_eq!(generator.c_type(&argv, root), "char **");
        let grid = TypeRef::array_of(TypeRef::array_of(TypeRef::named("int")));
        assert_eq!(generator.c_type(&grid, root), "int **");
        assert_eq!(generator.c_type(&TypeRef::named("size_t"), root), "size_t");
    }

    #[test]
    fn orders_call_arguments_by_parameter() {
        let mut arena = ScopeArena::new();
        let root = arena.new_root("Main");
        let generator = CodeGenerator::new(&arena, root);
        let params = vec![
            Param::new("a", TypeRef::named("int")),
            Param::new("b", TypeRef::named("int")),
            Param::new("c", TypeRef::named("int")).with_default(Literal::number(9)),
        ];
        let mut call = MethodCall::new("f", "Main__f", params);
        call.named.insert("b".into(), Rvalue::Number("2".into()));
        call.unnamed.push(Rvalue::Number("1".into()));
        call.defaults.insert("c".into(), Rvalue::Number("9".into()));
        assert_eq!(generator.call(&call).expect("render"), "Main__f(1, 2, 9)");

        call.defaults.clear();
        let err = generator.call(&call).expect_err("c has no value");
        assert!(matches!(
            err,
            CoreError::MissingArgument { ref parameter, .. } if parameter == "c"
        ));
    }

    #[test]
    fn appends_extra_arguments_for_variadic_calls() {
        let mut arena = ScopeArena::new();
        let root = arena.new_root("Main");
        let generator = CodeGenerator::new(&arena, root);
        let mut call = MethodCall::new(
            "printf",
            "printf",
            vec![Param::new("format", TypeRef::named("string"))],
        );
        call.unnamed.push(Rvalue::Str("\"%d\\n\"".into()));
        call.unnamed.push(Rvalue::Number("1_000".into()));
        assert_eq!(
            generator.call(&call).expect("render"),
            "printf(\"%d\\n\", 1000)"
        );
    }

    #[test]
    fn parenthesizes_nested_operators() {
        let mut arena = ScopeArena::new();
        let root = arena.new_root("Main");
        let generator = CodeGenerator::new(&arena, root);
        let value = Rvalue::Binary {
            op: BinaryOp::Mul,
            lhs: Box::new(Rvalue::Symbol("Main__x".into())),
            rhs: Box::new(Rvalue::Binary {
                op: BinaryOp::Sub,
                lhs: Box::new(Rvalue::Number("1".into())),
                rhs: Box::new(Rvalue::Unary(
                    UnaryOp::Negate,
                    Box::new(Rvalue::Symbol("y".into())),
                )),
            }),
        };
        assert_eq!(generator.rvalue(&value).expect("render"), "Main__x * (1 - (-y))");
    }

    #[test]
    fn renders_lowered_loop() {
        let mut arena = ScopeArena::new();
        let root = arena.new_root("Main");
        let generator = CodeGenerator::new(&arena, root);
        let lp = Loop {
            counter: "Main__counter0".into(),
            array: "Main__array0".into(),
            binding: "Main__n".into(),
            element_ty: TypeRef::named("int"),
            source: Rvalue::Array(vec![Rvalue::Number("1".into()), Rvalue::Number("2".into())]),
            body: vec![Step::Native("use(Main__n);".into())],
            scope: root,
        };
        let mut out = String::new();
        generator.step(&mut out, &Step::Loop(lp), 0).expect("render");
        assert_eq!(
            out,
            "{\n\
             \x20   int Main__counter0 = 0;\n\
             \x20   int Main__array0[] = {1, 2};\n\
             \x20   int Main__n;\n\
             \x20   while (Main__counter0 < sizeof(Main__array0) / sizeof(int)) {\n\
             \x20       Main__n = Main__array0[Main__counter0];\n\
             \x20       use(Main__n);\n\
             \x20       Main__counter0++;\n\
             \x20   }\n\
             }\n"
        );
    }

    fn helper_program() -> Vec<tokens::Entry> {
        let helper = tokens::Method::new(
            "helper",
            vec![Param::new("n", TypeRef::named("int"))],
            TypeRef::named("void"),
            Vec::new(),
        );
        let mut body: Vec<_> = (1..=3)
            .map(|n| {
                entry(EntryKind::Call(FuncCall::new(
                    "helper",
                    vec![Argument::positional(Literal::number(n))],
                )))
            })
            .collect();
        body.push(entry(EntryKind::Return(Some(Literal::number(0)))));
        vec![
            entry(EntryKind::Method(helper)),
            entry(EntryKind::Method(tokens::Method::new(
                "Main",
                Vec::new(),
                TypeRef::named("int"),
                body,
            ))),
        ]
    }

    #[test]
    fn emits_each_method_once_and_forwards_exit_status() {
        let artifact = render(helper_program(), CompileOptions::executable());
        let source = &artifact.source;
        assert_eq!(source.matches("void Main__helper(int n) {").count(), 1);
        assert_eq!(source.matches("void Main__helper(int n);").count(), 1);
        for n in 1..=3 {
            assert!(source.contains(&format!("    Main__helper({n});")));
        }
        assert!(source.starts_with("#include <stdbool.h>\n"));
        assert!(source.ends_with("int main(void) {\n    return Main__Main();\n}\n"));
        assert!(artifact.header.is_none());
    }

    #[test]
    fn void_main_exits_zero() {
        let entries = vec![entry(EntryKind::Method(tokens::Method::new(
            "Main",
            vec![
                Param::new("argc", TypeRef::named("int")),
                Param::new("argv", TypeRef::array_of(TypeRef::named("string"))),
            ],
            TypeRef::named("void"),
            Vec::new(),
        )))];
        let artifact = render(entries, CompileOptions::executable());
        assert!(artifact.source.contains(
            "int main(int argc, char **argv) {\n    Main__Main(argc, argv);\n    return 0;\n}\n"
        ));
    }

    #[test]
    fn library_emits_globals_init_and_header() {
        let sum = Literal::expression(tokens::Addition::chain(
            tokens::Primary::symbol("base"),
            tokens::AdditionOp::Add,
            tokens::Primary::number("6"),
        ));
        let entries = vec![
            entry(EntryKind::NativeCode("#include <stdio.h>".into())),
            entry(EntryKind::Field(Field::new(
                "base",
                TypeRef::named("int"),
                Some(Literal::number(1)),
            ))),
            entry(EntryKind::Field(Field::new("total", TypeRef::named("int"), Some(sum)))),
            entry(EntryKind::Field(Field::new(
                "primes",
                TypeRef::array_of(TypeRef::named("int")),
                Some(Literal::Array(vec![Literal::number(2), Literal::number(3)])),
            ))),
        ];
        let artifact = render(entries, CompileOptions::library());
        let source = &artifact.source;
        assert!(source.contains("#include <stdio.h>\n"));
        assert!(source.contains("int Main__base = 1;\n"));
        assert!(source.contains("int Main__total;\n"));
        assert!(source.contains("int Main__primes[] = {2, 3};\n"));
        assert!(source.contains("void Main__init(void) {\n    Main__total = Main__base + 6;\n}\n"));
        assert!(!source.contains("int main("));

        let header = artifact.header.expect("library header");
        assert!(header.starts_with("#pragma once\n"));
        assert!(header.contains("extern int Main__total;\n"));
        assert!(header.contains("extern int Main__primes[];\n"));
        assert!(header.contains("void Main__init(void);\n"));
        assert!(!header.contains("Main__base + 6"));
    }

    #[test]
    fn emits_class_layouts_and_enums() {
        let entries = vec![
            entry(EntryKind::Class(tokens::Class {
                visibility: None,
                name: "Counter".into(),
                extends: Vec::new(),
                members: vec![
                    ClassMember::Field(Field::new("count", TypeRef::named("int"), None)),
                    ClassMember::Method(tokens::Method::new(
                        "reset",
                        Vec::new(),
                        TypeRef::named("void"),
                        vec![entry(EntryKind::Assign(tokens::Assignment {
                            target: "self.count".into(),
                            value: Literal::number(0),
                        }))],
                    )),
                ],
            })),
            entry(EntryKind::Enum(EnumDecl {
                name: "Color".into(),
                cases: vec!["Red".into(), "Green".into()],
            })),
        ];
        let artifact = render(entries, CompileOptions {
            kind: OutputKind::Object,
            ..CompileOptions::default()
        });
        let source = &artifact.source;
        assert!(source.contains("typedef struct Main__Counter {\n    int count;\n} Main__Counter;\n"));
        assert!(source.contains("typedef enum {\n    Main__Color__Red,\n    Main__Color__Green,\n} Main__Color;\n"));
        assert!(source.contains(
            "void Main__Counter__reset(Main__Counter *self) {\n    self->count = 0;\n}\n"
        ));
        assert!(artifact.header.is_none());
    }

    #[test]
    fn classes_without_fields_still_declare_their_type() {
        let entries = vec![entry(EntryKind::Class(tokens::Class {
            visibility: None,
            name: "Greeter".into(),
            extends: Vec::new(),
            members: vec![ClassMember::Method(tokens::Method::new(
                "hello",
                Vec::new(),
                TypeRef::named("void"),
                Vec::new(),
            ))],
        }))];
        let artifact = render(entries, CompileOptions::library());
        let source = &artifact.source;
        let typedef = source
            .find("typedef struct Main__Greeter Main__Greeter;\n")
            .expect("forward typedef");
        let signature = source
            .find("void Main__Greeter__hello(Main__Greeter *self);\n")
            .expect("method signature");
        assert!(typedef < signature);

        let header = artifact.header.expect("library header");
        assert!(header.contains("typedef struct Main__Greeter Main__Greeter;\n"));
    }
}
