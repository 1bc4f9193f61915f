//! module.rs — Module loader pipeline (spec.md §4.H "importModule").
//!
//! The compiler itself is an external collaborator (spec.md §1 "Out of
//! scope"); this module only owns the five-step pipeline around it:
//! resolve → check cache → load source → compile → wrap as a runnable
//! closure. [`Compiler`] is the Rust shape of the consumed contract from
//! spec.md §6 (`compile(vm, module, source, isExpression, printErrors) ->
//! Fn | null`), minus `isExpression`/`printErrors` (both are compiler-REPL
//! concerns outside this core) and minus `markCompiler`/`isLocalName`
//! (there is no partial, GC-visible compiler state to mark here: our
//! `compile` call is synchronous and returns a fully-built `Fn` or an
//! error, never a live struct the GC needs to trace mid-compilation).

use vitte_core::gc::ObjRef;
use vitte_core::object::{Module, ObjData};
use vitte_core::value::Value;

use crate::error::{VmError, VmResult};
use crate::vm::Vm;

/// A compile-time failure from the external compiler (spec.md §7
/// "CompileError").
#[derive(Debug, Clone)]
pub struct CompileError {
    pub module: String,
    pub line: u32,
    pub message: String,
}

/// The compiler contract the module loader depends on but does not
/// implement (spec.md §6). `vitte-compiler` provides the one real
/// implementation used by this workspace's tests, built around a bytecode
/// assembler rather than a source-language front end.
pub trait Compiler {
    /// Compiles `source` as the top-level body of `module_name`, returning a
    /// heap-allocated, non-closure `Fn` (its `module` field is set by the
    /// caller once the module object exists, see [`Vm::import_module`]).
    fn compile(&mut self, vm: &mut Vm, module_name: &str, source: &str) -> Result<ObjRef, CompileError>;
}

/// Outcome of [`Vm::import_module`]: either the module was already loaded
/// (nothing to run), or a fresh closure must be pushed as a new call frame
/// to execute its body (spec.md §4.H step 5).
pub enum ImportOutcome {
    AlreadyLoaded(ObjRef),
    Run(ObjRef),
}

impl Vm {
    /// Compiles `source` as a fresh module's top-level body without running
    /// it. Exposed standalone (rather than only through [`Vm::interpret`])
    /// for tooling that wants the compiled `Fn` without executing it, e.g.
    /// a disassembler.
    pub fn compile(&mut self, module_name: &str, source: &str) -> VmResult<ObjRef> {
        self.load_and_compile(module_name, source)
    }

    /// `importModule(name)` (spec.md §4.H). `importer` is the name of the
    /// module the import statement lexically appears in (the compiler
    /// stamps this from the current top frame's function's module).
    pub fn import_module(&mut self, importer: &str, name: &str) -> Result<ImportOutcome, VmError> {
        let resolved = self.host.resolve_module(importer, name);
        if let Some(&existing) = self.modules.get(&resolved) {
            return Ok(ImportOutcome::AlreadyLoaded(existing));
        }

        let source = self
            .host
            .load_module(&resolved)
            .or_else(|| self.load_builtin_module(&resolved))
            .ok_or_else(|| VmError::ModuleNotFound(resolved.clone()))?;

        let closure_ref = self.load_and_compile(&resolved, &source)?;
        Ok(ImportOutcome::Run(closure_ref))
    }

    /// Shared tail of [`Vm::import_module`] and [`Vm::interpret`]: build a
    /// fresh module pre-populated with the core module's variables, compile
    /// `source` as its body, and wrap the resulting `Fn` in a non-closure
    /// `Closure` ready to run as a new fiber or call frame.
    pub(crate) fn load_and_compile(&mut self, name: &str, source: &str) -> Result<ObjRef, VmError> {
        // A fresh module implicitly imports every core-module variable by
        // value copy at creation (spec.md §4.H).
        let mut module = Module::new(name);
        for (var_name, value) in self.core_module_variables() {
            module.declare_variable(&var_name, value);
        }
        let module_ref = self.allocate(None, ObjData::Module(module));
        self.pop_temp_root();
        // Registered before compiling so a cyclic import sees a module
        // object (without its variables populated yet) rather than
        // recursing forever.
        self.modules.insert(name.to_string(), module_ref);

        let mut compiler = self.compiler.take().ok_or_else(|| VmError::MissingForeignBinding("<compiler>".into(), name.to_string()))?;
        let compile_result = compiler.compile(self, name, source);
        self.compiler = Some(compiler);
        let fn_ref = compile_result.map_err(|e| VmError::Compile { module: e.module, message: e.message })?;
        if let ObjData::Fn(f) = self.heap.get_mut(fn_ref) {
            f.module = Some(module_ref);
        }
        let closure_ref = self.allocate(None, ObjData::Closure(vitte_core::object::Closure::new(fn_ref, Vec::new())));
        self.pop_temp_root();
        Ok(closure_ref)
    }

    /// `IMPORTVAR Bx A` (spec.md §4.H): looks up `name` in `lastModule`'s
    /// variable table.
    pub(crate) fn import_variable(&self, module_ref: ObjRef, name: &str) -> Option<Value> {
        match self.heap.get(module_ref) {
            ObjData::Module(m) => m.find_variable(name).map(|idx| m.variables[idx]),
            _ => None,
        }
    }

    /// Public counterpart of [`Vm::import_variable`], for embedders (and
    /// tests) that want a top-level variable's value without going through
    /// an `IMPORTVAR` bytecode instruction.
    pub fn module_variable(&self, module_ref: ObjRef, name: &str) -> Option<Value> {
        self.import_variable(module_ref, name)
    }

    fn core_module_variables(&self) -> Vec<(String, Value)> {
        match self.heap.get(self.core_module) {
            ObjData::Module(m) => m.variable_names.iter().cloned().zip(m.variables.iter().copied()).collect(),
            _ => Vec::new(),
        }
    }

    /// Optional modules built into the VM itself (spec.md §4.H step 3
    /// "fall back to built-in optional modules by name"). Empty in this
    /// core: `random`/`meta` are explicitly out of scope (spec.md §1).
    fn load_builtin_module(&self, _name: &str) -> Option<String> {
        None
    }
}
