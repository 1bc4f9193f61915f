//! vitte-compiler — implémentation de référence de [`vitte_vm::module::Compiler`]
//! (spec.md §6 "compile"), bâtie autour d'un format d'assemblage texte plutôt
//! qu'un front-end de langage source (hors scope, spec.md §1 "Non-goals").
//!
//! Le format ressemble à l'assembleur du teacher (`asm.rs` dans
//! `vitte-core`) mais cible directement le jeu d'instructions registre de ce
//! VM (voir [`vitte_core::bytecode::instr::Instr`]) plutôt qu'un IR
//! intermédiaire à opcodes empaquetés. Trois étapes, dans l'ordre naturel
//! d'un pipeline de compilation:
//!
//! 1. [`lexer::lex`] — texte -> tokens.
//! 2. [`parser::parse`] — tokens -> [`ast::AsmModule`].
//! 3. [`assemble::assemble`] — `AsmModule` -> objets de tas via `&mut Vm`.

mod ast;
mod assemble;
mod lexer;
mod parser;

pub use ast::{AsmModule, FnBlock, Item, Operand, RawInstr};

use vitte_core::gc::ObjRef;
use vitte_vm::module::{CompileError, Compiler};
use vitte_vm::vm::Vm;

/// Compilateur "assembleur" fourni par ce crate: aucun état interne, chaque
/// appel à [`Compiler::compile`] relexe/reparse/réassemble sa source depuis
/// zéro (pas de cache — ce n'est pas un REPL).
#[derive(Debug, Default)]
pub struct AssemblingCompiler;

impl AssemblingCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for AssemblingCompiler {
    fn compile(&mut self, vm: &mut Vm, module_name: &str, source: &str) -> Result<ObjRef, CompileError> {
        let toks = lexer::lex(source).map_err(|e| CompileError {
            module: module_name.to_string(),
            line: e.line,
            message: e.message,
        })?;
        let unit = parser::parse(&toks).map_err(|e| CompileError {
            module: module_name.to_string(),
            line: e.line,
            message: e.message,
        })?;
        assemble::assemble(vm, module_name, &unit).map_err(|e| CompileError {
            module: module_name.to_string(),
            line: e.line,
            message: e.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_vm::config::{DefaultHost, VmConfig};
    use vitte_vm::error::InterpretResult;

    fn new_vm() -> Vm {
        Vm::new(VmConfig::default(), Box::new(DefaultHost)).with_compiler(Box::new(AssemblingCompiler::new()))
    }

    #[test]
    fn compiles_and_runs_trivial_return() {
        let mut vm = new_vm();
        let src = ".fn main(0)\n    LOADNULL r0\n    RETURN r0\n.endfn\n";
        assert!(matches!(vm.interpret("test_mod", src), InterpretResult::Success));
    }

    #[test]
    fn rejects_unknown_mnemonic() {
        let mut vm = new_vm();
        let src = ".fn main(0)\n    BOGUS r0\n.endfn\n";
        assert!(matches!(vm.interpret("test_mod", src), InterpretResult::CompileError));
    }

    #[test]
    fn resolves_forward_closure_reference() {
        let mut vm = new_vm();
        let src = concat!(
            ".fn main(0) slots=1\n",
            "    CLOSURE r0, helper\n",
            "    RETURN r0\n",
            ".endfn\n",
            ".fn helper(0)\n",
            "    LOADNULL r0\n",
            "    RETURN r0\n",
            ".endfn\n",
        );
        assert!(matches!(vm.interpret("test_mod", src), InterpretResult::Success));
    }
}
