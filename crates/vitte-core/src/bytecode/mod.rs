//! Bytecode core for Vitte: instructions registre, format de module compilé.

pub mod instr;
pub mod chunk;

pub use chunk::{ChunkLoadError, CompiledFn, CompiledModule, ConstPool, ConstValue};
pub use instr::{Instr, Kidx, Reg, Sym};
