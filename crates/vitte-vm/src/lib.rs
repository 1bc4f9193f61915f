//! vitte-vm — fiber scheduling, register interpreter, module loader and
//! embedding slot API for the Vitte VM (spec.md §4.E–§4.I).
//!
//! `vitte-core` owns the data ([`vitte_core::value::Value`], the object
//! model, the GC arena, the bytecode encoding); this crate owns execution.
//! A [`Vm`] couples those pieces with a [`config::Host`] supplied by the
//! embedder and runs one [`vitte_core::object::Fiber`] at a time to
//! completion, suspension or error (spec.md §5 "single-threaded
//! cooperative").

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(unused_must_use)]

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fiber;
pub mod interpreter;
pub mod module;
pub mod vm;

pub use config::{ErrorKind, ForeignClassMethods, ForeignMethodFn, Host, VmConfig};
pub use error::{InterpretResult, VmError, VmResult};
pub use module::{CompileError, Compiler};
pub use vm::Vm;

pub use vitte_core::gc::ObjRef;
pub use vitte_core::handle::HandleId;
pub use vitte_core::value::Value;
