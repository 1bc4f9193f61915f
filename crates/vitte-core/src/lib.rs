//! vitte-core — cœur d'exécution de la VM Vitte
//!
//! Porte la représentation de valeur, le modèle objet, les collections
//! (`List`/`Map`/`Range`), l'encodage des instructions registre et le
//! ramasse-miettes tri-color mark-sweep. Ne dépend ni du compilateur ni de
//! l'ordonnanceur de fibers/boucle d'interprétation (`vitte-vm`).
//!
//! ## Modules
//! - `error`   : [`Error`]/[`Result`] du crate (`thiserror`).
//! - `symbol`  : table de symboles signature ⇄ entier par VM.
//! - `value`   : [`Value`] taguée + égalité/hash/`getClass`.
//! - `object`  : les onze natures d'objet tas (String, List, Map, Range,
//!   Class, Instance, Foreign, Fn, Closure, Upvalue, Fiber, Module).
//! - `gc`      : [`gc::Heap`] à arène indexée + collecte mark-sweep.
//! - `handle`  : références stables tenues par l'hôte à travers les GC.
//! - `bytecode`: format d'instruction registre ([`bytecode::instr`]).
//!
//! ## Features
//! - **std** *(par défaut)*.
//! - **serde** : dérive `Serialize`/`Deserialize` pour les types de chunk.
//! - **tracing** : instrumentation des cycles GC et du chargement de module.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

pub mod error;
pub mod symbol;
pub mod value;
pub mod object;
pub mod gc;
pub mod handle;
pub mod bytecode;

pub use error::{Error, Result};
pub use gc::{Heap, HeapPolicy, ObjRef};
pub use handle::{HandleId, HandleList};
pub use symbol::{Symbol, SymbolTable};
pub use value::{CoreClasses, Value};

/// Version du crate (lisible, via Cargo).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Renvoie une jolie bannière de version (utile pour logs/outils).
pub fn version() -> String {
    format!("vitte-core {VERSION}")
}

pub mod prelude {
    pub use crate::{
        bytecode::instr::{Instr, Kidx, Reg, Sym},
        error::{Error, Result},
        gc::{Heap, HeapPolicy, ObjRef},
        handle::{HandleId, HandleList},
        object::*,
        symbol::{well_known, Symbol, SymbolTable},
        value::{equals, get_class, hash, CoreClasses, Value},
        version,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_contains_crate_name() {
        assert!(version().starts_with("vitte-core"));
    }
}
