//! error.rs — Erreurs publiques de vitte-vm (spec.md §7 "Error handling design").
//!
//! Trois familles, comme le spec les distingue :
//! - [`VmError`] couvre le `CompileError` (§7) renvoyé par le [`crate::module::Compiler`]
//!   externe et les erreurs de chargement de module (hôte absent, module
//!   introuvable) détectées *avant* qu'un fiber n'existe pour porter `error`.
//! - Le `RuntimeError` du spec n'est volontairement pas un variant ici : une
//!   fois un fiber démarré, toute erreur runtime est une `Value` assignée à
//!   `fiber.error` (spec.md §4.G), pas une exception Rust — c'est le sens de
//!   `InterpretResult` plus bas.
//! - Les invariants internes (table de méthodes corrompue, opcode invalide,
//!   comptabilité GC incohérente) ne sont pas représentés du tout : ils
//!   paniquent via `debug_assert!`/`unreachable!` au point de détection
//!   (spec.md §7 "Fatal / internal"), exactement comme les `ASSERT` du C.

use thiserror::Error;

/// Erreurs de `vitte-vm` qui empêchent même de démarrer une interprétation.
#[derive(Debug, Error)]
pub enum VmError {
    /// Le compilateur externe (§6) a rejeté la source.
    #[error("compile error in module '{module}': {message}")]
    Compile { module: String, message: String },

    /// `resolveModule`/`loadModule` n'a produit aucune source et aucun
    /// module optionnel intégré ne porte ce nom (spec.md §4.H étape 3).
    #[error("could not load module '{0}'")]
    ModuleNotFound(String),

    /// Une fonction hôte requise par le protocole (`bind_foreign_method`,
    /// `bind_foreign_class`) n'a pas été fournie alors qu'une classe du
    /// script en a besoin (spec.md §4.B "Foreign classes").
    #[error("no foreign binding for '{0}' in module '{1}'")]
    MissingForeignBinding(String, String),

    /// Réentrance interdite : `Vm::call` exige `numFrames == 0` à l'entrée
    /// (spec.md §4.I "Slot API").
    #[error("cannot call a handle while the interpreter is already running")]
    Reentrant,
}

/// Issue d'une interprétation de haut niveau, calquée sur `WrenInterpretResult`
/// (spec.md §7 "user-visible failure").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Success,
    CompileError,
    RuntimeError,
}

pub type VmResult<T> = Result<T, VmError>;
