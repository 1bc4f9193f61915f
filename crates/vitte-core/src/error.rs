//! error.rs — Erreurs publiques de vitte-core.
//!
//! Les invariants internes (table de méthodes corrompue, opcode inconnu,
//! comptage GC incohérent) ne passent pas par ce type : ce sont des bugs de
//! VM, pas des erreurs récupérables par l'hôte, et ils paniquent via
//! `debug_assert!`/`unreachable!` au point de détection.

use thiserror::Error;

/// Erreurs de vitte-core (chunk, constantes, format binaire).
#[derive(Debug, Error)]
pub enum Error {
    /// I/O lors du (dé)chargement d'un module compilé.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Erreur de (dé)sérialisation bincode du format de module.
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),

    /// En-tête ou contenu de module invalide.
    #[error("module: {0}")]
    Module(String),

    /// Dépassement d'une limite statique (trop de constantes, de champs...).
    #[error("limite dépassée: {0}")]
    LimitExceeded(String),

    /// Erreur générique.
    #[error("{0}")]
    Msg(String),
}

/// Alias de résultat standard du crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
