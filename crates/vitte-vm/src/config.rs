//! config.rs — Configuration hôte (spec.md §6 "Host configuration object").
//!
//! Le C historique passe une `WrenConfiguration` par valeur à `wrenNewVM`.
//! Ici l'équivalent est un [`VmConfig`] de données simples plus un objet
//! [`Host`] pour les callbacks, suivant le même split que le teacher's
//! `pub trait Host` dans `vitte-vm/src/lib.rs` — généralisé de ses deux
//! méthodes (`print`, `now`) à l'ensemble que le spec réclame.

use std::any::Any;

use vitte_core::gc::HeapPolicy;
use vitte_core::value::Value;

/// Catégorie d'un message d'erreur hôte (spec.md §6 "error(kind, ...)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Compile,
    Runtime,
    StackTrace,
}

/// Callbacks fournis par l'embarqueur. Toutes les méthodes ont une
/// implémentation par défaut sans effet, pour que l'hôte n'ait à fournir
/// que ce dont il a besoin — à l'image des champs optionnels de
/// `WrenConfiguration`.
pub trait Host {
    /// `resolveModule(importer, name)` — permet de renommer un import
    /// relatif. Par défaut, identité.
    fn resolve_module(&mut self, importer: &str, name: &str) -> String {
        let _ = importer;
        name.to_string()
    }

    /// `loadModule(name)` — source du module, ou `None` si l'hôte ne le
    /// connaît pas (le VM retombe alors sur les modules optionnels intégrés
    /// puis échoue avec [`crate::error::VmError::ModuleNotFound`]).
    fn load_module(&mut self, name: &str) -> Option<String> {
        let _ = name;
        None
    }

    /// `bindForeignMethod(module, class, isStatic, signature) -> fn`.
    fn bind_foreign_method(
        &mut self,
        module: &str,
        class: &str,
        is_static: bool,
        signature: &str,
    ) -> Option<ForeignMethodFn> {
        let _ = (module, class, is_static, signature);
        None
    }

    /// `bindForeignClass(module, class) -> {allocate, finalize}`.
    fn bind_foreign_class(&mut self, module: &str, class: &str) -> Option<ForeignClassMethods> {
        let _ = (module, class);
        None
    }

    /// `write(text)` — stdout du script (`System.print` et consorts, portés
    /// par le collaborateur bibliothèque, mais le canal lui appartient ici).
    fn write(&mut self, text: &str) {
        print!("{text}");
    }

    /// `error(kind, module, line, msg)`.
    fn error(&mut self, kind: ErrorKind, module: Option<&str>, line: u32, msg: &str) {
        let _ = (kind, module, line, msg);
    }
}

/// Signature d'une méthode étrangère. Elle lit/écrit la fenêtre de slots
/// courante via [`crate::vm::Vm::slot_get`]/[`crate::vm::Vm::slot_set`]
/// plutôt que de recevoir un [`crate::api::Slots`] séparé — emprunter `&mut
/// Vm` deux fois (une pour la fonction, une pour un wrapper `Slots<'_>`
/// construit à côté) n'est pas exprimable sans aliasing ; [`crate::api::Slots`]
/// reste l'API publique pour l'hôte qui appelle *dans* la VM (un seul
/// emprunteur à la fois), ce chemin-ci appelle *depuis* la VM.
pub type ForeignMethodFn = fn(&mut crate::vm::Vm);

/// Paire `{allocate, finalize}` d'une classe étrangère (spec.md §4.B).
#[derive(Clone, Copy)]
pub struct ForeignClassMethods {
    pub allocate: fn(&mut crate::vm::Vm) -> Box<dyn Any>,
    pub finalize: Option<fn(&mut dyn Any)>,
}

/// Hôte par défaut : `stdout`, pas de modules/classes étrangères.
#[derive(Default)]
pub struct DefaultHost;
impl Host for DefaultHost {}

/// Configuration numérique du VM (spec.md §6 + §4.D "Policy").
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    pub initial_heap_size: usize,
    pub min_heap_size: usize,
    pub heap_growth_percent: usize,
    /// Taille initiale de la pile de valeurs d'un fiber neuf.
    pub initial_stack_size: usize,
    /// Nombre maximal de racines temporaires empilables (spec.md §4.D "Roots").
    pub temp_root_cap: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            initial_heap_size: 1 << 20,
            min_heap_size: 1 << 20,
            heap_growth_percent: 50,
            initial_stack_size: 128,
            temp_root_cap: 8,
        }
    }
}

impl VmConfig {
    pub(crate) fn heap_policy(&self) -> HeapPolicy {
        HeapPolicy { min_heap_size: self.min_heap_size, heap_growth_percent: self.heap_growth_percent }
    }
}

/// Valeur rendue au slot 0 d'un appel étranger pour signaler un abandon du
/// fiber courant (spec.md §7 "Foreign methods signal errors by calling
/// abortFiber").
#[derive(Debug, Clone, Copy)]
pub struct Abort(pub Value);
