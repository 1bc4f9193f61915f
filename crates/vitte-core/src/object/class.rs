//! Classe et métaclasse (spec.md §3 "Class", §5 "Class construction protocol").

use crate::gc::ObjRef;
use crate::symbol::Symbol;
use crate::value::Value;

/// Nature d'une méthode installée dans une table de classe.
///
/// `Primitive` et `Foreign` ne portent que des identifiants opaques: le code
/// qui les exécute (accès au tas, à la pile du fiber courant) vit dans
/// `vitte-vm`, en aval de ce crate, pas ici.
#[derive(Debug, Clone)]
pub enum MethodKind {
    /// Méthode implémentée directement par le VM (arithmétique `Num`, etc.);
    /// l'entier identifie laquelle dans la table de dispatch de `vitte-vm`.
    Primitive(u16),
    /// Méthode hôte liée via `bind_foreign_method`; identifiant résolu par
    /// le `Host` de `vitte-vm`.
    Foreign(usize),
    /// Fermeture utilisateur (`def`/méthode de classe compilée).
    Block(ObjRef),
    /// Fermeture spécialisée pour l'appel de `Fn`/`Closure` (`call(...)`).
    FunctionCall(ObjRef),
    /// Slot explicitement vide — distingue "jamais défini" de "retiré".
    None,
}

#[derive(Debug, Clone)]
pub struct MethodSlot {
    pub kind: MethodKind,
}

impl Default for MethodSlot {
    fn default() -> Self {
        Self { kind: MethodKind::None }
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub superclass: Option<ObjRef>,
    pub metaclass: Option<ObjRef>,
    /// Table indexée par `Symbol`; creuse, trous = `MethodKind::None`.
    pub methods: Vec<MethodSlot>,
    pub num_fields: usize,
    pub is_foreign: bool,
    pub attributes: Value,
}

impl Class {
    pub fn new(name: impl Into<String>, num_fields: usize) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            metaclass: None,
            methods: Vec::new(),
            num_fields,
            is_foreign: false,
            attributes: Value::Null,
        }
    }

    pub fn method(&self, sym: Symbol) -> &MethodKind {
        self.methods.get(sym as usize).map(|s| &s.kind).unwrap_or(&MethodKind::None)
    }

    pub fn set_method(&mut self, sym: Symbol, kind: MethodKind) {
        let idx = sym as usize;
        if idx >= self.methods.len() {
            self.methods.resize_with(idx + 1, MethodSlot::default);
        }
        self.methods[idx].kind = kind;
    }

    /// Copie-vers-le-bas des méthodes héritées lors du rattachement à la
    /// super-classe (spec.md §5 "bindSuperclass"): chaque slot hérité non
    /// déjà occupé par une redéfinition locale est dupliqué ici.
    pub fn bind_superclass(&mut self, superclass: &Class, superclass_ref: ObjRef) {
        self.superclass = Some(superclass_ref);
        self.num_fields += superclass.num_fields;
        if self.methods.len() < superclass.methods.len() {
            self.methods.resize_with(superclass.methods.len(), MethodSlot::default);
        }
        for (i, slot) in superclass.methods.iter().enumerate() {
            if matches!(self.methods[i].kind, MethodKind::None) {
                self.methods[i] = slot.clone();
            }
        }
    }
}
