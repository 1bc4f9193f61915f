//! Objet étranger : classe + charge utile opaque hôte (spec.md §3 "Foreign").
//!
//! Le finaliseur lui-même est une fonction hôte résolue par `bind_foreign_class`
//! côté `vitte-vm` (ce crate ne connaît pas le `Host`); on se contente ici de
//! retenir si la classe en a déclaré un, pour que le balayage du GC sache
//! qu'il doit appeler le hook avant de libérer le slot.

use crate::gc::ObjRef;

#[derive(Debug)]
pub struct Foreign {
    pub class: ObjRef,
    pub data: Box<dyn std::any::Any>,
    pub has_finalizer: bool,
}

impl Foreign {
    pub fn new(class: ObjRef, data: Box<dyn std::any::Any>, has_finalizer: bool) -> Self {
        Self { class, data, has_finalizer }
    }
}
