//! dispatch.rs — Résolution et appel de méthode (spec.md §4.B "Method
//! dispatch").
//!
//! `class.methods[symbol]` est l'unique point de décision — jamais de
//! recherche par nom au moment de l'exécution (spec.md §4.B "Method
//! symbols"). Ce module traduit un [`MethodKind`] résolu en une action
//! concrète pour [`crate::interpreter`] : résultat immédiat (`Primitive`),
//! nouvelle frame à pousser (`Block`/`FunctionCall`), ou échec.

use vitte_core::gc::ObjRef;
use vitte_core::object::{Class, MethodKind, ObjData};
use vitte_core::symbol::{well_known, Symbol};
use vitte_core::value::Value;

use crate::vm::Vm;

/// Signatures d'opérateur précalculées une fois à l'initialisation du VM
/// (spec.md §4.B "Method symbols": jamais de formatage de `String` dans la
/// boucle chaude).
#[derive(Debug, Clone, Copy)]
pub struct OperatorSymbols {
    pub plus: Symbol,
    pub minus: Symbol,
    pub star: Symbol,
    pub slash: Symbol,
    pub lt: Symbol,
    pub lte: Symbol,
    pub eq: Symbol,
    pub not: Symbol,
    pub negate: Symbol,
    pub subscript_get: Symbol,
    pub subscript_set: Symbol,
    pub iterate: Symbol,
    pub iterator_value: Symbol,
    pub add: Symbol,
    pub allocate: Symbol,
    pub finalize: Symbol,
}

impl OperatorSymbols {
    pub fn install(symbols: &mut vitte_core::symbol::SymbolTable) -> Self {
        Self {
            plus: symbols.ensure(well_known::PLUS),
            minus: symbols.ensure(well_known::MINUS),
            star: symbols.ensure(well_known::STAR),
            slash: symbols.ensure(well_known::SLASH),
            lt: symbols.ensure(well_known::LT),
            lte: symbols.ensure(well_known::LTE),
            eq: symbols.ensure(well_known::EQ),
            not: symbols.ensure(well_known::NOT),
            negate: symbols.ensure(well_known::NEGATE),
            subscript_get: symbols.ensure(well_known::SUBSCRIPT_GET),
            subscript_set: symbols.ensure(well_known::SUBSCRIPT_SET),
            iterate: symbols.ensure(well_known::ITERATE),
            iterator_value: symbols.ensure(well_known::ITERATOR_VALUE),
            add: symbols.ensure(well_known::ADD),
            allocate: symbols.ensure(well_known::ALLOCATE),
            finalize: symbols.ensure(well_known::FINALIZE),
        }
    }
}

/// Issue d'une primitive VM-native (spec.md §4.B "PRIMITIVE ... returning a
/// bool"). Dans ce VM minimal, les primitives n'ont jamais besoin de pousser
/// une frame ni de changer de fiber — seules `Block`/`FunctionCall` le font
/// — donc l'issue se réduit à une valeur ou une erreur (voir DESIGN.md).
pub enum PrimitiveOutcome {
    Value(Value),
    Error(Value),
}

pub type PrimitiveFn = fn(&mut Vm, &[Value]) -> PrimitiveOutcome;

/// Décision de dispatch pour un symbole donné sur une classe.
pub enum Dispatch {
    Primitive(u16),
    Foreign(usize),
    Block(ObjRef),
    FunctionCall(ObjRef),
    NotFound,
}

pub(crate) fn resolve(class_data: &Class, symbol: Symbol) -> Dispatch {
    match class_data.method(symbol) {
        MethodKind::None => Dispatch::NotFound,
        MethodKind::Primitive(idx) => Dispatch::Primitive(*idx),
        MethodKind::Foreign(idx) => Dispatch::Foreign(*idx),
        MethodKind::Block(closure) => Dispatch::Block(*closure),
        MethodKind::FunctionCall(closure) => Dispatch::FunctionCall(*closure),
    }
}

impl Vm {
    pub(crate) fn class_of_value(&self, v: Value) -> ObjRef {
        vitte_core::value::get_class(&self.heap, &self.classes, v)
    }

    pub(crate) fn class_data(&self, class_ref: ObjRef) -> &Class {
        match self.heap.get(class_ref) {
            ObjData::Class(c) => c,
            other => panic!("expected Class, found {other:?}"),
        }
    }

    pub(crate) fn resolve_on(&self, class_ref: ObjRef, symbol: Symbol) -> Dispatch {
        resolve(self.class_data(class_ref), symbol)
    }
}
