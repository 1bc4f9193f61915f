//! fiber.rs — Pile de valeurs, pile d'appels et upvalues d'un fiber
//! (spec.md §4.E "Fiber and call stack").
//!
//! **Choix de lowering (spec.md §9, design note "Manual memory + cycles"
//! étendue à la pile d'un fiber) :** le C historique adresse la pile par
//! pointeur brut (`Value *stackStart`, `Value *value` pour une upvalue) et
//! doit donc, à chaque croissance de `fiber->stack`, réécrire tous les
//! pointeurs qui y référaient — `wrenEnsureStack` est le code le plus
//! fragile du runtime d'origine (spec.md §8 le cite explicitement). En Rust,
//! `stack_base` et l'upvalue `stack_index` sont des **indices** dans
//! `Fiber::stack : Vec<Value>`, pas des pointeurs : faire grossir le `Vec`
//! (même avec réallocation de son buffer) ne change aucun index. Le risque
//! de relocation du C est donc éliminé *structurellement* plutôt que corrigé
//! par une procédure de réécriture ; on conserve malgré tout la politique de
//! croissance géométrique (plafond puissance de deux) que spec.md réclame,
//! et le test §8 "stack relocation preserves semantics" devient un test
//! d'indices stables across growth plutôt que de pointeurs.

use vitte_core::gc::ObjRef;
use vitte_core::object::{CallFrame, Fiber, FiberState, ObjData, Upvalue};
use vitte_core::value::Value;

use crate::vm::Vm;

/// Registre relatif à une frame — alias local pour lisibilité.
pub type Reg = u16;

impl Vm {
    pub(crate) fn fiber_mut(&mut self, fiber: ObjRef) -> &mut Fiber {
        match self.heap.get_mut(fiber) {
            ObjData::Fiber(f) => f,
            other => panic!("expected Fiber, found {other:?}"),
        }
    }

    pub(crate) fn fiber(&self, fiber: ObjRef) -> &Fiber {
        match self.heap.get(fiber) {
            ObjData::Fiber(f) => f,
            other => panic!("expected Fiber, found {other:?}"),
        }
    }

    /// Crée un fiber neuf avec une frame unique pour `closure`, prêt à être
    /// lancé par [`crate::interpreter`] (spec.md §4.E "Fiber").
    pub(crate) fn new_fiber(&mut self, closure: ObjRef) -> ObjRef {
        let mut fiber = Fiber::new(self.config.initial_stack_size);
        fiber.stack.push(Value::Obj(closure));
        fiber.frames.push(CallFrame { closure, ip: 0, stack_base: 0, return_reg: None });
        self.allocate(Some(self.classes.fiber), ObjData::Fiber(fiber))
    }

    /// Assure que `fiber.stack` a au moins `needed` slots valides,
    /// croissance géométrique (plafond puissance de deux), remplis de
    /// `Value::Null` (spec.md §4.E "a contiguous stack... grown
    /// geometrically").
    pub(crate) fn ensure_stack(&mut self, fiber: ObjRef, needed: usize) {
        let f = self.fiber_mut(fiber);
        if f.stack.len() >= needed {
            return;
        }
        let new_cap = needed.next_power_of_two().max(8);
        f.stack.resize(new_cap, Value::Null);
    }

    /// `captureUpvalue` (spec.md §4.E): réutilise une upvalue ouverte
    /// existante pour ce slot, ou en insère une nouvelle triée par
    /// `stack_index` décroissant.
    pub(crate) fn capture_upvalue(&mut self, fiber: ObjRef, stack_index: usize) -> ObjRef {
        let open: Vec<ObjRef> = self.fiber(fiber).open_upvalues.clone();
        let mut positions: Vec<usize> = Vec::with_capacity(open.len());
        for &uv in &open {
            let idx = match self.heap.get(uv) {
                ObjData::Upvalue(Upvalue::Open { stack_index, .. }) => *stack_index,
                other => panic!("open_upvalues entry is not an open Upvalue: {other:?}"),
            };
            if idx == stack_index {
                return uv;
            }
            positions.push(idx);
        }
        let uv_ref = self.allocate(None, ObjData::Upvalue(Upvalue::open(fiber, stack_index)));
        let pos = positions.partition_point(|&existing| existing > stack_index);
        self.fiber_mut(fiber).open_upvalues.insert(pos, uv_ref);
        self.pop_temp_root();
        uv_ref
    }

    /// `closeUpvalues` (spec.md §4.E): referme toute upvalue ouverte à partir
    /// de `from_index` (inclus), en copiant la valeur vive de la pile dans
    /// l'upvalue avant de la retirer de la liste ouverte du fiber.
    pub(crate) fn close_upvalues_from(&mut self, fiber: ObjRef, from_index: usize) {
        loop {
            let head = self.fiber(fiber).open_upvalues.first().copied();
            let Some(uv_ref) = head else { break };
            let idx = match self.heap.get(uv_ref) {
                ObjData::Upvalue(Upvalue::Open { stack_index, .. }) => *stack_index,
                _ => break,
            };
            if idx < from_index {
                break;
            }
            let value = self.fiber(fiber).stack[idx];
            match self.heap.get_mut(uv_ref) {
                ObjData::Upvalue(u) => *u = Upvalue::Closed(value),
                _ => unreachable!(),
            }
            self.fiber_mut(fiber).open_upvalues.remove(0);
        }
    }

    pub(crate) fn upvalue_get(&self, uv: ObjRef) -> Value {
        match self.heap.get(uv) {
            ObjData::Upvalue(Upvalue::Closed(v)) => *v,
            ObjData::Upvalue(Upvalue::Open { fiber, stack_index }) => self.fiber(*fiber).stack[*stack_index],
            other => panic!("expected Upvalue, found {other:?}"),
        }
    }

    pub(crate) fn upvalue_set(&mut self, uv: ObjRef, value: Value) {
        let (target_fiber, idx) = match self.heap.get(uv) {
            ObjData::Upvalue(Upvalue::Closed(_)) => {
                if let ObjData::Upvalue(u) = self.heap.get_mut(uv) {
                    *u = Upvalue::Closed(value);
                }
                return;
            }
            ObjData::Upvalue(Upvalue::Open { fiber, stack_index }) => (*fiber, *stack_index),
            other => panic!("expected Upvalue, found {other:?}"),
        };
        self.fiber_mut(target_fiber).stack[idx] = value;
    }

    /// Transition d'état utilisée par les mécaniques `try`/`call`/`transfer`
    /// du collaborateur bibliothèque (spec.md §5, §9 §10.G): la machinerie
    /// est complète, les méthodes `Fiber.*` elles-mêmes ne le sont pas.
    pub fn set_fiber_state(&mut self, fiber: ObjRef, state: FiberState) {
        self.fiber_mut(fiber).state = state;
    }

    pub fn link_caller(&mut self, fiber: ObjRef, caller: Option<ObjRef>) {
        self.fiber_mut(fiber).caller = caller;
    }
}
