//! Fiber : pile de valeurs + pile d'appels, coroutine de première classe
//! (spec.md §3 "Fiber", §4.E "Fiber scheduling & call stack").

use crate::gc::ObjRef;
use crate::value::Value;

pub type Reg = u16;

/// État d'un fiber, au sens où `transfer`/`transferError`/`try` le dirigent
/// (spec.md §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Racine de l'exécution, pas de `caller`.
    Root,
    /// Repris par un autre fiber via `transfer`/`call`.
    Other,
    /// Repris via `try` : une erreur non rattrapée doit être renvoyée comme
    /// valeur de retour de `try` plutôt que de se propager plus loin.
    Try,
}

/// Une frame d'appel active dans un fiber.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub closure: ObjRef,
    /// Index de la prochaine instruction à exécuter dans `closure.function.code`.
    pub ip: usize,
    /// Premier registre de cette frame dans `Fiber::stack`.
    pub stack_base: usize,
    /// Registre de la frame *appelante* où écrire la valeur de retour, ou
    /// `None` quand l'appel initial vient de l'hôte (convention
    /// `wrenCallFunction` : `returnReg = -1`).
    pub return_reg: Option<Reg>,
}

#[derive(Debug, Clone)]
pub struct Fiber {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// Upvalues encore ouvertes, triées par `stack_index` décroissant pour
    /// que `close_upvalues_from` puisse s'arrêter au premier index trop bas.
    pub open_upvalues: Vec<ObjRef>,
    pub caller: Option<ObjRef>,
    pub state: FiberState,
    /// Erreur non rattrapée portée par ce fiber (Null si aucune).
    pub error: Value,
    /// Limite haute de la fenêtre de slots exposée à l'hôte par l'API
    /// d'embarquement (spec.md §4.I), `None` hors d'un appel C/FFI.
    pub api_stack_top: Option<usize>,
    /// Registre cible dans le fiber appelant pour un `RETURN` inter-fiber,
    /// miroir de `return_reg` mais tenu au niveau du fiber pour survivre à
    /// un `transfer` qui vide la pile de frames.
    pub last_call_reg: Option<Reg>,
}

impl Fiber {
    pub fn new(initial_stack_capacity: usize) -> Self {
        Self {
            stack: Vec::with_capacity(initial_stack_capacity),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            caller: None,
            state: FiberState::Root,
            error: Value::Null,
            api_stack_top: None,
            last_call_reg: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn has_error(&self) -> bool {
        !matches!(self.error, Value::Null)
    }

    /// Insère une upvalue fraîchement ouverte en conservant le tri par
    /// `stack_index` décroissant (spec.md §4.E).
    pub fn insert_open_upvalue_sorted(&mut self, uv: ObjRef, stack_index: usize, index_of: impl Fn(ObjRef) -> usize) {
        let pos = self.open_upvalues.partition_point(|&existing| index_of(existing) > stack_index);
        self.open_upvalues.insert(pos, uv);
    }
}
