//! Fonction compilée, fermeture et upvalue (spec.md §3 "Fn"/"Closure"/"Upvalue").

use crate::bytecode::instr::Instr;
use crate::gc::ObjRef;
use crate::value::Value;

/// Descripteur d'upvalue figé au moment de la compilation : indique si la
/// fermeture doit capturer un local de la frame appelante ou relayer une
/// upvalue déjà ouverte par la fonction englobante (spec.md §4.E "Upvalues").
#[derive(Debug, Clone, Copy)]
pub struct ProtoUpvalue {
    pub is_local: bool,
    pub index: u8,
}

#[derive(Debug, Clone)]
pub struct FnProto {
    pub module: Option<ObjRef>,
    pub constants: Vec<Value>,
    pub code: Vec<Instr>,
    /// Numéro de ligne source par instruction, même longueur que `code`.
    pub lines: Vec<u32>,
    pub arity: u8,
    pub max_slots: u8,
    pub upvalues: Vec<ProtoUpvalue>,
    pub debug_name: String,
}

impl FnProto {
    pub fn new(debug_name: impl Into<String>, arity: u8) -> Self {
        Self {
            module: None,
            constants: Vec::new(),
            code: Vec::new(),
            lines: Vec::new(),
            arity,
            max_slots: arity,
            upvalues: Vec::new(),
            debug_name: debug_name.into(),
        }
    }

    pub fn num_upvalues(&self) -> usize {
        self.upvalues.len()
    }
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

impl Closure {
    pub fn new(function: ObjRef, upvalues: Vec<ObjRef>) -> Self {
        Self { function, upvalues }
    }
}

/// Emplacement capturé par une fermeture : tant que le fiber propriétaire
/// est vivant et que la frame n'est pas retournée, l'upvalue reste "open"
/// et pointe vers un index de pile du fiber ; `closeUpvalues` la fige en
/// `Closed` en copiant la valeur courante (spec.md §4.E).
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    Open { fiber: ObjRef, stack_index: usize },
    Closed(Value),
}

impl Upvalue {
    pub fn open(fiber: ObjRef, stack_index: usize) -> Self {
        Upvalue::Open { fiber, stack_index }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }

    /// Valeur à tracer directement par le GC : seule la variante `Closed`
    /// possède une `Value` qui lui appartient en propre ; une upvalue
    /// `Open` est tracée à travers la pile de son fiber.
    pub fn get_closed_for_trace(&self) -> Value {
        match self {
            Upvalue::Closed(v) => *v,
            Upvalue::Open { .. } => Value::Null,
        }
    }
}
