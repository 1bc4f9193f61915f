//! instr.rs — Instructions du jeu registre (spec.md §4.F).
//!
//! Le spec décrit l'encodage bas niveau en formats `ABC` (trois registres),
//! `ABx`/`AsBx` (un registre + une constante non/signée), `vABC` (appel à
//! arité variable) et `sJx` (saut signé seul). On les retrouve ici comme la
//! forme des champs de chaque variante plutôt que comme un mot 32 bits
//! empaqueté à la main : l'interpréteur ne fait jamais de décodage de bits,
//! et la forme persistée d'un chunk compilé passe par `bincode` (voir
//! `bytecode::chunk`), pas par un format binaire ad hoc.

use serde::{Deserialize, Serialize};

pub type Reg = u16;
/// Index dans le pool de constantes d'une fonction.
pub type Kidx = u32;
/// Symbole de méthode résolu à la compilation (voir [`crate::symbol`]).
pub type Sym = u32;

/// Instruction registre, une variante par opcode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    Noop,
    /// Format `ABx` : `a <- constants[bx]`.
    LoadK { a: Reg, bx: Kidx },
    LoadNull { a: Reg },
    LoadBool { a: Reg, value: bool },
    /// Format `ABC` : `a <- b`.
    Move { a: Reg, b: Reg },
    GetUpval { a: Reg, upvalue: u8 },
    SetUpval { upvalue: u8, b: Reg },
    /// `a <- module.variables[bx]`.
    GetGlobal { a: Reg, bx: Kidx },
    SetGlobal { bx: Kidx, b: Reg },
    /// `a <- b.fields[field]`.
    GetField { a: Reg, b: Reg, field: u16 },
    SetField { a: Reg, field: u16, b: Reg },
    /// Format `vABC` : appel par symbole. `a` = base de la fenêtre de
    /// registres (receveur puis arguments), `argc` inclut le receveur,
    /// `dest` est le registre de retour dans la frame appelante.
    CallK { a: Reg, argc: u16, symbol: Sym, dest: Reg },
    CallSuperK { a: Reg, argc: u16, symbol: Sym, dest: Reg },
    /// Saut conditionnel : si `a` est faux (`false`/`null`), saute de `offset`.
    Test { a: Reg, offset: i32 },
    /// Format `sJx` : saut inconditionnel.
    Jump { offset: i32 },
    /// Retourne la valeur du registre `a`, referme les upvalues de la frame
    /// courante avant de dépiler (spec.md §4.E).
    Return { a: Reg },
    /// Referme toutes les upvalues ouvertes à partir du registre `from`.
    Close { from: Reg },
    /// Matérialise une fermeture depuis le prototype `bx`, capturant les
    /// upvalues décrites par `FnProto::upvalues` dans `a`.
    Closure { a: Reg, bx: Kidx },
    /// Alloue une instance de la classe au registre `a` (receveur de
    /// `construct`), champs initialisés à `null`.
    Construct { a: Reg },
    /// Démarre la construction d'une classe : `a` reçoit le nouvel objet
    /// classe ; `name` est l'index de constante du nom ; `superclass`
    /// pointe vers le registre contenant la super-classe (`None` = `Object`).
    Class { a: Reg, name: Kidx, num_fields: u16, superclass: Option<Reg> },
    EndClass { a: Reg },
    /// Installe la méthode `symbol` (fermeture au registre `b`) sur la
    /// classe au registre `a` ; `is_static` cible la métaclasse.
    Method { a: Reg, symbol: Sym, b: Reg, is_static: bool },
    ImportModule { a: Reg, name: Kidx },
    ImportVar { a: Reg, module: Reg, name: Kidx },
    Eq { a: Reg, b: Reg, c: Reg },
    Lt { a: Reg, b: Reg, c: Reg },
    Lte { a: Reg, b: Reg, c: Reg },
    EqK { a: Reg, b: Reg, bx: Kidx },
    LtK { a: Reg, b: Reg, bx: Kidx },
    LteK { a: Reg, b: Reg, bx: Kidx },
    Add { a: Reg, b: Reg, c: Reg },
    Sub { a: Reg, b: Reg, c: Reg },
    Mul { a: Reg, b: Reg, c: Reg },
    Div { a: Reg, b: Reg, c: Reg },
    AddK { a: Reg, b: Reg, bx: Kidx },
    SubK { a: Reg, b: Reg, bx: Kidx },
    MulK { a: Reg, b: Reg, bx: Kidx },
    DivK { a: Reg, b: Reg, bx: Kidx },
    Neg { a: Reg, b: Reg },
    Not { a: Reg, b: Reg },
    /// `iter <- seq.iterate(iter)` protocole d'itération (spec.md §4.G).
    Iterate { seq: Reg, iter: Reg },
    IteratorValue { a: Reg, seq: Reg, iter: Reg },
    GetSub { a: Reg, b: Reg, c: Reg },
    SetSub { a: Reg, b: Reg, c: Reg },
    /// Ajoute `b` à la liste littérale en construction au registre `a`
    /// (utilisé pour désucrer les littéraux `[1, 2, 3]`).
    AddElem { a: Reg, b: Reg },
    AddElemK { a: Reg, bx: Kidx },
    Range { a: Reg, b: Reg, c: Reg, inclusive: bool },
}

impl Instr {
    pub fn name(&self) -> &'static str {
        match self {
            Instr::Noop => "NOOP",
            Instr::LoadK { .. } => "LOADK",
            Instr::LoadNull { .. } => "LOADNULL",
            Instr::LoadBool { .. } => "LOADBOOL",
            Instr::Move { .. } => "MOVE",
            Instr::GetUpval { .. } => "GETUPVAL",
            Instr::SetUpval { .. } => "SETUPVAL",
            Instr::GetGlobal { .. } => "GETGLOBAL",
            Instr::SetGlobal { .. } => "SETGLOBAL",
            Instr::GetField { .. } => "GETFIELD",
            Instr::SetField { .. } => "SETFIELD",
            Instr::CallK { .. } => "CALLK",
            Instr::CallSuperK { .. } => "CALLSUPERK",
            Instr::Test { .. } => "TEST",
            Instr::Jump { .. } => "JUMP",
            Instr::Return { .. } => "RETURN",
            Instr::Close { .. } => "CLOSE",
            Instr::Closure { .. } => "CLOSURE",
            Instr::Construct { .. } => "CONSTRUCT",
            Instr::Class { .. } => "CLASS",
            Instr::EndClass { .. } => "ENDCLASS",
            Instr::Method { .. } => "METHOD",
            Instr::ImportModule { .. } => "IMPORTMODULE",
            Instr::ImportVar { .. } => "IMPORTVAR",
            Instr::Eq { .. } => "EQ",
            Instr::Lt { .. } => "LT",
            Instr::Lte { .. } => "LTE",
            Instr::EqK { .. } => "EQK",
            Instr::LtK { .. } => "LTK",
            Instr::LteK { .. } => "LTEK",
            Instr::Add { .. } => "ADD",
            Instr::Sub { .. } => "SUB",
            Instr::Mul { .. } => "MUL",
            Instr::Div { .. } => "DIV",
            Instr::AddK { .. } => "ADDK",
            Instr::SubK { .. } => "SUBK",
            Instr::MulK { .. } => "MULK",
            Instr::DivK { .. } => "DIVK",
            Instr::Neg { .. } => "NEG",
            Instr::Not { .. } => "NOT",
            Instr::Iterate { .. } => "ITERATE",
            Instr::IteratorValue { .. } => "ITERATORVALUE",
            Instr::GetSub { .. } => "GETSUB",
            Instr::SetSub { .. } => "SETSUB",
            Instr::AddElem { .. } => "ADDELEM",
            Instr::AddElemK { .. } => "ADDELEMK",
            Instr::Range { .. } => "RANGE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_matches_mnemonic() {
        assert_eq!(Instr::Add { a: 0, b: 1, c: 2 }.name(), "ADD");
        assert_eq!(Instr::Jump { offset: -3 }.name(), "JUMP");
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(Instr::LoadK { a: 1, bx: 2 }, Instr::LoadK { a: 1, bx: 2 });
        assert_ne!(Instr::LoadK { a: 1, bx: 2 }, Instr::LoadK { a: 1, bx: 3 });
    }
}
