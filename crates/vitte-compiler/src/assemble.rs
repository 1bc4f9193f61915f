//! assemble.rs — [`AsmModule`] -> objets de tas (spec.md §4.F "Instruction
//! set", §6 "compile").
//!
//! Deux passes par bloc `.fn`, dans l'esprit du teacher's `assemble_unit`
//! (labels puis encodage), plus une passe *inter-blocs* que le teacher n'a
//! pas: un `CLOSURE a, autreFn` peut viser un bloc `.fn` déclaré plus bas
//! dans le fichier, donc toutes les `FnProto` sont d'abord allouées avec un
//! `Value::Null` en guise de charge utile `CLOSURE`, puis une seconde passe
//! réécrit ces constantes une fois que chaque nom de bloc a un [`ObjRef`].
//!
//! Limite assumée (voir DESIGN.md): les `FnProto` produites ici n'ont jamais
//! d'upvalues déclarées — cet assembleur sert à fabriquer des fixtures de
//! test pour le jeu d'instructions, pas un vrai compilateur avec analyse de
//! portée ; `GETUPVAL`/`SETUPVAL` s'assemblent mais aucune `CLOSURE` produite
//! ici ne capture quoi que ce soit.

use std::collections::HashMap;

use vitte_core::bytecode::instr::{Instr, Kidx, Reg};
use vitte_core::gc::ObjRef;
use vitte_core::object::{FnProto, ObjData};
use vitte_core::value::Value;
use vitte_vm::vm::Vm;

use crate::ast::{AsmModule, FnBlock, Item, Operand, RawInstr};

pub struct AsmError {
    pub line: u32,
    pub message: String,
}

type AResult<T> = Result<T, AsmError>;

fn err(line: u32, message: impl Into<String>) -> AsmError {
    AsmError { line, message: message.into() }
}

/// Résultat de l'assemblage: la référence de la fonction de haut niveau
/// (`.fn main`) que le module loader attend en retour de `compile`.
pub fn assemble(vm: &mut Vm, module_name: &str, unit: &AsmModule) -> AResult<ObjRef> {
    let module_ref = vm
        .module_by_name(module_name)
        .unwrap_or_else(|| panic!("assemble: module '{module_name}' not registered yet"));

    if !unit.fns.iter().any(|f| f.name == "main") {
        return Err(err(0, "missing `.fn main(0) ... .endfn` entry block"));
    }

    let mut by_name: HashMap<String, ObjRef> = HashMap::new();
    // (fn_ref qui porte le CLOSURE, index de constante à réécrire, nom visé)
    let mut pending_closures: Vec<(ObjRef, Kidx, String)> = Vec::new();

    for block in &unit.fns {
        let (proto, closures) = build_fn(vm, module_ref, block)?;
        let fn_ref = vm.alloc_fn(proto);
        by_name.insert(block.name.clone(), fn_ref);
        for (kidx, target) in closures {
            pending_closures.push((fn_ref, kidx, target));
        }
    }

    for (owner, kidx, target) in pending_closures {
        let Some(&target_ref) = by_name.get(&target) else {
            return Err(err(0, format!("CLOSURE references unknown fn `{target}`")));
        };
        if let ObjData::Fn(f) = vm.heap_mut().get_mut(owner) {
            f.constants[kidx as usize] = Value::Obj(target_ref);
        }
    }

    Ok(by_name["main"])
}

/// Assemble un bloc en `FnProto` et renvoie, à part, la liste des `CLOSURE`
/// à corriger une fois tous les blocs nommés connus.
fn build_fn(vm: &mut Vm, module_ref: ObjRef, block: &FnBlock) -> AResult<(FnProto, Vec<(Kidx, String)>)> {
    let mut labels: HashMap<&str, usize> = HashMap::new();
    let mut pc = 0usize;
    for item in &block.items {
        match item {
            Item::Label(name) => {
                labels.insert(name.as_str(), pc);
            }
            Item::Instr(_) => pc += 1,
        }
    }

    let mut proto = FnProto::new(block.name.clone(), block.arity);
    proto.max_slots = block.max_slots;
    proto.module = Some(module_ref);

    let mut closures = Vec::new();
    let mut index = 0usize;
    for item in &block.items {
        let Item::Instr(raw) = item else { continue };
        let instr = build_instr(vm, module_ref, &mut proto, &labels, index, raw, &mut closures)?;
        proto.code.push(instr);
        proto.lines.push(raw.line);
        index += 1;
    }

    Ok((proto, closures))
}

fn push_const(proto: &mut FnProto, v: Value) -> Kidx {
    proto.constants.push(v);
    (proto.constants.len() - 1) as Kidx
}

fn literal_value(vm: &mut Vm, op: &Operand, line: u32) -> AResult<Value> {
    Ok(match op {
        Operand::Int(i) => Value::Num(*i as f64),
        Operand::Float(f) => Value::Num(*f),
        Operand::Str(s) => Value::Obj(vm.alloc_string(s)),
        Operand::Ident(s) if s == "true" => Value::Bool(true),
        Operand::Ident(s) if s == "false" => Value::Bool(false),
        Operand::Ident(s) if s == "null" => Value::Null,
        other => return Err(err(line, format!("expected a literal constant, found {other:?}"))),
    })
}

fn reg(op: &Operand, line: u32) -> AResult<Reg> {
    match op {
        Operand::Reg(r) => Ok(*r),
        other => Err(err(line, format!("expected a register, found {other:?}"))),
    }
}

fn int(op: &Operand, line: u32) -> AResult<i64> {
    match op {
        Operand::Int(i) => Ok(*i),
        other => Err(err(line, format!("expected an integer, found {other:?}"))),
    }
}

fn string(op: &Operand, line: u32) -> AResult<&str> {
    match op {
        Operand::Str(s) => Ok(s.as_str()),
        other => Err(err(line, format!("expected a string, found {other:?}"))),
    }
}

fn ident(op: &Operand, line: u32) -> AResult<&str> {
    match op {
        Operand::Ident(s) => Ok(s.as_str()),
        other => Err(err(line, format!("expected a bare identifier, found {other:?}"))),
    }
}

fn label_offset(labels: &HashMap<&str, usize>, target: &str, from_index: usize, line: u32) -> AResult<i32> {
    let &pc = labels.get(target).ok_or_else(|| err(line, format!("undefined label `{target}`")))?;
    // Les sauts sont relatifs à l'instruction suivant celle qui saute
    // (`Vm::step` avance `ip` avant d'exécuter, spec.md §4.F).
    Ok(pc as i32 - (from_index as i32 + 1))
}

#[allow(clippy::too_many_arguments)]
fn build_instr(
    vm: &mut Vm,
    module_ref: ObjRef,
    proto: &mut FnProto,
    labels: &HashMap<&str, usize>,
    index: usize,
    raw: &RawInstr,
    closures: &mut Vec<(Kidx, String)>,
) -> AResult<Instr> {
    let line = raw.line;
    let ops = &raw.operands;
    let need = |n: usize| -> AResult<()> {
        if ops.len() != n {
            Err(err(line, format!("{} expects {n} operand(s), found {}", raw.mnemonic, ops.len())))
        } else {
            Ok(())
        }
    };

    Ok(match raw.mnemonic.as_str() {
        "NOOP" => {
            need(0)?;
            Instr::Noop
        }
        "LOADK" => {
            need(2)?;
            let a = reg(&ops[0], line)?;
            let v = literal_value(vm, &ops[1], line)?;
            Instr::LoadK { a, bx: push_const(proto, v) }
        }
        "LOADNULL" => {
            need(1)?;
            Instr::LoadNull { a: reg(&ops[0], line)? }
        }
        "LOADBOOL" => {
            need(2)?;
            let a = reg(&ops[0], line)?;
            let value = match ident(&ops[1], line)? {
                "true" => true,
                "false" => false,
                other => return Err(err(line, format!("LOADBOOL expects true/false, found `{other}`"))),
            };
            Instr::LoadBool { a, value }
        }
        "MOVE" => {
            need(2)?;
            Instr::Move { a: reg(&ops[0], line)?, b: reg(&ops[1], line)? }
        }
        "GETUPVAL" => {
            need(2)?;
            Instr::GetUpval { a: reg(&ops[0], line)?, upvalue: int(&ops[1], line)? as u8 }
        }
        "SETUPVAL" => {
            need(2)?;
            Instr::SetUpval { upvalue: int(&ops[0], line)? as u8, b: reg(&ops[1], line)? }
        }
        "GETGLOBAL" => {
            need(2)?;
            let a = reg(&ops[0], line)?;
            let name = string(&ops[1], line)?;
            let bx = declare_global(vm, module_ref, name) as Kidx;
            Instr::GetGlobal { a, bx }
        }
        "SETGLOBAL" => {
            need(2)?;
            let name = string(&ops[0], line)?;
            let bx = declare_global(vm, module_ref, name) as Kidx;
            Instr::SetGlobal { bx, b: reg(&ops[1], line)? }
        }
        "GETFIELD" => {
            need(3)?;
            Instr::GetField { a: reg(&ops[0], line)?, b: reg(&ops[1], line)?, field: int(&ops[2], line)? as u16 }
        }
        "SETFIELD" => {
            need(3)?;
            Instr::SetField { a: reg(&ops[0], line)?, field: int(&ops[1], line)? as u16, b: reg(&ops[2], line)? }
        }
        "CALLK" => {
            need(4)?;
            let a = reg(&ops[0], line)?;
            let argc = int(&ops[1], line)? as u16;
            let symbol = vm.symbols_mut().ensure(string(&ops[2], line)?);
            let dest = reg(&ops[3], line)?;
            Instr::CallK { a, argc, symbol, dest }
        }
        "CALLSUPERK" => {
            need(4)?;
            let a = reg(&ops[0], line)?;
            let argc = int(&ops[1], line)? as u16;
            let symbol = vm.symbols_mut().ensure(string(&ops[2], line)?);
            let dest = reg(&ops[3], line)?;
            Instr::CallSuperK { a, argc, symbol, dest }
        }
        "TEST" => {
            need(2)?;
            let a = reg(&ops[0], line)?;
            let target = match &ops[1] {
                Operand::LabelRef(l) => l.as_str(),
                other => return Err(err(line, format!("TEST expects @label, found {other:?}"))),
            };
            Instr::Test { a, offset: label_offset(labels, target, index, line)? }
        }
        "JUMP" => {
            need(1)?;
            let target = match &ops[0] {
                Operand::LabelRef(l) => l.as_str(),
                other => return Err(err(line, format!("JUMP expects @label, found {other:?}"))),
            };
            Instr::Jump { offset: label_offset(labels, target, index, line)? }
        }
        "RETURN" => {
            need(1)?;
            Instr::Return { a: reg(&ops[0], line)? }
        }
        "CLOSE" => {
            need(1)?;
            Instr::Close { from: reg(&ops[0], line)? }
        }
        "CLOSURE" => {
            need(2)?;
            let a = reg(&ops[0], line)?;
            let target = ident(&ops[1], line)?.to_string();
            let bx = push_const(proto, Value::Null);
            closures.push((bx, target));
            Instr::Closure { a, bx }
        }
        "CONSTRUCT" => {
            need(1)?;
            Instr::Construct { a: reg(&ops[0], line)? }
        }
        "CLASS" => {
            if ops.len() != 3 && ops.len() != 4 {
                return Err(err(line, format!("CLASS expects 3 or 4 operands, found {}", ops.len())));
            }
            let a = reg(&ops[0], line)?;
            let name_val = Value::Obj(vm.alloc_string(string(&ops[1], line)?));
            let name = push_const(proto, name_val);
            let num_fields = int(&ops[2], line)? as u16;
            let superclass = match ops.get(3) {
                Some(op) => Some(reg(op, line)?),
                None => None,
            };
            Instr::Class { a, name, num_fields, superclass }
        }
        "ENDCLASS" => {
            need(1)?;
            Instr::EndClass { a: reg(&ops[0], line)? }
        }
        "METHOD" => {
            if ops.len() != 3 && ops.len() != 4 {
                return Err(err(line, format!("METHOD expects 3 or 4 operands, found {}", ops.len())));
            }
            let a = reg(&ops[0], line)?;
            let symbol = vm.symbols_mut().ensure(string(&ops[1], line)?);
            let b = reg(&ops[2], line)?;
            let is_static = match ops.get(3) {
                Some(op) => ident(op, line)? == "static",
                None => false,
            };
            Instr::Method { a, symbol, b, is_static }
        }
        "IMPORTMODULE" => {
            need(2)?;
            let a = reg(&ops[0], line)?;
            let name_val = Value::Obj(vm.alloc_string(string(&ops[1], line)?));
            Instr::ImportModule { a, name: push_const(proto, name_val) }
        }
        "IMPORTVAR" => {
            need(3)?;
            let a = reg(&ops[0], line)?;
            let module = reg(&ops[1], line)?;
            let name_val = Value::Obj(vm.alloc_string(string(&ops[2], line)?));
            Instr::ImportVar { a, module, name: push_const(proto, name_val) }
        }
        "EQ" => {
            need(3)?;
            Instr::Eq { a: reg(&ops[0], line)?, b: reg(&ops[1], line)?, c: reg(&ops[2], line)? }
        }
        "LT" => {
            need(3)?;
            Instr::Lt { a: reg(&ops[0], line)?, b: reg(&ops[1], line)?, c: reg(&ops[2], line)? }
        }
        "LTE" => {
            need(3)?;
            Instr::Lte { a: reg(&ops[0], line)?, b: reg(&ops[1], line)?, c: reg(&ops[2], line)? }
        }
        "EQK" => {
            need(3)?;
            let a = reg(&ops[0], line)?;
            let b = reg(&ops[1], line)?;
            let v = literal_value(vm, &ops[2], line)?;
            Instr::EqK { a, b, bx: push_const(proto, v) }
        }
        "LTK" => {
            need(3)?;
            let a = reg(&ops[0], line)?;
            let b = reg(&ops[1], line)?;
            let v = literal_value(vm, &ops[2], line)?;
            Instr::LtK { a, b, bx: push_const(proto, v) }
        }
        "LTEK" => {
            need(3)?;
            let a = reg(&ops[0], line)?;
            let b = reg(&ops[1], line)?;
            let v = literal_value(vm, &ops[2], line)?;
            Instr::LteK { a, b, bx: push_const(proto, v) }
        }
        "ADD" => {
            need(3)?;
            Instr::Add { a: reg(&ops[0], line)?, b: reg(&ops[1], line)?, c: reg(&ops[2], line)? }
        }
        "SUB" => {
            need(3)?;
            Instr::Sub { a: reg(&ops[0], line)?, b: reg(&ops[1], line)?, c: reg(&ops[2], line)? }
        }
        "MUL" => {
            need(3)?;
            Instr::Mul { a: reg(&ops[0], line)?, b: reg(&ops[1], line)?, c: reg(&ops[2], line)? }
        }
        "DIV" => {
            need(3)?;
            Instr::Div { a: reg(&ops[0], line)?, b: reg(&ops[1], line)?, c: reg(&ops[2], line)? }
        }
        "ADDK" => {
            need(3)?;
            let a = reg(&ops[0], line)?;
            let b = reg(&ops[1], line)?;
            let v = literal_value(vm, &ops[2], line)?;
            Instr::AddK { a, b, bx: push_const(proto, v) }
        }
        "SUBK" => {
            need(3)?;
            let a = reg(&ops[0], line)?;
            let b = reg(&ops[1], line)?;
            let v = literal_value(vm, &ops[2], line)?;
            Instr::SubK { a, b, bx: push_const(proto, v) }
        }
        "MULK" => {
            need(3)?;
            let a = reg(&ops[0], line)?;
            let b = reg(&ops[1], line)?;
            let v = literal_value(vm, &ops[2], line)?;
            Instr::MulK { a, b, bx: push_const(proto, v) }
        }
        "DIVK" => {
            need(3)?;
            let a = reg(&ops[0], line)?;
            let b = reg(&ops[1], line)?;
            let v = literal_value(vm, &ops[2], line)?;
            Instr::DivK { a, b, bx: push_const(proto, v) }
        }
        "NEG" => {
            need(2)?;
            Instr::Neg { a: reg(&ops[0], line)?, b: reg(&ops[1], line)? }
        }
        "NOT" => {
            need(2)?;
            Instr::Not { a: reg(&ops[0], line)?, b: reg(&ops[1], line)? }
        }
        "ITERATE" => {
            need(2)?;
            Instr::Iterate { seq: reg(&ops[0], line)?, iter: reg(&ops[1], line)? }
        }
        "ITERATORVALUE" => {
            need(3)?;
            Instr::IteratorValue { a: reg(&ops[0], line)?, seq: reg(&ops[1], line)?, iter: reg(&ops[2], line)? }
        }
        "GETSUB" => {
            need(3)?;
            Instr::GetSub { a: reg(&ops[0], line)?, b: reg(&ops[1], line)?, c: reg(&ops[2], line)? }
        }
        "SETSUB" => {
            need(3)?;
            Instr::SetSub { a: reg(&ops[0], line)?, b: reg(&ops[1], line)?, c: reg(&ops[2], line)? }
        }
        "ADDELEM" => {
            need(2)?;
            Instr::AddElem { a: reg(&ops[0], line)?, b: reg(&ops[1], line)? }
        }
        "ADDELEMK" => {
            need(2)?;
            let a = reg(&ops[0], line)?;
            let v = literal_value(vm, &ops[1], line)?;
            Instr::AddElemK { a, bx: push_const(proto, v) }
        }
        "RANGE" => {
            if ops.len() != 3 && ops.len() != 4 {
                return Err(err(line, format!("RANGE expects 3 or 4 operands, found {}", ops.len())));
            }
            let a = reg(&ops[0], line)?;
            let b = reg(&ops[1], line)?;
            let c = reg(&ops[2], line)?;
            let inclusive = match ops.get(3) {
                Some(op) => ident(op, line)? == "inclusive",
                None => false,
            };
            Instr::Range { a, b, c, inclusive }
        }
        other => return Err(err(line, format!("unknown mnemonic `{other}`"))),
    })
}

fn declare_global(vm: &mut Vm, module_ref: ObjRef, name: &str) -> usize {
    match vm.heap_mut().get_mut(module_ref) {
        ObjData::Module(m) => m.declare_variable(name, Value::Null),
        other => panic!("expected Module, found {other:?}"),
    }
}
