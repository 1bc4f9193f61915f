//! interpreter.rs — la boucle de dispatch registre (spec.md §4.G "Interpreter
//! loop").
//!
//! `step` décode une [`Instr`] de la frame courante et l'exécute ; `execute`
//! porte le gros `match` un opcode à la fois. Les opérateurs arithmétiques et
//! de comparaison (`ADD`, `EQ`, `GETSUB`...) ne sont *pas* des cas spéciaux :
//! ils passent tous par [`Vm::send`], le même chemin que `CALLK` — exactement
//! comme le C historique définit `+(_)` etc. comme des `PRIMITIVE` liées sur
//! `Num`/`String`/`List`/`Map`/`Range` plutôt que de coder l'arithmétique en
//! dur dans l'interpréteur. Un type utilisateur qui redéfinit `+(_)` déplace
//! simplement ce slot de méthode d'un `Primitive` vers un `Block` ; aucune
//! branche de l'interpréteur ne le sait ni ne s'en soucie.

use vitte_core::bytecode::instr::{Instr, Kidx};
use vitte_core::gc::ObjRef;
use vitte_core::object::string::utf8_decode_num_bytes;
use vitte_core::object::{Class, Closure, FiberState, Foreign, Instance, MethodKind, ObjData, VList, VRange, VString};
use vitte_core::symbol::{well_known, Symbol};
use vitte_core::value::{self, Value};

use crate::config::ErrorKind;
use crate::dispatch::{Dispatch, OperatorSymbols, PrimitiveFn, PrimitiveOutcome};
use crate::error::InterpretResult;
use crate::fiber::Reg;
use crate::module::ImportOutcome;
use crate::vm::Vm;

/// Ce que fait un pas d'interprétation une fois l'instruction exécutée :
/// soit la boucle continue (même fiber ou un autre, après un transfert), soit
/// l'interprétation de haut niveau est terminée.
enum Flow {
    Continue,
    Halt(InterpretResult),
}

// ---------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------

impl Vm {
    /// `wrenInterpret(vm, module, source)` (spec.md §6) : compile `source`
    /// comme corps top-level d'un module frais et l'exécute jusqu'à
    /// complétion ou erreur.
    pub fn interpret(&mut self, module_name: &str, source: &str) -> InterpretResult {
        let closure_ref = match self.load_and_compile(module_name, source) {
            Ok(c) => c,
            Err(e) => {
                self.host.error(ErrorKind::Compile, Some(module_name), 0, &e.to_string());
                return InterpretResult::CompileError;
            }
        };
        let fiber_ref = self.new_fiber(closure_ref);
        self.pop_temp_root();
        self.fiber_mut(fiber_ref).state = FiberState::Root;
        self.run_fiber(fiber_ref)
    }

    /// Boucle d'interprétation principale : exécute `fiber` (et tout fiber
    /// vers lequel il `transfer`/`call`e) jusqu'à ce que la pile de frames se
    /// vide sans caller, ou qu'une erreur non rattrapée remonte jusqu'à la
    /// racine (spec.md §4.G, §4.E).
    pub(crate) fn run_fiber(&mut self, fiber: ObjRef) -> InterpretResult {
        self.interpreting = true;
        self.fiber = Some(fiber);
        loop {
            let Some(current) = self.fiber else {
                self.interpreting = false;
                return InterpretResult::Success;
            };
            if self.fiber(current).frames.is_empty() {
                self.interpreting = false;
                self.fiber = None;
                return InterpretResult::Success;
            }
            match self.step(current) {
                Flow::Continue => continue,
                Flow::Halt(result) => {
                    self.interpreting = false;
                    return result;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------
// Fetch / decode / dispatch
// ---------------------------------------------------------------------

impl Vm {
    fn step(&mut self, fiber_ref: ObjRef) -> Flow {
        let (closure_ref, stack_base, ip) = {
            let frame = self.fiber(fiber_ref).frames.last().expect("step called on a fiber with no active frame");
            (frame.closure, frame.stack_base, frame.ip)
        };
        let fn_ref = match self.heap.get(closure_ref) {
            ObjData::Closure(c) => c.function,
            other => panic!("frame closure is not a Closure: {other:?}"),
        };
        let instr = match self.heap.get(fn_ref) {
            ObjData::Fn(f) => f.code.get(ip).copied(),
            other => panic!("closure function is not a Fn: {other:?}"),
        };
        let Some(instr) = instr else {
            // A well-formed chunk always ends its code with an explicit
            // RETURN; falling off the end is only reachable from the
            // hand-assembled test fixtures this workspace's `Compiler` also
            // targets, so we treat it as an implicit `return null` rather
            // than panicking.
            return self.do_return(fiber_ref, Value::Null);
        };
        // Advance before executing: JUMP/TEST offsets are relative to the
        // instruction *after* themselves.
        self.fiber_mut(fiber_ref).frames.last_mut().expect("frame vanished between fetch and advance").ip = ip + 1;
        self.execute(fiber_ref, fn_ref, stack_base, instr)
    }

    fn execute(&mut self, fiber_ref: ObjRef, fn_ref: ObjRef, stack_base: usize, instr: Instr) -> Flow {
        match instr {
            Instr::Noop => Flow::Continue,

            Instr::LoadK { a, bx } => {
                let v = self.constant(fn_ref, bx);
                self.set_reg(fiber_ref, stack_base, a, v);
                Flow::Continue
            }
            Instr::LoadNull { a } => {
                self.set_reg(fiber_ref, stack_base, a, Value::Null);
                Flow::Continue
            }
            Instr::LoadBool { a, value } => {
                self.set_reg(fiber_ref, stack_base, a, Value::Bool(value));
                Flow::Continue
            }
            Instr::Move { a, b } => {
                let v = self.reg(fiber_ref, stack_base, b);
                self.set_reg(fiber_ref, stack_base, a, v);
                Flow::Continue
            }

            Instr::GetUpval { a, upvalue } => {
                let uv = self.closure_upvalue(fiber_ref, upvalue);
                let v = self.upvalue_get(uv);
                self.set_reg(fiber_ref, stack_base, a, v);
                Flow::Continue
            }
            Instr::SetUpval { upvalue, b } => {
                let uv = self.closure_upvalue(fiber_ref, upvalue);
                let v = self.reg(fiber_ref, stack_base, b);
                self.upvalue_set(uv, v);
                Flow::Continue
            }

            Instr::GetGlobal { a, bx } => {
                let module_ref = self.current_module(fn_ref);
                let v = match self.heap.get(module_ref) {
                    ObjData::Module(m) => m.variables.get(bx as usize).copied().unwrap_or(Value::Null),
                    _ => unreachable!(),
                };
                self.set_reg(fiber_ref, stack_base, a, v);
                Flow::Continue
            }
            Instr::SetGlobal { bx, b } => {
                let module_ref = self.current_module(fn_ref);
                let v = self.reg(fiber_ref, stack_base, b);
                if let ObjData::Module(m) = self.heap.get_mut(module_ref) {
                    if let Some(slot) = m.variables.get_mut(bx as usize) {
                        *slot = v;
                    }
                }
                Flow::Continue
            }

            Instr::GetField { a, b, field } => {
                let recv = self.reg(fiber_ref, stack_base, b);
                match recv {
                    Value::Obj(r) => {
                        let v = match self.heap.get(r) {
                            ObjData::Instance(i) => i.fields.get(field as usize).copied().unwrap_or(Value::Null),
                            _ => Value::Null,
                        };
                        self.set_reg(fiber_ref, stack_base, a, v);
                        Flow::Continue
                    }
                    _ => {
                        self.throw(fiber_ref, "Only instances have fields.".to_string());
                        self.after_error(fiber_ref)
                    }
                }
            }
            Instr::SetField { a, field, b } => {
                let recv = self.reg(fiber_ref, stack_base, a);
                let v = self.reg(fiber_ref, stack_base, b);
                match recv {
                    Value::Obj(r) => {
                        if let ObjData::Instance(i) = self.heap.get_mut(r) {
                            if let Some(slot) = i.fields.get_mut(field as usize) {
                                *slot = v;
                            }
                        }
                        Flow::Continue
                    }
                    _ => {
                        self.throw(fiber_ref, "Only instances have fields.".to_string());
                        self.after_error(fiber_ref)
                    }
                }
            }

            Instr::CallK { a, argc, symbol, dest } => {
                let args: Vec<Value> = (0..argc).map(|i| self.reg(fiber_ref, stack_base, a + i)).collect();
                let class_ref = self.class_of_value(args[0]);
                let frame_top = stack_base + self.fn_max_slots(fn_ref);
                self.send(fiber_ref, frame_top, stack_base, &args, symbol, dest, class_ref)
            }
            Instr::CallSuperK { a, argc, symbol, dest } => {
                let args: Vec<Value> = (0..argc).map(|i| self.reg(fiber_ref, stack_base, a + i)).collect();
                let super_val = self.reg(fiber_ref, stack_base, a + argc);
                let Value::Obj(class_ref) = super_val else {
                    self.throw(fiber_ref, "Superclass register does not hold a class.".to_string());
                    return self.after_error(fiber_ref);
                };
                let frame_top = stack_base + self.fn_max_slots(fn_ref);
                self.send(fiber_ref, frame_top, stack_base, &args, symbol, dest, class_ref)
            }

            Instr::Test { a, offset } => {
                let v = self.reg(fiber_ref, stack_base, a);
                if !v.is_truthy() {
                    self.jump_relative(fiber_ref, offset);
                }
                Flow::Continue
            }
            Instr::Jump { offset } => {
                self.jump_relative(fiber_ref, offset);
                Flow::Continue
            }

            Instr::Return { a } => {
                let v = self.reg(fiber_ref, stack_base, a);
                self.do_return(fiber_ref, v)
            }
            Instr::Close { from } => {
                self.close_upvalues_from(fiber_ref, stack_base + from as usize);
                Flow::Continue
            }

            Instr::Closure { a, bx } => self.make_closure(fiber_ref, fn_ref, stack_base, a, bx),

            Instr::Construct { a } => self.construct(fiber_ref, stack_base, a),

            Instr::Class { a, name, num_fields, superclass } => self.begin_class(fiber_ref, fn_ref, stack_base, a, name, num_fields, superclass),
            Instr::EndClass { a } => self.end_class(fiber_ref, fn_ref, stack_base, a),
            Instr::Method { a, symbol, b, is_static } => {
                let class_val = self.reg(fiber_ref, stack_base, a);
                let Value::Obj(class_ref) = class_val else { unreachable!("METHOD requires a class register") };
                let closure_val = self.reg(fiber_ref, stack_base, b);
                let Value::Obj(closure_ref) = closure_val else { unreachable!("METHOD requires a closure register") };
                let target = if is_static {
                    self.class_data(class_ref).metaclass.expect("every class has a metaclass")
                } else {
                    class_ref
                };
                if let ObjData::Class(c) = self.heap.get_mut(target) {
                    c.set_method(symbol, MethodKind::Block(closure_ref));
                }
                Flow::Continue
            }

            Instr::ImportModule { a, name } => self.do_import_module(fiber_ref, fn_ref, stack_base, a, name),
            Instr::ImportVar { a, module, name } => {
                let module_val = self.reg(fiber_ref, stack_base, module);
                let var_name = self.constant_as_str(fn_ref, name);
                let v = match module_val {
                    Value::Obj(module_ref) => self.import_variable(module_ref, &var_name).unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                self.set_reg(fiber_ref, stack_base, a, v);
                Flow::Continue
            }

            // EQ/LT/LTE write their Bool result into R[A] through the same
            // `send` path as ADD/SUB/... rather than acting as conditional
            // skips consumed by a following JUMP (spec.md §4.G point 4).
            // Deliberate divergence, recorded in DESIGN.md's Open Question
            // decisions: the skip+NOOP-patching convention is a codegen
            // detail of the external compiler (spec.md §1 "Out of scope"),
            // and `AssemblingCompiler` — the only `Compiler` this workspace
            // ships — never emits that pattern, so there is no producer to
            // round-trip against.
            Instr::Eq { a, b, c } => {
                let sym = self.ops.eq;
                self.binop(fiber_ref, fn_ref, stack_base, a, b, c, sym)
            }
            Instr::Lt { a, b, c } => {
                let sym = self.ops.lt;
                self.binop(fiber_ref, fn_ref, stack_base, a, b, c, sym)
            }
            Instr::Lte { a, b, c } => {
                let sym = self.ops.lte;
                self.binop(fiber_ref, fn_ref, stack_base, a, b, c, sym)
            }
            Instr::EqK { a, b, bx } => {
                let sym = self.ops.eq;
                self.binop_k(fiber_ref, fn_ref, stack_base, a, b, bx, sym)
            }
            Instr::LtK { a, b, bx } => {
                let sym = self.ops.lt;
                self.binop_k(fiber_ref, fn_ref, stack_base, a, b, bx, sym)
            }
            Instr::LteK { a, b, bx } => {
                let sym = self.ops.lte;
                self.binop_k(fiber_ref, fn_ref, stack_base, a, b, bx, sym)
            }
            Instr::Add { a, b, c } => {
                let sym = self.ops.plus;
                self.binop(fiber_ref, fn_ref, stack_base, a, b, c, sym)
            }
            Instr::Sub { a, b, c } => {
                let sym = self.ops.minus;
                self.binop(fiber_ref, fn_ref, stack_base, a, b, c, sym)
            }
            Instr::Mul { a, b, c } => {
                let sym = self.ops.star;
                self.binop(fiber_ref, fn_ref, stack_base, a, b, c, sym)
            }
            Instr::Div { a, b, c } => {
                let sym = self.ops.slash;
                self.binop(fiber_ref, fn_ref, stack_base, a, b, c, sym)
            }
            Instr::AddK { a, b, bx } => {
                let sym = self.ops.plus;
                self.binop_k(fiber_ref, fn_ref, stack_base, a, b, bx, sym)
            }
            Instr::SubK { a, b, bx } => {
                let sym = self.ops.minus;
                self.binop_k(fiber_ref, fn_ref, stack_base, a, b, bx, sym)
            }
            Instr::MulK { a, b, bx } => {
                let sym = self.ops.star;
                self.binop_k(fiber_ref, fn_ref, stack_base, a, b, bx, sym)
            }
            Instr::DivK { a, b, bx } => {
                let sym = self.ops.slash;
                self.binop_k(fiber_ref, fn_ref, stack_base, a, b, bx, sym)
            }
            Instr::Neg { a, b } => {
                let sym = self.ops.negate;
                self.unop(fiber_ref, fn_ref, stack_base, a, b, sym)
            }
            Instr::Not { a, b } => {
                let sym = self.ops.not;
                self.unop(fiber_ref, fn_ref, stack_base, a, b, sym)
            }

            Instr::Iterate { seq, iter } => {
                let sym = self.ops.iterate;
                let args = [self.reg(fiber_ref, stack_base, seq), self.reg(fiber_ref, stack_base, iter)];
                let class_ref = self.class_of_value(args[0]);
                let frame_top = stack_base + self.fn_max_slots(fn_ref);
                self.send(fiber_ref, frame_top, stack_base, &args, sym, iter, class_ref)
            }
            Instr::IteratorValue { a, seq, iter } => {
                let sym = self.ops.iterator_value;
                let args = [self.reg(fiber_ref, stack_base, seq), self.reg(fiber_ref, stack_base, iter)];
                let class_ref = self.class_of_value(args[0]);
                let frame_top = stack_base + self.fn_max_slots(fn_ref);
                self.send(fiber_ref, frame_top, stack_base, &args, sym, a, class_ref)
            }

            Instr::GetSub { a, b, c } => {
                let sym = self.ops.subscript_get;
                self.binop(fiber_ref, fn_ref, stack_base, a, b, c, sym)
            }
            Instr::SetSub { a, b, c } => {
                let sym = self.ops.subscript_set;
                let args = [
                    self.reg(fiber_ref, stack_base, a),
                    self.reg(fiber_ref, stack_base, b),
                    self.reg(fiber_ref, stack_base, c),
                ];
                let class_ref = self.class_of_value(args[0]);
                let frame_top = stack_base + self.fn_max_slots(fn_ref);
                self.send(fiber_ref, frame_top, stack_base, &args, sym, a, class_ref)
            }

            Instr::AddElem { a, b } => {
                let v = self.reg(fiber_ref, stack_base, b);
                self.list_push(fiber_ref, stack_base, a, v);
                Flow::Continue
            }
            Instr::AddElemK { a, bx } => {
                let v = self.constant(fn_ref, bx);
                self.list_push(fiber_ref, stack_base, a, v);
                Flow::Continue
            }

            Instr::Range { a, b, c, inclusive } => {
                let (from_v, to_v) = (self.reg(fiber_ref, stack_base, b), self.reg(fiber_ref, stack_base, c));
                match (from_v, to_v) {
                    (Value::Num(from), Value::Num(to)) => {
                        let cls = self.classes.range;
                        let r = self.allocate(Some(cls), ObjData::Range(VRange::new(from, to, inclusive)));
                        self.pop_temp_root();
                        self.set_reg(fiber_ref, stack_base, a, Value::Obj(r));
                        Flow::Continue
                    }
                    _ => {
                        self.throw(fiber_ref, "Range endpoints must be numbers.".to_string());
                        self.after_error(fiber_ref)
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------
// Register / constant / upvalue access
// ---------------------------------------------------------------------

impl Vm {
    fn reg(&self, fiber_ref: ObjRef, stack_base: usize, r: Reg) -> Value {
        self.fiber(fiber_ref).stack[stack_base + r as usize]
    }

    fn set_reg(&mut self, fiber_ref: ObjRef, stack_base: usize, r: Reg, v: Value) {
        self.fiber_mut(fiber_ref).stack[stack_base + r as usize] = v;
    }

    fn jump_relative(&mut self, fiber_ref: ObjRef, offset: i32) {
        let frame = self.fiber_mut(fiber_ref).frames.last_mut().expect("jump with no active frame");
        frame.ip = (frame.ip as i64 + offset as i64) as usize;
    }

    fn fn_max_slots(&self, fn_ref: ObjRef) -> usize {
        match self.heap.get(fn_ref) {
            ObjData::Fn(f) => f.max_slots as usize,
            other => panic!("expected Fn, found {other:?}"),
        }
    }

    fn current_module(&self, fn_ref: ObjRef) -> ObjRef {
        match self.heap.get(fn_ref) {
            ObjData::Fn(f) => f.module.expect("top-level code must run inside a module"),
            other => panic!("expected Fn, found {other:?}"),
        }
    }

    fn closure_upvalue(&self, fiber_ref: ObjRef, upvalue: u8) -> ObjRef {
        let closure_ref = self.fiber(fiber_ref).frames.last().expect("no active frame").closure;
        match self.heap.get(closure_ref) {
            ObjData::Closure(c) => c.upvalues[upvalue as usize],
            other => panic!("expected Closure, found {other:?}"),
        }
    }

    /// Lit la constante `idx` du pool de `fn_ref`. Les constantes `List`/`Map`
    /// sont copiées à chaque lecture plutôt que partagées (spec.md §10.G
    /// "constant-pool copy-on-load") : un littéral `[1, 2]` dans un corps de
    /// fonction doit produire une liste fraîche à chaque appel, pas un objet
    /// unique partagé par toutes les invocations.
    fn constant(&mut self, fn_ref: ObjRef, idx: Kidx) -> Value {
        let raw = match self.heap.get(fn_ref) {
            ObjData::Fn(f) => f.constants[idx as usize],
            other => panic!("expected Fn, found {other:?}"),
        };
        match raw {
            Value::Obj(r) => match self.heap.get(r) {
                ObjData::List(l) => {
                    let cloned = l.clone();
                    let cls = self.classes.list;
                    let nr = self.allocate(Some(cls), ObjData::List(cloned));
                    self.pop_temp_root();
                    Value::Obj(nr)
                }
                ObjData::Map(m) => {
                    let cloned = m.clone();
                    let cls = self.classes.map;
                    let nr = self.allocate(Some(cls), ObjData::Map(cloned));
                    self.pop_temp_root();
                    Value::Obj(nr)
                }
                _ => raw,
            },
            _ => raw,
        }
    }

    fn constant_as_str(&mut self, fn_ref: ObjRef, idx: Kidx) -> String {
        match self.constant(fn_ref, idx) {
            Value::Obj(r) => match self.heap.get(r) {
                ObjData::String(s) => s.as_str().to_string(),
                other => panic!("expected a String constant, found {other:?}"),
            },
            other => panic!("expected a String constant, found {other:?}"),
        }
    }

    fn list_push(&mut self, fiber_ref: ObjRef, stack_base: usize, a: Reg, v: Value) {
        let list_val = self.reg(fiber_ref, stack_base, a);
        if let Value::Obj(r) = list_val {
            if let ObjData::List(l) = self.heap.get_mut(r) {
                l.push(v);
            }
        }
    }
}

// ---------------------------------------------------------------------
// Message send — the single path CALLK/CALLSUPERK and every operator
// instruction funnel through.
// ---------------------------------------------------------------------

impl Vm {
    /// Envoie `symbol` à `class_ref` avec `args` (le receveur en `args[0]`).
    /// `frame_top` est la première registre libre au-dessus de la frame
    /// appelante — la fenêtre de registres contigus où `args` est recopié si
    /// la méthode résolue pousse une nouvelle frame ou appelle l'hôte.
    fn send(
        &mut self,
        fiber_ref: ObjRef,
        frame_top: usize,
        caller_stack_base: usize,
        args: &[Value],
        symbol: Symbol,
        dest: Reg,
        class_ref: ObjRef,
    ) -> Flow {
        match self.resolve_on(class_ref, symbol) {
            Dispatch::NotFound => {
                let sig = self.symbols.name(symbol).to_string();
                let cname = self.class_data(class_ref).name.clone();
                self.throw(fiber_ref, format!("{cname} does not implement '{sig}'."));
                self.after_error(fiber_ref)
            }
            Dispatch::Primitive(idx) => match self.primitives[idx as usize](self, args) {
                PrimitiveOutcome::Value(v) => {
                    self.fiber_mut(fiber_ref).stack[caller_stack_base + dest as usize] = v;
                    Flow::Continue
                }
                PrimitiveOutcome::Error(e) => {
                    self.fiber_mut(fiber_ref).error = e;
                    self.after_error(fiber_ref)
                }
            },
            Dispatch::Foreign(idx) => {
                self.place_args(fiber_ref, frame_top, args);
                let prev = self.push_api_window(fiber_ref, frame_top, args.len());
                (self.foreign_methods[idx])(self);
                self.pop_api_window(prev);
                if self.fiber(fiber_ref).has_error() {
                    return self.after_error(fiber_ref);
                }
                let result = self.fiber(fiber_ref).stack[frame_top];
                self.fiber_mut(fiber_ref).stack[caller_stack_base + dest as usize] = result;
                Flow::Continue
            }
            Dispatch::Block(closure_ref) => {
                self.place_args(fiber_ref, frame_top, args);
                self.push_call_frame(fiber_ref, closure_ref, frame_top, Some(dest));
                Flow::Continue
            }
            Dispatch::FunctionCall(_) => {
                let Value::Obj(closure_ref) = args[0] else {
                    self.throw(fiber_ref, "Object is not callable.".to_string());
                    return self.after_error(fiber_ref);
                };
                if !matches!(self.heap.get(closure_ref), ObjData::Closure(_)) {
                    self.throw(fiber_ref, "Object is not callable.".to_string());
                    return self.after_error(fiber_ref);
                }
                let fn_ref = match self.heap.get(closure_ref) {
                    ObjData::Closure(c) => c.function,
                    _ => unreachable!(),
                };
                let arity = match self.heap.get(fn_ref) {
                    ObjData::Fn(f) => f.arity,
                    _ => unreachable!(),
                };
                if arity as usize != args.len() - 1 {
                    self.throw(fiber_ref, format!("Function expects {arity} argument(s)."));
                    return self.after_error(fiber_ref);
                }
                self.place_args(fiber_ref, frame_top, args);
                self.push_call_frame(fiber_ref, closure_ref, frame_top, Some(dest));
                Flow::Continue
            }
        }
    }

    fn place_args(&mut self, fiber_ref: ObjRef, frame_top: usize, args: &[Value]) {
        self.ensure_stack(fiber_ref, frame_top + args.len());
        for (i, &v) in args.iter().enumerate() {
            self.fiber_mut(fiber_ref).stack[frame_top + i] = v;
        }
    }

    fn push_call_frame(&mut self, fiber_ref: ObjRef, closure_ref: ObjRef, stack_base: usize, return_reg: Option<Reg>) {
        let fn_ref = match self.heap.get(closure_ref) {
            ObjData::Closure(c) => c.function,
            other => panic!("expected Closure, found {other:?}"),
        };
        let max_slots = self.fn_max_slots(fn_ref);
        self.ensure_stack(fiber_ref, stack_base + max_slots);
        self.fiber_mut(fiber_ref).frames.push(vitte_core::object::CallFrame {
            closure: closure_ref,
            ip: 0,
            stack_base,
            return_reg,
        });
    }

    fn binop(&mut self, fiber_ref: ObjRef, fn_ref: ObjRef, stack_base: usize, a: Reg, b: Reg, c: Reg, sym: Symbol) -> Flow {
        let args = [self.reg(fiber_ref, stack_base, b), self.reg(fiber_ref, stack_base, c)];
        let class_ref = self.class_of_value(args[0]);
        let frame_top = stack_base + self.fn_max_slots(fn_ref);
        self.send(fiber_ref, frame_top, stack_base, &args, sym, a, class_ref)
    }

    fn binop_k(&mut self, fiber_ref: ObjRef, fn_ref: ObjRef, stack_base: usize, a: Reg, b: Reg, bx: Kidx, sym: Symbol) -> Flow {
        let rhs = self.constant(fn_ref, bx);
        let args = [self.reg(fiber_ref, stack_base, b), rhs];
        let class_ref = self.class_of_value(args[0]);
        let frame_top = stack_base + self.fn_max_slots(fn_ref);
        self.send(fiber_ref, frame_top, stack_base, &args, sym, a, class_ref)
    }

    fn unop(&mut self, fiber_ref: ObjRef, fn_ref: ObjRef, stack_base: usize, a: Reg, b: Reg, sym: Symbol) -> Flow {
        let args = [self.reg(fiber_ref, stack_base, b)];
        let class_ref = self.class_of_value(args[0]);
        let frame_top = stack_base + self.fn_max_slots(fn_ref);
        self.send(fiber_ref, frame_top, stack_base, &args, sym, a, class_ref)
    }
}

// ---------------------------------------------------------------------
// RETURN / error propagation
// ---------------------------------------------------------------------

impl Vm {
    /// `RETURN A` (spec.md §4.G, §4.E): referme les upvalues de la frame
    /// sortante, dépile, et écrit la valeur de retour soit dans la frame
    /// appelante restée sur le même fiber, soit — si `fiber.frames` est
    /// désormais vide — dans le fiber appelant via `last_call_reg`
    /// (convention `returnReg = -1` quand il n'y a aucun appelant, spec.md
    /// §10.G).
    fn do_return(&mut self, fiber_ref: ObjRef, value: Value) -> Flow {
        let frame = self.fiber_mut(fiber_ref).frames.pop().expect("RETURN with no active frame");
        self.close_upvalues_from(fiber_ref, frame.stack_base);

        let fn_ref = match self.heap.get(frame.closure) {
            ObjData::Closure(c) => c.function,
            _ => unreachable!(),
        };
        if let ObjData::Fn(f) = self.heap.get(fn_ref) {
            if let Some(m) = f.module {
                self.last_module = Some(m);
            }
        }

        if let Some(reg) = frame.return_reg {
            if let Some(caller_frame) = self.fiber(fiber_ref).frames.last() {
                let base = caller_frame.stack_base;
                self.fiber_mut(fiber_ref).stack[base + reg as usize] = value;
                return Flow::Continue;
            }
        } else if !self.fiber(fiber_ref).frames.is_empty() {
            return Flow::Continue;
        }

        // This fiber has no more frames: either hand control back to its
        // caller (spec.md §4.E `transfer`/`call`) or, if it was the root
        // fiber, the whole interpretation is done.
        match self.fiber(fiber_ref).caller {
            Some(caller) => {
                let reg = self.fiber(fiber_ref).last_call_reg;
                self.link_caller(fiber_ref, None);
                self.fiber = Some(caller);
                if let Some(reg) = reg {
                    if let Some(caller_frame) = self.fiber(caller).frames.last() {
                        let base = caller_frame.stack_base;
                        self.fiber_mut(caller).stack[base + reg as usize] = value;
                    }
                }
                Flow::Continue
            }
            None => {
                self.fiber = None;
                Flow::Halt(InterpretResult::Success)
            }
        }
    }

    fn throw(&mut self, fiber_ref: ObjRef, message: String) {
        let v = make_string(self, message);
        self.fiber_mut(fiber_ref).error = v;
    }

    /// Déroule la pile d'erreur à partir du fiber `cur` (spec.md §7
    /// "Unhandled runtime error"): si son état est `Try`, l'erreur devient la
    /// valeur de retour de `try` dans le fiber appelant, qui reprend la main.
    /// Sinon, le fiber est signalé à l'hôte (`RUNTIME_ERROR` puis une entrée
    /// `STACK_TRACE` par frame, la plus récente d'abord) et l'erreur se
    /// propage à son propre appelant, jusqu'à épuisement de la chaîne.
    fn after_error(&mut self, mut cur: ObjRef) -> Flow {
        let mut first = true;
        loop {
            if self.fiber(cur).state == FiberState::Try {
                let err = self.fiber(cur).error;
                let caller = self.fiber(cur).caller.expect("a Try fiber always has a caller");
                let reg = self.fiber(cur).last_call_reg;
                self.fiber_mut(cur).error = Value::Null;
                self.link_caller(cur, None);
                self.fiber = Some(caller);
                if let Some(reg) = reg {
                    if let Some(frame) = self.fiber(caller).frames.last() {
                        let base = frame.stack_base;
                        self.fiber_mut(caller).stack[base + reg as usize] = err;
                    }
                }
                return Flow::Continue;
            }

            self.report_stack_trace(cur, first);
            first = false;
            match self.fiber(cur).caller {
                Some(next) => {
                    let err = self.fiber(cur).error;
                    self.fiber_mut(next).error = err;
                    self.link_caller(cur, None);
                    cur = next;
                }
                None => {
                    self.fiber = None;
                    return Flow::Halt(InterpretResult::RuntimeError);
                }
            }
        }
    }

    fn report_stack_trace(&mut self, fiber_ref: ObjRef, first: bool) {
        if first {
            let err = self.fiber(fiber_ref).error;
            let msg = self.describe_error_value(err);
            self.host.error(ErrorKind::Runtime, None, 0, &msg);
        }
        let frames = self.fiber(fiber_ref).frames.clone();
        for frame in frames.iter().rev() {
            let fn_ref = match self.heap.get(frame.closure) {
                ObjData::Closure(c) => c.function,
                _ => continue,
            };
            let (module_name, line, name) = match self.heap.get(fn_ref) {
                ObjData::Fn(f) => {
                    let module_name = f
                        .module
                        .map(|m| match self.heap.get(m) {
                            ObjData::Module(mo) => mo.name.clone(),
                            _ => String::new(),
                        })
                        .unwrap_or_default();
                    let line = f.lines.get(frame.ip.saturating_sub(1)).copied().unwrap_or(0);
                    (module_name, line, f.debug_name.clone())
                }
                _ => continue,
            };
            self.host.error(ErrorKind::StackTrace, Some(&module_name), line, &name);
        }
    }

    fn describe_error_value(&self, v: Value) -> String {
        match v {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => n.to_string(),
            Value::Undefined => "<undefined>".to_string(),
            Value::Obj(r) => match self.heap.get(r) {
                ObjData::String(s) => s.as_str().to_string(),
                _ => "a non-string error object".to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------
// Closures, instances, classes, modules
// ---------------------------------------------------------------------

impl Vm {
    fn make_closure(&mut self, fiber_ref: ObjRef, fn_ref: ObjRef, stack_base: usize, a: Reg, bx: Kidx) -> Flow {
        let proto_val = match self.heap.get(fn_ref) {
            ObjData::Fn(f) => f.constants[bx as usize],
            _ => unreachable!(),
        };
        let Value::Obj(proto_ref) = proto_val else {
            panic!("CLOSURE constant must be a Fn prototype");
        };
        let descs = match self.heap.get(proto_ref) {
            ObjData::Fn(f) => f.upvalues.clone(),
            other => panic!("expected Fn, found {other:?}"),
        };
        let current_closure = self.fiber(fiber_ref).frames.last().expect("no active frame").closure;
        let mut upvalues = Vec::with_capacity(descs.len());
        for desc in descs {
            let uv = if desc.is_local {
                self.capture_upvalue(fiber_ref, stack_base + desc.index as usize)
            } else {
                match self.heap.get(current_closure) {
                    ObjData::Closure(c) => c.upvalues[desc.index as usize],
                    other => panic!("expected Closure, found {other:?}"),
                }
            };
            upvalues.push(uv);
        }
        let cls = self.classes.fn_;
        let closure_ref = self.allocate(Some(cls), ObjData::Closure(Closure::new(proto_ref, upvalues)));
        self.pop_temp_root();
        self.set_reg(fiber_ref, stack_base, a, Value::Obj(closure_ref));
        Flow::Continue
    }

    fn construct(&mut self, fiber_ref: ObjRef, stack_base: usize, a: Reg) -> Flow {
        let v = self.reg(fiber_ref, stack_base, a);
        let Value::Obj(class_ref) = v else {
            self.throw(fiber_ref, "CONSTRUCT requires a class.".to_string());
            return self.after_error(fiber_ref);
        };
        let (num_fields, is_foreign) = {
            let c = self.class_data(class_ref);
            (c.num_fields, c.is_foreign)
        };
        let inst_ref = if is_foreign {
            let methods = *self
                .foreign_classes
                .get(&class_ref)
                .expect("a foreign class always has its allocate/finalize pair installed at ENDCLASS");
            let data = (methods.allocate)(self);
            let r = self.allocate(Some(class_ref), ObjData::Foreign(Foreign::new(class_ref, data, methods.finalize.is_some())));
            self.pop_temp_root();
            r
        } else {
            let r = self.allocate(Some(class_ref), ObjData::Instance(Instance::new(class_ref, num_fields)));
            self.pop_temp_root();
            r
        };
        self.set_reg(fiber_ref, stack_base, a, Value::Obj(inst_ref));
        Flow::Continue
    }

    fn begin_class(
        &mut self,
        fiber_ref: ObjRef,
        fn_ref: ObjRef,
        stack_base: usize,
        a: Reg,
        name: Kidx,
        num_fields: u16,
        superclass: Option<Reg>,
    ) -> Flow {
        let class_name = self.constant_as_str(fn_ref, name);
        let superclass_ref = match superclass {
            Some(reg) => match self.reg(fiber_ref, stack_base, reg) {
                Value::Obj(r) if matches!(self.heap.get(r), ObjData::Class(_)) => r,
                _ => {
                    self.throw(fiber_ref, "Class must inherit from a class.".to_string());
                    return self.after_error(fiber_ref);
                }
            },
            None => self.classes.object,
        };
        let new_ref = self.new_user_class(class_name, num_fields as usize, superclass_ref);
        self.set_reg(fiber_ref, stack_base, a, Value::Obj(new_ref));
        Flow::Continue
    }

    /// `CLASS` (spec.md §4.B, §5 "Class construction protocol"): matérialise
    /// une classe et sa métaclasse, avec la copie-vers-le-bas des méthodes
    /// héritées de `bindSuperclass`. Forme générale de
    /// `vm::new_core_class`/`bind_superclass` (celles-ci ne construisent que
    /// le bootstrap `core`, dont la super-classe est toujours `Object`).
    fn new_user_class(&mut self, name: String, num_fields: usize, superclass_ref: ObjRef) -> ObjRef {
        let class_class = self.classes.class;
        let super_meta = self.class_data(superclass_ref).metaclass.expect("every reachable class has a metaclass");
        let super_meta_snapshot = self.class_data(super_meta).clone();
        let meta_ref = self.allocate(Some(class_class), ObjData::Class(Class::new(format!("{name} metaclass"), 0)));
        if let ObjData::Class(m) = self.heap.get_mut(meta_ref) {
            m.bind_superclass(&super_meta_snapshot, super_meta);
        }
        let super_snapshot = self.class_data(superclass_ref).clone();
        let r = self.allocate(Some(meta_ref), ObjData::Class(Class::new(name, num_fields)));
        if let ObjData::Class(c) = self.heap.get_mut(r) {
            c.bind_superclass(&super_snapshot, superclass_ref);
        }
        self.pop_temp_root();
        self.pop_temp_root();
        r
    }

    /// `ENDCLASS` (spec.md §4.B "Foreign classes"): offre à l'hôte une
    /// dernière chance de lier `{allocate, finalize}` à cette classe. Une
    /// classe non étrangère (le cas courant) ne fait rien ici — ses méthodes
    /// sont toutes déjà posées par les `METHOD` précédents.
    fn end_class(&mut self, fiber_ref: ObjRef, fn_ref: ObjRef, stack_base: usize, a: Reg) -> Flow {
        let v = self.reg(fiber_ref, stack_base, a);
        let Value::Obj(class_ref) = v else { unreachable!("ENDCLASS requires a class register") };
        let module_ref = self.current_module(fn_ref);
        let module_name = match self.heap.get(module_ref) {
            ObjData::Module(m) => m.name.clone(),
            _ => unreachable!(),
        };
        let class_name = self.class_data(class_ref).name.clone();
        if let Some(fc) = self.host.bind_foreign_class(&module_name, &class_name) {
            if let ObjData::Class(c) = self.heap.get_mut(class_ref) {
                c.is_foreign = true;
            }
            self.foreign_classes.insert(class_ref, fc);
        }
        Flow::Continue
    }

    fn do_import_module(&mut self, fiber_ref: ObjRef, fn_ref: ObjRef, stack_base: usize, a: Reg, name: Kidx) -> Flow {
        let module_name = self.constant_as_str(fn_ref, name);
        let importer = match self.heap.get(self.current_module(fn_ref)) {
            ObjData::Module(m) => m.name.clone(),
            _ => unreachable!(),
        };
        match self.import_module(&importer, &module_name) {
            Ok(ImportOutcome::AlreadyLoaded(module_ref)) => {
                self.set_reg(fiber_ref, stack_base, a, Value::Obj(module_ref));
                Flow::Continue
            }
            Ok(ImportOutcome::Run(closure_ref)) => {
                let module_ref = match self.heap.get(closure_ref) {
                    ObjData::Closure(c) => match self.heap.get(c.function) {
                        ObjData::Fn(f) => f.module.expect("import_module always stamps the module before returning"),
                        _ => unreachable!(),
                    },
                    _ => unreachable!(),
                };
                self.set_reg(fiber_ref, stack_base, a, Value::Obj(module_ref));
                let frame_top = stack_base + self.fn_max_slots(fn_ref);
                self.place_args(fiber_ref, frame_top, &[Value::Obj(closure_ref)]);
                self.push_call_frame(fiber_ref, closure_ref, frame_top, None);
                Flow::Continue
            }
            Err(e) => {
                let msg = e.to_string();
                self.throw(fiber_ref, msg);
                self.after_error(fiber_ref)
            }
        }
    }
}

/// Alloue une `String` avec la classe `core` correcte et la dépile
/// immédiatement des racines temporaires — sûr tant que l'appelant la range
/// dans un registre ou `fiber.error` avant toute allocation ultérieure.
fn make_string(vm: &mut Vm, s: impl Into<String>) -> Value {
    let cls = vm.classes.string;
    let r = vm.allocate(Some(cls), ObjData::String(VString::new(s.into())));
    vm.pop_temp_root();
    Value::Obj(r)
}

fn wrong_type(vm: &mut Vm, expected: &str) -> PrimitiveOutcome {
    PrimitiveOutcome::Error(make_string(vm, format!("Right operand must be {expected}.")))
}

// ---------------------------------------------------------------------
// Primitives: Object, Num, String, List, Map, Range
// ---------------------------------------------------------------------

fn obj_eq(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    PrimitiveOutcome::Value(Value::Bool(value::equals(&vm.heap, args[0], args[1])))
}
fn obj_neq(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    PrimitiveOutcome::Value(Value::Bool(!value::equals(&vm.heap, args[0], args[1])))
}
fn obj_not(_vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    PrimitiveOutcome::Value(Value::Bool(!args[0].is_truthy()))
}

fn num_add(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Num(a) = args[0] else { unreachable!() };
    match args[1] {
        Value::Num(b) => PrimitiveOutcome::Value(Value::Num(a + b)),
        _ => wrong_type(vm, "a Num"),
    }
}
fn num_sub(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Num(a) = args[0] else { unreachable!() };
    match args[1] {
        Value::Num(b) => PrimitiveOutcome::Value(Value::Num(a - b)),
        _ => wrong_type(vm, "a Num"),
    }
}
fn num_mul(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Num(a) = args[0] else { unreachable!() };
    match args[1] {
        Value::Num(b) => PrimitiveOutcome::Value(Value::Num(a * b)),
        _ => wrong_type(vm, "a Num"),
    }
}
fn num_div(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Num(a) = args[0] else { unreachable!() };
    match args[1] {
        Value::Num(b) => PrimitiveOutcome::Value(Value::Num(a / b)),
        _ => wrong_type(vm, "a Num"),
    }
}
fn num_lt(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Num(a) = args[0] else { unreachable!() };
    match args[1] {
        Value::Num(b) => PrimitiveOutcome::Value(Value::Bool(a < b)),
        _ => wrong_type(vm, "a Num"),
    }
}
fn num_lte(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Num(a) = args[0] else { unreachable!() };
    match args[1] {
        Value::Num(b) => PrimitiveOutcome::Value(Value::Bool(a <= b)),
        _ => wrong_type(vm, "a Num"),
    }
}
fn num_negate(_vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Num(a) = args[0] else { unreachable!() };
    PrimitiveOutcome::Value(Value::Num(-a))
}

fn str_add(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(ra) = args[0] else { unreachable!() };
    let a = match vm.heap.get(ra) {
        ObjData::String(s) => s.as_str().to_string(),
        _ => unreachable!(),
    };
    let b = match args[1] {
        Value::Obj(rb) => match vm.heap.get(rb) {
            ObjData::String(s) => s.as_str().to_string(),
            _ => return wrong_type(vm, "a String"),
        },
        _ => return wrong_type(vm, "a String"),
    };
    PrimitiveOutcome::Value(make_string(vm, a + &b))
}

fn string_get_sub(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    match args[1] {
        Value::Num(n) => {
            let bytes = match vm.heap.get(r) {
                ObjData::String(s) => s.bytes.clone(),
                _ => unreachable!(),
            };
            let len = bytes.len() as i64;
            let idx = if (n as i64) < 0 { len + n as i64 } else { n as i64 };
            if idx < 0 || idx >= len {
                return PrimitiveOutcome::Error(make_string(vm, "String index out of bounds."));
            }
            // `wrenStringCodePointAt` (wren_value.c): decode the whole UTF-8
            // sequence starting at `idx`, not just the one byte there.
            let num_bytes = utf8_decode_num_bytes(bytes[idx as usize]).max(1);
            let end = ((idx as usize) + num_bytes).min(bytes.len());
            let slice = bytes[idx as usize..end].to_vec();
            PrimitiveOutcome::Value(make_string(vm, String::from_utf8_lossy(&slice).into_owned()))
        }
        _ => wrong_type(vm, "a Num"),
    }
}

fn string_iterate(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    let bytes = match vm.heap.get(r) {
        ObjData::String(s) => s.bytes.clone(),
        _ => unreachable!(),
    };
    let len = bytes.len();
    let next = match args[1] {
        Value::Null => {
            if len == 0 {
                None
            } else {
                Some(0i64)
            }
        }
        Value::Num(n) => {
            let cur = n as i64;
            if cur < 0 || cur as usize >= len {
                None
            } else {
                // `wrenUtf8DecodeNumBytes` (wren_value.c): advance by the
                // number of bytes in the codepoint at `cur`, not by 1 — a
                // multi-byte codepoint must only be visited once.
                let step = utf8_decode_num_bytes(bytes[cur as usize]).max(1) as i64;
                let i = cur + step;
                if (i as usize) < len {
                    Some(i)
                } else {
                    None
                }
            }
        }
        _ => None,
    };
    match next {
        Some(i) => PrimitiveOutcome::Value(Value::Num(i as f64)),
        None => PrimitiveOutcome::Value(Value::Bool(false)),
    }
}

/// `String * Num` (spec.md §4.G "MUL: String×(non-negative integer Num) →
/// repeat"): `count` must be a non-negative integer, else a runtime error —
/// the same shape of check as [`list_mul`] below.
fn str_mul(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(ra) = args[0] else { unreachable!() };
    let count = match repeat_count(args[1]) {
        Ok(n) => n,
        Err(msg) => return PrimitiveOutcome::Error(make_string(vm, msg)),
    };
    let s = match vm.heap.get(ra) {
        ObjData::String(s) => s.as_str().to_string(),
        _ => unreachable!(),
    };
    PrimitiveOutcome::Value(make_string(vm, s.repeat(count)))
}

/// `List * Num` (spec.md §4.G "MUL: List×(non-negative integer Num) →
/// repeat"): concatenates `count` copies of the receiver's elements.
fn list_mul(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(ra) = args[0] else { unreachable!() };
    let count = match repeat_count(args[1]) {
        Ok(n) => n,
        Err(msg) => return PrimitiveOutcome::Error(make_string(vm, msg)),
    };
    let values = match vm.heap.get(ra) {
        ObjData::List(l) => l.values.clone(),
        _ => unreachable!(),
    };
    let mut merged = Vec::with_capacity(values.len() * count);
    for _ in 0..count {
        merged.extend_from_slice(&values);
    }
    let cls = vm.classes.list;
    let r = vm.allocate(Some(cls), ObjData::List(VList { values: merged }));
    vm.pop_temp_root();
    PrimitiveOutcome::Value(Value::Obj(r))
}

/// Shared operand check for `str_mul`/`list_mul`: the right-hand side must
/// be a `Num` holding a non-negative integer (spec.md §4.G).
fn repeat_count(v: Value) -> Result<usize, &'static str> {
    match v {
        Value::Num(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        Value::Num(_) => Err("Right operand must be a non-negative integer."),
        _ => Err("Right operand must be a Num."),
    }
}

fn list_add(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(ra) = args[0] else { unreachable!() };
    let Value::Obj(rb) = args[1] else { return wrong_type(vm, "a List") };
    let (va, vb) = match (vm.heap.get(ra), vm.heap.get(rb)) {
        (ObjData::List(a), ObjData::List(b)) => (a.values.clone(), b.values.clone()),
        _ => return wrong_type(vm, "a List"),
    };
    let mut merged = va;
    merged.extend(vb);
    let cls = vm.classes.list;
    let r = vm.allocate(Some(cls), ObjData::List(VList { values: merged }));
    vm.pop_temp_root();
    PrimitiveOutcome::Value(Value::Obj(r))
}

fn list_get_sub(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    match args[1] {
        Value::Num(n) => {
            let found = match vm.heap.get(r) {
                ObjData::List(l) => l.resolve_index(n as i64).map(|i| l.values[i]),
                _ => unreachable!(),
            };
            match found {
                Some(v) => PrimitiveOutcome::Value(v),
                None => PrimitiveOutcome::Error(make_string(vm, "List index out of bounds.")),
            }
        }
        Value::Obj(rr) => {
            let rng = match vm.heap.get(rr) {
                ObjData::Range(rg) => *rg,
                _ => return wrong_type(vm, "a Num or Range"),
            };
            let (values, len) = match vm.heap.get(r) {
                ObjData::List(l) => (l.values.clone(), l.len() as i64),
                _ => unreachable!(),
            };
            let mut from = rng.from as i64;
            let mut to = rng.to as i64;
            if from < 0 {
                from += len;
            }
            if to < 0 {
                to += len;
            }
            let end = if rng.inclusive { to + 1 } else { to };
            if from < 0 || end > len || from > end {
                return PrimitiveOutcome::Error(make_string(vm, "Range out of bounds."));
            }
            let slice = values[from as usize..end as usize].to_vec();
            let cls = vm.classes.list;
            let nr = vm.allocate(Some(cls), ObjData::List(VList { values: slice }));
            vm.pop_temp_root();
            PrimitiveOutcome::Value(Value::Obj(nr))
        }
        _ => wrong_type(vm, "a Num or Range"),
    }
}

fn list_set_sub(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    let Value::Num(n) = args[1] else { return wrong_type(vm, "a Num") };
    let idx = match vm.heap.get(r) {
        ObjData::List(l) => l.resolve_index(n as i64),
        _ => unreachable!(),
    };
    match idx {
        Some(i) => {
            if let ObjData::List(l) = vm.heap.get_mut(r) {
                l.values[i] = args[2];
            }
            PrimitiveOutcome::Value(args[2])
        }
        None => PrimitiveOutcome::Error(make_string(vm, "List index out of bounds.")),
    }
}

fn list_iterate(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    let len = match vm.heap.get(r) {
        ObjData::List(l) => l.len(),
        _ => unreachable!(),
    };
    let next = match args[1] {
        Value::Null => {
            if len == 0 {
                None
            } else {
                Some(0i64)
            }
        }
        Value::Num(n) => {
            let i = n as i64 + 1;
            if (i as usize) < len {
                Some(i)
            } else {
                None
            }
        }
        _ => None,
    };
    match next {
        Some(i) => PrimitiveOutcome::Value(Value::Num(i as f64)),
        None => PrimitiveOutcome::Value(Value::Bool(false)),
    }
}

fn list_iterator_value(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    let Value::Num(n) = args[1] else {
        return PrimitiveOutcome::Error(make_string(vm, "Invalid iterator."));
    };
    let found = match vm.heap.get(r) {
        ObjData::List(l) => l.values.get(n as usize).copied(),
        _ => unreachable!(),
    };
    match found {
        Some(v) => PrimitiveOutcome::Value(v),
        None => PrimitiveOutcome::Error(make_string(vm, "Iterator out of bounds.")),
    }
}

/// Retire temporairement la `VMap` de son slot pendant l'insertion pour que
/// l'égalité des clés (`value::equals`) puisse emprunter `vm.heap` sans
/// conflit avec l'emprunt mutable qui donne accès à la map elle-même. Aucune
/// allocation ne se produit entre le retrait et la restitution, donc le GC ne
/// peut jamais observer la map "vidée" (spec.md §4.D "Invariant").
fn map_set_sub(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    let (key, val) = (args[1], args[2]);
    let h = value::hash(&vm.heap, key);
    let mut map = match vm.heap.get_mut(r) {
        ObjData::Map(m) => std::mem::take(m),
        _ => unreachable!(),
    };
    map.insert(h, key, val, |k| value::equals(&vm.heap, k, key));
    if let ObjData::Map(slot) = vm.heap.get_mut(r) {
        *slot = map;
    }
    PrimitiveOutcome::Value(val)
}

fn map_get_sub(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    let key = args[1];
    let h = value::hash(&vm.heap, key);
    let found = match vm.heap.get(r) {
        ObjData::Map(m) => m.get(h, |k| value::equals(&vm.heap, k, key)),
        _ => unreachable!(),
    };
    match found {
        Some(v) => PrimitiveOutcome::Value(v),
        None => PrimitiveOutcome::Error(make_string(vm, "Key not found.")),
    }
}

fn map_iterate(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    let start = match args[1] {
        Value::Null => 0usize,
        Value::Num(n) => n as usize + 1,
        _ => return PrimitiveOutcome::Error(make_string(vm, "Invalid iterator.")),
    };
    let next = match vm.heap.get(r) {
        ObjData::Map(m) => m.next_occupied_from(start),
        _ => unreachable!(),
    };
    match next {
        Some(i) => PrimitiveOutcome::Value(Value::Num(i as f64)),
        None => PrimitiveOutcome::Value(Value::Bool(false)),
    }
}

/// Matérialise l'entrée `{key, value}` visitée par `for (e in map)` comme une
/// `Instance` de la classe interne `map_entry` (spec.md §4.G, voir
/// `CoreClasses::map_entry`) — champ 0 = `key`, champ 1 = `value`.
fn map_iterator_value(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    let Value::Num(n) = args[1] else {
        return PrimitiveOutcome::Error(make_string(vm, "Invalid iterator."));
    };
    let entry = match vm.heap.get(r) {
        ObjData::Map(m) => m.entry_at(n as usize),
        _ => unreachable!(),
    };
    match entry {
        Some((k, v)) => {
            let cls = vm.classes.map_entry;
            let eref = vm.allocate(Some(cls), ObjData::Instance(Instance { class: cls, fields: vec![k, v] }));
            vm.pop_temp_root();
            PrimitiveOutcome::Value(Value::Obj(eref))
        }
        None => PrimitiveOutcome::Error(make_string(vm, "Iterator out of bounds.")),
    }
}

fn range_iterate(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    let Value::Obj(r) = args[0] else { unreachable!() };
    let rng = match vm.heap.get(r) {
        ObjData::Range(rg) => *rg,
        _ => unreachable!(),
    };
    let next = match args[1] {
        Value::Null => {
            if rng.is_empty() {
                None
            } else {
                Some(rng.from)
            }
        }
        Value::Num(n) => {
            let candidate = n + rng.step();
            if rng.contains(candidate) {
                Some(candidate)
            } else {
                None
            }
        }
        _ => None,
    };
    match next {
        Some(v) => PrimitiveOutcome::Value(Value::Num(v)),
        None => PrimitiveOutcome::Value(Value::Bool(false)),
    }
}

fn range_iterator_value(_vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    PrimitiveOutcome::Value(args[1])
}

const OBJ_EQ: u16 = 0;
const OBJ_NEQ: u16 = 1;
const OBJ_NOT: u16 = 2;
const NUM_ADD: u16 = 3;
const NUM_SUB: u16 = 4;
const NUM_MUL: u16 = 5;
const NUM_DIV: u16 = 6;
const NUM_LT: u16 = 7;
const NUM_LTE: u16 = 8;
const NUM_NEGATE: u16 = 9;
const STR_ADD: u16 = 10;
const STR_GET_SUB: u16 = 11;
const STR_ITERATE: u16 = 12;
const STR_ITERATOR_VALUE: u16 = 13;
const LIST_ADD: u16 = 14;
const LIST_GET_SUB: u16 = 15;
const LIST_SET_SUB: u16 = 16;
const LIST_ITERATE: u16 = 17;
const LIST_ITERATOR_VALUE: u16 = 18;
const MAP_GET_SUB: u16 = 19;
const MAP_SET_SUB: u16 = 20;
const MAP_ITERATE: u16 = 21;
const MAP_ITERATOR_VALUE: u16 = 22;
const RANGE_ITERATE: u16 = 23;
const RANGE_ITERATOR_VALUE: u16 = 24;
const STR_MUL: u16 = 25;
const LIST_MUL: u16 = 26;

/// Construit la table de dispatch des méthodes `PRIMITIVE` (spec.md §4.B),
/// dans le même ordre que les constantes `*_IDX` ci-dessus. Appelée une fois
/// par [`Vm::new`], avant [`bind_core_primitives`].
pub(crate) fn install_primitives() -> Vec<PrimitiveFn> {
    vec![
        obj_eq,
        obj_neq,
        obj_not,
        num_add,
        num_sub,
        num_mul,
        num_div,
        num_lt,
        num_lte,
        num_negate,
        str_add,
        string_get_sub,
        string_iterate,
        string_iterator_value_dispatch,
        list_add,
        list_get_sub,
        list_set_sub,
        list_iterate,
        list_iterator_value,
        map_get_sub,
        map_set_sub,
        map_iterate,
        map_iterator_value,
        range_iterate,
        range_iterator_value,
        str_mul,
        list_mul,
    ]
}

/// `String.iteratorValue(_)` revient à relire l'octet courant: même
/// comportement que `[_]`, juste un nom de méthode distinct.
fn string_iterator_value_dispatch(vm: &mut Vm, args: &[Value]) -> PrimitiveOutcome {
    string_get_sub(vm, args)
}

/// Pose les méthodes `PRIMITIVE` sur les classes `core`, une seule fois à
/// [`Vm::new`]. Ce câblage direct par classe (plutôt que compter sur la
/// copie-vers-le-bas de `bindSuperclass`) est nécessaire ici : ces classes
/// ont été bootstrapées avant que quiconque n'installe de méthode sur
/// `Object`, donc `bind_superclass` n'avait rien à copier à ce moment-là. Les
/// classes utilisateur créées plus tard par `CLASS` héritent normalement de
/// ces méthodes via `bind_superclass`, puisqu'`Object` les porte déjà.
pub(crate) fn bind_core_primitives(
    heap: &mut vitte_core::gc::Heap,
    classes: &vitte_core::value::CoreClasses,
    ops: &OperatorSymbols,
    symbols: &mut vitte_core::symbol::SymbolTable,
) {
    let universal = [classes.object, classes.null, classes.bool_, classes.num, classes.string, classes.list, classes.map, classes.range, classes.fn_, classes.fiber, classes.map_entry];
    for &c in &universal {
        set_method(heap, c, ops.eq, MethodKind::Primitive(OBJ_EQ));
        set_method(heap, c, symbols.ensure(well_known::NEQ), MethodKind::Primitive(OBJ_NEQ));
        set_method(heap, c, ops.not, MethodKind::Primitive(OBJ_NOT));
    }

    set_method(heap, classes.num, ops.plus, MethodKind::Primitive(NUM_ADD));
    set_method(heap, classes.num, ops.minus, MethodKind::Primitive(NUM_SUB));
    set_method(heap, classes.num, ops.star, MethodKind::Primitive(NUM_MUL));
    set_method(heap, classes.num, ops.slash, MethodKind::Primitive(NUM_DIV));
    set_method(heap, classes.num, ops.lt, MethodKind::Primitive(NUM_LT));
    set_method(heap, classes.num, ops.lte, MethodKind::Primitive(NUM_LTE));
    set_method(heap, classes.num, ops.negate, MethodKind::Primitive(NUM_NEGATE));

    set_method(heap, classes.string, ops.plus, MethodKind::Primitive(STR_ADD));
    set_method(heap, classes.string, ops.subscript_get, MethodKind::Primitive(STR_GET_SUB));
    set_method(heap, classes.string, ops.iterate, MethodKind::Primitive(STR_ITERATE));
    set_method(heap, classes.string, ops.iterator_value, MethodKind::Primitive(STR_ITERATOR_VALUE));
    set_method(heap, classes.string, ops.star, MethodKind::Primitive(STR_MUL));

    set_method(heap, classes.list, ops.plus, MethodKind::Primitive(LIST_ADD));
    set_method(heap, classes.list, ops.star, MethodKind::Primitive(LIST_MUL));
    set_method(heap, classes.list, ops.subscript_get, MethodKind::Primitive(LIST_GET_SUB));
    set_method(heap, classes.list, ops.subscript_set, MethodKind::Primitive(LIST_SET_SUB));
    set_method(heap, classes.list, ops.iterate, MethodKind::Primitive(LIST_ITERATE));
    set_method(heap, classes.list, ops.iterator_value, MethodKind::Primitive(LIST_ITERATOR_VALUE));
    set_method(heap, classes.list, ops.add, MethodKind::Primitive(LIST_ADD));

    set_method(heap, classes.map, ops.subscript_get, MethodKind::Primitive(MAP_GET_SUB));
    set_method(heap, classes.map, ops.subscript_set, MethodKind::Primitive(MAP_SET_SUB));
    set_method(heap, classes.map, ops.iterate, MethodKind::Primitive(MAP_ITERATE));
    set_method(heap, classes.map, ops.iterator_value, MethodKind::Primitive(MAP_ITERATOR_VALUE));

    set_method(heap, classes.range, ops.iterate, MethodKind::Primitive(RANGE_ITERATE));
    set_method(heap, classes.range, ops.iterator_value, MethodKind::Primitive(RANGE_ITERATOR_VALUE));

    // `Fn.call(...)` is the one core method that pushes a frame for whatever
    // closure the receiver happens to be, rather than running a fixed body
    // (spec.md §3 "Fn", §4.B `MethodKind::FunctionCall`). The bound `ObjRef`
    // is never read back by `Dispatch::FunctionCall` — `send` recovers the
    // actual closure from the receiver value — so `classes.fn_` is just a
    // well-typed placeholder.
    for argc in 0..=16usize {
        let sig = well_known::call_signature(argc);
        let sym = symbols.ensure(&sig);
        set_method(heap, classes.fn_, sym, MethodKind::FunctionCall(classes.fn_));
    }
}

fn set_method(heap: &mut vitte_core::gc::Heap, class_ref: ObjRef, sym: Symbol, kind: MethodKind) {
    if let ObjData::Class(c) = heap.get_mut(class_ref) {
        c.set_method(sym, kind);
    }
}
