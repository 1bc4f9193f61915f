//! api.rs — Embedding slot API (spec.md §4.I).
//!
//! The host never sees an [`vitte_core::gc::ObjRef`] or a raw fiber stack
//! index: it addresses a contiguous window `[base, base+len)` of the
//! active fiber's stack as a flat array of "slots". The same window
//! mechanism backs two distinct callers:
//! - the interpreter, right before invoking a `FOREIGN` method (spec.md
//!   §4.B), so the native function can read its arguments and write its
//!   result through `Vm::slot_get`/`Vm::slot_set`;
//! - the host, between [`Vm::ensure_slots`] and [`Vm::call`], to prepare
//!   and read back a call through a handle (spec.md §4.I `makeCallHandle`).

use vitte_core::gc::ObjRef;
use vitte_core::object::{CallFrame, Closure, FnProto, ObjData};
use vitte_core::value::Value;

use crate::error::{InterpretResult, VmError, VmResult};
use crate::vm::Vm;

/// `(fiber, base, len)` — the currently active slot window, if any.
pub(crate) type ApiWindow = (ObjRef, usize, usize);

impl Vm {
    /// Number of slots currently addressable (0 if no window is active).
    pub fn slot_count(&self) -> usize {
        self.api_window.map(|(_, _, len)| len).unwrap_or(0)
    }

    /// `ensureSlots(n)` (spec.md §4.I): grows the fiber stack if needed and
    /// widens the active window to at least `n` slots.
    pub fn ensure_slots(&mut self, n: usize) {
        let Some((fiber, base, len)) = self.api_window else {
            return;
        };
        if n > len {
            self.ensure_stack(fiber, base + n);
            self.api_window = Some((fiber, base, n));
        }
    }

    /// Reads slot `i` of the active window. `Value::Null` if `i` is out of
    /// range (defensive: a host bug here should not panic the embedder).
    pub fn slot_get(&self, i: usize) -> Value {
        let Some((fiber, base, len)) = self.api_window else {
            return Value::Null;
        };
        if i >= len {
            return Value::Null;
        }
        self.fiber(fiber).stack[base + i]
    }

    /// Writes slot `i` of the active window. No-op if `i` is out of range
    /// or no window is active.
    pub fn slot_set(&mut self, i: usize, v: Value) {
        let Some((fiber, base, len)) = self.api_window else {
            return;
        };
        if i >= len {
            return;
        }
        self.fiber_mut(fiber).stack[base + i] = v;
    }

    /// `abortFiber(slot)` (spec.md §7): a foreign method signals failure by
    /// setting the current fiber's `error` to the value already in `slot`.
    pub fn abort_fiber(&mut self, slot: usize) {
        let v = self.slot_get(slot);
        if let Some((fiber, _, _)) = self.api_window {
            self.fiber_mut(fiber).error = v;
        }
    }

    /// Opens a slot window of `len` values at the top of `fiber`'s stack
    /// and returns the previous window so it can be restored afterwards.
    pub(crate) fn push_api_window(&mut self, fiber: ObjRef, base: usize, len: usize) -> Option<ApiWindow> {
        let prev = self.api_window;
        self.api_window = Some((fiber, base, len));
        prev
    }

    pub(crate) fn pop_api_window(&mut self, prev: Option<ApiWindow>) {
        self.api_window = prev;
    }

    /// `makeCallHandle(signature)` (spec.md §4.I): builds a two-instruction
    /// stub `Fn` — `CALLK 0 numParams method; RETURN 0` — and returns a
    /// [`vitte_core::handle::HandleId`] owning its closure. `call(handle)`
    /// places it as a new frame on the current fiber and runs the
    /// interpreter, requiring no interpretation already in progress.
    pub fn make_call_handle(&mut self, signature: &str) -> vitte_core::handle::HandleId {
        let argc = signature.matches('_').count() as u16;
        let symbol = self.symbols.ensure(signature);
        let mut proto = FnProto::new(format!("<call {signature}>"), argc as u8 + 1);
        proto.max_slots = argc + 1;
        proto.code = vec![
            vitte_core::bytecode::Instr::CallK { a: 0, argc: argc + 1, symbol, dest: 0 },
            vitte_core::bytecode::Instr::Return { a: 0 },
        ];
        proto.lines = vec![0, 0];
        let fn_ref = self.allocate(None, ObjData::Fn(proto));
        let closure_ref = self.allocate(None, ObjData::Closure(Closure::new(fn_ref, Vec::new())));
        self.pop_temp_root();
        self.pop_temp_root();
        self.make_handle(Value::Obj(closure_ref))
    }

    /// `call(handle)` (spec.md §4.I): requires `numFrames == 0` on the
    /// active fiber (no re-entrance from foreign methods), places the
    /// handle's stub closure as a new frame with the current slot window as
    /// its argument registers, and runs the interpreter to completion.
    pub fn call(&mut self, handle: vitte_core::handle::HandleId) -> VmResult<InterpretResult> {
        if self.interpreting {
            return Err(VmError::Reentrant);
        }
        let Value::Obj(closure_ref) = self.handle_value(handle) else {
            return Err(VmError::Reentrant);
        };
        let Some((fiber, base, _)) = self.api_window else {
            return Err(VmError::Reentrant);
        };
        if !self.fiber(fiber).frames.is_empty() {
            return Err(VmError::Reentrant);
        }
        self.fiber_mut(fiber).frames.push(CallFrame { closure: closure_ref, ip: 0, stack_base: base, return_reg: None });
        Ok(self.run_fiber(fiber))
    }
}
