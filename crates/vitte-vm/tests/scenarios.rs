//! End-to-end scenarios, driven through the real `Vm::interpret` entry point
//! and the `vitte-compiler` text assembler (spec.md §8 "Concrete scenarios").
//!
//! Of the six scenarios, three are reachable through pure assembly-text
//! programs and are exercised here:
//!   1. Arithmetic + user-defined operator overload (`plus(_)` resolving to
//!      a `Block` method rather than the `Num` primitive).
//!   5. Module imports (`IMPORTMODULE`/`IMPORTVAR` against a host-supplied
//!      module).
//!   6. GC correctness under allocation pressure (a tight heap budget forces
//!      several mark-sweep cycles mid-loop; a wrong answer or a crash both
//!      mean the collector kept a live object's fields from moving/changing
//!      correctly or freed something still reachable).
//!
//! The other three are out of reach for an assembly-text fixture and are not
//! attempted here:
//!   2. Closures/upvalues — `AssemblingCompiler` never emits a `CLOSURE` that
//!      captures a variable (see the doc comment on `vitte-compiler`'s
//!      `assemble.rs`); exercising `GETUPVAL`/`SETUPVAL`/`CLOSE` faithfully
//!      needs either a grammar extension or a white-box test that builds
//!      `FnProto`/`ProtoUpvalue` values directly.
//!   3. Map iteration — there is no bytecode path to construct a `Map` value
//!      from assembly text (only `CLASS`/`CONSTRUCT` for user instances and
//!      `ADDELEM`/`ADDELEMK` for lists); a `Map` fixture needs a Rust-level
//!      `Vm::alloc_*` helper this crate doesn't expose yet.
//!   4. `Fiber.try`/`call`/`transfer` — these are core-library methods
//!      (spec.md §1 "Non-goals"); only their VM-side mechanics are in scope,
//!      and there is no foreign binding here to drive them from a script.

use vitte_compiler::AssemblingCompiler;
use vitte_vm::config::DefaultHost;
use vitte_vm::{ErrorKind, Host, InterpretResult, Value, Vm, VmConfig};

fn new_vm() -> Vm {
    Vm::new(VmConfig::default(), Box::new(DefaultHost)).with_compiler(Box::new(AssemblingCompiler::new()))
}

fn num_global(vm: &Vm, module_name: &str, var: &str) -> f64 {
    let module_ref = vm.module_by_name(module_name).expect("module registered after a successful interpret");
    match vm.module_variable(module_ref, var) {
        Some(Value::Num(n)) => n,
        other => panic!("expected a Num global `{var}`, found {other:?}"),
    }
}

/// Scenario 1 (spec.md §8): a user class overloads `+(_)`; `CALLK` must
/// dispatch to its `Block` method rather than the `Num` primitive, and the
/// method body itself exercises the primitive `ADD` on the unwrapped fields.
#[test]
fn scenario_1_operator_overload_dispatches_to_user_method() {
    let mut vm = new_vm();
    let src = concat!(
        ".fn plus(1) slots=4\n",
        "    GETFIELD r2, r0, 0\n",
        "    GETFIELD r3, r1, 0\n",
        "    ADD r2, r2, r3\n",
        "    RETURN r2\n",
        ".endfn\n",
        ".fn main(0) slots=7\n",
        "    CLASS r0, \"Vec2\", 1\n",
        "    ENDCLASS r0\n",
        "    CLOSURE r1, plus\n",
        "    METHOD r0, \"plus(_)\", r1\n",
        "    MOVE r2, r0\n",
        "    CONSTRUCT r2\n",
        "    LOADK r4, 3\n",
        "    SETFIELD r2, 0, r4\n",
        "    MOVE r3, r0\n",
        "    CONSTRUCT r3\n",
        "    LOADK r4, 4\n",
        "    SETFIELD r3, 0, r4\n",
        "    CALLK r2, 2, \"plus(_)\", r6\n",
        "    SETGLOBAL \"result\", r6\n",
        "    LOADNULL r0\n",
        "    RETURN r0\n",
        ".endfn\n",
    );

    let outcome = vm.interpret("overload_mod", src);
    assert!(matches!(outcome, InterpretResult::Success));
    assert_eq!(num_global(&vm, "overload_mod", "result"), 7.0);
}

/// Scenario 5 (spec.md §8, §4.H): importing a module copies its top-level
/// variables in by value; `IMPORTMODULE` runs the imported body once (here,
/// via a test-local [`Host::load_module`]), then `IMPORTVAR` reads a name out
/// of it.
struct ImportHost;

impl Host for ImportHost {
    fn load_module(&mut self, name: &str) -> Option<String> {
        if name == "mathutil" {
            Some(
                concat!(
                    ".fn main(0) slots=1\n",
                    "    LOADK r0, 41\n",
                    "    SETGLOBAL \"answer\", r0\n",
                    "    LOADNULL r0\n",
                    "    RETURN r0\n",
                    ".endfn\n",
                )
                .to_string(),
            )
        } else {
            None
        }
    }

    fn error(&mut self, kind: ErrorKind, module: Option<&str>, line: u32, msg: &str) {
        panic!("unexpected host error {kind:?} in {module:?}:{line}: {msg}");
    }
}

#[test]
fn scenario_5_import_module_copies_variable_by_value() {
    let mut vm = Vm::new(VmConfig::default(), Box::new(ImportHost)).with_compiler(Box::new(AssemblingCompiler::new()));
    let src = concat!(
        ".fn main(0) slots=2\n",
        "    IMPORTMODULE r0, \"mathutil\"\n",
        "    IMPORTVAR r1, r0, \"answer\"\n",
        "    SETGLOBAL \"imported\", r1\n",
        "    LOADNULL r0\n",
        "    RETURN r0\n",
        ".endfn\n",
    );

    let outcome = vm.interpret("importer_mod", src);
    assert!(matches!(outcome, InterpretResult::Success));
    assert_eq!(num_global(&vm, "importer_mod", "imported"), 41.0);
    // The imported module is also registered in its own right, independent
    // of the name its variable was copied under in the importer.
    assert_eq!(num_global(&vm, "mathutil", "answer"), 41.0);
}

/// Scenario 6 (spec.md §8): a heap budget small enough to force several
/// mark-sweep cycles mid-loop. Each iteration allocates a fresh `Node`
/// instance that promptly becomes garbage (only its field value survives,
/// folded into the running sum sitting in a register); a collector that
/// frees a still-reachable accumulator or a live loop counter, or that
/// mis-relocates a root during growth, throws this off immediately.
#[test]
fn scenario_6_gc_survives_allocation_pressure() {
    let config = VmConfig { initial_heap_size: 4096, min_heap_size: 4096, heap_growth_percent: 25, ..VmConfig::default() };
    let mut vm = Vm::new(config, Box::new(DefaultHost)).with_compiler(Box::new(AssemblingCompiler::new()));
    let src = concat!(
        ".fn main(0) slots=7\n",
        "    CLASS r0, \"Node\", 1\n",
        "    ENDCLASS r0\n",
        "    LOADK r1, 0\n",
        "    LOADK r3, 0\n",
        "loop:\n",
        "    LTK r4, r1, 2000\n",
        "    TEST r4, @done\n",
        "    MOVE r5, r0\n",
        "    CONSTRUCT r5\n",
        "    SETFIELD r5, 0, r1\n",
        "    GETFIELD r6, r5, 0\n",
        "    ADD r3, r3, r6\n",
        "    ADDK r1, r1, 1\n",
        "    JUMP @loop\n",
        "done:\n",
        "    SETGLOBAL \"sum\", r3\n",
        "    LOADNULL r0\n",
        "    RETURN r0\n",
        ".endfn\n",
    );

    let outcome = vm.interpret("gc_stress_mod", src);
    assert!(matches!(outcome, InterpretResult::Success));
    // sum of 0..2000
    assert_eq!(num_global(&vm, "gc_stress_mod", "sum"), 1_999_000.0);
}
