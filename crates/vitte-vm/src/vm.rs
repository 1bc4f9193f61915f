//! vm.rs — Le type [`Vm`] et le bootstrap des classes `core` (spec.md §4.B,
//! §9 "Global VM state": `methodNames` est un champ de l'instance, pas un
//! état process-wide).

use ahash::AHashMap;

use vitte_core::gc::{Heap, ObjRef};
use vitte_core::object::{Class, ObjData};
use vitte_core::symbol::SymbolTable;
use vitte_core::value::{CoreClasses, Value};
use vitte_core::handle::{HandleId, HandleList};

use crate::config::{ForeignClassMethods, Host, VmConfig};
use crate::dispatch::{OperatorSymbols, PrimitiveFn};
use crate::module::Compiler;

/// Machine virtuelle Vitte : tas, symboles, classes `core`, modules chargés,
/// handles hôte et fiber courant.
///
/// Toutes les pièces mobiles du spec vivent ici plutôt que dans un état
/// "global" — voir la design note §9 "'Global' VM state".
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) symbols: SymbolTable,
    pub(crate) classes: CoreClasses,
    pub(crate) modules: AHashMap<String, ObjRef>,
    pub(crate) handles: HandleList,
    /// Racines temporaires (spec.md §4.D "Roots", §9 invariant sur les
    /// constructeurs d'objets) : capacité bornée par [`VmConfig::temp_root_cap`].
    pub(crate) temp_roots: Vec<ObjRef>,
    /// Fiber en cours d'exécution, `None` hors interprétation.
    pub(crate) fiber: Option<ObjRef>,
    /// `vm->lastModule` (spec.md §4.G "RETURN").
    pub(crate) last_module: Option<ObjRef>,
    /// Module `null` du spec (§4.H "a fresh module implicitly imports every
    /// variable from the core module"): toujours présent, vide tant
    /// qu'aucune bibliothèque `core` n'y déclare de variable.
    pub(crate) core_module: ObjRef,
    pub(crate) config: VmConfig,
    pub(crate) host: Box<dyn Host>,
    pub(crate) compiler: Option<Box<dyn Compiler>>,
    /// `true` tant qu'une frame d'interprétation est sur la pile native Rust ;
    /// sert à refuser la réentrance de [`crate::api::Slots::call`] (spec.md §4.I).
    pub(crate) interpreting: bool,
    pub(crate) ops: OperatorSymbols,
    /// Table des méthodes `PRIMITIVE` installées par le VM (spec.md §4.B) ;
    /// couvre l'arithmétique/comparaisons `Num` et les protocoles
    /// d'itération/subscript — voir `crate::interpreter`.
    pub(crate) primitives: Vec<PrimitiveFn>,
    /// Méthodes `FOREIGN` liées par l'hôte (spec.md §6 `bindForeignMethod`).
    pub(crate) foreign_methods: Vec<crate::config::ForeignMethodFn>,
    /// Fenêtre de slots active pour l'API d'embarquement (spec.md §4.I),
    /// `None` hors d'un appel étranger ou d'un `Vm::call`.
    pub(crate) api_window: Option<crate::api::ApiWindow>,
    /// Paires `{allocate, finalize}` liées par l'hôte à `ENDCLASS` pour les
    /// classes étrangères (spec.md §4.B "Foreign classes") ; tenues à part de
    /// `Class` elle-même, qui ne connaît pas le `Host`.
    pub(crate) foreign_classes: AHashMap<ObjRef, ForeignClassMethods>,
}

impl Vm {
    pub fn new(config: VmConfig, host: Box<dyn Host>) -> Self {
        let mut heap = Heap::new(config.heap_policy());
        let classes = bootstrap_core_classes(&mut heap);
        let core_module = heap.allocate(None, ObjData::Module(vitte_core::object::Module::new("")));
        let mut symbols = SymbolTable::new();
        let ops = OperatorSymbols::install(&mut symbols);
        let primitives = crate::interpreter::install_primitives();
        crate::interpreter::bind_core_primitives(&mut heap, &classes, &ops, &mut symbols);
        Self {
            heap,
            symbols,
            classes,
            modules: AHashMap::new(),
            handles: HandleList::new(),
            temp_roots: Vec::with_capacity(config.temp_root_cap),
            fiber: None,
            last_module: None,
            core_module,
            config,
            host,
            compiler: None,
            interpreting: false,
            ops,
            primitives,
            foreign_methods: Vec::new(),
            api_window: None,
            foreign_classes: AHashMap::new(),
        }
    }

    pub fn with_compiler(mut self, compiler: Box<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn classes(&self) -> &CoreClasses {
        &self.classes
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Module déjà enregistré sous ce nom (spec.md §4.H): [`crate::module::Vm::load_and_compile`]
    /// insère l'entrée avant d'appeler [`crate::module::Compiler::compile`], donc
    /// un compilateur externe peut toujours retrouver ici le `Module` que ses
    /// `Fn` doivent référencer (`FnProto::module`, lu par `GETGLOBAL`/`SETGLOBAL`/`IMPORTVAR`).
    pub fn module_by_name(&self, name: &str) -> Option<ObjRef> {
        self.modules.get(name).copied()
    }

    /// Alloue une chaîne au tas et renvoie sa référence, déjà dépilée des
    /// racines temporaires (spec.md §6 "compile ... builds heap objects
    /// directly"): un compilateur externe qui peuple un pool de constantes
    /// n'a pas accès à [`Vm::allocate`] (`pub(crate)`), donc cette méthode et
    /// [`Vm::alloc_fn`] sont la frontière publique qu'il utilise à la place.
    pub fn alloc_string(&mut self, s: &str) -> ObjRef {
        let cls = self.classes.string;
        let r = self.allocate(Some(cls), ObjData::String(vitte_core::object::VString::new(s)));
        self.pop_temp_root();
        r
    }

    /// Alloue un prototype de fonction compilé (voir [`Vm::alloc_string`]).
    pub fn alloc_fn(&mut self, proto: vitte_core::object::FnProto) -> ObjRef {
        let r = self.allocate(None, ObjData::Fn(proto));
        self.pop_temp_root();
        r
    }

    /// Alloue une liste au tas à partir de valeurs déjà résolues (voir
    /// [`Vm::alloc_string`]) : sert un chargeur de `.vitbc` à matérialiser
    /// une constante `ConstValue::List` imbriquée (spec.md §10.G
    /// "constant-pool copy-on-load") sans passer par l'interpréteur.
    pub fn alloc_list(&mut self, values: Vec<Value>) -> ObjRef {
        let cls = self.classes.list;
        let r = self.allocate(Some(cls), ObjData::List(vitte_core::object::VList { values }));
        self.pop_temp_root();
        r
    }

    /// Point de passage commun à toute allocation qui peut déclencher le GC
    /// (spec.md §4.D "Policy" + "Invariant"). `class` doit déjà être une
    /// racine atteignable ; le nouvel objet est poussé en racine temporaire
    /// avant de rendre la main à l'appelant, qui doit la dépiler via
    /// [`Vm::pop_temp_root`] une fois le pointeur rangé dans un slot stable.
    pub(crate) fn allocate(&mut self, class: Option<ObjRef>, data: ObjData) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        let r = self.heap.allocate(class, data);
        self.push_temp_root(r);
        r
    }

    pub(crate) fn push_temp_root(&mut self, r: ObjRef) {
        debug_assert!(
            self.temp_roots.len() < self.config.temp_root_cap,
            "temp root stack overflow — an allocator forgot to pop its root"
        );
        self.temp_roots.push(r);
    }

    pub(crate) fn pop_temp_root(&mut self) -> ObjRef {
        self.temp_roots.pop().expect("pop_temp_root on empty stack")
    }

    /// Exécute un cycle complet de mark-sweep contre toutes les racines
    /// connues du VM (spec.md §4.D "Roots").
    pub(crate) fn collect_garbage(&mut self) {
        let mut roots: Vec<ObjRef> = Vec::new();
        for (_, &m) in self.modules.iter() {
            roots.push(m);
        }
        roots.extend(self.temp_roots.iter().copied());
        for v in self.handles.roots() {
            if let Value::Obj(r) = v {
                roots.push(r);
            }
        }
        if let Some(f) = self.fiber {
            roots.push(f);
        }
        if let Some(m) = self.last_module {
            roots.push(m);
        }
        roots.push(self.core_module);
        let c = &self.classes;
        roots.extend([
            c.object, c.class, c.null, c.bool_, c.num, c.string, c.list, c.map, c.range, c.fn_, c.fiber,
            c.map_entry,
        ]);

        #[cfg(feature = "tracing")]
        let before = self.heap.bytes_allocated();

        self.heap.collect(roots);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            collections = self.heap.collections,
            bytes_before = before,
            bytes_after = self.heap.bytes_allocated(),
            next_gc = self.heap.next_gc(),
            "gc cycle"
        );
    }

    pub fn make_handle(&mut self, v: Value) -> HandleId {
        self.handles.create(v)
    }

    pub fn release_handle(&mut self, id: HandleId) {
        self.handles.release(id);
    }

    pub fn handle_value(&self, id: HandleId) -> Value {
        self.handles.get(id)
    }
}

/// Construit les classes `core` minimales dont l'interpréteur a besoin pour
/// `getClass`/dispatch (spec.md §3 "Class", §4.B). Les méthodes concrètes de
/// ces classes (hors protocoles `iterate`/`[_]`/opérateurs) appartiennent au
/// collaborateur bibliothèque et ne sont pas installées ici.
fn bootstrap_core_classes(heap: &mut Heap) -> CoreClasses {
    // Object <- Class, avec le nœud auto-référentiel classique du bootstrap
    // Wren (spec.md §9 "Cycles ... handled by the tracing GC").
    let object = heap.allocate(None, ObjData::Class(Class::new("Object", 0)));
    let class_class = heap.allocate(None, ObjData::Class(Class::new("Class", 0)));
    heap.set_class_of(class_class, class_class);

    let object_metaclass = heap.allocate(Some(class_class), ObjData::Class(Class::new("Object metaclass", 0)));
    heap.set_class_of(object, object_metaclass);
    bind_superclass(heap, object_metaclass, class_class);
    bind_superclass(heap, class_class, object);

    let null = new_core_class(heap, "Null", object, class_class);
    let bool_ = new_core_class(heap, "Bool", object, class_class);
    let num = new_core_class(heap, "Num", object, class_class);
    let string = new_core_class(heap, "String", object, class_class);
    let list = new_core_class(heap, "List", object, class_class);
    let map = new_core_class(heap, "Map", object, class_class);
    let range = new_core_class(heap, "Range", object, class_class);
    let fn_ = new_core_class(heap, "Fn", object, class_class);
    let fiber = new_core_class(heap, "Fiber", object, class_class);
    let map_entry = new_core_class(heap, "MapEntry", object, class_class);

    CoreClasses { object, class: class_class, null, bool_, num, string, list, map, range, fn_, fiber, map_entry }
}

/// Copie-vers-le-bas des méthodes héritées (spec.md §4.B "bindSuperclass"):
/// clone la super-classe (déjà construite, donc petite et rare — ce chemin
/// ne s'exécute qu'au bootstrap, jamais dans la boucle chaude) pour
/// satisfaire l'emprunt disjoint sans `unsafe`.
fn bind_superclass(heap: &mut Heap, class: ObjRef, superclass: ObjRef) {
    let super_snapshot = match heap.get(superclass) {
        ObjData::Class(c) => c.clone(),
        other => panic!("bind_superclass: {other:?} is not a Class"),
    };
    match heap.get_mut(class) {
        ObjData::Class(c) => c.bind_superclass(&super_snapshot, superclass),
        other => panic!("bind_superclass: {other:?} is not a Class"),
    }
}

fn new_core_class(heap: &mut Heap, name: &str, object: ObjRef, class_class: ObjRef) -> ObjRef {
    let metaclass = heap.allocate(Some(class_class), ObjData::Class(Class::new(format!("{name} metaclass"), 0)));
    bind_superclass(heap, metaclass, class_class);
    let r = heap.allocate(Some(metaclass), ObjData::Class(Class::new(name, 0)));
    bind_superclass(heap, r, object);
    r
}
