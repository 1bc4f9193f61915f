//! chunk.rs — Format binaire persisté d'un module compilé (spec.md §4.H,
//! SPEC_FULL.md §10.B).
//!
//! Même schéma que l'ancien format empilé du crate (en-tête magique +
//! version + hash FNV-1a 64 bits, sérialisation `bincode` à encodage fixe
//! little-endian), réaligné sur le pool de constantes et les instructions
//! registre plutôt que sur une pile d'opérandes.

use serde::{Deserialize, Serialize};

use crate::bytecode::instr::Instr;

pub const MODULE_MAGIC: [u8; 4] = *b"VITR";
pub const MODULE_VERSION: u16 = 1;

/// Valeur de constante telle que stockée dans le binaire (la `Value`
/// d'exécution vit sur le tas ; ceci est sa forme sérialisable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    /// Liste littérale imbriquée (copiée sur le tas à chaque `LOADK`,
    /// spec.md §10.G "LOADK constant-pool-copy-on-load").
    List(Vec<ConstValue>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstPool {
    values: Vec<ConstValue>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn push(&mut self, v: ConstValue) -> u32 {
        let idx = self.values.len() as u32;
        self.values.push(v);
        idx
    }

    pub fn get(&self, idx: u32) -> Option<&ConstValue> {
        self.values.get(idx as usize)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkHeader {
    magic: [u8; 4],
    version: u16,
    hash_fnv1a_64: u64,
}

/// Prototype de fonction top-level d'un module, tel que produit par un
/// compilateur et chargé par [`crate::bytecode::chunk::CompiledModule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledFn {
    pub arity: u8,
    pub max_slots: u8,
    pub code: Vec<Instr>,
    pub lines: Vec<u32>,
    pub debug_name: String,
}

/// Un module compilé prêt à être chargé par la VM : son nom, son pool de
/// constantes et le corps top-level à exécuter à l'import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledModule {
    header: ChunkHeader,
    pub name: String,
    pub consts: ConstPool,
    pub top_level: CompiledFn,
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkLoadError {
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("mauvais magic: {0:?}")]
    BadMagic([u8; 4]),
    #[error("version incompatible: attendu {expected}, trouvé {found}")]
    BadVersion { expected: u16, found: u16 },
    #[error("hash invalide: attendu {expected:x}, calculé {found:x}")]
    BadHash { expected: u64, found: u64 },
}

struct Fnv1a64(u64);
impl Fnv1a64 {
    fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    fn finish(&self) -> u64 {
        self.0
    }
}

impl CompiledModule {
    pub fn new(name: impl Into<String>, consts: ConstPool, top_level: CompiledFn) -> Self {
        Self {
            header: ChunkHeader { magic: MODULE_MAGIC, version: MODULE_VERSION, hash_fnv1a_64: 0 },
            name: name.into(),
            consts,
            top_level,
        }
    }

    fn compute_hash(&self) -> u64 {
        let mut hasher = Fnv1a64::new();
        let mut feed = |bytes: &[u8]| hasher.write(bytes);
        feed(bincode::serialize(&self.name).expect("serialize ok").as_slice());
        feed(bincode::serialize(&self.consts.values).expect("serialize ok").as_slice());
        feed(bincode::serialize(&self.top_level).expect("serialize ok").as_slice());
        hasher.finish()
    }

    fn bincode_options() -> impl bincode::Options {
        use bincode::Options;
        bincode::DefaultOptions::new().with_fixint_encoding().with_little_endian()
    }

    pub fn to_bytes(&mut self) -> Vec<u8> {
        self.header.hash_fnv1a_64 = self.compute_hash();
        Self::bincode_options().serialize(self).expect("serialize module")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChunkLoadError> {
        let module: Self = Self::bincode_options().deserialize(bytes)?;
        if module.header.magic != MODULE_MAGIC {
            return Err(ChunkLoadError::BadMagic(module.header.magic));
        }
        if module.header.version != MODULE_VERSION {
            return Err(ChunkLoadError::BadVersion { expected: MODULE_VERSION, found: module.header.version });
        }
        let expected = module.header.hash_fnv1a_64;
        let found = module.compute_hash();
        if expected != found {
            return Err(ChunkLoadError::BadHash { expected, found });
        }
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompiledModule {
        let mut consts = ConstPool::new();
        let k = consts.push(ConstValue::Num(42.0));
        let top_level = CompiledFn {
            arity: 0,
            max_slots: 1,
            code: vec![Instr::LoadK { a: 0, bx: k }, Instr::Return { a: 0 }],
            lines: vec![1, 1],
            debug_name: "<script>".into(),
        };
        CompiledModule::new("main", consts, top_level)
    }

    #[test]
    fn roundtrip_ok() {
        let mut m = sample();
        let bytes = m.to_bytes();
        let back = CompiledModule::from_bytes(&bytes).expect("roundtrip");
        assert_eq!(back.name, "main");
        assert_eq!(back.top_level.code.len(), 2);
    }

    #[test]
    fn corrupted_bytes_fail_hash_check() {
        let mut m = sample();
        let mut bytes = m.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = CompiledModule::from_bytes(&bytes);
        assert!(err.is_err());
    }
}
