//! Table associative à adressage ouvert (spec.md §3 "Map", §4.C).
//!
//! Sondage linéaire, tombstones (`entries[i] = None` après effacement mais
//! slot marqué occupé — ici on modélise le tombstone comme `Some(Tombstone)`
//! pour le distinguer d'un slot jamais utilisé), facteur de charge 0.75,
//! capacité minimale 16, croissance/réduction ×2. Le hash d'une `Value` est
//! calculé par l'appelant (`value::hash_value`, qui a accès au tas pour les
//! clés-chaîne) et passé ici: cette table ne connaît que des entiers.

use crate::value::Value;

const MIN_CAPACITY: usize = 16;
const LOAD_FACTOR: f64 = 0.75;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(Value, Value, u32),
}

#[derive(Debug, Clone)]
pub struct VMap {
    slots: Vec<Slot>,
    count: usize,   // occupied, excluding tombstones
    occupied: usize, // occupied + tombstones, used for load-factor growth trigger
}

/// Vue "entrées" utilisée par le tracing GC et l'itération — expose les
/// paires vivantes sous forme de `Option<(Value, Value)>` par slot logique.
pub struct Entries<'a>(&'a VMap);

impl<'a> Entries<'a> {
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + 'a {
        self.0.slots.iter().filter_map(|s| match s {
            Slot::Occupied(k, v, _) => Some((*k, *v)),
            _ => None,
        })
    }
}

impl VMap {
    pub fn new() -> Self {
        Self { slots: vec![Slot::Empty; MIN_CAPACITY], count: 0, occupied: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn entries(&self) -> Entries<'_> {
        Entries(self)
    }

    /// Recherche par hash précalculé + égalité fournie par l'appelant
    /// (l'égalité de `Value` dépend du tas pour les chaînes/ranges).
    pub fn get(&self, hash: u32, mut eq: impl FnMut(Value) -> bool) -> Option<Value> {
        let mask = self.slots.len() - 1;
        let mut idx = (hash as usize) & mask;
        for _ in 0..self.slots.len() {
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied(k, v, h) => {
                    if *h == hash && eq(*k) {
                        return Some(*v);
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
        None
    }

    pub fn insert(&mut self, hash: u32, key: Value, value: Value, mut eq: impl FnMut(Value) -> bool) -> Option<Value> {
        if self.occupied + 1 > (self.slots.len() as f64 * LOAD_FACTOR) as usize {
            self.grow(self.slots.len() * 2);
        }
        let mask = self.slots.len() - 1;
        let mut idx = (hash as usize) & mask;
        let mut first_tombstone: Option<usize> = None;
        loop {
            match &self.slots[idx] {
                Slot::Empty => {
                    let at = first_tombstone.unwrap_or(idx);
                    self.slots[at] = Slot::Occupied(key, value, hash);
                    self.count += 1;
                    if first_tombstone.is_none() {
                        self.occupied += 1;
                    }
                    return None;
                }
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                Slot::Occupied(k, _, h) => {
                    if *h == hash && eq(*k) {
                        let old = if let Slot::Occupied(_, v, _) = self.slots[idx] { v } else { unreachable!() };
                        self.slots[idx] = Slot::Occupied(key, value, hash);
                        return Some(old);
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
    }

    pub fn remove(&mut self, hash: u32, mut eq: impl FnMut(Value) -> bool) -> Option<Value> {
        let mask = self.slots.len() - 1;
        let mut idx = (hash as usize) & mask;
        for _ in 0..self.slots.len() {
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied(k, v, h) => {
                    if *h == hash && eq(*k) {
                        let v = *v;
                        self.slots[idx] = Slot::Tombstone;
                        self.count -= 1;
                        // spec.md §4.C: shrink ×0.5 when count < (cap/2) × 75%.
                        let shrink_at = (self.slots.len() as f64 / 2.0 * LOAD_FACTOR) as usize;
                        if self.count < shrink_at && self.slots.len() > MIN_CAPACITY {
                            let new_cap = (self.slots.len() / 2).max(MIN_CAPACITY);
                            self.grow(new_cap);
                        }
                        return Some(v);
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
        None
    }

    pub fn clear(&mut self) {
        self.slots = vec![Slot::Empty; MIN_CAPACITY];
        self.count = 0;
        self.occupied = 0;
    }

    fn grow(&mut self, new_cap: usize) {
        let new_cap = new_cap.max(MIN_CAPACITY).next_power_of_two();
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; new_cap]);
        self.occupied = 0;
        self.count = 0;
        for slot in old {
            if let Slot::Occupied(k, v, h) = slot {
                self.insert(h, k, v, |_| false);
                // eq never matches on a rehash of distinct live entries, the
                // first `Slot::Empty` found is always the correct insertion
                // point since no duplicates survive in a live table.
            }
        }
    }
}

impl Default for VMap {
    fn default() -> Self {
        Self::new()
    }
}

impl VMap {
    /// Première entrée occupée à partir de `from` (incluse), sautant les
    /// tombstones — support de l'itération résumable par index de slot
    /// (spec.md §4.G "Iteration protocol", Map).
    pub fn next_occupied_from(&self, from: usize) -> Option<usize> {
        self.slots[from.min(self.slots.len())..]
            .iter()
            .position(|s| matches!(s, Slot::Occupied(..)))
            .map(|offset| offset + from)
    }

    pub fn entry_at(&self, idx: usize) -> Option<(Value, Value)> {
        match self.slots.get(idx) {
            Some(Slot::Occupied(k, v, _)) => Some((*k, *v)),
            _ => None,
        }
    }
}
