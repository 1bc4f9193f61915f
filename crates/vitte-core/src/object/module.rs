//! Module chargé : nom, table de variables top-level (spec.md §3 "Module",
//! §4.H "Module loader pipeline").

use ahash::AHashMap;

use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub variables: Vec<Value>,
    pub variable_names: Vec<String>,
    var_index: AHashMap<String, usize>,
    pub attributes: Value,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Vec::new(),
            variable_names: Vec::new(),
            var_index: AHashMap::new(),
            attributes: Value::Null,
        }
    }

    pub fn find_variable(&self, name: &str) -> Option<usize> {
        self.var_index.get(name).copied()
    }

    /// Déclare une variable top-level, ou renvoie son index si déjà connue
    /// (import implicite des variables `core`, spec.md §4.H).
    pub fn declare_variable(&mut self, name: &str, initial: Value) -> usize {
        if let Some(&idx) = self.var_index.get(name) {
            return idx;
        }
        let idx = self.variables.len();
        self.variables.push(initial);
        self.variable_names.push(name.to_string());
        self.var_index.insert(name.to_string(), idx);
        idx
    }
}
