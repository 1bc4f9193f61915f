//! Instance d'une classe Vitte ordinaire (spec.md §3 "Instance").

use crate::gc::ObjRef;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Instance {
    pub class: ObjRef,
    pub fields: Vec<Value>,
}

impl Instance {
    pub fn new(class: ObjRef, num_fields: usize) -> Self {
        Self { class, fields: vec![Value::Null; num_fields] }
    }
}
