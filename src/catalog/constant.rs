//! `const`: an ignore-its-inputs, emit-one-value-forever source.
//!
//! Grounded on the teacher's `src/objects/functions.rs` `Constant`: a single
//! `Arc<AtomicF32>` property, written with `Ordering::SeqCst` from
//! `set_property` and read the same way from `process` — the simplest
//! possible instance of §4.2's "typically via an atomic scalar" sync path.

use std::{
    any::Any,
    sync::{atomic::Ordering, Arc},
};

use atomic_float::AtomicF32;

use crate::{
    error::PropertyError,
    node::{BlockContext, Event, GraphNode},
    resources::ResourceResolver,
    value::Value,
};

pub struct Constant {
    value: Arc<AtomicF32>,
}

impl Constant {
    pub const TYPE_NAME: &'static str = "const";

    pub fn new() -> Self {
        Constant {
            value: Arc::new(AtomicF32::new(0.0)),
        }
    }
}

impl Default for Constant {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for Constant {
    fn set_property(
        &self,
        key: &str,
        value: Value,
        _resources: &mut dyn ResourceResolver,
    ) -> Result<(), PropertyError> {
        match key {
            "value" => {
                let v = value.as_f32().ok_or(PropertyError::InvalidType)?;
                self.value.store(v, Ordering::SeqCst);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn get_property(&self, key: &str) -> Option<Value> {
        match key {
            "value" => Some(Value::from(self.value.load(Ordering::SeqCst))),
            _ => None,
        }
    }

    fn process(&self, ctx: &mut BlockContext) {
        let v = self.value.load(Ordering::SeqCst);
        ctx.output.fill(v);
    }

    fn process_events(&self, _emit: &mut dyn FnMut(Event)) {}

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn snapshot_properties(&self) -> Value {
        let mut props = crate::value::ValueObject::new();
        props.insert(
            "value".to_string(),
            Value::from(self.value.load(Ordering::SeqCst)),
        );
        Value::Object(props)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
