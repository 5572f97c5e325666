//! `sample`: reads back an immutable named shared-resource buffer (§2.5),
//! looping once it reaches the end. Exercises the "resolve at
//! `set_property` time, hold the `Arc`, never touch the map again" path
//! described in §4.4's Open Question resolution.

use std::{
    any::Any,
    cell::UnsafeCell,
    sync::{atomic::AtomicUsize, atomic::Ordering, Arc},
};

use crate::{
    error::PropertyError,
    node::{BlockContext, Event, GraphNode},
    resources::{ResourceResolver, SampleBuffer},
    value::Value,
};

pub struct Sample {
    buffer: UnsafeCell<Option<Arc<SampleBuffer>>>,
    position: AtomicUsize,
}

// Safety: `buffer` is written only from `set_property` (control thread) and
// read only from `process` (audio thread); see `TapOut`'s identical note on
// why the two never alias in practice.
unsafe impl Sync for Sample {}

impl Sample {
    pub const TYPE_NAME: &'static str = "sample";

    pub fn new() -> Self {
        Sample {
            buffer: UnsafeCell::new(None),
            position: AtomicUsize::new(0),
        }
    }
}

impl Default for Sample {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for Sample {
    fn set_property(
        &self,
        key: &str,
        value: Value,
        resources: &mut dyn ResourceResolver,
    ) -> Result<(), PropertyError> {
        match key {
            "name" => {
                let name = value.as_str().ok_or(PropertyError::InvalidType)?;
                let buffer = resources.get_immutable(name);
                unsafe {
                    *self.buffer.get() = buffer;
                }
                self.position.store(0, Ordering::Relaxed);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn get_property(&self, _key: &str) -> Option<Value> {
        None
    }

    fn process(&self, ctx: &mut BlockContext) {
        let buffer = unsafe { &*self.buffer.get() };
        let Some(buffer) = buffer else {
            ctx.fill_silence();
            return;
        };
        if buffer.is_empty() {
            ctx.fill_silence();
            return;
        }
        let mut pos = self.position.load(Ordering::Relaxed);
        for out in ctx.output.iter_mut() {
            *out = buffer.sample_f32(pos);
            pos = (pos + 1) % buffer.len();
        }
        self.position.store(pos, Ordering::Relaxed);
    }

    fn process_events(&self, _emit: &mut dyn FnMut(Event)) {}

    fn reset(&self) {
        self.position.store(0, Ordering::Relaxed);
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
