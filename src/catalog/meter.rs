//! `meter`: an event-emitting level meter, passing audio through unchanged
//! while publishing one RMS reading per block to the control thread.
//!
//! Grounded on §4.2's "typically via ... an SPSC queue" sync path for
//! anything too large/frequent for a single atomic: one [`crate::spsc`]
//! queue per meter carries per-block levels from `process` (audio thread,
//! the producer) to `process_events` (control thread, the consumer).

use std::{any::Any, cell::UnsafeCell};

use parking_lot::Mutex;

use crate::{
    error::PropertyError,
    node::{BlockContext, Event, GraphNode},
    resources::ResourceResolver,
    spsc::{self, Consumer, Producer},
    value::Value,
};

const LEVEL_QUEUE_CAPACITY: usize = 64;

pub struct Meter {
    producer: UnsafeCell<Producer<f32>>,
    consumer: Mutex<Consumer<f32>>,
    name: Mutex<Option<String>>,
}

// Safety: `producer` has exactly one writer, the audio thread inside
// `process`, matching the SPSC contract's single-producer requirement;
// `consumer` and `name` are guarded by `parking_lot::Mutex` and touched only
// from the (single) control thread, so that locking never competes with the
// audio thread.
unsafe impl Sync for Meter {}

impl Meter {
    pub const TYPE_NAME: &'static str = "meter";

    pub fn new() -> Self {
        let (producer, consumer) = spsc::channel(LEVEL_QUEUE_CAPACITY);
        Meter {
            producer: UnsafeCell::new(producer),
            consumer: Mutex::new(consumer),
            name: Mutex::new(None),
        }
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for Meter {
    fn set_property(
        &self,
        key: &str,
        value: Value,
        _resources: &mut dyn ResourceResolver,
    ) -> Result<(), PropertyError> {
        match key {
            "name" => {
                let name = value.as_str().ok_or(PropertyError::InvalidType)?;
                *self.name.lock() = Some(name.to_string());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn get_property(&self, key: &str) -> Option<Value> {
        match key {
            "name" => self.name.lock().clone().map(Value::from),
            _ => None,
        }
    }

    fn process(&self, ctx: &mut BlockContext) {
        match ctx.inputs.first() {
            Some(input) => {
                let n = ctx.output.len().min(input.len());
                ctx.output[..n].copy_from_slice(&input[..n]);
                if n < ctx.output.len() {
                    ctx.output[n..].fill(0.0);
                }
            }
            None => ctx.fill_silence(),
        }
        let sum_sq: f32 = ctx.output.iter().map(|s| s * s).sum();
        let rms = if ctx.output.is_empty() {
            0.0
        } else {
            (sum_sq / ctx.output.len() as f32).sqrt()
        };
        // Safety: this is the one producer, called only from `process`.
        let producer = unsafe { &mut *self.producer.get() };
        // A full queue just means the control thread hasn't drained recent
        // readings yet; dropping the newest one is an acceptable analyzer
        // degrade, not a correctness issue (§5 allows "no side effect" push
        // failures).
        let _ = producer.push(rms);
    }

    fn process_events(&self, emit: &mut dyn FnMut(Event)) {
        let levels = self.consumer.lock().drain();
        let source = self
            .name
            .lock()
            .clone()
            .map(Value::from)
            .unwrap_or(Value::Undefined);
        for level in levels {
            let mut payload = crate::value::ValueObject::new();
            payload.insert("source".to_string(), source.clone());
            payload.insert("level".to_string(), Value::from(level));
            emit(Event::new("meter", Value::Object(payload)));
        }
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
