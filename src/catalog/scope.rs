//! `scope`: a size-validated analyzer tap (§8 scenario 4) built over this
//! crate's own [`crate::ring_buffer::ChannelRingBuffer`] (§2.2) rather than
//! pulling in an external ring-buffer crate — this core is the one place
//! that very primitive is specified, so the demonstration catalog is also
//! its proof of use. Grounded on the teacher's (newer) `objects/oscilloscope.rs`
//! shape: a `parking_lot::Mutex`-guarded control-thread-only field (there,
//! the chunk reader/writer; here, the node's `name`) next to an audio-thread
//! write path.

use std::{
    any::Any,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::{
    error::PropertyError,
    node::{BlockContext, Event, GraphNode},
    resources::ResourceResolver,
    ring_buffer::ChannelRingBuffer,
    value::Value,
};

const MIN_SCOPE_SIZE: usize = 256;
const MAX_SCOPE_SIZE: usize = 8192;
const DEFAULT_SCOPE_SIZE: usize = 1024;

pub struct Scope {
    ring: ChannelRingBuffer,
    size: AtomicUsize,
    name: Mutex<Option<String>>,
}

impl Scope {
    pub const TYPE_NAME: &'static str = "scope";

    pub fn new() -> Self {
        Scope {
            ring: ChannelRingBuffer::new(1, MAX_SCOPE_SIZE),
            size: AtomicUsize::new(DEFAULT_SCOPE_SIZE),
            name: Mutex::new(None),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for Scope {
    fn set_property(
        &self,
        key: &str,
        value: Value,
        _resources: &mut dyn ResourceResolver,
    ) -> Result<(), PropertyError> {
        match key {
            "size" => {
                let size = value.as_i64().ok_or(PropertyError::InvalidType)?;
                if size < MIN_SCOPE_SIZE as i64 || size > MAX_SCOPE_SIZE as i64 {
                    return Err(PropertyError::InvalidValue(format!(
                        "size must be in [{MIN_SCOPE_SIZE}, {MAX_SCOPE_SIZE}]"
                    )));
                }
                self.size.store(size as usize, Ordering::Relaxed);
                Ok(())
            }
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
            "size" => Some(Value::from(self.size.load(Ordering::Relaxed) as i32)),
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
        self.ring.write_block(&[ctx.output]);
    }

    fn process_events(&self, emit: &mut dyn FnMut(Event)) {
        let size = self.size.load(Ordering::Relaxed);
        let samples = self.ring.read_recent(0, size);
        let source = self
            .name
            .lock()
            .clone()
            .map(Value::from)
            .unwrap_or(Value::Undefined);
        let mut payload = crate::value::ValueObject::new();
        payload.insert("source".to_string(), source);
        payload.insert("samples".to_string(), Value::from(samples));
        emit(Event::new("scope", Value::Object(payload)));
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
