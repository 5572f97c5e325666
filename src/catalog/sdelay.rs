//! `sdelay`: a fixed-capacity, control-adjustable sample delay line.
//!
//! The delay line is allocated once at its maximum capacity (§5 "no
//! allocation on the audio thread" extends to "no reallocation, ever," once
//! a node is live); `set_property("size", n)` only moves where the audio
//! thread reads from inside that fixed ring, it never grows or shrinks the
//! backing buffer. Grounded on the teacher's `src/objects/wavegenerator.rs`
//! shape (owned scratch buffer sized at construction, one property mutating
//! an atomic read position).

use std::{
    any::Any,
    cell::UnsafeCell,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::PropertyError,
    node::{BlockContext, Event, GraphNode},
    resources::ResourceResolver,
    value::Value,
};

/// One second at a generous sample rate is enough delay for a demonstration
/// node; a real delay/reverb collaborator would take this as a constructor
/// parameter sized off the host's actual sample rate.
const MAX_DELAY_SAMPLES: usize = 1 << 16;

pub struct SDelay {
    buffer: UnsafeCell<Box<[f32]>>,
    write_pos: AtomicUsize,
    size: AtomicUsize,
}

unsafe impl Sync for SDelay {}

impl SDelay {
    pub const TYPE_NAME: &'static str = "sdelay";

    pub fn new() -> Self {
        SDelay {
            buffer: UnsafeCell::new(vec![0.0; MAX_DELAY_SAMPLES].into_boxed_slice()),
            write_pos: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
        }
    }
}

impl Default for SDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for SDelay {
    fn set_property(
        &self,
        key: &str,
        value: Value,
        _resources: &mut dyn ResourceResolver,
    ) -> Result<(), PropertyError> {
        match key {
            "size" => {
                let size = value.as_i64().ok_or(PropertyError::InvalidType)?;
                if size < 0 || size as usize > MAX_DELAY_SAMPLES {
                    return Err(PropertyError::InvalidValue(format!(
                        "size must be in [0, {MAX_DELAY_SAMPLES}]"
                    )));
                }
                self.size.store(size as usize, Ordering::Relaxed);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn get_property(&self, key: &str) -> Option<Value> {
        match key {
            "size" => Some(Value::from(self.size.load(Ordering::Relaxed) as i32)),
            _ => None,
        }
    }

    fn process(&self, ctx: &mut BlockContext) {
        let size = self.size.load(Ordering::Relaxed);
        if size == 0 {
            // A zero-length line has nothing yet to read back (§8 boundary
            // behavior): emit silence rather than an instant passthrough.
            ctx.fill_silence();
            return;
        }
        let buf = unsafe { &mut *self.buffer.get() };
        let cap = buf.len();
        let size = size.min(cap);
        let input = ctx.inputs.first();
        let mut pos = self.write_pos.load(Ordering::Relaxed);
        for i in 0..ctx.output.len() {
            let read_idx = (pos + cap - size) % cap;
            ctx.output[i] = buf[read_idx];
            let sample = input.and_then(|inp| inp.get(i)).copied().unwrap_or(0.0);
            buf[pos] = sample;
            pos = (pos + 1) % cap;
        }
        self.write_pos.store(pos, Ordering::Relaxed);
    }

    fn process_events(&self, _emit: &mut dyn FnMut(Event)) {}

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::SharedResourceMap;

    fn run_block(node: &SDelay, input: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; input.len()];
        let mut ctx = BlockContext {
            inputs: &[input],
            output: &mut out,
        };
        node.process(&mut ctx);
        out
    }

    #[test]
    fn zero_size_emits_silence() {
        let node = SDelay::new();
        assert_eq!(run_block(&node, &[1.0, 1.0, 1.0, 1.0]), vec![0.0; 4]);
    }

    #[test]
    fn size_equal_to_block_is_a_block_length_delay() {
        let mut resources = SharedResourceMap::new();
        let node = SDelay::new();
        node.set_property("size", Value::from(4_i32), &mut resources)
            .unwrap();
        assert_eq!(run_block(&node, &[1.0, 2.0, 3.0, 4.0]), vec![0.0; 4]);
        assert_eq!(run_block(&node, &[5.0, 6.0, 7.0, 8.0]), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn rejects_size_above_capacity() {
        let mut resources = SharedResourceMap::new();
        let node = SDelay::new();
        let err = node
            .set_property(
                "size",
                Value::from((MAX_DELAY_SAMPLES as i64 + 1) as f64),
                &mut resources,
            )
            .unwrap_err();
        assert_eq!(err, PropertyError::InvalidValue(format!(
            "size must be in [0, {MAX_DELAY_SAMPLES}]"
        )));
    }
}
