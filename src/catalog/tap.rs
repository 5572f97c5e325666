//! `tap_out` / `tap_in`: the feedback protocol (§4.7).
//!
//! `TapOut` writes its input through to its output and additionally
//! remembers the block in an internal delay buffer; the render sequence
//! (not this node) calls `promote` after every root subsequence has run,
//! copying that remembered block into the named mutable shared-resource
//! buffer. `TapIn` just reads whatever was promoted at the end of the
//! *previous* block — it never touches `TapOut` directly, only the shared
//! buffer, which is what turns an otherwise-illegal DAG cycle into two
//! ordinary one-way edges plus a one-block delay.

use std::{any::Any, cell::UnsafeCell, sync::Arc};

use crate::{
    error::PropertyError,
    node::{BlockContext, Event, GraphNode},
    resources::{ResourceResolver, TapBuffer},
    value::Value,
};

pub struct TapOut {
    name: UnsafeCell<Option<String>>,
    delay: UnsafeCell<Box<[f32]>>,
    buffer: UnsafeCell<Option<Arc<TapBuffer>>>,
    block_size: usize,
}

// Safety: `name`, `delay`, and `buffer` are only ever written by
// `set_property` (control thread) and only ever read by `process`/`promote`
// (audio thread); the two never run concurrently for one node instance in
// practice because a property write that changes a tap's identity always
// happens before the node is reachable from a published render sequence
// (§5 "property writes ... observed in program order ... per node").
unsafe impl Sync for TapOut {}

impl TapOut {
    pub const TYPE_NAME: &'static str = "tap_out";

    pub fn new(block_size: usize) -> Self {
        TapOut {
            name: UnsafeCell::new(None),
            delay: UnsafeCell::new(vec![0.0; block_size].into_boxed_slice()),
            buffer: UnsafeCell::new(None),
            block_size,
        }
    }

    /// Copy this block's remembered input into the shared tap buffer of the
    /// matching name (§4.7 "promote"). Called by the render sequence once
    /// per block, after every root has finished, only for roots whose
    /// target gain is >= 0.5.
    pub fn promote(&self) {
        let buffer = unsafe { &*self.buffer.get() };
        if let Some(buffer) = buffer {
            let delay = unsafe { &*self.delay.get() };
            buffer.promote(delay);
        }
    }
}

impl GraphNode for TapOut {
    fn set_property(
        &self,
        key: &str,
        value: Value,
        resources: &mut dyn ResourceResolver,
    ) -> Result<(), PropertyError> {
        match key {
            "name" => {
                let name = value.as_str().ok_or(PropertyError::InvalidType)?.to_string();
                let buffer = resources.get_or_create_mutable(&name, self.block_size);
                unsafe {
                    *self.name.get() = Some(name);
                    *self.buffer.get() = Some(buffer);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn get_property(&self, key: &str) -> Option<Value> {
        match key {
            "name" => unsafe { (*self.name.get()).clone().map(Value::from) },
            _ => None,
        }
    }

    fn process(&self, ctx: &mut BlockContext) {
        let delay = unsafe { &mut *self.delay.get() };
        match ctx.inputs.first() {
            Some(input) => {
                let n = ctx.output.len().min(input.len());
                ctx.output[..n].copy_from_slice(&input[..n]);
                if n < ctx.output.len() {
                    ctx.output[n..].fill(0.0);
                }
                let d = delay.len().min(input.len());
                delay[..d].copy_from_slice(&input[..d]);
                if d < delay.len() {
                    delay[d..].fill(0.0);
                }
            }
            None => {
                ctx.fill_silence();
                delay.fill(0.0);
            }
        }
    }

    fn process_events(&self, _emit: &mut dyn FnMut(Event)) {}

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TapIn {
    buffer: UnsafeCell<Option<Arc<TapBuffer>>>,
}

unsafe impl Sync for TapIn {}

impl TapIn {
    pub const TYPE_NAME: &'static str = "tap_in";

    pub fn new() -> Self {
        TapIn {
            buffer: UnsafeCell::new(None),
        }
    }
}

impl Default for TapIn {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for TapIn {
    fn set_property(
        &self,
        key: &str,
        value: Value,
        resources: &mut dyn ResourceResolver,
    ) -> Result<(), PropertyError> {
        match key {
            "name" => {
                let name = value.as_str().ok_or(PropertyError::InvalidType)?;
                // Block size is irrelevant here: `TapOut` is the side that
                // creates the buffer with a real size; if `TapIn` happens to
                // be set up first, it reserves a placeholder of 0 that
                // `get_or_create_mutable` will never be asked to grow, since
                // the map only ever creates a buffer, never resizes one.
                let buffer = resources.get_or_create_mutable(name, 0);
                unsafe {
                    *self.buffer.get() = Some(buffer);
                }
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
        match buffer {
            Some(buffer) => {
                let promoted = buffer.read();
                let n = ctx.output.len().min(promoted.len());
                ctx.output[..n].copy_from_slice(&promoted[..n]);
                if n < ctx.output.len() {
                    ctx.output[n..].fill(0.0);
                }
            }
            None => ctx.fill_silence(),
        }
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

    #[test]
    fn tap_in_emits_silence_before_any_promote() {
        let mut resources = SharedResourceMap::new();
        let tap_in = TapIn::new();
        tap_in
            .set_property("name", Value::from("L"), &mut resources)
            .unwrap();
        let mut out = [1.0; 4];
        let mut ctx = BlockContext {
            inputs: &[],
            output: &mut out,
        };
        tap_in.process(&mut ctx);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn promote_makes_tap_in_see_the_previous_block() {
        let mut resources = SharedResourceMap::new();
        let tap_out = TapOut::new(4);
        let tap_in = TapIn::new();
        tap_out
            .set_property("name", Value::from("L"), &mut resources)
            .unwrap();
        tap_in
            .set_property("name", Value::from("L"), &mut resources)
            .unwrap();

        let input = [1.0, 1.0, 1.0, 1.0];
        let mut out = [0.0; 4];
        let mut ctx = BlockContext {
            inputs: &[&input],
            output: &mut out,
        };
        tap_out.process(&mut ctx);
        assert_eq!(out, [1.0; 4], "tap_out passes input through immediately");

        let mut tap_in_out = [9.0; 4];
        let mut in_ctx = BlockContext {
            inputs: &[],
            output: &mut tap_in_out,
        };
        tap_in.process(&mut in_ctx);
        assert_eq!(tap_in_out, [0.0; 4], "nothing promoted yet this block");

        tap_out.promote();

        let mut tap_in_out2 = [9.0; 4];
        let mut in_ctx2 = BlockContext {
            inputs: &[],
            output: &mut tap_in_out2,
        };
        tap_in.process(&mut in_ctx2);
        assert_eq!(tap_in_out2, [1.0; 4], "now sees the promoted block");
    }

    #[test]
    fn tap_out_zeroes_the_delay_when_no_input_is_connected() {
        let mut resources = SharedResourceMap::new();
        let tap_out = TapOut::new(4);
        tap_out
            .set_property("name", Value::from("L"), &mut resources)
            .unwrap();
        let mut out = [9.0; 4];
        let mut ctx = BlockContext {
            inputs: &[],
            output: &mut out,
        };
        tap_out.process(&mut ctx);
        assert_eq!(out, [0.0; 4]);
        tap_out.promote();
    }
}
