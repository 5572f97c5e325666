//! The uniform node contract (§4.2) and the `NodeId` identity type (§3).
//!
//! Grounded on the teacher's own "avoid deep hierarchies" design goal
//! (`src/core/sound/soundprocessor.rs` keeps its processor traits to a
//! handful of flat methods) and on
//! `other_examples/d8e418c6_CorvusPrudens-Firewheel__crates-firewheel-core-src-node.rs.rs`
//! for expressing a node as one small `dyn`-safe trait rather than a class
//! hierarchy.

use std::collections::BTreeMap;

use crate::{error::PropertyError, resources::ResourceResolver, value::Value};

/// 32-bit id assigned by the control thread, unique for the life of a node
/// (§3). Deliberately `Copy` and ordinary — this crate has only one control
/// thread, so there is no need for the generation-tagged slot-map ids some
/// multi-writer graph hosts use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(value: u32) -> Self {
        NodeId(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// One block's worth of audio to process (§4.2's `process` row).
///
/// `inputs` holds one slice per input channel, in child-append order (§3
/// edge table ordering); a node with fewer connected children than it
/// expects simply finds `inputs` shorter than it wanted and must write
/// silence rather than read out of bounds (§7 silent-degradation rule).
pub struct BlockContext<'a> {
    pub inputs: &'a [&'a [f32]],
    pub output: &'a mut [f32],
}

impl<'a> BlockContext<'a> {
    pub fn num_samples(&self) -> usize {
        self.output.len()
    }

    pub fn num_input_channels(&self) -> usize {
        self.inputs.len()
    }

    /// Common silent-degradation helper (§7): write zeros and return.
    pub fn fill_silence(&mut self) {
        self.output.fill(0.0);
    }
}

/// A node-emitted event (§6 event wire format): `(kind, payload)`, where
/// `payload` carries at minimum a `source` field mirroring the node's
/// `name` property for known kinds (`meter`, `snapshot`, `scope`, `capture`).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: String,
    pub payload: Value,
}

impl Event {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Event {
            kind: kind.into(),
            payload,
        }
    }
}

/// Storage for properties a node doesn't recognize by name. The contract
/// (§4.2) requires unknown property names to be silently stored rather than
/// rejected; concrete nodes embed one of these and fall through to it after
/// handling their own named properties.
#[derive(Debug, Clone, Default)]
pub struct UnknownProperties(BTreeMap<String, Value>);

impl UnknownProperties {
    pub fn new() -> Self {
        UnknownProperties(BTreeMap::new())
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.get(key).cloned()
    }
}

/// The uniform per-node interface (§4.2). A node instance is shared (`Arc`)
/// between the control thread and the audio thread at once — the control
/// thread may call `set_property`/`process_events`/`reset` while the audio
/// thread is mid-`process` on the very same instance (§5's ordering rules
/// only promise program order *within* one thread, never mutual exclusion
/// between the two). Every method therefore takes `&self`: a node manages
/// its own interior mutability (an atomic scalar for simple properties, an
/// SPSC queue for anything larger, per §4.2's "typically via an atomic
/// scalar or an SPSC queue" note) instead of relying on the runtime to lock
/// it from the outside.
pub trait GraphNode: Send + Sync {
    /// Control thread. May allocate, may enqueue messages for the audio
    /// thread; must never block on or wait for the audio thread.
    fn set_property(
        &self,
        key: &str,
        value: Value,
        resources: &mut dyn ResourceResolver,
    ) -> Result<(), PropertyError>;

    /// Control/diagnostic thread only. Used for round-trip tests (§8) and
    /// `Runtime::snapshot`.
    fn get_property(&self, key: &str) -> Option<Value>;

    /// Audio thread, one call per block, never concurrently with itself.
    /// Must write exactly `ctx.num_samples()` samples to `ctx.output`; no
    /// allocation, no blocking, no file I/O (§4.2, §5).
    fn process(&self, ctx: &mut BlockContext);

    /// Control thread. Drains whatever analyzer/event state accumulated
    /// during recent `process` calls, handing each one to `emit`.
    fn process_events(&self, emit: &mut dyn FnMut(Event)) {
        let _ = emit;
    }

    /// Control-visible; node decides what "initial" means. Default is a
    /// no-op for stateless nodes (e.g. a constant source).
    fn reset(&self) {}

    /// Diagnostic name for `Runtime::snapshot` / event `source` fields.
    fn type_name(&self) -> &'static str;

    /// Diagnostic-only full property dump for `Runtime::snapshot` (§4.8).
    /// Most nodes can leave this at its default; it exists so a node can
    /// opt in to exposing a structured view of its own state for tests and
    /// tooling without the runtime needing to know its property names.
    fn snapshot_properties(&self) -> Value {
        Value::Undefined
    }

    /// Lets the render-sequence builder recover a concrete node type for
    /// behavior the flat `GraphNode` contract doesn't name directly — today
    /// just the tap-feedback protocol's "promote after the block" step
    /// (§4.7), which only `TapOut`-shaped nodes implement. Kept on the
    /// trait itself (rather than a separate marker trait) to preserve the
    /// "closed capability set, no hierarchy" design (§9).
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Factory signature registered for a node type (`register_node_type`,
/// §4.8). Boxed so the registry can hold factories for heterogeneous node
/// types in one map.
pub type NodeFactory = Box<dyn Fn() -> std::sync::Arc<dyn GraphNode> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_properties_round_trip() {
        let mut props = UnknownProperties::new();
        assert_eq!(props.get("foo"), None);
        props.set("foo", Value::from(1.0));
        assert_eq!(props.get("foo"), Some(Value::from(1.0)));
    }

    #[test]
    fn block_context_reports_shape() {
        let inputs: [&[f32]; 2] = [&[1.0, 2.0], &[3.0, 4.0]];
        let mut out = [0.0; 2];
        let ctx = BlockContext {
            inputs: &inputs,
            output: &mut out,
        };
        assert_eq!(ctx.num_samples(), 2);
        assert_eq!(ctx.num_input_channels(), 2);
    }

    #[test]
    fn fill_silence_zeroes_the_block() {
        let mut out = [1.0, 2.0, 3.0];
        let mut ctx = BlockContext {
            inputs: &[],
            output: &mut out,
        };
        ctx.fill_silence();
        assert_eq!(out, [0.0, 0.0, 0.0]);
    }
}
