//! Garbage holding area (§3 lifecycles, §4.8 sweep).
//!
//! Grounded on the teacher's `src/core/engine/garbage.rs` `GarbageChute`/
//! `GarbageDisposer` pair and its "only drop once nothing else holds this"
//! idea, simplified for this crate's threading model: the teacher's chute
//! exists to let an audio thread hand a `Droppable` to a *different* thread
//! for disposal via an `mpsc` channel, because its demo binary drops nodes
//! from the audio callback itself. Here, `DELETE_NODE` only ever runs on the
//! control thread, which already owns the node table — there is no second
//! thread to hand anything to, so the chute collapses to a plain `Vec` that
//! the same control thread scans for reclaimable entries.

use std::sync::Arc;

use crate::node::{GraphNode, NodeId};

/// Nodes removed from the live table by `DELETE_NODE` but not yet safe to
/// drop, because the currently-running render sequence (owned by the audio
/// thread) may still hold a clone of their `Arc`.
pub struct GarbageHoldingArea {
    entries: Vec<(NodeId, Arc<dyn GraphNode>)>,
}

impl GarbageHoldingArea {
    pub fn new() -> Self {
        GarbageHoldingArea {
            entries: Vec::new(),
        }
    }

    /// Move a deleted node's handle here instead of dropping it immediately.
    pub fn hold(&mut self, id: NodeId, node: Arc<dyn GraphNode>) {
        self.entries.push((id, node));
    }

    /// Drop every entry whose only remaining holder is this area (§4.8
    /// "scan the garbage holding area"). Returns the ids actually destroyed,
    /// for logging at the call site.
    pub fn sweep(&mut self) -> Vec<NodeId> {
        let mut destroyed = Vec::new();
        self.entries.retain(|(id, node)| {
            if Arc::strong_count(node) == 1 {
                destroyed.push(*id);
                false
            } else {
                true
            }
        });
        destroyed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for GarbageHoldingArea {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::PropertyError,
        node::{BlockContext, Event},
        resources::ResourceResolver,
        value::Value,
    };

    struct Silent;
    impl GraphNode for Silent {
        fn set_property(
            &self,
            _key: &str,
            _value: Value,
            _resources: &mut dyn ResourceResolver,
        ) -> Result<(), PropertyError> {
            Ok(())
        }
        fn get_property(&self, _key: &str) -> Option<Value> {
            None
        }
        fn process(&self, ctx: &mut BlockContext) {
            ctx.fill_silence();
        }
        fn process_events(&self, _emit: &mut dyn FnMut(Event)) {}
        fn type_name(&self) -> &'static str {
            "silent"
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn sweep_keeps_entries_with_live_references() {
        let mut garbage = GarbageHoldingArea::new();
        let node: Arc<dyn GraphNode> = Arc::new(Silent);
        let held = node.clone();
        garbage.hold(NodeId::new(1), node);
        assert_eq!(garbage.sweep(), Vec::new());
        assert_eq!(garbage.len(), 1);
        drop(held);
        assert_eq!(garbage.sweep(), vec![NodeId::new(1)]);
        assert!(garbage.is_empty());
    }
}
