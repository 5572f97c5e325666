//! Graph Host / `Runtime` (§4.8): the instruction interpreter, node/edge
//! tables, and the realtime `process` entry point, all in one object that is
//! meant to be called from exactly two threads (§5) — a control thread for
//! everything except `process`, and one audio thread for `process` alone.
//!
//! Grounded on the teacher's `src/core/sound/soundgraph.rs` for the shape of
//! "one call applies a bundle of topology edits" and on
//! `src/core/engine/soundengine.rs`'s `SoundEngineInterface`/`SoundEngine`
//! split for which state belongs to which thread. Unlike
//! `SoundGraph::try_make_change`, this runtime does **not** roll back on
//! error: §4.8/§9 name non-transactional batch application (stop at the
//! first error, keep whatever already applied) as the contract to mirror,
//! not the teacher's own rollback behavior.
//!
//! State is split the same way the teacher's control/audio split is:
//! node/edge/root/resource/garbage bookkeeping lives behind `parking_lot::
//! Mutex` (control-thread only, so always uncontended), while the published
//! sequence and its consumer live behind `UnsafeCell` (audio-thread only, one
//! writer). Every method still takes `&self` so a `Runtime` can be shared via
//! `Arc` between the two real threads an embedder spawns, the same reasoning
//! that drove `GraphNode` to `&self` methods.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    engine::{
        garbage::GarbageHoldingArea,
        scratch::ScratchArena,
        sequence::{RenderSequence, RootGainState},
    },
    error::{GraphError, PropertyError},
    node::{Event, GraphNode, NodeFactory, NodeId},
    registry::Registry,
    resources::{SampleBuffer, SharedResourceMap},
    spsc,
    value::Value,
};

/// One instruction from a batch (§4.8, §6 opcodes 0–5).
#[derive(Debug, Clone)]
pub enum Instruction {
    CreateNode { node_id: NodeId, type_name: String },
    DeleteNode { node_id: NodeId },
    AppendChild { parent_id: NodeId, child_id: NodeId },
    SetProperty { node_id: NodeId, key: String, value: Value },
    ActivateRoots { node_ids: Vec<NodeId> },
    CommitUpdates,
}

/// Control-thread-only bookkeeping, behind one lock. Every field here is
/// touched exclusively while applying a batch, which happens on the one
/// control thread the crate assumes (§5), so the lock is never contended in
/// practice — it exists to let a `Runtime` be `Sync` at all, not to arbitrate
/// real concurrency.
struct ControlState {
    registry: Registry,
    nodes: HashMap<NodeId, Arc<dyn GraphNode>>,
    edges: HashMap<NodeId, Vec<NodeId>>,
    roots: HashMap<NodeId, Arc<RootGainState>>,
    resources: SharedResourceMap,
    garbage: GarbageHoldingArea,
    rebuild_needed: bool,
    // Retains one `Arc` clone of every published `RenderSequence` alongside
    // the one handed to the audio thread (§4.5's "outer ref-counted pool",
    // §2.3/§4.3's availability rule). This is what keeps the audio thread
    // from ever being the one to drop the *last* reference to a displaced
    // sequence when it overwrites `current_sequence` with a newer one: the
    // control thread's clone here means that drop only ever takes the count
    // from 2 to 1, never 1 to 0 (§3 invariant 5, §5 "destruction ... only
    // ever happens on the control thread"). A pool entry becomes reclaimable
    // once its strong count falls to 1 (only this vector holds it), at which
    // point `build_and_publish` can pull its scratch arena back out instead
    // of allocating a new one.
    sequence_pool: Vec<Arc<RenderSequence>>,
}

pub struct Runtime {
    block_size: usize,
    sample_rate: f32,
    control: Mutex<ControlState>,
    sequence_producer: Mutex<spsc::Producer<Arc<RenderSequence>>>,
    // Safety: only `process`, called from the single audio thread (§5), ever
    // touches these two fields.
    sequence_consumer: std::cell::UnsafeCell<spsc::Consumer<Arc<RenderSequence>>>,
    current_sequence: std::cell::UnsafeCell<Option<Arc<RenderSequence>>>,
}

unsafe impl Sync for Runtime {}

/// Publication queue depth (§4.5 step 7's "single slot" is the conceptual
/// minimum; two slots absorb the case where the control thread commits twice
/// before the audio thread's next block without ever blocking either side).
const SEQUENCE_QUEUE_CAPACITY: usize = 2;

impl Runtime {
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        let (sequence_producer, sequence_consumer) =
            spsc::channel::<Arc<RenderSequence>>(SEQUENCE_QUEUE_CAPACITY);
        Runtime {
            block_size,
            sample_rate,
            control: Mutex::new(ControlState {
                registry: Registry::with_default_catalog(block_size),
                nodes: HashMap::new(),
                edges: HashMap::new(),
                roots: HashMap::new(),
                resources: SharedResourceMap::new(),
                garbage: GarbageHoldingArea::new(),
                rebuild_needed: false,
                sequence_pool: Vec::new(),
            }),
            sequence_producer: Mutex::new(sequence_producer),
            sequence_consumer: std::cell::UnsafeCell::new(sequence_consumer),
            current_sequence: std::cell::UnsafeCell::new(None),
        }
    }

    pub fn register_node_type(&self, name: impl Into<String>, factory: NodeFactory) -> bool {
        self.control.lock().registry.register(name, factory)
    }

    /// Apply a batch of instructions (§4.8). Stops at the first error and
    /// returns it; every instruction already applied before that point
    /// stays applied (§4.8/§9's explicit non-transactional decision). A
    /// rebuild is published only if the batch both requested one (via
    /// `ActivateRoots`) and reached `CommitUpdates`.
    pub fn apply_batch(&self, instructions: &[Instruction]) -> Result<(), GraphError> {
        let mut state = self.control.lock();

        let swept = state.garbage.sweep();
        for node_id in swept {
            debug!(node = node_id.value(), "garbage node destroyed");
        }

        let mut committed = false;
        for instruction in instructions {
            if matches!(instruction, Instruction::CommitUpdates) {
                committed = true;
            }
            if let Err(err) = Self::apply_one(&mut state, instruction) {
                warn!(error = %err, "instruction failed, batch stopped");
                return Err(err);
            }
        }
        // Only one rebuild+publish happens per batch, after COMMIT_UPDATES
        // (§4.8); skipped entirely if no instruction requested a rebuild or
        // the batch never reached COMMIT_UPDATES at all.
        if committed && state.rebuild_needed {
            self.build_and_publish(&mut state);
        }
        Ok(())
    }

    fn apply_one(state: &mut ControlState, instruction: &Instruction) -> Result<(), GraphError> {
        match instruction {
            Instruction::CreateNode { node_id, type_name } => {
                if state.nodes.contains_key(node_id) {
                    return Err(GraphError::NodeAlreadyExists(*node_id));
                }
                let node = state
                    .registry
                    .create(type_name)
                    .ok_or_else(|| GraphError::UnknownNodeType(type_name.clone()))?;
                state.nodes.insert(*node_id, node);
                state.edges.insert(*node_id, Vec::new());
                debug!(node = node_id.value(), type_name, "node created");
                Ok(())
            }
            Instruction::DeleteNode { node_id } => {
                let node = state
                    .nodes
                    .remove(node_id)
                    .ok_or(GraphError::NodeNotFound(*node_id))?;
                state.edges.remove(node_id);
                state.garbage.hold(*node_id, node);
                debug!(node = node_id.value(), "node deleted, moved to garbage");
                Ok(())
            }
            Instruction::AppendChild { parent_id, child_id } => {
                if !state.nodes.contains_key(parent_id) {
                    return Err(GraphError::NodeNotFound(*parent_id));
                }
                if !state.nodes.contains_key(child_id) {
                    return Err(GraphError::NodeNotFound(*child_id));
                }
                state.edges.entry(*parent_id).or_default().push(*child_id);
                Ok(())
            }
            Instruction::SetProperty { node_id, key, value } => {
                if let Some(root) = state.roots.get(node_id) {
                    if key == "channel" {
                        let channel = value
                            .as_i32()
                            .ok_or_else(|| GraphError::InvalidPropertyType {
                                node: *node_id,
                                key: key.clone(),
                            })?;
                        root.set_channel(channel);
                        return Ok(());
                    }
                }
                let node = state
                    .nodes
                    .get(node_id)
                    .ok_or(GraphError::NodeNotFound(*node_id))?
                    .clone();
                node.set_property(key, value.clone(), &mut state.resources)
                    .map_err(|err| property_to_graph_error(err, *node_id, key))
            }
            Instruction::ActivateRoots { node_ids } => {
                for node_id in node_ids {
                    if !state.nodes.contains_key(node_id) {
                        return Err(GraphError::NodeNotFound(*node_id));
                    }
                }
                let active: std::collections::HashSet<NodeId> = node_ids.iter().copied().collect();
                for node_id in node_ids {
                    state
                        .roots
                        .entry(*node_id)
                        .or_insert_with(|| RootGainState::new(0))
                        .set_active(true);
                }
                for (node_id, gain_state) in state.roots.iter() {
                    if !active.contains(node_id) {
                        gain_state.set_active(false);
                    }
                }
                state.rebuild_needed = true;
                Ok(())
            }
            // The actual rebuild+publish happens once, after the whole batch
            // has been applied (see `apply_batch`), not here: a batch may
            // keep mutating topology after `CommitUpdates` only if another
            // `ActivateRoots`/`CommitUpdates` pair follows, and "only one
            // rebuild+publish per batch" is easiest to guarantee by doing it
            // exactly once at the end rather than inline per instruction.
            Instruction::CommitUpdates => Ok(()),
        }
    }

    /// Compiles and publishes a new [`RenderSequence`] from the current
    /// node/edge/root tables. Called by `apply_batch` once per batch, at
    /// most, after a `CommitUpdates` that followed a rebuild-requesting
    /// instruction.
    fn build_and_publish(&self, state: &mut ControlState) {
        // A deactivated root that has fully converged to silence no longer
        // needs to be carried: its fade is done, and keeping it around would
        // mean every future rebuild re-schedules whatever is uniquely
        // reachable from it forever (spec.md:229's "ceases to reference"
        // never actually taking effect at the table level). `still_running`
        // is exactly the same ramp-converged check the audio thread already
        // uses to gate the per-block sum.
        state.roots.retain(|_, gain| gain.still_running());

        let mut roots: Vec<(NodeId, Arc<RootGainState>)> = state
            .roots
            .iter()
            .map(|(id, gain)| (*id, gain.clone()))
            .collect();
        roots.sort_by_key(|(_, gain)| !gain.is_active());

        let arena = Self::reclaim_arena(&mut state.sequence_pool)
            .unwrap_or_else(|| ScratchArena::new(self.block_size));
        let sequence = Arc::new(RenderSequence::rebuild(
            arena,
            self.sample_rate,
            &state.nodes,
            &state.edges,
            &roots,
        ));
        // Keep one clone in the pool before handing the other to the audio
        // thread, so the eventual `current_sequence` overwrite on the audio
        // thread never drops the last reference (see `sequence_pool`'s doc
        // comment above).
        state.sequence_pool.push(sequence.clone());
        let mut producer = self.sequence_producer.lock();
        match producer.push(sequence) {
            Ok(()) => {
                state.rebuild_needed = false;
                debug!(
                    node_count = state.nodes.len(),
                    root_count = roots.len(),
                    pool_size = state.sequence_pool.len(),
                    "render sequence published"
                );
            }
            Err(_) => {
                warn!("render sequence publish queue full, dropping rebuild");
            }
        }
    }

    /// Find a pooled sequence with no other holder (§4.3 "available iff
    /// reference count == 1") and consume it for its scratch arena. Linear
    /// scan, matching §4.3/§9's "pool sizes are small in practice" call.
    fn reclaim_arena(pool: &mut Vec<Arc<RenderSequence>>) -> Option<ScratchArena> {
        let idx = pool.iter().position(|seq| Arc::strong_count(seq) == 1)?;
        let seq = pool.swap_remove(idx);
        match Arc::try_unwrap(seq) {
            Ok(seq) => Some(seq.into_arena()),
            Err(seq) => {
                // Another reference appeared between the scan and the
                // removal (can't happen under this crate's single-control-
                // thread assumption, but fall back to leaving it pooled
                // rather than panicking).
                pool.push(seq);
                None
            }
        }
    }

    /// Realtime entry point (§4.8 `process`). The external C-ABI's `inputs`
    /// and opaque `userData` parameters have no Rust equivalent worth
    /// keeping: no node in this crate's catalog reads external audio input,
    /// and "user data" in safe Rust is whatever the caller's own closure
    /// already captures, not a raw pointer threaded through here.
    pub fn process(&self, num_samples: usize, outputs: &mut [&mut [f32]]) {
        // Safety: audio-thread-only fields, one writer (§5).
        let consumer = unsafe { &mut *self.sequence_consumer.get() };
        let current = unsafe { &mut *self.current_sequence.get() };
        while let Some(newest) = consumer.pop() {
            *current = Some(newest);
        }
        match current {
            Some(sequence) => sequence.process(num_samples, outputs),
            None => {
                for ch in outputs.iter_mut() {
                    ch[..num_samples].fill(0.0);
                }
            }
        }
    }

    /// Drains every live node's analyzer/event queue (§4.8
    /// `process_queued_events`). Iterates the live node table rather than
    /// peeking into the audio thread's adopted sequence, since the latter is
    /// `UnsafeCell`-guarded, audio-thread-only state this method must not
    /// race with; a node not currently part of the rendered graph simply has
    /// nothing queued to drain.
    pub fn process_queued_events(&self, emit: &mut dyn FnMut(Event)) {
        let state = self.control.lock();
        for node in state.nodes.values() {
            node.process_events(emit);
        }
    }

    /// Inserts an immutable shared buffer (§4.4, §4.8). Returns whether
    /// insertion occurred (`false` if `name` was already present).
    pub fn update_shared_resource(&self, name: &str, buffer: SampleBuffer) -> bool {
        self.control.lock().resources.insert(name, buffer)
    }

    pub fn prune_shared_resources(&self) {
        self.control.lock().resources.prune();
    }

    /// Diagnostic-only (immutable, mutable) shared-resource counts, used by
    /// tests that pin the prune/lifecycle guarantees of §4.4/§8 scenario 6.
    pub fn shared_resource_counts(&self) -> (usize, usize) {
        let state = self.control.lock();
        (state.resources.immutable_len(), state.resources.mutable_len())
    }

    pub fn reset(&self) {
        let state = self.control.lock();
        for node in state.nodes.values() {
            node.reset();
        }
    }

    /// Diagnostic `nodeId -> properties` dump (§4.8 `snapshot`). Nodes that
    /// don't override `GraphNode::snapshot_properties` simply report
    /// `Value::Undefined`.
    pub fn snapshot(&self) -> HashMap<NodeId, Value> {
        let state = self.control.lock();
        state
            .nodes
            .iter()
            .map(|(id, node)| (*id, node.snapshot_properties()))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.control.lock().nodes.len()
    }

    pub fn root_count(&self) -> usize {
        self.control.lock().roots.len()
    }
}

fn property_to_graph_error(err: PropertyError, node: NodeId, key: &str) -> GraphError {
    match err {
        PropertyError::InvalidType => GraphError::InvalidPropertyType {
            node,
            key: key.to_string(),
        },
        PropertyError::InvalidValue(reason) => GraphError::InvalidPropertyValue {
            node,
            key: key.to_string(),
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(node_id: u32, type_name: &str) -> Instruction {
        Instruction::CreateNode {
            node_id: NodeId::new(node_id),
            type_name: type_name.to_string(),
        }
    }

    #[test]
    fn smallest_graph_settles_to_the_constant_value() {
        let runtime = Runtime::new(100.0, 4);
        runtime
            .apply_batch(&[
                create(1, "root"),
                create(2, "const"),
                Instruction::SetProperty {
                    node_id: NodeId::new(2),
                    key: "value".to_string(),
                    value: Value::from(0.5_f32),
                },
                Instruction::AppendChild {
                    parent_id: NodeId::new(1),
                    child_id: NodeId::new(2),
                },
                Instruction::ActivateRoots {
                    node_ids: vec![NodeId::new(1)],
                },
                Instruction::CommitUpdates,
            ])
            .unwrap();

        let mut out = vec![0.0_f32; 4];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out];
        // The ramp takes ceil(sample_rate / 20) samples; several blocks at
        // this tiny sample rate is enough to fully settle.
        for _ in 0..50 {
            runtime.process(4, &mut outputs);
        }
        for &sample in outputs[0].iter() {
            assert!((sample - 0.5).abs() < 1e-3, "sample {sample} not settled to 0.5");
        }
    }

    #[test]
    fn batch_stops_on_first_error_partial_state_kept() {
        let runtime = Runtime::new(100.0, 4);
        let result = runtime.apply_batch(&[
            create(1, "const"),
            create(1, "const"), // duplicate -> NodeAlreadyExists
            create(2, "const"), // never applied
        ]);
        assert_eq!(result, Err(GraphError::NodeAlreadyExists(NodeId::new(1))));
        assert_eq!(runtime.node_count(), 1, "node 1 from before the error stays created");
    }

    #[test]
    fn duplicate_create_returns_node_already_exists() {
        let runtime = Runtime::new(100.0, 4);
        runtime.apply_batch(&[create(7, "const")]).unwrap();
        let result = runtime.apply_batch(&[create(7, "const")]);
        assert_eq!(result, Err(GraphError::NodeAlreadyExists(NodeId::new(7))));
    }

    #[test]
    fn deleted_node_reference_returns_node_not_found() {
        let runtime = Runtime::new(100.0, 4);
        runtime.apply_batch(&[create(1, "const")]).unwrap();
        runtime
            .apply_batch(&[Instruction::DeleteNode { node_id: NodeId::new(1) }])
            .unwrap();
        let result = runtime.apply_batch(&[Instruction::SetProperty {
            node_id: NodeId::new(1),
            key: "value".to_string(),
            value: Value::from(1.0_f32),
        }]);
        assert_eq!(result, Err(GraphError::NodeNotFound(NodeId::new(1))));
    }

    #[test]
    fn property_error_leaves_prior_value_unchanged() {
        let runtime = Runtime::new(100.0, 4);
        runtime.apply_batch(&[create(1, "scope")]).unwrap();
        runtime
            .apply_batch(&[Instruction::SetProperty {
                node_id: NodeId::new(1),
                key: "size".to_string(),
                value: Value::from(1024_i32),
            }])
            .unwrap();
        let result = runtime.apply_batch(&[Instruction::SetProperty {
            node_id: NodeId::new(1),
            key: "size".to_string(),
            value: Value::from(16_i32),
        }]);
        assert!(matches!(result, Err(GraphError::InvalidPropertyValue { .. })));
    }

    #[test]
    fn no_activate_roots_means_no_publish() {
        let runtime = Runtime::new(100.0, 4);
        runtime.apply_batch(&[create(1, "const"), Instruction::CommitUpdates]).unwrap();
        let mut out = vec![9.0_f32; 4];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out];
        runtime.process(4, &mut outputs);
        assert_eq!(outputs[0], [0.0; 4], "no sequence published yet, process emits silence");
    }

    #[test]
    fn shared_resource_survives_prune_while_referenced() {
        let runtime = Runtime::new(100.0, 4);
        assert!(runtime.update_shared_resource("X", SampleBuffer::F32(vec![1.0, 2.0])));
        runtime
            .apply_batch(&[
                create(1, "sample"),
                Instruction::SetProperty {
                    node_id: NodeId::new(1),
                    key: "name".to_string(),
                    value: Value::from("X"),
                },
            ])
            .unwrap();
        runtime.prune_shared_resources();
        assert_eq!(runtime.shared_resource_counts().0, 1);
    }

    #[test]
    fn deactivated_and_converged_root_is_dropped_from_the_table() {
        let runtime = Runtime::new(1000.0, 8);
        runtime
            .apply_batch(&[
                create(1, "root"),
                Instruction::ActivateRoots { node_ids: vec![NodeId::new(1)] },
                Instruction::CommitUpdates,
            ])
            .unwrap();
        assert_eq!(runtime.root_count(), 1);

        // Ramp partway up (ceil(sample_rate / 20) = 50 samples to converge;
        // a handful of blocks gets partway there) before deactivating, so
        // the fade is genuinely still in flight at the moment of deactivation
        // rather than trivially already at its (silent) target.
        let mut out = vec![0.0_f32; 8];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out];
        for _ in 0..3 {
            runtime.process(8, &mut outputs);
        }

        runtime
            .apply_batch(&[Instruction::ActivateRoots { node_ids: vec![] }, Instruction::CommitUpdates])
            .unwrap();
        // Still mid-fade right after deactivation: not eligible for removal.
        assert_eq!(runtime.root_count(), 1);

        for _ in 0..50 {
            runtime.process(8, &mut outputs);
        }

        // Any rebuild-triggering batch after the ramp has converged prunes
        // the now-irrelevant root from the table.
        runtime
            .apply_batch(&[Instruction::ActivateRoots { node_ids: vec![] }, Instruction::CommitUpdates])
            .unwrap();
        assert_eq!(
            runtime.root_count(),
            0,
            "converged, deactivated root must be dropped from the table"
        );
    }
}
