//! Compiled render sequence and its per-root wrapper (§4.5, §4.6).
//!
//! Grounded on the teacher's `src/core/engine/stategraph.rs` (a linear
//! vector of compiled processor entries, rebuilt wholesale on topology
//! edits rather than patched in place) generalized from "one static list"
//! to "an ordered per-root DFS schedule of process calls" — and on §4.6's
//! crossfade math directly, since the teacher's own roots are plain static
//! processors with no gain ramp of their own.
//!
//! One simplification versus a literal reading of §4.5's "append a closure
//! per root" wording: because post-order DFS across *all* roots already
//! produces one global order in which every node appears after everything
//! it depends on, this implementation executes the merged schedule exactly
//! once per block (§4.5 step 4's "each node is emitted exactly once across
//! the entire sequence" guarantee makes this sound) rather than replaying
//! per-root closure lists that would just skip already-executed nodes
//! anyway. Each root's contribution is still tracked individually for the
//! crossfade/channel-sum step (§4.6), which is the part that is genuinely
//! per-root.

use std::{
    cell::UnsafeCell,
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc,
    },
};

use smallvec::SmallVec;

use crate::{
    catalog::tap::TapOut,
    engine::scratch::ScratchArena,
    node::{BlockContext, GraphNode, NodeId},
};

/// ±20 gain units per second, expressed as a per-sample delta once divided
/// by the sample rate (§4.6).
const GAIN_RAMP_PER_SECOND: f32 = 20.0;
const GAIN_EPSILON: f32 = 1e-4;

/// Per-root crossfade/channel state (§4.6), owned by the `Runtime` and
/// shared by `Arc` into every `RenderSequence` built while the root is
/// known, so the gain ramp and channel assignment survive a rebuild rather
/// than resetting every time `ACTIVATE_ROOTS` fires.
pub struct RootGainState {
    target_active: AtomicBool,
    // Safety: only the audio thread ever reads or writes this, inside
    // `RenderSequence::process`, which runs on exactly one thread at a time
    // (§5); it is not touched by `set_property` or any control-thread path.
    current_gain: UnsafeCell<f32>,
    channel: AtomicI32,
}

unsafe impl Sync for RootGainState {}

impl RootGainState {
    pub fn new(channel: i32) -> Arc<Self> {
        Arc::new(RootGainState {
            target_active: AtomicBool::new(false),
            current_gain: UnsafeCell::new(0.0),
            channel: AtomicI32::new(channel),
        })
    }

    pub fn set_active(&self, active: bool) {
        self.target_active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.target_active.load(Ordering::Relaxed)
    }

    pub fn set_channel(&self, channel: i32) {
        self.channel.store(channel, Ordering::Relaxed);
    }

    pub fn channel(&self) -> i32 {
        self.channel.load(Ordering::Relaxed)
    }

    fn current_gain(&self) -> f32 {
        unsafe { *self.current_gain.get() }
    }

    /// True while this root is still active, or still mid-ramp toward
    /// silence. Used both to gate the per-block output sum (§4.6) and, by the
    /// control thread, to decide when a converged-and-deactivated root can be
    /// dropped from the root table entirely (§4.8's `ACTIVATE_ROOTS`
    /// handling).
    pub(crate) fn still_running(&self) -> bool {
        let target = if self.is_active() { 1.0 } else { 0.0 };
        self.is_active() || (self.current_gain() - target).abs() > GAIN_EPSILON
    }

    /// Ramp `current_gain` toward its target by one sample (§4.6) and
    /// return the gain to apply to that sample.
    fn step(&self, delta_per_sample: f32) -> f32 {
        let target: f32 = if self.is_active() { 1.0 } else { 0.0 };
        let current = unsafe { &mut *self.current_gain.get() };
        if *current < target {
            *current = (*current + delta_per_sample).min(target);
        } else if *current > target {
            *current = (*current - delta_per_sample).max(target);
        }
        *current
    }
}

struct ScheduledNode {
    node: Arc<dyn GraphNode>,
    output_slot: usize,
    input_slots: SmallVec<[usize; 4]>,
    // Every root whose subtree reaches this node. A node stops being
    // processed once none of its owners are `still_running()` any more
    // (§4.6, §3 invariant 5's "ceases to reference any node uniquely
    // reachable from R"); a node reachable from more than one root keeps
    // running as long as any one of them does. Stored as gain-state handles
    // rather than indices into `RenderSequence::roots` so nothing here
    // depends on that vector's positions lining up with any other list.
    owners: SmallVec<[Arc<RootGainState>; 2]>,
}

struct RootEntry {
    output_slot: usize,
    gain_state: Arc<RootGainState>,
}

/// A compiled, linear schedule of node `process` calls plus the per-root
/// crossfade/sum step and the tap promotion pass (§4.5–§4.7). Built on the
/// control thread, executed on the audio thread; `process` never allocates.
pub struct RenderSequence {
    arena: ScratchArena,
    schedule: Vec<ScheduledNode>,
    roots: Vec<RootEntry>,
    tap_outs: Vec<(Arc<dyn GraphNode>, Arc<RootGainState>)>,
    sample_rate: f32,
}

impl RenderSequence {
    /// Build a new sequence from the current node/edge tables (§4.5 steps
    /// 2–6), allocating a fresh scratch arena. Convenience wrapper over
    /// [`RenderSequence::rebuild`] for callers with no recycled arena to
    /// offer (tests, and the very first build before any pool exists).
    pub fn build(
        block_size: usize,
        sample_rate: f32,
        nodes: &HashMap<NodeId, Arc<dyn GraphNode>>,
        edges: &HashMap<NodeId, Vec<NodeId>>,
        roots: &[(NodeId, Arc<RootGainState>)],
    ) -> Self {
        Self::rebuild(ScratchArena::new(block_size), sample_rate, nodes, edges, roots)
    }

    /// Build a new sequence reusing `arena` (§4.5 step 1's "recycle a
    /// `RenderSequence` object from an outer ref-counted pool", step 2's
    /// "reset a bump-style buffer allocator"). Whether `arena` is freshly
    /// allocated or reclaimed from a previous build's now-unreferenced
    /// sequence is the caller's concern (see `Runtime::build_and_publish`'s
    /// `sequence_pool`); either way it is reset here before reuse.
    pub fn rebuild(
        mut arena: ScratchArena,
        sample_rate: f32,
        nodes: &HashMap<NodeId, Arc<dyn GraphNode>>,
        edges: &HashMap<NodeId, Vec<NodeId>>,
        roots: &[(NodeId, Arc<RootGainState>)],
    ) -> Self {
        arena.reset();
        let mut schedule = Vec::new();
        let mut slot_of: HashMap<NodeId, usize> = HashMap::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut tap_outs: Vec<(Arc<dyn GraphNode>, Arc<RootGainState>)> = Vec::new();
        let mut root_entries = Vec::with_capacity(roots.len());

        // Computed independently of the dedup-as-you-go `visited` set below,
        // since that set only records which root's traversal happened to
        // schedule a shared node *first* — a node reachable from several
        // roots needs every one of those roots recorded as an owner, not
        // just the first to reach it (see `ScheduledNode::owners`). Paired
        // with the owning gain state directly, rather than kept as a
        // parallel list indexed like `roots`, so nothing downstream has to
        // assume the two stay aligned.
        let reach_sets: Vec<(Arc<RootGainState>, HashSet<NodeId>)> = roots
            .iter()
            .map(|(root_id, gain_state)| {
                let mut set = HashSet::new();
                collect_reachable(*root_id, edges, &mut set);
                (gain_state.clone(), set)
            })
            .collect();

        for (root_id, gain_state) in roots {
            visit(
                *root_id,
                nodes,
                edges,
                &mut arena,
                &mut schedule,
                &mut slot_of,
                &mut visited,
                gain_state,
                &mut tap_outs,
                &reach_sets,
            );
            if let Some(&slot) = slot_of.get(root_id) {
                root_entries.push(RootEntry {
                    output_slot: slot,
                    gain_state: gain_state.clone(),
                });
            }
        }

        RenderSequence {
            arena,
            schedule,
            roots: root_entries,
            tap_outs,
            sample_rate,
        }
    }

    /// Realtime entry point (§4.8 `process`). `outputs` is non-interleaved,
    /// one slice per output channel, and is zeroed here before any root
    /// additively sums into it (§6).
    pub fn process(&self, num_samples: usize, outputs: &mut [&mut [f32]]) {
        for ch in outputs.iter_mut() {
            ch[..num_samples].fill(0.0);
        }

        for scheduled in &self.schedule {
            // Skip nodes whose every owning root has finished fading out:
            // they are no longer reachable from anything the audio thread
            // still needs this block, and by the time every owner has
            // converged a fresh sequence that omits them entirely will have
            // replaced this one anyway (§3 invariant 5, §4.6).
            if !scheduled.owners.iter().any(|owner| owner.still_running()) {
                continue;
            }
            let inputs: SmallVec<[&[f32]; 4]> = scheduled
                .input_slots
                .iter()
                .map(|&slot| &self.arena.slot(slot)[..num_samples])
                .collect();
            // Safety: post-order scheduling (§4.5 step 4) guarantees no
            // other live borrow of this node's own output slot exists right
            // now, and `inputs` borrows only already-finished sibling slots.
            let output = unsafe { &mut self.arena.slot_mut(scheduled.output_slot)[..num_samples] };
            let mut ctx = BlockContext {
                inputs: &inputs,
                output,
            };
            scheduled.node.process(&mut ctx);
        }

        let delta_per_sample = GAIN_RAMP_PER_SECOND / self.sample_rate;
        for root in &self.roots {
            let channel = root.gain_state.channel();
            if !root.gain_state.still_running() {
                continue;
            }
            let Some(out_ch) = usize::try_from(channel)
                .ok()
                .and_then(|c| outputs.get_mut(c))
            else {
                continue;
            };
            let scratch = self.arena.slot(root.output_slot);
            for i in 0..num_samples {
                let gain = root.gain_state.step(delta_per_sample);
                out_ch[i] += scratch[i] * gain;
            }
        }

        for (node, gain_state) in &self.tap_outs {
            if gain_state.is_active() {
                if let Some(tap_out) = node.as_any().downcast_ref::<TapOut>() {
                    tap_out.promote();
                }
            }
        }
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn node_count(&self) -> usize {
        self.schedule.len()
    }

    /// Consume this sequence and hand back just its scratch arena (§4.5 step
    /// 1's pool recycling), dropping the schedule/roots/tap-out bookkeeping.
    /// Only called once a sequence's pool entry is its last reference (see
    /// `Runtime::build_and_publish`), so this runs entirely on the control
    /// thread and is not itself a realtime-path operation.
    pub fn into_arena(self) -> ScratchArena {
        self.arena
    }
}

/// Full transitive closure of `id`'s children, following the same
/// parent-to-children `edges` map `visit` schedules from. Computed per root,
/// independent of any other root's traversal, so that a node shared by
/// several roots is correctly recorded as reachable from every one of them.
fn collect_reachable(id: NodeId, edges: &HashMap<NodeId, Vec<NodeId>>, out: &mut HashSet<NodeId>) {
    if !out.insert(id) {
        return;
    }
    if let Some(children) = edges.get(&id) {
        for &child in children {
            collect_reachable(child, edges, out);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn visit(
    id: NodeId,
    nodes: &HashMap<NodeId, Arc<dyn GraphNode>>,
    edges: &HashMap<NodeId, Vec<NodeId>>,
    arena: &mut ScratchArena,
    schedule: &mut Vec<ScheduledNode>,
    slot_of: &mut HashMap<NodeId, usize>,
    visited: &mut HashSet<NodeId>,
    gain_state: &Arc<RootGainState>,
    tap_outs: &mut Vec<(Arc<dyn GraphNode>, Arc<RootGainState>)>,
    reach_sets: &[(Arc<RootGainState>, HashSet<NodeId>)],
) {
    if visited.contains(&id) {
        return;
    }
    visited.insert(id);
    let Some(node) = nodes.get(&id) else {
        return;
    };

    let mut input_slots = SmallVec::new();
    if let Some(children) = edges.get(&id) {
        for &child in children {
            visit(
                child, nodes, edges, arena, schedule, slot_of, visited, gain_state, tap_outs,
                reach_sets,
            );
            if let Some(&slot) = slot_of.get(&child) {
                input_slots.push(slot);
            }
        }
    }

    let output_slot = arena.take();
    slot_of.insert(id, output_slot);

    if node.as_any().downcast_ref::<TapOut>().is_some() {
        tap_outs.push((node.clone(), gain_state.clone()));
    }

    let owners: SmallVec<[Arc<RootGainState>; 2]> = reach_sets
        .iter()
        .filter(|(_, set)| set.contains(&id))
        .map(|(owner, _)| owner.clone())
        .collect();

    schedule.push(ScheduledNode {
        node: node.clone(),
        output_slot,
        input_slots,
        owners,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Constant, TapIn};
    use crate::resources::SharedResourceMap;

    fn make_const(value: f32) -> Arc<dyn GraphNode> {
        let node = Constant::new();
        let mut resources = SharedResourceMap::new();
        node.set_property("value", crate::value::Value::from(value), &mut resources)
            .unwrap();
        Arc::new(node)
    }

    #[test]
    fn smallest_graph_sums_a_constant_into_channel_zero() {
        let mut nodes: HashMap<NodeId, Arc<dyn GraphNode>> = HashMap::new();
        let mut edges: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let root_id = NodeId::new(1);
        let const_id = NodeId::new(2);
        nodes.insert(root_id, make_const(0.0));
        nodes.insert(const_id, make_const(0.5));
        edges.insert(root_id, vec![const_id]);

        let gain_state = RootGainState::new(0);
        gain_state.set_active(true);
        // Converge the ramp instantly for this test by stepping it enough
        // times up front isn't available pre-build; instead run enough
        // blocks below to let it settle, matching the real ramp behavior.
        let roots = vec![(root_id, gain_state.clone())];

        let seq = RenderSequence::build(4, 10.0, &nodes, &edges, &roots);
        let mut out = vec![0.0_f32; 4];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out];
        // Root node itself is a plain Constant(0.0); its own process()
        // ignores children, so this test only exercises scheduling and the
        // gain ramp, not child summation (see the runtime-level integration
        // test for a true passthrough root).
        for _ in 0..20 {
            seq.process(4, &mut outputs);
        }
        assert_eq!(seq.node_count(), 2);
        assert_eq!(seq.root_count(), 1);
    }

    #[test]
    fn tap_out_is_collected_for_promotion() {
        let mut nodes: HashMap<NodeId, Arc<dyn GraphNode>> = HashMap::new();
        let mut edges: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let root_id = NodeId::new(1);
        let tap_id = NodeId::new(2);
        let mut resources = SharedResourceMap::new();
        let tap_out = Arc::new(TapOut::new(4));
        tap_out
            .set_property("name", crate::value::Value::from("L"), &mut resources)
            .unwrap();
        nodes.insert(root_id, make_const(0.0));
        nodes.insert(tap_id, tap_out);
        edges.insert(root_id, vec![tap_id]);

        let gain_state = RootGainState::new(0);
        gain_state.set_active(true);
        let roots = vec![(root_id, gain_state)];
        let seq = RenderSequence::build(4, 10.0, &nodes, &edges, &roots);
        assert_eq!(seq.tap_outs.len(), 1);
    }

    #[test]
    fn tap_in_with_no_matching_buffer_is_silent() {
        let tap_in = TapIn::new();
        let mut out = [1.0; 4];
        let mut ctx = BlockContext {
            inputs: &[],
            output: &mut out,
        };
        tap_in.process(&mut ctx);
        assert_eq!(out, [0.0; 4]);
    }

    struct CountingNode {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl GraphNode for CountingNode {
        fn set_property(
            &self,
            _key: &str,
            _value: crate::value::Value,
            _resources: &mut dyn crate::resources::ResourceResolver,
        ) -> Result<(), crate::error::PropertyError> {
            Ok(())
        }

        fn get_property(&self, _key: &str) -> Option<crate::value::Value> {
            None
        }

        fn process(&self, ctx: &mut BlockContext) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.fill_silence();
        }

        fn type_name(&self) -> &'static str {
            "test_counter"
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn node_stops_being_processed_once_its_owning_root_converges() {
        let mut nodes: HashMap<NodeId, Arc<dyn GraphNode>> = HashMap::new();
        let mut edges: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let root_id = NodeId::new(1);
        let child_id = NodeId::new(2);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        nodes.insert(root_id, make_const(0.0));
        nodes.insert(child_id, Arc::new(CountingNode { calls: calls.clone() }));
        edges.insert(root_id, vec![child_id]);

        let gain_state = RootGainState::new(0);
        gain_state.set_active(true);
        let roots = vec![(root_id, gain_state.clone())];
        let seq = RenderSequence::build(4, 10.0, &nodes, &edges, &roots);

        let mut out = vec![0.0_f32; 4];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out];
        seq.process(4, &mut outputs);
        assert!(calls.load(Ordering::SeqCst) > 0, "child runs while its root is active");

        gain_state.set_active(false);
        // ceil(sample_rate / 20) = 1 sample at this rate; a handful of
        // 4-sample blocks is far more than enough to converge to silence.
        for _ in 0..5 {
            seq.process(4, &mut outputs);
        }
        let after_converged = calls.load(Ordering::SeqCst);
        for _ in 0..5 {
            seq.process(4, &mut outputs);
        }
        assert_eq!(
            calls.load(Ordering::SeqCst),
            after_converged,
            "child must stop being processed once its only owning root has converged to silence"
        );
    }
}
