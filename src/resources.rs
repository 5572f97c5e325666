//! Shared Resource Map (§2.5, §4.4): a process-scope table of immutable
//! named sample buffers and mutable named feedback-tap buffers.
//!
//! The map's own table (names → handles) is touched only by the control
//! thread: name resolution always happens at `set_property`/`CREATE_NODE`
//! time, and a node stores a direct `Arc` clone of what it resolved rather
//! than a live handle back into the map (§4.4's Open Question resolution).
//! The mutable tap buffers those `Arc`s point to, by contrast, are touched
//! only by the audio thread once handed out — grounded on the
//! `UnsafeCell`-behind-`Arc` pattern in
//! `other_examples/920b651a_MeadowlarkDAW-Dropseed__src-graph-audio_buffer_pool.rs.rs`.

use std::{cell::UnsafeCell, collections::HashMap, sync::Arc};

/// An immutable sample buffer, inserted once and never mutated (§3
/// invariant 4). Carries its own element width since the wire format allows
/// either f32 or f64 source data (§6).
#[derive(Debug)]
pub enum SampleBuffer {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl SampleBuffer {
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::F32(v) => v.len(),
            SampleBuffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one sample as f32 regardless of the buffer's native width,
    /// returning silence past the end (§7 silent-degradation rule applies
    /// equally to out-of-range resource reads).
    pub fn sample_f32(&self, index: usize) -> f32 {
        match self {
            SampleBuffer::F32(v) => v.get(index).copied().unwrap_or(0.0),
            SampleBuffer::F64(v) => v.get(index).map(|s| *s as f32).unwrap_or(0.0),
        }
    }
}

/// A named, block-sized feedback-tap buffer (§4.7). Written by at most one
/// `TapOut` node per block, read by any number of `TapIn` nodes in the
/// *next* block — the read/write never overlaps within a block (§5 "Shared
/// resources"), so a lock would only ever be uncontended overhead; instead
/// the safety obligation is documented and enforced by the tap promotion
/// protocol living entirely inside `RenderSequence::finish_block` (§4.7).
pub struct TapBuffer {
    data: UnsafeCell<Box<[f32]>>,
}

unsafe impl Sync for TapBuffer {}
unsafe impl Send for TapBuffer {}

impl TapBuffer {
    fn new(block_size: usize) -> Self {
        TapBuffer {
            data: UnsafeCell::new(vec![0.0; block_size].into_boxed_slice()),
        }
    }

    /// Read the buffer as promoted at the end of the previous block.
    ///
    /// Safety: valid to call from the audio thread any time outside of a
    /// concurrent `promote` call on the same buffer; the tap protocol
    /// guarantees promotion happens strictly after all `TapIn` reads for a
    /// given block have already executed (§4.7 read-then-write ordering).
    pub fn read(&self) -> &[f32] {
        unsafe { &*self.data.get() }
    }

    /// Overwrite the buffer with this block's `TapOut` output (§4.7
    /// "promote"). Same safety contract as `read`.
    pub fn promote(&self, block: &[f32]) {
        let buf = unsafe { &mut *self.data.get() };
        let n = buf.len().min(block.len());
        buf[..n].copy_from_slice(&block[..n]);
        if n < buf.len() {
            buf[n..].fill(0.0);
        }
    }

    pub fn block_size(&self) -> usize {
        unsafe { (*self.data.get()).len() }
    }
}

/// Resolves named resources at property-set time. Implemented by
/// [`SharedResourceMap`]; nodes receive `&mut dyn ResourceResolver` through
/// [`crate::node::GraphNode::set_property`] rather than a `SharedResourceMap`
/// directly, so a test double can stand in without depending on the whole
/// map.
pub trait ResourceResolver {
    fn get_immutable(&self, name: &str) -> Option<Arc<SampleBuffer>>;
    fn get_or_create_mutable(&mut self, name: &str, block_size: usize) -> Arc<TapBuffer>;
}

pub struct SharedResourceMap {
    immutable: HashMap<String, Arc<SampleBuffer>>,
    mutable: HashMap<String, Arc<TapBuffer>>,
}

impl SharedResourceMap {
    pub fn new() -> Self {
        SharedResourceMap {
            immutable: HashMap::new(),
            mutable: HashMap::new(),
        }
    }

    /// Insert an immutable buffer. Returns `false` without modifying
    /// anything if `name` is already present (§4.4 "never overwrites").
    pub fn insert(&mut self, name: &str, buffer: SampleBuffer) -> bool {
        if self.immutable.contains_key(name) {
            return false;
        }
        self.immutable.insert(name.to_string(), Arc::new(buffer));
        true
    }

    /// Remove any immutable entry whose only remaining holder is this map
    /// (§4.4 `prune`).
    pub fn prune(&mut self) {
        self.immutable.retain(|_, buf| Arc::strong_count(buf) > 1);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.immutable.keys().map(|s| s.as_str())
    }

    pub fn immutable_len(&self) -> usize {
        self.immutable.len()
    }

    pub fn mutable_len(&self) -> usize {
        self.mutable.len()
    }
}

impl Default for SharedResourceMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceResolver for SharedResourceMap {
    fn get_immutable(&self, name: &str) -> Option<Arc<SampleBuffer>> {
        self.immutable.get(name).cloned()
    }

    fn get_or_create_mutable(&mut self, name: &str, block_size: usize) -> Arc<TapBuffer> {
        self.mutable
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TapBuffer::new(block_size)))
            .clone()
    }
}
