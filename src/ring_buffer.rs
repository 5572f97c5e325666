//! Lock-free multi-channel circular buffer with overwrite-on-full semantics
//! (§2.2). Used by analyzer nodes (scope, meter) to hand the control thread
//! a rolling window of recent samples without ever blocking the writer.
//!
//! Unlike [`crate::spsc`], a full buffer does not reject the write: the
//! oldest sample is silently overwritten. There is no "queue is full" error
//! because there is nothing for the writer to fail at — this is a window,
//! not a mailbox. The writer (audio thread) never blocks or allocates; a
//! reader racing a write may see a partially-overwritten window, which is
//! acceptable for diagnostic/visualization data but would not be for signal
//! data.

use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicUsize, Ordering},
    sync::Arc,
};

struct Channel {
    samples: UnsafeCell<Box<[f32]>>,
}

unsafe impl Sync for Channel {}

struct Inner {
    channels: Vec<Channel>,
    capacity: usize,
    write_pos: AtomicUsize,
    filled: AtomicUsize,
}

/// A multi-channel ring buffer with a single writer (the audio thread,
/// inside a node's `process`) and any number of readers (the control
/// thread, draining `process_events`).
#[derive(Clone)]
pub struct ChannelRingBuffer {
    inner: Arc<Inner>,
}

impl ChannelRingBuffer {
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let channels = (0..num_channels.max(1))
            .map(|_| Channel {
                samples: UnsafeCell::new(vec![0.0; capacity].into_boxed_slice()),
            })
            .collect();
        ChannelRingBuffer {
            inner: Arc::new(Inner {
                channels,
                capacity,
                write_pos: AtomicUsize::new(0),
                filled: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn num_channels(&self) -> usize {
        self.inner.channels.len()
    }

    /// Write one block of non-interleaved samples, one slice per channel.
    /// Safe to call only from the single writer thread for this buffer.
    pub fn write_block(&self, block: &[&[f32]]) {
        let cap = self.inner.capacity;
        let pos = self.inner.write_pos.load(Ordering::Relaxed);
        let mut max_written = 0;
        for (ch, samples) in block.iter().enumerate() {
            let Some(channel) = self.inner.channels.get(ch) else {
                break;
            };
            // Safety: this buffer has exactly one writer (the audio thread
            // owns `process` for the node holding this handle); readers only
            // ever take an immutable copy and tolerate torn reads.
            let buf = unsafe { &mut *channel.samples.get() };
            let mut p = pos;
            for &s in samples.iter() {
                buf[p] = s;
                p = (p + 1) % cap;
            }
            max_written = max_written.max(samples.len());
        }
        let new_pos = (pos + max_written) % cap;
        self.inner.write_pos.store(new_pos, Ordering::Release);
        let filled = self.inner.filled.load(Ordering::Relaxed);
        self.inner
            .filled
            .store((filled + max_written).min(cap), Ordering::Release);
    }

    /// Copy out the most recent `n` samples (oldest first) of one channel.
    /// Returns fewer than `n` samples if the buffer has not yet filled that
    /// far.
    pub fn read_recent(&self, channel: usize, n: usize) -> Vec<f32> {
        let Some(ch) = self.inner.channels.get(channel) else {
            return Vec::new();
        };
        let cap = self.inner.capacity;
        let filled = self.inner.filled.load(Ordering::Acquire).min(cap);
        let n = n.min(filled);
        let write_pos = self.inner.write_pos.load(Ordering::Acquire);
        let start = (write_pos + cap - n) % cap;
        // Safety: read-only snapshot; see write_block's safety note about
        // torn reads under a racing write being tolerated here.
        let buf = unsafe { &*ch.samples.get() };
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(buf[(start + i) % cap]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_recent_samples_in_order() {
        let rb = ChannelRingBuffer::new(1, 8);
        rb.write_block(&[&[1.0, 2.0, 3.0]]);
        assert_eq!(rb.read_recent(0, 3), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let rb = ChannelRingBuffer::new(1, 4);
        rb.write_block(&[&[1.0, 2.0, 3.0, 4.0]]);
        rb.write_block(&[&[5.0, 6.0]]);
        assert_eq!(rb.read_recent(0, 4), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn partially_filled_buffer_reports_only_what_was_written() {
        let rb = ChannelRingBuffer::new(1, 8);
        rb.write_block(&[&[1.0, 2.0]]);
        assert_eq!(rb.read_recent(0, 8), vec![1.0, 2.0]);
    }

    #[test]
    fn unknown_channel_reads_empty() {
        let rb = ChannelRingBuffer::new(1, 8);
        assert_eq!(rb.read_recent(5, 4), Vec::<f32>::new());
    }
}
