//! Lock-free single-producer/single-consumer ring queue (§4.1).
//!
//! Capacity is rounded up to a power of two so that index wraparound can be
//! done with a mask instead of a modulo. Exactly one thread may call
//! [`Producer::push`]/[`Producer::push_bulk`] and exactly one (possibly
//! different) thread may call [`Consumer::pop`]; using either end from more
//! than one thread at a time is undefined behavior as far as this type's
//! invariants are concerned (it will not panic, but FIFO order is not
//! guaranteed).

use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send> Sync for Slot<T> {}

struct Shared<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    // Indices only ever move forward; wraparound of the index itself (not
    // the slot it maps to) is fine since it happens at usize::MAX, not at
    // capacity.
    write: AtomicUsize,
    read: AtomicUsize,
}

/// Create a bound producer/consumer pair sharing one ring of `capacity`
/// slots (rounded up to the next power of two, minimum 1).
pub fn channel<T: Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let capacity = capacity.max(1).next_power_of_two();
    let mut slots = Vec::with_capacity(capacity);
    for _ in 0..capacity {
        slots.push(Slot {
            value: UnsafeCell::new(MaybeUninit::uninit()),
        });
    }
    let shared = Arc::new(Shared {
        slots: slots.into_boxed_slice(),
        mask: capacity - 1,
        write: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
    });
    (
        Producer {
            shared: shared.clone(),
        },
        Consumer { shared },
    )
}

/// The write end of an [`channel`]. Never blocks, never allocates.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

/// The read end of an [`channel`]. Never blocks, never allocates.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

unsafe impl<T: Send> Send for Producer<T> {}
unsafe impl<T: Send> Send for Consumer<T> {}

impl<T> Producer<T> {
    /// Advisory occupied-slot count; may be stale the instant it's read.
    pub fn size(&self) -> usize {
        let w = self.shared.write.load(Ordering::Relaxed);
        let r = self.shared.read.load(Ordering::Acquire);
        w.wrapping_sub(r)
    }

    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }

    /// Push one item. Returns `Err(item)` without any side effect if the
    /// ring is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let w = self.shared.write.load(Ordering::Relaxed);
        let r = self.shared.read.load(Ordering::Acquire);
        if w.wrapping_sub(r) >= self.capacity() {
            return Err(item);
        }
        let idx = w & self.shared.mask;
        unsafe {
            (*self.shared.slots[idx].value.get()).write(item);
        }
        self.shared.write.store(w.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Push every item in `items`, or none at all, leaving `items` untouched
    /// on failure. Visible to the consumer atomically: a popper never
    /// observes only a prefix of this batch.
    pub fn push_bulk(&mut self, items: Vec<T>) -> Result<(), Vec<T>> {
        let w = self.shared.write.load(Ordering::Relaxed);
        let r = self.shared.read.load(Ordering::Acquire);
        let free = self.capacity() - w.wrapping_sub(r);
        if items.len() > free {
            return Err(items);
        }
        let count = items.len();
        for (i, item) in items.into_iter().enumerate() {
            let idx = w.wrapping_add(i) & self.shared.mask;
            unsafe {
                (*self.shared.slots[idx].value.get()).write(item);
            }
        }
        self.shared
            .write
            .store(w.wrapping_add(count), Ordering::Release);
        Ok(())
    }
}

impl<T> Consumer<T> {
    pub fn size(&self) -> usize {
        let w = self.shared.write.load(Ordering::Acquire);
        let r = self.shared.read.load(Ordering::Relaxed);
        w.wrapping_sub(r)
    }

    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }

    /// Pop one item. Returns `None` without any side effect if the ring is
    /// empty.
    pub fn pop(&mut self) -> Option<T> {
        let r = self.shared.read.load(Ordering::Relaxed);
        let w = self.shared.write.load(Ordering::Acquire);
        if r == w {
            return None;
        }
        let idx = r & self.shared.mask;
        let item = unsafe { (*self.shared.slots[idx].value.get()).assume_init_read() };
        self.shared.read.store(r.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Drain every item currently available, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.size());
        while let Some(item) = self.pop() {
            out.push(item);
        }
        out
    }

    /// Pop and discard items until the ring is empty, running `f` on each.
    /// Used by nodes whose `process_events` just wants to forward items
    /// without collecting them into a `Vec` first.
    pub fn drain_with<F: FnMut(T)>(&mut self, mut f: F) {
        while let Some(item) = self.pop() {
            f(item);
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Only the slots between read and write hold initialized values;
        // the rest are still MaybeUninit::uninit() and must not be dropped.
        let mut r = *self.read.get_mut();
        let w = *self.write.get_mut();
        while r != w {
            let idx = r & self.mask;
            unsafe {
                (*self.slots[idx].value.get()).assume_init_drop();
            }
            r = r.wrapping_add(1);
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Pushing fewer items than capacity and draining them back out must
        /// always recover the same sequence in the same order (§4.1 FIFO
        /// contract), for any capacity/sequence pairing that fits.
        #[test]
        fn fifo_order_holds_for_any_sequence_within_capacity(
            capacity in 1usize..64,
            values in prop::collection::vec(any::<i32>(), 0..64),
        ) {
            let (mut tx, mut rx) = channel::<i32>(capacity);
            let cap = tx.capacity();
            let mut expected = Vec::new();
            for v in values {
                if tx.push(v).is_ok() {
                    expected.push(v);
                }
                if expected.len() == cap {
                    // Drain fully before continuing so later pushes have room;
                    // otherwise every push past this point would fail and the
                    // test would trivially hold.
                    prop_assert_eq!(rx.drain(), std::mem::take(&mut expected));
                }
            }
            prop_assert_eq!(rx.drain(), expected);
        }

        /// `push` never succeeds past the rounded-up capacity, and a full
        /// queue's failed push leaves its contents untouched (§4.1, §8
        /// boundary behaviors).
        #[test]
        fn push_never_exceeds_capacity(capacity in 1usize..32, extra in 0usize..8) {
            let (mut tx, mut rx) = channel::<u32>(capacity);
            let cap = tx.capacity();
            for i in 0..cap as u32 {
                prop_assert!(tx.push(i).is_ok());
            }
            for _ in 0..extra {
                prop_assert!(tx.push(999).is_err());
            }
            prop_assert_eq!(rx.size(), cap);
        }
    }
}
