//! Lock-free ring buffer
//!
//! Bounded multi-producer/multi-consumer queue used by the event bus for
//! asynchronous publishing. Producers and consumers coordinate through two
//! monotonically increasing counters; only the counters are advanced with
//! compare-and-swap. Each slot holds a pointer to a boxed value, swapped in by
//! the producer that claimed it and swapped out by the consumer that claimed it.

use std::hint;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::thread;

/// Spins before yielding the thread while waiting on a reserved slot
const SPIN_LIMIT: u32 = 64;

/// Fixed-capacity lock-free MPMC queue
///
/// Capacity is rounded up to the next power of two so slot indexes can be
/// masked instead of taken modulo. A push never blocks on a full buffer and a
/// pop never blocks on an empty one; both report the condition to the caller.
pub struct RingBuffer<T> {
    slots: Box<[AtomicPtr<T>]>,
    mask: usize,
    /// Next position to write
    head: AtomicUsize,
    /// Next position to read
    tail: AtomicUsize,
    _owns: PhantomData<*mut T>,
}

// Values move between threads through the slots, so sharing the buffer only
// requires the values themselves to be Send.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at least `capacity` values (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            _owns: PhantomData,
        }
    }

    /// Push a value, handing it back if the buffer is full
    pub fn push(&self, value: T) -> Result<(), T> {
        let capacity = self.capacity();

        // Tail is loaded before head so the snapshot always has head >= tail.
        let position = loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);

            if head.wrapping_sub(tail) >= capacity {
                return Err(value);
            }

            if self
                .head
                .compare_exchange_weak(head, head.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break head;
            }
        };

        let raw = Box::into_raw(Box::new(value));
        let slot = &self.slots[position & self.mask];

        // The slot may still hold the value from one lap ago if its consumer has
        // claimed it but not taken it out yet. Wait instead of overwriting.
        let mut spins = 0;
        while slot
            .compare_exchange_weak(ptr::null_mut(), raw, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            backoff(&mut spins);
        }

        Ok(())
    }

    /// Pop the oldest value, or None if the buffer is empty
    pub fn pop(&self) -> Option<T> {
        let position = loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);

            if tail == head {
                return None;
            }

            if self
                .tail
                .compare_exchange_weak(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break tail;
            }
        };

        let slot = &self.slots[position & self.mask];

        // The producer that claimed this position may not have stored its value
        // yet. The position is ours now, so wait for it rather than report empty.
        let mut spins = 0;
        loop {
            let raw = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !raw.is_null() {
                // SAFETY: non-null slot pointers always come from Box::into_raw in
                // push, and the swap above gives this consumer sole ownership.
                let value = unsafe { Box::from_raw(raw) };
                return Some(*value);
            }
            backoff(&mut spins);
        }
    }

    /// Pop up to `max` values into `out`, returning how many were appended
    pub fn pop_batch(&self, max: usize, out: &mut Vec<T>) -> usize {
        let mut count = 0;
        while count < max {
            match self.pop() {
                Some(value) => {
                    out.push(value);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Approximate number of values in the buffer, within `[0, capacity]`
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.capacity())
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            let raw = *slot.get_mut();
            if !raw.is_null() {
                // SAFETY: &mut self means no other thread can observe the slot.
                drop(unsafe { Box::from_raw(raw) });
            }
        }
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

fn backoff(spins: &mut u32) {
    if *spins < SPIN_LIMIT {
        *spins += 1;
        hint::spin_loop();
    } else {
        thread::yield_now();
    }
}
