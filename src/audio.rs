// Audio handoff ring
//
// The host's audio callback runs on its own thread; everything else in the
// core is single-threaded. The two sides meet in a small bank of sample
// buffers with one "full" flag each: the producer fills a slot and sets
// its flag, the consumer drains it and clears the flag. The flag is the
// sole synchronisation primitive, and each buffer is only ever touched by
// the side the flag currently assigns it to.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::apu::AUDIO_BUFFER_SIZE;

struct Slot {
    full: AtomicBool,
    samples: UnsafeCell<Box<[f64; AUDIO_BUFFER_SIZE]>>,
}

// The full/empty flag hands each slot to exactly one side at a time;
// acquire/release ordering on it fences the sample data.
unsafe impl Sync for Slot {}

struct Shared {
    slots: Box<[Slot]>,
}

/// A fixed bank of audio buffers connecting the emulation thread to the
/// host audio thread.
pub struct AudioRing {
    shared: Arc<Shared>,
}

/// Emulation-side handle: fills slots in order.
pub struct AudioProducer {
    shared: Arc<Shared>,
    next: usize,
}

/// Audio-thread handle: drains slots in order.
pub struct AudioConsumer {
    shared: Arc<Shared>,
    next: usize,
}

impl AudioRing {
    /// A ring of `slots` buffers of [`AUDIO_BUFFER_SIZE`] samples each.
    pub fn new(slots: usize) -> AudioRing {
        assert!(slots >= 2, "a ring needs at least two slots");
        let slots = (0..slots)
            .map(|_| Slot {
                full: AtomicBool::new(false),
                samples: UnsafeCell::new(Box::new([0.0; AUDIO_BUFFER_SIZE])),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        AudioRing {
            shared: Arc::new(Shared { slots }),
        }
    }

    /// Split into the two thread-side handles.
    pub fn split(self) -> (AudioProducer, AudioConsumer) {
        (
            AudioProducer {
                shared: Arc::clone(&self.shared),
                next: 0,
            },
            AudioConsumer {
                shared: self.shared,
                next: 0,
            },
        )
    }
}

impl AudioProducer {
    /// Copy one finished APU buffer into the next slot. Returns false
    /// (dropping the buffer) when the consumer has fallen behind and the
    /// slot is still full.
    pub fn push(&mut self, samples: &[f64]) -> bool {
        debug_assert_eq!(samples.len(), AUDIO_BUFFER_SIZE);
        let slot = &self.shared.slots[self.next];
        if slot.full.load(Ordering::Acquire) {
            return false;
        }
        // The flag is clear, so this side owns the buffer
        unsafe {
            (*slot.samples.get()).copy_from_slice(samples);
        }
        slot.full.store(true, Ordering::Release);
        self.next = (self.next + 1) % self.shared.slots.len();
        true
    }
}

impl AudioConsumer {
    /// Drain the next slot into `out`. Returns false when no buffer is
    /// ready (the callback should emit silence).
    pub fn pop(&mut self, out: &mut [f64]) -> bool {
        debug_assert_eq!(out.len(), AUDIO_BUFFER_SIZE);
        let slot = &self.shared.slots[self.next];
        if !slot.full.load(Ordering::Acquire) {
            return false;
        }
        // The flag is set, so this side owns the buffer
        unsafe {
            out.copy_from_slice(&**slot.samples.get());
        }
        slot.full.store(false, Ordering::Release);
        self.next = (self.next + 1) % self.shared.slots.len();
        true
    }
}
