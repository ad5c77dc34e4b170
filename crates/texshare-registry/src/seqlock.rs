//! Sequence-stamped cells over shared memory.
//!
//! A cell is a stamp word followed by payload words, all `AtomicU64` so that
//! concurrent access from several processes is defined. The stamp is even
//! while the payload is stable and odd while a writer holds the cell.
//!
//! Readers copy the payload and accept the copy only if the stamp was even
//! and unchanged across the copy. Writers claim the cell by moving the stamp
//! from even to odd with a compare-exchange, so two writers never interleave
//! even without the segment lock.

use std::hint;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::thread;

/// Attempts before a reader or writer reports the cell as busy.
pub const MAX_ATTEMPTS: usize = 4096;

/// Spins before backing off to `thread::yield_now`.
const SPINS_BEFORE_YIELD: usize = 64;

fn backoff(attempt: usize) {
    if attempt < SPINS_BEFORE_YIELD {
        hint::spin_loop();
    } else {
        thread::yield_now();
    }
}

#[derive(Clone, Copy)]
pub struct SeqCell<'a> {
    stamp: &'a AtomicU64,
    payload: &'a [AtomicU64],
}

impl<'a> SeqCell<'a> {
    pub fn new(stamp: &'a AtomicU64, payload: &'a [AtomicU64]) -> Self {
        Self { stamp, payload }
    }

    /// Cell whose stamp is `words[0]`, or `None` for an empty slice.
    #[cfg(test)]
    pub fn from_words(words: &'a [AtomicU64]) -> Option<Self> {
        let (stamp, payload) = words.split_first()?;
        Some(Self::new(stamp, payload))
    }

    #[cfg(test)]
    pub fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }

    /// Copy a consistent payload into `out`. Returns `false` if no stable
    /// snapshot was seen within [`MAX_ATTEMPTS`].
    pub fn read_into(&self, out: &mut [u64]) -> bool {
        debug_assert_eq!(out.len(), self.payload.len());
        for attempt in 0..MAX_ATTEMPTS {
            let before = self.stamp.load(Ordering::Acquire);
            if before & 1 == 1 {
                backoff(attempt);
                continue;
            }
            for (dst, word) in out.iter_mut().zip(self.payload) {
                *dst = word.load(Ordering::Relaxed);
            }
            fence(Ordering::Acquire);
            if self.stamp.load(Ordering::Relaxed) == before {
                return true;
            }
            backoff(attempt);
        }
        false
    }

    /// Claim the cell, let `f` edit a copy of the payload, publish the copy and
    /// release. Returns `None` if the cell could not be claimed.
    ///
    /// If `f` returns `Err`, nothing is published and the stamp is restored
    /// to its previous value.
    pub fn write<R, E>(
        &self,
        f: impl FnOnce(&mut [u64]) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let claimed = self.claim()?;

        let mut words: Vec<u64> = self
            .payload
            .iter()
            .map(|w| w.load(Ordering::Relaxed))
            .collect();
        let result = f(&mut words);

        match &result {
            Ok(_) => {
                for (word, value) in self.payload.iter().zip(&words) {
                    word.store(*value, Ordering::Relaxed);
                }
                self.stamp.store(claimed.wrapping_add(1), Ordering::Release);
            }
            Err(_) => self.stamp.store(claimed.wrapping_sub(1), Ordering::Release),
        }
        Some(result)
    }

    /// Move the stamp from even to odd; returns the odd value.
    fn claim(&self) -> Option<u64> {
        for attempt in 0..MAX_ATTEMPTS {
            let current = self.stamp.load(Ordering::Relaxed);
            if current & 1 == 0
                && self
                    .stamp
                    .compare_exchange_weak(
                        current,
                        current.wrapping_add(1),
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                // Payload stores must not become visible before the odd stamp.
                fence(Ordering::Release);
                return Some(current.wrapping_add(1));
            }
            backoff(attempt);
        }
        None
    }
}
