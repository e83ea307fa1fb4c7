//! Bounded byte ring buffer between the acquisition and recording tasks
//!
//! Items are variable-length byte spans stored back to back behind a two-byte
//! little-endian length. A push that does not fit is refused, never blocks
//! and never evicts older items, so a stalled consumer loses the newest
//! frames while everything already queued is delivered in order.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Deque;

/// Capacity of the sample ring in bytes.
pub const RING_BUFFER_BYTES: usize = 1024;

/// Bytes of length prefix stored in front of every item.
pub const ITEM_HEADER_LEN: usize = 2;

/// Largest number of samples carried by one item (both chips, all leads).
pub const MAX_ITEM_SAMPLES: usize = 16;

/// Largest item payload in bytes.
pub const MAX_ITEM_BYTES: usize = MAX_ITEM_SAMPLES * 4;

/// Fixed-capacity FIFO of byte items, safe to share between tasks.
pub struct SampleRing<M: RawMutex, const N: usize> {
    queue: Mutex<M, RefCell<Deque<u8, N>>>,
}

impl<M: RawMutex, const N: usize> SampleRing<M, N> {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Append one item. Returns `false` if it does not fit.
    pub fn try_push(&self, item: &[u8]) -> bool {
        if item.len() > MAX_ITEM_BYTES {
            return false;
        }

        self.queue.lock(|queue| {
            let mut queue = queue.borrow_mut();
            if ITEM_HEADER_LEN + item.len() > N - queue.len() {
                return false;
            }

            let len = (item.len() as u16).to_le_bytes();
            for byte in len.iter().chain(item) {
                // Space was checked above.
                let _ = queue.push_back(*byte);
            }
            true
        })
    }

    /// Remove the oldest item, copying it into `out`. Bytes that do not fit
    /// in `out` are discarded with the item. Returns the copied length.
    pub fn try_pop(&self, out: &mut [u8]) -> Option<usize> {
        self.queue.lock(|queue| {
            let mut queue = queue.borrow_mut();
            if queue.len() < ITEM_HEADER_LEN {
                return None;
            }

            let lo = queue.pop_front()?;
            let hi = queue.pop_front()?;
            let len = u16::from_le_bytes([lo, hi]) as usize;

            for i in 0..len {
                let byte = queue.pop_front()?;
                if let Some(slot) = out.get_mut(i) {
                    *slot = byte;
                }
            }
            Some(len.min(out.len()))
        })
    }

    /// Push samples as little-endian `f32`s.
    pub fn push_samples(&self, samples: &[f32]) -> bool {
        if samples.len() > MAX_ITEM_SAMPLES {
            return false;
        }

        let mut bytes = [0u8; MAX_ITEM_BYTES];
        for (chunk, sample) in bytes.chunks_exact_mut(4).zip(samples) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
        self.try_push(&bytes[..samples.len() * 4])
    }

    /// Pop one item of samples into `out`, returning the sample count.
    pub fn pop_samples(&self, out: &mut [f32; MAX_ITEM_SAMPLES]) -> Option<usize> {
        let mut bytes = [0u8; MAX_ITEM_BYTES];
        let len = self.try_pop(&mut bytes)?;

        let count = len / 4;
        for (sample, chunk) in out.iter_mut().zip(bytes[..count * 4].chunks_exact(4)) {
            *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Some(count)
    }

    /// Bytes currently queued, headers included.
    pub fn len(&self) -> usize {
        self.queue.lock(|queue| queue.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&self) {
        self.queue.lock(|queue| queue.borrow_mut().clear());
    }
}

impl<M: RawMutex, const N: usize> Default for SampleRing<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type Ring = SampleRing<CriticalSectionRawMutex, RING_BUFFER_BYTES>;

    #[test]
    fn test_items_come_out_in_order() {
        let ring = Ring::new();
        assert!(ring.try_push(b"abc"));
        assert!(ring.try_push(b""));
        assert!(ring.try_push(b"defgh"));

        let mut out = [0u8; 8];
        assert_eq!(ring.try_pop(&mut out), Some(3));
        assert_eq!(&out[..3], b"abc");
        assert_eq!(ring.try_pop(&mut out), Some(0));
        assert_eq!(ring.try_pop(&mut out), Some(5));
        assert_eq!(&out[..5], b"defgh");
        assert_eq!(ring.try_pop(&mut out), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_ring_refuses_new_items() {
        let ring = Ring::new();
        let frame = [1.0f32, 2.0, 3.0, 4.0, 5.0];

        // 20 bytes of samples plus the length prefix per item.
        let mut accepted = 0;
        while ring.push_samples(&frame) {
            accepted += 1;
        }
        assert_eq!(accepted, RING_BUFFER_BYTES / (ITEM_HEADER_LEN + 20));
        assert_eq!(accepted, 46);
        assert!(!ring.push_samples(&frame));

        let mut out = [0.0f32; MAX_ITEM_SAMPLES];
        assert_eq!(ring.pop_samples(&mut out), Some(5));
        assert_eq!(&out[..5], &frame);
        assert!(ring.push_samples(&frame));
        assert!(!ring.push_samples(&frame));
    }

    #[test]
    fn test_oversized_items_are_refused() {
        let ring = Ring::new();
        assert!(!ring.try_push(&[0u8; MAX_ITEM_BYTES + 1]));
        assert!(!ring.push_samples(&[0.0; MAX_ITEM_SAMPLES + 1]));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_short_output_drops_the_tail() {
        let ring = Ring::new();
        assert!(ring.try_push(b"abcdef"));
        assert!(ring.try_push(b"xy"));

        let mut out = [0u8; 4];
        assert_eq!(ring.try_pop(&mut out), Some(4));
        assert_eq!(&out, b"abcd");
        assert_eq!(ring.try_pop(&mut out), Some(2));
        assert_eq!(&out[..2], b"xy");
    }
}
