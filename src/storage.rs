//! Process-wide static storage: the weight store and the input/output
//! ping-pong buffers (spec.md §3).
//!
//! Grounded in `hpm-hal`'s generated singleton-table idiom, reduced to
//! the one-shot `AtomicBool` take guard also used by
//! [`crate::board::Board::take`] — there's no generated table here
//! because this board has three static regions to hand out, not dozens
//! of peripheral instances.

use core::sync::atomic::{AtomicBool, Ordering};

/// At least 180 KiB, per spec.md §3.
pub const WEIGHT_STORE_BYTES: usize = 180 * 1024;

/// Not spec-named; sized to comfortably hold the widest activation
/// vector spec.md §8's scenarios exercise while keeping both buffers
/// well under a page. Holds quantized i8 activations directly — the
/// same representation [`crate::tinyml::run_layer`] reads and writes —
/// rather than 32-bit words, since nothing downstream of the array's
/// own FIFO ports needs word alignment.
pub const PING_PONG_BYTES: usize = 512;

static TAKEN: AtomicBool = AtomicBool::new(false);

static mut WEIGHT_STORE: [u8; WEIGHT_STORE_BYTES] = [0; WEIGHT_STORE_BYTES];
static mut BUF_A: [i8; PING_PONG_BYTES] = [0; PING_PONG_BYTES];
static mut BUF_B: [i8; PING_PONG_BYTES] = [0; PING_PONG_BYTES];

/// Failure modes of [`Storage::take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The static regions were already handed out once this process.
    AlreadyTaken,
}

/// The three statically-placed regions spec.md §3 names, handed out
/// exactly once. Layers address into `weights` by offset; `buf_a`/
/// `buf_b` are the pair [`crate::tinyml::Network::run`] alternates
/// across layers.
pub struct Storage {
    pub weights: &'static mut [u8; WEIGHT_STORE_BYTES],
    pub buf_a: &'static mut [i8; PING_PONG_BYTES],
    pub buf_b: &'static mut [i8; PING_PONG_BYTES],
}

impl Storage {
    /// `Err(Error::AlreadyTaken)` on any call after the first.
    ///
    /// # Safety
    /// Must be called before any other code takes a reference into the
    /// backing statics, and only once per process lifetime.
    pub unsafe fn take() -> Result<Self, Error> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyTaken);
        }
        Ok(Self {
            weights: &mut *core::ptr::addr_of_mut!(WEIGHT_STORE),
            buf_a: &mut *core::ptr::addr_of_mut!(BUF_A),
            buf_b: &mut *core::ptr::addr_of_mut!(BUF_B),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_hands_out_the_regions_exactly_once() {
        // SAFETY: test-only, single-threaded, runs before any other
        // test in this binary touches `Storage`.
        let first = unsafe { Storage::take() };
        assert!(first.is_ok());
        let mut first = first.unwrap();
        assert_eq!(first.weights.len(), WEIGHT_STORE_BYTES);
        first.weights[0] = 42;
        assert_eq!(first.weights[0], 42);

        let second = unsafe { Storage::take() };
        assert_eq!(second.err(), Some(Error::AlreadyTaken));
    }
}
