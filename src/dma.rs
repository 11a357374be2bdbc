//! Single-channel, bus-master block-copy DMA engine (spec §4.2).
//!
//! Grounded in `hpm-hal/src/dma/dma.rs`'s channel-state/busy-wait
//! shape, reduced from its N-channel DMAMUX model down to this
//! board's one fixed channel, and its `AtomicWaker`-based completion
//! swapped for a plain `AtomicBool` flag — spec §9 asks for "explicit
//! volatile atomic flags", not futures; this design has no async
//! executor in scope.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::mmio::{base, Reg32};
use crate::plic::SourceId;

const SRC: Reg32 = Reg32::new(base::DMA + 0x00);
const DST: Reg32 = Reg32::new(base::DMA + 0x04);
const CNT: Reg32 = Reg32::new(base::DMA + 0x08);
const CTRL: Reg32 = Reg32::new(base::DMA + 0x0C);

const CTRL_START: u32 = 1 << 0;
const CTRL_FIXED_DST: u32 = 1 << 1;
const STATUS_BUSY: u32 = 1 << 0;

/// PLIC source for DMA completion interrupts.
pub const IRQ_SOURCE: SourceId = crate::plic::DMA;

/// Set by [`on_interrupt`] and cleared by [`Dma::wait_complete`] — the
/// single synchronisation point between the DMA-complete IRQ and the
/// foreground (spec §5, §9).
static TRANSFER_DONE: AtomicBool = AtomicBool::new(false);

fn is_busy() -> bool {
    CTRL.read() & STATUS_BUSY != 0
}

/// The channel's flight state. Threading these through [`Dma::start_async`]
/// and [`Dma::wait_complete`] by value — rather than taking `&mut Dma`
/// alone — is how "at most one transfer in flight" (spec §5) shows up
/// in the function signatures themselves, on top of the `CTRL` busy
/// bit this still polls. Grounded in `hpm-hal::dma`'s `ChannelState`,
/// reduced to this SoC's one fixed channel.
#[derive(Debug)]
pub struct Idle(());

#[derive(Debug)]
pub struct InFlight(());

/// Handle to the DMA engine.
///
/// Holding `&mut Dma` is how "at most one transfer in flight, single
/// owner at a time" (spec §5) is expressed: the driver's API gives no
/// way to start a second transfer without first observing the first
/// one complete.
#[derive(Debug, Default)]
pub struct Dma;

impl Dma {
    pub const fn new() -> Self {
        Self
    }

    /// The channel's starting state, for callers using the
    /// [`Self::start_async`]/[`Self::wait_complete`] guarded API.
    pub fn idle(&self) -> Idle {
        Idle(())
    }

    /// Blocking word-granular copy. `dst_fixed = true` is required
    /// when `dst` is a FIFO port (NPU weight/input); `false` for
    /// RAM-to-RAM copies. `n_words == 0` is a no-op (spec §7).
    pub fn memcpy(&mut self, src: u32, dst: u32, n_words: u32, dst_fixed: bool) {
        if n_words == 0 {
            return;
        }
        while is_busy() {}
        self.program(src, dst, n_words, dst_fixed);
        defmt::debug!("dma: blocking copy of {} words started", n_words);
        while is_busy() {
            // Pace polling so the CPU doesn't starve the DMA's own bus
            // cycles while it races to read status.
            core::hint::spin_loop();
            core::hint::spin_loop();
            core::hint::spin_loop();
        }
    }

    /// Programs the transfer and returns without waiting, consuming
    /// the channel's `Idle` token. Completion is reported by the DMA
    /// external interrupt; exchange the returned `InFlight` token back
    /// for `Idle` with [`Self::wait_complete`].
    pub fn start_async(&mut self, _idle: Idle, src: u32, dst: u32, n_words: u32, dst_fixed: bool) -> InFlight {
        if n_words == 0 {
            TRANSFER_DONE.store(true, Ordering::Release);
            return InFlight(());
        }
        while is_busy() {}
        TRANSFER_DONE.store(false, Ordering::Release);
        self.program(src, dst, n_words, dst_fixed);
        defmt::debug!("dma: async transfer of {} words started", n_words);
        InFlight(())
    }

    /// Blocks on the completion flag set by the DMA interrupt handler,
    /// returning the channel to `Idle`.
    pub fn wait_complete(&mut self, _in_flight: InFlight) -> Idle {
        while !TRANSFER_DONE.load(Ordering::Acquire) {}
        defmt::debug!("dma: async transfer complete");
        Idle(())
    }

    pub fn is_busy(&self) -> bool {
        is_busy()
    }

    fn program(&mut self, src: u32, dst: u32, n_words: u32, dst_fixed: bool) {
        if src % 4 != 0 || dst % 4 != 0 {
            panic!("DMA address not aligned");
        }
        SRC.write(src);
        DST.write(dst);
        CNT.write(n_words);
        let mut cmd = CTRL_START;
        if dst_fixed {
            cmd |= CTRL_FIXED_DST;
        }
        CTRL.write(cmd);
    }
}

/// Invoked by the interrupt dispatcher when the DMA's external
/// interrupt fires. Must be short and non-blocking (spec §4.3).
pub fn on_interrupt() {
    TRANSFER_DONE.store(true, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_word_async_start_marks_done_immediately() {
        TRANSFER_DONE.store(false, Ordering::Release);
        let mut dma = Dma::new();
        let idle = dma.idle();
        // `program` touches real MMIO, which does not exist on the
        // host; only exercise the zero-length fast path here.
        let in_flight = dma.start_async(idle, 0, 0, 0, false);
        assert!(TRANSFER_DONE.load(Ordering::Acquire));
        let _idle = dma.wait_complete(in_flight);
    }

    #[test]
    fn interrupt_sets_completion_flag() {
        TRANSFER_DONE.store(false, Ordering::Release);
        on_interrupt();
        assert!(TRANSFER_DONE.load(Ordering::Acquire));
    }
}
