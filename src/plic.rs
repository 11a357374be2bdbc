//! PLIC: platform-level interrupt controller (spec §4.3, §6).
//!
//! Grounded directly in `hpm-hal::internal::interrupt`'s
//! `InterruptExt`/`PlicExt`/`Priority` shape — of everything adapted
//! from the teacher, this module is the closest to a one-to-one port,
//! because the teacher's PLIC and this board's PLIC expose the same
//! priority/enable/threshold/claim-complete handshake.

use crate::mmio::{base, Reg32};

const PRIORITY_STRIDE: usize = 4;
const PENDING_OFFSET: usize = 0x1000;
const ENABLE_OFFSET: usize = 0x2000;
const THRESHOLD_OFFSET: usize = 0x20_0000;
const CLAIM_COMPLETE_OFFSET: usize = 0x20_0004;

/// Highest valid PLIC source ID.
pub const MAX_SOURCE: u8 = 31;

/// A validated PLIC interrupt source identifier, `1..=31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourceId(u8);

impl SourceId {
    /// Wraps `id`, clamping it into the valid `1..=31` range (spec §7:
    /// out-of-range arguments are clamped, never rejected).
    pub const fn new(id: u8) -> Self {
        let clamped = if id == 0 {
            1
        } else if id > MAX_SOURCE {
            MAX_SOURCE
        } else {
            id
        };
        Self(clamped)
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Pre-named source IDs from spec §6.
pub const UART: SourceId = SourceId::new(crate::mmio::irq_source::UART);
pub const GPIO: SourceId = SourceId::new(crate::mmio::irq_source::GPIO);
pub const DMA: SourceId = SourceId::new(crate::mmio::irq_source::DMA);
pub const NPU: SourceId = SourceId::new(crate::mmio::irq_source::NPU);

/// Interrupt priority level, `0` (masked) through `7` (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    Masked = 0,
    P1 = 1,
    P2 = 2,
    P3 = 3,
    P4 = 4,
    P5 = 5,
    P6 = 6,
    P7 = 7,
}

impl Priority {
    const fn from_u8(v: u8) -> Self {
        match v & 0b111 {
            0 => Priority::Masked,
            1 => Priority::P1,
            2 => Priority::P2,
            3 => Priority::P3,
            4 => Priority::P4,
            5 => Priority::P5,
            6 => Priority::P6,
            _ => Priority::P7,
        }
    }
}

fn priority_reg(id: SourceId) -> Reg32 {
    Reg32::new(base::PLIC + id.get() as usize * PRIORITY_STRIDE)
}

fn enable_reg() -> Reg32 {
    Reg32::new(base::PLIC + ENABLE_OFFSET)
}

fn pending_reg() -> Reg32 {
    Reg32::new(base::PLIC + PENDING_OFFSET)
}

fn threshold_reg() -> Reg32 {
    Reg32::new(base::PLIC + THRESHOLD_OFFSET)
}

fn claim_complete_reg() -> Reg32 {
    Reg32::new(base::PLIC + CLAIM_COMPLETE_OFFSET)
}

/// Handle to the platform-level interrupt controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct Plic;

impl Plic {
    pub const fn new() -> Self {
        Self
    }

    /// Mask every source and clear the enable bitmap.
    pub fn reset(&mut self) {
        for id in 1..=MAX_SOURCE {
            priority_reg(SourceId::new(id)).write(0);
        }
        enable_reg().write(0);
        threshold_reg().write(0);
    }

    pub fn set_priority(&mut self, id: SourceId, prio: Priority) {
        priority_reg(id).write(prio as u32);
    }

    pub fn priority(&self, id: SourceId) -> Priority {
        Priority::from_u8(priority_reg(id).read() as u8)
    }

    pub fn enable(&mut self, id: SourceId) {
        enable_reg().modify(|bits| bits | (1 << id.get()));
    }

    pub fn disable(&mut self, id: SourceId) {
        enable_reg().modify(|bits| bits & !(1 << id.get()));
    }

    pub fn is_enabled(&self, id: SourceId) -> bool {
        enable_reg().read() & (1 << id.get()) != 0
    }

    pub fn is_pending(&self, id: SourceId) -> bool {
        pending_reg().read() & (1 << id.get()) != 0
    }

    pub fn set_threshold(&mut self, threshold: Priority) {
        threshold_reg().write(threshold as u32);
    }

    /// Claim the highest-priority pending source. `None` is a spurious
    /// claim (hardware value `0`).
    #[must_use = "a non-spurious claim must be paired with exactly one `complete`"]
    pub fn claim(&mut self) -> Option<SourceId> {
        let id = claim_complete_reg().read();
        if id == 0 {
            None
        } else {
            defmt::debug!("plic: claimed source {}", id);
            Some(SourceId(id as u8))
        }
    }

    /// Signal completion for `id`. Must be called exactly once per
    /// non-spurious `claim`, even when no handler was registered for
    /// the source (spec §4.3: "still acknowledged... to avoid
    /// livelock").
    pub fn complete(&mut self, id: SourceId) {
        claim_complete_reg().write(id.get() as u32);
        defmt::trace!("plic: completed source {}", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_clamps_to_valid_range() {
        assert_eq!(SourceId::new(0).get(), 1);
        assert_eq!(SourceId::new(31).get(), 31);
        assert_eq!(SourceId::new(200).get(), MAX_SOURCE);
    }

    #[test]
    fn priority_roundtrips_through_u8() {
        for raw in 0u8..8 {
            let p = Priority::from_u8(raw);
            assert_eq!(p as u8, raw);
        }
    }

    #[test]
    fn named_sources_match_spec_ids() {
        assert_eq!(UART.get(), 1);
        assert_eq!(GPIO.get(), 2);
        assert_eq!(DMA.get(), 3);
        assert_eq!(NPU.get(), 4);
    }
}
