//! CLINT: core-local 64-bit machine timer and software-interrupt latch
//! (spec §4.1).

use embedded_hal::delay::DelayNs;

use crate::mmio::{base, Reg32};

const MSIP: Reg32 = Reg32::new(base::CLINT + 0x00);
const MTIMECMP_LO: Reg32 = Reg32::new(base::CLINT + 0x08);
const MTIMECMP_HI: Reg32 = Reg32::new(base::CLINT + 0x0C);
const MTIME_LO: Reg32 = Reg32::new(base::CLINT + 0x10);
const MTIME_HI: Reg32 = Reg32::new(base::CLINT + 0x14);

/// Handle to the CLINT timer.
///
/// Zero-sized: the registers behind it live at one fixed address, so
/// there is nothing to own beyond the right to call these methods.
/// The firmware is expected to hold exactly one `Clint` (see
/// [`crate::board::Board`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct Clint;

impl Clint {
    pub const fn new() -> Self {
        Self
    }

    /// Zero the 64-bit counter and disarm the compare register.
    pub fn reset(&mut self) {
        MTIME_HI.write(0);
        MTIME_LO.write(0);
        self.ack();
    }

    /// Torn-read-safe monotonic cycle count.
    ///
    /// Reads `hi`, then `lo`, then `hi` again; if the two `hi` reads
    /// disagree a carry happened mid-read and the sequence is retried.
    /// This is the only correct read order (spec §4.1).
    pub fn now(&self) -> u64 {
        loop {
            let hi1 = MTIME_HI.read();
            let lo = MTIME_LO.read();
            let hi2 = MTIME_HI.read();
            if hi1 == hi2 {
                return ((hi1 as u64) << 32) | lo as u64;
            }
        }
    }

    /// Programme the compare register to fire `delta_cycles` from now.
    pub fn arm_in(&mut self, delta_cycles: u64) {
        let target = self.now().wrapping_add(delta_cycles);
        self.write_compare(target);
    }

    /// Programme the compare register to the far future, clearing any
    /// pending timer interrupt.
    pub fn ack(&mut self) {
        self.write_compare(u64::MAX);
    }

    /// Raise the machine-software-interrupt latch.
    pub fn set_software_interrupt(&mut self) {
        MSIP.write(1);
    }

    /// Clear the machine-software-interrupt latch.
    pub fn clear_software_interrupt(&mut self) {
        MSIP.write(0);
    }

    /// Write `MTIMECMP` without a spurious trip: high half to all-ones
    /// first, then the low half, then the true high half (spec §4.1).
    fn write_compare(&mut self, value: u64) {
        MTIMECMP_HI.write(u32::MAX);
        MTIMECMP_LO.write(value as u32);
        MTIMECMP_HI.write((value >> 32) as u32);
    }
}

impl DelayNs for Clint {
    fn delay_ns(&mut self, ns: u32) {
        let start = self.now();
        while self.now().wrapping_sub(start) < ns as u64 {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `now()`'s torn-read loop is exercised against the real registers
    // only on target hardware; here we check the arithmetic in
    // isolation, mirroring the reassembly `now()` performs.
    #[test]
    fn reassembles_hi_lo_halves() {
        let hi: u32 = 0x0000_0001;
        let lo: u32 = 0xFFFF_FFF0;
        let combined = ((hi as u64) << 32) | lo as u64;
        assert_eq!(combined, 0x0000_0001_FFFF_FFF0);
    }

    #[test]
    fn monotonic_assumption_holds_for_same_hi() {
        let t1 = ((0u64) << 32) | 100;
        let t2 = ((0u64) << 32) | 150;
        assert!(t2 >= t1);
    }
}
