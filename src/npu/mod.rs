//! 4×4 systolic NPU driver: register layout, quantization, tiling data
//! paths (spec §4.4).
//!
//! Grounded in `hpm-hal/src/rng.rs`'s single-peripheral driver shape
//! (one register block, no channel fan-out) for the register
//! plumbing, and in the teacher's `bitflags`-based command-register
//! idiom (seen across `hpm-hal/src/sysctl.rs`) for `Cmd`.

mod backend;

pub use backend::NpuBackend;

use crate::dma::Dma;
use crate::mmio::{base, Reg32};

const STATUS: Reg32 = Reg32::new(base::NPU + 0x00);
const CMD: Reg32 = Reg32::new(base::NPU + 0x04);
const CONFIG: Reg32 = Reg32::new(base::NPU + 0x08);
const FIFO_W: Reg32 = Reg32::new(base::NPU + 0x10);
const FIFO_IN: Reg32 = Reg32::new(base::NPU + 0x14);
const OUT: Reg32 = Reg32::new(base::NPU + 0x18);
const QUANT_CFG: Reg32 = Reg32::new(base::NPU + 0x40);
const QUANT_MULT: Reg32 = Reg32::new(base::NPU + 0x44);
const FLAGS: Reg32 = Reg32::new(base::NPU + 0x48);
const BIAS_BASE: usize = base::NPU + 0x80;

const STATUS_DONE: u32 = 1 << 1;

/// Minimum and maximum accumulation depth (spec §4.4: "K (accumulation
/// depth, 1..2048)").
pub const MIN_K: u16 = 1;
pub const MAX_K: u16 = 2048;

/// Number of output lanes the array produces per inference. Not a
/// spec-named constant, but every lane-indexed array in this module
/// (bias, raw output, packed output) is this wide.
pub const LANES: usize = 4;

bitflags::bitflags! {
    /// CMD register bits (spec §4.4: "write-one-to-act; all
    /// self-clearing"). Bit positions are this driver's own
    /// assignment — the spec names the bits but not their offsets.
    struct Cmd: u32 {
        const RST_PTRS     = 1 << 0;
        const START        = 1 << 1;
        const ACC_CLEAR    = 1 << 2;
        const ACC_NO_DRAIN = 1 << 3;
        const RST_W_RD     = 1 << 4;
        const RST_I_RD     = 1 << 5;
        const RST_WR_W     = 1 << 6;
        const RST_WR_I     = 1 << 7;
    }
}

/// Quantization parameters applied to the array's raw accumulators on
/// completion (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QuantParams {
    pub mult: u32,
    pub shift: u8,
    pub zero_point: i8,
    pub relu: bool,
}

impl QuantParams {
    /// Bypasses the pipeline: multiply by one, no shift, no offset, no
    /// clamp — used by the tiny-ML engine's software-accumulation path
    /// (spec §4.5 step 1: "raw accumulation").
    pub const IDENTITY: Self = Self {
        mult: 1,
        shift: 0,
        zero_point: 0,
        relu: false,
    };

    /// Clamps `shift` into `0..=31` (spec §3 invariant: `shift ≤ 31`).
    pub const fn new(mult: u32, shift: u8, zero_point: i8, relu: bool) -> Self {
        let shift = if shift > 31 { 31 } else { shift };
        Self { mult, shift, zero_point, relu }
    }

    fn quant_cfg_word(self) -> u32 {
        (self.shift as u32 & 0x1F) | ((self.zero_point as u8 as u32) << 8)
    }
}

/// Applies the five-step post-processing pipeline to one lane's raw
/// 32-bit accumulator (spec §4.4 steps 1-5).
///
/// `mult` is treated as unsigned and the product is formed in `i64`
/// before shifting — the open question spec §9 leaves to the
/// implementer, resolved here to match §8 scenario 1 bit-for-bit.
pub fn quantize_lane(acc: i32, quant: QuantParams) -> i8 {
    let product = (acc as i64) * (quant.mult as i64);
    let shifted = product >> quant.shift;
    let offset = shifted + quant.zero_point as i64;
    let clamped_low = if quant.relu { offset.max(0) } else { offset };
    clamped_low.clamp(i8::MIN as i64, i8::MAX as i64) as i8
}

/// Packs four already-quantized lanes into one word, byte 0 = lane 0
/// (spec §4.4 step 6).
pub fn pack_lanes(lanes: [i8; LANES]) -> u32 {
    lanes
        .iter()
        .enumerate()
        .fold(0u32, |word, (i, &lane)| word | ((lane as u8 as u32) << (8 * i)))
}

/// The array drains its four output lanes in reverse order (spec §8
/// scenario 7, §9). `raw` is what four successive [`Npu::read_output`]
/// reads returned; this restores logical lane order (index 0 = lane
/// 0). The driver deliberately does not do this itself — every caller
/// must "drain all four lanes and map indices" explicitly (spec §9).
pub fn unreverse_lanes(raw: [u32; LANES]) -> [i32; LANES] {
    [raw[3] as i32, raw[2] as i32, raw[1] as i32, raw[0] as i32]
}

/// Handle to the NPU. Also the process-wide "NPU context" of spec §3
/// (`current_k`, `dma_enabled`): both are fields here rather than
/// separate statics, since `Npu` is itself meant to be a singleton
/// (see [`crate::board::Board`]).
#[derive(Debug)]
pub struct Npu {
    dma: Dma,
    dma_enabled: bool,
    current_k: u16,
}

impl Default for Npu {
    fn default() -> Self {
        Self::new()
    }
}

impl Npu {
    pub const fn new() -> Self {
        Self { dma: Dma::new(), dma_enabled: false, current_k: MIN_K }
    }

    pub fn init(&mut self) {
        CMD.write(Cmd::RST_PTRS.bits());
    }

    /// Out-of-range `k` is clamped into `1..=2048`, never rejected
    /// (spec §7, §4.4's "refuse `K = 0`" read together with the
    /// uniform clamp-don't-fail error policy).
    pub fn configure(&mut self, k: u16, quant: QuantParams) {
        let k = k.clamp(MIN_K, MAX_K);
        self.current_k = k;
        CONFIG.write(k as u32);
        QUANT_MULT.write(quant.mult);
        QUANT_CFG.write(quant.quant_cfg_word());
        FLAGS.write(quant.relu as u32);
    }

    /// Shorthand for `configure(k, QuantParams::IDENTITY)` plus zeroed
    /// hardware bias — the "raw accumulation" setup of spec §4.5 step 1.
    pub fn configure_raw(&mut self, k: u16) {
        self.configure(k, QuantParams::IDENTITY);
        self.set_bias([0; LANES]);
    }

    pub fn current_k(&self) -> u16 {
        self.current_k
    }

    /// Per-lane bias, added by hardware before post-processing.
    pub fn set_bias(&mut self, bias: [i32; LANES]) {
        for (i, b) in bias.iter().enumerate() {
            Reg32::new(BIAS_BASE + i * 4).write(*b as u32);
        }
    }

    pub fn set_dma_enabled(&mut self, enabled: bool) {
        self.dma_enabled = enabled;
    }

    /// Loads `words` into the weight FIFO: a single DMA burst if
    /// `set_dma_enabled(true)`, otherwise a word-by-word PIO loop
    /// (spec §4.4).
    pub fn load_weights(&mut self, words: &[u32]) {
        self.load_port(FIFO_W, words);
    }

    pub fn load_inputs(&mut self, words: &[u32]) {
        self.load_port(FIFO_IN, words);
    }

    fn load_port(&mut self, port: Reg32, words: &[u32]) {
        if words.is_empty() {
            return;
        }
        if self.dma_enabled {
            self.dma.memcpy(words.as_ptr() as u32, port.addr() as u32, words.len() as u32, true);
        } else {
            for &w in words {
                port.write(w);
            }
        }
    }

    /// Rewinds both read pointers and zeros the accumulators before
    /// launch (spec §4.4).
    pub fn start(&mut self) {
        CMD.write((Cmd::START | Cmd::RST_W_RD | Cmd::RST_I_RD | Cmd::ACC_CLEAR).bits());
    }

    /// Like [`Self::start`] but leaves the accumulators intact,
    /// enabling tile-to-tile accumulation sums in hardware.
    pub fn start_accumulate(&mut self) {
        CMD.write((Cmd::START | Cmd::RST_W_RD | Cmd::RST_I_RD).bits());
    }

    pub fn wait_done(&mut self) {
        while STATUS.read() & STATUS_DONE == 0 {}
        defmt::debug!("npu: inference complete");
    }

    pub fn read_output(&mut self, words: &mut [u32]) {
        for word in words.iter_mut() {
            *word = OUT.read();
        }
    }

    /// Complement of `STATUS.DONE`, per spec §4.4 — not the hardware
    /// `BUSY` bit.
    pub fn is_busy(&self) -> bool {
        STATUS.read() & STATUS_DONE == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_quantizes_to_expected_word() {
        let acc = 2048 * 2 * 1; // K * in_byte * w_byte, spec §8 scenario 1
        let quant = QuantParams::new(1, 8, 0, false);
        let lane = quantize_lane(acc, quant);
        assert_eq!(lane, 0x10);
        assert_eq!(pack_lanes([lane; 4]), 0x1010_1010);
    }

    #[test]
    fn scenario_2_raw_accumulator_matches_unshifted_value() {
        let acc = 2048 * 2 * 1;
        assert_eq!(acc, 4096);
    }

    #[test]
    fn identity_tile_reverse_drain_restores_logical_order() {
        // scenario 7: logical [10, 20, 30, 40], hardware emits reverse.
        let raw = [40u32, 30, 20, 10];
        assert_eq!(unreverse_lanes(raw), [10, 20, 30, 40]);
    }

    #[test]
    fn relu_clamps_negative_to_zero_before_saturation() {
        let quant = QuantParams::new(1, 0, 0, true);
        assert_eq!(quantize_lane(-5, quant), 0);
        assert_eq!(quantize_lane(5, quant), 5);
    }

    #[test]
    fn saturates_to_i8_range() {
        let quant = QuantParams::new(1, 0, 0, false);
        assert_eq!(quantize_lane(1000, quant), i8::MAX);
        assert_eq!(quantize_lane(-1000, quant), i8::MIN);
    }

    #[test]
    fn quant_params_clamps_out_of_range_shift() {
        let quant = QuantParams::new(1, 200, 0, false);
        assert_eq!(quant.shift, 31);
    }

    #[test]
    fn lanes_are_post_processed_independently() {
        // A saturating lane must not perturb its neighbours (spec §8
        // invariant 9).
        let quant = QuantParams::new(1, 0, 0, false);
        let lanes = [
            quantize_lane(1000, quant),
            quantize_lane(5, quant),
            quantize_lane(-1000, quant),
            quantize_lane(-5, quant),
        ];
        assert_eq!(lanes, [i8::MAX, 5, i8::MIN, -5]);
    }
}
