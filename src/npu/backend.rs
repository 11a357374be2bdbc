//! Backend abstraction over the array, so the tiling engine can be
//! exercised without real MMIO (spec §9's "ambient — test tooling").
//!
//! Grounded in `hpm-hal`'s `Instance`-generic peripheral drivers: there
//! every driver is generic over "which physical block", because a chip
//! family has several. This board has exactly one NPU, so the type
//! parameter here stands for "which implementation answers the calls"
//! instead — real silicon, or [`crate::sim`]'s software model.

use super::{Npu, LANES};

/// The operations [`crate::tinyml::run_layer`] needs from an NPU,
/// independent of whether they reach real registers or a simulator.
pub trait NpuBackend {
    /// Configures raw accumulation for a K-step inference (spec §4.5
    /// step 1: shift 0, mult 1, ReLU off, zero bias).
    fn configure_raw(&mut self, k: u16);

    /// Loads one packed weight word per K-step into the weight port.
    fn load_weight_words(&mut self, words: &[u32]);

    /// Loads one packed input word per K-step into the input port.
    fn load_input_words(&mut self, words: &[u32]);

    fn start(&mut self);
    fn start_accumulate(&mut self);
    fn wait_done(&mut self);

    /// Drains the four output lanes in the hardware's own (reversed)
    /// order — callers map indices themselves, per spec §9.
    fn read_raw_lanes(&mut self) -> [u32; LANES];
}

impl NpuBackend for Npu {
    fn configure_raw(&mut self, k: u16) {
        Npu::configure_raw(self, k);
    }

    fn load_weight_words(&mut self, words: &[u32]) {
        Npu::load_weights(self, words);
    }

    fn load_input_words(&mut self, words: &[u32]) {
        Npu::load_inputs(self, words);
    }

    fn start(&mut self) {
        Npu::start(self);
    }

    fn start_accumulate(&mut self) {
        Npu::start_accumulate(self);
    }

    fn wait_done(&mut self) {
        Npu::wait_done(self);
    }

    fn read_raw_lanes(&mut self) -> [u32; LANES] {
        let mut raw = [0u32; LANES];
        Npu::read_output(self, &mut raw);
        raw
    }
}
