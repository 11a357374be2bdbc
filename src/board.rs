//! Board bring-up: the crate's single entry point (spec §9's ambient
//! "configuration" guidance, grounded in `hpm-hal::Peripherals::take()`).

use core::sync::atomic::{AtomicBool, Ordering};

use crate::dma::Dma;
use crate::interrupt::{InterruptController, InterruptKinds};
use crate::npu::{Npu, QuantParams, MIN_K};
use crate::plic::{Plic, Priority};
use crate::storage::Storage;
use crate::time::Clint;
use crate::uart::Uart;

/// Board bring-up configuration: the pieces of startup state that
/// aren't hardwired into the MMIO map.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub plic_threshold: Priority,
    pub unmask: InterruptKinds,
    pub default_quant: QuantParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plic_threshold: Priority::Masked,
            unmask: InterruptKinds::empty(),
            default_quant: QuantParams::IDENTITY,
        }
    }
}

static TAKEN: AtomicBool = AtomicBool::new(false);

/// Failure modes of [`Board::take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The board was already brought up once this process.
    AlreadyTaken,
}

impl From<crate::storage::Error> for Error {
    fn from(_: crate::storage::Error) -> Self {
        Error::AlreadyTaken
    }
}

/// Owns every peripheral handle exactly once. Holding `&mut` to a
/// field here is how spec §5's "single owner at a time" for the NPU
/// and DMA register spaces is expressed in the type system.
pub struct Board {
    pub uart: Uart,
    pub dma: Dma,
    pub npu: Npu,
    pub plic: Plic,
    pub timer: Clint,
    pub interrupts: InterruptController,
    pub storage: Storage,
}

impl Board {
    /// Brings the board up per `config`. `Err(Error::AlreadyTaken)` on
    /// any call after the first — firmware calls this exactly once at
    /// startup.
    ///
    /// # Safety
    /// Must be called before interrupts are globally enabled and while
    /// still single-threaded, since it installs the trap vector.
    pub unsafe fn take(config: Config) -> Result<Self, Error> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyTaken);
        }

        let mut timer = Clint::new();
        timer.reset();

        let mut plic = Plic::new();
        plic.reset();
        plic.set_threshold(config.plic_threshold);

        let mut npu = Npu::new();
        npu.init();
        npu.configure(MIN_K, config.default_quant);

        let mut interrupts = InterruptController::new();
        interrupts.install();
        interrupts.mask_enable(config.unmask);

        let storage = Storage::take()?;

        Ok(Self {
            uart: Uart::new(),
            dma: Dma::new(),
            npu,
            plic,
            timer,
            interrupts,
            storage,
        })
    }
}
