//! Blocking byte-oriented UART driver (spec §2.3, §6).
//!
//! Grounded in `hpm-hal/src/uart/mod.rs`'s trait-impl surface
//! (`embedded_hal_nb::serial`, `embedded_io`), scaled from its
//! full FIFO/parity/baud-rate driver down to this board's fixed
//! two-register device: there is nothing to configure, so no `Config`
//! type is needed.

use core::convert::Infallible;
use core::fmt;

use crate::mmio::{base, Reg32};

const DATA: Reg32 = Reg32::new(base::UART + 0x00);
const CTRL: Reg32 = Reg32::new(base::UART + 0x04);

const CTRL_TX_BUSY: u32 = 1 << 0;
const CTRL_RX_VALID: u32 = 1 << 1;
const CMD_RX_POP: u32 = 1 << 0;
const CMD_RX_FLUSH: u32 = 1 << 1;

/// Handle to the single UART instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct Uart;

impl Uart {
    pub const fn new() -> Self {
        Self
    }

    /// Blocks until the transmit FIFO can accept another byte, then
    /// sends it.
    pub fn write_byte(&mut self, byte: u8) {
        while CTRL.read() & CTRL_TX_BUSY != 0 {}
        DATA.write(byte as u32);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// Blocks until a byte is available, consumes it with the RX-pop
    /// handshake, and returns it.
    pub fn read_byte(&mut self) -> u8 {
        while CTRL.read() & CTRL_RX_VALID == 0 {}
        let byte = DATA.read() as u8;
        CTRL.write(CMD_RX_POP);
        byte
    }

    pub fn try_read_byte(&mut self) -> Option<u8> {
        if CTRL.read() & CTRL_RX_VALID == 0 {
            return None;
        }
        let byte = DATA.read() as u8;
        CTRL.write(CMD_RX_POP);
        Some(byte)
    }

    /// Discards any buffered, unread bytes.
    pub fn flush_rx(&mut self) {
        CTRL.write(CMD_RX_FLUSH);
    }
}

impl embedded_hal_nb::serial::ErrorType for Uart {
    type Error = Infallible;
}

impl embedded_hal_nb::serial::Read<u8> for Uart {
    fn read(&mut self) -> nb::Result<u8, Infallible> {
        self.try_read_byte().ok_or(nb::Error::WouldBlock)
    }
}

impl embedded_hal_nb::serial::Write<u8> for Uart {
    fn write(&mut self, word: u8) -> nb::Result<(), Infallible> {
        self.write_byte(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        while CTRL.read() & CTRL_TX_BUSY != 0 {}
        Ok(())
    }
}

impl embedded_io::ErrorType for Uart {
    type Error = Infallible;
}

impl embedded_io::Read for Uart {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        if buf.is_empty() {
            return Ok(0);
        }
        buf[0] = self.read_byte();
        Ok(1)
    }
}

impl embedded_io::Write for Uart {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        while CTRL.read() & CTRL_TX_BUSY != 0 {}
        Ok(())
    }
}

impl fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}
