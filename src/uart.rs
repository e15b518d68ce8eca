//! PL011 UART console for QEMU virt
//!
//! Base address: 0x0900_0000 (QEMU virt). Output only; the firmware has
//! already configured the line.

use core::fmt;

use crate::platform::UART_BASE;

/// PL011 UART registers
const UART_DR: usize = 0x00; // Data Register
const UART_FR: usize = 0x18; // Flag Register

/// Flag Register bits
const UART_FR_TXFF: u32 = 1 << 5; // Transmit FIFO full

/// UART device structure
pub struct Uart {
    base: usize,
}

impl Uart {
    const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Write a byte to the UART
    pub fn putc(&self, c: u8) {
        // Wait until TX FIFO is not full
        while self.read_reg(UART_FR) & UART_FR_TXFF != 0 {}
        self.write_reg(UART_DR, c as u32);
    }

    /// Write a string to the UART
    pub fn puts(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.putc(b'\r');
            }
            self.putc(byte);
        }
    }

    #[inline]
    fn read_reg(&self, offset: usize) -> u32 {
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    #[inline]
    fn write_reg(&self, offset: usize, value: u32) {
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }
}

/// Global UART instance
static UART: Uart = Uart::new(UART_BASE);

/// Get a writer for the UART
pub fn writer() -> UartWriter {
    UartWriter
}

/// Writer wrapper for formatting
pub struct UartWriter;

impl fmt::Write for UartWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        UART.puts(s);
        Ok(())
    }
}
