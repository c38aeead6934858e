use avr_device::atmega128a::USART0;
use core::convert::Infallible;

use crate::hal::Uart;

/// Trace sink on USART0.
pub struct SerialConsole {
    uart: Uart<USART0>,
}

impl SerialConsole {
    pub fn new() -> Self {
        Self { uart: Uart::new() }
    }
}

impl Default for SerialConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl ufmt::uWrite for SerialConsole {
    type Error = Infallible;

    fn write_str(&mut self, s: &str) -> Result<(), Infallible> {
        for byte in s.bytes() {
            self.uart.write_byte(byte);
        }
        Ok(())
    }
}
