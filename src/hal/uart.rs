use avr_device::atmega128a::USART0;
use core::marker::PhantomData;

use crate::config::{CPU_FREQ_HZ, UART_BAUD};

const UCSRA_UDRE: u8 = 1 << 5;
const UCSRB_TXEN: u8 = 1 << 3;
// asynchronous, 8N1
const UCSRC_8N1: u8 = 0x06;

const fn ubrr(baud: u32) -> u16 {
    (CPU_FREQ_HZ / (16 * baud) - 1) as u16
}

/// Transmit-only polled USART0. Writes block until the data register is free.
pub struct Uart<USART> {
    _usart: PhantomData<USART>,
}

impl Uart<USART0> {
    pub fn new() -> Self {
        let divisor = ubrr(UART_BAUD);
        unsafe {
            let p = USART0::ptr();
            (*p).ubrr0h.write(|w| w.bits((divisor >> 8) as u8));
            (*p).ubrr0l.write(|w| w.bits(divisor as u8));
            (*p).ucsr0c.write(|w| w.bits(UCSRC_8N1));
            (*p).ucsr0b.write(|w| w.bits(UCSRB_TXEN));
        }
        Self {
            _usart: PhantomData,
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        unsafe {
            let p = USART0::ptr();
            while (*p).ucsr0a.read().bits() & UCSRA_UDRE == 0 {}
            (*p).udr0.write(|w| w.bits(byte));
        }
    }
}

impl Default for Uart<USART0> {
    fn default() -> Self {
        Self::new()
    }
}
