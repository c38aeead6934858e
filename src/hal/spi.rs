//! SPI master on the hardware SPI block.

use avr_device::atmega128a::SPI;
use core::convert::Infallible;
use core::marker::PhantomData;
use embedded_hal::spi::FullDuplex;

const SPCR_SPE: u8 = 1 << 6;
const SPCR_MSTR: u8 = 1 << 4;
const SPSR_SPIF: u8 = 1 << 7;

/// SPI clock prescaler options
#[derive(Clone, Copy)]
#[repr(u8)]
pub enum SpiPrescaler {
    Div4 = 0,
    Div16 = 1,
    Div64 = 2,
    Div128 = 3,
}

/// SPI peripheral driver
pub struct Spi {
    _spi: PhantomData<SPI>,
}

impl Spi {
    /// Master, MSB first, mode 0. SCK/MOSI/SS must already be outputs.
    pub fn new(prescaler: SpiPrescaler) -> Self {
        unsafe {
            (*SPI::ptr())
                .spcr
                .write(|w| w.bits(SPCR_SPE | SPCR_MSTR | prescaler as u8));
        }
        Self { _spi: PhantomData }
    }

    fn busy(&self) -> bool {
        unsafe { (*SPI::ptr()).spsr.read().bits() & SPSR_SPIF == 0 }
    }
}

impl FullDuplex<u8> for Spi {
    type Error = Infallible;

    fn read(&mut self) -> nb::Result<u8, Infallible> {
        if self.busy() {
            return Err(nb::Error::WouldBlock);
        }
        Ok(unsafe { (*SPI::ptr()).spdr.read().bits() })
    }

    fn send(&mut self, byte: u8) -> nb::Result<(), Infallible> {
        unsafe {
            (*SPI::ptr()).spdr.write(|w| w.bits(byte));
        }
        Ok(())
    }
}

impl embedded_hal::blocking::spi::transfer::Default<u8> for Spi {}
impl embedded_hal::blocking::spi::write::Default<u8> for Spi {}
