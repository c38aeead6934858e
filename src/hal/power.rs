use avr_device::atmega128a::CPU;

const MCUCR_SE: u8 = 1 << 5;
// SM2..SM0; all clear selects idle
const MCUCR_SM_MASK: u8 = 0x1C;

pub struct Power {
    _private: (),
}

impl Power {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Sleeps until the next interrupt. Timers keep running in idle mode.
    pub fn enter_idle_mode(&mut self) {
        unsafe {
            (*CPU::ptr())
                .mcucr
                .modify(|r, w| w.bits((r.bits() & !MCUCR_SM_MASK) | MCUCR_SE));
        }
        avr_device::asm::sleep();
        unsafe {
            (*CPU::ptr()).mcucr.modify(|r, w| w.bits(r.bits() & !MCUCR_SE));
        }
    }
}

impl Default for Power {
    fn default() -> Self {
        Self::new()
    }
}
