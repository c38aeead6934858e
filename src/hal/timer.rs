use avr_device::atmega128a::TC0;

const TOIE0: u8 = 1 << 0;

/// Timer0 clock select. Timer0 is the asynchronous timer and has its own
/// prescaler steps.
#[derive(Clone, Copy)]
#[repr(u8)]
pub enum Prescaler {
    Stop = 0,
    Direct = 1,
    Div8 = 2,
    Div32 = 3,
    Div64 = 4,
    Div128 = 5,
    Div256 = 6,
    Div1024 = 7,
}

/// Timer0 overflow interrupt, used to wake the CPU from idle between
/// button polls. At 16 MHz and `Div1024` it fires every ~16 ms.
pub struct PollTick {
    _private: (),
}

impl PollTick {
    pub fn start(prescaler: Prescaler) -> Self {
        unsafe {
            let p = TC0::ptr();
            (*p).tccr0.write(|w| w.bits(0));
            (*p).tcnt0.write(|w| w.bits(0));
            (*p).timsk.modify(|r, w| w.bits(r.bits() | TOIE0));
            (*p).tccr0.write(|w| w.bits(prescaler as u8));
        }
        Self { _private: () }
    }

    pub fn stop(&mut self) {
        unsafe {
            let p = TC0::ptr();
            (*p).timsk.modify(|r, w| w.bits(r.bits() & !TOIE0));
            (*p).tccr0.write(|w| w.bits(Prescaler::Stop as u8));
        }
    }
}

// Only wakes the CPU
#[avr_device::interrupt(atmega128a)]
fn TIMER0_OVF() {}
