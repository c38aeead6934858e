//! User trigger: a debounced button reduced to "pressed once" events.

use embedded_hal::digital::v2::InputPin;

use crate::config::Polarity;

/// Anything that reports discrete trigger events.
pub trait TriggerSource {
    type Error;

    /// `Ok(())` once per observed trigger, `WouldBlock` otherwise.
    fn poll_trigger(&mut self) -> nb::Result<(), Self::Error>;
}

impl<T: TriggerSource + ?Sized> TriggerSource for &mut T {
    type Error = T::Error;

    fn poll_trigger(&mut self) -> nb::Result<(), Self::Error> {
        (**self).poll_trigger()
    }
}

/// Debounced press detector over one input pin.
///
/// A press is reported on the debounced transition to the asserted level.
/// The button has to be released before the next press counts.
pub struct Trigger<P> {
    pin: P,
    polarity: Polarity,
    debounce_polls: u8,
    pressed: bool,
    debounce_counter: u8,
}

impl<P: InputPin> Trigger<P> {
    pub fn new(pin: P, polarity: Polarity, debounce_polls: u8) -> Self {
        Self {
            pin,
            polarity,
            debounce_polls: debounce_polls.max(1),
            pressed: false,
            debounce_counter: 0,
        }
    }

    /// Debounced level.
    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn into_inner(self) -> P {
        self.pin
    }

    /// Samples the pin once; returns the new state when a change settles.
    fn sample(&mut self) -> Result<Option<bool>, P::Error> {
        let raw_state = self.polarity.is_asserted(self.pin.is_high()?);

        if raw_state != self.pressed {
            self.debounce_counter = self.debounce_counter.saturating_add(1);
            if self.debounce_counter >= self.debounce_polls {
                self.pressed = raw_state;
                self.debounce_counter = 0;
                return Ok(Some(raw_state));
            }
        } else {
            self.debounce_counter = 0;
        }
        Ok(None)
    }
}

impl<P: InputPin> TriggerSource for Trigger<P> {
    type Error = P::Error;

    fn poll_trigger(&mut self) -> nb::Result<(), P::Error> {
        match self.sample()? {
            Some(true) => Ok(()),
            _ => Err(nb::Error::WouldBlock),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError<E> {
    Timeout,
    Source(E),
}

/// Blocks until the trigger fires, calling `idle` between polls.
///
/// `timeout` bounds the number of polls; `None` waits until reset.
pub fn wait_for_trigger<T: TriggerSource>(
    trigger: &mut T,
    timeout: Option<u32>,
    mut idle: impl FnMut(),
) -> Result<(), WaitError<T::Error>> {
    let mut polls: u32 = 0;
    loop {
        match trigger.poll_trigger() {
            Ok(()) => return Ok(()),
            Err(nb::Error::Other(e)) => return Err(WaitError::Source(e)),
            Err(nb::Error::WouldBlock) => {}
        }

        polls = polls.saturating_add(1);
        if let Some(limit) = timeout {
            if polls >= limit {
                return Err(WaitError::Timeout);
            }
        }
        idle();
    }
}
