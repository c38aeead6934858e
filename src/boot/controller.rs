use ufmt::{uDisplay, uWrite, Formatter};

use super::{
    BootUtil, ConfigurationError, ConfirmError, ImageVersion, SwapType, VersionError,
};
use crate::drivers::trigger::{wait_for_trigger, TriggerSource, WaitError};

/// Per-boot confirmation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootState {
    JustBooted,
    Confirmed,
    AwaitingUserConfirm,
    /// Left unconfirmed; the bootloader reverts on the next reset.
    Reverting,
}

impl BootState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BootState::Confirmed | BootState::Reverting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BeginError {
    Confirm(ConfirmError),
    Configuration(ConfigurationError),
}

impl uDisplay for BeginError {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        match self {
            BeginError::Confirm(e) => ufmt::uwrite!(f, "confirm failed: {}", e),
            BeginError::Configuration(e) => uDisplay::fmt(e, f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitError<E> {
    Trigger(E),
    Confirm(ConfirmError),
}

/// Runs the confirm-or-revert decision for the running image.
pub struct BootStateController<B> {
    bootutil: B,
    state: BootState,
    swap_type: Option<SwapType>,
}

impl<B: BootUtil> BootStateController<B> {
    pub fn new(bootutil: B) -> Self {
        Self {
            bootutil,
            state: BootState::JustBooted,
            swap_type: None,
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    /// Asks the bootloader once; later calls return the same answer.
    pub fn current_swap_type(&mut self) -> SwapType {
        match self.swap_type {
            Some(swap) => swap,
            None => {
                let swap = self.bootutil.swap_type();
                self.swap_type = Some(swap);
                swap
            }
        }
    }

    /// Marks the running image good. Safe to repeat.
    pub fn confirm_current_image(&mut self) -> Result<(), ConfirmError> {
        if self.state == BootState::Reverting {
            return Err(ConfirmError::Reverting);
        }
        self.bootutil
            .set_confirmed()
            .map_err(ConfirmError::Bootloader)?;
        self.state = BootState::Confirmed;
        Ok(())
    }

    pub fn current_version(&mut self) -> Result<ImageVersion, VersionError> {
        self.bootutil.current_version().map_err(VersionError)
    }

    /// Leaves `JustBooted` according to the swap type.
    ///
    /// A swap type the application must never see is reported as an error
    /// and the state stays `JustBooted`. Calls in any other state return the
    /// current state.
    pub fn begin(&mut self) -> Result<BootState, BeginError> {
        if self.state != BootState::JustBooted {
            return Ok(self.state);
        }

        match self.current_swap_type() {
            SwapType::None => {
                self.confirm_current_image().map_err(BeginError::Confirm)?;
            }
            SwapType::Revert => self.state = BootState::AwaitingUserConfirm,
            swap_type => {
                return Err(BeginError::Configuration(ConfigurationError { swap_type }));
            }
        }
        Ok(self.state)
    }

    /// Blocks on `trigger` while awaiting the user's confirmation.
    ///
    /// A press confirms the image. Running out of `timeout` polls gives up
    /// and leaves the image to revert. Outside `AwaitingUserConfirm` this
    /// returns the current state without polling.
    pub fn await_confirmation<T: TriggerSource>(
        &mut self,
        trigger: &mut T,
        timeout: Option<u32>,
        idle: impl FnMut(),
    ) -> Result<BootState, AwaitError<T::Error>> {
        if self.state != BootState::AwaitingUserConfirm {
            return Ok(self.state);
        }

        match wait_for_trigger(trigger, timeout, idle) {
            Ok(()) => {
                self.confirm_current_image().map_err(AwaitError::Confirm)?;
                Ok(self.state)
            }
            Err(WaitError::Timeout) => Ok(self.abandon()),
            Err(WaitError::Source(e)) => Err(AwaitError::Trigger(e)),
        }
    }

    /// Stops waiting for confirmation. Only `AwaitingUserConfirm` moves.
    pub fn abandon(&mut self) -> BootState {
        if self.state == BootState::AwaitingUserConfirm {
            self.state = BootState::Reverting;
        }
        self.state
    }

    pub fn bootutil_mut(&mut self) -> &mut B {
        &mut self.bootutil
    }

    pub fn into_inner(self) -> B {
        self.bootutil
    }
}
