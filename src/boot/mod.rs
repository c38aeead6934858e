//! Boot confirmation state shared with the bootloader.
//!
//! [`BootUtil`] is the seam to the bootloader library; the controller owns
//! one and runs the per-boot confirm-or-revert decision on top of it.

use ufmt::{uDisplay, uWrite, Formatter};

mod controller;
#[cfg(feature = "mcuboot")]
pub mod ffi;

pub use controller::{AwaitError, BeginError, BootState, BootStateController};

const SWAP_TYPE_NONE: i32 = 1;
const SWAP_TYPE_TEST: i32 = 2;
const SWAP_TYPE_PERM: i32 = 3;
const SWAP_TYPE_REVERT: i32 = 4;
const SWAP_TYPE_FAIL: i32 = 5;
const SWAP_TYPE_PANIC: i32 = 0xff;

/// What the bootloader did on the most recent boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwapType {
    None,
    Revert,
    Fail,
    Perm,
    Test,
    Panic,
}

impl SwapType {
    /// Unknown codes are reported as `Panic`.
    pub fn from_raw(code: i32) -> Self {
        match code {
            SWAP_TYPE_NONE => SwapType::None,
            SWAP_TYPE_TEST => SwapType::Test,
            SWAP_TYPE_PERM => SwapType::Perm,
            SWAP_TYPE_REVERT => SwapType::Revert,
            SWAP_TYPE_FAIL => SwapType::Fail,
            _ => SwapType::Panic,
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            SwapType::None => SWAP_TYPE_NONE,
            SwapType::Test => SWAP_TYPE_TEST,
            SwapType::Perm => SWAP_TYPE_PERM,
            SwapType::Revert => SWAP_TYPE_REVERT,
            SwapType::Fail => SWAP_TYPE_FAIL,
            SwapType::Panic => SWAP_TYPE_PANIC,
        }
    }

    /// Only `None` and `Revert` can be seen by a running application.
    pub fn is_observable(self) -> bool {
        matches!(self, SwapType::None | SwapType::Revert)
    }

    pub fn name(self) -> &'static str {
        match self {
            SwapType::None => "none",
            SwapType::Revert => "revert",
            SwapType::Fail => "fail",
            SwapType::Perm => "perm",
            SwapType::Test => "test",
            SwapType::Panic => "panic",
        }
    }
}

impl uDisplay for SwapType {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        f.write_str(self.name())
    }
}

/// Version of the running image, as read from its header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
    pub build_number: u32,
}

impl uDisplay for ImageVersion {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        ufmt::uwrite!(
            f,
            "{}.{}.{}+{}",
            self.major,
            self.minor,
            self.revision,
            self.build_number
        )
    }
}

/// Non-zero return code of a bootloader library call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootUtilError {
    pub code: i32,
}

impl BootUtilError {
    /// `0` is success, anything else an error.
    pub fn check(code: i32) -> Result<(), BootUtilError> {
        if code == 0 {
            Ok(())
        } else {
            Err(BootUtilError { code })
        }
    }
}

impl uDisplay for BootUtilError {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        uDisplay::fmt(&self.code, f)
    }
}

/// Bootloader library calls used by the application.
pub trait BootUtil {
    /// Marks the running image as permanently good.
    fn set_confirmed(&mut self) -> Result<(), BootUtilError>;

    fn current_version(&mut self) -> Result<ImageVersion, BootUtilError>;

    fn swap_type(&mut self) -> SwapType;

    /// Boots the secondary slot next time; `permanent = false` is a test swap.
    fn set_pending(&mut self, permanent: bool) -> Result<(), BootUtilError>;
}

impl<T: BootUtil + ?Sized> BootUtil for &mut T {
    fn set_confirmed(&mut self) -> Result<(), BootUtilError> {
        (**self).set_confirmed()
    }

    fn current_version(&mut self) -> Result<ImageVersion, BootUtilError> {
        (**self).current_version()
    }

    fn swap_type(&mut self) -> SwapType {
        (**self).swap_type()
    }

    fn set_pending(&mut self, permanent: bool) -> Result<(), BootUtilError> {
        (**self).set_pending(permanent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfirmError {
    Bootloader(BootUtilError),
    /// The boot was given up; the bootloader reverts on the next reset.
    Reverting,
}

impl uDisplay for ConfirmError {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        match self {
            ConfirmError::Bootloader(e) => ufmt::uwrite!(f, "bootloader error {}", e),
            ConfirmError::Reverting => f.write_str("image is reverting"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VersionError(pub BootUtilError);

/// The bootloader reported a swap type the application cannot observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigurationError {
    pub swap_type: SwapType,
}

impl uDisplay for ConfigurationError {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        ufmt::uwrite!(f, "unexpected swap type {}", self.swap_type)
    }
}
