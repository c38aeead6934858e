//! Binding to the MCUboot `bootutil` library linked into the image.

use core::ffi::c_int;

use super::{BootUtil, BootUtilError, ImageVersion, SwapType};

#[repr(C)]
#[derive(Default)]
struct RawImageVersion {
    iv_major: u8,
    iv_minor: u8,
    iv_revision: u16,
    iv_build_num: u32,
}

extern "C" {
    fn boot_set_confirmed() -> c_int;
    fn boot_set_pending(permanent: c_int) -> c_int;
    fn boot_swap_type() -> c_int;
    fn boot_get_current_version(version: *mut RawImageVersion) -> c_int;
}

/// Zero-sized handle; the library keeps its state in flash.
pub struct McuBoot {
    _private: (),
}

impl McuBoot {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for McuBoot {
    fn default() -> Self {
        Self::new()
    }
}

impl BootUtil for McuBoot {
    fn set_confirmed(&mut self) -> Result<(), BootUtilError> {
        let rc = unsafe { boot_set_confirmed() };
        BootUtilError::check(rc as i32)
    }

    fn current_version(&mut self) -> Result<ImageVersion, BootUtilError> {
        let mut raw = RawImageVersion::default();
        let rc = unsafe { boot_get_current_version(&mut raw) };
        BootUtilError::check(rc as i32)?;
        Ok(ImageVersion {
            major: raw.iv_major,
            minor: raw.iv_minor,
            revision: raw.iv_revision,
            build_number: raw.iv_build_num,
        })
    }

    fn swap_type(&mut self) -> SwapType {
        SwapType::from_raw(unsafe { boot_swap_type() } as i32)
    }

    fn set_pending(&mut self, permanent: bool) -> Result<(), BootUtilError> {
        let rc = unsafe { boot_set_pending(permanent as c_int) };
        BootUtilError::check(rc as i32)
    }
}
