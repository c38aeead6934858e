//! Block storage abstraction shared by the slot updater and the board flash.
//!
//! Offsets are relative to the device. A device handed to the updater is
//! usually a [`SlicedDevice`] window onto a larger flash part.

use ufmt::{uDisplay, uWrite, Formatter};

mod ram;
mod slice;

pub use ram::{RamDevice, RamStats};
pub use slice::SlicedDevice;

/// Value of an erased byte.
pub const ERASED_BYTE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    NotInitialized,
    Init,
    Read,
    Program,
    Erase,
    OutOfBounds,
    Misaligned,
    NotErased,
    /// Device already borrowed through another slice.
    Busy,
    Device(i32),
}

impl uDisplay for StorageError {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        match self {
            StorageError::NotInitialized => f.write_str("device not initialized"),
            StorageError::Init => f.write_str("init failed"),
            StorageError::Read => f.write_str("read failed"),
            StorageError::Program => f.write_str("program failed"),
            StorageError::Erase => f.write_str("erase failed"),
            StorageError::OutOfBounds => f.write_str("out of bounds"),
            StorageError::Misaligned => f.write_str("misaligned"),
            StorageError::NotErased => f.write_str("target not erased"),
            StorageError::Busy => f.write_str("device busy"),
            StorageError::Device(code) => {
                f.write_str("device error ")?;
                uDisplay::fmt(code, f)
            }
        }
    }
}

/// Synchronous erase/program/read device.
///
/// Programming bytes that were not erased first is undefined on real flash.
/// Implementations may reject it with [`StorageError::NotErased`].
pub trait BlockDevice {
    fn init(&mut self) -> Result<(), StorageError>;

    fn read(&mut self, buffer: &mut [u8], offset: u32) -> Result<(), StorageError>;

    fn program(&mut self, data: &[u8], offset: u32) -> Result<(), StorageError>;

    fn erase(&mut self, offset: u32, size: u32) -> Result<(), StorageError>;

    fn size(&self) -> u32;

    fn erase_size(&self) -> u32 {
        1
    }

    fn program_size(&self) -> u32 {
        1
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn init(&mut self) -> Result<(), StorageError> {
        (**self).init()
    }

    fn read(&mut self, buffer: &mut [u8], offset: u32) -> Result<(), StorageError> {
        (**self).read(buffer, offset)
    }

    fn program(&mut self, data: &[u8], offset: u32) -> Result<(), StorageError> {
        (**self).program(data, offset)
    }

    fn erase(&mut self, offset: u32, size: u32) -> Result<(), StorageError> {
        (**self).erase(offset, size)
    }

    fn size(&self) -> u32 {
        (**self).size()
    }

    fn erase_size(&self) -> u32 {
        (**self).erase_size()
    }

    fn program_size(&self) -> u32 {
        (**self).program_size()
    }
}

/// Rejects `len` bytes at `offset` that run past `size`.
pub fn check_bounds(size: u32, offset: u32, len: usize) -> Result<(), StorageError> {
    let len = u32::try_from(len).map_err(|_| StorageError::OutOfBounds)?;
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::OutOfBounds),
    }
}

/// Fixed address range holding one image or the staged update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageRegion {
    pub base_address: u32,
    pub size_bytes: u32,
}

impl StorageRegion {
    pub const fn new(base_address: u32, size_bytes: u32) -> Self {
        Self {
            base_address,
            size_bytes,
        }
    }

    /// One past the last address; saturates at `u32::MAX`.
    pub const fn end(&self) -> u32 {
        self.base_address.saturating_add(self.size_bytes)
    }

    /// Whether the region-relative range `offset..offset + len` fits.
    pub fn contains(&self, offset: u32, len: u32) -> bool {
        matches!(offset.checked_add(len), Some(end) if end <= self.size_bytes)
    }
}
