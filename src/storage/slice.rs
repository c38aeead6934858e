use core::cell::RefCell;

use super::{check_bounds, BlockDevice, StorageError, StorageRegion};

/// Window onto part of a shared device.
///
/// Several slices may point at one flash part; each operation borrows the
/// part for its duration only.
pub struct SlicedDevice<'a, D> {
    device: &'a RefCell<D>,
    region: StorageRegion,
}

impl<'a, D: BlockDevice> SlicedDevice<'a, D> {
    /// `region` addresses are offsets on the underlying device.
    pub fn new(device: &'a RefCell<D>, region: StorageRegion) -> Result<Self, StorageError> {
        let size = device.try_borrow().map_err(|_| StorageError::Busy)?.size();
        if region.end() > size || region.base_address.checked_add(region.size_bytes).is_none() {
            return Err(StorageError::OutOfBounds);
        }
        Ok(Self { device, region })
    }

    fn with_device<T>(
        &self,
        f: impl FnOnce(&mut D) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut device = self.device.try_borrow_mut().map_err(|_| StorageError::Busy)?;
        f(&mut device)
    }
}

impl<D: BlockDevice> BlockDevice for SlicedDevice<'_, D> {
    fn init(&mut self) -> Result<(), StorageError> {
        self.with_device(|d| d.init())
    }

    fn read(&mut self, buffer: &mut [u8], offset: u32) -> Result<(), StorageError> {
        check_bounds(self.region.size_bytes, offset, buffer.len())?;
        let base = self.region.base_address;
        self.with_device(|d| d.read(buffer, base + offset))
    }

    fn program(&mut self, data: &[u8], offset: u32) -> Result<(), StorageError> {
        check_bounds(self.region.size_bytes, offset, data.len())?;
        let base = self.region.base_address;
        self.with_device(|d| d.program(data, base + offset))
    }

    fn erase(&mut self, offset: u32, size: u32) -> Result<(), StorageError> {
        check_bounds(self.region.size_bytes, offset, size as usize)?;
        let base = self.region.base_address;
        self.with_device(|d| d.erase(base + offset, size))
    }

    fn size(&self) -> u32 {
        self.region.size_bytes
    }

    fn erase_size(&self) -> u32 {
        self.device.try_borrow().map(|d| d.erase_size()).unwrap_or(1)
    }

    fn program_size(&self) -> u32 {
        self.device.try_borrow().map(|d| d.program_size()).unwrap_or(1)
    }
}
