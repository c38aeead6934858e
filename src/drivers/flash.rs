//! External Flash Memory Driver (W25Q128)
//!
//! Holds both the secondary slot and the preloaded update image on the board.

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use crate::storage::{check_bounds, BlockDevice, StorageError};

const WRITE_ENABLE: u8 = 0x06;
const READ_STATUS: u8 = 0x05;
const READ_DATA: u8 = 0x03;
const PAGE_PROGRAM: u8 = 0x02;
const SECTOR_ERASE: u8 = 0x20;
const BLOCK_ERASE_64K: u8 = 0xD8;
const JEDEC_ID: u8 = 0x9F;

const STATUS_BUSY: u8 = 0x01;
const BUSY_POLL_LIMIT: u32 = 10_000;

pub const PAGE_SIZE: usize = 256;
pub const SECTOR_SIZE: u32 = 4096;
pub const BLOCK_SIZE_64K: u32 = 65536;
pub const CAPACITY: u32 = 0x100_0000;

/// Winbond manufacturer id, 0x40 memory type, 128 Mbit
pub const EXPECTED_JEDEC_ID: [u8; 3] = [0xEF, 0x40, 0x18];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError<E> {
    Spi(E),
    Pin,
    Timeout,
    WrongId([u8; 3]),
    OutOfBounds,
    Misaligned,
    NotInitialized,
}

impl<E> FlashError<E> {
    /// Collapses bus failures into the storage error for `op`.
    pub fn into_storage(self, op: StorageError) -> StorageError {
        match self {
            FlashError::Spi(_) | FlashError::Pin | FlashError::Timeout => op,
            FlashError::WrongId(_) => StorageError::Init,
            FlashError::OutOfBounds => StorageError::OutOfBounds,
            FlashError::Misaligned => StorageError::Misaligned,
            FlashError::NotInitialized => StorageError::NotInitialized,
        }
    }
}

pub struct W25q<SPI, CS> {
    spi: SPI,
    cs: CS,
    initialized: bool,
}

impl<SPI, CS, E> W25q<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    /// Does not touch the bus; call [`W25q::init`] before use.
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self {
            spi,
            cs,
            initialized: false,
        }
    }

    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    /// Checks the JEDEC id.
    pub fn init(&mut self) -> Result<(), FlashError<E>> {
        self.cs.set_high().map_err(|_| FlashError::Pin)?;

        let id = self.read_jedec_id()?;
        if id != EXPECTED_JEDEC_ID {
            return Err(FlashError::WrongId(id));
        }

        self.initialized = true;
        Ok(())
    }

    pub fn read(&mut self, addr: u32, buffer: &mut [u8]) -> Result<(), FlashError<E>> {
        self.ensure_init()?;
        check_bounds(CAPACITY, addr, buffer.len()).map_err(|_| FlashError::OutOfBounds)?;
        self.wait_busy()?;

        buffer.fill(0x00);
        self.transaction(|spi| {
            spi.write(&command(READ_DATA, addr))?;
            spi.transfer(buffer)?;
            Ok(())
        })
    }

    /// Programs `data` starting at `addr`, split on page boundaries.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError<E>> {
        self.ensure_init()?;
        check_bounds(CAPACITY, addr, data.len()).map_err(|_| FlashError::OutOfBounds)?;

        let mut addr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let room = PAGE_SIZE - (addr as usize % PAGE_SIZE);
            let (page, tail) = rest.split_at(room.min(rest.len()));
            self.write_page(addr, page)?;
            addr += page.len() as u32;
            rest = tail;
        }
        Ok(())
    }

    pub fn erase_sector(&mut self, addr: u32) -> Result<(), FlashError<E>> {
        self.erase_with(SECTOR_ERASE, addr)
    }

    pub fn erase_block64k(&mut self, addr: u32) -> Result<(), FlashError<E>> {
        self.erase_with(BLOCK_ERASE_64K, addr)
    }

    /// Erases whole sectors, using 64K blocks where alignment allows.
    pub fn erase_range(&mut self, addr: u32, size: u32) -> Result<(), FlashError<E>> {
        if addr % SECTOR_SIZE != 0 || size % SECTOR_SIZE != 0 {
            return Err(FlashError::Misaligned);
        }
        check_bounds(CAPACITY, addr, size as usize).map_err(|_| FlashError::OutOfBounds)?;

        let end = addr + size;
        let mut cursor = addr;
        while cursor < end {
            if cursor % BLOCK_SIZE_64K == 0 && end - cursor >= BLOCK_SIZE_64K {
                self.erase_block64k(cursor)?;
                cursor += BLOCK_SIZE_64K;
            } else {
                self.erase_sector(cursor)?;
                cursor += SECTOR_SIZE;
            }
        }
        Ok(())
    }

    pub fn read_jedec_id(&mut self) -> Result<[u8; 3], FlashError<E>> {
        let mut frame = [JEDEC_ID, 0x00, 0x00, 0x00];
        self.transaction(|spi| {
            spi.transfer(&mut frame)?;
            Ok(())
        })?;
        Ok([frame[1], frame[2], frame[3]])
    }

    fn erase_with(&mut self, opcode: u8, addr: u32) -> Result<(), FlashError<E>> {
        self.ensure_init()?;
        self.wait_busy()?;
        self.write_enable()?;
        self.transaction(|spi| spi.write(&command(opcode, addr)))?;
        self.wait_busy()
    }

    fn write_page(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError<E>> {
        self.wait_busy()?;
        self.write_enable()?;
        self.transaction(|spi| {
            spi.write(&command(PAGE_PROGRAM, addr))?;
            spi.write(data)
        })?;
        self.wait_busy()
    }

    fn write_enable(&mut self) -> Result<(), FlashError<E>> {
        self.transaction(|spi| spi.write(&[WRITE_ENABLE]))
    }

    fn read_status(&mut self) -> Result<u8, FlashError<E>> {
        let mut frame = [READ_STATUS, 0x00];
        self.transaction(|spi| {
            spi.transfer(&mut frame)?;
            Ok(())
        })?;
        Ok(frame[1])
    }

    fn wait_busy(&mut self) -> Result<(), FlashError<E>> {
        let mut polls = 0;
        while self.read_status()? & STATUS_BUSY != 0 {
            polls += 1;
            if polls > BUSY_POLL_LIMIT {
                return Err(FlashError::Timeout);
            }
        }
        Ok(())
    }

    fn ensure_init(&self) -> Result<(), FlashError<E>> {
        if self.initialized {
            Ok(())
        } else {
            Err(FlashError::NotInitialized)
        }
    }

    /// Runs `f` with chip select asserted; chip select is released even when
    /// `f` fails.
    fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut SPI) -> Result<T, E>,
    ) -> Result<T, FlashError<E>> {
        self.cs.set_low().map_err(|_| FlashError::Pin)?;
        let result = f(&mut self.spi);
        let released = self.cs.set_high();
        let value = result.map_err(FlashError::Spi)?;
        released.map_err(|_| FlashError::Pin)?;
        Ok(value)
    }
}

fn command(opcode: u8, addr: u32) -> [u8; 4] {
    [opcode, (addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
}

impl<SPI, CS, E> BlockDevice for W25q<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    fn init(&mut self) -> Result<(), StorageError> {
        W25q::init(self).map_err(|e| e.into_storage(StorageError::Init))
    }

    fn read(&mut self, buffer: &mut [u8], offset: u32) -> Result<(), StorageError> {
        W25q::read(self, offset, buffer).map_err(|e| e.into_storage(StorageError::Read))
    }

    fn program(&mut self, data: &[u8], offset: u32) -> Result<(), StorageError> {
        self.write(offset, data)
            .map_err(|e| e.into_storage(StorageError::Program))
    }

    fn erase(&mut self, offset: u32, size: u32) -> Result<(), StorageError> {
        self.erase_range(offset, size)
            .map_err(|e| e.into_storage(StorageError::Erase))
    }

    fn size(&self) -> u32 {
        CAPACITY
    }

    fn erase_size(&self) -> u32 {
        SECTOR_SIZE
    }
}
