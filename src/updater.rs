//! Staging of a new image into the secondary slot.
//!
//! The updater owns the destination device for the whole update cycle and is
//! the only writer of the slot. Data moves through one `CHUNK`-byte buffer,
//! so memory use does not depend on the image size.

use ufmt::{uDisplay, uWrite, Formatter};

use crate::storage::{BlockDevice, StorageError, StorageRegion, ERASED_BYTE};
use crate::trace::Hex;

/// Bytes compared per read-back step when verifying.
const VERIFY_BLOCK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    Unprepared,
    Prepared,
    Erased,
    /// A copy failed part way; the slot must not be activated.
    Incomplete,
    Staged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CopyError {
    NotPrepared,
    NotErased,
    EmptyImage,
    InvalidChunk { chunk_size: u32, max: u32 },
    UnalignedChunk { chunk_size: u32, program_size: u32 },
    LengthExceedsSource { length: u32, size: u32 },
    LengthExceedsDestination { length: u32, size: u32 },
    Read { offset: u32, error: StorageError },
    Program { offset: u32, error: StorageError },
    Verify { offset: u32 },
}

impl uDisplay for CopyError {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        match *self {
            CopyError::NotPrepared => f.write_str("slot not prepared"),
            CopyError::NotErased => f.write_str("slot not erased"),
            CopyError::EmptyImage => f.write_str("image length is zero"),
            CopyError::InvalidChunk { chunk_size, max } => {
                ufmt::uwrite!(f, "chunk size {} not in 1..={}", chunk_size, max)
            }
            CopyError::UnalignedChunk {
                chunk_size,
                program_size,
            } => ufmt::uwrite!(
                f,
                "chunk size {} not a multiple of program size {}",
                chunk_size,
                program_size
            ),
            CopyError::LengthExceedsSource { length, size } => ufmt::uwrite!(
                f,
                "length {} exceeds source size {}",
                Hex(length),
                Hex(size)
            ),
            CopyError::LengthExceedsDestination { length, size } => ufmt::uwrite!(
                f,
                "length {} exceeds slot size {}",
                Hex(length),
                Hex(size)
            ),
            CopyError::Read { offset, error } => {
                ufmt::uwrite!(f, "read at {} failed: {}", Hex(offset), error)
            }
            CopyError::Program { offset, error } => {
                ufmt::uwrite!(f, "program at {} failed: {}", Hex(offset), error)
            }
            CopyError::Verify { offset } => {
                ufmt::uwrite!(f, "read-back mismatch at {}", Hex(offset))
            }
        }
    }
}

/// Proof that a complete image sits in the secondary slot.
///
/// Only [`SlotUpdater::copy_from`] hands these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StagedImage {
    slot: StorageRegion,
    length: u32,
}

impl StagedImage {
    pub fn slot(&self) -> StorageRegion {
        self.slot
    }

    pub fn length(&self) -> u32 {
        self.length
    }
}

struct CopyProgress {
    offset: u32,
    chunk_size: u32,
}

impl CopyProgress {
    /// Length of the next chunk; the last one may be short.
    fn next_len(&self, length: u32) -> Option<u32> {
        if self.offset >= length {
            None
        } else {
            Some(self.chunk_size.min(length - self.offset))
        }
    }
}

pub struct SlotUpdater<D, const CHUNK: usize> {
    device: D,
    slot: StorageRegion,
    state: SlotState,
    verify: bool,
    buffer: [u8; CHUNK],
}

impl<D: BlockDevice, const CHUNK: usize> SlotUpdater<D, CHUNK> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            slot: StorageRegion::new(0, 0),
            state: SlotState::Unprepared,
            verify: false,
            buffer: [0; CHUNK],
        }
    }

    /// Reads every programmed chunk back and compares it.
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn slot(&self) -> StorageRegion {
        self.slot
    }

    /// Initializes the device and selects the slot, given in device offsets.
    pub fn prepare(&mut self, secondary: StorageRegion) -> Result<(), StorageError> {
        self.state = SlotState::Unprepared;
        self.device.init()?;

        if secondary.base_address.checked_add(secondary.size_bytes).is_none()
            || secondary.end() > self.device.size()
        {
            return Err(StorageError::OutOfBounds);
        }
        let erase_size = self.device.erase_size().max(1);
        if secondary.base_address % erase_size != 0 || secondary.size_bytes % erase_size != 0 {
            return Err(StorageError::Misaligned);
        }

        self.slot = secondary;
        self.state = SlotState::Prepared;
        Ok(())
    }

    /// Erases the whole slot. Required before every copy.
    pub fn erase_all(&mut self) -> Result<(), StorageError> {
        if self.state == SlotState::Unprepared {
            return Err(StorageError::NotInitialized);
        }
        match self
            .device
            .erase(self.slot.base_address, self.slot.size_bytes)
        {
            Ok(()) => {
                self.state = SlotState::Erased;
                Ok(())
            }
            Err(e) => {
                self.state = SlotState::Incomplete;
                Err(e)
            }
        }
    }

    /// Copies `length` bytes from offset 0 of `source` to the same offsets
    /// of the slot, `chunk_size` bytes at a time.
    ///
    /// `chunk_size` must be a multiple of the slot's program size. A length
    /// that is not a multiple of `chunk_size` ends with one short chunk. The
    /// first failure stops the copy and leaves the slot `Incomplete`.
    pub fn copy_from<S: BlockDevice>(
        &mut self,
        source: &mut S,
        length: u32,
        chunk_size: u32,
    ) -> Result<StagedImage, CopyError> {
        match self.state {
            SlotState::Unprepared => return Err(CopyError::NotPrepared),
            SlotState::Erased => {}
            _ => return Err(CopyError::NotErased),
        }
        if length == 0 {
            return Err(CopyError::EmptyImage);
        }
        if chunk_size == 0 || chunk_size as usize > CHUNK {
            return Err(CopyError::InvalidChunk {
                chunk_size,
                max: CHUNK as u32,
            });
        }
        let program_size = self.device.program_size().max(1);
        if chunk_size % program_size != 0 {
            return Err(CopyError::UnalignedChunk {
                chunk_size,
                program_size,
            });
        }
        if length > source.size() {
            return Err(CopyError::LengthExceedsSource {
                length,
                size: source.size(),
            });
        }
        if length > self.slot.size_bytes {
            return Err(CopyError::LengthExceedsDestination {
                length,
                size: self.slot.size_bytes,
            });
        }

        let result = self.copy_chunks(source, length, chunk_size);
        self.state = match result {
            Ok(()) => SlotState::Staged,
            Err(_) => SlotState::Incomplete,
        };
        result.map(|()| StagedImage {
            slot: self.slot,
            length,
        })
    }

    fn copy_chunks<S: BlockDevice>(
        &mut self,
        source: &mut S,
        length: u32,
        chunk_size: u32,
    ) -> Result<(), CopyError> {
        let mut progress = CopyProgress {
            offset: 0,
            chunk_size,
        };

        while let Some(len) = progress.next_len(length) {
            let offset = progress.offset;
            let len = len as usize;

            source
                .read(&mut self.buffer[..len], offset)
                .map_err(|error| CopyError::Read { offset, error })?;

            let programmed = self.padded_len(offset, len);
            self.buffer[len..programmed].fill(ERASED_BYTE);

            let address = self.slot.base_address + offset;
            self.device
                .program(&self.buffer[..programmed], address)
                .map_err(|error| CopyError::Program { offset, error })?;

            if self.verify {
                self.verify_chunk(offset, programmed)?;
            }

            progress.offset += len as u32;
        }
        Ok(())
    }

    /// Pads the short final chunk with erased bytes up to the program size,
    /// as long as the padding stays inside the buffer and the slot. Full
    /// chunks are already program-size multiples and come back unchanged.
    fn padded_len(&self, offset: u32, len: usize) -> usize {
        let program_size = self.device.program_size().max(1) as usize;
        let padded = len.div_ceil(program_size) * program_size;
        if padded <= CHUNK && self.slot.contains(offset, padded as u32) {
            padded
        } else {
            len
        }
    }

    fn verify_chunk(&mut self, offset: u32, len: usize) -> Result<(), CopyError> {
        let mut readback = [0u8; VERIFY_BLOCK];
        let mut done = 0;
        while done < len {
            let step = VERIFY_BLOCK.min(len - done);
            let at = offset + done as u32;
            self.device
                .read(&mut readback[..step], self.slot.base_address + at)
                .map_err(|error| CopyError::Read { offset: at, error })?;
            if readback[..step] != self.buffer[done..done + step] {
                return Err(CopyError::Verify { offset: at });
            }
            done += step;
        }
        Ok(())
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }
}
