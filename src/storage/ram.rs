use super::{check_bounds, BlockDevice, StorageError, ERASED_BYTE};

/// Operation counters of a [`RamDevice`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RamStats {
    pub reads: u32,
    pub programs: u32,
    pub erases: u32,
    pub bytes_read: u32,
}

/// Flash-like device backed by a borrowed RAM buffer.
///
/// Erase sets bytes to `0xFF`; program refuses to touch bytes that are not
/// erased. Faults can be injected at a given offset.
pub struct RamDevice<'a> {
    mem: &'a mut [u8],
    initialized: bool,
    erase_size: u32,
    program_size: u32,
    read_fault: Option<u32>,
    program_fault: Option<u32>,
    erase_fault: bool,
    stats: RamStats,
}

impl<'a> RamDevice<'a> {
    pub fn new(mem: &'a mut [u8]) -> Self {
        Self {
            mem,
            initialized: false,
            erase_size: 1,
            program_size: 1,
            read_fault: None,
            program_fault: None,
            erase_fault: false,
            stats: RamStats::default(),
        }
    }

    pub fn with_erase_size(mut self, erase_size: u32) -> Self {
        self.erase_size = erase_size.max(1);
        self
    }

    /// Programs must then start and end on multiples of `program_size`.
    pub fn with_program_size(mut self, program_size: u32) -> Self {
        self.program_size = program_size.max(1);
        self
    }

    /// Fails any read that covers `offset`.
    pub fn inject_read_fault(&mut self, offset: u32) {
        self.read_fault = Some(offset);
    }

    /// Fails any program that covers `offset`.
    pub fn inject_program_fault(&mut self, offset: u32) {
        self.program_fault = Some(offset);
    }

    pub fn inject_erase_fault(&mut self) {
        self.erase_fault = true;
    }

    pub fn clear_faults(&mut self) {
        self.read_fault = None;
        self.program_fault = None;
        self.erase_fault = false;
    }

    pub fn stats(&self) -> RamStats {
        self.stats
    }

    pub fn as_slice(&self) -> &[u8] {
        self.mem
    }

    fn ensure_init(&self) -> Result<(), StorageError> {
        if self.initialized {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    fn covers(fault: Option<u32>, offset: u32, len: usize) -> bool {
        match fault {
            Some(at) => at >= offset && ((at - offset) as usize) < len,
            None => false,
        }
    }
}

impl BlockDevice for RamDevice<'_> {
    fn init(&mut self) -> Result<(), StorageError> {
        self.initialized = true;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8], offset: u32) -> Result<(), StorageError> {
        self.ensure_init()?;
        check_bounds(self.size(), offset, buffer.len())?;
        if Self::covers(self.read_fault, offset, buffer.len()) {
            return Err(StorageError::Read);
        }

        let start = offset as usize;
        buffer.copy_from_slice(&self.mem[start..start + buffer.len()]);
        self.stats.reads += 1;
        self.stats.bytes_read += buffer.len() as u32;
        Ok(())
    }

    fn program(&mut self, data: &[u8], offset: u32) -> Result<(), StorageError> {
        self.ensure_init()?;
        check_bounds(self.size(), offset, data.len())?;
        if offset % self.program_size != 0 || data.len() as u32 % self.program_size != 0 {
            return Err(StorageError::Misaligned);
        }
        if Self::covers(self.program_fault, offset, data.len()) {
            return Err(StorageError::Program);
        }

        let start = offset as usize;
        let target = &mut self.mem[start..start + data.len()];
        if target.iter().any(|b| *b != ERASED_BYTE) {
            return Err(StorageError::NotErased);
        }
        target.copy_from_slice(data);
        self.stats.programs += 1;
        Ok(())
    }

    fn erase(&mut self, offset: u32, size: u32) -> Result<(), StorageError> {
        self.ensure_init()?;
        check_bounds(self.size(), offset, size as usize)?;
        if offset % self.erase_size != 0 || size % self.erase_size != 0 {
            return Err(StorageError::Misaligned);
        }
        if self.erase_fault {
            return Err(StorageError::Erase);
        }

        let start = offset as usize;
        self.mem[start..start + size as usize].fill(ERASED_BYTE);
        self.stats.erases += 1;
        Ok(())
    }

    fn size(&self) -> u32 {
        self.mem.len() as u32
    }

    fn erase_size(&self) -> u32 {
        self.erase_size
    }

    fn program_size(&self) -> u32 {
        self.program_size
    }
}
