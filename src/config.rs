//! Board constants and the runtime workflow configuration

use ufmt::{uDisplay, uWrite, Formatter};

/// CPU frequency in Hz
pub const CPU_FREQ_HZ: u32 = 16_000_000;

/// UART baud rate
pub const UART_BAUD: u32 = 9600;

/// Size of one image slot
pub const SLOT_SIZE: u32 = 0x20000;

/// External flash offset of the secondary slot
pub const SECONDARY_SLOT_OFFSET: u32 = 0x0;

/// External flash offset of the preloaded update image
pub const STAGED_IMAGE_OFFSET: u32 = 0x40000;

/// Copy chunk used on the board; bounded by 4 KiB of SRAM
pub const COPY_CHUNK: usize = 256;

/// Button debounce, in consecutive polls
pub const BUTTON_DEBOUNCE_POLLS: u8 = 5;

/// Button polarity of the BigAVR2 board
pub const BUTTON_POLARITY: Polarity = Polarity::ActiveLow;

/// First internal SRAM address; below it sit the I/O registers.
pub const SRAM_START: usize = 0x0100;

/// RAM area the bootloader leaves the shared records in. It sits at the
/// bottom of SRAM, below `.data`, so neither the statics nor the stack
/// (growing down from RAMEND) ever reach it.
pub const SHARED_DATA_BASE: usize = SRAM_START;
pub const SHARED_DATA_SIZE: usize = 0x100;

/// Where the linker places `.data`; `build.rs` passes the same address.
pub const DATA_START: usize = SHARED_DATA_BASE + SHARED_DATA_SIZE;

/// Largest shared record payload
pub const SHARED_RECORD_MAX: usize = 128;

/// Trace groups printed on the console
pub const TRACE_FILTERS: &str = "main,BL,upd";

/// Electrical level that means "pressed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

impl Polarity {
    pub fn is_asserted(self, pin_high: bool) -> bool {
        match self {
            Polarity::ActiveHigh => pin_high,
            Polarity::ActiveLow => !pin_high,
        }
    }
}

/// Which half of the update demo this image runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Variant {
    /// Running image stages the next one into the secondary slot.
    PreUpdate,
    /// Freshly swapped image; decides confirm or revert and stops.
    PostUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    ZeroChunk,
    ZeroLength,
    ChunkTooLarge { chunk: u32, max: u32 },
    ZeroDebounce,
}

impl uDisplay for ConfigError {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        match *self {
            ConfigError::ZeroChunk => f.write_str("chunk size is zero"),
            ConfigError::ZeroLength => f.write_str("copy length is zero"),
            ConfigError::ChunkTooLarge { chunk, max } => {
                ufmt::uwrite!(f, "chunk size {} above buffer size {}", chunk, max)
            }
            ConfigError::ZeroDebounce => f.write_str("debounce polls is zero"),
        }
    }
}

/// Everything that used to differ between the separate demo entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WorkflowConfig {
    pub variant: Variant,
    pub data_sharing: bool,
    pub polarity: Polarity,
    pub chunk_size: u32,
    pub copy_length: u32,
    /// `false` requests a test swap that reverts unless confirmed.
    pub permanent: bool,
    /// Read back every programmed chunk.
    pub verify: bool,
    /// Polls before a trigger wait gives up; `None` waits forever.
    pub trigger_timeout: Option<u32>,
    pub debounce_polls: u8,
}

impl WorkflowConfig {
    pub const fn pre_update() -> Self {
        Self {
            variant: Variant::PreUpdate,
            data_sharing: false,
            polarity: BUTTON_POLARITY,
            chunk_size: COPY_CHUNK as u32,
            copy_length: SLOT_SIZE,
            permanent: false,
            verify: true,
            trigger_timeout: None,
            debounce_polls: BUTTON_DEBOUNCE_POLLS,
        }
    }

    pub const fn post_update() -> Self {
        Self {
            variant: Variant::PostUpdate,
            ..Self::pre_update()
        }
    }

    pub const fn with_data_sharing(mut self, enabled: bool) -> Self {
        self.data_sharing = enabled;
        self
    }

    /// Checks the values against the copy buffer the updater was built with.
    ///
    /// Copy settings are only checked for `PreUpdate`; a post-update run
    /// never copies.
    pub fn validate(&self, max_chunk: usize) -> Result<(), ConfigError> {
        if self.debounce_polls == 0 {
            return Err(ConfigError::ZeroDebounce);
        }
        if self.variant == Variant::PostUpdate {
            return Ok(());
        }
        if self.copy_length == 0 {
            return Err(ConfigError::ZeroLength);
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunk);
        }
        if self.chunk_size as usize > max_chunk {
            return Err(ConfigError::ChunkTooLarge {
                chunk: self.chunk_size,
                max: max_chunk as u32,
            });
        }
        Ok(())
    }
}

/// Configuration the board image starts with, picked by cargo features.
pub const fn board_workflow() -> WorkflowConfig {
    let config = if cfg!(feature = "post-update") {
        WorkflowConfig::post_update()
    } else {
        WorkflowConfig::pre_update()
    };
    config.with_data_sharing(cfg!(feature = "data-sharing"))
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::pre_update()
    }
}
