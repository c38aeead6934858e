//! Application side of a dual-slot firmware update for the ATmega128 board.
//!
//! The library decides whether a freshly swapped image is confirmed or left to
//! revert, stages a new image into the secondary slot and reads the records the
//! bootloader shares with the application. Everything outside `hal` is free of
//! target dependencies and runs on the host for testing.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(all(target_arch = "avr", feature = "atmega128"), feature(abi_avr_interrupt))]

pub use ufmt;

#[macro_use]
pub mod trace;

pub mod activator;
pub mod boot;
pub mod config;
pub mod drivers;
pub mod shared_data;
pub mod storage;
pub mod updater;
pub mod workflow;

#[cfg(feature = "atmega128")]
pub mod hal;

pub use activator::{ActivationError, PendingActivator};
pub use boot::{BootState, BootStateController, BootUtil, ImageVersion, SwapType};
pub use config::{Polarity, Variant, WorkflowConfig};
pub use shared_data::{Entry, SharedDataReader, SharedDataStatus};
pub use storage::{BlockDevice, StorageError, StorageRegion};
pub use updater::{CopyError, SlotState, SlotUpdater, StagedImage};
pub use workflow::{Outcome, Staging, UpdateWorkflow, WorkflowError};
