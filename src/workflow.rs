//! The update pipeline run once per boot.
//!
//! Confirm-or-revert first, then the optional shared-data dump, then for the
//! pre-update variant the three button-gated staging steps: erase, copy and
//! mark pending. Every step reports through the tracer.

use ufmt::uWrite;

use crate::activator::{ActivationError, PendingActivator};
use crate::boot::{
    AwaitError, BeginError, BootState, BootStateController, BootUtil, ConfirmError, VersionError,
};
use crate::config::{ConfigError, Variant, WorkflowConfig, SHARED_RECORD_MAX};
use crate::drivers::trigger::{wait_for_trigger, TriggerSource, WaitError};
use crate::shared_data::{SharedDataReader, SharedDataStatus};
use crate::storage::{BlockDevice, StorageError, StorageRegion};
use crate::trace::{Hex, Tracer};
use crate::updater::{CopyError, SlotUpdater};

const GROUP: &str = "main";
const BOOT_GROUP: &str = "BL";
const UPDATE_GROUP: &str = "upd";

/// How a run ended. The device waits for a power cycle in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    Confirmed,
    /// The bootloader reported an impossible swap type; nothing was confirmed.
    Degraded,
    /// Confirmation never came; the bootloader reverts on the next reset.
    Reverting,
    /// A new image is staged and marked pending.
    PendingReboot,
}

impl Outcome {
    pub fn name(self) -> &'static str {
        match self {
            Outcome::Confirmed => "confirmed",
            Outcome::Degraded => "degraded",
            Outcome::Reverting => "reverting",
            Outcome::PendingReboot => "pending reboot",
        }
    }
}

impl ufmt::uDisplay for Outcome {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowError<E> {
    Configuration(ConfigError),
    Storage(StorageError),
    Copy(CopyError),
    Activation(ActivationError),
    Confirm(ConfirmError),
    TriggerTimeout,
    Trigger(E),
}

/// Storage handed to a pre-update run.
pub struct Staging<D, S, const CHUNK: usize> {
    pub updater: SlotUpdater<D, CHUNK>,
    /// Device holding the new image at offset 0.
    pub source: S,
    /// Secondary slot, in offsets of the updater's device.
    pub secondary: StorageRegion,
}

impl<D: BlockDevice, S: BlockDevice, const CHUNK: usize> Staging<D, S, CHUNK> {
    pub fn new(updater: SlotUpdater<D, CHUNK>, source: S, secondary: StorageRegion) -> Self {
        Self {
            updater,
            source,
            secondary,
        }
    }
}

pub struct UpdateWorkflow<'a, B, W> {
    config: WorkflowConfig,
    controller: BootStateController<B>,
    tracer: &'a mut Tracer<W>,
    shared: Option<&'a [u8]>,
}

impl<'a, B: BootUtil, W: uWrite> UpdateWorkflow<'a, B, W> {
    pub fn new(config: WorkflowConfig, bootutil: B, tracer: &'a mut Tracer<W>) -> Self {
        Self {
            config,
            controller: BootStateController::new(bootutil),
            tracer,
            shared: None,
        }
    }

    /// Area the bootloader left its records in.
    pub fn with_shared_data(mut self, region: &'a [u8]) -> Self {
        self.shared = Some(region);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn boot_state(&self) -> BootState {
        self.controller.state()
    }

    pub fn controller_mut(&mut self) -> &mut BootStateController<B> {
        &mut self.controller
    }

    pub fn into_bootutil(self) -> B {
        self.controller.into_inner()
    }

    /// Runs the whole pipeline. `idle` is called between trigger polls.
    ///
    /// The post-update variant never touches `staging`.
    pub fn run<T, D, S, const CHUNK: usize>(
        &mut self,
        trigger: &mut T,
        staging: &mut Staging<D, S, CHUNK>,
        mut idle: impl FnMut(),
    ) -> Result<Outcome, WorkflowError<T::Error>>
    where
        T: TriggerSource,
        D: BlockDevice,
        S: BlockDevice,
    {
        if let Err(e) = self.config.validate(CHUNK) {
            tr_error!(self.tracer, GROUP, "Invalid configuration: {}", e);
            return Err(WorkflowError::Configuration(e));
        }
        staging.updater.set_verify(self.config.verify);

        let state = self.confirm_or_revert(trigger, &mut idle)?;
        if state == BootState::Reverting {
            return Ok(Outcome::Reverting);
        }

        self.report_version();
        if self.config.data_sharing {
            self.drain_shared_data();
        }

        match self.config.variant {
            Variant::PostUpdate if state == BootState::Confirmed => Ok(Outcome::Confirmed),
            Variant::PostUpdate => Ok(Outcome::Degraded),
            Variant::PreUpdate => self.stage(trigger, staging, &mut idle),
        }
    }

    fn confirm_or_revert<T: TriggerSource>(
        &mut self,
        trigger: &mut T,
        idle: &mut impl FnMut(),
    ) -> Result<BootState, WorkflowError<T::Error>> {
        let swap_type = self.controller.current_swap_type();
        tr_debug!(self.tracer, BOOT_GROUP, "Swap type: {}", swap_type);

        match self.controller.begin() {
            Ok(BootState::Confirmed) => tr_info!(self.tracer, GROUP, "Boot confirmed"),
            Ok(BootState::AwaitingUserConfirm) => {
                tr_info!(
                    self.tracer,
                    GROUP,
                    "> Reverted image running, press button to confirm it"
                );
                let timeout = self.config.trigger_timeout;
                match self
                    .controller
                    .await_confirmation(trigger, timeout, &mut *idle)
                {
                    Ok(BootState::Confirmed) => tr_info!(self.tracer, GROUP, "Boot confirmed"),
                    Ok(_) => tr_warn!(
                        self.tracer,
                        GROUP,
                        "Not confirmed, image reverts on next reset"
                    ),
                    Err(AwaitError::Trigger(e)) => {
                        tr_error!(self.tracer, GROUP, "Button read failed");
                        return Err(WorkflowError::Trigger(e));
                    }
                    Err(AwaitError::Confirm(e)) => {
                        tr_error!(self.tracer, GROUP, "Failed to confirm boot: {}", e);
                        return Err(WorkflowError::Confirm(e));
                    }
                }
            }
            Ok(_) => {}
            Err(BeginError::Configuration(e)) => {
                tr_error!(self.tracer, BOOT_GROUP, "{}, continuing without confirming", e);
            }
            Err(BeginError::Confirm(e)) => {
                tr_error!(self.tracer, GROUP, "Failed to confirm boot: {}", e);
                return Err(WorkflowError::Confirm(e));
            }
        }
        Ok(self.controller.state())
    }

    fn report_version(&mut self) {
        match self.controller.current_version() {
            Ok(version) => tr_info!(self.tracer, GROUP, "Hello version {}", version),
            Err(VersionError(e)) => tr_error!(
                self.tracer,
                GROUP,
                "Failed to load version information: {}",
                e
            ),
        }
    }

    /// Logs every shared record. Returns how many were read.
    fn drain_shared_data(&mut self) -> u16 {
        let Some(region) = self.shared else {
            tr_warn!(self.tracer, BOOT_GROUP, "No shared data area");
            return 0;
        };

        let mut reader = SharedDataReader::new(region);
        if !reader.is_valid() {
            tr_warn!(self.tracer, BOOT_GROUP, "Shared data header invalid");
            return 0;
        }
        tr_info!(
            self.tracer,
            BOOT_GROUP,
            "Shared data: {} bytes",
            reader.total_size()
        );

        let mut buffer = [0u8; SHARED_RECORD_MAX];
        let mut count: u16 = 0;
        loop {
            let entry = reader.next(&mut buffer);
            match entry.status {
                SharedDataStatus::Ok => {
                    if let Some(record) = entry.record(&buffer) {
                        tr_info!(
                            self.tracer,
                            BOOT_GROUP,
                            "Record major {} minor {}, {} bytes",
                            record.major(),
                            Hex(record.minor() as u32),
                            record.length()
                        );
                    }
                    count += 1;
                }
                SharedDataStatus::Eof => break,
                status => {
                    tr_warn!(
                        self.tracer,
                        BOOT_GROUP,
                        "Shared data stopped: {} at type {} length {}",
                        status,
                        Hex(entry.tlv_type as u32),
                        entry.length
                    );
                    break;
                }
            }
        }
        tr_info!(self.tracer, BOOT_GROUP, "{} shared records", count);
        count
    }

    fn stage<T, D, S, const CHUNK: usize>(
        &mut self,
        trigger: &mut T,
        staging: &mut Staging<D, S, CHUNK>,
        idle: &mut impl FnMut(),
    ) -> Result<Outcome, WorkflowError<T::Error>>
    where
        T: TriggerSource,
        D: BlockDevice,
        S: BlockDevice,
    {
        self.wait_for_user(trigger, idle, "> Press button to erase secondary slot")?;

        if let Err(e) = staging.updater.prepare(staging.secondary) {
            return Err(self.storage_failure("Cannot init secondary slot", e));
        }
        tr_info!(self.tracer, UPDATE_GROUP, "Secondary slot inited");

        tr_info!(self.tracer, UPDATE_GROUP, "Erasing secondary slot...");
        if let Err(e) = staging.updater.erase_all() {
            return Err(self.storage_failure("Cannot erase secondary slot", e));
        }
        tr_info!(self.tracer, UPDATE_GROUP, "Secondary slot erased");

        self.wait_for_user(
            trigger,
            idle,
            "> Press button to copy update image to secondary slot",
        )?;

        if let Err(e) = staging.source.init() {
            return Err(self.storage_failure("Cannot init update image device", e));
        }
        let length = self.config.copy_length;
        let chunk_size = self.config.chunk_size;
        tr_info!(
            self.tracer,
            UPDATE_GROUP,
            "Copying {} bytes in {} byte chunks",
            Hex(length),
            chunk_size
        );
        let image = match staging
            .updater
            .copy_from(&mut staging.source, length, chunk_size)
        {
            Ok(image) => image,
            Err(e) => {
                tr_error!(
                    self.tracer,
                    UPDATE_GROUP,
                    "Copy aborted, secondary slot incomplete: {}",
                    e
                );
                return Err(WorkflowError::Copy(e));
            }
        };

        self.wait_for_user(
            trigger,
            idle,
            "> Image copied to secondary slot, press button to activate",
        )?;

        let permanent = self.config.permanent;
        let activation =
            PendingActivator::new(self.controller.bootutil_mut()).mark_pending(&image, permanent);
        match activation {
            Ok(()) => {
                tr_info!(
                    self.tracer,
                    GROUP,
                    "> Secondary image pending, reboot to update"
                );
                Ok(Outcome::PendingReboot)
            }
            Err(e) => {
                tr_error!(
                    self.tracer,
                    GROUP,
                    "Failed to set secondary image pending: {}",
                    e
                );
                tr_error!(self.tracer, GROUP, "!!! Update NOT scheduled !!!");
                Err(WorkflowError::Activation(e))
            }
        }
    }

    fn wait_for_user<T: TriggerSource>(
        &mut self,
        trigger: &mut T,
        idle: &mut impl FnMut(),
        prompt: &str,
    ) -> Result<(), WorkflowError<T::Error>> {
        tr_info!(self.tracer, GROUP, "{}", prompt);
        match wait_for_trigger(trigger, self.config.trigger_timeout, &mut *idle) {
            Ok(()) => Ok(()),
            Err(WaitError::Timeout) => {
                tr_error!(self.tracer, GROUP, "No button press, giving up");
                Err(WorkflowError::TriggerTimeout)
            }
            Err(WaitError::Source(e)) => {
                tr_error!(self.tracer, GROUP, "Button read failed");
                Err(WorkflowError::Trigger(e))
            }
        }
    }

    fn storage_failure<E>(&mut self, what: &str, error: StorageError) -> WorkflowError<E> {
        tr_error!(self.tracer, UPDATE_GROUP, "{}: {}", what, error);
        WorkflowError::Storage(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::{BootUtilError, ImageVersion, SwapType};
    use crate::storage::RamDevice;
    use crate::trace::tests::Capture;
    use core::convert::Infallible;

    struct Boot {
        swap: SwapType,
        pending: Option<bool>,
    }

    impl BootUtil for Boot {
        fn set_confirmed(&mut self) -> Result<(), BootUtilError> {
            Ok(())
        }

        fn current_version(&mut self) -> Result<ImageVersion, BootUtilError> {
            Err(BootUtilError { code: -1 })
        }

        fn swap_type(&mut self) -> SwapType {
            self.swap
        }

        fn set_pending(&mut self, permanent: bool) -> Result<(), BootUtilError> {
            self.pending = Some(permanent);
            Ok(())
        }
    }

    struct Always;

    impl TriggerSource for Always {
        type Error = Infallible;

        fn poll_trigger(&mut self) -> nb::Result<(), Infallible> {
            Ok(())
        }
    }

    #[test]
    fn oversized_chunk_is_rejected_before_anything_runs() {
        let mut tracer = Tracer::new(Capture::default());
        let mut src = [0u8; 16];
        let mut dst = [0u8; 16];
        let mut staging = Staging::new(
            SlotUpdater::<_, 8>::new(RamDevice::new(&mut dst)),
            RamDevice::new(&mut src),
            StorageRegion::new(0, 16),
        );
        let mut config = WorkflowConfig::pre_update();
        config.chunk_size = 16;
        let boot = Boot {
            swap: SwapType::None,
            pending: None,
        };

        let mut workflow = UpdateWorkflow::new(config, boot, &mut tracer);
        assert_eq!(
            workflow.run(&mut Always, &mut staging, || {}),
            Err(WorkflowError::Configuration(ConfigError::ChunkTooLarge {
                chunk: 16,
                max: 8
            }))
        );
        assert_eq!(workflow.boot_state(), BootState::JustBooted);
    }

    #[test]
    fn degraded_run_still_stages() {
        let mut tracer = Tracer::new(Capture::default());
        let mut src = [0x42u8; 32];
        let mut dst = [0u8; 32];
        let mut staging = Staging::new(
            SlotUpdater::<_, 16>::new(RamDevice::new(&mut dst)),
            RamDevice::new(&mut src),
            StorageRegion::new(0, 32),
        );
        let mut config = WorkflowConfig::pre_update();
        config.chunk_size = 16;
        config.copy_length = 32;
        let boot = Boot {
            swap: SwapType::Perm,
            pending: None,
        };

        let mut workflow = UpdateWorkflow::new(config, boot, &mut tracer);
        assert_eq!(
            workflow.run(&mut Always, &mut staging, || {}),
            Ok(Outcome::PendingReboot)
        );
        assert_eq!(workflow.boot_state(), BootState::JustBooted);
        assert_eq!(workflow.into_bootutil().pending, Some(false));

        let log = &tracer.sink().0;
        assert!(log.contains("[ERR][BL]: unexpected swap type perm, continuing without confirming\r\n"));
        assert!(log.contains("[ERR][main]: Failed to load version information: -1\r\n"));
    }

    #[test]
    fn missing_shared_area_is_only_a_warning() {
        let mut tracer = Tracer::new(Capture::default());
        let mut src = [0u8; 16];
        let mut dst = [0u8; 16];
        let mut staging = Staging::new(
            SlotUpdater::<_, 16>::new(RamDevice::new(&mut dst)),
            RamDevice::new(&mut src),
            StorageRegion::new(0, 16),
        );
        let config = WorkflowConfig::post_update().with_data_sharing(true);
        let boot = Boot {
            swap: SwapType::None,
            pending: None,
        };

        let mut workflow = UpdateWorkflow::new(config, boot, &mut tracer);
        assert_eq!(
            workflow.run(&mut Always, &mut staging, || {}),
            Ok(Outcome::Confirmed)
        );
        assert!(tracer
            .sink()
            .0
            .contains("[WARN][BL]: No shared data area\r\n"));
    }
}
