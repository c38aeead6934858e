use core::cell::RefCell;
use core::convert::Infallible;

use atmega128_update_agent::boot::BootUtilError;
use atmega128_update_agent::config::{ConfigError, Variant};
use atmega128_update_agent::drivers::TriggerSource;
use atmega128_update_agent::shared_data::SHARED_DATA_MAGIC;
use atmega128_update_agent::storage::{RamDevice, SlicedDevice};
use atmega128_update_agent::trace::Tracer;
use atmega128_update_agent::ufmt::uWrite;
use atmega128_update_agent::{
    BlockDevice, BootState, BootUtil, CopyError, ImageVersion, Outcome, SlotState, SlotUpdater,
    Staging, StorageError, StorageRegion, SwapType, UpdateWorkflow, WorkflowConfig,
    WorkflowError,
};

const SLOT: u32 = 0x20000;
const CHUNK: usize = 0x1000;

#[derive(Default)]
struct Log(String);

impl uWrite for Log {
    type Error = Infallible;

    fn write_str(&mut self, s: &str) -> Result<(), Infallible> {
        self.0.push_str(s);
        Ok(())
    }
}

struct FakeBoot {
    swap: SwapType,
    confirms: u32,
    pending: Vec<bool>,
    pending_rc: i32,
}

impl FakeBoot {
    fn new(swap: SwapType) -> Self {
        Self {
            swap,
            confirms: 0,
            pending: Vec::new(),
            pending_rc: 0,
        }
    }
}

impl BootUtil for FakeBoot {
    fn set_confirmed(&mut self) -> Result<(), BootUtilError> {
        self.confirms += 1;
        Ok(())
    }

    fn current_version(&mut self) -> Result<ImageVersion, BootUtilError> {
        Ok(ImageVersion {
            major: 1,
            minor: 0,
            revision: 2,
            build_number: 7,
        })
    }

    fn swap_type(&mut self) -> SwapType {
        self.swap
    }

    fn set_pending(&mut self, permanent: bool) -> Result<(), BootUtilError> {
        self.pending.push(permanent);
        BootUtilError::check(self.pending_rc)
    }
}

/// Button that is pressed after `delay` polls, at most `presses` times.
struct Button {
    delay: u32,
    waited: u32,
    presses: u32,
    pressed: u32,
}

impl Button {
    fn presses(presses: u32) -> Self {
        Self {
            delay: 2,
            waited: 0,
            presses,
            pressed: 0,
        }
    }
}

impl TriggerSource for Button {
    type Error = Infallible;

    fn poll_trigger(&mut self) -> nb::Result<(), Infallible> {
        if self.pressed == self.presses {
            return Err(nb::Error::WouldBlock);
        }
        if self.waited < self.delay {
            self.waited += 1;
            return Err(nb::Error::WouldBlock);
        }
        self.waited = 0;
        self.pressed += 1;
        Ok(())
    }
}

fn pre_update() -> WorkflowConfig {
    let mut config = WorkflowConfig::pre_update();
    config.chunk_size = CHUNK as u32;
    config.copy_length = SLOT;
    config
}

#[test]
fn pre_update_stages_and_marks_pending() {
    let mut src = vec![0xAAu8; SLOT as usize];
    let mut dst = vec![0x00u8; SLOT as usize];
    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, CHUNK>::new(RamDevice::new(&mut dst)),
        RamDevice::new(&mut src),
        StorageRegion::new(0, SLOT),
    );
    let mut button = Button::presses(3);
    let mut idles = 0;

    let mut workflow = UpdateWorkflow::new(pre_update(), FakeBoot::new(SwapType::None), &mut tracer);
    let outcome = workflow.run(&mut button, &mut staging, || idles += 1);

    assert_eq!(outcome, Ok(Outcome::PendingReboot));
    assert_eq!(workflow.boot_state(), BootState::Confirmed);
    let boot = workflow.into_bootutil();
    assert_eq!(boot.confirms, 1);
    assert_eq!(boot.pending, vec![false]);
    assert_eq!(button.pressed, 3);
    assert_eq!(idles, 6);

    assert_eq!(staging.updater.state(), SlotState::Staged);
    let mut byte = [0u8; 1];
    for offset in [0, 0x1000, 0x1FFF] {
        staging.updater.device_mut().read(&mut byte, offset).unwrap();
        assert_eq!(byte, [0xAA]);
    }

    let log = &tracer.sink().0;
    assert!(log.starts_with("[INFO][main]: Boot confirmed\r\n"));
    assert!(log.contains("[INFO][main]: Hello version 1.0.2+7\r\n"));
    assert!(log.contains("[INFO][upd]: Secondary slot erased\r\n"));
    assert!(log.contains("[INFO][upd]: Copying 0x20000 bytes in 4096 byte chunks\r\n"));
    assert!(log.ends_with("[INFO][main]: > Secondary image pending, reboot to update\r\n"));
}

#[test]
fn permanent_swap_is_passed_through() {
    let mut src = vec![0x01u8; 256];
    let mut dst = vec![0xFFu8; 256];
    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, 64>::new(RamDevice::new(&mut dst)),
        RamDevice::new(&mut src),
        StorageRegion::new(0, 256),
    );
    let mut config = WorkflowConfig::pre_update();
    config.chunk_size = 64;
    config.copy_length = 200;
    config.permanent = true;

    let mut workflow = UpdateWorkflow::new(config, FakeBoot::new(SwapType::None), &mut tracer);
    assert_eq!(
        workflow.run(&mut Button::presses(3), &mut staging, || {}),
        Ok(Outcome::PendingReboot)
    );
    assert_eq!(workflow.into_bootutil().pending, vec![true]);
}

#[test]
fn reverted_image_is_confirmed_exactly_once_on_press() {
    let mut src = vec![0u8; 64];
    let mut dst = vec![0u8; 64];
    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, 256>::new(RamDevice::new(&mut dst)),
        RamDevice::new(&mut src),
        StorageRegion::new(0, 64),
    );
    let config = WorkflowConfig::post_update();
    assert_eq!(config.variant, Variant::PostUpdate);

    let mut workflow = UpdateWorkflow::new(config, FakeBoot::new(SwapType::Revert), &mut tracer);
    let mut button = Button::presses(5);
    assert_eq!(
        workflow.run(&mut button, &mut staging, || {}),
        Ok(Outcome::Confirmed)
    );
    let boot = workflow.into_bootutil();
    assert_eq!(boot.confirms, 1);
    assert!(boot.pending.is_empty());
    assert_eq!(button.pressed, 1);
    assert_eq!(staging.updater.state(), SlotState::Unprepared);
    assert!(tracer
        .sink()
        .0
        .contains("[INFO][main]: > Reverted image running, press button to confirm it\r\n"));
}

#[test]
fn unconfirmed_revert_stops_the_pipeline() {
    let mut src = vec![0u8; 64];
    let mut dst = vec![0u8; 64];
    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, 256>::new(RamDevice::new(&mut dst)),
        RamDevice::new(&mut src),
        StorageRegion::new(0, 64),
    );
    let mut config = WorkflowConfig::pre_update();
    config.trigger_timeout = Some(10);

    let mut workflow = UpdateWorkflow::new(config, FakeBoot::new(SwapType::Revert), &mut tracer);
    assert_eq!(
        workflow.run(&mut Button::presses(0), &mut staging, || {}),
        Ok(Outcome::Reverting)
    );
    assert_eq!(workflow.boot_state(), BootState::Reverting);
    assert_eq!(workflow.into_bootutil().confirms, 0);
    assert_eq!(staging.updater.state(), SlotState::Unprepared);
}

#[test]
fn copy_failure_never_marks_pending() {
    let mut src = vec![0x55u8; SLOT as usize];
    let mut dst = vec![0xFFu8; SLOT as usize];
    let mut tracer = Tracer::new(Log::default());
    let mut source = RamDevice::new(&mut src);
    source.inject_read_fault(0x3000);
    let mut staging = Staging::new(
        SlotUpdater::<_, CHUNK>::new(RamDevice::new(&mut dst)),
        source,
        StorageRegion::new(0, SLOT),
    );

    let mut workflow = UpdateWorkflow::new(pre_update(), FakeBoot::new(SwapType::None), &mut tracer);
    let mut button = Button::presses(3);
    assert_eq!(
        workflow.run(&mut button, &mut staging, || {}),
        Err(WorkflowError::Copy(CopyError::Read {
            offset: 0x3000,
            error: StorageError::Read
        }))
    );
    assert!(workflow.into_bootutil().pending.is_empty());
    assert_eq!(button.pressed, 2);
    assert_eq!(staging.updater.state(), SlotState::Incomplete);
    assert!(tracer.sink().0.contains(
        "[ERR][upd]: Copy aborted, secondary slot incomplete: read at 0x3000 failed: read failed\r\n"
    ));
}

#[test]
fn rejected_pending_request_is_reported() {
    let mut src = vec![0x66u8; 512];
    let mut dst = vec![0xFFu8; 512];
    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, 128>::new(RamDevice::new(&mut dst)),
        RamDevice::new(&mut src),
        StorageRegion::new(0, 512),
    );
    let mut config = WorkflowConfig::pre_update();
    config.chunk_size = 128;
    config.copy_length = 512;
    let mut boot = FakeBoot::new(SwapType::None);
    boot.pending_rc = -3;

    let mut workflow = UpdateWorkflow::new(config, boot, &mut tracer);
    let result = workflow.run(&mut Button::presses(3), &mut staging, || {});
    assert!(matches!(result, Err(WorkflowError::Activation(e)) if e.source.code == -3));
    assert!(tracer
        .sink()
        .0
        .contains("[ERR][main]: !!! Update NOT scheduled !!!\r\n"));
}

#[test]
fn missing_press_times_out_before_erase() {
    let mut src = vec![0u8; 64];
    let mut dst = vec![0x12u8; 64];
    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, 256>::new(RamDevice::new(&mut dst)),
        RamDevice::new(&mut src),
        StorageRegion::new(0, 64),
    );
    let mut config = WorkflowConfig::pre_update();
    config.trigger_timeout = Some(5);

    let mut workflow = UpdateWorkflow::new(config, FakeBoot::new(SwapType::None), &mut tracer);
    assert_eq!(
        workflow.run(&mut Button::presses(0), &mut staging, || {}),
        Err(WorkflowError::TriggerTimeout)
    );
    drop(workflow);
    assert!(staging.updater.into_inner().as_slice().iter().all(|b| *b == 0x12));
}

#[test]
fn empty_image_is_refused_up_front() {
    let mut src = vec![0u8; 64];
    let mut dst = vec![0x12u8; 64];
    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, 256>::new(RamDevice::new(&mut dst)),
        RamDevice::new(&mut src),
        StorageRegion::new(0, 64),
    );
    let mut config = WorkflowConfig::pre_update();
    config.copy_length = 0;

    let mut workflow = UpdateWorkflow::new(config, FakeBoot::new(SwapType::None), &mut tracer);
    assert_eq!(
        workflow.run(&mut Button::presses(3), &mut staging, || {}),
        Err(WorkflowError::Configuration(ConfigError::ZeroLength))
    );
    assert_eq!(workflow.boot_state(), BootState::JustBooted);
    assert!(workflow.into_bootutil().pending.is_empty());
    assert_eq!(staging.updater.state(), SlotState::Unprepared);
}

#[test]
fn post_update_confirms_with_a_small_copy_buffer() {
    let mut src = vec![0u8; 16];
    let mut dst = vec![0x12u8; 16];
    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, 16>::new(RamDevice::new(&mut dst)),
        RamDevice::new(&mut src),
        StorageRegion::new(0, 16),
    );
    // board chunk size, larger than this updater's buffer
    let config = WorkflowConfig::post_update();

    let mut workflow = UpdateWorkflow::new(config, FakeBoot::new(SwapType::Test), &mut tracer);
    assert_eq!(
        workflow.run(&mut Button::presses(0), &mut staging, || {}),
        Ok(Outcome::Confirmed)
    );
    assert_eq!(workflow.into_bootutil().confirms, 1);
    let slot = staging.updater.into_inner();
    assert_eq!(slot.stats().erases, 0);
    assert!(slot.as_slice().iter().all(|b| *b == 0x12));
}

fn shared_region(records: &[(u16, &[u8])]) -> Vec<u8> {
    let mut out = vec![0u8; 4];
    for (tlv_type, payload) in records {
        out.extend_from_slice(&tlv_type.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
    }
    let total = out.len() as u16;
    out[0..2].copy_from_slice(&SHARED_DATA_MAGIC.to_le_bytes());
    out[2..4].copy_from_slice(&total.to_le_bytes());
    out.resize(256, 0);
    out
}

#[test]
fn post_update_dumps_shared_records() {
    let shared = shared_region(&[(0x1001, b"boot"), (0x2002, &[0u8; 32])]);
    let mut src = vec![0u8; 64];
    let mut dst = vec![0u8; 64];
    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, 256>::new(RamDevice::new(&mut dst)),
        RamDevice::new(&mut src),
        StorageRegion::new(0, 64),
    );
    let config = WorkflowConfig::post_update().with_data_sharing(true);

    let mut workflow = UpdateWorkflow::new(config, FakeBoot::new(SwapType::None), &mut tracer)
        .with_shared_data(&shared);
    assert_eq!(
        workflow.run(&mut Button::presses(0), &mut staging, || {}),
        Ok(Outcome::Confirmed)
    );

    let log = &tracer.sink().0;
    assert!(log.contains("[INFO][BL]: Shared data: 48 bytes\r\n"));
    assert!(log.contains("[INFO][BL]: Record major 1 minor 0x1, 4 bytes\r\n"));
    assert!(log.contains("[INFO][BL]: Record major 2 minor 0x2, 32 bytes\r\n"));
    assert!(log.contains("[INFO][BL]: 2 shared records\r\n"));
}

#[test]
fn corrupt_shared_data_is_not_fatal() {
    let mut shared = shared_region(&[(0x1001, b"boot")]);
    shared[6..8].copy_from_slice(&200u16.to_le_bytes());
    let mut src = vec![0u8; 64];
    let mut dst = vec![0u8; 64];
    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, 256>::new(RamDevice::new(&mut dst)),
        RamDevice::new(&mut src),
        StorageRegion::new(0, 64),
    );
    let config = WorkflowConfig::post_update().with_data_sharing(true);

    let mut workflow = UpdateWorkflow::new(config, FakeBoot::new(SwapType::None), &mut tracer)
        .with_shared_data(&shared);
    assert_eq!(
        workflow.run(&mut Button::presses(0), &mut staging, || {}),
        Ok(Outcome::Confirmed)
    );
    assert!(tracer
        .sink()
        .0
        .contains("[WARN][BL]: Shared data stopped: buffer too small at type 0x1001 length 200\r\n"));
}

#[test]
fn slot_and_image_share_one_flash() {
    let mut mem = vec![0xFFu8; 0x8000];
    for b in &mut mem[0x4000..0x6000] {
        *b = 0x3C;
    }
    let flash = RefCell::new(RamDevice::new(&mut mem).with_erase_size(0x1000));
    let secondary = SlicedDevice::new(&flash, StorageRegion::new(0, 0x2000)).unwrap();
    let source = SlicedDevice::new(&flash, StorageRegion::new(0x4000, 0x2000)).unwrap();

    let mut tracer = Tracer::new(Log::default());
    let mut staging = Staging::new(
        SlotUpdater::<_, 256>::new(secondary),
        source,
        StorageRegion::new(0, 0x2000),
    );
    let mut config = WorkflowConfig::pre_update();
    config.copy_length = 0x2000;

    let mut workflow = UpdateWorkflow::new(config, FakeBoot::new(SwapType::None), &mut tracer);
    assert_eq!(
        workflow.run(&mut Button::presses(3), &mut staging, || {}),
        Ok(Outcome::PendingReboot)
    );
    drop(workflow);
    drop(staging);

    let flash = flash.into_inner();
    assert!(flash.as_slice()[..0x2000].iter().all(|b| *b == 0x3C));
    assert!(flash.as_slice()[0x2000..0x4000].iter().all(|b| *b == 0xFF));
}
