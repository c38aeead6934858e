#![no_std]
#![no_main]
#![feature(abi_avr_interrupt)]

use core::cell::RefCell;

use avr_device::atmega128a::PORTB;
use panic_halt as _;

use atmega128_update_agent::boot::ffi::McuBoot;
use atmega128_update_agent::config::{
    self, SECONDARY_SLOT_OFFSET, SHARED_DATA_BASE, SHARED_DATA_SIZE, SLOT_SIZE,
    STAGED_IMAGE_OFFSET, TRACE_FILTERS,
};
use atmega128_update_agent::drivers::{SerialConsole, Trigger, W25q};
use atmega128_update_agent::hal::gpio::{board, Input, Pin};
use atmega128_update_agent::hal::{Power, PollTick, Prescaler, Spi, SpiPrescaler};
use atmega128_update_agent::storage::SlicedDevice;
use atmega128_update_agent::trace::{Level, Tracer};
use atmega128_update_agent::{
    tr_error, tr_info, SlotUpdater, Staging, StorageRegion, UpdateWorkflow,
};

const COPY_CHUNK: usize = config::COPY_CHUNK;

#[avr_device::entry]
fn main() -> ! {
    let mut power = Power::new();

    let mut tracer = Tracer::new(SerialConsole::new());
    tracer.set_include_filters(TRACE_FILTERS);
    if cfg!(feature = "debug") {
        tracer.set_level(Level::Debug);
    }

    let workflow_config = config::board_workflow();

    // Pins are claimed once here and nowhere else
    let button: board::BTN0 = unsafe { Pin::steal() };
    let button = match workflow_config.polarity {
        config::Polarity::ActiveLow => button.into_pull_up_input(),
        config::Polarity::ActiveHigh => button.into_input(),
    };
    let _ss: board::SS = unsafe { Pin::<PORTB, 0, Input>::steal() }.into_output();
    let _sck: board::SCK = unsafe { Pin::<PORTB, 1, Input>::steal() }.into_output();
    let _mosi: board::MOSI = unsafe { Pin::<PORTB, 2, Input>::steal() }.into_output();
    let _miso: board::MISO = unsafe { Pin::steal() };
    let cs: board::FLASH_CS = unsafe { Pin::<PORTB, 4, Input>::steal() }.into_output();

    let flash = RefCell::new(W25q::new(Spi::new(SpiPrescaler::Div4), cs));
    let secondary = SlicedDevice::new(&flash, StorageRegion::new(SECONDARY_SLOT_OFFSET, SLOT_SIZE));
    let source = SlicedDevice::new(&flash, StorageRegion::new(STAGED_IMAGE_OFFSET, SLOT_SIZE));
    let (secondary, source) = match (secondary, source) {
        (Ok(secondary), Ok(source)) => (secondary, source),
        _ => {
            tr_error!(&mut tracer, "main", "Flash layout does not fit the device");
            loop {
                power.enter_idle_mode();
            }
        }
    };
    let mut staging = Staging::new(
        SlotUpdater::<_, COPY_CHUNK>::new(secondary),
        source,
        StorageRegion::new(0, SLOT_SIZE),
    );

    // Written by the bootloader. The linker keeps .data, .bss and the stack
    // out of this range, so nothing in this image writes it.
    let shared = unsafe {
        core::slice::from_raw_parts(SHARED_DATA_BASE as *const u8, SHARED_DATA_SIZE)
    };

    let mut trigger = Trigger::new(
        button,
        workflow_config.polarity,
        workflow_config.debounce_polls,
    );

    let mut tick = PollTick::start(Prescaler::Div1024);
    unsafe { avr_device::interrupt::enable() };

    let result = UpdateWorkflow::new(workflow_config, McuBoot::new(), &mut tracer)
        .with_shared_data(shared)
        .run(&mut trigger, &mut staging, || power.enter_idle_mode());

    match result {
        Ok(outcome) => tr_info!(&mut tracer, "main", "Done: {}", outcome),
        Err(_) => tr_error!(&mut tracer, "main", "Update agent stopped on error"),
    }

    // Nothing left to do until the device is power cycled
    tick.stop();
    loop {
        power.enter_idle_mode();
    }
}
