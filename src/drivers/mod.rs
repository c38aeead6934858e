pub mod flash;
pub mod trigger;

#[cfg(feature = "atmega128")]
pub mod serial_console;

pub use flash::{FlashError, W25q};
pub use trigger::{wait_for_trigger, Trigger, TriggerSource, WaitError};

#[cfg(feature = "atmega128")]
pub use serial_console::SerialConsole;
