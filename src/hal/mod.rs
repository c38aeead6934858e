pub mod gpio;
pub mod power;
pub mod spi;
pub mod timer;
pub mod uart;

pub use gpio::board;
pub use gpio::{Input, Output, Pin};
pub use power::Power;
pub use spi::{Spi, SpiPrescaler};
pub use timer::{PollTick, Prescaler};
pub use uart::Uart;
