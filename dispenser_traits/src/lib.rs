pub mod clock;
pub mod flags;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use flags::{EdgeCounter, EdgeFlag};

use std::error::Error;
use std::time::Duration;

/// Boxed error type shared by all hardware traits. Concrete drivers surface
/// their own typed errors; the core maps them where it needs to distinguish.
pub type HwResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Four-line coil driver for the carousel stepper. One call asserts one row
/// of the half-step energization table; `release` drops all coils so the
/// motor is free-wheeling (and cool) between motions.
pub trait CoilDriver {
    fn energize(&mut self, lines: [bool; 4]) -> HwResult<()>;
    fn release(&mut self) -> HwResult<()>;
}

/// Optical home-position sensor, level view. The gap in the carousel disc
/// reads active (true) while the opto fork is unblocked.
///
/// Edge detection is not part of this trait: the falling-edge interrupt
/// feeds a shared `EdgeFlag` owned by the consumer.
pub trait IndexSensor {
    fn in_gap(&mut self) -> HwResult<bool>;
}

/// Byte-addressable non-volatile storage bus (I2C EEPROM or equivalent).
/// Implementations bound a single transaction to the device page limit and
/// must report short transfers as errors, never as silent truncation.
pub trait Eeprom {
    fn read(&mut self, addr: u16, buf: &mut [u8]) -> HwResult<()>;
    fn write(&mut self, addr: u16, data: &[u8]) -> HwResult<()>;
}

/// Line-oriented serial channel to the wireless modem.
///
/// `read_line` strips the line terminator and returns `None` on timeout;
/// transport-level failures are errors.
pub trait ModemPort {
    fn send_line(&mut self, line: &str) -> HwResult<()>;
    fn read_line(&mut self, timeout: Duration) -> HwResult<Option<String>>;
}

/// Momentary push button, active state already resolved by the driver
/// (the reference inputs are active-low with pull-ups).
pub trait Button {
    fn is_pressed(&mut self) -> HwResult<bool>;
}

/// Single status LED.
pub trait StatusLed {
    fn set(&mut self, on: bool) -> HwResult<()>;
}

impl<T: CoilDriver + ?Sized> CoilDriver for Box<T> {
    fn energize(&mut self, lines: [bool; 4]) -> HwResult<()> {
        (**self).energize(lines)
    }
    fn release(&mut self) -> HwResult<()> {
        (**self).release()
    }
}

impl<T: IndexSensor + ?Sized> IndexSensor for Box<T> {
    fn in_gap(&mut self) -> HwResult<bool> {
        (**self).in_gap()
    }
}

impl<T: Eeprom + ?Sized> Eeprom for Box<T> {
    fn read(&mut self, addr: u16, buf: &mut [u8]) -> HwResult<()> {
        (**self).read(addr, buf)
    }
    fn write(&mut self, addr: u16, data: &[u8]) -> HwResult<()> {
        (**self).write(addr, data)
    }
}

impl<T: ModemPort + ?Sized> ModemPort for Box<T> {
    fn send_line(&mut self, line: &str) -> HwResult<()> {
        (**self).send_line(line)
    }
    fn read_line(&mut self, timeout: Duration) -> HwResult<Option<String>> {
        (**self).read_line(timeout)
    }
}

impl<T: Button + ?Sized> Button for Box<T> {
    fn is_pressed(&mut self) -> HwResult<bool> {
        (**self).is_pressed()
    }
}

impl<T: StatusLed + ?Sized> StatusLed for Box<T> {
    fn set(&mut self, on: bool) -> HwResult<()> {
        (**self).set(on)
    }
}
