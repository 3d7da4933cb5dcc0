//! Raspberry Pi implementations of the hardware traits (rppal-backed).
//!
//! The interrupt-capable inputs register async callbacks that only raise
//! the shared edge flags, keeping the flag-only interrupt discipline the
//! core relies on.

use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
use rppal::i2c::I2c;
use rppal::uart::{Parity, Queue, Uart};

use dispenser_traits::{
    Button, CoilDriver, EdgeCounter, EdgeFlag, Eeprom, HwResult, IndexSensor, ModemPort, StatusLed,
};

use crate::error::HwError;

const EEPROM_I2C_ADDR: u16 = 0x50;

fn gpio_err(e: impl std::fmt::Display) -> HwError {
    HwError::Gpio(e.to_string())
}

pub struct GpioCoils {
    pins: [OutputPin; 4],
}

impl GpioCoils {
    pub fn new(gpio: &Gpio, pin_numbers: [u8; 4]) -> Result<Self, HwError> {
        let mut pins = Vec::with_capacity(4);
        for n in pin_numbers {
            let mut pin = gpio.get(n).map_err(gpio_err)?.into_output();
            pin.set_low();
            pins.push(pin);
        }
        let pins: [OutputPin; 4] = pins
            .try_into()
            .map_err(|_| gpio_err("coil pin setup incomplete"))?;
        Ok(Self { pins })
    }
}

impl CoilDriver for GpioCoils {
    fn energize(&mut self, lines: [bool; 4]) -> HwResult<()> {
        for (pin, on) in self.pins.iter_mut().zip(lines) {
            pin.write(if on { Level::High } else { Level::Low });
        }
        Ok(())
    }

    fn release(&mut self) -> HwResult<()> {
        for pin in &mut self.pins {
            pin.set_low();
        }
        Ok(())
    }
}

/// Opto-fork input: pulled up, low inside the index gap. The falling-edge
/// interrupt raises the shared flag.
pub struct GpioIndexSensor {
    pin: InputPin,
}

impl GpioIndexSensor {
    pub fn new(gpio: &Gpio, pin_number: u8, edge: EdgeFlag) -> Result<Self, HwError> {
        let mut pin = gpio.get(pin_number).map_err(gpio_err)?.into_input_pullup();
        pin.set_async_interrupt(Trigger::FallingEdge, None, move |_| {
            edge.raise();
        })
        .map_err(gpio_err)?;
        Ok(Self { pin })
    }
}

impl IndexSensor for GpioIndexSensor {
    fn in_gap(&mut self) -> HwResult<bool> {
        Ok(self.pin.is_low())
    }
}

/// Piezo drop sensor: interrupt-only, no level reads. Construct it for its
/// side effect of wiring the flag and counter.
pub struct GpioDropSensor {
    _pin: InputPin,
}

impl GpioDropSensor {
    pub fn new(
        gpio: &Gpio,
        pin_number: u8,
        hit: EdgeFlag,
        edges: EdgeCounter,
    ) -> Result<Self, HwError> {
        let mut pin = gpio.get(pin_number).map_err(gpio_err)?.into_input_pullup();
        pin.set_async_interrupt(Trigger::FallingEdge, None, move |_| {
            hit.raise();
            edges.increment();
        })
        .map_err(gpio_err)?;
        Ok(Self { _pin: pin })
    }
}

/// Two-wire EEPROM behind a 16-bit address header.
pub struct I2cEeprom {
    i2c: I2c,
}

impl I2cEeprom {
    pub fn new(mut i2c: I2c) -> Result<Self, HwError> {
        i2c.set_slave_address(EEPROM_I2C_ADDR).map_err(gpio_err)?;
        Ok(Self { i2c })
    }
}

impl Eeprom for I2cEeprom {
    fn read(&mut self, addr: u16, buf: &mut [u8]) -> HwResult<()> {
        let header = addr.to_be_bytes();
        self.i2c.write_read(&header, buf).map_err(gpio_err)?;
        Ok(())
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> HwResult<()> {
        let mut tx = Vec::with_capacity(2 + data.len());
        tx.extend_from_slice(&addr.to_be_bytes());
        tx.extend_from_slice(data);
        let written = self.i2c.write(&tx).map_err(gpio_err)?;
        if written != tx.len() {
            return Err(Box::new(HwError::ShortTransfer {
                expected: tx.len(),
                got: written,
            }));
        }
        Ok(())
    }
}

/// Line-delimited AT channel over the Pi UART.
pub struct UartModem {
    uart: Uart,
}

impl UartModem {
    pub fn new(baud: u32) -> Result<Self, HwError> {
        let uart = Uart::new(baud, Parity::None, 8, 1).map_err(gpio_err)?;
        Ok(Self { uart })
    }
}

impl ModemPort for UartModem {
    fn send_line(&mut self, line: &str) -> HwResult<()> {
        let mut framed = line.as_bytes().to_vec();
        framed.extend_from_slice(b"\r\n");
        let written = self.uart.write(&framed).map_err(gpio_err)?;
        if written != framed.len() {
            return Err(Box::new(HwError::ShortTransfer {
                expected: framed.len(),
                got: written,
            }));
        }
        self.uart.drain(Queue::Output).map_err(gpio_err)?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> HwResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        self.uart
            .set_read_mode(0, Duration::from_millis(10))
            .map_err(gpio_err)?;
        while Instant::now() < deadline {
            let n = self.uart.read(&mut byte).map_err(gpio_err)?;
            if n == 0 {
                continue;
            }
            match byte[0] {
                b'\n' => return Ok(Some(String::from_utf8_lossy(&line).into_owned())),
                b'\r' => {}
                b => line.push(b),
            }
        }
        Ok(None)
    }
}

pub struct GpioButton {
    pin: InputPin,
}

impl GpioButton {
    /// Active-low momentary input with pull-up.
    pub fn new(gpio: &Gpio, pin_number: u8) -> Result<Self, HwError> {
        let pin = gpio.get(pin_number).map_err(gpio_err)?.into_input_pullup();
        Ok(Self { pin })
    }
}

impl Button for GpioButton {
    fn is_pressed(&mut self) -> HwResult<bool> {
        Ok(self.pin.is_low())
    }
}

pub struct GpioLed {
    pin: OutputPin,
}

impl GpioLed {
    pub fn new(gpio: &Gpio, pin_number: u8) -> Result<Self, HwError> {
        let mut pin = gpio.get(pin_number).map_err(gpio_err)?.into_output();
        pin.set_low();
        Ok(Self { pin })
    }
}

impl StatusLed for GpioLed {
    fn set(&mut self, on: bool) -> HwResult<()> {
        self.pin.write(if on { Level::High } else { Level::Low });
        Ok(())
    }
}
