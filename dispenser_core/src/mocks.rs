//! Test and helper mocks for dispenser_core.
//!
//! Host-side stand-ins for the peripherals behind the hardware traits. The
//! richer carousel simulation (motion + index geometry) lives in
//! `dispenser_hardware`; these stay minimal and deterministic.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::error::Error;
use std::rc::Rc;
use std::time::{Duration, Instant};

use dispenser_traits::{Clock, EdgeFlag, Eeprom, HwResult, ManualClock, ModemPort};

/// In-memory EEPROM image with bounds checking.
pub struct MemEeprom {
    data: Vec<u8>,
}

impl Default for MemEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemEeprom {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; 0x8000],
        }
    }

    /// Raw image access for corruption tests.
    pub fn image_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Eeprom for MemEeprom {
    fn read(&mut self, addr: u16, buf: &mut [u8]) -> HwResult<()> {
        let start = addr as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(Box::new(std::io::Error::other("read past end of device")));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> HwResult<()> {
        let start = addr as usize;
        let end = start + data.len();
        if end > self.data.len() {
            return Err(Box::new(std::io::Error::other("write past end of device")));
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// Modem that replays a fixed script of response lines, recording every
/// command sent. Clones share state, so tests keep a handle to the log
/// after moving the mock into a client.
#[derive(Clone, Default)]
pub struct ScriptedModem {
    sent: Rc<RefCell<Vec<String>>>,
    replies: Rc<RefCell<VecDeque<String>>>,
}

impl ScriptedModem {
    pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sent: Rc::default(),
            replies: Rc::new(RefCell::new(replies.into_iter().map(Into::into).collect())),
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }
}

impl ModemPort for ScriptedModem {
    fn send_line(&mut self, line: &str) -> HwResult<()> {
        self.sent.borrow_mut().push(line.to_string());
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> HwResult<Option<String>> {
        Ok(self.replies.borrow_mut().pop_front())
    }
}

/// Modem that never answers anything; every command times out.
#[derive(Clone, Default)]
pub struct DeadModem {
    sent: Rc<RefCell<Vec<String>>>,
}

impl DeadModem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }
}

impl ModemPort for DeadModem {
    fn send_line(&mut self, line: &str) -> HwResult<()> {
        self.sent.borrow_mut().push(line.to_string());
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> HwResult<Option<String>> {
        Ok(None)
    }
}

/// Manual clock that raises an edge flag on every sleep, standing in for a
/// pill hitting the piezo while a detection window (or any wait) elapses.
#[derive(Clone)]
pub struct RaisingClock {
    inner: ManualClock,
    flag: EdgeFlag,
}

impl RaisingClock {
    pub fn new(inner: ManualClock, flag: EdgeFlag) -> Self {
        Self { inner, flag }
    }
}

impl Clock for RaisingClock {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn sleep(&self, d: Duration) {
        self.flag.raise();
        self.inner.sleep(d);
    }
}

/// EEPROM whose bus dies after a set number of operations; everything after
/// that reports a transfer failure.
pub struct FlakyEeprom {
    inner: MemEeprom,
    ops_before_failure: usize,
}

impl FlakyEeprom {
    pub fn new(ops_before_failure: usize) -> Self {
        Self {
            inner: MemEeprom::new(),
            ops_before_failure,
        }
    }

    fn tick(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.ops_before_failure == 0 {
            return Err(Box::new(std::io::Error::other("bus transfer short count")));
        }
        self.ops_before_failure -= 1;
        Ok(())
    }
}

impl Eeprom for FlakyEeprom {
    fn read(&mut self, addr: u16, buf: &mut [u8]) -> HwResult<()> {
        self.tick()?;
        self.inner.read(addr, buf)
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> HwResult<()> {
        self.tick()?;
        self.inner.write(addr, data)
    }
}
