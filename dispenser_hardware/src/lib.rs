//! Simulated dispenser bench.
//!
//! Everything behind the `dispenser_traits` abstractions, modeled well
//! enough to exercise calibration, slot motion, recovery, persistence, and
//! the uplink protocol on a host. The carousel model maps coil patterns
//! back onto the half-step table to track rotor position, so the core's
//! motion code is exercised exactly as written.
//!
//! The optional `hardware` feature adds rppal-backed implementations for a
//! Raspberry Pi target (`rpi` module).

pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod rpi;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dispenser_traits::{
    Button, CoilDriver, EdgeCounter, EdgeFlag, Eeprom, HwResult, IndexSensor, ModemPort, StatusLed,
};

use crate::error::HwError;

/// The motor's physical half-step truth table; the simulation inverts it to
/// recover the commanded phase index from the coil pattern.
const PHASE_TABLE: [[bool; 4]; 8] = [
    [true, false, false, false],
    [true, true, false, false],
    [false, true, false, false],
    [false, true, true, false],
    [false, false, true, false],
    [false, false, true, true],
    [false, false, false, true],
    [true, false, false, true],
];

#[derive(Debug, Clone)]
pub struct CarouselGeometry {
    /// Half-steps per full revolution of the simulated carousel
    pub steps_per_rev: u32,
    /// Width of the index gap in half-steps; positions inside read "in gap"
    pub gap_span: u32,
    /// Initial rotor position
    pub start_position: u32,
    /// Half-steps per slot, used to decide when a release ends a slot move
    pub slot_half_steps: u32,
}

impl Default for CarouselGeometry {
    fn default() -> Self {
        Self {
            steps_per_rev: 4096,
            gap_span: 120,
            start_position: 600,
            slot_half_steps: 144,
        }
    }
}

struct CarouselInner {
    geometry: CarouselGeometry,
    position: u32,
    last_phase: Option<usize>,
    steps_since_release: u32,
    total_steps: u64,
    index_edge: EdgeFlag,
    pill_hit: EdgeFlag,
    pill_edges: EdgeCounter,
    /// When set, a slot-sized motion deposits a pill on the piezo this many
    /// ms after the coils release (separate thread, like a real interrupt).
    auto_drop_delay_ms: Option<u64>,
}

impl CarouselInner {
    fn in_gap(&self) -> bool {
        self.position < self.geometry.gap_span
    }

    fn move_one(&mut self, dir: i32) {
        let was_in_gap = self.in_gap();
        let n = self.geometry.steps_per_rev as i64;
        let next = (i64::from(self.position) + i64::from(dir)).rem_euclid(n);
        self.position = next as u32;
        self.steps_since_release += 1;
        self.total_steps += 1;
        // Falling edge fires on entering the gap.
        if !was_in_gap && self.in_gap() {
            self.index_edge.raise();
        }
    }

    fn apply_phase(&mut self, lines: [bool; 4]) -> Result<(), HwError> {
        let idx = PHASE_TABLE
            .iter()
            .position(|&p| p == lines)
            .ok_or(HwError::InvalidPhase(lines))?;
        let delta = match self.last_phase {
            None => 0,
            Some(prev) => (idx + 8 - prev) % 8,
        };
        match delta {
            0 => {}
            1 => self.move_one(1),
            7 => self.move_one(-1),
            other => return Err(HwError::PhaseJump(other as u8)),
        }
        self.last_phase = Some(idx);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(delay_ms) = self.auto_drop_delay_ms
            && self.steps_since_release >= self.geometry.slot_half_steps / 2
        {
            tracing::trace!(delay_ms, "slot move complete, pill in flight");
            let hit = self.pill_hit.clone();
            let edges = self.pill_edges.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay_ms));
                hit.raise();
                edges.increment();
            });
        }
        self.steps_since_release = 0;
    }
}

/// Shared view of the simulated carousel for assertions and scenario setup.
#[derive(Clone)]
pub struct CarouselHandle {
    inner: Rc<RefCell<CarouselInner>>,
}

impl CarouselHandle {
    pub fn position(&self) -> u32 {
        self.inner.borrow().position
    }

    pub fn in_gap(&self) -> bool {
        self.inner.borrow().in_gap()
    }

    pub fn total_steps(&self) -> u64 {
        self.inner.borrow().total_steps
    }

    /// Teleport the rotor (scenario setup only; clears phase history so the
    /// next energize re-locks without moving).
    pub fn set_position(&self, position: u32) {
        let mut inner = self.inner.borrow_mut();
        let n = inner.geometry.steps_per_rev;
        inner.position = position % n;
        inner.last_phase = None;
    }
}

/// Coil driver half of the simulated carousel.
pub struct SimCoils {
    inner: Rc<RefCell<CarouselInner>>,
}

impl CoilDriver for SimCoils {
    fn energize(&mut self, lines: [bool; 4]) -> HwResult<()> {
        self.inner.borrow_mut().apply_phase(lines)?;
        Ok(())
    }

    fn release(&mut self) -> HwResult<()> {
        self.inner.borrow_mut().release();
        Ok(())
    }
}

/// Opto-fork half of the simulated carousel.
pub struct SimIndexSensor {
    inner: Rc<RefCell<CarouselInner>>,
}

impl IndexSensor for SimIndexSensor {
    fn in_gap(&mut self) -> HwResult<bool> {
        Ok(self.inner.borrow().in_gap())
    }
}

/// In-memory EEPROM; clones share the same image.
#[derive(Clone)]
pub struct SimEeprom {
    data: Rc<RefCell<Vec<u8>>>,
}

impl Default for SimEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEeprom {
    pub fn new() -> Self {
        Self {
            data: Rc::new(RefCell::new(vec![0u8; 0x8000])),
        }
    }

    /// Flip bits at an address (torn-write/corruption scenarios).
    pub fn corrupt(&self, addr: u16, xor: u8) {
        self.data.borrow_mut()[addr as usize] ^= xor;
    }

    pub fn snapshot(&self, addr: u16, len: usize) -> Vec<u8> {
        let data = self.data.borrow();
        data[addr as usize..addr as usize + len].to_vec()
    }
}

impl Eeprom for SimEeprom {
    fn read(&mut self, addr: u16, buf: &mut [u8]) -> HwResult<()> {
        let data = self.data.borrow();
        let start = addr as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(Box::new(HwError::OutOfRange {
                addr,
                len: buf.len(),
            }));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write(&mut self, addr: u16, data_in: &[u8]) -> HwResult<()> {
        let mut data = self.data.borrow_mut();
        let start = addr as usize;
        let end = start + data_in.len();
        if end > data.len() {
            return Err(Box::new(HwError::OutOfRange {
                addr,
                len: data_in.len(),
            }));
        }
        data[start..end].copy_from_slice(data_in);
        Ok(())
    }
}

/// Happy-path modem: every AT command is acknowledged the way the real
/// module answers it, and every sent line is recorded. Clones share state.
#[derive(Clone, Default)]
pub struct SimModem {
    sent: Rc<RefCell<Vec<String>>>,
    pending: Rc<RefCell<VecDeque<String>>>,
}

impl SimModem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    fn respond(&self, cmd: &str) {
        let mut pending = self.pending.borrow_mut();
        if cmd == "AT" {
            pending.push_back("OK".into());
        } else if cmd.starts_with("AT+MODE=") {
            pending.push_back("+MODE: LWOTAA".into());
        } else if cmd.starts_with("AT+KEY=") {
            pending.push_back("+KEY: APPKEY".into());
        } else if cmd.starts_with("AT+CLASS=") {
            pending.push_back("+CLASS: A".into());
        } else if cmd.starts_with("AT+PORT=") {
            pending.push_back("+PORT: 8".into());
        } else if cmd == "AT+JOIN" {
            pending.push_back("+JOIN: Starting".into());
            pending.push_back("+JOIN: NORMAL".into());
            pending.push_back("+JOIN: Done".into());
        } else if cmd.starts_with("AT+MSG=") {
            pending.push_back("+MSG: Start".into());
            pending.push_back("+MSG: Done".into());
        }
    }
}

impl ModemPort for SimModem {
    fn send_line(&mut self, line: &str) -> HwResult<()> {
        self.sent.borrow_mut().push(line.to_string());
        self.respond(line);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> HwResult<Option<String>> {
        Ok(self.pending.borrow_mut().pop_front())
    }
}

/// Push button; clones are handles to the same contact.
#[derive(Clone, Default)]
pub struct SimButton(Arc<AtomicBool>);

impl SimButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Button for SimButton {
    fn is_pressed(&mut self) -> HwResult<bool> {
        Ok(self.0.load(Ordering::Relaxed))
    }
}

/// Status LED; clones observe the same level.
#[derive(Clone, Default)]
pub struct SimLed(Arc<AtomicBool>);

impl SimLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl StatusLed for SimLed {
    fn set(&mut self, on: bool) -> HwResult<()> {
        self.0.store(on, Ordering::Relaxed);
        Ok(())
    }
}

/// One fully wired simulated device.
pub struct SimBench {
    pub coils: SimCoils,
    pub index: SimIndexSensor,
    pub eeprom: SimEeprom,
    pub modem: SimModem,
    pub calibrate_button: SimButton,
    pub dispense_button: SimButton,
    pub led: SimLed,
    pub index_edge: EdgeFlag,
    pub pill_hit: EdgeFlag,
    pub pill_edges: EdgeCounter,
    pub carousel: CarouselHandle,
}

impl SimBench {
    pub fn new(geometry: CarouselGeometry) -> Self {
        Self::build(geometry, None)
    }

    /// As `new`, but slot-sized motions deposit a pill on the piezo
    /// `delay_ms` after the coils release, from a background thread, the
    /// way the real interrupt would land mid-window.
    pub fn with_auto_drop(geometry: CarouselGeometry, delay_ms: u64) -> Self {
        Self::build(geometry, Some(delay_ms))
    }

    fn build(geometry: CarouselGeometry, auto_drop_delay_ms: Option<u64>) -> Self {
        let index_edge = EdgeFlag::new();
        let pill_hit = EdgeFlag::new();
        let pill_edges = EdgeCounter::new();
        let inner = Rc::new(RefCell::new(CarouselInner {
            position: geometry.start_position % geometry.steps_per_rev,
            geometry,
            last_phase: None,
            steps_since_release: 0,
            total_steps: 0,
            index_edge: index_edge.clone(),
            pill_hit: pill_hit.clone(),
            pill_edges: pill_edges.clone(),
            auto_drop_delay_ms,
        }));
        Self {
            coils: SimCoils {
                inner: inner.clone(),
            },
            index: SimIndexSensor {
                inner: inner.clone(),
            },
            eeprom: SimEeprom::new(),
            modem: SimModem::new(),
            calibrate_button: SimButton::new(),
            dispense_button: SimButton::new(),
            led: SimLed::new(),
            index_edge,
            pill_hit,
            pill_edges,
            carousel: CarouselHandle { inner },
        }
    }
}
