//! Crash-safe persisted state and the append-only event log.
//!
//! Two encodings live here. The live orchestration record is rewritten on
//! every slot boundary, so it uses cheap per-field complement pairs: each
//! field is stored next to its bitwise complement and the whole record is
//! rejected unless every pair verifies. Log entries are written rarely and
//! get a CRC-16 trailer over the full entry instead.
//!
//! A record that fails its check is treated as absent, never as
//! corrupt-but-usable: a torn write must look like a fresh boot.

use std::sync::Arc;
use std::time::Duration;

use dispenser_traits::{Clock, Eeprom};

use crate::error::StoreError;
use crate::fsm::Phase;

/// EEPROM layout. The log region sits at the bottom of the address space,
/// the live record above it, and the availability probe at the very top.
pub const LOG_START_ADDR: u16 = 0x0000;
pub const LOG_ENTRY_SIZE: usize = 64;
pub const LOG_MAX_ENTRIES: usize = 32;
/// Entry text capacity: 61 bytes + NUL + 2-byte CRC trailer = 64.
pub const LOG_TEXT_MAX: usize = LOG_ENTRY_SIZE - 3;
pub const STATE_ADDR: u16 = 0x0800;
/// Highest usable address, probed to detect a present chip.
pub const PROBE_ADDR: u16 = 0x7FFD;
/// Per-transaction bus limit (device page size).
pub const MAX_TRANSACTION: usize = LOG_ENTRY_SIZE;

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection, no xorout).
///
/// Appending the CRC big-endian to the payload makes the CRC of the whole
/// run equal zero; the log read path relies on that residual-zero check.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        let x = ((crc >> 8) as u8) ^ byte;
        let x = x ^ (x >> 4);
        crc = (crc << 8) ^ (u16::from(x) << 12) ^ (u16::from(x) << 5) ^ u16::from(x);
    }
    crc
}

/// Orchestration state as persisted across power loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRecord {
    pub phase: Phase,
    pub pills_left: u8,
    /// Half-steps completed within the current slot; only meaningful while
    /// `in_motion`. Recovery re-derives position physically and ignores it.
    pub progress_in_slot: u16,
    pub in_motion: bool,
    pub calibrated: bool,
    pub slots_completed: u8,
}

pub const STATE_RECORD_LEN: usize = 13;

#[inline]
fn pair_ok(value: u8, complement: u8) -> bool {
    value == !complement
}

#[inline]
fn bool_from(byte: u8) -> Option<bool> {
    match byte {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

impl StateRecord {
    /// Complement-pair layout; see the module docs. `slots_completed` rides
    /// along unprotected, bounded later by the orchestration invariants.
    pub fn encode(&self) -> [u8; STATE_RECORD_LEN] {
        let mut raw = [0u8; STATE_RECORD_LEN];
        let phase = self.phase.as_u8();
        raw[0] = phase;
        raw[1] = !phase;
        raw[2] = self.pills_left;
        raw[3] = !self.pills_left;
        raw[4..6].copy_from_slice(&self.progress_in_slot.to_le_bytes());
        raw[6..8].copy_from_slice(&(!self.progress_in_slot).to_le_bytes());
        raw[8] = u8::from(self.in_motion);
        raw[9] = !u8::from(self.in_motion);
        raw[10] = u8::from(self.calibrated);
        raw[11] = !u8::from(self.calibrated);
        raw[12] = self.slots_completed;
        raw
    }

    /// Decode and verify. Any complement mismatch, unknown phase byte, or
    /// non-canonical boolean rejects the whole record.
    pub fn decode(raw: &[u8; STATE_RECORD_LEN]) -> Option<Self> {
        if !pair_ok(raw[0], raw[1]) || !pair_ok(raw[2], raw[3]) {
            return None;
        }
        if !pair_ok(raw[8], raw[9]) || !pair_ok(raw[10], raw[11]) {
            return None;
        }
        let progress = u16::from_le_bytes([raw[4], raw[5]]);
        let progress_not = u16::from_le_bytes([raw[6], raw[7]]);
        if progress != !progress_not {
            return None;
        }
        let phase = Phase::from_u8(raw[0])?;
        let in_motion = bool_from(raw[8])?;
        let calibrated = bool_from(raw[10])?;
        Some(Self {
            phase,
            pills_left: raw[2],
            progress_in_slot: progress,
            in_motion,
            calibrated,
            slots_completed: raw[12],
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreCfg {
    /// Post-write settle before the bus is reused (ms).
    pub write_settle_ms: u64,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self { write_settle_ms: 5 }
    }
}

impl From<&dispenser_config::StorageCfg> for StoreCfg {
    fn from(c: &dispenser_config::StorageCfg) -> Self {
        Self {
            write_settle_ms: c.write_settle_ms,
        }
    }
}

/// The store wraps the raw bus with the transaction bound, the post-write
/// settle delay, and the two region encodings.
pub struct StateStore<E> {
    bus: E,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: StoreCfg,
}

fn bus_err(e: Box<dyn std::error::Error + Send + Sync>) -> StoreError {
    StoreError::Bus(e.to_string())
}

impl<E: Eeprom> StateStore<E> {
    pub fn new(bus: E, cfg: StoreCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { bus, clock, cfg }
    }

    /// Bounded read of an arbitrary byte range.
    pub fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), StoreError> {
        if buf.len() > MAX_TRANSACTION {
            return Err(StoreError::OversizeTransaction {
                len: buf.len(),
                max: MAX_TRANSACTION,
            });
        }
        self.bus.read(addr, buf).map_err(bus_err)
    }

    /// Bounded write; sleeps the settle delay before returning the bus.
    pub fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), StoreError> {
        if data.len() > MAX_TRANSACTION {
            return Err(StoreError::OversizeTransaction {
                len: data.len(),
                max: MAX_TRANSACTION,
            });
        }
        self.bus.write(addr, data).map_err(bus_err)?;
        self.clock.sleep(Duration::from_millis(self.cfg.write_settle_ms));
        Ok(())
    }

    /// Probe the top-of-space address to see whether a chip answers at all.
    pub fn available(&mut self) -> bool {
        let mut probe = [0u8; 1];
        self.read(PROBE_ADDR, &mut probe).is_ok()
    }

    pub fn save_record(&mut self, record: &StateRecord) -> Result<(), StoreError> {
        tracing::trace!(
            phase = ?record.phase,
            pills_left = record.pills_left,
            slots_completed = record.slots_completed,
            in_motion = record.in_motion,
            "persisting state record"
        );
        self.write(STATE_ADDR, &record.encode())
    }

    /// Load the live record. `Ok(None)` means no valid record (fresh-boot
    /// path); only bus failures are errors.
    pub fn load_record(&mut self) -> Result<Option<StateRecord>, StoreError> {
        let mut raw = [0u8; STATE_RECORD_LEN];
        self.read(STATE_ADDR, &mut raw)?;
        Ok(StateRecord::decode(&raw))
    }

    /// First slot whose leading byte is zero, or None when the region is full.
    fn find_free_slot(&mut self) -> Result<Option<usize>, StoreError> {
        let mut first = [0u8; 1];
        for slot in 0..LOG_MAX_ENTRIES {
            let addr = LOG_START_ADDR + (slot * LOG_ENTRY_SIZE) as u16;
            self.read(addr, &mut first)?;
            if first[0] == 0 {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Zero the first byte of every slot. Oldest-data-loss-on-overflow: the
    /// whole region goes at once, entries are never retired individually.
    pub fn erase_log(&mut self) -> Result<(), StoreError> {
        for slot in 0..LOG_MAX_ENTRIES {
            let addr = LOG_START_ADDR + (slot * LOG_ENTRY_SIZE) as u16;
            self.write(addr, &[0u8])?;
        }
        tracing::debug!("log region erased");
        Ok(())
    }

    /// Append a message to the first free slot, erasing the region first
    /// when it is full. Returns the slot index used.
    pub fn append_log(&mut self, msg: &str) -> Result<usize, StoreError> {
        let slot = match self.find_free_slot()? {
            Some(s) => s,
            None => {
                self.erase_log()?;
                0
            }
        };

        let mut entry = [0u8; LOG_ENTRY_SIZE];
        let text = msg.as_bytes();
        let len = text.len().min(LOG_TEXT_MAX);
        entry[..len].copy_from_slice(&text[..len]);
        // entry[len] is the NUL terminator; CRC covers text + NUL.
        let crc = crc16(&entry[..=len]);
        entry[len + 1] = (crc >> 8) as u8;
        entry[len + 2] = (crc & 0xFF) as u8;

        let addr = LOG_START_ADDR + (slot * LOG_ENTRY_SIZE) as u16;
        self.write(addr, &entry)?;
        tracing::debug!(slot, msg, "log appended");
        Ok(slot)
    }

    /// Collect all validated entries, in append order. Entries failing the
    /// residual-zero CRC check are skipped; a bus failure aborts the scan.
    pub fn read_log(&mut self) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        let mut entry = [0u8; LOG_ENTRY_SIZE];
        for slot in 0..LOG_MAX_ENTRIES {
            let addr = LOG_START_ADDR + (slot * LOG_ENTRY_SIZE) as u16;
            self.read(addr, &mut entry)?;
            if entry[0] == 0 {
                break;
            }
            let Some(len) = entry[..=LOG_TEXT_MAX].iter().position(|&b| b == 0) else {
                tracing::warn!(slot, "log entry missing terminator");
                continue;
            };
            // Residual over text + NUL + trailer must be zero.
            if crc16(&entry[..len + 3]) != 0 {
                tracing::warn!(slot, "log entry failed CRC");
                continue;
            }
            out.push(String::from_utf8_lossy(&entry[..len]).into_owned());
        }
        Ok(out)
    }
}
