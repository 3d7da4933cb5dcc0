#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core dispenser logic (hardware-agnostic).
//!
//! This crate provides the hardware-independent orchestration engine for a
//! carousel pill dispenser. All hardware interactions go through the
//! `dispenser_traits` abstractions, so the whole thing runs against
//! simulated peripherals on a host.
//!
//! ## Architecture
//!
//! - **Persistence**: complement-pair live record + CRC-checked event log
//!   on a byte-addressable EEPROM (`store` module)
//! - **Stepper**: half-step drive, index calibration, slot motion, and
//!   power-loss recovery (`stepper` module)
//! - **Detection**: physics-derived pill-fall window (`sensor` module)
//! - **Uplink**: AT-command LoRaWAN join/send with bounded retries
//!   (`uplink` module)
//! - **Orchestration**: the boot/calibrate/dispense/recover state machine
//!   tying them together (`fsm` module)
//!
//! Interrupt sources (index edge, piezo hit) only set the shared flags in
//! `dispenser_traits::flags`; everything else is single-threaded and
//! cooperative.

pub mod error;
pub mod fsm;
pub mod mocks;
pub mod sensor;
pub mod stepper;
pub mod store;
pub mod uplink;

pub use error::{BuildError, Report, Result, StepperError, StoreError, UplinkError};
pub use fsm::{DispenseCfg, Dispenser, DispenserBuilder, Phase};
pub use sensor::{DropSensor, DropSensorCfg, detection_window_ms};
pub use stepper::{HALF_STEP_TABLE, StepperCfg, StepperDrive};
pub use store::{
    LOG_ENTRY_SIZE, LOG_MAX_ENTRIES, LOG_START_ADDR, LOG_TEXT_MAX, MAX_TRANSACTION, PROBE_ADDR,
    STATE_ADDR, STATE_RECORD_LEN, StateRecord, StateStore, StoreCfg, crc16,
};
pub use uplink::{UplinkCfg, UplinkClient};
