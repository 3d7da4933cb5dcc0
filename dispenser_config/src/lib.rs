#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the pill dispenser.
//!
//! All sections are deserialized from TOML with defaults matching the
//! reference board constants, then validated as a whole. The core crate
//! carries its own plain config structs; the CLI maps these onto them.
use serde::Deserialize;

/// GPIO/bus pin assignment. Only meaningful to the real-hardware bench;
/// simulated runs ignore it.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Pins {
    /// Coil outputs in energization-table order
    pub coils: [u8; 4],
    /// Opto-fork home sensor input
    pub index_sensor: u8,
    /// Piezo pill-drop sensor input
    pub drop_sensor: u8,
    pub status_led: u8,
    pub calibrate_button: u8,
    pub dispense_button: u8,
    pub i2c_sda: u8,
    pub i2c_scl: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            coils: [2, 3, 6, 13],
            index_sensor: 28,
            drop_sensor: 27,
            status_led: 20,
            calibrate_button: 7,
            dispense_button: 8,
            i2c_sda: 16,
            i2c_scl: 17,
        }
    }
}

/// Stepper drive and calibration parameters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StepperCfg {
    /// Delay between half-steps (motor electrical limit)
    pub step_delay_ms: u64,
    /// Settle after re-asserting the held phase before a long motion
    pub lock_settle_ms: u64,
    /// Revolutions measured during calibration
    pub calib_revs: u32,
    /// Index-to-index intervals shorter than this are sensor bounce
    pub min_steps_valid: u32,
    /// Hard ceiling on any single search/measure motion
    pub guard_steps: u32,
    /// Half-steps per carousel slot (fixed; not derived from calibration)
    pub slot_half_steps: u32,
    /// Signed half-steps from the index edge to slot 0
    pub slot_offset: i32,
    /// Persist slot progress every this many half-steps during motion
    pub progress_save_interval: u32,
}

impl Default for StepperCfg {
    fn default() -> Self {
        Self {
            step_delay_ms: 2,
            lock_settle_ms: 20,
            calib_revs: 3,
            min_steps_valid: 50,
            guard_steps: 10_000,
            slot_half_steps: 144,
            slot_offset: 144,
            progress_save_interval: 16,
        }
    }
}

/// Pill-drop detection window physics.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorCfg {
    /// Free-fall distance from slot edge to piezo plate (metres)
    pub fall_distance_m: f32,
    pub gravity: f32,
    /// Safety margin multiplier applied to the computed fall time
    pub margin: f32,
    /// Extra settle time for the motor to stop (ms)
    pub motor_stop_extra_ms: u32,
    /// Window floor (ms)
    pub min_window_ms: u32,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            fall_distance_m: 0.035,
            gravity: 9.8,
            margin: 0.5,
            motor_stop_extra_ms: 80,
            min_window_ms: 150,
        }
    }
}

/// LoRaWAN modem/join parameters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UplinkCfg {
    pub app_key: String,
    pub port: u8,
    pub max_join_attempts: u32,
    pub join_retry_delay_ms: u64,
    /// Per-command response timeout for the short setup commands
    pub command_timeout_ms: u64,
    /// AT+JOIN response timeout (longest of the sequence)
    pub join_timeout_ms: u64,
    /// AT+MSG acknowledgement timeout
    pub msg_timeout_ms: u64,
}

impl Default for UplinkCfg {
    fn default() -> Self {
        Self {
            app_key: "9c3ccbe1a7b0844775a045933be85009".to_string(),
            port: 8,
            max_join_attempts: 5,
            join_retry_delay_ms: 5_000,
            command_timeout_ms: 500,
            join_timeout_ms: 17_000,
            msg_timeout_ms: 7_000,
        }
    }
}

/// EEPROM bus behavior. Region addresses are fixed layout constants in the
/// core; only timing is configurable.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageCfg {
    /// Post-write settle before the bus is reused (ms)
    pub write_settle_ms: u64,
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self { write_settle_ms: 5 }
    }
}

/// Orchestration-level parameters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispenseCfg {
    /// Slots (= pills) per cycle
    pub pill_count: u8,
    /// Time between dispense deadlines (ms)
    pub interval_ms: u64,
    /// Boot settle delay before connecting (ms)
    pub boot_settle_ms: u64,
    /// Button debounce interval (ms)
    pub debounce_ms: u64,
    /// Waiting-state LED blink half-period (ms)
    pub blink_period_ms: u64,
    pub fail_blinks: u32,
    pub finish_blinks: u32,
}

impl Default for DispenseCfg {
    fn default() -> Self {
        Self {
            pill_count: 7,
            interval_ms: 30_000,
            boot_settle_ms: 3_000,
            debounce_ms: 20,
            blink_period_ms: 500,
            fail_blinks: 5,
            finish_blinks: 3,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub pins: Pins,
    pub stepper: StepperCfg,
    pub sensor: SensorCfg,
    pub uplink: UplinkCfg,
    pub storage: StorageCfg,
    pub dispense: DispenseCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// Whole-config validation; returns the first violation found.
    pub fn validate(&self) -> eyre::Result<()> {
        let st = &self.stepper;
        if st.slot_half_steps == 0 {
            eyre::bail!("stepper.slot_half_steps must be > 0");
        }
        if st.guard_steps <= st.slot_half_steps {
            eyre::bail!("stepper.guard_steps must exceed slot_half_steps");
        }
        if st.calib_revs == 0 {
            eyre::bail!("stepper.calib_revs must be >= 1");
        }
        if st.min_steps_valid == 0 {
            eyre::bail!("stepper.min_steps_valid must be >= 1");
        }
        if st.progress_save_interval == 0 {
            eyre::bail!("stepper.progress_save_interval must be >= 1");
        }
        if st.slot_offset.unsigned_abs() > st.guard_steps {
            eyre::bail!("stepper.slot_offset exceeds guard_steps");
        }

        let se = &self.sensor;
        if !(se.fall_distance_m.is_finite() && se.fall_distance_m > 0.0) {
            eyre::bail!("sensor.fall_distance_m must be finite and > 0");
        }
        if !(se.gravity.is_finite() && se.gravity > 0.0) {
            eyre::bail!("sensor.gravity must be finite and > 0");
        }
        if !(se.margin.is_finite() && se.margin >= 0.0) {
            eyre::bail!("sensor.margin must be finite and >= 0");
        }

        let up = &self.uplink;
        if up.max_join_attempts == 0 {
            eyre::bail!("uplink.max_join_attempts must be >= 1");
        }
        if up.join_timeout_ms == 0 || up.command_timeout_ms == 0 || up.msg_timeout_ms == 0 {
            eyre::bail!("uplink timeouts must be >= 1 ms");
        }
        if up.app_key.is_empty() || !up.app_key.bytes().all(|b| b.is_ascii_hexdigit()) {
            eyre::bail!("uplink.app_key must be a non-empty hex string");
        }

        let d = &self.dispense;
        if d.pill_count == 0 {
            eyre::bail!("dispense.pill_count must be >= 1");
        }
        if d.interval_ms == 0 {
            eyre::bail!("dispense.interval_ms must be >= 1");
        }

        Ok(())
    }
}
