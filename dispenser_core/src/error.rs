use thiserror::Error;

/// Persistent-store failures. Validity failures are *not* errors: an invalid
/// record reads back as absent.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("transaction of {len} bytes exceeds the {max}-byte bus limit")]
    OversizeTransaction { len: usize, max: usize },
    #[error("storage bus error: {0}")]
    Bus(String),
}

#[derive(Debug, Error, Clone)]
pub enum StepperError {
    #[error("guard ceiling of {guard} steps exceeded while {context}")]
    GuardExceeded { guard: u32, context: &'static str },
    #[error("motion requires calibration")]
    NotCalibrated,
    #[error("coil driver error: {0}")]
    Coils(String),
    #[error("index sensor error: {0}")]
    Sensor(String),
}

#[derive(Debug, Error, Clone)]
pub enum UplinkError {
    #[error("modem port error: {0}")]
    Port(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing coil driver")]
    MissingCoils,
    #[error("missing index sensor")]
    MissingIndexSensor,
    #[error("missing storage bus")]
    MissingEeprom,
    #[error("missing modem port")]
    MissingModem,
    #[error("missing calibrate button")]
    MissingCalibrateButton,
    #[error("missing dispense button")]
    MissingDispenseButton,
    #[error("missing status LED")]
    MissingLed,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
