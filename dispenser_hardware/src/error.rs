use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("address 0x{addr:04x} + {len} bytes is outside the device")]
    OutOfRange { addr: u16, len: usize },
    #[error("coil pattern {0:?} is not a valid half-step phase")]
    InvalidPhase([bool; 4]),
    #[error("phase jump of {0} half-steps; the rotor cannot follow")]
    PhaseJump(u8),
    #[error("bus transfer short count: expected {expected}, got {got}")]
    ShortTransfer { expected: usize, got: usize },
    #[error("gpio error: {0}")]
    Gpio(String),
}
