//! Carousel stepper drive, calibration, and power-loss recovery.
//!
//! The motor is driven through an 8-phase half-step table; advancing the
//! phase index by +1 rotates the carousel clockwise (dispense direction),
//! -1 counter-clockwise. Absolute position is never trusted across a reset:
//! it is re-derived from the optical index, which is the whole point of the
//! recovery path.

use std::sync::Arc;

use dispenser_traits::{Clock, CoilDriver, EdgeFlag, IndexSensor};

use crate::error::StepperError;

/// Half-step energization sequence (line 0 = least significant coil).
pub const HALF_STEP_TABLE: [[bool; 4]; 8] = [
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
    /// Half-steps per carousel slot. Fixed by the mechanics; deliberately
    /// not derived from the measured steps-per-revolution, so recovery can
    /// reconstruct slot boundaries without the calibration measurement.
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

impl From<&dispenser_config::StepperCfg> for StepperCfg {
    fn from(c: &dispenser_config::StepperCfg) -> Self {
        Self {
            step_delay_ms: c.step_delay_ms,
            lock_settle_ms: c.lock_settle_ms,
            calib_revs: c.calib_revs,
            min_steps_valid: c.min_steps_valid,
            guard_steps: c.guard_steps,
            slot_half_steps: c.slot_half_steps,
            slot_offset: c.slot_offset,
            progress_save_interval: c.progress_save_interval,
        }
    }
}

fn coil_err(e: Box<dyn std::error::Error + Send + Sync>) -> StepperError {
    StepperError::Coils(e.to_string())
}

fn sensor_err(e: Box<dyn std::error::Error + Send + Sync>) -> StepperError {
    StepperError::Sensor(e.to_string())
}

pub struct StepperDrive<C, X> {
    coils: C,
    index: X,
    /// Raised by the index falling-edge interrupt, consumed here.
    edge: EdgeFlag,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: StepperCfg,
    phase_index: u8,
    steps_per_rev: u32,
    calibrated: bool,
}

impl<C: CoilDriver, X: IndexSensor> StepperDrive<C, X> {
    pub fn new(
        coils: C,
        index: X,
        edge: EdgeFlag,
        cfg: StepperCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            coils,
            index,
            edge,
            clock,
            cfg,
            phase_index: 0,
            steps_per_rev: 0,
            calibrated: false,
        }
    }

    pub fn calibrated(&self) -> bool {
        self.calibrated
    }

    /// Measured half-steps per revolution; 0 until calibrated (or when
    /// calibration state was restored from storage, which keeps only the
    /// flag).
    pub fn steps_per_rev(&self) -> u32 {
        self.steps_per_rev
    }

    pub fn phase_index(&self) -> u8 {
        self.phase_index
    }

    pub fn cfg(&self) -> &StepperCfg {
        &self.cfg
    }

    /// Accept a persisted calibration flag after restore. The measurement
    /// itself is not persisted; slot motion only needs the fixed slot size.
    pub fn restore_calibrated(&mut self) {
        self.calibrated = true;
    }

    /// Forget calibration (cycle reset, failed recovery).
    pub fn invalidate_calibration(&mut self) {
        self.calibrated = false;
        self.steps_per_rev = 0;
    }

    /// One half-step; dir = +1 clockwise, -1 counter-clockwise.
    fn step(&mut self, dir: i8) -> Result<(), StepperError> {
        self.phase_index = ((i16::from(self.phase_index) + i16::from(dir) + 8) % 8) as u8;
        self.coils
            .energize(HALF_STEP_TABLE[self.phase_index as usize])
            .map_err(coil_err)?;
        self.clock.sleep_ms(self.cfg.step_delay_ms);
        Ok(())
    }

    /// De-energize all coils.
    pub fn release(&mut self) -> Result<(), StepperError> {
        self.coils.release().map_err(coil_err)
    }

    /// Re-assert the held phase and let the rotor settle before a long
    /// motion, so the first real step starts from a locked position.
    fn lock_phase(&mut self) -> Result<(), StepperError> {
        self.coils
            .energize(HALF_STEP_TABLE[self.phase_index as usize])
            .map_err(coil_err)?;
        self.clock.sleep_ms(self.cfg.lock_settle_ms);
        Ok(())
    }

    fn in_gap(&mut self) -> Result<bool, StepperError> {
        self.index.in_gap().map_err(sensor_err)
    }

    /// Abort helper: release the coils, then report the guard violation.
    fn guard_abort(&mut self, context: &'static str) -> StepperError {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "coil release failed during abort");
        }
        StepperError::GuardExceeded {
            guard: self.cfg.guard_steps,
            context,
        }
    }

    /// Find the index and measure steps-per-revolution.
    ///
    /// 1. If starting inside the index gap, step clear of it first.
    /// 2. Step to the first edge as a sync point (not counted).
    /// 3. Measure `calib_revs` edge-to-edge intervals, discarding any
    ///    shorter than `min_steps_valid` as bounce.
    ///
    /// Every stage is bounded by the guard ceiling; violation aborts with
    /// the coils released and the drive left uncalibrated.
    pub fn calibrate(&mut self) -> Result<u32, StepperError> {
        tracing::info!("calibrating");
        self.calibrated = false;
        self.steps_per_rev = 0;
        self.edge.clear();

        if self.in_gap()? {
            let mut guard = 0u32;
            while self.in_gap()? {
                self.step(1)?;
                guard += 1;
                if guard > self.cfg.guard_steps {
                    return Err(self.guard_abort("clearing the index gap"));
                }
            }
        }

        // Sync on the first edge; this partial revolution is not counted.
        let mut guard = 0u32;
        self.edge.clear();
        loop {
            self.step(1)?;
            if self.edge.take() {
                break;
            }
            guard += 1;
            if guard > self.cfg.guard_steps {
                return Err(self.guard_abort("searching for the index"));
            }
        }

        let mut revs_done = 0u32;
        let mut total_steps = 0u32;
        let mut steps_since_index = 0u32;
        while revs_done < self.cfg.calib_revs {
            self.step(1)?;
            steps_since_index += 1;
            if steps_since_index > self.cfg.guard_steps {
                return Err(self.guard_abort("measuring a revolution"));
            }
            if self.edge.take() {
                if steps_since_index >= self.cfg.min_steps_valid {
                    revs_done += 1;
                    total_steps += steps_since_index;
                    tracing::debug!(rev = revs_done, steps = steps_since_index, "revolution");
                } else {
                    tracing::trace!(steps = steps_since_index, "index bounce discarded");
                }
                steps_since_index = 0;
            }
        }

        self.steps_per_rev = total_steps / self.cfg.calib_revs;
        self.calibrated = true;
        self.release()?;
        tracing::info!(steps_per_rev = self.steps_per_rev, "calibration ok");
        Ok(self.steps_per_rev)
    }

    /// Apply the fixed index-to-slot-0 offset once, after calibration.
    /// A zero offset performs no motion at all.
    pub fn apply_slot_offset(&mut self) -> Result<(), StepperError> {
        let offset = self.cfg.slot_offset;
        if offset == 0 {
            return Ok(());
        }
        let dir: i8 = if offset >= 0 { 1 } else { -1 };
        for _ in 0..offset.unsigned_abs() {
            self.step(dir)?;
        }
        self.release()
    }

    /// Move forward exactly one slot. `checkpoint` is invoked with the
    /// running half-step count at the configured interval so the caller can
    /// persist partial progress; a reset mid-motion then leaves a usable
    /// in-motion record behind.
    pub fn advance_slot<F>(&mut self, mut checkpoint: F) -> Result<(), StepperError>
    where
        F: FnMut(u16),
    {
        if !self.calibrated {
            return Err(StepperError::NotCalibrated);
        }
        let target = self.cfg.slot_half_steps;
        tracing::debug!(target, "advancing one slot");
        self.lock_phase()?;
        for done in 1..=target {
            self.step(1)?;
            if done % self.cfg.progress_save_interval == 0 && done < target {
                checkpoint(done.min(u32::from(u16::MAX)) as u16);
            }
        }
        self.release()
    }

    /// Power-loss recovery: re-derive the carousel position from the
    /// physical index, then seek back to the last completed slot boundary.
    ///
    /// Steps counter-clockwise until the sensor level changes (edge of the
    /// gap), un-applies the slot offset, then runs clockwise
    /// `slots_completed x slot_half_steps`. Volatile progress counters from
    /// before the reset are never consulted.
    pub fn recover(&mut self, slots_completed: u8) -> Result<(), StepperError> {
        if !self.calibrated {
            return Err(StepperError::NotCalibrated);
        }
        tracing::info!(slots_completed, "recovery motion start");
        self.lock_phase()?;

        let start_level = self.in_gap()?;
        let mut guard = 0u32;
        loop {
            self.step(-1)?;
            guard += 1;
            if self.in_gap()? != start_level {
                break;
            }
            if guard >= self.cfg.guard_steps {
                return Err(self.guard_abort("re-homing to the index edge"));
            }
        }
        tracing::debug!(steps = guard, "index edge found");

        // Un-apply the slot offset (opposite direction of the forward pass).
        let offset = self.cfg.slot_offset;
        if offset != 0 {
            let dir: i8 = if offset >= 0 { -1 } else { 1 };
            for _ in 0..offset.unsigned_abs() {
                self.step(dir)?;
            }
        }

        let steps_to_run = u32::from(slots_completed) * self.cfg.slot_half_steps;
        for _ in 0..steps_to_run {
            self.step(1)?;
        }
        self.edge.clear();
        self.release()?;
        tracing::info!(
            slots_completed,
            "recovery motion complete, at last completed boundary"
        );
        Ok(())
    }
}
