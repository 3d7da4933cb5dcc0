//! Dispenser orchestration state machine.
//!
//! One cooperative `step()` at a time owns every subsystem; interrupt
//! sources only ever touch the shared edge flags. Waiting states poll
//! buttons and blink the LED on monotonic-clock schedules so nothing
//! busy-waits, while calibration, motion, join, and storage run to
//! completion synchronously inside the step that starts them.
//!
//! Every phase transition and slot outcome is persisted before the handler
//! returns (once a record exists; the boot handler must not overwrite the
//! pre-power-loss record before restoring it), and every notable event is
//! appended to the EEPROM log and mirrored over the uplink when connected.

use std::sync::Arc;
use std::time::Instant;

use dispenser_traits::{
    Button, Clock, CoilDriver, EdgeCounter, EdgeFlag, Eeprom, IndexSensor, ModemPort,
    MonotonicClock, StatusLed,
};

use crate::error::{BuildError, Report, Result};
use crate::sensor::{DropSensor, DropSensorCfg};
use crate::stepper::{StepperCfg, StepperDrive};
use crate::store::{StateRecord, StateStore, StoreCfg};
use crate::uplink::{UplinkCfg, UplinkClient};

/// Orchestration phase. The discriminants are the persisted encoding;
/// unknown bytes make the stored record invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Boot = 0,
    ConnectUplink = 1,
    Recovery = 2,
    AwaitCalibration = 3,
    Calibrating = 4,
    AwaitDispense = 5,
    Dispensing = 6,
    Finished = 7,
}

impl Phase {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Boot,
            1 => Self::ConnectUplink,
            2 => Self::Recovery,
            3 => Self::AwaitCalibration,
            4 => Self::Calibrating,
            5 => Self::AwaitDispense,
            6 => Self::Dispensing,
            7 => Self::Finished,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
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

impl From<&dispenser_config::DispenseCfg> for DispenseCfg {
    fn from(c: &dispenser_config::DispenseCfg) -> Self {
        Self {
            pill_count: c.pill_count,
            interval_ms: c.interval_ms,
            boot_settle_ms: c.boot_settle_ms,
            debounce_ms: c.debounce_ms,
            blink_period_ms: c.blink_period_ms,
            fail_blinks: c.fail_blinks,
            finish_blinks: c.finish_blinks,
        }
    }
}

/// Clock-gated press detector. Fires exactly once per stable press and
/// re-arms when the level releases; nothing blocks between polls.
struct DebouncedInput {
    button: Box<dyn Button>,
    debounce_ms: u64,
    pressed_at: Option<u64>,
    fired: bool,
}

impl DebouncedInput {
    fn new(button: Box<dyn Button>, debounce_ms: u64) -> Self {
        Self {
            button,
            debounce_ms,
            pressed_at: None,
            fired: false,
        }
    }

    fn poll(&mut self, now_ms: u64) -> bool {
        let level = match self.button.is_pressed() {
            Ok(level) => level,
            Err(e) => {
                tracing::warn!(error = %e, "button read failed");
                false
            }
        };
        if !level {
            self.pressed_at = None;
            self.fired = false;
            return false;
        }
        let since = *self.pressed_at.get_or_insert(now_ms);
        if !self.fired && now_ms.saturating_sub(since) >= self.debounce_ms {
            self.fired = true;
            return true;
        }
        false
    }
}

/// Clock-gated LED blinker for the waiting states.
struct Blinker {
    period_ms: u64,
    last_toggle_ms: u64,
    on: bool,
    started: bool,
}

impl Blinker {
    fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_toggle_ms: 0,
            on: false,
            started: false,
        }
    }

    fn reset(&mut self) {
        self.started = false;
        self.on = false;
    }

    /// Returns the new LED level when it is time to toggle.
    fn tick(&mut self, now_ms: u64) -> Option<bool> {
        if !self.started {
            self.started = true;
            self.last_toggle_ms = now_ms;
            self.on = true;
            return Some(true);
        }
        if now_ms.saturating_sub(self.last_toggle_ms) >= self.period_ms {
            self.last_toggle_ms = now_ms;
            self.on = !self.on;
            return Some(self.on);
        }
        None
    }
}

pub struct Dispenser {
    stepper: StepperDrive<Box<dyn CoilDriver>, Box<dyn IndexSensor>>,
    store: StateStore<Box<dyn Eeprom>>,
    uplink: UplinkClient<Box<dyn ModemPort>>,
    sensor: DropSensor,
    calibrate_btn: DebouncedInput,
    dispense_btn: DebouncedInput,
    led: Box<dyn StatusLed>,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: DispenseCfg,
    epoch: Instant,

    phase: Phase,
    pills_left: u8,
    slots_completed: u8,
    total_dispensed: u32,
    failed_dispenses: u32,
    next_deadline_ms: u64,
    uplink_connected: bool,
    in_motion: bool,
    progress_in_slot: u16,
    /// Persist-on-transition starts only after the restore attempt; writing
    /// earlier would clobber the record a power-loss boot needs to read.
    record_live: bool,
    wait_status_sent: bool,
    blinker: Blinker,
}

impl core::fmt::Debug for Dispenser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispenser")
            .field("phase", &self.phase)
            .field("pills_left", &self.pills_left)
            .field("slots_completed", &self.slots_completed)
            .field("total_dispensed", &self.total_dispensed)
            .field("failed_dispenses", &self.failed_dispenses)
            .field("next_deadline_ms", &self.next_deadline_ms)
            .field("uplink_connected", &self.uplink_connected)
            .field("in_motion", &self.in_motion)
            .field("progress_in_slot", &self.progress_in_slot)
            .field("record_live", &self.record_live)
            .field("wait_status_sent", &self.wait_status_sent)
            .finish_non_exhaustive()
    }
}

impl Dispenser {
    pub fn builder() -> DispenserBuilder {
        DispenserBuilder::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pills_left(&self) -> u8 {
        self.pills_left
    }

    pub fn slots_completed(&self) -> u8 {
        self.slots_completed
    }

    pub fn total_dispensed(&self) -> u32 {
        self.total_dispensed
    }

    pub fn failed_dispenses(&self) -> u32 {
        self.failed_dispenses
    }

    pub fn uplink_connected(&self) -> bool {
        self.uplink_connected
    }

    /// Console access to the log region between steps.
    pub fn store_mut(&mut self) -> &mut StateStore<Box<dyn Eeprom>> {
        &mut self.store
    }

    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    fn arm_deadline(&mut self) {
        self.next_deadline_ms = self.now_ms().saturating_add(self.cfg.interval_ms);
    }

    fn set_led(&mut self, on: bool) {
        if let Err(e) = self.led.set(on) {
            tracing::warn!(error = %e, "status LED write failed");
        }
    }

    /// Blocking blink pattern (outcome indication, not a waiting state).
    fn blink_times(&mut self, count: u32) {
        for _ in 0..count {
            self.set_led(true);
            self.clock.sleep_ms(self.cfg.blink_period_ms);
            self.set_led(false);
            self.clock.sleep_ms(self.cfg.blink_period_ms);
        }
    }

    fn current_record(&self) -> StateRecord {
        StateRecord {
            phase: self.phase,
            pills_left: self.pills_left,
            progress_in_slot: self.progress_in_slot,
            in_motion: self.in_motion,
            calibrated: self.stepper.calibrated(),
            slots_completed: self.slots_completed,
        }
    }

    /// Persist the live record; a bus failure degrades, never crashes.
    fn persist(&mut self) {
        let record = self.current_record();
        if let Err(e) = self.store.save_record(&record) {
            tracing::warn!(error = %e, "state persist skipped");
        }
    }

    fn goto(&mut self, next: Phase) {
        if next != self.phase {
            tracing::info!(from = ?self.phase, to = ?next, "phase transition");
        }
        self.phase = next;
        self.wait_status_sent = false;
        self.blinker.reset();
        if self.record_live {
            self.persist();
        }
    }

    /// Append to the EEPROM log and mirror over the uplink. Once dispensing
    /// has started, lines carry a `Day N` prefix.
    fn log_event(&mut self, event: &str) {
        let day_started = matches!(
            self.phase,
            Phase::Dispensing | Phase::Recovery | Phase::Finished
        );
        let line = if day_started && self.slots_completed > 0 {
            let day = self.slots_completed.min(self.cfg.pill_count);
            format!("Day {day} {event}")
        } else {
            event.to_string()
        };
        if let Err(e) = self.store.append_log(&line) {
            tracing::warn!(error = %e, "event log write skipped");
        }
        self.mirror(&line);
    }

    /// Best-effort uplink send; failures are logged and otherwise ignored.
    fn mirror(&mut self, line: &str) {
        if !self.uplink_connected {
            return;
        }
        match self.uplink.send_message(line) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(%line, "uplink send not acknowledged"),
            Err(e) => tracing::warn!(error = %e, "uplink send failed"),
        }
    }

    fn restore(&mut self) -> Option<StateRecord> {
        match self.store.load_record() {
            Ok(Some(rec)) => {
                self.pills_left = rec.pills_left.min(self.cfg.pill_count);
                self.slots_completed = rec.slots_completed.min(self.cfg.pill_count);
                self.in_motion = rec.in_motion;
                self.progress_in_slot = rec.progress_in_slot;
                if rec.calibrated {
                    self.stepper.restore_calibrated();
                }
                tracing::info!(
                    phase = ?rec.phase,
                    pills_left = rec.pills_left,
                    slots_completed = rec.slots_completed,
                    in_motion = rec.in_motion,
                    calibrated = rec.calibrated,
                    "state restored"
                );
                Some(rec)
            }
            Ok(None) => {
                tracing::info!("no valid stored state");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "state load failed, treating as absent");
                None
            }
        }
    }

    /// Run one FSM cycle; call repeatedly from the control loop.
    pub fn step(&mut self) -> Result<Phase> {
        match self.phase {
            Phase::Boot => self.on_boot(),
            Phase::ConnectUplink => self.on_connect_uplink(),
            Phase::AwaitCalibration => self.on_await_calibration(),
            Phase::Calibrating => self.on_calibrating(),
            Phase::AwaitDispense => self.on_await_dispense(),
            Phase::Dispensing => self.on_dispensing()?,
            Phase::Recovery => self.on_recovery(),
            Phase::Finished => self.on_finished(),
        }
        Ok(self.phase)
    }

    fn on_boot(&mut self) {
        tracing::info!("booting");
        self.clock.sleep_ms(self.cfg.boot_settle_ms);
        self.goto(Phase::ConnectUplink);
    }

    fn on_connect_uplink(&mut self) {
        tracing::info!("connecting uplink");
        let connected = self.uplink.join_with_retry();
        self.uplink_connected = connected;
        if connected {
            self.mirror("Pill dispenser connected");
        }

        let restored = self.restore();
        self.record_live = true;
        self.log_event(if connected {
            "BOOT DONE LORA OK"
        } else {
            "BOOT DONE LORA FAIL"
        });

        match restored {
            None => {
                self.log_event("FRESH BOOT");
                self.goto(Phase::AwaitCalibration);
            }
            Some(rec) => {
                if rec.in_motion {
                    self.log_event("POWER LOSS DURING MOVEMENT");
                    self.goto(Phase::Recovery);
                } else if !rec.calibrated {
                    self.log_event("MOTOR NOT CALIBRATED");
                    self.goto(Phase::AwaitCalibration);
                } else if rec.phase == Phase::Dispensing && rec.pills_left > 0 {
                    self.log_event("RESUME DISPENSING");
                    self.arm_deadline();
                    self.goto(Phase::Dispensing);
                } else {
                    self.goto(Phase::AwaitDispense);
                }
            }
        }
    }

    fn mirror_wait_status(&mut self, status: &str) {
        if !self.wait_status_sent {
            self.wait_status_sent = true;
            self.mirror(status);
        }
    }

    fn on_await_calibration(&mut self) {
        self.mirror_wait_status("WAIT FOR CALIBRATION!");
        let now = self.now_ms();
        if let Some(on) = self.blinker.tick(now) {
            self.set_led(on);
        }
        if self.calibrate_btn.poll(now) {
            tracing::info!("calibrate button pressed");
            self.set_led(false);
            self.goto(Phase::Calibrating);
        }
    }

    fn on_calibrating(&mut self) {
        let result = self
            .stepper
            .calibrate()
            .and_then(|spr| self.stepper.apply_slot_offset().map(|()| spr));
        match result {
            Ok(_) => {
                self.log_event("CALIBRATION DONE");
                self.goto(Phase::AwaitDispense);
            }
            Err(e) => {
                tracing::warn!(error = %e, "calibration failed");
                self.stepper.invalidate_calibration();
                self.log_event("CALIBRATED FAIL");
                self.goto(Phase::AwaitCalibration);
            }
        }
    }

    fn on_await_dispense(&mut self) {
        self.mirror_wait_status("WAIT FOR DISPENSING!");
        self.set_led(true);
        let now = self.now_ms();
        if self.dispense_btn.poll(now) {
            tracing::info!("dispense button pressed");
            self.set_led(false);
            self.arm_deadline();
            self.goto(Phase::Dispensing);
        }
    }

    fn on_dispensing(&mut self) -> Result<()> {
        if self.pills_left == 0 {
            self.log_event("DISPENSING FINISH");
            self.goto(Phase::Finished);
            return Ok(());
        }
        if self.now_ms() >= self.next_deadline_ms {
            self.process_slot()?;
            // Schedule from the previous deadline, not from "now", so slot
            // timing does not drift by the processing time.
            self.next_deadline_ms = self.next_deadline_ms.saturating_add(self.cfg.interval_ms);
        }
        Ok(())
    }

    /// One slot: advance, sample the detection window, account, persist.
    /// A missed detection consumes the slot all the same.
    fn process_slot(&mut self) -> Result<()> {
        let attempt = self.slots_completed + 1;
        tracing::info!(
            slot = attempt,
            pills_left = self.pills_left,
            "attempting slot"
        );

        self.in_motion = true;
        self.progress_in_slot = 0;
        self.persist();

        {
            // Checkpoint closure writes through the store while the stepper
            // is borrowed; capture the record fields by value.
            let store = &mut self.store;
            let phase = self.phase;
            let pills_left = self.pills_left;
            let slots_completed = self.slots_completed;
            self.stepper
                .advance_slot(|progress| {
                    let record = StateRecord {
                        phase,
                        pills_left,
                        progress_in_slot: progress,
                        in_motion: true,
                        calibrated: true,
                        slots_completed,
                    };
                    if let Err(e) = store.save_record(&record) {
                        tracing::warn!(error = %e, "progress checkpoint skipped");
                    }
                })
                .map_err(Report::new)?;
        }
        self.in_motion = false;
        self.progress_in_slot = 0;

        let hit = self.sensor.sample_window();
        self.pills_left -= 1;
        self.slots_completed = attempt;
        if hit {
            self.total_dispensed += 1;
            tracing::info!(
                slots_completed = self.slots_completed,
                total = self.total_dispensed,
                left = self.pills_left,
                "pill detected"
            );
            self.log_event("DISPENSE OK");
        } else {
            self.failed_dispenses += 1;
            tracing::warn!(
                slots_completed = self.slots_completed,
                failed = self.failed_dispenses,
                left = self.pills_left,
                "no pill detected in window"
            );
            self.log_event("DISPENSE FAIL NO PILLS");
            self.blink_times(self.cfg.fail_blinks);
        }
        self.persist();
        Ok(())
    }

    fn on_recovery(&mut self) {
        if !self.stepper.calibrated() {
            tracing::warn!("recovery without calibration, recalibration required");
            self.in_motion = false;
            self.progress_in_slot = 0;
            self.goto(Phase::AwaitCalibration);
            return;
        }
        tracing::info!(
            slots_completed = self.slots_completed,
            retry_slot = self.slots_completed + 1,
            "recovery start"
        );
        match self.stepper.recover(self.slots_completed) {
            Ok(()) => {
                self.in_motion = false;
                self.progress_in_slot = 0;
                self.persist();
                self.log_event("RECOVERY DONE");
                if self.pills_left > 0 {
                    self.arm_deadline();
                    self.goto(Phase::Dispensing);
                } else {
                    self.goto(Phase::Finished);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "recovery failed, recalibration required");
                self.in_motion = false;
                self.progress_in_slot = 0;
                self.stepper.invalidate_calibration();
                self.log_event("RECOVERY FAIL");
                self.goto(Phase::AwaitCalibration);
            }
        }
    }

    fn on_finished(&mut self) {
        self.blink_times(self.cfg.finish_blinks);
        self.log_event("CYCLE COMPLETE");

        // Reset for the next cycle: full load, fresh counters, calibration
        // required again.
        self.stepper.invalidate_calibration();
        self.slots_completed = 0;
        self.pills_left = self.cfg.pill_count;
        self.total_dispensed = 0;
        self.failed_dispenses = 0;
        self.goto(Phase::AwaitCalibration);
    }
}

/// Collects peripherals and configuration; `try_build` validates the lot.
#[derive(Default)]
pub struct DispenserBuilder {
    coils: Option<Box<dyn CoilDriver>>,
    index: Option<Box<dyn IndexSensor>>,
    eeprom: Option<Box<dyn Eeprom>>,
    modem: Option<Box<dyn ModemPort>>,
    calibrate_btn: Option<Box<dyn Button>>,
    dispense_btn: Option<Box<dyn Button>>,
    led: Option<Box<dyn StatusLed>>,
    index_edge: Option<EdgeFlag>,
    pill_hit: Option<EdgeFlag>,
    pill_edges: Option<EdgeCounter>,
    stepper_cfg: Option<StepperCfg>,
    sensor_cfg: Option<DropSensorCfg>,
    uplink_cfg: Option<UplinkCfg>,
    store_cfg: Option<StoreCfg>,
    dispense_cfg: Option<DispenseCfg>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
}

impl DispenserBuilder {
    pub fn with_coils(mut self, coils: impl CoilDriver + 'static) -> Self {
        self.coils = Some(Box::new(coils));
        self
    }

    pub fn with_index_sensor(mut self, index: impl IndexSensor + 'static) -> Self {
        self.index = Some(Box::new(index));
        self
    }

    pub fn with_eeprom(mut self, eeprom: impl Eeprom + 'static) -> Self {
        self.eeprom = Some(Box::new(eeprom));
        self
    }

    pub fn with_modem(mut self, modem: impl ModemPort + 'static) -> Self {
        self.modem = Some(Box::new(modem));
        self
    }

    pub fn with_calibrate_button(mut self, button: impl Button + 'static) -> Self {
        self.calibrate_btn = Some(Box::new(button));
        self
    }

    pub fn with_dispense_button(mut self, button: impl Button + 'static) -> Self {
        self.dispense_btn = Some(Box::new(button));
        self
    }

    pub fn with_led(mut self, led: impl StatusLed + 'static) -> Self {
        self.led = Some(Box::new(led));
        self
    }

    /// Flag raised by the index-sensor falling-edge interrupt.
    pub fn with_index_edge(mut self, edge: EdgeFlag) -> Self {
        self.index_edge = Some(edge);
        self
    }

    /// Flag and counter raised by the piezo drop-sensor interrupt.
    pub fn with_pill_flags(mut self, hit: EdgeFlag, edges: EdgeCounter) -> Self {
        self.pill_hit = Some(hit);
        self.pill_edges = Some(edges);
        self
    }

    pub fn with_stepper_cfg(mut self, cfg: StepperCfg) -> Self {
        self.stepper_cfg = Some(cfg);
        self
    }

    pub fn with_sensor_cfg(mut self, cfg: DropSensorCfg) -> Self {
        self.sensor_cfg = Some(cfg);
        self
    }

    pub fn with_uplink_cfg(mut self, cfg: UplinkCfg) -> Self {
        self.uplink_cfg = Some(cfg);
        self
    }

    pub fn with_store_cfg(mut self, cfg: StoreCfg) -> Self {
        self.store_cfg = Some(cfg);
        self
    }

    pub fn with_dispense_cfg(mut self, cfg: DispenseCfg) -> Self {
        self.dispense_cfg = Some(cfg);
        self
    }

    /// Custom clock; defaults to the real monotonic clock.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn try_build(self) -> Result<Dispenser> {
        let coils = self.coils.ok_or_else(|| Report::new(BuildError::MissingCoils))?;
        let index = self
            .index
            .ok_or_else(|| Report::new(BuildError::MissingIndexSensor))?;
        let eeprom = self
            .eeprom
            .ok_or_else(|| Report::new(BuildError::MissingEeprom))?;
        let modem = self.modem.ok_or_else(|| Report::new(BuildError::MissingModem))?;
        let calibrate_btn = self
            .calibrate_btn
            .ok_or_else(|| Report::new(BuildError::MissingCalibrateButton))?;
        let dispense_btn = self
            .dispense_btn
            .ok_or_else(|| Report::new(BuildError::MissingDispenseButton))?;
        let led = self.led.ok_or_else(|| Report::new(BuildError::MissingLed))?;

        let stepper_cfg = self.stepper_cfg.unwrap_or_default();
        let sensor_cfg = self.sensor_cfg.unwrap_or_default();
        let uplink_cfg = self.uplink_cfg.unwrap_or_default();
        let store_cfg = self.store_cfg.unwrap_or_default();
        let cfg = self.dispense_cfg.unwrap_or_default();

        if cfg.pill_count == 0 {
            return Err(Report::new(BuildError::InvalidConfig(
                "pill_count must be >= 1",
            )));
        }
        if cfg.interval_ms == 0 {
            return Err(Report::new(BuildError::InvalidConfig(
                "interval_ms must be >= 1",
            )));
        }
        if stepper_cfg.slot_half_steps == 0 {
            return Err(Report::new(BuildError::InvalidConfig(
                "slot_half_steps must be > 0",
            )));
        }
        if stepper_cfg.guard_steps <= stepper_cfg.slot_half_steps {
            return Err(Report::new(BuildError::InvalidConfig(
                "guard_steps must exceed slot_half_steps",
            )));
        }
        if stepper_cfg.calib_revs == 0 || stepper_cfg.min_steps_valid == 0 {
            return Err(Report::new(BuildError::InvalidConfig(
                "calibration parameters must be >= 1",
            )));
        }
        if stepper_cfg.progress_save_interval == 0 {
            return Err(Report::new(BuildError::InvalidConfig(
                "progress_save_interval must be >= 1",
            )));
        }
        if uplink_cfg.max_join_attempts == 0 {
            return Err(Report::new(BuildError::InvalidConfig(
                "max_join_attempts must be >= 1",
            )));
        }

        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(b) => Arc::from(b),
            None => Arc::new(MonotonicClock::new()),
        };
        let index_edge = self.index_edge.unwrap_or_default();
        let pill_hit = self.pill_hit.unwrap_or_default();
        let pill_edges = self.pill_edges.unwrap_or_default();

        let epoch = clock.now();
        let debounce_ms = cfg.debounce_ms;
        let blink_period_ms = cfg.blink_period_ms;
        let pill_count = cfg.pill_count;

        Ok(Dispenser {
            stepper: StepperDrive::new(coils, index, index_edge, stepper_cfg, clock.clone()),
            store: StateStore::new(eeprom, store_cfg, clock.clone()),
            uplink: UplinkClient::new(modem, uplink_cfg, clock.clone()),
            sensor: DropSensor::new(sensor_cfg, pill_hit, pill_edges, clock.clone()),
            calibrate_btn: DebouncedInput::new(calibrate_btn, debounce_ms),
            dispense_btn: DebouncedInput::new(dispense_btn, debounce_ms),
            led,
            clock,
            cfg,
            epoch,
            phase: Phase::Boot,
            pills_left: pill_count,
            slots_completed: 0,
            total_dispensed: 0,
            failed_dispenses: 0,
            next_deadline_ms: 0,
            uplink_connected: false,
            in_motion: false,
            progress_in_slot: 0,
            record_live: false,
            wait_status_sent: false,
            blinker: Blinker::new(blink_period_ms),
        })
    }
}
