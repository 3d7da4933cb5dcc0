use std::sync::Arc;

use dispenser_core::mocks::{DeadModem, RaisingClock};
use dispenser_core::{
    DispenseCfg, Dispenser, Phase, StateRecord, StateStore, StepperCfg, StoreCfg,
};
use dispenser_hardware::{CarouselGeometry, SimBench, SimButton, SimEeprom, SimLed, SimModem};
use dispenser_traits::{Clock, ManualClock};

fn geometry() -> CarouselGeometry {
    CarouselGeometry {
        steps_per_rev: 600,
        gap_span: 40,
        start_position: 100,
        slot_half_steps: 144,
    }
}

fn dispense_cfg() -> DispenseCfg {
    DispenseCfg {
        pill_count: 3,
        interval_ms: 100,
        boot_settle_ms: 10,
        debounce_ms: 20,
        blink_period_ms: 5,
        fail_blinks: 2,
        finish_blinks: 2,
    }
}

struct Rig {
    dispenser: Dispenser,
    clock: ManualClock,
    eeprom: SimEeprom,
    modem: SimModem,
    calibrate: SimButton,
    dispense: SimButton,
    _led: SimLed,
    carousel: dispenser_hardware::CarouselHandle,
}

impl Rig {
    /// `pill_hits`: detection windows report a pill (the clock deposits an
    /// edge while any wait elapses). `seed`: record present before boot.
    fn new(pill_hits: bool, seed: Option<StateRecord>) -> Self {
        let bench = SimBench::new(geometry());
        let clock = ManualClock::new();

        if let Some(record) = seed {
            let mut store = StateStore::new(
                bench.eeprom.clone(),
                StoreCfg::default(),
                Arc::new(clock.clone()),
            );
            store.save_record(&record).expect("seed record");
        }

        let fsm_clock: Box<dyn Clock + Send + Sync> = if pill_hits {
            Box::new(RaisingClock::new(clock.clone(), bench.pill_hit.clone()))
        } else {
            Box::new(clock.clone())
        };

        let eeprom = bench.eeprom.clone();
        let modem = bench.modem.clone();
        let calibrate = bench.calibrate_button.clone();
        let dispense = bench.dispense_button.clone();
        let led = bench.led.clone();
        let carousel = bench.carousel.clone();

        let dispenser = Dispenser::builder()
            .with_coils(bench.coils)
            .with_index_sensor(bench.index)
            .with_eeprom(bench.eeprom)
            .with_modem(bench.modem)
            .with_calibrate_button(bench.calibrate_button)
            .with_dispense_button(bench.dispense_button)
            .with_led(bench.led)
            .with_index_edge(bench.index_edge)
            .with_pill_flags(bench.pill_hit, bench.pill_edges)
            .with_stepper_cfg(StepperCfg::default())
            .with_dispense_cfg(dispense_cfg())
            .with_clock(fsm_clock)
            .try_build()
            .expect("build dispenser");

        Self {
            dispenser,
            clock,
            eeprom,
            modem,
            calibrate,
            dispense,
            _led: led,
            carousel,
        }
    }

    fn step(&mut self) -> Phase {
        self.dispenser.step().expect("step")
    }

    /// Press a button long enough for the clock-gated debounce to fire.
    fn press(&mut self, button: &SimButton) {
        button.press();
        self.step();
        self.clock.advance_ms(25);
        self.step();
        button.release();
    }

    fn log(&mut self) -> Vec<String> {
        self.dispenser.store_mut().read_log().expect("read log")
    }

    fn stored_record(&self) -> Option<StateRecord> {
        let mut store = StateStore::new(
            self.eeprom.clone(),
            StoreCfg::default(),
            Arc::new(self.clock.clone()),
        );
        store.load_record().expect("bus ok")
    }

    /// Boot + connect; returns the phase the boot routing chose.
    fn boot(&mut self) -> Phase {
        assert_eq!(self.step(), Phase::ConnectUplink);
        self.step()
    }
}

#[test]
fn fresh_boot_requires_calibration_not_recovery() {
    let mut rig = Rig::new(true, None);
    assert_eq!(rig.boot(), Phase::AwaitCalibration);
    assert!(rig.dispenser.uplink_connected());
    let log = rig.log();
    assert!(log.iter().any(|l| l == "BOOT DONE LORA OK"), "{log:?}");
    assert!(log.iter().any(|l| l == "FRESH BOOT"), "{log:?}");
}

#[test]
fn corrupt_record_boots_fresh() {
    let seed = StateRecord {
        phase: Phase::Dispensing,
        pills_left: 2,
        progress_in_slot: 0,
        in_motion: false,
        calibrated: true,
        slots_completed: 1,
    };
    let mut rig = Rig::new(true, Some(seed));
    // One flipped bit in a complemented field invalidates the whole record.
    rig.eeprom.corrupt(dispenser_core::STATE_ADDR + 2, 0x01);
    assert_eq!(rig.boot(), Phase::AwaitCalibration);
    assert!(rig.log().iter().any(|l| l == "FRESH BOOT"));
}

#[test]
fn persisted_in_motion_routes_through_recovery() {
    let seed = StateRecord {
        phase: Phase::Dispensing,
        pills_left: 2,
        progress_in_slot: 77,
        in_motion: true,
        calibrated: true,
        slots_completed: 2,
    };
    let mut rig = Rig::new(true, Some(seed));
    rig.carousel.set_position(500);

    assert_eq!(rig.boot(), Phase::Recovery);
    assert!(rig.log().iter().any(|l| l.contains("POWER LOSS DURING MOVEMENT")));

    // Recovery re-homes physically and resumes dispensing.
    assert_eq!(rig.step(), Phase::Dispensing);
    assert_eq!(rig.dispenser.slots_completed(), 2);
    assert!(rig.log().iter().any(|l| l.contains("RECOVERY DONE")));

    // The interrupted motion is resolved in storage too.
    let record = rig.stored_record().expect("record valid");
    assert!(!record.in_motion);
    assert_eq!(record.phase, Phase::Dispensing);
}

#[test]
fn restored_uncalibrated_record_requires_recalibration() {
    let seed = StateRecord {
        phase: Phase::AwaitCalibration,
        pills_left: 3,
        progress_in_slot: 0,
        in_motion: false,
        calibrated: false,
        slots_completed: 0,
    };
    let mut rig = Rig::new(true, Some(seed));
    assert_eq!(rig.boot(), Phase::AwaitCalibration);
    assert!(rig.log().iter().any(|l| l == "MOTOR NOT CALIBRATED"));
}

#[test]
fn restored_mid_cycle_record_resumes_dispensing() {
    let seed = StateRecord {
        phase: Phase::Dispensing,
        pills_left: 2,
        progress_in_slot: 0,
        in_motion: false,
        calibrated: true,
        slots_completed: 1,
    };
    let mut rig = Rig::new(true, Some(seed));
    assert_eq!(rig.boot(), Phase::Dispensing);
    assert_eq!(rig.dispenser.pills_left(), 2);
    assert!(rig.log().iter().any(|l| l.contains("RESUME DISPENSING")));
}

#[test]
fn restored_idle_record_waits_for_dispense() {
    let seed = StateRecord {
        phase: Phase::AwaitDispense,
        pills_left: 3,
        progress_in_slot: 0,
        in_motion: false,
        calibrated: true,
        slots_completed: 0,
    };
    let mut rig = Rig::new(true, Some(seed));
    assert_eq!(rig.boot(), Phase::AwaitDispense);
}

#[test]
fn join_exhaustion_leaves_device_offline_but_running() {
    let bench = SimBench::new(geometry());
    let clock = ManualClock::new();
    let dead = DeadModem::new();
    let log = dead.clone();

    let mut dispenser = Dispenser::builder()
        .with_coils(bench.coils)
        .with_index_sensor(bench.index)
        .with_eeprom(bench.eeprom)
        .with_modem(dead)
        .with_calibrate_button(bench.calibrate_button)
        .with_dispense_button(bench.dispense_button)
        .with_led(bench.led)
        .with_index_edge(bench.index_edge)
        .with_pill_flags(bench.pill_hit, bench.pill_edges)
        .with_dispense_cfg(dispense_cfg())
        .with_clock(Box::new(clock))
        .try_build()
        .expect("build dispenser");

    assert_eq!(dispenser.step().expect("step"), Phase::ConnectUplink);
    assert_eq!(dispenser.step().expect("step"), Phase::AwaitCalibration);
    assert!(!dispenser.uplink_connected());

    // Exactly the configured five attempts, never a sixth in this boot.
    let probes = log.sent().iter().filter(|l| *l == "AT").count();
    assert_eq!(probes, 5);
    let entries = dispenser.store_mut().read_log().expect("read log");
    assert!(entries.iter().any(|l| l == "BOOT DONE LORA FAIL"));
}

#[test]
fn full_cycle_with_every_window_hitting() {
    let mut rig = Rig::new(true, None);
    assert_eq!(rig.boot(), Phase::AwaitCalibration);

    let calibrate = rig.calibrate.clone();
    rig.press(&calibrate);
    assert_eq!(rig.dispenser.phase(), Phase::Calibrating);
    assert_eq!(rig.step(), Phase::AwaitDispense);
    assert!(rig.log().iter().any(|l| l == "CALIBRATION DONE"));

    let dispense = rig.dispense.clone();
    rig.press(&dispense);
    assert_eq!(rig.dispenser.phase(), Phase::Dispensing);

    for slot in 1..=3u8 {
        rig.clock.advance_ms(150);
        assert_eq!(rig.step(), Phase::Dispensing);
        assert_eq!(rig.dispenser.slots_completed(), slot);
        assert_eq!(rig.dispenser.pills_left(), 3 - slot);
        assert!(rig.dispenser.pills_left() <= 3);

        // Every slot outcome lands in storage before the handler returns.
        let record = rig.stored_record().expect("record valid");
        assert_eq!(record.slots_completed, slot);
        assert!(!record.in_motion);
    }

    assert_eq!(rig.dispenser.total_dispensed(), 3);
    assert_eq!(rig.dispenser.failed_dispenses(), 0);
    assert_eq!(rig.dispenser.pills_left(), 0);

    assert_eq!(rig.step(), Phase::Finished);
    assert_eq!(rig.step(), Phase::AwaitCalibration);
    assert!(rig.log().iter().any(|l| l.contains("CYCLE COMPLETE")));

    // Fresh cycle: full load, cleared counters, calibration invalidated.
    assert_eq!(rig.dispenser.pills_left(), 3);
    assert_eq!(rig.dispenser.slots_completed(), 0);
    assert_eq!(rig.dispenser.total_dispensed(), 0);
    let record = rig.stored_record().expect("record valid");
    assert!(!record.calibrated);
}

#[test]
fn missed_detection_consumes_the_slot_and_counts_the_failure() {
    // No pill ever reaches the piezo in this rig.
    let mut rig = Rig::new(false, None);
    assert_eq!(rig.boot(), Phase::AwaitCalibration);

    let calibrate = rig.calibrate.clone();
    rig.press(&calibrate);
    assert_eq!(rig.step(), Phase::AwaitDispense);
    let dispense = rig.dispense.clone();
    rig.press(&dispense);

    rig.clock.advance_ms(150);
    assert_eq!(rig.step(), Phase::Dispensing);

    assert_eq!(rig.dispenser.failed_dispenses(), 1);
    assert_eq!(rig.dispenser.total_dispensed(), 0);
    assert_eq!(rig.dispenser.slots_completed(), 1);
    assert_eq!(rig.dispenser.pills_left(), 2);
    assert!(rig.log().iter().any(|l| l.contains("DISPENSE FAIL NO PILLS")));
}

#[test]
fn waiting_states_mirror_status_once_per_entry() {
    let mut rig = Rig::new(true, None);
    assert_eq!(rig.boot(), Phase::AwaitCalibration);
    for _ in 0..5 {
        rig.clock.advance_ms(10);
        rig.step();
    }
    let waits = rig
        .modem
        .sent()
        .iter()
        .filter(|l| l.contains("WAIT FOR CALIBRATION!"))
        .count();
    assert_eq!(waits, 1, "waiting status must not be re-sent every poll");
}
