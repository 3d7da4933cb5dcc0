use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dispenser_core::{StepperCfg, StepperDrive, StepperError};
use dispenser_hardware::{CarouselGeometry, SimBench};
use dispenser_traits::{Clock, EdgeFlag, ManualClock};

const STEPS_PER_REV: u32 = 600;
const GAP_SPAN: u32 = 40;

fn geometry() -> CarouselGeometry {
    CarouselGeometry {
        steps_per_rev: STEPS_PER_REV,
        gap_span: GAP_SPAN,
        start_position: 100,
        slot_half_steps: 144,
    }
}

fn drive_on(
    bench: SimBench,
    cfg: StepperCfg,
    clock: Arc<dyn Clock + Send + Sync>,
) -> (
    StepperDrive<dispenser_hardware::SimCoils, dispenser_hardware::SimIndexSensor>,
    dispenser_hardware::CarouselHandle,
) {
    let carousel = bench.carousel.clone();
    let drive = StepperDrive::new(
        bench.coils,
        bench.index,
        bench.index_edge.clone(),
        cfg,
        clock,
    );
    (drive, carousel)
}

#[test]
fn calibration_measures_steps_per_revolution() {
    let (mut drive, carousel) = drive_on(
        SimBench::new(geometry()),
        StepperCfg::default(),
        Arc::new(ManualClock::new()),
    );
    let spr = drive.calibrate().expect("calibration succeeds");
    assert_eq!(spr, STEPS_PER_REV);
    assert!(drive.calibrated());
    assert_eq!(drive.steps_per_rev(), STEPS_PER_REV);
    // Calibration ends on the index edge.
    assert!(carousel.in_gap());
}

/// Clock wrapper that raises the index edge at one programmed sleep, the
/// way a bouncing opto fork interrupts mid-motion.
struct BouncyClock {
    inner: ManualClock,
    edge: EdgeFlag,
    bounce_at: u64,
    sleeps: AtomicU64,
}

impl Clock for BouncyClock {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn sleep(&self, d: Duration) {
        let n = self.sleeps.fetch_add(1, Ordering::Relaxed) + 1;
        if n == self.bounce_at {
            self.edge.raise();
        }
        self.inner.sleep(d);
    }
}

#[test]
fn sensor_bounce_is_not_counted_as_a_revolution() {
    let bench = SimBench::new(geometry());
    let clock = Arc::new(BouncyClock {
        inner: ManualClock::new(),
        edge: bench.index_edge.clone(),
        // 500 sync steps from position 100 to the gap, then 10 into the
        // first measured revolution: far below min_steps_valid.
        bounce_at: 510,
        sleeps: AtomicU64::new(0),
    });
    let (mut drive, _carousel) = drive_on(bench, StepperCfg::default(), clock);
    let spr = drive.calibrate().expect("calibration succeeds");
    // The bounce resets the interval counter, so the first real revolution
    // measures short by the 10 pre-bounce steps; it must never be counted
    // as a 10-step revolution.
    assert_eq!(spr, (590 + 600 + 600) / 3);
}

#[test]
fn calibration_aborts_when_stuck_in_the_gap() {
    // A disc that reads "gap" everywhere can never clear stage 1.
    let bench = SimBench::new(CarouselGeometry {
        gap_span: STEPS_PER_REV,
        ..geometry()
    });
    let cfg = StepperCfg {
        guard_steps: 500,
        ..StepperCfg::default()
    };
    let (mut drive, _) = drive_on(bench, cfg, Arc::new(ManualClock::new()));
    match drive.calibrate() {
        Err(StepperError::GuardExceeded { guard, .. }) => assert_eq!(guard, 500),
        other => panic!("expected GuardExceeded, got {other:?}"),
    }
    assert!(!drive.calibrated());
}

#[test]
fn zero_slot_offset_is_a_no_op() {
    let cfg = StepperCfg {
        slot_offset: 0,
        ..StepperCfg::default()
    };
    let (mut drive, carousel) = drive_on(
        SimBench::new(geometry()),
        cfg,
        Arc::new(ManualClock::new()),
    );
    let before = carousel.total_steps();
    drive.apply_slot_offset().expect("offset");
    assert_eq!(carousel.total_steps(), before);
}

#[test]
fn slot_offset_moves_by_the_signed_count() {
    let (mut drive, carousel) = drive_on(
        SimBench::new(geometry()),
        StepperCfg::default(),
        Arc::new(ManualClock::new()),
    );
    drive.calibrate().expect("calibrate");
    assert_eq!(carousel.position(), 0);
    drive.apply_slot_offset().expect("offset");
    assert_eq!(carousel.position(), 144);
}

#[test]
fn slot_motion_requires_calibration() {
    let (mut drive, _) = drive_on(
        SimBench::new(geometry()),
        StepperCfg::default(),
        Arc::new(ManualClock::new()),
    );
    assert!(matches!(
        drive.advance_slot(|_| {}),
        Err(StepperError::NotCalibrated)
    ));
    assert!(matches!(
        drive.recover(0),
        Err(StepperError::NotCalibrated)
    ));
}

#[test]
fn advance_slot_moves_one_slot_and_checkpoints_progress() {
    let (mut drive, carousel) = drive_on(
        SimBench::new(geometry()),
        StepperCfg::default(),
        Arc::new(ManualClock::new()),
    );
    drive.calibrate().expect("calibrate");
    drive.apply_slot_offset().expect("offset");
    let start = carousel.position();

    let mut checkpoints = Vec::new();
    drive
        .advance_slot(|progress| checkpoints.push(progress))
        .expect("advance");

    assert_eq!(carousel.position(), (start + 144) % STEPS_PER_REV);
    // Every progress_save_interval steps, excluding the final boundary.
    assert_eq!(checkpoints, vec![16, 32, 48, 64, 80, 96, 112, 128]);
}

#[test]
fn recovery_rehomes_and_seeks_to_the_completed_boundary() {
    let (mut drive, carousel) = drive_on(
        SimBench::new(geometry()),
        StepperCfg::default(),
        Arc::new(ManualClock::new()),
    );
    drive.calibrate().expect("calibrate");
    drive.apply_slot_offset().expect("offset");
    drive.advance_slot(|_| {}).expect("slot 1");
    drive.advance_slot(|_| {}).expect("slot 2");
    assert_eq!(carousel.position(), 144 + 288);

    // Pretend the position was scrambled by a reset mid-slot; recovery must
    // re-derive it from the index, not from anything volatile.
    carousel.set_position(500);
    drive.recover(2).expect("recover");

    // Backward homing stops on the first level change (the near gap edge at
    // GAP_SPAN - 1), the offset is un-applied backward, then two completed
    // slots run forward.
    let expected = (GAP_SPAN - 1 + STEPS_PER_REV - 144 + 288) % STEPS_PER_REV;
    assert_eq!(carousel.position(), expected);
}

#[test]
fn recovery_guard_failure_surfaces_for_recalibration() {
    // No gap anywhere: the backward search can never see a level change.
    let bench = SimBench::new(CarouselGeometry {
        gap_span: 0,
        ..geometry()
    });
    let cfg = StepperCfg {
        guard_steps: 300,
        ..StepperCfg::default()
    };
    let (mut drive, _) = drive_on(bench, cfg, Arc::new(ManualClock::new()));
    drive.restore_calibrated();
    match drive.recover(1) {
        Err(StepperError::GuardExceeded { context, .. }) => {
            assert!(context.contains("re-homing"));
        }
        other => panic!("expected GuardExceeded, got {other:?}"),
    }
}
