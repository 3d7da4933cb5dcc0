//! The `run` command: wire a bench, build the dispenser, drive the
//! cooperative control loop, and service the console between steps.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;

use dispenser_core::{
    DispenseCfg, Dispenser, DropSensorCfg, Phase, StepperCfg, StoreCfg, UplinkCfg,
    detection_window_ms,
};
use dispenser_hardware::{CarouselGeometry, SimBench};

use crate::console::{Console, handle};

pub struct RunOpts {
    pub pills: Option<u8>,
    pub interval_ms: Option<u64>,
    pub once: bool,
    pub auto: bool,
    pub sim_steps_per_rev: u32,
    pub sim_gap_span: u32,
    pub sim_drop_delay_ms: u64,
    pub max_steps: u64,
}

pub fn run(mut cfg: dispenser_config::Config, opts: &RunOpts) -> eyre::Result<()> {
    if let Some(pills) = opts.pills {
        cfg.dispense.pill_count = pills;
    }
    if let Some(interval) = opts.interval_ms {
        cfg.dispense.interval_ms = interval;
    }
    cfg.validate().wrap_err("config validation")?;

    let geometry = CarouselGeometry {
        steps_per_rev: opts.sim_steps_per_rev,
        gap_span: opts.sim_gap_span,
        start_position: 600 % opts.sim_steps_per_rev.max(1),
        slot_half_steps: cfg.stepper.slot_half_steps,
    };
    let bench = SimBench::with_auto_drop(geometry, opts.sim_drop_delay_ms);
    let calibrate_button = bench.calibrate_button.clone();
    let dispense_button = bench.dispense_button.clone();

    let sensor_cfg = DropSensorCfg::from(&cfg.sensor);
    tracing::info!(
        window_ms = detection_window_ms(&sensor_cfg),
        pills = cfg.dispense.pill_count,
        interval_ms = cfg.dispense.interval_ms,
        "starting dispenser on the simulated bench"
    );

    let mut dispenser = Dispenser::builder()
        .with_coils(bench.coils)
        .with_index_sensor(bench.index)
        .with_eeprom(bench.eeprom)
        .with_modem(bench.modem)
        .with_calibrate_button(bench.calibrate_button)
        .with_dispense_button(bench.dispense_button)
        .with_led(bench.led)
        .with_index_edge(bench.index_edge)
        .with_pill_flags(bench.pill_hit, bench.pill_edges)
        .with_stepper_cfg(StepperCfg::from(&cfg.stepper))
        .with_sensor_cfg(sensor_cfg)
        .with_uplink_cfg(UplinkCfg::from(&cfg.uplink))
        .with_store_cfg(StoreCfg::from(&cfg.storage))
        .with_dispense_cfg(DispenseCfg::from(&cfg.dispense))
        .try_build()?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .wrap_err("install ctrl-c handler")?;
    }

    let console = Console::spawn();
    let mut steps: u64 = 0;
    let mut cycle_summary: Option<(u32, u32)> = None;

    loop {
        if stop.load(Ordering::Relaxed) {
            tracing::info!("interrupted, stopping");
            break;
        }
        while let Some(cmd) = console.poll() {
            handle(&cmd, dispenser.store_mut());
        }

        let phase = dispenser.step()?;
        steps += 1;

        if phase == Phase::Finished {
            // Counters reset when the Finished handler runs; keep them for
            // the end-of-run summary.
            cycle_summary = Some((dispenser.total_dispensed(), dispenser.failed_dispenses()));
        }
        if opts.once && cycle_summary.is_some() && phase == Phase::AwaitCalibration {
            break;
        }
        if opts.max_steps > 0 && steps >= opts.max_steps {
            eyre::bail!("step budget of {} exhausted before completion", opts.max_steps);
        }

        if opts.auto {
            // Hold the relevant button while the FSM waits on it; the
            // clock-gated debounce fires on a later loop pass.
            match phase {
                Phase::AwaitCalibration => calibrate_button.press(),
                Phase::AwaitDispense => {
                    calibrate_button.release();
                    dispense_button.press();
                }
                _ => {
                    calibrate_button.release();
                    dispense_button.release();
                }
            }
        }

        // Idle pacing for the cooperative loop; waiting states poll, they
        // do not sleep internally.
        std::thread::sleep(Duration::from_millis(2));
    }

    if let Some((dispensed, failed)) = cycle_summary {
        println!("cycle complete: dispensed={dispensed} failed={failed}");
    }
    Ok(())
}
