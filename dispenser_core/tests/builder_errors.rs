use dispenser_core::mocks::{DeadModem, MemEeprom};
use dispenser_core::{DispenseCfg, Dispenser, StepperCfg};
use dispenser_hardware::{CarouselGeometry, SimBench, SimButton, SimLed};
use rstest::rstest;

fn bench() -> SimBench {
    SimBench::new(CarouselGeometry::default())
}

#[test]
fn missing_coils_is_a_typed_error() {
    let err = Dispenser::builder()
        .with_eeprom(MemEeprom::new())
        .with_modem(DeadModem::new())
        .try_build()
        .expect_err("must fail");
    assert!(err.to_string().contains("missing coil driver"), "{err}");
}

#[test]
fn missing_modem_is_a_typed_error() {
    let b = bench();
    let err = Dispenser::builder()
        .with_coils(b.coils)
        .with_index_sensor(b.index)
        .with_eeprom(MemEeprom::new())
        .with_calibrate_button(SimButton::new())
        .with_dispense_button(SimButton::new())
        .with_led(SimLed::new())
        .try_build()
        .expect_err("must fail");
    assert!(err.to_string().contains("missing modem port"), "{err}");
}

#[rstest]
#[case(
    DispenseCfg { pill_count: 0, ..DispenseCfg::default() },
    StepperCfg::default(),
    "pill_count"
)]
#[case(
    DispenseCfg { interval_ms: 0, ..DispenseCfg::default() },
    StepperCfg::default(),
    "interval_ms"
)]
#[case(
    DispenseCfg::default(),
    StepperCfg { slot_half_steps: 0, ..StepperCfg::default() },
    "slot_half_steps"
)]
#[case(
    DispenseCfg::default(),
    StepperCfg { guard_steps: 100, slot_half_steps: 144, ..StepperCfg::default() },
    "guard_steps"
)]
#[case(
    DispenseCfg::default(),
    StepperCfg { progress_save_interval: 0, ..StepperCfg::default() },
    "progress_save_interval"
)]
fn invalid_config_is_rejected(
    #[case] dispense: DispenseCfg,
    #[case] stepper: StepperCfg,
    #[case] needle: &str,
) {
    let b = bench();
    let err = Dispenser::builder()
        .with_coils(b.coils)
        .with_index_sensor(b.index)
        .with_eeprom(b.eeprom)
        .with_modem(b.modem)
        .with_calibrate_button(b.calibrate_button)
        .with_dispense_button(b.dispense_button)
        .with_led(b.led)
        .with_dispense_cfg(dispense)
        .with_stepper_cfg(stepper)
        .try_build()
        .expect_err("must fail");
    assert!(err.to_string().contains(needle), "{err}");
}

#[test]
fn complete_builder_succeeds_with_default_configs() {
    let b = bench();
    Dispenser::builder()
        .with_coils(b.coils)
        .with_index_sensor(b.index)
        .with_eeprom(b.eeprom)
        .with_modem(b.modem)
        .with_calibrate_button(b.calibrate_button)
        .with_dispense_button(b.dispense_button)
        .with_led(b.led)
        .with_index_edge(b.index_edge)
        .with_pill_flags(b.pill_hit, b.pill_edges)
        .try_build()
        .expect("build");
}
