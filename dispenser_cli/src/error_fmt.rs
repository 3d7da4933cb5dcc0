//! Human-readable error descriptions for the CLI surface.

use dispenser_core::{BuildError, StepperError, StoreError, UplinkError};

/// Map an eyre::Report to an explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
            missing => format!(
                "What happened: {missing}.\nLikely causes: A peripheral failed to initialize or was not wired into the builder.\nHow to fix: Check the bench wiring in the run command."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<StepperError>() {
        return match se {
            StepperError::GuardExceeded { guard, context } => format!(
                "What happened: The motor ran {guard} half-steps while {context} without seeing the opto fork.\nLikely causes: Blocked carousel, disconnected sensor, or a disc without an index gap.\nHow to fix: Check the opto fork wiring and the disc, then recalibrate."
            ),
            other => format!(
                "What happened: {other}.\nHow to fix: Re-run with --log-level=debug for the motion trace."
            ),
        };
    }

    if let Some(ue) = err.downcast_ref::<UplinkError>() {
        return format!(
            "What happened: {ue}.\nLikely causes: Modem unpowered or wrong serial wiring.\nHow to fix: The device runs fine offline; fix the modem link and restart to rejoin."
        );
    }

    if let Some(st) = err.downcast_ref::<StoreError>() {
        return format!(
            "What happened: {st}.\nLikely causes: EEPROM unpowered or address pins wrong.\nHow to fix: Check the two-wire bus; the dispenser degrades to unlogged operation until it answers."
        );
    }

    format!("{err:#}")
}
