//! Pill-fall detection window.
//!
//! The window length is physics-derived: free-fall time over the configured
//! drop height, widened by a safety margin, plus a fixed allowance for the
//! motor to stop, clamped to a floor. During the window the piezo edge flag
//! is armed and whatever lands on it counts as a single detection.

use std::sync::Arc;

use dispenser_traits::{Clock, EdgeCounter, EdgeFlag};

#[derive(Debug, Clone)]
pub struct DropSensorCfg {
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

impl Default for DropSensorCfg {
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

impl From<&dispenser_config::SensorCfg> for DropSensorCfg {
    fn from(c: &dispenser_config::SensorCfg) -> Self {
        Self {
            fall_distance_m: c.fall_distance_m,
            gravity: c.gravity,
            margin: c.margin,
            motor_stop_extra_ms: c.motor_stop_extra_ms,
            min_window_ms: c.min_window_ms,
        }
    }
}

/// window = max(floor, round(1000 * (sqrt(2h/g) * (1 + margin) + extra/1000)))
pub fn detection_window_ms(cfg: &DropSensorCfg) -> u32 {
    let t_fall = (2.0 * cfg.fall_distance_m / cfg.gravity).sqrt();
    let t_margin = t_fall * (1.0 + cfg.margin);
    let total_s = t_margin + (cfg.motor_stop_extra_ms as f32) / 1000.0;
    let window_ms = (total_s * 1000.0 + 0.5) as u32;
    window_ms.max(cfg.min_window_ms)
}

pub struct DropSensor {
    cfg: DropSensorCfg,
    window_ms: u32,
    /// Raised by the piezo falling-edge interrupt, consumed here.
    hit: EdgeFlag,
    edges: EdgeCounter,
    clock: Arc<dyn Clock + Send + Sync>,
    last_hit: bool,
}

impl DropSensor {
    pub fn new(
        cfg: DropSensorCfg,
        hit: EdgeFlag,
        edges: EdgeCounter,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let window_ms = detection_window_ms(&cfg);
        tracing::debug!(window_ms, "detection window computed");
        Self {
            cfg,
            window_ms,
            hit,
            edges,
            clock,
            last_hit: false,
        }
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms
    }

    /// Recompute the window after a config change.
    pub fn refresh_window(&mut self) {
        self.window_ms = detection_window_ms(&self.cfg);
    }

    /// Arm the flag, wait out the window, and snapshot the result. Multiple
    /// edges within one window still count as a single positive detection.
    pub fn sample_window(&mut self) -> bool {
        self.hit.clear();
        self.edges.reset();
        self.last_hit = false;
        self.clock.sleep_ms(u64::from(self.window_ms));
        self.last_hit = self.hit.take();
        tracing::debug!(
            window_ms = self.window_ms,
            edges = self.edges.get(),
            hit = self.last_hit,
            "detection window sampled"
        );
        self.last_hit
    }

    /// Result snapshot from the most recent window.
    pub fn last_hit(&self) -> bool {
        self.last_hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispenser_traits::ManualClock;

    #[test]
    fn reference_geometry_gives_207ms() {
        // h = 35 mm, g = 9.8, margin 50%, +80 ms stop allowance
        assert_eq!(detection_window_ms(&DropSensorCfg::default()), 207);
    }

    #[test]
    fn short_drops_clamp_to_floor() {
        let cfg = DropSensorCfg {
            fall_distance_m: 0.001,
            motor_stop_extra_ms: 0,
            ..DropSensorCfg::default()
        };
        assert_eq!(detection_window_ms(&cfg), 150);
    }

    #[test]
    fn stale_hit_is_cleared_before_the_window() {
        let hit = EdgeFlag::new();
        let clock = Arc::new(ManualClock::new());
        let mut sensor = DropSensor::new(
            DropSensorCfg::default(),
            hit.clone(),
            EdgeCounter::new(),
            clock,
        );
        // An edge from before the window (e.g. vibration during motion)
        // must not count.
        hit.raise();
        assert!(!sensor.sample_window());
        assert!(!sensor.last_hit());
    }
}
