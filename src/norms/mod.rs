//! Per-row stress components, each in 0..=1, and their weighted blend.
//!
//! Missing inputs map to the neutral value of each component, so a row
//! without weather or delay data is never penalised for the gap.

pub mod freeflow;
pub mod score;

use crate::config::Weights;

/// Temperature assumed when a row has no weather, for the heat component.
const NEUTRAL_HEAT_C: f64 = 18.0;
/// Temperature assumed when a row has no weather, for the cold component.
const NEUTRAL_COLD_C: f64 = 15.0;

fn clip(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Delay in seconds → 0.30 at 5 min late, 0.70 at 15 min, 1.0 from 60 min.
/// Early running scores 0.
pub fn delay_norm(delay_sec: Option<i32>) -> f64 {
    let d = f64::from(delay_sec.unwrap_or(0)) / 60.0;
    let v = if d <= 5.0 {
        0.30 * d / 5.0
    } else if d <= 15.0 {
        0.30 + 0.40 * (d - 5.0) / 10.0
    } else {
        0.70 + 0.30 * (d - 15.0).min(45.0) / 45.0
    };
    clip(v)
}

/// Slowdown against free-flow. Vehicles below `moving_min_kph` (stopped at a
/// stop, in a depot) score 0, as do routes with no free-flow speed.
pub fn speed_norm(speed_kph: Option<f64>, free_kph: Option<f64>, moving_min_kph: f64) -> f64 {
    match (speed_kph, free_kph) {
        (Some(speed), Some(free)) if speed >= moving_min_kph => clip(1.0 - speed / free.max(1e-3)),
        _ => 0.0,
    }
}

/// 3 mm of rain in the last hour saturates.
pub fn rain_norm(rain_mm: Option<f64>) -> f64 {
    clip(rain_mm.unwrap_or(0.0) / 3.0)
}

pub fn heat_norm(temp_c: Option<f64>) -> f64 {
    let t = temp_c.unwrap_or(NEUTRAL_HEAT_C);
    let v = if t <= 18.0 {
        0.0
    } else if t <= 21.0 {
        0.30 * (t - 18.0) / 3.0
    } else if t <= 24.0 {
        0.30 + 0.40 * (t - 21.0) / 3.0
    } else if t <= 27.0 {
        0.70 + 0.30 * (t - 24.0) / 3.0
    } else {
        1.0
    };
    clip(v)
}

pub fn cold_norm(temp_c: Option<f64>) -> f64 {
    let t = temp_c.unwrap_or(NEUTRAL_COLD_C);
    let v = if t >= 10.0 {
        0.0
    } else if t >= 5.0 {
        0.30 * (10.0 - t) / 5.0
    } else if t >= 0.0 {
        0.30 + 0.40 * (5.0 - t) / 5.0
    } else {
        0.70 + 0.30 * (-t).min(5.0) / 5.0
    };
    clip(v)
}

/// The components of one row, before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Components {
    pub delay: f64,
    pub speed: f64,
    pub rain: f64,
    pub heat: f64,
    pub cold: f64,
    pub vanish: bool,
}

impl Components {
    /// Weighted sum, clipped to 0..=1. The vanish term applies only to anchors.
    pub fn stress(&self, w: &Weights) -> f64 {
        let vanish = if self.vanish { 1.0 } else { 0.0 };
        clip(
            w.delay * self.delay
                + w.speed * self.speed
                + w.rain * self.rain
                + w.heat * self.heat
                + w.cold * self.cold
                + w.vanish * vanish,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_delay_norm_breakpoints() {
        assert_eq!(delay_norm(None), 0.0);
        assert_eq!(delay_norm(Some(-120)), 0.0);
        assert!(close(delay_norm(Some(150)), 0.15));
        assert!(close(delay_norm(Some(300)), 0.30));
        assert!(close(delay_norm(Some(600)), 0.50));
        assert!(close(delay_norm(Some(900)), 0.70));
        assert!(close(delay_norm(Some(60 * 60)), 1.0));
        assert!(close(delay_norm(Some(3 * 3600)), 1.0));
    }

    #[test]
    fn test_speed_norm() {
        assert_eq!(speed_norm(None, Some(40.0), 5.0), 0.0);
        assert_eq!(speed_norm(Some(3.0), Some(40.0), 5.0), 0.0);
        assert_eq!(speed_norm(Some(20.0), None, 5.0), 0.0);
        assert!(close(speed_norm(Some(10.0), Some(40.0), 5.0), 0.75));
        assert_eq!(speed_norm(Some(50.0), Some(40.0), 5.0), 0.0);
        assert_eq!(speed_norm(Some(10.0), Some(0.0), 5.0), 0.0);
    }

    #[test]
    fn test_rain_norm() {
        assert_eq!(rain_norm(None), 0.0);
        assert!(close(rain_norm(Some(1.5)), 0.5));
        assert_eq!(rain_norm(Some(10.0)), 1.0);
    }

    #[test]
    fn test_heat_norm_breakpoints() {
        assert_eq!(heat_norm(None), 0.0);
        assert_eq!(heat_norm(Some(18.0)), 0.0);
        assert!(close(heat_norm(Some(21.0)), 0.30));
        assert!(close(heat_norm(Some(22.5)), 0.50));
        assert!(close(heat_norm(Some(24.0)), 0.70));
        assert!(close(heat_norm(Some(27.0)), 1.0));
        assert_eq!(heat_norm(Some(35.0)), 1.0);
    }

    #[test]
    fn test_cold_norm_breakpoints() {
        assert_eq!(cold_norm(None), 0.0);
        assert_eq!(cold_norm(Some(10.0)), 0.0);
        assert!(close(cold_norm(Some(5.0)), 0.30));
        assert!(close(cold_norm(Some(2.5)), 0.50));
        assert!(close(cold_norm(Some(0.0)), 0.70));
        assert!(close(cold_norm(Some(-5.0)), 1.0));
        assert!(close(cold_norm(Some(-20.0)), 1.0));
    }

    #[test]
    fn test_stress_weights_and_vanish() {
        let w = Weights::default();
        let c = Components {
            delay: 1.0,
            speed: 1.0,
            ..Default::default()
        };
        assert!(close(c.stress(&w), 0.60));

        let anchored = Components { vanish: true, ..c };
        assert!(close(anchored.stress(&w), 0.85));

        let all = Components {
            delay: 1.0,
            speed: 1.0,
            rain: 1.0,
            heat: 1.0,
            cold: 1.0,
            vanish: true,
        };
        assert!(all.stress(&w) <= 1.0);
    }
}
