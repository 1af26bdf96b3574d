use crate::config::{GeneralSettings, ShotConfig};
use crate::error::{MachineError, Result};
use crate::solver::{BallMotion, SpeedSolver, SpeedVector};
use std::sync::OnceLock;

/// Result of a clamping setter: the stored value and whether it differs from the request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped<T> {
    pub value: T,
    pub clamped: bool,
}

impl Clamped<f64> {
    fn within(requested: f64, min: f64, max: f64) -> Self {
        let value = requested.clamp(min, max);
        Self {
            value,
            clamped: value != requested,
        }
    }
}

fn require_finite(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MachineError::InputData(format!("{name} must be finite, got {value}")))
    }
}

/// A parametrized ball: speed, spin, cadence and the driver that plays it.
#[derive(Debug, Clone)]
pub struct Shot {
    speed: f64,
    topspin: f64,
    sidespin: f64,
    pause_s: f64,
    h_angle: f64,
    v_angle: f64,
    driver: usize,
    speeds: OnceLock<SpeedVector>,
}

impl PartialEq for Shot {
    fn eq(&self, other: &Self) -> bool {
        self.speed == other.speed
            && self.topspin == other.topspin
            && self.sidespin == other.sidespin
            && self.pause_s == other.pause_s
            && self.h_angle == other.h_angle
            && self.v_angle == other.v_angle
            && self.driver == other.driver
    }
}

impl Shot {
    /// Strict constructor: out-of-range values are rejected, not clamped.
    pub fn new(
        speed: f64,
        topspin: f64,
        sidespin: f64,
        pause_s: f64,
        driver: usize,
    ) -> Result<Self> {
        let speed = require_finite("speed", speed)?;
        let topspin = require_finite("topspin", topspin)?;
        let sidespin = require_finite("sidespin", sidespin)?;
        let pause_s = require_finite("pause", pause_s)?;
        if !(0.0..=1.0).contains(&speed) {
            return Err(MachineError::InputData(format!(
                "speed must be within 0..=1, got {speed}"
            )));
        }
        if !(-1.0..=1.0).contains(&topspin) || !(-1.0..=1.0).contains(&sidespin) {
            return Err(MachineError::InputData(format!(
                "spin must be within -1..=1, got topspin {topspin}, sidespin {sidespin}"
            )));
        }
        if pause_s <= 0.0 {
            return Err(MachineError::InputData(format!(
                "pause must be positive, got {pause_s}"
            )));
        }
        Ok(Self {
            speed,
            topspin,
            sidespin,
            pause_s,
            h_angle: 0.0,
            v_angle: 0.0,
            driver,
            speeds: OnceLock::new(),
        })
    }

    pub fn with_aim(mut self, h_angle: f64, v_angle: f64) -> Result<Self> {
        self.h_angle = require_finite("horizontal angle", h_angle)?;
        self.v_angle = require_finite("vertical angle", v_angle)?;
        Ok(self)
    }

    pub fn from_config(config: &ShotConfig) -> Result<Self> {
        Self::new(
            config.speed,
            config.topspin,
            config.sidespin,
            config.pause,
            config.bd_number,
        )?
        .with_aim(config.h_angle, config.v_angle)
    }

    pub fn to_config(&self) -> ShotConfig {
        ShotConfig {
            speed: self.speed,
            topspin: self.topspin,
            sidespin: self.sidespin,
            pause: self.pause_s,
            h_angle: self.h_angle,
            v_angle: self.v_angle,
            bd_number: self.driver,
        }
    }

    /// Default shot on driver 0, built from the general settings.
    pub fn default_from_settings(settings: &GeneralSettings) -> Result<Self> {
        if settings.default_ball_frequency <= 0.0 {
            return Err(MachineError::Configuration(format!(
                "default ball frequency must be positive, got {}",
                settings.default_ball_frequency
            )));
        }
        Self::new(
            settings.default_ballspeed.clamp(0.0, 1.0),
            settings.default_topspin.clamp(-1.0, 1.0),
            settings.default_sidespin.clamp(-1.0, 1.0),
            1.0 / settings.default_ball_frequency,
            0,
        )
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn topspin(&self) -> f64 {
        self.topspin
    }

    pub fn sidespin(&self) -> f64 {
        self.sidespin
    }

    pub fn pause_s(&self) -> f64 {
        self.pause_s
    }

    pub fn h_angle(&self) -> f64 {
        self.h_angle
    }

    pub fn v_angle(&self) -> f64 {
        self.v_angle
    }

    pub fn driver(&self) -> usize {
        self.driver
    }

    /// Speed and spin as the ball driver's solver sees them.
    pub fn motion(&self) -> Result<BallMotion> {
        BallMotion::new(self.speed, self.topspin, self.sidespin)
    }

    /// Balls per second this shot asks for.
    pub fn frequency_hz(&self) -> f64 {
        1.0 / self.pause_s
    }

    pub fn set_speed(&mut self, value: f64) -> Result<Clamped<f64>> {
        let applied = Clamped::within(require_finite("speed", value)?, 0.0, 1.0);
        self.speed = applied.value;
        self.speeds = OnceLock::new();
        Ok(applied)
    }

    pub fn set_topspin(&mut self, value: f64) -> Result<Clamped<f64>> {
        let applied = Clamped::within(require_finite("topspin", value)?, -1.0, 1.0);
        self.topspin = applied.value;
        self.speeds = OnceLock::new();
        Ok(applied)
    }

    pub fn set_sidespin(&mut self, value: f64) -> Result<Clamped<f64>> {
        let applied = Clamped::within(require_finite("sidespin", value)?, -1.0, 1.0);
        self.sidespin = applied.value;
        self.speeds = OnceLock::new();
        Ok(applied)
    }

    /// Pauses shorter than `min_pause_s` are raised to it.
    pub fn set_pause(&mut self, value: f64, min_pause_s: f64) -> Result<Clamped<f64>> {
        let value = require_finite("pause", value)?;
        let applied = Clamped {
            value: value.max(min_pause_s),
            clamped: value < min_pause_s,
        };
        if applied.value <= 0.0 {
            return Err(MachineError::InputData(format!(
                "pause must be positive, got {value}"
            )));
        }
        self.pause_s = applied.value;
        Ok(applied)
    }

    pub fn set_driver(&mut self, driver: usize) {
        if driver != self.driver {
            self.driver = driver;
            self.speeds = OnceLock::new();
        }
    }

    /// Cached motor speeds, if they were computed since the last change.
    pub fn cached_speeds(&self) -> Option<&SpeedVector> {
        self.speeds.get()
    }

    /// Motor speeds for this shot on `solver`, computed once and cached until
    /// speed, spin or target driver change.
    pub fn speeds_for(&self, solver: &SpeedSolver) -> Result<SpeedVector> {
        if let Some(cached) = self.speeds.get() {
            return Ok(cached.clone());
        }
        let computed = solver.solve(self.speed, self.topspin, self.sidespin)?;
        let _ = self.speeds.set(computed.clone());
        Ok(computed)
    }

    /// Applies a partial update; reports whether any component was clamped.
    pub fn apply(&mut self, update: &ShotUpdate, min_pause_s: f64) -> Result<bool> {
        let mut clamped = false;
        if let Some(speed) = update.speed {
            clamped |= self.set_speed(speed)?.clamped;
        }
        if let Some(topspin) = update.topspin {
            clamped |= self.set_topspin(topspin)?.clamped;
        }
        if let Some(sidespin) = update.sidespin {
            clamped |= self.set_sidespin(sidespin)?.clamped;
        }
        if let Some(pause) = update.pause_s {
            clamped |= self.set_pause(pause, min_pause_s)?.clamped;
        }
        if let Some(driver) = update.driver {
            self.set_driver(driver);
        }
        Ok(clamped)
    }
}

/// Partial shot change requested from outside the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShotUpdate {
    pub speed: Option<f64>,
    pub topspin: Option<f64>,
    pub sidespin: Option<f64>,
    pub pause_s: Option<f64>,
    pub driver: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver() -> SpeedSolver {
        SpeedSolver::new(&[0.0, 180.0]).unwrap()
    }

    #[test]
    fn strict_constructor_rejects_out_of_range() {
        assert!(Shot::new(1.2, 0.0, 0.0, 2.0, 0).is_err());
        assert!(Shot::new(0.5, -1.5, 0.0, 2.0, 0).is_err());
        assert!(Shot::new(0.5, 0.0, 0.0, 0.0, 0).is_err());
        assert!(Shot::new(0.5, 0.0, f64::NAN, 2.0, 0).is_err());
    }

    #[test]
    fn setters_report_clamping() {
        let mut shot = Shot::new(0.5, 0.0, 0.0, 2.0, 0).unwrap();
        assert_eq!(
            shot.set_topspin(1.7).unwrap(),
            Clamped {
                value: 1.0,
                clamped: true
            }
        );
        assert_eq!(
            shot.set_speed(0.25).unwrap(),
            Clamped {
                value: 0.25,
                clamped: false
            }
        );
        assert!(shot.set_pause(0.5, 1.25).unwrap().clamped);
        assert_eq!(shot.pause_s(), 1.25);
    }

    #[test]
    fn cache_is_invalidated_by_spin_change() {
        let mut shot = Shot::new(0.5, 0.0, 0.0, 2.0, 0).unwrap();
        assert!(shot.cached_speeds().is_none());
        assert_eq!(shot.speeds_for(&solver()).unwrap().as_slice(), &[50, 50]);
        assert!(shot.cached_speeds().is_some());

        shot.set_topspin(1.0).unwrap();
        assert!(shot.cached_speeds().is_none());
        assert_eq!(shot.speeds_for(&solver()).unwrap().as_slice(), &[100, -33]);
    }

    #[test]
    fn pause_change_keeps_cached_speeds() {
        let mut shot = Shot::new(1.0, 0.0, 0.0, 2.0, 0).unwrap();
        shot.speeds_for(&solver()).unwrap();
        shot.set_pause(3.0, 1.25).unwrap();
        assert!(shot.cached_speeds().is_some());
        assert_eq!(shot.frequency_hz(), 1.0 / 3.0);
    }

    #[test]
    fn partial_update_touches_only_given_fields() {
        let mut shot = Shot::new(0.5, 0.2, 0.1, 2.0, 0).unwrap();
        let clamped = shot
            .apply(
                &ShotUpdate {
                    topspin: Some(-3.0),
                    ..ShotUpdate::default()
                },
                1.25,
            )
            .unwrap();
        assert!(clamped);
        assert_eq!(shot.speed(), 0.5);
        assert_eq!(shot.topspin(), -1.0);
        assert_eq!(shot.sidespin(), 0.1);
    }

    #[test]
    fn default_shot_uses_settings_frequency() {
        let shot = Shot::default_from_settings(&GeneralSettings::default()).unwrap();
        assert_eq!(shot.pause_s(), 5.0);
        assert_eq!(shot.driver(), 0);
        assert_eq!(shot.speed(), 1.0);
    }
}
