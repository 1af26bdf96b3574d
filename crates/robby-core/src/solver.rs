//! Decomposition of a normalized shot into per-motor speed percentages.

use crate::error::{MachineError, Result};
use serde::{Deserialize, Serialize};

/// Below this normalized speed the wheels cannot launch a ball.
pub const MIN_BALL_SPEED: f64 = 0.1;

/// Minimum |cos(angle)| for a motor whose speed is solved from the topspin equation.
const MIN_PROJECTION: f64 = 1e-6;

/// Per-motor output in percent; every value lies in -100..=100.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpeedVector(Vec<i32>);

impl SpeedVector {
    pub fn zero(len: usize) -> Self {
        Self(vec![0; len])
    }

    /// Builds a vector from externally supplied percentages, clamping each value.
    pub fn clamped(values: &[i32]) -> Self {
        Self(values.iter().map(|v| (*v).clamp(-100, 100)).collect())
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0)
    }
}

/// Normalized ball parameters after range clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BallMotion {
    pub speed: f64,
    pub topspin: f64,
    pub sidespin: f64,
}

impl BallMotion {
    pub fn new(speed: f64, topspin: f64, sidespin: f64) -> Result<Self> {
        if !speed.is_finite() || !topspin.is_finite() || !sidespin.is_finite() {
            return Err(MachineError::InputData(format!(
                "non-finite ball motion (speed {speed}, topspin {topspin}, sidespin {sidespin})"
            )));
        }
        let speed = if speed == 0.0 {
            0.0
        } else {
            speed.clamp(MIN_BALL_SPEED, 1.0)
        };
        Ok(Self {
            speed,
            topspin: topspin.clamp(-1.0, 1.0),
            sidespin: sidespin.clamp(-1.0, 1.0),
        })
    }
}

/// Solver for one ball driver, fixed to its motor mount angles.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedSolver {
    mount_angles_deg: Vec<f64>,
    projections: Vec<f64>,
}

impl SpeedSolver {
    pub fn new(mount_angles_deg: &[f64]) -> Result<Self> {
        if let Some(bad) = mount_angles_deg.iter().find(|a| !a.is_finite()) {
            return Err(MachineError::Configuration(format!(
                "motor mount angle {bad} is not finite"
            )));
        }
        let projections: Vec<f64> = mount_angles_deg
            .iter()
            .map(|a| a.to_radians().cos())
            .collect();
        if projections.len() == 2 && projections[1].abs() < MIN_PROJECTION {
            return Err(MachineError::Configuration(format!(
                "motor 1 mounted at {}° has no topspin projection",
                mount_angles_deg[1]
            )));
        }
        Ok(Self {
            mount_angles_deg: mount_angles_deg.to_vec(),
            projections,
        })
    }

    pub fn mount_angles(&self) -> &[f64] {
        &self.mount_angles_deg
    }

    pub fn motor_count(&self) -> usize {
        self.mount_angles_deg.len()
    }

    /// Speed percentages for the requested ball motion.
    ///
    /// Only the two-motor arrangement is supported; sidespin is accepted but
    /// not used by it.
    pub fn solve(&self, speed: f64, topspin: f64, sidespin: f64) -> Result<SpeedVector> {
        let motion = BallMotion::new(speed, topspin, sidespin)?;
        self.solve_motion(&motion)
    }

    pub fn solve_motion(&self, motion: &BallMotion) -> Result<SpeedVector> {
        if self.motor_count() != 2 {
            return Err(MachineError::NotSupported(format!(
                "having {} motors in a ball driver is not supported",
                self.motor_count()
            )));
        }
        if motion.speed == 0.0 {
            return Ok(SpeedVector::zero(2));
        }

        let eff = &self.projections;
        let v = motion.speed;
        let mut speeds = [v, v];

        // Motor 1 follows from the topspin equation given motor 0.
        let eff_sum: f64 = eff.iter().map(|e| e.abs()).sum();
        speeds[1] = (eff_sum * motion.topspin - eff[0] * speeds[0]) / eff[1];

        // Restore the requested net speed, keeping the relative rotation.
        let delta = v - (speeds[0] + speeds[1]) / 2.0;
        for s in &mut speeds {
            *s += delta;
        }

        // Scale into -1..=1. The maximum is handled first; the minimum check
        // then works on the already scaled values.
        let max = speeds[0].max(speeds[1]);
        if max > 1.0 {
            for s in &mut speeds {
                *s /= max;
            }
        }
        let neg_min = -speeds[0].min(speeds[1]);
        if neg_min > 1.0 {
            for s in &mut speeds {
                *s /= neg_min;
            }
        }

        log::trace!("solved speeds {speeds:?} for {motion:?}");
        Ok(SpeedVector(
            speeds.iter().map(|s| (s * 100.0) as i32).collect(),
        ))
    }
}
