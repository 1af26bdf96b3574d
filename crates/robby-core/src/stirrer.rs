use crate::error::{MachineError, Result};
use crate::hal::ContinuousRotate;
use std::fmt;

/// Agitator that keeps balls from jamming at the feeder outlet.
pub struct BallStirrer {
    index: usize,
    actuator: Box<dyn ContinuousRotate>,
    speed: f64,
    running: bool,
}

impl fmt::Debug for BallStirrer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BallStirrer")
            .field("index", &self.index)
            .field("speed", &self.speed)
            .field("running", &self.running)
            .finish()
    }
}

impl BallStirrer {
    pub fn new(index: usize, actuator: Box<dyn ContinuousRotate>, speed: f64) -> Result<Self> {
        if !speed.is_finite() || !(-1.0..=1.0).contains(&speed) {
            return Err(MachineError::Configuration(format!(
                "stirrer {index} speed must be within -1..=1, got {speed}"
            )));
        }
        Ok(Self {
            index,
            actuator,
            speed,
            running: false,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.actuator.rotate(self.speed)?;
        self.running = true;
        log::debug!("stirrer {} running at {}", self.index, self.speed);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.running = false;
        self.actuator.stop()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal_sim::SimulatedStepper;

    #[test]
    fn start_is_idempotent_and_stop_halts() {
        let stepper = SimulatedStepper::new(90.0);
        let monitor = stepper.monitor();
        let mut stirrer = BallStirrer::new(0, Box::new(stepper), 0.5).unwrap();
        stirrer.start().unwrap();
        stirrer.start().unwrap();
        assert!(monitor.is_running_continuously());
        monitor.advance(1.0);
        assert!((monitor.position_deg() - 45.0).abs() < 1e-9);
        stirrer.stop().unwrap();
        assert!(!stirrer.is_running());
        assert!(!monitor.is_running_continuously());
    }

    #[test]
    fn rejects_out_of_range_speed() {
        assert!(BallStirrer::new(0, Box::new(SimulatedStepper::new(90.0)), 1.5).is_err());
    }
}
