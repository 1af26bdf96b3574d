use crate::error::{MachineError, Result};
use crate::hal::SpeedControl;
use crate::solver::{BallMotion, SpeedSolver, SpeedVector};
use std::fmt;

/// Motor group that accelerates a ball and puts spin on it.
pub struct BallDriver {
    index: usize,
    solver: SpeedSolver,
    motors: Vec<Box<dyn SpeedControl>>,
    active: bool,
    motion: BallMotion,
    speeds: SpeedVector,
}

impl fmt::Debug for BallDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BallDriver")
            .field("index", &self.index)
            .field("motors", &self.motors.len())
            .field("active", &self.active)
            .field("motion", &self.motion)
            .field("speeds", &self.speeds)
            .finish()
    }
}

impl BallDriver {
    pub fn new(
        index: usize,
        solver: SpeedSolver,
        motors: Vec<Box<dyn SpeedControl>>,
    ) -> Result<Self> {
        if motors.len() != solver.motor_count() {
            return Err(MachineError::Configuration(format!(
                "ball driver {index} has {} motors but {} mount angles",
                motors.len(),
                solver.motor_count()
            )));
        }
        let speeds = SpeedVector::zero(motors.len());
        Ok(Self {
            index,
            solver,
            motors,
            active: false,
            motion: BallMotion {
                speed: 0.0,
                topspin: 0.0,
                sidespin: 0.0,
            },
            speeds,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn solver(&self) -> &SpeedSolver {
        &self.solver
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn motion(&self) -> BallMotion {
        self.motion
    }

    pub fn speeds(&self) -> &SpeedVector {
        &self.speeds
    }

    /// Merges the given components into the cached shot, recomputes the speed
    /// vector and applies it if the driver is running.
    pub fn update_current_shot(
        &mut self,
        speed: Option<f64>,
        topspin: Option<f64>,
        sidespin: Option<f64>,
    ) -> Result<()> {
        let motion = BallMotion::new(
            speed.unwrap_or(self.motion.speed),
            topspin.unwrap_or(self.motion.topspin),
            sidespin.unwrap_or(self.motion.sidespin),
        )?;
        let speeds = self.solver.solve_motion(&motion)?;
        self.motion = motion;
        self.speeds = speeds;
        if self.active {
            self.write_speeds()?;
        }
        Ok(())
    }

    /// Takes a shot whose speeds were already solved, e.g. a shot's cached
    /// vector. `motion` becomes the cached shot that later partial updates
    /// merge with.
    pub fn apply_speeds(&mut self, motion: BallMotion, speeds: &SpeedVector) -> Result<()> {
        if speeds.len() != self.motors.len() {
            return Err(MachineError::InputData(format!(
                "ball driver {} needs {} speeds, got {}",
                self.index,
                self.motors.len(),
                speeds.len()
            )));
        }
        self.motion = motion;
        self.speeds = SpeedVector::clamped(speeds.as_slice());
        if self.active {
            self.write_speeds()?;
        }
        Ok(())
    }

    /// Activates the driver and reapplies the last computed speeds.
    pub fn start(&mut self) -> Result<()> {
        self.active = true;
        self.write_speeds()?;
        log::debug!("ball driver {} started at {:?}", self.index, self.speeds);
        Ok(())
    }

    /// Zeroes every motor; the cached shot and speed vector are kept.
    pub fn stop(&mut self) -> Result<()> {
        self.active = false;
        let mut first_error = None;
        for (number, motor) in self.motors.iter_mut().enumerate() {
            if let Err(e) = motor.stop() {
                log::error!("ball driver {} motor {number} failed to stop: {e}", self.index);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => {
                log::debug!("ball driver {} stopped", self.index);
                Ok(())
            }
        }
    }

    fn write_speeds(&mut self) -> Result<()> {
        for (motor, percent) in self.motors.iter_mut().zip(self.speeds.as_slice()) {
            motor.set_speed(*percent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal_sim::{DcMotorMonitor, SimulatedDcMotor};

    fn driver() -> (BallDriver, Vec<DcMotorMonitor>) {
        let motors = [SimulatedDcMotor::new(1), SimulatedDcMotor::new(-1)];
        let monitors = motors.iter().map(SimulatedDcMotor::monitor).collect();
        let boxed: Vec<Box<dyn SpeedControl>> = motors
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn SpeedControl>)
            .collect();
        let solver = SpeedSolver::new(&[0.0, 180.0]).unwrap();
        (BallDriver::new(0, solver, boxed).unwrap(), monitors)
    }

    fn outputs(monitors: &[DcMotorMonitor]) -> Vec<i32> {
        monitors.iter().map(DcMotorMonitor::speed).collect()
    }

    #[test]
    fn inactive_driver_buffers_speeds() {
        let (mut driver, monitors) = driver();
        driver.update_current_shot(Some(0.5), Some(1.0), None).unwrap();
        assert_eq!(driver.speeds().as_slice(), &[100, -33]);
        assert_eq!(outputs(&monitors), vec![0, 0]);

        driver.start().unwrap();
        // Second motor is wired with reversed polarity.
        assert_eq!(outputs(&monitors), vec![100, 33]);
    }

    #[test]
    fn partial_update_merges_with_cached_shot() {
        let (mut driver, _) = driver();
        driver.update_current_shot(Some(0.5), Some(1.0), None).unwrap();
        driver.update_current_shot(None, Some(0.0), None).unwrap();
        assert_eq!(driver.motion().speed, 0.5);
        assert_eq!(driver.speeds().as_slice(), &[50, 50]);
    }

    #[test]
    fn applied_shot_becomes_the_merge_base() {
        let (mut driver, _) = driver();
        driver.update_current_shot(Some(0.5), Some(1.0), Some(0.0)).unwrap();
        let flat = BallMotion::new(0.5, 0.0, 0.0).unwrap();
        let speeds = driver.solver().solve_motion(&flat).unwrap();
        driver.apply_speeds(flat, &speeds).unwrap();
        assert_eq!(driver.motion(), flat);

        driver.update_current_shot(None, None, Some(0.0)).unwrap();
        assert_eq!(driver.motion().topspin, 0.0);
        assert_eq!(driver.speeds().as_slice(), &[50, 50]);
    }

    #[test]
    fn stop_keeps_cached_vector() {
        let (mut driver, monitors) = driver();
        driver.update_current_shot(Some(1.0), Some(0.0), Some(0.0)).unwrap();
        driver.start().unwrap();
        assert_eq!(outputs(&monitors), vec![100, -100]);
        driver.stop().unwrap();
        assert_eq!(outputs(&monitors), vec![0, 0]);
        assert_eq!(driver.speeds().as_slice(), &[100, 100]);
        driver.start().unwrap();
        assert_eq!(outputs(&monitors), vec![100, -100]);
    }

    #[test]
    fn rejects_vector_of_wrong_length() {
        let (mut driver, _) = driver();
        assert!(matches!(
            driver.apply_speeds(BallMotion::new(0.0, 0.0, 0.0).unwrap(), &SpeedVector::zero(3)),
            Err(MachineError::InputData(_))
        ));
    }

    #[test]
    fn motor_count_must_match_mount_angles() {
        let solver = SpeedSolver::new(&[0.0, 180.0]).unwrap();
        let motors: Vec<Box<dyn SpeedControl>> = vec![Box::new(SimulatedDcMotor::new(1))];
        assert!(BallDriver::new(3, solver, motors).is_err());
    }
}
