//! Simulated actuators for tests and the desktop runtime.
//!
//! Every simulated actuator hands out a monitor sharing its state, so the
//! owner of simulated time can advance rotations and observe outputs while
//! the controller owns the actuator itself.

use crate::config::{
    BallDriverConfig, MotorDriverConfig, ServoWiring, StepperWiring, StirrerConfig,
};
use crate::error::ActuatorError;
use crate::hal::{ContinuousRotate, CountedRotate, ImmediateStop, SpeedControl, StepCompletion};
use crate::machine::ActuatorFactory;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct PendingRotation {
    remaining_deg: f64,
    done: StepCompletion,
}

#[derive(Debug, Default)]
struct StepperState {
    position_deg: f64,
    pending: Option<PendingRotation>,
    continuous_speed: Option<f64>,
    completed_rotations: u64,
}

/// Stepper that rotates at a fixed angular speed in simulated time.
#[derive(Debug)]
pub struct SimulatedStepper {
    state: Arc<Mutex<StepperState>>,
    degrees_per_second: f64,
}

impl SimulatedStepper {
    pub fn new(degrees_per_second: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(StepperState::default())),
            degrees_per_second,
        }
    }

    pub fn from_wiring(wiring: &StepperWiring) -> Self {
        Self::new(wiring.degrees_per_second())
    }

    pub fn monitor(&self) -> StepperMonitor {
        StepperMonitor {
            state: Arc::clone(&self.state),
            degrees_per_second: self.degrees_per_second,
        }
    }
}

impl ImmediateStop for SimulatedStepper {
    fn stop(&mut self) -> Result<(), ActuatorError> {
        let mut state = lock(&self.state);
        // The completion of an aborted rotation is dropped, never signalled.
        state.pending = None;
        state.continuous_speed = None;
        Ok(())
    }
}

impl CountedRotate for SimulatedStepper {
    fn rotate_by_angle(
        &mut self,
        angle_deg: f64,
        done: StepCompletion,
    ) -> Result<(), ActuatorError> {
        if !angle_deg.is_finite() {
            return Err(ActuatorError::Fault(format!("invalid angle {angle_deg}")));
        }
        let mut state = lock(&self.state);
        if state.pending.is_some() || state.continuous_speed.is_some() {
            return Err(ActuatorError::Busy);
        }
        if angle_deg == 0.0 {
            return Ok(());
        }
        state.pending = Some(PendingRotation {
            remaining_deg: angle_deg,
            done,
        });
        Ok(())
    }

    fn is_rotating(&self) -> bool {
        let state = lock(&self.state);
        state.pending.is_some() || state.continuous_speed.is_some()
    }
}

impl ContinuousRotate for SimulatedStepper {
    fn rotate(&mut self, speed_norm: f64) -> Result<(), ActuatorError> {
        if !speed_norm.is_finite() {
            return Err(ActuatorError::Fault(format!("invalid speed {speed_norm}")));
        }
        let mut state = lock(&self.state);
        if state.pending.is_some() {
            return Err(ActuatorError::Busy);
        }
        state.continuous_speed = Some(speed_norm.clamp(-1.0, 1.0));
        Ok(())
    }
}

/// Observer and time source for a [`SimulatedStepper`].
#[derive(Debug, Clone)]
pub struct StepperMonitor {
    state: Arc<Mutex<StepperState>>,
    degrees_per_second: f64,
}

impl StepperMonitor {
    /// Moves the stepper forward by `dt_s` of simulated time. Returns true if a
    /// counted rotation finished, in which case its completion was signalled.
    pub fn advance(&self, dt_s: f64) -> bool {
        let budget = self.degrees_per_second * dt_s.max(0.0);
        let finished = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            if let Some(speed) = state.continuous_speed {
                state.position_deg += speed * budget;
            }
            let Some(pending) = state.pending.as_mut() else {
                return false;
            };
            if pending.remaining_deg.abs() > budget {
                let step = budget.copysign(pending.remaining_deg);
                pending.remaining_deg -= step;
                state.position_deg += step;
                return false;
            }
            let finished = state.pending.take();
            if let Some(rotation) = &finished {
                state.position_deg += rotation.remaining_deg;
                state.completed_rotations += 1;
            }
            finished
        };
        // Signal outside the lock; the receiver may immediately issue the next rotation.
        match finished {
            Some(rotation) => {
                rotation.done.signal();
                true
            }
            None => false,
        }
    }

    /// Finishes the pending counted rotation at once.
    pub fn complete_pending(&self) -> bool {
        let finished = {
            let mut state = lock(&self.state);
            let finished = state.pending.take();
            if let Some(rotation) = &finished {
                state.position_deg += rotation.remaining_deg;
                state.completed_rotations += 1;
            }
            finished
        };
        match finished {
            Some(rotation) => {
                rotation.done.signal();
                true
            }
            None => false,
        }
    }

    pub fn is_rotating(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    pub fn is_running_continuously(&self) -> bool {
        lock(&self.state).continuous_speed.is_some()
    }

    pub fn pending_angle(&self) -> Option<f64> {
        lock(&self.state).pending.as_ref().map(|p| p.remaining_deg)
    }

    pub fn position_deg(&self) -> f64 {
        lock(&self.state).position_deg
    }

    pub fn completed_rotations(&self) -> u64 {
        lock(&self.state).completed_rotations
    }
}

/// DC motor on a PWM driver channel; records its signed output.
#[derive(Debug)]
pub struct SimulatedDcMotor {
    output: Arc<AtomicI32>,
    faulty: Arc<AtomicBool>,
    polarity: i32,
}

impl SimulatedDcMotor {
    pub fn new(polarity: i8) -> Self {
        Self {
            output: Arc::new(AtomicI32::new(0)),
            faulty: Arc::new(AtomicBool::new(false)),
            polarity: if polarity < 0 { -1 } else { 1 },
        }
    }

    pub fn monitor(&self) -> DcMotorMonitor {
        DcMotorMonitor {
            output: Arc::clone(&self.output),
            faulty: Arc::clone(&self.faulty),
        }
    }

    fn check(&self) -> Result<(), ActuatorError> {
        if self.faulty.load(Ordering::Relaxed) {
            Err(ActuatorError::Fault("motor driver not responding".into()))
        } else {
            Ok(())
        }
    }
}

impl ImmediateStop for SimulatedDcMotor {
    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.check()?;
        self.output.store(0, Ordering::Relaxed);
        Ok(())
    }
}

impl SpeedControl for SimulatedDcMotor {
    fn set_speed(&mut self, percent: i32) -> Result<(), ActuatorError> {
        self.check()?;
        self.output
            .store(percent.clamp(-100, 100) * self.polarity, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DcMotorMonitor {
    output: Arc<AtomicI32>,
    faulty: Arc<AtomicBool>,
}

impl DcMotorMonitor {
    /// Output after polarity, in percent.
    pub fn speed(&self) -> i32 {
        self.output.load(Ordering::Relaxed)
    }

    /// Makes every later call on the motor fail.
    pub fn inject_fault(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::Relaxed);
    }
}

/// Continuous-rotation servo driven by PWM duty.
#[derive(Debug)]
pub struct SimulatedServo {
    duty: Arc<AtomicI32>,
    duty_neutral: f64,
    duty_halfspan: f64,
}

impl SimulatedServo {
    pub fn new(wiring: &ServoWiring) -> Self {
        let t_pulse_ms = 1000.0 / f64::from(wiring.freq.max(1));
        let duty_halfspan = (wiring.t_high_ms - wiring.t_low_ms) / t_pulse_ms * 65535.0 / 2.0;
        let duty_neutral = wiring.t_low_ms / t_pulse_ms * 65535.0 + duty_halfspan;
        Self {
            duty: Arc::new(AtomicI32::new(duty_neutral as i32)),
            duty_neutral,
            duty_halfspan,
        }
    }

    pub fn monitor(&self) -> ServoMonitor {
        ServoMonitor {
            duty: Arc::clone(&self.duty),
            neutral: self.duty_neutral as i32,
        }
    }
}

impl ImmediateStop for SimulatedServo {
    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.duty.store(self.duty_neutral as i32, Ordering::Relaxed);
        Ok(())
    }
}

impl ContinuousRotate for SimulatedServo {
    fn rotate(&mut self, speed_norm: f64) -> Result<(), ActuatorError> {
        if !speed_norm.is_finite() {
            return Err(ActuatorError::Fault(format!("invalid speed {speed_norm}")));
        }
        let duty = speed_norm.clamp(-1.0, 1.0) * self.duty_halfspan + self.duty_neutral;
        self.duty.store(duty as i32, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ServoMonitor {
    duty: Arc<AtomicI32>,
    neutral: i32,
}

impl ServoMonitor {
    /// Current 16-bit duty value.
    pub fn duty(&self) -> i32 {
        self.duty.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.duty() != self.neutral
    }
}

/// Monitor of one stirrer, whichever actuator backs it.
#[derive(Debug, Clone)]
pub enum StirrerMonitor {
    Stepper(StepperMonitor),
    Servo(ServoMonitor),
}

impl StirrerMonitor {
    pub fn is_running(&self) -> bool {
        match self {
            Self::Stepper(monitor) => monitor.is_running_continuously(),
            Self::Servo(monitor) => monitor.is_running(),
        }
    }
}

/// Builds simulated actuators for a machine configuration and keeps their monitors.
#[derive(Debug, Default)]
pub struct SimulatedHardware {
    failing_addresses: HashSet<u8>,
    driver_motors: Vec<(usize, Vec<DcMotorMonitor>)>,
    feeder_steppers: Vec<StepperMonitor>,
    stirrers: Vec<StirrerMonitor>,
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// PWM drivers at `address` fail to initialize.
    pub fn fail_driver_at(mut self, address: u8) -> Self {
        self.failing_addresses.insert(address);
        self
    }

    /// Motor monitors of ball driver `bd_number`, in motor order.
    pub fn driver_motor_monitors(&self, bd_number: usize) -> &[DcMotorMonitor] {
        self.driver_motors
            .iter()
            .find(|(number, _)| *number == bd_number)
            .map(|(_, monitors)| monitors.as_slice())
            .unwrap_or(&[])
    }

    pub fn all_driver_motor_monitors(&self) -> impl Iterator<Item = &DcMotorMonitor> {
        self.driver_motors.iter().flat_map(|(_, monitors)| monitors.iter())
    }

    /// Feeder stepper monitors in the order they were built.
    pub fn feeder_stepper_monitors(&self) -> &[StepperMonitor] {
        &self.feeder_steppers
    }

    pub fn stirrer_monitors(&self) -> &[StirrerMonitor] {
        &self.stirrers
    }

    /// A time source for every stepper built so far.
    pub fn bench(&self) -> SimulationBench {
        let mut steppers = self.feeder_steppers.clone();
        steppers.extend(self.stirrers.iter().filter_map(|monitor| match monitor {
            StirrerMonitor::Stepper(stepper) => Some(stepper.clone()),
            StirrerMonitor::Servo(_) => None,
        }));
        SimulationBench { steppers }
    }
}

impl ActuatorFactory for SimulatedHardware {
    fn driver_motors(
        &mut self,
        config: &BallDriverConfig,
    ) -> Result<Vec<Box<dyn SpeedControl>>, ActuatorError> {
        let MotorDriverConfig::Pca9685(wiring) = &config.motor_driver;
        if self.failing_addresses.contains(&wiring.address) {
            return Err(ActuatorError::Fault(format!(
                "no PWM driver answering at address {:#04x}",
                wiring.address
            )));
        }
        let mut motors: Vec<Box<dyn SpeedControl>> = Vec::with_capacity(config.motors.len());
        let mut monitors = Vec::with_capacity(config.motors.len());
        for motor in &config.motors {
            let simulated = SimulatedDcMotor::new(motor.polarity);
            monitors.push(simulated.monitor());
            motors.push(Box::new(simulated));
        }
        self.driver_motors.push((config.bd_number, monitors));
        Ok(motors)
    }

    fn feeder_actuator(
        &mut self,
        wiring: &StepperWiring,
    ) -> Result<Box<dyn CountedRotate>, ActuatorError> {
        if wiring.steps_per_revolution() <= 0 {
            return Err(ActuatorError::Fault(format!(
                "stepper on pin {} has no steps per revolution",
                wiring.starting_gp_pin
            )));
        }
        let stepper = SimulatedStepper::from_wiring(wiring);
        self.feeder_steppers.push(stepper.monitor());
        Ok(Box::new(stepper))
    }

    fn stirrer_actuator(
        &mut self,
        config: &StirrerConfig,
    ) -> Result<Box<dyn ContinuousRotate>, ActuatorError> {
        match config {
            StirrerConfig::Stepper { config, .. } => {
                let stepper = SimulatedStepper::from_wiring(config);
                self.stirrers.push(StirrerMonitor::Stepper(stepper.monitor()));
                Ok(Box::new(stepper))
            }
            StirrerConfig::Servo { config, .. } => {
                let servo = SimulatedServo::new(config);
                self.stirrers.push(StirrerMonitor::Servo(servo.monitor()));
                Ok(Box::new(servo))
            }
        }
    }
}

/// Advances every simulated stepper of a machine in lockstep.
#[derive(Debug, Clone, Default)]
pub struct SimulationBench {
    steppers: Vec<StepperMonitor>,
}

impl SimulationBench {
    /// Returns how many counted rotations finished during this step.
    pub fn step(&self, dt_s: f64) -> usize {
        self.steppers.iter().filter(|s| s.advance(dt_s)).count()
    }

    pub fn any_rotating(&self) -> bool {
        self.steppers.iter().any(StepperMonitor::is_rotating)
    }
}
