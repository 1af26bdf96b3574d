//! Assembly of a machine from its configuration document.
//!
//! Ball drivers, feeders and stirrers are independent groups: one that
//! cannot be built is logged, recorded and left out. Anything the machine
//! cannot run without fails the whole assembly.

use crate::config::{BallDriverConfig, MachineConfig, StepperWiring, StirrerConfig};
use crate::driver::BallDriver;
use crate::error::{ActuatorError, MachineError, Result};
use crate::hal::{CompletionEvent, ContinuousRotate, CountedRotate, SpeedControl};
use crate::sequencer::{ActionCycle, ActionSequencer};
use crate::shot::Shot;
use crate::shot_cycle::ShotCycle;
use crate::solver::SpeedSolver;
use crate::stirrer::BallStirrer;
use std::sync::mpsc::Sender;

/// Source of concrete actuators for the configured wiring.
pub trait ActuatorFactory {
    fn driver_motors(
        &mut self,
        config: &BallDriverConfig,
    ) -> Result<Vec<Box<dyn SpeedControl>>, ActuatorError>;

    fn feeder_actuator(
        &mut self,
        wiring: &StepperWiring,
    ) -> Result<Box<dyn CountedRotate>, ActuatorError>;

    fn stirrer_actuator(
        &mut self,
        config: &StirrerConfig,
    ) -> Result<Box<dyn ContinuousRotate>, ActuatorError>;
}

#[derive(Debug)]
pub struct Machine {
    pub drivers: Vec<BallDriver>,
    pub feeders: Vec<ActionSequencer>,
    pub stirrers: Vec<BallStirrer>,
    pub shot_cycle: ShotCycle,
    /// Starting point of the continuous shot played in Direct mode.
    pub default_shot: Shot,
    pub max_ball_frequency: f64,
    /// Per-item failures that were tolerated during assembly.
    pub init_errors: Vec<MachineError>,
}

impl Machine {
    pub fn assemble(
        config: &MachineConfig,
        factory: &mut dyn ActuatorFactory,
        completions: Sender<CompletionEvent>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| MachineError::during("configuration", e))?;
        let general = &config.general;
        let min_pause_s = 1.0 / general.max_ball_frequency;
        let mut init_errors = Vec::new();

        let mut drivers = Vec::new();
        for driver_config in &config.balldrivers {
            match build_driver(driver_config, factory) {
                Ok(driver) => drivers.push(driver),
                Err(e) => {
                    log::error!(
                        "ball driver {} could not be initialized and is left out: {e}",
                        driver_config.bd_number
                    );
                    init_errors.push(MachineError::during("ball driver", e));
                }
            }
        }
        if drivers.is_empty() {
            return Err(MachineError::during(
                "ball drivers",
                MachineError::Configuration("no usable ball driver".into()),
            ));
        }
        let has_driver = |index: usize| drivers.iter().any(|d| d.index() == index);

        let mut feeders = Vec::new();
        for (index, feeder_config) in config.ballfeeders.iter().enumerate() {
            if !has_driver(feeder_config.bd_number) {
                log::warn!(
                    "ball feeder {index} left out: ball driver {} is unavailable",
                    feeder_config.bd_number
                );
                init_errors.push(MachineError::during(
                    "ball feeder",
                    MachineError::Configuration(format!(
                        "ball driver {} is unavailable",
                        feeder_config.bd_number
                    )),
                ));
                continue;
            }
            let mut sequencer =
                ActionSequencer::new(index, feeder_config.bd_number, completions.clone());
            let built: Result<()> = feeder_config.actuators.iter().try_for_each(|actuator| {
                let cycle = ActionCycle::new(
                    actuator
                        .cycle
                        .clone()
                        .unwrap_or_else(|| general.ball_feeder_cycle.clone()),
                    actuator.mount_index.unwrap_or(general.ball_feeder_mount_index),
                )?;
                sequencer.add_actuator(factory.feeder_actuator(&actuator.config)?, cycle);
                Ok(())
            });
            match built {
                Ok(()) => feeders.push(sequencer),
                Err(e) => {
                    log::error!("ball feeder {index} could not be initialized, left out: {e}");
                    init_errors.push(MachineError::during("ball feeder", e));
                }
            }
        }

        if feeders.is_empty() {
            return Err(MachineError::during(
                "ball feeders",
                MachineError::Configuration("no usable ball feeder".into()),
            ));
        }
        let playable = |driver: usize| feeders.iter().any(|f| f.driver() == driver);

        let mut stirrers = Vec::new();
        for (index, stirrer_config) in config.ballstirrers.iter().enumerate() {
            let built = factory
                .stirrer_actuator(stirrer_config)
                .map_err(MachineError::from)
                .and_then(|actuator| BallStirrer::new(index, actuator, stirrer_config.speed()));
            match built {
                Ok(stirrer) => stirrers.push(stirrer),
                Err(e) => {
                    log::error!("stirrer {index} could not be initialized and is left out: {e}");
                    init_errors.push(MachineError::during("ball stirrer", e));
                }
            }
        }

        let mut default_shot = Shot::default_from_settings(general)
            .map_err(|e| MachineError::during("default shot", e))?;
        default_shot
            .set_pause(default_shot.pause_s(), min_pause_s)
            .map_err(|e| MachineError::during("default shot", e))?;
        if !playable(default_shot.driver()) {
            default_shot.set_driver(feeders[0].driver());
        }
        solve_ahead(&default_shot, &drivers).map_err(|e| MachineError::during("default shot", e))?;

        let mut shots = Vec::with_capacity(config.shot_cycle.len());
        for (index, shot_config) in config.shot_cycle.iter().enumerate() {
            let mut shot =
                Shot::from_config(shot_config).map_err(|e| MachineError::during("shot cycle", e))?;
            if shot
                .set_pause(shot.pause_s(), min_pause_s)
                .map_err(|e| MachineError::during("shot cycle", e))?
                .clamped
            {
                log::warn!("shot {index}: pause raised to {min_pause_s:.2} s");
            }
            if playable(shot.driver()) {
                solve_ahead(&shot, &drivers).map_err(|e| MachineError::during("shot cycle", e))?;
                shots.push(shot);
            } else {
                log::warn!(
                    "shot {index} left out: ball driver {} has no usable feeder",
                    shot.driver()
                );
            }
        }
        if shots.is_empty() {
            shots.push(default_shot.clone());
        }
        let shot_cycle = ShotCycle::new(shots).map_err(|e| MachineError::during("shot cycle", e))?;

        log::info!(
            "machine assembled: {} ball drivers, {} feeders, {} stirrers, {} shots",
            drivers.len(),
            feeders.len(),
            stirrers.len(),
            shot_cycle.len()
        );
        Ok(Self {
            drivers,
            feeders,
            stirrers,
            shot_cycle,
            default_shot,
            max_ball_frequency: general.max_ball_frequency,
            init_errors,
        })
    }

    pub fn driver_mut(&mut self, index: usize) -> Option<&mut BallDriver> {
        self.drivers.iter_mut().find(|d| d.index() == index)
    }

    /// Solvers of the drivers that have a feeder, i.e. that a shot can target.
    pub fn playable_solvers(&self) -> Vec<(usize, SpeedSolver)> {
        self.drivers
            .iter()
            .filter(|d| self.feeders.iter().any(|f| f.driver() == d.index()))
            .map(|d| (d.index(), d.solver().clone()))
            .collect()
    }

    /// Feeder releasing balls into ball driver `driver`.
    pub fn feeder_for_driver_mut(&mut self, driver: usize) -> Option<&mut ActionSequencer> {
        self.feeders.iter_mut().find(|f| f.driver() == driver)
    }

    pub fn feeder_mut(&mut self, feeder: usize) -> Option<&mut ActionSequencer> {
        self.feeders.iter_mut().find(|f| f.feeder() == feeder)
    }

    pub fn any_feeder_busy(&self) -> bool {
        self.feeders.iter().any(ActionSequencer::is_busy)
    }
}

/// Fills the shot's speed cache so every copy handed to the controller carries it.
fn solve_ahead(shot: &Shot, drivers: &[BallDriver]) -> Result<()> {
    if let Some(driver) = drivers.iter().find(|d| d.index() == shot.driver()) {
        shot.speeds_for(driver.solver())?;
    }
    Ok(())
}

fn build_driver(
    config: &BallDriverConfig,
    factory: &mut dyn ActuatorFactory,
) -> Result<BallDriver> {
    let solver = SpeedSolver::new(&config.motor_angles)?;
    let motors = factory.driver_motors(config)?;
    BallDriver::new(config.bd_number, solver, motors)
}
