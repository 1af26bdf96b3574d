pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod hal;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod machine;
pub mod scheduler;
pub mod sequencer;
pub mod shot;
pub mod shot_cycle;
pub mod solver;
pub mod state;
pub mod stirrer;
pub mod sync;
pub mod tags;

pub use config::MachineConfig;
pub use controller::{ControllerSettings, ControllerStats, MachineController};
pub use error::{ActuatorError, MachineError, Result};
pub use hal::{
    CompletionEvent, ContinuousRotate, CountedRotate, ImmediateStop, SpeedControl, StepCompletion,
};
#[cfg(feature = "simulation")]
pub use hal_sim::{SimulatedHardware, SimulationBench};
pub use machine::{ActuatorFactory, Machine};
pub use scheduler::ShotTimer;
pub use sequencer::{ActionCycle, ActionSequencer, StepProgress};
pub use shot::{Clamped, Shot, ShotUpdate};
pub use shot_cycle::ShotCycle;
pub use solver::{SpeedSolver, SpeedVector};
pub use state::{MachineMode, MachineStatus};
pub use sync::{ControlHandle, MachineSnapshot};
