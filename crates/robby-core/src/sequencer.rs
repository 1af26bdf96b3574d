//! Ball feeder release sequencing.
//!
//! Each feeder actuator walks through its action cycle one counted rotation
//! at a time. A rotation's completion arrives later as a [`CompletionEvent`]
//! on the controller's channel and is fed back through
//! [`ActionSequencer::on_step_complete`], which issues the next step and
//! returns immediately.

use crate::error::{ActuatorError, MachineError, Result};
use crate::hal::{CompletionEvent, CountedRotate, StepCompletion};
use std::fmt;
use std::sync::mpsc::Sender;

/// Signed rotation steps of one release gesture, in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCycle {
    steps: Vec<f64>,
    mount_index: usize,
}

impl ActionCycle {
    pub fn new(steps: Vec<f64>, mount_index: usize) -> Result<Self> {
        if steps.is_empty() {
            return Err(MachineError::Configuration("action cycle is empty".into()));
        }
        if steps.iter().any(|s| !s.is_finite()) {
            return Err(MachineError::Configuration(
                "action cycle contains a non-finite step".into(),
            ));
        }
        if mount_index >= steps.len() {
            return Err(MachineError::Configuration(format!(
                "mount index {mount_index} is outside the action cycle of {} steps",
                steps.len()
            )));
        }
        Ok(Self { steps, mount_index })
    }

    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    pub fn mount_index(&self) -> usize {
        self.mount_index
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// First step at or after `start` that actually moves the actuator.
    fn next_moving_step(&self, start: usize) -> Option<(usize, f64)> {
        self.steps
            .iter()
            .copied()
            .enumerate()
            .skip(start)
            .find(|(_, angle)| *angle != 0.0)
    }
}

/// Invoked once when every actuator of a dispense has gone idle.
pub type OnAllComplete = Box<dyn FnOnce() + Send>;

/// Outcome of feeding one completion event into the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepProgress {
    /// Stale or foreign event.
    Ignored,
    /// The actuator moved on to its next step.
    Advanced,
    /// The actuator finished its cycle; others are still running.
    ActuatorIdle,
    /// The last running actuator finished.
    CycleComplete,
}

struct FeederSlot {
    actuator: Box<dyn CountedRotate>,
    cycle: ActionCycle,
    cursor: Option<usize>,
}

pub struct ActionSequencer {
    feeder: usize,
    driver: usize,
    slots: Vec<FeederSlot>,
    epoch: u32,
    completions: Sender<CompletionEvent>,
    on_all_complete: Option<OnAllComplete>,
}

impl fmt::Debug for ActionSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSequencer")
            .field("feeder", &self.feeder)
            .field("driver", &self.driver)
            .field("cursors", &self.cursors())
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl ActionSequencer {
    /// Sequencer for feeder `feeder`, which releases into ball driver `driver`.
    pub fn new(feeder: usize, driver: usize, completions: Sender<CompletionEvent>) -> Self {
        Self {
            feeder,
            driver,
            slots: Vec::new(),
            epoch: 0,
            completions,
            on_all_complete: None,
        }
    }

    pub fn add_actuator(&mut self, actuator: Box<dyn CountedRotate>, cycle: ActionCycle) {
        self.slots.push(FeederSlot {
            actuator,
            cycle,
            cursor: None,
        });
    }

    pub fn feeder(&self) -> usize {
        self.feeder
    }

    pub fn driver(&self) -> usize {
        self.driver
    }

    pub fn actuator_count(&self) -> usize {
        self.slots.len()
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Per-actuator cursor; `None` is idle.
    pub fn cursors(&self) -> Vec<Option<usize>> {
        self.slots.iter().map(|slot| slot.cursor).collect()
    }

    pub fn is_busy(&self) -> bool {
        self.slots.iter().any(|slot| slot.cursor.is_some())
    }

    /// Releases one ball. `on_all_complete` runs once every actuator has
    /// finished its cycle.
    pub fn dispense(&mut self, on_all_complete: OnAllComplete) -> Result<()> {
        if self.is_busy() {
            return Err(MachineError::InvalidOperation(format!(
                "ball feeder {} is still dispensing",
                self.feeder
            )));
        }
        self.epoch = self.epoch.wrapping_add(1);
        self.on_all_complete = None;
        self.start_all(|_| 0)?;
        log::debug!("feeder {} dispensing (epoch {})", self.feeder, self.epoch);

        if self.is_busy() {
            self.on_all_complete = Some(on_all_complete);
        } else {
            // Every cycle was zero steps; nothing will ever signal.
            on_all_complete();
        }
        Ok(())
    }

    /// Moves freshly mounted actuators from their mount position into the
    /// waiting position by running the rest of their cycle.
    pub fn prepare_after_mount(&mut self) -> Result<()> {
        if self.is_busy() {
            return Err(MachineError::InvalidOperation(format!(
                "ball feeder {} is busy",
                self.feeder
            )));
        }
        self.epoch = self.epoch.wrapping_add(1);
        self.on_all_complete = None;
        self.start_all(|cycle| cycle.mount_index() + 1)?;
        log::info!("feeder {} moving to waiting position", self.feeder);
        Ok(())
    }

    /// Hard stop: halts every actuator and forgets all cursors, whatever
    /// the physical position is.
    pub fn stop(&mut self) -> Result<()> {
        self.epoch = self.epoch.wrapping_add(1);
        self.on_all_complete = None;
        let mut first_error = None;
        for slot in &mut self.slots {
            slot.cursor = None;
            if let Err(e) = slot.actuator.stop() {
                log::error!("feeder {} actuator failed to stop: {e}", self.feeder);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Continuation for a finished counted rotation.
    pub fn on_step_complete(&mut self, event: CompletionEvent) -> Result<StepProgress> {
        if event.feeder != self.feeder || event.epoch != self.epoch {
            log::trace!("feeder {} ignoring stale completion {event:?}", self.feeder);
            return Ok(StepProgress::Ignored);
        }
        let Some(cursor) = self.slots.get(event.actuator).and_then(|slot| slot.cursor) else {
            return Ok(StepProgress::Ignored);
        };

        if let Err(e) = self.issue_from(event.actuator, cursor + 1) {
            // Leave nothing half-running behind a failed step.
            self.abandon_after(&e);
            return Err(e.into());
        }
        if self.slots[event.actuator].cursor.is_some() {
            return Ok(StepProgress::Advanced);
        }
        if self.is_busy() {
            return Ok(StepProgress::ActuatorIdle);
        }
        log::debug!("feeder {} cycle complete", self.feeder);
        if let Some(callback) = self.on_all_complete.take() {
            callback();
        }
        Ok(StepProgress::CycleComplete)
    }

    fn start_all(&mut self, first_step: impl Fn(&ActionCycle) -> usize) -> Result<()> {
        for index in 0..self.slots.len() {
            let start = first_step(&self.slots[index].cycle);
            if let Err(e) = self.issue_from(index, start) {
                self.abandon_after(&e);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Hard stop after a failed step. The step error stays the one reported.
    fn abandon_after(&mut self, cause: &ActuatorError) {
        if let Err(e) = self.stop() {
            log::error!(
                "feeder {} not fully stopped after failed step ({cause}): {e}",
                self.feeder
            );
        }
    }

    /// Issues the first moving step at or after `start`; an actuator with no
    /// step left goes idle.
    fn issue_from(&mut self, index: usize, start: usize) -> Result<(), ActuatorError> {
        let slot = &mut self.slots[index];
        let Some((step, angle)) = slot.cycle.next_moving_step(start) else {
            slot.cursor = None;
            return Ok(());
        };
        slot.cursor = Some(step);
        let done = StepCompletion::new(
            self.completions.clone(),
            CompletionEvent {
                feeder: self.feeder,
                actuator: index,
                epoch: self.epoch,
            },
        );
        log::trace!("feeder {} actuator {index} step {step}: {angle}°", self.feeder);
        if let Err(e) = slot.actuator.rotate_by_angle(angle, done) {
            slot.cursor = None;
            return Err(e);
        }
        Ok(())
    }
}
