//! Actuator capability set consumed by the launcher core.
//!
//! Hardware collaborators implement only the capabilities they physically
//! have; the core never inspects concrete actuator types.

use crate::error::ActuatorError;
use std::sync::mpsc::Sender;

/// Identifies which sequencer slot a counted rotation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    pub feeder: usize,
    pub actuator: usize,
    pub epoch: u32,
}

/// One-shot continuation handed to [`CountedRotate::rotate_by_angle`].
///
/// `signal` only enqueues the event and returns, so it is safe to call from an
/// interrupt-like completion context.
#[derive(Debug, Clone)]
pub struct StepCompletion {
    sender: Sender<CompletionEvent>,
    event: CompletionEvent,
}

impl StepCompletion {
    pub fn new(sender: Sender<CompletionEvent>, event: CompletionEvent) -> Self {
        Self { sender, event }
    }

    pub fn event(&self) -> CompletionEvent {
        self.event
    }

    pub fn signal(self) {
        // The receiver only disappears when the controller is gone.
        let _ = self.sender.send(self.event);
    }
}

pub trait ImmediateStop: Send {
    /// Halts signal output immediately.
    fn stop(&mut self) -> Result<(), ActuatorError>;
}

pub trait CountedRotate: ImmediateStop {
    /// Starts an asynchronous rotation; `done` is signalled exactly once when
    /// the commanded step count has elapsed. A zero angle is a no-op and never
    /// signals. Fails with [`ActuatorError::Busy`] while a rotation is running.
    fn rotate_by_angle(
        &mut self,
        angle_deg: f64,
        done: StepCompletion,
    ) -> Result<(), ActuatorError>;

    fn is_rotating(&self) -> bool;
}

pub trait ContinuousRotate: ImmediateStop {
    /// Starts uncounted rotation until [`ImmediateStop::stop`]; the sign sets direction.
    fn rotate(&mut self, speed_norm: f64) -> Result<(), ActuatorError>;
}

pub trait SpeedControl: ImmediateStop {
    /// Sets continuous drive output in percent, -100..=100.
    fn set_speed(&mut self, percent: i32) -> Result<(), ActuatorError>;
}
