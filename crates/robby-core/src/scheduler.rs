//! Periodic shot timer.
//!
//! The timer never runs code on its own: the controller loop asks it when
//! the next beat is due and polls it, so every shot is played from the
//! thread that owns the hardware.

use crate::error::{MachineError, Result};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct ShotTimer {
    armed: Option<Armed>,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    frequency_hz: f64,
    period: Duration,
    next_due: Instant,
}

impl ShotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) the timer; the first beat is one period after `now`.
    pub fn arm(&mut self, frequency_hz: f64, now: Instant) -> Result<()> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(MachineError::InputData(format!(
                "timer frequency must be positive, got {frequency_hz}"
            )));
        }
        let period = Duration::from_secs_f64(1.0 / frequency_hz);
        self.armed = Some(Armed {
            frequency_hz,
            period,
            next_due: now + period,
        });
        log::debug!("shot timer armed at {frequency_hz:.3} Hz");
        Ok(())
    }

    pub fn disarm(&mut self) {
        if self.armed.take().is_some() {
            log::debug!("shot timer disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn frequency_hz(&self) -> Option<f64> {
        self.armed.map(|a| a.frequency_hz)
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.armed.map(|a| a.next_due)
    }

    /// True once per elapsed period. A late poll fires a single beat; beats
    /// missed entirely are dropped instead of played back to back.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(armed) = self.armed.as_mut() else {
            return false;
        };
        if now < armed.next_due {
            return false;
        }
        armed.next_due += armed.period;
        if armed.next_due <= now {
            armed.next_due = now + armed.period;
        }
        true
    }
}
