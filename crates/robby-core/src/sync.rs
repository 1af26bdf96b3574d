//! State shared between the controller thread and external requesters.
//!
//! Requesters only write the requested mode and status, each behind its own
//! lock. The controller is the single writer of the current mode and status,
//! which readers load without locking.

use crate::error::{MachineError, Result};
use crate::shot::{Shot, ShotUpdate};
use crate::solver::SpeedSolver;
use crate::state::{MachineMode, MachineStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Published once per controller loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MachineSnapshot {
    pub timestamp_us: u64,
    pub cycle_count: u64,
    pub cycles_missed: u64,
    pub mode: MachineMode,
    pub status: MachineStatus,
    pub shot_cursor: usize,
    pub balls_released: u64,
    pub shots_skipped: u64,
    /// Zero while the shot timer is disarmed.
    pub armed_frequency_hz: f64,
    pub feeder_busy: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct ControlShared {
    mode: AtomicU8,
    status: AtomicU8,
    requested_mode: Mutex<MachineMode>,
    requested_status: Mutex<MachineStatus>,
    continuous_shot: Mutex<Shot>,
    continuous_changed: AtomicBool,
    feeder_preparation: AtomicBool,
    balls_released: Arc<AtomicU64>,
    /// Copied whole under the lock so readers never see a mix of two publications.
    snapshot: Mutex<MachineSnapshot>,
    /// Drivers a shot may target, with the solver used to fill shot caches.
    solvers: Vec<(usize, SpeedSolver)>,
    min_pause_s: f64,
}

impl ControlShared {
    pub(crate) fn new(
        continuous_shot: Shot,
        solvers: Vec<(usize, SpeedSolver)>,
        min_pause_s: f64,
    ) -> Self {
        let mode = MachineMode::default();
        let status = MachineStatus::default();
        Self {
            mode: AtomicU8::new(mode.code()),
            status: AtomicU8::new(status.code()),
            requested_mode: Mutex::new(mode),
            requested_status: Mutex::new(status),
            continuous_shot: Mutex::new(continuous_shot),
            continuous_changed: AtomicBool::new(false),
            feeder_preparation: AtomicBool::new(false),
            balls_released: Arc::new(AtomicU64::new(0)),
            snapshot: Mutex::new(MachineSnapshot {
                mode,
                status,
                ..MachineSnapshot::default()
            }),
            solvers,
            min_pause_s,
        }
    }

    pub(crate) fn mode(&self) -> MachineMode {
        MachineMode::from_code(self.mode.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub(crate) fn status(&self) -> MachineStatus {
        MachineStatus::from_code(self.status.load(Ordering::Acquire))
            .unwrap_or(MachineStatus::Error)
    }

    pub(crate) fn requested_mode(&self) -> MachineMode {
        *lock(&self.requested_mode)
    }

    pub(crate) fn requested_status(&self) -> MachineStatus {
        *lock(&self.requested_status)
    }

    /// Controller only.
    pub(crate) fn set_status(&self, status: MachineStatus) {
        let previous = self.status.swap(status.code(), Ordering::AcqRel);
        if previous != status.code() {
            log::info!("machine status: {status}");
        }
    }

    /// Controller only: copies the requested mode into the current mode under
    /// the mode lock. Returns the new mode if it changed.
    pub(crate) fn adopt_requested_mode(&self) -> Option<MachineMode> {
        let requested = lock(&self.requested_mode);
        let current = self.mode();
        if *requested == current {
            return None;
        }
        self.mode.store(requested.code(), Ordering::Release);
        log::info!("machine mode: {current} -> {}", *requested);
        Some(*requested)
    }

    fn solver_for(&self, driver: usize) -> Result<&SpeedSolver> {
        self.solvers
            .iter()
            .find(|(index, _)| *index == driver)
            .map(|(_, solver)| solver)
            .ok_or_else(|| {
                MachineError::InputData(format!("ball driver {driver} is not available"))
            })
    }

    pub(crate) fn continuous_shot(&self) -> Shot {
        lock(&self.continuous_shot).clone()
    }

    pub(crate) fn take_continuous_change(&self) -> bool {
        self.continuous_changed.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn take_feeder_preparation(&self) -> bool {
        self.feeder_preparation.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn balls_released(&self) -> &Arc<AtomicU64> {
        &self.balls_released
    }

    pub(crate) fn publish(&self, snapshot: MachineSnapshot) {
        *lock(&self.snapshot) = snapshot;
    }
}

/// External request surface of a running controller. Cheap to clone; safe to
/// call from any thread concurrently with the controller loop.
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<ControlShared>,
}

impl ControlHandle {
    pub(crate) fn new(shared: Arc<ControlShared>) -> Self {
        Self { shared }
    }

    pub fn mode(&self) -> MachineMode {
        self.shared.mode()
    }

    pub fn status(&self) -> MachineStatus {
        self.shared.status()
    }

    pub fn requested_mode(&self) -> MachineMode {
        self.shared.requested_mode()
    }

    pub fn requested_status(&self) -> MachineStatus {
        self.shared.requested_status()
    }

    /// Latest state published by the controller loop.
    pub fn snapshot(&self) -> MachineSnapshot {
        *lock(&self.shared.snapshot)
    }

    pub fn balls_released(&self) -> u64 {
        self.shared.balls_released.load(Ordering::Relaxed)
    }

    /// Records a mode request; only allowed while the machine is idle and no
    /// status change is pending.
    pub fn request_mode_change(&self, mode: MachineMode) -> Result<()> {
        // Lock order: status, then mode.
        let requested_status = lock(&self.shared.requested_status);
        let status = self.shared.status();
        if status != MachineStatus::Idle || *requested_status != MachineStatus::Idle {
            return Err(MachineError::InvalidOperation(format!(
                "mode can only change while idle (status {status}, requested {})",
                *requested_status
            )));
        }
        let mut requested_mode = lock(&self.shared.requested_mode);
        if *requested_mode != mode {
            log::info!("mode change requested: {mode}");
            *requested_mode = mode;
        }
        Ok(())
    }

    /// Records a status request for the controller to reconcile.
    pub fn issue_command(&self, command: MachineStatus) -> Result<()> {
        if !command.is_command() {
            return Err(MachineError::InvalidOperation(format!(
                "{command} is not a command; use Idle, Playing or Paused"
            )));
        }
        let mut requested_status = lock(&self.shared.requested_status);
        let status = self.shared.status();
        if status == MachineStatus::Error {
            return Err(MachineError::InvalidOperation(
                "machine is in error state and must be restarted".into(),
            ));
        }
        if command == MachineStatus::Playing {
            let requested_mode = *lock(&self.shared.requested_mode);
            if self.shared.mode() == MachineMode::Configuration
                || requested_mode == MachineMode::Configuration
            {
                return Err(MachineError::InvalidOperation(
                    "cannot play in Configuration mode".into(),
                ));
            }
        }
        if command != status && *requested_status != command {
            log::info!("command issued: {command}");
            *requested_status = command;
        }
        Ok(())
    }

    /// Changes the shot played in Direct mode. Returns true if a component
    /// was clamped into range.
    pub fn update_continuous_shot(&self, update: ShotUpdate) -> Result<bool> {
        let mut shot = lock(&self.shared.continuous_shot);
        let mut updated = shot.clone();
        let clamped = updated.apply(&update, self.shared.min_pause_s)?;
        let solver = self.shared.solver_for(updated.driver())?;
        updated.speeds_for(solver)?;
        *shot = updated;
        self.shared.continuous_changed.store(true, Ordering::Release);
        Ok(clamped)
    }

    pub fn continuous_shot(&self) -> Shot {
        self.shared.continuous_shot()
    }

    /// Asks the controller to move freshly mounted feeders into their waiting
    /// position. Only in Configuration mode while idle.
    pub fn request_feeder_preparation(&self) -> Result<()> {
        let requested_status = lock(&self.shared.requested_status);
        if self.shared.mode() != MachineMode::Configuration
            || self.shared.status() != MachineStatus::Idle
            || *requested_status != MachineStatus::Idle
        {
            return Err(MachineError::InvalidOperation(
                "feeders can only be prepared in Configuration mode while idle".into(),
            ));
        }
        self.shared.feeder_preparation.store(true, Ordering::Release);
        Ok(())
    }
}
