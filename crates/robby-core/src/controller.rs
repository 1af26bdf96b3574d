//! The machine controller: owns every actuator and drives the machine's
//! actual mode and status toward what external requesters asked for.
//!
//! All hardware calls happen on the thread running [`MachineController::run`]
//! (or calling [`MachineController::tick`]). Requesters talk to it only
//! through a [`ControlHandle`].

use crate::config::MachineConfig;
use crate::driver::BallDriver;
use crate::error::{MachineError, Result};
use crate::hal::CompletionEvent;
use crate::machine::{ActuatorFactory, Machine};
use crate::scheduler::ShotTimer;
use crate::sequencer::StepProgress;
use crate::shot::Shot;
use crate::state::{MachineMode, MachineStatus};
use crate::sync::{ControlHandle, ControlShared, MachineSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Reconciliation period.
    pub tick: Duration,
    /// Pause between releasing a ball and changing driver speeds for the next one.
    /// Blocks the controller thread.
    pub release_settle: Duration,
    /// Loop lateness that triggers an emergency stop.
    pub watchdog_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            release_settle: Duration::from_millis(250),
            watchdog_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Default, Debug)]
pub struct ControllerStats {
    pub cycles_executed: u64,
    pub cycles_missed: u64,
    pub max_lateness_us: u64,
    pub shots_played: u64,
    pub shots_skipped: u64,
    pub stale_completions: u64,
}

pub struct MachineController {
    machine: Machine,
    settings: ControllerSettings,
    shared: Arc<ControlShared>,
    completions: Receiver<CompletionEvent>,
    timer: ShotTimer,
    stats: ControllerStats,
    started: Instant,
    /// Release-settle time spent since the last lateness check; not counted as lateness.
    settled: Duration,
}

impl std::fmt::Debug for MachineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineController")
            .field("settings", &self.settings)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl MachineController {
    /// Assembles the machine and prepares every driver with the default shot.
    pub fn new(
        config: &MachineConfig,
        factory: &mut dyn ActuatorFactory,
        settings: ControllerSettings,
    ) -> Result<Self> {
        if settings.release_settle >= settings.watchdog_timeout {
            return Err(MachineError::during(
                "controller settings",
                MachineError::Configuration(format!(
                    "release settle {:?} must be shorter than the watchdog timeout {:?}",
                    settings.release_settle, settings.watchdog_timeout
                )),
            ));
        }
        let (tx, completions) = mpsc::channel();
        let mut machine = Machine::assemble(config, factory, tx)?;
        let default_shot = machine.default_shot.clone();
        for driver in &mut machine.drivers {
            driver
                .update_current_shot(
                    Some(default_shot.speed()),
                    Some(default_shot.topspin()),
                    Some(default_shot.sidespin()),
                )
                .map_err(|e| MachineError::during("ball driver defaults", e))?;
        }
        let shared = Arc::new(ControlShared::new(
            default_shot,
            machine.playable_solvers(),
            1.0 / machine.max_ball_frequency,
        ));
        Ok(Self {
            machine,
            settings,
            shared,
            completions,
            timer: ShotTimer::new(),
            stats: ControllerStats::default(),
            started: Instant::now(),
            settled: Duration::ZERO,
        })
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle::new(Arc::clone(&self.shared))
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn timer(&self) -> &ShotTimer {
        &self.timer
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn mode(&self) -> MachineMode {
        self.shared.mode()
    }

    pub fn status(&self) -> MachineStatus {
        self.shared.status()
    }

    /// Runs the controller loop until `stop` is set or the watchdog trips,
    /// then shuts the machine down.
    pub fn run(&mut self, stop: &AtomicBool) {
        let tick = self.settings.tick;
        let mut next_tick = Instant::now();
        log::info!("controller loop running every {tick:?}");

        while !stop.load(Ordering::Relaxed) {
            let deadline = self
                .timer
                .next_due()
                .map_or(next_tick, |due| due.min(next_tick));
            let now = Instant::now();
            if now < deadline {
                match self.completions.recv_timeout(deadline - now) {
                    Ok(event) => {
                        if let Err(e) = self.handle_completion(event) {
                            self.fail(&e);
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => thread::sleep(deadline - now),
                }
            }

            let now = Instant::now();
            if now >= next_tick {
                let lateness = now
                    .duration_since(next_tick)
                    .saturating_sub(std::mem::take(&mut self.settled));
                self.stats.max_lateness_us =
                    self.stats.max_lateness_us.max(lateness.as_micros() as u64);
                if lateness > tick {
                    self.stats.cycles_missed += 1;
                    if lateness > self.settings.watchdog_timeout {
                        log::error!("controller loop {lateness:?} late; emergency stop");
                        self.emergency_stop();
                        self.publish(now);
                        break;
                    }
                }
                next_tick += tick;
                if next_tick <= now {
                    next_tick = now + tick;
                }
            }

            if let Err(e) = self.tick(now) {
                log::error!("controller cycle failed: {e}");
            }
        }

        if let Err(e) = self.shutdown() {
            log::error!("shutdown incomplete: {e}");
        }
    }

    /// One loop iteration: completions, shot timer, reconciliation, publication.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        let result = self.cycle(now);
        if let Err(e) = &result {
            self.fail(e);
        }
        self.stats.cycles_executed += 1;
        self.publish(now);
        result
    }

    fn cycle(&mut self, now: Instant) -> Result<()> {
        while let Ok(event) = self.completions.try_recv() {
            self.handle_completion(event)?;
        }
        if self.timer.poll(now) && self.shared.status() == MachineStatus::Playing {
            self.play_shot(now)?;
        }
        self.reconcile(now)
    }

    /// Moves actual mode and status one step toward the requested ones.
    /// Actuator failures put the machine into Error and are returned.
    pub fn reconcile(&mut self, now: Instant) -> Result<()> {
        let result = self.reconcile_requests(now);
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    fn reconcile_requests(&mut self, now: Instant) -> Result<()> {
        let status = self.shared.status();
        if status == MachineStatus::Error {
            return Ok(());
        }

        if let Some(mode) = self.shared.adopt_requested_mode() {
            if mode == MachineMode::Direct {
                let shot = self.shared.continuous_shot();
                self.apply_shot_speeds(&shot)?;
            }
        }
        if self.shared.take_continuous_change() && self.shared.mode() == MachineMode::Direct {
            let shot = self.shared.continuous_shot();
            self.apply_shot_speeds(&shot)?;
        }

        let requested = self.shared.requested_status();
        if requested != status {
            match requested {
                MachineStatus::Idle => self.reconcile_idle(status)?,
                MachineStatus::Paused => self.reconcile_paused(),
                MachineStatus::Playing => self.reconcile_playing(status, now)?,
                other => {
                    return Err(MachineError::Implementation(format!(
                        "{other} was requested as a command"
                    )))
                }
            }
        }

        if self.shared.take_feeder_preparation() {
            self.prepare_feeders();
        }
        Ok(())
    }

    fn reconcile_idle(&mut self, status: MachineStatus) -> Result<()> {
        if status != MachineStatus::Stopping {
            self.shared.set_status(MachineStatus::Stopping);
            self.halt_actuators()?;
            self.timer.disarm();
            self.machine.shot_cycle.reset();
        }
        if !self.machine.any_feeder_busy() {
            self.shared.set_status(MachineStatus::Idle);
        }
        Ok(())
    }

    fn reconcile_paused(&mut self) {
        self.timer.disarm();
        if !self.machine.any_feeder_busy() {
            self.shared.set_status(MachineStatus::Paused);
        }
    }

    fn reconcile_playing(&mut self, status: MachineStatus, now: Instant) -> Result<()> {
        if status != MachineStatus::Preparing {
            self.shared.set_status(MachineStatus::Preparing);
            self.start_actuators()?;
        }
        if !self.machine.any_feeder_busy() {
            self.shared.set_status(MachineStatus::Playing);
            self.begin_playing(now)?;
        }
        Ok(())
    }

    /// Spins the driver up for the first shot and releases it right away.
    fn begin_playing(&mut self, now: Instant) -> Result<()> {
        let shot = self.current_shot()?;
        self.apply_shot_speeds(&shot)?;
        for stirrer in &mut self.machine.stirrers {
            stirrer.start()?;
        }
        self.play_shot(now)
    }

    /// Releases the current ball, then sets up the next shot and its cadence.
    fn play_shot(&mut self, now: Instant) -> Result<()> {
        let mode = self.shared.mode();
        let shot = self.current_shot()?;
        let feeder = self
            .machine
            .feeder_for_driver_mut(shot.driver())
            .ok_or_else(|| {
                MachineError::Implementation(format!(
                    "no feeder releases into ball driver {}",
                    shot.driver()
                ))
            })?;
        if feeder.is_busy() {
            self.stats.shots_skipped += 1;
            log::warn!("feeder {} still busy; shot skipped", feeder.feeder());
            return self.arm_for(&shot, now);
        }
        let released = Arc::clone(self.shared.balls_released());
        feeder.dispense(Box::new(move || {
            released.fetch_add(1, Ordering::Relaxed);
        }))?;
        self.stats.shots_played += 1;

        if !self.settings.release_settle.is_zero() {
            thread::sleep(self.settings.release_settle);
            self.settled += self.settings.release_settle;
        }

        let next = match mode {
            MachineMode::Program => {
                self.machine.shot_cycle.advance_and_get();
                self.machine.shot_cycle.peek_current().clone()
            }
            _ => self.shared.continuous_shot(),
        };
        self.apply_shot_speeds(&next)?;
        self.arm_for(&next, now)
    }

    fn current_shot(&self) -> Result<Shot> {
        match self.shared.mode() {
            MachineMode::Program => Ok(self.machine.shot_cycle.peek_current().clone()),
            MachineMode::Direct => Ok(self.shared.continuous_shot()),
            MachineMode::Configuration => Err(MachineError::Implementation(
                "no shot to play in Configuration mode".into(),
            )),
        }
    }

    fn arm_for(&mut self, shot: &Shot, now: Instant) -> Result<()> {
        let frequency = shot.frequency_hz().min(self.machine.max_ball_frequency);
        if self.timer.frequency_hz() != Some(frequency) {
            self.timer.arm(frequency, now)?;
        }
        Ok(())
    }

    fn apply_shot_speeds(&mut self, shot: &Shot) -> Result<()> {
        apply_shot_speeds(&mut self.machine.drivers, shot)
    }

    fn start_actuators(&mut self) -> Result<()> {
        for driver in &mut self.machine.drivers {
            driver.start()?;
        }
        for stirrer in &mut self.machine.stirrers {
            stirrer.start()?;
        }
        Ok(())
    }

    /// Stops every driver and stirrer, attempting all of them.
    fn halt_actuators(&mut self) -> Result<()> {
        let mut first_error = None;
        for driver in &mut self.machine.drivers {
            if let Err(e) = driver.stop() {
                first_error.get_or_insert(e);
            }
        }
        for stirrer in &mut self.machine.stirrers {
            if let Err(e) = stirrer.stop() {
                log::error!("stirrer failed to stop: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn prepare_feeders(&mut self) {
        if self.shared.mode() != MachineMode::Configuration
            || self.shared.status() != MachineStatus::Idle
        {
            log::warn!("feeder preparation dropped: machine is no longer idle in Configuration");
            return;
        }
        for feeder in &mut self.machine.feeders {
            if let Err(e) = feeder.prepare_after_mount() {
                log::warn!("feeder {} not prepared: {e}", feeder.feeder());
            }
        }
    }

    fn handle_completion(&mut self, event: CompletionEvent) -> Result<()> {
        let progress = match self.machine.feeder_mut(event.feeder) {
            Some(feeder) => feeder.on_step_complete(event)?,
            None => StepProgress::Ignored,
        };
        if progress == StepProgress::Ignored {
            self.stats.stale_completions += 1;
        }
        Ok(())
    }

    fn fail(&mut self, error: &MachineError) {
        self.timer.disarm();
        if self.shared.status() != MachineStatus::Error {
            log::error!("machine error: {error}");
            self.shared.set_status(MachineStatus::Error);
        }
    }

    /// Hard-stops everything and enters Error.
    pub fn emergency_stop(&mut self) {
        self.timer.disarm();
        if let Err(e) = self.halt_actuators() {
            log::error!("emergency stop incomplete: {e}");
        }
        for feeder in &mut self.machine.feeders {
            if let Err(e) = feeder.stop() {
                log::error!("feeder {} not stopped during emergency stop: {e}", feeder.feeder());
            }
        }
        self.shared.set_status(MachineStatus::Error);
    }

    /// Leaves every actuator stopped. Feeders are hard-stopped.
    pub fn shutdown(&mut self) -> Result<()> {
        self.timer.disarm();
        let mut result = self.halt_actuators();
        for feeder in &mut self.machine.feeders {
            if let Err(e) = feeder.stop() {
                result = result.and(Err(e));
            }
        }
        log::info!("controller shut down after {} cycles", self.stats.cycles_executed);
        result
    }

    fn publish(&self, now: Instant) {
        self.shared.publish(MachineSnapshot {
            timestamp_us: now.saturating_duration_since(self.started).as_micros() as u64,
            cycle_count: self.stats.cycles_executed,
            cycles_missed: self.stats.cycles_missed,
            mode: self.shared.mode(),
            status: self.shared.status(),
            shot_cursor: self.machine.shot_cycle.cursor(),
            balls_released: self.shared.balls_released().load(Ordering::Relaxed),
            shots_skipped: self.stats.shots_skipped,
            armed_frequency_hz: self.timer.frequency_hz().unwrap_or(0.0),
            feeder_busy: self.machine.any_feeder_busy(),
        });
    }
}

fn apply_shot_speeds(drivers: &mut [BallDriver], shot: &Shot) -> Result<()> {
    let driver = drivers
        .iter_mut()
        .find(|d| d.index() == shot.driver())
        .ok_or_else(|| {
            MachineError::InputData(format!("ball driver {} is not available", shot.driver()))
        })?;
    let speeds = shot.speeds_for(driver.solver())?;
    driver.apply_speeds(shot.motion()?, &speeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShotConfig;
    use crate::hal_sim::SimulatedHardware;
    use crate::shot::ShotUpdate;

    struct Bench {
        controller: MachineController,
        hardware: SimulatedHardware,
        handle: ControlHandle,
        start: Instant,
    }

    impl Bench {
        fn new(config: MachineConfig) -> Self {
            let mut hardware = SimulatedHardware::new();
            let settings = ControllerSettings {
                release_settle: Duration::ZERO,
                ..ControllerSettings::default()
            };
            let controller = MachineController::new(&config, &mut hardware, settings).unwrap();
            let handle = controller.handle();
            Self {
                controller,
                hardware,
                handle,
                start: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.start + Duration::from_millis(ms)
        }

        fn tick(&mut self, ms: u64) -> Result<()> {
            let now = self.at(ms);
            self.controller.tick(now)
        }

        /// Completes feeder rotations until every feeder is idle.
        fn finish_release(&mut self, ms: u64) {
            loop {
                let mut any = false;
                for monitor in self.hardware.feeder_stepper_monitors() {
                    any |= monitor.complete_pending();
                }
                self.tick(ms).unwrap();
                if !any {
                    break;
                }
            }
        }

        fn motor_outputs(&self) -> Vec<i32> {
            self.hardware
                .all_driver_motor_monitors()
                .map(|p| p.speed())
                .collect()
        }

        fn stirrers_running(&self) -> bool {
            self.hardware.stirrer_monitors().iter().any(|s| s.is_running())
        }

        fn start_playing(&mut self, mode: MachineMode) {
            self.handle.request_mode_change(mode).unwrap();
            self.tick(0).unwrap();
            self.handle.issue_command(MachineStatus::Playing).unwrap();
            self.tick(100).unwrap();
        }
    }

    fn shot(speed: f64, topspin: f64, pause: f64) -> ShotConfig {
        ShotConfig {
            speed,
            topspin,
            sidespin: 0.0,
            pause,
            h_angle: 0.0,
            v_angle: 0.0,
            bd_number: 0,
        }
    }

    fn two_shot_program() -> MachineConfig {
        let mut config = MachineConfig::default();
        config.shot_cycle = vec![shot(0.5, 0.0, 2.0), shot(1.0, 1.0, 4.0)];
        config
    }

    #[test]
    fn starts_idle_in_configuration_with_drivers_at_rest() {
        let bench = Bench::new(MachineConfig::default());
        assert_eq!(bench.controller.status(), MachineStatus::Idle);
        assert_eq!(bench.controller.mode(), MachineMode::Configuration);
        assert_eq!(bench.motor_outputs(), vec![0, 0]);
        assert!(!bench.controller.timer().is_armed());
    }

    #[test]
    fn idle_playing_idle_cycle() {
        let mut bench = Bench::new(two_shot_program());
        bench.start_playing(MachineMode::Program);

        assert_eq!(bench.controller.status(), MachineStatus::Playing);
        assert!(bench.stirrers_running());
        // First shot released; the driver already runs the second one.
        assert_eq!(bench.motor_outputs(), vec![100, 0]);
        assert_eq!(bench.controller.machine().shot_cycle.cursor(), 1);
        assert_eq!(bench.controller.timer().frequency_hz(), Some(0.25));
        assert!(bench.controller.machine().any_feeder_busy());

        bench.finish_release(200);
        assert_eq!(bench.handle.balls_released(), 1);

        bench.handle.issue_command(MachineStatus::Idle).unwrap();
        bench.tick(300).unwrap();
        assert_eq!(bench.controller.status(), MachineStatus::Idle);
        assert_eq!(bench.motor_outputs(), vec![0, 0]);
        assert!(!bench.stirrers_running());
        assert!(!bench.controller.timer().is_armed());
        assert_eq!(bench.controller.machine().shot_cycle.cursor(), 0);
        assert_eq!(bench.handle.snapshot().status, MachineStatus::Idle);
    }

    #[test]
    fn stopping_waits_for_feeder_to_finish() {
        let mut bench = Bench::new(two_shot_program());
        bench.start_playing(MachineMode::Program);
        bench.handle.issue_command(MachineStatus::Idle).unwrap();
        bench.tick(200).unwrap();

        assert_eq!(bench.controller.status(), MachineStatus::Stopping);
        assert_eq!(bench.motor_outputs(), vec![0, 0]);
        assert!(!bench.controller.timer().is_armed());

        bench.finish_release(300);
        assert_eq!(bench.controller.status(), MachineStatus::Idle);
        assert_eq!(bench.handle.balls_released(), 1);
    }

    #[test]
    fn timer_beat_plays_next_shot_and_rearms_on_cadence_change() {
        let mut bench = Bench::new(two_shot_program());
        bench.start_playing(MachineMode::Program);
        bench.finish_release(200);

        // Second shot is due 4 s after the first one.
        bench.tick(4_000).unwrap();
        assert_eq!(bench.handle.balls_released(), 1);
        bench.tick(4_100).unwrap();
        assert!(bench.controller.machine().any_feeder_busy());
        assert_eq!(bench.controller.machine().shot_cycle.cursor(), 0);
        assert_eq!(bench.motor_outputs(), vec![50, 50]);
        assert_eq!(bench.controller.timer().frequency_hz(), Some(0.5));
        assert_eq!(
            bench.controller.timer().next_due(),
            Some(bench.at(6_100))
        );

        bench.finish_release(4_200);
        assert_eq!(bench.handle.balls_released(), 2);
    }

    #[test]
    fn busy_feeder_skips_the_beat() {
        let mut bench = Bench::new(two_shot_program());
        bench.start_playing(MachineMode::Program);
        bench.tick(4_100).unwrap();

        assert_eq!(bench.controller.stats().shots_skipped, 1);
        assert_eq!(bench.controller.machine().shot_cycle.cursor(), 1);
        assert_eq!(bench.handle.snapshot().shots_skipped, 1);
        assert_eq!(bench.controller.status(), MachineStatus::Playing);
    }

    #[test]
    fn mode_change_refused_while_playing() {
        let mut bench = Bench::new(MachineConfig::default());
        bench.start_playing(MachineMode::Program);
        assert!(matches!(
            bench.handle.request_mode_change(MachineMode::Direct),
            Err(MachineError::InvalidOperation(_))
        ));
        assert_eq!(bench.handle.requested_mode(), MachineMode::Program);
        bench.tick(200).unwrap();
        assert_eq!(bench.controller.mode(), MachineMode::Program);
    }

    #[test]
    fn pause_disarms_timer_but_keeps_drivers_running() {
        let mut bench = Bench::new(two_shot_program());
        bench.start_playing(MachineMode::Program);
        bench.handle.issue_command(MachineStatus::Paused).unwrap();
        bench.tick(200).unwrap();
        assert_eq!(bench.controller.status(), MachineStatus::Playing);
        assert!(!bench.controller.timer().is_armed());

        bench.finish_release(300);
        assert_eq!(bench.controller.status(), MachineStatus::Paused);
        assert_eq!(bench.motor_outputs(), vec![100, 0]);

        bench.handle.issue_command(MachineStatus::Playing).unwrap();
        bench.tick(400).unwrap();
        assert_eq!(bench.controller.status(), MachineStatus::Playing);
        assert!(bench.controller.timer().is_armed());
        assert_eq!(bench.handle.snapshot().shot_cursor, 0);
    }

    #[test]
    fn direct_mode_plays_continuous_shot() {
        let mut bench = Bench::new(MachineConfig::default());
        bench.handle.request_mode_change(MachineMode::Direct).unwrap();
        bench.tick(0).unwrap();
        bench
            .handle
            .update_continuous_shot(ShotUpdate {
                speed: Some(0.5),
                pause_s: Some(2.0),
                ..ShotUpdate::default()
            })
            .unwrap();
        bench.tick(50).unwrap();
        // Buffered while the driver is stopped.
        assert_eq!(bench.motor_outputs(), vec![0, 0]);

        bench.handle.issue_command(MachineStatus::Playing).unwrap();
        bench.tick(100).unwrap();
        assert_eq!(bench.motor_outputs(), vec![50, 50]);
        assert_eq!(bench.controller.timer().frequency_hz(), Some(0.5));

        bench
            .handle
            .update_continuous_shot(ShotUpdate {
                topspin: Some(1.0),
                ..ShotUpdate::default()
            })
            .unwrap();
        bench.tick(200).unwrap();
        assert_eq!(bench.motor_outputs(), vec![100, -33]);
    }

    #[test]
    fn entering_direct_mode_applies_continuous_shot() {
        let mut bench = Bench::new(MachineConfig::default());
        bench
            .handle
            .update_continuous_shot(ShotUpdate {
                speed: Some(0.5),
                topspin: Some(1.0),
                ..ShotUpdate::default()
            })
            .unwrap();
        let shot = bench.handle.continuous_shot();
        let expected = shot.cached_speeds().unwrap().clone();
        assert_eq!(expected.as_slice(), &[100, -33]);
        assert_ne!(bench.controller.machine().drivers[0].speeds(), &expected);

        bench.handle.request_mode_change(MachineMode::Direct).unwrap();
        bench.tick(0).unwrap();
        assert_eq!(bench.controller.mode(), MachineMode::Direct);
        let driver = &bench.controller.machine().drivers[0];
        assert_eq!(driver.speeds(), &expected);
        assert_eq!(driver.motion(), shot.motion().unwrap());
        // Not running yet, so nothing reaches the motors.
        assert_eq!(bench.motor_outputs(), vec![0, 0]);
    }

    #[test]
    fn settle_delay_must_be_shorter_than_watchdog() {
        let settings = ControllerSettings {
            release_settle: Duration::from_secs(2),
            ..ControllerSettings::default()
        };
        let err = MachineController::new(
            &MachineConfig::default(),
            &mut SimulatedHardware::new(),
            settings,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MachineError::Initialization {
                stage: "controller settings",
                ..
            }
        ));
    }

    #[test]
    fn settle_delay_is_not_loop_lateness() {
        let settings = ControllerSettings {
            tick: Duration::from_millis(20),
            release_settle: Duration::from_millis(150),
            watchdog_timeout: Duration::from_millis(200),
        };
        let mut hardware = SimulatedHardware::new();
        let mut controller =
            MachineController::new(&MachineConfig::default(), &mut hardware, settings).unwrap();
        let handle = controller.handle();
        let stop = Arc::new(AtomicBool::new(false));
        let runner = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                controller.run(&stop);
                controller
            })
        };

        handle.request_mode_change(MachineMode::Program).unwrap();
        while handle.mode() != MachineMode::Program {
            thread::sleep(Duration::from_millis(5));
        }
        handle.issue_command(MachineStatus::Playing).unwrap();
        thread::sleep(Duration::from_millis(400));
        stop.store(true, Ordering::Relaxed);
        let controller = runner.join().unwrap();

        assert_eq!(controller.stats().shots_played, 1);
        assert_ne!(controller.status(), MachineStatus::Error);
        assert!(controller.stats().max_lateness_us < 100_000);
    }

    #[test]
    fn actuator_failure_enters_terminal_error() {
        let mut bench = Bench::new(MachineConfig::default());
        bench.start_playing(MachineMode::Program);
        bench.hardware.driver_motor_monitors(0)[0].inject_fault(true);

        bench.handle.issue_command(MachineStatus::Idle).unwrap();
        assert!(matches!(
            bench.tick(200),
            Err(MachineError::Actuator(_))
        ));
        assert_eq!(bench.controller.status(), MachineStatus::Error);
        assert!(bench.handle.issue_command(MachineStatus::Playing).is_err());
        bench.tick(300).unwrap();
        assert_eq!(bench.controller.status(), MachineStatus::Error);
        assert_eq!(bench.handle.snapshot().status, MachineStatus::Error);
    }

    #[test]
    fn feeders_prepared_in_configuration_mode() {
        let mut bench = Bench::new(MachineConfig::default());
        bench.handle.request_feeder_preparation().unwrap();
        bench.tick(0).unwrap();
        let monitor = &bench.hardware.feeder_stepper_monitors()[0];
        assert_eq!(monitor.pending_angle(), Some(-80.0));
        bench.finish_release(100);
        assert!(!bench.controller.machine().any_feeder_busy());
        assert_eq!(bench.handle.balls_released(), 0);
    }

    #[test]
    fn shutdown_stops_everything() {
        let mut bench = Bench::new(two_shot_program());
        bench.start_playing(MachineMode::Program);
        bench.controller.shutdown().unwrap();
        assert_eq!(bench.motor_outputs(), vec![0, 0]);
        assert!(!bench.stirrers_running());
        assert!(!bench.controller.machine().any_feeder_busy());
        assert!(!bench.hardware.feeder_stepper_monitors()[0].is_rotating());
    }
}
