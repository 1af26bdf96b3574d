use crate::infra::audit::{spawn_audit_watcher, AuditEventType, AuditLogger};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use robby_core::{
    ControlHandle, ControllerSettings, MachineConfig, MachineController, MachineError, MachineMode,
    MachineStatus, SimulatedHardware,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// How long a requested transition may take before the runtime gives up on it.
const TRANSITION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Machine(#[from] MachineError),
    #[error("failed to initialize logging: {0}")]
    Logging(#[source] io::Error),
    #[error("failed to open audit log {}: {source}", .path.display())]
    Audit { path: PathBuf, source: io::Error },
    #[error("failed to create metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("{0} thread panicked")]
    ThreadPanic(&'static str),
}

pub fn run_from_args() -> ExitCode {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "ttrobby stopped");
            eprintln!("ttrobby: {e}");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    let _log_guard = init_tracing(config.json_logs, config.log_file.as_deref())
        .map_err(AppError::Logging)?;

    let machine_config = match &config.config_path {
        Some(path) => {
            info!(path = %path.display(), "Loading machine configuration");
            MachineConfig::load(path)?
        }
        None => {
            info!("Using built-in machine configuration");
            MachineConfig::default()
        }
    };
    if let Some(path) = &config.save_config {
        machine_config.save(path)?;
        info!(path = %path.display(), "Machine configuration saved");
    }

    let metrics = telemetry::init()?;
    let metrics_enabled = config.metrics_addr.is_some();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr, &metrics);

    let audit_logger = init_audit_logger(config.audit_path.as_ref())?;

    let settings = ControllerSettings {
        tick: Duration::from_millis(config.tick_ms),
        release_settle: Duration::from_millis(config.release_settle_ms),
        ..ControllerSettings::default()
    };
    let mut hardware = SimulatedHardware::new();
    let mut controller = match MachineController::new(&machine_config, &mut hardware, settings) {
        Ok(controller) => controller,
        Err(e) => {
            error!(error = %e, "Machine could not be initialized");
            if let Some(logger) = &audit_logger {
                let _ = logger.log_event(
                    AuditEventType::ControllerError,
                    serde_json::json!({ "stage": "initialization", "error": e.to_string() }),
                );
            }
            return Err(e.into());
        }
    };
    for e in &controller.machine().init_errors {
        warn!(error = %e, "Machine runs without a configured component");
    }
    let handle = controller.handle();
    let bench = hardware.bench();

    if let Some(logger) = &audit_logger {
        let _ = logger.log_event(
            AuditEventType::SystemStart,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "ball_drivers": controller.machine().drivers.len(),
                "feeders": controller.machine().feeders.len(),
                "shots": controller.machine().shot_cycle.len(),
                "init_errors": controller.machine().init_errors.len(),
                "metrics_enabled": metrics_enabled,
            }),
        );
    }

    let stop = Arc::new(AtomicBool::new(false));

    info!(
        tick_ms = config.tick_ms,
        release_settle_ms = config.release_settle_ms,
        "Starting machine controller"
    );
    let stop_controller = Arc::clone(&stop);
    let controller_handle = thread::spawn(move || {
        controller.run(&stop_controller);
        controller.stats().clone()
    });

    let stop_bench = Arc::clone(&stop);
    let sim_step = Duration::from_millis(config.sim_step_ms);
    let bench_handle = thread::spawn(move || {
        while !stop_bench.load(Ordering::Relaxed) {
            bench.step(sim_step.as_secs_f64());
            thread::sleep(sim_step);
        }
    });

    let updater_handle =
        telemetry::start_metrics_updater(Arc::clone(&metrics), handle.clone(), Arc::clone(&stop));
    let audit_handle = audit_logger.as_ref().map(|logger| {
        spawn_audit_watcher(
            Arc::clone(logger),
            handle.clone(),
            Arc::clone(&stop),
            Duration::from_millis(20),
        )
    });

    if let Some(mode) = config.autoplay {
        if let Err(e) = autoplay(&handle, mode) {
            warn!(error = %e, mode = %mode, "Autoplay failed");
        }
    }

    info!("ttrobby running");

    let Some(seconds) = config.run_seconds else {
        let _ = controller_handle.join();
        return Ok(());
    };

    info!(seconds, "Running for limited duration");
    thread::sleep(Duration::from_secs(seconds));
    wind_down(&handle);
    stop.store(true, Ordering::Relaxed);

    let stats = controller_handle
        .join()
        .map_err(|_| AppError::ThreadPanic("controller"))?;
    bench_handle
        .join()
        .map_err(|_| AppError::ThreadPanic("simulation"))?;
    let _ = updater_handle.join();
    if let Some(handle) = audit_handle {
        let _ = handle.join();
    }

    info!(
        cycles_executed = stats.cycles_executed,
        cycles_missed = stats.cycles_missed,
        shots_played = stats.shots_played,
        shots_skipped = stats.shots_skipped,
        max_lateness_us = stats.max_lateness_us,
        "Run complete"
    );

    if let Some(logger) = &audit_logger {
        let _ = logger.log_event(
            AuditEventType::SystemShutdown,
            serde_json::json!({
                "cycles_executed": stats.cycles_executed,
                "cycles_missed": stats.cycles_missed,
                "shots_played": stats.shots_played,
                "shots_skipped": stats.shots_skipped,
                "balls_released": handle.balls_released(),
                "final_status": handle.status().label(),
            }),
        );
    }
    Ok(())
}

/// Selects `mode` and starts playing once the controller has adopted it.
fn autoplay(handle: &ControlHandle, mode: MachineMode) -> Result<(), MachineError> {
    handle.request_mode_change(mode)?;
    if !wait_until(|| handle.mode() == mode) {
        return Err(MachineError::InvalidOperation(format!(
            "controller did not adopt {mode} within {TRANSITION_TIMEOUT:?}"
        )));
    }
    handle.issue_command(MachineStatus::Playing)?;
    info!(mode = %mode, "Autoplay started");
    Ok(())
}

/// Stops playing and waits until the published state shows the machine idle.
fn wind_down(handle: &ControlHandle) {
    match handle.status() {
        MachineStatus::Idle | MachineStatus::Error => return,
        _ => {}
    }
    if let Err(e) = handle.issue_command(MachineStatus::Idle) {
        warn!(error = %e, "Could not stop playing");
        return;
    }
    if !wait_until(|| handle.snapshot().status == MachineStatus::Idle) {
        warn!(status = %handle.status(), "Machine did not become idle before shutdown");
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TRANSITION_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn init_audit_logger(audit_path: Option<&PathBuf>) -> Result<Option<Arc<AuditLogger>>, AppError> {
    audit_path
        .map(|path| match AuditLogger::new(path) {
            Ok(logger) => {
                info!(path = %path.display(), "Audit logging enabled");
                Ok(Arc::new(logger))
            }
            Err(source) => Err(AppError::Audit {
                path: path.clone(),
                source,
            }),
        })
        .transpose()
}
