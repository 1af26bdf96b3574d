//! Audit logging for machine events.
//!
//! Persistent JSONL trail of mode and status transitions, controller
//! failures, and process start and shutdown.

use robby_core::{ControlHandle, MachineSnapshot, MachineStatus};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Types of events that are logged in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// System startup
    SystemStart,
    /// Machine adopted a new mode
    ModeChange,
    /// Machine status moved
    StatusChange,
    /// Controller entered the error state or could not be built
    ControllerError,
    /// System shutdown
    SystemShutdown,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic timestamp in microseconds since process start
    pub timestamp_us: u64,
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: u64,
    pub event_type: AuditEventType,
    pub details: serde_json::Value,
}

/// Thread-safe audit logger that writes to a JSONL file
pub struct AuditLogger {
    writer: Mutex<BufWriter<File>>,
    started: Instant,
}

impl AuditLogger {
    /// Create a new audit logger writing to the specified path.
    /// The file is opened in append mode to preserve existing logs.
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
            started: Instant::now(),
        })
    }

    /// Log an audit entry. This is thread-safe and can be called from any thread.
    pub fn log(&self, entry: AuditEntry) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit writer lock poisoned"))?;
        serde_json::to_writer(&mut *writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    /// Stamps and logs an event.
    pub fn log_event(
        &self,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> io::Result<()> {
        self.log(AuditEntry {
            timestamp_us: self.started.elapsed().as_micros() as u64,
            unix_us: unix_us(),
            event_type,
            details,
        })
    }
}

fn unix_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Audit events implied by moving from one published snapshot to the next.
pub fn transitions(
    previous: &MachineSnapshot,
    current: &MachineSnapshot,
) -> Vec<(AuditEventType, serde_json::Value)> {
    let mut events = Vec::new();
    if previous.mode != current.mode {
        events.push((
            AuditEventType::ModeChange,
            serde_json::json!({
                "from": previous.mode.label(),
                "to": current.mode.label(),
            }),
        ));
    }
    if previous.status != current.status {
        events.push((
            AuditEventType::StatusChange,
            serde_json::json!({
                "from": previous.status.label(),
                "to": current.status.label(),
                "mode": current.mode.label(),
                "balls_released": current.balls_released,
            }),
        ));
        if current.status == MachineStatus::Error {
            events.push((
                AuditEventType::ControllerError,
                serde_json::json!({
                    "from": previous.status.label(),
                    "cycle_count": current.cycle_count,
                }),
            ));
        }
    }
    events
}

/// Polls the published machine state and records every transition until
/// `stop` is set. The state seen after `stop` is still recorded.
pub fn spawn_audit_watcher(
    logger: Arc<AuditLogger>,
    handle: ControlHandle,
    stop: Arc<AtomicBool>,
    poll: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut previous = handle.snapshot();
        loop {
            let stopping = stop.load(Ordering::Relaxed);
            let current = handle.snapshot();
            for (event_type, details) in transitions(&previous, &current) {
                if let Err(e) = logger.log_event(event_type, details) {
                    tracing::warn!(error = %e, "Failed to write audit entry");
                }
            }
            previous = current;
            if stopping {
                break;
            }
            thread::sleep(poll);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use robby_core::MachineMode;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_audit_logger_writes_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");

        let logger = AuditLogger::new(&path).unwrap();

        logger
            .log_event(
                AuditEventType::SystemStart,
                serde_json::json!({"version": "0.1.0"}),
            )
            .unwrap();

        logger
            .log_event(
                AuditEventType::StatusChange,
                serde_json::json!({"from": "Idle", "to": "Playing"}),
            )
            .unwrap();

        let mut content = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();

        let lines: Vec<&str> = content.trim().split('\n').collect();
        assert_eq!(lines.len(), 2);

        let entry1: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry1.event_type, AuditEventType::SystemStart);
        assert!(entry1.unix_us > 0);

        let entry2: AuditEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(entry2.event_type, AuditEventType::StatusChange);
        assert_eq!(entry2.details["to"], "Playing");
        assert!(entry2.timestamp_us >= entry1.timestamp_us);
        assert!(lines[1].contains("\"status_change\""));
    }

    #[test]
    fn transitions_report_mode_and_status() {
        let idle = MachineSnapshot {
            mode: MachineMode::Configuration,
            status: MachineStatus::Idle,
            ..MachineSnapshot::default()
        };
        assert!(transitions(&idle, &idle).is_empty());

        let playing = MachineSnapshot {
            mode: MachineMode::Program,
            status: MachineStatus::Playing,
            ..idle
        };
        let events = transitions(&idle, &playing);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, AuditEventType::ModeChange);
        assert_eq!(events[0].1["to"], "Program");
        assert_eq!(events[1].0, AuditEventType::StatusChange);
        assert_eq!(events[1].1["from"], "Idle");
    }

    #[test]
    fn entering_error_is_a_controller_error() {
        let playing = MachineSnapshot {
            mode: MachineMode::Program,
            status: MachineStatus::Playing,
            ..MachineSnapshot::default()
        };
        let failed = MachineSnapshot {
            status: MachineStatus::Error,
            ..playing
        };
        let kinds: Vec<_> = transitions(&playing, &failed)
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(
            kinds,
            vec![AuditEventType::StatusChange, AuditEventType::ControllerError]
        );
    }
}
