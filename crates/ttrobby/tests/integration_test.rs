use std::fs;
use std::path::Path;
use std::process::Command;

fn binary() -> String {
    // Prefer the test-built binary when available to avoid extra cargo builds.
    std::env::var("CARGO_BIN_EXE_ttrobby").unwrap_or_else(|_| {
        let candidates = [
            "../../target/release/ttrobby",
            "target/release/ttrobby",
            "../../target/debug/ttrobby",
            "target/debug/ttrobby",
        ];
        for candidate in candidates {
            if Path::new(candidate).exists() {
                return candidate.to_string();
            }
        }
        panic!(
            "Failed to locate ttrobby binary. \
             Expected CARGO_BIN_EXE_ttrobby or a build in target/{{release,debug}}/ttrobby."
        );
    })
}

fn audit_entries(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .expect("audit log was not written")
        .lines()
        .map(|line| serde_json::from_str(line).expect("audit line is not JSON"))
        .collect()
}

fn status_changes_to(entries: &[serde_json::Value], status: &str) -> usize {
    entries
        .iter()
        .filter(|e| e["event_type"] == "status_change" && e["details"]["to"] == status)
        .count()
}

#[test]
fn autoplay_program_runs_and_stops_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");

    let output = Command::new(binary())
        .args([
            "--run-seconds",
            "2",
            "--autoplay",
            "program",
            "--tick-ms",
            "20",
            "--release-settle-ms",
            "0",
            "--audit-log",
        ])
        .arg(&audit)
        .output()
        .expect("Failed to start ttrobby");
    assert!(
        output.status.success(),
        "ttrobby failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let entries = audit_entries(&audit);
    assert_eq!(entries.first().unwrap()["event_type"], "system_start");
    assert_eq!(entries.last().unwrap()["event_type"], "system_shutdown");
    assert!(entries
        .iter()
        .any(|e| e["event_type"] == "mode_change" && e["details"]["to"] == "Program"));
    assert_eq!(status_changes_to(&entries, "Playing"), 1);
    assert!(status_changes_to(&entries, "Idle") >= 1);
    assert!(!entries.iter().any(|e| e["event_type"] == "controller_error"));
    assert_eq!(entries.last().unwrap()["details"]["final_status"], "Idle");
}

#[test]
fn saved_configuration_can_be_loaded_back() {
    let dir = tempfile::tempdir().unwrap();
    let saved = dir.path().join("machine.json");

    let status = Command::new(binary())
        .args(["--run-seconds", "0", "--save-config"])
        .arg(&saved)
        .status()
        .expect("Failed to start ttrobby");
    assert!(status.success());

    let document: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&saved).unwrap()).unwrap();
    assert!(document["balldrivers"].is_array());

    let status = Command::new(binary())
        .args(["--run-seconds", "0", "--config"])
        .arg(&saved)
        .status()
        .expect("Failed to start ttrobby");
    assert!(status.success());
}

#[test]
fn unusable_machine_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("machine.json");
    fs::write(&config, r#"{"balldrivers": [], "ballfeeders": []}"#).unwrap();
    let audit = dir.path().join("audit.jsonl");

    let output = Command::new(binary())
        .args(["--run-seconds", "1", "--config"])
        .arg(&config)
        .arg("--audit-log")
        .arg(&audit)
        .output()
        .expect("Failed to start ttrobby");
    assert!(!output.status.success());

    let entries = audit_entries(&audit);
    assert!(entries
        .iter()
        .any(|e| e["event_type"] == "controller_error"));
    assert!(!entries.iter().any(|e| e["event_type"] == "system_start"));
}
