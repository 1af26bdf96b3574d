use robby_core::MachineMode;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    /// Machine configuration document; the built-in default when absent.
    pub config_path: Option<PathBuf>,
    pub save_config: Option<PathBuf>,
    pub run_seconds: Option<u64>,
    /// Mode to select and start playing in right after startup.
    pub autoplay: Option<MachineMode>,
    pub tick_ms: u64,
    pub release_settle_ms: u64,
    pub sim_step_ms: u64,
    pub json_logs: bool,
    pub log_file: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            config_path: None,
            save_config: None,
            run_seconds: None,
            autoplay: None,
            tick_ms: 100,
            release_settle_ms: 250,
            sim_step_ms: 10,
            json_logs: false,
            log_file: None,
            metrics_addr: None,
            audit_path: None,
        }
    }
}

fn parse_mode(value: &str) -> Option<MachineMode> {
    match value.to_ascii_lowercase().as_str() {
        "direct" => Some(MachineMode::Direct),
        "program" => Some(MachineMode::Program),
        _ => None,
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if i + 1 < args.len() {
                        cfg.config_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--save-config" => {
                    if i + 1 < args.len() {
                        cfg.save_config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--run-seconds" => {
                    if i + 1 < args.len() {
                        cfg.run_seconds = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--autoplay" => {
                    if i + 1 < args.len() {
                        cfg.autoplay = parse_mode(&args[i + 1]);
                        i += 1;
                    }
                }
                "--tick-ms" => {
                    if i + 1 < args.len() {
                        cfg.tick_ms = args[i + 1].parse().unwrap_or(100).max(1);
                        i += 1;
                    }
                }
                "--release-settle-ms" => {
                    if i + 1 < args.len() {
                        cfg.release_settle_ms = args[i + 1].parse().unwrap_or(250);
                        i += 1;
                    }
                }
                "--sim-step-ms" => {
                    if i + 1 < args.len() {
                        cfg.sim_step_ms = args[i + 1].parse().unwrap_or(10).max(1);
                        i += 1;
                    }
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-file" => {
                    if i + 1 < args.len() {
                        cfg.log_file = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--metrics-addr" => {
                    if i + 1 < args.len() {
                        cfg.metrics_addr = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--audit-log" => {
                    if i + 1 < args.len() {
                        cfg.audit_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        cfg
    }

    pub fn print_help() {
        println!(
            r#"ttrobby - table tennis ball launcher controller

USAGE:
    ttrobby [OPTIONS]

OPTIONS:
    --config <PATH>            Machine configuration (JSON) [default: built-in]
    --save-config <PATH>       Write the effective machine configuration to PATH
    --run-seconds <SECS>       Run for a fixed duration, stop playing, then exit
    --autoplay <MODE>          Select MODE (direct|program) and start playing at startup
    --tick-ms <MS>             Controller reconciliation period [default: 100]
    --release-settle-ms <MS>   Wait after a release before changing speeds [default: 250]
    --sim-step-ms <MS>         Step of the simulated feeder steppers [default: 10]
    --json-logs                Output logs in JSON format (for log aggregation)
    --log-file <PATH>          Also write JSON logs to PATH
    --metrics-addr <ADDR>      Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>         Enable audit logging to specified JSONL file
    -h, --help                 Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                   Set log filter (e.g., RUST_LOG=debug,robby_core=trace)

EXAMPLES:
    # Play the configured program for a minute
    ttrobby --config machine.json --autoplay program --run-seconds 60

    # Write the default configuration as a starting point
    ttrobby --save-config machine.json --run-seconds 0

    # Production run with all observability
    ttrobby --json-logs --metrics-addr 0.0.0.0:9090 --audit-log /var/log/ttrobby/audit.jsonl
"#
        );
    }
}
