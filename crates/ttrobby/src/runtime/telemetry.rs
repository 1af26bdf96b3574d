use crate::infra::metrics::{serve_metrics, MachineMetrics};
use robby_core::ControlHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

pub fn init() -> prometheus::Result<Arc<MachineMetrics>> {
    MachineMetrics::new().map(Arc::new)
}

pub fn start_metrics_server(
    addr: &Option<String>,
    metrics: &Arc<MachineMetrics>,
) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone(), Arc::clone(metrics))
    })
}

pub fn start_metrics_updater(
    metrics: Arc<MachineMetrics>,
    handle: ControlHandle,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            metrics.record(&handle.snapshot());
            thread::sleep(Duration::from_millis(200));
        }
        metrics.record(&handle.snapshot());
    })
}
