//! Prometheus metrics for the ball launcher.
//!
//! Metric names come from [`robby_core::tags`] so every exporter names the
//! machine state the same way.

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use robby_core::{tags, MachineSnapshot};
use std::sync::Arc;
use std::thread;
use tiny_http::{Header, Response, Server};

pub struct MachineMetrics {
    registry: Registry,
    pub machine_status: IntGauge,
    pub machine_mode: IntGauge,
    pub shot_frequency_hz: Gauge,
    pub shot_cursor: IntGauge,
    pub feeder_busy: IntGauge,
    pub balls_released: IntCounter,
    pub shots_skipped: IntCounter,
    pub cycles_executed: IntCounter,
    pub cycles_missed: IntCounter,
}

impl MachineMetrics {
    /// Creates every metric and registers it in a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let int_gauge = |tag: tags::Tag| -> prometheus::Result<IntGauge> {
            let gauge = IntGauge::new(tag.metric, tag.help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let counter = |tag: tags::Tag| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(tag.metric, tag.help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let machine_status = int_gauge(tags::MACHINE_STATUS)?;
        let machine_mode = int_gauge(tags::MACHINE_MODE)?;
        let shot_cursor = int_gauge(tags::SHOT_CURSOR)?;
        let feeder_busy = int_gauge(tags::FEEDER_BUSY)?;
        let balls_released = counter(tags::BALLS_RELEASED)?;
        let shots_skipped = counter(tags::SHOTS_SKIPPED)?;
        let cycles_executed = counter(tags::CYCLES_EXECUTED)?;
        let cycles_missed = counter(tags::CYCLES_MISSED)?;

        let shot_frequency_hz = Gauge::new(
            tags::SHOT_FREQUENCY_HZ.metric,
            tags::SHOT_FREQUENCY_HZ.help,
        )?;
        registry.register(Box::new(shot_frequency_hz.clone()))?;

        Ok(Self {
            registry,
            machine_status,
            machine_mode,
            shot_frequency_hz,
            shot_cursor,
            feeder_busy,
            balls_released,
            shots_skipped,
            cycles_executed,
            cycles_missed,
        })
    }

    /// Brings every metric up to date with a published snapshot. Counters
    /// only move forward by the difference to what they already count.
    pub fn record(&self, snapshot: &MachineSnapshot) {
        self.machine_status.set(i64::from(snapshot.status.code()));
        self.machine_mode.set(i64::from(snapshot.mode.code()));
        self.shot_frequency_hz.set(snapshot.armed_frequency_hz);
        self.shot_cursor.set(snapshot.shot_cursor as i64);
        self.feeder_busy.set(i64::from(snapshot.feeder_busy));
        advance(&self.balls_released, snapshot.balls_released);
        advance(&self.shots_skipped, snapshot.shots_skipped);
        advance(&self.cycles_executed, snapshot.cycle_count);
        advance(&self.cycles_missed, snapshot.cycles_missed);
    }

    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let seen = counter.get();
    if total > seen {
        counter.inc_by(total - seen);
    }
}

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String, metrics: Arc<MachineMetrics>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let buffer = match metrics.encode() {
                        Ok(buffer) => buffer,
                        Err(e) => {
                            tracing::warn!("Failed to encode metrics: {}", e);
                            let _ = request.respond(
                                Response::from_string("Internal Server Error")
                                    .with_status_code(500),
                            );
                            continue;
                        }
                    };
                    let mut response = Response::from_data(buffer);
                    if let Ok(header) =
                        Header::from_bytes(&b"Content-Type"[..], &b"text/plain; version=0.0.4"[..])
                    {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once the controller loop has published a cycle
                    if metrics.cycles_executed.get() > 0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use robby_core::{MachineMode, MachineStatus};

    #[test]
    fn record_mirrors_snapshot() {
        let metrics = MachineMetrics::new().unwrap();
        let snapshot = MachineSnapshot {
            cycle_count: 12,
            cycles_missed: 1,
            mode: MachineMode::Program,
            status: MachineStatus::Playing,
            shot_cursor: 2,
            balls_released: 3,
            armed_frequency_hz: 0.5,
            feeder_busy: true,
            ..MachineSnapshot::default()
        };
        metrics.record(&snapshot);
        assert_eq!(metrics.machine_status.get(), 2);
        assert_eq!(metrics.machine_mode.get(), 1);
        assert_eq!(metrics.shot_cursor.get(), 2);
        assert_eq!(metrics.feeder_busy.get(), 1);
        assert_eq!(metrics.balls_released.get(), 3);
        assert_eq!(metrics.cycles_executed.get(), 12);
        assert_eq!(metrics.shot_frequency_hz.get(), 0.5);
    }

    #[test]
    fn counters_follow_totals_without_double_counting() {
        let metrics = MachineMetrics::new().unwrap();
        let mut snapshot = MachineSnapshot {
            balls_released: 4,
            ..MachineSnapshot::default()
        };
        metrics.record(&snapshot);
        metrics.record(&snapshot);
        assert_eq!(metrics.balls_released.get(), 4);
        snapshot.balls_released = 6;
        metrics.record(&snapshot);
        assert_eq!(metrics.balls_released.get(), 6);
    }

    #[test]
    fn encodes_tagged_metric_names() {
        let metrics = MachineMetrics::new().unwrap();
        metrics.record(&MachineSnapshot::default());
        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains(tags::MACHINE_STATUS.metric));
        assert!(text.contains(tags::BALLS_RELEASED.metric));
    }
}
