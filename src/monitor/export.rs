//! Background export cycle.
//!
//! A dedicated thread wakes on the flow interval, drains the flow table and
//! the alert queue, and hands both to the collector. Heartbeats ride on the
//! same thread but keep their own cadence. Draining happens first and
//! sending afterwards, so no table lock is ever held across network I/O.
//!
//! Sends are fire-and-forget: a failed call is logged and its batch dropped.

use crate::collector::{FlowRecord, Heartbeat, Sink};
use crate::logger::{Event, SharedLogger};
use crate::monitor::scoring::score_all;
use crate::monitor::types::{SharedStats, ShutdownFlag};
use crate::monitor::Engine;
use crate::system::{memory_percent, CpuSampler};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Cadence and batching for the export cycle.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub flow_interval:      Duration,
    pub heartbeat_interval: Duration,
    /// Upper bound on flows per collector request.
    pub batch_size:         usize,
}

/// Drains the engine and forwards its output to a [`Sink`].
pub struct Exporter<S: Sink> {
    engine:      Arc<Engine>,
    sink:        S,
    batch_size:  usize,
    cpu:         CpuSampler,
    logger:      SharedLogger,
    stats:       SharedStats,
}

impl<S: Sink> Exporter<S> {
    pub fn new(engine: Arc<Engine>, sink: S, batch_size: usize) -> Self {
        let logger = Arc::clone(&engine.logger);
        let stats = Arc::clone(&engine.stats);
        Self {
            engine,
            sink,
            batch_size: batch_size.max(1),
            cpu: CpuSampler::new(),
            logger,
            stats,
        }
    }

    /// One export tick: flows first, then alerts, then the idle-source sweep.
    pub fn flush(&mut self) {
        let mut flows = self.engine.flows.drain_all();
        if !flows.is_empty() {
            score_all(&mut flows);
            let exported_at = Utc::now();
            let records: Vec<FlowRecord> = flows
                .iter()
                .map(|f| FlowRecord::from_flow(f, exported_at))
                .collect();

            for batch in records.chunks(self.batch_size) {
                match self.sink.send_flows(batch) {
                    Ok(()) => {
                        let total = self
                            .stats
                            .flows_exported
                            .fetch_add(batch.len() as u64, Ordering::Relaxed)
                            + batch.len() as u64;
                        self.logger.log(&Event::FlowsExported { count: batch.len(), total });
                    }
                    Err(e) => self.logger.log(&Event::ExportFailed {
                        endpoint: "flows",
                        dropped:  batch.len(),
                        error:    &e.to_string(),
                    }),
                }
            }
        }

        let alerts = self.engine.detector.drain_alerts();
        if !alerts.is_empty() {
            match self.sink.send_alerts(&alerts) {
                Ok(()) => self.logger.log(&Event::AlertsExported { count: alerts.len() }),
                Err(e) => self.logger.log(&Event::ExportFailed {
                    endpoint: "alerts",
                    dropped:  alerts.len(),
                    error:    &e.to_string(),
                }),
            }
        }

        let evicted = self.engine.detector.sweep_idle();
        if evicted > 0 {
            self.logger.log(&Event::Debug {
                message: &format!(
                    "Evicted {} idle sources ({} still tracked)",
                    evicted,
                    self.engine.detector.tracked_sources()
                ),
            });
        }
    }

    /// Sends current host utilisation and capture totals.
    pub fn heartbeat(&mut self) {
        let hb = Heartbeat {
            cpu_percent:      self.cpu.sample(),
            memory_percent:   memory_percent(),
            packets_captured: self.stats.packets_total.load(Ordering::Relaxed),
            alerts_generated: self.engine.detector.alert_count(),
        };
        match self.sink.heartbeat(&hb) {
            Ok(()) => self.logger.log(&Event::Heartbeat {
                cpu_percent:      hb.cpu_percent,
                memory_percent:   hb.memory_percent,
                packets_captured: hb.packets_captured,
                alerts_generated: hb.alerts_generated,
            }),
            Err(e) => self.logger.log(&Event::ExportFailed {
                endpoint: "heartbeat",
                dropped:  1,
                error:    &e.to_string(),
            }),
        }
    }
}

/// Spawns the export thread.
///
/// The thread sleeps in short slices and checks the shutdown flag and both
/// deadlines after every slice, so flushes and heartbeats keep their own
/// cadence. On shutdown it runs one final flush so flows and alerts still in
/// memory are delivered on a best-effort basis.
///
/// # Returns
/// A [`thread::JoinHandle`] the caller joins after capture stops, so the final
/// flush completes before the session summary is printed.
pub fn spawn_export_thread<S: Sink + 'static>(
    engine:   Arc<Engine>,
    sink:     S,
    settings: ExportSettings,
    shutdown: ShutdownFlag,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut exporter = Exporter::new(engine, sink, settings.batch_size);
        let slice = Duration::from_millis(250)
            .min(settings.flow_interval)
            .min(settings.heartbeat_interval);
        let started = Instant::now();
        let mut next_flush = started + settings.flow_interval;
        let mut next_heartbeat = started + settings.heartbeat_interval;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                exporter.flush();
                return;
            }
            thread::sleep(slice);

            let now = Instant::now();
            if now >= next_flush {
                exporter.flush();
                next_flush = now + settings.flow_interval;
            }
            if now >= next_heartbeat {
                exporter.heartbeat();
                next_heartbeat = now + settings.heartbeat_interval;
            }
        }
    })
}
