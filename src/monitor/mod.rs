//! Monitoring engine entry point.
//!
//! One producer (live capture, pcap replay or connection-table polling) feeds
//! every [`ObservedPacket`] through the [`Engine`]: the flow table records it
//! and the detector evaluates it on the producer thread. The export thread
//! drains both concurrently on its own cadence.
//!
//! ## Capture modes
//! Each mode normalises its input to the same packet shape. A mode whose
//! capability is missing (no pcap device, no permission, no `/proc/net/tcp`)
//! fails with an explicit [`Error`] variant; there is no automatic switch to
//! another mode.

pub mod config;
pub mod detection;
pub mod export;
pub mod flow;
pub mod host;
pub mod parsers;
pub mod scoring;
pub mod types;

use crate::collector::Sink;
use crate::error::{Error, Result};
use crate::logger::{Event, SharedLogger};
use crate::monitor::config::{CAPTURE_TIMEOUT_MS, POLL_INTERVAL};
use crate::monitor::detection::ThreatDetector;
use crate::monitor::export::{spawn_export_thread, ExportSettings};
use crate::monitor::flow::FlowTable;
use crate::monitor::parsers::{packet_from_frame, parse_proc_net, Connection};
use crate::monitor::types::*;

use chrono::{DateTime, TimeZone, Utc};
use pcap::Capture;
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

const PROC_NET_TCP:  &str = "/proc/net/tcp";
const PROC_NET_TCP6: &str = "/proc/net/tcp6";

/// Where packets come from.
#[derive(Debug, Clone)]
pub enum CaptureMode {
    /// Promiscuous capture on `iface`, or libpcap's default device when `None`.
    Live { iface: Option<String> },
    /// Offline replay of a capture file.
    Replay { path: String },
    /// Once-per-second snapshot of the OS connection table.
    Poll,
}

/// Configuration bundle passed from `main` into the monitoring engine.
pub struct MonitorConfig {
    pub mode:       CaptureMode,
    /// Every address that belongs to this host, used for flow direction.
    pub local:      LocalIdentity,
    /// Primary address; inbound-only rules compare against it.
    pub local_ip:   IpAddr,
    pub thresholds: Thresholds,
    pub export:     ExportSettings,
    pub logger:     SharedLogger,
    pub stats:      SharedStats,
    /// Set to `true` by the ctrlc handler; loops exit on their next iteration.
    pub shutdown:   ShutdownFlag,
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Flow table and detector, shared by the producer and the export thread.
pub struct Engine {
    pub flows:    FlowTable,
    pub detector: ThreatDetector,
    pub local:    LocalIdentity,
    pub local_ip: IpAddr,
    pub logger:   SharedLogger,
    pub stats:    SharedStats,
}

impl Engine {
    pub fn new(
        local:      LocalIdentity,
        local_ip:   IpAddr,
        thresholds: Thresholds,
        logger:     SharedLogger,
        stats:      SharedStats,
    ) -> Self {
        Self {
            flows: FlowTable::new(Arc::clone(&stats)),
            detector: ThreatDetector::new(thresholds, Arc::clone(&stats)),
            local,
            local_ip,
            logger,
            stats,
        }
    }

    /// Records a captured packet and runs detection on it.
    pub fn observe(&self, packet: &ObservedPacket) {
        self.stats.packets_total.fetch_add(1, Ordering::Relaxed);
        self.flows.update(packet, &self.local);
        self.report(self.detector.analyze(packet, self.local_ip));
    }

    /// Records one polled connection.
    ///
    /// The flow table keeps the local -> remote view. The detector sees the
    /// remote endpoint as the source so the inbound-only rule can fire for
    /// peers connected to a sensitive local port.
    pub fn observe_connection(&self, conn: &Connection, observed_at: DateTime<Utc>) {
        let packet = conn.to_packet(observed_at);
        self.stats.packets_total.fetch_add(1, Ordering::Relaxed);
        self.flows.update(&packet, &self.local);
        self.report(self.detector.analyze(&packet.reversed(), self.local_ip));
    }

    fn report(&self, alerts: Vec<Alert>) {
        for alert in &alerts {
            self.logger.log(&Event::Alert {
                signature_id: &alert.signature_id,
                name:         &alert.signature_name,
                severity:     &alert.severity.to_string(),
                src:          &alert.src_ip.to_string(),
            });
        }
    }
}

/// Runs the engine until the producer finishes or shutdown is requested.
///
/// Spawns the export thread, runs the selected capture mode on the calling
/// thread, then raises the shutdown flag and waits for the export thread's
/// final flush.
///
/// # Errors
/// Returns the capture mode's start-up error (`PermissionDenied`,
/// `CaptureUnavailable`, `InterfaceNotFound`, `ConnectionTableUnavailable`).
/// The export thread is still joined first, so anything already observed is
/// flushed.
pub fn start_monitor<S: Sink + 'static>(cfg: MonitorConfig, sink: S) -> Result<()> {
    let engine = Arc::new(Engine::new(
        cfg.local.clone(),
        cfg.local_ip,
        cfg.thresholds.clone(),
        Arc::clone(&cfg.logger),
        Arc::clone(&cfg.stats),
    ));

    let export_handle = spawn_export_thread(
        Arc::clone(&engine),
        sink,
        cfg.export.clone(),
        Arc::clone(&cfg.shutdown),
    );

    cfg.logger.log(&Event::Info { message: "Monitoring started" });

    let result = match &cfg.mode {
        CaptureMode::Live { iface } => run_live(iface.as_deref(), &cfg, &engine),
        CaptureMode::Replay { path } => run_replay(path, &cfg, &engine),
        CaptureMode::Poll => run_poll(&cfg, &engine),
    };

    cfg.shutdown.store(true, Ordering::Relaxed);
    if export_handle.join().is_err() {
        cfg.logger.log(&Event::Error { message: "Export thread panicked" });
    }
    result
}

// ── Live capture ─────────────────────────────────────────────────────────────

fn run_live(iface: Option<&str>, cfg: &MonitorConfig, engine: &Engine) -> Result<()> {
    let device = match iface {
        Some(name) => pcap::Device::list()?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))?,
        None => pcap::Device::lookup()?
            .ok_or_else(|| Error::CaptureUnavailable("no capture device found".to_string()))?,
    };

    cfg.logger.log(&Event::Info {
        message: &format!("Live capture on {}", device.name),
    });

    let mut cap = Capture::from_device(device)?
        .promisc(true)
        .timeout(CAPTURE_TIMEOUT_MS)
        .open()?;

    while !cfg.shutdown.load(Ordering::Relaxed) {
        match cap.next_packet() {
            Ok(pkt) => {
                if let Some(p) = packet_from_frame(pkt.data, u64::from(pkt.header.len), Utc::now()) {
                    engine.observe(&p);
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                cfg.logger.log(&Event::Error {
                    message: &format!("Capture stopped: {}", e),
                });
                break;
            }
        }
    }

    Ok(())
}

// ── PCAP file replay ─────────────────────────────────────────────────────────

fn run_replay(path: &str, cfg: &MonitorConfig, engine: &Engine) -> Result<()> {
    cfg.logger.log(&Event::Info {
        message: &format!("Replay mode: reading {}", path),
    });

    let mut cap = Capture::from_file(path)
        .map_err(|e| Error::CaptureUnavailable(format!("{}: {}", path, e)))?;

    while !cfg.shutdown.load(Ordering::Relaxed) {
        match cap.next_packet() {
            Ok(pkt) => {
                let ts = pkt.header.ts;
                let observed_at = Utc
                    .timestamp_opt(ts.tv_sec as i64, (ts.tv_usec as u32).saturating_mul(1000))
                    .single()
                    .unwrap_or_else(Utc::now);
                if let Some(p) = packet_from_frame(pkt.data, u64::from(pkt.header.len), observed_at) {
                    engine.observe(&p);
                }
            }
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                cfg.logger.log(&Event::Error {
                    message: &format!("Replay stopped: {}", e),
                });
                break;
            }
        }
    }

    Ok(())
}

// ── Connection-table polling ─────────────────────────────────────────────────

fn run_poll(cfg: &MonitorConfig, engine: &Engine) -> Result<()> {
    cfg.logger.log(&Event::Info {
        message: "Simple mode: polling the connection table",
    });

    // A missing table is fatal only before the first successful read.
    let mut table = read_connection_table()?;

    loop {
        let now = Utc::now();
        for conn in &table {
            engine.observe_connection(conn, now);
        }

        thread::sleep(POLL_INTERVAL);
        if cfg.shutdown.load(Ordering::Relaxed) {
            break;
        }

        table = match read_connection_table() {
            Ok(t) => t,
            Err(e) => {
                cfg.logger.log(&Event::Error { message: &e.to_string() });
                Vec::new()
            }
        };
    }

    Ok(())
}

/// Reads the IPv4 and IPv6 TCP tables. A host without IPv6 has no `tcp6`
/// file, which is not an error.
fn read_connection_table() -> Result<Vec<Connection>> {
    let v4 = std::fs::read_to_string(PROC_NET_TCP)
        .map_err(|e| Error::ConnectionTableUnavailable(format!("{}: {}", PROC_NET_TCP, e)))?;
    let mut conns = parse_proc_net(&v4, Protocol::Tcp);

    if let Ok(v6) = std::fs::read_to_string(PROC_NET_TCP6) {
        conns.extend(parse_proc_net(&v6, Protocol::Tcp));
    }
    Ok(conns)
}
