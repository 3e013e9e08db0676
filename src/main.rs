mod cli;
mod collector;
mod error;
mod identity;
mod logger;
mod monitor;
mod system;

use cli::Cli;
use clap::Parser;
use collector::CollectorClient;
use error::{Error, Result};
use logger::{Event, Logger, SharedLogger};
use monitor::export::ExportSettings;
use monitor::types::{LocalIdentity, SessionStats, SharedStats, ShutdownFlag, Thresholds};
use monitor::{start_monitor, CaptureMode, MonitorConfig};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    let cli = Cli::parse();

    if cli.list {
        if let Err(e) = identity::print_interfaces() {
            eprintln!("Failed to list interfaces: {}", e);
            process::exit(1);
        }
        return;
    }

    let logger: SharedLogger = match Logger::new(cli.json, cli.verbose, cli.log_file.as_deref()) {
        Ok(l) => Arc::new(l),
        Err(e) => {
            eprintln!("Failed to open log file: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&cli, &logger) {
        logger.log(&Event::Error { message: &e.to_string() });
        process::exit(1);
    }
}

fn run(cli: &Cli, logger: &SharedLogger) -> Result<()> {
    let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));
    let session_start = Instant::now();
    let stats = SessionStats::new();

    // ── Local identity ───────────────────────────────────────────────────────
    let host = identity::discover(cli.interface.as_deref())?;
    if host.primary.is_unspecified() {
        logger.log(&Event::Error {
            message: "No usable IPv4 address found; inbound-port detection is disabled",
        });
    } else {
        logger.log(&Event::Info { message: &host.describe() });
    }

    let public = match identity::public_ip() {
        Ok(ip) => ip,
        Err(e) => {
            logger.log(&Event::Debug {
                message: &format!("Public IP lookup failed ({}); using {}", e, host.primary),
            });
            host.primary
        }
    };

    let local = LocalIdentity::new(host.all.iter().copied().chain(std::iter::once(public)));

    // ── Registration ─────────────────────────────────────────────────────────
    let url = cli.collector_url.as_deref().ok_or(Error::MissingField("collector-url"))?;
    let key = cli.api_key.as_deref().ok_or(Error::MissingField("api-key"))?;

    let mut client = CollectorClient::new(url, key)?;
    let agent_id = client.register(&identity::hostname(), public)?.to_string();
    logger.log(&Event::Registered { agent_id: &agent_id, ip: &public.to_string() });

    register_shutdown_handler(Arc::clone(&shutdown))?;

    // ── Monitoring ───────────────────────────────────────────────────────────
    let mode = if cli.simple {
        CaptureMode::Poll
    } else if let Some(path) = &cli.pcap_file {
        CaptureMode::Replay { path: path.clone() }
    } else {
        CaptureMode::Live { iface: cli.interface.clone() }
    };

    let cfg = MonitorConfig {
        mode,
        local,
        local_ip:   host.primary,
        thresholds: build_thresholds(cli),
        export:     ExportSettings {
            flow_interval:      Duration::from_secs(cli.flow_interval),
            heartbeat_interval: Duration::from_secs(cli.heartbeat_interval),
            batch_size:         cli.batch_size,
        },
        logger:     Arc::clone(logger),
        stats:      Arc::clone(&stats),
        shutdown,
    };

    let result = start_monitor(cfg, client);
    print_summary(logger, &stats, session_start);
    result
}

fn register_shutdown_handler(shutdown: ShutdownFlag) -> Result<()> {
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Relaxed);
    })
    .map_err(|e| Error::Custom { msg: format!("Failed to register Ctrl+C handler: {}", e) })
}

fn print_summary(logger: &SharedLogger, stats: &SharedStats, session_start: Instant) {
    logger.log(&Event::SessionSummary {
        duration_secs:  session_start.elapsed().as_secs(),
        hosts_seen:     stats.total_hosts_seen.load(Ordering::Relaxed),
        flows_tracked:  stats.total_flows_tracked.load(Ordering::Relaxed),
        flows_exported: stats.flows_exported.load(Ordering::Relaxed),
        packets_total:  stats.packets_total.load(Ordering::Relaxed),
        alerts_emitted: stats.alerts_emitted.load(Ordering::Relaxed),
    });
}

fn build_thresholds(cli: &Cli) -> Thresholds {
    Thresholds {
        port_scan: cli.port_scan_threshold,
        ddos:      cli.ddos_threshold,
    }
}
