use crate::monitor::config::{
    DDOS_THRESHOLD, FLOW_UPLOAD_INTERVAL, HEARTBEAT_INTERVAL, MAX_FLOWS_PER_BATCH, PORTSCAN_THRESHOLD,
};
use clap::Parser;

/// snsm-agent: host network sensor for a central security monitor.
///
/// Watches this host's traffic, aggregates it into scored flows, raises
/// threat alerts, and ships both to the collector on a fixed cadence.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "snsm-agent",
    version,
    about   = "Host network sensor: flow aggregation, threat detection, collector export",
    long_about = None,
)]
pub struct Cli {
    // ── Capture ──────────────────────────────────────────────────────────────

    /// Network interface to capture on.
    ///
    /// If omitted, libpcap's default device is used and the first
    /// non-loopback IPv4 address becomes the primary local address.
    #[arg(short = 'i', long = "interface", value_name = "IFACE")]
    pub interface: Option<String>,

    /// Poll the OS connection table once per second instead of capturing
    /// packets. Needs no capture privileges; byte counts are estimated.
    #[arg(long = "simple", conflicts_with = "pcap_file")]
    pub simple: bool,

    /// List network interfaces and exit.
    #[arg(long = "list")]
    pub list: bool,

    /// Read packets from a saved PCAP file instead of a live interface.
    ///
    /// Packet timestamps from the file drive the detection windows.
    #[arg(short = 'r', long = "read", value_name = "FILE")]
    pub pcap_file: Option<String>,

    // ── Logging ──────────────────────────────────────────────────────────────

    /// Also print debug events.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Emit log entries as newline-delimited JSON (NDJSON).
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Write log output to this file in addition to stdout (appended).
    #[arg(short = 'o', long = "log-file", value_name = "PATH")]
    pub log_file: Option<String>,

    // ── Collector ────────────────────────────────────────────────────────────

    /// Base URL of the collector's functions endpoint.
    #[arg(
        long = "collector-url",
        env = "SNSM_COLLECTOR_URL",
        value_name = "URL",
        required_unless_present = "list"
    )]
    pub collector_url: Option<String>,

    /// API key sent with every collector request.
    #[arg(
        long = "api-key",
        env = "SNSM_API_KEY",
        value_name = "KEY",
        hide_env_values = true,
        required_unless_present = "list"
    )]
    pub api_key: Option<String>,

    /// Seconds between flow and alert uploads.
    #[arg(long = "flow-interval", value_name = "SECS", default_value_t = FLOW_UPLOAD_INTERVAL,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub flow_interval: u64,

    /// Seconds between heartbeats.
    #[arg(long = "heartbeat-interval", value_name = "SECS", default_value_t = HEARTBEAT_INTERVAL,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub heartbeat_interval: u64,

    /// Maximum flows per upload request.
    #[arg(long = "batch-size", value_name = "N", default_value_t = MAX_FLOWS_PER_BATCH)]
    pub batch_size: usize,

    // ── Detection Thresholds (overrides config.rs defaults) ──────────────────

    /// Distinct destination ports within 10 s that trigger a port-scan alert.
    #[arg(long = "port-scan-threshold", value_name = "N", default_value_t = PORTSCAN_THRESHOLD)]
    pub port_scan_threshold: usize,

    /// Packets within 5 s from one source that trigger a DDoS alert.
    #[arg(long = "ddos-threshold", value_name = "N", default_value_t = DDOS_THRESHOLD)]
    pub ddos_threshold: usize,
}
