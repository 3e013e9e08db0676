use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

/// Transport protocol of an observed packet, as far as the normalizers decode it.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Tcp   => "tcp",
            Protocol::Udp   => "udp",
            Protocol::Icmp  => "icmp",
            Protocol::Other => "other",
        };
        f.write_str(s)
    }
}

/// A single network observation in canonical form.
///
/// Produced by every capture source (live capture, PCAP replay, connection-table
/// polling) so that the flow table and the detector never see capture-specific
/// data. Ports are zero for protocols that have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedPacket {
    pub src_ip:      IpAddr,
    pub dst_ip:      IpAddr,
    pub src_port:    u16,
    pub dst_port:    u16,
    pub protocol:    Protocol,
    pub byte_length: u64,
    /// Wall-clock time of the observation. Drives every window and cooldown.
    pub observed_at: DateTime<Utc>,
}

impl ObservedPacket {
    /// The same observation seen from the other endpoint.
    pub fn reversed(&self) -> Self {
        Self {
            src_ip:      self.dst_ip,
            dst_ip:      self.src_ip,
            src_port:    self.dst_port,
            dst_port:    self.src_port,
            protocol:    self.protocol,
            byte_length: self.byte_length,
            observed_at: self.observed_at,
        }
    }

    pub fn flow_key(&self) -> FlowKey {
        FlowKey {
            src_ip:   self.src_ip,
            src_port: self.src_port,
            dst_ip:   self.dst_ip,
            dst_port: self.dst_port,
            protocol: self.protocol,
        }
    }
}

/// Identifies a directional flow.
///
/// Unlike a canonicalised connection key, the endpoints are kept in the order
/// of the first packet seen, so `A -> B` and `B -> A` are distinct flows.
#[derive(Hash, Eq, PartialEq, Debug, Clone)]
pub struct FlowKey {
    pub src_ip:   IpAddr,
    pub src_port: u16,
    pub dst_ip:   IpAddr,
    pub dst_port: u16,
    pub protocol: Protocol,
}

/// Aggregated counters for one flow over one export interval.
///
/// Owned by the flow table until drained; after that it is a snapshot handed
/// to the exporter, which sets `threat_score` once.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub key: FlowKey,

    /// Bytes attributed to packets classified as outbound.
    pub bytes_sent: u64,

    /// Bytes attributed to packets classified as inbound.
    pub bytes_recv: u64,

    pub packets_sent: u64,
    pub packets_recv: u64,

    /// Timestamp of the first packet. Never changes after creation.
    pub start_time: DateTime<Utc>,

    /// Timestamp of the most recent packet. Never moves backwards, so it is
    /// always at or after `start_time`.
    pub end_time: DateTime<Utc>,

    /// Zero until export-time scoring.
    pub threat_score: u8,
}

/// Severity attached to an [`Alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Medium   => "medium",
            Severity::High     => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The four detection rules.
///
/// Serialises to the category name expected by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlertCategory {
    #[serde(rename = "Port Scan Detected")]
    PortScan,
    #[serde(rename = "DDoS Attack Detected")]
    Ddos,
    #[serde(rename = "Suspicious Connection")]
    SuspiciousConnection,
    #[serde(rename = "Malicious Activity")]
    MaliciousActivity,
}

impl AlertCategory {
    /// Rule tag used inside `signature_id` (`SNSM-<TAG>-<n>`).
    pub fn signature_tag(&self) -> &'static str {
        match self {
            AlertCategory::PortScan             => "PORTSCAN",
            AlertCategory::Ddos                 => "DDOS",
            AlertCategory::SuspiciousConnection => "SUSP",
            AlertCategory::MaliciousActivity    => "MAL",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AlertCategory::PortScan             => Severity::High,
            AlertCategory::Ddos                 => Severity::Critical,
            AlertCategory::SuspiciousConnection => Severity::Medium,
            AlertCategory::MaliciousActivity    => Severity::Critical,
        }
    }
}

/// A discrete security alert raised by the detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub signature_id:   String,
    pub signature_name: String,
    pub severity:       Severity,
    pub category:       AlertCategory,
    pub src_ip:         IpAddr,
    pub dst_ip:         IpAddr,
    pub src_port:       u16,
    pub dst_port:       u16,
    pub protocol:       Protocol,
}

/// Cooldown identity for one rule firing.
///
/// Port scan and DDoS cool down per source; the port rules cool down per
/// source and destination port, so one port firing never silences another.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum CooldownKey {
    PortScan,
    Ddos,
    Suspicious(u16),
    Malicious(u16),
}

/// Addresses that belong to the monitored host.
///
/// Used by direction inference: traffic from any of these addresses is
/// outbound.
#[derive(Debug, Clone, Default)]
pub struct LocalIdentity {
    pub addresses: HashSet<IpAddr>,
}

impl LocalIdentity {
    pub fn new<I: IntoIterator<Item = IpAddr>>(addrs: I) -> Self {
        Self { addresses: addrs.into_iter().collect() }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addresses.contains(ip)
    }
}

/// Runtime-tunable detection thresholds, populated from CLI arguments.
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Distinct destination ports within the scan window that trigger a port-scan alert.
    pub port_scan: usize,
    /// Packets within the rate window that trigger a DDoS alert.
    pub ddos:      usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            port_scan: crate::monitor::config::PORTSCAN_THRESHOLD,
            ddos:      crate::monitor::config::DDOS_THRESHOLD,
        }
    }
}

/// Running totals reported in heartbeats and the shutdown summary.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub packets_total:       AtomicU64,
    /// Incremented once for every new flow instance (including re-creation after a drain).
    pub total_flows_tracked: AtomicU64,
    pub total_hosts_seen:    AtomicU64,
    pub alerts_emitted:      AtomicU64,
    pub flows_exported:      AtomicU64,
}

impl SessionStats {
    pub fn new() -> SharedStats {
        Arc::new(Self::default())
    }
}

pub type SharedStats = Arc<SessionStats>;

/// Set to `true` by the Ctrl+C handler; every loop checks it between iterations.
pub type ShutdownFlag = Arc<AtomicBool>;
