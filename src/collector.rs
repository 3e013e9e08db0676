//! Collector client and wire records.
//!
//! Every call is a JSON POST to `<base>/<endpoint>` wrapped in an envelope
//! carrying the agent id. Failures are returned to the caller, which logs
//! them and drops the batch; nothing here retries or buffers.

use crate::error::{Error, Result};
use crate::monitor::config::service_name;
use crate::monitor::types::{Alert, Flow, Protocol};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const REGISTER_ENDPOINT:  &str = "agent-register";
pub const FLOWS_ENDPOINT:     &str = "agent-flows";
pub const ALERTS_ENDPOINT:    &str = "agent-suricata";
pub const HEARTBEAT_ENDPOINT: &str = "agent-heartbeat";

// ── Wire records ─────────────────────────────────────────────────────────────

/// One exported flow as the collector expects it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlowRecord {
    pub src_ip:       IpAddr,
    pub dst_ip:       IpAddr,
    pub src_port:     u16,
    pub dst_port:     u16,
    pub protocol:     Protocol,
    pub bytes_sent:   u64,
    pub bytes_recv:   u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    /// Seconds between first and last packet, rounded to milliseconds.
    pub duration:     f64,
    pub service:      Option<&'static str>,
    pub threat_score: u8,
    /// Export time, ISO-8601 UTC with a trailing `Z`.
    pub timestamp:    String,
}

impl FlowRecord {
    pub fn from_flow(flow: &Flow, exported_at: DateTime<Utc>) -> Self {
        let elapsed = flow.end_time - flow.start_time;
        let micros = elapsed
            .num_microseconds()
            .unwrap_or_else(|| elapsed.num_milliseconds().saturating_mul(1000));
        let duration = (micros as f64 / 1000.0).round() / 1000.0;

        Self {
            src_ip:       flow.key.src_ip,
            dst_ip:       flow.key.dst_ip,
            src_port:     flow.key.src_port,
            dst_port:     flow.key.dst_port,
            protocol:     flow.key.protocol,
            bytes_sent:   flow.bytes_sent,
            bytes_recv:   flow.bytes_recv,
            packets_sent: flow.packets_sent,
            packets_recv: flow.packets_recv,
            duration,
            service:      service_name(flow.key.dst_port),
            threat_score: flow.threat_score,
            timestamp:    exported_at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        }
    }
}

/// Health report posted on the heartbeat cadence.
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub cpu_percent:      f32,
    pub memory_percent:   f32,
    pub packets_captured: u64,
    pub alerts_generated: u64,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    agent_id: &'a str,
    #[serde(flatten)]
    body:     T,
}

#[derive(Serialize)]
struct FlowBatch<'a> {
    flows: &'a [FlowRecord],
}

#[derive(Serialize)]
struct AlertBatch<'a> {
    alerts: &'a [Alert],
}

#[derive(Serialize)]
struct Registration<'a> {
    hostname:   &'a str,
    ip_address: String,
    version:    String,
    os:         String,
}

// ── Sink ─────────────────────────────────────────────────────────────────────

/// Destination of exported data. Implemented by [`CollectorClient`].
pub trait Sink: Send {
    fn send_flows(&self, flows: &[FlowRecord]) -> Result<()>;
    fn send_alerts(&self, alerts: &[Alert]) -> Result<()>;
    fn heartbeat(&self, stats: &Heartbeat) -> Result<()>;
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct CollectorClient {
    http:     reqwest::blocking::Client,
    base_url: String,
    api_key:  String,
    agent_id: Option<String>,
}

impl CollectorClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key:  api_key.to_string(),
            agent_id: None,
        })
    }

    /// Announces this agent under a freshly generated id.
    ///
    /// Until this succeeds every other call is refused locally.
    pub fn register(&mut self, hostname: &str, ip_address: IpAddr) -> Result<&str> {
        let agent_id = uuid::Uuid::new_v4().to_string();
        let body = Registration {
            hostname,
            ip_address: ip_address.to_string(),
            version:    format!("{}-rust", env!("CARGO_PKG_VERSION")),
            os:         format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        };
        self.post(REGISTER_ENDPOINT, &Envelope { agent_id: &agent_id, body })?;
        Ok(self.agent_id.insert(agent_id).as_str())
    }

    fn registered(&self) -> Result<&str> {
        self.agent_id
            .as_deref()
            .ok_or_else(|| Error::Custom { msg: "agent is not registered".to_string() })
    }

    fn post<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base_url, endpoint))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Rejected {
                endpoint: endpoint.to_string(),
                status:   status.as_u16(),
            });
        }
        Ok(())
    }
}

impl Sink for CollectorClient {
    fn send_flows(&self, flows: &[FlowRecord]) -> Result<()> {
        let agent_id = self.registered()?;
        self.post(FLOWS_ENDPOINT, &Envelope { agent_id, body: FlowBatch { flows } })
    }

    fn send_alerts(&self, alerts: &[Alert]) -> Result<()> {
        let agent_id = self.registered()?;
        self.post(ALERTS_ENDPOINT, &Envelope { agent_id, body: AlertBatch { alerts } })
    }

    fn heartbeat(&self, stats: &Heartbeat) -> Result<()> {
        let agent_id = self.registered()?;
        self.post(HEARTBEAT_ENDPOINT, &Envelope { agent_id, body: stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::{AlertCategory, FlowKey, Severity};
    use chrono::TimeZone;

    fn sample_flow() -> Flow {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Flow {
            key: FlowKey {
                src_ip:   "192.168.1.20".parse().unwrap(),
                src_port: 51000,
                dst_ip:   "93.184.216.34".parse().unwrap(),
                dst_port: 443,
                protocol: Protocol::Tcp,
            },
            bytes_sent:   4200,
            bytes_recv:   0,
            packets_sent: 7,
            packets_recv: 0,
            start_time:   start,
            end_time:     start + chrono::Duration::microseconds(1_234_567),
            threat_score: 0,
        }
    }

    #[test]
    fn flow_record_fields() {
        let at = Utc.timestamp_opt(1_700_000_100, 250_000_000).unwrap();
        let rec = FlowRecord::from_flow(&sample_flow(), at);
        assert_eq!(rec.duration, 1.235);
        assert_eq!(rec.service, Some("https"));
        assert_eq!(rec.timestamp, "2023-11-14T22:15:00.250000Z");

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["protocol"], "tcp");
        assert_eq!(json["src_ip"], "192.168.1.20");
        assert_eq!(json["threat_score"], 0);
    }

    #[test]
    fn unknown_service_serialises_as_null() {
        let mut flow = sample_flow();
        flow.key.dst_port = 9999;
        let rec = FlowRecord::from_flow(&flow, Utc::now());
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json["service"].is_null());
    }

    #[test]
    fn envelopes_flatten_the_body() {
        let alert = Alert {
            signature_id:   "SNSM-MAL-1".into(),
            signature_name: "Known malicious port 4444".into(),
            severity:       Severity::Critical,
            category:       AlertCategory::MaliciousActivity,
            src_ip:         "10.0.0.5".parse().unwrap(),
            dst_ip:         "203.0.113.66".parse().unwrap(),
            src_port:       50000,
            dst_port:       4444,
            protocol:       Protocol::Tcp,
        };
        let alerts = [alert];
        let json = serde_json::to_value(Envelope { agent_id: "abc", body: AlertBatch { alerts: &alerts } }).unwrap();
        assert_eq!(json["agent_id"], "abc");
        assert_eq!(json["alerts"][0]["category"], "Malicious Activity");
        assert_eq!(json["alerts"][0]["severity"], "critical");

        let hb = Heartbeat { cpu_percent: 1.5, memory_percent: 40.0, packets_captured: 9, alerts_generated: 1 };
        let json = serde_json::to_value(Envelope { agent_id: "abc", body: &hb }).unwrap();
        assert_eq!(json["packets_captured"], 9);
        assert_eq!(json["agent_id"], "abc");
    }

    #[test]
    fn unregistered_client_refuses_to_send() {
        let client = CollectorClient::new("http://127.0.0.1:9/", "key").unwrap();
        assert!(client.agent_id.is_none());
        assert!(matches!(client.send_flows(&[]), Err(Error::Custom { .. })));
        assert_eq!(client.base_url, "http://127.0.0.1:9");
    }
}
