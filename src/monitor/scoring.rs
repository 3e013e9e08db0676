//! Export-time threat scoring for drained flows.

use crate::monitor::config::{is_malicious_port, is_suspicious_port};
use crate::monitor::types::Flow;
use chrono::Duration;

const LARGE_UPLOAD_BYTES:   u64 = 1_000_000;
const LARGE_DOWNLOAD_BYTES: u64 = 10_000_000;
const BURST_PACKETS:        u64 = 100;

/// Additive 0..=100 heuristic over a flow's counters.
pub fn score(flow: &Flow) -> u8 {
    let mut score: u32 = 0;

    if flow.bytes_sent > LARGE_UPLOAD_BYTES {
        score += 10;
    }
    if flow.bytes_recv > LARGE_DOWNLOAD_BYTES {
        score += 15;
    }

    let packets = flow.packets_sent.saturating_add(flow.packets_recv);
    if packets > BURST_PACKETS && flow.end_time - flow.start_time < Duration::seconds(5) {
        score += 20;
    }

    if is_suspicious_port(flow.key.dst_port) {
        score += 10;
    }
    if is_malicious_port(flow.key.dst_port) {
        score += 40;
    }

    score.min(100) as u8
}

/// Scores every flow in place. Called once per drained batch.
pub fn score_all(flows: &mut [Flow]) {
    for flow in flows.iter_mut() {
        flow.threat_score = score(flow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::{FlowKey, Protocol};
    use chrono::{DateTime, TimeZone, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn flow(dst_port: u16) -> Flow {
        Flow {
            key: FlowKey {
                src_ip:   "203.0.113.8".parse().unwrap(),
                src_port: 51515,
                dst_ip:   "192.168.1.50".parse().unwrap(),
                dst_port,
                protocol: Protocol::Tcp,
            },
            bytes_sent:   0,
            bytes_recv:   0,
            packets_sent: 0,
            packets_recv: 0,
            start_time:   t(0),
            end_time:     t(30),
            threat_score: 0,
        }
    }

    #[test]
    fn quiet_flow_scores_zero() {
        assert_eq!(score(&flow(443)), 0);
    }

    #[test]
    fn large_download_to_rdp_scores_twenty_five() {
        let mut f = flow(3389);
        f.bytes_recv = 11_000_000;
        assert_eq!(score(&f), 25);
    }

    #[test]
    fn byte_thresholds_are_strict() {
        let mut f = flow(443);
        f.bytes_sent = 1_000_000;
        f.bytes_recv = 10_000_000;
        assert_eq!(score(&f), 0);
        f.bytes_sent += 1;
        assert_eq!(score(&f), 10);
    }

    #[test]
    fn burst_needs_both_volume_and_short_duration() {
        let mut f = flow(443);
        f.packets_sent = 60;
        f.packets_recv = 41;
        assert_eq!(score(&f), 0);
        f.end_time = t(4);
        assert_eq!(score(&f), 20);
        f.end_time = t(5);
        assert_eq!(score(&f), 0);
    }

    #[test]
    fn rules_add_up_without_exceeding_cap() {
        let mut f = flow(4444);
        f.bytes_sent = 5_000_000;
        f.bytes_recv = 50_000_000;
        f.packets_recv = 500;
        f.end_time = t(1);
        // The port sets are disjoint, so 10 + 15 + 20 + 40 is the maximum.
        assert_eq!(score(&f), 85);
        assert!(score(&f) <= 100);
    }

    #[test]
    fn score_all_sets_each_flow() {
        let mut flows = vec![flow(4444), flow(22), flow(80)];
        score_all(&mut flows);
        let scores: Vec<u8> = flows.iter().map(|f| f.threat_score).collect();
        assert_eq!(scores, vec![40, 10, 0]);
    }
}
