//! Per-source threat detection.
//!
//! Four independent rules are evaluated for every packet:
//! - **Port scan**: many distinct destination ports from one source in a short window.
//! - **DDoS**: a high packet rate from one source.
//! - **Suspicious connection**: inbound traffic to an administrative port on this host.
//! - **Malicious activity**: either endpoint uses a known backdoor port.
//!
//! Source windows live in a `DashMap`; `analyze` holds the entry for the
//! packet's source for the whole evaluation, so pruning, appending and every
//! cooldown check-and-set for that source happen under one lock. Cooldown
//! keys always contain the source address, which is why they can live inside
//! the per-source entry.
//!
//! Idle sources are evicted on the export cadence. Eviction forgets their
//! cooldowns, so after a backwards clock step an evicted source can alert
//! again where the kept state would still have suppressed it.

use crate::monitor::config::{ddos_window, is_malicious_port, is_suspicious_port};
use crate::monitor::host::HostWindow;
use crate::monitor::types::{
    Alert, AlertCategory, CooldownKey, ObservedPacket, SharedStats, Thresholds,
};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::{DashMap, DashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

pub struct ThreatDetector {
    hosts:      DashMap<IpAddr, HostWindow>,
    /// Every source ever analysed; survives eviction.
    seen:       DashSet<IpAddr>,
    pending:    Mutex<Vec<Alert>>,
    /// Last issued signature number, shared by all rules.
    signatures: AtomicU64,
    /// Latest `observed_at` seen, in milliseconds. Detector time follows the
    /// packets, so the idle sweep uses this rather than the wall clock.
    latest:     AtomicI64,
    thresholds: Thresholds,
    stats:      SharedStats,
}

impl ThreatDetector {
    pub fn new(thresholds: Thresholds, stats: SharedStats) -> Self {
        Self {
            hosts: DashMap::new(),
            seen: DashSet::new(),
            pending: Mutex::new(Vec::new()),
            signatures: AtomicU64::new(0),
            latest: AtomicI64::new(i64::MIN),
            thresholds,
            stats,
        }
    }

    /// Evaluates one packet against every rule.
    ///
    /// Returns the alerts raised by this packet (zero to four) and appends
    /// them to the pending queue drained by the export cycle. The packet's
    /// `observed_at` is the evaluation time.
    ///
    /// # Arguments
    /// * `packet`   - Normalised observation.
    /// * `local_ip` - Primary address of the monitored host; the suspicious-port
    ///                rule only fires for traffic addressed to it.
    pub fn analyze(&self, packet: &ObservedPacket, local_ip: IpAddr) -> Vec<Alert> {
        let now = packet.observed_at;
        let mut alerts = Vec::new();
        self.latest.fetch_max(now.timestamp_millis(), Ordering::Relaxed);

        if self.seen.insert(packet.src_ip) {
            self.stats.total_hosts_seen.fetch_add(1, Ordering::Relaxed);
        }
        let mut host = self.hosts.entry(packet.src_ip).or_insert_with(HostWindow::new);

        // ── Sliding Window Maintenance ───────────────────────────────────────
        host.observe(packet.dst_port, now);

        // ── Port Scan Detection ──────────────────────────────────────────────
        let ports = host.ports_in_scan_window(now);
        if ports >= self.thresholds.port_scan && host.try_fire(CooldownKey::PortScan, now) {
            alerts.push(self.raise(
                AlertCategory::PortScan,
                format!("Port scan detected ({} ports)", ports),
                packet,
            ));
            // Start counting diversity afresh after an alert.
            host.clear_ports();
        }

        // ── DDoS Detection ───────────────────────────────────────────────────
        let rate = host.packets_in_rate_window(now);
        if rate >= self.thresholds.ddos && host.try_fire(CooldownKey::Ddos, now) {
            alerts.push(self.raise(
                AlertCategory::Ddos,
                format!("High packet rate ({} pkts/{}s)", rate, ddos_window().num_seconds()),
                packet,
            ));
        }

        // ── Suspicious Port Detection ────────────────────────────────────────
        if is_suspicious_port(packet.dst_port)
            && packet.dst_ip == local_ip
            && host.try_fire(CooldownKey::Suspicious(packet.dst_port), now)
        {
            alerts.push(self.raise(
                AlertCategory::SuspiciousConnection,
                format!("Connection to sensitive port {}", packet.dst_port),
                packet,
            ));
        }

        // ── Malicious Port Detection ─────────────────────────────────────────
        if (is_malicious_port(packet.dst_port) || is_malicious_port(packet.src_port))
            && host.try_fire(CooldownKey::Malicious(packet.dst_port), now)
        {
            alerts.push(self.raise(
                AlertCategory::MaliciousActivity,
                format!("Known malicious port {}", packet.dst_port),
                packet,
            ));
        }

        if !alerts.is_empty() {
            // Queue while still holding the source entry so alerts from one
            // source enter the queue in signature order.
            if let Ok(mut queue) = self.pending.lock() {
                queue.extend(alerts.iter().cloned());
            }
        }

        alerts
    }

    /// Removes and returns every queued alert.
    pub fn drain_alerts(&self) -> Vec<Alert> {
        match self.pending.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => Vec::new(),
        }
    }

    /// Total alerts raised since start-up.
    pub fn alert_count(&self) -> u64 {
        self.signatures.load(Ordering::Relaxed)
    }

    /// Number of sources with live detector state.
    pub fn tracked_sources(&self) -> usize {
        self.hosts.len()
    }

    /// Forgets sources whose windows and cooldowns have all expired.
    ///
    /// Its next packet starts a fresh window with no cooldowns armed. Returns
    /// the number of sources removed.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.hosts.len();
        self.hosts.retain(|_, host| !host.is_idle(now));
        before.saturating_sub(self.hosts.len())
    }

    /// [`evict_idle`](Self::evict_idle) at the latest packet time seen.
    pub fn sweep_idle(&self) -> usize {
        let latest = self.latest.load(Ordering::Relaxed);
        if latest == i64::MIN {
            return 0;
        }
        match Utc.timestamp_millis_opt(latest).single() {
            Some(now) => self.evict_idle(now),
            None => 0,
        }
    }

    fn raise(&self, category: AlertCategory, name: String, packet: &ObservedPacket) -> Alert {
        let n = self.signatures.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
        Alert {
            signature_id:   format!("SNSM-{}-{}", category.signature_tag(), n),
            signature_name: name,
            severity:       category.severity(),
            category,
            src_ip:         packet.src_ip,
            dst_ip:         packet.dst_ip,
            src_port:       packet.src_port,
            dst_port:       packet.dst_port,
            protocol:       packet.protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::{Protocol, SessionStats, Severity};
    use chrono::Duration;
    use std::sync::Arc;
    use std::thread;

    const LOCAL: &str = "192.168.1.50";

    fn t(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + millis).unwrap()
    }

    fn local() -> IpAddr {
        LOCAL.parse().unwrap()
    }

    fn detector() -> ThreatDetector {
        ThreatDetector::new(Thresholds::default(), SessionStats::new())
    }

    fn pkt(src: &str, sport: u16, dst: &str, dport: u16, at: DateTime<Utc>) -> ObservedPacket {
        ObservedPacket {
            src_ip:      src.parse().unwrap(),
            dst_ip:      dst.parse().unwrap(),
            src_port:    sport,
            dst_port:    dport,
            protocol:    Protocol::Tcp,
            byte_length: 60,
            observed_at: at,
        }
    }

    fn by_category(alerts: &[Alert], category: AlertCategory) -> usize {
        alerts.iter().filter(|a| a.category == category).count()
    }

    /// Sends `count` packets to distinct high ports, 100 ms apart.
    fn scan(d: &ThreatDetector, src: &str, first_port: u16, count: u16, start_ms: i64) -> Vec<Alert> {
        (0..count)
            .flat_map(|i| {
                let p = pkt(src, 55000, "8.8.8.8", first_port + i, t(start_ms + i as i64 * 100));
                d.analyze(&p, local())
            })
            .collect()
    }

    #[test]
    fn twenty_ports_in_ten_seconds_raise_one_port_scan() {
        let d = detector();
        let alerts = scan(&d, "203.0.113.9", 10000, 20, 0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::PortScan);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].signature_name, "Port scan detected (20 ports)");
        assert_eq!(alerts[0].signature_id, "SNSM-PORTSCAN-1");
    }

    #[test]
    fn nineteen_ports_stay_quiet() {
        let d = detector();
        assert!(scan(&d, "203.0.113.9", 10000, 19, 0).is_empty());
    }

    #[test]
    fn port_scan_is_suppressed_during_cooldown() {
        let d = detector();
        assert_eq!(scan(&d, "203.0.113.9", 10000, 20, 0).len(), 1);
        // A 21st port, then a whole second burst, inside the 60 s cooldown.
        assert!(scan(&d, "203.0.113.9", 10020, 1, 2_000).is_empty());
        assert!(scan(&d, "203.0.113.9", 20000, 25, 3_000).is_empty());
    }

    #[test]
    fn port_scan_resets_port_window() {
        let d = detector();
        scan(&d, "203.0.113.9", 10000, 20, 0);
        let src: IpAddr = "203.0.113.9".parse().unwrap();
        assert_eq!(d.hosts.get(&src).unwrap().port_entries(), 0);

        // Once the cooldown has elapsed a fresh scan is reported again.
        assert!(scan(&d, "203.0.113.9", 30000, 19, 61_000).is_empty());
        assert_eq!(scan(&d, "203.0.113.9", 30019, 1, 62_900).len(), 1);
    }

    #[test]
    fn port_scan_ignores_ports_outside_the_window() {
        let d = detector();
        // Ten ports, then ten more more than ten seconds later.
        scan(&d, "203.0.113.9", 10000, 10, 0);
        assert!(scan(&d, "203.0.113.9", 10010, 10, 11_000).is_empty());
    }

    #[test]
    fn hundred_packets_in_five_seconds_raise_one_ddos() {
        let d = detector();
        let mut alerts = Vec::new();
        for i in 0..150 {
            alerts.extend(d.analyze(&pkt("198.51.100.4", 40000, "8.8.8.8", 80, t(i * 20)), local()));
        }
        assert_eq!(by_category(&alerts, AlertCategory::Ddos), 1);
        let ddos = alerts.iter().find(|a| a.category == AlertCategory::Ddos).unwrap();
        assert_eq!(ddos.severity, Severity::Critical);
        assert_eq!(ddos.signature_name, "High packet rate (100 pkts/5s)");
        assert_eq!(ddos.signature_id, "SNSM-DDOS-1");
    }

    #[test]
    fn ninety_nine_packets_stay_quiet() {
        let d = detector();
        for i in 0..99 {
            assert!(d.analyze(&pkt("198.51.100.4", 40000, "8.8.8.8", 80, t(i * 20)), local()).is_empty());
        }
    }

    #[test]
    fn ddos_and_port_scan_fire_independently_from_one_burst() {
        let d = detector();
        let mut alerts = Vec::new();
        for i in 0..100u16 {
            let p = pkt("198.51.100.4", 40000, "8.8.8.8", 1000 + i, t(i as i64 * 10));
            alerts.extend(d.analyze(&p, local()));
        }
        assert_eq!(by_category(&alerts, AlertCategory::PortScan), 1);
        assert_eq!(by_category(&alerts, AlertCategory::Ddos), 1);
        assert_eq!(alerts[0].signature_id, "SNSM-PORTSCAN-1");
        assert_eq!(alerts[1].signature_id, "SNSM-DDOS-2");
    }

    #[test]
    fn suspicious_port_only_for_inbound_traffic_to_us() {
        let d = detector();
        // We connect out to someone's SSH: no alert.
        assert!(d.analyze(&pkt(LOCAL, 50000, "203.0.113.1", 22, t(0)), local()).is_empty());

        let alerts = d.analyze(&pkt("203.0.113.1", 50000, LOCAL, 22, t(0)), local());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::SuspiciousConnection);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[0].signature_name, "Connection to sensitive port 22");
        assert!(alerts[0].signature_id.starts_with("SNSM-SUSP-"));
    }

    #[test]
    fn suspicious_cooldowns_are_per_port() {
        let d = detector();
        assert_eq!(d.analyze(&pkt("203.0.113.1", 50000, LOCAL, 22, t(0)), local()).len(), 1);
        assert!(d.analyze(&pkt("203.0.113.1", 50001, LOCAL, 22, t(1_000)), local()).is_empty());
        assert_eq!(d.analyze(&pkt("203.0.113.1", 50002, LOCAL, 3389, t(2_000)), local()).len(), 1);
        // Another source is never suppressed by the first one.
        assert_eq!(d.analyze(&pkt("203.0.113.2", 50000, LOCAL, 22, t(3_000)), local()).len(), 1);
        // 300 s after the first firing the rule is armed again.
        assert!(d.analyze(&pkt("203.0.113.1", 50003, LOCAL, 22, t(299_000)), local()).is_empty());
        assert_eq!(d.analyze(&pkt("203.0.113.1", 50004, LOCAL, 22, t(300_000)), local()).len(), 1);
    }

    #[test]
    fn malicious_port_matches_either_endpoint() {
        let d = detector();
        let out = d.analyze(&pkt("10.0.0.5", 50000, "203.0.113.66", 4444, t(0)), local());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].category, AlertCategory::MaliciousActivity);
        assert_eq!(out[0].severity, Severity::Critical);
        assert_eq!(out[0].signature_name, "Known malicious port 4444");

        let back = d.analyze(&pkt("203.0.113.66", 31337, "10.0.0.5", 50000, t(0)), local());
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].signature_name, "Known malicious port 50000");
    }

    #[test]
    fn malicious_cooldown_is_keyed_by_destination_port() {
        let d = detector();
        assert_eq!(d.analyze(&pkt("203.0.113.66", 31337, "10.0.0.5", 50000, t(0)), local()).len(), 1);
        assert!(d.analyze(&pkt("203.0.113.66", 31337, "10.0.0.5", 50000, t(30_000)), local()).is_empty());
        assert_eq!(d.analyze(&pkt("203.0.113.66", 31337, "10.0.0.5", 50001, t(30_000)), local()).len(), 1);
        assert_eq!(d.analyze(&pkt("203.0.113.66", 31337, "10.0.0.5", 50000, t(60_000)), local()).len(), 1);
    }

    #[test]
    fn one_packet_can_raise_several_alerts_with_shared_counter() {
        let d = detector();
        // 3306 is suspicious; source port 6667 is malicious.
        let alerts = d.analyze(&pkt("203.0.113.5", 6667, LOCAL, 3306, t(0)), local());
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].signature_id, "SNSM-SUSP-1");
        assert_eq!(alerts[1].signature_id, "SNSM-MAL-2");
        assert_eq!(d.alert_count(), 2);
    }

    #[test]
    fn alerts_are_queued_until_drained() {
        let d = detector();
        d.analyze(&pkt("203.0.113.1", 50000, LOCAL, 22, t(0)), local());
        d.analyze(&pkt("203.0.113.1", 50000, LOCAL, 23, t(0)), local());
        let drained = d.drain_alerts();
        assert_eq!(drained.len(), 2);
        assert!(d.drain_alerts().is_empty());
    }

    #[test]
    fn unspecified_local_ip_disables_suspicious_rule() {
        let d = detector();
        let unspecified: IpAddr = "0.0.0.0".parse().unwrap();
        assert!(d.analyze(&pkt("203.0.113.1", 50000, LOCAL, 22, t(0)), unspecified).is_empty());
    }

    #[test]
    fn idle_sources_are_evicted() {
        let d = detector();
        d.analyze(&pkt("203.0.113.1", 50000, "8.8.8.8", 80, t(0)), local());
        d.analyze(&pkt("203.0.113.2", 50000, LOCAL, 22, t(0)), local());
        assert_eq!(d.tracked_sources(), 2);

        assert_eq!(d.evict_idle(t(0) + Duration::seconds(61)), 1);
        assert_eq!(d.tracked_sources(), 1);
        assert_eq!(d.evict_idle(t(0) + Duration::seconds(300)), 1);
        assert_eq!(d.tracked_sources(), 0);
    }

    #[test]
    fn sweep_follows_packet_time() {
        let d = detector();
        assert_eq!(d.sweep_idle(), 0);
        d.analyze(&pkt("203.0.113.1", 50000, "8.8.8.8", 80, t(0)), local());
        // Latest packet time is t(0): nothing has aged out yet.
        assert_eq!(d.sweep_idle(), 0);
        d.analyze(&pkt("203.0.113.2", 50000, "8.8.8.8", 80, t(61_000)), local());
        assert_eq!(d.sweep_idle(), 1);
        assert_eq!(d.tracked_sources(), 1);
    }

    #[test]
    fn returning_source_is_counted_once() {
        let d = detector();
        d.analyze(&pkt("203.0.113.1", 50000, "8.8.8.8", 80, t(0)), local());
        assert_eq!(d.evict_idle(t(61_000)), 1);
        d.analyze(&pkt("203.0.113.1", 50000, "8.8.8.8", 80, t(62_000)), local());
        assert_eq!(d.tracked_sources(), 1);
        assert_eq!(d.stats.total_hosts_seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn eviction_rearms_cooldowns_after_a_clock_step_back() {
        let d = detector();
        assert_eq!(scan(&d, "203.0.113.9", 10000, 20, 1_000_000).len(), 1);
        // Kept state still suppresses a rescan ten seconds later.
        assert!(scan(&d, "203.0.113.9", 20000, 20, 1_010_000).is_empty());

        let d = detector();
        assert_eq!(scan(&d, "203.0.113.9", 10000, 20, 1_000_000).len(), 1);
        d.analyze(&pkt("198.51.100.7", 50000, "8.8.8.8", 80, t(1_100_000)), local());
        assert_eq!(d.sweep_idle(), 1);
        // The clock steps back to t=1010 s: the evicted scanner fires again.
        assert_eq!(scan(&d, "203.0.113.9", 20000, 20, 1_010_000).len(), 1);
        assert_eq!(d.stats.total_hosts_seen.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn concurrent_analysis_of_one_source_fires_once() {
        let d = Arc::new(detector());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = Arc::clone(&d);
                thread::spawn(move || d.analyze(&pkt("203.0.113.1", 50000, LOCAL, 22, t(0)), local()))
            })
            .collect();
        let fired: usize = handles.into_iter().map(|h| h.join().unwrap().len()).sum();
        assert_eq!(fired, 1);
        assert_eq!(d.drain_alerts().len(), 1);
    }
}
