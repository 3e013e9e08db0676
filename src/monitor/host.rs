//! Per-source sliding windows.
//!
//! Port and packet entries are appended in arrival order and pruned from the
//! front. Two cursors mark where the port-scan and rate windows begin, and a
//! per-port count covers the port entries from the scan cursor onwards, so
//! each packet costs the same however busy the source is.
//!
//! A packet stamped earlier than one already stored (the clock stepped
//! backwards) breaks the ordering. Until the out-of-order entries age out,
//! pruning and counting fall back to full passes over the deques.

use crate::monitor::config::{
    ddos_window, default_cooldown, portscan_window, suspicious_cooldown, window_retention,
};
use crate::monitor::types::CooldownKey;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};

/// Sliding-window state kept for a single source address.
///
/// All timestamps are packet times. Entries older than the retention window
/// are pruned lazily on the next packet from this source.
pub struct HostWindow {
    /// `(dst_port, seen_at)` pairs. Deduplicated on the exact pair only, so the
    /// same port seen at two different instants appears twice.
    ports:       VecDeque<(u16, DateTime<Utc>)>,
    /// Arrival time of every packet from this source.
    packets:     VecDeque<DateTime<Utc>>,
    /// Last time each rule fired for this source.
    cooldowns:   HashMap<CooldownKey, DateTime<Utc>>,
    /// Both deques are in non-decreasing time order.
    ordered:     bool,
    /// Index of the first `ports` entry inside the scan window.
    scan_from:   usize,
    /// Entry count per port over `ports[scan_from..]`; zero counts are removed.
    scan_counts: HashMap<u16, u32>,
    /// Index of the first `packets` entry inside the rate window.
    rate_from:   usize,
    /// Time the cursors were last moved to. `None` forces a rebuild.
    cursor_at:   Option<DateTime<Utc>>,
}

impl HostWindow {
    pub fn new() -> Self {
        Self {
            ports:       VecDeque::new(),
            packets:     VecDeque::new(),
            cooldowns:   HashMap::new(),
            ordered:     true,
            scan_from:   0,
            scan_counts: HashMap::new(),
            rate_from:   0,
            cursor_at:   None,
        }
    }

    /// Folds one packet towards `dst_port` into the windows at time `now`.
    ///
    /// Port zero (ICMP, unknown transports) counts as a packet but never
    /// towards port diversity.
    pub fn observe(&mut self, dst_port: u16, now: DateTime<Utc>) {
        self.prune(now);
        self.record(dst_port, now);
        self.advance(now);
    }

    /// Number of distinct ports seen strictly after `now - portscan_window()`.
    pub fn ports_in_scan_window(&self, now: DateTime<Utc>) -> usize {
        if self.ordered && self.cursor_at == Some(now) {
            return self.scan_counts.len();
        }
        let start = now - portscan_window();
        self.ports
            .iter()
            .filter(|(_, t)| *t > start)
            .map(|(p, _)| *p)
            .collect::<HashSet<u16>>()
            .len()
    }

    /// Number of packets seen strictly after `now - ddos_window()`.
    pub fn packets_in_rate_window(&self, now: DateTime<Utc>) -> usize {
        if self.ordered && self.cursor_at == Some(now) {
            return self.packets.len() - self.rate_from;
        }
        let start = now - ddos_window();
        self.packets.iter().filter(|t| **t > start).count()
    }

    /// Forgets port diversity once a port scan has been reported.
    pub fn clear_ports(&mut self) {
        self.ports.clear();
        self.scan_counts.clear();
        self.scan_from = 0;
    }

    /// Checks and arms a cooldown in one step.
    ///
    /// Returns `true` when the rule may fire, in which case `now` is recorded
    /// as its last firing. A suppressed attempt leaves the stored time as is.
    pub fn try_fire(&mut self, key: CooldownKey, now: DateTime<Utc>) -> bool {
        let cooldown = cooldown_for(key);
        if let Some(last) = self.cooldowns.get(&key) {
            if now - *last < cooldown {
                return false;
            }
        }
        self.cooldowns.insert(key, now);
        true
    }

    /// True when every window entry has aged out and every cooldown has
    /// elapsed as of `now`.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        let cutoff = now - window_retention();
        self.ports.iter().all(|(_, t)| *t <= cutoff)
            && self.packets.iter().all(|t| *t <= cutoff)
            && self
                .cooldowns
                .iter()
                .all(|(key, last)| now - *last >= cooldown_for(*key))
    }

    #[cfg(test)]
    pub(crate) fn port_entries(&self) -> usize {
        self.ports.len()
    }

    // ── Window maintenance ───────────────────────────────────────────────────

    /// Drops port and packet entries at or before `now - window_retention()`.
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - window_retention();

        if !self.ordered {
            self.ports.retain(|(_, t)| *t > cutoff);
            self.packets.retain(|t| *t > cutoff);
            self.ordered = in_time_order(self.ports.iter().map(|(_, t)| *t))
                && in_time_order(self.packets.iter().copied());
            self.rebuild_cursors(now);
            return;
        }

        while let Some(&(port, t)) = self.ports.front() {
            if t > cutoff {
                break;
            }
            self.ports.pop_front();
            if self.scan_from > 0 {
                self.scan_from -= 1;
            } else {
                self.uncount(port);
            }
        }
        while let Some(&t) = self.packets.front() {
            if t > cutoff {
                break;
            }
            self.packets.pop_front();
            self.rate_from = self.rate_from.saturating_sub(1);
        }
    }

    /// Appends one packet. A port is skipped only when the exact
    /// `(port, now)` pair is already present.
    fn record(&mut self, dst_port: u16, now: DateTime<Utc>) {
        if dst_port != 0 && !self.holds_port_at(dst_port, now) {
            if matches!(self.ports.back(), Some((_, t)) if *t > now) {
                self.ordered = false;
            }
            self.ports.push_back((dst_port, now));
            *self.scan_counts.entry(dst_port).or_insert(0) += 1;
        }

        if matches!(self.packets.back(), Some(t) if *t > now) {
            self.ordered = false;
        }
        self.packets.push_back(now);
    }

    fn holds_port_at(&self, port: u16, now: DateTime<Utc>) -> bool {
        if self.ordered {
            // Entries stamped `now` sit at the back.
            self.ports
                .iter()
                .rev()
                .take_while(|(_, t)| *t >= now)
                .any(|&(p, t)| p == port && t == now)
        } else {
            self.ports.contains(&(port, now))
        }
    }

    /// Moves both cursors forward to `now`.
    fn advance(&mut self, now: DateTime<Utc>) {
        let forward = matches!(self.cursor_at, Some(at) if now >= at);
        if !(self.ordered && forward) {
            self.rebuild_cursors(now);
            return;
        }

        let scan_start = now - portscan_window();
        while let Some(&(port, t)) = self.ports.get(self.scan_from) {
            if t > scan_start {
                break;
            }
            self.scan_from += 1;
            self.uncount(port);
        }

        let rate_start = now - ddos_window();
        while matches!(self.packets.get(self.rate_from), Some(t) if *t <= rate_start) {
            self.rate_from += 1;
        }

        self.cursor_at = Some(now);
    }

    /// Recomputes cursors and counts from scratch. Out of order, the cursors
    /// are parked at the front and the counting queries take the slow path.
    fn rebuild_cursors(&mut self, now: DateTime<Utc>) {
        if self.ordered {
            let scan_start = now - portscan_window();
            let rate_start = now - ddos_window();
            self.scan_from = self.ports.partition_point(|(_, t)| *t <= scan_start);
            self.rate_from = self.packets.partition_point(|t| *t <= rate_start);
            self.cursor_at = Some(now);
        } else {
            self.scan_from = 0;
            self.rate_from = 0;
            self.cursor_at = None;
        }

        self.scan_counts.clear();
        for &(port, _) in self.ports.range(self.scan_from..) {
            *self.scan_counts.entry(port).or_insert(0) += 1;
        }
    }

    fn uncount(&mut self, port: u16) {
        if let Some(n) = self.scan_counts.get_mut(&port) {
            *n -= 1;
            if *n == 0 {
                self.scan_counts.remove(&port);
            }
        }
    }
}

impl Default for HostWindow {
    fn default() -> Self {
        Self::new()
    }
}

fn in_time_order<I: IntoIterator<Item = DateTime<Utc>>>(times: I) -> bool {
    let mut prev: Option<DateTime<Utc>> = None;
    for t in times {
        if matches!(prev, Some(p) if t < p) {
            return false;
        }
        prev = Some(t);
    }
    true
}

fn cooldown_for(key: CooldownKey) -> Duration {
    match key {
        CooldownKey::Suspicious(_) => suspicious_cooldown(),
        _                          => default_cooldown(),
    }
}
