//! Directional flow aggregation.
//!
//! The table is a `DashMap` keyed by the directional 5-tuple. Every update
//! takes the shard lock of its key through `entry`, so lookup-or-create and
//! the counter bumps happen as one step. Draining removes keys one by one;
//! an update either lands in the flow being removed or, once the key is
//! gone, creates a fresh flow for the next drain. A packet is therefore
//! counted in exactly one drain.

use crate::monitor::types::{Flow, FlowKey, LocalIdentity, ObservedPacket, SharedStats};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::Ordering;

/// Concurrent-safe store of in-progress flows.
pub struct FlowTable {
    flows: DashMap<FlowKey, Flow>,
    stats: SharedStats,
}

impl FlowTable {
    pub fn new(stats: SharedStats) -> Self {
        Self { flows: DashMap::new(), stats }
    }

    /// Folds one packet into its flow, creating the flow on first sight.
    pub fn update(&self, packet: &ObservedPacket, local: &LocalIdentity) {
        let outbound = is_outbound(&packet.src_ip, local);
        let now = packet.observed_at;

        let mut flow = self.flows.entry(packet.flow_key()).or_insert_with(|| {
            self.stats.total_flows_tracked.fetch_add(1, Ordering::Relaxed);
            Flow {
                key:          packet.flow_key(),
                bytes_sent:   0,
                bytes_recv:   0,
                packets_sent: 0,
                packets_recv: 0,
                start_time:   now,
                end_time:     now,
                threat_score: 0,
            }
        });

        // A late packet (clock step, reordered replay) must not pull
        // end_time back before what has already been recorded.
        if now > flow.end_time {
            flow.end_time = now;
        }

        if outbound {
            flow.bytes_sent   = flow.bytes_sent.saturating_add(packet.byte_length);
            flow.packets_sent = flow.packets_sent.saturating_add(1);
        } else {
            flow.bytes_recv   = flow.bytes_recv.saturating_add(packet.byte_length);
            flow.packets_recv = flow.packets_recv.saturating_add(1);
        }
    }

    /// Removes and returns every flow currently in the table.
    pub fn drain_all(&self) -> Vec<Flow> {
        let keys: Vec<FlowKey> = self.flows.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|k| self.flows.remove(&k).map(|(_, flow)| flow))
            .collect()
    }
}

/// Direction heuristic: traffic from one of our own addresses or from an
/// RFC 1918 range counts as outbound.
///
/// Both ends of a LAN-to-LAN flow classify as outbound.
pub fn is_outbound(src: &IpAddr, local: &LocalIdentity) -> bool {
    if local.contains(src) {
        return true;
    }
    match src {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(_)  => false,
    }
}
