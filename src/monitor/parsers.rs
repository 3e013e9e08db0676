//! Normalisers turning capture-specific input into [`ObservedPacket`]s.

use crate::monitor::config::ESTIMATED_POLL_BYTES;
use crate::monitor::types::{ObservedPacket, Protocol};
use chrono::{DateTime, Utc};
use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

// ── Link-layer frames ────────────────────────────────────────────────────────

/// Decodes an Ethernet frame down to the transport ports.
///
/// `wire_len` is the original frame length (which may exceed the captured
/// bytes). Frames without an IP layer are dropped.
pub fn packet_from_frame(data: &[u8], wire_len: u64, observed_at: DateTime<Utc>) -> Option<ObservedPacket> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    let (src_ip, dst_ip) = match &sliced.ip {
        Some(InternetSlice::Ipv4(h, _)) => (
            IpAddr::V4(h.source_addr()),
            IpAddr::V4(h.destination_addr()),
        ),
        Some(InternetSlice::Ipv6(h, _)) => (
            IpAddr::V6(h.source_addr()),
            IpAddr::V6(h.destination_addr()),
        ),
        None => return None,
    };

    let (protocol, src_port, dst_port) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (Protocol::Tcp, tcp.source_port(), tcp.destination_port()),
        Some(TransportSlice::Udp(udp)) => (Protocol::Udp, udp.source_port(), udp.destination_port()),
        Some(TransportSlice::Icmpv4(_)) | Some(TransportSlice::Icmpv6(_)) => (Protocol::Icmp, 0, 0),
        _ => (Protocol::Other, 0, 0),
    };

    Some(ObservedPacket {
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        protocol,
        byte_length: wire_len,
        observed_at,
    })
}

// ── Connection table ─────────────────────────────────────────────────────────

/// One established socket from the OS connection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub local:    SocketAddr,
    pub remote:   SocketAddr,
    pub protocol: Protocol,
}

impl Connection {
    /// The local -> remote observation fed to the flow table.
    pub fn to_packet(&self, observed_at: DateTime<Utc>) -> ObservedPacket {
        ObservedPacket {
            src_ip:      self.local.ip(),
            dst_ip:      self.remote.ip(),
            src_port:    self.local.port(),
            dst_port:    self.remote.port(),
            protocol:    self.protocol,
            byte_length: ESTIMATED_POLL_BYTES,
            observed_at,
        }
    }
}

/// Parses the body of `/proc/net/tcp` or `/proc/net/tcp6`.
///
/// The header line and malformed rows are skipped, as are sockets without a
/// remote endpoint (listeners and unconnected sockets).
pub fn parse_proc_net(contents: &str, protocol: Protocol) -> Vec<Connection> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| parse_proc_net_line(line, protocol))
        .collect()
}

fn parse_proc_net_line(line: &str, protocol: Protocol) -> Option<Connection> {
    let mut fields = line.split_whitespace();
    let _slot = fields.next()?;
    let local = parse_hex_endpoint(fields.next()?)?;
    let remote = parse_hex_endpoint(fields.next()?)?;

    if remote.port() == 0 || remote.ip().is_unspecified() {
        return None;
    }

    Some(Connection { local, remote, protocol })
}

/// Decodes `0100007F:0050` (IPv4) or the 32-digit IPv6 form.
///
/// The kernel prints each 32-bit address word in host byte order; ports are
/// plain hexadecimal numbers.
fn parse_hex_endpoint(field: &str) -> Option<SocketAddr> {
    let (addr, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;

    let ip = match addr.len() {
        8 => {
            let word = u32::from_str_radix(addr, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(addr.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };

    Some(SocketAddr::new(ip, port))
}
