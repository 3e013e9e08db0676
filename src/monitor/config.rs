use chrono::Duration;

/// How far back the per-source port and packet windows retain entries.
///
/// Both detection windows below are shorter. Older entries are dropped on the
/// next packet from the same source.
pub fn window_retention() -> Duration { Duration::seconds(60) }

/// Trailing window over which distinct destination ports are counted.
pub fn portscan_window() -> Duration { Duration::seconds(10) }

/// Trailing window over which packets are counted for volumetric detection.
pub fn ddos_window() -> Duration { Duration::seconds(5) }

/// Distinct ports within [`portscan_window`] that raise a port-scan alert.
pub const PORTSCAN_THRESHOLD: usize = 20;

/// Packets within [`ddos_window`] that raise a DDoS alert.
pub const DDOS_THRESHOLD: usize = 100;

/// Re-fire suppression for the port-scan, DDoS and malicious-port rules.
pub fn default_cooldown() -> Duration { Duration::seconds(60) }

/// Re-fire suppression for the suspicious-port rule.
pub fn suspicious_cooldown() -> Duration { Duration::seconds(300) }

/// Administrative services that should not be reached from outside.
pub const SUSPICIOUS_PORTS: [u16; 9] = [22, 23, 3389, 445, 135, 139, 1433, 3306, 5432];

/// Ports associated with backdoors, C2 shells and IRC botnets.
pub const MALICIOUS_PORTS: [u16; 6] = [4444, 5555, 6666, 31337, 12345, 6667];

pub fn is_suspicious_port(port: u16) -> bool {
    SUSPICIOUS_PORTS.contains(&port)
}

pub fn is_malicious_port(port: u16) -> bool {
    MALICIOUS_PORTS.contains(&port)
}

/// Well-known service name for a destination port, if any.
pub fn service_name(port: u16) -> Option<&'static str> {
    let name = match port {
        20   => "ftp-data",
        21   => "ftp",
        22   => "ssh",
        23   => "telnet",
        25   => "smtp",
        53   => "dns",
        80   => "http",
        110  => "pop3",
        143  => "imap",
        443  => "https",
        445  => "smb",
        993  => "imaps",
        995  => "pop3s",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        8080 => "http-proxy",
        8443 => "https-alt",
        _    => return None,
    };
    Some(name)
}

/// Byte length attributed to each connection seen by the connection-table
/// poller, which cannot observe real byte counts.
pub const ESTIMATED_POLL_BYTES: u64 = 500;

/// Pause between two connection-table polls.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Read timeout for live capture, so the shutdown flag is noticed promptly.
pub const CAPTURE_TIMEOUT_MS: i32 = 200;

/// Default cadence of the flow/alert export tick, in seconds.
pub const FLOW_UPLOAD_INTERVAL: u64 = 5;

/// Default cadence of the heartbeat, in seconds.
pub const HEARTBEAT_INTERVAL: u64 = 30;

/// Default upper bound on flows per collector request.
pub const MAX_FLOWS_PER_BATCH: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_tables_have_expected_sizes() {
        assert_eq!(SUSPICIOUS_PORTS.len(), 9);
        assert_eq!(MALICIOUS_PORTS.len(), 6);
        let named = (0..=u16::MAX).filter(|p| service_name(*p).is_some()).count();
        assert_eq!(named, 18);
    }

    #[test]
    fn port_classification() {
        assert!(is_suspicious_port(3389));
        assert!(!is_suspicious_port(443));
        assert!(is_malicious_port(31337));
        assert!(!is_malicious_port(22));
        assert_eq!(service_name(5432), Some("postgresql"));
        assert_eq!(service_name(9999), None);
    }
}
