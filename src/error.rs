use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("IO Error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Collector request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Collector rejected {endpoint} with status {status}")]
    Rejected { endpoint: String, status: u16 },
    #[error("Missing required setting: {0}")]
    MissingField(&'static str),
    #[error("Packet capture unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("Permission denied opening capture: {0} (run as root or grant CAP_NET_RAW)")]
    PermissionDenied(String),
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("Connection table unavailable: {0}")]
    ConnectionTableUnavailable(String),
    #[error("{msg}")]
    Custom { msg: String },
}

impl From<pcap::Error> for Error {
    fn from(e: pcap::Error) -> Self {
        let msg = e.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("permission") || lower.contains("not permitted") {
            Error::PermissionDenied(msg)
        } else {
            Error::CaptureUnavailable(msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcap_permission_errors_are_classified() {
        let e: Error = pcap::Error::PcapError("eth0: You don't have permission to capture on that device".into()).into();
        assert!(matches!(e, Error::PermissionDenied(_)));

        let e: Error = pcap::Error::PcapError("socket: Operation not permitted".into()).into();
        assert!(matches!(e, Error::PermissionDenied(_)));

        let e: Error = pcap::Error::PcapError("No such device exists".into()).into();
        assert!(matches!(e, Error::CaptureUnavailable(_)));
    }
}
