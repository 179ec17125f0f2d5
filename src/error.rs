use thiserror::Error;

/// Fatal conditions that terminate a connection's run.
///
/// A `ProtocolMiss` (known non-2xx-but-understood status) has no variant
/// here — it is recorded via `ConnectionStats::get_misses` and the run
/// continues; it never reaches this enum.
#[derive(Debug, Error)]
pub enum PacerError {
    #[error("invalid option: {0}")]
    ConfigInvalid(String),

    #[error("DNS resolution failed for {hostname}: {source}")]
    DnsFailure {
        hostname: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection refused")]
    ConnectRefused,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("unknown response code: {0}")]
    UnknownStatus(u16),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}
