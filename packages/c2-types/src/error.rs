use thiserror::Error;

/// Shared error taxonomy for drivers, the engagement controller, and the
/// broadcast service. Every variant here is one a caller can reasonably
/// branch on; anything else is wrapped by `anyhow` at the binary boundary.
#[derive(Debug, Error)]
pub enum C2Error {
    /// Missing or malformed config, or (RF driver) missing certificate files.
    #[error("config error: {0}")]
    ConfigError(String),

    /// Socket/serial port failed to open.
    #[error("connect error: {0}")]
    ConnectError(String),

    /// TLS handshake or certificate validation failure.
    #[error("tls error: {0}")]
    TlsError(String),

    /// Frame tag mismatch past the resync budget, malformed JSON, or a bad
    /// NMEA sentence after retries. Does not tear down the connection.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// No data received within the configured timeout.
    #[error("timeout waiting for data")]
    Timeout,

    /// An established connection was closed by the peer.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Radar rejected a configuration command while streaming.
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// `engage()` target not present in the latest fused snapshot.
    #[error("track {0} not found in latest snapshot")]
    TrackNotFound(u64),

    /// Command attempted in an invalid state (e.g. configure while disconnected).
    #[error("invalid state: {0}")]
    StateError(String),
}

pub type C2Result<T> = Result<T, C2Error>;
