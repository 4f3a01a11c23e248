//! Error types for mmwave-io

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// mmwave-io error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Communication timeout
    #[error("Communication timeout")]
    Timeout,

    /// Peer closed the channel or connection
    #[error("Channel closed by peer")]
    Closed,

    /// Invalid packet or response
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Worker initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Operation requires a loaded radar configuration
    #[error("No radar configuration loaded")]
    NotConfigured,

    /// Capture card or sensor protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Listener authentication handshake failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Settings file parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Settings file serialize error
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Wire serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
