use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[cfg(feature = "capture")]
    #[error("Capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("No packet source available: {0}")]
    NoPacketSource(String),

    #[error("HTTP server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;
