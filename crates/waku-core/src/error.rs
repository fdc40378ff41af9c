use thiserror::Error;

#[derive(Debug, Error)]
pub enum WakuError {
    #[error("Session not found for device_id: {0}")]
    NotFound(String),

    #[error("Session already exists for device_id: {0}")]
    AlreadyExists(String),

    #[error("Invalid device_id '{0}'")]
    InvalidDeviceId(String),

    #[error("Session {0} not connected. Please scan QR code first")]
    NotConnected(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Webhook delivery failed after {attempts} attempts: {last_error}")]
    DeliveryExhausted { attempts: u32, last_error: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WakuError {
    /// Wrap a collaborator failure with the operation that failed.
    pub fn upstream(op: &str, err: anyhow::Error) -> Self {
        Self::Upstream(format!("failed to {op}: {err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, WakuError>;
