/// Result alias that carries the custom [`ShowError`] type.
pub type Result<T> = std::result::Result<T, ShowError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ShowError {
    /// Opening or closing a physical device failed. Surfaced to whoever
    /// toggled the device active; never retried automatically.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Catch-all for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration serialization failure.
    #[error("{0}")]
    Config(#[from] serde_json::Error),
}

impl ShowError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates a [`ShowError::DeviceUnavailable`] from the provided message.
    pub fn device<T: Into<String>>(msg: T) -> Self {
        Self::DeviceUnavailable(msg.into())
    }
}

impl From<&str> for ShowError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ShowError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
