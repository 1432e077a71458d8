use thiserror::Error;

#[derive(Error, Debug)]
pub enum XpadError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hardware initialization failed: {0}")]
    HardwareInit(String),

    #[error("Hardware operation '{operation}' failed: {source}")]
    HardwareOperation {
        operation: String,
        #[source]
        source: TransportError,
    },

    #[error("Frame processing error: {0}")]
    FrameProcessing(String),

    #[error("Camera task unavailable: {0}")]
    TaskUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

/// Failure code returned by a vendor transport call.
///
/// The vendor API reports nothing beyond success or failure, so the only
/// detail carried is the name of the call that failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{call} returned an error")]
pub struct TransportError {
    pub call: &'static str,
}

impl TransportError {
    pub fn new(call: &'static str) -> Self {
        Self { call }
    }
}

pub type Result<T> = std::result::Result<T, XpadError>;

// Helper functions for creating errors
impl XpadError {
    pub fn config(msg: impl Into<String>) -> Self {
        XpadError::Config(msg.into())
    }

    pub fn hardware_init(msg: impl Into<String>) -> Self {
        XpadError::HardwareInit(msg.into())
    }

    pub fn hardware(operation: impl Into<String>, source: TransportError) -> Self {
        XpadError::HardwareOperation {
            operation: operation.into(),
            source,
        }
    }

    pub fn frame_processing(msg: impl Into<String>) -> Self {
        XpadError::FrameProcessing(msg.into())
    }

    pub fn task_unavailable(msg: impl Into<String>) -> Self {
        XpadError::TaskUnavailable(msg.into())
    }

    /// True for errors raised synchronously by a setter, which never touch the
    /// acquisition state.
    pub fn is_config(&self) -> bool {
        matches!(self, XpadError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_error_names_call() {
        let err = XpadError::hardware("bulk retrieval", TransportError::new("xpci_getImgSeq"));
        let text = err.to_string();
        assert!(text.contains("bulk retrieval"));
        assert!(text.contains("xpci_getImgSeq"));
    }

    #[test]
    fn test_is_config() {
        assert!(XpadError::config("bad depth").is_config());
        assert!(!XpadError::hardware_init("no modules").is_config());
    }
}
