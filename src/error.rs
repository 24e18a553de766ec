use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    #[error("Engine launch failed: {0}")]
    EngineLaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Screenshot capture failed: {0}")]
    CaptureFailed(String),

    #[error("Rendering surface has no realized handle")]
    SurfaceUnavailable,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Render context termination failed: {0}")]
    TerminationFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Chrome error: {0}")]
    ChromeError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SnapshotError {
    /// Which stage of a capture this failure belongs to.
    pub fn kind(&self) -> FailureKind {
        match self {
            SnapshotError::NavigationFailed(_) | SnapshotError::ChromeError(_) => {
                FailureKind::Navigation
            }
            SnapshotError::CaptureFailed(_) | SnapshotError::SurfaceUnavailable => {
                FailureKind::Capture
            }
            SnapshotError::Timeout(_) => FailureKind::Timeout,
            SnapshotError::TerminationFailed(_) => FailureKind::Termination,
            SnapshotError::EngineLaunchFailed(_)
            | SnapshotError::InvalidUrl(_)
            | SnapshotError::ConfigurationError(_)
            | SnapshotError::IoError(_)
            | SnapshotError::SerializationError(_) => FailureKind::Setup,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SnapshotError::Timeout(_) => ErrorSeverity::Low,
            SnapshotError::ChromeError(_) => ErrorSeverity::Low,
            SnapshotError::SerializationError(_) => ErrorSeverity::Low,
            SnapshotError::EngineLaunchFailed(_) => ErrorSeverity::High,
            SnapshotError::ConfigurationError(_) => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Setup,
    Navigation,
    Capture,
    Timeout,
    Termination,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Setup => "setup",
            FailureKind::Navigation => "navigation",
            FailureKind::Capture => "capture",
            FailureKind::Timeout => "timeout",
            FailureKind::Termination => "termination",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::SerializationError(err.to_string())
    }
}

impl From<image::ImageError> for SnapshotError {
    fn from(err: image::ImageError) -> Self {
        SnapshotError::CaptureFailed(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for SnapshotError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        SnapshotError::ChromeError(err.to_string())
    }
}
