//! Common error types for ghostclick-platform.

use ghostclick_core::CapabilityError;
use std::path::PathBuf;
use thiserror::Error;

/// Platform-level errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not implemented")]
    NotImplemented,
    #[error("window {0} cannot be captured")]
    CaptureFailed(usize),
    #[error("template {path}: {source}")]
    Template {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("template {0} larger than window capture")]
    TemplateTooLarge(PathBuf),
    #[error("injection failed: {0}")]
    InjectionFailed(String),
    #[error("png: {0}")]
    Png(#[from] png::DecodingError),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

impl From<PlatformError> for CapabilityError {
    fn from(err: PlatformError) -> Self {
        let message = err.to_string();
        match err {
            PlatformError::NotImplemented => CapabilityError::NotImplemented,
            PlatformError::CaptureFailed(_) => CapabilityError::Capture(message),
            PlatformError::InjectionFailed(_) => CapabilityError::Injection(message),
            _ => CapabilityError::Match(message),
        }
    }
}
