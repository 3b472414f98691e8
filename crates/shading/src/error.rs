use std::path::PathBuf;

use crate::types::SurfaceId;

/// Errors raised by the shading core.
///
/// Construction-time problems (`InvalidArgument`, `Compile`) abort object
/// creation. Missing uniforms and exhausted light slots are not errors: they
/// are logged and reported through return values instead.
#[derive(Debug, thiserror::Error)]
pub enum ShadingError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("surface {0} has been released")]
    Released(SurfaceId),
    #[error(
        "deferred action '{label}' enqueued {added} more action(s) while the queue was draining"
    )]
    QueueGrewDuringDrain { label: &'static str, added: usize },
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("shader compilation failed: {0}")]
    Compile(String),
    #[error("gpu backend error: {0}")]
    Backend(String),
}

impl ShadingError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ShadingError::InvalidArgument(message.into())
    }
}

pub type Result<T, E = ShadingError> = std::result::Result<T, E>;
