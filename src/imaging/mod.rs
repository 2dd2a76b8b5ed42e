//! Image normalization pipeline.
//!
//! Every uploaded image is converted to the canonical encoding (flattened
//! true-color JPEG within the configured dimension ceiling) before it is
//! sent upstream. A second mode re-encodes under a byte ceiling for
//! providers with hard payload limits.

mod normalize;
mod shrink;

pub use normalize::{is_heic, normalize_upload, reencode_jpeg, NormalizeOptions, NormalizedImage};
pub use shrink::{shrink_to_limit, ShrinkOptions};

/// Imaging error types
#[derive(Debug, thiserror::Error)]
pub enum ImagingError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Image encode failed: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ImagingError> for crate::error::ApiError {
    fn from(err: ImagingError) -> Self {
        match err {
            ImagingError::UnsupportedFormat(msg) => crate::error::ApiError::UnsupportedFormat(msg),
            ImagingError::Decode(msg) => {
                crate::error::ApiError::InvalidInput(format!("Error processing image: {msg}"))
            }
            other => crate::error::ApiError::Internal(other.to_string()),
        }
    }
}
