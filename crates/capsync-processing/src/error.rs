use thiserror::Error;

/// Failure of a single codec operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{0}")]
    Decode(String),
    #[error("{0}")]
    Encode(String),
}

/// Why an image could not be turned into an upload-ready asset.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Unable to decode image: {0}")]
    DecodeFailed(String),

    #[error("Failed to encode image: {0}")]
    EncodeFailed(String),

    #[error("Photo is too large to compress below {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
}

impl PreprocessError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PreprocessError::UnsupportedType(_) => "unsupported_type",
            PreprocessError::DecodeFailed(_) => "decode_failed",
            PreprocessError::EncodeFailed(_) => "encode_failed",
            PreprocessError::TooLarge { .. } => "too_large",
        }
    }

    /// What the user can do about it.
    pub fn next_step(&self) -> &'static str {
        match self {
            PreprocessError::UnsupportedType(_) => "Choose a photo (JPEG, PNG, WebP or GIF).",
            PreprocessError::DecodeFailed(_) => {
                "The file looks damaged. Retake the photo or pick another one."
            }
            PreprocessError::EncodeFailed(_) => "Try again; if it keeps failing, retake the photo.",
            PreprocessError::TooLarge { .. } => {
                "Retake the photo with a lower camera resolution, or crop it first."
            }
        }
    }
}
