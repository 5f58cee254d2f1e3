//! capsync processing library
//!
//! Turns an arbitrary captured image into an upload-ready JPEG whose longest
//! edge and encoded size are both bounded (see [`PreprocessConfig`]).
//!
//! The raster work sits behind the [`ImageCodec`] trait so the convergence
//! loop in [`ImagePreprocessor`] can be driven by a scripted codec in tests;
//! [`ImageRsCodec`] is the production implementation.

pub mod calculations;
pub mod error;
pub mod image;
pub mod preprocess;

pub use capsync_core::PreprocessConfig;
pub use error::{CodecError, PreprocessError};
pub use crate::image::{ImageCodec, ImageOrientation, ImageRsCodec};
pub use preprocess::{ImagePreprocessor, SourceImage, TARGET_MIME_TYPE};
