//! Error types for ocrfuse.
//!
//! Two layers of errors exist:
//!
//! - `OcrFuseError` is returned by fallible library entry points (config
//!   loading, bitmap decoding, serialization). `std::io::Error` always bubbles
//!   up unchanged through the `Io` variant.
//! - Stage errors (`FilterError`, `RecognitionError`, `PageError`) describe what
//!   went wrong inside a page. Filter and recognition errors are absorbed per
//!   variant or per pass and recorded in the page diagnostics; a `PageError` is
//!   the terminal failure of one page and never affects other pages.
//!
//! # Example
//!
//! ```rust
//! use ocrfuse::{OcrFuseError, Result};
//!
//! fn parse_psm(value: &str) -> Result<u8> {
//!     value
//!         .parse::<u8>()
//!         .map_err(|e| OcrFuseError::validation_with_source(format!("Invalid psm '{}'", value), e))
//! }
//!
//! assert!(parse_psm("6").is_ok());
//! assert!(parse_psm("six").is_err());
//! ```
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::ocr::error::RecognitionError;

/// Result type alias using `OcrFuseError`.
pub type Result<T> = std::result::Result<T, OcrFuseError>;

/// Main error type for library operations.
#[derive(Debug, Error)]
pub enum OcrFuseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Image processing error: {message}")]
    ImageProcessing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("OCR error: {message}")]
    Ocr {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Page failed: {0}")]
    Page(#[from] PageError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for OcrFuseError {
    fn from(err: serde_json::Error) -> Self {
        OcrFuseError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<image::ImageError> for OcrFuseError {
    fn from(err: image::ImageError) -> Self {
        OcrFuseError::ImageProcessing {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<FilterError> for OcrFuseError {
    fn from(err: FilterError) -> Self {
        OcrFuseError::ImageProcessing {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<RecognitionError> for OcrFuseError {
    fn from(err: RecognitionError) -> Self {
        OcrFuseError::Ocr {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl OcrFuseError {
    error_constructor!(validation, Validation);
    error_constructor!(image_processing, ImageProcessing);
    error_constructor!(ocr, Ocr);
    error_constructor!(serialization, Serialization);
}

/// Failure of a single filter invocation.
///
/// Recoverable: the preprocessing pipeline drops the variant whose chain
/// produced it and carries on with the remaining strategies.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum FilterError {
    #[error("{filter}: invalid parameter '{param}': {reason}")]
    InvalidParameter {
        filter: String,
        param: String,
        reason: String,
    },

    #[error("{filter}: window of {window} px does not fit a {width}x{height} image")]
    IncompatibleDimensions {
        filter: String,
        window: u32,
        width: u32,
        height: u32,
    },

    #[error("{filter}: empty input image")]
    EmptyImage { filter: String },
}

impl FilterError {
    pub(crate) fn invalid(filter: &str, param: &str, reason: impl Into<String>) -> Self {
        FilterError::InvalidParameter {
            filter: filter.to_string(),
            param: param.to_string(),
            reason: reason.into(),
        }
    }
}

/// Terminal failure of one page.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PageError {
    /// Unusable input bitmap. Nothing else ran for the page.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Every preprocessing variant failed.
    #[error("no usable preprocessing variant ({failed} strategies failed)")]
    NoUsableVariant { failed: usize },

    /// Every recognition pass failed.
    #[error("no usable OCR result ({failed} passes failed)")]
    NoUsableOcrResult { failed: usize },

    /// A pipeline stage that the line table depends on never completed.
    #[error("line table build incomplete: missing stage '{stage}'")]
    BuildIncomplete { stage: String },

    /// A second line table was produced for a page that already has one.
    #[error("line table already produced for this page")]
    TableAlreadyProduced,

    /// The task processing the page panicked.
    #[error("page processing crashed: {0}")]
    Crashed(String),
}
