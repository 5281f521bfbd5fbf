//! Error types for the listing-copy library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ListingCopyError`]: **Fatal**: the generation request cannot produce
//!   copy at all (no images, too many images, model unreachable, provider not
//!   configured). Returned as `Err(ListingCopyError)` from the top-level
//!   `generate_*` functions.
//!
//! * [`NormalizeError`]: **Non-fatal**: a single image could not be decoded
//!   or re-encoded. The normaliser keeps the original bytes and records the
//!   error inside [`crate::pipeline::normalize::NormalizeAction::Fallback`]
//!   so one bad photo never blocks the rest of the batch.
//!
//! A model answer that does not match the requested JSON shape is neither:
//! the parser always degrades to best-effort copy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All fatal errors returned by the listing-copy library.
#[derive(Debug, Error)]
pub enum ListingCopyError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The request carried no usable image.
    #[error("At least one image is required")]
    NoImagesProvided,

    /// The request carried more images than the configured cap.
    #[error("Maximum {max} images allowed (got {count})")]
    TooManyImages { count: usize, max: usize },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The model call could not complete: transport error, non-2xx status,
    /// rejected credential, undecodable body or timeout.
    #[error("Generative model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    /// The model answered successfully but produced no text.
    #[error("Generative model returned an empty response")]
    EmptyResponse,

    // ── Config errors ─────────────────────────────────────────────────────
    /// No credential or client is available for the generative model.
    #[error("Generative model '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ListingCopyError {
    /// HTTP status an inbound handler should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ListingCopyError::NoImagesProvided | ListingCopyError::TooManyImages { .. } => 400,
            ListingCopyError::ModelUnavailable { .. } | ListingCopyError::EmptyResponse => 502,
            ListingCopyError::ProviderNotConfigured { .. }
            | ListingCopyError::InvalidConfig(_)
            | ListingCopyError::Internal(_) => 500,
        }
    }

    /// `true` when the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ListingCopyError::ModelUnavailable { .. } | ListingCopyError::EmptyResponse
        )
    }

    /// JSON body an inbound handler returns alongside [`Self::http_status`].
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
        }
    }
}

/// Wire shape of an error response: `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A non-fatal error for a single image.
///
/// Never returned as `Err` from the public API; the original image is kept.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum NormalizeError {
    /// The bytes could not be decoded as an image.
    #[error("'{file_name}': decode failed: {detail}")]
    DecodeFailed { file_name: String, detail: String },

    /// The resized image could not be re-encoded.
    #[error("'{file_name}': encode failed: {detail}")]
    EncodeFailed { file_name: String, detail: String },

    /// The worker running the transform panicked or was cancelled.
    #[error("'{file_name}': normalisation task aborted: {detail}")]
    TaskAborted { file_name: String, detail: String },
}
