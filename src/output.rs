//! Result types returned by the generation pipeline.

use serde::{Deserialize, Serialize};

/// Title substituted when the model gives none.
pub const FALLBACK_TITLE: &str = "AI Generated Title";

/// Description substituted when the model gives none.
pub const FALLBACK_DESCRIPTION: &str = "AI generated description based on product images.";

/// Structured sales copy for one item.
///
/// `title` and `description` are always non-empty. The optional fields are
/// only present when the model supplied a usable value and are omitted from
/// the JSON form otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedListingCopy {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GeneratedListingCopy {
    /// Copy with only the mandatory fields set.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            price: None,
            category: None,
            brand: None,
            model: None,
        }
    }
}

/// Which parser tier produced a [`GeneratedListingCopy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopySource {
    /// A JSON object was found in the answer and decoded.
    Json,
    /// No decodable JSON; the line heuristic was used.
    Heuristic,
}

/// Counters collected during one generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Images sent to the model.
    pub image_count: usize,
    /// Raw image bytes sent to the model (before base64).
    pub image_bytes: usize,
    /// Prompt tokens reported by the model, 0 when not reported.
    pub input_tokens: u32,
    /// Generated tokens reported by the model, 0 when not reported.
    pub output_tokens: u32,
    /// Wall-clock time of the model call.
    pub model_duration_ms: u64,
    /// Wall-clock time of the whole request.
    pub total_duration_ms: u64,
}

/// Full result of [`crate::generate::generate_copy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub copy: GeneratedListingCopy,
    pub source: CopySource,
    /// Unparsed model text, kept for debugging prompt regressions.
    pub raw_text: String,
    pub stats: GenerationStats,
}
