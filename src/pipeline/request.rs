//! Prompt assembly: fixed instruction text plus the product images.
//!
//! [`build_prompt`] takes the images by value: each asset is consumed exactly
//! once by the request builder and the raw buffers are dropped as soon as they
//! are base64-encoded. Nothing is cached between requests.
//!
//! ## Part order
//!
//! The instruction text comes first, then one inline part per image in the
//! order the user selected them. The prompt speaks of "these images", and the
//! model reads them left to right, so the front view the user picked first
//! stays first.

use crate::error::ListingCopyError;
use crate::pipeline::encode::{encode_inline, InlineImage};
use crate::pipeline::intake::ImageAsset;
use crate::prompts::LISTING_COPY_PROMPT;
use serde::Serialize;
use tracing::debug;

/// A ready-to-send multimodal prompt.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub instruction: &'static str,
    /// Images in selection order.
    pub images: Vec<InlineImage>,
}

impl PromptRequest {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Total decoded image payload in bytes.
    pub fn image_bytes(&self) -> usize {
        self.images.iter().map(InlineImage::decoded_len).sum()
    }

    /// Render the request body for the `generateContent` endpoint.
    pub fn to_wire(&self, options: &SamplingOptions) -> GenerateContentRequest {
        let parts = std::iter::once(WirePart::Text {
            text: self.instruction.to_string(),
        })
        .chain(self.images.iter().cloned().map(|inline_data| WirePart::InlineData { inline_data }))
        .collect();

        GenerateContentRequest {
            contents: vec![WireContent {
                role: "user",
                parts,
            }],
            generation_config: WireGenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_output_tokens,
            },
        }
    }
}

/// Build the prompt for `images`, preserving their order.
///
/// The image-count cap is the caller's contract; this function processes
/// exactly what it is given and never truncates. An empty slice is rejected
/// with [`ListingCopyError::NoImagesProvided`].
pub fn build_prompt(images: Vec<ImageAsset>) -> Result<PromptRequest, ListingCopyError> {
    if images.is_empty() {
        return Err(ListingCopyError::NoImagesProvided);
    }

    let images: Vec<InlineImage> = images.iter().map(encode_inline).collect();
    debug!("Built prompt with {} image parts", images.len());

    Ok(PromptRequest {
        instruction: LISTING_COPY_PROMPT,
        images,
    })
}

/// Sampling knobs forwarded to the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

// ── Wire format ──────────────────────────────────────────────────────────

/// Body of `POST …/models/{model}:generateContent`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<WireContent>,
    #[serde(rename = "generationConfig")]
    pub generation_config: WireGenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireContent {
    pub role: &'static str,
    pub parts: Vec<WirePart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WirePart {
    Text { text: String },
    InlineData { inline_data: InlineImage },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireGenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}
