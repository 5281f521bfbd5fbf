//! Image encoding: `ImageAsset` → base64 inline part.
//!
//! The generative endpoint accepts images inline in the JSON request body as
//! `{ "inline_data": { "mime_type": ..., "data": <base64> } }`. The bytes are
//! sent exactly as normalisation left them; no re-encoding happens here.

use crate::pipeline::intake::ImageAsset;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One image as it travels in the request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    /// Standard base64, no data-URI prefix.
    pub data: String,
}

impl InlineImage {
    /// Size of the decoded payload in bytes.
    pub fn decoded_len(&self) -> usize {
        let padding = self.data.bytes().rev().take_while(|&b| b == b'=').count();
        (self.data.len() / 4 * 3).saturating_sub(padding)
    }
}

/// Encode an image as an inline part ready for the model request.
pub fn encode_inline(asset: &ImageAsset) -> InlineImage {
    let data = STANDARD.encode(&asset.bytes);
    debug!(
        "Encoded '{}' ({}) → {} bytes base64",
        asset.file_name,
        asset.mime_type,
        data.len()
    );
    InlineImage {
        mime_type: asset.mime_type.clone(),
        data,
    }
}
