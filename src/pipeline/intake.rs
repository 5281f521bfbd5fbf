//! Intake: filter user-selected files down to the images worth keeping.
//!
//! Nothing here returns an error. A file with the wrong type or an upload
//! that is too large is simply left out of the working set, the same way a
//! file picker with `accept="image/*"` would never have offered it.

use crate::config::NormalizationPolicy;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// A raw user-selected file, before any filtering.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub file_name: String,
    /// Declared MIME type, e.g. `image/jpeg`. May be anything.
    pub mime_type: String,
    pub bytes: Bytes,
}

impl SelectedFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    ///
    /// Unknown extensions are declared as `application/octet-stream` and
    /// therefore rejected by [`accept`].
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(file_name, mime_type, bytes))
    }
}

/// An accepted image: bytes plus the metadata the pipeline carries along.
#[derive(Debug, Clone, Serialize)]
pub struct ImageAsset {
    pub file_name: String,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Bytes,
    /// Set at selection, refreshed when the normaliser replaces the bytes.
    pub modified: DateTime<Utc>,
}

impl ImageAsset {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
            modified: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Keep `file` only if its declared MIME type starts with `image/`.
pub fn accept(file: SelectedFile) -> Option<ImageAsset> {
    if !is_image_mime(&file.mime_type) {
        debug!(
            "Ignoring '{}': declared type '{}' is not an image",
            file.file_name, file.mime_type
        );
        return None;
    }
    Some(ImageAsset::new(file.file_name, file.mime_type, file.bytes))
}

/// Apply [`accept`] to a selection and drop uploads above
/// `policy.max_upload_bytes`. Order is preserved.
pub fn accept_batch(
    files: impl IntoIterator<Item = SelectedFile>,
    policy: &NormalizationPolicy,
) -> Vec<ImageAsset> {
    files
        .into_iter()
        .filter_map(accept)
        .filter(|asset| match policy.max_upload_bytes {
            Some(limit) if asset.len() as u64 > limit => {
                warn!(
                    "File {} is too large ({}MB). Maximum size is {}MB.",
                    asset.file_name,
                    (asset.len() as f64 / 1024.0 / 1024.0).round(),
                    limit / 1024 / 1024
                );
                false
            }
            _ => true,
        })
        .collect()
}

/// Return `items` without the element at `index`.
///
/// An out-of-range index leaves the sequence unchanged.
pub fn remove_at<T: Clone>(items: &[T], index: usize) -> Vec<T> {
    if index >= items.len() {
        warn!(
            "remove_at: index {} out of range (len={})",
            index,
            items.len()
        );
        return items.to_vec();
    }
    items
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, item)| item.clone())
        .collect()
}

/// Collect form parts named `image_0`, `image_1`, … in index order.
///
/// Stops at the first missing index, so a gap (`image_0`, `image_2`) yields
/// only `image_0`.
pub fn collect_indexed_parts<F>(mut lookup: F) -> Vec<SelectedFile>
where
    F: FnMut(&str) -> Option<SelectedFile>,
{
    let mut parts = Vec::new();
    while let Some(file) = lookup(&part_name(parts.len())) {
        parts.push(file);
    }
    parts
}

/// Form field name of the image at `index`.
pub fn part_name(index: usize) -> String {
    format!("image_{index}")
}

fn is_image_mime(mime: &str) -> bool {
    mime.get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
}
