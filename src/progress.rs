//! Progress-callback trait for per-image normalisation events.
//!
//! Inject an [`Arc<dyn IntakeProgressCallback>`] via
//! [`crate::config::NormalizationPolicyBuilder::progress_callback`] to receive
//! events as [`crate::pipeline::normalize::normalize_batch`] works through a
//! selection.
//!
//! # Example
//!
//! ```rust
//! use listing_copy::{IntakeProgressCallback, NormalizationPolicy};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl IntakeProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, index: usize, total: usize, bytes_out: usize, replaced: bool) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("image {}/{} → {} bytes (replaced: {})", index + 1, total, bytes_out, replaced);
//!     }
//! }
//!
//! let policy = NormalizationPolicy::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the normaliser as it processes each image.
///
/// Images are normalised concurrently, so `on_image_*` may be called from
/// different threads and out of order. All methods default to no-ops.
pub trait IntakeProgressCallback: Send + Sync {
    /// Called once before any image is processed.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when an image has been normalised (or passed through).
    ///
    /// # Arguments
    /// * `index`: 0-indexed position in the selection
    /// * `total`: number of images in the batch
    /// * `bytes_out`: size of the buffer that will be sent on
    /// * `replaced`: whether the buffer was recompressed
    fn on_image_complete(&self, index: usize, total: usize, bytes_out: usize, replaced: bool) {
        let _ = (index, total, bytes_out, replaced);
    }

    /// Called when an image could not be recompressed and the original is kept.
    fn on_image_fallback(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every image has been handled.
    ///
    /// # Arguments
    /// * `total`: number of images in the batch
    /// * `replaced`: images whose buffer was recompressed
    fn on_batch_complete(&self, total: usize, replaced: usize) {
        let _ = (total, replaced);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IntakeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::NormalizationPolicy`].
pub type ProgressCallback = Arc<dyn IntakeProgressCallback>;
