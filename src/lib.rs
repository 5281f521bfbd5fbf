//! # listing-copy
//!
//! Turn a handful of product photos into marketplace listing copy using a
//! multimodal generative model.
//!
//! ## Why this crate?
//!
//! Sellers photograph an item and want a title, a description and, when the
//! model can tell, a price, category, brand and model number. Phone photos
//! are large, and models asked for JSON do not always answer in JSON. This
//! crate keeps the request small (downscaling and recompressing big images
//! before upload) and always returns usable copy (a JSON parse with a
//! line-based fallback).
//!
//! ## Pipeline Overview
//!
//! ```text
//! selected files
//!  │
//!  ├─ 1. Intake     keep image/* files, drop uploads above 5 MiB
//!  ├─ 2. Normalize  images above 1 MiB → ≤1920 px JPEG (spawn_blocking)
//!  ├─ 3. Encode     bytes → base64 inline parts, selection order kept
//!  ├─ 4. Model      one generateContent call, bounded by a timeout
//!  └─ 5. Parse      JSON object, else "Title:" line heuristic
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use listing_copy::{generate_copy_from_files, GenerationConfig, NormalizationPolicy, SelectedFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credential read from GEMINI_API_KEY / GOOGLE_API_KEY
//!     let files = vec![
//!         SelectedFile::from_path("front.jpg").await?,
//!         SelectedFile::from_path("label.jpg").await?,
//!     ];
//!     let output = generate_copy_from_files(
//!         files,
//!         &NormalizationPolicy::default(),
//!         &GenerationConfig::default(),
//!     )
//!     .await?;
//!     println!("{}\n\n{}", output.copy.title, output.copy.description);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `listing-copy` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! listing-copy = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod generate;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    GenerationConfig, GenerationConfigBuilder, NormalizationPolicy, NormalizationPolicyBuilder,
    TargetFormat,
};
pub use error::{ErrorBody, ListingCopyError, NormalizeError};
pub use generate::{generate_copy, generate_copy_from_files, generate_copy_sync, resolve_model};
pub use output::{
    CopySource, GeneratedListingCopy, GenerationOutput, GenerationStats, FALLBACK_DESCRIPTION,
    FALLBACK_TITLE,
};
pub use pipeline::intake::{accept, accept_batch, remove_at, ImageAsset, SelectedFile};
pub use pipeline::llm::{Credential, GeminiClient, GenerativeModel, ModelReply};
pub use pipeline::normalize::{normalize, normalize_batch, NormalizeAction, NormalizedImage};
pub use pipeline::parse::{parse_response, ParsedCopy};
pub use progress::{IntakeProgressCallback, NoopProgressCallback, ProgressCallback};
