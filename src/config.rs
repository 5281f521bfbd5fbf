//! Configuration types for image intake and copy generation.
//!
//! Two structs, one per component:
//!
//! * [`NormalizationPolicy`]: how oversized photos are downscaled and
//!   recompressed before they are sent anywhere.
//! * [`GenerationConfig`]: which model is called, with which credential,
//!   how many images a request may carry and how long the call may take.
//!
//! Both are built through builders so callers set only what they care about
//! and rely on documented defaults for the rest.

use crate::error::ListingCopyError;
use crate::pipeline::llm::GenerativeModel;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Size above which an image is recompressed: 1 MiB.
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

/// Largest accepted upload before normalisation: 5 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Default cap on images per generation request.
pub const DEFAULT_MAX_IMAGES: usize = 5;

/// Default Gemini REST base URL.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default vision-capable model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

// ── Normalisation ────────────────────────────────────────────────────────

/// Policy for [`crate::pipeline::normalize`].
///
/// # Example
/// ```rust
/// use listing_copy::{NormalizationPolicy, TargetFormat};
///
/// let policy = NormalizationPolicy::builder()
///     .max_dimension_px(1280)
///     .quality(0.7)
///     .target_format(TargetFormat::Jpeg)
///     .build()
///     .unwrap();
/// assert_eq!(policy.max_dimension_px, 1280);
/// ```
#[derive(Clone)]
pub struct NormalizationPolicy {
    /// Images at or below this size are passed through untouched. Default: 1 MiB.
    pub max_bytes: u64,

    /// Longest-edge cap in pixels for recompressed images. Default: 1920.
    ///
    /// Images are only ever scaled down, never up.
    pub max_dimension_px: u32,

    /// Encoding of recompressed images. Default: JPEG.
    pub target_format: TargetFormat,

    /// Compression factor in `0.0..=1.0`. Default: 0.8.
    ///
    /// Ignored by lossless formats.
    pub quality: f32,

    /// Uploads larger than this are dropped at intake. Default: 5 MiB.
    ///
    /// Many current phone cameras produce 5 to 12 MB photos, which the
    /// default drops with a warning even though normalisation could shrink
    /// them. Raise the limit (the CLI takes `--max-upload-bytes`) or set
    /// `None` to accept any size.
    pub max_upload_bytes: Option<u64>,

    /// Images normalised in parallel by [`crate::pipeline::normalize::normalize_batch`]. Default: 4.
    pub concurrency: usize,

    /// Optional progress callback for batch normalisation.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_dimension_px: 1920,
            target_format: TargetFormat::default(),
            quality: 0.8,
            max_upload_bytes: Some(DEFAULT_MAX_UPLOAD_BYTES),
            concurrency: 4,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for NormalizationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizationPolicy")
            .field("max_bytes", &self.max_bytes)
            .field("max_dimension_px", &self.max_dimension_px)
            .field("target_format", &self.target_format)
            .field("quality", &self.quality)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IntakeProgressCallback>"),
            )
            .finish()
    }
}

impl NormalizationPolicy {
    /// Create a new builder for `NormalizationPolicy`.
    pub fn builder() -> NormalizationPolicyBuilder {
        NormalizationPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// JPEG quality on the encoder's 1–100 scale.
    pub fn jpeg_quality(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

/// Builder for [`NormalizationPolicy`].
#[derive(Debug)]
pub struct NormalizationPolicyBuilder {
    policy: NormalizationPolicy,
}

impl NormalizationPolicyBuilder {
    pub fn max_bytes(mut self, bytes: u64) -> Self {
        self.policy.max_bytes = bytes;
        self
    }

    pub fn max_dimension_px(mut self, px: u32) -> Self {
        self.policy.max_dimension_px = px.max(16);
        self
    }

    pub fn target_format(mut self, format: TargetFormat) -> Self {
        self.policy.target_format = format;
        self
    }

    pub fn quality(mut self, q: f32) -> Self {
        self.policy.quality = q.clamp(0.0, 1.0);
        self
    }

    pub fn max_upload_bytes(mut self, limit: Option<u64>) -> Self {
        self.policy.max_upload_bytes = limit;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.policy.concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.policy.progress_callback = Some(cb);
        self
    }

    /// Build the policy, validating constraints.
    pub fn build(self) -> Result<NormalizationPolicy, ListingCopyError> {
        let p = &self.policy;
        if !p.quality.is_finite() || !(0.0..=1.0).contains(&p.quality) {
            return Err(ListingCopyError::InvalidConfig(format!(
                "quality must be 0.0–1.0, got {}",
                p.quality
            )));
        }
        if let Some(limit) = p.max_upload_bytes {
            if limit < p.max_bytes {
                return Err(ListingCopyError::InvalidConfig(format!(
                    "max_upload_bytes ({limit}) must not be below max_bytes ({})",
                    p.max_bytes
                )));
            }
        }
        Ok(self.policy)
    }
}

/// Output encoding for recompressed images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetFormat {
    /// Lossy JPEG at [`NormalizationPolicy::quality`]. (default)
    #[default]
    Jpeg,
    /// Lossless PNG; quality is ignored.
    Png,
}

impl TargetFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "image/jpeg",
            TargetFormat::Png => "image/png",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            TargetFormat::Jpeg => image::ImageFormat::Jpeg,
            TargetFormat::Png => image::ImageFormat::Png,
        }
    }
}

// ── Generation ───────────────────────────────────────────────────────────

/// Configuration for a copy-generation request.
///
/// # Example
/// ```rust
/// use listing_copy::GenerationConfig;
///
/// let config = GenerationConfig::builder()
///     .model("gemini-2.0-flash")
///     .api_key("test-key")
///     .api_timeout_secs(20)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_images, 5);
/// ```
#[derive(Clone)]
pub struct GenerationConfig {
    /// Model identifier. Default: `gemini-2.0-flash`.
    pub model: String,

    /// REST base URL of the generative endpoint.
    pub api_base: String,

    /// API key sent as `x-goog-api-key`. Falls back to the environment.
    pub api_key: Option<String>,

    /// OAuth access token sent as `Authorization: Bearer`. Takes precedence
    /// over `api_key` when both are set.
    pub bearer_token: Option<String>,

    /// Pre-constructed model client. Takes precedence over every credential.
    pub model_client: Option<Arc<dyn GenerativeModel>>,

    /// Look up `GEMINI_API_KEY` / `GOOGLE_API_KEY` / `LISTING_COPY_MODEL`
    /// when no credential is configured. Default: `true`.
    pub read_env: bool,

    /// Maximum images per request. Default: 5.
    pub max_images: usize,

    /// Sampling temperature. Default: 0.4.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 2048.
    pub max_output_tokens: u32,

    /// Bound on the single model call. Default: 30 s.
    ///
    /// Expiry is reported as [`ListingCopyError::ModelUnavailable`].
    pub api_timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            bearer_token: None,
            model_client: None,
            read_env: true,
            max_images: DEFAULT_MAX_IMAGES,
            temperature: 0.4,
            max_output_tokens: 2048,
            api_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field(
                "model_client",
                &self.model_client.as_ref().map(|_| "<dyn GenerativeModel>"),
            )
            .field("read_env", &self.read_env)
            .field("max_images", &self.max_images)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("api_timeout", &self.api_timeout)
            .finish()
    }
}

impl GenerationConfig {
    /// Create a new builder for `GenerationConfig`.
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`GenerationConfig`].
#[derive(Debug)]
pub struct GenerationConfigBuilder {
    config: GenerationConfig,
}

impl GenerationConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.config.bearer_token = Some(token.into());
        self
    }

    pub fn model_client(mut self, client: Arc<dyn GenerativeModel>) -> Self {
        self.config.model_client = Some(client);
        self
    }

    pub fn read_env(mut self, enabled: bool) -> Self {
        self.config.read_env = enabled;
        self
    }

    pub fn max_images(mut self, n: usize) -> Self {
        self.config.max_images = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout = Duration::from_secs(secs);
        self
    }

    pub fn api_timeout(mut self, timeout: Duration) -> Self {
        self.config.api_timeout = timeout;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GenerationConfig, ListingCopyError> {
        let c = &self.config;
        if c.max_images == 0 {
            return Err(ListingCopyError::InvalidConfig(
                "max_images must be ≥ 1".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(ListingCopyError::InvalidConfig("model must not be empty".into()));
        }
        if !c.api_base.starts_with("http://") && !c.api_base.starts_with("https://") {
            return Err(ListingCopyError::InvalidConfig(format!(
                "api_base must be an HTTP(S) URL, got '{}'",
                c.api_base
            )));
        }
        if c.api_timeout.is_zero() {
            return Err(ListingCopyError::InvalidConfig(
                "api_timeout must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}
