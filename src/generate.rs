//! Composed entry points: images in, listing copy out.
//!
//! [`generate_copy`] is the whole request handler in one call: validate the
//! image count, resolve the model, build the prompt, make the single model
//! call and parse whatever came back. [`generate_copy_from_files`] adds the
//! intake and normalisation stages in front of it for callers holding raw
//! uploads.

use crate::config::{GenerationConfig, NormalizationPolicy};
use crate::error::ListingCopyError;
use crate::output::{GenerationOutput, GenerationStats};
use crate::pipeline::intake::{accept_batch, ImageAsset, SelectedFile};
use crate::pipeline::llm::{self, Credential, GeminiClient, GenerativeModel};
use crate::pipeline::normalize::{normalize_batch, NormalizedImage};
use crate::pipeline::parse::parse_response;
use crate::pipeline::request::build_prompt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Environment variable naming the model when none is configured explicitly.
pub const MODEL_ENV: &str = "LISTING_COPY_MODEL";

/// API key variables checked in order.
pub const API_KEY_ENVS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Generate listing copy for already-accepted images.
///
/// # Errors
/// * [`ListingCopyError::NoImagesProvided`] / [`ListingCopyError::TooManyImages`]
///   before any network activity.
/// * [`ListingCopyError::ProviderNotConfigured`] when no model can be resolved.
/// * [`ListingCopyError::ModelUnavailable`] / [`ListingCopyError::EmptyResponse`]
///   from the model call.
///
/// An answer that is not the requested JSON is not an error; see
/// [`crate::pipeline::parse`].
pub async fn generate_copy(
    images: Vec<ImageAsset>,
    config: &GenerationConfig,
) -> Result<GenerationOutput, ListingCopyError> {
    check_image_count(images.len(), config.max_images)?;
    let model = resolve_model(config)?;
    generate_copy_with(model.as_ref(), images, config).await
}

async fn generate_copy_with(
    model: &dyn GenerativeModel,
    images: Vec<ImageAsset>,
    config: &GenerationConfig,
) -> Result<GenerationOutput, ListingCopyError> {
    let total_start = Instant::now();
    check_image_count(images.len(), config.max_images)?;
    info!("Generating listing copy from {} image(s) via {}", images.len(), model.name());

    let request = build_prompt(images)?;
    let image_count = request.image_count();
    let image_bytes = request.image_bytes();

    let model_start = Instant::now();
    let reply = llm::invoke_model(model, &request, config.api_timeout).await?;
    let model_duration_ms = model_start.elapsed().as_millis() as u64;

    let parsed = parse_response(&reply.text);
    let source = parsed.source();
    let stats = GenerationStats {
        image_count,
        image_bytes,
        input_tokens: reply.prompt_tokens,
        output_tokens: reply.output_tokens,
        model_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Generated copy via {:?} parser in {}ms",
        source, stats.total_duration_ms
    );

    Ok(GenerationOutput {
        copy: parsed.into_copy(),
        source,
        raw_text: reply.text,
        stats,
    })
}

/// Accept, normalise and generate in one call.
///
/// The model is resolved first, so a missing credential fails before any
/// image is decoded. Non-image files and oversized uploads are then dropped
/// and the remaining count is checked against `config.max_images`.
pub async fn generate_copy_from_files(
    files: Vec<SelectedFile>,
    policy: &NormalizationPolicy,
    config: &GenerationConfig,
) -> Result<GenerationOutput, ListingCopyError> {
    let model = resolve_model(config)?;

    let assets = accept_batch(files, policy);
    check_image_count(assets.len(), config.max_images)?;

    let normalized = normalize_batch(assets, policy).await;
    let images: Vec<ImageAsset> = normalized.into_iter().map(NormalizedImage::into_asset).collect();
    generate_copy_with(model.as_ref(), images, config).await
}

/// Synchronous wrapper around [`generate_copy`].
///
/// Creates a temporary tokio runtime internally; do not call from inside an
/// async context.
pub fn generate_copy_sync(
    images: Vec<ImageAsset>,
    config: &GenerationConfig,
) -> Result<GenerationOutput, ListingCopyError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ListingCopyError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate_copy(images, config))
}

/// Resolve the model client, from most-specific to least-specific.
///
/// 1. **Pre-built client** (`config.model_client`), used as-is.
/// 2. **Credential in config** (`bearer_token`, then `api_key`) with
///    `config.model`.
/// 3. **Environment** (unless `config.read_env` is off): the first non-empty
///    of `GEMINI_API_KEY` / `GOOGLE_API_KEY`, with the model from
///    `LISTING_COPY_MODEL` when set.
///
/// Anything else is [`ListingCopyError::ProviderNotConfigured`], reported
/// before images are encoded.
pub fn resolve_model(config: &GenerationConfig) -> Result<Arc<dyn GenerativeModel>, ListingCopyError> {
    if let Some(ref client) = config.model_client {
        return Ok(Arc::clone(client));
    }

    if let Some(token) = non_empty(config.bearer_token.as_deref()) {
        return Ok(Arc::new(GeminiClient::new(config, Credential::Bearer(token))?));
    }
    if let Some(key) = non_empty(config.api_key.as_deref()) {
        return Ok(Arc::new(GeminiClient::new(config, Credential::ApiKey(key))?));
    }

    let env_key = API_KEY_ENVS
        .iter()
        .filter(|_| config.read_env)
        .find_map(|name| non_empty(std::env::var(name).ok().as_deref()));
    if let Some(key) = env_key {
        let mut config = config.clone();
        if let Some(model) = non_empty(std::env::var(MODEL_ENV).ok().as_deref()) {
            debug!("Using model '{}' from {}", model, MODEL_ENV);
            config.model = model;
        }
        return Ok(Arc::new(GeminiClient::new(&config, Credential::ApiKey(key))?));
    }

    Err(ListingCopyError::ProviderNotConfigured {
        provider: "gemini".to_string(),
        hint: "No API credential found.\n\
               Set GEMINI_API_KEY (or GOOGLE_API_KEY), or pass an API key or bearer token."
            .to_string(),
    })
}

fn check_image_count(count: usize, max: usize) -> Result<(), ListingCopyError> {
    if count == 0 {
        return Err(ListingCopyError::NoImagesProvided);
    }
    if count > max {
        return Err(ListingCopyError::TooManyImages { count, max });
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
