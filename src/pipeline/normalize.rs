//! Normalisation: downscale and recompress oversized photos.
//!
//! Phone cameras produce 4–12 MB images. Sending five of them inline as
//! base64 would blow past request-size limits and waste upload time, while a
//! vision model gains nothing from more than ~2 000 px on the long edge.
//!
//! ## Contract
//!
//! * Images at or below [`NormalizationPolicy::max_bytes`] are returned
//!   byte-identical; recompressing them would only cost time and quality.
//! * Larger images are decoded (with the EXIF orientation applied, so the
//!   pixels come out upright), scaled down uniformly so the longest edge fits
//!   [`NormalizationPolicy::max_dimension_px`] (never scaled up), and
//!   re-encoded as [`NormalizationPolicy::target_format`].
//! * Any decode or encode failure keeps the original bytes. A single bad
//!   photo must not block the rest of the batch.
//!
//! ## Why spawn_blocking?
//!
//! Decoding a 12 MP JPEG and running a Lanczos resize takes tens to hundreds
//! of milliseconds of pure CPU. [`normalize_batch`] moves each image onto the
//! blocking pool so Tokio worker threads stay responsive, and uses
//! `buffered` (not `buffer_unordered`) so results come back in selection order.

use crate::config::{NormalizationPolicy, TargetFormat};
use crate::error::NormalizeError;
use crate::pipeline::intake::ImageAsset;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageReader, ImageResult};
use serde::Serialize;
use std::io::Cursor;
use tracing::{debug, warn};

/// The decode → resize → encode transform behind normalisation.
///
/// [`ImageCrateCodec`] is the default; tests and alternative backends plug in
/// through [`normalize_with`].
pub trait ImageCodec: Send + Sync {
    /// Decode `bytes` into upright pixels.
    fn decode(&self, bytes: &[u8]) -> ImageResult<DynamicImage>;

    fn resize(&self, img: DynamicImage, width: u32, height: u32) -> DynamicImage;

    /// Encode `img` as `format`. `quality` is on the 1–100 JPEG scale.
    fn encode(&self, img: &DynamicImage, format: TargetFormat, quality: u8) -> ImageResult<Vec<u8>>;
}

/// [`ImageCodec`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn decode(&self, bytes: &[u8]) -> ImageResult<DynamicImage> {
        let mut decoder = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_decoder()?;
        // Re-encoding drops EXIF, so the rotation has to be baked in here.
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let mut img = DynamicImage::from_decoder(decoder)?;
        img.apply_orientation(orientation);
        Ok(img)
    }

    fn resize(&self, img: DynamicImage, width: u32, height: u32) -> DynamicImage {
        if img.width() == width && img.height() == height {
            return img;
        }
        img.resize_exact(width, height, FilterType::Lanczos3)
    }

    fn encode(&self, img: &DynamicImage, format: TargetFormat, quality: u8) -> ImageResult<Vec<u8>> {
        let mut buf = Vec::new();
        match format {
            TargetFormat::Jpeg => {
                // JPEG has no alpha channel; flatten to RGB first.
                let rgb = img.to_rgb8();
                JpegEncoder::new_with_quality(&mut buf, quality).write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    ExtendedColorType::Rgb8,
                )?;
            }
            TargetFormat::Png => {
                img.write_to(&mut Cursor::new(&mut buf), format.image_format())?;
            }
        }
        Ok(buf)
    }
}

/// What the normaliser did with an image.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NormalizeAction {
    /// At or below the size threshold; bytes untouched.
    Unchanged,
    /// Decoded, resized and re-encoded.
    Recompressed {
        original_bytes: usize,
        width: u32,
        height: u32,
    },
    /// Recompression failed; the original bytes were kept.
    Fallback { error: NormalizeError },
}

/// An image after normalisation, with a record of what happened to it.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedImage {
    pub asset: ImageAsset,
    pub action: NormalizeAction,
}

impl NormalizedImage {
    /// `true` when the buffer was replaced by a recompressed one.
    pub fn replaced(&self) -> bool {
        matches!(self.action, NormalizeAction::Recompressed { .. })
    }

    pub fn into_asset(self) -> ImageAsset {
        self.asset
    }
}

/// Normalise one image with the default [`ImageCrateCodec`].
pub fn normalize(asset: ImageAsset, policy: &NormalizationPolicy) -> NormalizedImage {
    normalize_with(&ImageCrateCodec, asset, policy)
}

/// Normalise one image with a caller-supplied codec.
pub fn normalize_with<C: ImageCodec + ?Sized>(
    codec: &C,
    asset: ImageAsset,
    policy: &NormalizationPolicy,
) -> NormalizedImage {
    let original_bytes = asset.len();
    if original_bytes as u64 <= policy.max_bytes {
        return NormalizedImage {
            asset,
            action: NormalizeAction::Unchanged,
        };
    }

    match recompress(codec, &asset, policy) {
        Ok((bytes, width, height)) => {
            debug!(
                "Normalised '{}': {} → {} bytes, {}x{} px",
                asset.file_name,
                original_bytes,
                bytes.len(),
                width,
                height
            );
            NormalizedImage {
                asset: ImageAsset {
                    file_name: asset.file_name,
                    mime_type: policy.target_format.mime_type().to_string(),
                    bytes: Bytes::from(bytes),
                    modified: Utc::now(),
                },
                action: NormalizeAction::Recompressed {
                    original_bytes,
                    width,
                    height,
                },
            }
        }
        Err(error) => {
            warn!("{}; keeping original image", error);
            NormalizedImage {
                asset,
                action: NormalizeAction::Fallback { error },
            }
        }
    }
}

fn recompress<C: ImageCodec + ?Sized>(
    codec: &C,
    asset: &ImageAsset,
    policy: &NormalizationPolicy,
) -> Result<(Vec<u8>, u32, u32), NormalizeError> {
    let img = codec
        .decode(&asset.bytes)
        .map_err(|e| NormalizeError::DecodeFailed {
            file_name: asset.file_name.clone(),
            detail: e.to_string(),
        })?;

    let (width, height) = scaled_dimensions(img.width(), img.height(), policy.max_dimension_px);
    let resized = codec.resize(img, width, height);

    let bytes = codec
        .encode(&resized, policy.target_format, policy.jpeg_quality())
        .map_err(|e| NormalizeError::EncodeFailed {
            file_name: asset.file_name.clone(),
            detail: e.to_string(),
        })?;

    Ok((bytes, width, height))
}

/// Uniformly scale `(width, height)` so the longest edge fits `max_dim`.
///
/// Each edge is `floor(edge * max_dim / longest)`, at least 1 px. Never
/// scales up. Integer arithmetic keeps the longest edge at exactly `max_dim`.
pub fn scaled_dimensions(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dim || longest == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = |edge: u32| ((edge as u64 * max_dim as u64 / longest as u64) as u32).max(1);
    (scale(width), scale(height))
}

/// Normalise a batch concurrently, returning results in input order.
///
/// At most `policy.concurrency` images are decoded at once. A worker that
/// panics degrades to [`NormalizeAction::Fallback`] with the original bytes.
pub async fn normalize_batch(assets: Vec<ImageAsset>, policy: &NormalizationPolicy) -> Vec<NormalizedImage> {
    let total = assets.len();
    if let Some(ref cb) = policy.progress_callback {
        cb.on_batch_start(total);
    }

    let results: Vec<NormalizedImage> = stream::iter(assets.into_iter().enumerate().map(|(index, asset)| {
        let policy = policy.clone();
        async move {
            let original = asset.clone();
            let worker_policy = policy.clone();
            let result = tokio::task::spawn_blocking(move || normalize(asset, &worker_policy))
                .await
                .unwrap_or_else(|e| {
                    warn!("Normalisation of '{}' aborted: {}", original.file_name, e);
                    NormalizedImage {
                        action: NormalizeAction::Fallback {
                            error: NormalizeError::TaskAborted {
                                file_name: original.file_name.clone(),
                                detail: e.to_string(),
                            },
                        },
                        asset: original,
                    }
                });

            if let Some(ref cb) = policy.progress_callback {
                if let NormalizeAction::Fallback { ref error } = result.action {
                    cb.on_image_fallback(index, total, &error.to_string());
                }
                cb.on_image_complete(index, total, result.asset.len(), result.replaced());
            }
            result
        }
    }))
    .buffered(policy.concurrency.max(1))
    .collect()
    .await;

    if let Some(ref cb) = policy.progress_callback {
        cb.on_batch_complete(total, results.iter().filter(|r| r.replaced()).count());
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::IntakeProgressCallback;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Pseudo-random noise compresses badly, which keeps PNG sizes predictable.
    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x2545_f491;
        let img = RgbImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            Rgb([r, g, b])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("png encode");
        buf
    }

    fn policy(max_bytes: u64, max_dim: u32) -> NormalizationPolicy {
        NormalizationPolicy::builder()
            .max_bytes(max_bytes)
            .max_upload_bytes(None)
            .max_dimension_px(max_dim)
            .build()
            .unwrap()
    }

    #[test]
    fn small_image_is_byte_identical() {
        let bytes = noisy_png(8, 8);
        let asset = ImageAsset::new("tiny.png", "image/png", bytes.clone());
        let out = normalize(asset, &policy(bytes.len() as u64, 1920));
        assert!(matches!(out.action, NormalizeAction::Unchanged));
        assert_eq!(out.asset.bytes.as_ref(), bytes.as_slice());
        assert_eq!(out.asset.mime_type, "image/png");
    }

    #[test]
    fn oversized_image_is_downscaled_to_jpeg() {
        let bytes = noisy_png(400, 300);
        let input_len = bytes.len();
        let asset = ImageAsset::new("sofa.png", "image/png", bytes);

        let out = normalize(asset, &policy(1024, 100));

        match out.action {
            NormalizeAction::Recompressed { width, height, original_bytes } => {
                assert_eq!((width, height), (100, 75));
                assert_eq!(original_bytes, input_len);
            }
            other => panic!("expected Recompressed, got {other:?}"),
        }
        assert_eq!(out.asset.file_name, "sofa.png");
        assert_eq!(out.asset.mime_type, "image/jpeg");
        assert!(out.asset.len() < input_len);

        let decoded = image::load_from_memory(&out.asset.bytes).expect("valid jpeg");
        assert!(decoded.width().max(decoded.height()) <= 100);
    }

    #[test]
    fn oversized_image_within_dimension_is_recompressed_not_resized() {
        let bytes = noisy_png(120, 80);
        let asset = ImageAsset::new("lamp.png", "image/png", bytes);
        let out = normalize(asset, &policy(1024, 1920));
        match out.action {
            NormalizeAction::Recompressed { width, height, .. } => assert_eq!((width, height), (120, 80)),
            other => panic!("expected Recompressed, got {other:?}"),
        }
    }

    #[test]
    fn png_target_keeps_alpha_capable_format() {
        let img = RgbaImage::from_pixel(300, 300, Rgba([10, 20, 30, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let asset = ImageAsset::new("glass.png", "image/png", bytes);
        let p = NormalizationPolicy::builder()
            .max_bytes(1)
            .max_upload_bytes(None)
            .max_dimension_px(150)
            .target_format(TargetFormat::Png)
            .build()
            .unwrap();

        let out = normalize(asset, &p);
        assert!(out.replaced());
        assert_eq!(out.asset.mime_type, "image/png");
        let decoded = image::load_from_memory(&out.asset.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (150, 150));
    }

    #[test]
    fn undecodable_bytes_fall_back_to_original() {
        let garbage = vec![0xABu8; 4096];
        let asset = ImageAsset::new("broken.heic", "image/heic", garbage.clone());
        let before = asset.modified;

        let out = normalize(asset, &policy(1024, 1920));

        assert!(matches!(
            out.action,
            NormalizeAction::Fallback {
                error: NormalizeError::DecodeFailed { .. }
            }
        ));
        assert_eq!(out.asset.bytes.as_ref(), garbage.as_slice());
        assert_eq!(out.asset.mime_type, "image/heic");
        assert_eq!(out.asset.modified, before);
    }

    struct FailingEncoder;

    impl ImageCodec for FailingEncoder {
        fn decode(&self, bytes: &[u8]) -> ImageResult<DynamicImage> {
            ImageCrateCodec.decode(bytes)
        }

        fn resize(&self, img: DynamicImage, width: u32, height: u32) -> DynamicImage {
            ImageCrateCodec.resize(img, width, height)
        }

        fn encode(&self, _img: &DynamicImage, _format: TargetFormat, _quality: u8) -> ImageResult<Vec<u8>> {
            Err(image::ImageError::IoError(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn encode_failure_falls_back_to_original() {
        let bytes = noisy_png(64, 64);
        let asset = ImageAsset::new("vase.png", "image/png", bytes.clone());
        let out = normalize_with(&FailingEncoder, asset, &policy(16, 32));
        match out.action {
            NormalizeAction::Fallback {
                error: NormalizeError::EncodeFailed { ref detail, .. },
            } => assert!(detail.contains("disk full")),
            ref other => panic!("expected encode fallback, got {other:?}"),
        }
        assert_eq!(out.asset.bytes.as_ref(), bytes.as_slice());
    }

    #[derive(Default)]
    struct RecordingCodec {
        resized_to: Mutex<Option<(u32, u32)>>,
        quality: Mutex<Option<u8>>,
    }

    impl ImageCodec for RecordingCodec {
        fn decode(&self, _bytes: &[u8]) -> ImageResult<DynamicImage> {
            Ok(DynamicImage::ImageRgb8(RgbImage::new(4000, 3000)))
        }

        fn resize(&self, _img: DynamicImage, width: u32, height: u32) -> DynamicImage {
            *self.resized_to.lock().unwrap() = Some((width, height));
            DynamicImage::ImageRgb8(RgbImage::new(width, height))
        }

        fn encode(&self, _img: &DynamicImage, _format: TargetFormat, quality: u8) -> ImageResult<Vec<u8>> {
            *self.quality.lock().unwrap() = Some(quality);
            Ok(vec![1, 2, 3])
        }
    }

    #[test]
    fn codec_receives_scaled_dimensions_and_quality() {
        let codec = RecordingCodec::default();
        let asset = ImageAsset::new("bike.jpg", "image/jpeg", vec![0u8; 2048]);
        let out = normalize_with(&codec, asset, &policy(1024, 1920));

        assert_eq!(*codec.resized_to.lock().unwrap(), Some((1920, 1440)));
        assert_eq!(*codec.quality.lock().unwrap(), Some(80));
        assert_eq!(out.asset.bytes.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn scaled_dimensions_never_upscale() {
        assert_eq!(scaled_dimensions(800, 600, 1920), (800, 600));
        assert_eq!(scaled_dimensions(1920, 1080, 1920), (1920, 1080));
    }

    #[test]
    fn scaled_dimensions_fit_longest_edge() {
        assert_eq!(scaled_dimensions(4000, 3000, 1920), (1920, 1440));
        assert_eq!(scaled_dimensions(3000, 4000, 1920), (1440, 1920));
        assert_eq!(scaled_dimensions(10000, 10, 100), (100, 1));
    }

    #[test]
    fn scaled_dimensions_round_down() {
        assert_eq!(scaled_dimensions(3001, 2000, 1920), (1920, 1279));
        assert_eq!(scaled_dimensions(2000, 3001, 1920), (1279, 1920));
    }

    /// Baseline JPEG of `width`x`height` noise with an EXIF APP1 segment
    /// carrying `orientation` spliced in after SOI.
    fn jpeg_with_orientation(width: u32, height: u32, orientation: u8) -> Vec<u8> {
        let png = noisy_png(width, height);
        let img = image::load_from_memory(&png).unwrap().to_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 95)
            .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
            .unwrap();

        // Big-endian TIFF header, one IFD entry: 0x0112 SHORT x1.
        let mut tiff = vec![b'M', b'M', 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08, 0x00, 0x01];
        tiff.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        tiff.extend_from_slice(&[0x00, orientation, 0x00, 0x00]);
        tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend_from_slice(&tiff);
        let len = (app1.len() + 2) as u16;

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn exif_rotated_photo_comes_out_upright() {
        // Stored landscape, tagged "rotate 90° clockwise" like a portrait phone shot.
        let bytes = jpeg_with_orientation(400, 200, 6);
        let asset = ImageAsset::new("portrait.jpg", "image/jpeg", bytes);

        let out = normalize(asset, &policy(1024, 100));

        match out.action {
            NormalizeAction::Recompressed { width, height, .. } => assert_eq!((width, height), (50, 100)),
            other => panic!("expected Recompressed, got {other:?}"),
        }
        let decoded = image::load_from_memory(&out.asset.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 100));
    }

    #[test]
    fn untagged_jpeg_keeps_its_layout() {
        let bytes = jpeg_with_orientation(400, 200, 1);
        let out = normalize(ImageAsset::new("wide.jpg", "image/jpeg", bytes), &policy(1024, 100));
        match out.action {
            NormalizeAction::Recompressed { width, height, .. } => assert_eq!((width, height), (100, 50)),
            other => panic!("expected Recompressed, got {other:?}"),
        }
    }

    #[derive(Default)]
    struct BatchTracker {
        started: AtomicUsize,
        completed: AtomicUsize,
        fallbacks: AtomicUsize,
        replaced: AtomicUsize,
    }

    impl IntakeProgressCallback for BatchTracker {
        fn on_batch_start(&self, total: usize) {
            self.started.store(total, Ordering::SeqCst);
        }

        fn on_image_complete(&self, _index: usize, _total: usize, _bytes_out: usize, _replaced: bool) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_image_fallback(&self, _index: usize, _total: usize, _error: &str) {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, replaced: usize) {
            self.replaced.store(replaced, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn batch_preserves_order_and_reports_progress() {
        let tracker = Arc::new(BatchTracker::default());
        let p = NormalizationPolicy::builder()
            .max_bytes(1024)
            .max_upload_bytes(None)
            .max_dimension_px(64)
            .concurrency(3)
            .progress_callback(tracker.clone())
            .build()
            .unwrap();

        let assets = vec![
            ImageAsset::new("0-big.png", "image/png", noisy_png(256, 128)),
            ImageAsset::new("1-small.png", "image/png", vec![7u8; 10]),
            ImageAsset::new("2-broken.jpg", "image/jpeg", vec![0u8; 5000]),
            ImageAsset::new("3-big.png", "image/png", noisy_png(128, 256)),
        ];

        let out = normalize_batch(assets, &p).await;

        let names: Vec<&str> = out.iter().map(|n| n.asset.file_name.as_str()).collect();
        assert_eq!(names, vec!["0-big.png", "1-small.png", "2-broken.jpg", "3-big.png"]);
        assert!(out[0].replaced());
        assert!(matches!(out[1].action, NormalizeAction::Unchanged));
        assert!(matches!(out[2].action, NormalizeAction::Fallback { .. }));
        assert!(out[3].replaced());

        assert_eq!(tracker.started.load(Ordering::SeqCst), 4);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 4);
        assert_eq!(tracker.fallbacks.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.replaced.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let out = normalize_batch(Vec::new(), &NormalizationPolicy::default()).await;
        assert!(out.is_empty());
    }
}
