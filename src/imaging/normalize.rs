use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::io::Cursor;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use super::ImagingError;

/// Options for upload normalization.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// JPEG quality for the canonical encoding.
    pub jpeg_quality: u8,
    /// Maximum width/height in pixels; larger images are downscaled.
    pub max_dimension: u32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 95,
            max_dimension: 2000,
        }
    }
}

/// A canonically encoded image ready for upstream consumption.
///
/// Invariant: `bytes` is a flattened true-color JPEG whose dimensions are
/// within the configured ceiling, except for the raw-passthrough case where
/// decoding failed for a non-HEIC format (dimensions are then zero and the
/// upstream provider may still reject the payload).
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Detect HEIC/HEIF uploads by extension or declared content type.
pub fn is_heic(filename: &str, content_type: Option<&str>) -> bool {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if matches!(ext.as_deref(), Some("heic") | Some("heif")) {
        return true;
    }
    content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("heic") || ct.contains("heif")
        })
        .unwrap_or(false)
}

/// Normalize an uploaded image to the canonical encoding.
///
/// Primary path decodes with the `image` crate, flattens any alpha channel
/// onto a white background, downscales to the dimension ceiling and
/// re-encodes as JPEG. When decoding fails on a HEIC upload, a chain of
/// external conversion tools is tried; when it fails on anything else the
/// raw bytes are passed through unchanged as a best effort.
///
/// This is blocking work; callers run it under `spawn_blocking`.
pub fn normalize_upload(
    bytes: &[u8],
    filename: &str,
    content_type: Option<&str>,
    opts: &NormalizeOptions,
) -> Result<NormalizedImage, ImagingError> {
    let heic = is_heic(filename, content_type);

    match image::load_from_memory(bytes) {
        Ok(img) => encode_canonical(img, opts),
        Err(err) if heic => {
            tracing::info!(%filename, "primary decode failed for HEIC upload, trying external tools");
            let converted = convert_heic_with_tools(bytes, filename)?;
            let img = image::load_from_memory(&converted).map_err(|e| {
                ImagingError::UnsupportedFormat(format!(
                    "converted HEIC output was not decodable: {e}"
                ))
            })?;
            let _ = err; // primary error superseded by tool conversion
            encode_canonical(img, opts)
        }
        Err(err) => {
            // Best effort: pass raw bytes through; the upstream provider may
            // still reject them.
            tracing::warn!(%filename, error = %err, "decode failed for non-HEIC upload, passing raw bytes through");
            Ok(NormalizedImage {
                bytes: bytes.to_vec(),
                width: 0,
                height: 0,
            })
        }
    }
}

/// Flatten, bound dimensions and encode as canonical JPEG.
fn encode_canonical(
    img: DynamicImage,
    opts: &NormalizeOptions,
) -> Result<NormalizedImage, ImagingError> {
    let flattened = flatten_onto_white(&img);
    let mut canonical = DynamicImage::ImageRgb8(flattened);

    if canonical.width() > opts.max_dimension || canonical.height() > opts.max_dimension {
        tracing::info!(
            from_w = canonical.width(),
            from_h = canonical.height(),
            max = opts.max_dimension,
            "downscaling oversized upload"
        );
        canonical = canonical.resize(opts.max_dimension, opts.max_dimension, FilterType::Lanczos3);
    }

    let bytes = encode_jpeg(&canonical, opts.jpeg_quality)?;
    Ok(NormalizedImage {
        width: canonical.width(),
        height: canonical.height(),
        bytes,
    })
}

/// Composite any alpha-bearing or non-true-color image onto a white
/// background, yielding plain RGB.
fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut rgb = RgbImage::new(w, h);
    for (x, y, px) in rgba.enumerate_pixels() {
        let a = px[3] as u16;
        let blend = |c: u8| -> u8 { ((c as u16 * a + 255 * (255 - a)) / 255) as u8 };
        rgb.put_pixel(x, y, image::Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
    }
    rgb
}

/// Decode stored image bytes and re-encode as flattened JPEG, for download
/// responses that force a JPEG attachment regardless of the stored format.
pub fn reencode_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, ImagingError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ImagingError::Decode(e.to_string()))?;
    let flat = DynamicImage::ImageRgb8(flatten_onto_white(&img));
    encode_jpeg(&flat, quality)
}

pub(super) fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

/// Run the external HEIC conversion tool chain, first hit wins.
///
/// Temp input/output live in RAII guards, so they are removed on every
/// return path including errors.
fn convert_heic_with_tools(bytes: &[u8], filename: &str) -> Result<Vec<u8>, ImagingError> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("heic");

    let mut input = tempfile::Builder::new()
        .suffix(&format!(".{ext}"))
        .tempfile()?;
    input.write_all(bytes)?;
    input.flush()?;

    let out_dir = tempfile::tempdir()?;
    let out_path = out_dir.path().join("converted.jpg");

    let input_path = input.path().to_string_lossy().to_string();
    let output_path = out_path.to_string_lossy().to_string();

    let mut tools: Vec<(&str, Vec<String>)> = Vec::new();
    if cfg!(target_os = "macos") {
        tools.push((
            "sips",
            vec![
                "-s".into(),
                "format".into(),
                "jpeg".into(),
                "-s".into(),
                "formatOptions".into(),
                "best".into(),
                input_path.clone(),
                "--out".into(),
                output_path.clone(),
            ],
        ));
    }
    tools.push(("convert", vec![input_path.clone(), output_path.clone()]));
    tools.push(("heif-convert", vec![input_path.clone(), output_path.clone()]));

    for (tool, args) in tools {
        let ran = Command::new(tool)
            .args(&args)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if ran && out_path.exists() {
            tracing::info!(%tool, "HEIC conversion succeeded");
            return Ok(std::fs::read(&out_path)?);
        }
        tracing::debug!(%tool, "HEIC conversion attempt failed");
    }

    Err(ImagingError::UnsupportedFormat(
        "Unable to convert HEIC image. Please convert it to JPEG before uploading.".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba, RgbaImage};

    fn png_with_alpha(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 128]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn heic_detection_by_extension_and_content_type() {
        assert!(is_heic("photo.HEIC", None));
        assert!(is_heic("photo.heif", None));
        assert!(is_heic("photo.bin", Some("image/heic")));
        assert!(!is_heic("photo.jpg", Some("image/jpeg")));
    }

    #[test]
    fn alpha_png_becomes_flat_jpeg_within_bounds() {
        let opts = NormalizeOptions {
            jpeg_quality: 90,
            max_dimension: 100,
        };
        let out = normalize_upload(&png_with_alpha(300, 200), "a.png", Some("image/png"), &opts)
            .unwrap();

        assert!(out.width <= 100 && out.height <= 100);
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        // JPEG carries no alpha channel
        assert!(matches!(decoded.color(), image::ColorType::Rgb8));
    }

    #[test]
    fn half_transparent_red_blends_toward_white() {
        let opts = NormalizeOptions::default();
        let out =
            normalize_upload(&png_with_alpha(4, 4), "a.png", Some("image/png"), &opts).unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap().to_rgb8();
        let px: &Rgb<u8> = decoded.get_pixel(1, 1);
        // 50% red over white: red stays high, green/blue land near 127
        assert!(px[0] > 200);
        assert!(px[1] > 90 && px[1] < 170);
    }

    #[test]
    fn undecodable_non_heic_passes_through_raw() {
        let raw = b"definitely not an image".to_vec();
        let out =
            normalize_upload(&raw, "mystery.bin", Some("application/octet-stream"),
                &NormalizeOptions::default())
            .unwrap();
        assert_eq!(out.bytes, raw);
        assert_eq!(out.width, 0);
    }

    #[test]
    fn undecodable_heic_errors_with_remediation() {
        // No conversion tool will accept garbage bytes
        let err = normalize_upload(
            b"garbage",
            "photo.heic",
            Some("image/heic"),
            &NormalizeOptions::default(),
        )
        .unwrap_err();
        match err {
            ImagingError::UnsupportedFormat(msg) => assert!(msg.contains("convert it to JPEG")),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn small_rgb_image_keeps_dimensions() {
        let img = RgbaImage::from_pixel(50, 40, Rgba([10, 20, 30, 255]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        let out = normalize_upload(
            &buf.into_inner(),
            "small.png",
            None,
            &NormalizeOptions::default(),
        )
        .unwrap();
        assert_eq!((out.width, out.height), (50, 40));
    }
}
