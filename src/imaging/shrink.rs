use image::imageops::FilterType;

use super::normalize::encode_jpeg;
use super::ImagingError;

/// Options for size-constrained re-encoding.
#[derive(Debug, Clone, Copy)]
pub struct ShrinkOptions {
    /// Target byte ceiling for the encoded output.
    pub target_bytes: usize,
    /// Quality used for the first re-encode attempt.
    pub start_quality: u8,
    /// Quality decrement per attempt.
    pub quality_step: u8,
    /// Hard quality floor.
    pub min_quality: u8,
    /// Hard floor for the longer image edge when downsampling.
    pub min_dimension: u32,
}

impl Default for ShrinkOptions {
    fn default() -> Self {
        Self {
            target_bytes: 5 * 1024 * 1024,
            start_quality: 85,
            quality_step: 10,
            min_quality: 40,
            min_dimension: 512,
        }
    }
}

/// Re-encode `bytes` until the result fits under `target_bytes`.
///
/// Quality is lowered in fixed steps first; if the floor is reached the
/// image is downsampled by 25% per round until the dimension floor. Floors
/// are hard stops: the smallest attempt is returned rather than an error.
///
/// Inputs already under the ceiling are returned byte-identical, so calling
/// this twice never recompresses.
pub fn shrink_to_limit(bytes: &[u8], opts: &ShrinkOptions) -> Result<Vec<u8>, ImagingError> {
    if bytes.len() <= opts.target_bytes {
        return Ok(bytes.to_vec());
    }

    let mut img = image::load_from_memory(bytes).map_err(|e| ImagingError::Decode(e.to_string()))?;

    let mut last = Vec::new();
    loop {
        let mut quality = opts.start_quality;
        loop {
            last = encode_jpeg(&img, quality)?;
            if last.len() <= opts.target_bytes {
                tracing::debug!(
                    quality,
                    w = img.width(),
                    h = img.height(),
                    size = last.len(),
                    "shrink reached target"
                );
                return Ok(last);
            }
            if quality <= opts.min_quality {
                break;
            }
            quality = quality.saturating_sub(opts.quality_step).max(opts.min_quality);
        }

        let longer = img.width().max(img.height());
        if longer <= opts.min_dimension {
            // Both floors hit: hand back the smallest attempt.
            tracing::warn!(
                size = last.len(),
                target = opts.target_bytes,
                "shrink floors reached above target size"
            );
            return Ok(last);
        }
        let new_w = (img.width() * 3 / 4).max(1);
        let new_h = (img.height() * 3 / 4).max(1);
        img = img.resize(new_w, new_h, FilterType::Lanczos3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    fn noisy_jpeg(w: u32, h: u32) -> Vec<u8> {
        // Per-pixel noise defeats JPEG compression enough to exercise the loop
        let img = RgbImage::from_fn(w, h, |x, y| {
            Rgb([
                (x.wrapping_mul(31) ^ y.wrapping_mul(17)) as u8,
                (x.wrapping_mul(7) ^ y.wrapping_mul(13)) as u8,
                (x ^ y) as u8,
            ])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Jpeg)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn under_limit_input_is_byte_identical_twice() {
        let bytes = noisy_jpeg(64, 64);
        let opts = ShrinkOptions {
            target_bytes: bytes.len() + 1,
            ..ShrinkOptions::default()
        };
        let once = shrink_to_limit(&bytes, &opts).unwrap();
        let twice = shrink_to_limit(&once, &opts).unwrap();
        assert_eq!(once, bytes);
        assert_eq!(twice, once);
    }

    #[test]
    fn oversized_input_is_reduced_under_target() {
        let bytes = noisy_jpeg(800, 800);
        let target = bytes.len() / 2;
        let opts = ShrinkOptions {
            target_bytes: target,
            min_dimension: 16,
            ..ShrinkOptions::default()
        };
        let out = shrink_to_limit(&bytes, &opts).unwrap();
        assert!(out.len() <= target);
        // Output still decodes
        image::load_from_memory(&out).unwrap();
    }

    #[test]
    fn floors_are_hard_stops_not_errors() {
        let bytes = noisy_jpeg(64, 64);
        let opts = ShrinkOptions {
            target_bytes: 1, // unreachable target
            start_quality: 50,
            quality_step: 10,
            min_quality: 40,
            min_dimension: 64,
        };
        let out = shrink_to_limit(&bytes, &opts).unwrap();
        assert!(!out.is_empty());
    }
}
