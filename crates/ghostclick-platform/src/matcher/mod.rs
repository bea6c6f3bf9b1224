//! Grayscale template matching against window captures.
//!
//! Matching uses zero-normalized cross-correlation (ZNCC), so uniform
//! brightness shifts in the target window do not move the score.
//! Templates record the display scale they were captured at in a PNG
//! `tExt` chunk; before matching they are resized to the scale of the
//! window being searched.

use ghostclick_core::{
    CapabilityError, Match, MatchRegion, TemplateMatcher, WindowHandle,
};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{PlatformError, PlatformResult};
use crate::window;

/// PNG `tExt` keyword holding the capture-time scale factor.
const SCALE_KEYWORD: &str = "GhostClick_DPI";

/// Resize is skipped when scales differ by less than this.
const SCALE_EPSILON: f32 = 0.01;

/// [`TemplateMatcher`] backed by window capture and ZNCC search.
pub struct NccMatcher;

impl TemplateMatcher for NccMatcher {
    fn check_visible(
        &self,
        window: WindowHandle,
        template: &Path,
        threshold: f32,
    ) -> Result<Match, CapabilityError> {
        let (score, _) = self.search(window, template)?;
        Ok(Match {
            visible: score >= threshold,
            confidence: score,
        })
    }

    fn find_location(
        &self,
        window: WindowHandle,
        template: &Path,
        threshold: f32,
    ) -> Result<Option<MatchRegion>, CapabilityError> {
        let (score, region) = self.search(window, template)?;
        if score >= threshold {
            Ok(Some(region))
        } else {
            Ok(None)
        }
    }
}

impl NccMatcher {
    /// Best match of the template anywhere in the window. The region
    /// comes back in logical (scale-independent) window coordinates.
    fn search(
        &self,
        window: WindowHandle,
        template: &Path,
    ) -> Result<(f32, MatchRegion), CapabilityError> {
        let capture =
            window::capture_window(window).ok_or(PlatformError::CaptureFailed(window))?;

        let scale = window::window_scale(window);
        let needle = load_template(template, scale)?;
        let haystack = to_gray(&capture);

        let (score, x, y) = best_match(&haystack, &needle)
            .ok_or_else(|| PlatformError::TemplateTooLarge(template.to_path_buf()))?;
        debug!(window, score, x, y, template = %template.display(), "template search");

        let region = MatchRegion {
            x: (x as f32 / scale) as i32,
            y: (y as f32 / scale) as i32,
            width: (needle.width() as f32 / scale) as i32,
            height: (needle.height() as f32 / scale) as i32,
        };
        Ok((score, region))
    }
}

/// Load a template and bring it to the target display scale.
fn load_template(path: &Path, window_scale: f32) -> PlatformResult<GrayImage> {
    let img = image::open(path).map_err(|source| PlatformError::Template {
        path: path.to_path_buf(),
        source,
    })?;
    let gray = img.to_luma8();

    let factor = window_scale / template_capture_scale(path);
    if (factor - 1.0).abs() < SCALE_EPSILON {
        return Ok(gray);
    }

    let width = ((gray.width() as f32 * factor).round() as u32).max(1);
    let height = ((gray.height() as f32 * factor).round() as u32).max(1);
    debug!(template = %path.display(), factor, "rescaling template");
    Ok(imageops::resize(&gray, width, height, FilterType::Lanczos3))
}

/// The display scale factor a PNG template was captured at.
///
/// Reads the `GhostClick_DPI` text chunk written at capture time,
/// falling back to the standard pHYs pixel density, then to 1.0. Any
/// read error also yields 1.0; a stale scale only degrades match
/// quality, it never blocks matching.
pub fn template_capture_scale(path: &Path) -> f32 {
    match read_capture_scale(path) {
        Ok(Some(scale)) if scale > 0.0 => scale,
        Ok(_) => 1.0,
        Err(e) => {
            warn!(template = %path.display(), error = %e, "could not read template scale");
            1.0
        }
    }
}

fn read_capture_scale(path: &Path) -> PlatformResult<Option<f32>> {
    let decoder = png::Decoder::new(BufReader::new(File::open(path)?));
    let reader = decoder.read_info()?;
    let info = reader.info();

    for chunk in &info.uncompressed_latin1_text {
        if chunk.keyword == SCALE_KEYWORD {
            if let Ok(dpi) = chunk.text.trim().parse::<f32>() {
                return Ok(Some(dpi / 96.0));
            }
        }
    }

    if let Some(dims) = info.pixel_dims {
        if dims.unit == png::Unit::Meter && dims.xppu > 0 {
            // pixels-per-meter to DPI, then to a 96-DPI scale factor.
            return Ok(Some(dims.xppu as f32 * 0.0254 / 96.0));
        }
    }

    Ok(None)
}

fn to_gray(rgba: &RgbaImage) -> GrayImage {
    image::DynamicImage::ImageRgba8(rgba.clone()).to_luma8()
}

/// Exhaustive ZNCC search. Returns (best score in [0, 1], x, y), or
/// `None` when the needle does not fit inside the haystack.
fn best_match(haystack: &GrayImage, needle: &GrayImage) -> Option<(f32, u32, u32)> {
    let (hw, hh) = haystack.dimensions();
    let (nw, nh) = needle.dimensions();
    if nw == 0 || nh == 0 || nw > hw || nh > hh {
        return None;
    }

    let n = (nw * nh) as f64;
    let needle_px: Vec<f64> = needle.as_raw().iter().map(|&v| v as f64).collect();
    let needle_sum: f64 = needle_px.iter().sum();
    let needle_mean = needle_sum / n;
    let needle_norm: f64 = needle_px
        .iter()
        .map(|v| (v - needle_mean) * (v - needle_mean))
        .sum::<f64>()
        .sqrt();
    if needle_norm == 0.0 {
        // Flat template: correlation is undefined, nothing to match on.
        return Some((0.0, 0, 0));
    }

    let (sums, sq_sums) = integral_images(haystack);
    let stride = (hw + 1) as usize;
    let window_sum = |x: u32, y: u32, table: &[f64]| -> f64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + nw as usize, y0 + nh as usize);
        table[y1 * stride + x1] - table[y0 * stride + x1] - table[y1 * stride + x0]
            + table[y0 * stride + x0]
    };

    let hay = haystack.as_raw();
    let mut best = (-1.0f64, 0u32, 0u32);

    for y in 0..=(hh - nh) {
        for x in 0..=(hw - nw) {
            let sum = window_sum(x, y, &sums);
            let sq_sum = window_sum(x, y, &sq_sums);
            let variance = sq_sum - sum * sum / n;
            if variance <= 0.0 {
                continue;
            }

            let mut dot = 0.0f64;
            for ny in 0..nh {
                let hay_row = ((y + ny) * hw + x) as usize;
                let needle_row = (ny * nw) as usize;
                for nx in 0..nw as usize {
                    dot += hay[hay_row + nx] as f64 * needle_px[needle_row + nx];
                }
            }

            let score = (dot - sum * needle_mean) / (variance.sqrt() * needle_norm);
            if score > best.0 {
                best = (score, x, y);
            }
        }
    }

    // Anti-correlation is as good as no match.
    Some((best.0.max(0.0) as f32, best.1, best.2))
}

/// Summed-area tables of pixel values and squared values, with a
/// leading zero row/column so window sums need no boundary checks.
fn integral_images(img: &GrayImage) -> (Vec<f64>, Vec<f64>) {
    let (w, h) = img.dimensions();
    let stride = (w + 1) as usize;
    let mut sums = vec![0.0f64; stride * (h + 1) as usize];
    let mut sq_sums = vec![0.0f64; stride * (h + 1) as usize];
    let raw = img.as_raw();

    for y in 0..h as usize {
        let mut row_sum = 0.0f64;
        let mut row_sq = 0.0f64;
        for x in 0..w as usize {
            let v = raw[y * w as usize + x] as f64;
            row_sum += v;
            row_sq += v * v;
            sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            sq_sums[(y + 1) * stride + x + 1] = sq_sums[y * stride + x + 1] + row_sq;
        }
    }
    (sums, sq_sums)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::io::BufWriter;

    fn checkerboard(w: u32, h: u32, phase: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if (x + y + phase) % 2 == 0 {
                Luma([200])
            } else {
                Luma([40])
            }
        })
    }

    #[test]
    fn exact_patch_scores_one_at_its_origin() {
        let mut haystack = GrayImage::from_pixel(40, 30, Luma([10]));
        // Distinctive patch at (12, 7).
        for dy in 0..6 {
            for dx in 0..8 {
                let v = (dx * 25 + dy * 13) as u8;
                haystack.put_pixel(12 + dx, 7 + dy, Luma([v]));
            }
        }
        let needle = imageops::crop_imm(&haystack, 12, 7, 8, 6).to_image();

        let (score, x, y) = best_match(&haystack, &needle).unwrap();
        assert!(score > 0.999, "score was {score}");
        assert_eq!((x, y), (12, 7));
    }

    #[test]
    fn absent_pattern_scores_low() {
        let haystack = GrayImage::from_pixel(30, 30, Luma([128]));
        let needle = checkerboard(8, 8, 0);
        let (score, _, _) = best_match(&haystack, &needle).unwrap();
        assert!(score < 0.3, "score was {score}");
    }

    #[test]
    fn anti_correlated_pattern_clamps_to_zero() {
        // Opposite-phase checkerboards correlate at -1.
        let haystack = checkerboard(16, 16, 0);
        let needle = checkerboard(16, 16, 1);
        let (score, _, _) = best_match(&haystack, &needle).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn oversized_needle_is_rejected() {
        let haystack = GrayImage::from_pixel(8, 8, Luma([0]));
        let needle = GrayImage::from_pixel(16, 16, Luma([0]));
        assert!(best_match(&haystack, &needle).is_none());
    }

    #[test]
    fn flat_template_never_matches() {
        let haystack = checkerboard(16, 16, 0);
        let needle = GrayImage::from_pixel(4, 4, Luma([128]));
        let (score, _, _) = best_match(&haystack, &needle).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn brightness_shift_does_not_change_score() {
        let haystack = checkerboard(20, 20, 0);
        let mut shifted = checkerboard(6, 6, 0);
        for px in shifted.pixels_mut() {
            px.0[0] = px.0[0].saturating_add(30);
        }
        let (score, _, _) = best_match(&haystack, &shifted).unwrap();
        assert!(score > 0.999, "score was {score}");
    }

    #[test]
    fn capture_scale_reads_text_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("button.png");

        let file = BufWriter::new(File::create(&path).unwrap());
        let mut encoder = png::Encoder::new(file, 2, 2);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .add_text_chunk(SCALE_KEYWORD.into(), "120".into())
            .unwrap();
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0, 64, 128, 255]).unwrap();
        writer.finish().unwrap();

        assert!((template_capture_scale(&path) - 1.25).abs() < 1e-6);
    }

    #[test]
    fn capture_scale_defaults_when_metadata_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");

        let file = BufWriter::new(File::create(&path).unwrap());
        let mut encoder = png::Encoder::new(file, 1, 1);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0]).unwrap();
        writer.finish().unwrap();

        assert_eq!(template_capture_scale(&path), 1.0);
        // Missing files are also non-fatal.
        assert_eq!(template_capture_scale(Path::new("/nonexistent.png")), 1.0);
    }
}
