//! Frame preprocessing: downscale to working resolution, min-max
//! normalization, and pupil-size bound resolution.
//!
//! Large inputs are shrunk with area-averaging interpolation so all the
//! expensive downstream stages (Canny, morphology, per-segment scoring)
//! operate on a bounded pixel grid. The scaling factor is remembered so
//! the final ellipse can be mapped back to input coordinates.

use image::GrayImage;

use crate::types::Parameters;

/// Working-resolution target. Inputs whose area exceeds
/// `TARGET_WIDTH * TARGET_HEIGHT` are downscaled.
pub(crate) const TARGET_WIDTH: u32 = 192;
/// See [`TARGET_WIDTH`].
pub(crate) const TARGET_HEIGHT: u32 = 192;

/// Automatic minimum pupil diameter, as a fraction of the working-image
/// diagonal.
const MIN_PUPIL_DIAMETER_RATIO: f64 = 0.07 * 2.0 / 3.0;
/// Automatic maximum pupil diameter, as a fraction of the working-image
/// diagonal.
const MAX_PUPIL_DIAMETER_RATIO: f64 = 0.29;

/// Uniform scaling factor bringing `width x height` down to the target
/// area, or `0.0` as the sentinel for "no scaling needed".
#[must_use]
pub(crate) fn scaling_factor(width: u32, height: u32) -> f64 {
    let input_area = f64::from(width) * f64::from(height);
    let target_area = f64::from(TARGET_WIDTH) * f64::from(TARGET_HEIGHT);
    if input_area > target_area {
        (target_area / input_area).sqrt()
    } else {
        0.0
    }
}

/// Shrink `src` by `factor` (both axes) with area-averaging
/// interpolation, writing into `dst`.
///
/// Each destination pixel is the coverage-weighted mean of the source
/// pixels its footprint overlaps, which is the appropriate filter for
/// decimation (no aliasing, no ringing).
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub(crate) fn downscale_area(src: &GrayImage, factor: f64, dst: &mut GrayImage) {
    let (src_w, src_h) = (src.width() as usize, src.height() as usize);
    let dst_w = ((src.width() as f64) * factor).round().max(1.0) as u32;
    let dst_h = ((src.height() as f64) * factor).round().max(1.0) as u32;
    ensure_dimensions(dst, dst_w, dst_h);

    let inv_x = src_w as f64 / f64::from(dst_w);
    let inv_y = src_h as f64 / f64::from(dst_h);
    let src_data: &[u8] = src;

    for oy in 0..dst_h as usize {
        let y0 = oy as f64 * inv_y;
        let y1 = ((oy + 1) as f64 * inv_y).min(src_h as f64);
        for ox in 0..dst_w as usize {
            let x0 = ox as f64 * inv_x;
            let x1 = ((ox + 1) as f64 * inv_x).min(src_w as f64);

            let mut sum = 0.0;
            let mut sy = y0.floor() as usize;
            while (sy as f64) < y1 {
                let wy = ((sy + 1) as f64).min(y1) - (sy as f64).max(y0);
                let row = sy * src_w;
                let mut sx = x0.floor() as usize;
                while (sx as f64) < x1 {
                    let wx = ((sx + 1) as f64).min(x1) - (sx as f64).max(x0);
                    sum += wx * wy * f64::from(src_data[row + sx]);
                    sx += 1;
                }
                sy += 1;
            }

            let area = (x1 - x0) * (y1 - y0);
            let value = (sum / area).round().clamp(0.0, 255.0) as u8;
            dst.put_pixel(ox as u32, oy as u32, image::Luma([value]));
        }
    }
}

/// Stretch the image intensities so they span the full `[0, 255]` range.
///
/// A constant image is left unchanged (there is no contrast to stretch,
/// and downstream edge detection finds nothing either way).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn normalize_minmax(img: &mut GrayImage) {
    let data: &mut [u8] = img;
    let Some((&min, &max)) = data
        .iter()
        .min()
        .zip(data.iter().max())
        .filter(|(min, max)| min != max)
    else {
        return;
    };

    let scale = 255.0 / f64::from(max - min);
    for value in data {
        *value = (f64::from(*value - min) * scale).round() as u8;
    }
}

/// Resolve the effective pupil-diameter bounds in working-image pixels.
///
/// In automatic mode the bounds derive from the working-image diagonal
/// and the equivalent input-pixel values are written back into `params`.
/// In explicit mode the configured bounds are scaled down to the working
/// resolution. Returns `None` when the resolved bounds are negative or
/// inverted.
#[must_use]
#[allow(clippy::float_cmp)] // 0.0 is the exact "no scaling" sentinel
pub(crate) fn resolve_pupil_bounds(
    params: &mut Parameters,
    width: u32,
    height: u32,
    scaling: f64,
) -> Option<(f64, f64)> {
    let diameter_scaling = if scaling == 0.0 { 1.0 } else { scaling };

    let (min, max) = if params.auto_pupil_diameter {
        let diagonal = f64::from(width).hypot(f64::from(height));
        let min = MIN_PUPIL_DIAMETER_RATIO * diagonal;
        let max = MAX_PUPIL_DIAMETER_RATIO * diagonal;
        // Report the computed bounds back in input-pixel units.
        params.min_pupil_diameter = min / diameter_scaling;
        params.max_pupil_diameter = max / diameter_scaling;
        (min, max)
    } else {
        (
            params.min_pupil_diameter * diameter_scaling,
            params.max_pupil_diameter * diameter_scaling,
        )
    };

    (min >= 0.0 && max >= 0.0 && min <= max).then_some((min, max))
}

/// Reallocate a grayscale buffer if its dimensions differ.
pub(crate) fn ensure_dimensions(img: &mut GrayImage, width: u32, height: u32) {
    if img.dimensions() != (width, height) {
        *img = GrayImage::new(width, height);
    }
}
