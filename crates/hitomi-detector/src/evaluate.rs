//! Per-segment filtering, ellipse fitting, and confidence scoring.
//!
//! Each edge segment runs through five filters in order; the first
//! failure marks the candidate with zero confidence and stops the
//! evaluation. Survivors get a confidence score that is the mean of
//! three normalized measures: ellipse aspect ratio, angular spread of
//! the segment around the ellipse center, and gray-level contrast
//! across the ellipse outline.

use image::GrayImage;
use imageproc::point::Point as PixelPoint;

use crate::contour::Segment;
use crate::ellipse::{self, FittedEllipse};
use crate::types::{Confidence, Detection, Point};

/// Segments and fitted ellipses whose axes ratio leaves this band are
/// too elongated to be a pupil.
const AXES_RATIO_THRESHOLD: f64 = 0.2;

/// Gray levels the outside of the outline must exceed the inside by.
const CONTRAST_BIAS: f64 = 5.0;

/// Number of outline directions probed for contrast.
const CONTRAST_DIRECTIONS: usize = 36;

/// Probe length on each side of the outline, as a fraction of the
/// minor semi-axis.
const CONTRAST_PROBE_RATIO: f64 = 0.3;

/// Shared inputs for evaluating segments of one frame.
pub(crate) struct EvalContext<'a> {
    /// The preprocessed working image.
    pub image: &'a GrayImage,
    /// Smallest accepted pupil diameter, working-image pixels.
    pub min_pupil_diameter: f64,
    /// Largest accepted pupil diameter, working-image pixels.
    pub max_pupil_diameter: f64,
}

impl EvalContext<'_> {
    /// Evaluate every segment, producing one candidate per segment.
    pub(crate) fn evaluate_all(&self, segments: &[Segment], candidates: &mut Vec<Detection>) {
        candidates.clear();
        candidates.extend(segments.iter().map(|segment| self.evaluate(segment)));
    }

    /// Run the filter cascade on one segment.
    ///
    /// Returns a zero-confidence detection as soon as any filter fails.
    pub(crate) fn evaluate(&self, segment: &Segment) -> Detection {
        // Too small to fit an ellipse to.
        if segment.len() < 5 {
            return Detection::default();
        }

        // Approximate diameter against the pupil size bounds.
        if !self.diameter_valid(segment) {
            return Detection::default();
        }

        // Curvature approximation via the minimum-area rectangle.
        if !curvature_valid(segment) {
            return Detection::default();
        }

        // Ellipse fit, with center and skew checks.
        let Some(fit) = self.fit_segment(segment) else {
            return Detection::default();
        };

        // The segment's centroid must sit well inside the ellipse.
        if !mean_in_ellipse(segment, &fit) {
            return Detection::default();
        }

        let confidence = self.confidence(segment, &fit);
        Detection {
            center: fit.center,
            axes: fit.axes,
            angle: fit.angle,
            confidence,
        }
    }

    /// Largest pairwise point distance, tested against the diameter
    /// bounds. Quadratic, but exits as soon as the bound is exceeded.
    fn diameter_valid(&self, segment: &Segment) -> bool {
        let mut approx_diameter = 0.0_f64;
        'outer: for (i, p1) in segment.iter().enumerate() {
            for p2 in &segment[i + 1..] {
                let d = point_distance(*p1, *p2);
                if d > approx_diameter {
                    approx_diameter = d;
                }
                // Only ever grows; once too large we are done.
                if approx_diameter > self.max_pupil_diameter {
                    break 'outer;
                }
            }
        }
        self.min_pupil_diameter < approx_diameter && approx_diameter < self.max_pupil_diameter
    }

    /// Fit an ellipse and reject fits whose center leaves the image or
    /// whose axes are too skewed.
    fn fit_segment(&self, segment: &Segment) -> Option<FittedEllipse> {
        let fit = ellipse::fit(segment)?;

        let (w, h) = (
            f64::from(self.image.width()),
            f64::from(self.image.height()),
        );
        if fit.center.x < 0.0 || fit.center.y < 0.0 || fit.center.x > w || fit.center.y > h {
            return None;
        }

        if axes_ratio_is_invalid(fit.axes.width / fit.axes.height) {
            return None;
        }
        Some(fit)
    }

    /// Confidence of a surviving candidate: mean of aspect ratio,
    /// angular spread, and outline contrast.
    fn confidence(&self, segment: &Segment, fit: &FittedEllipse) -> Confidence {
        let mut aspect_ratio = fit.axes.width / fit.axes.height;
        if aspect_ratio > 1.0 {
            aspect_ratio = 1.0 / aspect_ratio;
        }

        let angular_spread = angular_edge_spread(segment, fit.center);
        let outline_contrast = self.outline_contrast(fit);
        let value = (aspect_ratio + angular_spread + outline_contrast) / 3.0;

        Confidence {
            value,
            aspect_ratio,
            angular_spread,
            outline_contrast,
        }
    }

    /// Fraction of outline directions where the image is darker inside
    /// the ellipse than outside.
    ///
    /// Probes 36 directions in 10° steps. For each, a short line is
    /// sampled on both sides of the outline point along the outward
    /// normal (approximated by the center-to-outline direction); the
    /// direction counts when the inner mean plus a small bias stays
    /// below the outer mean. Directions whose probe endpoints leave the
    /// image contribute nothing.
    pub(crate) fn outline_contrast(&self, fit: &FittedEllipse) -> f64 {
        let stride = 10.0_f64.to_radians();
        let probe = CONTRAST_PROBE_RATIO * fit.axes.minor();
        let (w, h) = (
            f64::from(self.image.width()),
            f64::from(self.image.height()),
        );

        let mut contrast = 0.0;
        for i in 0..CONTRAST_DIRECTIONS {
            #[allow(clippy::cast_precision_loss)]
            let theta = stride * i as f64;
            let outline = fit.outline_point(theta);
            let (dx, dy) = (outline.x - fit.center.x, outline.y - fit.center.y);
            let norm = dx.hypot(dy);
            if norm <= f64::EPSILON {
                continue;
            }
            let (ux, uy) = (dx / norm, dy / norm);
            let inner = Point::new(outline.x - probe * ux, outline.y - probe * uy);
            let outer = Point::new(outline.x + probe * ux, outline.y + probe * uy);

            let in_bounds =
                |p: Point| p.x >= 0.0 && p.x < w && p.y >= 0.0 && p.y < h;
            if !in_bounds(inner) || !in_bounds(outer) {
                continue;
            }

            let inner_avg = line_mean(self.image, inner, outline);
            let outer_avg = line_mean(self.image, outline, outer);
            if inner_avg + CONTRAST_BIAS < outer_avg {
                contrast += 1.0;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let n = CONTRAST_DIRECTIONS as f64;
        contrast / n
    }
}

/// `true` when a width/height ratio is too far from round.
pub(crate) fn axes_ratio_is_invalid(ratio: f64) -> bool {
    ratio < AXES_RATIO_THRESHOLD || ratio > 1.0 / AXES_RATIO_THRESHOLD
}

/// Curvature approximation: the minimum-area oriented rectangle of the
/// segment must not be too elongated.
fn curvature_valid(segment: &Segment) -> bool {
    // Collinear segments degenerate to a zero-height rectangle, which
    // is maximally elongated; settle them before the rotating-calipers
    // call has to deal with them.
    if segment_is_collinear(segment) {
        return false;
    }
    let rect = imageproc::geometry::min_area_rect(segment);
    let width = point_distance(rect[0], rect[1]);
    let height = point_distance(rect[1], rect[2]);
    !axes_ratio_is_invalid(width / height)
}

fn segment_is_collinear(segment: &Segment) -> bool {
    let Some(&first) = segment.first() else {
        return true;
    };
    let Some(&second) = segment.iter().find(|p| **p != first) else {
        return true;
    };
    let (ux, uy) = (
        i64::from(second.x - first.x),
        i64::from(second.y - first.y),
    );
    segment.iter().all(|p| {
        let (vx, vy) = (i64::from(p.x - first.x), i64::from(p.y - first.y));
        ux * vy == uy * vx
    })
}

/// The segment centroid must lie inside the rhombus spanned by the
/// midpoints of the ellipse's bounding-box sides.
///
/// Testing happens in the ellipse frame: translate the centroid by the
/// negative center, rotate back by the negative angle, and take
/// absolute values. Symmetry reduces the test to the first quadrant,
/// where the rhombus edge is the line `x/a + y/b = 1`.
fn mean_in_ellipse(segment: &Segment, fit: &FittedEllipse) -> bool {
    #[allow(clippy::cast_precision_loss)]
    let n = segment.len() as f64;
    let mean_x = segment.iter().map(|p| f64::from(p.x)).sum::<f64>() / n;
    let mean_y = segment.iter().map(|p| f64::from(p.y)).sum::<f64>() / n;

    let (dx, dy) = (mean_x - fit.center.x, mean_y - fit.center.y);
    let (sin_a, cos_a) = (-fit.angle.to_radians()).sin_cos();
    let x = dx.mul_add(cos_a, -dy * sin_a).abs();
    let y = dx.mul_add(sin_a, dy * cos_a).abs();

    x < fit.axes.width && y < fit.axes.height && x / fit.axes.width + y / fit.axes.height < 1.0
}

/// Fraction of the eight angular octants around `center` that contain
/// segment points. Exits early once all octants are hit.
pub(crate) fn angular_edge_spread(segment: &Segment, center: Point) -> f64 {
    let mut octants = 0_u8;
    for p in segment {
        let vx = f64::from(p.x) - center.x;
        let vy = f64::from(p.y) - center.y;
        let bit = match (vx > 0.0, vy > 0.0) {
            (true, true) => u8::from(vx <= vy),
            (true, false) => 2 + u8::from(vx <= -vy),
            (false, false) => 4 + u8::from(-vx > -vy),
            (false, true) => 6 + u8::from(-vx <= vy),
        };
        octants |= 1 << bit;
        if octants == 0xFF {
            break;
        }
    }
    f64::from(octants.count_ones()) / 8.0
}

/// Mean gray value along the 4-connected line from `from` to `to`,
/// endpoints included.
///
/// Both endpoints must already be within image bounds; coordinates are
/// rounded to the pixel grid and clamped defensively.
fn line_mean(image: &GrayImage, from: Point, to: Point) -> f64 {
    #[allow(clippy::cast_possible_truncation)]
    let clamp_point = |p: Point| -> (i64, i64) {
        (
            (p.x.round() as i64).clamp(0, i64::from(image.width()) - 1),
            (p.y.round() as i64).clamp(0, i64::from(image.height()) - 1),
        )
    };
    let (x0, y0) = clamp_point(from);
    let (x1, y1) = clamp_point(to);

    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x1 >= x0 { 1 } else { -1 };
    let sy = if y1 >= y0 { 1 } else { -1 };

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let sample = |x: i64, y: i64| f64::from(image.get_pixel(x as u32, y as u32).0[0]);

    let (mut x, mut y) = (x0, y0);
    let mut sum = sample(x, y);
    let (mut ix, mut iy) = (0_i64, 0_i64);
    while ix < dx || iy < dy {
        // Step along whichever axis lags behind the ideal line.
        if (1 + 2 * ix) * dy < (1 + 2 * iy) * dx {
            x += sx;
            ix += 1;
        } else {
            y += sy;
            iy += 1;
        }
        sum += sample(x, y);
    }

    #[allow(clippy::cast_precision_loss)]
    let count = (dx + dy + 1) as f64;
    sum / count
}

/// Euclidean distance between two pixel coordinates.
fn point_distance(a: PixelPoint<i32>, b: PixelPoint<i32>) -> f64 {
    f64::from(a.x - b.x).hypot(f64::from(a.y - b.y))
}
