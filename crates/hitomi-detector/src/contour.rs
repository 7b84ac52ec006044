//! Contour extraction: polyline segments from the cleaned edge map.
//!
//! Border following (Suzuki–Abe, via [`imageproc::contours`]) produces
//! one pixel chain per connected stroke. Each chain is then reduced to
//! its dominant points with a Teh–Chin style k-cosine pass: for every
//! point a region of support is grown while the chord keeps lengthening
//! and the deviation/chord ratio keeps shrinking, the k-cosine over that
//! support measures curvature, and only local curvature maxima survive.
//!
//! The reduction is deliberately conservative: ties keep their points,
//! so constant-curvature chains (circles) stay densely sampled while
//! stairstep noise on straight and gently curved runs is dropped.

use image::GrayImage;
use imageproc::point::Point;

/// An ordered chain of edge pixels.
pub(crate) type Segment = Vec<Point<i32>>;

/// Maximum half-width of a point's region of support.
const MAX_SUPPORT: usize = 16;

/// Trace all contours of `edges` and reduce each to its dominant points.
///
/// Segment order follows the tracing order of the border-following scan;
/// it carries no meaning for the caller.
pub(crate) fn extract_segments(edges: &GrayImage, out: &mut Vec<Segment>) {
    out.clear();
    let contours: Vec<imageproc::contours::Contour<i32>> =
        imageproc::contours::find_contours(edges);
    out.extend(
        contours
            .into_iter()
            .map(|contour| dominant_points(&contour.points)),
    );
}

/// Reduce a closed chain to its dominant points by k-cosine curvature.
pub(crate) fn dominant_points(points: &[Point<i32>]) -> Segment {
    let n = points.len();
    if n < 5 {
        return points.to_vec();
    }

    let supports: Vec<usize> = (0..n).map(|i| region_of_support(points, i)).collect();
    let measures: Vec<f64> = (0..n)
        .map(|i| k_cosine(points, i, supports[i]))
        .collect();

    // Non-maximum suppression over each point's half-support. Ties are
    // kept on both sides so plateaus of equal curvature survive whole.
    (0..n)
        .filter(|&i| {
            let radius = (supports[i] / 2).max(1);
            (1..=radius).all(|d| {
                measures[i] >= measures[(i + d) % n] && measures[i] >= measures[(i + n - d) % n]
            })
        })
        .map(|i| points[i])
        .collect()
}

/// Grow the region of support for point `i`.
///
/// The support half-width `k` grows while the chord between `p[i-k]` and
/// `p[i+k]` keeps lengthening and the ratio of the point's deviation
/// from the chord to the chord length does not increase.
fn region_of_support(points: &[Point<i32>], i: usize) -> usize {
    let n = points.len();
    let max_k = (n / 2).min(MAX_SUPPORT);
    let mut k = 1;
    let (mut chord, mut deviation) = chord_and_deviation(points, i, k);

    while k + 1 <= max_k {
        let (next_chord, next_deviation) = chord_and_deviation(points, i, k + 1);
        if next_chord < chord {
            break;
        }
        if chord > f64::EPSILON
            && next_chord > f64::EPSILON
            && (next_deviation / next_chord) > (deviation / chord)
        {
            break;
        }
        chord = next_chord;
        deviation = next_deviation;
        k += 1;
    }
    k
}

/// Chord length between the support endpoints of point `i`, and the
/// perpendicular deviation of `p[i]` from that chord.
fn chord_and_deviation(points: &[Point<i32>], i: usize, k: usize) -> (f64, f64) {
    let n = points.len();
    let fwd = points[(i + k) % n];
    let back = points[(i + n - k) % n];
    let here = points[i];

    let cx = f64::from(fwd.x - back.x);
    let cy = f64::from(fwd.y - back.y);
    let chord = cx.hypot(cy);
    if chord <= f64::EPSILON {
        return (0.0, 0.0);
    }
    let px = f64::from(here.x - back.x);
    let py = f64::from(here.y - back.y);
    let deviation = (cx * py - cy * px).abs() / chord;
    (chord, deviation)
}

/// The k-cosine of point `i`: cosine of the angle between the vectors
/// to its support endpoints. Straight runs score -1, sharp corners +1.
fn k_cosine(points: &[Point<i32>], i: usize, k: usize) -> f64 {
    let n = points.len();
    let here = points[i];
    let fwd = points[(i + k) % n];
    let back = points[(i + n - k) % n];

    let ax = f64::from(fwd.x - here.x);
    let ay = f64::from(fwd.y - here.y);
    let bx = f64::from(back.x - here.x);
    let by = f64::from(back.y - here.y);
    let norms = ax.hypot(ay) * bx.hypot(by);
    if norms <= f64::EPSILON {
        // Degenerate support (duplicate points); score as a sharp corner
        // so the point survives suppression.
        return 1.0;
    }
    ax.mul_add(bx, ay * by) / norms
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn closed_rect_chain(w: i32, h: i32) -> Vec<Point<i32>> {
        let mut pts = Vec::new();
        for x in 0..w {
            pts.push(Point::new(x, 0));
        }
        for y in 1..h {
            pts.push(Point::new(w - 1, y));
        }
        for x in (0..w - 1).rev() {
            pts.push(Point::new(x, h - 1));
        }
        for y in (1..h - 1).rev() {
            pts.push(Point::new(0, y));
        }
        pts
    }

    #[test]
    fn short_chains_pass_through() {
        let pts = vec![Point::new(0, 0), Point::new(1, 1), Point::new(2, 2)];
        assert_eq!(dominant_points(&pts), pts);
    }

    #[test]
    fn rectangle_corners_survive_reduction() {
        let chain = closed_rect_chain(12, 9);
        let reduced = dominant_points(&chain);
        assert!(reduced.len() < chain.len(), "straight runs must shrink");
        for corner in [
            Point::new(0, 0),
            Point::new(11, 0),
            Point::new(11, 8),
            Point::new(0, 8),
        ] {
            assert!(
                reduced.contains(&corner),
                "corner {corner:?} must be dominant",
            );
        }
    }

    #[test]
    fn circle_keeps_enough_points_for_fitting() {
        let mut chain = Vec::new();
        for i in 0..72 {
            let theta = f64::from(i) * std::f64::consts::PI / 36.0;
            #[allow(clippy::cast_possible_truncation)]
            chain.push(Point::new(
                (40.0 + 25.0 * theta.cos()).round() as i32,
                (40.0 + 25.0 * theta.sin()).round() as i32,
            ));
        }
        chain.dedup();
        let reduced = dominant_points(&chain);
        assert!(
            reduced.len() >= 8,
            "constant curvature must stay densely sampled, got {}",
            reduced.len(),
        );
    }

    #[test]
    fn extraction_finds_a_drawn_square() {
        let mut img = GrayImage::new(20, 20);
        for i in 5..15 {
            img.put_pixel(i, 5, image::Luma([255]));
            img.put_pixel(i, 14, image::Luma([255]));
            img.put_pixel(5, i, image::Luma([255]));
            img.put_pixel(14, i, image::Luma([255]));
        }
        let mut segments = Vec::new();
        extract_segments(&img, &mut segments);
        assert!(!segments.is_empty());
        let longest = segments
            .iter()
            .map(Vec::len)
            .max()
            .expect("at least one segment");
        assert!(longest >= 4, "square outline should keep its corners");
    }

    #[test]
    fn empty_image_produces_no_segments() {
        let img = GrayImage::new(16, 16);
        let mut segments = vec![vec![Point::new(0, 0)]];
        extract_segments(&img, &mut segments);
        assert!(segments.is_empty());
    }
}
