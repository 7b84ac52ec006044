//! Conditional segment combination.
//!
//! Partial pupil outlines often arrive as several arcs (glints and
//! eyelashes cut the rim apart). Merging two arcs that plausibly belong
//! to the same ellipse can recover the full outline: every pair of
//! surviving candidates whose bounding boxes properly intersect is
//! merged via the convex hull of their united point sets and
//! re-evaluated. The merged candidate joins the pool only when its
//! outline contrast strictly beats both parents — combining must make
//! the evidence better, not just bigger. Parents are kept either way.

use imageproc::rect::Rect;

use crate::contour::Segment;
use crate::evaluate::EvalContext;
use crate::types::Detection;

/// Merge qualifying candidate pairs, appending accepted merges to both
/// the segment and the candidate pools.
#[allow(clippy::float_cmp)] // 0.0 is the exact invalid-candidate sentinel
pub(crate) fn combine_segments(
    ctx: &EvalContext<'_>,
    segments: &mut Vec<Segment>,
    candidates: &mut Vec<Detection>,
) {
    let count = segments.len();
    if count == 0 {
        return;
    }

    let mut merged_segments: Vec<Segment> = Vec::new();
    let mut merged_candidates: Vec<Detection> = Vec::new();

    for idx1 in 0..count - 1 {
        if candidates[idx1].confidence.value == 0.0 {
            continue;
        }
        let Some(rect1) = bounding_rect(&segments[idx1]) else {
            continue;
        };
        for idx2 in idx1 + 1..count {
            if candidates[idx2].confidence.value == 0.0 {
                continue;
            }
            let Some(rect2) = bounding_rect(&segments[idx2]) else {
                continue;
            };
            if !proper_intersection(rect1, rect2) {
                continue;
            }

            let merged = merge_segments(&segments[idx1], &segments[idx2]);
            let result = ctx.evaluate(&merged);
            if result.confidence.value == 0.0 {
                continue;
            }
            let previous_contrast = candidates[idx1]
                .confidence
                .outline_contrast
                .max(candidates[idx2].confidence.outline_contrast);
            if result.confidence.outline_contrast <= previous_contrast {
                continue;
            }

            merged_segments.push(merged);
            merged_candidates.push(result);
        }
    }

    segments.append(&mut merged_segments);
    candidates.append(&mut merged_candidates);
}

/// Axis-aligned bounding rectangle of a segment, or `None` when empty.
fn bounding_rect(segment: &Segment) -> Option<Rect> {
    let first = segment.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &segment[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    #[allow(clippy::cast_sign_loss)]
    let rect = Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32);
    Some(rect)
}

/// Two rectangles intersect properly when the intersection is non-empty
/// and equal to neither — overlap without containment.
fn proper_intersection(r1: Rect, r2: Rect) -> bool {
    #[allow(clippy::cast_possible_wrap)]
    let (right1, bottom1) = (
        r1.left() + r1.width() as i32,
        r1.top() + r1.height() as i32,
    );
    #[allow(clippy::cast_possible_wrap)]
    let (right2, bottom2) = (
        r2.left() + r2.width() as i32,
        r2.top() + r2.height() as i32,
    );

    let left = r1.left().max(r2.left());
    let top = r1.top().max(r2.top());
    let right = right1.min(right2);
    let bottom = bottom1.min(bottom2);
    if left >= right || top >= bottom {
        return false;
    }

    #[allow(clippy::cast_sign_loss)]
    let intersection = Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32);
    intersection != r1 && intersection != r2
}

/// Union of two segments, reduced to its convex hull.
///
/// The hull is the simplest closed outline consistent with both arcs;
/// without documentation of the original combination rule this is the
/// natural choice, and the contrast gate above rejects bad merges.
fn merge_segments(s1: &Segment, s2: &Segment) -> Segment {
    let mut combined = Vec::with_capacity(s1.len() + s2.len());
    combined.extend_from_slice(s1);
    combined.extend_from_slice(s2);
    imageproc::geometry::convex_hull(combined)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use image::GrayImage;
    use imageproc::point::Point as PixelPoint;

    fn rect(left: i32, top: i32, w: u32, h: u32) -> Rect {
        Rect::at(left, top).of_size(w, h)
    }

    #[test]
    fn disjoint_rects_do_not_intersect() {
        assert!(!proper_intersection(rect(0, 0, 10, 10), rect(20, 20, 5, 5)));
    }

    #[test]
    fn touching_rects_do_not_intersect() {
        // Sharing only an edge yields an empty interior.
        assert!(!proper_intersection(rect(0, 0, 10, 10), rect(10, 0, 10, 10)));
    }

    #[test]
    fn contained_rect_is_not_proper() {
        let outer = rect(0, 0, 20, 20);
        let inner = rect(5, 5, 4, 4);
        assert!(!proper_intersection(outer, inner));
        assert!(!proper_intersection(inner, outer));
    }

    #[test]
    fn identical_rects_are_not_proper() {
        let r = rect(3, 3, 7, 7);
        assert!(!proper_intersection(r, r));
    }

    #[test]
    fn overlapping_rects_are_proper() {
        assert!(proper_intersection(rect(0, 0, 10, 10), rect(5, 5, 10, 10)));
    }

    #[test]
    fn bounding_rect_spans_all_points() {
        let segment = vec![
            PixelPoint::new(3, 7),
            PixelPoint::new(10, 2),
            PixelPoint::new(6, 9),
        ];
        let r = bounding_rect(&segment).expect("non-empty segment");
        assert_eq!((r.left(), r.top()), (3, 2));
        assert_eq!((r.width(), r.height()), (8, 8));
    }

    #[test]
    fn merged_segment_is_convex() {
        let s1 = vec![
            PixelPoint::new(0, 0),
            PixelPoint::new(10, 0),
            PixelPoint::new(5, 2),
        ];
        let s2 = vec![
            PixelPoint::new(0, 10),
            PixelPoint::new(10, 10),
            PixelPoint::new(5, 8),
        ];
        let hull = merge_segments(&s1, &s2);
        // Interior points of the union drop out of the hull.
        assert!(!hull.contains(&PixelPoint::new(5, 2)));
        assert!(!hull.contains(&PixelPoint::new(5, 8)));
        assert!(hull.contains(&PixelPoint::new(0, 0)));
        assert!(hull.contains(&PixelPoint::new(10, 10)));
    }

    /// Appending a merge requires its contrast to strictly beat both
    /// parents. Two clean half rings already score perfect contrast, so
    /// their (equally perfect) union must be rejected — combination
    /// never pads the pool with merges that add no evidence.
    #[test]
    fn merge_without_contrast_gain_is_rejected() {
        let image = GrayImage::from_fn(96, 96, |x, y| {
            let d = (x as f32 - 48.0).hypot(y as f32 - 48.0);
            image::Luma([if d <= 25.0 { 10 } else { 200 }])
        });
        let ctx = EvalContext {
            image: &image,
            min_pupil_diameter: 12.0,
            max_pupil_diameter: 80.0,
        };

        #[allow(clippy::cast_possible_truncation)]
        let arc = |start: i32, end: i32| -> Segment {
            (start..end)
                .step_by(2)
                .map(|deg| {
                    let theta = f64::from(deg).to_radians();
                    PixelPoint::new(
                        (48.0 + 25.0 * theta.cos()).round() as i32,
                        (48.0 + 25.0 * theta.sin()).round() as i32,
                    )
                })
                .collect()
        };

        // Overlapping ranges so the two bounding boxes intersect
        // properly and the pair is actually considered.
        let mut segments = vec![arc(-80, 100), arc(95, 275)];
        let mut candidates = Vec::new();
        ctx.evaluate_all(&segments, &mut candidates);
        assert!(candidates.iter().all(|c| c.confidence.value > 0.0));
        let parent_contrast = candidates[0]
            .confidence
            .outline_contrast
            .max(candidates[1].confidence.outline_contrast);
        assert!((parent_contrast - 1.0).abs() < f64::EPSILON);

        // The union evaluates fine but cannot strictly beat contrast 1.
        let merged = ctx.evaluate(&merge_segments(&segments[0], &segments[1]));
        assert!(merged.confidence.value > 0.0);
        assert!(merged.confidence.outline_contrast <= parent_contrast);

        combine_segments(&ctx, &mut segments, &mut candidates);
        assert_eq!(segments.len(), 2, "no merge may be appended");
        assert_eq!(candidates.len(), 2);
    }
}
