//! The pupil detector: stage orchestration, final candidate selection,
//! and coordinate postprocessing.
//!
//! One [`Detector`] owns every scratch buffer the pipeline needs, so
//! repeated detection on same-sized frames runs allocation-free. A
//! detector is deliberately not `Sync`-shareable state: use one
//! instance per thread.

use image::{GrayImage, RgbImage};

use crate::canny::CannyStage;
use crate::combine;
use crate::contour::{self, Segment};
use crate::debug_view::DebugView;
use crate::evaluate::EvalContext;
use crate::morphology;
use crate::preprocess;
use crate::types::{Detection, Parameters};

/// Alternates to the global best need at least this outline contrast.
const ALTERNATE_CONTRAST_GATE: f64 = 0.75;

/// Alternates may be at most this fraction of the global best's
/// semi-major axis. The PuRe paper gates at the full semi-major; in
/// dark scenes the pupil fills most of the iris and 0.8 holds up
/// better.
const ALTERNATE_SIZE_RATIO: f64 = 0.8;

/// Stateless-per-frame pupil detector with reusable scratch buffers.
///
/// The detector implements PuRe (Santini, Fuhl, Kasneci: "PuRe: Robust
/// pupil detection for real-time pervasive eye tracking"), with the
/// MATLAB-style edge extraction and the morphological cleanup steps of
/// its ExCuSe/ElSe ancestors.
///
/// ```
/// use hitomi_detector::Detector;
/// use image::GrayImage;
///
/// let eye = GrayImage::new(192, 192);
/// let mut detector = Detector::new();
/// let result = detector.detect(&eye);
/// assert_eq!(result.confidence.value, 0.0); // blank frame: no pupil
/// ```
pub struct Detector {
    /// Pupil size configuration. When `auto_pupil_diameter` is set, the
    /// resolved bounds are written back after every call.
    pub params: Parameters,
    working: GrayImage,
    edges: GrayImage,
    canny: CannyStage,
    segments: Vec<Segment>,
    candidates: Vec<Detection>,
    scaling_factor: f64,
    min_pupil_diameter: f64,
    max_pupil_diameter: f64,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    /// Create a detector with automatic pupil-size bounds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_params(Parameters::default())
    }

    /// Create a detector with the given pupil-size configuration.
    #[must_use]
    pub fn with_params(params: Parameters) -> Self {
        Self {
            params,
            working: GrayImage::new(0, 0),
            edges: GrayImage::new(0, 0),
            canny: CannyStage::new(),
            segments: Vec::new(),
            candidates: Vec::new(),
            scaling_factor: 0.0,
            min_pupil_diameter: 0.0,
            max_pupil_diameter: 0.0,
        }
    }

    /// Detect the pupil in a single grayscale eye image.
    ///
    /// Returns a zero-confidence [`Detection`] when no pupil is found,
    /// when the resolved size bounds are invalid, or when the input is
    /// smaller than 6×6 (the morphology stencils need an interior).
    pub fn detect(&mut self, input: &GrayImage) -> Detection {
        self.run(input, None)
    }

    /// Like [`detect`](Self::detect), additionally rendering a
    /// diagnostic overlay into `debug`.
    ///
    /// The overlay shows the preprocessed frame, the edge map, every
    /// candidate color-coded from red (confidence 0) to green
    /// (confidence 1), the pupil-size bounds, and a confidence bar.
    /// `debug` is resized to the input dimensions. The plain `detect`
    /// path shares none of this cost.
    pub fn detect_with_debug(&mut self, input: &GrayImage, debug: &mut RgbImage) -> Detection {
        self.run(input, Some(debug))
    }

    fn run(&mut self, input: &GrayImage, debug: Option<&mut RgbImage>) -> Detection {
        if input.width() < 6 || input.height() < 6 {
            return Detection::default();
        }

        let bounds_ok = self.preprocess(input);
        let mut view = debug.map(|out| DebugView::new(&self.working, out));

        if !bounds_ok {
            // Invalid pupil size bounds: report "no pupil", but still
            // hand back the debug backdrop.
            let mut zero = Detection::default();
            self.postprocess(&mut zero, input, view);
            return zero;
        }

        self.detect_edges();
        if let Some(v) = view.as_mut() {
            v.blend_edges(&self.edges);
        }

        self.select_edge_segments();
        self.combine_segments();
        if let Some(v) = view.as_mut() {
            v.draw_candidates(&self.segments, &self.candidates);
            v.draw_diameter_bounds(self.min_pupil_diameter, self.max_pupil_diameter);
        }

        let mut result = self.select_final_segment();
        if let Some(v) = view.as_mut() {
            v.draw_result(&result);
        }

        self.postprocess(&mut result, input, view);
        result
    }

    /// Copy or downscale the input into the working buffer, stretch its
    /// contrast, and resolve the pupil-size bounds.
    #[allow(clippy::float_cmp)] // 0.0 is the exact "no scaling" sentinel
    fn preprocess(&mut self, input: &GrayImage) -> bool {
        self.scaling_factor = preprocess::scaling_factor(input.width(), input.height());
        if self.scaling_factor == 0.0 {
            preprocess::ensure_dimensions(&mut self.working, input.width(), input.height());
            let dst: &mut [u8] = &mut self.working;
            dst.copy_from_slice(input);
        } else {
            preprocess::downscale_area(input, self.scaling_factor, &mut self.working);
        }

        preprocess::normalize_minmax(&mut self.working);

        let Some((min, max)) = preprocess::resolve_pupil_bounds(
            &mut self.params,
            self.working.width(),
            self.working.height(),
            self.scaling_factor,
        ) else {
            return false;
        };
        self.min_pupil_diameter = min;
        self.max_pupil_diameter = max;
        true
    }

    /// Canny edge extraction followed by the four morphology passes.
    fn detect_edges(&mut self) {
        self.canny.run(&self.working, &mut self.edges);
        morphology::cleanup(&mut self.edges);
    }

    /// Trace edge segments and evaluate each into a candidate.
    fn select_edge_segments(&mut self) {
        contour::extract_segments(&self.edges, &mut self.segments);
        let ctx = EvalContext {
            image: &self.working,
            min_pupil_diameter: self.min_pupil_diameter,
            max_pupil_diameter: self.max_pupil_diameter,
        };
        ctx.evaluate_all(&self.segments, &mut self.candidates);
    }

    /// Merge candidate pairs whose union has better outline contrast.
    fn combine_segments(&mut self) {
        let ctx = EvalContext {
            image: &self.working,
            min_pupil_diameter: self.min_pupil_diameter,
            max_pupil_diameter: self.max_pupil_diameter,
        };
        combine::combine_segments(&ctx, &mut self.segments, &mut self.candidates);
    }

    /// Pick the final result among the candidates.
    ///
    /// The global confidence maximum is the default answer. A smaller,
    /// high-contrast candidate close to it wins instead when present:
    /// in bright-pupil-rim conditions the iris outline can outscore the
    /// actual pupil, and the constrained alternate corrects that.
    #[allow(clippy::float_cmp)] // 0.0 is the exact invalid-candidate sentinel
    fn select_final_segment(&self) -> Detection {
        let Some(first) = self.candidates.first() else {
            return Detection::default();
        };

        // Earliest maximum, so ties resolve deterministically.
        let mut initial = first;
        for candidate in &self.candidates[1..] {
            if candidate.confidence.value > initial.confidence.value {
                initial = candidate;
            }
        }
        let semi_major = initial.axes.major();

        let mut alternate: Option<&Detection> = None;
        for candidate in &self.candidates {
            if candidate.confidence.value == 0.0 {
                continue;
            }
            if candidate.confidence.outline_contrast < ALTERNATE_CONTRAST_GATE {
                continue;
            }
            if std::ptr::eq(candidate, initial) {
                continue;
            }
            if candidate.axes.major() > ALTERNATE_SIZE_RATIO * semi_major {
                continue;
            }
            if initial.center.distance(candidate.center) > semi_major {
                continue;
            }
            if let Some(current) = alternate {
                if candidate.confidence.value <= current.confidence.value {
                    continue;
                }
            }
            alternate = Some(candidate);
        }

        *alternate.unwrap_or(initial)
    }

    /// Map the result (and the debug overlay) back to input-image
    /// coordinates when a downscale was applied.
    #[allow(clippy::float_cmp)] // 0.0 is the exact "no scaling" sentinel
    fn postprocess(&self, result: &mut Detection, input: &GrayImage, view: Option<DebugView<'_>>) {
        if self.scaling_factor != 0.0 {
            let inverse = 1.0 / self.scaling_factor;
            result.center.x *= inverse;
            result.center.y *= inverse;
            result.axes.width *= inverse;
            result.axes.height *= inverse;
        }
        if let Some(view) = view {
            view.finish(input.dimensions());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Axes, Confidence, Point};

    fn candidate(value: f64, contrast: f64, major: f64, cx: f64) -> Detection {
        Detection {
            center: Point::new(cx, 50.0),
            axes: Axes {
                width: major,
                height: major * 0.9,
            },
            angle: 0.0,
            confidence: Confidence {
                value,
                aspect_ratio: 0.9,
                angular_spread: 0.9,
                outline_contrast: contrast,
            },
        }
    }

    fn detector_with_candidates(candidates: Vec<Detection>) -> Detector {
        let mut detector = Detector::new();
        detector.candidates = candidates;
        detector
    }

    #[test]
    fn no_candidates_yields_zero_detection() {
        let detector = detector_with_candidates(Vec::new());
        let result = detector.select_final_segment();
        assert!(result.confidence.value.abs() < f64::EPSILON);
    }

    #[test]
    fn best_candidate_wins_without_qualifying_alternates() {
        let detector = detector_with_candidates(vec![
            candidate(0.5, 0.9, 30.0, 50.0),
            candidate(0.9, 0.9, 28.0, 50.0),
        ]);
        // The runner-up is not smaller than 0.8x the best, so the best
        // stays.
        let result = detector.select_final_segment();
        assert!((result.confidence.value - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn smaller_high_contrast_alternate_replaces_best() {
        let detector = detector_with_candidates(vec![
            candidate(0.9, 0.9, 30.0, 50.0),
            candidate(0.6, 0.9, 20.0, 55.0),
        ]);
        let result = detector.select_final_segment();
        assert!((result.confidence.value - 0.6).abs() < f64::EPSILON);
        assert!((result.axes.major() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn low_contrast_alternate_is_ignored() {
        let detector = detector_with_candidates(vec![
            candidate(0.9, 0.9, 30.0, 50.0),
            candidate(0.6, 0.5, 20.0, 55.0),
        ]);
        let result = detector.select_final_segment();
        assert!((result.confidence.value - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn distant_alternate_is_ignored() {
        let detector = detector_with_candidates(vec![
            candidate(0.9, 0.9, 30.0, 50.0),
            // Center 40px away exceeds the semi-major (30).
            candidate(0.6, 0.9, 20.0, 90.0),
        ]);
        let result = detector.select_final_segment();
        assert!((result.confidence.value - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn highest_qualifying_alternate_wins() {
        let detector = detector_with_candidates(vec![
            candidate(0.9, 0.9, 30.0, 50.0),
            candidate(0.5, 0.9, 20.0, 55.0),
            candidate(0.7, 0.9, 21.0, 52.0),
            candidate(0.6, 0.9, 19.0, 48.0),
        ]);
        let result = detector.select_final_segment();
        assert!((result.confidence.value - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_confidence_candidates_never_win() {
        let detector = detector_with_candidates(vec![
            candidate(0.0, 0.9, 30.0, 50.0),
            candidate(0.0, 0.9, 20.0, 55.0),
        ]);
        let result = detector.select_final_segment();
        assert!(result.confidence.value.abs() < f64::EPSILON);
    }

    #[test]
    fn tied_maxima_resolve_to_the_earliest() {
        let a = candidate(0.8, 0.4, 30.0, 40.0);
        let b = candidate(0.8, 0.4, 28.0, 60.0);
        let detector = detector_with_candidates(vec![a, b]);
        let result = detector.select_final_segment();
        assert!((result.center.x - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn undersized_input_reports_no_pupil() {
        let mut detector = Detector::new();
        let result = detector.detect(&GrayImage::new(5, 5));
        assert!(result.confidence.value.abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_explicit_bounds_report_no_pupil() {
        let mut detector = Detector::with_params(Parameters {
            auto_pupil_diameter: false,
            min_pupil_diameter: 60.0,
            max_pupil_diameter: 20.0,
        });
        let img = GrayImage::from_pixel(64, 64, image::Luma([128]));
        let result = detector.detect(&img);
        assert!(result.confidence.value.abs() < f64::EPSILON);
    }

    #[test]
    fn detector_can_be_reused_across_dimensions() {
        let mut detector = Detector::new();
        let small = GrayImage::from_pixel(64, 48, image::Luma([10]));
        let large = GrayImage::from_pixel(320, 240, image::Luma([10]));
        let first = detector.detect(&small);
        let second = detector.detect(&large);
        let third = detector.detect(&small);
        assert_eq!(first, third);
        assert!(second.confidence.value.abs() < f64::EPSILON);
    }
}
