//! Diagnostic overlay rendering.
//!
//! When the caller asks for it, the detector paints its intermediate
//! state onto a color canvas at working resolution: the dimmed
//! preprocessed frame, the edge map, candidate ellipses color-coded by
//! confidence, the pupil-size bounds, a confidence bar, and the
//! selected result. The canvas is scaled back up to input resolution at
//! the end, so overlay coordinates always match the caller's image.
//!
//! Everything here lives behind an `Option` in the detector; the plain
//! detection path never touches this module.

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};

use crate::contour::Segment;
use crate::ellipse::FittedEllipse;
use crate::types::{Axes, Detection, Point};

const BOUNDS_COLOR: Rgb<u8> = Rgb([0, 150, 255]);

/// Height of the confidence bar at the bottom edge, in pixels.
const BAR_HEIGHT: f32 = 20.0;

/// In-progress overlay for one detection call.
pub(crate) struct DebugView<'a> {
    canvas: RgbImage,
    out: &'a mut RgbImage,
}

impl<'a> DebugView<'a> {
    /// Start an overlay from the preprocessed frame, dimmed to 40% so
    /// the drawings on top stay legible.
    pub(crate) fn new(working: &GrayImage, out: &'a mut RgbImage) -> Self {
        let canvas = RgbImage::from_fn(working.width(), working.height(), |x, y| {
            let v = u16::from(working.get_pixel(x, y).0[0]);
            #[allow(clippy::cast_possible_truncation)]
            let dimmed = (v * 2 / 5) as u8;
            Rgb([dimmed, dimmed, dimmed])
        });
        Self { canvas, out }
    }

    /// Blend the edge map in at half intensity (channel-wise maximum).
    pub(crate) fn blend_edges(&mut self, edges: &GrayImage) {
        for (canvas_px, edge_px) in self.canvas.pixels_mut().zip(edges.pixels()) {
            let edge = edge_px.0[0] / 2;
            for channel in &mut canvas_px.0 {
                *channel = (*channel).max(edge);
            }
        }
    }

    /// Draw every surviving candidate: its segment polyline and fitted
    /// ellipse, colored from red (confidence 0) to green (confidence 1).
    #[allow(clippy::float_cmp)] // 0.0 is the exact invalid-candidate sentinel
    pub(crate) fn draw_candidates(&mut self, segments: &[Segment], candidates: &[Detection]) {
        for (segment, result) in segments.iter().zip(candidates) {
            let c = result.confidence.value;
            if c == 0.0 {
                continue;
            }
            let color = confidence_color(c);
            self.draw_polyline(segment, color);
            self.draw_ellipse(result.center, result.axes, result.angle, color);
        }
    }

    /// Mark the accepted pupil-diameter band as two circles around the
    /// frame center.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub(crate) fn draw_diameter_bounds(&mut self, min_diameter: f64, max_diameter: f64) {
        let center = (
            (self.canvas.width() / 2) as i32,
            (self.canvas.height() / 2) as i32,
        );
        draw_hollow_circle_mut(
            &mut self.canvas,
            center,
            (min_diameter / 2.0).round() as i32,
            BOUNDS_COLOR,
        );
        draw_hollow_circle_mut(
            &mut self.canvas,
            center,
            (max_diameter / 2.0).round() as i32,
            BOUNDS_COLOR,
        );
    }

    /// Draw the selected result and the bottom-edge confidence bar.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub(crate) fn draw_result(&mut self, result: &Detection) {
        let c = result.confidence.value;
        let color = confidence_color(c);

        let (w, h) = (self.canvas.width() as f32, self.canvas.height() as f32);
        let x = (c as f32) * w;
        for offset in [0.0_f32, 1.0] {
            draw_line_segment_mut(
                &mut self.canvas,
                (x + offset, h - 1.0),
                (x + offset, h - BAR_HEIGHT),
                color,
            );
        }

        if c > 0.0 {
            self.draw_ellipse(result.center, result.axes, result.angle, color);
        }
    }

    /// Scale the finished overlay to the caller's resolution and hand
    /// it over.
    pub(crate) fn finish(self, input_dimensions: (u32, u32)) {
        let (w, h) = input_dimensions;
        if self.canvas.dimensions() == (w, h) {
            *self.out = self.canvas;
        } else {
            *self.out = imageops::resize(&self.canvas, w, h, FilterType::CatmullRom);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn draw_polyline(&mut self, segment: &Segment, color: Rgb<u8>) {
        for pair in segment.windows(2) {
            draw_line_segment_mut(
                &mut self.canvas,
                (pair[0].x as f32, pair[0].y as f32),
                (pair[1].x as f32, pair[1].y as f32),
                color,
            );
        }
    }

    /// Approximate the oriented ellipse outline with line segments.
    #[allow(clippy::cast_possible_truncation)]
    fn draw_ellipse(&mut self, center: Point, axes: Axes, angle: f64, color: Rgb<u8>) {
        const STEPS: usize = 64;
        let outline = FittedEllipse {
            center,
            axes,
            angle,
        };
        let mut previous = outline.outline_point(0.0);
        for i in 1..=STEPS {
            #[allow(clippy::cast_precision_loss)]
            let theta = 2.0 * std::f64::consts::PI * (i as f64) / (STEPS as f64);
            let next = outline.outline_point(theta);
            draw_line_segment_mut(
                &mut self.canvas,
                (previous.x as f32, previous.y as f32),
                (next.x as f32, next.y as f32),
                color,
            );
            previous = next;
        }
    }
}

/// Red at confidence 0, green at 1, yellow in between.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn confidence_color(confidence: f64) -> Rgb<u8> {
    let green = (255.0 * (2.0 * confidence).min(1.0)) as u8;
    let red = (255.0 * (2.0 * (1.0 - confidence)).min(1.0)) as u8;
    Rgb([red, green, 0])
}
