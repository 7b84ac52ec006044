//! MATLAB-style Canny edge detection.
//!
//! Stock Canny implementations (OpenCV-style 3×3 Sobel with fixed
//! thresholds) perform noticeably worse on pupil imagery than MATLAB's
//! `edge(I, 'canny')`. This module follows the MATLAB recipe instead:
//! a 5×5 Gaussian (σ=2) with replicated borders, aperture-7 Sobel
//! gradients, non-maximum suppression with asymmetric tie-breaking, and
//! hysteresis limits derived from a 64-bin magnitude histogram rather
//! than fixed values.
//!
//! The stage owns all of its intermediate buffers so repeated calls on
//! same-sized frames allocate nothing.

use std::collections::VecDeque;

use image::{GrayImage, ImageBuffer, Luma};

/// Single-channel float image used for gradient fields.
pub(crate) type GradientImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Pixel marked as definitely not an edge.
pub(crate) const NO_EDGE: u8 = 0;
/// Pixel between the hysteresis limits, connectable to an edge.
pub(crate) const POTENTIAL_EDGE: u8 = 127;
/// Pixel marked as an edge.
pub(crate) const EDGE: u8 = 255;

const N_BINS: usize = 64;
/// Fraction of pixels that must fall below the lower hysteresis limit.
const T1_PERCENTILE: f64 = 0.28;
/// Fraction of pixels that must fall below the upper hysteresis limit.
const T2_PERCENTILE: f64 = 0.70;

/// Binomial smoothing kernel for the aperture-7 Sobel operator.
const SMOOTH_7: [f32; 7] = [1.0, 6.0, 15.0, 20.0, 15.0, 6.0, 1.0];
/// First-derivative kernel for the aperture-7 Sobel operator.
const DERIV_7: [f32; 7] = [-1.0, -4.0, -5.0, 0.0, 5.0, 4.0, 1.0];

/// Canny edge extraction with owned scratch buffers.
pub(crate) struct CannyStage {
    smooth: GrayImage,
    tmp: Vec<f32>,
    dx: GradientImage,
    dy: GradientImage,
    magnitude: GradientImage,
    bins: GrayImage,
    queue: VecDeque<(usize, usize)>,
}

impl CannyStage {
    pub(crate) fn new() -> Self {
        Self {
            smooth: GrayImage::new(0, 0),
            tmp: Vec::new(),
            dx: GradientImage::new(0, 0),
            dy: GradientImage::new(0, 0),
            magnitude: GradientImage::new(0, 0),
            bins: GrayImage::new(0, 0),
            queue: VecDeque::new(),
        }
    }

    /// Run the full detector on `src`, writing a binary edge map (values
    /// 0 and 255 only) into `edges`.
    ///
    /// Images without an interior (smaller than 3×3) produce an empty
    /// edge map.
    pub(crate) fn run(&mut self, src: &GrayImage, edges: &mut GrayImage) {
        let (width, height) = src.dimensions();
        crate::preprocess::ensure_dimensions(edges, width, height);
        if width < 3 || height < 3 {
            let out: &mut [u8] = edges;
            out.fill(NO_EDGE);
            return;
        }
        self.ensure_dimensions(width, height);
        let (w, h) = (width as usize, height as usize);

        self.blur(src, w, h);
        self.gradients(w, h);
        self.suppress_non_maxima(edges, w, h);
        let (thresh_1, thresh_2) = self.histogram_thresholds(w * h);
        self.connect_hysteresis(edges, thresh_1, thresh_2, w, h);
    }

    fn ensure_dimensions(&mut self, width: u32, height: u32) {
        if self.smooth.dimensions() != (width, height) {
            self.smooth = GrayImage::new(width, height);
            self.dx = GradientImage::new(width, height);
            self.dy = GradientImage::new(width, height);
            self.magnitude = GradientImage::new(width, height);
            self.bins = GrayImage::new(width, height);
            self.tmp = vec![0.0; (width * height) as usize];
        }
    }

    /// 5×5 Gaussian smoothing (σ=2), replicated borders.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn blur(&mut self, src: &GrayImage, w: usize, h: usize) {
        let kernel = gaussian_kernel_5();
        horizontal_pass(src.as_raw(), w, h, &kernel, &mut self.tmp);

        let dst: &mut [u8] = &mut self.smooth;
        for y in 0..h {
            let row = y * w;
            for x in 0..w {
                let mut sum = 0.0_f32;
                for (i, &k) in kernel.iter().enumerate() {
                    let sy = clamp_index(y as isize + i as isize - 2, h);
                    sum += k * self.tmp[sy * w + x];
                }
                dst[row + x] = sum.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    /// Aperture-7 Sobel gradients and their magnitude.
    fn gradients(&mut self, w: usize, h: usize) {
        horizontal_pass(self.smooth.as_raw(), w, h, &DERIV_7, &mut self.tmp);
        vertical_pass(&self.tmp, w, h, &SMOOTH_7, &mut self.dx);

        horizontal_pass(self.smooth.as_raw(), w, h, &SMOOTH_7, &mut self.tmp);
        vertical_pass(&self.tmp, w, h, &DERIV_7, &mut self.dy);

        let mag: &mut [f32] = &mut self.magnitude;
        for ((m, &gx), &gy) in mag.iter_mut().zip(self.dx.as_raw()).zip(self.dy.as_raw()) {
            *m = gx.mul_add(gx, gy * gy).sqrt();
        }
    }

    /// Keep only pixels whose magnitude is maximal along the gradient
    /// direction.
    ///
    /// The comparison is strict against the "before" neighbor and
    /// non-strict against the "after" neighbor, which breaks ridges of
    /// equal magnitude deterministically instead of keeping both sides.
    fn suppress_non_maxima(&self, edges: &mut GrayImage, w: usize, h: usize) {
        // tan(PI/8) and tan(3*PI/8)
        const TAN_PI_8: f32 = 0.414_213_56;
        const TAN_3PI_8: f32 = 2.414_213_6;

        let out: &mut [u8] = edges;
        out.fill(POTENTIAL_EDGE);

        let mag: &[f32] = self.magnitude.as_raw();
        let dx: &[f32] = self.dx.as_raw();
        let dy: &[f32] = self.dy.as_raw();

        for r in 1..h - 1 {
            let row = r * w;
            let above = row - w;
            let below = row + w;
            for c in 1..w - 1 {
                let m = mag[row + c];
                let gx = dx[row + c];
                let gy = dy[row + c];

                // Absolute values fold everything into the first
                // quadrant: angle < PI/8 is horizontal, angle > 3*PI/8
                // vertical, anything between diagonal.
                let tan_angle = gy.abs() / gx.abs();

                let is_max = if tan_angle < TAN_PI_8 {
                    mag[row + c - 1] < m && mag[row + c + 1] <= m
                } else if tan_angle > TAN_3PI_8 {
                    mag[above + c] < m && mag[below + c] <= m
                } else if gx.is_sign_negative() == gy.is_sign_negative() {
                    // Diagonal (\). Image coordinates, not cartesian:
                    // both gradients positive points bottom-right.
                    mag[above + c - 1] < m && mag[below + c + 1] <= m
                } else {
                    // Diagonal (/).
                    mag[above + c + 1] < m && mag[below + c - 1] <= m
                };

                if !is_max {
                    out[row + c] = NO_EDGE;
                }
            }
        }
    }

    /// Derive the hysteresis limits from a 64-bin magnitude histogram.
    ///
    /// The lower limit is the first bin where the cumulative count
    /// reaches 28% of all pixels, the upper limit where it reaches 70%.
    /// A single sequential scan sets both; the scan stops at the second
    /// crossing.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn histogram_thresholds(&mut self, n_pixels: usize) -> (u8, u8) {
        let mag: &[f32] = self.magnitude.as_raw();
        let max_mag = mag.iter().fold(0.0_f32, |acc, &v| acc.max(v));
        let rescale = if max_mag > 0.0 {
            (N_BINS - 1) as f64 / f64::from(max_mag)
        } else {
            0.0
        };

        let bin_data: &mut [u8] = &mut self.bins;
        let mut histogram = [0_u32; N_BINS];
        for (bin, &m) in bin_data.iter_mut().zip(mag) {
            let b = (f64::from(m) * rescale).round().min((N_BINS - 1) as f64) as u8;
            *bin = b;
            histogram[b as usize] += 1;
        }

        let t1_lower_bound = (T1_PERCENTILE * n_pixels as f64).ceil() as u32;
        let t2_lower_bound = (T2_PERCENTILE * n_pixels as f64).ceil() as u32;
        let mut thresh_1 = 0_u8;
        let mut thresh_2 = 0_u8;
        let mut sum = 0_u32;
        for (i, &count) in histogram.iter().enumerate() {
            sum += count;
            if sum >= t1_lower_bound && thresh_1 == 0 {
                thresh_1 = i as u8;
            }
            if sum >= t2_lower_bound {
                thresh_2 = i as u8;
                break;
            }
        }
        (thresh_1, thresh_2)
    }

    /// Hysteresis: promote strong pixels to edges and region-grow into
    /// connectable neighbors via a FIFO queue, then drop every potential
    /// pixel that was never reached.
    fn connect_hysteresis(
        &mut self,
        edges: &mut GrayImage,
        thresh_1: u8,
        thresh_2: u8,
        w: usize,
        h: usize,
    ) {
        let bins: &[u8] = &self.bins;
        let out: &mut [u8] = edges;
        self.queue.clear();

        for r in 1..h - 1 {
            let row = r * w;
            for c in 1..w - 1 {
                let i = row + c;
                if out[i] != POTENTIAL_EDGE {
                    // Already resolved by suppression or an earlier grow.
                    continue;
                }
                if bins[i] < thresh_1 {
                    out[i] = NO_EDGE;
                    continue;
                }
                if bins[i] < thresh_2 {
                    // Leave as potential; a later grow may still claim it.
                    continue;
                }

                out[i] = EDGE;
                self.queue.push_back((r, c));
                while let Some((qr, qc)) = self.queue.pop_front() {
                    if qr < 1 || qr > h - 2 || qc < 1 || qc > w - 2 {
                        continue;
                    }
                    for nr in (qr - 1)..=(qr + 1) {
                        for nc in (qc - 1)..=(qc + 1) {
                            let n = nr * w + nc;
                            if out[n] != POTENTIAL_EDGE {
                                continue;
                            }
                            out[n] = EDGE;
                            self.queue.push_back((nr, nc));
                        }
                    }
                }
            }
        }

        // Unclaimed potential pixels are not edges.
        for v in out.iter_mut() {
            *v = if *v > POTENTIAL_EDGE { EDGE } else { NO_EDGE };
        }
    }
}

/// Normalized 5-tap Gaussian kernel with σ=2.
fn gaussian_kernel_5() -> [f32; 5] {
    let sigma = 2.0_f32;
    let mut kernel = [0.0_f32; 5];
    let mut sum = 0.0_f32;
    for (i, k) in kernel.iter_mut().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let d = i as f32 - 2.0;
        *k = (-d * d / (2.0 * sigma * sigma)).exp();
        sum += *k;
    }
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Convolve rows of `src` with `kernel`, replicating border pixels.
fn horizontal_pass<const K: usize>(
    src: &[u8],
    w: usize,
    h: usize,
    kernel: &[f32; K],
    dst: &mut [f32],
) {
    let radius = (K / 2) as isize;
    for y in 0..h {
        let row = y * w;
        for x in 0..w {
            let mut sum = 0.0_f32;
            for (i, &k) in kernel.iter().enumerate() {
                #[allow(clippy::cast_possible_wrap)]
                let sx = clamp_index(x as isize + i as isize - radius, w);
                sum += k * f32::from(src[row + sx]);
            }
            dst[row + x] = sum;
        }
    }
}

/// Convolve columns of `src` with `kernel`, replicating border pixels.
fn vertical_pass<const K: usize>(
    src: &[f32],
    w: usize,
    h: usize,
    kernel: &[f32; K],
    dst: &mut GradientImage,
) {
    let radius = (K / 2) as isize;
    let out: &mut [f32] = dst;
    for y in 0..h {
        let row = y * w;
        for x in 0..w {
            let mut sum = 0.0_f32;
            for (i, &k) in kernel.iter().enumerate() {
                #[allow(clippy::cast_possible_wrap)]
                let sy = clamp_index(y as isize + i as isize - radius, h);
                sum += k * src[sy * w + x];
            }
            out[row + x] = sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random gray image (LCG).
    fn noise_image(w: u32, h: u32, seed: u64) -> GrayImage {
        let mut state = seed;
        GrayImage::from_fn(w, h, |_, _| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            image::Luma([(state >> 56) as u8])
        })
    }

    fn filled_disc(w: u32, h: u32, cx: f32, cy: f32, radius: f32, fg: u8, bg: u8) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            if (dx * dx + dy * dy).sqrt() <= radius {
                image::Luma([fg])
            } else {
                image::Luma([bg])
            }
        })
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel_5();
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!((k[0] - k[4]).abs() < 1e-7);
        assert!((k[1] - k[3]).abs() < 1e-7);
        assert!(k[2] > k[1] && k[1] > k[0]);
    }

    #[test]
    fn uniform_image_has_no_edges() {
        let img = GrayImage::from_pixel(32, 32, image::Luma([128]));
        let mut edges = GrayImage::new(0, 0);
        CannyStage::new().run(&img, &mut edges);
        assert!(edges.pixels().all(|p| p.0[0] == NO_EDGE));
    }

    #[test]
    fn output_is_strictly_binary() {
        let img = noise_image(48, 40, 7);
        let mut edges = GrayImage::new(0, 0);
        CannyStage::new().run(&img, &mut edges);
        assert!(
            edges
                .pixels()
                .all(|p| p.0[0] == NO_EDGE || p.0[0] == EDGE)
        );
    }

    #[test]
    fn detection_is_deterministic() {
        let img = noise_image(64, 64, 42);
        let mut first = GrayImage::new(0, 0);
        let mut second = GrayImage::new(0, 0);

        let mut stage = CannyStage::new();
        stage.run(&img, &mut first);
        // Same stage again: scratch reuse must not leak state.
        stage.run(&img, &mut second);
        assert_eq!(first, second);

        // And a fresh stage agrees too.
        CannyStage::new().run(&img, &mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn disc_rim_produces_an_edge_ring() {
        let img = filled_disc(96, 96, 48.0, 48.0, 25.0, 0, 255);
        let mut edges = GrayImage::new(0, 0);
        CannyStage::new().run(&img, &mut edges);

        // Edge pixels exist and concentrate near the rim radius.
        let mut count = 0_u32;
        for (x, y, p) in edges.enumerate_pixels() {
            if p.0[0] == EDGE {
                count += 1;
                let r = (x as f32 - 48.0).hypot(y as f32 - 48.0);
                // Faint survivors can sit anywhere within the combined
                // blur + Sobel support of the rim (radius 5), but no
                // further.
                assert!(
                    (r - 25.0).abs() < 8.0,
                    "edge pixel at ({x},{y}) is {r:.1}px from center, expected ~25",
                );
            }
        }
        assert!(count > 60, "expected a substantial rim ring, got {count}");
    }

    #[test]
    fn tiny_image_yields_empty_map() {
        let img = noise_image(2, 2, 3);
        let mut edges = GrayImage::new(0, 0);
        CannyStage::new().run(&img, &mut edges);
        assert_eq!(edges.dimensions(), (2, 2));
        assert!(edges.pixels().all(|p| p.0[0] == NO_EDGE));
    }

    #[test]
    fn changing_dimensions_between_calls_is_safe() {
        let mut stage = CannyStage::new();
        let mut edges = GrayImage::new(0, 0);
        stage.run(&noise_image(40, 30, 1), &mut edges);
        assert_eq!(edges.dimensions(), (40, 30));
        stage.run(&noise_image(64, 64, 2), &mut edges);
        assert_eq!(edges.dimensions(), (64, 64));
    }
}
