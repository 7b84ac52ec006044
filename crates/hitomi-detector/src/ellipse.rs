//! Direct least-squares ellipse fitting.
//!
//! Implements the numerically stable formulation of Fitzgibbon's direct
//! least-squares method (Halir & Flusser, 1998): the design matrix is
//! split into quadratic and linear halves, the ellipse constraint
//! `4ac - b² = 1` is folded into a reduced 3×3 eigenproblem, and the
//! eigenvector satisfying the constraint yields the conic coefficients.
//! Unlike the generic conic fit this can only ever return an ellipse,
//! which is exactly what the pupil pipeline needs.
//!
//! Degenerate inputs (fewer than five points, collinear points, numeric
//! collapse) produce `None`; callers discard the candidate.

use imageproc::point::Point as PixelPoint;

use crate::types::{Axes, Point};

/// An ellipse in center / semi-axes / rotation form.
///
/// `axes.width` is the semi-axis along `angle` (degrees, in `[0, 180)`),
/// `axes.height` the perpendicular one. Neither is guaranteed to be the
/// major axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FittedEllipse {
    pub center: Point,
    pub axes: Axes,
    pub angle: f64,
}

impl FittedEllipse {
    /// Point on the outline at parametric angle `theta` (radians),
    /// using the oriented parametric form.
    pub(crate) fn outline_point(&self, theta: f64) -> Point {
        let (x, y) = (self.axes.width * theta.cos(), self.axes.height * theta.sin());
        let (sin_a, cos_a) = self.angle.to_radians().sin_cos();
        Point::new(
            x.mul_add(cos_a, -y * sin_a) + self.center.x,
            y.mul_add(cos_a, x * sin_a) + self.center.y,
        )
    }
}

/// Fit an ellipse to integer pixel coordinates.
///
/// Returns `None` when no real ellipse describes the points.
#[allow(clippy::cast_precision_loss, clippy::needless_range_loop)]
pub(crate) fn fit(points: &[PixelPoint<i32>]) -> Option<FittedEllipse> {
    if points.len() < 5 {
        return None;
    }

    // Center the data on its centroid for conditioning.
    let n = points.len() as f64;
    let mx = points.iter().map(|p| f64::from(p.x)).sum::<f64>() / n;
    let my = points.iter().map(|p| f64::from(p.y)).sum::<f64>() / n;

    // Scatter matrices of the split design matrix:
    //   D1 = [x², xy, y²], D2 = [x, y, 1]
    //   S1 = D1'D1, S2 = D1'D2, S3 = D2'D2
    let mut s1 = [[0.0_f64; 3]; 3];
    let mut s2 = [[0.0_f64; 3]; 3];
    let mut s3 = [[0.0_f64; 3]; 3];
    for p in points {
        let x = f64::from(p.x) - mx;
        let y = f64::from(p.y) - my;
        let d1 = [x * x, x * y, y * y];
        let d2 = [x, y, 1.0];
        for r in 0..3 {
            for c in 0..3 {
                s1[r][c] += d1[r] * d1[c];
                s2[r][c] += d1[r] * d2[c];
                s3[r][c] += d2[r] * d2[c];
            }
        }
    }

    // T = -S3⁻¹ S2'  and the reduced scatter M = C1⁻¹ (S1 + S2 T).
    let s3_inv = invert_3x3(&s3)?;
    let mut t = [[0.0_f64; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            let mut sum = 0.0;
            for k in 0..3 {
                sum += s3_inv[r][k] * s2[c][k];
            }
            t[r][c] = -sum;
        }
    }
    let mut m = [[0.0_f64; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            let mut sum = s1[r][c];
            for k in 0..3 {
                sum += s2[r][k] * t[k][c];
            }
            m[r][c] = sum;
        }
    }
    // Premultiplying by C1⁻¹ permutes and scales the rows.
    let reduced = [
        [m[2][0] / 2.0, m[2][1] / 2.0, m[2][2] / 2.0],
        [-m[1][0], -m[1][1], -m[1][2]],
        [m[0][0] / 2.0, m[0][1] / 2.0, m[0][2] / 2.0],
    ];

    // The quadratic half of the conic is the eigenvector of `reduced`
    // satisfying the ellipse constraint 4ac - b² > 0.
    let quad = eigenvalues_3x3(&reduced)
        .into_iter()
        .filter_map(|lambda| eigenvector_3x3(&reduced, lambda))
        .find(|v| 4.0 * v[0] * v[2] - v[1] * v[1] > 0.0)?;

    // Linear half follows from the substitution that eliminated it.
    let mut lin = [0.0_f64; 3];
    for r in 0..3 {
        for k in 0..3 {
            lin[r] += t[r][k] * quad[k];
        }
    }

    conic_to_parametric(
        quad[0], quad[1], quad[2], lin[0], lin[1], lin[2], mx, my,
    )
}

/// Convert conic coefficients (in centroid-relative coordinates) into
/// center / semi-axes / rotation, shifting back by the centroid.
#[allow(clippy::similar_names, clippy::many_single_char_names)]
fn conic_to_parametric(
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
    mx: f64,
    my: f64,
) -> Option<FittedEllipse> {
    let den = 4.0_f64.mul_add(a * c, -(b * b));
    if den <= f64::EPSILON {
        return None;
    }

    // Center: stationary point of the quadratic form.
    let cx = b.mul_add(e, -2.0 * c * d) / den;
    let cy = b.mul_add(d, -2.0 * a * e) / den;

    // Constant term after recentering on (cx, cy).
    let f0 = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;

    // Rotation that removes the cross term.
    let theta = 0.5 * b.atan2(a - c);
    let (sin_t, cos_t) = theta.sin_cos();
    let a_rot = a * cos_t * cos_t + b * cos_t * sin_t + c * sin_t * sin_t;
    let c_rot = a * sin_t * sin_t - b * cos_t * sin_t + c * cos_t * cos_t;

    let width_sq = -f0 / a_rot;
    let height_sq = -f0 / c_rot;
    if !(width_sq.is_finite() && height_sq.is_finite()) || width_sq <= 0.0 || height_sq <= 0.0 {
        return None;
    }

    let mut angle = theta.to_degrees();
    if angle < 0.0 {
        angle += 180.0;
    }

    Some(FittedEllipse {
        center: Point::new(cx + mx, cy + my),
        axes: Axes {
            width: width_sq.sqrt(),
            height: height_sq.sqrt(),
        },
        angle,
    })
}

fn invert_3x3(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let mut inv = [[0.0_f64; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            // Adjugate: cofactor of (c, r).
            let (r1, r2) = ((c + 1) % 3, (c + 2) % 3);
            let (c1, c2) = ((r + 1) % 3, (r + 2) % 3);
            inv[r][c] = (m[r1][c1] * m[r2][c2] - m[r1][c2] * m[r2][c1]) * inv_det;
        }
    }
    Some(inv)
}

/// Real eigenvalues of a 3×3 matrix, via the characteristic cubic.
fn eigenvalues_3x3(m: &[[f64; 3]; 3]) -> Vec<f64> {
    // λ³ - tr·λ² + m2·λ - det = 0
    let tr = m[0][0] + m[1][1] + m[2][2];
    let m2 = m[0][0] * m[1][1] - m[0][1] * m[1][0] + m[0][0] * m[2][2] - m[0][2] * m[2][0]
        + m[1][1] * m[2][2]
        - m[1][2] * m[2][1];
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    cubic_roots(tr, m2, det)
}

/// Real roots of `λ³ - a·λ² + b·λ - c = 0`.
fn cubic_roots(a: f64, b: f64, c: f64) -> Vec<f64> {
    // Depressed form u³ + pu - q = 0 with λ = u + a/3.
    let shift = a / 3.0;
    let p = b - a * a / 3.0;
    let q = 2.0 * a * a * a / 27.0 - a * b / 3.0 + c;

    let discriminant = (q / 2.0) * (q / 2.0) + (p / 3.0) * (p / 3.0) * (p / 3.0);
    if discriminant > 0.0 {
        // One real root.
        let s = discriminant.sqrt();
        let u = (q / 2.0 + s).cbrt() + (q / 2.0 - s).cbrt();
        vec![u + shift]
    } else if p.abs() < 1e-12 {
        // Triple root.
        vec![shift]
    } else {
        // Three real roots (trigonometric method).
        let r = (-p / 3.0).sqrt();
        let phi = (q / (2.0 * r * r * r)).clamp(-1.0, 1.0).acos() / 3.0;
        (0..3)
            .map(|k| {
                2.0 * r * (phi - 2.0 * std::f64::consts::PI * f64::from(k) / 3.0).cos() + shift
            })
            .collect()
    }
}

/// Eigenvector of `m` for eigenvalue `lambda`, from the null space of
/// `m - λI` (cross products of its rows).
fn eigenvector_3x3(m: &[[f64; 3]; 3], lambda: f64) -> Option<[f64; 3]> {
    let a = [
        [m[0][0] - lambda, m[0][1], m[0][2]],
        [m[1][0], m[1][1] - lambda, m[1][2]],
        [m[2][0], m[2][1], m[2][2] - lambda],
    ];
    let candidates = [
        cross(&a[0], &a[1]),
        cross(&a[0], &a[2]),
        cross(&a[1], &a[2]),
    ];
    let best = candidates
        .into_iter()
        .max_by(|u, v| norm_sq(u).total_cmp(&norm_sq(v)))?;
    let norm = norm_sq(&best).sqrt();
    if norm < 1e-12 {
        return None;
    }
    Some([best[0] / norm, best[1] / norm, best[2] / norm])
}

fn cross(u: &[f64; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}

fn norm_sq(v: &[f64; 3]) -> f64 {
    v[2].mul_add(v[2], v[0].mul_add(v[0], v[1] * v[1]))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[allow(clippy::cast_possible_truncation)]
    fn sampled_ellipse(
        cx: f64,
        cy: f64,
        width: f64,
        height: f64,
        angle_deg: f64,
        samples: usize,
    ) -> Vec<PixelPoint<i32>> {
        let reference = FittedEllipse {
            center: Point::new(cx, cy),
            axes: Axes { width, height },
            angle: angle_deg,
        };
        (0..samples)
            .map(|i| {
                let theta = 2.0 * std::f64::consts::PI * (i as f64) / (samples as f64);
                let p = reference.outline_point(theta);
                PixelPoint::new(p.x.round() as i32, p.y.round() as i32)
            })
            .collect()
    }

    #[test]
    fn too_few_points_fail() {
        let pts = sampled_ellipse(50.0, 50.0, 20.0, 10.0, 0.0, 4);
        assert!(fit(&pts).is_none());
    }

    #[test]
    fn collinear_points_fail() {
        let pts: Vec<PixelPoint<i32>> = (0..10).map(|i| PixelPoint::new(i, 2 * i)).collect();
        assert!(fit(&pts).is_none());
    }

    #[test]
    fn circle_is_recovered() {
        let pts = sampled_ellipse(60.0, 45.0, 25.0, 25.0, 0.0, 48);
        let e = fit(&pts).expect("circle must fit");
        assert!((e.center.x - 60.0).abs() < 0.5, "cx = {}", e.center.x);
        assert!((e.center.y - 45.0).abs() < 0.5, "cy = {}", e.center.y);
        assert!((e.axes.width - 25.0).abs() < 0.5);
        assert!((e.axes.height - 25.0).abs() < 0.5);
    }

    #[test]
    fn rotated_ellipse_is_recovered() {
        let pts = sampled_ellipse(100.0, 80.0, 40.0, 22.0, 30.0, 64);
        let e = fit(&pts).expect("ellipse must fit");
        assert!((e.center.x - 100.0).abs() < 0.5);
        assert!((e.center.y - 80.0).abs() < 0.5);
        // Width/height may swap with a 90° angle shift; compare sorted.
        assert!((e.axes.major() - 40.0).abs() < 0.7, "major = {}", e.axes.major());
        assert!((e.axes.minor() - 22.0).abs() < 0.7, "minor = {}", e.axes.minor());
        let angle_along_major = if e.axes.width >= e.axes.height {
            e.angle
        } else {
            (e.angle + 90.0) % 180.0
        };
        assert!(
            (angle_along_major - 30.0).abs() < 3.0,
            "angle = {angle_along_major}",
        );
    }

    #[test]
    fn axis_aligned_ellipse_axes_match_convention() {
        let pts = sampled_ellipse(64.0, 64.0, 30.0, 12.0, 0.0, 64);
        let e = fit(&pts).expect("ellipse must fit");
        let along_angle = if (e.angle - 90.0).abs() < 45.0 {
            e.axes.height
        } else {
            e.axes.width
        };
        // The semi-axis aligned with angle 0 must be the long one.
        assert!((along_angle - 30.0).abs() < 0.7);
    }

    #[test]
    fn outline_point_lies_on_the_ellipse() {
        let e = FittedEllipse {
            center: Point::new(10.0, 20.0),
            axes: Axes {
                width: 8.0,
                height: 4.0,
            },
            angle: 45.0,
        };
        // Implicit-form residual of sampled outline points is ~0.
        let (sin_a, cos_a) = e.angle.to_radians().sin_cos();
        for i in 0..36 {
            let theta = f64::from(i) * std::f64::consts::PI / 18.0;
            let p = e.outline_point(theta);
            let dx = p.x - e.center.x;
            let dy = p.y - e.center.y;
            let u = dx * cos_a + dy * sin_a;
            let v = -dx * sin_a + dy * cos_a;
            let residual = (u / e.axes.width).powi(2) + (v / e.axes.height).powi(2) - 1.0;
            assert!(residual.abs() < 1e-9, "theta {theta}: residual {residual}");
        }
    }

    #[test]
    fn cubic_solver_finds_known_roots() {
        // (λ-1)(λ-2)(λ-3) = λ³ - 6λ² + 11λ - 6
        let mut roots = cubic_roots(6.0, 11.0, 6.0);
        roots.sort_by(f64::total_cmp);
        assert_eq!(roots.len(), 3);
        for (root, expected) in roots.iter().zip([1.0, 2.0, 3.0]) {
            assert!((root - expected).abs() < 1e-9, "root {root} != {expected}");
        }
    }
}
