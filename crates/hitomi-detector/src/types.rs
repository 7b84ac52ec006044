//! Shared types for the hitomi pupil detector.

use serde::{Deserialize, Serialize};

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// Semi-axes of a fitted ellipse.
///
/// `width` is the semi-axis aligned with the ellipse angle, `height` the
/// perpendicular one. The ordering carries no major/minor meaning; use
/// [`major`](Self::major) and [`minor`](Self::minor) when that distinction
/// matters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    /// Semi-axis along the ellipse angle.
    pub width: f64,
    /// Semi-axis perpendicular to the ellipse angle.
    pub height: f64,
}

impl Axes {
    /// The larger of the two semi-axes.
    #[must_use]
    pub fn major(self) -> f64 {
        self.width.max(self.height)
    }

    /// The smaller of the two semi-axes.
    #[must_use]
    pub fn minor(self) -> f64 {
        self.width.min(self.height)
    }
}

/// Confidence of a detection, broken down into its three components.
///
/// All fields lie in `[0, 1]`. `value` is the arithmetic mean of the other
/// three; `value == 0` is the sentinel for an invalid or discarded
/// candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    /// Overall confidence: mean of the three component measures.
    pub value: f64,
    /// Ratio of the minor to the major semi-axis of the fitted ellipse.
    pub aspect_ratio: f64,
    /// Fraction of the eight angular octants around the ellipse center
    /// that contain segment points.
    pub angular_spread: f64,
    /// Fraction of outline samples where intensity rises from inside the
    /// ellipse to outside (dark pupil, brighter iris).
    pub outline_contrast: f64,
}

/// A detected pupil: ellipse parameters plus confidence.
///
/// The angle is in degrees; `axes.width` is the semi-axis aligned with it.
/// A default-constructed (all-zero) detection means "no pupil".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Ellipse center in image coordinates.
    pub center: Point,
    /// Ellipse semi-axes.
    pub axes: Axes,
    /// Rotation of the `axes.width` semi-axis, in degrees.
    pub angle: f64,
    /// Detection confidence.
    pub confidence: Confidence,
}

impl PartialOrd for Detection {
    /// Detections order by overall confidence.
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.confidence.value.partial_cmp(&other.confidence.value)
    }
}

/// Pupil size configuration.
///
/// Either leave `auto_pupil_diameter` set and let the detector derive the
/// bounds from the image diagonal, or clear it and provide explicit
/// `min_pupil_diameter` / `max_pupil_diameter` in input-pixel units. After
/// a call with `auto_pupil_diameter` set, the detector writes the computed
/// bounds back into these fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Derive the diameter bounds from the image diagonal.
    pub auto_pupil_diameter: bool,
    /// Smallest accepted pupil diameter, in input pixels.
    pub min_pupil_diameter: f64,
    /// Largest accepted pupil diameter, in input pixels.
    pub max_pupil_diameter: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            auto_pupil_diameter: true,
            min_pupil_diameter: 0.0,
            max_pupil_diameter: 0.0,
        }
    }
}

impl Parameters {
    /// Check explicit diameter bounds for validity.
    ///
    /// Automatic parameters are always valid. The detector itself never
    /// fails on bad bounds (it reports a zero-confidence detection); this
    /// helper lets callers reject a bad configuration up front instead.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::NegativeDiameter`] if either bound is
    /// negative, [`ParameterError::InvertedDiameter`] if the minimum
    /// exceeds the maximum.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.auto_pupil_diameter {
            return Ok(());
        }
        let (min, max) = (self.min_pupil_diameter, self.max_pupil_diameter);
        if min < 0.0 || max < 0.0 {
            return Err(ParameterError::NegativeDiameter { min, max });
        }
        if min > max {
            return Err(ParameterError::InvertedDiameter { min, max });
        }
        Ok(())
    }
}

/// Errors for invalid pupil size configuration.
#[derive(Debug, thiserror::Error)]
pub enum ParameterError {
    /// One of the diameter bounds is negative.
    #[error("pupil diameter bounds must be non-negative, got min={min} max={max}")]
    NegativeDiameter {
        /// Configured minimum diameter.
        min: f64,
        /// Configured maximum diameter.
        max: f64,
    },

    /// The minimum diameter exceeds the maximum.
    #[error("minimum pupil diameter {min} exceeds maximum {max}")]
    InvertedDiameter {
        /// Configured minimum diameter.
        min: f64,
        /// Configured maximum diameter.
        max: f64,
    },
}
