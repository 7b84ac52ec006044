//! hitomi-detector: real-time pupil detection for eye images (sans-IO)
//!
//! Finds the ellipse that best approximates the pupil contour in a
//! single grayscale eye image, with a confidence score in `[0, 1]`:
//!
//! preprocess -> canny -> morphology -> contours -> per-segment
//! scoring -> conditional combination -> final selection
//!
//! The implementation follows the PuRe algorithm (Santini, Fuhl,
//! Kasneci 2018) with a MATLAB-style Canny front end and the edge
//! cleanup masks of ExCuSe/ElSe. Decoding, grayscale conversion, and
//! any UI concerns stay outside this crate: input is an already-decoded
//! [`image::GrayImage`], output a plain [`Detection`] value.

mod canny;
mod combine;
mod contour;
mod debug_view;
mod detector;
mod ellipse;
mod evaluate;
mod morphology;
mod preprocess;
mod types;

pub use detector::Detector;
pub use types::{Axes, Confidence, Detection, ParameterError, Parameters, Point};
