use super::denoise::median;
use super::types::FrameFeatures;
use crate::error::{ExtractError, Result};
use ndarray::{s, Array3, ArrayView2, Axis};
use serde::Deserialize;
use std::f64::consts::PI;
use std::path::Path;

/// Trait for head/tail flip classifiers.
/// Allows swapping between an ONNX model, a linear model or a rule.
pub trait FlipClassifier: Send {
    /// Probability that the animal in a cropped, aligned frame faces the
    /// wrong way.
    ///
    /// # Arguments
    /// * `frame` - Cropped depth frame, `(crop_h, crop_w)`
    fn flip_probability(&mut self, frame: ArrayView2<f32>) -> Result<f32>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Never flips.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFlip;

impl FlipClassifier for NoFlip {
    fn flip_probability(&mut self, _frame: ArrayView2<f32>) -> Result<f32> {
        Ok(0.0)
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Rule-based classifier: share of height mass in the right half of the
/// crop. Assumes the rump, which carries more mass than the head, belongs
/// on the left of a correctly oriented crop.
#[derive(Debug, Default, Clone, Copy)]
pub struct MassFlipClassifier;

impl FlipClassifier for MassFlipClassifier {
    fn flip_probability(&mut self, frame: ArrayView2<f32>) -> Result<f32> {
        let half = frame.ncols() / 2;
        let mut left = 0.0f64;
        let mut right = 0.0f64;
        for ((_, c), &v) in frame.indexed_iter() {
            let v = v.max(0.0) as f64;
            if c < half {
                left += v;
            } else if c >= frame.ncols() - half {
                right += v;
            }
        }
        let total = left + right;
        if total <= 0.0 {
            return Ok(0.0);
        }
        Ok((right / total) as f32)
    }

    fn name(&self) -> &str {
        "mass"
    }
}

/// Logistic model over the flattened crop: `σ(w·x + b)`.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearFlipClassifier {
    /// `[height, width]` of the crops the weights were fitted on.
    crop_size: [usize; 2],
    weights: Vec<f32>,
    bias: f32,
}

impl LinearFlipClassifier {
    pub fn new(crop_size: [usize; 2], weights: Vec<f32>, bias: f32) -> Result<Self> {
        let model = Self {
            crop_size,
            weights,
            bias,
        };
        model.check()?;
        Ok(model)
    }

    /// Load `{"crop_size": [h, w], "weights": [...], "bias": b}`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading linear flip classifier from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&raw)?;
        model.check()?;
        Ok(model)
    }

    fn check(&self) -> Result<()> {
        let [h, w] = self.crop_size;
        if self.weights.len() != h * w {
            return Err(ExtractError::ShapeMismatch {
                what: "flip classifier weights",
                expected: (h, w),
                found: (self.weights.len(), 1),
            });
        }
        Ok(())
    }
}

impl FlipClassifier for LinearFlipClassifier {
    fn flip_probability(&mut self, frame: ArrayView2<f32>) -> Result<f32> {
        let [h, w] = self.crop_size;
        if frame.dim() != (h, w) {
            return Err(ExtractError::ShapeMismatch {
                what: "cropped frame",
                expected: (h, w),
                found: frame.dim(),
            });
        }
        let logit = frame
            .iter()
            .zip(&self.weights)
            .fold(self.bias as f64, |acc, (&x, &weight)| acc + x as f64 * weight as f64);
        Ok((1.0 / (1.0 + (-logit).exp())) as f32)
    }

    fn name(&self) -> &str {
        "linear"
    }
}

/// Decide per frame whether the crop is flipped.
///
/// Frames with a pose are scored, the probabilities are median-smoothed over
/// `smoothing_window` frames (shrinking at the chunk edges and skipping
/// frames without a pose), then thresholded at 0.5. Frames without a pose
/// are never flipped.
pub fn correct_flips(
    cropped: &Array3<f32>,
    features: &[FrameFeatures],
    classifier: &mut dyn FlipClassifier,
    smoothing_window: usize,
) -> Result<Vec<bool>> {
    let _span = tracing::debug_span!("correct_flips", classifier = classifier.name()).entered();

    let mut probabilities: Vec<Option<f32>> = Vec::with_capacity(features.len());
    for (frame, feature) in cropped.axis_iter(Axis(0)).zip(features) {
        probabilities.push(match feature.pose {
            Some(_) => Some(classifier.flip_probability(frame)?),
            None => None,
        });
    }

    let smoothed = smooth_probabilities(&probabilities, smoothing_window);
    let flips: Vec<bool> = smoothed
        .iter()
        .map(|p| p.map_or(false, |p| p > 0.5))
        .collect();

    tracing::debug!(
        "{} of {} frames flagged as flipped",
        flips.iter().filter(|&&f| f).count(),
        flips.len()
    );

    Ok(flips)
}

/// Centred running median over the frames that have a probability.
fn smooth_probabilities(probabilities: &[Option<f32>], window: usize) -> Vec<Option<f32>> {
    let half = window.max(1) / 2;
    let mut samples = Vec::with_capacity(window.max(1));

    probabilities
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if p.is_none() {
                return None;
            }
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(probabilities.len());
            samples.clear();
            samples.extend(probabilities[start..end].iter().flatten().copied());
            Some(median(&mut samples))
        })
        .collect()
}

/// Mirror flagged frames left-to-right. Mirroring is its own inverse.
pub fn mirror_frames<T: Clone>(frames: &mut Array3<T>, flips: &[bool]) {
    for (mut frame, &flip) in frames.axis_iter_mut(Axis(0)).zip(flips) {
        if flip {
            let mirrored = frame.slice(s![.., ..;-1]).to_owned();
            frame.assign(&mirrored);
        }
    }
}

/// Turn the orientation of flagged frames by π.
pub fn flip_orientations(features: &mut [FrameFeatures], flips: &[bool]) {
    for (feature, &flip) in features.iter_mut().zip(flips) {
        if let (Some(pose), true) = (feature.pose.as_mut(), flip) {
            pose.orientation += PI;
        }
    }
}

/// Remove artificial jumps from the half-turn-periodic orientation.
///
/// The doubled angle is unwrapped as an ordinary phase over the frames that
/// have a pose, then halved. Frames without a pose are skipped and stay
/// missing.
pub fn unwrap_orientation(features: &mut [FrameFeatures]) {
    let mut doubled: Vec<f64> = features
        .iter()
        .filter_map(|f| f.orientation())
        .map(|o| 2.0 * o)
        .collect();
    unwrap_phase(&mut doubled);

    let poses = features.iter_mut().filter_map(|f| f.pose.as_mut());
    for (pose, phase) in poses.zip(doubled) {
        pose.orientation = phase / 2.0;
    }
}

/// numpy-style unwrap: consecutive differences larger than π are folded
/// back by whole turns.
pub fn unwrap_phase(data: &mut [f64]) {
    if data.len() < 2 {
        return;
    }

    let mut correction = 0.0;
    let mut prev_wrapped = data[0];

    for value in data.iter_mut().skip(1) {
        let current_wrapped = *value;
        let diff = current_wrapped - prev_wrapped;
        let mut folded = (diff + PI).rem_euclid(2.0 * PI) - PI;
        if folded == -PI && diff > 0.0 {
            folded = PI;
        }
        if diff.abs() >= PI {
            correction += folded - diff;
        }
        *value = current_wrapped + correction;
        prev_wrapped = current_wrapped;
    }
}
