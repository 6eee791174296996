//! Occlusion-tolerant tracking model.
//!
//! Fits a single 3D Gaussian over foreground pixel `(x, y, height)` and
//! follows it through the chunk with exponential smoothing:
//!
//! ```text
//! mean_t = ρ_mean · mean_{t-1} + (1 − ρ_mean) · frame_mean_t
//! cov_t  = ρ_cov  · cov_{t-1}  + (1 − ρ_cov)  · frame_cov_t
//! ```
//!
//! Each frame's statistics only use pixels that are plausible under the
//! previous estimate, so a transient occluder biases neither the frame
//! statistics nor the smoothed trajectory. A frame whose foreground lies
//! entirely outside that gate reinitializes the estimate from its own
//! pixels; only a frame with no foreground at all holds it. The per-pixel log-density under
//! the trajectory is the likelihood mask consumed by feature extraction.

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use std::f64::consts::PI;

/// Lowest log-likelihood ever reported. Keeps the likelihood mask finite so
/// interpolation during cropping stays well defined.
pub const LIKELIHOOD_FLOOR: f32 = -1.0e6;

/// Smoothed Gaussian estimate over pixel `(x, y, height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerState {
    pub mean: Vector3<f64>,
    pub covariance: Matrix3<f64>,
}

impl TrackerState {
    /// Exponential smoothing towards `observed`.
    pub fn blend(&self, observed: &TrackerState, rho_mean: f64, rho_cov: f64) -> TrackerState {
        TrackerState {
            mean: self.mean * rho_mean + observed.mean * (1.0 - rho_mean),
            covariance: self.covariance * rho_cov + observed.covariance * (1.0 - rho_cov),
        }
    }

    /// Position part of the mean, `(x, y)`.
    pub fn position(&self) -> (f64, f64) {
        (self.mean.x, self.mean.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerParams {
    pub rho_mean: f64,
    pub rho_cov: f64,
    /// Pixels at or below this height are never foreground.
    pub depth_floor: f32,
    /// Pixels whose log-likelihood under the previous state falls below this
    /// are left out of the frame statistics. `None` disables gating.
    pub ll_threshold: Option<f64>,
    /// Added to the covariance diagonal before evaluating densities.
    pub regularization: f64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            rho_mean: 0.0,
            rho_cov: 0.0,
            depth_floor: 10.0,
            ll_threshold: Some(-30.0),
            regularization: 1.0,
        }
    }
}

/// One optional state per frame; `None` until the first frame with
/// foreground has been seen.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerTrajectory {
    pub states: Vec<Option<TrackerState>>,
    regularization: f64,
}

impl TrackerTrajectory {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Last state of the chunk, usable as the seed of the next one.
    pub fn final_state(&self) -> Option<TrackerState> {
        self.states.iter().rev().find_map(|s| *s)
    }

    pub fn regularization(&self) -> f64 {
        self.regularization
    }
}

/// Estimate the smoothed trajectory of a chunk, initializing from the chunk's
/// own first frame with foreground.
pub fn estimate_tracker_params(filtered: &Array3<f32>, params: &TrackerParams) -> TrackerTrajectory {
    estimate_tracker_params_seeded(filtered, params, None)
}

/// As [`estimate_tracker_params`], but continuing from `seed` when given.
pub fn estimate_tracker_params_seeded(
    filtered: &Array3<f32>,
    params: &TrackerParams,
    seed: Option<TrackerState>,
) -> TrackerTrajectory {
    let _span = tracing::debug_span!("estimate_tracker_params").entered();

    let mut state = seed;
    let mut states = Vec::with_capacity(filtered.len_of(Axis(0)));
    let mut held = 0usize;
    let mut reacquired = 0usize;

    for frame in filtered.axis_iter(Axis(0)) {
        state = match state {
            None => frame_statistics(frame, params.depth_floor, None),
            Some(previous) => {
                let gate = params
                    .ll_threshold
                    .and_then(|threshold| Gaussian::new(&previous, params.regularization).map(|g| (g, threshold)));
                match frame_statistics(frame, params.depth_floor, gate.as_ref()) {
                    Some(observed) => Some(previous.blend(&observed, params.rho_mean, params.rho_cov)),
                    // Gate rejected all foreground: reinitialize from the ungated frame.
                    None => match gate
                        .as_ref()
                        .and_then(|_| frame_statistics(frame, params.depth_floor, None))
                    {
                        Some(observed) => {
                            reacquired += 1;
                            Some(observed)
                        }
                        None => {
                            held += 1;
                            Some(previous)
                        }
                    },
                }
            }
        };
        states.push(state);
    }

    if held > 0 {
        tracing::debug!("tracker held its state over {} empty frames", held);
    }
    if reacquired > 0 {
        tracing::debug!("tracker reinitialized on {} frames outside its gate", reacquired);
    }

    TrackerTrajectory {
        states,
        regularization: params.regularization,
    }
}

/// Per-pixel log-density of `raw` under the trajectory, `(T, H, W)`.
///
/// Frames without a state score [`LIKELIHOOD_FLOOR`] everywhere.
pub fn score_likelihood(raw: &Array3<f32>, trajectory: &TrackerTrajectory) -> Array3<f32> {
    let _span = tracing::debug_span!("score_likelihood").entered();

    let mut out = Array3::from_elem(raw.raw_dim(), LIKELIHOOD_FLOOR);
    for ((frame, state), mut target) in raw
        .axis_iter(Axis(0))
        .zip(&trajectory.states)
        .zip(out.axis_iter_mut(Axis(0)))
    {
        let Some(gaussian) = state
            .as_ref()
            .and_then(|s| Gaussian::new(s, trajectory.regularization))
        else {
            continue;
        };
        target.assign(&gaussian.score_frame(frame));
    }
    out
}

/// Gaussian with precomputed inverse covariance and normalizer.
struct Gaussian {
    mean: Vector3<f64>,
    precision: Matrix3<f64>,
    log_norm: f64,
}

impl Gaussian {
    fn new(state: &TrackerState, regularization: f64) -> Option<Self> {
        let covariance = state.covariance + Matrix3::identity() * regularization;
        let det = covariance.determinant();
        if !(det.is_finite() && det > 0.0) {
            return None;
        }
        let precision = covariance.try_inverse()?;
        Some(Self {
            mean: state.mean,
            precision,
            log_norm: -0.5 * (3.0 * (2.0 * PI).ln() + det.ln()),
        })
    }

    fn log_density(&self, x: f64, y: f64, z: f64) -> f64 {
        let d = Vector3::new(x, y, z) - self.mean;
        self.log_norm - 0.5 * d.dot(&(self.precision * d))
    }

    fn score_frame(&self, frame: ArrayView2<f32>) -> Array2<f32> {
        Array2::from_shape_fn(frame.raw_dim(), |(r, c)| {
            let ll = self.log_density(c as f64, r as f64, frame[[r, c]] as f64);
            (ll as f32).max(LIKELIHOOD_FLOOR)
        })
    }
}

/// Empirical mean and (unbiased) covariance of the foreground pixels of one
/// frame. Returns `None` when no pixel qualifies.
fn frame_statistics(
    frame: ArrayView2<f32>,
    depth_floor: f32,
    gate: Option<&(Gaussian, f64)>,
) -> Option<TrackerState> {
    let mut points: Vec<Vector3<f64>> = Vec::new();
    for ((r, c), &height) in frame.indexed_iter() {
        if height <= depth_floor {
            continue;
        }
        let point = Vector3::new(c as f64, r as f64, height as f64);
        if let Some((gaussian, threshold)) = gate {
            if gaussian.log_density(point.x, point.y, point.z) < *threshold {
                continue;
            }
        }
        points.push(point);
    }

    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    let mean = points.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let covariance = if points.len() > 1 {
        points
            .iter()
            .map(|p| {
                let d = p - mean;
                d * d.transpose()
            })
            .fold(Matrix3::zeros(), |acc, m| acc + m)
            / (n - 1.0)
    } else {
        Matrix3::zeros()
    };

    Some(TrackerState { mean, covariance })
}
