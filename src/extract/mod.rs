mod camera;
mod crop;
mod denoise;
mod features;
mod flip;
mod onnx;
mod pipeline;
mod scalars;
mod strel;
mod track;
mod types;

pub use camera::CameraModel;
pub use crop::{crop_and_rotate, crop_frame, CropSample};
pub use denoise::{close, denoise, dilate, erode, median_blur, open, temporal_median, DenoiseParams};
pub use features::{extract_features, largest_component, moment_features, FeatureParams};
pub use flip::{
    correct_flips, flip_orientations, mirror_frames, unwrap_orientation, unwrap_phase,
    FlipClassifier, LinearFlipClassifier, MassFlipClassifier, NoFlip,
};
pub use onnx::OnnxFlipClassifier;
pub use pipeline::{create_flip_classifier, extract_chunk, ChunkExtractor};
pub use scalars::{compute_scalars, scalar_descriptions, ScalarName, ScalarParams, ScalarRow, ScalarSet};
pub use strel::{StrelShape, StructuringElement};
pub use track::{
    estimate_tracker_params, estimate_tracker_params_seeded, score_likelihood, TrackerParams,
    TrackerState, TrackerTrajectory, LIKELIHOOD_FLOOR,
};
pub use types::{ChunkResult, CropSize, DepthChunk, ExtractedFrame, FrameFeatures, FramePose};
