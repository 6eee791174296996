use super::flip::FlipClassifier;
use crate::error::{ExtractError, Result};
use ndarray::ArrayView2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// Flip classifier backed by an ONNX model.
///
/// The model takes one float tensor `[1, crop_h * crop_w]` (the flattened
/// crop, in mm) and its last output holds class probabilities; the last
/// entry is the probability of the "flipped" class. Classifiers exported
/// from scikit-learn with `zipmap=False` have this layout.
pub struct OnnxFlipClassifier {
    session: Session,
}

impl OnnxFlipClassifier {
    /// Load a flip classifier from an ONNX file
    ///
    /// # Default Configuration
    /// - Single intra-op thread: crops are small and chunks may already run
    ///   on parallel workers
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading flip classifier from {}", path.display());

        let session = build_session(path)?;

        tracing::info!("Flip classifier loaded successfully");

        Ok(Self { session })
    }
}

fn build_session(path: &Path) -> ort::Result<Session> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(1)?
        .commit_from_file(path)?)
}

impl FlipClassifier for OnnxFlipClassifier {
    fn flip_probability(&mut self, frame: ArrayView2<f32>) -> Result<f32> {
        let _span = tracing::trace_span!("onnx_flip").entered();

        let flat: Vec<f32> = frame.iter().copied().collect();
        let input = Tensor::from_array(([1usize, flat.len()], flat))?;
        let outputs = self.session.run(ort::inputs![input])?;

        let last = outputs.len().checked_sub(1).ok_or_else(|| {
            ExtractError::Classifier("model produced no outputs".to_string())
        })?;
        let (_, probabilities) = outputs[last].try_extract_tensor::<f32>()?;

        probabilities
            .last()
            .copied()
            .ok_or_else(|| ExtractError::Classifier("empty probability tensor".to_string()))
    }

    fn name(&self) -> &str {
        "onnx"
    }
}
