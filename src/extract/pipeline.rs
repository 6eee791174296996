use super::crop::crop_and_rotate;
use super::denoise::{denoise, DenoiseParams};
use super::features::extract_features;
use super::flip::{
    correct_flips, flip_orientations, mirror_frames, unwrap_orientation, FlipClassifier,
    LinearFlipClassifier, MassFlipClassifier,
};
use super::onnx::OnnxFlipClassifier;
use super::scalars::compute_scalars;
use super::track::{estimate_tracker_params, score_likelihood};
use super::types::{ChunkResult, ExtractedFrame};
use crate::config::{ExtractConfig, FlipClassifierConfig};
use crate::error::{ExtractError, Result};
use ndarray::{Array2, Array3, Axis, Zip};

/// Build the flip classifier a config entry names.
pub fn create_flip_classifier(config: &FlipClassifierConfig) -> Result<Box<dyn FlipClassifier>> {
    Ok(match config {
        FlipClassifierConfig::Onnx { path } => Box::new(OnnxFlipClassifier::new(path)?),
        FlipClassifierConfig::Linear { path } => Box::new(LinearFlipClassifier::from_json_file(path)?),
        FlipClassifierConfig::Mass => Box::new(MassFlipClassifier),
    })
}

/// Runs the full per-chunk pipeline.
///
/// Built once per configuration: the structuring elements are constructed
/// here and reused for every chunk. Holds no state between chunks, so one
/// extractor per worker is enough for parallel extraction.
pub struct ChunkExtractor {
    config: ExtractConfig,
    denoise: DenoiseParams,
    background: Option<Array2<f32>>,
    roi: Option<Array2<bool>>,
    classifier: Option<Box<dyn FlipClassifier>>,
}

impl ChunkExtractor {
    pub fn new(config: ExtractConfig) -> Result<Self> {
        config.validate()?;
        let denoise = config.denoise_params()?;
        Ok(Self {
            config,
            denoise,
            background: None,
            roi: None,
            classifier: None,
        })
    }

    /// Depth of the empty arena; frames become `background - frame`.
    pub fn with_background(mut self, background: Array2<f32>) -> Self {
        self.background = Some(background);
        self
    }

    /// Pixels outside the ROI are zeroed before denoising.
    pub fn with_roi(mut self, roi: Array2<bool>) -> Self {
        self.roi = Some(roi);
        self
    }

    pub fn with_flip_classifier(mut self, classifier: Box<dyn FlipClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Extract one chunk of `(T, H, W)` depth frames.
    pub fn extract(&mut self, chunk: &Array3<f32>) -> Result<ChunkResult> {
        match self.classifier.take() {
            Some(mut classifier) => {
                let scorer: &mut dyn FlipClassifier = classifier.as_mut();
                let result = self.run(chunk, Some(scorer));
                self.classifier = Some(classifier);
                result
            }
            None => self.run(chunk, None),
        }
    }

    fn check_shapes(&self, frame_shape: (usize, usize)) -> Result<()> {
        if let Some(background) = &self.background {
            if background.dim() != frame_shape {
                return Err(ExtractError::ShapeMismatch {
                    what: "background",
                    expected: frame_shape,
                    found: background.dim(),
                });
            }
        }
        if let Some(roi) = &self.roi {
            if roi.dim() != frame_shape {
                return Err(ExtractError::ShapeMismatch {
                    what: "roi",
                    expected: frame_shape,
                    found: roi.dim(),
                });
            }
        }
        Ok(())
    }

    /// Background subtraction (with out-of-range heights zeroed), then ROI.
    fn prepare(&self, chunk: &Array3<f32>) -> Array3<f32> {
        let mut frames = chunk.to_owned();
        let (min_height, max_height) = (self.config.min_height, self.config.max_height);

        if let Some(background) = &self.background {
            for mut frame in frames.axis_iter_mut(Axis(0)) {
                Zip::from(&mut frame).and(background).for_each(|v, &bg| {
                    let height = bg - *v;
                    *v = if (min_height..=max_height).contains(&height) {
                        height
                    } else {
                        0.0
                    };
                });
            }
        }

        if let Some(roi) = &self.roi {
            for mut frame in frames.axis_iter_mut(Axis(0)) {
                Zip::from(&mut frame).and(roi).for_each(|v, &inside| {
                    if !inside {
                        *v = 0.0;
                    }
                });
            }
        }

        frames
    }

    fn run(&self, chunk: &Array3<f32>, classifier: Option<&mut dyn FlipClassifier>) -> Result<ChunkResult> {
        let (frames, height, width) = chunk.dim();
        let crop_size = self.config.crop_size();
        let _span = tracing::info_span!("extract_chunk", frames).entered();

        let tracked = self.config.use_tracking_model;
        let flips_corrected = classifier.is_some();

        self.check_shapes((height, width))?;
        if frames == 0 {
            return Ok(ChunkResult::new(Vec::new(), crop_size, tracked, flips_corrected));
        }

        let raw = self.prepare(chunk);
        let filtered = denoise(&raw, &self.denoise);

        let likelihood = if tracked {
            let trajectory = estimate_tracker_params(&filtered, &self.config.tracker_params());
            Some(score_likelihood(&raw, &trajectory))
        } else {
            None
        };

        let (mut features, mask) =
            extract_features(&filtered, &self.config.feature_params(), likelihood.as_ref());

        let mut raw_crops = crop_and_rotate(&raw, &features, crop_size);
        let mut filtered_crops = crop_and_rotate(&filtered, &features, crop_size);
        let mut mask_crops = crop_and_rotate(&mask, &features, crop_size);
        let mut likelihood_crops = likelihood
            .as_ref()
            .map(|ll| crop_and_rotate(ll, &features, crop_size));

        let flips = match classifier {
            Some(classifier) => {
                let flips = correct_flips(&raw_crops, &features, classifier, self.config.flip_smoothing)?;
                mirror_frames(&mut raw_crops, &flips);
                mirror_frames(&mut filtered_crops, &flips);
                mirror_frames(&mut mask_crops, &flips);
                if let Some(ll) = likelihood_crops.as_mut() {
                    mirror_frames(ll, &flips);
                }
                flip_orientations(&mut features, &flips);
                Some(flips)
            }
            None => None,
        };

        unwrap_orientation(&mut features);

        let scalars = compute_scalars(
            &filtered_crops,
            &features,
            &self.config.scalar_params((width, height)),
        );

        let records = features
            .iter()
            .enumerate()
            .map(|(i, feature)| ExtractedFrame {
                features: *feature,
                depth: raw_crops.index_axis(Axis(0), i).to_owned(),
                filtered: filtered_crops.index_axis(Axis(0), i).to_owned(),
                mask: mask_crops.index_axis(Axis(0), i).to_owned(),
                likelihood: likelihood_crops
                    .as_ref()
                    .map(|ll| ll.index_axis(Axis(0), i).to_owned()),
                flipped: flips.as_ref().map(|f| f[i]),
                scalars: scalars.row(i),
            })
            .collect::<Vec<_>>();

        let missing = features.iter().filter(|f| f.is_missing()).count();
        tracing::info!(
            "Extracted {} frames ({} without a pose, {} flipped)",
            frames,
            missing,
            flips.as_ref().map_or(0, |f| f.iter().filter(|&&x| x).count())
        );

        Ok(ChunkResult::new(records, crop_size, tracked, flips_corrected))
    }
}

/// One-shot extraction without background or ROI.
pub fn extract_chunk(
    chunk: &Array3<f32>,
    config: &ExtractConfig,
    classifier: Option<&mut dyn FlipClassifier>,
) -> Result<ChunkResult> {
    ChunkExtractor::new(config.clone())?.run(chunk, classifier)
}
