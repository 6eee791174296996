//! Extraction settings, read from a TOML file with `DEPTH_EXTRACT_*`
//! environment overrides.

use crate::error::{ExtractError, Result};
use crate::extract::{
    CameraModel, CropSize, DenoiseParams, FeatureParams, ScalarParams, StrelShape,
    StructuringElement, TrackerParams,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Shape and `[width, height]` of a structuring element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrelConfig {
    pub shape: StrelShape,
    pub size: [usize; 2],
}

impl StrelConfig {
    pub fn build(&self) -> Result<StructuringElement> {
        StructuringElement::new(self.shape, self.size[0], self.size[1])
    }
}

/// Which flip classifier to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FlipClassifierConfig {
    Onnx { path: PathBuf },
    Linear { path: PathBuf },
    Mass,
}

impl FlipClassifierConfig {
    /// Infer the classifier kind from a model file's extension.
    pub fn from_model_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("onnx") => Ok(Self::Onnx { path }),
            Some("json") => Ok(Self::Linear { path }),
            _ => Err(ExtractError::config(format!(
                "cannot infer flip classifier kind from {}",
                path.display()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Spatial median kernel sizes (odd).
    #[serde(default = "default_prefilter_space")]
    pub prefilter_space: Vec<usize>,

    /// Temporal median window (odd); unset disables the temporal pass.
    #[serde(default)]
    pub prefilter_time: Option<usize>,

    #[serde(default = "default_tail_strel")]
    pub tail_strel: StrelConfig,

    #[serde(default = "default_tail_iterations")]
    pub tail_iterations: usize,

    #[serde(default = "default_min_strel")]
    pub min_strel: StrelConfig,

    #[serde(default)]
    pub min_iterations: usize,

    /// Score pixels against the smoothed Gaussian tracker and build the mask
    /// from that likelihood instead of a plain height threshold.
    #[serde(default)]
    pub use_tracking_model: bool,

    #[serde(default)]
    pub rho_mean: f64,

    #[serde(default)]
    pub rho_cov: f64,

    #[serde(default = "default_tracking_ll_threshold")]
    pub tracking_ll_threshold: Option<f64>,

    #[serde(default = "default_tracking_regularization")]
    pub tracking_regularization: f64,

    /// Heights (mm) at or below which a pixel is floor.
    #[serde(default = "default_min_height")]
    pub min_height: f32,

    #[serde(default = "default_max_height")]
    pub max_height: f32,

    /// Log-likelihood threshold for the tracked mask.
    #[serde(default = "default_mask_threshold")]
    pub mask_threshold: f32,

    #[serde(default)]
    pub use_connected_components: bool,

    #[serde(default)]
    pub flip_classifier: Option<FlipClassifierConfig>,

    #[serde(default = "default_flip_smoothing")]
    pub flip_smoothing: usize,

    /// `[height, width]` of the cropped frames.
    #[serde(default = "default_crop_size")]
    pub crop_size: [usize; 2],

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default)]
    pub camera: CameraModel,
}

fn default_prefilter_space() -> Vec<usize> {
    vec![3]
}
fn default_tail_strel() -> StrelConfig {
    StrelConfig {
        shape: StrelShape::Ellipse,
        size: [9, 9],
    }
}
fn default_tail_iterations() -> usize {
    1
}
fn default_min_strel() -> StrelConfig {
    StrelConfig {
        shape: StrelShape::Rectangle,
        size: [5, 5],
    }
}
fn default_tracking_ll_threshold() -> Option<f64> {
    Some(-30.0)
}
fn default_tracking_regularization() -> f64 {
    1.0
}
fn default_min_height() -> f32 {
    10.0
}
fn default_max_height() -> f32 {
    100.0
}
fn default_mask_threshold() -> f32 {
    -30.0
}
fn default_flip_smoothing() -> usize {
    51
}
fn default_crop_size() -> [usize; 2] {
    [80, 80]
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    60
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            prefilter_space: default_prefilter_space(),
            prefilter_time: None,
            tail_strel: default_tail_strel(),
            tail_iterations: default_tail_iterations(),
            min_strel: default_min_strel(),
            min_iterations: 0,
            use_tracking_model: false,
            rho_mean: 0.0,
            rho_cov: 0.0,
            tracking_ll_threshold: default_tracking_ll_threshold(),
            tracking_regularization: default_tracking_regularization(),
            min_height: default_min_height(),
            max_height: default_max_height(),
            mask_threshold: default_mask_threshold(),
            use_connected_components: false,
            flip_classifier: None,
            flip_smoothing: default_flip_smoothing(),
            crop_size: default_crop_size(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            camera: CameraModel::default(),
        }
    }
}

impl ExtractConfig {
    /// Read a TOML config, apply environment overrides and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Reading config from {}", path.display());
        let raw = fs::read_to_string(path)?;
        let mut cfg = Self::from_toml_str(&raw)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `DEPTH_EXTRACT_*` environment variable overrides.
    ///
    /// | Variable | Config field |
    /// |---|---|
    /// | `DEPTH_EXTRACT_CHUNK_SIZE` | `chunk_size` |
    /// | `DEPTH_EXTRACT_CROP_SIZE` | `crop_size` (`80` or `80x64`, height first) |
    /// | `DEPTH_EXTRACT_MIN_HEIGHT` | `min_height` |
    /// | `DEPTH_EXTRACT_MAX_HEIGHT` | `max_height` |
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override source extracted for testability without mutating the
    /// process environment.
    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DEPTH_EXTRACT_CHUNK_SIZE") {
            match v.trim().parse() {
                Ok(size) => self.chunk_size = size,
                Err(_) => tracing::warn!("ignoring DEPTH_EXTRACT_CHUNK_SIZE={}", v),
            }
        }
        if let Some(v) = lookup("DEPTH_EXTRACT_CROP_SIZE") {
            match parse_crop_size(&v) {
                Some(size) => self.crop_size = size,
                None => tracing::warn!("ignoring DEPTH_EXTRACT_CROP_SIZE={}", v),
            }
        }
        if let Some(v) = lookup("DEPTH_EXTRACT_MIN_HEIGHT") {
            match v.trim().parse() {
                Ok(h) => self.min_height = h,
                Err(_) => tracing::warn!("ignoring DEPTH_EXTRACT_MIN_HEIGHT={}", v),
            }
        }
        if let Some(v) = lookup("DEPTH_EXTRACT_MAX_HEIGHT") {
            match v.trim().parse() {
                Ok(h) => self.max_height = h,
                Err(_) => tracing::warn!("ignoring DEPTH_EXTRACT_MAX_HEIGHT={}", v),
            }
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for &size in &self.prefilter_space {
            if size == 0 || size % 2 == 0 {
                return Err(ExtractError::config(format!(
                    "spatial median kernel must be odd and positive, got {size}"
                )));
            }
        }
        if let Some(window) = self.prefilter_time {
            if window == 0 || window % 2 == 0 {
                return Err(ExtractError::config(format!(
                    "temporal median window must be odd and positive, got {window}"
                )));
            }
        }
        self.tail_strel.build()?;
        self.min_strel.build()?;

        for (name, rho) in [("rho_mean", self.rho_mean), ("rho_cov", self.rho_cov)] {
            if !(0.0..=1.0).contains(&rho) {
                return Err(ExtractError::config(format!("{name} must be in [0, 1], got {rho}")));
            }
        }
        if !(self.tracking_regularization > 0.0) {
            return Err(ExtractError::config(format!(
                "tracking_regularization must be positive, got {}",
                self.tracking_regularization
            )));
        }
        if !(self.min_height < self.max_height) {
            return Err(ExtractError::config(format!(
                "min_height ({}) must be below max_height ({})",
                self.min_height, self.max_height
            )));
        }
        if self.crop_size.contains(&0) {
            return Err(ExtractError::config(format!(
                "crop size must be non-zero, got {:?}",
                self.crop_size
            )));
        }
        if self.flip_smoothing == 0 {
            return Err(ExtractError::config("flip_smoothing must be at least 1"));
        }
        if let Some(window) = self.prefilter_time {
            if self.chunk_overlap < window {
                return Err(ExtractError::config(format!(
                    "chunk_overlap ({}) must cover the temporal median window ({window})",
                    self.chunk_overlap
                )));
            }
        }
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(ExtractError::config(format!(
                "chunk_overlap ({}) must be smaller than a non-zero chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    pub fn crop_size(&self) -> CropSize {
        CropSize::new(self.crop_size[0], self.crop_size[1])
    }

    pub fn denoise_params(&self) -> Result<DenoiseParams> {
        Ok(DenoiseParams {
            spatial_kernel_sizes: self.prefilter_space.clone(),
            temporal_window: self.prefilter_time,
            tail_strel: self.tail_strel.build()?,
            tail_iterations: self.tail_iterations,
            min_strel: self.min_strel.build()?,
            min_iterations: self.min_iterations,
        })
    }

    pub fn tracker_params(&self) -> TrackerParams {
        TrackerParams {
            rho_mean: self.rho_mean,
            rho_cov: self.rho_cov,
            depth_floor: self.min_height,
            ll_threshold: self.tracking_ll_threshold,
            regularization: self.tracking_regularization,
        }
    }

    pub fn feature_params(&self) -> FeatureParams {
        FeatureParams {
            frame_threshold: self.min_height,
            mask_threshold: self.mask_threshold,
            use_connected_components: self.use_connected_components,
        }
    }

    /// `resolution` is `(width, height)` of the uncropped frames.
    pub fn scalar_params(&self, resolution: (usize, usize)) -> ScalarParams {
        ScalarParams {
            min_height: self.min_height,
            max_height: self.max_height,
            camera: self.camera,
            resolution,
        }
    }
}

fn parse_crop_size(v: &str) -> Option<[usize; 2]> {
    let v = v.trim();
    match v.split_once(['x', 'X']) {
        Some((h, w)) => Some([h.trim().parse().ok()?, w.trim().parse().ok()?]),
        None => {
            let side = v.parse().ok()?;
            Some([side, side])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let cfg = ExtractConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.crop_size(), CropSize::new(80, 80));
        assert_eq!(cfg.tail_strel.shape, StrelShape::Ellipse);
        assert_eq!(cfg.min_strel.shape, StrelShape::Rectangle);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = ExtractConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ExtractConfig::default());
    }

    #[test]
    fn parses_partial_toml() {
        let raw = r#"
            prefilter_space = [3, 5]
            prefilter_time = 5
            use_tracking_model = true
            rho_mean = 0.8
            crop_size = [64, 48]

            [tail_strel]
            shape = "rect"
            size = [7, 5]

            [flip_classifier]
            kind = "linear"
            path = "flip.json"
        "#;
        let cfg = ExtractConfig::from_toml_str(raw).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.prefilter_space, vec![3, 5]);
        assert_eq!(cfg.prefilter_time, Some(5));
        assert_eq!(cfg.tail_strel.shape, StrelShape::Rectangle);
        assert_eq!(cfg.crop_size(), CropSize::new(64, 48));
        assert_eq!(
            cfg.flip_classifier,
            Some(FlipClassifierConfig::Linear {
                path: PathBuf::from("flip.json")
            })
        );
        assert_eq!(cfg.min_height, 10.0);
    }

    #[test]
    fn mass_classifier_needs_no_path() {
        let cfg = ExtractConfig::from_toml_str("[flip_classifier]\nkind = \"mass\"\n").unwrap();
        assert_eq!(cfg.flip_classifier, Some(FlipClassifierConfig::Mass));
    }

    #[test]
    fn unknown_strel_shape_fails_to_parse() {
        let raw = "[min_strel]\nshape = \"diamond\"\nsize = [3, 3]\n";
        assert!(matches!(
            ExtractConfig::from_toml_str(raw),
            Err(ExtractError::ConfigParse(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let cases: [fn(&mut ExtractConfig); 12] = [
            |c| c.prefilter_space = vec![4],
            |c| c.prefilter_space = vec![0],
            |c| c.prefilter_time = Some(2),
            |c| c.rho_mean = 1.5,
            |c| c.rho_cov = -0.1,
            |c| c.min_height = 100.0,
            |c| c.crop_size = [0, 80],
            |c| c.tail_strel.size = [0, 9],
            |c| c.chunk_overlap = 1000,
            |c| c.tracking_regularization = 0.0,
            |c| c.flip_smoothing = 0,
            |c| {
                c.prefilter_time = Some(9);
                c.chunk_overlap = 5;
            },
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut cfg = ExtractConfig::default();
            mutate(&mut cfg);
            assert!(
                matches!(cfg.validate(), Err(ExtractError::Configuration(_))),
                "case {i} should be rejected"
            );
        }
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("DEPTH_EXTRACT_CHUNK_SIZE", "500"),
            ("DEPTH_EXTRACT_CROP_SIZE", "64x48"),
            ("DEPTH_EXTRACT_MIN_HEIGHT", "5"),
            ("DEPTH_EXTRACT_MAX_HEIGHT", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut cfg = ExtractConfig::default();
        cfg.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.chunk_size, 500);
        assert_eq!(cfg.crop_size, [64, 48]);
        assert_eq!(cfg.min_height, 5.0);
        assert_eq!(cfg.max_height, 100.0);
    }

    #[test]
    fn classifier_kind_from_extension() {
        assert!(matches!(
            FlipClassifierConfig::from_model_path("models/flip.ONNX"),
            Ok(FlipClassifierConfig::Onnx { .. })
        ));
        assert!(matches!(
            FlipClassifierConfig::from_model_path("flip.json"),
            Ok(FlipClassifierConfig::Linear { .. })
        ));
        assert!(FlipClassifierConfig::from_model_path("flip.pkl").is_err());
    }

    #[test]
    fn square_crop_override() {
        assert_eq!(parse_crop_size("96"), Some([96, 96]));
        assert_eq!(parse_crop_size("96x"), None);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extract.toml");
        fs::write(&path, "chunk_size = 200\nchunk_overlap = 20\n").unwrap();
        let cfg = ExtractConfig::load(&path).unwrap();
        assert_eq!(cfg.chunk_size, 200);
        assert_eq!(cfg.chunk_overlap, 20);
    }
}
