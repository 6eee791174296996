use super::scalars::{ScalarName, ScalarRow, ScalarSet};
use ndarray::{Array2, Array3, Axis};

/// A chunk of depth frames, shaped `(T, H, W)`, values in mm.
pub type DepthChunk = Array3<f32>;

/// Pose of the animal in one frame, from the second moments of its mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePose {
    pub centroid_x: f64,
    pub centroid_y: f64,
    /// Radians, counter-clockwise as displayed. Only defined mod π until
    /// flip correction and unwrapping have run.
    pub orientation: f64,
    /// Full length of the ellipse major axis (px).
    pub major_axis: f64,
    /// Full length of the ellipse minor axis (px).
    pub minor_axis: f64,
    /// Pixel count of the selected region.
    pub area: f64,
}

impl FramePose {
    pub fn centroid(&self) -> (f64, f64) {
        (self.centroid_x, self.centroid_y)
    }
}

/// Per-frame output of the feature extractor. `pose` is `None` when the
/// frame had no foreground.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameFeatures {
    pub pose: Option<FramePose>,
    pub foreground_pixels: usize,
}

impl FrameFeatures {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn is_missing(&self) -> bool {
        self.pose.is_none()
    }

    pub fn orientation(&self) -> Option<f64> {
        self.pose.map(|p| p.orientation)
    }
}

/// Crop window size as `(height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropSize {
    pub height: usize,
    pub width: usize,
}

impl CropSize {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }
}

/// Everything derived for one frame of a chunk.
#[derive(Debug, Clone)]
pub struct ExtractedFrame {
    pub features: FrameFeatures,
    pub depth: Array2<f32>,
    pub filtered: Array2<f32>,
    pub mask: Array2<bool>,
    pub likelihood: Option<Array2<f32>>,
    pub flipped: Option<bool>,
    pub scalars: ScalarRow,
}

/// Result of extracting one chunk.
///
/// The per-frame records are the single source of truth; the stacked arrays
/// handed to persistence are derived from them so they cannot fall out of
/// alignment.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    frames: Vec<ExtractedFrame>,
    crop_size: CropSize,
    tracked: bool,
    flips_corrected: bool,
}

impl ChunkResult {
    /// `tracked` and `flips_corrected` say whether likelihood planes and flip
    /// decisions were produced, independent of how many frames there are.
    pub fn new(
        frames: Vec<ExtractedFrame>,
        crop_size: CropSize,
        tracked: bool,
        flips_corrected: bool,
    ) -> Self {
        Self {
            frames,
            crop_size,
            tracked,
            flips_corrected,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn crop_size(&self) -> CropSize {
        self.crop_size
    }

    pub fn frames(&self) -> &[ExtractedFrame] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&ExtractedFrame> {
        self.frames.get(index)
    }

    pub fn features(&self) -> Vec<FrameFeatures> {
        self.frames.iter().map(|f| f.features).collect()
    }

    /// Cropped raw depth, `(T, crop_h, crop_w)`.
    pub fn depth_frames(&self) -> Array3<f32> {
        self.stack(self.frames.iter().map(|f| &f.depth))
    }

    /// Cropped filtered depth, `(T, crop_h, crop_w)`.
    pub fn filtered_frames(&self) -> Array3<f32> {
        self.stack(self.frames.iter().map(|f| &f.filtered))
    }

    pub fn mask_frames(&self) -> Array3<bool> {
        self.stack(self.frames.iter().map(|f| &f.mask))
    }

    /// `None` when the tracking model was disabled.
    pub fn likelihood_frames(&self) -> Option<Array3<f32>> {
        if !self.tracked {
            return None;
        }
        let planes: Option<Vec<&Array2<f32>>> =
            self.frames.iter().map(|f| f.likelihood.as_ref()).collect();
        Some(self.stack(planes?))
    }

    /// `None` when no flip classifier was configured.
    pub fn flips(&self) -> Option<Vec<bool>> {
        if !self.flips_corrected {
            return None;
        }
        self.frames.iter().map(|f| f.flipped).collect()
    }

    pub fn scalars(&self) -> ScalarSet {
        ScalarSet::from_rows(self.frames.iter().map(|f| &f.scalars))
    }

    pub fn scalar(&self, name: ScalarName) -> Vec<Option<f64>> {
        self.frames
            .iter()
            .map(|f| f.scalars.get(&name).copied().flatten())
            .collect()
    }

    fn stack<'a, T, I>(&self, planes: I) -> Array3<T>
    where
        T: Clone + Default + 'a,
        I: IntoIterator<Item = &'a Array2<T>>,
    {
        let mut out = Array3::from_elem(
            (self.frames.len(), self.crop_size.height, self.crop_size.width),
            T::default(),
        );
        for (mut slot, plane) in out.axis_iter_mut(Axis(0)).zip(planes) {
            slot.assign(plane);
        }
        out
    }
}
