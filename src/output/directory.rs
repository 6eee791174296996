use super::ResultSink;
use crate::error::Result;
use crate::extract::{scalar_descriptions, ChunkResult, CropSize, ScalarName, ScalarSet};
use image::GrayImage;
use ndarray::Array2;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const DEPTH_FILE: &str = "frames.f32";
pub const MASK_FILE: &str = "frames_mask.u8";
pub const LIKELIHOOD_FILE: &str = "frames_ll.f32";
pub const SCALARS_FILE: &str = "scalars.json";
pub const PREVIEW_FILE: &str = "preview.png";

#[derive(Serialize)]
struct ScalarsFile<'a> {
    frames: usize,
    /// `[height, width]` of every cropped frame in the binary files.
    crop_size: [usize; 2],
    scalars: &'a ScalarSet,
    descriptions: BTreeMap<ScalarName, &'static str>,
    flips: Option<Vec<bool>>,
}

/// Writes extracted chunks into a directory as flat little-endian arrays
/// plus a JSON file of scalars and a preview image.
pub struct DirectorySink {
    dir: PathBuf,
    max_height: f32,
    depth: BufWriter<File>,
    mask: BufWriter<File>,
    likelihood: Option<BufWriter<File>>,
    scalars: ScalarSet,
    flips: Vec<Option<bool>>,
    crop_size: Option<CropSize>,
    preview: Option<Array2<f32>>,
    frames: usize,
}

impl DirectorySink {
    /// `max_height` scales depths onto the 8-bit preview.
    pub fn create<P: AsRef<Path>>(dir: P, max_height: f32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        tracing::info!("Writing results to {}", dir.display());

        Ok(Self {
            depth: BufWriter::new(File::create(dir.join(DEPTH_FILE))?),
            mask: BufWriter::new(File::create(dir.join(MASK_FILE))?),
            likelihood: None,
            dir,
            max_height,
            scalars: ScalarSet::default(),
            flips: Vec::new(),
            crop_size: None,
            preview: None,
            frames: 0,
        })
    }

    pub fn frames_written(&self) -> usize {
        self.frames
    }

    /// Convert a cropped depth frame to an 8-bit grayscale image.
    fn depth_to_gray(depth: &Array2<f32>, max_height: f32) -> GrayImage {
        let (height, width) = depth.dim();
        GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let value = (depth[[y as usize, x as usize]] / max_height * 255.0).clamp(0.0, 255.0) as u8;
            image::Luma([value])
        })
    }
}

impl ResultSink for DirectorySink {
    fn write_chunk(&mut self, result: &ChunkResult, keep: Range<usize>) -> Result<()> {
        let end = keep.end.min(result.len());
        let start = keep.start.min(end);
        let kept = &result.frames()[start..end];
        self.crop_size.get_or_insert(result.crop_size());

        for frame in kept {
            for &v in frame.depth.iter() {
                self.depth.write_all(&v.to_le_bytes())?;
            }
            for &m in frame.mask.iter() {
                self.mask.write_all(&[m as u8])?;
            }
            if let Some(ll) = &frame.likelihood {
                if self.likelihood.is_none() {
                    self.likelihood = Some(BufWriter::new(File::create(self.dir.join(LIKELIHOOD_FILE))?));
                }
                if let Some(writer) = self.likelihood.as_mut() {
                    for &v in ll.iter() {
                        writer.write_all(&v.to_le_bytes())?;
                    }
                }
            }
            if self.preview.is_none() && !frame.features.is_missing() {
                self.preview = Some(frame.depth.clone());
            }
            self.flips.push(frame.flipped);
        }

        self.scalars
            .extend(&ScalarSet::from_rows(kept.iter().map(|f| &f.scalars)));
        self.frames += kept.len();

        tracing::debug!("Wrote {} frames ({} total)", kept.len(), self.frames);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.depth.flush()?;
        self.mask.flush()?;
        if let Some(writer) = self.likelihood.as_mut() {
            writer.flush()?;
        }

        let crop_size = self.crop_size.map_or([0, 0], |c| [c.height, c.width]);
        let summary = ScalarsFile {
            frames: self.frames,
            crop_size,
            scalars: &self.scalars,
            descriptions: scalar_descriptions(),
            flips: self.flips.iter().copied().collect(),
        };
        let file = BufWriter::new(File::create(self.dir.join(SCALARS_FILE))?);
        serde_json::to_writer_pretty(file, &summary)?;

        match &self.preview {
            Some(depth) => {
                Self::depth_to_gray(depth, self.max_height).save(self.dir.join(PREVIEW_FILE))?;
            }
            None => tracing::warn!("No frame with a pose; skipping preview"),
        }

        tracing::info!("Finished writing {} frames to {}", self.frames, self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractConfig;
    use crate::extract::extract_chunk;
    use ndarray::Array3;

    fn blob_result(frames: usize) -> ChunkResult {
        let chunk = Array3::from_shape_fn((frames, 30, 40), |(t, r, c)| {
            if t != 1 && (10..20).contains(&r) && (12..30).contains(&c) {
                50.0
            } else {
                0.0
            }
        });
        let config = ExtractConfig {
            crop_size: [12, 20],
            ..ExtractConfig::default()
        };
        extract_chunk(&chunk, &config, None).unwrap()
    }

    #[test]
    fn writes_kept_frames_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::create(dir.path(), 100.0).unwrap();
        let result = blob_result(4);
        sink.write_chunk(&result, 0..4).unwrap();
        sink.write_chunk(&result, 2..4).unwrap();
        sink.finish().unwrap();

        assert_eq!(sink.frames_written(), 6);
        let depth = fs::read(dir.path().join(DEPTH_FILE)).unwrap();
        assert_eq!(depth.len(), 6 * 12 * 20 * 4);
        let mask = fs::read(dir.path().join(MASK_FILE)).unwrap();
        assert_eq!(mask.len(), 6 * 12 * 20);
        assert!(!dir.path().join(LIKELIHOOD_FILE).exists());
        assert!(dir.path().join(PREVIEW_FILE).exists());
    }

    #[test]
    fn scalars_file_has_nulls_for_missing_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::create(dir.path(), 100.0).unwrap();
        sink.write_chunk(&blob_result(3), 0..3).unwrap();
        sink.finish().unwrap();

        let raw = fs::read_to_string(dir.path().join(SCALARS_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["frames"], 3);
        assert_eq!(json["crop_size"], serde_json::json!([12, 20]));
        assert!(json["flips"].is_null());

        let xs = json["scalars"]["centroid_x_px"].as_array().unwrap();
        assert_eq!(xs.len(), 3);
        assert!(xs[0].is_number());
        assert!(xs[1].is_null());
        assert!(json["descriptions"]["angle"].is_string());
    }

    #[test]
    fn preview_scales_by_max_height() {
        let depth = Array2::from_shape_fn((2, 2), |(r, c)| (r * 2 + c) as f32 * 50.0);
        let gray = DirectorySink::depth_to_gray(&depth, 100.0);
        assert_eq!(gray.get_pixel(0, 0)[0], 0);
        assert_eq!(gray.get_pixel(1, 0)[0], 127);
        assert_eq!(gray.get_pixel(0, 1)[0], 255);
        assert_eq!(gray.get_pixel(1, 1)[0], 255);
    }
}
