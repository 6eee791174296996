mod raw;
mod reference;

pub use raw::RawDepthReader;
pub use reference::{load_background, load_roi};

use crate::error::{ExtractError, Result};
use ndarray::Array3;
use std::ops::Range;

/// Trait for depth frame sources
pub trait FrameSource {
    /// Total number of frames available
    fn frame_count(&self) -> usize;

    /// `(width, height)` of every frame
    fn resolution(&self) -> (usize, usize);

    /// Read frames `range` as a `(T, H, W)` chunk in mm.
    /// The range is clamped to the available frames.
    fn read_frames(&mut self, range: Range<usize>) -> Result<Array3<f32>>;
}

/// One chunk of a recording and the part of it to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Absolute frame range to read.
    pub range: Range<usize>,
    /// Chunk-relative frames to retain; excludes the leading overlap on
    /// every chunk but the first.
    pub keep: Range<usize>,
}

impl ChunkPlan {
    /// Absolute frame indices of the kept frames.
    pub fn kept_frames(&self) -> Range<usize> {
        self.range.start + self.keep.start..self.range.start + self.keep.end
    }
}

/// Split `nframes` into overlapping chunks of `chunk_size` frames.
///
/// Chunks start every `chunk_size - overlap` frames and are truncated at
/// `nframes`; stitching the `keep` ranges covers every frame exactly once.
/// A recording no longer than `overlap` becomes a single chunk.
pub fn plan_chunks(nframes: usize, chunk_size: usize, overlap: usize) -> Result<Vec<ChunkPlan>> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(ExtractError::config(format!(
            "chunk overlap ({overlap}) must be smaller than a non-zero chunk size ({chunk_size})"
        )));
    }
    if nframes == 0 {
        return Ok(Vec::new());
    }

    let step = chunk_size - overlap;
    let mut plans: Vec<ChunkPlan> = (0..nframes.saturating_sub(overlap))
        .step_by(step)
        .map(|start| {
            let end = (start + chunk_size).min(nframes);
            let skip = if start == 0 { 0 } else { overlap };
            ChunkPlan {
                range: start..end,
                keep: skip..end - start,
            }
        })
        .collect();

    if plans.is_empty() {
        plans.push(ChunkPlan {
            range: 0..nframes,
            keep: 0..nframes,
        });
    }

    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_batches() {
        let plans = plan_chunks(25, 10, 5).unwrap();
        let ranges: Vec<_> = plans.iter().map(|p| p.range.clone()).collect();
        assert_eq!(ranges, vec![0..10, 5..15, 10..20, 15..25]);
        assert_eq!(plans[0].keep, 0..10);
        assert_eq!(plans[1].keep, 5..10);
    }

    #[test]
    fn kept_frames_cover_everything_once() {
        for (n, size, overlap) in [(25, 10, 5), (1000, 300, 60), (7, 3, 1), (11, 4, 0)] {
            let mut covered = Vec::new();
            for plan in plan_chunks(n, size, overlap).unwrap() {
                covered.extend(plan.kept_frames());
            }
            assert_eq!(covered, (0..n).collect::<Vec<_>>(), "n={n} size={size} overlap={overlap}");
        }
    }

    #[test]
    fn short_recording_is_one_chunk() {
        let plans = plan_chunks(3, 1000, 60).unwrap();
        assert_eq!(plans, vec![ChunkPlan { range: 0..3, keep: 0..3 }]);
        assert!(plan_chunks(0, 10, 5).unwrap().is_empty());
    }

    #[test]
    fn overlap_must_be_below_chunk_size() {
        assert!(matches!(plan_chunks(10, 5, 5), Err(ExtractError::Configuration(_))));
        assert!(plan_chunks(10, 0, 0).is_err());
    }
}
