use super::FrameSource;
use crate::error::{ExtractError, Result};
use ndarray::Array3;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

const BYTES_PER_PIXEL: usize = 2;

/// Reader for headerless depth recordings: little-endian `u16` millimetres,
/// frames of `height x width` stored back to back.
pub struct RawDepthReader {
    reader: BufReader<File>,
    width: usize,
    height: usize,
    frame_count: usize,
}

impl RawDepthReader {
    pub fn open<P: AsRef<Path>>(path: P, width: usize, height: usize) -> Result<Self> {
        let path = path.as_ref();
        if width == 0 || height == 0 {
            return Err(ExtractError::config(format!(
                "frame size must be non-zero, got {width}x{height}"
            )));
        }

        tracing::info!("Opening raw depth file {} ({}x{})", path.display(), width, height);

        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        let frame_bytes = width * height * BYTES_PER_PIXEL;
        if len % frame_bytes != 0 {
            return Err(ExtractError::ShapeMismatch {
                what: "raw depth file",
                expected: (height, width),
                found: (len / (width * BYTES_PER_PIXEL), width),
            });
        }

        let frame_count = len / frame_bytes;
        tracing::info!("Raw depth file holds {} frames", frame_count);

        Ok(Self {
            reader: BufReader::new(file),
            width,
            height,
            frame_count,
        })
    }

    fn frame_bytes(&self) -> usize {
        self.width * self.height * BYTES_PER_PIXEL
    }
}

impl FrameSource for RawDepthReader {
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn read_frames(&mut self, range: Range<usize>) -> Result<Array3<f32>> {
        let end = range.end.min(self.frame_count);
        let start = range.start.min(end);
        let frames = end - start;

        self.reader
            .seek(SeekFrom::Start((start * self.frame_bytes()) as u64))?;
        let mut bytes = vec![0u8; frames * self.frame_bytes()];
        self.reader.read_exact(&mut bytes)?;

        let values: Vec<f32> = bytes
            .chunks_exact(BYTES_PER_PIXEL)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]) as f32)
            .collect();

        Array3::from_shape_vec((frames, self.height, self.width), values).map_err(|e| {
            ExtractError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_frames(frames: usize, width: usize, height: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".dat").tempfile().unwrap();
        for t in 0..frames {
            for p in 0..width * height {
                let v = (t * 1000 + p) as u16;
                file.write_all(&v.to_le_bytes()).unwrap();
            }
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn reads_back_written_frames() {
        let file = write_frames(4, 5, 3);
        let mut reader = RawDepthReader::open(file.path(), 5, 3).unwrap();
        assert_eq!(reader.frame_count(), 4);
        assert_eq!(reader.resolution(), (5, 3));

        let chunk = reader.read_frames(1..3).unwrap();
        assert_eq!(chunk.dim(), (2, 3, 5));
        assert_eq!(chunk[[0, 0, 0]], 1000.0);
        assert_eq!(chunk[[1, 2, 4]], 2014.0);
    }

    #[test]
    fn range_is_clamped() {
        let file = write_frames(3, 4, 2);
        let mut reader = RawDepthReader::open(file.path(), 4, 2).unwrap();
        assert_eq!(reader.read_frames(2..10).unwrap().dim(), (1, 2, 4));
        assert_eq!(reader.read_frames(5..10).unwrap().dim(), (0, 2, 4));
    }

    #[test]
    fn partial_frame_is_a_shape_error() {
        let file = write_frames(2, 4, 2);
        let result = RawDepthReader::open(file.path(), 5, 2);
        assert!(matches!(result, Err(ExtractError::ShapeMismatch { .. })));
    }
}
