mod directory;

pub use directory::DirectorySink;

use crate::error::Result;
use crate::extract::ChunkResult;
use std::ops::Range;

/// Trait for extraction result destinations
pub trait ResultSink {
    /// Persist frames `keep` (chunk-relative) of an extracted chunk
    fn write_chunk(&mut self, result: &ChunkResult, keep: Range<usize>) -> Result<()>;

    /// Flush everything still buffered
    fn finish(&mut self) -> Result<()>;
}
