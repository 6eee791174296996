//! Depth-video extraction: denoise raw depth frames of an animal in an arena,
//! track it through occlusions, crop and align it, fix head/tail flips and
//! derive per-frame kinematic scalars.

pub mod capture;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;

pub use config::ExtractConfig;
pub use error::{ExtractError, Result};
pub use extract::{extract_chunk, ChunkExtractor, ChunkResult};
