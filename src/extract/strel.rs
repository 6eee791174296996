use crate::error::{ExtractError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Footprint shape of a structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrelShape {
    Ellipse,
    #[serde(alias = "rect")]
    Rectangle,
}

impl FromStr for StrelShape {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ellipse" => Ok(Self::Ellipse),
            "rectangle" | "rect" => Ok(Self::Rectangle),
            other => Err(ExtractError::config(format!(
                "unknown structuring element shape '{other}'"
            ))),
        }
    }
}

/// Immutable morphological kernel, anchored at its centre.
///
/// Built once per pipeline configuration through [`StructuringElement::new`];
/// the footprint is stored as `(dy, dx)` offsets from the anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuringElement {
    shape: StrelShape,
    width: usize,
    height: usize,
    offsets: Vec<(isize, isize)>,
}

impl StructuringElement {
    pub fn new(shape: StrelShape, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ExtractError::config(format!(
                "structuring element size must be positive, got {width}x{height}"
            )));
        }

        let anchor_y = (height / 2) as isize;
        let anchor_x = (width / 2) as isize;
        let mut offsets = Vec::with_capacity(width * height);

        for i in 0..height {
            let (start, end) = match shape {
                StrelShape::Rectangle => (0, width),
                StrelShape::Ellipse => match ellipse_row_span(i, width, height) {
                    Some(span) => span,
                    None => continue,
                },
            };
            for j in start..end {
                offsets.push((i as isize - anchor_y, j as isize - anchor_x));
            }
        }

        Ok(Self {
            shape,
            width,
            height,
            offsets,
        })
    }

    /// Parse the shape by name, e.g. `"ellipse"` or `"rect"`.
    pub fn from_name(name: &str, width: usize, height: usize) -> Result<Self> {
        Self::new(name.parse()?, width, height)
    }

    pub fn shape(&self) -> StrelShape {
        self.shape
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn offsets(&self) -> &[(isize, isize)] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Column span `[start, end)` covered by row `i` of an elliptic footprint,
/// using the same raster rule as OpenCV's `MORPH_ELLIPSE`.
fn ellipse_row_span(i: usize, width: usize, height: usize) -> Option<(usize, usize)> {
    let r = (height / 2) as f64;
    let c = (width / 2) as f64;
    let inv_r2 = if r > 0.0 { 1.0 / (r * r) } else { 0.0 };

    let dy = i as f64 - r;
    if dy.abs() > r {
        return None;
    }

    let dx = (c * ((r * r - dy * dy) * inv_r2).sqrt()).round();
    let start = (c - dx).max(0.0) as usize;
    let end = ((c + dx + 1.0) as usize).min(width);
    Some((start, end))
}
