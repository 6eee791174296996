use crate::error::{ExtractError, Result};
use image::{ImageBuffer, Luma};
use ndarray::Array2;
use std::path::Path;

type Gray16 = ImageBuffer<Luma<u16>, Vec<u16>>;

fn open_gray16(path: &Path, what: &'static str, resolution: (usize, usize)) -> Result<Gray16> {
    let image = image::open(path)?.into_luma16();
    let (width, height) = image.dimensions();
    let found = (height as usize, width as usize);
    let expected = (resolution.1, resolution.0);
    if found != expected {
        return Err(ExtractError::ShapeMismatch {
            what,
            expected,
            found,
        });
    }
    Ok(image)
}

/// Load a background depth image (16-bit grayscale, mm).
///
/// `resolution` is the `(width, height)` of the recording it belongs to.
pub fn load_background<P: AsRef<Path>>(path: P, resolution: (usize, usize)) -> Result<Array2<f32>> {
    let path = path.as_ref();
    tracing::info!("Loading background from {}", path.display());
    let image = open_gray16(path, "background", resolution)?;
    Ok(Array2::from_shape_fn((resolution.1, resolution.0), |(y, x)| {
        image.get_pixel(x as u32, y as u32)[0] as f32
    }))
}

/// Load an ROI mask; any non-zero pixel is inside.
pub fn load_roi<P: AsRef<Path>>(path: P, resolution: (usize, usize)) -> Result<Array2<bool>> {
    let path = path.as_ref();
    tracing::info!("Loading ROI from {}", path.display());
    let image = open_gray16(path, "roi", resolution)?;
    let roi = Array2::from_shape_fn((resolution.1, resolution.0), |(y, x)| {
        image.get_pixel(x as u32, y as u32)[0] != 0
    });
    tracing::debug!("ROI covers {} pixels", roi.iter().filter(|&&p| p).count());
    Ok(roi)
}
