use super::types::{CropSize, FrameFeatures};
use ndarray::{Array2, Array3, ArrayView2, Axis};

/// Pixel types the aligner can resample.
pub trait CropSample: Copy + Default {
    /// Value of `frame` at sub-pixel position `(x, y)`; `Default` outside.
    fn sample(frame: &ArrayView2<Self>, x: f64, y: f64) -> Self;
}

impl CropSample for f32 {
    /// Bilinear interpolation with zero padding.
    fn sample(frame: &ArrayView2<f32>, x: f64, y: f64) -> f32 {
        let (rows, cols) = frame.dim();
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let at = |yy: f64, xx: f64| -> f64 {
            if yy < 0.0 || xx < 0.0 || yy >= rows as f64 || xx >= cols as f64 {
                0.0
            } else {
                frame[[yy as usize, xx as usize]] as f64
            }
        };

        let top = at(y0, x0) * (1.0 - fx) + at(y0, x0 + 1.0) * fx;
        let bottom = at(y0 + 1.0, x0) * (1.0 - fx) + at(y0 + 1.0, x0 + 1.0) * fx;
        (top * (1.0 - fy) + bottom * fy) as f32
    }
}

impl CropSample for bool {
    /// Nearest neighbour; masks must stay binary.
    fn sample(frame: &ArrayView2<bool>, x: f64, y: f64) -> bool {
        let (rows, cols) = frame.dim();
        let xr = x.round();
        let yr = y.round();
        if yr < 0.0 || xr < 0.0 || yr >= rows as f64 || xr >= cols as f64 {
            return false;
        }
        frame[[yr as usize, xr as usize]]
    }
}

/// Extract a `crop_size` window per frame, centred on the frame's centroid
/// and rotated so the principal axis runs along the output rows.
///
/// The same pose is used for every source the pipeline crops, which keeps
/// the cropped raw, filtered, mask and likelihood arrays pixel-aligned.
/// Frames without a pose come out all-default.
pub fn crop_and_rotate<T: CropSample>(
    source: &Array3<T>,
    features: &[FrameFeatures],
    crop_size: CropSize,
) -> Array3<T> {
    let frames = source.len_of(Axis(0));
    let mut out = Array3::from_elem((frames, crop_size.height, crop_size.width), T::default());

    for ((frame, feature), mut target) in source
        .axis_iter(Axis(0))
        .zip(features)
        .zip(out.axis_iter_mut(Axis(0)))
    {
        if let Some(pose) = feature.pose {
            target.assign(&crop_frame(
                frame,
                pose.centroid_x,
                pose.centroid_y,
                pose.orientation,
                crop_size,
            ));
        }
    }

    out
}

/// Single-frame crop around `(cx, cy)` with the given orientation.
pub fn crop_frame<T: CropSample>(
    frame: ArrayView2<T>,
    cx: f64,
    cy: f64,
    orientation: f64,
    crop_size: CropSize,
) -> Array2<T> {
    let (sin, cos) = orientation.sin_cos();
    let half_w = (crop_size.width as f64 - 1.0) / 2.0;
    let half_h = (crop_size.height as f64 - 1.0) / 2.0;

    Array2::from_shape_fn((crop_size.height, crop_size.width), |(i, j)| {
        let u = j as f64 - half_w;
        let v = i as f64 - half_h;
        let x = cx + u * cos + v * sin;
        let y = cy - u * sin + v * cos;
        T::sample(&frame, x, y)
    })
}
