use super::types::{FrameFeatures, FramePose};
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureParams {
    /// Height above which a filtered pixel is foreground.
    pub frame_threshold: f32,
    /// Log-likelihood above which a pixel is foreground when a likelihood
    /// mask is supplied.
    pub mask_threshold: f32,
    /// Keep only the largest 8-connected component of each frame.
    pub use_connected_components: bool,
}

/// Foreground mask and pose for every frame of the chunk.
///
/// A pixel is foreground when `filtered > frame_threshold`, and with a
/// likelihood mask also `likelihood > mask_threshold`.
pub fn extract_features(
    filtered: &Array3<f32>,
    params: &FeatureParams,
    likelihood: Option<&Array3<f32>>,
) -> (Vec<FrameFeatures>, Array3<bool>) {
    let _span = tracing::debug_span!("extract_features", tracked = likelihood.is_some()).entered();

    let mut mask = filtered.mapv(|v| v > params.frame_threshold);
    if let Some(ll) = likelihood {
        Zip::from(&mut mask)
            .and(ll)
            .for_each(|m, &v| *m = *m && v > params.mask_threshold);
    }

    let mut features = Vec::with_capacity(mask.len_of(Axis(0)));
    for mut frame_mask in mask.axis_iter_mut(Axis(0)) {
        if params.use_connected_components {
            let largest = largest_component(frame_mask.view());
            frame_mask.assign(&largest);
        }
        features.push(moment_features(frame_mask.view()));
    }

    let missing = features.iter().filter(|f| f.is_missing()).count();
    if missing > 0 {
        tracing::debug!("{} of {} frames have no foreground", missing, features.len());
    }

    (features, mask)
}

/// Centroid, orientation and ellipse axes from the second moments of a
/// binary mask.
pub fn moment_features(mask: ArrayView2<bool>) -> FrameFeatures {
    let mut m00 = 0.0;
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    for ((r, c), &on) in mask.indexed_iter() {
        if on {
            m00 += 1.0;
            m10 += c as f64;
            m01 += r as f64;
        }
    }

    if m00 == 0.0 {
        return FrameFeatures::missing();
    }

    let cx = m10 / m00;
    let cy = m01 / m00;

    let (mut mu20, mut mu02, mut mu11) = (0.0, 0.0, 0.0);
    for ((r, c), &on) in mask.indexed_iter() {
        if on {
            let dx = c as f64 - cx;
            let dy = r as f64 - cy;
            mu20 += dx * dx;
            mu02 += dy * dy;
            mu11 += dx * dy;
        }
    }

    let num = 2.0 * mu11;
    let den = mu20 - mu02;
    let common = (num * num + den * den).sqrt();
    let axis = |sign: f64| 2.0 * 2f64.sqrt() * ((mu20 + mu02 + sign * common).max(0.0) / m00).sqrt();

    FrameFeatures {
        pose: Some(FramePose {
            centroid_x: cx,
            centroid_y: cy,
            // Image y points down, so negate to read counter-clockwise.
            orientation: -0.5 * num.atan2(den),
            major_axis: axis(1.0),
            minor_axis: axis(-1.0),
            area: m00,
        }),
        foreground_pixels: m00 as usize,
    }
}

/// Largest 8-connected component of `mask`; ties go to the first component
/// found in raster order.
pub fn largest_component(mask: ArrayView2<bool>) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut best: Option<(u32, usize)> = None;
    let mut next_label = 0u32;
    let mut stack = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] || labels[[r, c]] != 0 {
                continue;
            }
            next_label += 1;
            labels[[r, c]] = next_label;
            stack.push((r, c));
            let mut size = 0usize;

            while let Some((y, x)) = stack.pop() {
                size += 1;
                for dy in -1isize..=1 {
                    for dx in -1isize..=1 {
                        let ny = y as isize + dy;
                        let nx = x as isize + dx;
                        if ny < 0 || nx < 0 || ny as usize >= rows || nx as usize >= cols {
                            continue;
                        }
                        let (ny, nx) = (ny as usize, nx as usize);
                        if mask[[ny, nx]] && labels[[ny, nx]] == 0 {
                            labels[[ny, nx]] = next_label;
                            stack.push((ny, nx));
                        }
                    }
                }
            }

            if best.map_or(true, |(_, best_size)| size > best_size) {
                best = Some((next_label, size));
            }
        }
    }

    match best {
        Some((label, _)) => labels.mapv(|l| l == label),
        None => Array2::from_elem((rows, cols), false),
    }
}
