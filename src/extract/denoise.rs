use super::strel::StructuringElement;
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};

/// Parameters of the frame denoiser.
#[derive(Debug, Clone)]
pub struct DenoiseParams {
    /// Spatial median kernel sizes (odd), applied smallest first.
    pub spatial_kernel_sizes: Vec<usize>,
    /// Temporal median window (odd). `None` disables the temporal pass.
    pub temporal_window: Option<usize>,
    pub tail_strel: StructuringElement,
    pub tail_iterations: usize,
    pub min_strel: StructuringElement,
    pub min_iterations: usize,
}

/// Spatial median, temporal median, then morphological closing (tail) and
/// opening (min). Output has the input's shape.
pub fn denoise(chunk: &Array3<f32>, params: &DenoiseParams) -> Array3<f32> {
    let _span = tracing::debug_span!("denoise", frames = chunk.len_of(Axis(0))).entered();

    let mut sizes = params.spatial_kernel_sizes.clone();
    sizes.sort_unstable();

    let mut filtered = chunk.to_owned();
    for mut frame in filtered.axis_iter_mut(Axis(0)) {
        let mut current = frame.to_owned();
        for &size in &sizes {
            if size > 1 {
                current = median_blur(current.view(), size);
            }
        }
        frame.assign(&current);
    }

    if let Some(window) = params.temporal_window {
        if window > 1 {
            filtered = temporal_median(&filtered, window);
        }
    }

    for mut frame in filtered.axis_iter_mut(Axis(0)) {
        let mut current = frame.to_owned();
        if params.tail_iterations > 0 {
            current = close(current.view(), &params.tail_strel, params.tail_iterations);
        }
        if params.min_iterations > 0 {
            current = open(current.view(), &params.min_strel, params.min_iterations);
        }
        frame.assign(&current);
    }

    filtered
}

/// Square median filter with replicated borders.
pub fn median_blur(frame: ArrayView2<f32>, size: usize) -> Array2<f32> {
    let (rows, cols) = frame.dim();
    let half = (size / 2) as isize;
    let mut window = Vec::with_capacity(size * size);

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        window.clear();
        for dy in -half..=half {
            let y = clamp_index(r as isize + dy, rows);
            for dx in -half..=half {
                let x = clamp_index(c as isize + dx, cols);
                window.push(frame[[y, x]]);
            }
        }
        median(&mut window)
    })
}

/// Median along the time axis over a centred window of `window` frames.
///
/// The window shrinks at the chunk edges instead of reading outside the
/// chunk, so a window longer than the chunk degrades to a smaller one.
pub fn temporal_median(chunk: &Array3<f32>, window: usize) -> Array3<f32> {
    let frames = chunk.len_of(Axis(0));
    let half = window / 2;
    let mut out = chunk.to_owned();
    let mut samples = Vec::with_capacity(window);

    for t in 0..frames {
        let start = t.saturating_sub(half);
        let end = (t + half + 1).min(frames);
        let span = chunk.slice(ndarray::s![start..end, .., ..]);
        let mut target = out.index_axis_mut(Axis(0), t);

        for ((r, c), value) in target.indexed_iter_mut() {
            samples.clear();
            samples.extend(span.index_axis(Axis(2), c).index_axis(Axis(1), r).iter().copied());
            *value = median(&mut samples);
        }
    }

    out
}

/// Grayscale dilation: maximum over the footprint, out-of-frame pixels
/// ignored.
pub fn dilate(frame: ArrayView2<f32>, strel: &StructuringElement) -> Array2<f32> {
    morph(frame, strel, f32::NEG_INFINITY, f32::max)
}

/// Grayscale erosion: minimum over the footprint, out-of-frame pixels
/// ignored.
pub fn erode(frame: ArrayView2<f32>, strel: &StructuringElement) -> Array2<f32> {
    morph(frame, strel, f32::INFINITY, f32::min)
}

/// `iterations` dilations followed by as many erosions.
pub fn close(frame: ArrayView2<f32>, strel: &StructuringElement, iterations: usize) -> Array2<f32> {
    let mut out = frame.to_owned();
    for _ in 0..iterations {
        out = dilate(out.view(), strel);
    }
    for _ in 0..iterations {
        out = erode(out.view(), strel);
    }
    out
}

/// `iterations` erosions followed by as many dilations.
pub fn open(frame: ArrayView2<f32>, strel: &StructuringElement, iterations: usize) -> Array2<f32> {
    let mut out = frame.to_owned();
    for _ in 0..iterations {
        out = erode(out.view(), strel);
    }
    for _ in 0..iterations {
        out = dilate(out.view(), strel);
    }
    out
}

fn morph(
    frame: ArrayView2<f32>,
    strel: &StructuringElement,
    identity: f32,
    combine: fn(f32, f32) -> f32,
) -> Array2<f32> {
    let (rows, cols) = frame.dim();
    let mut out = Array2::<f32>::zeros((rows, cols));

    Zip::indexed(&mut out).for_each(|(r, c), value| {
        let mut acc = identity;
        for &(dy, dx) in strel.offsets() {
            let y = r as isize + dy;
            let x = c as isize + dx;
            if y >= 0 && x >= 0 && (y as usize) < rows && (x as usize) < cols {
                acc = combine(acc, frame[[y as usize, x as usize]]);
            }
        }
        // A footprint entirely outside the frame leaves the pixel as is.
        *value = if acc.is_finite() { acc } else { frame[[r, c]] };
    });

    out
}

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Median of `values`, averaging the two middle samples for even counts.
/// Reorders `values`.
pub(crate) fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let len = values.len();
    let mid = len / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *upper;
    if len % 2 == 1 {
        return upper;
    }
    let below = lower.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    (below + upper) / 2.0
}
