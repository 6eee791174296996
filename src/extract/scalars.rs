use super::camera::CameraModel;
use super::types::FrameFeatures;
use ndarray::{Array3, Axis};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;

/// Named per-frame measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarName {
    CentroidXPx,
    CentroidYPx,
    CentroidXMm,
    CentroidYMm,
    LengthPx,
    WidthPx,
    AreaPx,
    LengthMm,
    WidthMm,
    AreaMm,
    HeightAveMm,
    HeightMedianMm,
    Velocity2dPx,
    Velocity3dPx,
    Velocity2dMm,
    Velocity3dMm,
    VelocityTheta,
    AngularVelocity,
    Angle,
}

impl ScalarName {
    pub const ALL: [ScalarName; 19] = [
        ScalarName::CentroidXPx,
        ScalarName::CentroidYPx,
        ScalarName::CentroidXMm,
        ScalarName::CentroidYMm,
        ScalarName::LengthPx,
        ScalarName::WidthPx,
        ScalarName::AreaPx,
        ScalarName::LengthMm,
        ScalarName::WidthMm,
        ScalarName::AreaMm,
        ScalarName::HeightAveMm,
        ScalarName::HeightMedianMm,
        ScalarName::Velocity2dPx,
        ScalarName::Velocity3dPx,
        ScalarName::Velocity2dMm,
        ScalarName::Velocity3dMm,
        ScalarName::VelocityTheta,
        ScalarName::AngularVelocity,
        ScalarName::Angle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarName::CentroidXPx => "centroid_x_px",
            ScalarName::CentroidYPx => "centroid_y_px",
            ScalarName::CentroidXMm => "centroid_x_mm",
            ScalarName::CentroidYMm => "centroid_y_mm",
            ScalarName::LengthPx => "length_px",
            ScalarName::WidthPx => "width_px",
            ScalarName::AreaPx => "area_px",
            ScalarName::LengthMm => "length_mm",
            ScalarName::WidthMm => "width_mm",
            ScalarName::AreaMm => "area_mm",
            ScalarName::HeightAveMm => "height_ave_mm",
            ScalarName::HeightMedianMm => "height_median_mm",
            ScalarName::Velocity2dPx => "velocity_2d_px",
            ScalarName::Velocity3dPx => "velocity_3d_px",
            ScalarName::Velocity2dMm => "velocity_2d_mm",
            ScalarName::Velocity3dMm => "velocity_3d_mm",
            ScalarName::VelocityTheta => "velocity_theta",
            ScalarName::AngularVelocity => "angular_velocity",
            ScalarName::Angle => "angle",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScalarName::CentroidXPx => "X centroid (pixels)",
            ScalarName::CentroidYPx => "Y centroid (pixels)",
            ScalarName::CentroidXMm => "X centroid (mm)",
            ScalarName::CentroidYMm => "Y centroid (mm)",
            ScalarName::LengthPx => "Length of the body ellipse major axis (pixels)",
            ScalarName::WidthPx => "Width of the body ellipse minor axis (pixels)",
            ScalarName::AreaPx => "Area of the body ellipse (pixels)",
            ScalarName::LengthMm => "Length of the body ellipse major axis (mm)",
            ScalarName::WidthMm => "Width of the body ellipse minor axis (mm)",
            ScalarName::AreaMm => "Area of the body ellipse (mm^2)",
            ScalarName::HeightAveMm => "Mean height of pixels within the height bounds (mm)",
            ScalarName::HeightMedianMm => "Median height of pixels within the height bounds (mm)",
            ScalarName::Velocity2dPx => "2D speed of the centroid (pixels per frame)",
            ScalarName::Velocity3dPx => "3D speed of the centroid and mean height (pixels per frame)",
            ScalarName::Velocity2dMm => "2D speed of the centroid (mm per frame)",
            ScalarName::Velocity3dMm => "3D speed of the centroid and mean height (mm per frame)",
            ScalarName::VelocityTheta => "Direction of centroid motion (radians)",
            ScalarName::AngularVelocity => "Change in orientation (radians per frame)",
            ScalarName::Angle => "Orientation after flip correction and unwrapping (radians)",
        }
    }
}

impl Serialize for ScalarName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for ScalarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name → description for every scalar.
pub fn scalar_descriptions() -> BTreeMap<ScalarName, &'static str> {
    ScalarName::ALL.iter().map(|n| (*n, n.description())).collect()
}

/// One frame's worth of scalars.
pub type ScalarRow = BTreeMap<ScalarName, Option<f64>>;

/// Scalar name → per-frame values (length T, `None` where missing).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScalarSet(BTreeMap<ScalarName, Vec<Option<f64>>>);

impl ScalarSet {
    pub fn get(&self, name: ScalarName) -> Option<&[Option<f64>]> {
        self.0.get(&name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = ScalarName> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScalarName, &[Option<f64>])> + '_ {
        self.0.iter().map(|(n, v)| (*n, v.as_slice()))
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.0.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values of every scalar at frame `index`.
    pub fn row(&self, index: usize) -> ScalarRow {
        self.0
            .iter()
            .map(|(name, values)| (*name, values.get(index).copied().flatten()))
            .collect()
    }

    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a ScalarRow>,
    {
        let mut columns: BTreeMap<ScalarName, Vec<Option<f64>>> = BTreeMap::new();
        let mut count = 0usize;
        for row in rows {
            for name in ScalarName::ALL {
                columns
                    .entry(name)
                    .or_insert_with(|| vec![None; count])
                    .push(row.get(&name).copied().flatten());
            }
            count += 1;
        }
        Self(columns)
    }

    /// Append another set's frames after this one's.
    pub fn extend(&mut self, other: &ScalarSet) {
        let count = self.len();
        for (name, values) in &other.0 {
            self.0
                .entry(*name)
                .or_insert_with(|| vec![None; count])
                .extend_from_slice(values);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarParams {
    pub min_height: f32,
    pub max_height: f32,
    pub camera: CameraModel,
    /// `(width, height)` of the uncropped frames.
    pub resolution: (usize, usize),
}

/// Derive every [`ScalarName`] for each frame.
///
/// Height statistics use only cropped pixels inside
/// `[min_height, max_height]`. Velocities difference frame `i-1` and `i`
/// and are missing unless both frames have a pose.
pub fn compute_scalars(
    filtered_cropped: &Array3<f32>,
    features: &[FrameFeatures],
    params: &ScalarParams,
) -> ScalarSet {
    let _span = tracing::debug_span!("compute_scalars").entered();

    let frames = features.len();
    let (mm_x, mm_y) = params.camera.mm_per_px(params.resolution);
    let mut columns: BTreeMap<ScalarName, Vec<Option<f64>>> = ScalarName::ALL
        .iter()
        .map(|n| (*n, vec![None; frames]))
        .collect();
    let mut set = |name: ScalarName, i: usize, value: Option<f64>| {
        if let Some(column) = columns.get_mut(&name) {
            column[i] = value;
        }
    };

    let mut heights: Vec<Option<(f64, f64)>> = Vec::with_capacity(frames);
    let mut in_range = Vec::new();
    for frame in filtered_cropped.axis_iter(Axis(0)) {
        in_range.clear();
        in_range.extend(
            frame
                .iter()
                .copied()
                .filter(|v| (params.min_height..=params.max_height).contains(v)),
        );
        heights.push(height_stats(&mut in_range));
    }
    heights.resize(frames, None);

    let mut positions_mm: Vec<Option<(f64, f64)>> = Vec::with_capacity(frames);
    let mut mean_heights: Vec<Option<f64>> = Vec::with_capacity(frames);

    for (i, feature) in features.iter().enumerate() {
        let Some(pose) = feature.pose else {
            positions_mm.push(None);
            mean_heights.push(None);
            continue;
        };

        let (x_mm, y_mm) = params.camera.px_to_mm(pose.centroid_x, pose.centroid_y, params.resolution);
        let length = pose.major_axis.max(pose.minor_axis);
        let width = pose.major_axis.min(pose.minor_axis);
        let area = PI * length * width / 4.0;

        set(ScalarName::CentroidXPx, i, Some(pose.centroid_x));
        set(ScalarName::CentroidYPx, i, Some(pose.centroid_y));
        set(ScalarName::CentroidXMm, i, Some(x_mm));
        set(ScalarName::CentroidYMm, i, Some(y_mm));
        set(ScalarName::LengthPx, i, Some(length));
        set(ScalarName::WidthPx, i, Some(width));
        set(ScalarName::AreaPx, i, Some(area));
        set(ScalarName::LengthMm, i, Some(length * mm_x));
        set(ScalarName::WidthMm, i, Some(width * mm_y));
        set(ScalarName::AreaMm, i, Some(area * mm_x * mm_y));
        set(ScalarName::Angle, i, Some(pose.orientation));

        let (ave, median) = match heights[i] {
            Some((ave, median)) => (Some(ave), Some(median)),
            None => (None, None),
        };
        set(ScalarName::HeightAveMm, i, ave);
        set(ScalarName::HeightMedianMm, i, median);

        positions_mm.push(Some((x_mm, y_mm)));
        mean_heights.push(ave);
    }

    for i in 1..frames {
        let (Some(prev), Some(curr)) = (features[i - 1].pose, features[i].pose) else {
            continue;
        };
        let (Some(prev_mm), Some(curr_mm)) = (positions_mm[i - 1], positions_mm[i]) else {
            continue;
        };

        let vx = curr.centroid_x - prev.centroid_x;
        let vy = curr.centroid_y - prev.centroid_y;
        let vx_mm = curr_mm.0 - prev_mm.0;
        let vy_mm = curr_mm.1 - prev_mm.1;
        let vz = match (mean_heights[i - 1], mean_heights[i]) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };

        set(ScalarName::Velocity2dPx, i, Some(vx.hypot(vy)));
        set(ScalarName::Velocity2dMm, i, Some(vx_mm.hypot(vy_mm)));
        set(ScalarName::Velocity3dPx, i, vz.map(|vz| (vx * vx + vy * vy + vz * vz).sqrt()));
        set(
            ScalarName::Velocity3dMm,
            i,
            vz.map(|vz| (vx_mm * vx_mm + vy_mm * vy_mm + vz * vz).sqrt()),
        );
        set(ScalarName::VelocityTheta, i, Some(vy.atan2(vx)));
        set(ScalarName::AngularVelocity, i, Some(curr.orientation - prev.orientation));
    }

    ScalarSet(columns)
}

/// `(mean, median)` of the in-range heights, `None` when there are none.
fn height_stats(values: &mut [f32]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64;
    let median = super::denoise::median(values) as f64;
    Some((mean, median))
}
