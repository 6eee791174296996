use serde::{Deserialize, Serialize};

/// Pinhole approximation of the depth camera, used to express pixel
/// coordinates in millimetres at the arena floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    /// Horizontal and vertical field of view, degrees.
    #[serde(default = "default_field_of_view")]
    pub field_of_view: [f64; 2],
    /// Camera-to-floor distance, mm.
    #[serde(default = "default_true_depth")]
    pub true_depth: f64,
}

fn default_field_of_view() -> [f64; 2] {
    [70.6, 60.0]
}

fn default_true_depth() -> f64 {
    673.1
}

impl Default for CameraModel {
    fn default() -> Self {
        Self {
            field_of_view: default_field_of_view(),
            true_depth: default_true_depth(),
        }
    }
}

impl CameraModel {
    /// Focal lengths `(fx, fy)` in pixels for a `(width, height)` sensor.
    fn focal_lengths(&self, resolution: (usize, usize)) -> (f64, f64) {
        let (width, height) = resolution;
        let fx = width as f64 / (2.0 * (self.field_of_view[0] / 2.0).to_radians());
        let fy = height as f64 / (2.0 * (self.field_of_view[1] / 2.0).to_radians());
        (fx, fy)
    }

    /// Pixel `(x, y)` to mm relative to the image centre.
    pub fn px_to_mm(&self, x: f64, y: f64, resolution: (usize, usize)) -> (f64, f64) {
        let (fx, fy) = self.focal_lengths(resolution);
        let cx = (resolution.0 / 2) as f64;
        let cy = (resolution.1 / 2) as f64;
        (
            self.true_depth * (x - cx) / fx,
            self.true_depth * (y - cy) / fy,
        )
    }

    /// Millimetres spanned by one pixel along x and y.
    pub fn mm_per_px(&self, resolution: (usize, usize)) -> (f64, f64) {
        let (fx, fy) = self.focal_lengths(resolution);
        (self.true_depth / fx, self.true_depth / fy)
    }
}
