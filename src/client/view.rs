//! Pan/zoom transform between device pixels and image-relative percent

use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::store::ValidationError;

pub const MIN_SCALE: f64 = 0.3;
pub const MAX_SCALE: f64 = 5.0;

const WHEEL_IN: f64 = 1.1;
const WHEEL_OUT: f64 = 0.9;
const STEP_IN: f64 = 1.3;
const STEP_OUT: f64 = 0.7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Natural size of the background image in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

impl ImageSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Check both dimensions are finite and positive
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (axis, value) in [("image width", self.width), ("image height", self.height)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ValidationError::InvalidImageSize { axis, value });
            }
        }
        Ok(())
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::new(1000.0, 1000.0)
    }
}

/// Current pan offset and zoom factor of the map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub pan: Point,
    pub scale: f64,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            pan: Point::default(),
            scale: 1.0,
        }
    }
}

impl ViewTransform {
    /// Device pixel position -> percent of the image (unclamped)
    pub fn to_percent(&self, pixel: Point, image: ImageSize) -> Point {
        let local = pixel - self.pan;
        Point::new(
            local.x / self.scale / image.width * 100.0,
            local.y / self.scale / image.height * 100.0,
        )
    }

    /// Percent of the image -> device pixel position
    pub fn to_pixel(&self, percent: Point, image: ImageSize) -> Point {
        Point::new(
            percent.x / 100.0 * image.width * self.scale,
            percent.y / 100.0 * image.height * self.scale,
        ) + self.pan
    }

    pub fn zoom_by(&mut self, factor: f64) {
        self.scale = (self.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
    }

    /// Scroll-wheel zoom; scrolling down zooms out
    pub fn wheel(&mut self, delta_y: f64) {
        self.zoom_by(if delta_y > 0.0 { WHEEL_OUT } else { WHEEL_IN });
    }

    pub fn zoom_in(&mut self) {
        self.zoom_by(STEP_IN);
    }

    pub fn zoom_out(&mut self) {
        self.zoom_by(STEP_OUT);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Zoom level as a whole percentage, for display
    pub fn zoom_percent(&self) -> u32 {
        (self.scale * 100.0).round() as u32
    }
}
