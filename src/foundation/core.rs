use chrono::{DateTime, Utc};
use image::RgbaImage;

use crate::foundation::error::{RideviewError, RideviewResult};

pub use kurbo::{BezPath, Point, Vec2};

/// Pixel size of a rendered window (map viewport, info panel, video canvas).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn validate(self, what: &str) -> RideviewResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RideviewError::validation(format!(
                "{what} width/height must be non-zero"
            )));
        }
        Ok(())
    }

    /// Encoders targeting yuv420p need even dimensions.
    pub fn validate_even(self, what: &str) -> RideviewResult<()> {
        self.validate(what)?;
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(RideviewError::validation(format!(
                "{what} width/height must be even, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    pub fn center(self) -> Point {
        Point::new(f64::from(self.width) / 2.0, f64::from(self.height) / 2.0)
    }
}

/// One rendered image pinned to the telemetry time it represents.
#[derive(Clone, Debug)]
pub struct Frame {
    pub timestamp: DateTime<Utc>,
    pub image: RgbaImage,
}

impl Frame {
    pub fn new(timestamp: DateTime<Utc>, image: RgbaImage) -> Self {
        Self { timestamp, image }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_validation() {
        assert!(Size::new(0, 10).validate("viewport").is_err());
        assert!(Size::new(480, 640).validate_even("viewport").is_ok());
        assert!(Size::new(481, 640).validate_even("viewport").is_err());
    }

    #[test]
    fn center_is_half_extent() {
        let c = Size::new(480, 640).center();
        assert_eq!((c.x, c.y), (240.0, 320.0));
    }
}
