use serde::Serialize;

use crate::vision::coordinates::CoordinateShape;

/// A point in source-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in source-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    /// Per-axis min/max over `points`; `None` if there are none.
    #[must_use]
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let init = Self {
            x_min: first.x,
            y_min: first.y,
            x_max: first.x,
            y_max: first.y,
        };
        Some(points.iter().skip(1).fold(init, |b, p| Self {
            x_min: b.x_min.min(p.x),
            y_min: b.y_min.min(p.y),
            x_max: b.x_max.max(p.x),
            y_max: b.y_max.max(p.y),
        }))
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }
}

/// One labelled shape recovered from a token stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinateResult {
    pub label: String,
    pub shape: CoordinateShape,
    pub vertices: Vec<Point>,
    pub bounding_box: BoundingBox,
}

/// Post-processed output of a finished sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DecodeOutput {
    Text(String),
    Coordinates(Vec<CoordinateResult>),
}
