//! Maps mat coordinates into the target (rendering) space.
//!
//! `target = (selected + offset) * scale`, with an independent scale per axis
//! derived from the mat bounds and the target size.

use crate::config::{DrawingConfig, MatBounds, PhysicalDimensions, PositionOffset, TargetSize};
use crate::position::{CoordinateType, PositionSample};
use std::fmt;

/// Axis of a transform, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Horizontal.
    X,
    /// Vertical.
    Y,
}

/// Reasons a [Transform] cannot be built.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    /// The mat bounds have no extent along this axis.
    ZeroSpan(Axis),
    /// Some input was NaN or infinite.
    NonFinite,
    /// Physical or target dimensions must be positive.
    InvalidDimensions,
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::ZeroSpan(axis) => write!(f, "mat bounds have zero span along {:?}", axis),
            TransformError::NonFinite => write!(f, "transform inputs must be finite"),
            TransformError::InvalidDimensions => write!(f, "dimensions must be positive"),
        }
    }
}

impl std::error::Error for TransformError {}

/// An affine mat → target transform. Always holds a valid scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    bounds: MatBounds,
    offset: PositionOffset,
    coordinate_type: CoordinateType,
    physical: PhysicalDimensions,
    target: TargetSize,
    scale_x: f64,
    scale_y: f64,
}

fn scale_for(bounds: &MatBounds, target: &TargetSize) -> Result<(f64, f64), TransformError> {
    let span_x = bounds.bottom_right.x - bounds.top_left.x;
    let span_y = bounds.bottom_right.y - bounds.top_left.y;
    if !(span_x.is_finite() && span_y.is_finite()) {
        return Err(TransformError::NonFinite);
    }
    if span_x == 0.0 {
        return Err(TransformError::ZeroSpan(Axis::X));
    }
    if span_y == 0.0 {
        return Err(TransformError::ZeroSpan(Axis::Y));
    }
    if !(target.width.is_finite() && target.height.is_finite()) {
        return Err(TransformError::NonFinite);
    }
    if target.width <= 0.0 || target.height <= 0.0 {
        return Err(TransformError::InvalidDimensions);
    }
    Ok((target.width / span_x, target.height / span_y))
}

impl Transform {
    /// Build a transform from the drawing configuration.
    pub fn new(config: &DrawingConfig) -> Result<Self, TransformError> {
        let (scale_x, scale_y) = scale_for(&config.mat_bounds, &config.target_size)?;
        let physical = config.physical_dimensions;
        if !(physical.width > 0.0 && physical.height > 0.0) {
            return Err(TransformError::InvalidDimensions);
        }
        if !(config.position_offset.x.is_finite() && config.position_offset.y.is_finite()) {
            return Err(TransformError::NonFinite);
        }
        Ok(Self {
            bounds: config.mat_bounds,
            offset: config.position_offset,
            coordinate_type: config.coordinate_type,
            physical,
            target: config.target_size,
            scale_x,
            scale_y,
        })
    }

    /// Replace the mat bounds and recompute the scale. On error the transform
    /// is left unchanged.
    pub fn set_bounds(&mut self, bounds: MatBounds) -> Result<(), TransformError> {
        let (scale_x, scale_y) = scale_for(&bounds, &self.target)?;
        self.bounds = bounds;
        self.scale_x = scale_x;
        self.scale_y = scale_y;
        Ok(())
    }

    /// Replace the target size and recompute the scale. On error the
    /// transform is left unchanged.
    pub fn set_target_size(&mut self, width: f64, height: f64) -> Result<(), TransformError> {
        let target = TargetSize { width, height };
        let (scale_x, scale_y) = scale_for(&self.bounds, &target)?;
        self.target = target;
        self.scale_x = scale_x;
        self.scale_y = scale_y;
        Ok(())
    }

    /// `(scale_x, scale_y)` currently in effect.
    pub fn scale(&self) -> (f64, f64) {
        (self.scale_x, self.scale_y)
    }

    /// Which coordinates of a sample are mapped.
    pub fn coordinate_type(&self) -> CoordinateType {
        self.coordinate_type
    }

    /// Switch between center and sensor coordinates.
    pub fn set_coordinate_type(&mut self, coordinate_type: CoordinateType) {
        self.coordinate_type = coordinate_type;
    }

    /// Size of the space being drawn into.
    pub fn target_size(&self) -> TargetSize {
        self.target
    }

    /// Transform a bare mat coordinate.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x + self.offset.x) * self.scale_x,
            (y + self.offset.y) * self.scale_y,
        )
    }

    /// Transform a sample using the configured coordinate type.
    pub fn sample_to_target(&self, sample: &PositionSample) -> (f64, f64) {
        to_target_space(sample, self.coordinate_type, self)
    }

    /// The largest `(width, height)` with the mat's physical aspect ratio that
    /// fits inside the available area.
    pub fn display_fit(&self, available_width: f64, available_height: f64) -> (f64, f64) {
        let aspect = self.physical.width / self.physical.height;
        let mut width = available_width;
        let mut height = width / aspect;
        if height > available_height {
            height = available_height;
            width = height * aspect;
        }
        (width, height)
    }
}

/// Map a sample into target space using the coordinates picked by
/// `coordinate_type`.
pub fn to_target_space(
    sample: &PositionSample,
    coordinate_type: CoordinateType,
    transform: &Transform,
) -> (f64, f64) {
    let (x, y, _angle) = sample.select(coordinate_type);
    transform.apply(x as f64, y as f64)
}
