//! Runtime configuration. Every value has a documented default, so a config
//! file only needs to mention what it changes. Files are [ron], e.g.
//!
//! ```text
//! (
//!     drawing: (coordinate_type: Center, target_size: (width: 1280, height: 720)),
//!     cache: (flush_interval_ms: 2000),
//! )
//! ```

use crate::position::CoordinateType;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, fs::File, io::Read, path::Path, time::Duration};

/// A point in mat coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatPoint {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

/// The two opposing corners of the play mat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatBounds {
    /// Smallest coordinates on the mat.
    pub top_left: MatPoint,
    /// Largest coordinates on the mat.
    pub bottom_right: MatPoint,
}

impl Default for MatBounds {
    fn default() -> Self {
        Self {
            top_left: MatPoint { x: 90.0, y: 130.0 },
            bottom_right: MatPoint { x: 410.0, y: 370.0 },
        }
    }
}

/// A correction added to every coordinate before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionOffset {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Default for PositionOffset {
    fn default() -> Self {
        Self { x: -90.0, y: -130.0 }
    }
}

/// Physical size of the mat, in millimetres. Only the aspect ratio matters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalDimensions {
    /// Millimetres.
    pub width: f64,
    /// Millimetres.
    pub height: f64,
}

impl Default for PhysicalDimensions {
    fn default() -> Self {
        // A3
        Self {
            width: 420.0,
            height: 297.0,
        }
    }
}

/// Size of the space we render into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetSize {
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Default for TargetSize {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

/// Everything the coordinate pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawingConfig {
    /// Corners of the mat the cube moves on.
    pub mat_bounds: MatBounds,
    /// Added to raw coordinates before scaling.
    pub position_offset: PositionOffset,
    /// Which coordinates of a sample are drawn.
    pub coordinate_type: CoordinateType,
    /// Real size of the drawing, used for its aspect ratio.
    pub physical_dimensions: PhysicalDimensions,
    /// Size of the space drawn into.
    pub target_size: TargetSize,
}

/// Stroke cache tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How often pending samples are written to durable storage.
    pub flush_interval_ms: u64,
    /// Per-device in-memory cap that forces an early flush, and the length
    /// every durable trace is cut down to when storage runs out.
    pub max_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 5000,
            max_cache_size: 1000,
        }
    }
}

impl CacheConfig {
    /// [CacheConfig::flush_interval_ms] as a [Duration].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Motor command settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// Upper bound on targets packed into one command frame.
    pub max_targets_per_frame: usize,
    /// How long to wait for each acknowledgment.
    pub ack_timeout_ms: u64,
    /// Which coordinates of a stored trace the cube is driven to.
    pub coordinate_type: CoordinateType,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            max_targets_per_frame: 2,
            ack_timeout_ms: 5000,
            coordinate_type: CoordinateType::Center,
        }
    }
}

impl MotorConfig {
    /// [MotorConfig::ack_timeout_ms] as a [Duration].
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// On-screen replay pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Pause between replay steps.
    pub step_interval_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            step_interval_ms: 50,
        }
    }
}

impl ReplayConfig {
    /// [ReplayConfig::step_interval_ms] as a [Duration].
    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }
}

/// The complete configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeConfig {
    /// Coordinate pipeline.
    pub drawing: DrawingConfig,
    /// Stroke cache tuning.
    pub cache: CacheConfig,
    /// Driving the cube.
    pub motor: MotorConfig,
    /// Replay pacing.
    pub replay: ReplayConfig,
}

/// Things that go wrong while loading a [CubeConfig].
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    IoError(std::io::Error),
    /// The file is not valid RON for a [CubeConfig].
    RonSpannedError(ron::de::SpannedError),
    /// A value parsed but makes no sense.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ConfigError::IoError(error) => Cow::from(format!("io error: {}", error)),
            ConfigError::RonSpannedError(error) => Cow::from(format!("ron error: {}", error)),
            ConfigError::Invalid(why) => Cow::from(format!("invalid config: {}", why)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl CubeConfig {
    /// Start from the defaults and override selectively.
    pub fn builder() -> CubeConfigBuilder {
        CubeConfigBuilder::default()
    }

    /// Read a config from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut handle = File::open(path).map_err(ConfigError::IoError)?;
        Self::from_reader(&mut handle)
    }

    /// Read a config from the [Read]able object provided.
    pub fn from_reader(reader: &mut impl Read) -> Result<Self, ConfigError> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw).map_err(ConfigError::IoError)?;
        let config: CubeConfig =
            ron::de::from_bytes(&raw).map_err(ConfigError::RonSpannedError)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the rest of the system cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.motor.max_targets_per_frame == 0 {
            return Err(ConfigError::Invalid("max_targets_per_frame must be at least 1"));
        }
        if self.cache.max_cache_size == 0 {
            return Err(ConfigError::Invalid("max_cache_size must be at least 1"));
        }
        if self.cache.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("flush_interval_ms must be positive"));
        }
        Ok(())
    }
}

/// Builder for [CubeConfig]. Anything not set keeps its default.
#[derive(Debug, Clone, Default)]
pub struct CubeConfigBuilder {
    config: CubeConfig,
}

impl CubeConfigBuilder {
    /// Mat corners as `(x, y)` pairs.
    pub fn mat_bounds(mut self, top_left: (f64, f64), bottom_right: (f64, f64)) -> Self {
        self.config.drawing.mat_bounds = MatBounds {
            top_left: MatPoint {
                x: top_left.0,
                y: top_left.1,
            },
            bottom_right: MatPoint {
                x: bottom_right.0,
                y: bottom_right.1,
            },
        };
        self
    }

    /// Added to raw coordinates before scaling.
    pub fn position_offset(mut self, x: f64, y: f64) -> Self {
        self.config.drawing.position_offset = PositionOffset { x, y };
        self
    }

    /// Coordinates used for drawing.
    pub fn coordinate_type(mut self, coordinate_type: CoordinateType) -> Self {
        self.config.drawing.coordinate_type = coordinate_type;
        self
    }

    /// Real mat size; only the ratio matters.
    pub fn physical_dimensions(mut self, width: f64, height: f64) -> Self {
        self.config.drawing.physical_dimensions = PhysicalDimensions { width, height };
        self
    }

    /// Size of the space drawn into.
    pub fn target_size(mut self, width: f64, height: f64) -> Self {
        self.config.drawing.target_size = TargetSize { width, height };
        self
    }

    /// How often the auto-flush worker runs.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.cache.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Per-device buffer size that forces a flush.
    pub fn max_cache_size(mut self, max_cache_size: usize) -> Self {
        self.config.cache.max_cache_size = max_cache_size;
        self
    }

    /// Upper bound on targets per command frame.
    pub fn max_targets_per_frame(mut self, max: usize) -> Self {
        self.config.motor.max_targets_per_frame = max;
        self
    }

    /// How long to wait for each ack.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.motor.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Coordinates a stored trace is driven back along.
    pub fn replay_coordinate_type(mut self, coordinate_type: CoordinateType) -> Self {
        self.config.motor.coordinate_type = coordinate_type;
        self
    }

    /// Pause between replay steps.
    pub fn replay_step_interval(mut self, interval: Duration) -> Self {
        self.config.replay.step_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Finish building, checking the result.
    pub fn build(self) -> Result<CubeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
