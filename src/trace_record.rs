//! The stored layout of a trace.
//!
//! A trace is a list of records, each split into four groups:
//!
//! ```text
//! [
//!   (
//!     position: (x: 709, y: 383, angle: 306, sensorX: 700, sensorY: 386, sensorAngle: 306),
//!     penStyle: (mode: Pen, color: "#000000", alpha: 1.0, lineWidth: 3.0),
//!     deviceInfo: (deviceName: "toio-A1b", deviceId: "dev-a"),
//!     metadata: (timestamp: 1700000000000, sessionId: "session_...", isEndOfLine: false),
//!   ),
//! ]
//! ```
//!
//! Encoded with [serde] and [ron]. `penStyle` and `sessionId` may be absent
//! in older data and fall back to defaults.

use crate::position::{DeviceInfo, PositionSample, Timestamp};
use serde::{Deserialize, Serialize};

/// The `position` group of a record: center and sensor readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPosition {
    /// Center x.
    pub x: u16,
    /// Center y.
    pub y: u16,
    /// Center heading.
    pub angle: u16,
    /// Sensor x.
    pub sensor_x: u16,
    /// Sensor y.
    pub sensor_y: u16,
    /// Sensor heading, degrees.
    pub sensor_angle: u16,
}

/// Pen or eraser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PenMode {
    /// Draws with the style's colour.
    #[default]
    Pen,
    /// Paints white over what is there.
    Eraser,
}

/// How a stroke should look when it is drawn back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PenStyle {
    /// Pen or eraser.
    pub mode: PenMode,
    /// CSS style colour.
    pub color: String,
    /// Opacity, 0 to 1.
    pub alpha: f64,
    /// Line width in target-space pixels.
    pub line_width: f64,
}

impl Default for PenStyle {
    fn default() -> Self {
        Self {
            mode: PenMode::Pen,
            color: "#000000".to_owned(),
            alpha: 1.0,
            line_width: 3.0,
        }
    }
}

/// The `metadata` group of a record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    /// Epoch milliseconds.
    pub timestamp: Timestamp,
    /// Session the record was taken in.
    #[serde(default)]
    pub session_id: String,
    /// Last point of a stroke.
    pub is_end_of_line: bool,
}

/// One stored sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    /// The `position` group.
    pub position: StoredPosition,
    /// Style at the time the sample was recorded.
    #[serde(default)]
    pub pen_style: PenStyle,
    /// The `deviceInfo` group.
    pub device_info: DeviceInfo,
    /// The `metadata` group.
    pub metadata: RecordMetadata,
}

impl TraceRecord {
    /// Wrap a live sample with the pen style and session it was recorded in.
    pub fn new(sample: &PositionSample, pen_style: PenStyle, session_id: &str) -> Self {
        Self {
            position: StoredPosition {
                x: sample.center_x,
                y: sample.center_y,
                angle: sample.center_angle,
                sensor_x: sample.sensor_x,
                sensor_y: sample.sensor_y,
                sensor_angle: sample.sensor_angle,
            },
            pen_style,
            device_info: sample.device(),
            metadata: RecordMetadata {
                timestamp: sample.timestamp,
                session_id: session_id.to_owned(),
                is_end_of_line: sample.is_end_of_line,
            },
        }
    }

    /// Back to the in-memory sample form.
    pub fn to_sample(&self) -> PositionSample {
        PositionSample {
            center_x: self.position.x,
            center_y: self.position.y,
            center_angle: self.position.angle,
            sensor_x: self.position.sensor_x,
            sensor_y: self.position.sensor_y,
            sensor_angle: self.position.sensor_angle,
            device_id: self.device_info.device_id.clone(),
            device_name: self.device_info.device_name.clone(),
            is_end_of_line: self.metadata.is_end_of_line,
            timestamp: self.metadata.timestamp,
        }
    }
}

/// Serialize a whole trace.
pub fn encode_trace(records: &[TraceRecord]) -> Result<Vec<u8>, ron::Error> {
    ron::ser::to_string(records).map(String::into_bytes)
}

/// Parse a whole trace.
pub fn decode_trace(bytes: &[u8]) -> Result<Vec<TraceRecord>, ron::de::SpannedError> {
    ron::de::from_bytes(bytes)
}
