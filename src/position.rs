//! The plain data that flows through the whole system: what a cube reports
//! about itself, who reported it, and what we ask the cube to drive to.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// The current wall-clock time as a [Timestamp].
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Identifies one connected cube.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human readable advertised name, also the key of the device's trace.
    pub device_name: String,
    /// Transport-level identifier, unique per connection.
    pub device_id: String,
}

impl DeviceInfo {
    /// Convenience constructor.
    pub fn new(device_name: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            device_id: device_id.into(),
        }
    }
}

/// The six fields of a "position id" packet, exactly as the cube sends them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CubePosition {
    /// Center x.
    pub center_x: u16,
    /// Center y.
    pub center_y: u16,
    /// Degrees.
    pub center_angle: u16,
    /// Sensor x.
    pub sensor_x: u16,
    /// Sensor y.
    pub sensor_y: u16,
    /// Degrees.
    pub sensor_angle: u16,
}

/// Which of the two coordinate triples of a reading we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoordinateType {
    /// The cube's own estimate of its center.
    Center,
    /// The spot read by the downward optical sensor.
    #[default]
    Sensor,
}

/// One telemetry reading, tagged with its device and arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSample {
    /// Center x.
    pub center_x: u16,
    /// Center y.
    pub center_y: u16,
    /// Degrees, 0..360.
    pub center_angle: u16,
    /// Sensor x.
    pub sensor_x: u16,
    /// Sensor y.
    pub sensor_y: u16,
    /// Degrees, 0..360.
    pub sensor_angle: u16,
    /// Id of the device.
    pub device_id: String,
    /// Name of the device.
    pub device_name: String,
    /// A `true` entry is the last point of a stroke; the next sample starts a
    /// new one.
    pub is_end_of_line: bool,
    /// Milliseconds since the epoch when the sample arrived.
    pub timestamp: Timestamp,
}

impl PositionSample {
    /// Attach a device and a timestamp to a raw position.
    pub fn from_position(position: CubePosition, device: &DeviceInfo, timestamp: Timestamp) -> Self {
        Self {
            center_x: position.center_x,
            center_y: position.center_y,
            center_angle: position.center_angle,
            sensor_x: position.sensor_x,
            sensor_y: position.sensor_y,
            sensor_angle: position.sensor_angle,
            device_id: device.device_id.clone(),
            device_name: device.device_name.clone(),
            is_end_of_line: false,
            timestamp,
        }
    }

    /// The raw position this sample was built from.
    pub fn position(&self) -> CubePosition {
        CubePosition {
            center_x: self.center_x,
            center_y: self.center_y,
            center_angle: self.center_angle,
            sensor_x: self.sensor_x,
            sensor_y: self.sensor_y,
            sensor_angle: self.sensor_angle,
        }
    }

    /// The `(x, y, angle)` triple selected by `coordinate_type`.
    pub fn select(&self, coordinate_type: CoordinateType) -> (u16, u16, u16) {
        match coordinate_type {
            CoordinateType::Center => (self.center_x, self.center_y, self.center_angle),
            CoordinateType::Sensor => (self.sensor_x, self.sensor_y, self.sensor_angle),
        }
    }

    /// The device that produced this sample.
    pub fn device(&self) -> DeviceInfo {
        DeviceInfo::new(self.device_name.clone(), self.device_id.clone())
    }
}

/// One node of a motion plan sent to the cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetPoint {
    /// X coordinate.
    pub x: u16,
    /// Y coordinate.
    pub y: u16,
    /// Heading in degrees.
    pub angle: u16,
    /// Last point of a stroke.
    pub is_end_of_line: bool,
}

impl TargetPoint {
    /// Build a target from a sample, picking center or sensor coordinates.
    pub fn from_sample(sample: &PositionSample, coordinate_type: CoordinateType) -> Self {
        let (x, y, angle) = sample.select(coordinate_type);
        Self {
            x,
            y,
            angle,
            is_end_of_line: sample.is_end_of_line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PositionSample {
        let pos = CubePosition {
            center_x: 709,
            center_y: 383,
            center_angle: 306,
            sensor_x: 700,
            sensor_y: 386,
            sensor_angle: 300,
        };
        PositionSample::from_position(pos, &DeviceInfo::new("toio-X1y", "id-1"), 42)
    }

    #[test]
    fn select_picks_the_right_triple() {
        let s = sample();
        assert_eq!(s.select(CoordinateType::Center), (709, 383, 306));
        assert_eq!(s.select(CoordinateType::Sensor), (700, 386, 300));
    }

    #[test]
    fn target_keeps_end_of_line() {
        let mut s = sample();
        s.is_end_of_line = true;
        let t = TargetPoint::from_sample(&s, CoordinateType::Center);
        assert_eq!(
            t,
            TargetPoint {
                x: 709,
                y: 383,
                angle: 306,
                is_end_of_line: true
            }
        );
    }

    #[test]
    fn position_round_trips_through_sample() {
        let s = sample();
        assert_eq!(PositionSample::from_position(s.position(), &s.device(), 42), s);
    }
}
