//! Decodes notifications from the cube's ID sensor characteristic.
//!
//! Every buffer is little-endian and starts with a type byte:
//!
//! | Offset | Type | Content                 |
//! |--------|------|-------------------------|
//! | 0      | u8   | `0x01` (position id)    |
//! | 1      | u16  | center X                |
//! | 3      | u16  | center Y                |
//! | 5      | u16  | center angle (degrees)  |
//! | 7      | u16  | sensor X                |
//! | 9      | u16  | sensor Y                |
//! | 11     | u16  | sensor angle (degrees)  |
//!
//! A leading `0x03` ("position missed") means the cube was lifted off the mat
//! or otherwise lost track of where it is. Anything else, including a
//! truncated position packet, is ignored: partial notifications are a fact of
//! life on a lossy radio link.

use crate::position::{CubePosition, DeviceInfo, PositionSample, Timestamp};
use log::trace;
use nom::{
    bytes::complete::tag,
    combinator::map,
    number::complete::le_u16,
    sequence::{preceded, tuple},
    IResult,
};

/// Type byte of a position packet.
pub const POSITION_ID: u8 = 0x01;

/// Type byte of a "position missed" packet.
pub const POSITION_MISSED: u8 = 0x03;

/// Length of a complete position packet.
pub const POSITION_ID_LEN: usize = 13;

/// What a single notification told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// A fresh position reading.
    Sample(PositionSample),
    /// The cube with this device id lost its position.
    Lost(String),
}

fn parse_position_id(input: &[u8]) -> IResult<&[u8], CubePosition> {
    map(
        preceded(
            tag(&[POSITION_ID][..]),
            tuple((le_u16, le_u16, le_u16, le_u16, le_u16, le_u16)),
        ),
        |(center_x, center_y, center_angle, sensor_x, sensor_y, sensor_angle)| CubePosition {
            center_x,
            center_y,
            center_angle,
            sensor_x,
            sensor_y,
            sensor_angle,
        },
    )(input)
}

/// Pull the raw position fields out of a position packet, if it is one.
/// Trailing bytes past the thirteenth are ignored.
pub fn decode_position(buffer: &[u8]) -> Option<CubePosition> {
    parse_position_id(buffer).ok().map(|(_rest, position)| position)
}

/// Decode one notification from `device`, stamping samples with `timestamp`.
///
/// Stateless, so it may be called for any device from any thread.
pub fn decode(buffer: &[u8], device: &DeviceInfo, timestamp: Timestamp) -> Option<TelemetryEvent> {
    match buffer.first().copied()? {
        POSITION_ID => match decode_position(buffer) {
            Some(position) => Some(TelemetryEvent::Sample(PositionSample::from_position(
                position, device, timestamp,
            ))),
            None => {
                trace!(
                    "{}: dropping truncated position packet ({} bytes)",
                    device.device_id,
                    buffer.len()
                );
                None
            }
        },
        POSITION_MISSED => Some(TelemetryEvent::Lost(device.device_id.clone())),
        other => {
            trace!("{}: ignoring packet type {:#04x}", device.device_id, other);
            None
        }
    }
}

/// Encode a position the way the cube would send it. Used by the simulator
/// and handy for building test packets.
pub fn encode_position(position: &CubePosition) -> Vec<u8> {
    let mut buf = Vec::with_capacity(POSITION_ID_LEN);
    buf.push(POSITION_ID);
    for field in [
        position.center_x,
        position.center_y,
        position.center_angle,
        position.sensor_x,
        position.sensor_y,
        position.sensor_angle,
    ] {
        buf.extend_from_slice(&field.to_le_bytes());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC_PACKET: [u8; 13] = [
        0x01, 0xC5, 0x02, 0x7F, 0x01, 0x32, 0x01, 0xBC, 0x02, 0x82, 0x01, 0x32, 0x01,
    ];

    fn device() -> DeviceInfo {
        DeviceInfo::new("toio-A1b", "dev-a")
    }

    #[test]
    fn decodes_documented_packet() {
        let event = decode(&DOC_PACKET, &device(), 1000).unwrap();
        let TelemetryEvent::Sample(s) = event else {
            panic!("expected a sample, got {:?}", event);
        };
        assert_eq!(s.center_x, 709);
        assert_eq!(s.center_y, 383);
        assert_eq!(s.center_angle, 306);
        assert_eq!(s.sensor_x, 700);
        assert_eq!(s.sensor_y, 386);
        assert_eq!(s.sensor_angle, 306);
        assert_eq!(s.device_id, "dev-a");
        assert_eq!(s.device_name, "toio-A1b");
        assert_eq!(s.timestamp, 1000);
        assert!(!s.is_end_of_line);
    }

    #[test]
    fn extra_trailing_bytes_are_ignored() {
        let mut buf = DOC_PACKET.to_vec();
        buf.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(decode_position(&buf), decode_position(&DOC_PACKET));
    }

    #[test]
    fn truncated_position_packets_yield_nothing() {
        for len in 0..POSITION_ID_LEN {
            assert_eq!(decode(&DOC_PACKET[..len], &device(), 0), None, "len {}", len);
        }
    }

    #[test]
    fn missed_packet_is_lost_regardless_of_length() {
        assert_eq!(
            decode(&[0x03], &device(), 0),
            Some(TelemetryEvent::Lost("dev-a".to_owned()))
        );
        assert_eq!(
            decode(&[0x03, 0, 0, 0, 0], &device(), 0),
            Some(TelemetryEvent::Lost("dev-a".to_owned()))
        );
    }

    #[test]
    fn unknown_types_yield_nothing() {
        let mut buf = DOC_PACKET;
        for kind in [0x00u8, 0x02, 0x04, 0x7F, 0xFF] {
            buf[0] = kind;
            assert_eq!(decode(&buf, &device(), 0), None, "type {:#04x}", kind);
        }
    }

    #[test]
    fn encode_matches_documented_layout() {
        let pos = decode_position(&DOC_PACKET).unwrap();
        assert_eq!(encode_position(&pos), DOC_PACKET.to_vec());
    }
}
