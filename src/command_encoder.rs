//! Builds motor command frames and parses the cube's responses to them.
//!
//! A multi-target move frame is an 8 byte header followed by six bytes per
//! target:
//!
//! | Offset  | Size | Field                                 |
//! |---------|------|---------------------------------------|
//! | 0       | 1    | control type, `0x04`                  |
//! | 1       | 1    | control id, `0x00`                    |
//! | 2       | 1    | timeout in seconds, `0x05`            |
//! | 3       | 1    | movement type, `0x02`                 |
//! | 4       | 1    | max speed, `0x50`                     |
//! | 5       | 1    | speed change type, `0x00`             |
//! | 6       | 1    | reserved, `0x00`                      |
//! | 7       | 1    | `0x01` if more frames follow, else `0x00` |
//! | 8 + 6i  | 2    | target i X, little-endian             |
//! | 10 + 6i | 2    | target i Y, little-endian             |
//! | 12 + 6i | 2    | target i angle, little-endian         |

use crate::position::TargetPoint;
use nom::{combinator::map, number::complete::le_u8, sequence::tuple, IResult};
use std::fmt;

/// Control type of a multi-target move.
pub const CONTROL_TYPE_MULTI_TARGET: u8 = 0x04;
/// Control id written into every frame; acks echo it back.
pub const CONTROL_ID: u8 = 0x00;
/// Seconds the cube keeps trying before it gives up on a target.
pub const TIMEOUT_SECONDS: u8 = 0x05;
/// Turn towards each target first, then move.
pub const MOVEMENT_TYPE: u8 = 0x02;
/// Top speed for the whole move.
pub const MAX_SPEED: u8 = 0x50;
/// Constant speed.
pub const SPEED_CHANGE_TYPE: u8 = 0x00;

/// Bytes before the first target.
pub const HEADER_LEN: usize = 8;
/// Bytes per target.
pub const TARGET_LEN: usize = 6;

/// Targets per frame unless configured otherwise.
pub const DEFAULT_TARGETS_PER_FRAME: usize = 2;

/// Response to a single-target move.
pub const RESPONSE_SINGLE_TARGET: u8 = 0x83;
/// Response to a multi-target move; the one we wait for.
pub const RESPONSE_MULTI_TARGET: u8 = 0x84;
/// Speed information notification.
pub const RESPONSE_SPEED_INFO: u8 = 0xE0;

/// Every control type the motor characteristic may notify with.
pub const RESPONSE_TYPES: [u8; 3] = [
    RESPONSE_SINGLE_TARGET,
    RESPONSE_MULTI_TARGET,
    RESPONSE_SPEED_INFO,
];

/// Why a frame could not be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// A frame needs at least one target.
    Empty,
    /// More targets than fit in one frame.
    TooManyTargets {
        /// Targets passed in.
        given: usize,
        /// Targets a frame may hold.
        max: usize,
    },
    /// A chunk size of zero.
    InvalidCap,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::Empty => write!(f, "no targets to encode"),
            EncodeError::TooManyTargets { given, max } => {
                write!(f, "{} targets given, a frame holds at most {}", given, max)
            }
            EncodeError::InvalidCap => write!(f, "targets per frame must be at least 1"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Encode one multi-target move frame of up to
/// [DEFAULT_TARGETS_PER_FRAME] targets. `continues` sets the continuation
/// flag telling the cube that another frame follows this one.
pub fn encode(targets: &[TargetPoint], continues: bool) -> Result<Vec<u8>, EncodeError> {
    encode_with_cap(targets, continues, DEFAULT_TARGETS_PER_FRAME)
}

/// [encode] with an explicit frame capacity.
pub fn encode_with_cap(
    targets: &[TargetPoint],
    continues: bool,
    max_per_frame: usize,
) -> Result<Vec<u8>, EncodeError> {
    if max_per_frame == 0 {
        return Err(EncodeError::InvalidCap);
    }
    if targets.is_empty() {
        return Err(EncodeError::Empty);
    }
    if targets.len() > max_per_frame {
        return Err(EncodeError::TooManyTargets {
            given: targets.len(),
            max: max_per_frame,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + TARGET_LEN * targets.len());
    frame.extend_from_slice(&[
        CONTROL_TYPE_MULTI_TARGET,
        CONTROL_ID,
        TIMEOUT_SECONDS,
        MOVEMENT_TYPE,
        MAX_SPEED,
        SPEED_CHANGE_TYPE,
        0x00,
        u8::from(continues),
    ]);
    for target in targets {
        frame.extend_from_slice(&target.x.to_le_bytes());
        frame.extend_from_slice(&target.y.to_le_bytes());
        frame.extend_from_slice(&target.angle.to_le_bytes());
    }
    Ok(frame)
}

/// Partition `targets` into frames of `max_per_frame`, in order. The last
/// chunk may be shorter.
pub fn split_targets(
    targets: &[TargetPoint],
    max_per_frame: usize,
) -> Result<Vec<&[TargetPoint]>, EncodeError> {
    if max_per_frame == 0 {
        return Err(EncodeError::InvalidCap);
    }
    Ok(targets.chunks(max_per_frame).collect())
}

/// Execution status reported in a motor response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success = 0x00,
    /// The cube gave up on its own timeout; not the same as us not hearing back.
    Timeout = 0x01,
    /// The cube lost the mat.
    Stopped = 0x02,
    TargetUnreachable = 0x03,
    InvalidParameter = 0x04,
    InternalError = 0x05,
    InvalidTarget = 0x06,
    WriteRejected = 0x07,
}

impl TryFrom<u8> for StatusCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => StatusCode::Success,
            0x01 => StatusCode::Timeout,
            0x02 => StatusCode::Stopped,
            0x03 => StatusCode::TargetUnreachable,
            0x04 => StatusCode::InvalidParameter,
            0x05 => StatusCode::InternalError,
            0x06 => StatusCode::InvalidTarget,
            0x07 => StatusCode::WriteRejected,
            other => return Err(other),
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            StatusCode::Success => "success",
            StatusCode::Timeout => "timed out on the cube",
            StatusCode::Stopped => "stopped, toio ID missed",
            StatusCode::TargetUnreachable => "target unreachable",
            StatusCode::InvalidParameter => "invalid parameter",
            StatusCode::InternalError => "internal error",
            StatusCode::InvalidTarget => "invalid target",
            StatusCode::WriteRejected => "write rejected",
        };
        write!(f, "{} (0x{:02x})", msg, *self as u8)
    }
}

/// A motor response: `(control type, control id, status)`. The status is kept
/// raw since speed info notifications reuse the layout for other data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorResponse {
    /// Control type this responds to.
    pub control_type: u8,
    /// Control id of the frame being answered.
    pub control_id: u8,
    /// Result byte; see [StatusCode].
    pub status: u8,
}

impl MotorResponse {
    /// The status as a [StatusCode], or the raw byte if it is not one.
    pub fn status_code(&self) -> Result<StatusCode, u8> {
        StatusCode::try_from(self.status)
    }
}

fn parse_response(input: &[u8]) -> IResult<&[u8], MotorResponse> {
    map(
        tuple((le_u8, le_u8, le_u8)),
        |(control_type, control_id, status)| MotorResponse {
            control_type,
            control_id,
            status,
        },
    )(input)
}

/// Parse a motor characteristic notification. Anything shorter than three
/// bytes is not a response.
pub fn parse_motor_response(buffer: &[u8]) -> Option<MotorResponse> {
    parse_response(buffer).ok().map(|(_, response)| response)
}
