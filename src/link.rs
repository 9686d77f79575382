//! The wireless link to one cube.
//!
//! Pairing and service discovery happen elsewhere; by the time we get a
//! [Link] it is connected and can write, notify, and read characteristics.

use std::{fmt, sync::Arc};

/// UUID of the cube's primary service.
pub const CUBE_SERVICE_UUID: &str = "10b20100-5b3b-4571-9508-cf3efcd7bbae";

/// The characteristics of the cube service we know how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Characteristic {
    /// Motor control; command frames go here and acks come back as notifications.
    Motor,
    /// Position telemetry from the mat reader.
    IdSensor,
    /// Posture (Euler angles).
    Posture,
    /// Cube configuration.
    Configuration,
}

impl Characteristic {
    /// Every characteristic the cube service exposes.
    pub const ALL: [Characteristic; 4] = [
        Characteristic::Motor,
        Characteristic::IdSensor,
        Characteristic::Posture,
        Characteristic::Configuration,
    ];

    /// The characteristic's UUID within the cube service.
    pub fn uuid(&self) -> &'static str {
        match self {
            Characteristic::Motor => "10b20102-5b3b-4571-9508-cf3efcd7bbae",
            Characteristic::IdSensor => "10b20101-5b3b-4571-9508-cf3efcd7bbae",
            Characteristic::Posture => "10b20106-5b3b-4571-9508-cf3efcd7bbae",
            Characteristic::Configuration => "10b201ff-5b3b-4571-9508-cf3efcd7bbae",
        }
    }

    /// Look a characteristic up by UUID (case-insensitive).
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.uuid().eq_ignore_ascii_case(uuid))
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Failures a [Link] reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The device is gone.
    Disconnected,
    /// The device does not expose this characteristic.
    UnknownCharacteristic(Characteristic),
    /// Unsubscribing from something we never subscribed to.
    NotSubscribed(Characteristic),
    /// Whatever the underlying transport reported.
    Transport(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Disconnected => write!(f, "device disconnected"),
            LinkError::UnknownCharacteristic(c) => write!(f, "no {} characteristic", c),
            LinkError::NotSubscribed(c) => write!(f, "not subscribed to {}", c),
            LinkError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for LinkError {}

/// Called with the payload of every notification on a subscribed
/// characteristic. May be called from any thread.
pub type NotifyHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A connected cube.
pub trait Link: Send + Sync {
    /// Identifier assigned by the transport.
    fn device_id(&self) -> &str;
    /// Advertised device name.
    fn device_name(&self) -> &str;
    /// UUIDs of every characteristic the device exposes.
    fn characteristics(&self) -> Result<Vec<String>, LinkError>;
    /// Write one buffer to a characteristic.
    fn write(&self, characteristic: Characteristic, data: &[u8]) -> Result<(), LinkError>;
    /// Start notifications, replacing any previous handler.
    fn subscribe(&self, characteristic: Characteristic, on_notify: NotifyHandler)
        -> Result<(), LinkError>;
    /// Stop notifications.
    fn unsubscribe(&self, characteristic: Characteristic) -> Result<(), LinkError>;
    /// Read the current value once.
    fn read_once(&self, characteristic: Characteristic) -> Result<Vec<u8>, LinkError>;
    /// Drop the connection.
    fn disconnect(&self) -> Result<(), LinkError>;
}
