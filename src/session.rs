//! Connected cubes and the characteristics we found on each.

use crate::link::{Characteristic, Link, LinkError};
use crate::position::DeviceInfo;
use log::{info, warn};
use std::{collections::HashMap, fmt, sync::Arc};

/// Failures while managing cube sessions.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// An operation needed at least one connected cube.
    NoDevices,
    /// The device lacks a characteristic we cannot work without.
    MissingCharacteristic {
        /// Id of the device.
        device_id: String,
        /// The characteristic that is missing.
        characteristic: Characteristic,
    },
    /// No session with this device id.
    UnknownDevice(String),
    /// The link to a device failed.
    Link {
        /// Id of the device.
        device_id: String,
        /// The underlying error.
        source: LinkError,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoDevices => write!(f, "no cubes connected"),
            SessionError::MissingCharacteristic {
                device_id,
                characteristic,
            } => write!(f, "{} has no {} characteristic", device_id, characteristic),
            SessionError::UnknownDevice(id) => write!(f, "no connected cube with id {}", id),
            SessionError::Link { device_id, source } => write!(f, "{}: {}", device_id, source),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Link { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A characteristic discovered on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    /// Which characteristic this is.
    pub characteristic: Characteristic,
    /// The UUID exactly as the device reported it.
    pub uuid: String,
}

/// One connected cube.
pub struct DeviceSession {
    link: Arc<dyn Link>,
    device: DeviceInfo,
    motor: CharacteristicHandle,
    id_sensor: CharacteristicHandle,
    posture: Option<CharacteristicHandle>,
    configuration: Option<CharacteristicHandle>,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.device)
            .field("motor", &self.motor)
            .field("id_sensor", &self.id_sensor)
            .field("posture", &self.posture)
            .field("configuration", &self.configuration)
            .finish()
    }
}

impl DeviceSession {
    /// Look up the cube's characteristics. The motor and ID sensor
    /// characteristics are required.
    pub fn open(link: Arc<dyn Link>) -> Result<Self, SessionError> {
        let device = DeviceInfo::new(link.device_name(), link.device_id());
        let uuids = link.characteristics().map_err(|source| SessionError::Link {
            device_id: device.device_id.clone(),
            source,
        })?;

        let mut found: HashMap<Characteristic, CharacteristicHandle> = uuids
            .into_iter()
            .filter_map(|uuid| {
                Characteristic::from_uuid(&uuid).map(|characteristic| {
                    (
                        characteristic,
                        CharacteristicHandle {
                            characteristic,
                            uuid,
                        },
                    )
                })
            })
            .collect();

        let mut require = |characteristic: Characteristic| {
            found
                .remove(&characteristic)
                .ok_or_else(|| SessionError::MissingCharacteristic {
                    device_id: device.device_id.clone(),
                    characteristic,
                })
        };
        let motor = require(Characteristic::Motor)?;
        let id_sensor = require(Characteristic::IdSensor)?;

        Ok(Self {
            posture: found.remove(&Characteristic::Posture),
            configuration: found.remove(&Characteristic::Configuration),
            link,
            device,
            motor,
            id_sensor,
        })
    }

    /// Name and id of the cube.
    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Id of the cube.
    pub fn device_id(&self) -> &str {
        &self.device.device_id
    }

    /// The link to the cube.
    pub fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }

    /// The motor characteristic.
    pub fn motor(&self) -> &CharacteristicHandle {
        &self.motor
    }

    /// The ID sensor characteristic.
    pub fn id_sensor(&self) -> &CharacteristicHandle {
        &self.id_sensor
    }

    /// The posture characteristic, when the cube has one.
    pub fn posture(&self) -> Option<&CharacteristicHandle> {
        self.posture.as_ref()
    }

    /// The configuration characteristic, when the cube has one.
    pub fn configuration(&self) -> Option<&CharacteristicHandle> {
        self.configuration.as_ref()
    }
}

/// Every connected cube, keyed by device id, in connection order.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, DeviceSession>,
    order: Vec<String>,
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `link` and keep it. Reconnecting a device id that is
    /// already known replaces the old session.
    pub fn connect(&mut self, link: Arc<dyn Link>) -> Result<&DeviceSession, SessionError> {
        let session = DeviceSession::open(link)?;
        let id = session.device_id().to_owned();
        info!("connected {} ({})", session.device().device_name, id);
        if self.sessions.insert(id.clone(), session).is_some() {
            warn!("{} reconnected, replacing its session", id);
        } else {
            self.order.push(id.clone());
        }
        self.get(&id)
    }

    /// Disconnect and forget one device.
    pub fn disconnect(&mut self, device_id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .remove(device_id)
            .ok_or_else(|| SessionError::UnknownDevice(device_id.to_owned()))?;
        self.order.retain(|id| id != device_id);
        info!("disconnecting {}", device_id);
        session.link.disconnect().map_err(|source| SessionError::Link {
            device_id: device_id.to_owned(),
            source,
        })
    }

    /// Disconnect everything. Every device is tried; the failures are returned.
    pub fn disconnect_all(&mut self) -> Vec<SessionError> {
        let ids = self.order.clone();
        ids.iter()
            .filter_map(|id| self.disconnect(id).err())
            .collect()
    }

    /// The session of `device_id`.
    pub fn get(&self, device_id: &str) -> Result<&DeviceSession, SessionError> {
        self.sessions
            .get(device_id)
            .ok_or_else(|| SessionError::UnknownDevice(device_id.to_owned()))
    }

    /// The first device connected that is still around.
    pub fn first(&self) -> Result<&DeviceSession, SessionError> {
        self.order
            .first()
            .and_then(|id| self.sessions.get(id))
            .ok_or(SessionError::NoDevices)
    }

    /// Sessions in connection order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceSession> {
        self.order.iter().filter_map(|id| self.sessions.get(id))
    }

    /// Number of connected cubes.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no cube is connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockLink;

    #[test]
    fn open_requires_motor_and_id_sensor() {
        let mut link = MockLink::new("dev-a", "toio-A");
        link.exposed = vec![Characteristic::Motor, Characteristic::Posture];
        let err = DeviceSession::open(Arc::new(link)).unwrap_err();
        assert_eq!(
            err,
            SessionError::MissingCharacteristic {
                device_id: "dev-a".to_owned(),
                characteristic: Characteristic::IdSensor
            }
        );

        let mut link = MockLink::new("dev-b", "toio-B");
        link.exposed = vec![Characteristic::IdSensor, Characteristic::Motor];
        let session = DeviceSession::open(Arc::new(link)).unwrap();
        assert_eq!(session.device(), &DeviceInfo::new("toio-B", "dev-b"));
        assert_eq!(session.motor().uuid, Characteristic::Motor.uuid());
        assert!(session.posture().is_none());
        assert!(session.configuration().is_none());
    }

    #[test]
    fn registry_keeps_connection_order() {
        let mut registry = SessionRegistry::new();
        assert_eq!(registry.first().unwrap_err(), SessionError::NoDevices);

        for (id, name) in [("b", "toio-B"), ("a", "toio-A"), ("c", "toio-C")] {
            registry.connect(Arc::new(MockLink::new(id, name))).unwrap();
        }
        // reconnect does not duplicate or reorder
        registry.connect(Arc::new(MockLink::new("a", "toio-A"))).unwrap();
        assert_eq!(registry.len(), 3);
        let ids: Vec<_> = registry.iter().map(|s| s.device_id().to_owned()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(registry.first().unwrap().device_id(), "b");

        registry.disconnect("b").unwrap();
        assert_eq!(registry.first().unwrap().device_id(), "a");
        assert_eq!(
            registry.disconnect("b").unwrap_err(),
            SessionError::UnknownDevice("b".to_owned())
        );
        assert!(registry.disconnect_all().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn disconnect_drops_subscriptions() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        let mut registry = SessionRegistry::new();
        registry.connect(link.clone()).unwrap();
        link.subscribe(Characteristic::IdSensor, Arc::new(|_: &[u8]| {}))
            .unwrap();
        registry.disconnect("dev-a").unwrap();
        assert!(!link.is_subscribed(Characteristic::IdSensor));
    }
}
