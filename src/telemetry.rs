//! Position telemetry: subscribing to every cube's ID sensor and fanning the
//! decoded readings out to whoever is interested.
//!
//! Observers are called synchronously, in registration order, on whatever
//! thread the link delivers notifications on. Notifications from one device
//! arrive in order, so each observer sees one device's readings in order too.

use crate::link::{Characteristic, LinkError};
use crate::position::{now_millis, DeviceInfo, PositionSample};
use crate::session::{DeviceSession, SessionError, SessionRegistry};
use crate::telemetry_decoder::{decode, TelemetryEvent};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

/// Something that reacts to position telemetry.
pub trait PositionObserver: Send + Sync {
    /// A new reading arrived.
    fn on_position_updated(&self, sample: &PositionSample);
    /// The cube reported that it no longer knows where it is.
    fn on_position_lost(&self, device: &DeviceInfo);
}

/// Decodes raw notifications and hands the result to every registered
/// [PositionObserver].
#[derive(Default)]
pub struct TelemetryDispatcher {
    observers: Mutex<Vec<Arc<dyn PositionObserver>>>,
}

impl TelemetryDispatcher {
    /// A dispatcher with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. Observers are called in registration order.
    pub fn register(&self, observer: Arc<dyn PositionObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    /// Decode one notification from `device` and notify every observer.
    /// Buffers that decode to nothing are dropped quietly.
    pub fn dispatch(&self, device: &DeviceInfo, buffer: &[u8]) -> Option<TelemetryEvent> {
        let Some(event) = decode(buffer, device, now_millis()) else {
            debug!("{}: dropped {} byte notification", device.device_id, buffer.len());
            return None;
        };
        // Observers may register others; don't hold the lock while calling out.
        let observers = self.observers.lock().unwrap().clone();
        match &event {
            TelemetryEvent::Sample(sample) => {
                for observer in &observers {
                    observer.on_position_updated(sample);
                }
            }
            TelemetryEvent::Lost(_) => {
                for observer in &observers {
                    observer.on_position_lost(device);
                }
            }
        }
        Some(event)
    }
}

/// Subscribe to position notifications on every connected cube.
///
/// A cube that refuses the subscription is logged and skipped. Returns how
/// many cubes are now streaming, or the first failure if none are.
pub fn start_reading(
    registry: &SessionRegistry,
    dispatcher: &Arc<TelemetryDispatcher>,
) -> Result<usize, SessionError> {
    if registry.is_empty() {
        return Err(SessionError::NoDevices);
    }
    let mut started = 0;
    let mut first_error = None;
    for session in registry.iter() {
        let device = session.device().clone();
        let th_dispatcher = Arc::clone(dispatcher);
        let subscribed = session.link().subscribe(
            Characteristic::IdSensor,
            Arc::new(move |buffer: &[u8]| {
                th_dispatcher.dispatch(&device, buffer);
            }),
        );
        match subscribed {
            Ok(()) => {
                info!("reading positions from {}", session.device_id());
                started += 1;
            }
            Err(source) => {
                warn!("{}: could not subscribe: {}", session.device_id(), source);
                first_error.get_or_insert(SessionError::Link {
                    device_id: session.device_id().to_owned(),
                    source,
                });
            }
        }
    }
    match (started, first_error) {
        (0, Some(e)) => Err(e),
        (n, _) => Ok(n),
    }
}

/// Unsubscribe every cube from position notifications.
///
/// Stopping does not end the current stroke; call
/// [StrokeCache::mark_end_of_line](crate::stroke_cache::StrokeCache::mark_end_of_line)
/// for that. Cubes that were never subscribed are skipped.
pub fn stop_reading(registry: &SessionRegistry) -> Vec<SessionError> {
    registry
        .iter()
        .filter_map(|session| {
            match session.link().unsubscribe(Characteristic::IdSensor) {
                Ok(()) | Err(LinkError::NotSubscribed(_)) => None,
                Err(source) => Some(SessionError::Link {
                    device_id: session.device_id().to_owned(),
                    source,
                }),
            }
        })
        .collect()
}

/// Read the cube's position once without subscribing. `None` if the cube is
/// off the mat or answered with something we could not decode.
pub fn read_position_once(session: &DeviceSession) -> Result<Option<PositionSample>, SessionError> {
    let buffer = session
        .link()
        .read_once(Characteristic::IdSensor)
        .map_err(|source| SessionError::Link {
            device_id: session.device_id().to_owned(),
            source,
        })?;
    Ok(match decode(&buffer, session.device(), now_millis()) {
        Some(TelemetryEvent::Sample(sample)) => Some(sample),
        _ => None,
    })
}
