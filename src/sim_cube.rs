//! A pretend cube, for running everything without hardware.
//!
//! A background thread walks the cube around a noisy circle and notifies
//! position readings on the ID sensor characteristic, with a "position
//! missed" packet every so often. Motor frames are answered with an ack in
//! the cube's format, and the cube jumps to the last target of each frame.

use crate::command_encoder::{CONTROL_TYPE_MULTI_TARGET, HEADER_LEN, RESPONSE_MULTI_TARGET, TARGET_LEN};
use crate::link::{Characteristic, Link, LinkError, NotifyHandler};
use crate::position::CubePosition;
use crate::telemetry_decoder::{encode_position, POSITION_MISSED};
use log::{debug, info};
use rand::prelude::*;
use std::{
    collections::{HashMap, VecDeque},
    f64::consts::PI,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::Duration,
};

enum Signal {
    Pause(bool),
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct Path {
    center: (f64, f64),
    radius: f64,
    noise: f64,
    steps_per_lap: usize,
    lost_every: Option<usize>,
    interval: Duration,
}

/// State shared between the link methods and the telemetry thread.
struct Shared {
    connected: AtomicBool,
    handlers: Mutex<HashMap<Characteristic, NotifyHandler>>,
    position: Mutex<CubePosition>,
    statuses: Mutex<VecDeque<u8>>,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl Shared {
    fn notify(&self, characteristic: Characteristic, data: &[u8]) {
        let handler = self.handlers.lock().unwrap().get(&characteristic).cloned();
        if let Some(handler) = handler {
            handler(data);
        }
    }
}

/// A cube that lives in a thread. Drives in a noisy circle, reports where it is, and acks motor frames.
pub struct SimCube {
    id: String,
    name: String,
    shared: Arc<Shared>,
    tx: Mutex<mpsc::Sender<Signal>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Settings for a [SimCube]; start from [SimCube::builder].
pub struct SimCubeBuilder {
    id: String,
    name: String,
    path: Path,
    statuses: VecDeque<u8>,
    paused: bool,
}

impl SimCubeBuilder {
    /// Device id reported by the cube.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Device name reported by the cube.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Center and radius of the circle, in mat units.
    pub fn circle(mut self, center: (f64, f64), radius: f64) -> Self {
        self.path.center = center;
        self.path.radius = radius;
        self
    }

    /// Maximum jitter added to each coordinate.
    pub fn noise(mut self, noise: f64) -> Self {
        self.path.noise = noise;
        self
    }

    /// Readings per trip around the circle.
    pub fn steps_per_lap(mut self, steps: usize) -> Self {
        self.path.steps_per_lap = steps.max(1);
        self
    }

    /// Send a "position missed" packet instead of every `n`th reading.
    pub fn lost_every(mut self, n: usize) -> Self {
        self.path.lost_every = (n > 0).then_some(n);
        self
    }

    /// Time between readings.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.path.interval = interval;
        self
    }

    /// Statuses to answer motor frames with, in order. Once used up every
    /// frame is answered with success.
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = u8>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Start without emitting telemetry until [SimCube::resume].
    pub fn paused(mut self) -> Self {
        self.paused = true;
        self
    }

    /// Start the cube's thread.
    pub fn build(self) -> SimCube {
        let path = self.path;
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            handlers: Mutex::new(HashMap::new()),
            position: Mutex::new(point_on_circle(&path, 0, 0.0)),
            statuses: Mutex::new(self.statuses),
            frames: Mutex::new(Vec::new()),
        });

        let (tx, rx) = mpsc::channel::<Signal>();
        let th_shared = Arc::clone(&shared);
        let mut paused = self.paused;
        let handle = thread::spawn(move || {
            let mut step = 0usize;
            loop {
                if let Ok(received) = rx.try_recv() {
                    match received {
                        Signal::Pause(p) => paused = p,
                        Signal::Stop => break,
                    }
                }
                if !paused {
                    step += 1;
                    if path.lost_every.is_some_and(|n| step % n == 0) {
                        th_shared.notify(Characteristic::IdSensor, &[POSITION_MISSED]);
                    } else {
                        let position = point_on_circle(&path, step, path.noise);
                        *th_shared.position.lock().unwrap() = position;
                        th_shared.notify(Characteristic::IdSensor, &encode_position(&position));
                    }
                }
                spin_sleep::sleep(path.interval);
            }
        });

        info!("simulated cube {} ({}) up", self.name, self.id);
        SimCube {
            id: self.id,
            name: self.name,
            shared,
            tx: Mutex::new(tx),
            handle: Mutex::new(Some(handle)),
        }
    }
}

fn point_on_circle(path: &Path, step: usize, noise: f64) -> CubePosition {
    let mut rng = thread_rng();
    let mut jitter = || {
        if noise > 0.0 {
            rng.gen_range(-noise..noise)
        } else {
            0.0
        }
    };
    let step = step % path.steps_per_lap;
    let theta = step as f64 / path.steps_per_lap as f64 * 2.0 * PI;
    let x = path.center.0 + path.radius * theta.cos() + jitter();
    let y = path.center.1 + path.radius * theta.sin() + jitter();
    // heading is tangent to the circle
    let heading = ((step * 360 / path.steps_per_lap + 90) % 360) as u16;
    CubePosition {
        center_x: x.round().max(0.0) as u16,
        center_y: y.round().max(0.0) as u16,
        center_angle: heading,
        sensor_x: (x + jitter()).round().max(0.0) as u16,
        sensor_y: (y + jitter()).round().max(0.0) as u16,
        sensor_angle: heading,
    }
}

impl SimCube {
    /// A builder with the default circle on the mat.
    pub fn builder() -> SimCubeBuilder {
        SimCubeBuilder {
            id: "sim-0".to_owned(),
            name: "toio-Sim".to_owned(),
            path: Path {
                center: (250.0, 250.0),
                radius: 80.0,
                noise: 1.0,
                steps_per_lap: 60,
                lost_every: Some(40),
                interval: Duration::from_millis(50),
            },
            statuses: VecDeque::new(),
            paused: false,
        }
    }

    /// Stop emitting telemetry.
    pub fn pause(&self) {
        let _ = self.tx.lock().unwrap().send(Signal::Pause(true));
    }

    /// Emit telemetry again after [SimCube::pause].
    pub fn resume(&self) {
        let _ = self.tx.lock().unwrap().send(Signal::Pause(false));
    }

    /// Where the cube currently is.
    pub fn position(&self) -> CubePosition {
        *self.shared.position.lock().unwrap()
    }

    /// Every motor frame written so far.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.shared.frames.lock().unwrap().clone()
    }

    /// Stop the thread and wait for it.
    pub fn stop(&self) {
        let _ = self.tx.lock().unwrap().send(Signal::Stop);
        if let Some(thread) = self.handle.lock().unwrap().take() {
            // A handler that panicked already reported itself.
            let _ = thread.join();
        }
    }

    fn handle_motor_frame(&self, frame: &[u8]) {
        self.shared.frames.lock().unwrap().push(frame.to_vec());
        if frame.first() != Some(&CONTROL_TYPE_MULTI_TARGET) || frame.len() < HEADER_LEN + TARGET_LEN {
            debug!("ignoring motor write {:02x?}", frame);
            return;
        }
        let last = &frame[frame.len() - TARGET_LEN..];
        let read = |i: usize| u16::from_le_bytes([last[i], last[i + 1]]);
        {
            let mut position = self.shared.position.lock().unwrap();
            *position = CubePosition {
                center_x: read(0),
                center_y: read(2),
                center_angle: read(4),
                sensor_x: read(0),
                sensor_y: read(2),
                sensor_angle: read(4),
            };
        }

        let status = self.shared.statuses.lock().unwrap().pop_front().unwrap_or(0x00);
        self.shared
            .notify(Characteristic::Motor, &[RESPONSE_MULTI_TARGET, frame[1], status]);
    }

    fn check_connected(&self) -> Result<(), LinkError> {
        if self.shared.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LinkError::Disconnected)
        }
    }
}

impl Link for SimCube {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn characteristics(&self) -> Result<Vec<String>, LinkError> {
        self.check_connected()?;
        Ok(Characteristic::ALL.iter().map(|c| c.uuid().to_owned()).collect())
    }

    fn write(&self, characteristic: Characteristic, data: &[u8]) -> Result<(), LinkError> {
        self.check_connected()?;
        match characteristic {
            Characteristic::Motor => self.handle_motor_frame(data),
            other => debug!("write to {} ignored", other),
        }
        Ok(())
    }

    fn subscribe(&self, characteristic: Characteristic, on_notify: NotifyHandler) -> Result<(), LinkError> {
        self.check_connected()?;
        self.shared
            .handlers
            .lock()
            .unwrap()
            .insert(characteristic, on_notify);
        Ok(())
    }

    fn unsubscribe(&self, characteristic: Characteristic) -> Result<(), LinkError> {
        self.shared
            .handlers
            .lock()
            .unwrap()
            .remove(&characteristic)
            .map(|_| ())
            .ok_or(LinkError::NotSubscribed(characteristic))
    }

    fn read_once(&self, characteristic: Characteristic) -> Result<Vec<u8>, LinkError> {
        self.check_connected()?;
        match characteristic {
            Characteristic::IdSensor => Ok(encode_position(&self.position())),
            other => Err(LinkError::Transport(format!("{} is not readable", other))),
        }
    }

    fn disconnect(&self) -> Result<(), LinkError> {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.handlers.lock().unwrap().clear();
        self.stop();
        info!("simulated cube {} down", self.id);
        Ok(())
    }
}

impl Drop for SimCube {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotorConfig;
    use crate::motor_control::{CommandErrorKind, MotorCommander};
    use crate::position::TargetPoint;
    use crate::command_encoder::StatusCode;
    use crate::telemetry_decoder::decode_position;

    #[test]
    fn circle_points_stay_on_the_circle() {
        let path = Path {
            center: (250.0, 250.0),
            radius: 100.0,
            noise: 0.0,
            steps_per_lap: 4,
            lost_every: None,
            interval: Duration::from_millis(1),
        };
        let points: Vec<_> = (0..4)
            .map(|i| {
                let p = point_on_circle(&path, i, 0.0);
                (p.center_x, p.center_y, p.center_angle)
            })
            .collect();
        assert_eq!(
            points,
            vec![(350, 250, 90), (250, 350, 180), (150, 250, 270), (250, 150, 0)]
        );
    }

    #[test]
    fn streams_positions_and_misses() {
        let cube = SimCube::builder()
            .interval(Duration::from_millis(2))
            .lost_every(3)
            .build();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        cube.subscribe(
            Characteristic::IdSensor,
            Arc::new(move |buffer: &[u8]| {
                let _ = tx.lock().unwrap().send(buffer.to_vec());
            }),
        )
        .unwrap();

        let received: Vec<Vec<u8>> = (0..9)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        let misses = received.iter().filter(|b| b[..] == [POSITION_MISSED]).count();
        assert!(misses >= 2, "{:?}", received);
        assert!(received
            .iter()
            .filter(|b| b[0] != POSITION_MISSED)
            .all(|b| decode_position(b).is_some()));
    }

    #[test]
    fn paused_cube_is_quiet_and_readable() {
        let cube = SimCube::builder().paused().noise(0.0).build();
        let position = decode_position(&cube.read_once(Characteristic::IdSensor).unwrap()).unwrap();
        assert_eq!(position, cube.position());
        assert!(cube.read_once(Characteristic::Posture).is_err());
    }

    #[test]
    fn drives_through_the_ack_flow() {
        let cube = Arc::new(SimCube::builder().paused().build());
        let targets: Vec<_> = (0..3)
            .map(|i| TargetPoint {
                x: 100 + i,
                y: 200,
                angle: 0,
                is_end_of_line: false,
            })
            .collect();
        let mut commander = MotorCommander::new(cube.clone(), MotorConfig::default());
        let report = commander.send_targets(&targets).unwrap();
        assert_eq!(report.chunks, 2);
        assert_eq!(cube.frames().len(), 2);
        assert_eq!(cube.position().center_x, 102);
    }

    #[test]
    fn scripted_rejection() {
        let cube = Arc::new(SimCube::builder().paused().statuses([0x00, 0x05]).build());
        let targets = vec![
            TargetPoint {
                x: 1,
                y: 1,
                angle: 0,
                is_end_of_line: false
            };
            6
        ];
        let mut commander = MotorCommander::new(cube.clone(), MotorConfig::default());
        let err = commander.send_targets(&targets).unwrap_err();
        assert_eq!(err.chunk, 1);
        assert_eq!(err.kind, CommandErrorKind::Rejected(StatusCode::InternalError));
        assert_eq!(cube.frames().len(), 2);
    }

    #[test]
    fn disconnected_cube_refuses_everything() {
        let cube = SimCube::builder().paused().build();
        cube.disconnect().unwrap();
        assert_eq!(
            cube.write(Characteristic::Motor, &[0x04]),
            Err(LinkError::Disconnected)
        );
        assert_eq!(cube.read_once(Characteristic::IdSensor), Err(LinkError::Disconnected));
        // stopping twice is harmless
        cube.stop();
    }
}
