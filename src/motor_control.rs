//! Drives a cube through a list of targets, one acknowledged frame at a time.
//!
//! A send walks `Idle → Sending → AwaitingAck → Acked → Sending → ...` for
//! every chunk and returns to `Idle` after the last ack. A timeout, a link
//! failure, or a non-success status ends the walk in `Aborted`; the remaining
//! chunks are never written and nothing is retried.

use crate::command_encoder::{
    encode_with_cap, parse_motor_response, split_targets, EncodeError, MotorResponse, StatusCode,
    RESPONSE_MULTI_TARGET,
};
use crate::config::MotorConfig;
use crate::link::{Characteristic, Link, LinkError};
use crate::position::TargetPoint;
use log::{debug, error, info, warn};
use std::{
    fmt,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError},
        Arc, Mutex,
    },
    time::Duration,
};

/// Where the state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Nothing sent yet.
    Idle,
    /// Writing a chunk's frame.
    Sending {
        /// Zero-based chunk index.
        chunk: usize,
    },
    /// Frame written, waiting for its ack.
    AwaitingAck {
        /// Zero-based chunk index.
        chunk: usize,
    },
    /// The cube accepted a chunk.
    Acked {
        /// Zero-based chunk index.
        chunk: usize,
    },
    /// No ack for a chunk arrived in time.
    TimedOut {
        /// Zero-based chunk index.
        chunk: usize,
    },
    /// A chunk failed to write or was rejected.
    Failed {
        /// Zero-based chunk index.
        chunk: usize,
    },
    /// The last send stopped early.
    Aborted,
}

/// Why a send stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandErrorKind {
    /// A chunk could not be encoded.
    Encode(EncodeError),
    /// Writing the frame failed.
    Link(LinkError),
    /// Could not listen for acks.
    Subscribe(LinkError),
    /// No matching ack arrived in time. Distinct from
    /// [StatusCode::Timeout], which is the cube reporting its own timeout.
    Timeout(Duration),
    /// The cube answered with something other than success.
    Rejected(StatusCode),
    /// The cube answered with a status byte we do not know.
    UnknownStatus(u8),
    /// The notification handler went away while waiting.
    ChannelClosed,
}

/// A failed send, with enough context to resume from the failing chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    /// The cube the send was for.
    pub device_id: String,
    /// Zero-based index of the chunk that failed.
    pub chunk: usize,
    /// How many chunks the send was split into.
    pub total_chunks: usize,
    /// What went wrong.
    pub kind: CommandErrorKind,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device {} chunk {}/{}: ",
            self.device_id,
            self.chunk + 1,
            self.total_chunks
        )?;
        match &self.kind {
            CommandErrorKind::Encode(e) => write!(f, "encode failed: {}", e),
            CommandErrorKind::Link(e) => write!(f, "write failed: {}", e),
            CommandErrorKind::Subscribe(e) => write!(f, "subscribe failed: {}", e),
            CommandErrorKind::Timeout(waited) => write!(f, "no ack after {:?}", waited),
            CommandErrorKind::Rejected(code) => write!(f, "cube reported {}", code),
            CommandErrorKind::UnknownStatus(b) => write!(f, "unknown status 0x{:02x}", b),
            CommandErrorKind::ChannelClosed => write!(f, "ack channel closed"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            CommandErrorKind::Encode(e) => Some(e),
            CommandErrorKind::Link(e) | CommandErrorKind::Subscribe(e) => Some(e),
            _ => None,
        }
    }
}

/// Summary of a completed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Frames written and acknowledged.
    pub chunks: usize,
    /// Targets in those frames.
    pub targets: usize,
}

/// Sends target lists to one cube. Holds the motor notification subscription
/// for as long as it lives.
pub struct MotorCommander {
    link: Arc<dyn Link>,
    config: MotorConfig,
    acks: Option<Receiver<MotorResponse>>,
    state: SendState,
}

impl MotorCommander {
    /// A commander for the cube behind `link`. Nothing is subscribed until the first send.
    pub fn new(link: Arc<dyn Link>, config: MotorConfig) -> Self {
        Self {
            link,
            config,
            acks: None,
            state: SendState::Idle,
        }
    }

    /// Where the last send got to.
    pub fn state(&self) -> SendState {
        self.state
    }

    /// Subscribe to the motor characteristic unless already subscribed.
    /// Only multi-target responses reach the ack channel; speed info and other
    /// notifications are left alone.
    fn ensure_subscribed(&mut self) -> Result<(), LinkError> {
        if self.acks.is_some() {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        self.link.subscribe(
            Characteristic::Motor,
            Arc::new(move |buffer: &[u8]| {
                let Some(response) = parse_motor_response(buffer) else {
                    return;
                };
                if response.control_type != RESPONSE_MULTI_TARGET {
                    debug!("ignoring motor notification {:02x?}", buffer);
                    return;
                }
                // The commander may already be gone; late acks are dropped.
                let _ = tx.lock().unwrap().send(response);
            }),
        )?;
        self.acks = Some(rx);
        Ok(())
    }

    /// Drive the cube through `targets`, in order, frame by frame.
    ///
    /// Returns once every frame has been acknowledged with success, or with
    /// the first failure. An empty list sends nothing.
    pub fn send_targets(&mut self, targets: &[TargetPoint]) -> Result<SendReport, CommandError> {
        let result = self.run(targets);
        self.state = match &result {
            Ok(_) => SendState::Idle,
            Err(e) => {
                error!("aborting send: {}", e);
                SendState::Aborted
            }
        };
        result
    }

    fn run(&mut self, targets: &[TargetPoint]) -> Result<SendReport, CommandError> {
        let device_id = self.link.device_id().to_owned();
        let max = self.config.max_targets_per_frame;
        let timeout = self.config.ack_timeout();

        let fail = |chunk: usize, total_chunks: usize, kind: CommandErrorKind| CommandError {
            device_id: device_id.clone(),
            chunk,
            total_chunks,
            kind,
        };

        let chunks = split_targets(targets, max).map_err(|e| fail(0, 0, CommandErrorKind::Encode(e)))?;
        let total = chunks.len();
        if total == 0 {
            return Ok(SendReport {
                chunks: 0,
                targets: 0,
            });
        }

        self.ensure_subscribed()
            .map_err(|e| fail(0, total, CommandErrorKind::Subscribe(e)))?;
        info!("sending {} targets to {} in {} frames", targets.len(), device_id, total);

        for (i, chunk) in chunks.iter().enumerate() {
            self.state = SendState::Sending { chunk: i };
            let frame = encode_with_cap(chunk, i + 1 < total, max)
                .map_err(|e| fail(i, total, CommandErrorKind::Encode(e)))?;

            let acks = self
                .acks
                .as_ref()
                .ok_or_else(|| fail(i, total, CommandErrorKind::ChannelClosed))?;
            // Acks from an earlier, abandoned send must not satisfy this frame.
            while acks.try_recv().is_ok() {}

            if let Err(e) = self.link.write(Characteristic::Motor, &frame) {
                self.state = SendState::Failed { chunk: i };
                return Err(fail(i, total, CommandErrorKind::Link(e)));
            }
            debug!("wrote frame {}/{}: {:02x?}", i + 1, total, frame);

            self.state = SendState::AwaitingAck { chunk: i };
            let response = match acks.recv_timeout(timeout) {
                Ok(response) => response,
                Err(RecvTimeoutError::Timeout) => {
                    self.state = SendState::TimedOut { chunk: i };
                    return Err(fail(i, total, CommandErrorKind::Timeout(timeout)));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.state = SendState::Failed { chunk: i };
                    self.acks = None;
                    return Err(fail(i, total, CommandErrorKind::ChannelClosed));
                }
            };

            match response.status_code() {
                Ok(StatusCode::Success) => {
                    self.state = SendState::Acked { chunk: i };
                }
                Ok(code) => {
                    self.state = SendState::Failed { chunk: i };
                    return Err(fail(i, total, CommandErrorKind::Rejected(code)));
                }
                Err(byte) => {
                    self.state = SendState::Failed { chunk: i };
                    return Err(fail(i, total, CommandErrorKind::UnknownStatus(byte)));
                }
            }
        }

        Ok(SendReport {
            chunks: total,
            targets: targets.len(),
        })
    }
}

impl Drop for MotorCommander {
    fn drop(&mut self) {
        if self.acks.take().is_some() {
            if let Err(e) = self.link.unsubscribe(Characteristic::Motor) {
                warn!("could not unsubscribe from motor notifications: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_encoder::RESPONSE_SPEED_INFO;
    use crate::link::mock::MockLink;

    fn targets(n: u16) -> Vec<TargetPoint> {
        (0..n)
            .map(|i| TargetPoint {
                x: 100 + i,
                y: 200 + i,
                angle: 0,
                is_end_of_line: false,
            })
            .collect()
    }

    fn config(timeout_ms: u64) -> MotorConfig {
        MotorConfig {
            ack_timeout_ms: timeout_ms,
            ..MotorConfig::default()
        }
    }

    fn ack(status: u8) -> Vec<u8> {
        vec![RESPONSE_MULTI_TARGET, 0x00, status]
    }

    #[test]
    fn every_chunk_acknowledged() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        for _ in 0..3 {
            link.push_reply(vec![ack(0x00)]);
        }
        let mut commander = MotorCommander::new(link.clone(), config(1000));
        let report = commander.send_targets(&targets(5)).unwrap();
        assert_eq!(report, SendReport { chunks: 3, targets: 5 });
        assert_eq!(commander.state(), SendState::Idle);

        let writes = link.writes.lock().unwrap();
        assert_eq!(writes.len(), 3);
        assert!(writes.iter().all(|(c, _)| *c == Characteristic::Motor));
        let flags: Vec<u8> = writes.iter().map(|(_, f)| f[7]).collect();
        assert_eq!(flags, vec![1, 1, 0]);
    }

    #[test]
    fn unreachable_on_second_chunk_stops_the_sequence() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        link.push_reply(vec![ack(0x00)]);
        link.push_reply(vec![ack(0x03)]);
        link.push_reply(vec![ack(0x00)]);
        let mut commander = MotorCommander::new(link.clone(), config(1000));

        let err = commander.send_targets(&targets(6)).unwrap_err();
        assert_eq!(err.chunk, 1);
        assert_eq!(err.total_chunks, 3);
        assert_eq!(err.device_id, "dev-a");
        assert_eq!(err.kind, CommandErrorKind::Rejected(StatusCode::TargetUnreachable));
        assert_eq!(link.write_count(), 2);
        assert_eq!(commander.state(), SendState::Aborted);
    }

    #[test]
    fn silence_is_a_timeout() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        let mut commander = MotorCommander::new(link.clone(), config(30));
        let err = commander.send_targets(&targets(3)).unwrap_err();
        assert_eq!(err.chunk, 0);
        assert_eq!(err.kind, CommandErrorKind::Timeout(Duration::from_millis(30)));
        assert_eq!(link.write_count(), 1);
    }

    #[test]
    fn device_timeout_status_is_not_our_timeout() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        link.push_reply(vec![ack(0x01)]);
        let mut commander = MotorCommander::new(link.clone(), config(1000));
        let err = commander.send_targets(&targets(1)).unwrap_err();
        assert_eq!(err.kind, CommandErrorKind::Rejected(StatusCode::Timeout));
    }

    #[test]
    fn other_notifications_are_ignored() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        link.push_reply(vec![
            vec![RESPONSE_SPEED_INFO, 0x10, 0x07],
            vec![0x84],
            ack(0x00),
        ]);
        let mut commander = MotorCommander::new(link.clone(), config(1000));
        assert!(commander.send_targets(&targets(2)).is_ok());
    }

    #[test]
    fn unknown_status() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        link.push_reply(vec![ack(0x42)]);
        let mut commander = MotorCommander::new(link.clone(), config(1000));
        let err = commander.send_targets(&targets(1)).unwrap_err();
        assert_eq!(err.kind, CommandErrorKind::UnknownStatus(0x42));
    }

    #[test]
    fn write_failure_reports_its_chunk() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        *link.fail_writes.lock().unwrap() = Some(LinkError::Disconnected);
        let mut commander = MotorCommander::new(link.clone(), config(1000));
        let err = commander.send_targets(&targets(4)).unwrap_err();
        assert_eq!(err.chunk, 0);
        assert_eq!(err.kind, CommandErrorKind::Link(LinkError::Disconnected));
    }

    #[test]
    fn stale_acks_are_discarded() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        let mut commander = MotorCommander::new(link.clone(), config(30));
        // first send times out; its ack shows up late
        assert!(commander.send_targets(&targets(1)).is_err());
        link.notify(Characteristic::Motor, &ack(0x00));
        // the second frame gets no ack of its own
        let err = commander.send_targets(&targets(1)).unwrap_err();
        assert!(matches!(err.kind, CommandErrorKind::Timeout(_)));
    }

    #[test]
    fn subscribes_once_and_unsubscribes_on_drop() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        link.push_reply(vec![ack(0x00)]);
        link.push_reply(vec![ack(0x00)]);
        let mut commander = MotorCommander::new(link.clone(), config(1000));
        commander.send_targets(&targets(1)).unwrap();
        commander.send_targets(&targets(1)).unwrap();
        assert_eq!(*link.subscribe_count.lock().unwrap(), 1);
        drop(commander);
        assert!(!link.is_subscribed(Characteristic::Motor));
    }

    #[test]
    fn nothing_to_send() {
        let link = Arc::new(MockLink::new("dev-a", "toio-A"));
        let mut commander = MotorCommander::new(link.clone(), config(1000));
        assert_eq!(
            commander.send_targets(&[]).unwrap(),
            SendReport { chunks: 0, targets: 0 }
        );
        assert_eq!(link.write_count(), 0);
        assert!(!link.is_subscribed(Characteristic::Motor));
    }
}
