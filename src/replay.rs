//! Playing a stored trace back, either on a drawing surface or as targets for
//! a cube to drive through.

use crate::coordinates::Transform;
use crate::position::{CoordinateType, PositionSample, TargetPoint};
use crate::render::{draw_up_to, StrokeSink};
use crate::trace_record::TraceRecord;
use log::debug;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// The motion plan that retraces `samples`, using either their center or
/// their sensor coordinates.
pub fn define_targets(samples: &[PositionSample], coordinate_type: CoordinateType) -> Vec<TargetPoint> {
    samples
        .iter()
        .map(|s| TargetPoint::from_sample(s, coordinate_type))
        .collect()
}

/// Redraws a trace one record at a time at a fixed pace, like a slider being
/// dragged from `start` to the end.
///
/// A player starts out armed. Clearing the flag, before or during
/// [ReplayPlayer::play], stops playback; [ReplayPlayer::rearm] allows
/// another run.
pub struct ReplayPlayer {
    records: Vec<TraceRecord>,
    transform: Transform,
    step_interval: Duration,
    running: Arc<AtomicBool>,
}

impl ReplayPlayer {
    /// An armed player over `records`, drawn through `transform`.
    pub fn new(records: Vec<TraceRecord>, transform: Transform, step_interval: Duration) -> Self {
        Self {
            records,
            transform,
            step_interval,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Number of records in the trace.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the trace has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A flag that stops [ReplayPlayer::play] when cleared, whether playback
    /// has started yet or not. Can be handed to another thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Clear the flag; see [ReplayPlayer::stop_handle].
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the player is armed or playing, i.e. has not been stopped
    /// and has not run to the end.
    pub fn is_playing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Arm the player again after it was stopped or ran to the end.
    pub fn rearm(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Draw the trace as it stood at `index`.
    pub fn show(&self, sink: &mut impl StrokeSink, index: usize) {
        draw_up_to(sink, &self.records, index, &self.transform);
    }

    /// Step from `start` to the last record, redrawing after every step and
    /// sleeping `step_interval` in between. Blocks until the end or until
    /// stopped, and leaves the player disarmed either way. Returns the last
    /// index drawn, `None` if nothing was.
    pub fn play(&self, sink: &mut impl StrokeSink, start: usize) -> Option<usize> {
        if self.records.is_empty() {
            debug!("nothing to replay");
            return None;
        }
        let mut shown = None;
        for index in start..self.records.len() {
            if !self.is_playing() {
                debug!("replay stopped at {}", index);
                break;
            }
            self.show(sink, index);
            shown = Some(index);
            if index + 1 < self.records.len() {
                spin_sleep::sleep(self.step_interval);
            }
        }
        self.running.store(false, Ordering::SeqCst);
        shown
    }
}
