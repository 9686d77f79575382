//! Observers that keep what telemetry tells us: the [StrokeRecorder] writes
//! strokes into the cache, the [PositionTracker] just remembers where every
//! cube is.

use crate::position::{DeviceInfo, PositionSample};
use crate::storage::TraceStore;
use crate::stroke_cache::StrokeCache;
use crate::telemetry::PositionObserver;
use log::{info, warn};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

/// Appends every reading to the cache while recording is on. A lost position
/// ends the current stroke.
pub struct StrokeRecorder<S: TraceStore> {
    cache: Arc<StrokeCache<S>>,
    active: AtomicBool,
}

impl<S: TraceStore> StrokeRecorder<S> {
    /// A recorder that starts switched off.
    pub fn new(cache: Arc<StrokeCache<S>>) -> Self {
        Self {
            cache,
            active: AtomicBool::new(false),
        }
    }

    /// Start appending samples to the cache.
    pub fn start(&self) {
        info!("recording started, session {}", self.cache.session_id());
        self.active.store(true, Ordering::SeqCst);
    }

    /// Stop taking samples. The last sample is left open; end the stroke
    /// explicitly with [StrokeCache::mark_end_of_line] if it should be.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        info!("recording stopped");
    }

    /// Whether samples are being taken.
    pub fn is_recording(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The cache samples go to.
    pub fn cache(&self) -> &Arc<StrokeCache<S>> {
        &self.cache
    }
}

impl<S: TraceStore> PositionObserver for StrokeRecorder<S> {
    fn on_position_updated(&self, sample: &PositionSample) {
        if !self.is_recording() {
            return;
        }
        if let Err(e) = self.cache.append(&sample.device_name, sample) {
            warn!("dropping sample: {}", e);
        }
    }

    fn on_position_lost(&self, device: &DeviceInfo) {
        if !self.is_recording() {
            return;
        }
        if let Err(e) = self.cache.mark_end_of_line(&device.device_name) {
            warn!("could not end stroke for {}: {}", device.device_name, e);
        }
    }
}

/// How many recent readings [PositionTracker::smoothed] averages over.
const HISTORY: usize = 5;

#[derive(Debug, Default)]
struct Track {
    recent: VecDeque<PositionSample>,
    lost: bool,
}

/// The latest reading of every cube, keyed by device id.
#[derive(Debug, Default)]
pub struct PositionTracker {
    tracks: Mutex<HashMap<String, Track>>,
}

impl PositionTracker {
    /// A tracker that has seen nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The newest reading from `device_id`, even if it has since gone missing.
    pub fn latest(&self, device_id: &str) -> Option<PositionSample> {
        self.tracks
            .lock()
            .unwrap()
            .get(device_id)
            .and_then(|t| t.recent.back().cloned())
    }

    /// Whether the cube's last report was a lost position.
    pub fn is_lost(&self, device_id: &str) -> bool {
        self.tracks
            .lock()
            .unwrap()
            .get(device_id)
            .map_or(false, |t| t.lost)
    }

    /// The center position averaged over the last few readings, to take the
    /// jitter out of a cube sitting still.
    pub fn smoothed(&self, device_id: &str) -> Option<(f64, f64)> {
        let tracks = self.tracks.lock().unwrap();
        let recent = &tracks.get(device_id)?.recent;
        if recent.is_empty() {
            return None;
        }
        let n = recent.len() as f64;
        let (sx, sy) = recent.iter().fold((0.0, 0.0), |(x, y), s| {
            (x + s.center_x as f64, y + s.center_y as f64)
        });
        Some((sx / n, sy / n))
    }

    /// Latest reading of every cube that has reported one, by device id.
    pub fn snapshot(&self) -> Vec<PositionSample> {
        let tracks = self.tracks.lock().unwrap();
        let mut out: Vec<_> = tracks
            .values()
            .filter_map(|t| t.recent.back().cloned())
            .collect();
        out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        out
    }
}

impl PositionObserver for PositionTracker {
    fn on_position_updated(&self, sample: &PositionSample) {
        let mut tracks = self.tracks.lock().unwrap();
        let track = tracks.entry(sample.device_id.clone()).or_default();
        track.recent.push_back(sample.clone());
        if track.recent.len() > HISTORY {
            track.recent.pop_front();
        }
        track.lost = false;
    }

    fn on_position_lost(&self, device: &DeviceInfo) {
        self.tracks
            .lock()
            .unwrap()
            .entry(device.device_id.clone())
            .or_default()
            .lost = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::position::CubePosition;
    use crate::storage::MemoryStore;

    fn sample(device: &DeviceInfo, x: u16) -> PositionSample {
        PositionSample::from_position(
            CubePosition {
                center_x: x,
                center_y: x * 2,
                ..CubePosition::default()
            },
            device,
            x as u64,
        )
    }

    #[test]
    fn recorder_only_records_while_active() {
        let cache = Arc::new(StrokeCache::new(MemoryStore::new(), CacheConfig::default()));
        let recorder = StrokeRecorder::new(cache.clone());
        let cube = DeviceInfo::new("toio-A", "a");

        recorder.on_position_updated(&sample(&cube, 1));
        recorder.start();
        recorder.on_position_updated(&sample(&cube, 2));
        recorder.on_position_updated(&sample(&cube, 3));
        recorder.on_position_lost(&cube);
        recorder.on_position_updated(&sample(&cube, 4));
        recorder.stop();
        recorder.on_position_updated(&sample(&cube, 5));

        let trace = cache.get_trace("toio-A").unwrap();
        let xs: Vec<_> = trace.iter().map(|s| (s.center_x, s.is_end_of_line)).collect();
        assert_eq!(xs, vec![(2, false), (3, true), (4, false)]);
    }

    #[test]
    fn lost_after_flush_marks_stored_record() {
        let cache = Arc::new(StrokeCache::new(MemoryStore::new(), CacheConfig::default()));
        let recorder = StrokeRecorder::new(cache.clone());
        let cube = DeviceInfo::new("toio-A", "a");
        recorder.start();
        recorder.on_position_updated(&sample(&cube, 7));
        cache.flush("toio-A").unwrap();
        recorder.on_position_lost(&cube);
        assert!(cache.get_trace("toio-A").unwrap()[0].is_end_of_line);
    }

    #[test]
    fn tracker_follows_each_cube() {
        let tracker = PositionTracker::new();
        let a = DeviceInfo::new("toio-A", "a");
        let b = DeviceInfo::new("toio-B", "b");
        assert_eq!(tracker.latest("a"), None);

        tracker.on_position_updated(&sample(&b, 9));
        for x in 1..=7 {
            tracker.on_position_updated(&sample(&a, x));
        }
        assert_eq!(tracker.latest("a").unwrap().center_x, 7);
        // averages 3..=7
        assert_eq!(tracker.smoothed("a"), Some((5.0, 10.0)));

        tracker.on_position_lost(&a);
        assert!(tracker.is_lost("a"));
        assert!(!tracker.is_lost("b"));
        assert_eq!(tracker.latest("a").unwrap().center_x, 7);

        let ids: Vec<_> = tracker.snapshot().into_iter().map(|s| s.device_id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        tracker.on_position_updated(&sample(&a, 8));
        assert!(!tracker.is_lost("a"));
    }
}
