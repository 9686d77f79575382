//! The stroke cache buffers samples per device in memory and moves them to a
//! [TraceStore] in batches, either on a timer or when a device's buffer gets
//! too big.
//!
//! Locking is per device. Appends only take a device's pending buffer for as
//! long as a push takes; the storage side of a flush runs under a separate
//! per-device flush lock. Locks are taken in the order flush lock, pending
//! buffer, store, and the store lock is never held while waiting on the other
//! two.

use crate::config::CacheConfig;
use crate::position::{now_millis, PositionSample};
use crate::storage::{StorageError, TraceStore};
use crate::trace_record::{decode_trace, encode_trace, PenStyle, TraceRecord};

use log::{debug, info, warn};
use rand::Rng;
use std::{
    borrow::Cow,
    collections::{BTreeSet, HashMap},
    fmt,
    sync::{
        mpsc::{self, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

/// Errors surfaced by the cache. Running out of storage is not one of them;
/// see [FlushOutcome::Truncated].
#[derive(Debug)]
pub enum CacheError {
    /// The store failed during `op` on `device`'s trace.
    Storage {
        /// Trace the error concerns.
        device: String,
        /// Which store operation failed.
        op: &'static str,
        /// The underlying error.
        source: StorageError,
    },
    /// A trace could not be serialized.
    RonError {
        /// Trace the error concerns.
        device: String,
        /// The underlying error.
        source: ron::Error,
    },
    /// A stored trace is not valid.
    RonSpannedError {
        /// Trace the error concerns.
        device: String,
        /// The underlying error.
        source: ron::de::SpannedError,
    },
    /// Rename target already holds a trace.
    AlreadyExists(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            CacheError::Storage { device, op, source } => {
                Cow::from(format!("{} of '{}' failed: {}", op, device, source))
            }
            CacheError::RonError { device, source } => {
                Cow::from(format!("could not encode trace '{}': {}", device, source))
            }
            CacheError::RonSpannedError { device, source } => {
                Cow::from(format!("stored trace '{}' is corrupt: {}", device, source))
            }
            CacheError::AlreadyExists(name) => {
                Cow::from(format!("a trace named '{}' already exists", name))
            }
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for CacheError {}

/// What a flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Empty,
    /// `appended` records were added; the durable trace is now `total` long.
    Written {
        /// Records added by this flush.
        appended: usize,
        /// Length of the stored trace afterwards.
        total: usize,
    },
    /// Storage was full. Every trace was cut down to the configured size and
    /// the `dropped` pending records were lost.
    Truncated {
        /// Pending records that were lost.
        dropped: usize,
    },
}

#[derive(Debug, Default)]
struct Pending {
    records: Vec<TraceRecord>,
    /// Records taken by a flush that has not finished writing yet.
    in_flight: usize,
    /// End of line was asked for while the newest record was in flight.
    mark_in_flight: bool,
}

/// One device's state. `flushing` serializes the storage side (flush, stored
/// end-of-line rewrites, delete) while `pending` is only ever held briefly,
/// so appends never wait on a storage write.
#[derive(Debug, Default)]
struct DeviceBuffer {
    flushing: Mutex<()>,
    pending: Mutex<Pending>,
}

type SharedBuffer = Arc<DeviceBuffer>;

enum FlushSignal {
    Device(String),
    Stop,
}

/// Per-device sample buffers in front of a durable store.
pub struct StrokeCache<S: TraceStore> {
    store: Mutex<S>,
    buffers: Mutex<HashMap<String, SharedBuffer>>,
    config: CacheConfig,
    session_id: String,
    pen_style: Mutex<PenStyle>,
    flusher: Mutex<Option<Sender<FlushSignal>>>,
}

/// `session_<millis>_<7 base36 chars>`
pub fn generate_session_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..7)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("session_{}_{}", now_millis(), suffix)
}

fn load(store: &impl TraceStore, device: &str) -> Result<Vec<TraceRecord>, CacheError> {
    let bytes = store.get(device).map_err(|source| CacheError::Storage {
        device: device.to_owned(),
        op: "read",
        source,
    })?;
    match bytes {
        Some(bytes) => decode_trace(&bytes).map_err(|source| CacheError::RonSpannedError {
            device: device.to_owned(),
            source,
        }),
        None => Ok(Vec::new()),
    }
}

fn save(
    store: &mut impl TraceStore,
    device: &str,
    records: &[TraceRecord],
) -> Result<(), SaveError> {
    let bytes = encode_trace(records).map_err(|source| {
        SaveError::Fatal(CacheError::RonError {
            device: device.to_owned(),
            source,
        })
    })?;
    store.set(device, &bytes).map_err(|source| {
        if source.is_quota() {
            SaveError::Quota
        } else {
            SaveError::Fatal(CacheError::Storage {
                device: device.to_owned(),
                op: "write",
                source,
            })
        }
    })
}

enum SaveError {
    Quota,
    Fatal(CacheError),
}

/// Cut every stored trace down to its newest `max` records.
fn cleanup_old_data(store: &mut impl TraceStore, max: usize) {
    let keys = match store.list_keys() {
        Ok(keys) => keys,
        Err(e) => {
            warn!("Cleanup could not list stored traces: {}", e);
            return;
        }
    };
    for key in keys {
        match load(store, &key) {
            Ok(records) if records.len() > max => {
                let keep = &records[records.len() - max..];
                match save(store, &key, keep) {
                    Ok(()) => info!("Trimmed trace '{}' from {} to {} records", key, records.len(), max),
                    Err(SaveError::Quota) => warn!("Trace '{}' still does not fit after trimming", key),
                    Err(SaveError::Fatal(e)) => warn!("Cleanup of '{}' failed: {}", key, e),
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Cleanup skipped '{}': {}", key, e),
        }
    }
}

impl<S: TraceStore> StrokeCache<S> {
    /// Wrap `store`, starting a new recording session. A zero
    /// `max_cache_size` or `flush_interval_ms` is raised to 1.
    pub fn new(store: S, config: CacheConfig) -> Self {
        let mut config = config;
        if config.max_cache_size == 0 {
            warn!("max_cache_size of 0 would drop every stored trace on cleanup; using 1");
            config.max_cache_size = 1;
        }
        if config.flush_interval_ms == 0 {
            warn!("flush_interval_ms of 0 would spin the flush worker; using 1");
            config.flush_interval_ms = 1;
        }
        let session_id = generate_session_id();
        info!("Stroke cache started, session {}", session_id);
        Self {
            store: Mutex::new(store),
            buffers: Mutex::new(HashMap::new()),
            config,
            session_id,
            pen_style: Mutex::new(PenStyle::default()),
            flusher: Mutex::new(None),
        }
    }

    /// The id stamped on every record of this cache.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The configuration in effect, after zero values were raised.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The pen style stamped on records appended from now on.
    pub fn set_pen_style(&self, pen_style: PenStyle) {
        *self.pen_style.lock().unwrap() = pen_style;
    }

    /// The current pen style.
    pub fn pen_style(&self) -> PenStyle {
        self.pen_style.lock().unwrap().clone()
    }

    fn buffer(&self, device: &str) -> SharedBuffer {
        self.buffers
            .lock()
            .unwrap()
            .entry(device.to_owned())
            .or_default()
            .clone()
    }

    fn existing_buffer(&self, device: &str) -> Option<SharedBuffer> {
        self.buffers.lock().unwrap().get(device).cloned()
    }

    /// Add a sample to `device`'s buffer. Only touches storage when the
    /// buffer is full and no auto-flush worker is running to take the job.
    pub fn append(&self, device: &str, sample: &PositionSample) -> Result<(), CacheError> {
        let record = TraceRecord::new(sample, self.pen_style(), &self.session_id);
        let buffer = self.buffer(device);
        let pending = {
            let mut pending = buffer.pending.lock().unwrap();
            pending.records.push(record);
            pending.records.len()
        };

        if pending >= self.config.max_cache_size {
            let handed_off = match self.flusher.lock().unwrap().as_ref() {
                Some(tx) => tx.send(FlushSignal::Device(device.to_owned())).is_ok(),
                None => false,
            };
            if !handed_off {
                self.flush(device)?;
            }
        }
        Ok(())
    }

    /// Number of records waiting in memory for `device`.
    pub fn pending(&self, device: &str) -> usize {
        self.existing_buffer(device)
            .map_or(0, |b| b.pending.lock().unwrap().records.len())
    }

    /// Write `device`'s pending records to storage.
    ///
    /// The records are taken out of the buffer before the write starts, so
    /// appends carry on into a fresh buffer meanwhile. If the write fails
    /// for any reason other than quota, the batch goes back in front of
    /// whatever arrived since.
    pub fn flush(&self, device: &str) -> Result<FlushOutcome, CacheError> {
        let Some(buffer) = self.existing_buffer(device) else {
            return Ok(FlushOutcome::Empty);
        };
        let _flushing = buffer.flushing.lock().unwrap();
        let batch = {
            let mut pending = buffer.pending.lock().unwrap();
            if pending.records.is_empty() {
                return Ok(FlushOutcome::Empty);
            }
            pending.in_flight = pending.records.len();
            std::mem::take(&mut pending.records)
        };

        let result = self.write_batch(device, &batch);

        let mut pending = buffer.pending.lock().unwrap();
        pending.in_flight = 0;
        let mark = std::mem::take(&mut pending.mark_in_flight);
        match result {
            Ok(outcome) => {
                drop(pending);
                if mark {
                    if let Err(e) = self.mark_stored_tail(device) {
                        warn!("Could not mark end of line for '{}': {}", device, e);
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                let mut restored = batch;
                if mark {
                    if let Some(last) = restored.last_mut() {
                        last.metadata.is_end_of_line = true;
                    }
                }
                restored.append(&mut pending.records);
                pending.records = restored;
                Err(e)
            }
        }
    }

    fn write_batch(&self, device: &str, batch: &[TraceRecord]) -> Result<FlushOutcome, CacheError> {
        let mut store = self.store.lock().unwrap();
        let mut merged = load(&*store, device)?;
        let appended = batch.len();
        merged.extend_from_slice(batch);

        match save(&mut *store, device, &merged) {
            Ok(()) => {
                debug!("Flushed {} records for '{}' ({} stored)", appended, device, merged.len());
                Ok(FlushOutcome::Written {
                    appended,
                    total: merged.len(),
                })
            }
            Err(SaveError::Quota) => {
                warn!(
                    "Storage quota exceeded flushing '{}'; trimming stored traces to {} records and dropping {} pending",
                    device, self.config.max_cache_size, appended
                );
                cleanup_old_data(&mut *store, self.config.max_cache_size);
                Ok(FlushOutcome::Truncated { dropped: appended })
            }
            Err(SaveError::Fatal(e)) => Err(e),
        }
    }

    /// Flush every device with pending data. One device failing does not
    /// stop the others; the failures are returned.
    pub fn flush_all(&self) -> Vec<CacheError> {
        let devices: Vec<String> = self.buffers.lock().unwrap().keys().cloned().collect();
        let mut errors = Vec::new();
        for device in devices {
            if let Err(e) = self.flush(&device) {
                warn!("Flush of '{}' failed: {}", device, e);
                errors.push(e);
            }
        }
        errors
    }

    /// Flag the newest record of `device` as the end of a stroke. Prefers the
    /// in-memory buffer, then a batch that is being written, and finally
    /// rewrites the last stored record. Returns whether any record was
    /// marked, or will be once the batch in flight lands.
    pub fn mark_end_of_line(&self, device: &str) -> Result<bool, CacheError> {
        let buffer = self.buffer(device);
        {
            let mut pending = buffer.pending.lock().unwrap();
            if let Some(last) = pending.records.last_mut() {
                last.metadata.is_end_of_line = true;
                return Ok(true);
            }
            if pending.in_flight > 0 {
                pending.mark_in_flight = true;
                return Ok(true);
            }
        }

        let _flushing = buffer.flushing.lock().unwrap();
        // a failed flush may have put its batch back while we waited
        if let Some(last) = buffer.pending.lock().unwrap().records.last_mut() {
            last.metadata.is_end_of_line = true;
            return Ok(true);
        }
        self.mark_stored_tail(device)
    }

    /// Rewrite the last stored record of `device` with the end-of-line
    /// flag. Callers hold the device's flush lock.
    fn mark_stored_tail(&self, device: &str) -> Result<bool, CacheError> {
        let mut store = self.store.lock().unwrap();
        let mut stored = load(&*store, device)?;
        let Some(last) = stored.last_mut() else {
            return Ok(false);
        };
        last.metadata.is_end_of_line = true;
        match save(&mut *store, device, &stored) {
            Ok(()) => Ok(true),
            Err(SaveError::Quota) => {
                warn!("Storage quota exceeded marking end of line for '{}'", device);
                cleanup_old_data(&mut *store, self.config.max_cache_size);
                Ok(false)
            }
            Err(SaveError::Fatal(e)) => Err(e),
        }
    }

    /// Full records for `device`: stored ones first, then pending ones.
    /// Waits for a flush of the device that is in progress.
    pub fn get_records(&self, device: &str) -> Result<Vec<TraceRecord>, CacheError> {
        let Some(buffer) = self.existing_buffer(device) else {
            return load(&*self.store.lock().unwrap(), device);
        };
        let _flushing = buffer.flushing.lock().unwrap();
        let pending = buffer.pending.lock().unwrap();
        let mut records = load(&*self.store.lock().unwrap(), device)?;
        records.extend(pending.records.iter().cloned());
        Ok(records)
    }

    /// The trace of `device`, oldest first.
    pub fn get_trace(&self, device: &str) -> Result<Vec<PositionSample>, CacheError> {
        Ok(self
            .get_records(device)?
            .iter()
            .map(TraceRecord::to_sample)
            .collect())
    }

    /// Every device with a stored or pending trace.
    pub fn trace_names(&self) -> Result<BTreeSet<String>, CacheError> {
        let mut names: BTreeSet<String> = self
            .buffers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, b)| {
                let pending = b.pending.lock().unwrap();
                !pending.records.is_empty() || pending.in_flight > 0
            })
            .map(|(k, _)| k.clone())
            .collect();
        let store = self.store.lock().unwrap();
        let stored = store.list_keys().map_err(|source| CacheError::Storage {
            device: String::new(),
            op: "list",
            source,
        })?;
        names.extend(stored);
        Ok(names)
    }

    /// Drop a trace, stored and pending.
    pub fn delete_trace(&self, device: &str) -> Result<(), CacheError> {
        let buffer = self.existing_buffer(device);
        let _flushing = buffer.as_ref().map(|b| b.flushing.lock().unwrap());
        if let Some(buffer) = &buffer {
            let mut pending = buffer.pending.lock().unwrap();
            pending.records.clear();
            pending.mark_in_flight = false;
        }
        self.store
            .lock()
            .unwrap()
            .delete(device)
            .map_err(|source| CacheError::Storage {
                device: device.to_owned(),
                op: "delete",
                source,
            })
    }

    /// Move the stored trace `old` to `new`. Pending records of `old` are
    /// flushed first so nothing is left behind.
    pub fn rename_trace(&self, old: &str, new: &str) -> Result<(), CacheError> {
        if old == new {
            return Ok(());
        }
        self.flush(old)?;
        let storage_err = |device: &str, op, source| CacheError::Storage {
            device: device.to_owned(),
            op,
            source,
        };
        let source = self.buffer(old);
        let _flushing = source.flushing.lock().unwrap();
        let target = self.buffer(new);
        let target = target.pending.lock().unwrap();
        let mut store = self.store.lock().unwrap();
        let taken = store.get(new).map_err(|e| storage_err(new, "read", e))?;
        if !target.records.is_empty() || target.in_flight > 0 || taken.is_some() {
            return Err(CacheError::AlreadyExists(new.to_owned()));
        }
        let Some(bytes) = store.get(old).map_err(|e| storage_err(old, "read", e))? else {
            return Ok(());
        };
        store.set(new, &bytes).map_err(|e| storage_err(new, "write", e))?;
        store.delete(old).map_err(|e| storage_err(old, "delete", e))
    }
}

impl<S: TraceStore + 'static> StrokeCache<S> {
    /// Start the background worker that flushes every device on the
    /// configured interval and takes over size-triggered flushes.
    pub fn start_auto_flush(self: &Arc<Self>) -> AutoFlush {
        let (tx, rx) = mpsc::channel::<FlushSignal>();
        *self.flusher.lock().unwrap() = Some(tx.clone());

        let cache = Arc::clone(self);
        let interval = self.config.flush_interval();
        let handle = thread::spawn(move || {
            let mut deadline = Instant::now() + interval;
            loop {
                let wait = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(FlushSignal::Device(device)) => {
                        if let Err(e) = cache.flush(&device) {
                            warn!("Flush of '{}' failed: {}", device, e);
                        }
                    }
                    Ok(FlushSignal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        cache.flush_all();
                        deadline = Instant::now() + interval;
                    }
                }
            }
            *cache.flusher.lock().unwrap() = None;
            cache.flush_all();
            info!("Auto flush stopped");
        });

        AutoFlush {
            handle: Some(handle),
            tx,
        }
    }
}

/// Handle to a running auto-flush worker. Stopping (or dropping) it performs
/// one last flush of everything pending.
pub struct AutoFlush {
    handle: Option<JoinHandle<()>>,
    tx: Sender<FlushSignal>,
}

impl AutoFlush {
    /// Stop the worker after one last flush of everything pending.
    pub fn stop(&mut self) {
        let _ = self.tx.send(FlushSignal::Stop);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("Auto flush worker panicked");
            }
        }
    }
}

impl Drop for AutoFlush {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{CubePosition, DeviceInfo};
    use crate::storage::{DirStore, MemoryStore};
    use std::time::Duration;

    fn sample(n: u16) -> PositionSample {
        PositionSample::from_position(
            CubePosition {
                center_x: n,
                center_y: n + 1,
                center_angle: 90,
                sensor_x: n + 2,
                sensor_y: n + 3,
                sensor_angle: 91,
            },
            &DeviceInfo::new("cube-a", "id-a"),
            n as u64,
        )
    }

    fn stored_len<S: TraceStore>(cache: &StrokeCache<S>, device: &str) -> usize {
        load(&*cache.store.lock().unwrap(), device).unwrap().len()
    }

    fn config(max: usize) -> CacheConfig {
        CacheConfig {
            flush_interval_ms: 5000,
            max_cache_size: max,
        }
    }

    #[test]
    fn trace_is_stored_then_pending() {
        let cache = StrokeCache::new(MemoryStore::new(), config(100));
        for n in 0..3 {
            cache.append("cube-a", &sample(n)).unwrap();
        }
        assert_eq!(
            cache.flush("cube-a").unwrap(),
            FlushOutcome::Written {
                appended: 3,
                total: 3
            }
        );
        for n in 3..5 {
            cache.append("cube-a", &sample(n)).unwrap();
        }
        let trace = cache.get_trace("cube-a").unwrap();
        assert_eq!(trace.iter().map(|s| s.center_x).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(stored_len(&cache, "cube-a"), 3);
        assert_eq!(cache.pending("cube-a"), 2);
    }

    #[test]
    fn flush_adds_exactly_the_pending_records() {
        let cache = StrokeCache::new(MemoryStore::new(), config(100));
        for n in 0..4 {
            cache.append("cube-a", &sample(n)).unwrap();
        }
        cache.flush("cube-a").unwrap();
        for n in 4..11 {
            cache.append("cube-a", &sample(n)).unwrap();
        }
        let before = stored_len(&cache, "cube-a");
        cache.flush("cube-a").unwrap();
        assert_eq!(stored_len(&cache, "cube-a"), before + 7);
        assert_eq!(cache.flush("cube-a").unwrap(), FlushOutcome::Empty);
        let xs: Vec<u16> = cache.get_trace("cube-a").unwrap().iter().map(|s| s.center_x).collect();
        assert_eq!(xs, (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn full_buffer_flushes_early() {
        let cache = StrokeCache::new(MemoryStore::new(), config(3));
        for n in 0..2 {
            cache.append("cube-a", &sample(n)).unwrap();
        }
        assert_eq!(stored_len(&cache, "cube-a"), 0);
        cache.append("cube-a", &sample(2)).unwrap();
        assert_eq!(stored_len(&cache, "cube-a"), 3);
        assert_eq!(cache.pending("cube-a"), 0);
    }

    #[test]
    fn end_of_line_marks_pending_record_only() {
        let cache = StrokeCache::new(MemoryStore::new(), config(100));
        cache.append("cube-a", &sample(0)).unwrap();
        cache.flush("cube-a").unwrap();
        cache.append("cube-a", &sample(1)).unwrap();

        assert!(cache.mark_end_of_line("cube-a").unwrap());
        let stored = load(&*cache.store.lock().unwrap(), "cube-a").unwrap();
        assert!(!stored[0].metadata.is_end_of_line);
        let trace = cache.get_trace("cube-a").unwrap();
        assert_eq!(
            trace.iter().map(|s| s.is_end_of_line).collect::<Vec<_>>(),
            vec![false, true]
        );
    }

    #[test]
    fn end_of_line_falls_through_to_storage() {
        let cache = StrokeCache::new(MemoryStore::new(), config(100));
        cache.append("cube-a", &sample(0)).unwrap();
        cache.append("cube-a", &sample(1)).unwrap();
        cache.flush("cube-a").unwrap();

        assert!(cache.mark_end_of_line("cube-a").unwrap());
        let stored = load(&*cache.store.lock().unwrap(), "cube-a").unwrap();
        assert_eq!(
            stored.iter().map(|r| r.metadata.is_end_of_line).collect::<Vec<_>>(),
            vec![false, true]
        );
    }

    #[test]
    fn end_of_line_on_unknown_device_is_a_no_op() {
        let cache = StrokeCache::new(MemoryStore::new(), config(100));
        assert!(!cache.mark_end_of_line("nobody").unwrap());
    }

    #[test]
    fn quota_triggers_cleanup_and_reports_loss() {
        let cache = StrokeCache::new(MemoryStore::new(), config(100));
        for n in 0..40 {
            cache.append("cube-b", &sample(n)).unwrap();
        }
        cache.flush("cube-b").unwrap();
        let used = cache.store.lock().unwrap().used_bytes();

        // swap in a store that is exactly full
        let mut full = MemoryStore::with_quota(used);
        full.set("cube-b", &cache.store.lock().unwrap().get("cube-b").unwrap().unwrap())
            .unwrap();
        let cache = StrokeCache::new(full, config(10));
        for n in 0..5 {
            cache.append("cube-a", &sample(n)).unwrap();
        }

        assert_eq!(cache.flush("cube-a").unwrap(), FlushOutcome::Truncated { dropped: 5 });
        assert_eq!(cache.pending("cube-a"), 0);
        assert_eq!(stored_len(&cache, "cube-b"), 10);
        let kept = load(&*cache.store.lock().unwrap(), "cube-b").unwrap();
        assert_eq!(kept[0].position.x, 30);

        // there is room again now
        cache.append("cube-a", &sample(99)).unwrap();
        assert!(matches!(
            cache.flush("cube-a").unwrap(),
            FlushOutcome::Written { appended: 1, .. }
        ));
    }

    #[test]
    fn devices_are_independent() {
        let cache = StrokeCache::new(MemoryStore::new(), config(100));
        cache.append("cube-a", &sample(1)).unwrap();
        cache.append("cube-b", &sample(2)).unwrap();
        assert!(cache.flush_all().is_empty());
        assert_eq!(cache.get_trace("cube-a").unwrap().len(), 1);
        assert_eq!(cache.get_trace("cube-b").unwrap()[0].center_x, 2);
    }

    fn pending_xs<S: TraceStore>(cache: &StrokeCache<S>, device: &str) -> Vec<u16> {
        let buffer = cache.existing_buffer(device).unwrap();
        let pending = buffer.pending.lock().unwrap();
        pending.records.iter().map(|r| r.position.x).collect()
    }

    #[test]
    fn failing_device_does_not_hold_up_the_others() {
        let mut store = MemoryStore::new();
        store.set("cube-b", b"not ron at all [").unwrap();
        let cache = StrokeCache::new(store, config(100));
        cache.append("cube-a", &sample(1)).unwrap();
        cache.append("cube-b", &sample(2)).unwrap();

        let errors = cache.flush_all();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            CacheError::RonSpannedError { device, .. } if device == "cube-b"
        ));
        assert_eq!(stored_len(&cache, "cube-a"), 1);
        assert_eq!(cache.pending("cube-a"), 0);

        // the failed batch goes back ahead of newer samples
        cache.append("cube-b", &sample(3)).unwrap();
        assert_eq!(pending_xs(&cache, "cube-b"), vec![2, 3]);
    }

    #[test]
    fn timer_flush_skips_past_a_failing_device() {
        let mut store = MemoryStore::new();
        store.set("cube-b", b"not ron at all [").unwrap();
        let cache = Arc::new(StrokeCache::new(
            store,
            CacheConfig {
                flush_interval_ms: 20,
                max_cache_size: 100,
            },
        ));
        let mut flusher = cache.start_auto_flush();
        cache.append("cube-b", &sample(2)).unwrap();
        cache.append("cube-a", &sample(1)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while stored_len(&cache, "cube-a") < 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stored_len(&cache, "cube-a"), 1);
        assert_eq!(cache.pending("cube-b"), 1);
        flusher.stop();
        assert_eq!(cache.pending("cube-b"), 1);
    }

    /// A [MemoryStore] whose writes take a while.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
        writing: Arc<std::sync::atomic::AtomicBool>,
    }

    impl TraceStore for SlowStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
            self.writing.store(true, std::sync::atomic::Ordering::SeqCst);
            thread::sleep(self.delay);
            self.inner.set(key, value)
        }

        fn delete(&mut self, key: &str) -> Result<(), StorageError> {
            self.inner.delete(key)
        }

        fn list_keys(&self) -> Result<BTreeSet<String>, StorageError> {
            self.inner.list_keys()
        }
    }

    #[test]
    fn appends_do_not_wait_for_a_slow_write() {
        let writing = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let store = SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(400),
            writing: Arc::clone(&writing),
        };
        let cache = Arc::new(StrokeCache::new(store, config(100)));
        cache.append("cube-a", &sample(0)).unwrap();
        cache.append("cube-a", &sample(1)).unwrap();

        let flushing = Arc::clone(&cache);
        let flush = thread::spawn(move || flushing.flush("cube-a").unwrap());
        let deadline = Instant::now() + Duration::from_secs(5);
        while !writing.load(std::sync::atomic::Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        let started = Instant::now();
        assert!(cache.mark_end_of_line("cube-a").unwrap());
        cache.append("cube-a", &sample(2)).unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));

        assert_eq!(
            flush.join().unwrap(),
            FlushOutcome::Written {
                appended: 2,
                total: 2
            }
        );
        let trace = cache.get_trace("cube-a").unwrap();
        assert_eq!(trace.iter().map(|s| s.center_x).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(
            trace.iter().map(|s| s.is_end_of_line).collect::<Vec<_>>(),
            vec![false, true, false]
        );
        assert_eq!(cache.pending("cube-a"), 1);
    }

    #[test]
    fn zero_cache_size_is_raised_to_one() {
        let mut store = MemoryStore::new();
        let old: Vec<TraceRecord> = (0..3)
            .map(|n| TraceRecord::new(&sample(n), PenStyle::default(), "s"))
            .collect();
        store.set("cube-b", &encode_trace(&old).unwrap()).unwrap();
        let cache = StrokeCache::new(
            store,
            CacheConfig {
                flush_interval_ms: 0,
                max_cache_size: 0,
            },
        );
        assert_eq!(cache.config().max_cache_size, 1);
        assert_eq!(cache.config().flush_interval_ms, 1);

        cleanup_old_data(&mut *cache.store.lock().unwrap(), cache.config().max_cache_size);
        let kept = load(&*cache.store.lock().unwrap(), "cube-b").unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].position.x, 2);
    }

    #[test]
    fn corrupt_trace_does_not_lose_pending_data() {
        let mut store = MemoryStore::new();
        store.set("cube-a", b"not ron at all [").unwrap();
        let cache = StrokeCache::new(store, config(100));
        cache.append("cube-a", &sample(1)).unwrap();
        assert!(matches!(
            cache.flush("cube-a"),
            Err(CacheError::RonSpannedError { .. })
        ));
        assert_eq!(cache.pending("cube-a"), 1);
    }

    #[test]
    fn records_carry_pen_style_and_session() {
        let cache = StrokeCache::new(MemoryStore::new(), config(100));
        let red = PenStyle {
            color: "#ff0000".to_owned(),
            ..PenStyle::default()
        };
        cache.append("cube-a", &sample(1)).unwrap();
        cache.set_pen_style(red.clone());
        cache.append("cube-a", &sample(2)).unwrap();
        let records = cache.get_records("cube-a").unwrap();
        assert_eq!(records[0].pen_style, PenStyle::default());
        assert_eq!(records[1].pen_style, red);
        assert!(records[1].metadata.session_id.starts_with("session_"));
        assert_eq!(records[1].metadata.session_id, cache.session_id());
    }

    #[test]
    fn session_ids_look_right() {
        let id = generate_session_id();
        let suffix = id.rsplit('_').next().unwrap();
        assert!(id.starts_with("session_"));
        assert_eq!(suffix.len(), 7);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn rename_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StrokeCache::new(DirStore::open(dir.path()).unwrap(), config(100));
        cache.append("cube-a", &sample(1)).unwrap();
        cache.rename_trace("cube-a", "my drawing").unwrap();
        assert_eq!(
            cache.trace_names().unwrap(),
            BTreeSet::from(["my drawing".to_owned()])
        );
        assert_eq!(cache.get_trace("my drawing").unwrap().len(), 1);

        cache.append("cube-b", &sample(2)).unwrap();
        assert!(matches!(
            cache.rename_trace("my drawing", "cube-b"),
            Err(CacheError::AlreadyExists(_))
        ));

        cache.delete_trace("my drawing").unwrap();
        assert!(cache.get_trace("my drawing").unwrap().is_empty());
    }

    #[test]
    fn auto_flush_runs_on_interval() {
        let cache = Arc::new(StrokeCache::new(
            MemoryStore::new(),
            CacheConfig {
                flush_interval_ms: 20,
                max_cache_size: 100,
            },
        ));
        let mut flusher = cache.start_auto_flush();
        cache.append("cube-a", &sample(1)).unwrap();
        cache.append("cube-a", &sample(2)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while stored_len(&cache, "cube-a") < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stored_len(&cache, "cube-a"), 2);
        flusher.stop();
    }

    #[test]
    fn auto_flush_takes_size_triggered_flushes_and_drains_on_stop() {
        let cache = Arc::new(StrokeCache::new(
            MemoryStore::new(),
            CacheConfig {
                flush_interval_ms: 60_000,
                max_cache_size: 2,
            },
        ));
        let mut flusher = cache.start_auto_flush();
        for n in 0..5 {
            cache.append("cube-a", &sample(n)).unwrap();
        }
        flusher.stop();
        assert_eq!(stored_len(&cache, "cube-a"), 5);
        assert_eq!(cache.pending("cube-a"), 0);
        let xs: Vec<u16> = cache.get_trace("cube-a").unwrap().iter().map(|s| s.center_x).collect();
        assert_eq!(xs, vec![0, 1, 2, 3, 4]);
    }
}
