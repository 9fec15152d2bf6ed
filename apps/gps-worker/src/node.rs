use crate::broadcast::Broadcaster;
use gps_telemetry::{ReportError, TelemetryReport};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub const GPS_UPDATE_EVENT: &str = "gps_update";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastMode {
    Live,
    Draining,
}

/// What happened to an accepted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Broadcast,
    Buffered,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid GPS payload: {0}")]
    InvalidPayload(#[from] ReportError),
    #[error("pending buffer already flushed; node is shutting down")]
    ShuttingDown,
}

#[derive(Debug)]
struct IngestState {
    mode: BroadcastMode,
    pending: Vec<TelemetryReport>,
    // Set by the terminal flush; nothing is appended afterwards.
    sealed: bool,
}

#[derive(Debug, Default)]
struct IngestStats {
    broadcast_live: AtomicU64,
    buffered: AtomicU64,
    rejected: AtomicU64,
    flushed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub broadcast_live: u64,
    pub buffered: u64,
    pub rejected: u64,
    pub flushed: u64,
}

struct NodeInner {
    state: Mutex<IngestState>,
    broadcaster: Arc<dyn Broadcaster>,
    stats: IngestStats,
}

/// Process-wide ingestion state: the LIVE/DRAINING mode and the pending
/// buffer, plus the broadcaster reports are handed to.
///
/// Mode checks, buffer appends, the mode flip and the terminal flush all run
/// under one lock, so every submission is ordered either entirely before or
/// entirely after the flip, and the flush never sees a concurrent append.
#[derive(Clone)]
pub struct IngestNode {
    inner: Arc<NodeInner>,
}

impl IngestNode {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                state: Mutex::new(IngestState {
                    mode: BroadcastMode::Live,
                    pending: Vec::new(),
                    sealed: false,
                }),
                broadcaster,
                stats: IngestStats::default(),
            }),
        }
    }

    /// Validates a raw request body and submits it.
    pub fn submit_raw(&self, body: &[u8]) -> Result<Disposition, SubmitError> {
        let report = match TelemetryReport::parse(body) {
            Ok(report) => report,
            Err(err) => {
                self.inner.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error=%err, "rejected invalid GPS payload");
                return Err(err.into());
            }
        };
        self.submit(report)
    }

    pub fn submit(&self, report: TelemetryReport) -> Result<Disposition, SubmitError> {
        let mut state = self.lock_state();
        if state.sealed {
            drop(state);
            self.inner.stats.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(device_id = %report.device_id(), "report arrived after terminal flush");
            return Err(SubmitError::ShuttingDown);
        }

        match state.mode {
            BroadcastMode::Live => {
                self.inner.broadcaster.publish(GPS_UPDATE_EVENT, &report);
                drop(state);
                self.inner.stats.broadcast_live.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    device_id = %report.device_id(),
                    latitude = ?report.latitude(),
                    longitude = ?report.longitude(),
                    "broadcast GPS report"
                );
                Ok(Disposition::Broadcast)
            }
            BroadcastMode::Draining => {
                let device_id = report.device_id();
                state.pending.push(report);
                let pending = state.pending.len();
                drop(state);
                self.inner.stats.buffered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(%device_id, pending, "buffering GPS report while draining");
                Ok(Disposition::Buffered)
            }
        }
    }

    pub fn mode(&self) -> BroadcastMode {
        self.lock_state().mode
    }

    pub fn pending_len(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        let stats = &self.inner.stats;
        IngestStatsSnapshot {
            broadcast_live: stats.broadcast_live.load(Ordering::Relaxed),
            buffered: stats.buffered.load(Ordering::Relaxed),
            rejected: stats.rejected.load(Ordering::Relaxed),
            flushed: stats.flushed.load(Ordering::Relaxed),
        }
    }

    /// Flips LIVE to DRAINING. Only the first call succeeds; the returned
    /// guard owns the terminal flush and performs it when dropped if
    /// [`DrainGuard::flush`] was never called.
    pub fn begin_draining(&self) -> Option<DrainGuard> {
        let mut state = self.lock_state();
        if state.mode == BroadcastMode::Draining {
            return None;
        }
        state.mode = BroadcastMode::Draining;
        Some(DrainGuard {
            node: self.clone(),
            flushed: false,
        })
    }

    pub fn close_subscribers(&self) {
        self.inner.broadcaster.close();
    }

    fn flush_pending(&self) -> usize {
        let mut state = self.lock_state();
        if state.sealed {
            return 0;
        }
        state.sealed = true;
        let pending = std::mem::take(&mut state.pending);
        for report in &pending {
            self.inner.broadcaster.publish(GPS_UPDATE_EVENT, report);
        }
        drop(state);

        let flushed = pending.len();
        self.inner
            .stats
            .flushed
            .fetch_add(flushed as u64, Ordering::Relaxed);
        flushed
    }

    fn lock_state(&self) -> MutexGuard<'_, IngestState> {
        // The state is consistent after every critical section, so a
        // poisoned lock is still safe to use.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pending terminal flush for a node that has entered DRAINING.
#[must_use = "dropping the guard flushes immediately"]
pub struct DrainGuard {
    node: IngestNode,
    flushed: bool,
}

impl DrainGuard {
    /// Broadcasts every buffered report in arrival order and seals the
    /// buffer. Returns the number of reports flushed.
    pub fn flush(mut self) -> usize {
        self.flushed = true;
        self.node.flush_pending()
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.flushed {
            return;
        }
        let flushed = self.node.flush_pending();
        tracing::warn!(flushed, "drain interrupted; flushed pending GPS reports on unwind");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::testing::RecordingBroadcaster;
    use serde_json::{json, Value};

    fn node() -> (IngestNode, Arc<RecordingBroadcaster>) {
        let recorder = Arc::new(RecordingBroadcaster::default());
        (IngestNode::new(recorder.clone()), recorder)
    }

    fn report(value: Value) -> TelemetryReport {
        TelemetryReport::from_value(value).unwrap()
    }

    #[test]
    fn live_submission_broadcasts_once_and_leaves_buffer_empty() {
        let (node, recorder) = node();
        let payload = json!({"device_id": "d1", "latitude": 10, "longitude": 20});

        let outcome = node.submit(report(payload.clone())).unwrap();

        assert_eq!(outcome, Disposition::Broadcast);
        assert_eq!(recorder.events(), vec![("gps_update".to_string(), payload)]);
        assert_eq!(node.pending_len(), 0);
        assert_eq!(node.stats().broadcast_live, 1);
    }

    #[test]
    fn invalid_payload_has_no_side_effects() {
        let (node, recorder) = node();

        let err = node.submit_raw(br#"{"latitude":1,"longitude":2}"#).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidPayload(ReportError::MissingField("device_id"))));

        let _guard = node.begin_draining().unwrap();
        let err = node.submit_raw(br#"{"device_id":"d","longitude":2}"#).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidPayload(_)));

        assert_eq!(node.pending_len(), 0);
        assert!(recorder.events().is_empty());
        assert_eq!(node.stats().rejected, 2);
    }

    #[test]
    fn draining_submission_buffers_without_broadcast() {
        let (node, recorder) = node();
        let guard = node.begin_draining().unwrap();

        let outcome = node
            .submit(report(json!({"device_id": "d2", "latitude": 1, "longitude": 1})))
            .unwrap();

        assert_eq!(outcome, Disposition::Buffered);
        assert_eq!(node.mode(), BroadcastMode::Draining);
        assert_eq!(node.pending_len(), 1);
        assert!(recorder.events().is_empty());
        assert_eq!(guard.flush(), 1);
        assert_eq!(recorder.events().len(), 1);
    }

    #[test]
    fn flush_broadcasts_in_arrival_order_exactly_once() {
        let (node, recorder) = node();
        let guard = node.begin_draining().unwrap();
        let ids = ["A", "B", "C"];
        for id in ids {
            node.submit(report(json!({"device_id": id, "latitude": 1, "longitude": 1})))
                .unwrap();
        }

        assert_eq!(guard.flush(), 3);

        let flushed: Vec<String> = recorder
            .events()
            .into_iter()
            .map(|(event, payload)| {
                assert_eq!(event, GPS_UPDATE_EVENT);
                payload["device_id"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(flushed, ids);
        assert_eq!(node.pending_len(), 0);
        assert_eq!(node.stats().flushed, 3);
        assert_eq!(node.flush_pending(), 0);
        assert_eq!(recorder.events().len(), 3);
    }

    #[test]
    fn live_and_draining_reports_are_never_double_handled() {
        let (node, recorder) = node();
        node.submit(report(json!({"device_id": "live", "latitude": 1, "longitude": 1})))
            .unwrap();

        let guard = node.begin_draining().unwrap();
        node.submit(report(json!({"device_id": "late", "latitude": 1, "longitude": 1})))
            .unwrap();

        let before_flush: Vec<Value> = recorder.events().into_iter().map(|(_, p)| p).collect();
        assert_eq!(before_flush.len(), 1);
        assert_eq!(before_flush[0]["device_id"], "live");
        assert_eq!(node.pending_len(), 1);

        guard.flush();
        let after_flush: Vec<Value> = recorder.events().into_iter().map(|(_, p)| p).collect();
        assert_eq!(after_flush.len(), 2);
        assert_eq!(after_flush[1]["device_id"], "late");
    }

    #[test]
    fn second_flip_is_refused() {
        let (node, _recorder) = node();
        let guard = node.begin_draining();
        assert!(guard.is_some());
        assert!(node.begin_draining().is_none());
    }

    #[test]
    fn dropped_guard_still_flushes() {
        let (node, recorder) = node();
        {
            let _guard = node.begin_draining().unwrap();
            node.submit(report(json!({"device_id": "x", "latitude": 1, "longitude": 1})))
                .unwrap();
        }
        assert_eq!(recorder.events().len(), 1);
        assert_eq!(node.stats().flushed, 1);
    }

    #[test]
    fn submissions_after_flush_are_refused() {
        let (node, recorder) = node();
        node.begin_draining().unwrap().flush();

        let err = node
            .submit(report(json!({"device_id": "y", "latitude": 1, "longitude": 1})))
            .unwrap_err();

        assert!(matches!(err, SubmitError::ShuttingDown));
        assert_eq!(node.pending_len(), 0);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn concurrent_appends_keep_each_producer_in_order() {
        let (node, recorder) = node();
        let guard = node.begin_draining().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|producer| {
                let node = node.clone();
                std::thread::spawn(move || {
                    for seq in 0..50 {
                        node.submit(report(json!({
                            "device_id": format!("p{producer}"),
                            "latitude": 1,
                            "longitude": 1,
                            "seq": seq,
                        })))
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(guard.flush(), 200);
        let events = recorder.events();
        assert_eq!(events.len(), 200);
        for producer in 0..4 {
            let id = format!("p{producer}");
            let seqs: Vec<u64> = events
                .iter()
                .filter(|(_, p)| p["device_id"] == id.as_str())
                .map(|(_, p)| p["seq"].as_u64().unwrap())
                .collect();
            assert_eq!(seqs, (0..50).collect::<Vec<u64>>());
        }
    }

    #[test]
    fn flip_during_concurrent_submissions_handles_each_report_once() {
        use std::sync::atomic::AtomicBool;

        const PRODUCERS: u64 = 4;
        const AFTER_FLIP: u64 = 10;

        let (node, recorder) = node();
        let stop = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let node = node.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    let mut seq = 0u64;
                    let mut remaining_after_stop = AFTER_FLIP;
                    loop {
                        if stop.load(Ordering::SeqCst) {
                            if remaining_after_stop == 0 {
                                break;
                            }
                            remaining_after_stop -= 1;
                        }
                        node.submit(report(json!({
                            "device_id": format!("p{producer}"),
                            "latitude": 1,
                            "longitude": 1,
                            "seq": seq,
                        })))
                        .unwrap();
                        seq += 1;
                    }
                    seq
                })
            })
            .collect();

        while node.stats().broadcast_live < 50 {
            std::thread::yield_now();
        }
        let guard = node.begin_draining().unwrap();
        stop.store(true, Ordering::SeqCst);

        let submitted: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let total: u64 = submitted.iter().sum();
        let live = node.stats().broadcast_live;
        assert_eq!(recorder.events().len() as u64, live);

        let flushed = guard.flush() as u64;
        let stats = node.stats();
        assert_eq!(stats.broadcast_live + stats.flushed, total);
        assert_eq!(flushed, stats.flushed);
        assert!(live > 0);
        assert!(flushed >= PRODUCERS * AFTER_FLIP);

        let events = recorder.events();
        assert_eq!(events.len() as u64, total);
        let (live_events, flushed_events) = events.split_at(live as usize);
        for (producer, count) in submitted.iter().enumerate() {
            let id = format!("p{producer}");
            let seqs_of = |slice: &[(String, Value)]| -> Vec<u64> {
                slice
                    .iter()
                    .filter(|(_, p)| p["device_id"] == id.as_str())
                    .map(|(_, p)| p["seq"].as_u64().unwrap())
                    .collect()
            };
            let live_seqs = seqs_of(live_events);
            let flushed_seqs = seqs_of(flushed_events);

            if let (Some(last_live), Some(first_flushed)) =
                (live_seqs.last(), flushed_seqs.first())
            {
                assert!(last_live < first_flushed, "producer {producer} interleaved");
            }
            let all: Vec<u64> = live_seqs.into_iter().chain(flushed_seqs).collect();
            assert_eq!(all, (0..*count).collect::<Vec<u64>>());
        }
    }
}
