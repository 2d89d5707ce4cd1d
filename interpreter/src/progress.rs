use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use blocks::chain::ChainId;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// Which block is executing right now, as seen from outside the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub chain: ChainId,
    /// Index of the top-level block within `chain`.
    pub block: usize,
    /// Number of frames on the call stack.
    pub depth: usize,
}

/// Receives every snapshot the interpreter publishes.
pub trait ProgressSink {
    fn publish(&self, snapshot: ProgressSnapshot);
}

impl ProgressSink for () {
    fn publish(&self, _snapshot: ProgressSnapshot) {}
}

/// Holds only the latest snapshot. Written by the worker, read by anyone;
/// the lock guarantees readers never see a half-written tuple.
#[derive(Debug, Default)]
pub struct ProgressCell {
    latest: RwLock<Option<ProgressSnapshot>>,
}

impl ProgressCell {
    pub fn latest(&self) -> Option<ProgressSnapshot> {
        *self.latest.read()
    }
}

impl ProgressSink for ProgressCell {
    fn publish(&self, snapshot: ProgressSnapshot) {
        *self.latest.write() = Some(snapshot);
    }
}

/// Records every snapshot in order.
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    entries: Arc<Mutex<Vec<ProgressSnapshot>>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        ProgressLog::default()
    }

    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.entries.lock().clone()
    }
}

impl ProgressSink for ProgressLog {
    fn publish(&self, snapshot: ProgressSnapshot) {
        self.entries.lock().push(snapshot);
    }
}

/// Live frame and scope counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Resources {
    pub frames: usize,
    pub scopes: usize,
}

#[derive(Debug, Default)]
pub struct ResourceGauge {
    frames: AtomicUsize,
    scopes: AtomicUsize,
}

impl ResourceGauge {
    pub fn record(&self, frames: usize, scopes: usize) {
        self.frames.store(frames, Ordering::SeqCst);
        self.scopes.store(scopes, Ordering::SeqCst);
    }

    pub fn resources(&self) -> Resources {
        Resources {
            frames: self.frames.load(Ordering::SeqCst),
            scopes: self.scopes.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_keeps_only_the_latest_snapshot() {
        let cell = ProgressCell::default();
        assert_eq!(cell.latest(), None);
        for block in 0..3 {
            cell.publish(ProgressSnapshot { chain: ChainId(0), block, depth: 1 });
        }
        assert_eq!(cell.latest().map(|s| s.block), Some(2));
    }

    #[test]
    fn snapshots_and_resources_serialize_as_plain_objects() {
        let snapshot = ProgressSnapshot { chain: ChainId(4), block: 2, depth: 1 };
        assert_eq!(
            serde_json::to_value(snapshot).unwrap(),
            serde_json::json!({ "chain": 4, "block": 2, "depth": 1 })
        );

        let gauge = ResourceGauge::default();
        gauge.record(3, 5);
        assert_eq!(
            serde_json::to_string(&gauge.resources()).unwrap(),
            r#"{"frames":3,"scopes":5}"#
        );
    }
}
