//! Beacon observation.
//!
//! Every tracker holds an `Arc<dyn BeaconSink>` and reports each beacon it
//! hands to the transport. The CLI and the tests use [`CaptureSink`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::types::{BeaconKind, BeaconRecord, DeliveryMethod};

pub trait BeaconSink: Send + Sync {
    fn emit(&self, record: BeaconRecord);
}

/// Discards everything.
pub struct NoOpSink;

impl BeaconSink for NoOpSink {
    fn emit(&self, _record: BeaconRecord) {}
}

/// Keeps every record in dispatch order.
#[derive(Default)]
pub struct CaptureSink {
    records: Mutex<Vec<BeaconRecord>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<BeaconRecord> {
        self.records.lock().clone()
    }

    pub fn last(&self) -> Option<BeaconRecord> {
        self.records.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn count_kind(&self, kind: BeaconKind) -> usize {
        self.records.lock().iter().filter(|r| r.kind == kind).count()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl BeaconSink for CaptureSink {
    fn emit(&self, record: BeaconRecord) {
        self.records.lock().push(record);
    }
}

/// Record for a beacon sent at `sent_at`, not yet flagged as delayed or
/// truncated.
pub fn make_record(
    instance: usize,
    accounts: impl Into<String>,
    kind: BeaconKind,
    delivery: DeliveryMethod,
    url: impl Into<String>,
    sent_at: DateTime<Utc>,
) -> BeaconRecord {
    BeaconRecord {
        record_id: Uuid::new_v4(),
        instance,
        accounts: accounts.into(),
        kind,
        delivery,
        url: url.into(),
        delayed: false,
        truncated: false,
        timestamp: sent_at,
    }
}

pub fn noop_sink() -> Arc<dyn BeaconSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: BeaconKind, delivery: DeliveryMethod, url: &str) -> BeaconRecord {
        make_record(0, "acct1", kind, delivery, url, Utc::now())
    }

    #[test]
    fn test_capture_sink_keeps_order() {
        let sink = capture_sink();
        assert!(sink.last().is_none());

        sink.emit(record(
            BeaconKind::PageView,
            DeliveryMethod::Image,
            "http://metrics.example.com/b/ss/acct1/1/H.8/s1?[AQB]&ndh=1&[AQE]",
        ));
        sink.emit(record(
            BeaconKind::Link,
            DeliveryMethod::DocumentWrite,
            "http://metrics.example.com/b/ss/acct1/1/H.8/s2?[AQB]&ndh=1&pe=lnk_o&[AQE]",
        ));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_kind(BeaconKind::PageView), 1);
        assert_eq!(sink.last().map(|r| r.kind), Some(BeaconKind::Link));
        assert_eq!(sink.records()[1].delivery, DeliveryMethod::DocumentWrite);

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_make_record_defaults() {
        let at = Utc::now();
        let r = make_record(2, "acct2", BeaconKind::Link, DeliveryMethod::Image, "u", at);
        assert_eq!(r.instance, 2);
        assert_eq!(r.timestamp, at);
        assert!(!r.delayed && !r.truncated);
        assert_ne!(r.record_id, make_record(2, "acct2", BeaconKind::Link, DeliveryMethod::Image, "u", at).record_id);
    }
}
