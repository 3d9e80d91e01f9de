//! Per-record delivery callback.
//!
//! Transports hand each incoming record to a [`StreamListener`]; the
//! [`IngestListener`] implementation timestamps the arrival and lands the
//! payload in the buffer. Per-record failures are logged and skipped so one
//! bad record never takes the session down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::buffer::RecordBuffer;
use crate::stats::ArrivalStats;
use crate::transport::RecordDeliveryError;

/// Callback contract a transport invokes during delivery.
///
/// `on_record` may be called from more than one delivery context at a time;
/// implementations must be safe under concurrent invocation.
pub trait StreamListener: Send + Sync {
    /// Called once per successfully delivered record.
    fn on_record(&self, payload: String);

    /// Called when the transport fails to deliver one record.
    fn on_error(&self, error: RecordDeliveryError);
}

/// Listener that updates arrival statistics and buffers each payload.
///
/// Stats are updated before the append, so an arrival is observable in the
/// count no later than its payload is in the buffer; the two are not
/// jointly atomic, and a concurrent reader can see the count briefly ahead
/// of the buffer.
pub struct IngestListener {
    stats: Arc<ArrivalStats>,
    buffer: Arc<RecordBuffer>,
    /// Per-record delivery failures reported by the transport.
    delivery_errors: AtomicU64,
    /// Latched when the stats instance fails, so we log that once.
    stats_failed: AtomicBool,
}

impl IngestListener {
    /// Creates a listener feeding the given stats and buffer.
    pub fn new(stats: Arc<ArrivalStats>, buffer: Arc<RecordBuffer>) -> Self {
        Self {
            stats,
            buffer,
            delivery_errors: AtomicU64::new(0),
            stats_failed: AtomicBool::new(false),
        }
    }

    /// The arrival statistics this listener updates.
    pub fn stats(&self) -> Arc<ArrivalStats> {
        Arc::clone(&self.stats)
    }

    /// The buffer this listener appends to.
    pub fn buffer(&self) -> Arc<RecordBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Count of per-record delivery failures seen so far.
    pub fn delivery_errors(&self) -> u64 {
        self.delivery_errors.load(Ordering::Relaxed)
    }
}

impl StreamListener for IngestListener {
    fn on_record(&self, payload: String) {
        if let Err(e) = self.stats.record_arrival()
            && !self.stats_failed.swap(true, Ordering::AcqRel)
        {
            error!("Arrival stats disabled, ingestion continues: {e}");
        }
        // Buffering continues even with unusable stats; landing records is
        // the session's purpose, the mean is instrumentation.
        self.buffer.append(payload);
    }

    fn on_error(&self, error: RecordDeliveryError) {
        self.delivery_errors.fetch_add(1, Ordering::Relaxed);
        warn!("Record delivery failed, skipping record: {error}");
    }
}
