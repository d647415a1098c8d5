//! Best-effort usage telemetry emitted after each successful provider call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageUnit {
    Tokens,
    ReadUnits,
    WriteUnits,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub provider: String,
    pub operation: &'static str,
    pub model: String,
    pub units: u64,
    pub unit: UsageUnit,
}

impl UsageRecord {
    #[must_use]
    pub fn tokens(provider: &str, operation: &'static str, model: &str, units: u64) -> Self {
        Self {
            provider: provider.to_owned(),
            operation,
            model: model.to_owned(),
            units,
            unit: UsageUnit::Tokens,
        }
    }
}

/// Append-only sink for usage records.
///
/// Implementations must return immediately and never surface errors to the
/// request that produced the record.
pub trait UsageSink: Send + Sync {
    fn record(&self, record: UsageRecord);
}

pub type SharedUsageSink = Arc<dyn UsageSink>;

/// Emits each record as a `tracing` event on the `codementor::usage` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn record(&self, record: UsageRecord) {
        tracing::info!(
            target: "codementor::usage",
            provider = %record.provider,
            operation = record.operation,
            model = %record.model,
            units = record.units,
            unit = ?record.unit,
            "provider usage"
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUsageSink;

impl UsageSink for NoopUsageSink {
    fn record(&self, _record: UsageRecord) {}
}

/// Forwards records to a bounded channel; full or closed channels drop the record.
#[derive(Debug)]
pub struct ChannelUsageSink {
    tx: mpsc::Sender<UsageRecord>,
    dropped: AtomicU64,
}

impl ChannelUsageSink {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<UsageRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Number of records discarded because the consumer fell behind or went away.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl UsageSink for ChannelUsageSink {
    fn record(&self, record: UsageRecord) {
        if self.tx.try_send(record).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(dropped = total, "usage record dropped");
        }
    }
}

#[must_use]
pub fn tracing_sink() -> SharedUsageSink {
    Arc::new(TracingUsageSink)
}
