//! Run progress notifications.
//!
//! The scheduler reports every counter and statistic change through a
//! [`RunObserver`] supplied by the caller. Callbacks run on the scheduler's
//! tasks, after internal locks are released, so they may call back into the
//! scheduler (e.g. `stop()` from a finished handler).

use std::fmt;
use tokio::sync::mpsc;

use crate::stats::ms_to_human_time;
use crate::types::{ResultsTable, StatusCategory};

/// A single named statistic change.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    DomainsTotal(usize),
    DomainsSent(usize),
    DomainsWaiting(usize),
    DomainsProcessed(usize),
    /// Elapsed run time in milliseconds
    TimeCurrent(u64),
    /// Estimated time left in milliseconds
    TimeRemaining(u64),
    ReqTimesMinimum(f64),
    ReqTimesMaximum(f64),
    ReqTimesLast(f64),
    ReqTimesAverage(f64),
    Status {
        category: StatusCategory,
        count: usize,
        /// Share of the queue total, one decimal
        percent: f64,
    },
    LastStatus {
        category: StatusCategory,
        domain: String,
    },
    Finished,
}

impl StatusUpdate {
    /// Dotted stat name, e.g. `domains.sent` or `laststatus.error`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DomainsTotal(_) => "domains.total",
            Self::DomainsSent(_) => "domains.sent",
            Self::DomainsWaiting(_) => "domains.waiting",
            Self::DomainsProcessed(_) => "domains.processed",
            Self::TimeCurrent(_) => "time.current",
            Self::TimeRemaining(_) => "time.remaining",
            Self::ReqTimesMinimum(_) => "reqtimes.minimum",
            Self::ReqTimesMaximum(_) => "reqtimes.maximum",
            Self::ReqTimesLast(_) => "reqtimes.last",
            Self::ReqTimesAverage(_) => "reqtimes.average",
            Self::Status { category, .. } => match category {
                StatusCategory::Available => "status.available",
                StatusCategory::Unavailable => "status.unavailable",
                StatusCategory::Error => "status.error",
            },
            Self::LastStatus { category, .. } => match category {
                StatusCategory::Available => "laststatus.available",
                StatusCategory::Unavailable => "laststatus.unavailable",
                StatusCategory::Error => "laststatus.error",
            },
            Self::Finished => "finished",
        }
    }

    /// Display value; times are rendered human readable.
    pub fn value(&self) -> String {
        match self {
            Self::DomainsTotal(n)
            | Self::DomainsSent(n)
            | Self::DomainsWaiting(n)
            | Self::DomainsProcessed(n) => n.to_string(),
            Self::TimeCurrent(ms) | Self::TimeRemaining(ms) => ms_to_human_time(*ms),
            Self::ReqTimesMinimum(ms)
            | Self::ReqTimesMaximum(ms)
            | Self::ReqTimesLast(ms)
            | Self::ReqTimesAverage(ms) => format!("{:.2}ms", ms),
            Self::Status { count, percent, .. } => format!("{} ({}%)", count, percent),
            Self::LastStatus { domain, .. } => domain.clone(),
            Self::Finished => String::new(),
        }
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => write!(f, "{}", self.name()),
            _ => write!(f, "{} {}", self.name(), self.value()),
        }
    }
}

/// Receives run progress.
pub trait RunObserver: Send + Sync {
    fn on_status_update(&self, update: StatusUpdate);

    /// Called once per completed or stopped run.
    fn on_results_ready(&self, results: &ResultsTable);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RunObserver for NullObserver {
    fn on_status_update(&self, _update: StatusUpdate) {}

    fn on_results_ready(&self, _results: &ResultsTable) {}
}

/// Event forwarded by [`ChannelObserver`].
#[derive(Debug, Clone)]
pub enum RunEvent {
    Status(StatusUpdate),
    Results(ResultsTable),
}

/// Forwards every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RunObserver for ChannelObserver {
    fn on_status_update(&self, update: StatusUpdate) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(RunEvent::Status(update));
    }

    fn on_results_ready(&self, results: &ResultsTable) {
        let _ = self.tx.send(RunEvent::Results(results.clone()));
    }
}
