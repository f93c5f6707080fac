//! Running statistics and the results table.
//!
//! [`ResultAggregator`] folds each completed task into latency figures,
//! per-category counters and the results table, and reports what changed as
//! [`StatusUpdate`]s for the observer.

use serde::Serialize;

use crate::classify::parser::format_date;
use crate::classify::ClassifiedReply;
use crate::config::AveragingSettings;
use crate::observer::StatusUpdate;
use crate::types::{ResultRow, ResultsTable, StatusCategory};

/// Run progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub total: usize,
    pub sent: usize,
    pub waiting: usize,
    pub processed: usize,
}

/// Request times in milliseconds, two decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub last: Option<f64>,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub available: usize,
    pub unavailable: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn get(&self, category: StatusCategory) -> usize {
        match category {
            StatusCategory::Available => self.available,
            StatusCategory::Unavailable => self.unavailable,
            StatusCategory::Error => self.error,
        }
    }

    fn increment(&mut self, category: StatusCategory) -> usize {
        let slot = match category {
            StatusCategory::Available => &mut self.available,
            StatusCategory::Unavailable => &mut self.unavailable,
            StatusCategory::Error => &mut self.error,
        };
        *slot += 1;
        *slot
    }

    pub fn total(&self) -> usize {
        self.available + self.unavailable + self.error
    }
}

/// Most recent domain per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LastDomains {
    pub available: Option<String>,
    pub unavailable: Option<String>,
    pub error: Option<String>,
}

impl LastDomains {
    pub fn get(&self, category: StatusCategory) -> Option<&str> {
        match category {
            StatusCategory::Available => self.available.as_deref(),
            StatusCategory::Unavailable => self.unavailable.as_deref(),
            StatusCategory::Error => self.error.as_deref(),
        }
    }

    fn set(&mut self, category: StatusCategory, domain: &str) {
        let slot = match category {
            StatusCategory::Available => &mut self.available,
            StatusCategory::Unavailable => &mut self.unavailable,
            StatusCategory::Error => &mut self.error,
        };
        *slot = Some(domain.to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    pub latency: LatencyStats,
    pub counts: StatusCounts,
    pub last_domain: LastDomains,
}

/// One finished task, ready to be folded in.
#[derive(Debug, Clone)]
pub struct Completion {
    pub index: usize,
    pub domain: String,
    pub reply: ClassifiedReply,
    pub latency_ms: f64,
}

#[derive(Debug, Clone)]
pub struct ResultAggregator {
    averaging: AveragingSettings,
    stats: AggregateStats,
    results: ResultsTable,
}

impl ResultAggregator {
    pub fn new(averaging: AveragingSettings) -> Self {
        Self {
            averaging,
            stats: AggregateStats::default(),
            results: ResultsTable::default(),
        }
    }

    /// Clear everything for a run of `capacity` tasks.
    pub fn reset(&mut self, capacity: usize) {
        self.stats = AggregateStats::default();
        self.results = ResultsTable::with_capacity(capacity);
    }

    pub fn stats(&self) -> &AggregateStats {
        &self.stats
    }

    pub fn results(&self) -> &ResultsTable {
        &self.results
    }

    /// Fold `completion` in.
    ///
    /// `counters` are the values at reply time, before the task stops
    /// waiting; the progress-weighted average depends on that.
    pub fn record(&mut self, completion: Completion, counters: &RunCounters) -> Vec<StatusUpdate> {
        let mut updates = Vec::with_capacity(7);
        let latency = round2(completion.latency_ms);
        self.record_latency(latency, counters, &mut updates);

        let category = completion.reply.classification.category();
        let count = self.stats.counts.increment(category);
        self.stats.last_domain.set(category, &completion.domain);
        updates.push(StatusUpdate::Status {
            category,
            count,
            percent: percentage(count, counters.total),
        });
        updates.push(StatusUpdate::LastStatus {
            category,
            domain: completion.domain.clone(),
        });

        if let Some(average) = self.stats.latency.average {
            updates.push(StatusUpdate::ReqTimesAverage(average));
        }

        let params = &completion.reply.params;
        let row = ResultRow {
            id: completion.index + 1,
            domain: completion.domain,
            status: completion.reply.classification,
            registrar: params.registrar.clone(),
            company: params.company.clone(),
            creation_date: params.creation_date.as_ref().map(format_date),
            update_date: params.update_date.as_ref().map(format_date),
            expiry_date: params.expiry_date.as_ref().map(format_date),
            reply: completion.reply.reply_text,
            fields: completion.reply.fields,
            request_time_ms: latency,
        };
        self.results.insert(completion.index, row);

        updates
    }

    fn record_latency(&mut self, latency: f64, counters: &RunCounters, updates: &mut Vec<StatusUpdate>) {
        let stats = &mut self.stats.latency;

        if stats.minimum.map_or(true, |min| latency < min) {
            stats.minimum = Some(latency);
            updates.push(StatusUpdate::ReqTimesMinimum(latency));
        }
        if stats.maximum.map_or(true, |max| latency > max) {
            stats.maximum = Some(latency);
            updates.push(StatusUpdate::ReqTimesMaximum(latency));
        }
        stats.last = Some(latency);
        updates.push(StatusUpdate::ReqTimesLast(latency));

        let previous = stats.average.unwrap_or(latency);
        let average = if self.averaging.true_average_override {
            let weight = if counters.processed == 0 {
                0.0
            } else {
                round2(counters.sent.saturating_sub(counters.waiting) as f64 / counters.processed as f64)
            };
            previous * weight + (1.0 - weight) * latency
        } else {
            let alpha = self.averaging.smoothing_factor;
            latency * alpha + (1.0 - alpha) * previous
        };
        stats.average = Some(round2(average));
    }
}

/// Round to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `count / total` as a percentage with one decimal, 0 for an empty total.
pub fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Render a duration like `1 h 2 m 5 s`, largest unit first, zero parts
/// omitted. Months count as four weeks. Zero renders as `-`.
pub fn ms_to_human_time(ms: u64) -> String {
    if ms == 0 {
        return "-".to_string();
    }

    const SECOND: u64 = 1000;
    const MINUTE: u64 = 60 * SECOND;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const WEEK: u64 = 7 * DAY;
    const MONTH: u64 = 4 * WEEK;
    const YEAR: u64 = 12 * MONTH;

    let parts = [
        (ms / YEAR % 10, "Y"),
        (ms / MONTH % 12, "M"),
        (ms / WEEK % 4, "w"),
        (ms / DAY % 7, "d"),
        (ms / HOUR % 24, "h"),
        (ms / MINUTE % 60, "m"),
        (ms / SECOND % 60, "s"),
        (ms % 1000, "ms"),
    ];

    parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{} {}", value, unit))
        .collect::<Vec<_>>()
        .join(" ")
}
