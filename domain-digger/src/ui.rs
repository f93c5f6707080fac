//! Terminal rendering for domain-digger.
//!
//! Live progress goes to stderr so stdout only carries results. Uses only the
//! `console` crate.

use console::{pad_str, style, Alignment, Term};
use domain_digger_lib::{
    ms_to_human_time, AggregateStats, Classification, ResultRow, ResultsTable, StatusCategory,
    StatusUpdate,
};

const DOMAIN_WIDTH: usize = 30;

// ── Progress line ────────────────────────────────────────────────────────────

/// Counters mirrored from scheduler updates, redrawn as a single line.
#[derive(Debug, Default)]
pub struct Progress {
    total: usize,
    sent: usize,
    waiting: usize,
    available: usize,
    unavailable: usize,
    errors: usize,
    elapsed_ms: u64,
    remaining_ms: u64,
    average_ms: Option<f64>,
    pub finished: bool,
}

impl Progress {
    /// Fold one update in. Returns whether the line should be redrawn.
    pub fn apply(&mut self, update: &StatusUpdate) -> bool {
        match update {
            StatusUpdate::DomainsTotal(n) => self.total = *n,
            StatusUpdate::DomainsSent(n) => self.sent = *n,
            StatusUpdate::DomainsWaiting(n) => self.waiting = *n,
            StatusUpdate::TimeCurrent(ms) => self.elapsed_ms = *ms,
            StatusUpdate::TimeRemaining(ms) => self.remaining_ms = *ms,
            StatusUpdate::ReqTimesAverage(ms) => self.average_ms = Some(*ms),
            StatusUpdate::Status {
                category, count, ..
            } => match category {
                StatusCategory::Available => self.available = *count,
                StatusCategory::Unavailable => self.unavailable = *count,
                StatusCategory::Error => self.errors = *count,
            },
            StatusUpdate::Finished => self.finished = true,
            _ => return false,
        }
        true
    }

    pub fn processed(&self) -> usize {
        self.available + self.unavailable + self.errors
    }

    /// Plain-text progress line, without styling.
    pub fn line(&self) -> String {
        let average = self
            .average_ms
            .map(|ms| format!("{:.0}ms avg", ms))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "[{}/{}] sent {} | waiting {} | {} available | {} taken | {} errors | {} elapsed | {} left | {}",
            self.processed(),
            self.total,
            self.sent,
            self.waiting,
            self.available,
            self.unavailable,
            self.errors,
            ms_to_human_time(self.elapsed_ms),
            ms_to_human_time(self.remaining_ms),
            average,
        )
    }

    pub fn draw(&self, term: &Term) {
        let _ = term.clear_line();
        let _ = term.write_str(&format!("{}", style(self.line()).dim()));
    }
}

// ── Result lines ─────────────────────────────────────────────────────────────

fn status_label(status: Classification) -> String {
    match status {
        Classification::Available => style("AVAILABLE").green().bold().to_string(),
        Classification::Unavailable => style("TAKEN").red().bold().to_string(),
        Classification::Error(kind) => style(format!("ERROR ({})", kind.as_str()))
            .yellow()
            .to_string(),
    }
}

/// Registrar and expiry, when the reply carried them.
pub fn format_row_info(row: &ResultRow) -> String {
    let mut parts = Vec::new();
    if let Some(registrar) = &row.registrar {
        parts.push(format!("Registrar: {}", registrar));
    }
    if let Some(expiry) = &row.expiry_date {
        parts.push(format!("Expires: {}", expiry));
    }
    parts.join(", ")
}

/// Print one line per completed row, in queue order.
pub fn print_results(results: &ResultsTable, verbose: bool) {
    for row in results.rows() {
        let padded = pad_str(&row.domain, DOMAIN_WIDTH, Alignment::Left, Some(".."));
        let info = format_row_info(row);
        if info.is_empty() {
            println!("  {}  {}", style(&padded).white(), status_label(row.status));
        } else {
            println!(
                "  {}  {}  {}",
                style(&padded).white(),
                status_label(row.status),
                style(info).dim()
            );
        }

        if verbose {
            println!(
                "    {} #{} in {:.0}ms",
                style("└─").dim(),
                row.id,
                row.request_time_ms
            );
        }
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

/// Print the final summary bar with colored counts.
pub fn print_summary(total: usize, stats: &AggregateStats, elapsed_ms: u64, interrupted: bool) {
    let counts = &stats.counts;
    println!(
        "  {}",
        style("────────────────────────────────────────────────────").dim()
    );
    println!(
        "  {}/{} domain{} in {}  {}  {}  {}  {}  {}  {}",
        style(counts.total()).bold(),
        total,
        if total == 1 { "" } else { "s" },
        ms_to_human_time(elapsed_ms),
        style("|").dim(),
        style(format!("{} available", counts.available)).green(),
        style("|").dim(),
        style(format!("{} taken", counts.unavailable)).red(),
        style("|").dim(),
        style(format!("{} errors", counts.error)).yellow(),
    );

    if let (Some(min), Some(max), Some(avg)) = (
        stats.latency.minimum,
        stats.latency.maximum,
        stats.latency.average,
    ) {
        println!(
            "  {}",
            style(format!(
                "request times: min {:.0}ms, max {:.0}ms, avg {:.0}ms",
                min, max, avg
            ))
            .dim()
        );
    }

    if interrupted {
        println!(
            "  {}",
            style("Interrupted: unfinished lookups were cancelled").yellow()
        );
    }
}
