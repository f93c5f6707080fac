//! Run scheduling.
//!
//! A [`BulkScheduler`] owns one run at a time. `start` compiles the queue and
//! arms one timer per task at a cumulative offset; each timer, when it fires,
//! performs the lookup (through the proxy rotator with retries), classifies
//! the reply and folds it into the aggregator. A one second ticker advances
//! the clocks and finishes the run once every task has replied.
//!
//! ```text
//! Idle ──start──▶ Running ──pause──▶ Paused
//!                  │  ▲                 │
//!                  │  └─────resume──────┘
//!                  ├──(all replied)──▶ Finished
//!                  └──stop──▶ Stopped ◀──stop── Paused
//! ```
//!
//! All methods except [`BulkScheduler::wait`] are synchronous but spawn tokio
//! tasks, so they must be called from within a runtime.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classify::parser::{DomainParameters, ReplyFields};
use crate::classify::{ClassificationEngine, ClassifiedReply};
use crate::config::LookupSettings;
use crate::error::DiggerError;
use crate::observer::{RunObserver, StatusUpdate};
use crate::proxy::{with_retry, ProxyRotator};
use crate::queue::{
    compile_queue, convert_domain, estimate_remaining_ms, registrable_domain, schedule_indices,
};
use crate::stats::{AggregateStats, Completion, ResultAggregator, RunCounters};
use crate::transport::{fetch, LookupTransport, NetworkTransport};
use crate::types::{Classification, ErrorKind, LookupTask, ResultsTable};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
    Finished,
}

impl SchedulerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Finished)
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// Mutable per-run bookkeeping. Replaced wholesale by `start`.
struct RunState {
    phase: SchedulerState,
    /// Bumped by every `start`; tasks from an older run check it and bail
    generation: u64,
    queue: Arc<Vec<String>>,
    counters: RunCounters,
    elapsed_ms: u64,
    remaining_ms: u64,
    /// Armed, unfired timers by queue index, tagged with their arm token
    timers: HashMap<usize, (u64, JoinHandle<()>)>,
    /// Source of arm tokens; a re-armed index never reuses one
    next_token: u64,
    /// Indices cancelled by `pause`, re-armed by `resume`
    pending: BTreeSet<usize>,
    ticker: Option<JoinHandle<()>>,
    aggregator: ResultAggregator,
}

impl RunState {
    fn abort_all(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        for (_, (_, timer)) in self.timers.drain() {
            timer.abort();
        }
    }

    /// Take the timer entry for `index` if it still belongs to this arm.
    fn claim(&mut self, generation: u64, index: usize, token: u64) -> bool {
        if self.generation != generation || self.phase != SchedulerState::Running {
            return false;
        }
        match self.timers.get(&index) {
            Some((armed, _)) if *armed == token => {
                self.timers.remove(&index);
                true
            }
            _ => false,
        }
    }
}

struct Inner {
    settings: Arc<LookupSettings>,
    transport: Arc<dyn LookupTransport>,
    engine: Arc<ClassificationEngine>,
    rotator: Arc<ProxyRotator>,
    observer: Arc<dyn RunObserver>,
    limiter: Option<Arc<Semaphore>>,
    phase_tx: watch::Sender<SchedulerState>,
    state: Mutex<RunState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, updates: Vec<StatusUpdate>) {
        for update in updates {
            self.observer.on_status_update(update);
        }
    }

    fn set_phase(&self, state: &mut RunState, phase: SchedulerState) {
        state.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn finish(&self, results: ResultsTable) {
        self.observer.on_results_ready(&results);
        self.observer.on_status_update(StatusUpdate::Finished);
    }
}

/// Drives one bulk run at a time.
pub struct BulkScheduler {
    inner: Arc<Inner>,
}

impl BulkScheduler {
    pub fn new(
        settings: Arc<LookupSettings>,
        transport: Arc<dyn LookupTransport>,
        engine: Arc<ClassificationEngine>,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        let rotator = Arc::new(ProxyRotator::new(&settings.proxy));
        let limiter = match settings.general.concurrency {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        let (phase_tx, _) = watch::channel(SchedulerState::Idle);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RunState {
                    phase: SchedulerState::Idle,
                    generation: 0,
                    queue: Arc::new(Vec::new()),
                    counters: RunCounters::default(),
                    elapsed_ms: 0,
                    remaining_ms: 0,
                    timers: HashMap::new(),
                    next_token: 0,
                    pending: BTreeSet::new(),
                    ticker: None,
                    aggregator: ResultAggregator::new(settings.averaging.clone()),
                }),
                settings,
                transport,
                engine,
                rotator,
                observer,
                limiter,
                phase_tx,
            }),
        }
    }

    /// Validate `settings` and wire up the network transport and the
    /// classification engine they describe.
    pub fn from_settings(
        settings: Arc<LookupSettings>,
        observer: Arc<dyn RunObserver>,
    ) -> Result<Self, DiggerError> {
        settings.validate()?;
        let transport = Arc::new(NetworkTransport::from_settings(&settings)?);
        let engine = Arc::new(ClassificationEngine::from_settings(&settings)?);
        Ok(Self::new(settings, transport, engine, observer))
    }

    pub fn settings(&self) -> &LookupSettings {
        &self.inner.settings
    }

    pub fn rotator(&self) -> &ProxyRotator {
        &self.inner.rotator
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().phase
    }

    pub fn counters(&self) -> RunCounters {
        self.inner.lock().counters
    }

    pub fn stats(&self) -> AggregateStats {
        self.inner.lock().aggregator.stats().clone()
    }

    pub fn results(&self) -> ResultsTable {
        self.inner.lock().aggregator.results().clone()
    }

    /// Elapsed and estimated remaining milliseconds.
    pub fn clock(&self) -> (u64, u64) {
        let state = self.inner.lock();
        (state.elapsed_ms, state.remaining_ms)
    }

    /// Start a run over `domains × tlds`, replacing any finished one.
    ///
    /// Returns the queue size.
    ///
    /// # Errors
    ///
    /// `InvalidState` while a run is running or paused.
    pub fn start(&self, domains: &[String], tlds: &[String]) -> Result<usize, DiggerError> {
        let inner = &self.inner;
        let settings = &inner.settings;
        let mut state = inner.lock();
        if matches!(state.phase, SchedulerState::Running | SchedulerState::Paused) {
            return Err(DiggerError::invalid_state("start", state.phase.to_string()));
        }

        let conversion = settings.general.conversion.as_deref();
        let words: Vec<String> = domains
            .iter()
            .map(|d| convert_domain(d.trim(), conversion))
            .filter(|d| !d.is_empty())
            .collect();
        let tlds: Vec<String> = tlds
            .iter()
            .map(|t| convert_domain(t.trim(), conversion))
            .collect();
        let queue = compile_queue(&words, &tlds, &settings.general.tld_separator);
        let total = queue.len();

        state.abort_all();
        state.generation += 1;
        state.queue = Arc::new(queue);
        state.counters = RunCounters {
            total,
            ..Default::default()
        };
        state.elapsed_ms = 0;
        state.remaining_ms = estimate_remaining_ms(total, settings);
        state.pending.clear();
        state.aggregator.reset(total);
        inner.set_phase(&mut state, SchedulerState::Running);

        info!(
            total,
            kind = %settings.general.lookup_type,
            generation = state.generation,
            "starting bulk run"
        );

        let mut updates = vec![
            StatusUpdate::DomainsTotal(total),
            StatusUpdate::DomainsSent(0),
            StatusUpdate::DomainsWaiting(0),
        ];
        arm(inner, &mut state, 0..total, &mut updates);
        updates.push(StatusUpdate::TimeRemaining(state.remaining_ms));
        start_ticker(inner, &mut state);

        drop(state);
        inner.emit(updates);
        Ok(total)
    }

    /// Cancel every unfired timer and stop the clock.
    ///
    /// In-flight lookups still complete and are counted.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless running.
    pub fn pause(&self) -> Result<(), DiggerError> {
        let inner = &self.inner;
        let mut state = inner.lock();
        if state.phase != SchedulerState::Running {
            return Err(DiggerError::invalid_state("pause", state.phase.to_string()));
        }

        let cancelled: Vec<usize> = state.timers.keys().copied().collect();
        state.abort_all();
        state.pending.extend(cancelled);
        inner.set_phase(&mut state, SchedulerState::Paused);

        info!(
            sent = state.counters.sent,
            pending = state.pending.len(),
            "paused bulk run"
        );
        Ok(())
    }

    /// Re-arm the cancelled tasks with a fresh schedule anchored now.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless paused.
    pub fn resume(&self) -> Result<(), DiggerError> {
        let inner = &self.inner;
        let mut state = inner.lock();
        if state.phase != SchedulerState::Paused {
            return Err(DiggerError::invalid_state("resume", state.phase.to_string()));
        }

        let pending = std::mem::take(&mut state.pending);
        state.remaining_ms = estimate_remaining_ms(pending.len(), &inner.settings);
        inner.set_phase(&mut state, SchedulerState::Running);
        info!(pending = pending.len(), "resuming bulk run");

        let mut updates = Vec::new();
        arm(inner, &mut state, pending, &mut updates);
        updates.push(StatusUpdate::TimeRemaining(state.remaining_ms));
        start_ticker(inner, &mut state);

        drop(state);
        inner.emit(updates);
        Ok(())
    }

    /// End the run now and deliver whatever results exist.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless running or paused.
    pub fn stop(&self) -> Result<(), DiggerError> {
        let inner = &self.inner;
        let mut state = inner.lock();
        if !matches!(state.phase, SchedulerState::Running | SchedulerState::Paused) {
            return Err(DiggerError::invalid_state("stop", state.phase.to_string()));
        }

        let unfired = state.timers.len() + state.pending.len();
        state.abort_all();
        state.pending.clear();
        inner.set_phase(&mut state, SchedulerState::Stopped);
        let results = state.aggregator.results().clone();
        info!(
            sent = state.counters.sent,
            waiting = state.counters.waiting,
            unfired,
            "stopped bulk run"
        );

        drop(state);
        inner.finish(results);
        Ok(())
    }

    /// Resolve once the current run is stopped or finished.
    pub async fn wait(&self) -> SchedulerState {
        let mut rx = self.inner.phase_tx.subscribe();
        // Bound to a local so the borrow guard drops before `rx`
        #[allow(clippy::let_and_return)]
        let phase = match rx.wait_for(SchedulerState::is_terminal).await {
            Ok(phase) => *phase,
            // The sender lives in `inner`, which we hold
            Err(_) => self.state(),
        };
        phase
    }
}

impl Drop for BulkScheduler {
    fn drop(&mut self) {
        self.inner.lock().abort_all();
    }
}

/// Spawn timers for `indices` with cumulative offsets from now.
fn arm<I>(inner: &Arc<Inner>, state: &mut RunState, indices: I, updates: &mut Vec<StatusUpdate>)
where
    I: IntoIterator<Item = usize>,
{
    let tasks = schedule_indices(&mut rand::rng(), &state.queue, indices, &inner.settings);
    let generation = state.generation;

    for task in tasks {
        debug!(
            domain = %task.domain,
            index = task.index,
            offset_ms = task.dispatch_offset_ms,
            follow = task.follow_depth,
            timeout_ms = task.timeout_ms,
            "arming lookup"
        );
        let index = task.index;
        state.next_token += 1;
        let token = state.next_token;
        let handle = tokio::spawn(run_task(inner.clone(), generation, token, task));
        state.timers.insert(index, (token, handle));
        state.counters.processed = index + 1;
        updates.push(StatusUpdate::DomainsProcessed(state.counters.processed));
    }
}

fn start_ticker(inner: &Arc<Inner>, state: &mut RunState) {
    if let Some(old) = state.ticker.take() {
        old.abort();
    }
    state.ticker = Some(tokio::spawn(tick(inner.clone(), state.generation)));
}

async fn tick(inner: Arc<Inner>, generation: u64) {
    let mut interval = tokio::time::interval_at(Instant::now() + TICK, TICK);

    loop {
        interval.tick().await;

        let mut state = inner.lock();
        if state.generation != generation || state.phase != SchedulerState::Running {
            return;
        }

        state.elapsed_ms += TICK.as_millis() as u64;
        state.remaining_ms = state.remaining_ms.saturating_sub(TICK.as_millis() as u64);
        let updates = vec![
            StatusUpdate::TimeCurrent(state.elapsed_ms),
            StatusUpdate::TimeRemaining(state.remaining_ms),
        ];

        let counters = state.counters;
        let done = counters.sent == counters.total && counters.waiting == 0;
        let results = if done {
            state.ticker = None;
            inner.set_phase(&mut state, SchedulerState::Finished);
            info!(total = counters.total, elapsed_ms = state.elapsed_ms, "bulk run finished");
            Some(state.aggregator.results().clone())
        } else {
            None
        };

        drop(state);
        inner.emit(updates);
        if let Some(results) = results {
            inner.finish(results);
            return;
        }
    }
}

async fn run_task(inner: Arc<Inner>, generation: u64, token: u64, task: LookupTask) {
    tokio::time::sleep(Duration::from_millis(task.dispatch_offset_ms)).await;

    // Waiting for a permit still counts as unfired, so pause can cancel it
    let _permit = match &inner.limiter {
        Some(limiter) => match limiter.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => return,
        },
        None => None,
    };

    {
        let mut state = inner.lock();
        if !state.claim(generation, task.index, token) {
            return;
        }
        state.counters.sent += 1;
        state.counters.waiting += 1;
        let updates = vec![
            StatusUpdate::DomainsSent(state.counters.sent),
            StatusUpdate::DomainsWaiting(state.counters.waiting),
        ];
        drop(state);
        inner.emit(updates);
    }

    debug!(domain = %task.domain, index = task.index, "dispatching lookup");
    let started = Instant::now();

    // Spawned so a panicking lookup still settles its counters
    let reply = match tokio::spawn(lookup(inner.clone(), task.clone())).await {
        Ok(reply) => reply,
        Err(e) => {
            let error = DiggerError::internal(format!("lookup task failed: {}", e));
            warn!(domain = %task.domain, error = %error, "lookup aborted");
            error_reply(&error)
        }
    };
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    debug!(domain = %task.domain, status = %reply.classification, latency_ms, "lookup classified");

    let mut state = inner.lock();
    if state.generation != generation {
        return;
    }
    let counters = state.counters;
    let mut updates = state.aggregator.record(
        Completion {
            index: task.index,
            domain: task.domain.clone(),
            reply,
            latency_ms,
        },
        &counters,
    );
    state.counters.waiting = state.counters.waiting.saturating_sub(1);
    updates.push(StatusUpdate::DomainsWaiting(state.counters.waiting));
    drop(state);
    inner.emit(updates);
}

/// Fetch and classify one task through the rotator.
async fn lookup(inner: Arc<Inner>, task: LookupTask) -> ClassifiedReply {
    let settings = &inner.settings;
    let kind = settings.general.lookup_type;
    let timeout = Duration::from_millis(task.timeout_ms);
    let transport = inner.transport.as_ref();
    let domain = if settings.general.psl {
        registrable_domain(&task.domain)
    } else {
        task.domain.as_str()
    };

    let outcome = with_retry(&inner.rotator, settings.general.max_attempts, |proxy| {
        fetch(transport, kind, domain, task.follow_depth, timeout, proxy)
    })
    .await;

    match outcome {
        Ok(raw) => inner.engine.classify_reply(&raw, Utc::now()),
        Err(e) => {
            warn!(domain, error = %e, "lookup failed");
            error_reply(&e)
        }
    }
}

fn error_reply(error: &DiggerError) -> ClassifiedReply {
    ClassifiedReply {
        classification: Classification::Error(ErrorKind::ReplyError),
        reply_text: error.reply_text(),
        fields: ReplyFields::new(),
        params: DomainParameters::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ChannelObserver, RunEvent};
    use crate::transport::{DnsOutcome, RdapOptions, RdapReply, WhoisOptions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers "No match" for everything, failing for domains starting with
    /// "bad" and panicking for ones starting with "boom".
    #[derive(Default)]
    struct Scripted {
        delay: Duration,
        calls: Mutex<HashMap<String, usize>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Scripted {
        fn calls(&self, domain: &str) -> usize {
            self.calls.lock().unwrap().get(domain).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl LookupTransport for Scripted {
        async fn whois(&self, domain: &str, _opts: &WhoisOptions) -> Result<String, DiggerError> {
            *self.calls.lock().unwrap().entry(domain.to_string()).or_default() += 1;
            if domain.starts_with("boom") {
                panic!("transport blew up on {}", domain);
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if domain.starts_with("bad") {
                Err(DiggerError::network("connection reset"))
            } else if domain.starts_with("taken") {
                Ok("Domain Name: TAKEN\nRegistrar: Example\n".to_string())
            } else {
                Ok(format!("No match for {}", domain))
            }
        }

        async fn dns(&self, _domain: &str) -> DnsOutcome {
            DnsOutcome::NoSuchDomain
        }

        async fn rdap(&self, _domain: &str, _opts: &RdapOptions) -> Result<RdapReply, DiggerError> {
            Err(DiggerError::rdap("x", "unused"))
        }
    }

    fn settings(time_between_ms: u64) -> LookupSettings {
        let mut settings = LookupSettings::default();
        settings.general.time_between_ms = time_between_ms;
        settings.general.max_attempts = 2;
        settings
    }

    fn scheduler(settings: LookupSettings, transport: Arc<Scripted>) -> (BulkScheduler, tokio::sync::mpsc::UnboundedReceiver<RunEvent>) {
        let (observer, rx) = ChannelObserver::new();
        let engine = Arc::new(ClassificationEngine::new(settings.assumptions.clone()));
        let scheduler = BulkScheduler::new(Arc::new(settings), transport, engine, Arc::new(observer));
        (scheduler, rx)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_counts() {
        let transport = Arc::new(Scripted::default());
        let (scheduler, mut rx) = scheduler(settings(1000), transport.clone());

        let total = scheduler
            .start(&strings(&["a", "taken"]), &strings(&["com", "net"]))
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(scheduler.counters().processed, 4);
        assert_eq!(scheduler.counters().sent, 0);

        assert_eq!(scheduler.wait().await, SchedulerState::Finished);

        let counters = scheduler.counters();
        assert_eq!(counters.sent, 4);
        assert_eq!(counters.processed, 4);
        assert_eq!(counters.waiting, 0);

        let stats = scheduler.stats();
        assert_eq!(stats.counts.available, 2);
        assert_eq!(stats.counts.unavailable, 2);
        assert_eq!(stats.last_domain.unavailable.as_deref(), Some("taken.net"));

        let results = scheduler.results();
        let domains: Vec<&str> = results.rows().map(|r| r.domain.as_str()).collect();
        assert_eq!(domains, vec!["a.com", "taken.com", "a.net", "taken.net"]);
        assert_eq!(results.get(1).unwrap().registrar.as_deref(), Some("Example"));

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::Status(StatusUpdate::DomainsTotal(4)))));
        assert!(events.iter().any(|e| matches!(e, RunEvent::Results(r) if r.completed() == 4)));
        assert!(matches!(
            events.last(),
            Some(RunEvent::Status(StatusUpdate::Finished))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_follows_cumulative_offsets() {
        let transport = Arc::new(Scripted::default());
        let (scheduler, _rx) = scheduler(settings(1000), transport.clone());
        scheduler
            .start(&strings(&["a", "b", "c"]), &strings(&["com"]))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(scheduler.counters().sent, 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(scheduler.counters().sent, 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(scheduler.counters().sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_dispatches_each_once() {
        let transport = Arc::new(Scripted::default());
        let (scheduler, _rx) = scheduler(settings(1000), transport.clone());
        let words = strings(&["a", "b", "c", "d", "e"]);
        scheduler.start(&words, &strings(&["com"])).unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.pause().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Paused);
        let sent_at_pause = scheduler.counters().sent;
        assert_eq!(sent_at_pause, 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(scheduler.counters().sent, sent_at_pause);

        scheduler.resume().unwrap();
        // Three unfired tasks left, not the whole run
        assert_eq!(scheduler.clock().1, 3 * 1000 + 2500);
        assert_eq!(scheduler.wait().await, SchedulerState::Finished);

        for word in &words {
            assert_eq!(transport.calls(&format!("{}.com", word)), 1, "{}", word);
        }
        let counters = scheduler.counters();
        assert_eq!(counters.sent, 5);
        assert_eq!(counters.processed, 5);
        assert_eq!(counters.waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_becomes_error_row() {
        let transport = Arc::new(Scripted::default());
        let (scheduler, _rx) = scheduler(settings(100), transport.clone());
        scheduler
            .start(&strings(&["bad", "ok"]), &strings(&["com"]))
            .unwrap();
        scheduler.wait().await;

        // Two attempts with max_attempts = 2
        assert_eq!(transport.calls("bad.com"), 2);

        let results = scheduler.results();
        let row = results.get(0).unwrap();
        assert_eq!(row.status, Classification::Error(ErrorKind::ReplyError));
        assert!(row.reply.starts_with("Whois lookup error"));
        assert_eq!(results.get(1).unwrap().status, Classification::Available);
        assert_eq!(scheduler.stats().counts.error, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_armed_timers() {
        let transport = Arc::new(Scripted::default());
        let (scheduler, mut rx) = scheduler(settings(1000), transport.clone());
        scheduler
            .start(&strings(&["a", "b", "c"]), &strings(&["com"]))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.stop().unwrap();
        assert_eq!(scheduler.wait().await, SchedulerState::Stopped);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.total_calls(), 1);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, RunEvent::Results(r) if r.completed() == 1)));
        assert!(matches!(
            events.last(),
            Some(RunEvent::Status(StatusUpdate::Finished))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transitions() {
        let transport = Arc::new(Scripted::default());
        let (scheduler, _rx) = scheduler(settings(10), transport);

        assert!(matches!(scheduler.pause(), Err(DiggerError::InvalidState { .. })));
        assert!(scheduler.resume().is_err());
        assert!(scheduler.stop().is_err());

        scheduler.start(&strings(&["a"]), &strings(&["com"])).unwrap();
        assert!(scheduler.start(&strings(&["a"]), &strings(&["com"])).is_err());
        assert!(scheduler.resume().is_err());

        scheduler.wait().await;
        assert!(scheduler.stop().is_err());
        assert!(scheduler.pause().is_err());

        // A finished scheduler can run again
        assert_eq!(scheduler.start(&strings(&["b"]), &strings(&["com"])).unwrap(), 1);
        assert_eq!(scheduler.counters().sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit() {
        let transport = Arc::new(Scripted {
            delay: Duration::from_millis(500),
            ..Default::default()
        });
        let mut settings = settings(0);
        settings.general.concurrency = 1;
        let (scheduler, _rx) = scheduler(settings, transport.clone());

        scheduler
            .start(&strings(&["a", "b", "c", "d"]), &strings(&["com"]))
            .unwrap();
        scheduler.wait().await;

        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.counters().sent, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_finishes() {
        let transport = Arc::new(Scripted::default());
        let (scheduler, _rx) = scheduler(settings(10), transport);
        assert_eq!(scheduler.start(&[], &strings(&["com"])).unwrap(), 0);
        assert_eq!(scheduler.wait().await, SchedulerState::Finished);
        assert!(scheduler.results().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_counts_down() {
        let transport = Arc::new(Scripted::default());
        let (scheduler, _rx) = scheduler(settings(1000), transport);
        scheduler
            .start(&strings(&["a", "b", "c"]), &strings(&["com"]))
            .unwrap();
        let (_, remaining) = scheduler.clock();
        assert_eq!(remaining, 3 * 1000 + 2500);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let (elapsed, remaining) = scheduler.clock();
        assert_eq!(elapsed, 2000);
        assert_eq!(remaining, 3500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_lookup_is_isolated() {
        let transport = Arc::new(Scripted::default());
        let (scheduler, _rx) = scheduler(settings(100), transport.clone());
        scheduler
            .start(&strings(&["boom", "ok"]), &strings(&["com"]))
            .unwrap();

        let finished = tokio::time::timeout(Duration::from_secs(60), scheduler.wait()).await;
        assert_eq!(finished.unwrap(), SchedulerState::Finished);

        let counters = scheduler.counters();
        assert_eq!(counters.sent, 2);
        assert_eq!(counters.waiting, 0);

        let results = scheduler.results();
        let row = results.get(0).unwrap();
        assert_eq!(row.status, Classification::Error(ErrorKind::ReplyError));
        assert!(row.reply.contains("lookup task failed"));
        assert_eq!(results.get(1).unwrap().status, Classification::Available);
    }

    #[tokio::test]
    async fn test_stale_arm_cannot_claim_rearmed_timer() {
        let transport = Arc::new(Scripted::default());
        let (scheduler, _rx) = scheduler(settings(1000), transport);
        let mut state = scheduler.inner.lock();
        state.phase = SchedulerState::Running;
        state.timers.insert(0, (2, tokio::spawn(async {})));

        // Token 1 is the arm cancelled by a pause before the resume re-armed
        assert!(!state.claim(0, 0, 1));
        assert!(state.timers.contains_key(&0));

        assert!(state.claim(0, 0, 2));
        assert!(state.timers.is_empty());
        assert!(!state.claim(0, 0, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_psl_queries_registrable_domain() {
        let transport = Arc::new(Scripted::default());
        let mut settings = settings(100);
        settings.general.psl = true;
        let (scheduler, _rx) = scheduler(settings, transport.clone());

        scheduler
            .start(&strings(&["www.shop"]), &strings(&["co.uk"]))
            .unwrap();
        scheduler.wait().await;

        assert_eq!(transport.calls("shop.co.uk"), 1);
        assert_eq!(transport.calls("www.shop.co.uk"), 0);
        assert_eq!(scheduler.results().get(0).unwrap().domain, "www.shop.co.uk");
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversion_applies_to_words_and_tlds() {
        let transport = Arc::new(Scripted::default());
        let mut settings = settings(100);
        settings.general.conversion = Some("uts46".to_string());
        let (scheduler, _rx) = scheduler(settings, transport.clone());

        scheduler
            .start(&strings(&["café"]), &strings(&["com"]))
            .unwrap();
        scheduler.wait().await;

        assert_eq!(transport.calls("xn--caf-dma.com"), 1);
    }
}
