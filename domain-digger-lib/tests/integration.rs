// domain-digger-lib/tests/integration.rs

//! End-to-end runs through the public API with a scripted transport.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain_digger_lib::protocols::{DnsOutcome, RdapOptions, RdapReply, WhoisOptions};
use domain_digger_lib::{
    compile_queue, BulkScheduler, ChannelObserver, Classification, ClassificationEngine,
    ConfigManager, DiggerError, ErrorKind, LookupKind, LookupSettings, LookupTransport,
    NullObserver, ProxyEntry, ProxyMode, RotationPolicy, RunEvent, SchedulerState, StatusUpdate,
};

/// Canned replies keyed by domain prefix, recording which proxy served each call.
#[derive(Default)]
struct ScriptedTransport {
    proxies_used: Mutex<Vec<Option<String>>>,
    failing_proxy_port: Option<u16>,
}

impl ScriptedTransport {
    fn reply_for(domain: &str) -> &'static str {
        match domain.split('.').next().unwrap_or_default() {
            "taken" => "Domain Name: TAKEN\nRegistrar: Example Registrar, Inc.\nCreation Date: 2001-02-03T00:00:00Z\nRegistry Expiry Date: 2099-02-03T00:00:00Z\n",
            "limited" => "Your connection limit exceeded. Please slow down.",
            "empty" => "",
            "reserved" => "This name is reserved by aeDA Regulator",
            _ => "No match for domain",
        }
    }

    fn proxies(&self) -> Vec<Option<String>> {
        self.proxies_used.lock().unwrap().clone()
    }
}

#[async_trait]
impl LookupTransport for ScriptedTransport {
    async fn whois(&self, domain: &str, opts: &WhoisOptions) -> Result<String, DiggerError> {
        self.proxies_used
            .lock()
            .unwrap()
            .push(opts.proxy.as_ref().map(|p| p.key()));

        if let (Some(port), Some(proxy)) = (self.failing_proxy_port, &opts.proxy) {
            if proxy.port == port {
                return Err(DiggerError::network("proxy refused connection"));
            }
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        Ok(Self::reply_for(domain).to_string())
    }

    async fn dns(&self, domain: &str) -> DnsOutcome {
        if domain.starts_with("taken") {
            DnsOutcome::HasNameservers(vec!["ns1.example.net".to_string()])
        } else {
            DnsOutcome::NoSuchDomain
        }
    }

    async fn rdap(&self, domain: &str, _opts: &RdapOptions) -> Result<RdapReply, DiggerError> {
        let status_code = if domain.starts_with("taken") { 200 } else { 404 };
        Ok(RdapReply {
            status_code,
            body: format!(r#"{{"ldhName":"{}"}}"#, domain),
        })
    }
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn build(settings: LookupSettings, transport: Arc<ScriptedTransport>) -> BulkScheduler {
    let engine = Arc::new(ClassificationEngine::new(settings.assumptions.clone()));
    BulkScheduler::new(Arc::new(settings), transport, engine, Arc::new(NullObserver))
}

#[test]
fn test_library_exports_work() {
    let queue = compile_queue(&words(&["a", "b"]), &words(&["com", "net"]), ".");
    assert_eq!(queue, vec!["a.com", "b.com", "a.net", "b.net"]);

    let info = domain_digger_lib::info();
    assert!(!info.version.is_empty());
    assert!(info.features.contains(&"whois"));
}

#[tokio::test(start_paused = true)]
async fn test_whois_run_classifies_every_kind() {
    let mut settings = LookupSettings::default();
    settings.general.time_between_ms = 200;
    let transport = Arc::new(ScriptedTransport::default());
    let scheduler = build(settings, transport);

    let names = words(&["free", "taken", "limited", "empty", "reserved"]);
    scheduler.start(&names, &words(&["com"])).unwrap();
    assert_eq!(scheduler.wait().await, SchedulerState::Finished);

    let results = scheduler.results();
    let statuses: Vec<Classification> = results.rows().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            Classification::Available,
            Classification::Unavailable,
            Classification::Error(ErrorKind::RateLimiting),
            Classification::Error(ErrorKind::NoContent),
            Classification::Error(ErrorKind::ReservedByRegulator),
        ]
    );

    let taken = results.get(1).unwrap();
    assert_eq!(taken.registrar.as_deref(), Some("Example Registrar, Inc."));
    assert!(taken.expiry_date.as_deref().unwrap().contains("2099"));
    assert_eq!(taken.id, 2);

    let stats = scheduler.stats();
    assert_eq!(stats.counts.available, 1);
    assert_eq!(stats.counts.unavailable, 1);
    assert_eq!(stats.counts.error, 3);
    assert!(stats.latency.average.is_some());

    let json = serde_json::to_value(&results).unwrap();
    assert_eq!(json[2]["status"], "error:ratelimiting");
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_assumption_flips_verdict() {
    let mut settings = LookupSettings::default();
    settings.general.time_between_ms = 10;
    settings.assumptions.ratelimit = true;
    let scheduler = build(settings, Arc::new(ScriptedTransport::default()));

    scheduler.start(&words(&["limited"]), &words(&["com"])).unwrap();
    scheduler.wait().await;
    assert_eq!(
        scheduler.results().get(0).unwrap().status,
        Classification::Unavailable
    );
}

#[tokio::test(start_paused = true)]
async fn test_dns_and_rdap_modes() {
    let mut settings = LookupSettings::default();
    settings.general.lookup_type = LookupKind::Dns;
    let scheduler = build(settings, Arc::new(ScriptedTransport::default()));
    scheduler.start(&words(&["free", "taken"]), &words(&["io"])).unwrap();
    scheduler.wait().await;
    let statuses: Vec<_> = scheduler.results().rows().map(|r| r.status).collect();
    assert_eq!(statuses, vec![Classification::Available, Classification::Unavailable]);

    let mut settings = LookupSettings::default();
    settings.general.lookup_type = LookupKind::Rdap;
    settings.general.time_between_ms = 10;
    let scheduler = build(settings, Arc::new(ScriptedTransport::default()));
    scheduler.start(&words(&["free", "taken"]), &words(&["dev"])).unwrap();
    scheduler.wait().await;
    let results = scheduler.results();
    assert_eq!(results.get(0).unwrap().status, Classification::Available);
    assert_eq!(results.get(1).unwrap().status, Classification::Unavailable);
    assert_eq!(
        results.get(1).unwrap().fields.get("domainName").map(String::as_str),
        Some("taken.dev")
    );
}

#[tokio::test(start_paused = true)]
async fn test_failing_proxy_is_skipped() {
    let mut settings = LookupSettings::default();
    settings.general.time_between_ms = 100;
    settings.general.max_attempts = 3;
    settings.proxy.enable = true;
    settings.proxy.mode = ProxyMode::Multi;
    settings.proxy.multimode = RotationPolicy::Sequential;
    settings.proxy.retries = 1;
    settings.proxy.list = vec![
        ProxyEntry::from("127.0.0.1:1080"),
        ProxyEntry::from("127.0.0.1:1081"),
    ];

    let transport = Arc::new(ScriptedTransport {
        failing_proxy_port: Some(1080),
        ..Default::default()
    });
    let scheduler = build(settings, transport.clone());

    scheduler.start(&words(&["a", "b", "c"]), &words(&["com"])).unwrap();
    scheduler.wait().await;

    let used = transport.proxies();
    let bad = used
        .iter()
        .filter(|p| p.as_deref() == Some("127.0.0.1:1080"))
        .count();
    assert_eq!(bad, 1, "exhausted proxy was reused: {:?}", used);
    assert!(scheduler
        .results()
        .rows()
        .all(|r| r.status == Classification::Available));
}

#[tokio::test(start_paused = true)]
async fn test_observer_sees_progress_in_order() {
    let mut settings = LookupSettings::default();
    settings.general.time_between_ms = 500;
    let (observer, mut rx) = ChannelObserver::new();
    let engine = Arc::new(ClassificationEngine::new(settings.assumptions.clone()));
    let scheduler = BulkScheduler::new(
        Arc::new(settings),
        Arc::new(ScriptedTransport::default()),
        engine,
        Arc::new(observer),
    );

    scheduler.start(&words(&["a", "b"]), &words(&["com"])).unwrap();
    scheduler.wait().await;

    let mut names: HashMap<&'static str, usize> = HashMap::new();
    let mut finished_after_results = false;
    let mut saw_results = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            RunEvent::Status(update) => {
                *names.entry(update.name()).or_default() += 1;
                if update == StatusUpdate::Finished {
                    finished_after_results = saw_results;
                }
            }
            RunEvent::Results(table) => {
                assert_eq!(table.completed(), 2);
                saw_results = true;
            }
        }
    }

    assert!(finished_after_results);
    assert_eq!(names.get("domains.total"), Some(&1));
    assert_eq!(names.get("domains.sent"), Some(&3));
    assert_eq!(names.get("status.available"), Some(&2));
    assert_eq!(names.get("laststatus.available"), Some(&2));
    assert!(names.get("time.current").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_settings_from_toml_drive_a_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[general]
time_between_ms = 300
tld_separator = "-"

[randomize_time_between]
randomize = true
minimum_ms = 100
maximum_ms = 200
"#
    )
    .unwrap();

    let settings = ConfigManager::new(false).load_file(file.path()).unwrap();
    assert!(settings.randomize_time_between.randomize);

    let scheduler = build(settings, Arc::new(ScriptedTransport::default()));
    scheduler.start(&words(&["x"]), &words(&["com", "net"])).unwrap();
    scheduler.wait().await;

    let domains: Vec<String> = scheduler.results().rows().map(|r| r.domain.clone()).collect();
    assert_eq!(domains, vec!["x-com", "x-net"]);
}
