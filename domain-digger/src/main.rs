//! Domain Digger CLI Application
//!
//! Pairs words with TLDs, looks every name up over WHOIS, DNS or RDAP at a
//! paced interval and reports which ones are free.

mod ui;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use console::Term;
use domain_digger_lib::{
    load_env_config, parse_duration_ms, BulkScheduler, ChannelObserver, ConfigManager, DiggerError,
    EnvConfig, LookupKind, LookupSettings, ProxyEntry, ProxyMode, RunEvent, SchedulerState,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

const DEFAULT_TLD: &str = "com";

/// CLI arguments for domain-digger
#[derive(Parser, Debug)]
#[command(name = "domain-digger")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bulk domain availability checks over WHOIS, DNS or RDAP")]
#[command(
    long_about = "Bulk domain availability checks over WHOIS, DNS or RDAP.\n\nEvery word is paired with every TLD and looked up at a paced, optionally randomized interval, optionally through rotating SOCKS5 proxies."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// Words to check (paired with every TLD)
    #[arg(value_name = "DOMAINS", help_heading = "Domain Selection")]
    pub domains: Vec<String>,

    /// TLDs to pair with (comma-separated or multiple -t flags)
    #[arg(short = 't', long = "tld", value_name = "TLD", value_delimiter = ',', action = clap::ArgAction::Append, help_heading = "Domain Selection")]
    pub tlds: Option<Vec<String>>,

    /// Word list file (one per line, # comments allowed)
    #[arg(
        short = 'f',
        long = "file",
        value_name = "FILE",
        help_heading = "Domain Selection"
    )]
    pub file: Option<String>,

    /// Lookup service: whois, dns or rdap
    #[arg(long = "type", value_name = "TYPE", help_heading = "Lookup")]
    pub lookup_type: Option<String>,

    /// SOCKS5 proxy, host:port or user:pass@host:port (repeatable)
    #[arg(long = "proxy", value_name = "ENTRY", action = clap::ArgAction::Append, help_heading = "Lookup")]
    pub proxies: Option<Vec<String>>,

    /// Max in-flight lookups (0 = unbounded)
    #[arg(short = 'c', long = "concurrency", help_heading = "Pacing")]
    pub concurrency: Option<usize>,

    /// Delay between dispatches, e.g. 1500, 1500ms, 2s
    #[arg(long = "time-between", value_name = "DURATION", help_heading = "Pacing")]
    pub time_between: Option<String>,

    /// Per-request timeout, e.g. 2500ms, 3s
    #[arg(long = "timeout", value_name = "DURATION", help_heading = "Pacing")]
    pub timeout: Option<String>,

    /// Use specific config file instead of automatic discovery
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Naive Bayes model file used before the rule table
    #[arg(long = "model", value_name = "FILE", help_heading = "Configuration")]
    pub model: Option<String>,

    /// Output results in JSON format
    #[arg(short = 'j', long = "json", help_heading = "Output Format")]
    pub json: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose", help_heading = "Output Format")]
    pub verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    init_tracing(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Log to stderr; `RUST_LOG` wins over the `-v` default.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Validate command line arguments
fn validate_args(args: &Args) -> Result<(), String> {
    if args.domains.is_empty() && args.file.is_none() {
        return Err("You must specify words to check or a word list with --file".to_string());
    }

    if let Some(kind) = &args.lookup_type {
        kind.parse::<LookupKind>().map_err(|e| e.to_string())?;
    }

    if let Some(tlds) = &args.tlds {
        if tlds.iter().all(|t| t.trim().is_empty()) {
            return Err("--tld needs at least one TLD".to_string());
        }
    }

    if let Some(concurrency) = args.concurrency {
        if concurrency > 1000 {
            return Err("Concurrency must be between 0 (unbounded) and 1000".to_string());
        }
    }

    if let Some(value) = &args.time_between {
        parse_duration_ms(value).ok_or_else(|| {
            format!(
                "Invalid --time-between '{}'. Use a format like '1500', '1500ms' or '2s'",
                value
            )
        })?;
    }

    if let Some(value) = &args.timeout {
        match parse_duration_ms(value) {
            Some(ms) if ms > 0 => {}
            _ => {
                return Err(format!(
                    "Invalid --timeout '{}'. Use a format like '2500ms' or '3s'",
                    value
                ))
            }
        }
    }

    Ok(())
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let env_config = load_env_config();
    let settings = Arc::new(build_settings(&args, &env_config)?);

    let words = collect_words(&args)?;
    let tlds = resolve_tlds(&args, &env_config);
    debug!(words = words.len(), tlds = tlds.len(), "resolved inputs");

    let (observer, mut events) = ChannelObserver::new();
    let scheduler = BulkScheduler::from_settings(settings, Arc::new(observer))?;

    let show_progress = !args.json && Term::stderr().is_term();
    let progress_task = tokio::spawn(async move {
        let term = Term::stderr();
        let mut progress = ui::Progress::default();
        while let Some(event) = events.recv().await {
            if let RunEvent::Status(update) = event {
                if progress.apply(&update) && show_progress {
                    progress.draw(&term);
                }
                if progress.finished {
                    break;
                }
            }
        }
        if show_progress {
            let _ = term.clear_line();
        }
    });

    let total = scheduler.start(&words, &tlds)?;
    info!(total, "run started");

    let interrupted = tokio::select! {
        state = scheduler.wait() => state == SchedulerState::Stopped,
        _ = tokio::signal::ctrl_c() => interrupt(&scheduler)?,
    };

    let _ = progress_task.await;

    let results = scheduler.results();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        let (elapsed_ms, _) = scheduler.clock();
        ui::print_results(&results, args.verbose);
        println!();
        ui::print_summary(total, &scheduler.stats(), elapsed_ms, interrupted);
    }

    Ok(())
}

/// Stop the run on Ctrl-C, returning whether it was cut short.
///
/// A run that finished while the signal was being handled still counts as
/// complete.
fn interrupt(scheduler: &BulkScheduler) -> Result<bool, DiggerError> {
    match scheduler.stop() {
        Ok(()) => Ok(true),
        Err(_) if scheduler.state() == SchedulerState::Finished => {
            debug!("run finished before the interrupt was handled");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Settings with precedence CLI > environment > config files > defaults.
fn build_settings(
    args: &Args,
    env_config: &EnvConfig,
) -> Result<LookupSettings, Box<dyn std::error::Error>> {
    let config_manager = ConfigManager::new(args.verbose);
    let mut settings = match &args.config {
        Some(path) => config_manager.load_file(path)?,
        None => config_manager.discover_and_load()?,
    };

    env_config.apply(&mut settings);
    apply_cli_args(args, &mut settings)?;

    settings.validate()?;
    Ok(settings)
}

fn apply_cli_args(
    args: &Args,
    settings: &mut LookupSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(kind) = &args.lookup_type {
        settings.general.lookup_type = kind.parse()?;
    }
    if let Some(concurrency) = args.concurrency {
        settings.general.concurrency = concurrency;
    }
    if let Some(ms) = args.time_between.as_deref().and_then(parse_duration_ms) {
        settings.general.time_between_ms = ms;
    }
    if let Some(ms) = args.timeout.as_deref().and_then(parse_duration_ms) {
        settings.general.timeout_ms = ms;
    }
    if let Some(proxies) = &args.proxies {
        settings.proxy.enable = true;
        settings.proxy.mode = ProxyMode::Multi;
        settings.proxy.list = proxies.iter().map(|p| ProxyEntry::Plain(p.clone())).collect();
    }
    if let Some(model) = &args.model {
        settings.model.enabled = true;
        settings.model.path = Some(PathBuf::from(model));
    }
    Ok(())
}

fn collect_words(args: &Args) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut words: Vec<String> = args
        .domains
        .iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();

    if let Some(path) = &args.file {
        words.extend(read_words_from_file(path)?);
    }

    if words.is_empty() {
        return Err("No words to check".into());
    }
    Ok(words)
}

/// TLDs from `-t`, then `DD_TLDS`, then `com`. Leading dots are stripped.
fn resolve_tlds(args: &Args, env_config: &EnvConfig) -> Vec<String> {
    let source = args
        .tlds
        .clone()
        .or_else(|| env_config.tlds.clone())
        .unwrap_or_else(|| vec![DEFAULT_TLD.to_string()]);

    source
        .iter()
        .map(|t| t.trim().trim_start_matches('.').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn read_words_from_file(file_path: &str) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(file_path)
        .map_err(|e| format!("Cannot open word list {}: {}", file_path, e))?;
    parse_word_list(std::io::BufReader::new(file))
}

/// One word per line; blank lines and `#` comments are skipped.
fn parse_word_list<R: BufRead>(reader: R) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut words = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let word = line.split('#').next().unwrap_or("").trim();
        if !word.is_empty() {
            words.push(word.to_string());
        }
    }
    Ok(words)
}
