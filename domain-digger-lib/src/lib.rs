//! # Domain Digger Library
//!
//! A bulk domain availability engine. Words are paired with TLDs into a
//! queue, each queued name is looked up over WHOIS, DNS or RDAP at a paced
//! (optionally randomized) interval through an optional rotating SOCKS5 proxy
//! pool, and every reply is classified as available, unavailable or one of
//! several error kinds.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use domain_digger_lib::{BulkScheduler, LookupSettings, NullObserver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Arc::new(LookupSettings::default());
//!     let scheduler = BulkScheduler::from_settings(settings, Arc::new(NullObserver))?;
//!
//!     let words = vec!["example".to_string(), "rust-lang".to_string()];
//!     let tlds = vec!["com".to_string(), "org".to_string()];
//!     scheduler.start(&words, &tlds)?;
//!     scheduler.wait().await;
//!
//!     for row in scheduler.results().rows() {
//!         println!("{} {}", row.domain, row.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Pacing**: fixed or randomized delay, referral depth and timeout per task
//! - **Proxy rotation**: sequential, random, ascending or descending, with
//!   failure tracking and exponential backoff
//! - **Classification**: ordered rule table with an optional Naive Bayes model
//! - **Pause / resume / stop** on a run without losing or repeating lookups

pub use cache::{CacheOptions, MemoryCache, RequestCache};
pub use classify::{ClassificationEngine, ClassifiedReply};
pub use config::{
    load_env_config, parse_duration_ms, Assumptions, AveragingSettings, CacheSettings,
    ConfigManager, EnvConfig, GeneralSettings, LookupSettings, ModelSettings, ProxyEntry,
    ProxyMode, ProxySettings, RandomizeFollow, RandomizeRange, RandomizeTimeout, RdapSettings,
    RotationPolicy,
};
pub use error::DiggerError;
pub use observer::{ChannelObserver, NullObserver, RunEvent, RunObserver, StatusUpdate};
pub use proxy::{ProxyInfo, ProxyRotator};
pub use queue::{compile_queue, convert_domain, plan_pacing, registrable_domain, PacingPlan};
pub use scheduler::{BulkScheduler, SchedulerState};
pub use stats::{ms_to_human_time, AggregateStats, ResultAggregator, RunCounters};
pub use transport::{LookupTransport, NetworkTransport, RawReply};
pub use types::{
    Classification, ErrorKind, LookupKind, LookupTask, ResultRow, ResultsTable, StatusCategory,
};

// Public modules
pub mod cache;
pub mod classify;
pub mod observer;
pub mod protocols;
pub mod proxy;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod transport;

// Internal modules, reached through the re-exports above
mod config;
mod error;
mod types;

pub type Result<T> = std::result::Result<T, DiggerError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Get library information for debugging or display purposes.
pub fn info() -> LibraryInfo {
    LibraryInfo {
        version: VERSION,
        author: AUTHOR,
        features: get_enabled_features(),
    }
}

/// Information about the library build and features
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub version: &'static str,
    pub author: &'static str,
    pub features: Vec<&'static str>,
}

#[allow(clippy::vec_init_then_push)]
fn get_enabled_features() -> Vec<&'static str> {
    let mut features = Vec::new();

    #[cfg(feature = "whois")]
    features.push("whois");

    #[cfg(feature = "dns")]
    features.push("dns");

    #[cfg(feature = "rdap")]
    features.push("rdap");

    features
}
