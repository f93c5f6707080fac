//! Lookup settings, TOML loading and environment overrides.
//!
//! A run takes an immutable [`LookupSettings`] snapshot when it starts and
//! passes it down explicitly; nothing in the engine reads settings from a
//! global. Files are discovered in XDG, home and local order and merged table
//! by table, with later files winning.

use crate::error::DiggerError;
use crate::proxy;
use crate::types::LookupKind;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Accepted `general.conversion` values.
pub const CONVERSIONS: &[&str] = &["ascii", "punycode", "uts46", "uts46-transitional", "none"];

/// Complete settings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LookupSettings {
    pub general: GeneralSettings,
    pub randomize_follow: RandomizeFollow,
    pub randomize_timeout: RandomizeTimeout,
    pub randomize_time_between: RandomizeRange,
    pub proxy: ProxySettings,
    pub assumptions: Assumptions,
    pub averaging: AveragingSettings,
    pub cache: CacheSettings,
    pub model: ModelSettings,
    pub rdap: RdapSettings,
}

/// Core lookup parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Which service to query
    pub lookup_type: LookupKind,
    /// Fixed WHOIS server; empty means resolve through IANA
    pub server: String,
    /// Maximum referral depth
    pub follow: u32,
    /// Per-request timeout
    pub timeout_ms: u64,
    /// Delay between consecutive dispatches
    pub time_between_ms: u64,
    /// Force `dns_time_between_ms` for DNS runs
    pub dns_time_between_override: bool,
    pub dns_time_between_ms: u64,
    /// Joins a word and a TLD, normally "."
    pub tld_separator: String,
    /// Maximum simultaneous in-flight lookups, 0 for unbounded
    pub concurrency: usize,
    /// Transport attempts per task before giving up
    pub max_attempts: u32,
    /// Domain character conversion: ascii, punycode, uts46 or
    /// uts46-transitional
    pub conversion: Option<String>,
    /// Query the registrable domain under the public suffix list
    pub psl: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            lookup_type: LookupKind::Whois,
            server: String::new(),
            follow: 3,
            timeout_ms: 2500,
            time_between_ms: 1500,
            dns_time_between_override: true,
            dns_time_between_ms: 50,
            tld_separator: ".".to_string(),
            concurrency: 0,
            max_attempts: 3,
            conversion: None,
            psl: false,
        }
    }
}

/// Randomized referral depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizeFollow {
    pub randomize: bool,
    pub minimum_depth: u32,
    pub maximum_depth: u32,
}

impl Default for RandomizeFollow {
    fn default() -> Self {
        Self {
            randomize: false,
            minimum_depth: 3,
            maximum_depth: 4,
        }
    }
}

/// Randomized time-between range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizeRange {
    pub randomize: bool,
    pub minimum_ms: u64,
    pub maximum_ms: u64,
}

impl Default for RandomizeRange {
    fn default() -> Self {
        Self {
            randomize: false,
            minimum_ms: 1000,
            maximum_ms: 1500,
        }
    }
}

/// Randomized request timeout range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizeTimeout {
    pub randomize: bool,
    pub minimum_ms: u64,
    pub maximum_ms: u64,
}

impl Default for RandomizeTimeout {
    fn default() -> Self {
        Self {
            randomize: false,
            minimum_ms: 2500,
            maximum_ms: 3500,
        }
    }
}

/// `single` uses one fixed proxy, `multi` rotates over `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    Single,
    Multi,
}

/// Rotation policy for multi mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Sequential,
    Random,
    Ascending,
    Descending,
}

/// A proxy list item: either `"user:pass@host:port"` or a table with
/// credentials spelled out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxyEntry {
    Plain(String),
    Detailed {
        proxy: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
}

impl From<&str> for ProxyEntry {
    fn from(value: &str) -> Self {
        Self::Plain(value.to_string())
    }
}

/// Proxy pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub enable: bool,
    pub mode: ProxyMode,
    pub multimode: RotationPolicy,
    /// Used in single mode
    pub single: Option<String>,
    /// Used in multi mode
    pub list: Vec<ProxyEntry>,
    /// Default credentials for entries that carry none
    pub username: Option<String>,
    pub password: Option<String>,
    /// Failures inside the expiry window before a proxy is skipped, 0 never skips
    pub retries: u32,
    /// Carried for compatibility; health probing is not performed
    pub check: bool,
    pub checktype: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enable: false,
            mode: ProxyMode::Single,
            multimode: RotationPolicy::Sequential,
            single: None,
            list: Vec::new(),
            username: None,
            password: None,
            retries: 3,
            check: false,
            checktype: "ping".to_string(),
        }
    }
}

/// How ambiguous replies are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Assumptions {
    /// Uniregistry "Query limit exceeded" means taken
    pub uniregistry: bool,
    /// Rate-limit replies mean taken
    pub ratelimit: bool,
    /// Replies nothing matched mean available
    pub unparsable: bool,
    /// Resolver failures other than NXDOMAIN mean taken
    pub dns_failure_unavailable: bool,
}

impl Default for Assumptions {
    fn default() -> Self {
        Self {
            uniregistry: true,
            ratelimit: false,
            unparsable: false,
            dns_failure_unavailable: true,
        }
    }
}

/// Latency averaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AveragingSettings {
    /// Weight of the newest sample in the exponential moving average
    pub smoothing_factor: f64,
    /// Use the progress-weighted average instead of exponential smoothing
    pub true_average_override: bool,
}

impl Default for AveragingSettings {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.1,
            true_average_override: false,
        }
    }
}

/// Request cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 3600,
        }
    }
}

/// Pre-built Naive Bayes model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelSettings {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    /// Minimum log-score gap for a prediction to pre-empt the rules
    pub min_margin: f64,
}

/// RDAP endpoints, tried in order. The domain is appended to each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdapSettings {
    pub endpoints: Vec<String>,
}

impl Default for RdapSettings {
    fn default() -> Self {
        Self {
            endpoints: vec!["https://rdap.org/domain/".to_string()],
        }
    }
}

impl LookupSettings {
    /// Time-between for the configured lookup type, honouring the DNS override.
    pub fn effective_time_between_ms(&self) -> u64 {
        if self.dns_override_active() {
            self.general.dns_time_between_ms
        } else {
            self.general.time_between_ms
        }
    }

    pub fn dns_override_active(&self) -> bool {
        self.general.lookup_type == LookupKind::Dns && self.general.dns_time_between_override
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), DiggerError> {
        let general = &self.general;

        if general.tld_separator.is_empty() {
            return Err(DiggerError::config("TLD separator cannot be empty"));
        }
        if general.timeout_ms == 0 {
            return Err(DiggerError::config("Timeout must be greater than zero"));
        }
        if general.max_attempts == 0 {
            return Err(DiggerError::config("max_attempts must be at least 1"));
        }
        if general.concurrency > 1000 {
            return Err(DiggerError::config(
                "Concurrency must be between 0 (unbounded) and 1000",
            ));
        }
        if let Some(conversion) = &general.conversion {
            if !CONVERSIONS.contains(&conversion.as_str()) {
                return Err(DiggerError::config(format!(
                    "Unsupported domain conversion '{}'. Use one of: {}",
                    conversion,
                    CONVERSIONS.join(", ")
                )));
            }
        }

        let factor = self.averaging.smoothing_factor;
        if !(0.0..=1.0).contains(&factor) {
            return Err(DiggerError::config(format!(
                "Smoothing factor {} must be within [0, 1]",
                factor
            )));
        }

        if self.general.lookup_type == LookupKind::Rdap && self.rdap.endpoints.is_empty() {
            return Err(DiggerError::config(
                "RDAP lookups need at least one endpoint",
            ));
        }

        if self.model.enabled && self.model.path.is_none() {
            return Err(DiggerError::config("Model is enabled but no path is set"));
        }
        if self.model.min_margin < 0.0 {
            return Err(DiggerError::config("Model min_margin cannot be negative"));
        }

        if self.proxy.enable {
            let user = self.proxy.username.as_deref();
            let pass = self.proxy.password.as_deref();
            match self.proxy.mode {
                ProxyMode::Multi => {
                    for entry in &self.proxy.list {
                        proxy::parse_entry(entry, user, pass)?;
                    }
                }
                ProxyMode::Single => {
                    if let Some(single) = &self.proxy.single {
                        proxy::parse_entry(&ProxyEntry::Plain(single.clone()), user, pass)?;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Configuration discovery and loading.
pub struct ConfigManager {
    /// Whether to log which files were picked up
    pub verbose: bool,
}

impl ConfigManager {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load and validate settings from a specific file.
    ///
    /// Missing keys fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns `FileError` when the file cannot be read and `ConfigError` when
    /// it does not parse or fails validation.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<LookupSettings, DiggerError> {
        let table = self.read_table(path.as_ref())?;
        let settings = table_to_settings(table)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Discover configuration files and merge them, later files winning.
    ///
    /// Order: `$XDG_CONFIG_HOME/domain-digger/config.toml`, then
    /// `~/.domain-digger.toml`, then `./domain-digger.toml`.
    pub fn discover_and_load(&self) -> Result<LookupSettings, DiggerError> {
        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        let mut merged = toml::Table::new();
        let mut loaded = Vec::new();
        for path in candidates.into_iter().flatten() {
            match self.read_table(&path) {
                Ok(table) => {
                    merge_tables(&mut merged, table);
                    loaded.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping config file"),
            }
        }

        if self.verbose {
            for path in &loaded {
                debug!(path = %path.display(), "loaded config file");
            }
        }

        let settings = table_to_settings(merged)?;
        settings.validate()?;
        Ok(settings)
    }

    fn read_table(&self, path: &Path) -> Result<toml::Table, DiggerError> {
        if !path.exists() {
            return Err(DiggerError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            DiggerError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        Ok(toml::from_str::<toml::Table>(&content)?)
    }

    fn get_local_config_path(&self) -> Option<PathBuf> {
        ["./domain-digger.toml", "./.domain-digger.toml"]
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".domain-digger.toml", "domain-digger.toml"]
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("domain-digger").join("config.toml");
        path.exists().then_some(path)
    }
}

/// Merge `higher` into `lower`. Nested tables merge key by key, anything else
/// is replaced.
fn merge_tables(lower: &mut toml::Table, higher: toml::Table) {
    for (key, value) in higher {
        match (lower.get_mut(&key), value) {
            (Some(toml::Value::Table(lower_section)), toml::Value::Table(higher_section)) => {
                merge_tables(lower_section, higher_section);
            }
            (_, value) => {
                lower.insert(key, value);
            }
        }
    }
}

fn table_to_settings(table: toml::Table) -> Result<LookupSettings, DiggerError> {
    let text = toml::to_string(&table)
        .map_err(|e| DiggerError::config(format!("Failed to re-encode configuration: {}", e)))?;
    Ok(toml::from_str(&text)?)
}

/// Settings that can be overridden through `DD_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub lookup_type: Option<LookupKind>,
    pub timeout_ms: Option<u64>,
    pub time_between_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub proxies: Option<Vec<String>>,
    pub tld_separator: Option<String>,
    pub tlds: Option<Vec<String>>,
}

impl EnvConfig {
    /// Overlay the values that are set.
    pub fn apply(&self, settings: &mut LookupSettings) {
        if let Some(kind) = self.lookup_type {
            settings.general.lookup_type = kind;
        }
        if let Some(timeout) = self.timeout_ms {
            settings.general.timeout_ms = timeout;
        }
        if let Some(between) = self.time_between_ms {
            settings.general.time_between_ms = between;
        }
        if let Some(concurrency) = self.concurrency {
            settings.general.concurrency = concurrency;
        }
        if let Some(separator) = &self.tld_separator {
            settings.general.tld_separator = separator.clone();
        }
        if let Some(proxies) = &self.proxies {
            settings.proxy.enable = true;
            settings.proxy.mode = ProxyMode::Multi;
            settings.proxy.list = proxies.iter().map(|p| ProxyEntry::Plain(p.clone())).collect();
        }
    }
}

/// Read `DD_*` environment variables.
///
/// Invalid values are logged and ignored.
pub fn load_env_config() -> EnvConfig {
    load_env_config_from(|key| env::var(key).ok())
}

fn load_env_config_from<F: Fn(&str) -> Option<String>>(lookup: F) -> EnvConfig {
    let mut env_config = EnvConfig::default();

    if let Some(val) = lookup("DD_TYPE") {
        match val.parse::<LookupKind>() {
            Ok(kind) => env_config.lookup_type = Some(kind),
            Err(_) => warn!(value = %val, "invalid DD_TYPE, use whois, dns or rdap"),
        }
    }

    if let Some(val) = lookup("DD_TIMEOUT") {
        match parse_duration_ms(&val) {
            Some(ms) if ms > 0 => env_config.timeout_ms = Some(ms),
            _ => warn!(value = %val, "invalid DD_TIMEOUT, use a format like '2500ms', '3s', '1m'"),
        }
    }

    if let Some(val) = lookup("DD_TIME_BETWEEN") {
        match parse_duration_ms(&val) {
            Some(ms) => env_config.time_between_ms = Some(ms),
            None => warn!(value = %val, "invalid DD_TIME_BETWEEN"),
        }
    }

    if let Some(val) = lookup("DD_CONCURRENCY") {
        match val.trim().parse::<usize>() {
            Ok(concurrency) if concurrency <= 1000 => env_config.concurrency = Some(concurrency),
            _ => warn!(value = %val, "invalid DD_CONCURRENCY, must be 0-1000"),
        }
    }

    if let Some(val) = lookup("DD_PROXY") {
        let proxies = split_list(&val);
        if !proxies.is_empty() {
            env_config.proxies = Some(proxies);
        }
    }

    if let Some(val) = lookup("DD_TLD_SEPARATOR") {
        if !val.is_empty() {
            env_config.tld_separator = Some(val);
        }
    }

    if let Some(val) = lookup("DD_TLDS") {
        let tlds = split_list(&val);
        if !tlds.is_empty() {
            env_config.tlds = Some(tlds);
        }
    }

    debug!(?env_config, "environment configuration");
    env_config
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a duration like "250ms", "5s" or "2m" into milliseconds.
///
/// A bare number is taken as milliseconds.
pub fn parse_duration_ms(value: &str) -> Option<u64> {
    let value = value.trim().to_lowercase();

    if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok()
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(|s| s * 1000)
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| m * 60_000)
    } else {
        value.parse::<u64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_parse_duration_ms() {
        assert_eq!(parse_duration_ms("250ms"), Some(250));
        assert_eq!(parse_duration_ms("5s"), Some(5000));
        assert_eq!(parse_duration_ms("2m"), Some(120_000));
        assert_eq!(parse_duration_ms("1500"), Some(1500));
        assert_eq!(parse_duration_ms("soon"), None);
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = LookupSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.general.follow, 3);
        assert_eq!(settings.general.timeout_ms, 2500);
        assert_eq!(settings.effective_time_between_ms(), 1500);
    }

    #[test]
    fn test_dns_override() {
        let mut settings = LookupSettings::default();
        settings.general.lookup_type = LookupKind::Dns;
        assert_eq!(settings.effective_time_between_ms(), 50);

        settings.general.dns_time_between_override = false;
        assert_eq!(settings.effective_time_between_ms(), 1500);
    }

    #[test]
    fn test_load_valid_config() {
        let file = write_config(
            r#"
[general]
lookup_type = "dns"
time_between_ms = 800

[proxy]
enable = true
mode = "multi"
multimode = "ascending"
list = ["10.0.0.1:1080", { proxy = "10.0.0.2:1080", username = "u", password = "p" }]

[assumptions]
ratelimit = true
"#,
        );

        let settings = ConfigManager::new(false).load_file(file.path()).unwrap();
        assert_eq!(settings.general.lookup_type, LookupKind::Dns);
        assert_eq!(settings.general.time_between_ms, 800);
        assert_eq!(settings.general.timeout_ms, 2500);
        assert_eq!(settings.proxy.multimode, RotationPolicy::Ascending);
        assert_eq!(settings.proxy.list.len(), 2);
        assert!(matches!(settings.proxy.list[1], ProxyEntry::Detailed { .. }));
        assert!(settings.assumptions.ratelimit);
        assert!(settings.assumptions.uniregistry);
    }

    #[test]
    fn test_randomize_ranges_have_separate_defaults() {
        let file = write_config(
            "[randomize_timeout]\nrandomize = true\n\n[randomize_time_between]\nrandomize = true\n",
        );
        let settings = ConfigManager::new(false).load_file(file.path()).unwrap();
        assert!(settings.randomize_timeout.randomize);
        assert_eq!(settings.randomize_timeout.minimum_ms, 2500);
        assert_eq!(settings.randomize_timeout.maximum_ms, 3500);
        assert_eq!(settings.randomize_time_between.minimum_ms, 1000);
        assert_eq!(settings.randomize_time_between.maximum_ms, 1500);
    }

    #[test]
    fn test_conversion_modes_validated() {
        let mut settings = LookupSettings::default();
        for mode in CONVERSIONS {
            settings.general.conversion = Some(mode.to_string());
            assert!(settings.validate().is_ok(), "{}", mode);
        }
        settings.general.conversion = Some("rot13".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_smoothing_factor() {
        let file = write_config("[averaging]\nsmoothing_factor = 1.5\n");
        assert!(ConfigManager::new(false).load_file(file.path()).is_err());
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let file = write_config(
            "[proxy]\nenable = true\nmode = \"multi\"\nlist = [\"not-an-ip:1080\"]\n",
        );
        assert!(ConfigManager::new(false).load_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigManager::new(false).load_file("/nonexistent/domain-digger.toml");
        assert!(matches!(result, Err(DiggerError::FileError { .. })));
    }

    #[test]
    fn test_merge_tables() {
        let mut lower: toml::Table =
            toml::from_str("[general]\nfollow = 2\ntimeout_ms = 1000\n").unwrap();
        let higher: toml::Table = toml::from_str("[general]\ntimeout_ms = 4000\n").unwrap();

        merge_tables(&mut lower, higher);
        let settings = table_to_settings(lower).unwrap();

        assert_eq!(settings.general.follow, 2); // Lower preserved
        assert_eq!(settings.general.timeout_ms, 4000); // Higher wins
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DD_TYPE", "rdap"),
            ("DD_TIMEOUT", "3s"),
            ("DD_CONCURRENCY", "many"),
            ("DD_PROXY", "10.0.0.1:1080, 10.0.0.2:1080"),
        ]
        .into_iter()
        .collect();

        let env_config = load_env_config_from(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(env_config.lookup_type, Some(LookupKind::Rdap));
        assert_eq!(env_config.timeout_ms, Some(3000));
        assert_eq!(env_config.concurrency, None);

        let mut settings = LookupSettings::default();
        env_config.apply(&mut settings);
        assert!(settings.proxy.enable);
        assert_eq!(settings.proxy.mode, ProxyMode::Multi);
        assert_eq!(settings.proxy.list.len(), 2);
    }
}
