//! Configuration management for `streamsync`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`SSYNC_*`, `GITHUB_TOKEN`)
//! 3. Explicit config file (`--config`)
//! 4. User config (~/.config/ssync/config.yaml)
//! 5. DB config table
//! 6. Defaults
//!
//! Startup keys (`db`, `log-file`) are needed before the database is open
//! and are never read from the DB layer.

use crate::error::{Result, SyncError};
use crate::storage::{CacheLimits, SqliteStorage};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default database filename.
const DEFAULT_DB_FILENAME: &str = "streamsync.db";

/// Host for which staleness correction is skipped.
pub const PUBLIC_GITHUB_HOST: &str = "api.github.com";

/// Runtime keys understood by [`SyncConfig::from_layer`].
pub const RUNTIME_KEYS: &[&str] = &[
    "host",
    "path-prefix",
    "https",
    "access-token",
    "login",
    "poll-interval",
    "api-interval",
    "max-issues",
    "eviction-batch",
    "error-policy",
    "error-backoff",
    "staleness-delay",
];

/// A configuration layer split into startup-only and runtime (DB) keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub startup: HashMap<String, String>,
    pub runtime: HashMap<String, String>,
}

impl ConfigLayer {
    /// Merge another layer on top of this one (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.startup {
            self.startup.insert(key.clone(), value.clone());
        }
        for (key, value) in &other.runtime {
            self.runtime.insert(key.clone(), value.clone());
        }
    }

    /// Merge multiple layers in precedence order (lowest to highest).
    #[must_use]
    pub fn merge_layers(layers: &[Self]) -> Self {
        let mut merged = Self::default();
        for layer in layers {
            merged.merge_from(layer);
        }
        merged
    }

    /// Build a layer from a YAML file path. Missing files return empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        Ok(layer_from_yaml_value(&value))
    }

    /// Build a layer from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    /// Build a layer from `(name, value)` pairs shaped like environment
    /// variables. `SSYNC_ACCESS_TOKEN` wins over `GITHUB_TOKEN`.
    #[must_use]
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut layer = Self::default();
        let mut github_token = None;

        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix("SSYNC_") {
                insert_key_value(&mut layer, &normalize_key(stripped), value);
            } else if key == "GITHUB_TOKEN" {
                github_token = Some(value);
            }
        }

        if let Some(token) = github_token {
            layer
                .runtime
                .entry("access-token".to_string())
                .or_insert(token);
        }

        layer
    }

    /// Build a layer from DB config table values.
    ///
    /// # Errors
    ///
    /// Returns an error if config table lookup fails.
    pub fn from_db(storage: &SqliteStorage) -> Result<Self> {
        let mut layer = Self::default();
        let map = storage.get_all_config()?;
        for (key, value) in map {
            if is_startup_key(&key) {
                continue;
            }
            layer.runtime.insert(normalize_key(&key), value);
        }
        Ok(layer)
    }
}

/// CLI overrides for config loading (optional).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db: Option<PathBuf>,
    /// Explicit YAML file (`--config`); not itself a layer key.
    pub config_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub host: Option<String>,
    pub access_token: Option<String>,
}

impl CliOverrides {
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();

        if let Some(path) = &self.db {
            insert_key_value(&mut layer, "db", path.to_string_lossy().to_string());
        }
        if let Some(path) = &self.log_file {
            insert_key_value(&mut layer, "log-file", path.to_string_lossy().to_string());
        }
        if let Some(host) = &self.host {
            insert_key_value(&mut layer, "host", host.clone());
        }
        if let Some(token) = &self.access_token {
            insert_key_value(&mut layer, "access-token", token.clone());
        }

        layer
    }
}

/// Load user config (~/.config/ssync/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<ConfigLayer> {
    let Ok(home) = env::var("HOME") else {
        return Ok(ConfigLayer::default());
    };
    let path = Path::new(&home)
        .join(".config")
        .join("ssync")
        .join("config.yaml");
    ConfigLayer::from_yaml(&path)
}

/// Load the explicit `--config` file. Unlike the user config, a missing
/// explicit file is an error.
///
/// # Errors
///
/// Returns an error if the file is missing, unreadable, or not valid YAML.
pub fn load_explicit_config(path: Option<&Path>) -> Result<ConfigLayer> {
    match path {
        Some(path) if !path.exists() => Err(SyncError::Config(format!(
            "config file not found: {}",
            path.display()
        ))),
        Some(path) => ConfigLayer::from_yaml(path),
        None => Ok(ConfigLayer::default()),
    }
}

/// Load configuration that is available before the database is opened
/// (YAML + env + CLI, no DB).
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed.
pub fn load_startup_config(config_file: Option<&Path>, cli: &CliOverrides) -> Result<ConfigLayer> {
    Ok(ConfigLayer::merge_layers(&[
        load_user_config()?,
        load_explicit_config(config_file)?,
        ConfigLayer::from_env(),
        cli.as_layer(),
    ]))
}

/// Default config layer (lowest precedence).
#[must_use]
pub fn default_config_layer() -> ConfigLayer {
    let defaults = SyncConfig::default();
    let mut layer = ConfigLayer::default();
    for (key, value) in defaults.to_pairs() {
        if let Some(value) = value {
            layer.runtime.insert(key.to_string(), value);
        }
    }
    layer
}

/// Load configuration with full precedence order.
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed, or DB access fails.
pub fn load_config(
    storage: Option<&SqliteStorage>,
    config_file: Option<&Path>,
    cli: &CliOverrides,
) -> Result<ConfigLayer> {
    let defaults = default_config_layer();
    let db_layer = match storage {
        Some(storage) => ConfigLayer::from_db(storage)?,
        None => ConfigLayer::default(),
    };
    let user = load_user_config()?;
    let explicit = load_explicit_config(config_file)?;
    let env_layer = ConfigLayer::from_env();
    let cli_layer = cli.as_layer();

    Ok(ConfigLayer::merge_layers(&[
        defaults, db_layer, user, explicit, env_layer, cli_layer,
    ]))
}

/// Database path from the startup layer, or the default data location.
#[must_use]
pub fn db_path_from_layer(layer: &ConfigLayer) -> PathBuf {
    get_startup_value(layer, &["db", "database"])
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map_or_else(default_db_path, PathBuf::from)
}

#[must_use]
pub fn log_file_from_layer(layer: &ConfigLayer) -> Option<PathBuf> {
    get_startup_value(layer, &["log-file"])
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// `~/.local/share/ssync/streamsync.db`, or the working directory without `HOME`.
#[must_use]
pub fn default_db_path() -> PathBuf {
    env::var("HOME").map_or_else(
        |_| PathBuf::from(DEFAULT_DB_FILENAME),
        |home| {
            Path::new(&home)
                .join(".local")
                .join("share")
                .join("ssync")
                .join(DEFAULT_DB_FILENAME)
        },
    )
}

/// Open the database named by the startup layer, creating its directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the database
/// cannot be opened.
pub fn open_storage(startup: &ConfigLayer) -> Result<(SqliteStorage, PathBuf)> {
    let path = db_path_from_layer(startup);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let storage = SqliteStorage::open(&path)?;
    Ok((storage, path))
}

/// Storage opened from CLI overrides, with the merged configuration.
#[derive(Debug)]
pub struct StorageContext {
    pub storage: SqliteStorage,
    pub db_path: PathBuf,
    pub layer: ConfigLayer,
}

impl StorageContext {
    /// Typed sync configuration from the merged layer.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed values.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        SyncConfig::from_layer(&self.layer)
    }
}

/// Open the database and merge every configuration layer.
///
/// # Errors
///
/// Returns an error if config files are invalid or the database cannot be opened.
pub fn open_storage_with_cli(cli: &CliOverrides) -> Result<StorageContext> {
    let config_file = cli.config_file.as_deref();
    let startup = load_startup_config(config_file, cli)?;
    let (storage, db_path) = open_storage(&startup)?;
    let layer = load_config(Some(&storage), config_file, cli)?;
    Ok(StorageContext {
        storage,
        db_path,
        layer,
    })
}

/// Determine if a key is startup-only.
///
/// Startup-only keys can only be set in YAML, env or flags, not in the database.
#[must_use]
pub fn is_startup_key(key: &str) -> bool {
    matches!(normalize_key(key).as_str(), "db" | "database" | "log-file")
}

/// Whether `ssync config set` accepts this key.
#[must_use]
pub fn is_runtime_key(key: &str) -> bool {
    RUNTIME_KEYS.contains(&normalize_key(key).as_str())
}

// ============================================================================
// TYPED CONFIG
// ============================================================================

/// What a stream does after a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Stop searching until the stream is refreshed.
    Halt,
    /// Skip the stream until `error_backoff` has elapsed.
    #[default]
    Backoff,
}

impl ErrorPolicy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Halt => "halt",
            Self::Backoff => "backoff",
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "halt" => Ok(Self::Halt),
            "backoff" => Ok(Self::Backoff),
            other => Err(SyncError::validation(
                "error-policy",
                format!("expected halt or backoff, got {other}"),
            )),
        }
    }
}

/// Validated runtime configuration for the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub host: String,
    /// Enterprise API prefix such as `api/v3`; empty for github.com.
    pub path_prefix: String,
    pub https: bool,
    pub access_token: Option<String>,
    /// Login used by the Me stream; fetched from `/user` when unset.
    pub login: Option<String>,
    /// Pause between scheduler steps.
    pub poll_interval: Duration,
    /// Pause between deferred API requests.
    pub api_interval: Duration,
    pub max_issues: usize,
    pub eviction_batch: usize,
    pub error_policy: ErrorPolicy,
    pub error_backoff: Duration,
    /// Pause after each pull request fetched for staleness correction.
    pub staleness_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host: PUBLIC_GITHUB_HOST.to_string(),
            path_prefix: String::new(),
            https: true,
            access_token: None,
            login: None,
            poll_interval: Duration::from_secs(10),
            api_interval: Duration::from_secs(10),
            max_issues: 10_000,
            eviction_batch: 1_000,
            error_policy: ErrorPolicy::Backoff,
            error_backoff: Duration::from_secs(60),
            staleness_delay: Duration::from_secs(1),
        }
    }
}

impl SyncConfig {
    /// Build from a merged layer; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first malformed key.
    pub fn from_layer(layer: &ConfigLayer) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = non_empty(get_value(layer, &["host"])) {
            config.host = host.to_string();
        }
        if let Some(prefix) = get_value(layer, &["path-prefix"]) {
            config.path_prefix = prefix.trim().trim_matches('/').to_string();
        }
        if let Some(raw) = get_value(layer, &["https"]) {
            config.https = parse_bool(raw)
                .ok_or_else(|| SyncError::validation("https", format!("not a boolean: {raw}")))?;
        }
        config.access_token = non_empty(get_value(layer, &["access-token"])).map(str::to_string);
        config.login = non_empty(get_value(layer, &["login"])).map(str::to_string);

        if let Some(d) = parse_seconds(layer, "poll-interval")? {
            config.poll_interval = d;
        }
        if let Some(d) = parse_seconds(layer, "api-interval")? {
            config.api_interval = d;
        }
        if let Some(d) = parse_seconds(layer, "error-backoff")? {
            config.error_backoff = d;
        }
        if let Some(d) = parse_seconds(layer, "staleness-delay")? {
            config.staleness_delay = d;
        }
        if let Some(n) = parse_usize(layer, "max-issues")? {
            if n == 0 {
                return Err(SyncError::validation("max-issues", "must be positive"));
            }
            config.max_issues = n;
        }
        if let Some(n) = parse_usize(layer, "eviction-batch")? {
            if n == 0 {
                return Err(SyncError::validation("eviction-batch", "must be positive"));
            }
            config.eviction_batch = n;
        }
        if let Some(raw) = get_value(layer, &["error-policy"]) {
            config.error_policy = raw.parse()?;
        }

        Ok(config)
    }

    #[must_use]
    pub const fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_issues: self.max_issues,
            eviction_batch: self.eviction_batch,
        }
    }

    /// Whether this configuration talks to public github.com.
    #[must_use]
    pub fn is_public_github(&self) -> bool {
        self.host.eq_ignore_ascii_case(PUBLIC_GITHUB_HOST)
    }

    /// `scheme://host[/prefix]`.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        if self.path_prefix.is_empty() {
            format!("{scheme}://{}", self.host)
        } else {
            format!("{scheme}://{}/{}", self.host, self.path_prefix)
        }
    }

    /// Key/value pairs as shown by `ssync config list`; the token is masked.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("host", Some(self.host.clone())),
            ("path-prefix", Some(self.path_prefix.clone())),
            ("https", Some(self.https.to_string())),
            ("access-token", self.access_token.as_ref().map(|_| "********".to_string())),
            ("login", self.login.clone()),
            ("poll-interval", Some(format_seconds(self.poll_interval))),
            ("api-interval", Some(format_seconds(self.api_interval))),
            ("max-issues", Some(self.max_issues.to_string())),
            ("eviction-batch", Some(self.eviction_batch.to_string())),
            ("error-policy", Some(self.error_policy.to_string())),
            ("error-backoff", Some(format_seconds(self.error_backoff))),
            ("staleness-delay", Some(format_seconds(self.staleness_delay))),
        ]
    }
}

/// Live configuration shared by the scheduler and the request pipeline.
///
/// Readers take a snapshot with [`SharedConfig::load`]; `reconfigure`
/// swaps the whole value atomically.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<ArcSwap<SyncConfig>>,
}

impl SharedConfig {
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    #[must_use]
    pub fn load(&self) -> Arc<SyncConfig> {
        self.inner.load_full()
    }

    pub fn reconfigure(&self, config: SyncConfig) {
        self.inner.store(Arc::new(config));
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

fn insert_key_value(layer: &mut ConfigLayer, key: &str, value: String) {
    let key = normalize_key(key);
    if is_startup_key(&key) {
        layer.startup.insert(key, value);
    } else {
        layer.runtime.insert(key, value);
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace(['_', '.'], "-")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn get_startup_value<'a>(layer: &'a ConfigLayer, keys: &[&str]) -> Option<&'a String> {
    keys.iter().find_map(|key| layer.startup.get(*key))
}

fn get_value<'a>(layer: &'a ConfigLayer, keys: &[&str]) -> Option<&'a String> {
    keys.iter().find_map(|key| layer.runtime.get(*key))
}

fn parse_usize(layer: &ConfigLayer, key: &str) -> Result<Option<usize>> {
    get_value(layer, &[key])
        .map(|value| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| SyncError::validation(key, format!("not a count: {value}")))
        })
        .transpose()
}

/// Seconds, fractional allowed.
fn parse_seconds(layer: &ConfigLayer, key: &str) -> Result<Option<Duration>> {
    get_value(layer, &[key])
        .map(|value| {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| SyncError::validation(key, format!("not a duration in seconds: {value}")))
        })
        .transpose()
}

fn format_seconds(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        duration.as_secs_f64().to_string()
    }
}

fn layer_from_yaml_value(value: &serde_yaml::Value) -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    let mut flat = HashMap::new();
    flatten_yaml(value, "", &mut flat);

    for (key, value) in flat {
        insert_key_value(&mut layer, &key, value);
    }

    layer
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key_str) = key.as_str() else {
                    continue;
                };
                let next_prefix = if prefix.is_empty() {
                    key_str.to_string()
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(value, &next_prefix, out);
            }
        }
        _ => {
            if let Some(value) = yaml_scalar_to_string(value) {
                out.insert(prefix.to_string(), value);
            }
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(v) => Some(v.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Null
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_) => None,
        serde_yaml::Value::Tagged(tagged) => yaml_scalar_to_string(&tagged.value),
    }
}
