//! # Configuration Module
//!
//! Cache policy, auth settings and system key/value configuration, loaded from
//! YAML or JSON with environment overrides and hot reloading.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Human readable durations (`30s`, `5m`, `6h`) via `humantime-serde`
//! - `CAMPUS_CACHE_*` environment variable overrides
//! - Validation of the TTL ordering rules before a config is ever applied
//! - Hot reloading using a file system watcher, with change broadcast

use async_trait::async_trait;
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};

use crate::core::error::{ConfigError, ConfigResult, OriginResult};
use crate::observability::logging::LogConfig;
use crate::origin::ConfigurationSource;

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub logging: LogConfig,

    /// Free-form system settings (site name, upload limits, feature switches)
    #[serde(default)]
    pub system: HashMap<String, String>,
}

/// Cache policy: key layout, store bounds, TTLs and refresh cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Global namespace prefix of every cache key
    pub key_prefix: String,

    /// Keys longer than this are rejected by the gateway
    pub max_key_length: usize,

    pub store: StoreSettings,

    pub ttl: TtlPolicy,

    pub refresh: RefreshSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: "campus".to_string(),
            max_key_length: 250,
            store: StoreSettings::default(),
            ttl: TtlPolicy::default(),
            refresh: RefreshSettings::default(),
        }
    }
}

/// Bounds of the in-memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub max_entries: usize,

    /// Soft limit on the summed size units of all entries
    pub max_size_units: usize,

    /// Fraction of entries evicted when a limit is exceeded
    pub compaction_fraction: f64,

    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            max_size_units: 64 * 1024 * 1024,
            compaction_fraction: 0.25,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Time-to-live per data class, ordered by volatility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    #[serde(with = "humantime_serde")]
    pub category_tree: Duration,

    #[serde(with = "humantime_serde")]
    pub product: Duration,

    #[serde(with = "humantime_serde")]
    pub product_list: Duration,

    #[serde(with = "humantime_serde")]
    pub active_products: Duration,

    #[serde(with = "humantime_serde")]
    pub user: Duration,

    /// Password hash and lockout state; must stay well below `user`
    #[serde(with = "humantime_serde")]
    pub user_security: Duration,

    #[serde(with = "humantime_serde")]
    pub user_permissions: Duration,

    #[serde(with = "humantime_serde")]
    pub user_list: Duration,

    /// The student roster is near-static
    #[serde(with = "humantime_serde")]
    pub student_validation: Duration,

    #[serde(with = "humantime_serde")]
    pub config: Duration,

    /// Lifetime of negative markers
    #[serde(with = "humantime_serde")]
    pub null_result: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            category_tree: Duration::from_secs(6 * 3600),
            product: Duration::from_secs(30 * 60),
            product_list: Duration::from_secs(5 * 60),
            active_products: Duration::from_secs(10 * 60),
            user: Duration::from_secs(30 * 60),
            user_security: Duration::from_secs(2 * 60),
            user_permissions: Duration::from_secs(10 * 60),
            user_list: Duration::from_secs(5 * 60),
            student_validation: Duration::from_secs(24 * 3600),
            config: Duration::from_secs(3600),
            null_result: Duration::from_secs(5 * 60),
        }
    }
}

impl TtlPolicy {
    /// Check the ordering rules between TTL classes
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        let all = [
            ("category_tree", self.category_tree),
            ("product", self.product),
            ("product_list", self.product_list),
            ("active_products", self.active_products),
            ("user", self.user),
            ("user_security", self.user_security),
            ("user_permissions", self.user_permissions),
            ("user_list", self.user_list),
            ("student_validation", self.student_validation),
            ("config", self.config),
            ("null_result", self.null_result),
        ];
        for (name, ttl) in all {
            if ttl.is_zero() {
                errors.push(format!("ttl.{} must be greater than 0", name));
            }
        }

        if self.user_security >= self.user {
            errors.push("ttl.user_security must be shorter than ttl.user".to_string());
        }
        if self.category_tree < self.product {
            errors.push("ttl.category_tree must not be shorter than ttl.product".to_string());
        }
        if self.null_result > self.product {
            errors.push("ttl.null_result must not exceed ttl.product".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::validation(errors.join("; ")))
        }
    }
}

/// Cadence and scope of the background refresh loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// How many list pages per category are re-warmed each cycle
    pub warm_list_pages: u32,

    pub list_page_size: u32,

    /// Upper bound on the active product set kept warm
    pub active_products_limit: usize,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(30),
            interval: Duration::from_secs(5 * 60),
            warm_list_pages: 1,
            list_page_size: 20,
            active_products_limit: 500,
        }
    }
}

/// Authentication policy snapshot. Token issuance itself lives elsewhere; the
/// cache only keeps this object warm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub issuer: String,
    pub audience: String,

    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,

    pub max_failed_logins: u32,

    #[serde(with = "humantime_serde")]
    pub lockout_duration: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            issuer: "campus-marketplace".to_string(),
            audience: "campus-marketplace-web".to_string(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 3600),
            max_failed_logins: 5,
            lockout_duration: Duration::from_secs(15 * 60),
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.key_prefix.is_empty() {
            errors.push("key_prefix cannot be empty".to_string());
        }
        if self.key_prefix.contains(':') || self.key_prefix.chars().any(char::is_whitespace) {
            errors.push("key_prefix cannot contain ':' or whitespace".to_string());
        }
        if self.max_key_length < 64 {
            errors.push("max_key_length must be at least 64".to_string());
        }
        if self.store.max_entries == 0 {
            errors.push("store.max_entries must be greater than 0".to_string());
        }
        if self.store.max_size_units == 0 {
            errors.push("store.max_size_units must be greater than 0".to_string());
        }
        if !(self.store.compaction_fraction > 0.0 && self.store.compaction_fraction <= 1.0) {
            errors.push("store.compaction_fraction must be in (0, 1]".to_string());
        }
        if self.refresh.interval.is_zero() {
            errors.push("refresh.interval must be greater than 0".to_string());
        }
        if self.refresh.list_page_size == 0 {
            errors.push("refresh.list_page_size must be greater than 0".to_string());
        }
        if let Err(ConfigError::Validation { message }) = self.ttl.validate() {
            errors.push(message);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::validation(errors.join("; ")))
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = read_file(path.as_ref()).await?;
        let mut config: AppConfig = serde_yaml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = read_file(path.as_ref()).await?;
        let mut config: AppConfig = serde_json::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from either format, picked by file extension
    pub async fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            Self::load_from_json(path).await
        } else {
            Self::load_from_file(path).await
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.cache.validate()?;
        if self.auth.max_failed_logins == 0 {
            return Err(ConfigError::validation(
                "auth.max_failed_logins must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: CAMPUS_CACHE_<FIELD>
    /// For example: CAMPUS_CACHE_REFRESH_INTERVAL=10m
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `CAMPUS_CACHE_*` overrides from an arbitrary variable set
    pub fn apply_overrides<I>(&mut self, vars: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            match name.as_str() {
                "CAMPUS_CACHE_KEY_PREFIX" => self.cache.key_prefix = value,
                "CAMPUS_CACHE_REFRESH_ENABLED" => {
                    self.cache.refresh.enabled = value.parse().map_err(|e| {
                        ConfigError::validation(format!("Invalid {}: {}", name, e))
                    })?;
                }
                "CAMPUS_CACHE_REFRESH_INTERVAL" => {
                    self.cache.refresh.interval = parse_duration(&name, &value)?;
                }
                "CAMPUS_CACHE_REFRESH_INITIAL_DELAY" => {
                    self.cache.refresh.initial_delay = parse_duration(&name, &value)?;
                }
                "CAMPUS_CACHE_NULL_RESULT_TTL" => {
                    self.cache.ttl.null_result = parse_duration(&name, &value)?;
                }
                "CAMPUS_CACHE_MAX_ENTRIES" => {
                    self.cache.store.max_entries = value.parse().map_err(|e| {
                        ConfigError::validation(format!("Invalid {}: {}", name, e))
                    })?;
                }
                "CAMPUS_CACHE_LOG_LEVEL" => self.logging.level = value,
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse_duration(name: &str, value: &str) -> ConfigResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ConfigError::validation(format!("Invalid {}: {}", name, e)))
}

async fn read_file(path: &Path) -> ConfigResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChangeEvent {
    /// Source file, `None` for programmatic updates
    pub file_path: Option<PathBuf>,
    pub config: AppConfig,
    pub timestamp: Instant,
}

/// Owner of the live configuration.
///
/// Readers always get a consistent snapshot; updates are validated first and
/// then broadcast to subscribers.
pub struct ConfigManager {
    current_config: Arc<RwLock<AppConfig>>,

    config_path: Option<PathBuf>,

    _watcher: Option<notify::RecommendedWatcher>,

    change_sender: broadcast::Sender<ConfigChangeEvent>,
}

impl ConfigManager {
    /// Load the configuration file and start watching it for changes
    pub async fn new<P: AsRef<Path>>(config_path: P) -> ConfigResult<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = AppConfig::load(&config_path).await?;

        let (change_sender, _) = broadcast::channel(16);
        let mut manager = Self {
            current_config: Arc::new(RwLock::new(config)),
            config_path: Some(config_path),
            _watcher: None,
            change_sender,
        };

        manager.setup_file_watcher()?;
        Ok(manager)
    }

    /// Manage an in-memory configuration without a backing file
    pub fn from_config(config: AppConfig) -> ConfigResult<Self> {
        config.validate()?;
        let (change_sender, _) = broadcast::channel(16);
        Ok(Self {
            current_config: Arc::new(RwLock::new(config)),
            config_path: None,
            _watcher: None,
            change_sender,
        })
    }

    /// Snapshot of the current configuration
    pub async fn current(&self) -> AppConfig {
        self.current_config.read().await.clone()
    }

    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_sender.subscribe()
    }

    /// Re-read the backing file
    pub async fn reload_config(&self) -> ConfigResult<()> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };
        tracing::info!(path = %path.display(), "Manually reloading configuration");
        let new_config = AppConfig::load(path).await?;
        self.update_config(new_config).await
    }

    /// Replace the current configuration after validating it
    pub async fn update_config(&self, new_config: AppConfig) -> ConfigResult<()> {
        new_config.validate()?;

        {
            let mut config = self.current_config.write().await;
            *config = new_config.clone();
        }

        let _ = self.change_sender.send(ConfigChangeEvent {
            file_path: self.config_path.clone(),
            config: new_config,
            timestamp: Instant::now(),
        });

        tracing::info!("Configuration updated successfully");
        Ok(())
    }

    /// Watch the config file's parent directory; editors often replace the
    /// file through a rename, which would break a file-level watch.
    fn setup_file_watcher(&mut self) -> ConfigResult<()> {
        let Some(config_path) = self.config_path.clone() else {
            return Ok(());
        };
        let current_config = Arc::clone(&self.current_config);
        let change_sender = self.change_sender.clone();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })?;

        if let Some(parent_dir) = config_path.parent() {
            watcher.watch(parent_dir, RecursiveMode::NonRecursive)?;
        }
        self._watcher = Some(watcher);

        let config_file_name = config_path
            .file_name()
            .ok_or_else(|| ConfigError::validation("Invalid config file path"))?
            .to_owned();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let is_config_file_event = event
                    .paths
                    .iter()
                    .any(|path| path.file_name() == Some(&config_file_name));
                if !is_config_file_event {
                    continue;
                }

                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }

                tracing::info!("Configuration file changed, reloading...");
                // let the writer finish
                tokio::time::sleep(Duration::from_millis(100)).await;

                match AppConfig::load(&config_path).await {
                    Ok(new_config) => {
                        {
                            let mut config = current_config.write().await;
                            if *config == new_config {
                                continue;
                            }
                            *config = new_config.clone();
                        }

                        let _ = change_sender.send(ConfigChangeEvent {
                            file_path: Some(config_path.clone()),
                            config: new_config,
                            timestamp: Instant::now(),
                        });
                        tracing::info!("Configuration reloaded successfully");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to reload configuration, keeping previous one");
                    }
                }
            }
        });

        tracing::info!("File watcher set up for configuration hot reloading");
        Ok(())
    }
}

#[async_trait]
impl ConfigurationSource for ConfigManager {
    async fn auth_settings(&self) -> OriginResult<Option<AuthSettings>> {
        Ok(Some(self.current_config.read().await.auth.clone()))
    }

    async fn cache_settings(&self) -> OriginResult<Option<CacheSettings>> {
        Ok(Some(self.current_config.read().await.cache.clone()))
    }

    async fn setting(&self, name: &str) -> OriginResult<Option<String>> {
        Ok(self.current_config.read().await.system.get(name).cloned())
    }
}
