//! Mastiff Configuration
//!
//! This module provides configuration structures for the mastiff
//! topology coordinator. Settings load from a TOML file, from the
//! environment, or both; environment variables win.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main mastiff configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MastiffConfig {
    /// Consensus store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Database probe configuration
    #[serde(default)]
    pub probe: ProbeConfig,

    /// ProxySQL admin configuration
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Reconciliation loop configuration
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Consensus store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// etcd endpoint URLs
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Store username
    #[serde(default)]
    pub user: String,

    /// Store password
    #[serde(default)]
    pub password: String,

    /// Key namespace prefix (prepended to every key)
    #[serde(default)]
    pub namespace: String,
}

/// Database probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Replication user for probe connections
    #[serde(default)]
    pub username: String,

    /// Replication user password
    #[serde(default)]
    pub password: String,

    /// Hard deadline per probe in seconds
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,

    /// Replication lag above which a replica is unhealthy, in seconds
    #[serde(default = "default_lag_threshold")]
    pub lag_threshold_secs: u64,

    /// Maximum concurrent probes during a health sweep
    #[serde(default = "default_probe_concurrency")]
    pub concurrency: usize,
}

/// ProxySQL admin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Admin interface address
    #[serde(default = "default_proxy_address")]
    pub admin_address: String,

    /// Admin username
    #[serde(default)]
    pub admin_user: String,

    /// Admin password
    #[serde(default)]
    pub admin_password: String,

    /// Hostgroup id that receives writes
    #[serde(default = "default_writer_hostgroup")]
    pub writer_hostgroup: u32,

    /// Hostgroup id that receives reads
    #[serde(default = "default_reader_hostgroup")]
    pub reader_hostgroup: u32,

    /// Backend connection cap pushed to the proxy at startup
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Monitor probe interval pushed to the proxy at startup, in milliseconds
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Startup attempts before giving up on the proxy
    #[serde(default = "default_startup_retries")]
    pub startup_retries: u32,

    /// Delay between startup attempts in seconds
    #[serde(default = "default_startup_retry_delay")]
    pub startup_retry_delay_secs: u64,
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Tick period in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Seconds to suppress master demotion after a promotion
    #[serde(default = "default_promotion_grace")]
    pub promotion_grace_secs: u64,

    /// Node records older than this are pruned, in seconds
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_lag_threshold() -> u64 {
    300
}

fn default_probe_concurrency() -> usize {
    16
}

fn default_proxy_address() -> String {
    "127.0.0.1:6032".to_string()
}

fn default_writer_hostgroup() -> u32 {
    10
}

fn default_reader_hostgroup() -> u32 {
    20
}

fn default_max_connections() -> u32 {
    2048
}

fn default_monitor_interval_ms() -> u64 {
    2000
}

fn default_startup_retries() -> u32 {
    5
}

fn default_startup_retry_delay() -> u64 {
    2
}

fn default_check_interval() -> u64 {
    5
}

fn default_promotion_grace() -> u64 {
    30
}

fn default_max_age() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            timeout_secs: default_probe_timeout(),
            lag_threshold_secs: default_lag_threshold(),
            concurrency: default_probe_concurrency(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            admin_address: default_proxy_address(),
            admin_user: String::new(),
            admin_password: String::new(),
            writer_hostgroup: default_writer_hostgroup(),
            reader_hostgroup: default_reader_hostgroup(),
            max_connections: default_max_connections(),
            monitor_interval_ms: default_monitor_interval_ms(),
            startup_retries: default_startup_retries(),
            startup_retry_delay_secs: default_startup_retry_delay(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            promotion_grace_secs: default_promotion_grace(),
            max_age_secs: default_max_age(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl MastiffConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MastiffConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: MastiffConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Build configuration purely from the environment
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay the enumerated environment variables onto this configuration.
    ///
    /// `ETCDCTL_USER` carries credentials as `user:pass`, matching the
    /// etcdctl convention used by the node-side registration agents.
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(endpoints) = std::env::var("ETCDCTL_ENDPOINTS") {
            self.store.endpoints = endpoints
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(user) = std::env::var("ETCDCTL_USER") {
            match user.split_once(':') {
                Some((u, p)) => {
                    self.store.user = u.to_string();
                    self.store.password = p.to_string();
                }
                None => {
                    return Err(crate::Error::Config(
                        "ETCDCTL_USER must be formatted as user:pass".into(),
                    ));
                }
            }
        }
        if let Ok(user) = std::env::var("MYSQL_REPL_USERNAME") {
            self.probe.username = user;
        }
        if let Ok(pass) = std::env::var("MYSQL_REPL_PASSWORD") {
            self.probe.password = pass;
        }
        if let Ok(user) = std::env::var("PROXYSQL_ADMIN_USER") {
            self.proxy.admin_user = user;
        }
        if let Ok(pass) = std::env::var("PROXYSQL_ADMIN_PASSWORD") {
            self.proxy.admin_password = pass;
        }
        self.reconciler.check_interval_secs =
            env_u64("CHECK_INTERVAL", self.reconciler.check_interval_secs)?;
        self.reconciler.promotion_grace_secs =
            env_u64("PROMOTION_GRACE_PERIOD", self.reconciler.promotion_grace_secs)?;
        self.reconciler.max_age_secs = env_u64("MAX_AGE", self.reconciler.max_age_secs)?;
        self.proxy.writer_hostgroup =
            env_u64("WRITER_HOSTGROUP", u64::from(self.proxy.writer_hostgroup))? as u32;
        self.proxy.reader_hostgroup =
            env_u64("READER_HOSTGROUP", u64::from(self.proxy.reader_hostgroup))? as u32;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.store.endpoints.is_empty() {
            return Err(crate::Error::Config(
                "store.endpoints cannot be empty (set ETCDCTL_ENDPOINTS)".into(),
            ));
        }
        if self.store.user.is_empty() {
            return Err(crate::Error::Config(
                "store.user cannot be empty (set ETCDCTL_USER)".into(),
            ));
        }
        if self.probe.username.is_empty() {
            return Err(crate::Error::Config(
                "probe.username cannot be empty (set MYSQL_REPL_USERNAME)".into(),
            ));
        }
        if self.proxy.admin_user.is_empty() {
            return Err(crate::Error::Config(
                "proxy.admin_user cannot be empty (set PROXYSQL_ADMIN_USER)".into(),
            ));
        }
        if self.reconciler.check_interval_secs == 0 {
            return Err(crate::Error::Config(
                "reconciler.check_interval_secs must be at least 1".into(),
            ));
        }
        if self.proxy.writer_hostgroup == self.proxy.reader_hostgroup {
            return Err(crate::Error::Config(
                "writer and reader hostgroups must differ".into(),
            ));
        }
        if self.probe.concurrency == 0 {
            return Err(crate::Error::Config(
                "probe.concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get tick period as Duration
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.reconciler.check_interval_secs)
    }

    /// Get promotion grace period as Duration
    pub fn promotion_grace(&self) -> Duration {
        Duration::from_secs(self.reconciler.promotion_grace_secs)
    }

    /// Get per-probe deadline as Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }

    /// Get delay between proxy startup attempts as Duration
    pub fn startup_retry_delay(&self) -> Duration {
        Duration::from_secs(self.proxy.startup_retry_delay_secs)
    }
}

fn env_u64(name: &str, current: u64) -> crate::Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| crate::Error::Config(format!("{} must be a positive integer", name))),
        Err(_) => Ok(current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[store]
endpoints = ["http://etcd-1:2379", "http://etcd-2:2379"]
user = "mastiff"
password = "secret"

[probe]
username = "repl"
password = "replpass"

[proxy]
admin_user = "admin"
admin_password = "admin"

[reconciler]
check_interval_secs = 10
"#;

        let config = MastiffConfig::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.store.endpoints.len(), 2);
        assert_eq!(config.reconciler.check_interval_secs, 10);
        assert_eq!(config.reconciler.max_age_secs, 300);
        assert_eq!(config.proxy.writer_hostgroup, 10);
        assert_eq!(config.proxy.reader_hostgroup, 20);
    }

    #[test]
    fn test_validate_rejects_missing_endpoints() {
        let config = MastiffConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_colliding_hostgroups() {
        let mut config = MastiffConfig::from_str(
            r#"
[store]
endpoints = ["http://etcd:2379"]
user = "u"
password = "p"

[probe]
username = "repl"

[proxy]
admin_user = "admin"
"#,
        )
        .unwrap();
        config.proxy.reader_hostgroup = config.proxy.writer_hostgroup;
        assert!(config.validate().is_err());
    }
}
