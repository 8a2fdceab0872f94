//! Loader for edsmq configuration with YAML + environment overlays.
//!
//! Sources are merged in the order they are attached; `EDSMQ_`-prefixed
//! environment variables (with `__` between nested keys) are applied last so they win over files
//! (`EDSMQ_DISPATCHER__THROTTLE_MS=500` overrides `dispatcher.throttle_ms`).
//! After merging, every string value gets `${VAR}` expansion.
//!
//! ```yaml
//! version: "1"
//! dispatcher:
//!   base_url: "https://www.edsm.net"
//!   timeout_secs: 10
//!   throttle_ms: 5000
//!   max_attempts: 3
//!   retry_delay_ms: 0
//! logging:
//!   format: json
//!   stderr: true
//! ```
//!
//! Every field has a default, so an empty document is a valid configuration.
use config::{Config, ConfigError, Environment, File, FileFormat};
use edsmq_common::observability::{LogConfig, LogFormat};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;
const ENV_PREFIX: &str = "EDSMQ";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EdsmqConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub version: Option<String>,
    pub dispatcher: DispatcherSettings,
    pub logging: LoggingSettings,
}

/// Construction-time knobs for the request dispatcher and its HTTP client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Idle time enforced between two requests.
    pub throttle_ms: u64,
    /// Total attempts per request, including the first one.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub user_agent: Option<String>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.edsm.net".into(),
            timeout_secs: 10,
            throttle_ms: 5_000,
            max_attempts: 3,
            retry_delay_ms: 0,
            user_agent: None,
        }
    }
}

impl DispatcherSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub app_name: String,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub stderr: bool,
    /// Used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            app_name: "edsmq".into(),
            dir: None,
            format: LogFormat::Text,
            stderr: false,
            filter: "info".into(),
        }
    }
}

impl LoggingSettings {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            app_name: self.app_name.clone(),
            log_dir: self.dir.clone(),
            emit_stderr: self.stderr,
            format: self.format,
            default_filter: self.filter.clone(),
        }
    }
}

fn string_or_number<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(de)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

fn validate(cfg: &EdsmqConfig) -> Result<(), ConfigError> {
    if cfg.dispatcher.max_attempts == 0 {
        return Err(ConfigError::Message(
            "dispatcher.max_attempts must be at least 1".into(),
        ));
    }
    if cfg.dispatcher.base_url.trim().is_empty() {
        return Err(ConfigError::Message(
            "dispatcher.base_url must not be empty".into(),
        ));
    }
    Ok(())
}

/// Builder hiding the `config` crate wiring (files/snippets + env overrides).
pub struct EdsmqConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for EdsmqConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl EdsmqConfigLoader {
    /// ```
    /// use edsmq_config::EdsmqConfigLoader;
    ///
    /// let config = EdsmqConfigLoader::new()
    ///     .with_yaml_str("version: '1'\ndispatcher:\n  throttle_ms: 250")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.version.as_deref(), Some("1"));
    /// assert_eq!(config.dispatcher.throttle_ms, 250);
    /// assert_eq!(config.dispatcher.max_attempts, 3);
    /// ```
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
        }
    }

    /// Attach a YAML/TOML/JSON file; the format is inferred from the suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Like [`Self::with_file`] but a missing file is skipped, so deployments
    /// can rely on defaults and environment variables alone.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Merge an inline YAML snippet.
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self.builder.add_source(File::from_str(yaml, FileFormat::Yaml));
        self
    }

    /// Apply the environment overlay, expand `${VAR}` placeholders and
    /// deserialize into [`EdsmqConfig`].
    ///
    /// ```
    /// use edsmq_config::EdsmqConfigLoader;
    ///
    /// unsafe { std::env::set_var("EDSM_MIRROR", "http://localhost:8080"); }
    ///
    /// let config = EdsmqConfigLoader::new()
    ///     .with_yaml_str("dispatcher:\n  base_url: \"${EDSM_MIRROR}/edsm\"")
    ///     .load()
    ///     .expect("valid configuration");
    /// assert_eq!(config.dispatcher.base_url, "http://localhost:8080/edsm");
    ///
    /// unsafe { std::env::remove_var("EDSM_MIRROR"); }
    /// ```
    pub fn load(self) -> Result<EdsmqConfig, ConfigError> {
        let cfg = self
            .builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        let typed: EdsmqConfig =
            serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))?;
        validate(&typed)?;
        Ok(typed)
    }
}
