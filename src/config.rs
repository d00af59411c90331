//! Configuration loading.
//!
//! Every component takes its settings as an explicit struct at construction
//! time; there is no process-wide configuration. [`Config`] bundles the
//! per-component sections so a host application (or the `rift` binary) can
//! read them from one JSON file and then hand each section to the component
//! that owns it.
//!
//! Durations are stored on disk as integer milliseconds (`*_ms` keys).
//! Every field has a default, so an empty object `{}` is a valid file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants;

/// Top-level configuration for all rift components.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Identifier codec settings.
    pub uri: UriConfig,
    /// Bridge protocol settings.
    pub bridge: BridgeConfig,
    /// Identifier detector settings.
    pub detector: DetectorConfig,
    /// Content viewer settings.
    pub embed: EmbedConfig,
}

/// Settings for [`crate::uri::UriCodec`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct UriConfig {
    /// Identifier scheme without the `://` separator.
    pub scheme: String,
    /// Resolve local development hosts to `http://` instead of `https://`.
    #[serde(alias = "useInsecureForLocalDevelopment")]
    pub use_insecure_for_local_development: bool,
    /// Hosts matched case-insensitively as local development targets.
    #[serde(alias = "localHosts")]
    pub local_hosts: Vec<String>,
    /// Host suffix that is always local (e.g. `.local`).
    pub local_tld: String,
}

impl Default for UriConfig {
    fn default() -> Self {
        Self {
            scheme: constants::DEFAULT_SCHEME.to_string(),
            use_insecure_for_local_development: false,
            local_hosts: constants::DEFAULT_LOCAL_HOSTS
                .iter()
                .map(|h| (*h).to_string())
                .collect(),
            local_tld: constants::DEFAULT_LOCAL_TLD.to_string(),
        }
    }
}

/// Settings for [`crate::bridge::Bridge`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Prefix of every wire message `type` (`<namespace>:intent`).
    pub namespace: String,
    /// Deadline for the counterpart's context reply after a handshake.
    #[serde(rename = "handshake_timeout_ms", with = "millis")]
    pub handshake_timeout: Duration,
    /// Deadline for each `query`/`mutate` reply.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// Delay before resending a handshake that found no counterpart.
    #[serde(rename = "handshake_retry_delay_ms", with = "millis")]
    pub handshake_retry_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            namespace: constants::DEFAULT_NAMESPACE.to_string(),
            handshake_timeout: constants::HANDSHAKE_TIMEOUT,
            request_timeout: constants::REQUEST_TIMEOUT,
            handshake_retry_delay: constants::HANDSHAKE_RETRY_DELAY,
        }
    }
}

/// Settings for [`crate::detector::Detector`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct DetectorConfig {
    /// Quiet period for mutation-triggered rescans.
    #[serde(rename = "throttle_ms", with = "millis")]
    pub throttle: Duration,
    /// Skip occurrences already reported by an earlier full scan.
    pub dedupe: bool,
    /// Element tags whose descendant text is never scanned.
    pub skip_tags: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            throttle: constants::RESCAN_THROTTLE,
            dedupe: true,
            skip_tags: constants::DEFAULT_SKIP_TAGS
                .iter()
                .map(|t| (*t).to_string())
                .collect(),
        }
    }
}

/// Settings for [`crate::embed::Embedder`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct EmbedConfig {
    /// Deadline for a viewer to report load or error.
    #[serde(rename = "load_timeout_ms", with = "millis")]
    pub load_timeout: Duration,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            load_timeout: constants::VIEWER_LOAD_TIMEOUT,
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config JSON: {}", path.display()))?;
        Ok(config)
    }

    /// Loads configuration from `path` if given, otherwise defaults, then
    /// applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies `RIFT_INSECURE_LOCAL` and `RIFT_LOCAL_HOSTS` overrides.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("RIFT_INSECURE_LOCAL") {
            match parse_bool(&value) {
                Some(flag) => self.uri.use_insecure_for_local_development = flag,
                None => log::warn!("Ignoring RIFT_INSECURE_LOCAL={value:?}: expected a boolean"),
            }
        }

        if let Ok(hosts) = std::env::var("RIFT_LOCAL_HOSTS") {
            self.uri.local_hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
