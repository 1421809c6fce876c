// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Controller Configuration Types
//
// Defines the configuration schema for the AgentMesh controller:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Watched namespace set (input to the namespace policy engine)
// - A2A proxy base URL used when rewriting agent cards
// - Reconcile timing: deadlines, refresh intervals, retry backoff, workers
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::namespace_policy::WatchedNamespaces;

pub const API_VERSION: &str = "agentmesh.dev/v1";
pub const KIND: &str = "ControllerConfig";

/// Top-level Kubernetes-style controller configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfigManifest {
    /// API version (must be "agentmesh.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ControllerConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ControllerConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Controller configuration specification (content under spec:)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfigSpec {
    /// Namespaces the controller observes. Empty means all namespaces.
    #[serde(default)]
    pub watch_namespaces: Vec<String>,

    /// Base of every published agent URL: `{base}/{namespace}/{name}/`
    #[serde(default = "default_proxy_base_url")]
    pub a2a_proxy_base_url: String,

    #[serde(default)]
    pub reconcile: ReconcileSettings,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSettings {
    /// Deadline of a single reconcile invocation
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Periodic re-run of tool-server reconciliation, independent of watches
    #[serde(default = "default_tool_refresh_interval")]
    pub tool_refresh_interval_seconds: u64,

    /// Revisit interval while a workload reports not-ready
    #[serde(default = "default_not_ready_requeue")]
    pub not_ready_requeue_seconds: u64,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub backoff: BackoffSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffSettings {
    #[serde(default = "default_backoff_initial")]
    pub initial_millis: u64,

    #[serde(default = "default_backoff_max")]
    pub max_millis: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySettings {
    /// Per-request timeout for MCP tool discovery
    #[serde(default = "default_discovery_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

// Default value functions
fn default_proxy_base_url() -> String {
    "http://agentmesh-controller.agentmesh.svc:8083/api/a2a".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_tool_refresh_interval() -> u64 {
    60
}

fn default_not_ready_requeue() -> u64 {
    5
}

fn default_workers() -> usize {
    4
}

fn default_backoff_initial() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_discovery_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            tool_refresh_interval_seconds: default_tool_refresh_interval(),
            not_ready_requeue_seconds: default_not_ready_requeue(),
            workers: default_workers(),
            backoff: BackoffSettings::default(),
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_millis: default_backoff_initial(),
            max_millis: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_discovery_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for ControllerConfigSpec {
    fn default() -> Self {
        Self {
            watch_namespaces: Vec::new(),
            a2a_proxy_base_url: default_proxy_base_url(),
            reconcile: ReconcileSettings::default(),
            discovery: DiscoverySettings::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for ControllerConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "agentmesh-controller".to_string(),
                labels: None,
            },
            spec: ControllerConfigSpec::default(),
        }
    }
}

impl ControllerConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AGENTMESH_CONFIG_PATH environment variable
    /// 2. ./agentmesh-config.yaml (working directory)
    /// 3. ~/.agentmesh/config.yaml (user home)
    /// 4. /etc/agentmesh/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AGENTMESH_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./agentmesh-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".agentmesh").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/agentmesh/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("AGENTMESH_WATCH_NAMESPACES") {
            let namespaces: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string)
                .collect();
            tracing::info!("Environment override: AGENTMESH_WATCH_NAMESPACES={:?}", namespaces);
            self.spec.watch_namespaces = namespaces;
        }

        if let Some(val) = lookup("AGENTMESH_A2A_PROXY_BASE_URL") {
            tracing::info!("Environment override: AGENTMESH_A2A_PROXY_BASE_URL={}", val);
            self.spec.a2a_proxy_base_url = val;
        }

        if let Some(val) = lookup("AGENTMESH_TOOL_REFRESH_INTERVAL_SECONDS") {
            match val.trim().parse::<u64>() {
                Ok(seconds) => {
                    tracing::info!(
                        "Environment override: AGENTMESH_TOOL_REFRESH_INTERVAL_SECONDS={}",
                        seconds
                    );
                    self.spec.reconcile.tool_refresh_interval_seconds = seconds;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for AGENTMESH_TOOL_REFRESH_INTERVAL_SECONDS: '{}'. Expected seconds. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let proxy = url::Url::parse(&self.spec.a2a_proxy_base_url).map_err(|e| {
            anyhow::anyhow!("Invalid a2aProxyBaseUrl '{}': {}", self.spec.a2a_proxy_base_url, e)
        })?;
        if !matches!(proxy.scheme(), "http" | "https") {
            anyhow::bail!("a2aProxyBaseUrl must use http or https, got '{}'", proxy.scheme());
        }

        let reconcile = &self.spec.reconcile;
        if reconcile.timeout_seconds == 0 {
            anyhow::bail!("reconcile.timeoutSeconds must be greater than zero");
        }
        if reconcile.tool_refresh_interval_seconds == 0 {
            anyhow::bail!("reconcile.toolRefreshIntervalSeconds must be greater than zero");
        }
        if reconcile.not_ready_requeue_seconds == 0 {
            anyhow::bail!("reconcile.notReadyRequeueSeconds must be greater than zero");
        }
        if reconcile.workers == 0 {
            anyhow::bail!("reconcile.workers must be at least 1");
        }

        let backoff = &reconcile.backoff;
        if backoff.initial_millis == 0 {
            anyhow::bail!("reconcile.backoff.initialMillis must be greater than zero");
        }
        if backoff.max_millis < backoff.initial_millis {
            anyhow::bail!(
                "reconcile.backoff.maxMillis ({}) must be >= initialMillis ({})",
                backoff.max_millis,
                backoff.initial_millis
            );
        }
        if backoff.multiplier.is_nan() || backoff.multiplier < 1.0 {
            anyhow::bail!("reconcile.backoff.multiplier must be >= 1.0");
        }

        if self.spec.discovery.timeout_seconds == 0 {
            anyhow::bail!("discovery.timeoutSeconds must be greater than zero");
        }

        if self.spec.watch_namespaces.iter().any(|ns| ns.trim().is_empty()) {
            anyhow::bail!("watchNamespaces entries cannot be empty");
        }

        Ok(())
    }

    pub fn watched_namespaces(&self) -> WatchedNamespaces {
        WatchedNamespaces::from_list(self.spec.watch_namespaces.iter().cloned())
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.spec.reconcile.timeout_seconds)
    }

    pub fn tool_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.spec.reconcile.tool_refresh_interval_seconds)
    }

    pub fn not_ready_requeue(&self) -> Duration {
        Duration::from_secs(self.spec.reconcile.not_ready_requeue_seconds)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.spec.discovery.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = ControllerConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.watched_namespaces(), WatchedNamespaces::All);
    }

    #[test]
    fn test_parse_partial_manifest() {
        let yaml = r#"
apiVersion: agentmesh.dev/v1
kind: ControllerConfig
metadata:
  name: test-controller
spec:
  watchNamespaces: [ns1, ns2]
  a2aProxyBaseUrl: http://proxy:8083/api/a2a
  reconcile:
    toolRefreshIntervalSeconds: 15
    backoff:
      initialMillis: 100
"#;
        let manifest = ControllerConfigManifest::from_yaml_str(yaml).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.tool_refresh_interval(), Duration::from_secs(15));
        assert_eq!(manifest.spec.reconcile.backoff.initial_millis, 100);
        assert_eq!(manifest.spec.reconcile.backoff.max_millis, 60_000);
        assert!(manifest.watched_namespaces().contains("ns2"));
        assert!(!manifest.watched_namespaces().contains("ns3"));
    }

    #[test]
    fn test_validation() {
        let mut manifest = ControllerConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.spec.a2a_proxy_base_url = "not a url".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.a2a_proxy_base_url = "http://proxy/api/a2a".to_string();

        manifest.spec.reconcile.tool_refresh_interval_seconds = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.reconcile.tool_refresh_interval_seconds = 60;

        manifest.spec.reconcile.backoff.max_millis = 10;
        assert!(manifest.validate().is_err());
        manifest.spec.reconcile.backoff.max_millis = 60_000;

        manifest.spec.reconcile.workers = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.reconcile.workers = 2;

        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let mut manifest = ControllerConfigManifest::default();
        manifest.apply_overrides_from(|name| match name {
            "AGENTMESH_WATCH_NAMESPACES" => Some("ns1, ns2,,".to_string()),
            "AGENTMESH_TOOL_REFRESH_INTERVAL_SECONDS" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(manifest.spec.watch_namespaces, vec!["ns1", "ns2"]);
        assert_eq!(manifest.spec.reconcile.tool_refresh_interval_seconds, 60);
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut manifest = ControllerConfigManifest::default();
        manifest.spec.watch_namespaces = vec!["team-a".to_string()];
        manifest.to_yaml_file(&path).unwrap();

        let loaded = ControllerConfigManifest::load_or_default(Some(path)).unwrap();
        assert!(loaded.watched_namespaces().contains("team-a"));
    }
}
