//! Configuration for the deployer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::resource_manager::ResourceSettings;
use crate::domain::PoolKind;
use crate::ports::BuildRequest;

/// Default configuration file, read from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "leasehold.toml";

/// Prefix of environment variables overriding the file (`LEASEHOLD_POOL__PROJECT=...`).
pub const ENV_PREFIX: &str = "LEASEHOLD_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Run identifier. Generated when unset.
    pub run_id: Option<String>,

    pub pool: PoolConfig,

    pub build: BuildConfig,

    pub cluster: ClusterConfig,
}

impl DeployerConfig {
    /// Load configuration from the default sources.
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. `path`, or `leasehold.toml` in the current directory (if present)
    /// 3. Environment variables with `LEASEHOLD_` prefix
    ///
    /// An explicit `path` must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path
            && !path.is_file()
        {
            return Err(ConfigError::Load(format!(
                "config file {} not found",
                path.display()
            )));
        }
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Self::from_figment(
            Self::figment()
                .merge(Toml::file(file))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Defaults only, as a base for further providers.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Settings consumed by the resource manager.
    pub fn resource_settings(&self) -> ResourceSettings {
        ResourceSettings {
            project: self.pool.project.clone(),
            pool_kind: PoolKind::new(self.pool.kind.clone()),
            acquire_timeout: Duration::from_secs(self.pool.acquire_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.pool.heartbeat_interval_secs),
        }
    }

    /// Fail-fast checks, run before anything touches the pool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(project) = &self.pool.project
            && project.trim().is_empty()
        {
            return Err(ConfigError::Invalid("pool.project must not be empty".into()));
        }
        if self.pool.project.is_none() {
            if self.pool.url.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "pool.url is required when no project is configured".into(),
                ));
            }
            if self.pool.acquire_timeout_secs == 0 {
                return Err(ConfigError::Invalid(
                    "pool.acquire_timeout_secs must be greater than zero".into(),
                ));
            }
            if self.pool.kind.trim().is_empty() {
                return Err(ConfigError::Invalid("pool.kind must not be empty".into()));
            }
        }
        if self.cluster.num_nodes == 0 {
            return Err(ConfigError::Invalid(
                "cluster.num_nodes must be at least 1".into(),
            ));
        }
        if let Some(bad) = self
            .cluster
            .extra_env
            .iter()
            .find(|entry| parse_env_entry(entry).is_none())
        {
            return Err(ConfigError::Invalid(format!(
                "cluster.extra_env entry {bad:?} is not KEY=VALUE"
            )));
        }
        Ok(())
    }
}

/// Resource pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Project to use directly. When set the pool is never contacted.
    pub project: Option<String>,

    /// Resource type requested from the pool.
    pub kind: String,

    /// Base URL of the pool service.
    pub url: String,

    /// How long to wait for a resource before giving up.
    pub acquire_timeout_secs: u64,

    /// How often to heartbeat an acquired resource. 0 disables heartbeating.
    pub heartbeat_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            project: None,
            kind: PoolKind::GCE_PROJECT.to_string(),
            url: "http://boskos.test-pods.svc.cluster.local.".to_string(),
            acquire_timeout_secs: 5 * 60,
            heartbeat_interval_secs: 5 * 60,
        }
    }
}

/// Node image build configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Build tool executable.
    pub tool: String,

    /// Explicit image name.
    pub image: Option<String>,

    /// Image name the tool produces when none is given.
    pub default_image: String,

    /// Source tree to build from.
    pub source_root: Option<PathBuf>,

    /// Build type passed through to the tool.
    pub build_type: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            tool: "kind".to_string(),
            image: None,
            default_image: "kindest/node:latest".to_string(),
            source_root: None,
            build_type: None,
        }
    }
}

impl BuildConfig {
    pub fn request(&self) -> BuildRequest {
        BuildRequest {
            image: self.image.clone(),
            source_root: self.source_root.clone(),
            build_type: self.build_type.clone(),
        }
    }
}

/// Cluster configuration, turned into the environment of the up/down scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Root of the repository holding `cluster/kube-up.sh` and friends.
    pub repo_root: PathBuf,

    pub kubeconfig: PathBuf,

    pub zone: Option<String>,

    pub num_nodes: u32,

    pub enable_cache_mutation_detector: bool,

    pub runtime_config: Option<String>,

    pub enable_pod_security_policy: bool,

    pub create_custom_network: bool,

    pub node_scopes: Option<String>,

    pub node_service_account: Option<String>,

    pub cloud_provider: Option<String>,

    pub feature_gates: Option<String>,

    pub master_size: Option<String>,

    pub node_size: Option<String>,

    /// Enable `compute.googleapis.com` on the project before bringing the cluster up.
    /// Needed for projects that have never run a cluster.
    pub enable_compute_api: bool,

    /// ingress-gce image for the Ingress and load balancer controller.
    pub ingress_gce_image: Option<String>,

    /// Additional `KEY=VALUE` entries appended last.
    pub extra_env: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            kubeconfig: PathBuf::from("_rundir/kubeconfig"),
            zone: None,
            num_nodes: 3,
            enable_cache_mutation_detector: false,
            runtime_config: None,
            enable_pod_security_policy: false,
            create_custom_network: false,
            node_scopes: None,
            node_service_account: None,
            cloud_provider: None,
            feature_gates: None,
            master_size: None,
            node_size: None,
            enable_compute_api: false,
            ingress_gce_image: None,
            extra_env: Vec::new(),
        }
    }
}

/// Split a `KEY=VALUE` entry. The key must be non-empty.
pub fn parse_env_entry(entry: &str) -> Option<(&str, &str)> {
    entry
        .split_once('=')
        .filter(|(key, _)| !key.is_empty() && !key.contains(char::is_whitespace))
}
