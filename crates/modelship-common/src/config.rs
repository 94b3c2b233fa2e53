//! Engine configuration
//!
//! Every field has a default so an empty document is a valid configuration.
//! Durations are expressed in whole seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Namespace used when a deployment does not name one
    pub default_namespace: String,
    /// Target spec compilation defaults
    pub compiler: CompilerConfig,
    /// Informer cache bounds
    pub informer: InformerConfig,
    /// Periodic syncer schedule and bounds
    pub syncer: SyncerConfig,
    /// Background pool for detached post-deploy work
    pub background: BackgroundConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_namespace: "modelship".to_string(),
            compiler: CompilerConfig::default(),
            informer: InformerConfig::default(),
            syncer: SyncerConfig::default(),
            background: BackgroundConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let c = &self.compiler;
        if c.default_min_replicas == 0 {
            return Err(Error::config("compiler.defaultMinReplicas must be at least 1"));
        }
        if c.default_min_replicas > c.default_max_replicas {
            return Err(Error::config(
                "compiler.defaultMinReplicas must not exceed compiler.defaultMaxReplicas",
            ));
        }
        if self.syncer.max_concurrency == 0 {
            return Err(Error::config("syncer.maxConcurrency must be at least 1"));
        }
        if self.background.max_concurrency == 0 {
            return Err(Error::config("background.maxConcurrency must be at least 1"));
        }
        if self.informer.lock_wait_secs == 0 || self.informer.sync_timeout_secs == 0 {
            return Err(Error::config("informer timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// Defaults applied by the target spec compiler
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Replica count when no autoscaler overrides it
    pub default_replicas: u32,
    /// Autoscaler min replicas when unset
    pub default_min_replicas: u32,
    /// Autoscaler max replicas when unset
    pub default_max_replicas: u32,
    /// Port the serving container listens on
    pub container_port: u16,
    /// Port the Service exposes
    pub service_port: u16,
    /// Ingress class used when the cluster does not name one
    pub default_ingress_class: Option<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            default_replicas: 2,
            default_min_replicas: 2,
            default_max_replicas: 10,
            container_port: 3000,
            service_port: 3000,
            default_ingress_class: Some("nginx".to_string()),
        }
    }
}

/// Informer registry bounds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InformerConfig {
    /// Maximum wait for the registry lock
    pub lock_wait_secs: u64,
    /// Maximum wait for a new cache's initial sync
    pub sync_timeout_secs: u64,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            lock_wait_secs: 10,
            sync_timeout_secs: 30,
        }
    }
}

impl InformerConfig {
    /// Lock wait as a duration
    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    /// Sync timeout as a duration
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

/// Periodic syncer schedule
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncerConfig {
    /// Tick for deployment status resync
    pub deployment_status_interval_secs: u64,
    /// A deployment is stale when its last status update is older than this
    pub stale_after_secs: u64,
    /// Maximum concurrent resync tasks per tick
    pub max_concurrency: usize,
    /// Maximum wait for one tick's tasks before reporting a timeout
    pub wait_timeout_secs: u64,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            deployment_status_interval_secs: 60,
            stale_after_secs: 60,
            max_concurrency: 1000,
            wait_timeout_secs: 600,
        }
    }
}

impl SyncerConfig {
    /// Deployment status tick
    pub fn deployment_status_interval(&self) -> Duration {
        Duration::from_secs(self.deployment_status_interval_secs)
    }

    /// Staleness threshold
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Per-tick wait timeout
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

/// Background pool bounds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackgroundConfig {
    /// Maximum concurrently running background tasks
    pub max_concurrency: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 64,
        }
    }
}
