use crate::core::{Result, RoutingError};
use crate::storage::BlobPath;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Setting that gates remote routing persistence.
pub const REMOTE_ROUTING_ENABLED_SETTING: &str = "cluster.remote_store.routing.enabled";
pub const REMOTE_ROUTING_BASE_PATH_SETTING: &str = "cluster.remote_store.routing.base_path";
pub const REMOTE_ROUTING_TIMEOUT_SETTING: &str =
    "cluster.remote_store.routing.publication_timeout_ms";
pub const REMOTE_ROUTING_READ_CONCURRENCY_SETTING: &str =
    "cluster.remote_store.routing.max_concurrent_reads";

/// Path token between the cluster name and the cluster uuid.
pub const CLUSTER_STATE_PATH_TOKEN: &str = "cluster-state";

/// Remote routing table configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteRoutingConfig {
    /// Whether routing tables are persisted remotely at all
    pub enabled: bool,

    /// Root path inside the blob store
    pub base_path: Vec<String>,

    /// Cluster name
    pub cluster_name: String,

    /// Cluster uuid
    pub cluster_uuid: String,

    /// Upper bound on waiting for one publication's uploads, in milliseconds
    pub publication_timeout_ms: u64,

    /// Maximum routing files fetched at once during reconstruction
    pub max_concurrent_reads: usize,
}

impl RemoteRoutingConfig {
    /// Create an enabled configuration for a cluster
    pub fn new(cluster_name: &str, cluster_uuid: &str) -> Self {
        Self {
            enabled: true,
            cluster_name: cluster_name.to_string(),
            cluster_uuid: cluster_uuid.to_string(),
            ..Self::default()
        }
    }

    /// Enable or disable remote routing persistence
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the root path, `/`-separated
    pub fn base_path(mut self, base_path: &str) -> Self {
        self.base_path = BlobPath::root().add(base_path).segments().to_vec();
        self
    }

    /// Set publication timeout
    pub fn publication_timeout(mut self, timeout: Duration) -> Self {
        self.publication_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Set read concurrency
    pub fn max_concurrent_reads(mut self, max: usize) -> Self {
        self.max_concurrent_reads = max;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn publication_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.publication_timeout_ms)
    }

    /// `<base>/<cluster name>/cluster-state/<cluster uuid>`
    pub fn cluster_metadata_base_path(&self) -> BlobPath {
        BlobPath::from_segments(self.base_path.iter().cloned())
            .add(self.cluster_name.as_str())
            .add(CLUSTER_STATE_PATH_TOKEN)
            .add(self.cluster_uuid.as_str())
    }

    /// Applies `key = value` settings over this configuration.
    ///
    /// Unknown keys are ignored.
    pub fn with_settings<'a, I>(mut self, settings: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in settings {
            let value = value.trim();
            match key {
                REMOTE_ROUTING_ENABLED_SETTING => {
                    self.enabled = value.parse().map_err(|_| {
                        RoutingError::InvalidConfig(format!("{} must be true or false", key))
                    })?;
                }
                REMOTE_ROUTING_BASE_PATH_SETTING => {
                    self = self.base_path(value);
                }
                REMOTE_ROUTING_TIMEOUT_SETTING => {
                    self.publication_timeout_ms = value.parse().map_err(|_| {
                        RoutingError::InvalidConfig(format!("{} must be an integer", key))
                    })?;
                }
                REMOTE_ROUTING_READ_CONCURRENCY_SETTING => {
                    self.max_concurrent_reads = value.parse().map_err(|_| {
                        RoutingError::InvalidConfig(format!("{} must be an integer", key))
                    })?;
                }
                _ => {}
            }
        }
        Ok(self)
    }

    /// Validate configuration. A disabled configuration is always valid.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        for (label, value) in [
            ("cluster_name", &self.cluster_name),
            ("cluster_uuid", &self.cluster_uuid),
        ] {
            if value.trim().is_empty() {
                return Err(RoutingError::InvalidConfig(format!("{} cannot be empty", label)));
            }
            if value.contains('/') {
                return Err(RoutingError::InvalidConfig(format!("{} cannot contain '/'", label)));
            }
        }

        if self.publication_timeout_ms == 0 {
            return Err(RoutingError::InvalidConfig(
                "publication_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.max_concurrent_reads == 0 {
            return Err(RoutingError::InvalidConfig(
                "max_concurrent_reads must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for RemoteRoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_path: Vec::new(),
            cluster_name: String::new(),
            cluster_uuid: String::new(),
            publication_timeout_ms: 30_000,
            max_concurrent_reads: 16,
        }
    }
}
