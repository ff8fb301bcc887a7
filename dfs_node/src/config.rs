use anyhow::{Context, bail, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Name of the storage driver, looked up in the driver registry.
    pub driver: String,
    #[serde(default)]
    pub drivers: DriversConfig,
    #[serde(default)]
    pub id_cache: IdCacheConfig,
    #[serde(default)]
    pub user_mapper: UserMapperConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    /// Keep previous file contents as revisions.
    #[serde(default)]
    pub versioning: bool,
    #[serde(default)]
    pub trash: TrashConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriversConfig {
    pub local: Option<LocalDriverConfig>,
    pub memory: Option<MemoryDriverConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalDriverConfig {
    /// Holds both node metadata and blobs.
    pub root: PathBuf,
    #[serde(default)]
    pub retain_on_delete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryDriverConfig {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum IdCacheConfig {
    Memory {
        ttl_secs: Option<u64>,
        max_entries: Option<usize>,
    },
    Redb {
        path: PathBuf,
        ttl_secs: Option<u64>,
    },
}

impl Default for IdCacheConfig {
    fn default() -> Self {
        Self::Memory {
            ttl_secs: None,
            max_entries: Some(100_000),
        }
    }
}

impl IdCacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Memory { ttl_secs, .. } | Self::Redb { ttl_secs, .. } => {
                ttl_secs.map(Duration::from_secs)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum UserMapperConfig {
    #[default]
    None,
    Unix,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum PermissionsConfig {
    AllowAll,
    DenyAll,
    Grants {
        #[serde(default)]
        admins: Vec<String>,
    },
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self::Grants {
            admins: vec!["admin".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrashConfig {
    /// Default age after which trashed items are purged by
    /// `purge-expired`. Unset keeps them until purged explicitly.
    pub retention_days: Option<u64>,
    /// Rename attempts of a keep-both restore before giving up.
    pub max_rename_attempts: Option<u32>,
}

impl TrashConfig {
    pub fn retention(&self) -> Option<Duration> {
        self.retention_days
            .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
    }
}

impl NodeConfig {
    /// A local-driver configuration storing everything below `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            driver: "local".to_string(),
            drivers: DriversConfig {
                local: Some(LocalDriverConfig {
                    root: root.clone(),
                    retain_on_delete: false,
                }),
                memory: None,
            },
            id_cache: IdCacheConfig::Redb {
                path: root.join("idcache.redb"),
                ttl_secs: None,
            },
            user_mapper: UserMapperConfig::None,
            permissions: PermissionsConfig::default(),
            versioning: false,
            trash: TrashConfig::default(),
        }
    }

    /// A configuration keeping everything in memory.
    pub fn memory() -> Self {
        Self {
            driver: "memory".to_string(),
            drivers: DriversConfig {
                local: None,
                memory: Some(MemoryDriverConfig {}),
            },
            id_cache: IdCacheConfig::default(),
            user_mapper: UserMapperConfig::None,
            permissions: PermissionsConfig::default(),
            versioning: false,
            trash: TrashConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.driver.is_empty(), "no driver selected");
        if self.driver == "local" {
            let local = self
                .drivers
                .local
                .as_ref()
                .context("driver 'local' selected but [drivers.local] is missing")?;
            ensure!(
                !local.root.as_os_str().is_empty(),
                "[drivers.local] root must not be empty"
            );
        }
        match &self.id_cache {
            IdCacheConfig::Memory { max_entries, .. } => {
                ensure!(
                    *max_entries != Some(0),
                    "[id_cache] max_entries must be positive"
                );
            }
            IdCacheConfig::Redb { path, .. } => {
                ensure!(
                    !path.as_os_str().is_empty(),
                    "[id_cache] redb path must not be empty"
                );
            }
        }
        if self.id_cache.ttl() == Some(Duration::ZERO) {
            bail!("[id_cache] ttl_secs must be positive");
        }
        if self.user_mapper == UserMapperConfig::Unix && !cfg!(target_os = "linux") {
            bail!("the unix user mapper is only available on linux");
        }
        if self.trash.retention_days == Some(0) {
            bail!("[trash] retention_days must be positive");
        }
        if self.trash.max_rename_attempts == Some(0) {
            bail!("[trash] max_rename_attempts must be positive");
        }
        Ok(())
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s).context("failed to parse node config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialize node config")
    }
}
