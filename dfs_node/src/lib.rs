//! Assembly of decomposedfs engines from a [`NodeConfig`].
//!
//! Storage drivers are looked up by name in a [`DriverRegistry`]. The
//! registry is built once at startup and passed to [`build_engine`].

use crate::config::{IdCacheConfig, NodeConfig, PermissionsConfig, UserMapperConfig};
use anyhow::Context;
use dfs_blobstore_local::{LocalBlobstore, LocalBlobstoreConfig};
use dfs_blobstore_memory::MemoryBlobstore;
use dfs_core::{
    Blobstore, EventSink, IdCache, NullMapper, Permissions, StaticPermissions, UserMapper,
};
use dfs_fs::{
    Aspects, DEFAULT_MAX_RENAME_ATTEMPTS, Decomposedfs, GrantPermissions, Lookup, Options,
    PathLookup,
};
use dfs_idcache_redb::RedbIdStore;
use dfs_metadata_file::FileMetadataBackend;
use dfs_metadata_memory::MemoryMetadataBackend;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub mod config;

/// Lookup and blobstore of one storage driver.
pub type Driver = (Arc<dyn PathLookup>, Arc<dyn Blobstore>);

pub type DriverFactory =
    Box<dyn Fn(&NodeConfig, IdCache) -> anyhow::Result<Driver> + Send + Sync>;

#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `local` and `memory` drivers.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("local", Box::new(local_driver));
        registry.register("memory", Box::new(memory_driver));
        registry
    }

    /// Registers `factory` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, factory: DriverFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, config: &NodeConfig, id_cache: IdCache) -> anyhow::Result<Driver> {
        let factory = self.factories.get(&config.driver).with_context(|| {
            format!(
                "unknown driver '{}', available: {}",
                config.driver,
                self.names().collect::<Vec<_>>().join(", ")
            )
        })?;
        factory(config, id_cache).with_context(|| format!("failed to create driver '{}'", config.driver))
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

fn local_driver(config: &NodeConfig, id_cache: IdCache) -> anyhow::Result<Driver> {
    let local = config
        .drivers
        .local
        .as_ref()
        .context("[drivers.local] is missing")?;
    let metadata = Arc::new(FileMetadataBackend::new(&local.root));
    let blobstore = LocalBlobstore::create(LocalBlobstoreConfig {
        root: local.root.clone(),
        retain_on_delete: local.retain_on_delete,
    });
    Ok((Arc::new(Lookup::new(metadata, id_cache)), Arc::new(blobstore)))
}

fn memory_driver(_config: &NodeConfig, id_cache: IdCache) -> anyhow::Result<Driver> {
    let metadata = Arc::new(MemoryMetadataBackend::new());
    Ok((
        Arc::new(Lookup::new(metadata, id_cache)),
        Arc::new(MemoryBlobstore::new()),
    ))
}

pub fn build_id_cache(config: &IdCacheConfig) -> anyhow::Result<IdCache> {
    Ok(match config {
        IdCacheConfig::Memory { max_entries, .. } => IdCache::in_memory(config.ttl(), *max_entries),
        IdCacheConfig::Redb { path, .. } => {
            let store = RedbIdStore::open(path)
                .with_context(|| format!("failed to open id cache {}", path.display()))?;
            IdCache::new(Arc::new(store), config.ttl())
        }
    })
}

fn build_user_mapper(config: UserMapperConfig) -> anyhow::Result<Arc<dyn UserMapper>> {
    match config {
        UserMapperConfig::None => Ok(Arc::new(NullMapper::new())),
        #[cfg(target_os = "linux")]
        UserMapperConfig::Unix => Ok(Arc::new(dfs_core::UnixMapper::new())),
        #[cfg(not(target_os = "linux"))]
        UserMapperConfig::Unix => anyhow::bail!("the unix user mapper is only available on linux"),
    }
}

fn build_permissions(
    config: &PermissionsConfig,
    lookup: Arc<dyn PathLookup>,
) -> Arc<dyn Permissions> {
    match config {
        PermissionsConfig::AllowAll => Arc::new(StaticPermissions::allow_all()),
        PermissionsConfig::DenyAll => Arc::new(StaticPermissions::deny_all()),
        PermissionsConfig::Grants { admins } => {
            Arc::new(GrantPermissions::new(lookup).with_admins(admins.iter().cloned()))
        }
    }
}

/// Builds and opens an engine for `config`.
pub async fn build_engine(
    config: &NodeConfig,
    registry: &DriverRegistry,
    events: Arc<dyn EventSink>,
) -> anyhow::Result<Decomposedfs> {
    config.validate()?;
    let id_cache = build_id_cache(&config.id_cache)?;
    let (lookup, blobstore) = registry.create(config, id_cache)?;
    let permissions = build_permissions(&config.permissions, lookup.clone());
    let user_mapper = build_user_mapper(config.user_mapper)?;

    let aspects = Aspects::new(
        lookup,
        blobstore,
        permissions,
        user_mapper,
        events,
        Options {
            enable_versioning: config.versioning,
            max_rename_attempts: config
                .trash
                .max_rename_attempts
                .unwrap_or(DEFAULT_MAX_RENAME_ATTEMPTS),
        },
    );
    let fs = Decomposedfs::open(aspects)
        .await
        .context("failed to open decomposedfs")?;
    info!(driver = %config.driver, versioning = config.versioning, "engine ready");
    Ok(fs)
}
