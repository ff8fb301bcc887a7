use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Subcommand;
use toml_edit::{Array, DocumentMut, Item, Table};
use tracing::info;

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the node config file, keeping values that are already set
    Init {
        /// Data directory for the local driver; defaults to the node's data dir
        #[arg(long, value_name = "PATH")]
        root: Option<PathBuf>,
    },
}

fn table<'a>(doc: &'a mut DocumentMut, key: &str) -> anyhow::Result<&'a mut Table> {
    doc.entry(key)
        .or_insert(Item::Table(Table::new()))
        .as_table_mut()
        .with_context(|| format!("'{key}' in node config is not a table"))
}

fn insert_default(table: &mut Table, key: &str, value: impl Into<toml_edit::Value>) {
    table
        .entry(key)
        .or_insert(Item::Value(value.into()));
}

impl CmdConfig {
    pub fn run(self, node_config_file: PathBuf, local_data_dir: &Path) -> anyhow::Result<()> {
        let mut doc = if node_config_file.exists() {
            fs::read_to_string(&node_config_file)?
        } else {
            if let Some(parent) = node_config_file.parent() {
                fs::create_dir_all(parent)?;
            }
            "".to_owned()
        }
        .parse::<DocumentMut>()
        .context("could not parse node config file")?;

        match self {
            Self::Init { root } => {
                let root = root.unwrap_or_else(|| local_data_dir.join("data"));
                let root_str = root
                    .to_str()
                    .context("data directory path is not valid UTF-8")?
                    .to_owned();
                let idcache_path = root.join("idcache.redb");
                let idcache_str = idcache_path
                    .to_str()
                    .context("id cache path is not valid UTF-8")?
                    .to_owned();

                if !doc.contains_key("driver") {
                    doc.insert("driver", "local".into());
                }
                if !doc.contains_key("versioning") {
                    doc.insert("versioning", false.into());
                }

                let drivers = table(&mut doc, "drivers")?;
                drivers.set_implicit(true);
                let local = drivers
                    .entry("local")
                    .or_insert(Item::Table(Table::new()))
                    .as_table_mut()
                    .context("'drivers.local' in node config is not a table")?;
                insert_default(local, "root", root_str);
                insert_default(local, "retain_on_delete", false);

                let id_cache = table(&mut doc, "id_cache")?;
                insert_default(id_cache, "type", "redb");
                insert_default(id_cache, "path", idcache_str);

                let user_mapper = table(&mut doc, "user_mapper")?;
                insert_default(user_mapper, "type", "none");

                let permissions = table(&mut doc, "permissions")?;
                insert_default(permissions, "type", "grants");
                let mut admins = Array::new();
                admins.push("admin");
                insert_default(permissions, "admins", admins);

                let trash = table(&mut doc, "trash")?;
                insert_default(trash, "retention_days", 30i64);
            }
        }

        // refuse to write something the node could not load
        dfs_node::config::NodeConfig::from_toml_str(&doc.to_string())
            .context("generated node config is invalid")?;

        info!("writing to config file {node_config_file:?}");

        let tmp_path = node_config_file.with_extension("tmp");
        let mut tmp = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(doc.to_string().as_bytes())?;
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, node_config_file)?;
        Ok(())
    }
}
