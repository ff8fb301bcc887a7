use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use dfs_core::NoopSink;
use dfs_node::config::NodeConfig;
use dfs_node::{DriverRegistry, build_engine};

use crate::helpers::context_for;

mod files;
mod spaces;
mod trash;

pub use spaces::SpaceCmd;
pub use trash::TrashCmd;

pub async fn run_command(
    user: &str,
    node_config_file: PathBuf,
    local_data_dir: &Path,
    cmd: crate::Commands,
) -> Result<()> {
    if let crate::Commands::Config { cmd } = cmd {
        return cmd.run(node_config_file, local_data_dir);
    }

    let config = NodeConfig::load(&node_config_file)?;
    let registry = DriverRegistry::with_builtin();
    let fs = build_engine(&config, &registry, Arc::new(NoopSink)).await?;
    let ctx = context_for(user);

    match cmd {
        crate::Commands::Space { cmd } => spaces::run_space(cmd, &fs, &ctx).await,
        crate::Commands::Put { source, target } => files::run_put(&fs, &ctx, source, &target).await,
        crate::Commands::Get { source, out } => files::run_get(&fs, &ctx, &source, out).await,
        crate::Commands::Ls { target } => files::run_ls(&fs, &ctx, &target).await,
        crate::Commands::Stat { target } => files::run_stat(&fs, &ctx, &target).await,
        crate::Commands::Mkdir { target } => files::run_mkdir(&fs, &ctx, &target).await,
        crate::Commands::Mv { from, to } => files::run_mv(&fs, &ctx, &from, &to).await,
        crate::Commands::Rm { target } => files::run_rm(&fs, &ctx, &target).await,
        crate::Commands::Trash { cmd } => trash::run_trash(cmd, &fs, &ctx, &config).await,
        crate::Commands::Config { .. } => Ok(()),
    }
}
