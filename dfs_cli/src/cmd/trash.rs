use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use dfs_core::{NodeType, Reference, RequestContext};
use dfs_fs::{Decomposedfs, PurgeReport, RestoreConflict};
use dfs_node::config::NodeConfig;
use tracing::{info, warn};

use crate::helpers::{parse_reference, parse_space};

#[derive(Subcommand)]
pub enum TrashCmd {
    /// List trashed items of a space, or the contents of a trashed directory
    List {
        space: String,
        #[arg(long)]
        key: Option<String>,
        /// path below the trashed directory
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Restore a trashed item
    Restore {
        space: String,
        key: String,
        /// path below the trashed directory
        #[arg(long, default_value = "/")]
        path: String,
        /// restore to SPACE:/PATH instead of the original location
        #[arg(long, value_name = "REFERENCE")]
        to: Option<String>,
    },
    /// Restore every trashed item of a space to its original location
    RestoreAll {
        space: String,
        /// skip, replace or keep-both
        #[arg(long, value_name = "POLICY", default_value = "skip")]
        on_conflict: RestoreConflict,
    },
    /// Permanently delete a trashed item
    Purge {
        space: String,
        key: String,
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Permanently delete everything in the trash-bin of a space
    Empty { space: String },
    /// Purge items trashed longer ago than the retention period
    PurgeExpired {
        space: String,
        /// defaults to trash.retention_days from the config
        #[arg(long, value_name = "DAYS")]
        older_than_days: Option<u64>,
    },
}

fn print_report(report: &PurgeReport) {
    for key in &report.purged {
        println!("purged {key}");
    }
    for (key, err) in &report.failed {
        warn!(key = %key, error = %err, "failed to purge");
    }
}

pub async fn run_trash(
    cmd: TrashCmd,
    fs: &Decomposedfs,
    ctx: &RequestContext,
    config: &NodeConfig,
) -> Result<()> {
    match cmd {
        TrashCmd::List { space, key, path } => {
            let space_ref = Reference::space(parse_space(&space)?);
            let key = key.unwrap_or_default();
            let items = fs
                .list_recycle(ctx, &space_ref, &key, &path)
                .await
                .context("failed to list trash-bin")?;
            for item in items {
                let kind = match item.node_type {
                    NodeType::Container => "d",
                    NodeType::File => "-",
                };
                println!(
                    "{} {kind} {:>12} {} {}{}",
                    item.key,
                    item.size,
                    item.deletion_time.to_datetime().format("%Y-%m-%d %H:%M:%S"),
                    item.reference.path,
                    if item.relative_path == "/" {
                        String::new()
                    } else {
                        format!(" ({})", item.relative_path)
                    }
                );
            }
        }
        TrashCmd::Restore {
            space,
            key,
            path,
            to,
        } => {
            let space_ref = Reference::space(parse_space(&space)?);
            let to = to.as_deref().map(parse_reference).transpose()?;
            let node = fs
                .restore_recycle_item(ctx, &space_ref, &key, &path, to.as_ref())
                .await
                .with_context(|| format!("failed to restore {key}"))?;
            info!(node = %node.id, "restored {key}");
        }
        TrashCmd::RestoreAll { space, on_conflict } => {
            let space_ref = Reference::space(parse_space(&space)?);
            let report = fs.restore_all(ctx, &space_ref, on_conflict).await?;
            for (key, reference) in &report.restored {
                println!("restored {key} to {}", reference.path);
            }
            for key in &report.skipped {
                println!("skipped {key}");
            }
            for (key, err) in &report.failed {
                warn!(key = %key, error = %err, "failed to restore");
            }
            if !report.failed.is_empty() {
                bail!("{} item(s) could not be restored", report.failed.len());
            }
        }
        TrashCmd::Purge { space, key, path } => {
            let space_ref = Reference::space(parse_space(&space)?);
            fs.purge_recycle_item(ctx, &space_ref, &key, &path)
                .await
                .with_context(|| format!("failed to purge {key}"))?;
            println!("purged {key}");
        }
        TrashCmd::Empty { space } => {
            let space_ref = Reference::space(parse_space(&space)?);
            let report = fs.empty_recycle(ctx, &space_ref).await?;
            print_report(&report);
            if !report.is_complete() {
                bail!("{} item(s) could not be purged", report.failed.len());
            }
        }
        TrashCmd::PurgeExpired {
            space,
            older_than_days,
        } => {
            let older_than = match older_than_days {
                Some(days) => Duration::from_secs(days.saturating_mul(24 * 60 * 60)),
                None => config
                    .trash
                    .retention()
                    .context("no --older-than-days given and no trash.retention_days configured")?,
            };
            let space_ref = Reference::space(parse_space(&space)?);
            let report = fs.purge_expired(ctx, &space_ref, older_than).await?;
            print_report(&report);
            if !report.is_complete() {
                bail!("{} item(s) could not be purged", report.failed.len());
            }
        }
    }
    Ok(())
}
