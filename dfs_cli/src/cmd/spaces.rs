use anyhow::{Context, Result};
use clap::Subcommand;
use dfs_core::{RequestContext, User};
use dfs_fs::Decomposedfs;
use tracing::info;

use crate::helpers::parse_space;

#[derive(Subcommand)]
pub enum SpaceCmd {
    /// Create a space
    Create {
        space: String,
        /// owner of the new space; defaults to the --user
        #[arg(long, value_name = "USER")]
        owner: Option<String>,
        /// uid/gid file operations in this space run as
        #[arg(long, requires = "gid")]
        uid: Option<u32>,
        #[arg(long, requires = "uid")]
        gid: Option<u32>,
    },
    /// List spaces visible to the --user
    List,
}

pub async fn run_space(cmd: SpaceCmd, fs: &Decomposedfs, ctx: &RequestContext) -> Result<()> {
    match cmd {
        SpaceCmd::Create {
            space,
            owner,
            uid,
            gid,
        } => {
            let space_id = parse_space(&space)?;
            let mut owner = User::new(owner.unwrap_or_else(|| ctx.user.id.clone()));
            if let (Some(uid), Some(gid)) = (uid, gid) {
                owner = owner.with_ids(uid, gid);
            }
            fs.create_space(ctx, &space_id, &owner)
                .await
                .with_context(|| format!("failed to create space {space}"))?;
            info!(space = %space_id, owner = %owner.id, "created space");
        }
        SpaceCmd::List => {
            for space in fs.list_spaces(ctx).await? {
                println!("{space}");
            }
        }
    }
    Ok(())
}
