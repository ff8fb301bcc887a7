use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use dfs_core::RequestContext;
use dfs_fs::Decomposedfs;
use tracing::info;

use crate::helpers::{format_node, parse_reference};

pub async fn run_put(
    fs: &Decomposedfs,
    ctx: &RequestContext,
    source: PathBuf,
    target: &str,
) -> Result<()> {
    let reference = parse_reference(target)?;
    let node = fs
        .upload(ctx, &reference, source.clone())
        .await
        .with_context(|| format!("failed to upload {} to {target}", source.display()))?;
    info!(node = %node.id, size = node.blob_size, "uploaded {target}");
    Ok(())
}

pub async fn run_get(
    fs: &Decomposedfs,
    ctx: &RequestContext,
    source: &str,
    out: Option<PathBuf>,
) -> Result<()> {
    let reference = parse_reference(source)?;
    let (node, mut reader) = fs
        .download(ctx, &reference)
        .await
        .with_context(|| format!("failed to download {source}"))?;

    // blob reads are blocking
    let copied = tokio::task::spawn_blocking(move || -> Result<u64> {
        match out {
            Some(path) => {
                let mut file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                let n = io::copy(&mut reader, &mut file)?;
                file.sync_all()?;
                Ok(n)
            }
            None => {
                let mut stdout = io::stdout().lock();
                let n = io::copy(&mut reader, &mut stdout)?;
                stdout.flush()?;
                Ok(n)
            }
        }
    })
    .await??;
    info!(node = %node.id, bytes = copied, "downloaded {source}");
    Ok(())
}

pub async fn run_ls(fs: &Decomposedfs, ctx: &RequestContext, target: &str) -> Result<()> {
    let reference = parse_reference(target)?;
    let nodes = fs
        .list_folder(ctx, &reference)
        .await
        .with_context(|| format!("failed to list {target}"))?;
    for node in nodes {
        println!("{}", format_node(&node));
    }
    Ok(())
}

pub async fn run_stat(fs: &Decomposedfs, ctx: &RequestContext, target: &str) -> Result<()> {
    let reference = parse_reference(target)?;
    let node = fs
        .stat(ctx, &reference)
        .await
        .with_context(|| format!("failed to stat {target}"))?;
    println!("id:        {}", node.id);
    println!("type:      {:?}", node.node_type);
    println!("size:      {}", node.blob_size);
    println!("modified:  {}", node.mtime);
    if let Some(blob_id) = &node.blob_id {
        println!("blob:      {blob_id}");
    }
    if let Some(checksum) = &node.checksum {
        println!("blake3:    {checksum}");
    }
    for (grantee, permissions) in &node.grants {
        println!("grant:     {grantee} {permissions:?}");
    }
    if !node.revisions.is_empty() {
        println!("revisions: {}", node.revisions.len());
    }
    Ok(())
}

pub async fn run_mkdir(fs: &Decomposedfs, ctx: &RequestContext, target: &str) -> Result<()> {
    let reference = parse_reference(target)?;
    fs.create_dir(ctx, &reference)
        .await
        .with_context(|| format!("failed to create {target}"))?;
    Ok(())
}

pub async fn run_mv(fs: &Decomposedfs, ctx: &RequestContext, from: &str, to: &str) -> Result<()> {
    let (from_ref, to_ref) = (parse_reference(from)?, parse_reference(to)?);
    fs.move_node(ctx, &from_ref, &to_ref)
        .await
        .with_context(|| format!("failed to move {from} to {to}"))?;
    Ok(())
}

pub async fn run_rm(fs: &Decomposedfs, ctx: &RequestContext, target: &str) -> Result<()> {
    let reference = parse_reference(target)?;
    let record = fs
        .delete(ctx, &reference)
        .await
        .with_context(|| format!("failed to delete {target}"))?;
    println!("{}", record.key);
    Ok(())
}
