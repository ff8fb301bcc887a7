use crate::cmd::{SpaceCmd, TrashCmd};
use crate::init_config::CmdConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;
use std::path::PathBuf;

mod cmd;
mod helpers;
mod init_config;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// which node config this command should use
    #[arg(short, long, value_name = "NAME", default_value = "local")]
    node: String,

    /// explicit config file, overrides --node
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// user the command runs as
    #[arg(short, long, value_name = "USER", default_value = "admin", global = true)]
    user: String,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modify the node config
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Manage spaces
    Space {
        #[command(subcommand)]
        cmd: SpaceCmd,
    },
    /// Upload a local file to SPACE:/PATH
    Put {
        source: PathBuf,
        target: String,
    },
    /// Download SPACE:/PATH to a local file, or stdout
    Get {
        source: String,
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// List a directory
    Ls { target: String },
    /// Print the metadata of a node
    Stat { target: String },
    /// Create a directory
    Mkdir { target: String },
    /// Move or rename a node within a space
    Mv { from: String, to: String },
    /// Move a node into the trash-bin
    Rm { target: String },
    /// Inspect, restore and purge trashed items
    Trash {
        #[command(subcommand)]
        cmd: TrashCmd,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    // - Configs under:  ~/.config/dfs/
    //   - Default node: ~/.config/dfs/local.toml
    //   - Other nodes:  ~/.config/dfs/nodes/<name>.toml
    // - Data under:     ~/.local/share/dfs/<node>/
    let dirs =
        ProjectDirs::from("", "", "dfs").context("failed to determine config directory path")?;

    let node_config_file = match cli.config {
        Some(path) => path,
        None if cli.node == "local" => dirs.config_dir().join("local.toml"),
        None => dirs
            .config_dir()
            .join("nodes")
            .join(&cli.node)
            .with_extension("toml"),
    };
    let local_data_dir = dirs.data_dir().join(&cli.node);

    cmd::run_command(&cli.user, node_config_file, &local_data_dir, cli.cmd).await
}
