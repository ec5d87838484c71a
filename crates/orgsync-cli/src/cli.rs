use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use orgsync_types::UnitId;

#[derive(Parser)]
#[command(
    name = "orgsync",
    about = "Keep an organization tree and its employments in sync with a destination system",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Reconcile a fixture's destination against its source
    Sync(SyncArgs),
    /// Show the tree diff and manual alerts without changing anything
    Diff(DiffArgs),
    /// Validate a configuration file
    CheckConfig(CheckConfigArgs),
}

#[derive(Args)]
pub struct SyncArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long)]
    pub fixture: PathBuf,
    #[arg(long)]
    pub dry_run: bool,
    /// Only this unit
    #[arg(long, conflicts_with = "person")]
    pub unit: Option<UnitId>,
    /// Only this person's employments (CPR)
    #[arg(long)]
    pub person: Option<String>,
    /// Write the fixture back with the updated destination
    #[arg(long)]
    pub save: Option<PathBuf>,
}

#[derive(Args)]
pub struct DiffArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long)]
    pub fixture: PathBuf,
}

#[derive(Args)]
pub struct CheckConfigArgs {
    #[arg(long)]
    pub config: PathBuf,
}
