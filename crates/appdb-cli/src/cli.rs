use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "appdb",
    about = "appdb: schema-validated document storage for wallet apps",
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

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Show one document with its computed fields
    Get(GetArgs),
    /// List documents of a model, ascending by key
    List(ListArgs),
    /// Create or replace a document
    Set(WriteArgs),
    /// Create a document under a generated key
    Add(AddArgs),
    /// Merge fields into an existing document
    Update(WriteArgs),
    /// Delete a document
    Delete(KeyArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Override the configured bind address
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

/// Which local database and partition a command works on.
#[derive(Args)]
pub struct Target {
    #[arg(long, default_value = "appdb.sqlite")]
    pub db: PathBuf,
    #[arg(long, default_value = "manifests")]
    pub manifests: PathBuf,
    #[arg(long)]
    pub wallet: String,
    #[arg(long)]
    pub app: String,
    #[arg(long)]
    pub model: String,
}

#[derive(Args)]
pub struct KeyArgs {
    #[command(flatten)]
    pub target: Target,
    pub key: String,
}

#[derive(Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: Target,
    pub key: String,
    /// Fail if any computed field cannot be derived
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub target: Target,
    /// Only keys strictly greater than this
    #[arg(long, default_value = "")]
    pub start: String,
    /// Only keys strictly less than this
    #[arg(long, default_value = "")]
    pub end: String,
}

#[derive(Args)]
pub struct WriteArgs {
    #[command(flatten)]
    pub target: Target,
    pub key: String,
    /// JSON object
    pub value: String,
}

#[derive(Args)]
pub struct AddArgs {
    #[command(flatten)]
    pub target: Target,
    /// JSON object
    pub value: String,
}
