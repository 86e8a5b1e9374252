use clap::{Parser, Subcommand, ValueEnum};
use relsync_storage::IdKind;

#[derive(Parser)]
#[command(name = "relsync")]
#[command(about = "Reconcile to-many association memberships against a desired list")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file (defaults to ./relsync.toml)
    #[arg(short, long, global = true, env = "RELSYNC_CONFIG")]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Make the membership exactly the given ids
    Sync(ReconcileArgs),
    /// Link the given ids that are not yet members
    Add(ReconcileArgs),
    /// Unlink the given ids that are members
    Remove(ReconcileArgs),
    /// Print the current membership of an association
    Show(ShowArgs),
    /// Validate configuration and schema, then exit
    CheckConfig,
}

/// Identifier coercion applied to `--ids`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CoerceKind {
    Integer,
    Uuid,
    Text,
}

impl From<CoerceKind> for IdKind {
    fn from(kind: CoerceKind) -> Self {
        match kind {
            CoerceKind::Integer => IdKind::Integer,
            CoerceKind::Uuid => IdKind::Uuid,
            CoerceKind::Text => IdKind::Text,
        }
    }
}

#[derive(clap::Args)]
pub struct ReconcileArgs {
    /// Parent record as <entity>:<id> (e.g. project:1)
    #[arg(long)]
    pub parent: String,
    /// Association name on the parent entity (e.g. tags)
    #[arg(short, long)]
    pub association: String,
    /// Desired ids: a JSON array (`[1, "2", {"type": "tags", "id": 3}]`) or a
    /// comma-separated list (`1,2,3`). Empty means no ids.
    #[arg(long, allow_hyphen_values = true)]
    pub ids: String,
    /// Coercion for the ids (defaults to the related entity's id kind)
    #[arg(long)]
    pub coerce: Option<CoerceKind>,
}

#[derive(clap::Args)]
pub struct ShowArgs {
    /// Parent record as <entity>:<id> (e.g. project:1)
    #[arg(long)]
    pub parent: String,
    /// Association name on the parent entity (e.g. tags)
    #[arg(short, long)]
    pub association: String,
}
