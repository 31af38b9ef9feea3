//! CLI command definitions and parsing
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "citeseek",
    version,
    about = "Scoped hybrid retrieval over document snapshots",
    long_about = "citeseek loads chunked document snapshots, indexes them for vector and keyword \
                  search, and answers queries with fused, access-checked, cited passages."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/citeseek/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import a snapshot manifest (JSON) and index it
    Load {
        /// Path to the manifest file
        manifest: PathBuf,
    },

    /// List known snapshots
    Snapshots,

    /// Retrieve passages for a query within one snapshot
    Query {
        /// Search query text
        query: String,

        /// Snapshot to search
        #[arg(short, long)]
        scope: String,

        /// Requester identity (omit for anonymous)
        #[arg(short, long)]
        user: Option<String>,

        /// Number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Number of generated query variations
        #[arg(long)]
        variations: Option<usize>,

        /// Fusion strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Semantic method weight (unset side keeps the configured weight)
        #[arg(long)]
        semantic_weight: Option<f32>,

        /// Keyword method weight (unset side keeps the configured weight)
        #[arg(long)]
        keyword_weight: Option<f32>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Deduplicate highlight boxes read from a JSON file
    Highlights {
        /// JSON array of highlights
        file: PathBuf,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    Weighted,
    RankFusion,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
