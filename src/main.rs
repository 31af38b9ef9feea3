use citeseek::access::Requester;
use citeseek::cli::{Cli, Commands, ConfigAction, StrategyArg};
use citeseek::config::Config;
use citeseek::engine::Engine;
use citeseek::error::{CiteseekError, Result};
use citeseek::retrieval::{
    dedupe_highlights, FusionStrategy, Highlight, MethodWeights, QueryRequest, QueryResponse,
};
use citeseek::storage::SnapshotManifest;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Load { manifest } => {
            cmd_load(cli.config, cli.profile, &manifest)?;
        }
        Commands::Snapshots => {
            cmd_snapshots(cli.config, cli.profile)?;
        }
        Commands::Query {
            query,
            scope,
            user,
            top_k,
            variations,
            strategy,
            semantic_weight,
            keyword_weight,
            json,
        } => {
            let requester = match user {
                Some(id) => Requester::authenticated(id),
                None => Requester::anonymous(),
            };
            let mut request = QueryRequest::new(query, scope, requester);
            request.top_k = top_k;
            request.variation_count = variations;
            request.fusion_strategy = strategy.map(|s| match s {
                StrategyArg::Weighted => FusionStrategy::Weighted,
                StrategyArg::RankFusion => FusionStrategy::RankFusion,
            });
            let config = load_config(cli.config, cli.profile)?;
            request.method_weights =
                MethodWeights::from_overrides(semantic_weight, keyword_weight, &config.retrieval);
            cmd_query(config, &request, json)?;
        }
        Commands::Highlights { file } => {
            cmd_highlights(cli.config, cli.profile, &file)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "citeseek=debug" } else { "citeseek=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| CiteseekError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn open_engine(config: Config) -> Result<Engine> {
    let data_dir = expand_path(&config.storage.data_dir)?;
    Engine::open(config, data_dir)
}

fn cmd_load(config_path: Option<PathBuf>, profile: Option<String>, manifest: &Path) -> Result<()> {
    let content = std::fs::read_to_string(manifest).map_err(|e| CiteseekError::Io {
        source: e,
        context: format!("Failed to read manifest: {:?}", manifest),
    })?;
    let manifest: SnapshotManifest =
        serde_json::from_str(&content).map_err(|e| CiteseekError::Json {
            source: e,
            context: "Failed to parse snapshot manifest".to_string(),
        })?;

    let engine = open_engine(load_config(config_path, profile)?)?;
    let snapshot_id = manifest.snapshot.id.clone();
    let report = runtime()?.block_on(engine.load_manifest(manifest))?;

    println!("✓ Loaded snapshot {}", snapshot_id);
    println!(
        "  Chunks: {} inserted, {} already present",
        report.inserted, report.skipped
    );
    println!(
        "  Indexed: {} vectors, {} keyword documents ({} embeddings repaired)",
        report.index.vector_indexed, report.index.keyword_indexed, report.index.repaired
    );
    if report.index.failed > 0 {
        println!(
            "  ⚠ {} chunks are keyword-only (no usable embedding)",
            report.index.failed
        );
    }

    Ok(())
}

fn cmd_snapshots(config_path: Option<PathBuf>, profile: Option<String>) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let data_dir = expand_path(&config.storage.data_dir)?;
    let storage = citeseek::storage::StorageManager::new(data_dir)?;

    let snapshots = storage.database.list_snapshots()?;
    let stats = storage.database.stats()?;

    println!("Snapshots: {} total", snapshots.len());
    for snapshot in &snapshots {
        println!(
            "  {} - {} ({}, owner: {}, created {})",
            snapshot.id,
            snapshot.status.as_str(),
            snapshot.visibility,
            snapshot.owner.as_deref().unwrap_or("-"),
            snapshot.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!(
        "\nDocuments: {}  Chunks: {}  Embeddings: {}",
        stats.document_count, stats.chunk_count, stats.embedding_count
    );

    Ok(())
}

fn cmd_query(config: Config, request: &QueryRequest, json: bool) -> Result<()> {
    let engine = open_engine(config)?;
    let response = runtime()?.block_on(engine.query(request))?;

    if json {
        let out = serde_json::to_string_pretty(&response).map_err(|e| CiteseekError::Json {
            source: e,
            context: "Failed to serialize response".to_string(),
        })?;
        println!("{}", out);
    } else {
        print_response(&response);
    }

    Ok(())
}

fn print_response(response: &QueryResponse) {
    if response.results.is_empty() {
        println!("No results ({:?})", response.status);
        return;
    }

    for passage in &response.results {
        println!(
            "{}. [{:.3} {:?}] {}",
            passage.rank, passage.fused_score, passage.confidence, passage.citation
        );
        println!("   via {}", passage.contributing_methods.join(", "));
        let preview: String = passage.content.chars().take(200).collect();
        println!("   {}", preview.replace('\n', " "));
    }
    println!("\nStatus: {:?}", response.status);
}

fn cmd_highlights(config_path: Option<PathBuf>, profile: Option<String>, file: &Path) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let content = std::fs::read_to_string(file).map_err(|e| CiteseekError::Io {
        source: e,
        context: format!("Failed to read highlights: {:?}", file),
    })?;
    let highlights: Vec<Highlight> =
        serde_json::from_str(&content).map_err(|e| CiteseekError::Json {
            source: e,
            context: "Failed to parse highlights".to_string(),
        })?;

    let before = highlights.len();
    let kept = dedupe_highlights(highlights, &config.highlight);
    tracing::info!("Kept {} of {} highlight boxes", kept.len(), before);

    let out = serde_json::to_string_pretty(&kept).map_err(|e| CiteseekError::Json {
        source: e,
        context: "Failed to serialize highlights".to_string(),
    })?;
    println!("{}", out);
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = match profile {
                Some(profile) => Config::load_with_profile(&path, &profile)?,
                None => Config::load(&path)?,
            };
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CiteseekError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    Config::load_or_default(&path, profile.as_deref())
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| CiteseekError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| CiteseekError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
