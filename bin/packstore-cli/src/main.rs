//! Packstore CLI - local admin command line interface
//!
//! Opens the storage engine over a local root and metadata database and runs
//! one command against it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use packstore_common::{Config, SetName};
use packstore_meta_store::RedbMetaStore;
use packstore_storage::{StorageEngine, StoreOutcome};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "packstore-cli")]
#[command(about = "Packstore Admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "packstore.toml")]
    config: PathBuf,

    /// Storage root directory
    #[arg(long)]
    root: Option<PathBuf>,

    /// Metadata database path
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Node name embedded in descriptors
    #[arg(long, env = "PACKSTORE_NODE")]
    node: Option<String>,

    /// Node port embedded in descriptors
    #[arg(long)]
    port: Option<u16>,

    /// Block rollover threshold in bytes
    #[arg(long)]
    block_size: Option<u64>,

    /// Log level (default: `[logging] level` from the config file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a file in a set
    Put {
        /// Set name
        set: String,
        /// File to store
        file: PathBuf,
        /// Content hash (default: SHA-256 of the file)
        #[arg(long)]
        hash: Option<String>,
    },
    /// Fetch an object by content hash
    Get {
        /// Set name
        set: String,
        /// Content hash
        hash: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Read the object a location descriptor points to
    Resolve {
        /// Location descriptor (1#set#node#port#block#offset#length)
        descriptor: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove a set's block files from this node
    DeleteSet {
        /// Set name
        set: String,
    },
    /// List hosts that have written to a set
    Hosts {
        /// Set name
        set: String,
    },
    /// Show the reference count of a content hash
    Refs {
        /// Set name
        set: String,
        /// Content hash
        hash: String,
    },
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(flatten)]
    engine: Config,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn load_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn write_output(output: Option<&Path>, data: &[u8]) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, data)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(data)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn run(engine: &StorageEngine, command: Commands) -> Result<()> {
    match command {
        Commands::Put { set, file, hash } => {
            let set = SetName::new(set)?;
            let data = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let hash = hash.unwrap_or_else(|| hex::encode(Sha256::digest(&data)));
            match engine.store(&set, &hash, &data)? {
                StoreOutcome::Stored(location) => println!("{location}"),
                StoreOutcome::Duplicate => println!("duplicate"),
            }
        }
        Commands::Get { set, hash, output } => {
            let set = SetName::new(set)?;
            let data = engine.fetch(&set, &hash)?;
            write_output(output.as_deref(), &data)?;
        }
        Commands::Resolve { descriptor, output } => {
            let data = engine.resolve(&descriptor)?;
            write_output(output.as_deref(), &data)?;
        }
        Commands::DeleteSet { set } => {
            let set = SetName::new(set)?;
            if engine.delete_set(&set)? {
                println!("Deleted set {set}");
            } else {
                println!("Set {set} has no data on this node");
            }
        }
        Commands::Hosts { set } => {
            let set = SetName::new(set)?;
            for host in engine.set_hosts(&set)? {
                println!("{host}");
            }
        }
        Commands::Refs { set, hash } => {
            let set = SetName::new(set)?;
            println!("{}", engine.reference_count(&set, &hash)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let file_config = load_config(&args.config)?;
    let mut config = file_config.engine;

    // Merge CLI args with config file (CLI takes precedence)
    if let Some(root) = args.root {
        config.storage.root = root;
    }
    if let Some(metadata) = args.metadata {
        config.metadata.path = metadata;
    }
    if let Some(node) = args.node {
        config.node.name = node;
    }
    if let Some(port) = args.port {
        config.node.port = port;
    }
    if let Some(block_size) = args.block_size {
        config.storage.block_size = block_size;
    }
    let log_level = args.log_level.unwrap_or(file_config.logging.level);

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    config.validate()?;
    info!("Config file: {}", args.config.display());
    info!("Storage root: {}", config.storage.root.display());

    let meta = RedbMetaStore::open(&config.metadata.path).with_context(|| {
        format!(
            "failed to open metadata store {}",
            config.metadata.path.display()
        )
    })?;
    let engine = StorageEngine::open(&config, Arc::new(meta))?;

    let result = run(&engine, args.command);

    let report = engine.shutdown();
    for (resource, e) in &report.failures {
        warn!("Shutdown failure in {}: {}", resource, e);
    }
    result
}
