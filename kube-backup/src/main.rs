//! Kube Backup - command line entry point
//!
//! Runs one backup against a cluster dump file, or lists an archive.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube_backup::client::ClusterDump;
use kube_backup::config::{Config, PluginKind};
use kube_backup::discovery::DiscoveryHelper;
use kube_backup::model::BackupRequest;
use kube_backup::plugin::rpc::RpcTransport;
use kube_backup::plugin::ws::WsTransport;
use kube_backup::plugin::PluginRegistry;
use kube_backup::{archive, utils, Backupper};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up a cluster dump into an archive
    Run {
        /// Path to configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Cluster dump (JSON) to back up
        #[arg(long, value_name = "FILE")]
        cluster: PathBuf,

        /// Archive to write
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Log level (trace, debug, info, warn, error)
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// List the entries of an archive
    Inspect {
        #[arg(value_name = "FILE")]
        archive: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run {
            config,
            cluster,
            output,
            log_level,
        } => {
            let config = match config {
                Some(path) => Config::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => Config::default(),
            };
            let log_level = log_level.as_deref().unwrap_or(&config.log.level);
            utils::logger::init(log_level)?;
            run(config, cluster, output).await
        }
        Command::Inspect { archive } => inspect(archive),
    }
}

async fn connect_plugins(config: &Config) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::with_builtins();
    let mut transports: HashMap<String, Arc<dyn RpcTransport>> = HashMap::new();

    for endpoint in &config.plugins {
        let transport = match transports.get(&endpoint.url) {
            Some(transport) => transport.clone(),
            None => {
                let transport: Arc<dyn RpcTransport> =
                    Arc::new(WsTransport::connect(&endpoint.url, config.rpc_timeout()).await?);
                transports.insert(endpoint.url.clone(), transport.clone());
                transport
            }
        };

        match endpoint.kind {
            PluginKind::ItemAction => {
                registry.register_remote_item_action(endpoint.name.clone(), transport)
            }
            PluginKind::VolumeSnapshotter => {
                registry.register_remote_volume_snapshotter(endpoint.name.clone(), transport)
            }
        }
        tracing::info!(plugin = %endpoint.name, url = %endpoint.url, "Registered remote plugin");
    }
    Ok(registry)
}

async fn run(config: Config, cluster: PathBuf, output: PathBuf) -> Result<()> {
    tracing::info!("Starting kube-backup v{}", env!("CARGO_PKG_VERSION"));

    let dump = Arc::new(
        ClusterDump::from_file(&cluster)
            .with_context(|| format!("loading cluster dump {}", cluster.display()))?,
    );
    let discovery = DiscoveryHelper::new(dump.clone()).await?;
    let registry = connect_plugins(&config).await?;
    let mut backupper = Backupper::new(discovery, dump, Arc::new(registry), config.backup_options());

    let mut spec = config.backup.clone();
    if spec.name.is_empty() {
        spec.name = format!("backup-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"));
    }
    let mut request =
        BackupRequest::new(spec).with_snapshot_locations(config.snapshot_locations.clone());

    let file = File::create(&output)
        .with_context(|| format!("creating archive {}", output.display()))?;
    let outcome = backupper.backup(&mut request, BufWriter::new(file)).await?;
    outcome.writer.into_inner()?.flush()?;

    println!("Backup:     {}", request.spec.name);
    println!("Archive:    {}", output.display());
    println!("Items:      {}", outcome.items_written.len());
    println!("Snapshots:  {}", request.volume_snapshots.len());
    for snapshot in &request.volume_snapshots {
        println!(
            "  {} ({}): {} {}",
            snapshot.spec.persistent_volume_name,
            snapshot.spec.location,
            snapshot.status.phase,
            snapshot.status.provider_snapshot_id.as_deref().unwrap_or("-"),
        );
    }
    if !request.warnings.is_empty() {
        println!("Warnings:   {}", request.warnings.len());
        for warning in &request.warnings {
            println!("  {}", warning);
        }
    }
    if !request.errors.is_empty() {
        println!("Errors:     {}", request.errors.len());
        for error in &request.errors {
            println!("  {}", error);
        }
    }
    Ok(())
}

fn inspect(path: PathBuf) -> Result<()> {
    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let entries = archive::read_entries(BufReader::new(file))?;
    for entry in &entries {
        println!("{:>8}  {}", entry.data.len(), entry.path);
    }
    println!("{} entries", entries.len());
    Ok(())
}
