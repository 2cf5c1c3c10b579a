use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use shellcache::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use shellcache::config::Config;
use shellcache::logging;
use shellcache::net::{HttpNetwork, Network, OfflineNetwork, Request};
use shellcache::worker::{Registration, WorkerVersion};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-resilient request interception with versioned shell caches")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured version and take over immediately
  Install,
  /// Send one request through the interception layer
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Pretend the network is unreachable
    #[arg(long)]
    offline: bool,
  },
  /// List cache namespaces and their entry counts
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init(args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;

  if args.ephemeral {
    run(&config, args.command, MemoryStorage::new()).await
  } else {
    let storage = SqliteStorage::open(&config.storage_path()?)?;
    run(&config, args.command, storage).await
  }
}

async fn run<S: CacheStorage>(config: &Config, command: Command, storage: S) -> Result<()> {
  match command {
    Command::Install => install(config, storage).await,
    Command::Fetch {
      url,
      method,
      offline,
    } => {
      let request = build_request(config, &url, &method)?;
      if offline {
        fetch(config, storage, OfflineNetwork, request).await
      } else {
        fetch(config, storage, HttpNetwork::new()?, request).await
      }
    }
    Command::Status => status(config, &storage),
  }
}

fn build_request(config: &Config, url: &str, method: &str) -> Result<Request> {
  let url = config
    .origin
    .join(url)
    .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
  let method = Method::from_str(&method.to_uppercase())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
  Ok(Request::new(method, url))
}

async fn install<S: CacheStorage>(config: &Config, storage: S) -> Result<()> {
  let registration = Registration::new(storage, HttpNetwork::new()?);
  registration.resume(WorkerVersion::from_config(config)?)?;

  match registration
    .update(WorkerVersion::from_config(config)?)
    .await?
  {
    Some(report) => {
      println!(
        "installed {} into {} ({} stale namespace(s) removed)",
        report.version,
        report.namespace,
        report.deleted.len()
      );
      if !report.retained.is_empty() {
        println!("could not remove: {}", report.retained.join(", "));
      }
    }
    None => println!("{} is already active", config.version),
  }

  Ok(())
}

async fn fetch<S: CacheStorage, N: Network>(
  config: &Config,
  storage: S,
  network: N,
  request: Request,
) -> Result<()> {
  let registration = Registration::new(storage, network);
  if !registration.resume(WorkerVersion::from_config(config)?)? {
    info!(version = %config.version, "no cache for this version yet, installing");
    registration
      .update(WorkerVersion::from_config(config)?)
      .await?;
  }

  let session = registration.open_session();
  let result = registration.handle_fetch(session, &request).await?;

  eprintln!(
    "{} {} {} ({})",
    result.data.status, request.method, request.url, result.source
  );
  let mut stdout = std::io::stdout().lock();
  stdout.write_all(&result.data.body)?;
  stdout.flush()?;

  Ok(())
}

fn status<S: CacheStorage>(config: &Config, storage: &S) -> Result<()> {
  let current = config.namespace();
  let names = storage.list_namespaces()?;
  if names.is_empty() {
    println!("no cache namespaces");
    return Ok(());
  }

  for name in names {
    let entries = storage.entry_count(&name)?;
    let marker = if name == current { "*" } else { " " };
    println!("{} {} ({} entries)", marker, name, entries);
  }

  Ok(())
}
