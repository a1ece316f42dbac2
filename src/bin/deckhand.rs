//! deckhand CLI - serve the headless simulation and drive a running engine
//!
//! Provides subcommands for initializing storage, serving the engine over
//! TCP, sending single commands, replaying run logs and checking them.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use deckhand::runtime::journal::{self, FunctionCall};
use deckhand::runtime::storage::{self, CheckpointStore, Storage};
use deckhand::runtime::RuntimeConfig;
use deckhand::service::client::{Client, ClientError};
use deckhand::service::transport::TcpTransport;
use deckhand::service::Service;
use deckhand::sim::HeadlessSim;
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "deckhand")]
#[command(about = "Tick-driven remote-control engine for card game simulations", long_about = None)]
struct Cli {
    /// Root directory for engine storage
    #[arg(short, long, default_value = ".deckhand")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize storage and write a config file
    Init {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Listen port
        #[arg(long, default_value = "12346")]
        port: u16,

        /// Snapshot depth budget
        #[arg(long, default_value = "8")]
        snapshot_depth: usize,

        /// Minimum settle duration in milliseconds
        #[arg(long, default_value = "100")]
        settle_delay_ms: u64,

        /// Completion deadline in milliseconds (0 waits forever)
        #[arg(long, default_value = "30000")]
        timeout_ms: u64,

        /// Do not record run logs
        #[arg(long)]
        no_log: bool,
    },

    /// Serve the headless simulation over TCP
    Serve {
        /// Override the configured host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Send one command to a running engine and print the response
    Send {
        /// Command name
        name: String,

        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },

    /// Re-send every command of a run log to a running engine
    Replay {
        /// Log file (defaults to the newest log under <root>/runs)
        log: Option<PathBuf>,

        /// Pause between commands in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,
    },

    /// Check that a run log is well formed and chained
    VerifyLog {
        /// Log file (defaults to the newest log under <root>/runs)
        log: Option<PathBuf>,
    },

    /// List checkpoints stored under <root>/checkpoints
    Checkpoints,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            host,
            port,
            snapshot_depth,
            settle_delay_ms,
            timeout_ms,
            no_log,
        } => {
            let config = RuntimeConfig {
                root: cli.root.clone(),
                host,
                port,
                snapshot_depth,
                settle_delay_ms,
                completion_timeout_ms: (timeout_ms > 0).then_some(timeout_ms),
                log_runs: !no_log,
                ..RuntimeConfig::default()
            };
            storage::init_storage(&config.root)?;
            storage::write_config(&config)?;
            println!("Initialized deckhand storage at {:?}", cli.root);
        }

        Commands::Serve { host, port } => {
            let mut config = load_config(&cli.root)?;
            config.apply_env()?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(&config)?;
        }

        Commands::Send { name, arguments } => {
            let config = load_config(&cli.root)?;
            let arguments = parse_arguments(&arguments)?;
            let mut client = Client::connect(config.listen_addr()?)?;
            match client.call(&name, arguments) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(ClientError::Api(response)) => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                    bail!("{} failed with {}", name, response.error_code);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Commands::Replay { log, delay_ms } => {
            let config = load_config(&cli.root)?;
            let path = resolve_log(&config, log)?;
            let steps = journal::read_steps(&path)?;
            println!("Replaying {} commands from {:?}", steps.len(), path);

            let mut client = Client::connect(config.listen_addr()?)?;
            let mut failures = 0usize;
            for (index, FunctionCall { name, arguments }) in steps.into_iter().enumerate() {
                match client.call(&name, arguments) {
                    Ok(state) => println!("  {index}: {name} -> state {}", state["state"]),
                    Err(ClientError::Api(response)) => {
                        failures += 1;
                        println!("  {index}: {name} -> {} {}", response.error_code, response.error);
                    }
                    Err(err) => return Err(err.into()),
                }
                if delay_ms > 0 {
                    thread::sleep(Duration::from_millis(delay_ms));
                }
            }
            if failures > 0 {
                bail!("{failures} commands failed during replay");
            }
        }

        Commands::VerifyLog { log } => {
            let config = load_config(&cli.root)?;
            let path = resolve_log(&config, log)?;
            let entries = journal::read_log(&path)?;
            journal::verify_chain(&entries)?;
            println!("{:?}: {} entries, chain intact", path, entries.len());
        }

        Commands::Checkpoints => {
            let config = load_config(&cli.root)?;
            let store = CheckpointStore::for_storage(&Storage::new(config.root));
            let checkpoints = store.list()?;
            if checkpoints.is_empty() {
                println!("No checkpoints");
            }
            for info in checkpoints {
                println!("  {}  {}  {}", info.name, info.created_at, &info.digest[..12.min(info.digest.len())]);
            }
        }
    }

    Ok(())
}

/// Config from `<root>/config.json`, or defaults rooted at `root`.
fn load_config(root: &std::path::Path) -> Result<RuntimeConfig> {
    if Storage::new(root.to_path_buf()).config_path().exists() {
        storage::load_config(root)
    } else {
        Ok(RuntimeConfig {
            root: root.to_path_buf(),
            ..RuntimeConfig::default()
        })
    }
}

fn parse_arguments(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(text).context("Arguments are not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("Arguments must be a JSON object, got {other}"),
    }
}

fn resolve_log(config: &RuntimeConfig, log: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = log {
        return Ok(path);
    }
    let runs = Storage::new(config.root.clone()).runs_dir();
    journal::latest_log(&runs)?.with_context(|| format!("No run logs under {:?}", runs))
}

fn serve(config: &RuntimeConfig) -> Result<()> {
    let addr = config.listen_addr()?;
    let mut transport = TcpTransport::bind(addr)?;
    let mut service = Service::<HeadlessSim>::new(config)?;
    let mut sim = HeadlessSim::new();
    let interval = config.tick_interval();

    tracing::info!(
        addr = %transport.local_addr()?,
        log = ?service.run_log_path(),
        protocol = deckhand::PROTOCOL_VERSION,
        "deckhand serving headless simulation"
    );

    loop {
        let started = Instant::now();
        sim.step();
        service.tick(&mut sim, &mut transport, started);
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}
