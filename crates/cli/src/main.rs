use clap::{Parser, Subcommand};
use farebot::scan::{Recognition, TicketRecognizer};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "farebot")]
#[command(about = "farebot CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config, state and scan directories).
    Init {
        /// Config file path (default: FAREBOT_CONFIG_PATH or ~/.farebot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the gateway (Messenger webhook, scan images, payment callbacks).
    Gateway {
        /// Config file path (default: FAREBOT_CONFIG_PATH or ~/.farebot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Recognize one ticket document (URL or local PDF) and print the journey as JSON.
    /// The decoder fetches renders from the public URL, so a gateway sharing the
    /// scan directory must be reachable there.
    Scan {
        /// Document URL or path to a PDF file
        #[arg(value_name = "URL|FILE")]
        document: String,

        /// Config file path (default: FAREBOT_CONFIG_PATH or ~/.farebot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("farebot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Scan { document, config }) => {
            if let Err(e) = run_scan(document, config).await {
                log::error!("scan failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(farebot::config::default_config_path);
    let dir = farebot::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = farebot::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    farebot::gateway::run_gateway(config, path).await
}

async fn run_scan(document: String, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, path) = farebot::config::load_config(config_path)?;
    let http = farebot::gateway::http_client(&config)?;
    let scanner = farebot::gateway::build_scanner(&config, &path, http)?;

    let local = PathBuf::from(&document);
    let recognition = if local.is_file() {
        let bytes = tokio::fs::read(&local).await?;
        scanner.recognize_document(&bytes).await?
    } else {
        scanner.recognize(&document).await?
    };
    match recognition {
        Recognition::Recognized(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Recognition::NotRecognized => {
            println!("not recognized");
        }
    }
    Ok(())
}
