use clap::{Parser, Subcommand};
use std::path::PathBuf;

use detect_intake::config::ServiceConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Collect camera detection photos and hand each session to recognition once")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,

        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create the database schema and exit
    InitDb {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Command::Serve { config, port } => {
            let mut config = ServiceConfig::load(&config)?;
            if let Some(port) = port {
                config.api_port = port;
            }
            detect_intake::serve::serve(config)
        }
        Command::InitDb { config } => init_db(config),
    }
}

fn init_db(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::load(&config_path)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        detect_intake::db::open_and_init(&config.database)
            .await
            .map_err(|e| format!("Failed to initialize database: {}", e))?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    println!("Database ready: {}", config.database.display());
    Ok(())
}
