use clap::Parser;
use log::{info, warn};
use server::config::ServerConfig;
use server::context::ServerContext;
use server::network::Server;
use server::persistence::{FileStore, MemoryStore, PersistenceGateway};
use shared::protocol::{DEFAULT_PORT, DEFAULT_SCOREBOARD_SIZE, MAX_LINE_LENGTH};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// File holding registered accounts and scores
    #[arg(short, long, default_value = "users.db")]
    database: PathBuf,

    /// Keep accounts in memory only; nothing is written to disk
    #[arg(long)]
    in_memory: bool,

    /// Number of players listed by the scoreboard command
    #[arg(long, default_value_t = DEFAULT_SCOREBOARD_SIZE)]
    scoreboard_size: usize,

    /// Longest accepted command line in bytes
    #[arg(long, default_value_t = MAX_LINE_LENGTH)]
    max_line_length: usize,

    /// Maximum number of simultaneous connections
    #[arg(short, long, default_value = "256")]
    max_clients: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            database: (!self.in_memory).then_some(self.database),
            scoreboard_size: self.scoreboard_size,
            max_line_length: self.max_line_length,
            max_clients: self.max_clients,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();

    let store: Arc<dyn PersistenceGateway> = match &config.database {
        Some(path) => {
            info!("Loading accounts from {}", path.display());
            Arc::new(FileStore::open(path)?)
        }
        None => {
            warn!("Running with an in-memory account store; nothing will be saved");
            Arc::new(MemoryStore::new())
        }
    };

    let address = config.address();
    let context = Arc::new(ServerContext::new(store, config));
    let server = Server::bind(&address, context).await?;

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
