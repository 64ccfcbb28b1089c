use clap::Parser;
use client::network::Client;
use log::info;
use shared::protocol::DEFAULT_PORT;
use tokio::io::{stdin, stdout, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    info!("Starting client...");
    let client = Client::connect(&args.server).await?;
    client.run(BufReader::new(stdin()), stdout()).await?;

    Ok(())
}
