mod session;

use clap::Parser;
use log::info;
use serde_json::json;
use session::SessionClient;
use shared::{Command, CommandType, UpdateType};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8765")]
    server: String,

    /// Name announced to other players
    #[arg(short = 'n', long, default_value = "anonymous")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut client = SessionClient::connect(&args.server).await?;

    client.send(&Command::with_fields(
        CommandType::FindGame,
        [("player_name", json!(args.name))],
    ))?;
    println!("Waiting for an opponent...");

    loop {
        while let Some(update) = client.receive() {
            println!("{:?}: {}", update.update_type, json!(update.data));
            if update.update_type == UpdateType::GameOver {
                println!("Game over.");
                return Ok(());
            }
        }
        if !client.is_connected() {
            client.wait_connected().await;
        }
        sleep(Duration::from_millis(50)).await;
    }
}
