use clap::Parser;
use server::network::GameServer;
use shared::TicTacToe;

/// Main-method of the application.
/// Parses command-line arguments, then binds the server and runs its event loop.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8765")]
        port: u16,
    }

    // Parse command line arguments
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let server = GameServer::bind(&address, TicTacToe::factory()).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server loop failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
