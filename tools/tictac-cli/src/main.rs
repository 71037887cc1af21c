//! TicTac CLI - play tic-tac-toe in the terminal, alone or over UDP
//!
//! # Usage
//!
//! ```bash
//! # Both symbols on one terminal
//! tictac --mode solo
//!
//! # Host on the configured port, then join from another terminal
//! tictac --mode host --port 8888
//! tictac --mode client --host 127.0.0.1:8888
//!
//! # Referee two clients without playing
//! tictac --mode server --port 8888
//!
//! # Write the effective settings to the platform config file
//! tictac --port 9000 --save-config
//! ```
//!
//! Moves are typed as `x y` (0-2 each); `quit` leaves.
//!
//! # Configuration (config.toml)
//!
//! ```toml
//! [network]
//! host_address = "127.0.0.1:8888"
//! port = 8888
//!
//! [transport]
//! resend_interval_ms = 100
//! connect_timeout_ms = 5000
//! peer_timeout_ms = 10000
//! heartbeat_interval_ms = 1000
//! ```

mod play;

use anyhow::Result;
use clap::Parser;

/// TicTac - turn-synchronized tic-tac-toe
#[derive(Parser)]
#[command(name = "tictac")]
#[command(about = "Play tic-tac-toe alone or over the network")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    play: play::PlayArgs,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    play::execute(cli.play)
}
