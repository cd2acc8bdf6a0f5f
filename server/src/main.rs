use clap::Parser;
use log::info;
use std::time::Duration;
use tpk_server::game::MatchConfig;
use tpk_server::network::Server;
use tpk_shared::{DEFAULT_MAX_PLAYERS, PREPHASE_COUNTDOWN};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Players needed to fill the room and start the countdown
    #[arg(short, long, default_value_t = DEFAULT_MAX_PLAYERS)]
    max_players: usize,

    /// Maximum simultaneous connections
    #[arg(long, default_value = "16")]
    max_clients: usize,

    /// Prephase countdown length in countdown steps
    #[arg(short, long, default_value_t = PREPHASE_COUNTDOWN)]
    countdown: i32,

    /// Milliseconds between countdown steps
    #[arg(long, default_value = "1000")]
    countdown_interval_ms: u64,

    /// Distance from the carrier's spawn at which the artifact scores
    #[arg(long, default_value = "10.0")]
    score_radius: f32,

    /// Ticks between full state snapshots (0 disables them)
    #[arg(long, default_value = "60")]
    snapshot_interval: u32,
}

impl Args {
    fn match_config(&self) -> MatchConfig {
        MatchConfig {
            max_players: self.max_players,
            countdown_start: self.countdown,
            countdown_interval: Duration::from_millis(self.countdown_interval_ms),
            score_radius: self.score_radius,
            snapshot_interval_ticks: self.snapshot_interval,
            ..MatchConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);
    let address = format!("{}:{}", args.host, args.port);

    info!("Starting arena server on {}", address);
    info!(
        "{} players fill the room, {} step countdown",
        args.max_players, args.countdown
    );

    let mut server = Server::new(&address, tick_duration, args.max_clients, args.match_config()).await?;
    server.run().await?;

    Ok(())
}
