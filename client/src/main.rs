use clap::Parser;
use log::info;
use tpk_client::network;
use tpk_shared::HeroType;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Hero to play (king, rogue, wizard, armoured)
    #[arg(long)]
    hero: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let hero = match args.hero.as_deref() {
        Some(name) => Some(HeroType::from_name(name).ok_or_else(|| format!("Unknown hero '{}'", name))?),
        None => None,
    };

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    if let Some(hero) = hero {
        info!("Playing as {}", hero);
    }

    let mut client = network::Client::new(&args.server, args.fake_ping, hero).await?;

    client.run().await?;

    Ok(())
}
