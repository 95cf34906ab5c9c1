use clap::Parser;
use doorlink_mock::{Behavior, MockController};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "doorlink-mock")]
#[command(about = "Pretend to be a door controller")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:4211")]
    listen: String,

    /// Read commands but never answer them
    #[arg(long, conflicts_with = "reply")]
    silent: bool,

    /// Answer every command with this text instead
    #[arg(long)]
    reply: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let behavior = match (cli.silent, cli.reply) {
        (true, _) => Behavior::Silent,
        (false, Some(reply)) => Behavior::Reply(reply),
        (false, None) => Behavior::Normal,
    };

    let mock = MockController::bind(&cli.listen).await?.with_behavior(behavior);
    tokio::select! {
        result = mock.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}
