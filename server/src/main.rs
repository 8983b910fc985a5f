use clap::Parser;
use contest::config::Config;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Prediction contest API server")]
struct Args {}

#[tokio::main]
async fn main() {
    let Args {} = Args::parse();

    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::load();
    if let Err(err) = config.validate() {
        error!("{err}");
        std::process::exit(1);
    }

    if let Err(err) = server::start_server(config).await {
        error!("Server failed: {err}");
        std::process::exit(1);
    }
}
