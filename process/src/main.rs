use clap::Parser;
use contest::config::Config;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Prediction scoring worker")]
struct Args {
    /// Consumer tag shown in the broker's connection listing.
    #[arg(long, default_value = "prediction-worker")]
    consumer_tag: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::load();
    if let Err(err) = config.validate() {
        error!("{err}");
        std::process::exit(1);
    }

    if let Err(err) = process::run(config, &args.consumer_tag).await {
        error!("Worker failed: {err}");
        std::process::exit(1);
    }
}
