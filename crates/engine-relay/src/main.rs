// engine-relay/crates/engine-relay/src/main.rs

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use engine_relay::{check_engines, config::Config, run_server};

#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "engine-relay", version, about = "Supervise analysis engines and serve them over HTTP")]
struct Cli {
    /// Load environment variables from this file before reading the configuration.
    #[arg(long, env = "ENV_FILE")]
    env_file: Option<std::path::PathBuf>,

    /// Validate engine files and exit without serving.
    #[arg(long)]
    check: bool,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {}", path.display(), e))?;
    }

    engine_relay::telemetry::init_tracing();
    let cfg = Config::from_env()?;

    if cli.check {
        cfg.print_config();
        return check_engines(&cfg);
    }

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
