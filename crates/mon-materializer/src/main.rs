//! `monwork` entry point. Thin, matching `moncheck`'s shape: init tracing,
//! parse `--config`, load config, build the context, run the tick loop.

use anyhow::Context;
use clap::Parser;
use mon_materializer::{run_forever, MaterializerContext};

#[derive(Parser, Debug)]
#[command(name = "monwork")]
struct Cli {
    #[arg(long)]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let config: mon_config::MaterializerConfig = mon_config::load_json_config(&cli.config)
        .context("loading monwork config")?;

    let pool = mon_db::connect(&config.db).await?;
    mon_db::migrate(&pool).await?;

    let ctx = MaterializerContext {
        pool,
        interval: config.interval,
    };

    tracing::info!(interval = ?ctx.interval, "monwork starting");

    tokio::spawn(run_forever(ctx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl_c")?;
    tracing::info!("monwork shutting down");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
