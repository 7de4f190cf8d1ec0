//! `moncheck` entry point.
//!
//! Intentionally thin: init tracing, parse `--config`, load config, resolve
//! the host identifier, build the shared `ExecutorContext`, spawn the
//! worker pool, park on ctrl_c.

use anyhow::Context;
use clap::Parser;
use mon_executor::{child_process_executor, run_worker, ExecutorContext};

#[derive(Parser, Debug)]
#[command(name = "moncheck")]
struct Cli {
    #[arg(long)]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let config: mon_config::ExecutorConfig = mon_config::load_json_config(&cli.config)
        .context("loading moncheck config")?;

    let pool = mon_db::connect(&config.db).await?;
    mon_db::migrate(&pool).await?;

    let host_identifier = hostname::get()
        .context("resolving host_identifier")?
        .to_string_lossy()
        .into_owned();

    let ctx = ExecutorContext {
        pool,
        checker_id: config.checker_id,
        host_identifier,
        timeout: config.timeout,
        wait: config.wait,
        path: config.path.clone(),
        executor: child_process_executor(config.path),
    };

    tracing::info!(
        checker_id = ctx.checker_id,
        workers = config.workers,
        host_identifier = %ctx.host_identifier,
        "moncheck starting"
    );

    for worker_index in 0..config.workers {
        let worker_ctx = ctx.clone();
        tokio::spawn(run_worker(worker_ctx, worker_index));
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl_c")?;
    tracing::info!("moncheck shutting down");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
