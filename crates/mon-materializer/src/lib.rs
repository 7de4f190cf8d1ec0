//! Config Materializer: the once-per-`interval` reconciliation tick that
//! keeps `active_checks` in sync with `nodes`/`commands`/`checks` edits.

use anyhow::Result;

/// Shared, read-only state for the materializer's tick loop. Mirrors
/// `mon_executor::ExecutorContext` — built once at daemon startup, no
/// global DB handle.
#[derive(Clone)]
pub struct MaterializerContext {
    pub pool: sqlx::PgPool,
    pub interval: std::time::Duration,
}

/// Run passes A, B, and C once. Pass C only advances one stale check per
/// tick; under sustained backlog, the tick interval bounds how many checks
/// get refreshed per unit time, which is the intended pacing rather than
/// an oversight.
pub async fn run_tick(ctx: &MaterializerContext) -> Result<()> {
    let a = mon_db::materializer_pass_propagate_node_timestamps(&ctx.pool).await?;
    let b = mon_db::materializer_pass_propagate_command_timestamps(&ctx.pool).await?;
    if a > 0 || b > 0 {
        tracing::info!(node_edits = a, command_edits = b, "propagated edits");
    }

    match mon_db::materializer_pass_refresh_one_stale_check(&ctx.pool).await? {
        mon_db::MaterializePassOutcome::Idle => {}
        mon_db::MaterializePassOutcome::Refreshed { check_id } => {
            tracing::info!(check_id, "refreshed active_check");
        }
        mon_db::MaterializePassOutcome::Failed { check_id, error } => {
            tracing::warn!(check_id, error, "failed to refresh active_check");
        }
    }

    Ok(())
}

/// Run `run_tick` forever on a fixed `interval` sleep. Unlike the check
/// executor's empty-poll backoff, this tick has no jitter.
pub async fn run_forever(ctx: MaterializerContext) -> ! {
    let mut ticker = tokio::time::interval(ctx.interval);
    loop {
        ticker.tick().await;
        if let Err(e) = run_tick(&ctx).await {
            tracing::error!(error = %e, "materializer tick failed");
        }
    }
}
