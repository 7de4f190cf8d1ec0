//! Check Executor worker pool: claim-execute-record loop, the pluggable
//! execution function, and the shared daemon context.
//!
//! This file is intentionally thin on I/O wiring; `main.rs` builds the
//! `ExecutorContext` and spawns the workers defined here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use mon_db::NextOutcome;
use mon_schemas::CheckOutcome;
use rand::Rng;

// ---------------------------------------------------------------------------
// Executor abstraction
// ---------------------------------------------------------------------------

/// A pluggable check runner: given a tokenized command line and a timeout,
/// produce an outcome. Never returns an `Err` — a failed spawn or a timed
/// out process is itself a `CheckOutcome` with `state == STATE_UNKNOWN`.
///
/// `Send + Sync` so it can be shared across worker tasks via `Arc`.
pub type CheckExecutorFn =
    Arc<dyn Fn(&[String], Duration) -> BoxFuture<'static, CheckOutcome> + Send + Sync>;

/// The reason a claim attempt surfaced nothing to do.
///
/// Hand-written `Display` + `Error` impl, not `thiserror`.
/// `mon_db::claim_due_check` already returns `NextOutcome::NoWork` as a
/// typed enum variant for the common case; this unit-ish type exists for
/// callers that only see a boxed `anyhow::Error` (e.g. a generic retry
/// wrapper) and need to downcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoWork;

impl std::fmt::Display for NoWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no due check available for this checker")
    }
}

impl std::error::Error for NoWork {}

/// Shared, read-only state for every worker task.
///
/// Built once at daemon startup and cloned (cheaply: `PgPool` is an `Arc`
/// internally, `CheckExecutorFn` is an `Arc`) into each spawned task,
/// rather than threaded through an implicit global.
#[derive(Clone)]
pub struct ExecutorContext {
    pub pool: sqlx::PgPool,
    pub checker_id: i32,
    pub host_identifier: String,
    pub timeout: Duration,
    pub wait: Duration,
    pub path: Vec<String>,
    pub executor: CheckExecutorFn,
}

/// Run one worker's claim-execute-record loop forever.
///
/// On `NoWork`, sleeps `[wait, 1.5 * wait)` (uniform jitter) before
/// retrying. On a transient store error the worker logs and
/// sleeps the same window rather than exiting — a crashed worker is one
/// fewer worker in the pool, not a reason to bring the daemon down.
pub async fn run_worker(ctx: ExecutorContext, worker_index: usize) -> ! {
    loop {
        match claim_execute_record(&ctx).await {
            Ok(true) => continue,
            Ok(false) => {
                tracing::debug!(worker_index, "no due check; backing off");
                sleep_with_jitter(ctx.wait).await;
            }
            Err(e) => {
                tracing::error!(worker_index, error = %e, "worker loop error");
                sleep_with_jitter(ctx.wait).await;
            }
        }
    }
}

/// One claim/execute/record cycle. Returns `Ok(true)` if a check was
/// claimed and processed, `Ok(false)` if there was nothing due.
async fn claim_execute_record(ctx: &ExecutorContext) -> Result<bool> {
    let claimed = match mon_db::claim_due_check(&ctx.pool, ctx.checker_id).await? {
        NextOutcome::Claimed(c) => c,
        NextOutcome::NoWork => return Ok(false),
    };

    tracing::info!(check_id = claimed.check_id, "claimed check");

    let outcome = (ctx.executor)(&claimed.cmdline, ctx.timeout).await;

    tracing::info!(
        check_id = claimed.check_id,
        state = outcome.state,
        "executed check"
    );

    let recorded =
        mon_db::record_check_outcome(&ctx.pool, claimed.check_id, &outcome, &ctx.host_identifier)
            .await?;

    if recorded.emitted {
        tracing::info!(check_id = claimed.check_id, "notification emitted");
    }

    Ok(true)
}

async fn sleep_with_jitter(wait: Duration) {
    let upper = wait.mul_f64(1.5);
    let jittered = if upper > wait {
        rand::thread_rng().gen_range(wait..upper)
    } else {
        wait
    };
    tokio::time::sleep(jittered).await;
}

// ---------------------------------------------------------------------------
// Default child-process executor
// ---------------------------------------------------------------------------

/// Build the real `CheckExecutorFn`: spawns `cmdline` as a child process
/// with `path` prepended to `PATH`, captures combined stdout+stderr, and
/// maps the exit status to a `CheckOutcome`.
///
/// `path` is applied per-spawn via `Command::env`, not a single
/// process-global `std::env::set_var("PATH", ...)` call at startup — a
/// concurrent tokio worker pool would otherwise race on the shared process
/// environment.
pub fn child_process_executor(path: Vec<String>) -> CheckExecutorFn {
    Arc::new(move |cmdline: &[String], timeout: Duration| {
        let cmdline = cmdline.to_vec();
        let path = path.clone();
        Box::pin(async move { run_child_process(&cmdline, timeout, &path).await })
    })
}

/// Cap on captured stdout+stderr, matching spec.md §4.3.2's "bounded buffer
/// (tail-truncated if large)" — `active_checks.msg` and a notification's
/// `output` both carry whatever `CheckOutcome.output` holds, so the cap is
/// applied once here rather than again at every write site.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Keep only the last `max_bytes` of `text`, on a `char` boundary, prefixed
/// with a marker noting how much was dropped.
fn truncate_tail(text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let dropped = text.len() - max_bytes;
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...[{dropped} bytes truncated]...\n{}", &text[start..])
}

async fn run_child_process(cmdline: &[String], timeout: Duration, path: &[String]) -> CheckOutcome {
    use mon_schemas::{STATE_CRITICAL, STATE_UNKNOWN};

    let Some((program, args)) = cmdline.split_first() else {
        return CheckOutcome {
            state: STATE_UNKNOWN,
            output: "empty command line".to_string(),
        };
    };

    let mut command = tokio::process::Command::new(program);
    command.args(args);
    command.kill_on_drop(true);
    command.stdin(std::process::Stdio::null());

    if !path.is_empty() {
        let existing = std::env::var("PATH").unwrap_or_default();
        let mut joined = path.join(":");
        if !existing.is_empty() {
            joined.push(':');
            joined.push_str(&existing);
        }
        command.env("PATH", joined);
    }

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.stderr.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            let state = exit_status_to_state(&output.status);
            CheckOutcome {
                state,
                output: truncate_tail(text, MAX_OUTPUT_BYTES),
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(program, error = %e, "check process failed to spawn");
            CheckOutcome {
                state: STATE_UNKNOWN,
                output: format!("exec error: {e}"),
            }
        }
        Err(_) => CheckOutcome {
            state: STATE_CRITICAL,
            output: format!("check timed out after {timeout:?}"),
        },
    }
}

fn exit_status_to_state(status: &std::process::ExitStatus) -> i32 {
    use mon_schemas::STATE_UNKNOWN;

    match status.code() {
        Some(code) if (0..=3).contains(&code) => code,
        Some(_) => STATE_UNKNOWN,
        // Killed by signal: no portable exit code, treat as unknown.
        None => STATE_UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_tail_leaves_short_output_untouched() {
        let text = "all good".to_string();
        assert_eq!(truncate_tail(text.clone(), MAX_OUTPUT_BYTES), text);
    }

    #[test]
    fn truncate_tail_keeps_only_the_last_bytes() {
        let text = "a".repeat(10) + &"b".repeat(10);
        let truncated = truncate_tail(text, 10);
        assert!(truncated.ends_with(&"b".repeat(10)));
        assert!(truncated.contains("truncated"));
        assert!(!truncated.contains('a'));
    }

    #[test]
    fn truncate_tail_never_splits_a_multibyte_char() {
        let text = format!("{}{}", "x".repeat(5), "\u{1F600}".repeat(5));
        let truncated = truncate_tail(text, 7);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }
}
