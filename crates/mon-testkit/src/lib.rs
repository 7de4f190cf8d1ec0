//! Test-only helpers: a deterministic stand-in for the real child-process
//! executor, and a DB test pool helper for integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mon_executor::CheckExecutorFn;
use mon_schemas::CheckOutcome;

/// A canned-response executor: maps a joined `cmdline` string to a fixed
/// `CheckOutcome`, falling back to `STATE_UNKNOWN` for anything not
/// registered. Lets a test exercise the claim/execute/record loop and the
/// notification transition rule without touching the host's shell.
pub struct ScriptedExecutor {
    responses: Arc<Mutex<HashMap<String, CheckOutcome>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register the outcome to return the next time `cmdline` (joined with
    /// spaces) is executed.
    pub fn on(&self, cmdline: &[&str], outcome: CheckOutcome) {
        let key = cmdline.join(" ");
        self.responses.lock().unwrap().insert(key, outcome);
    }

    /// Every cmdline executed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Build the `CheckExecutorFn` this scripted executor backs.
    pub fn into_fn(self) -> CheckExecutorFn {
        let responses = self.responses;
        let calls = self.calls;
        Arc::new(move |cmdline: &[String], _timeout: Duration| {
            let key = cmdline.join(" ");
            let responses = responses.clone();
            let calls = calls.clone();
            Box::pin(async move {
                calls.lock().unwrap().push(key.clone());
                responses
                    .lock()
                    .unwrap()
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| CheckOutcome {
                        state: mon_schemas::STATE_UNKNOWN,
                        output: format!("no scripted response for: {key}"),
                    })
            })
        })
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Connect to Postgres via `MON_DATABASE_URL`, ensuring migrations are
/// applied. Thin re-export so `mon-executor`/`mon-materializer` tests don't
/// need a direct `mon-db` dev-dependency just for this.
pub async fn testkit_db_pool() -> anyhow::Result<sqlx::PgPool> {
    mon_db::testkit_db_pool().await
}
