//! Database access layer: connection/migration helpers, the three
//! Materializer passes, and the Executor's claim/record operations.
//!
//! Plain `async fn(pool: &PgPool, ...) -> anyhow::Result<T>` functions,
//! `anyhow::Context` on every query, `sqlx::Row::try_get` field-by-field
//! decoding, and a `with ... for update skip locked` CTE for atomic claim.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use mon_schemas::{CheckOutcome, States};

pub const ENV_DB_URL: &str = "MON_DATABASE_URL";

/// Connect to Postgres using a connection string (the `db` field of a
/// daemon's config file).
pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

/// Test/dev helper: connect via `MON_DATABASE_URL` and ensure migrations
/// are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    let pool = connect(&url).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded sqlx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Config Materializer
// ---------------------------------------------------------------------------

/// Pass A: a node edit invalidates every check on it.
pub async fn materializer_pass_propagate_node_timestamps(pool: &PgPool) -> Result<u64> {
    let mut tx = pool.begin().await.context("begin pass-a tx")?;
    let result = sqlx::query(
        r#"
        update checks c
           set updated = n.updated
          from nodes n
         where c.node_id = n.id
           and c.last_refresh < n.updated
        "#,
    )
    .execute(&mut *tx)
    .await
    .context("propagate node timestamps")?;
    tx.commit().await.context("commit pass-a tx")?;
    Ok(result.rows_affected())
}

/// Pass B: a command edit invalidates every check using it.
pub async fn materializer_pass_propagate_command_timestamps(pool: &PgPool) -> Result<u64> {
    let mut tx = pool.begin().await.context("begin pass-b tx")?;
    let result = sqlx::query(
        r#"
        update checks c
           set updated = co.updated
          from commands co
         where c.command_id = co.id
           and c.last_refresh < co.updated
        "#,
    )
    .execute(&mut *tx)
    .await
    .context("propagate command timestamps")?;
    tx.commit().await.context("commit pass-b tx")?;
    Ok(result.rows_affected())
}

/// Outcome of a single Pass C tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializePassOutcome {
    /// No stale check was found; nothing to do this tick.
    Idle,
    /// A check's `cmdline` was rendered, tokenized, and upserted.
    Refreshed { check_id: i64 },
    /// Template rendering or option parsing failed; the row stays stale
    /// and will be retried on a later tick.
    Failed { check_id: i64, error: String },
}

/// Pass C: claim and refresh exactly one stale check.
///
/// Selects the check, renders its command template, and upserts its
/// `active_checks` row, all inside one transaction so a template/JSON
/// failure rolls back the whole pass rather than leaving it half-applied.
pub async fn materializer_pass_refresh_one_stale_check(pool: &PgPool) -> Result<MaterializePassOutcome> {
    let mut tx = pool.begin().await.context("begin pass-c tx")?;

    let row = sqlx::query(
        r#"
        select c.id, co.command, c.options
          from checks c
          join commands co on c.command_id = co.id
         where c.last_refresh < c.updated
            or c.last_refresh is null
         limit 1
         for update of c skip locked
        "#,
    )
    .fetch_optional(&mut *tx)
    .await
    .context("select stale check")?;

    let Some(row) = row else {
        tx.commit().await.context("commit idle pass-c tx")?;
        return Ok(MaterializePassOutcome::Idle);
    };

    let check_id: i64 = row.try_get("id")?;
    let command_template: String = row.try_get("command")?;
    let options: Value = row.try_get("options")?;

    let rendered = match render_command_template(&command_template, &options) {
        Ok(r) => r,
        Err(e) => {
            tx.rollback().await.ok();
            return Ok(MaterializePassOutcome::Failed {
                check_id,
                error: e.to_string(),
            });
        }
    };

    let cmdline = mon_tokenizer::argv(&rendered);

    sqlx::query(
        r#"
        insert into active_checks (
            check_id, cmdline, intval, enabled, msg, mapping_id, checker_id, state_since
        )
        select c.id, $2, c.intval, c.enabled,
               coalesce(ac.msg, ''),
               coalesce(c.mapping_id, n.mapping_id, 1),
               c.checker_id,
               coalesce(ac.state_since, now())
          from checks c
          left join active_checks ac on ac.check_id = c.id
          left join nodes n on n.id = c.node_id
         where c.id = $1
        on conflict (check_id) do update
           set cmdline    = excluded.cmdline,
               intval     = excluded.intval,
               enabled    = excluded.enabled,
               mapping_id = excluded.mapping_id,
               checker_id = excluded.checker_id
        "#,
    )
    .bind(check_id)
    .bind(&cmdline)
    .execute(&mut *tx)
    .await
    .context("upsert active_check")?;

    sqlx::query("update checks set last_refresh = now() where id = $1")
        .bind(check_id)
        .execute(&mut *tx)
        .await
        .context("update last_refresh")?;

    tx.commit().await.context("commit pass-c tx")?;

    Ok(MaterializePassOutcome::Refreshed { check_id })
}

/// Render a `{{placeholder}}` / `{{.placeholder}}` command template against
/// a JSON options object.
///
/// A single-pass scanner for this one substitution form rather than a
/// general templating engine, since the grammar has no nesting,
/// conditionals, or loops to justify pulling one in.
pub fn render_command_template(template: &str, options: &Value) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .context("unterminated {{ in command template")?;
        let raw_key = after[..end].trim();
        let key = raw_key.strip_prefix('.').unwrap_or(raw_key);
        let value = options
            .get(key)
            .with_context(|| format!("missing template placeholder: {key}"))?;
        out.push_str(&template_value_to_string(value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);

    Ok(out)
}

fn template_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Check Executor
// ---------------------------------------------------------------------------

/// A due `active_check` row claimed for execution.
#[derive(Debug, Clone)]
pub struct ClaimedCheck {
    pub check_id: i64,
    pub cmdline: Vec<String>,
    pub states: Vec<i32>,
    pub mapping_id: Option<i64>,
}

/// Result of one claim attempt.
#[derive(Debug, Clone)]
pub enum NextOutcome {
    Claimed(ClaimedCheck),
    NoWork,
}

/// Atomically claim the single most-overdue enabled check for
/// `checker_id`, pushing its `next_time` past `now()` in the same
/// transaction: a crash between claim and commit rolls the whole
/// transaction back, so the row stays due; a committed claim is re-due
/// only after `intval` seconds regardless of execution outcome.
///
/// `with ... for update skip locked / update ... returning` ensures two
/// concurrent workers can never claim the same row.
pub async fn claim_due_check(pool: &PgPool, checker_id: i32) -> Result<NextOutcome> {
    let mut tx = pool.begin().await.context("begin claim tx")?;

    let row = sqlx::query(
        r#"
        with due as (
            select ac.check_id
              from active_checks ac
              join checks c on c.id = ac.check_id
             where ac.enabled
               and ac.checker_id = $1
               and ac.next_time <= now()
             order by ac.next_time asc
             limit 1
             for update of ac skip locked
        )
        update active_checks ac
           set next_time = now() + make_interval(secs => ac.intval)
          from due
         where ac.check_id = due.check_id
        returning ac.check_id, ac.cmdline, ac.states, ac.mapping_id
        "#,
    )
    .bind(checker_id)
    .fetch_optional(&mut *tx)
    .await
    .context("claim due check")?;

    let Some(row) = row else {
        tx.commit().await.context("commit empty claim tx")?;
        return Ok(NextOutcome::NoWork);
    };

    let claimed = ClaimedCheck {
        check_id: row.try_get("check_id")?,
        cmdline: row.try_get("cmdline")?,
        states: row.try_get("states")?,
        mapping_id: row.try_get("mapping_id")?,
    };

    tx.commit().await.context("commit claim tx")?;
    Ok(NextOutcome::Claimed(claimed))
}

/// Outcome of recording one executed check.
#[derive(Debug, Clone)]
pub struct RecordedOutcome {
    pub emitted: bool,
    pub new_states: Vec<i32>,
}

/// Record a completed execution and, per the state-transition rule and
/// the acknowledgement suppression rule, insert one `notifications` row
/// per enabled `checks_notify` binding.
pub async fn record_check_outcome(
    pool: &PgPool,
    check_id: i64,
    outcome: &CheckOutcome,
    host_identifier: &str,
) -> Result<RecordedOutcome> {
    let mut tx = pool.begin().await.context("begin record-outcome tx")?;

    let row = sqlx::query(
        r#"
        select states, acknowledged, mapping_id
          from active_checks
         where check_id = $1
         for update
        "#,
    )
    .bind(check_id)
    .fetch_one(&mut *tx)
    .await
    .context("select active_check for update")?;

    let old_states: Vec<i32> = row.try_get("states")?;
    let old_acknowledged: bool = row.try_get("acknowledged")?;
    let mapping_id: Option<i64> = row.try_get("mapping_id")?;

    let prev = old_states.first().copied();
    let mut states = States::from_vec(old_states);
    states.add(outcome.state);
    let cur = outcome.state;
    let changed = prev != Some(cur);

    // Recovery always clears an operator's acknowledgement.
    let new_acknowledged = if cur == 0 { false } else { old_acknowledged };

    sqlx::query(
        r#"
        update active_checks
           set states       = $2,
               msg          = $3,
               check_host   = $4,
               state_since  = case when $5 then now() else state_since end,
               acknowledged = $6
         where check_id = $1
        "#,
    )
    .bind(check_id)
    .bind(&states.0)
    .bind(&outcome.output)
    .bind(host_identifier)
    .bind(changed)
    .bind(new_acknowledged)
    .execute(&mut *tx)
    .await
    .context("update active_check outcome")?;

    let mut emit = transition_emits(prev, cur);
    if cur > 0 && old_acknowledged {
        // Suppress while acknowledged and still non-zero.
        emit = false;
    }

    if emit {
        let output_field = if cur == 0 {
            if outcome.output.is_empty() {
                "recovered".to_string()
            } else {
                format!("recovered\n{}", outcome.output)
            }
        } else {
            outcome.output.clone()
        };
        let snapshot = states.notification_snapshot();

        sqlx::query(
            r#"
            insert into notifications (check_id, mapping_id, notifier_id, states, output, check_host)
            select $1, $2, cn.notifier_id, $3, $4, $5
              from checks_notify cn
             where cn.check_id = $1
               and cn.enabled
            "#,
        )
        .bind(check_id)
        .bind(mapping_id)
        .bind(&snapshot)
        .bind(&output_field)
        .bind(host_identifier)
        .execute(&mut *tx)
        .await
        .context("insert notifications")?;
    }

    tx.commit().await.context("commit record-outcome tx")?;

    Ok(RecordedOutcome {
        emitted: emit,
        new_states: states.0,
    })
}

/// Pure state-transition rule, split out so it can be unit tested
/// without a database.
fn transition_emits(prev: Option<i32>, cur: i32) -> bool {
    match (prev, cur) {
        (None, c) if c > 0 => true,
        (Some(p), c) if p == 0 && c > 0 => true,
        (Some(p), 0) if p > 0 => true,
        (Some(p), c) if p > 0 && c > 0 && p != c => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_dot_prefixed_placeholders() {
        let tmpl = "ping -c {{.count}} {{.host}}";
        let options = serde_json::json!({"count": "3", "host": "example.com"});
        let rendered = render_command_template(tmpl, &options).unwrap();
        assert_eq!(rendered, "ping -c 3 example.com");
        assert_eq!(
            mon_tokenizer::argv(&rendered),
            vec!["ping", "-c", "3", "example.com"]
        );
    }

    #[test]
    fn render_accepts_bare_placeholder_without_dot_prefix() {
        let tmpl = "echo {{msg}}";
        let options = serde_json::json!({"msg": "hi"});
        assert_eq!(render_command_template(tmpl, &options).unwrap(), "echo hi");
    }

    #[test]
    fn render_fails_on_missing_key() {
        let tmpl = "ping {{.host}}";
        let options = serde_json::json!({});
        let err = render_command_template(tmpl, &options).unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn render_fails_on_unterminated_placeholder() {
        let tmpl = "ping {{.host";
        let options = serde_json::json!({"host": "x"});
        assert!(render_command_template(tmpl, &options).is_err());
    }

    #[test]
    fn transition_rule_matches_spec_scenarios() {
        // Problem edge: none -> non-zero, and 0 -> non-zero.
        assert!(transition_emits(None, 2));
        assert!(transition_emits(Some(0), 2));
        // Recovery edge.
        assert!(transition_emits(Some(2), 0));
        // Flap within non-zero.
        assert!(transition_emits(Some(1), 2));
        assert!(transition_emits(Some(2), 1));
        // Steady state: no emission.
        assert!(!transition_emits(Some(0), 0));
        assert!(!transition_emits(Some(2), 2));
        // First-ever OK: nothing to recover from, no emission.
        assert!(!transition_emits(None, 0));
    }
}
