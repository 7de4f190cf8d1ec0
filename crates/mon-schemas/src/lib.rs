//! Plain data types shared by the monitoring workspace.
//!
//! Every type here is a dumb row struct (`Serialize + Deserialize + Debug +
//! Clone`) with at most small, pure helper methods. There is no in-memory
//! object graph — callers fetch rows from `mon-db`, act on them, and write
//! rows back. `States` is the one type with real behavior, since the
//! transition rule in the executor needs it on both sides of a DB round
//! trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A monitored host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub message: String,
    pub updated: DateTime<Utc>,
    pub mapping_id: Option<i64>,
}

/// An executable template (`{{placeholder}}` substitution, see `mon-config`
/// for the rendering rules and `mon-tokenizer` for the argv split).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: i64,
    pub name: String,
    pub command: String,
    pub message: String,
    pub updated: DateTime<Utc>,
}

/// A worker-pool identity. A running executor process is configured with a
/// single `checker_id` and only ever claims `active_checks` rows tagged
/// with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checker {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// A binding of a command to a node with per-check parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub id: i64,
    pub node_id: i64,
    pub command_id: i64,
    pub checker_id: i64,
    pub name: String,
    pub message: String,
    pub options: Value,
    pub intval: i32,
    pub enabled: bool,
    pub updated: DateTime<Utc>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub mapping_id: Option<i64>,
}

/// The runtime row paired 1:1 with a `Check` (primary key `check_id`),
/// holding scheduling state and the most recent outcome history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCheck {
    pub check_id: i64,
    pub cmdline: Vec<String>,
    pub intval: i32,
    pub enabled: bool,
    pub states: States,
    pub msg: String,
    pub next_time: DateTime<Utc>,
    pub acknowledged: bool,
    pub mapping_id: Option<i64>,
    pub checker_id: i64,
    pub state_since: DateTime<Utc>,
    pub notice: Option<String>,
    pub check_host: Option<String>,
}

/// An append-only notification log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub check_id: i64,
    pub mapping_id: Option<i64>,
    pub notifier_id: i64,
    pub states: Vec<i32>,
    pub output: String,
    pub inserted: DateTime<Utc>,
    pub sent: Option<DateTime<Utc>>,
    pub check_host: Option<String>,
}

/// M:N binding of a check to a notifier, with a per-binding enable flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksNotify {
    pub check_id: i64,
    pub notifier_id: i64,
    pub enabled: bool,
}

/// Operator-defined label mapping (state integer -> title/color). Read by
/// the UI only; the core treats `mapping_id` purely as a foreign key to
/// carry through materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingLevel {
    pub id: i64,
    pub mapping_id: i64,
    pub state: i32,
    pub title: String,
    pub color: String,
}

/// Bounded, newest-first sequence of the most recent check outcomes.
///
/// `states[0]` is always the most recent run; the sequence never grows
/// past 6 entries. `sqlx` decodes Postgres `INTEGER[]` columns natively, so
/// this type holds only the add/transition behavior, with no manual
/// `driver.Valuer`/`Scanner`-style serialization shim needed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct States(pub Vec<i32>);

impl States {
    pub fn new() -> Self {
        States(Vec::new())
    }

    pub fn from_vec(v: Vec<i32>) -> Self {
        States(v)
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Most recent outcome, if any.
    pub fn current(&self) -> Option<i32> {
        self.0.first().copied()
    }

    /// Prepend `state`, keeping at most the first 5 of the prior sequence
    /// (total length capped at 6).
    pub fn add(&mut self, state: i32) {
        let keep = self.0.len().min(5);
        let mut next = Vec::with_capacity(keep + 1);
        next.push(state);
        next.extend_from_slice(&self.0[..keep]);
        self.0 = next;
    }

    /// True when the sequence just transitioned from non-zero to zero.
    /// A single-element history counts as a transition to OK iff that one
    /// entry is itself zero (there is no prior state to compare against).
    pub fn to_ok(&self) -> bool {
        match self.0.as_slice() {
            [] => false,
            [only] => *only == 0,
            [cur, prev, ..] => *cur == 0 && *prev > 0,
        }
    }

    /// Snapshot of up to the first 5 entries, the shape stored on a
    /// `notifications` row.
    pub fn notification_snapshot(&self) -> Vec<i32> {
        self.0.iter().take(5).copied().collect()
    }
}

/// Result of running one check's cmdline: a numeric exit state plus the
/// captured (and possibly truncated) stdout+stderr tail.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub state: i32,
    pub output: String,
}

pub const STATE_OK: i32 = 0;
pub const STATE_WARN: i32 = 1;
pub const STATE_CRITICAL: i32 = 2;
pub const STATE_UNKNOWN: i32 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_grows_then_caps_at_six_newest_first() {
        let mut s = States::new();
        s.add(2);
        assert_eq!(s.as_slice(), &[2]);
        s.add(2);
        assert_eq!(s.as_slice(), &[2, 2]);
        s.add(0);
        assert_eq!(s.as_slice(), &[0, 2, 2]);
        for _ in 0..5 {
            s.add(1);
        }
        assert_eq!(s.as_slice(), &[1, 1, 1, 1, 1, 0]);
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn to_ok_matches_spec_scenarios() {
        assert!(States::from_vec(vec![0, 2, 2]).to_ok());
        assert!(!States::from_vec(vec![2, 0, 0]).to_ok());
        assert!(States::from_vec(vec![0]).to_ok());
        assert!(!States::from_vec(vec![]).to_ok());
    }

    #[test]
    fn notification_snapshot_caps_at_five() {
        let s = States::from_vec(vec![3, 2, 1, 0, 1, 2]);
        assert_eq!(s.notification_snapshot(), vec![3, 2, 1, 0, 1]);
    }
}
