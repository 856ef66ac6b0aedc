//! Persistent token buckets keyed by (actor id, feature id).

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use worldgraph_core::{Actor, Admission, SharedConnection, WorldgraphResult};

use crate::bucket::BucketState;
use crate::policy::PolicyTable;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS token_buckets (
    actor_id TEXT NOT NULL,
    feature_id TEXT NOT NULL,
    tokens REAL NOT NULL,
    last_refill_ms INTEGER NOT NULL,
    PRIMARY KEY (actor_id, feature_id)
) WITHOUT ROWID;
";

/// Token-bucket limiter over the control-plane database.
///
/// Each check is one immediate transaction taken under the connection mutex,
/// so concurrent checks of the same bucket serialize and never admit more than
/// the bucket holds.
pub struct RateLimiter {
    conn: SharedConnection,
    policies: PolicyTable,
}

impl RateLimiter {
    pub fn open(conn: SharedConnection, policies: PolicyTable) -> WorldgraphResult<Self> {
        conn.lock().execute_batch(SCHEMA)?;
        Ok(Self { conn, policies })
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn check(&self, actor: &Actor, feature: &str) -> WorldgraphResult<Admission> {
        self.check_at(actor, feature, Utc::now())
    }

    /// Refill the bucket up to `now`, then try to take one token.
    pub fn check_at(&self, actor: &Actor, feature: &str, now: DateTime<Utc>) -> WorldgraphResult<Admission> {
        let policy = self.policies.resolve(actor.kind, feature);
        let now_ms = now.timestamp_millis();

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = tx
            .query_row(
                "SELECT tokens, last_refill_ms FROM token_buckets
                 WHERE actor_id = ?1 AND feature_id = ?2",
                params![actor.id, feature],
                |row| {
                    Ok(BucketState {
                        tokens: row.get(0)?,
                        last_refill_ms: row.get(1)?,
                    })
                },
            )
            .optional()?;

        let mut state = match stored {
            Some(state) => state.refilled(policy.capacity, policy.tokens_per_second, now_ms),
            None => BucketState::full(policy.capacity, now_ms),
        };
        let allowed = state.try_take();
        if allowed {
            tx.execute(
                "INSERT INTO token_buckets (actor_id, feature_id, tokens, last_refill_ms)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(actor_id, feature_id) DO UPDATE SET
                    tokens = excluded.tokens,
                    last_refill_ms = excluded.last_refill_ms",
                params![actor.id, feature, state.tokens, state.last_refill_ms],
            )?;
            tx.commit()?;
        }

        let reset_at = state
            .full_at_ms(policy.capacity, policy.tokens_per_second)
            .and_then(DateTime::from_timestamp_millis);
        Ok(Admission {
            allowed,
            limit: policy.limit(),
            remaining: if allowed { state.remaining() } else { 0 },
            reset_at,
        })
    }

    /// Stored bucket state, without refilling. `None` before the first check.
    pub fn peek(&self, actor_id: &str, feature: &str) -> WorldgraphResult<Option<BucketState>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT tokens, last_refill_ms FROM token_buckets
                 WHERE actor_id = ?1 AND feature_id = ?2",
                params![actor_id, feature],
                |row| {
                    Ok(BucketState {
                        tokens: row.get(0)?,
                        last_refill_ms: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }
}
