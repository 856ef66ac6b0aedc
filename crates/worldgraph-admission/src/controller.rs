use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use worldgraph_core::{Actor, Admission, SharedConnection, WorldgraphConfig, WorldgraphError, WorldgraphResult};

use crate::limiter::RateLimiter;
use crate::policy::PolicyTable;
use crate::usage::{UsageMeter, UsageRecord, UsageStore};

/// Gate in front of every data-plane operation: rate limit first, meter after.
pub struct AdmissionController {
    limiter: RateLimiter,
    usage: UsageStore,
    meter: UsageMeter,
}

impl AdmissionController {
    pub fn new(limiter: RateLimiter, usage: UsageStore, meter: UsageMeter) -> Self {
        Self { limiter, usage, meter }
    }

    /// Open the bucket and usage tables on the control-plane connection and
    /// start the usage worker.
    pub fn open(conn: SharedConnection, config: &WorldgraphConfig) -> WorldgraphResult<Self> {
        let limiter = RateLimiter::open(conn.clone(), PolicyTable::from_config(&config.rate_limits))?;
        let usage = UsageStore::open(conn)?;
        let meter = UsageMeter::spawn(usage.clone(), config.usage_queue_capacity)?;
        Ok(Self::new(limiter, usage, meter))
    }

    /// Take one token from the actor's bucket for `feature`.
    pub fn check(&self, actor: &Actor, feature: &str) -> WorldgraphResult<Admission> {
        let admission = self.limiter.check(actor, feature)?;
        if !admission.allowed {
            tracing::debug!(
                actor_id = %actor.id,
                actor_kind = actor.kind.as_str(),
                feature,
                limit = admission.limit,
                "admission denied"
            );
        }
        Ok(admission)
    }

    /// Like [`check`](Self::check), but a denial is a `QuotaExceeded` error.
    pub fn admit(&self, actor: &Actor, feature: &str) -> WorldgraphResult<Admission> {
        let admission = self.check(actor, feature)?;
        if admission.allowed {
            Ok(admission)
        } else {
            Err(WorldgraphError::quota_exceeded(feature, admission))
        }
    }

    /// Meter one successful operation. Never blocks and never fails.
    pub fn record(&self, actor: &Actor, feature: &str, quantity: u64, metadata: Option<serde_json::Value>) {
        let mut record = UsageRecord::new(actor.id.clone(), feature, quantity);
        record.metadata = metadata;
        self.meter.record(record);
    }

    pub async fn flush(&self) {
        self.meter.flush().await;
    }

    pub async fn shutdown(&self) {
        self.meter.shutdown().await;
    }

    pub fn usage_totals(&self, actor_id: &str, since: DateTime<Utc>) -> WorldgraphResult<BTreeMap<String, u64>> {
        self.usage.totals(actor_id, since)
    }

    pub fn usage_records(&self, actor_id: &str) -> WorldgraphResult<Vec<UsageRecord>> {
        self.usage.records(actor_id)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
