use std::collections::BTreeMap;

use worldgraph_core::config::{RateLimitConfig, RateLimitPolicy};
use worldgraph_core::ActorKind;

/// Bucket parameters for one (actor kind, feature) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedPolicy {
    pub capacity: f64,
    pub tokens_per_second: f64,
}

impl From<&RateLimitPolicy> for ResolvedPolicy {
    fn from(policy: &RateLimitPolicy) -> Self {
        Self {
            capacity: policy.capacity,
            tokens_per_second: policy.tokens_per_second(),
        }
    }
}

impl ResolvedPolicy {
    pub fn limit(&self) -> u64 {
        self.capacity.max(0.0).floor() as u64
    }
}

/// Lookup table from (actor kind, feature) to bucket parameters. Pairs without
/// a rule get the default policy; a later rule for the same pair wins.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    default: ResolvedPolicy,
    rules: BTreeMap<(ActorKind, String), ResolvedPolicy>,
}

impl PolicyTable {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| ((rule.actor_kind, rule.feature.clone()), ResolvedPolicy::from(&rule.policy)))
            .collect();
        Self {
            default: ResolvedPolicy::from(&config.default),
            rules,
        }
    }

    pub fn resolve(&self, kind: ActorKind, feature: &str) -> ResolvedPolicy {
        self.rules
            .get(&(kind, feature.to_string()))
            .copied()
            .unwrap_or(self.default)
    }
}
