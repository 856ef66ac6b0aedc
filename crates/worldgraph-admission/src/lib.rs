//! Admission control for the Worldgraph data plane.
//!
//! Every operation passes through [`AdmissionController::check`] (a lazily
//! refilled token bucket per actor and feature, persisted in the control-plane
//! database) and, once it has succeeded, [`AdmissionController::record`]
//! (a usage record appended by a background worker).

pub mod bucket;
pub mod controller;
pub mod limiter;
pub mod policy;
pub mod usage;

pub use bucket::BucketState;
pub use controller::AdmissionController;
pub use limiter::RateLimiter;
pub use policy::{PolicyTable, ResolvedPolicy};
pub use usage::{UsageMeter, UsageRecord, UsageStore};
