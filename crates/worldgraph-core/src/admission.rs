use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const HEADER_RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";

/// Outcome of one admission check, reported for admitted and denied calls alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub allowed: bool,
    /// Bucket capacity.
    pub limit: u64,
    /// Whole tokens left after this check (0 on denial).
    pub remaining: u64,
    /// When the bucket is full again. `None` for buckets that never refill.
    pub reset_at: Option<DateTime<Utc>>,
}

impl Admission {
    /// Response headers for a transport layer.
    ///
    /// The reset header carries unix seconds and is omitted for non-refilling buckets.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            (HEADER_RATE_LIMIT_LIMIT, self.limit.to_string()),
            (HEADER_RATE_LIMIT_REMAINING, self.remaining.to_string()),
        ];
        if let Some(reset_at) = self.reset_at {
            out.push((HEADER_RATE_LIMIT_RESET, reset_at.timestamp().to_string()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_include_reset_when_known() {
        let reset_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let admission = Admission {
            allowed: true,
            limit: 10,
            remaining: 9,
            reset_at: Some(reset_at),
        };
        let headers = admission.headers();
        assert_eq!(
            headers,
            vec![
                (HEADER_RATE_LIMIT_LIMIT, "10".to_string()),
                (HEADER_RATE_LIMIT_REMAINING, "9".to_string()),
                (HEADER_RATE_LIMIT_RESET, "1700000000".to_string()),
            ]
        );
    }

    #[test]
    fn headers_skip_reset_for_static_buckets() {
        let admission = Admission {
            allowed: false,
            limit: 2,
            remaining: 0,
            reset_at: None,
        };
        assert_eq!(admission.headers().len(), 2);
    }
}
