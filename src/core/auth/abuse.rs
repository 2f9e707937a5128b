//! Abuse heuristic
//!
//! Reads the activity log for one refresh token and decides whether its use
//! pattern looks automated or shared. Missing evidence counts against the token.

use chrono::Duration;
use uuid::Uuid;

use crate::core::db::models::ActivityField;
use crate::core::db::repositories::{ActivityLog, ActivityLogError};

const DEFAULT_WINDOW_SECONDS: i64 = 300;
const DEFAULT_MAX_RECENT: u64 = 5;
const DEFAULT_MAX_DISTINCT_IPS: u64 = 2;

/// Thresholds for the abuse heuristic
#[derive(Debug, Clone)]
pub struct AbusePolicy {
    /// Trailing window for the burst check
    pub window: Duration,
    /// More events than this inside `window` is suspicious
    pub max_recent: u64,
    /// More distinct source IPs than this, ever, is suspicious
    pub max_distinct_ips: u64,
}

impl Default for AbusePolicy {
    fn default() -> Self {
        Self {
            window: Duration::seconds(DEFAULT_WINDOW_SECONDS),
            max_recent: DEFAULT_MAX_RECENT,
            max_distinct_ips: DEFAULT_MAX_DISTINCT_IPS,
        }
    }
}

impl AbusePolicy {
    /// Read `ABUSE_WINDOW_SECONDS`, `ABUSE_MAX_RECENT` and `ABUSE_MAX_DISTINCT_IPS`,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let window = std::env::var("ABUSE_WINDOW_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::seconds)
            .unwrap_or(defaults.window);

        let max_recent = std::env::var("ABUSE_MAX_RECENT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_recent);

        let max_distinct_ips = std::env::var("ABUSE_MAX_DISTINCT_IPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_distinct_ips);

        Self {
            window,
            max_recent,
            max_distinct_ips,
        }
    }

    /// Evaluate the activity of `token_id`. Log failures yield [`Suspicion::EvidenceUnavailable`].
    pub async fn assess(&self, log: &dyn ActivityLog, token_id: Uuid) -> Option<Suspicion> {
        match self.evaluate(log, token_id).await {
            Ok(verdict) => verdict,
            Err(err) => Some(Suspicion::EvidenceUnavailable(err.to_string())),
        }
    }

    async fn evaluate(
        &self,
        log: &dyn ActivityLog,
        token_id: Uuid,
    ) -> Result<Option<Suspicion>, ActivityLogError> {
        let recent = log.count_recent(token_id, self.window).await?;
        if recent > self.max_recent {
            return Ok(Some(Suspicion::Burst { recent }));
        }

        let distinct_ips = log.count_distinct(token_id, ActivityField::IpAddress).await?;
        if distinct_ips > self.max_distinct_ips {
            return Ok(Some(Suspicion::SpreadAcrossIps { distinct_ips }));
        }

        Ok(None)
    }
}

/// Why a token's activity was judged suspicious
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suspicion {
    Burst { recent: u64 },
    SpreadAcrossIps { distinct_ips: u64 },
    EvidenceUnavailable(String),
}

impl std::fmt::Display for Suspicion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Suspicion::Burst { recent } => write!(f, "{recent} uses inside the abuse window"),
            Suspicion::SpreadAcrossIps { distinct_ips } => {
                write!(f, "used from {distinct_ips} distinct IPs")
            }
            Suspicion::EvidenceUnavailable(reason) => {
                write!(f, "activity log unavailable: {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::memory::MemoryActivityLog;
    use crate::core::db::models::{ActivityKind, NewTokenActivity, TokenActivityRecord};
    use async_trait::async_trait;
    use chrono::Utc;

    fn attempt(token_id: Uuid, ip: &str) -> NewTokenActivity {
        NewTokenActivity {
            refresh_token_id: token_id,
            activity: ActivityKind::RefreshAttempt,
            ip_address: ip.to_string(),
            user_agent: "Mozilla/5.0".to_string(),
        }
    }

    struct BrokenLog;

    #[async_trait]
    impl ActivityLog for BrokenLog {
        async fn record(&self, _event: NewTokenActivity) -> Result<(), ActivityLogError> {
            Err(ActivityLogError::Unavailable("down".into()))
        }

        async fn count_recent(
            &self,
            _token_id: Uuid,
            _window: Duration,
        ) -> Result<u64, ActivityLogError> {
            Err(ActivityLogError::Unavailable("down".into()))
        }

        async fn count_distinct(
            &self,
            _token_id: Uuid,
            _field: ActivityField,
        ) -> Result<u64, ActivityLogError> {
            Err(ActivityLogError::Unavailable("down".into()))
        }

        async fn list_for_token(
            &self,
            _token_id: Uuid,
        ) -> Result<Vec<TokenActivityRecord>, ActivityLogError> {
            Err(ActivityLogError::Unavailable("down".into()))
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = AbusePolicy::default();
        assert_eq!(policy.window, Duration::minutes(5));
        assert_eq!(policy.max_recent, 5);
        assert_eq!(policy.max_distinct_ips, 2);
    }

    #[tokio::test]
    async fn test_clean_token() {
        let log = MemoryActivityLog::new();
        let token_id = Uuid::new_v4();
        log.record(attempt(token_id, "10.0.0.1")).await.unwrap();

        assert_eq!(AbusePolicy::default().assess(&log, token_id).await, None);
    }

    #[tokio::test]
    async fn test_burst_threshold_is_exclusive() {
        let log = MemoryActivityLog::new();
        let token_id = Uuid::new_v4();
        let policy = AbusePolicy::default();

        for _ in 0..5 {
            log.record(attempt(token_id, "10.0.0.1")).await.unwrap();
        }
        assert_eq!(policy.assess(&log, token_id).await, None);

        log.record(attempt(token_id, "10.0.0.1")).await.unwrap();
        assert_eq!(
            policy.assess(&log, token_id).await,
            Some(Suspicion::Burst { recent: 6 })
        );
    }

    #[tokio::test]
    async fn test_old_events_fall_out_of_window() {
        let log = MemoryActivityLog::new();
        let token_id = Uuid::new_v4();
        let long_ago = Utc::now() - Duration::minutes(30);

        for _ in 0..10 {
            log.record_at(attempt(token_id, "10.0.0.1"), long_ago);
        }

        assert_eq!(AbusePolicy::default().assess(&log, token_id).await, None);
    }

    #[tokio::test]
    async fn test_distinct_ips() {
        let log = MemoryActivityLog::new();
        let token_id = Uuid::new_v4();
        let policy = AbusePolicy::default();

        log.record(attempt(token_id, "10.0.0.1")).await.unwrap();
        log.record(attempt(token_id, "10.0.0.2")).await.unwrap();
        assert_eq!(policy.assess(&log, token_id).await, None);

        log.record(attempt(token_id, "10.0.0.3")).await.unwrap();
        assert_eq!(
            policy.assess(&log, token_id).await,
            Some(Suspicion::SpreadAcrossIps { distinct_ips: 3 })
        );
    }

    #[tokio::test]
    async fn test_events_of_other_tokens_ignored() {
        let log = MemoryActivityLog::new();
        let token_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        for i in 0..10 {
            log.record(attempt(other, &format!("10.0.0.{i}"))).await.unwrap();
        }

        assert_eq!(AbusePolicy::default().assess(&log, token_id).await, None);
    }

    #[tokio::test]
    async fn test_log_failure_is_suspicious() {
        let verdict = AbusePolicy::default().assess(&BrokenLog, Uuid::new_v4()).await;
        assert!(matches!(verdict, Some(Suspicion::EvidenceUnavailable(_))));
    }

    #[test]
    fn test_suspicion_display() {
        assert_eq!(
            Suspicion::Burst { recent: 7 }.to_string(),
            "7 uses inside the abuse window"
        );
        assert_eq!(
            Suspicion::SpreadAcrossIps { distinct_ips: 3 }.to_string(),
            "used from 3 distinct IPs"
        );
    }
}
