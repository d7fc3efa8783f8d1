use crate::clock::Clock;
use crate::config::{LockoutConfig, SecurityConfig};
use crate::database::lockout::LockoutRepository;
use crate::database::login_attempt::LoginAttemptRepository;
use crate::database::suspicious_activity::SuspiciousActivityRepository;
use crate::error::app_error::AppError;
use crate::models::lockout::{AccountLockout, CreateLockoutRequest, LockoutType, NewLockout};
use crate::models::login_attempt::NewLoginAttempt;
use crate::models::suspicious_activity::{NewSuspiciousActivity, Severity, SuspiciousActivity, activity_types};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Who a login attempt was made as, and from where.
#[derive(Debug, Clone)]
pub struct LoginContext {
    pub user_id: Option<Uuid>,
    pub email: String,
    pub ip_address: String,
    pub user_agent: String,
}

/// Correlates login failures into suspicious activity and lockouts.
///
/// Kept apart from rate limiting: a lockout protects one account no matter
/// which addresses the guesses come from, and outlives any rate window.
#[derive(Clone)]
pub struct SecurityService {
    lockouts: Arc<dyn LockoutRepository>,
    attempts: Arc<dyn LoginAttemptRepository>,
    activities: Arc<dyn SuspiciousActivityRepository>,
    clock: Arc<dyn Clock>,
    lockout: LockoutConfig,
    security: SecurityConfig,
}

impl SecurityService {
    pub fn new(
        lockouts: Arc<dyn LockoutRepository>,
        attempts: Arc<dyn LoginAttemptRepository>,
        activities: Arc<dyn SuspiciousActivityRepository>,
        clock: Arc<dyn Clock>,
        lockout: LockoutConfig,
        security: SecurityConfig,
    ) -> Self {
        Self {
            lockouts,
            attempts,
            activities,
            clock,
            lockout,
            security,
        }
    }

    /// Must run before credentials are checked. Looks at the user lockout,
    /// then the IP lockout, then the user+IP lockout.
    pub async fn check_account_lockout(&self, user_id: Option<&Uuid>, ip_address: &str) -> Result<(), AppError> {
        if let Some(user_id) = user_id
            && let Some(lockout) = self.active_lockout(LockoutType::Account, Some(user_id), None).await?
        {
            return Err(AppError::AccountLocked { until: lockout.expires_at });
        }

        if let Some(lockout) = self.active_lockout(LockoutType::Ip, None, Some(ip_address)).await? {
            return Err(AppError::AccountLocked { until: lockout.expires_at });
        }

        if let Some(user_id) = user_id
            && let Some(lockout) = self.active_lockout(LockoutType::Both, Some(user_id), Some(ip_address)).await?
        {
            return Err(AppError::AccountLocked { until: lockout.expires_at });
        }

        Ok(())
    }

    /// An expired lockout counts as absent and is deleted on the way out.
    async fn active_lockout(&self, lockout_type: LockoutType, user_id: Option<&Uuid>, ip_address: Option<&str>) -> Result<Option<AccountLockout>, AppError> {
        let Some(lockout) = self.lockouts.find_lockout(lockout_type, user_id, ip_address).await? else {
            return Ok(None);
        };

        if lockout.is_active(self.clock.now()) {
            return Ok(Some(lockout));
        }

        if let Err(e) = self.lockouts.delete_lockout(&lockout.id).await {
            warn!(lockout_id = %lockout.id, error = %e, "failed to delete expired lockout");
        }
        Ok(None)
    }

    pub async fn record_failed_login(&self, attempt: &LoginContext, reason: &str) -> Result<(), AppError> {
        let now = self.clock.now();
        self.attempts
            .record_attempt(&NewLoginAttempt {
                user_id: attempt.user_id,
                email: attempt.email.clone(),
                ip_address: attempt.ip_address.clone(),
                user_agent: attempt.user_agent.clone(),
                success: false,
                failure_reason: Some(reason.to_string()),
            })
            .await?;

        warn!(
            category = "audit",
            event_type = "login_failed",
            user_id = %attempt.user_id.map(|u| u.to_string()).unwrap_or_else(|| "-".to_string()),
            ip = %attempt.ip_address,
            reason = %reason,
            "security audit event (failure)"
        );

        // Unknown emails get a trail too, with no owner.
        self.record_activity(
            attempt,
            activity_types::FAILED_LOGIN,
            Severity::Low,
            "Failed login attempt".to_string(),
            json!({ "reason": reason, "email": attempt.email, "timestamp": now.timestamp() }),
        )
        .await?;

        let since = now - Duration::hours(self.lockout.failure_horizon_hours);
        let failures = match &attempt.user_id {
            Some(user_id) => self.attempts.count_recent_failures_for_user(user_id, since).await?,
            None => self.attempts.count_recent_failures_for_email(&attempt.email, since).await?,
        };

        if failures == self.lockout.warning_threshold {
            self.record_activity(
                attempt,
                activity_types::MULTIPLE_FAILED_LOGINS,
                Severity::Medium,
                format!("{} failed login attempts", failures),
                json!({ "failed_attempts": failures, "email": attempt.email }),
            )
            .await?;
        }

        if failures >= self.lockout.lockout_threshold {
            self.escalate_to_lockout(attempt, failures).await?;
        }

        Ok(())
    }

    async fn escalate_to_lockout(&self, attempt: &LoginContext, failures: i64) -> Result<(), AppError> {
        let (lockout_type, user_id, activity_type, description) = match attempt.user_id {
            Some(user_id) => (
                LockoutType::Account,
                Some(user_id),
                activity_types::ACCOUNT_LOCKED,
                "Account locked due to multiple failed login attempts",
            ),
            // No account to lock for an unknown email; lock the address instead.
            None => (LockoutType::Ip, None, activity_types::IP_LOCKED, "IP address locked due to multiple failed login attempts"),
        };

        let ip_filter = (lockout_type == LockoutType::Ip).then_some(attempt.ip_address.as_str());
        if self.active_lockout(lockout_type, user_id.as_ref(), ip_filter).await?.is_some() {
            return Ok(());
        }

        let duration = Duration::minutes(self.lockout.lockout_duration_minutes);
        let lockout = self
            .lockouts
            .create_lockout(&NewLockout {
                user_id,
                ip_address: Some(attempt.ip_address.clone()),
                lockout_type,
                expires_at: self.clock.now() + duration,
            })
            .await?;

        self.record_activity(
            attempt,
            activity_type,
            Severity::High,
            description.to_string(),
            json!({
                "reason": "too_many_failed_logins",
                "failed_attempts": failures,
                "lockout_minutes": self.lockout.lockout_duration_minutes,
                "expires_at": lockout.expires_at,
            }),
        )
        .await?;

        warn!(
            category = "audit",
            event_type = "lockout_created",
            lockout_type = %lockout_type,
            user_id = %user_id.map(|u| u.to_string()).unwrap_or_else(|| "-".to_string()),
            ip = %attempt.ip_address,
            expires_at = %lockout.expires_at,
            "security audit event (failure)"
        );
        Ok(())
    }

    pub async fn record_successful_login(&self, attempt: &LoginContext, last_login_at: Option<DateTime<Utc>>) -> Result<(), AppError> {
        self.attempts
            .record_attempt(&NewLoginAttempt {
                user_id: attempt.user_id,
                email: attempt.email.clone(),
                ip_address: attempt.ip_address.clone(),
                user_agent: attempt.user_agent.clone(),
                success: true,
                failure_reason: None,
            })
            .await?;

        self.record_activity(
            attempt,
            activity_types::LOGIN_SUCCESS,
            Severity::Low,
            "Successful login".to_string(),
            json!({ "timestamp": self.clock.now().timestamp(), "last_login": last_login_at }),
        )
        .await?;

        info!(
            category = "audit",
            event_type = "login_success",
            user_id = %attempt.user_id.map(|u| u.to_string()).unwrap_or_else(|| "-".to_string()),
            ip = %attempt.ip_address,
            "security audit event"
        );
        Ok(())
    }

    async fn record_activity(
        &self,
        attempt: &LoginContext,
        activity_type: &'static str,
        severity: Severity,
        description: String,
        metadata: serde_json::Value,
    ) -> Result<SuspiciousActivity, AppError> {
        self.record_suspicious_activity(NewSuspiciousActivity {
            user_id: attempt.user_id,
            activity_type,
            ip_address: attempt.ip_address.clone(),
            user_agent: attempt.user_agent.clone(),
            description,
            severity,
            metadata,
        })
        .await
    }

    pub async fn record_suspicious_activity(&self, activity: NewSuspiciousActivity) -> Result<SuspiciousActivity, AppError> {
        self.activities.create_activity(&activity).await
    }

    pub async fn get_suspicious_activities(&self, user_id: &Uuid) -> Result<Vec<SuspiciousActivity>, AppError> {
        self.activities.list_activities_for_user(user_id, self.security.activity_page_size).await
    }

    /// Marks an activity resolved. With an `owner`, only their own activities qualify.
    pub async fn resolve_activity(&self, activity_id: &Uuid, owner: Option<&Uuid>) -> Result<(), AppError> {
        if self.activities.resolve_activity(activity_id, owner).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Suspicious activity {} not found", activity_id)))
        }
    }

    pub async fn create_lockout(&self, request: &CreateLockoutRequest) -> Result<AccountLockout, AppError> {
        let lockout = self
            .lockouts
            .create_lockout(&NewLockout {
                user_id: request.user_id,
                ip_address: request.ip_address.clone(),
                lockout_type: request.lockout_type(),
                expires_at: self.clock.now() + Duration::minutes(request.duration_minutes),
            })
            .await?;

        warn!(
            category = "audit",
            event_type = "lockout_created",
            lockout_id = %lockout.id,
            lockout_type = %lockout.lockout_type,
            expires_at = %lockout.expires_at,
            "administrative lockout created"
        );
        Ok(lockout)
    }

    pub async fn cleanup_expired_lockouts(&self) -> Result<u64, AppError> {
        let removed = self.lockouts.delete_expired_lockouts(self.clock.now()).await?;
        info!(removed = removed, "expired lockouts removed");
        Ok(removed)
    }

    /// Low severity activities age out after the retention period; anything
    /// higher stays until resolved and then ages out the same way.
    pub async fn cleanup_stale_activities(&self) -> Result<u64, AppError> {
        let cutoff = self.clock.now() - Duration::days(self.security.activity_retention_days);
        let removed = self.activities.delete_stale_activities(cutoff).await?;
        info!(removed = removed, "stale suspicious activities removed");
        Ok(removed)
    }
}
