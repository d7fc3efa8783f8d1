use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::login_attempt::{LoginAttempt, NewLoginAttempt};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait LoginAttemptRepository: Send + Sync {
    async fn record_attempt(&self, attempt: &NewLoginAttempt) -> Result<LoginAttempt, AppError>;
    /// Failures for the user since `since` that happened after their last success.
    async fn count_recent_failures_for_user(&self, user_id: &Uuid, since: DateTime<Utc>) -> Result<i64, AppError>;
    /// Same as [`Self::count_recent_failures_for_user`], keyed by the submitted email.
    async fn count_recent_failures_for_email(&self, email: &str, since: DateTime<Utc>) -> Result<i64, AppError>;
}

#[async_trait::async_trait]
impl LoginAttemptRepository for PostgresRepository {
    async fn record_attempt(&self, attempt: &NewLoginAttempt) -> Result<LoginAttempt, AppError> {
        let attempt = sqlx::query_as::<_, LoginAttempt>(
            r#"
            INSERT INTO login_attempts (user_id, email, ip_address, user_agent, success, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, email, ip_address, user_agent, success, failure_reason, created_at
            "#,
        )
        .bind(attempt.user_id)
        .bind(&attempt.email)
        .bind(&attempt.ip_address)
        .bind(&attempt.user_agent)
        .bind(attempt.success)
        .bind(&attempt.failure_reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(attempt)
    }

    async fn count_recent_failures_for_user(&self, user_id: &Uuid, since: DateTime<Utc>) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM login_attempts
            WHERE user_id = $1
              AND success = false
              AND created_at >= $2
              AND created_at > COALESCE(
                  (SELECT MAX(created_at) FROM login_attempts WHERE user_id = $1 AND success = true),
                  '-infinity'::timestamptz
              )
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_recent_failures_for_email(&self, email: &str, since: DateTime<Utc>) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM login_attempts
            WHERE lower(email) = lower($1)
              AND success = false
              AND created_at >= $2
              AND created_at > COALESCE(
                  (SELECT MAX(created_at) FROM login_attempts WHERE lower(email) = lower($1) AND success = true),
                  '-infinity'::timestamptz
              )
            "#,
        )
        .bind(email)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
