use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::suspicious_activity::{NewSuspiciousActivity, Severity, SuspiciousActivity};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait SuspiciousActivityRepository: Send + Sync {
    async fn create_activity(&self, activity: &NewSuspiciousActivity) -> Result<SuspiciousActivity, AppError>;
    /// Newest first.
    async fn list_activities_for_user(&self, user_id: &Uuid, limit: i64) -> Result<Vec<SuspiciousActivity>, AppError>;
    /// Marks the activity resolved. When `owner` is given, only that user's
    /// activities match. Returns whether a row was updated.
    async fn resolve_activity(&self, id: &Uuid, owner: Option<&Uuid>) -> Result<bool, AppError>;
    /// Drops low-severity rows older than `cutoff`, and resolved rows of any
    /// severity older than `cutoff`.
    async fn delete_stale_activities(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait::async_trait]
impl SuspiciousActivityRepository for PostgresRepository {
    async fn create_activity(&self, activity: &NewSuspiciousActivity) -> Result<SuspiciousActivity, AppError> {
        let activity = sqlx::query_as::<_, SuspiciousActivity>(
            r#"
            INSERT INTO suspicious_activities (user_id, activity_type, ip_address, user_agent, description, severity, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, activity_type, ip_address, user_agent, description, severity, metadata, resolved, created_at
            "#,
        )
        .bind(activity.user_id)
        .bind(activity.activity_type)
        .bind(&activity.ip_address)
        .bind(&activity.user_agent)
        .bind(&activity.description)
        .bind(activity.severity.as_str())
        .bind(&activity.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(activity)
    }

    async fn list_activities_for_user(&self, user_id: &Uuid, limit: i64) -> Result<Vec<SuspiciousActivity>, AppError> {
        let activities = sqlx::query_as::<_, SuspiciousActivity>(
            r#"
            SELECT id, user_id, activity_type, ip_address, user_agent, description, severity, metadata, resolved, created_at
            FROM suspicious_activities
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(activities)
    }

    async fn resolve_activity(&self, id: &Uuid, owner: Option<&Uuid>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE suspicious_activities
            SET resolved = true
            WHERE id = $1
              AND ($2::uuid IS NULL OR user_id = $2)
            "#,
        )
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_stale_activities(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM suspicious_activities
            WHERE created_at < $1
              AND (severity = $2 OR resolved = true)
            "#,
        )
        .bind(cutoff)
        .bind(Severity::Low.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
