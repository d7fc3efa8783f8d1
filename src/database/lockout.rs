use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::lockout::{AccountLockout, LockoutType, NewLockout};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait LockoutRepository: Send + Sync {
    async fn create_lockout(&self, lockout: &NewLockout) -> Result<AccountLockout, AppError>;
    /// Latest-expiring lockout of `lockout_type` matching the given subjects.
    /// Expired rows are returned too; callers decide what "active" means.
    async fn find_lockout(&self, lockout_type: LockoutType, user_id: Option<&Uuid>, ip_address: Option<&str>) -> Result<Option<AccountLockout>, AppError>;
    async fn delete_lockout(&self, id: &Uuid) -> Result<(), AppError>;
    async fn delete_expired_lockouts(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait::async_trait]
impl LockoutRepository for PostgresRepository {
    async fn create_lockout(&self, lockout: &NewLockout) -> Result<AccountLockout, AppError> {
        let lockout = sqlx::query_as::<_, AccountLockout>(
            r#"
            INSERT INTO account_lockouts (user_id, ip_address, lockout_type, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, ip_address, lockout_type, expires_at, created_at
            "#,
        )
        .bind(lockout.user_id)
        .bind(&lockout.ip_address)
        .bind(lockout.lockout_type.as_str())
        .bind(lockout.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(lockout)
    }

    async fn find_lockout(&self, lockout_type: LockoutType, user_id: Option<&Uuid>, ip_address: Option<&str>) -> Result<Option<AccountLockout>, AppError> {
        let lockout = sqlx::query_as::<_, AccountLockout>(
            r#"
            SELECT id, user_id, ip_address, lockout_type, expires_at, created_at
            FROM account_lockouts
            WHERE lockout_type = $1
              AND ($2::uuid IS NULL OR user_id = $2)
              AND ($3::text IS NULL OR ip_address = $3)
            ORDER BY expires_at DESC
            LIMIT 1
            "#,
        )
        .bind(lockout_type.as_str())
        .bind(user_id)
        .bind(ip_address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(lockout)
    }

    async fn delete_lockout(&self, id: &Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM account_lockouts WHERE id = $1").bind(id).execute(&self.pool).await?;

        Ok(())
    }

    async fn delete_expired_lockouts(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM account_lockouts WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
