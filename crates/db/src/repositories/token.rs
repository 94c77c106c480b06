use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use flowgate_core::domain::instance::InstanceId;
use flowgate_core::domain::token::{EmailActionToken, TokenAction};

use super::workflow::parse_u32;
use super::{RepositoryError, TokenStore};
use crate::DbPool;

pub struct SqlTokenStore {
    pool: DbPool,
}

impl SqlTokenStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TokenStore for SqlTokenStore {
    async fn insert(&self, token: &EmailActionToken) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO email_action_token (
                id, token, instance_id, approver_email, approver_name, level, action,
                issued_at, expires_at, used_at, is_used
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&token.id)
        .bind(&token.token)
        .bind(&token.instance_id.0)
        .bind(&token.approver_email)
        .bind(&token.approver_name)
        .bind(i64::from(token.level))
        .bind(token.action.as_str())
        .bind(token.issued_at.to_rfc3339())
        .bind(token.expires_at.to_rfc3339())
        .bind(token.used_at.map(|at| at.to_rfc3339()))
        .bind(token.is_used)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<EmailActionToken>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, token, instance_id, approver_email, approver_name, level, action,
                    issued_at, expires_at, used_at, is_used
             FROM email_action_token
             WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(token_from_row).transpose()
    }

    async fn mark_used(
        &self,
        token: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE email_action_token SET is_used = 1, used_at = ? WHERE token = ?",
        )
        .bind(used_at.to_rfc3339())
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn invalidate_for_level(
        &self,
        instance_id: &InstanceId,
        level: u32,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE email_action_token SET is_used = 1, used_at = ?
             WHERE instance_id = ? AND level = ? AND is_used = 0",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&instance_id.0)
        .bind(i64::from(level))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn invalidate_all(&self, instance_id: &InstanceId) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE email_action_token SET is_used = 1, used_at = ?
             WHERE instance_id = ? AND is_used = 0",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&instance_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM email_action_token WHERE expires_at < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn token_from_row(row: SqliteRow) -> Result<EmailActionToken, RepositoryError> {
    let action_raw: String = row.try_get("action")?;
    let action = TokenAction::parse(&action_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown token action `{action_raw}`")))?;

    Ok(EmailActionToken {
        id: row.try_get("id")?,
        token: row.try_get("token")?,
        instance_id: InstanceId(row.try_get("instance_id")?),
        approver_email: row.try_get("approver_email")?,
        approver_name: row.try_get("approver_name")?,
        level: parse_u32("level", row.try_get("level")?)?,
        action,
        issued_at: parse_timestamp("issued_at", row.try_get("issued_at")?)?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
        used_at: row
            .try_get::<Option<String>, _>("used_at")?
            .map(|at| parse_timestamp("used_at", at))
            .transpose()?,
        is_used: row.try_get("is_used")?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
