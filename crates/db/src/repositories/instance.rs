use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use flowgate_core::domain::actor::UserId;
use flowgate_core::domain::approver::ApproverEntryId;
use flowgate_core::domain::history::{ActionSource, ApprovalHistoryEntry, HistoryAction};
use flowgate_core::domain::instance::{FieldValue, InstanceId, InstanceStatus, WorkflowInstance};
use flowgate_core::domain::workflow::WorkflowId;

use super::workflow::parse_u32;
use super::{InstanceStore, RepositoryError, TokenInvalidation};
use crate::DbPool;

pub struct SqlInstanceStore {
    pool: DbPool,
}

impl SqlInstanceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const INSTANCE_COLUMNS: &str = "id, workflow_id, reference_number, title, status, initiator_id,
    initiator_name, initiator_email, current_level, current_approver_id, amount,
    submitted_at, completed_at, is_active, state_version, created_at, updated_at";

#[async_trait::async_trait]
impl InstanceStore for SqlInstanceStore {
    async fn find_by_id(
        &self,
        id: &InstanceId,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instance WHERE id = ?",
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(instance_from_row).transpose()
    }

    async fn find_by_reference(
        &self,
        reference_number: &str,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instance WHERE reference_number = ?",
        ))
        .bind(reference_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(instance_from_row).transpose()
    }

    async fn insert(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO workflow_instance (
                id, workflow_id, reference_number, title, status, initiator_id,
                initiator_name, initiator_email, current_level, current_approver_id, amount,
                submitted_at, completed_at, is_active, state_version, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&instance.id.0)
        .bind(&instance.workflow_id.0)
        .bind(&instance.reference_number)
        .bind(instance.title.as_deref())
        .bind(instance.status.as_str())
        .bind(&instance.initiator.0)
        .bind(&instance.initiator_name)
        .bind(&instance.initiator_email)
        .bind(i64::from(instance.current_level))
        .bind(instance.current_approver.as_ref().map(|id| id.0.as_str()))
        .bind(instance.amount.map(|amount| amount.to_string()))
        .bind(instance.submitted_at.map(|at| at.to_rfc3339()))
        .bind(instance.completed_at.map(|at| at.to_rfc3339()))
        .bind(instance.is_active)
        .bind(i64::from(instance.state_version))
        .bind(instance.created_at.to_rfc3339())
        .bind(instance.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RepositoryError::Conflict(format!(
                    "reference number `{}` is already taken",
                    instance.reference_number
                )))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn apply_transition(
        &self,
        instance: &WorkflowInstance,
        expected_version: u32,
        history: &[ApprovalHistoryEntry],
        tokens: TokenInvalidation,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE workflow_instance SET
                title = ?,
                status = ?,
                current_level = ?,
                current_approver_id = ?,
                amount = ?,
                submitted_at = ?,
                completed_at = ?,
                state_version = ?,
                updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(instance.title.as_deref())
        .bind(instance.status.as_str())
        .bind(i64::from(instance.current_level))
        .bind(instance.current_approver.as_ref().map(|id| id.0.as_str()))
        .bind(instance.amount.map(|amount| amount.to_string()))
        .bind(instance.submitted_at.map(|at| at.to_rfc3339()))
        .bind(instance.completed_at.map(|at| at.to_rfc3339()))
        .bind(i64::from(instance.state_version))
        .bind(instance.updated_at.to_rfc3339())
        .bind(&instance.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::Conflict(format!(
                "instance `{}` was modified concurrently (expected version {expected_version})",
                instance.id.0
            )));
        }

        for entry in history {
            sqlx::query(
                "INSERT INTO approval_history (
                    id, instance_id, actor_id, actor_name, actor_email, level, action,
                    comments, source, occurred_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&entry.id)
            .bind(&entry.instance_id.0)
            .bind(entry.actor_id.as_ref().map(|id| id.0.as_str()))
            .bind(&entry.actor_name)
            .bind(&entry.actor_email)
            .bind(i64::from(entry.level))
            .bind(entry.action.as_str())
            .bind(entry.comments.as_deref())
            .bind(entry.source.as_str())
            .bind(entry.occurred_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        match tokens {
            TokenInvalidation::None => {}
            TokenInvalidation::Level(level) => {
                sqlx::query(
                    "UPDATE email_action_token SET is_used = 1, used_at = ?
                     WHERE instance_id = ? AND level = ? AND is_used = 0",
                )
                .bind(instance.updated_at.to_rfc3339())
                .bind(&instance.id.0)
                .bind(i64::from(level))
                .execute(&mut *tx)
                .await?;
            }
            TokenInvalidation::All => {
                sqlx::query(
                    "UPDATE email_action_token SET is_used = 1, used_at = ?
                     WHERE instance_id = ? AND is_used = 0",
                )
                .bind(instance.updated_at.to_rfc3339())
                .bind(&instance.id.0)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_instance(
        &self,
        instance: &WorkflowInstance,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let updated = sqlx::query(
            "UPDATE workflow_instance SET
                title = ?,
                amount = ?,
                state_version = ?,
                updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(instance.title.as_deref())
        .bind(instance.amount.map(|amount| amount.to_string()))
        .bind(i64::from(instance.state_version))
        .bind(instance.updated_at.to_rfc3339())
        .bind(&instance.id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "instance `{}` was modified concurrently (expected version {expected_version})",
                instance.id.0
            )));
        }

        Ok(())
    }

    async fn upsert_field_values(
        &self,
        instance_id: &InstanceId,
        values: &[FieldValue],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for value in values {
            sqlx::query(
                "INSERT INTO workflow_field_value (
                    instance_id, field_name, field_label, value, display_value
                 ) VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(instance_id, field_name) DO UPDATE SET
                    field_label = excluded.field_label,
                    value = excluded.value,
                    display_value = excluded.display_value",
            )
            .bind(&instance_id.0)
            .bind(&value.field_name)
            .bind(&value.field_label)
            .bind(value.value.as_deref())
            .bind(value.display_value.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn field_values_for(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<FieldValue>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT instance_id, field_name, field_label, value, display_value
             FROM workflow_field_value
             WHERE instance_id = ?
             ORDER BY field_name ASC",
        )
        .bind(&instance_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(FieldValue {
                    instance_id: InstanceId(row.try_get("instance_id")?),
                    field_name: row.try_get("field_name")?,
                    field_label: row.try_get("field_label")?,
                    value: row.try_get("value")?,
                    display_value: row.try_get("display_value")?,
                })
            })
            .collect()
    }

    async fn history_for(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ApprovalHistoryEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, instance_id, actor_id, actor_name, actor_email, level, action,
                    comments, source, occurred_at
             FROM approval_history
             WHERE instance_id = ?
             ORDER BY occurred_at ASC, id ASC",
        )
        .bind(&instance_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(history_from_row).collect()
    }

    async fn list_awaiting_action(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS}
             FROM workflow_instance
             WHERE status IN ('pending', 'escalated') AND is_active = 1
             ORDER BY submitted_at ASC",
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(instance_from_row).collect()
    }

    async fn set_active(
        &self,
        id: &InstanceId,
        is_active: bool,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE workflow_instance SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn instance_from_row(row: SqliteRow) -> Result<WorkflowInstance, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = InstanceStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown instance status `{status_raw}`")))?;

    let amount = row
        .try_get::<Option<String>, _>("amount")?
        .map(|raw| {
            raw.parse::<Decimal>()
                .map_err(|_| RepositoryError::Decode(format!("invalid amount value `{raw}`")))
        })
        .transpose()?;

    Ok(WorkflowInstance {
        id: InstanceId(row.try_get("id")?),
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        reference_number: row.try_get("reference_number")?,
        title: row.try_get("title")?,
        status,
        initiator: UserId(row.try_get("initiator_id")?),
        initiator_name: row.try_get("initiator_name")?,
        initiator_email: row.try_get("initiator_email")?,
        current_level: parse_u32("current_level", row.try_get("current_level")?)?,
        current_approver: row
            .try_get::<Option<String>, _>("current_approver_id")?
            .map(ApproverEntryId),
        amount,
        submitted_at: parse_optional_timestamp("submitted_at", row.try_get("submitted_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        is_active: row.try_get("is_active")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn history_from_row(row: SqliteRow) -> Result<ApprovalHistoryEntry, RepositoryError> {
    let action_raw: String = row.try_get("action")?;
    let action = HistoryAction::parse(&action_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown history action `{action_raw}`")))?;

    let source_raw: String = row.try_get("source")?;
    let source = ActionSource::parse(&source_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action source `{source_raw}`")))?;

    Ok(ApprovalHistoryEntry {
        id: row.try_get("id")?,
        instance_id: InstanceId(row.try_get("instance_id")?),
        actor_id: row.try_get::<Option<String>, _>("actor_id")?.map(UserId),
        actor_name: row.try_get("actor_name")?,
        actor_email: row.try_get("actor_email")?,
        level: parse_u32("level", row.try_get("level")?)?,
        action,
        comments: row.try_get("comments")?,
        source,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use flowgate_core::domain::actor::{Actor, UserId};
    use flowgate_core::domain::history::{ActionSource, ApprovalHistoryEntry, HistoryAction};
    use flowgate_core::domain::instance::{FieldValue, InstanceId, InstanceStatus, WorkflowInstance};
    use flowgate_core::domain::workflow::WorkflowId;

    use super::SqlInstanceStore;
    use crate::fixtures::seed_bare_workflow;
    use crate::repositories::{InstanceStore, RepositoryError, TokenInvalidation};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        seed_bare_workflow(&pool, "WF-EXP", "EXP").await;
        pool
    }

    fn draft(id: &str, reference: &str) -> WorkflowInstance {
        let now = Utc::now();
        WorkflowInstance {
            id: InstanceId(id.to_string()),
            workflow_id: WorkflowId("WF-EXP".to_string()),
            reference_number: reference.to_string(),
            title: None,
            status: InstanceStatus::Draft,
            initiator: UserId("U-1".to_string()),
            initiator_name: "Sam Ortiz".to_string(),
            initiator_email: "sam@example.com".to_string(),
            current_level: 0,
            current_approver: None,
            amount: Some(Decimal::new(120_50, 2)),
            submitted_at: None,
            completed_at: None,
            is_active: true,
            state_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let pool = setup().await;
        let store = SqlInstanceStore::new(pool);
        let instance = draft("WI-1", "EXP-1");

        store.insert(&instance).await.expect("insert");

        let by_id = store.find_by_id(&instance.id).await.expect("find").expect("exists");
        assert_eq!(by_id.reference_number, "EXP-1");
        assert_eq!(by_id.amount, Some(Decimal::new(120_50, 2)));

        let by_reference =
            store.find_by_reference("EXP-1").await.expect("find").expect("exists");
        assert_eq!(by_reference.id, instance.id);
    }

    #[tokio::test]
    async fn duplicate_reference_number_is_a_conflict() {
        let pool = setup().await;
        let store = SqlInstanceStore::new(pool);

        store.insert(&draft("WI-1", "EXP-1")).await.expect("first insert");
        let error = store.insert(&draft("WI-2", "EXP-1")).await.expect_err("duplicate reference");

        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn apply_transition_guards_on_state_version() {
        let pool = setup().await;
        let store = SqlInstanceStore::new(pool);
        let mut instance = draft("WI-1", "EXP-1");
        store.insert(&instance).await.expect("insert");

        instance.status = InstanceStatus::Pending;
        instance.current_level = 1;
        instance.submitted_at = Some(Utc::now());
        instance.state_version = 2;

        let actor = Actor::user("U-1", "Sam Ortiz", "sam@example.com");
        let history = ApprovalHistoryEntry::record(
            instance.id.clone(),
            &actor,
            0,
            HistoryAction::Submitted,
            None,
            ActionSource::Interactive,
        );

        store
            .apply_transition(&instance, 1, std::slice::from_ref(&history), TokenInvalidation::None)
            .await
            .expect("first transition");

        // Same expected version again: the loser of a race must conflict.
        let error = store
            .apply_transition(&instance, 1, std::slice::from_ref(&history), TokenInvalidation::None)
            .await
            .expect_err("stale version");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let stored = store.find_by_id(&instance.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, InstanceStatus::Pending);
        assert_eq!(stored.state_version, 2);

        let history_rows = store.history_for(&instance.id).await.expect("history");
        assert_eq!(history_rows.len(), 1, "failed transition must not append history");
        assert_eq!(history_rows[0].action, HistoryAction::Submitted);
    }

    #[tokio::test]
    async fn field_values_upsert_and_reload() {
        let pool = setup().await;
        let store = SqlInstanceStore::new(pool);
        let instance = draft("WI-1", "EXP-1");
        store.insert(&instance).await.expect("insert");

        let values = vec![FieldValue {
            instance_id: instance.id.clone(),
            field_name: "purpose".to_string(),
            field_label: "Purpose".to_string(),
            value: Some("Team offsite".to_string()),
            display_value: Some("Team offsite".to_string()),
        }];
        store.upsert_field_values(&instance.id, &values).await.expect("upsert");

        let mut updated = values.clone();
        updated[0].value = Some("Client visit".to_string());
        store.upsert_field_values(&instance.id, &updated).await.expect("upsert again");

        let stored = store.field_values_for(&instance.id).await.expect("load");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value.as_deref(), Some("Client visit"));
    }

    #[tokio::test]
    async fn awaiting_action_lists_only_pending_and_escalated() {
        let pool = setup().await;
        let store = SqlInstanceStore::new(pool);

        let mut pending = draft("WI-1", "EXP-1");
        pending.status = InstanceStatus::Pending;
        pending.submitted_at = Some(Utc::now());
        store.insert(&pending).await.expect("insert pending");

        store.insert(&draft("WI-2", "EXP-2")).await.expect("insert draft");

        let awaiting = store.list_awaiting_action().await.expect("list");
        assert_eq!(awaiting.len(), 1);
        assert_eq!(awaiting[0].id.0, "WI-1");
    }
}
