use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use flowgate_core::domain::actor::UserId;
use flowgate_core::domain::approver::{ApproverEntry, ApproverEntryId};
use flowgate_core::domain::workflow::WorkflowId;

use super::workflow::parse_u32;
use super::{ApproverChainStore, RepositoryError};
use crate::DbPool;

pub struct SqlApproverChainStore {
    pool: DbPool,
}

impl SqlApproverChainStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const ENTRY_COLUMNS: &str = "id, workflow_id, user_id, approver_name, approver_email, level,
    approval_limit, is_unlimited, can_escalate, escalation_timeout_hours,
    notify_on_pending, notify_on_approval, notify_on_rejection, display_order";

#[async_trait::async_trait]
impl ApproverChainStore for SqlApproverChainStore {
    async fn entries_for(
        &self,
        workflow_id: &WorkflowId,
        level: u32,
    ) -> Result<Vec<ApproverEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM workflow_approver
             WHERE workflow_id = ? AND level = ?
             ORDER BY display_order ASC, id ASC",
        ))
        .bind(&workflow_id.0)
        .bind(i64::from(level))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn max_level(&self, workflow_id: &WorkflowId) -> Result<Option<u32>, RepositoryError> {
        let row = sqlx::query(
            "SELECT MAX(level) AS max_level FROM workflow_approver WHERE workflow_id = ?",
        )
        .bind(&workflow_id.0)
        .fetch_one(&self.pool)
        .await?;

        row.try_get::<Option<i64>, _>("max_level")?
            .map(|level| parse_u32("max_level", level))
            .transpose()
    }

    async fn entry_by_id(
        &self,
        id: &ApproverEntryId,
    ) -> Result<Option<ApproverEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM workflow_approver WHERE id = ?",
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn entry_for_user(
        &self,
        workflow_id: &WorkflowId,
        user_id: &UserId,
    ) -> Result<Option<ApproverEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM workflow_approver
             WHERE workflow_id = ? AND user_id = ?
             ORDER BY level ASC, display_order ASC
             LIMIT 1",
        ))
        .bind(&workflow_id.0)
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn save_entry(&self, entry: ApproverEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO workflow_approver (
                id, workflow_id, user_id, approver_name, approver_email, level,
                approval_limit, is_unlimited, can_escalate, escalation_timeout_hours,
                notify_on_pending, notify_on_approval, notify_on_rejection, display_order
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                workflow_id = excluded.workflow_id,
                user_id = excluded.user_id,
                approver_name = excluded.approver_name,
                approver_email = excluded.approver_email,
                level = excluded.level,
                approval_limit = excluded.approval_limit,
                is_unlimited = excluded.is_unlimited,
                can_escalate = excluded.can_escalate,
                escalation_timeout_hours = excluded.escalation_timeout_hours,
                notify_on_pending = excluded.notify_on_pending,
                notify_on_approval = excluded.notify_on_approval,
                notify_on_rejection = excluded.notify_on_rejection,
                display_order = excluded.display_order",
        )
        .bind(&entry.id.0)
        .bind(&entry.workflow_id.0)
        .bind(entry.user_id.as_ref().map(|id| id.0.as_str()))
        .bind(&entry.approver_name)
        .bind(&entry.approver_email)
        .bind(i64::from(entry.level))
        .bind(entry.approval_limit.map(|limit| limit.to_string()))
        .bind(entry.is_unlimited)
        .bind(entry.can_escalate)
        .bind(entry.escalation_timeout_hours.map(i64::from))
        .bind(entry.notify_on_pending)
        .bind(entry.notify_on_approval)
        .bind(entry.notify_on_rejection)
        .bind(i64::from(entry.display_order))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn entry_from_row(row: SqliteRow) -> Result<ApproverEntry, RepositoryError> {
    let approval_limit = row
        .try_get::<Option<String>, _>("approval_limit")?
        .map(|raw| {
            raw.parse::<Decimal>().map_err(|_| {
                RepositoryError::Decode(format!("invalid approval_limit value `{raw}`"))
            })
        })
        .transpose()?;

    Ok(ApproverEntry {
        id: ApproverEntryId(row.try_get("id")?),
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        user_id: row.try_get::<Option<String>, _>("user_id")?.map(UserId),
        approver_name: row.try_get("approver_name")?,
        approver_email: row.try_get("approver_email")?,
        level: parse_u32("level", row.try_get("level")?)?,
        approval_limit,
        is_unlimited: row.try_get("is_unlimited")?,
        can_escalate: row.try_get("can_escalate")?,
        escalation_timeout_hours: row
            .try_get::<Option<i64>, _>("escalation_timeout_hours")?
            .map(|hours| parse_u32("escalation_timeout_hours", hours))
            .transpose()?,
        notify_on_pending: row.try_get("notify_on_pending")?,
        notify_on_approval: row.try_get("notify_on_approval")?,
        notify_on_rejection: row.try_get("notify_on_rejection")?,
        display_order: parse_u32("display_order", row.try_get("display_order")?)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use flowgate_core::domain::actor::UserId;
    use flowgate_core::domain::approver::{ApproverEntry, ApproverEntryId};
    use flowgate_core::domain::workflow::WorkflowId;

    use super::SqlApproverChainStore;
    use crate::fixtures::seed_bare_workflow;
    use crate::repositories::ApproverChainStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        seed_bare_workflow(&pool, "WF-EXP", "EXP").await;
        pool
    }

    fn entry(id: &str, level: u32, order: u32, limit: Option<Decimal>) -> ApproverEntry {
        ApproverEntry {
            id: ApproverEntryId(id.to_string()),
            workflow_id: WorkflowId("WF-EXP".to_string()),
            user_id: Some(UserId(format!("U-{id}"))),
            approver_name: format!("Approver {id}"),
            approver_email: format!("{id}@example.com"),
            level,
            approval_limit: limit,
            is_unlimited: limit.is_none(),
            can_escalate: true,
            escalation_timeout_hours: Some(24),
            notify_on_pending: true,
            notify_on_approval: false,
            notify_on_rejection: true,
            display_order: order,
        }
    }

    #[tokio::test]
    async fn entries_for_level_come_back_in_display_order() {
        let pool = setup().await;
        let store = SqlApproverChainStore::new(pool);

        store.save_entry(entry("b", 1, 1, None)).await.expect("save b");
        store.save_entry(entry("a", 1, 0, Some(Decimal::new(500_00, 2)))).await.expect("save a");
        store.save_entry(entry("c", 2, 0, None)).await.expect("save c");

        let level_one =
            store.entries_for(&WorkflowId("WF-EXP".to_string()), 1).await.expect("entries");
        assert_eq!(
            level_one.iter().map(|e| e.id.0.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(level_one[0].approval_limit, Some(Decimal::new(500_00, 2)));
    }

    #[tokio::test]
    async fn max_level_reflects_the_deepest_configured_level() {
        let pool = setup().await;
        let store = SqlApproverChainStore::new(pool);
        let workflow_id = WorkflowId("WF-EXP".to_string());

        assert_eq!(store.max_level(&workflow_id).await.expect("empty"), None);

        store.save_entry(entry("a", 1, 0, None)).await.expect("save a");
        store.save_entry(entry("c", 3, 0, None)).await.expect("save c");

        assert_eq!(store.max_level(&workflow_id).await.expect("max"), Some(3));
    }

    #[tokio::test]
    async fn entry_for_user_finds_the_lowest_level_assignment() {
        let pool = setup().await;
        let store = SqlApproverChainStore::new(pool);

        let mut high = entry("x", 3, 0, None);
        high.user_id = Some(UserId("U-7".to_string()));
        let mut low = entry("y", 2, 0, None);
        low.user_id = Some(UserId("U-7".to_string()));
        store.save_entry(high).await.expect("save high");
        store.save_entry(low).await.expect("save low");

        let found = store
            .entry_for_user(&WorkflowId("WF-EXP".to_string()), &UserId("U-7".to_string()))
            .await
            .expect("query")
            .expect("entry exists");
        assert_eq!(found.level, 2);
    }
}
