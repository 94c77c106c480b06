use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use flowgate_core::domain::workflow::{
    CommentPolicy, FieldSpec, FieldType, WorkflowCategory, WorkflowDefinition, WorkflowForm,
    WorkflowId,
};

use super::{RepositoryError, WorkflowStore};
use crate::DbPool;

pub struct SqlWorkflowStore {
    pool: DbPool,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_definition(
        &self,
        row: SqliteRow,
    ) -> Result<WorkflowDefinition, RepositoryError> {
        let workflow_id: String = row.try_get("id")?;

        let form_rows = sqlx::query(
            "SELECT id, name, display_order
             FROM workflow_form
             WHERE workflow_id = ?
             ORDER BY display_order ASC",
        )
        .bind(&workflow_id)
        .fetch_all(&self.pool)
        .await?;

        let mut forms = Vec::with_capacity(form_rows.len());
        for form_row in form_rows {
            let form_id: String = form_row.try_get("id")?;
            let field_rows = sqlx::query(
                "SELECT name, label, field_type, is_mandatory, is_amount, is_title,
                        min_length, max_length, display_order, field_group
                 FROM workflow_field
                 WHERE form_id = ?
                 ORDER BY display_order ASC",
            )
            .bind(&form_id)
            .fetch_all(&self.pool)
            .await?;

            let fields =
                field_rows.into_iter().map(field_from_row).collect::<Result<Vec<_>, _>>()?;

            forms.push(WorkflowForm {
                name: form_row.try_get("name")?,
                display_order: parse_u32("display_order", form_row.try_get("display_order")?)?,
                fields,
            });
        }

        definition_from_row(&row, forms)
    }
}

#[async_trait::async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn workflow_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, code, description, category, requires_approval, is_published,
                    is_active, version_number, comments_mandatory, comments_mandatory_on_reject,
                    comments_mandatory_on_escalate
             FROM workflow WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_definition(row).await?)),
            None => Ok(None),
        }
    }

    async fn workflow_by_code(
        &self,
        code: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, code, description, category, requires_approval, is_published,
                    is_active, version_number, comments_mandatory, comments_mandatory_on_reject,
                    comments_mandatory_on_escalate
             FROM workflow WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_definition(row).await?)),
            None => Ok(None),
        }
    }

    async fn save_workflow(&self, workflow: WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow (
                id, name, code, description, category, requires_approval, is_published,
                is_active, version_number, comments_mandatory, comments_mandatory_on_reject,
                comments_mandatory_on_escalate
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                code = excluded.code,
                description = excluded.description,
                category = excluded.category,
                requires_approval = excluded.requires_approval,
                is_published = excluded.is_published,
                is_active = excluded.is_active,
                version_number = excluded.version_number,
                comments_mandatory = excluded.comments_mandatory,
                comments_mandatory_on_reject = excluded.comments_mandatory_on_reject,
                comments_mandatory_on_escalate = excluded.comments_mandatory_on_escalate",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.name)
        .bind(&workflow.code)
        .bind(workflow.description.as_deref())
        .bind(workflow.category.as_str())
        .bind(workflow.requires_approval)
        .bind(workflow.is_published)
        .bind(workflow.is_active)
        .bind(i64::from(workflow.version_number))
        .bind(workflow.comment_policy.always)
        .bind(workflow.comment_policy.on_reject)
        .bind(workflow.comment_policy.on_escalate)
        .execute(&mut *tx)
        .await?;

        // Forms and fields are replaced wholesale; the definition is
        // immutable per version, so partial form updates never happen.
        sqlx::query("DELETE FROM workflow_field WHERE workflow_id = ?")
            .bind(&workflow.id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM workflow_form WHERE workflow_id = ?")
            .bind(&workflow.id.0)
            .execute(&mut *tx)
            .await?;

        for form in &workflow.forms {
            let form_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO workflow_form (id, workflow_id, name, display_order)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&form_id)
            .bind(&workflow.id.0)
            .bind(&form.name)
            .bind(i64::from(form.display_order))
            .execute(&mut *tx)
            .await?;

            for field in &form.fields {
                sqlx::query(
                    "INSERT INTO workflow_field (
                        id, form_id, workflow_id, name, label, field_type, is_mandatory,
                        is_amount, is_title, min_length, max_length, display_order, field_group
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&form_id)
                .bind(&workflow.id.0)
                .bind(&field.name)
                .bind(&field.label)
                .bind(field.field_type.as_str())
                .bind(field.is_mandatory)
                .bind(field.is_amount)
                .bind(field.is_title)
                .bind(field.min_length.map(i64::from))
                .bind(field.max_length.map(i64::from))
                .bind(i64::from(field.display_order))
                .bind(field.group.as_deref())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

fn definition_from_row(
    row: &SqliteRow,
    forms: Vec<WorkflowForm>,
) -> Result<WorkflowDefinition, RepositoryError> {
    let category_raw: String = row.try_get("category")?;
    let category = WorkflowCategory::parse(&category_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown workflow category `{category_raw}`"))
    })?;

    Ok(WorkflowDefinition {
        id: WorkflowId(row.try_get("id")?),
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        description: row.try_get("description")?,
        category,
        requires_approval: row.try_get("requires_approval")?,
        is_published: row.try_get("is_published")?,
        is_active: row.try_get("is_active")?,
        version_number: parse_u32("version_number", row.try_get("version_number")?)?,
        comment_policy: CommentPolicy {
            always: row.try_get("comments_mandatory")?,
            on_reject: row.try_get("comments_mandatory_on_reject")?,
            on_escalate: row.try_get("comments_mandatory_on_escalate")?,
        },
        forms,
    })
}

fn field_from_row(row: SqliteRow) -> Result<FieldSpec, RepositoryError> {
    let field_type_raw: String = row.try_get("field_type")?;
    let field_type = FieldType::parse(&field_type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown field type `{field_type_raw}`")))?;

    Ok(FieldSpec {
        name: row.try_get("name")?,
        label: row.try_get("label")?,
        field_type,
        is_mandatory: row.try_get("is_mandatory")?,
        is_amount: row.try_get("is_amount")?,
        is_title: row.try_get("is_title")?,
        min_length: row.try_get::<Option<i64>, _>("min_length")?.map(|v| v as u32),
        max_length: row.try_get::<Option<i64>, _>("max_length")?.map(|v| v as u32),
        display_order: parse_u32("display_order", row.try_get("display_order")?)?,
        group: row.try_get("field_group")?,
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use flowgate_core::domain::workflow::{
        CommentPolicy, FieldSpec, FieldType, WorkflowCategory, WorkflowDefinition, WorkflowForm,
        WorkflowId,
    };

    use super::SqlWorkflowStore;
    use crate::repositories::WorkflowStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_workflow() -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId("WF-EXP".to_string()),
            name: "Expense Approval".to_string(),
            code: "EXP".to_string(),
            description: Some("Reimbursement requests".to_string()),
            category: WorkflowCategory::Financial,
            requires_approval: true,
            is_published: true,
            is_active: true,
            version_number: 1,
            comment_policy: CommentPolicy { always: false, on_reject: true, on_escalate: true },
            forms: vec![WorkflowForm {
                name: "Details".to_string(),
                display_order: 0,
                fields: vec![
                    FieldSpec {
                        name: "amount".to_string(),
                        label: "Amount".to_string(),
                        field_type: FieldType::Number,
                        is_mandatory: true,
                        is_amount: true,
                        is_title: false,
                        min_length: None,
                        max_length: None,
                        display_order: 0,
                        group: None,
                    },
                    FieldSpec {
                        name: "purpose".to_string(),
                        label: "Purpose".to_string(),
                        field_type: FieldType::Text,
                        is_mandatory: true,
                        is_amount: false,
                        is_title: true,
                        min_length: Some(3),
                        max_length: Some(120),
                        display_order: 1,
                        group: Some("General".to_string()),
                    },
                ],
            }],
        }
    }

    #[tokio::test]
    async fn save_and_load_round_trips_the_form_tree() {
        let pool = setup().await;
        let store = SqlWorkflowStore::new(pool);
        let workflow = sample_workflow();

        store.save_workflow(workflow.clone()).await.expect("save");

        let by_id = store
            .workflow_by_id(&workflow.id)
            .await
            .expect("load by id")
            .expect("workflow exists");
        assert_eq!(by_id, workflow);

        let by_code =
            store.workflow_by_code("EXP").await.expect("load by code").expect("workflow exists");
        assert_eq!(by_code.id, workflow.id);
        assert_eq!(by_code.forms[0].fields.len(), 2);
    }

    #[tokio::test]
    async fn save_replaces_forms_on_version_update() {
        let pool = setup().await;
        let store = SqlWorkflowStore::new(pool);
        let mut workflow = sample_workflow();

        store.save_workflow(workflow.clone()).await.expect("save v1");

        workflow.version_number = 2;
        workflow.forms[0].fields.pop();
        store.save_workflow(workflow.clone()).await.expect("save v2");

        let loaded =
            store.workflow_by_id(&workflow.id).await.expect("load").expect("workflow exists");
        assert_eq!(loaded.version_number, 2);
        assert_eq!(loaded.forms[0].fields.len(), 1);
    }

    #[tokio::test]
    async fn unknown_workflow_resolves_to_none() {
        let pool = setup().await;
        let store = SqlWorkflowStore::new(pool);

        let missing = store.workflow_by_code("NOPE").await.expect("query");
        assert!(missing.is_none());
    }
}
