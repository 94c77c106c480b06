use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use flowgate_core::audit::TracingAuditSink;
use flowgate_core::config::{AppConfig, ConfigError, LoadOptions};
use flowgate_core::notify::{NoopNotificationSink, NotificationSink};
use flowgate_db::repositories::{
    SqlApproverChainStore, SqlInstanceStore, SqlTokenStore, SqlWorkflowStore,
};
use flowgate_db::{connect_with_settings, migrations, DbPool};

use crate::engine::{ApprovalEngine, EngineSettings};
use crate::gateway::EmailActionGateway;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<ApprovalEngine>,
    pub gateway: Arc<EmailActionGateway>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Wires the SQL stores, audit and notification sinks into a ready engine.
/// The notification sink defaults to a no-op; installations with a mail
/// transport swap it via `bootstrap_with_sinks`.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    bootstrap_with_sinks(config, Arc::new(NoopNotificationSink)).await
}

pub async fn bootstrap_with_sinks(
    config: AppConfig,
    notifier: Arc<dyn NotificationSink>,
) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let engine = Arc::new(ApprovalEngine::new(
        Arc::new(SqlWorkflowStore::new(db_pool.clone())),
        Arc::new(SqlApproverChainStore::new(db_pool.clone())),
        Arc::new(SqlInstanceStore::new(db_pool.clone())),
        Arc::new(SqlTokenStore::new(db_pool.clone())),
        Arc::new(TracingAuditSink),
        notifier,
        EngineSettings::from(&config),
    ));
    let gateway = Arc::new(EmailActionGateway::new(engine.clone()));

    Ok(Application { config, db_pool, engine, gateway })
}
