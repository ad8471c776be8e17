use std::sync::Arc;

use sarpras_core::config::{AppConfig, ConfigError};
use sarpras_core::workflow::ApprovalService;
use sarpras_db::{
    connect, migrations, DbPool, SqlResourceRepository, SqlTokenStore, SqlUserDirectory,
    SqlWorkflowStore,
};
use sarpras_whatsapp::{notifier_from_config, TransportError};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: ApprovalService,
    pub resources: SqlResourceRepository,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("whatsapp transport could not be built: {0}")]
    Notifier(#[source] TransportError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let notifier = notifier_from_config(&config.whatsapp).map_err(BootstrapError::Notifier)?;
    let service = ApprovalService::from_config(
        Arc::new(SqlWorkflowStore::new(db_pool.clone())),
        Arc::new(SqlUserDirectory::new(db_pool.clone())),
        Arc::new(SqlTokenStore::new(db_pool.clone())),
        notifier,
        &config.approval,
    )?;
    info!(
        event_name = "system.bootstrap.service_ready",
        correlation_id = "bootstrap",
        whatsapp_enabled = config.whatsapp.enabled,
        timezone = %service.timezone(),
        "approval service assembled"
    );

    Ok(Application {
        resources: SqlResourceRepository::new(db_pool.clone()),
        config,
        db_pool,
        service,
    })
}
