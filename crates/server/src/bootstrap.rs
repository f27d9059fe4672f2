use std::sync::Arc;

use enrolla_core::config::{AppConfig, ConfigError};
use enrolla_core::notify::{NoopNotificationSender, NotificationSender};
use enrolla_core::services::{CommerceServices, CommerceSettings, ServiceDeps};
use enrolla_db::{connect_from_config, migrations, DbPool, SqlCommerceStore};
use thiserror::Error;
use tracing::info;

use crate::notifier::{HttpNotificationSender, NotifierError};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Arc<CommerceServices<SqlCommerceStore>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notification transport setup failed: {0}")]
    Notifier(#[from] NotifierError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let notifier: Arc<dyn NotificationSender> = if config.notifications.enabled {
        Arc::new(HttpNotificationSender::from_config(&config.notifications)?)
    } else {
        Arc::new(NoopNotificationSender)
    };
    info!(
        event_name = "system.bootstrap.notifier_ready",
        correlation_id = "bootstrap",
        transport = if config.notifications.enabled { "http" } else { "noop" },
        "notification transport initialized"
    );

    let store = Arc::new(SqlCommerceStore::new(db_pool.clone()));
    let deps = ServiceDeps::new(store)
        .with_notifier(notifier)
        .with_settings(CommerceSettings::from(&config));

    Ok(Application { config, db_pool, services: Arc::new(CommerceServices::new(deps)) })
}

#[cfg(test)]
mod tests {
    use enrolla_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_a_short_webhook_secret() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                webhook_secret: Some("too-short".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("payments.webhook_secret"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_applies_the_commerce_schema() {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}", dir.path().join("enrolla.db").display());
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(url),
                webhook_secret: Some("whsec-test-secret-0001".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('customer_order', 'invoice', 'ticket', 'waitlist_entry')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected commerce tables after bootstrap");
        assert_eq!(table_count, 4);

        app.db_pool.close().await;
    }
}
