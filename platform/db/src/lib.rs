//! Database primitives shared by the engine and the server.

mod directory;
mod scope;

pub use directory::DbDirectory;
pub use scope::{ScopeError, TenantScope, TenantScoped};

use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction, DbErr, Statement, TransactionTrait,
};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to connect to database")]
    Connect(#[source] DbErr),
}

pub type DbResult<T> = Result<T, DbError>;

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub sqlx_logging: bool,
}

impl DatabaseSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: None,
            sqlx_logging: false,
        }
    }
}

pub async fn connect(settings: &DatabaseSettings) -> DbResult<DatabaseConnection> {
    let mut options = ConnectOptions::new(settings.url.clone());
    options
        .connect_timeout(Duration::from_secs(5))
        .sqlx_logging(settings.sqlx_logging);
    if let Some(max) = settings.max_connections {
        options.max_connections(max);
    }
    Database::connect(options).await.map_err(DbError::Connect)
}

/// Opens a transaction with `app.current_tenant` set for its lifetime, so
/// Postgres row-level security policies see the tenant. On other backends it
/// is a plain transaction and only the query-level filter applies.
pub async fn with_tenant(db: &DatabaseConnection, tenant: Uuid) -> Result<DatabaseTransaction, DbErr> {
    let txn = db.begin().await?;
    if txn.get_database_backend() == DatabaseBackend::Postgres {
        txn.execute(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT set_config('app.current_tenant', $1, true)",
            [tenant.to_string().into()],
        ))
        .await?;
    }
    Ok(txn)
}
