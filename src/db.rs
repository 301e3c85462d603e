use crate::config::ReportingConfig;
use crate::errors::StoreFault;
use async_trait::async_trait;
use metrics::{counter, gauge};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&ReportingConfig> for DbConfig {
    fn from(cfg: &ReportingConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the record store with custom configuration
///
/// # Errors
/// Returns the driver error if the pool cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, DbErr> {
    debug!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Configuring database connection"
    );

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("sales_reports.db.max_connections", config.max_connections as f64);

    let pool = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "Database connection establishment failed");
        counter!("sales_reports.db.connection_failures", 1);
        e
    })?;

    info!("Database connection pool established successfully");
    Ok(pool)
}

/// Establish DB pool using the reporting configuration
pub async fn establish_connection_from_config(cfg: &ReportingConfig) -> Result<DbPool, DbErr> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Hands out connections that are exclusively owned by one in-flight attempt.
///
/// A connection obtained from [`acquire`](ConnectionSource::acquire) is never handed out
/// again once released. Implementations must also return it to the underlying pool when
/// it is dropped without being released, which happens if the caller is cancelled mid-query.
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    type Connection: Send + Sync;

    async fn acquire(&self) -> Result<Self::Connection, StoreFault>;

    async fn release(&self, conn: Self::Connection);
}

/// Connection source over a sea-orm pool.
///
/// Every attempt runs inside its own transaction, which pins one pooled connection for
/// the attempt. Releasing rolls it back, since the reporting queries never write.
#[derive(Debug)]
pub struct PooledSource {
    pool: DbPool,
}

impl PooledSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionSource for PooledSource {
    type Connection = DatabaseTransaction;

    async fn acquire(&self) -> Result<DatabaseTransaction, StoreFault> {
        self.pool.begin().await.map_err(StoreFault::from)
    }

    async fn release(&self, conn: DatabaseTransaction) {
        if let Err(e) = conn.rollback().await {
            // The pool discards a connection whose rollback failed.
            warn!(error = %e, "Failed to roll back reporting transaction");
        }
    }
}
