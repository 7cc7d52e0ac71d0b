use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge, histogram};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub type DbPool = DatabaseConnection;

/// Pool tuning, usually derived from `AppConfig`.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
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

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
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

/// Opens the sea-orm pool. SQL statement logging stays off; request spans
/// already carry the timing.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!(max = config.max_connections, min = config.min_connections, "opening settlement pool");

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("settlement_db.max_connections", config.max_connections as f64);

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "could not open settlement pool");
        ServiceError::DatabaseError(e)
    })?;

    info!(backend = backend_name(&db_pool), "settlement pool ready");
    Ok(db_pool)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&DbConfig::from(cfg)).await
}

/// Opens a unit of work. Dropping the returned transaction without
/// committing rolls every write back.
pub async fn begin(pool: &DbPool) -> Result<DatabaseTransaction, ServiceError> {
    counter!("settlement_db.transaction.started", 1);
    pool.begin().await.map_err(ServiceError::db_error)
}

/// Commits a unit of work, recording how long it stayed open.
pub async fn commit(txn: DatabaseTransaction, started: Instant) -> Result<(), ServiceError> {
    let result = txn.commit().await.map_err(ServiceError::db_error);
    histogram!("settlement_db.transaction.duration", started.elapsed());
    match &result {
        Ok(_) => {
            counter!("settlement_db.transaction.committed", 1);
        }
        Err(_) => {
            counter!("settlement_db.transaction.failed", 1);
        }
    }
    result
}

/// Runs database migrations
///
/// # Errors
/// Returns a `ServiceError` if migrations fail to execute
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    let start = Instant::now();

    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!(?elapsed, "settlement schema up to date"),
        Err(e) => error!(?elapsed, error = %e, "settlement schema migration failed"),
    }

    result
}

/// Round-trips a ping; used by the readiness probe.
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    let start = Instant::now();
    let result = pool.ping().await.map_err(ServiceError::DatabaseError);

    match &result {
        Ok(_) => debug!("Database connection check successful in {:?}", start.elapsed()),
        Err(e) => {
            error!("Database connection check failed: {}", e);
            counter!("settlement_db.connection_failures", 1);
        }
    }

    result
}

/// Backend name, used by health reporting.
pub fn backend_name(pool: &DbPool) -> &'static str {
    match pool.get_database_backend() {
        sea_orm::DbBackend::Postgres => "postgres",
        sea_orm::DbBackend::MySql => "mysql",
        sea_orm::DbBackend::Sqlite => "sqlite",
    }
}
