use futures::future::BoxFuture;
use sqlx::{
    migrate::MigrateDatabase,
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool, Pool, Postgres, Transaction,
};
use std::{str::FromStr, time::Duration};

use lesprivate_common::{AppError, DatabaseConfig};

pub type DbPool = Pool<Postgres>;

/// Transaction handle handed to [`Database::write`] closures.
pub type Tx = Transaction<'static, Postgres>;

pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool, AppError> {
    let connection_string = config.connection_string();

    // Create database if it doesn't exist
    if !Postgres::database_exists(&connection_string).await.unwrap_or(false) {
        tracing::info!("Creating database: {}", config.database);
        Postgres::create_database(&connection_string).await?;
    }

    connect(config).await
}

/// Connects without trying to create the database; used for read replicas.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, AppError> {
    let options = PgConnectOptions::from_str(&config.connection_string())?
        .options([("TimeZone", config.timezone.as_str())]);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    tracing::info!(host = %config.host, database = %config.database, "Database connection established");
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Read/write split over Postgres.
///
/// Reads go to the replica when one is configured. Every multi-row mutation goes
/// through [`Database::write`], which owns the transaction: the closure's `Ok`
/// commits, an `Err` rolls back, and a panic drops the transaction which rolls
/// back as well. Helpers that must join an open transaction take
/// `&mut PgConnection` (pass `&mut **tx`), so nested work shares the outermost
/// transaction instead of opening its own.
#[derive(Clone)]
pub struct Database {
    writer: PgPool,
    reader: Option<PgPool>,
    max_retries: u32,
}

impl Database {
    pub fn new(writer: PgPool, reader: Option<PgPool>, max_retries: u32) -> Self {
        Self {
            writer,
            reader,
            max_retries,
        }
    }

    pub fn writer(&self) -> &PgPool {
        &self.writer
    }

    pub fn reader(&self) -> &PgPool {
        self.reader.as_ref().unwrap_or(&self.writer)
    }

    /// Runs `op` inside one transaction. Deadlocks and serialization failures
    /// replay the whole closure, up to `max_retries` extra attempts.
    pub async fn write<T, F>(&self, mut op: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut Tx) -> BoxFuture<'t, Result<T, AppError>> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut tx = self.writer.begin().await?;

            let outcome = op(&mut tx).await;
            let result = match outcome {
                Ok(value) => tx.commit().await.map(|_| value).map_err(AppError::from),
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(error = %rollback_err, "Rollback failed");
                    }
                    Err(err)
                }
            };

            match result {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %err, "Retrying transaction");
                    tokio::time::sleep(Duration::from_millis(20 * (1u64 << attempt.min(6)))).await;
                }
                other => return other,
            }
        }
    }
}
