//! Diesel connection pool management for SQLite.
//!
//! Diesel on SQLite is synchronous, so operations run on r2d2 pooled
//! connections wrapped in spawn_blocking.

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use std::path::Path;
use std::time::Duration;

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// r2d2 pool error type alias.
pub type R2D2Error = diesel::r2d2::PoolError;

/// Connection pool for SQLite using r2d2.
pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// Pooled connection type.
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Tunables for the pool and for each connection.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_size: u32,
    pub connection_timeout: Duration,
    /// How long a writer waits for the database lock before failing.
    pub busy_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 10,
            connection_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Applies [`init_connection_pragmas`] whenever r2d2 opens a connection.
#[derive(Debug, Clone, Copy)]
struct ConnectionPragmas {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        init_connection_pragmas(conn, self.busy_timeout).map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Create a Diesel connection pool for SQLite.
pub fn create_diesel_pool(db_path: &Path) -> Result<SqlitePool, R2D2Error> {
    let db_url = format!("sqlite:{}", db_path.display());
    create_diesel_pool_from_url(&db_url)
}

/// Create a Diesel connection pool from a database URL.
pub fn create_diesel_pool_from_url(database_url: &str) -> Result<SqlitePool, R2D2Error> {
    create_diesel_pool_with_options(database_url, PoolOptions::default())
}

/// Create a Diesel connection pool from a database URL with explicit options.
pub fn create_diesel_pool_with_options(
    database_url: &str,
    options: PoolOptions,
) -> Result<SqlitePool, R2D2Error> {
    // Strip "sqlite:" prefix if present for Diesel
    let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

    let manager = ConnectionManager::<SqliteConnection>::new(url);

    Pool::builder()
        .max_size(options.max_size)
        .connection_timeout(options.connection_timeout)
        .connection_customizer(Box::new(ConnectionPragmas {
            busy_timeout: options.busy_timeout,
        }))
        .build(manager)
}

/// Initialize SQLite pragmas for a connection.
pub fn init_connection_pragmas(
    conn: &mut SqliteConnection,
    busy_timeout: Duration,
) -> Result<(), DieselError> {
    diesel::sql_query(format!("PRAGMA busy_timeout = {}", busy_timeout.as_millis())).execute(conn)?;
    diesel::sql_query("PRAGMA journal_mode = WAL").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous = NORMAL").execute(conn)?;
    // Cascades and ON DELETE SET NULL depend on this.
    diesel::sql_query("PRAGMA foreign_keys = ON").execute(conn)?;
    diesel::sql_query("PRAGMA temp_store = MEMORY").execute(conn)?;
    Ok(())
}

/// Run a blocking Diesel operation asynchronously.
///
/// Pool checkout failures and panics in the closure surface as
/// `DieselError::DatabaseError`, converted into the caller's error type.
///
/// # Example
/// ```ignore
/// let restaurant = run_blocking(pool.clone(), move |conn| {
///     restaurants::table.find(id).first::<RestaurantRecord>(conn)
/// }).await?;
/// ```
pub async fn run_blocking<F, T, E>(pool: SqlitePool, f: F) -> Result<T, E>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<DieselError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|e| E::from(unknown_database_error(e)))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| E::from(unknown_database_error(e)))?
}

fn unknown_database_error(e: impl ToString) -> DieselError {
    DieselError::DatabaseError(
        diesel::result::DatabaseErrorKind::Unknown,
        Box::new(e.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::sql_types::Integer;
    use tempfile::tempdir;

    #[derive(QueryableByName)]
    struct ForeignKeys {
        #[diesel(sql_type = Integer)]
        foreign_keys: i32,
    }

    #[tokio::test]
    async fn pooled_connections_enforce_foreign_keys() {
        let dir = tempdir().unwrap();
        let pool = create_diesel_pool(&dir.path().join("pool.db")).unwrap();

        let enabled = run_blocking(pool, |conn| {
            let row: ForeignKeys = diesel::sql_query("PRAGMA foreign_keys").get_result(conn)?;
            Ok::<_, DieselError>(row.foreign_keys)
        })
        .await
        .unwrap();

        assert_eq!(enabled, 1);
    }
}
