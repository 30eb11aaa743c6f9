use std::fmt::Debug;
use std::path::Path;

use diesel::connection::SimpleConnection;
use diesel::r2d2::ConnectionManager;
use diesel::{Connection, SqliteConnection};
use r2d2::{CustomizeConnection, Pool};

pub type PoolType = Pool<ConnectionManager<SqliteConnection>>;
pub type ConnType = SqliteConnection;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Database connection error: {0}")]
    PoolError(#[from] r2d2::Error),
    #[error("Database query error: {0}")]
    DieselError(#[from] diesel::result::Error),
    #[error("Runtime error: {0}")]
    RuntimeError(#[from] tokio::task::JoinError),
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

/// Trait for objects that can be constructed from a connection pool.
/// Gives the `db.as_dao::<SomeDao>()` accessor on `DbExecutor`.
pub trait AsDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self;
}

#[derive(Clone)]
pub struct DbExecutor {
    pub pool: PoolType,
}

impl DbExecutor {
    pub fn new<S: Into<String>>(database_url: S) -> Result<Self, Error> {
        let database_url = database_url.into();
        log::info!("Using database at: {}", database_url);
        let manager = ConnectionManager::new(database_url);
        let pool = Pool::builder()
            .connection_customizer(Box::new(ConnectionInit))
            .build(manager)?;
        Ok(DbExecutor { pool })
    }

    pub fn from_data_dir(data_dir: &Path, name: &str) -> Result<Self, Error> {
        let db = data_dir.join(name).with_extension("db");
        Self::new(db.to_string_lossy())
    }

    /// Private in-memory database. Backed by a shared-cache uri so that
    /// every pooled connection sees the same data; lives as long as the pool
    /// keeps at least one connection open.
    pub fn in_memory() -> Result<Self, Error> {
        Self::new(format!(
            "file:{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().to_simple()
        ))
    }

    pub fn as_dao<'a, T: AsDao<'a>>(&'a self) -> T {
        AsDao::as_dao(&self.pool)
    }

    pub fn apply_migration<T, E>(&self, migration: T) -> anyhow::Result<()>
    where
        T: FnOnce(&ConnType) -> Result<(), E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let conn = self.pool.get()?;
        migration(&conn)?;
        Ok(())
    }

    pub async fn with_transaction<R, Error, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        Error: Send + 'static + From<crate::executor::Error> + From<diesel::result::Error>,
        F: FnOnce(&ConnType) -> Result<R, Error> + Send + 'static,
    {
        do_with_transaction(&self.pool, f).await
    }
}

/// Runs a blocking database closure inside a transaction on the tokio
/// blocking pool. Any error returned by the closure rolls the transaction
/// back.
pub async fn do_with_transaction<R, Error, F>(pool: &PoolType, f: F) -> Result<R, Error>
where
    R: Send + 'static,
    Error: Send + 'static + From<crate::executor::Error> + From<diesel::result::Error>,
    F: FnOnce(&ConnType) -> Result<R, Error> + Send + 'static,
{
    let pool = pool.clone();
    match tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| Error::from(crate::executor::Error::PoolError(e)))?;
        conn.transaction(|| f(&conn))
    })
    .await
    {
        Ok(result) => result,
        Err(join_err) => Err(crate::executor::Error::RuntimeError(join_err).into()),
    }
}

/// Like `do_with_transaction` but without opening an explicit transaction.
/// For read-only queries where a consistent snapshot is not required.
pub async fn readonly_transaction<R, Error, F>(pool: &PoolType, f: F) -> Result<R, Error>
where
    R: Send + 'static,
    Error: Send + 'static + From<crate::executor::Error>,
    F: FnOnce(&ConnType) -> Result<R, Error> + Send + 'static,
{
    let pool = pool.clone();
    match tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| Error::from(crate::executor::Error::PoolError(e)))?;
        f(&conn)
    })
    .await
    {
        Ok(result) => result,
        Err(join_err) => Err(crate::executor::Error::RuntimeError(join_err).into()),
    }
}

#[derive(Debug)]
struct ConnectionInit;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionInit {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "\
            PRAGMA journal_mode = WAL;\
            PRAGMA synchronous = NORMAL;\
            PRAGMA foreign_keys = ON;\
            PRAGMA busy_timeout = 15000;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}
