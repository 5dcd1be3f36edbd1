//! Connection pool handle.
//!
//! The [`Engine`] owns an r2d2 pool of [`AnyConnection`]s. Building it
//! never touches the database: connections are opened on first checkout and
//! pinged on every later checkout, so a connection the server dropped while
//! idle is replaced instead of handed out.

use std::time::Duration;

use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::prelude::*;
use diesel::r2d2::{HandleError, ManageConnection, Pool, PooledConnection, State};
use diesel::{ConnectionError, PgConnection, SqliteConnection};
use tracing::{info, trace, warn};

use crate::db::url::{Backend, ConnectTarget, DatabaseUrl};
use crate::error::Result;

/// A connection to whichever backend the URL names.
#[derive(diesel::MultiConnection)]
pub enum AnyConnection {
    Postgresql(PgConnection),
    Sqlite(SqliteConnection),
}

impl AnyConnection {
    #[must_use]
    pub fn backend(&self) -> Backend {
        match self {
            Self::Postgresql(_) => Backend::Postgres,
            Self::Sqlite(_) => Backend::Sqlite,
        }
    }

    /// Round-trip a trivial query.
    ///
    /// # Errors
    /// Returns the driver error if the connection is no longer usable.
    pub fn ping(&mut self) -> QueryResult<()> {
        match self {
            Self::Postgresql(conn) => diesel::sql_query("SELECT 1").execute(conn),
            Self::Sqlite(conn) => diesel::sql_query("SELECT 1").execute(conn),
        }
        .map(|_| ())
    }

    /// Whether a transaction is open. A transaction manager in an error
    /// state counts as open.
    pub fn in_transaction(&mut self) -> bool {
        let status = match self {
            Self::Postgresql(conn) => AnsiTransactionManager::transaction_manager_status_mut(conn),
            Self::Sqlite(conn) => AnsiTransactionManager::transaction_manager_status_mut(conn),
        };
        status
            .transaction_depth()
            .map_or(true, |depth| depth.is_some())
    }

    pub(crate) fn begin(&mut self) -> QueryResult<()> {
        match self {
            Self::Postgresql(conn) => AnsiTransactionManager::begin_transaction(conn),
            Self::Sqlite(conn) => AnsiTransactionManager::begin_transaction(conn),
        }
    }

    pub(crate) fn commit(&mut self) -> QueryResult<()> {
        match self {
            Self::Postgresql(conn) => AnsiTransactionManager::commit_transaction(conn),
            Self::Sqlite(conn) => AnsiTransactionManager::commit_transaction(conn),
        }
    }

    pub(crate) fn rollback(&mut self) -> QueryResult<()> {
        match self {
            Self::Postgresql(conn) => AnsiTransactionManager::rollback_transaction(conn),
            Self::Sqlite(conn) => AnsiTransactionManager::rollback_transaction(conn),
        }
    }
}

/// r2d2 manager that opens connections for a [`DatabaseUrl`].
///
/// The backend is picked from the URL scheme each time a connection is
/// opened, so an unusable URL fails at checkout rather than at startup.
#[derive(Debug, Clone)]
pub struct EngineConnectionManager {
    url: DatabaseUrl,
}

impl EngineConnectionManager {
    #[must_use]
    pub fn new(url: DatabaseUrl) -> Self {
        Self { url }
    }

    /// Open a connection outside the pool.
    ///
    /// # Errors
    /// Returns the driver's error, or `InvalidConnectionUrl` for a scheme
    /// no backend handles.
    pub fn open(&self) -> std::result::Result<AnyConnection, ConnectionError> {
        let conn = match self.url.connect_target()? {
            ConnectTarget::Postgres(uri) => {
                PgConnection::establish(&uri).map(AnyConnection::Postgresql)
            }
            ConnectTarget::Sqlite(path) => {
                SqliteConnection::establish(&path).map(AnyConnection::Sqlite)
            }
        }?;

        trace!(backend = %conn.backend(), "opened database connection");
        Ok(conn)
    }
}

impl ManageConnection for EngineConnectionManager {
    type Connection = AnyConnection;
    type Error = diesel::r2d2::Error;

    fn connect(&self) -> std::result::Result<AnyConnection, Self::Error> {
        self.open().map_err(diesel::r2d2::Error::ConnectionError)
    }

    fn is_valid(&self, conn: &mut AnyConnection) -> std::result::Result<(), Self::Error> {
        conn.ping().map_err(diesel::r2d2::Error::QueryError)
    }

    fn has_broken(&self, conn: &mut AnyConnection) -> bool {
        std::thread::panicking() || conn.in_transaction()
    }
}

/// Routes r2d2's background connection errors into `tracing`.
#[derive(Debug, Clone, Copy)]
struct TracingErrorHandler;

impl HandleError<diesel::r2d2::Error> for TracingErrorHandler {
    fn handle_error(&self, error: diesel::r2d2::Error) {
        warn!(error = %error, "database connection error");
    }
}

/// Pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of open connections.
    pub max_size: u32,
    /// Idle connections kept open; `Some(0)` keeps the pool fully lazy.
    pub min_idle: Option<u32>,
    /// How long a checkout waits for a connection.
    pub connection_timeout: Duration,
    /// Ping connections before handing them out.
    pub test_on_check_out: bool,
}

const DEFAULT_MAX_SIZE: u32 = 5;
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            min_idle: Some(0),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            test_on_check_out: true,
        }
    }
}

/// A checked-out connection; returns to the pool on drop.
pub type EngineConnection = PooledConnection<EngineConnectionManager>;

/// Shared connection pool bound to one [`DatabaseUrl`].
///
/// Cloning is cheap and every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct Engine {
    url: DatabaseUrl,
    manager: EngineConnectionManager,
    pool: Pool<EngineConnectionManager>,
}

impl Engine {
    /// Build the pool without opening any connection.
    #[must_use]
    pub fn new(url: DatabaseUrl, config: &PoolConfig) -> Self {
        let manager = EngineConnectionManager::new(url.clone());
        let pool = Pool::<EngineConnectionManager>::builder()
            .max_size(config.max_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .test_on_check_out(config.test_on_check_out)
            .error_handler(Box::new(TracingErrorHandler))
            .build_unchecked(manager.clone());

        info!(
            url = %url,
            backend = url.backend().map_or("unknown", Backend::as_str),
            max_size = config.max_size,
            "database engine configured"
        );

        Self { url, manager, pool }
    }

    #[must_use]
    pub fn url(&self) -> &DatabaseUrl {
        &self.url
    }

    /// Check a connection out of the pool.
    ///
    /// While the pool holds no connections, one is first opened directly so
    /// that an unreachable database or a rejected login fails right away
    /// with the driver's error instead of after the checkout timeout.
    ///
    /// # Errors
    /// [`Error::Connection`](crate::Error::Connection) when the database
    /// cannot be opened; a pool error when no connection frees up within the
    /// checkout timeout.
    pub fn connect(&self) -> Result<EngineConnection> {
        if self.pool.state().connections == 0 {
            drop(self.manager.open()?);
            trace!("database reachable, filling pool");
        }
        Ok(self.pool.get()?)
    }

    /// Check out a connection and ping it.
    ///
    /// # Errors
    /// Returns the pool or driver error if the database is unreachable.
    pub fn ping(&self) -> Result<()> {
        let mut conn = self.connect()?;
        conn.ping()?;
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.pool.state()
    }
}
