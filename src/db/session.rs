//! Sessions and the session factory.
//!
//! A [`Session`] is a unit of work over one pooled connection. It checks a
//! connection out on first use and immediately opens a transaction, so
//! nothing it writes is visible to anyone else until [`Session::commit`].
//! Closing (or dropping) a session rolls back whatever was not committed and
//! returns the connection to the pool.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::db::engine::{AnyConnection, Engine, EngineConnection};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct SessionCounters {
    opened: AtomicU64,
    closed: AtomicU64,
}

/// Snapshot of how many sessions a factory has handed out and released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub opened: u64,
    pub closed: u64,
}

impl SessionStats {
    /// Sessions handed out and not yet closed.
    #[must_use]
    pub fn open(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }
}

/// Produces [`Session`]s bound to one [`Engine`].
#[derive(Debug, Clone)]
pub struct SessionFactory {
    engine: Engine,
    counters: Arc<SessionCounters>,
}

impl SessionFactory {
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            counters: Arc::new(SessionCounters::default()),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Create a new session. No connection is taken until it is used.
    #[must_use]
    pub fn session(&self) -> Session {
        let id = self.counters.opened.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(session = id, "session opened");
        Session {
            id,
            engine: self.engine.clone(),
            counters: Arc::clone(&self.counters),
            conn: None,
            closed: false,
        }
    }

    /// Run `f` with a fresh session and close it afterwards.
    ///
    /// The session is closed exactly once however `f` exits: on return
    /// (with `Ok` or `Err` alike) it is closed here, on panic it is closed by
    /// its destructor during unwinding. Uncommitted work is rolled back.
    ///
    /// ```no_run
    /// use customer_db::{Database, Error};
    ///
    /// let db = Database::from_env();
    /// db.sessions().scoped(|session| -> Result<(), Error> {
    ///     session.connection()?;
    ///     session.commit()
    /// })?;
    /// # Ok::<(), Error>(())
    /// ```
    pub fn scoped<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut session = self.session();
        let result = f(&mut session);
        if let Err(error) = session.close() {
            warn!(session = session.id, error = %error, "session did not close cleanly");
        }
        result
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            opened: self.counters.opened.load(Ordering::Relaxed),
            closed: self.counters.closed.load(Ordering::Relaxed),
        }
    }
}

/// Unit of work with manual commit.
///
/// Not meant to be shared: all access goes through `&mut self`.
pub struct Session {
    id: u64,
    engine: Engine,
    counters: Arc<SessionCounters>,
    conn: Option<EngineConnection>,
    closed: bool,
}

impl Session {
    /// Connection inside the session's transaction.
    ///
    /// Checks a connection out on first use and begins a transaction
    /// whenever none is open, including right after a commit.
    ///
    /// # Errors
    /// [`Error::SessionClosed`] after [`close`](Self::close); otherwise the
    /// pool or driver error from checkout or `BEGIN`.
    pub fn connection(&mut self) -> Result<&mut AnyConnection> {
        if self.closed {
            return Err(Error::SessionClosed);
        }

        let conn = match self.conn.take() {
            Some(conn) => self.conn.insert(conn),
            None => {
                let conn = self.engine.connect()?;
                trace!(session = self.id, "connection checked out");
                self.conn.insert(conn)
            }
        };

        if !conn.in_transaction() {
            conn.begin()?;
            debug!(session = self.id, "transaction started");
        }
        Ok(&mut **conn)
    }

    /// Commit pending work. A no-op when nothing is pending.
    ///
    /// # Errors
    /// [`Error::SessionClosed`] after close, or the driver's commit error.
    pub fn commit(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        if let Some(conn) = self.conn.as_mut() {
            if conn.in_transaction() {
                conn.commit()?;
                debug!(session = self.id, "transaction committed");
            }
        }
        Ok(())
    }

    /// Discard pending work. A no-op when nothing is pending.
    ///
    /// # Errors
    /// [`Error::SessionClosed`] after close, or the driver's rollback error.
    pub fn rollback(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        if let Some(conn) = self.conn.as_mut() {
            if conn.in_transaction() {
                conn.rollback()?;
                debug!(session = self.id, "transaction rolled back");
            }
        }
        Ok(())
    }

    /// Whether uncommitted work may be pending.
    pub fn in_transaction(&mut self) -> bool {
        !self.closed && self.conn.as_mut().is_some_and(|conn| conn.in_transaction())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Roll back pending work and return the connection to the pool.
    ///
    /// Calling it again does nothing. The session counts as released even
    /// if the rollback fails; the connection is then discarded by the pool
    /// instead of reused.
    ///
    /// # Errors
    /// Returns the driver's rollback error.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.counters.closed.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.conn.take() {
            Some(mut conn) => {
                if conn.in_transaction() {
                    conn.rollback().map_err(Error::from)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        };
        trace!(session = self.id, "session closed");
        outcome
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("url", self.engine.url())
            .field("checked_out", &self.conn.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(session = self.id, error = %error, "session rollback failed on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::engine::PoolConfig;
    use crate::db::url::DatabaseUrl;

    fn memory_factory() -> SessionFactory {
        let config = PoolConfig {
            max_size: 1,
            ..PoolConfig::default()
        };
        SessionFactory::new(Engine::new(DatabaseUrl::new("sqlite://"), &config))
    }

    #[test]
    fn session_is_lazy() {
        let factory = memory_factory();
        let session = factory.session();
        assert_eq!(factory.engine().state().connections, 0);
        drop(session);
        assert_eq!(factory.stats(), SessionStats { opened: 1, closed: 1 });
    }

    #[test]
    fn first_use_begins_transaction() {
        let factory = memory_factory();
        let mut session = factory.session();
        assert!(!session.in_transaction());
        session.connection().unwrap();
        assert!(session.in_transaction());
        session.commit().unwrap();
        assert!(!session.in_transaction());
        session.connection().unwrap();
        assert!(session.in_transaction());
    }

    #[test]
    fn close_is_idempotent_and_counted_once() {
        let factory = memory_factory();
        let mut session = factory.session();
        session.connection().unwrap();
        session.close().unwrap();
        session.close().unwrap();
        drop(session);
        assert_eq!(factory.stats(), SessionStats { opened: 1, closed: 1 });
        assert_eq!(factory.engine().state().idle_connections, 1);
    }

    #[test]
    fn closed_session_rejects_use() {
        let factory = memory_factory();
        let mut session = factory.session();
        session.close().unwrap();
        assert!(matches!(session.connection(), Err(Error::SessionClosed)));
        assert!(matches!(session.commit(), Err(Error::SessionClosed)));
        assert!(matches!(session.rollback(), Err(Error::SessionClosed)));
        assert!(session.is_closed());
    }

    #[test]
    fn scoped_releases_on_ok_and_err() {
        let factory = memory_factory();

        let ok: Result<u32> = factory.scoped(|session| {
            session.connection()?;
            Ok(7)
        });
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(factory.stats(), SessionStats { opened: 1, closed: 1 });

        let err: std::result::Result<(), &str> = factory.scoped(|session| {
            session.connection().map_err(|_| "checkout")?;
            Err("boom")
        });
        assert_eq!(err, Err("boom"));
        assert_eq!(factory.stats(), SessionStats { opened: 2, closed: 2 });
        assert_eq!(factory.engine().state().idle_connections, 1);
    }

    #[test]
    fn stats_report_open_sessions() {
        let factory = memory_factory();
        let first = factory.session();
        let _second = factory.session();
        assert_eq!(factory.stats().open(), 2);
        drop(first);
        assert_eq!(factory.stats().open(), 1);
    }
}
