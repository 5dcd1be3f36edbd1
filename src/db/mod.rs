//! Data layer: connection URL, pool handle and sessions.

pub mod engine;
pub mod session;
pub mod url;

pub use engine::{AnyConnection, Engine, EngineConnection, PoolConfig};
pub use session::{Session, SessionFactory, SessionStats};
pub use url::{Backend, DatabaseUrl};

use crate::config::DatabaseSettings;

/// The data layer of one service: a resolved URL, its pool and a session
/// factory, built together and passed to whatever needs database access.
#[derive(Debug, Clone)]
pub struct Database {
    sessions: SessionFactory,
}

impl Database {
    /// Resolve the URL from the process environment and build the pool.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_settings(&DatabaseSettings::from_env(), &PoolConfig::default())
    }

    #[must_use]
    pub fn from_settings(settings: &DatabaseSettings, pool: &PoolConfig) -> Self {
        Self::new(settings.resolve_url(), pool)
    }

    /// Build the pool for an already resolved URL. Opens no connection.
    #[must_use]
    pub fn new(url: DatabaseUrl, pool: &PoolConfig) -> Self {
        Self {
            sessions: SessionFactory::new(Engine::new(url, pool)),
        }
    }

    #[must_use]
    pub fn url(&self) -> &DatabaseUrl {
        self.engine().url()
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        self.sessions.engine()
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionFactory {
        &self.sessions
    }

    /// Shorthand for [`SessionFactory::session`].
    #[must_use]
    pub fn session(&self) -> Session {
        self.sessions.session()
    }

    /// Shorthand for [`SessionFactory::scoped`].
    pub fn scoped<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        self.sessions.scoped(f)
    }
}
