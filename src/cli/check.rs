use std::time::Duration;

use anyhow::{Context, Result};
use customer_db::{Backend, Database, DatabaseSettings, PoolConfig};

use super::command::CheckArgs;
use super::output;

/// Open one session through the pool and ping the database with it.
pub fn execute_check(args: &CheckArgs) -> Result<()> {
    let pool = PoolConfig {
        max_size: 1,
        connection_timeout: Duration::from_secs(args.timeout.max(1)),
        ..PoolConfig::default()
    };
    let db = Database::from_settings(&DatabaseSettings::from_env(), &pool);
    let url = db.url();

    output::section("Database Check");
    output::field("URL", url);
    output::field("Backend", url.backend().map_or("unknown", Backend::as_str));
    if let Some(host) = url.host() {
        output::field("Host", host);
    }

    let pb = output::spinner("Opening session...");
    let outcome = db.scoped(|session| -> customer_db::Result<()> {
        session.connection()?.ping()?;
        Ok(())
    });

    match outcome {
        Ok(()) => {
            output::spinner_success(&pb, "Database reachable");
            Ok(())
        }
        Err(e) => {
            output::spinner_fail(&pb, "Database unreachable");
            Err(e).context("database check failed")
        }
    }
}
