use std::path::{Path, PathBuf};

use customer_db::{AnyConnection, Database, DatabaseUrl, PoolConfig, Session};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use tempfile::TempDir;

/// Temporary file-backed SQLite database with a `customers` table.
pub struct TempDb {
    _dir: TempDir,
    path: PathBuf,
    db: Database,
}

#[derive(QueryableByName)]
struct Count {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    count: i64,
}

impl TempDb {
    pub fn create() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("customers.db");
        let url = DatabaseUrl::sqlite_file(path.to_str().expect("utf-8 temp path"));
        let config = PoolConfig {
            max_size: 4,
            ..PoolConfig::default()
        };
        let db = Database::new(url, &config);

        {
            let mut conn = db.engine().connect().expect("get sqlite connection");
            conn.batch_execute(
                "CREATE TABLE customers (
                    customer_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE
                )",
            )
            .expect("create customers table");
        }

        Self {
            _dir: dir,
            path,
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed customer rows, read through a separate connection.
    pub fn customer_count(&self) -> i64 {
        let mut conn = SqliteConnection::establish(self.path.to_str().expect("utf-8 temp path"))
            .expect("open verification connection");
        diesel::sql_query("SELECT COUNT(*) AS count FROM customers")
            .get_result::<Count>(&mut conn)
            .expect("count customers")
            .count
    }
}

/// Insert one customer inside the session's transaction.
pub fn insert_customer(session: &mut Session, email: &str) -> customer_db::Result<()> {
    let conn = session.connection()?;
    let AnyConnection::Sqlite(conn) = conn else {
        panic!("expected a sqlite connection");
    };
    diesel::sql_query("INSERT INTO customers (email) VALUES (?)")
        .bind::<diesel::sql_types::Text, _>(email)
        .execute(conn)?;
    Ok(())
}
