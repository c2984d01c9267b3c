use rusqlite::Connection;
use std::path::Path;
use tokio::task;
use crate::error::{Result, GraphRefineError};

pub mod migrate;

/// Pragmas applied to every connection.
///
/// WAL for concurrent readers, NORMAL sync for speed, foreign keys so that
/// discarding a snapshot cascades to its nodes and edges.
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA cache_size = -65536;";

/// Database connection wrapper
#[derive(Debug, Clone)]
pub struct Db {
    path: std::path::PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Path of the underlying SQLite file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the standard pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        open(&self.path)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = open(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| GraphRefineError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Database task failed: {}", e),
        )))?
    }

    /// Run the migrations compiled into the binary against this database.
    pub async fn migrate(&self) -> Result<()> {
        self.with_connection(migrate::run_migrations).await
    }
}

fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(GraphRefineError::Database)?;
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_db_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Db::new(&db_path);

        let result = db.with_connection(|conn| {
            conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY)", [])
                .map_err(GraphRefineError::Database)?;
            Ok(())
        }).await;

        assert!(result.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_pragmas_set() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));

        db.with_connection(|conn| {
            let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            assert_eq!(journal_mode.to_uppercase(), "WAL");

            let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
            assert_eq!(foreign_keys, 1);

            Ok::<(), GraphRefineError>(())
        }).await.unwrap();
    }

    #[tokio::test]
    async fn test_migrate_creates_graph_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));
        db.migrate().await.unwrap();

        let tables = db.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table'")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            Ok(names)
        }).await.unwrap();

        for table in ["snapshots", "nodes", "edges", "schema_migrations"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }
}
