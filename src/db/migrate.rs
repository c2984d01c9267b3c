use rusqlite::{Connection, params};
use crate::error::{Result, GraphRefineError};

/// Migration metadata
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

/// Schema migrations compiled into the binary, in version order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "001_graph_store",
        sql: include_str!("../../migrations/001_graph_store.sql"),
    },
    Migration {
        version: 2,
        name: "002_graph_indexes",
        sql: include_str!("../../migrations/002_graph_indexes.sql"),
    },
];

/// Create schema_migrations table if it doesn't exist
fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get list of applied migrations
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(GraphRefineError::Database)?;
    Ok(names)
}

/// Run all pending migrations
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    ensure_migrations_table(conn)?;

    let applied = get_applied_migrations(conn)?;

    for migration in MIGRATIONS {
        if applied.iter().any(|name| name == migration.name) {
            log::debug!("Migration {} already applied, skipping", migration.name);
            continue;
        }

        log::info!("Applying migration: {} (version {})", migration.name, migration.version);

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            GraphRefineError::Config(format!(
                "Failed to execute migration {}: {}",
                migration.name, e
            ))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
    }

    log::debug!("All migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_embedded_migrations_in_version_order() {
        let versions: Vec<u32> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
        for migration in MIGRATIONS {
            assert!(migration.name.starts_with(&format!("{:03}_", migration.version)));
            assert!(!migration.sql.trim().is_empty());
        }
    }

    #[test]
    fn test_run_migrations_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();

        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let applied = get_applied_migrations(&conn).unwrap();
        assert_eq!(applied, vec!["001_graph_store".to_string(), "002_graph_indexes".to_string()]);
    }

    #[test]
    fn test_migrations_apply_without_source_tree() {
        // A database far away from any migrations/ directory still gets the full schema.
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("installed").join("data");
        std::fs::create_dir_all(&nested).unwrap();
        assert!(!nested.join("migrations").exists());

        let mut conn = Connection::open(nested.join("graph.db")).unwrap();
        run_migrations(&mut conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('snapshots','nodes','edges')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }
}
