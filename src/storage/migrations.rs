use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Database schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Bring the schema up to `CURRENT_SCHEMA_VERSION`
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current_version = schema_version(conn)?;
    if current_version >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }
    info!("Migrating store schema from version {} to {}", current_version, CURRENT_SCHEMA_VERSION);

    for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
        let tx = conn.unchecked_transaction()?;
        apply_migration(&tx, version)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, chrono::Utc::now().timestamp()],
        )?;
        tx.commit()?;
    }

    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<i32> {
    let version: i32 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
        row.get(0)
    })?;
    Ok(version)
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => apply_migration_v1(conn),
        2 => apply_migration_v2(conn),
        _ => Err(anyhow::anyhow!("Unknown migration version: {}", version)),
    }
}

/// Templates, runs and their rows
fn apply_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE templates (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            definition_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE runs (
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL,
            render_mode TEXT NOT NULL,
            total_count INTEGER NOT NULL,
            pages_fetched INTEGER NOT NULL,
            container_matches INTEGER NOT NULL,
            warnings_json TEXT NOT NULL,
            errors_json TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            saved_at INTEGER NOT NULL
        );

        CREATE TABLE run_rows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            row_idx INTEGER NOT NULL,
            page_number INTEGER NOT NULL,
            source_url TEXT NOT NULL,
            data_json TEXT NOT NULL,
            hash TEXT NOT NULL,
            FOREIGN KEY (run_id) REFERENCES runs (id) ON DELETE CASCADE,
            UNIQUE (run_id, row_idx)
        );

        CREATE INDEX idx_runs_template_id ON runs (template_id);
        CREATE INDEX idx_run_rows_run_id ON run_rows (run_id);
        CREATE INDEX idx_run_rows_hash ON run_rows (hash);",
    )?;
    Ok(())
}

/// Keep the classifier verdict alongside each run
fn apply_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute("ALTER TABLE runs ADD COLUMN render_decision_json TEXT", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
        let applied: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_upgrade_from_v1() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)",
            [],
        )
        .unwrap();
        apply_migration_v1(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version, applied_at) VALUES (1, 0)", [])
            .unwrap();

        run_migrations(&conn).unwrap();
        let stmt = conn.prepare("SELECT render_decision_json FROM runs").unwrap();
        assert_eq!(stmt.column_count(), 1);
    }
}
