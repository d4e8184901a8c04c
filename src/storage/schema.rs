//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS surgeries (
            id INTEGER PRIMARY KEY,
            patient_id TEXT,
            patient_name TEXT NOT NULL,
            surgery_date TEXT NOT NULL,
            surgery_time TEXT,
            ward TEXT,
            procedure_type TEXT,
            operating_room TEXT,
            diagnosis TEXT,
            surgeon TEXT,
            anesthetist TEXT,
            phone_primary TEXT,
            phone_secondary TEXT,
            notes TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS lookups (
            id INTEGER PRIMARY KEY,
            category TEXT NOT NULL,
            name TEXT NOT NULL,
            value TEXT NOT NULL DEFAULT '',
            label TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (category, name)
        );

        CREATE TABLE IF NOT EXISTS execution_logs (
            id INTEGER PRIMARY KEY,
            run_id TEXT NOT NULL,
            job_name TEXT NOT NULL,
            target_date TEXT NOT NULL,
            status TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            details_json TEXT NOT NULL DEFAULT '{\"rooms\":[]}',
            started_at TEXT NOT NULL,
            finished_at TEXT,
            logged_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            origin TEXT NOT NULL DEFAULT 'run',
            UNIQUE (job_name, target_date)
        );

        CREATE INDEX IF NOT EXISTS idx_surgeries_date ON surgeries(surgery_date, ward);
        CREATE INDEX IF NOT EXISTS idx_execution_logs_logged ON execution_logs(logged_at);",
    )?;

    // Databases created before rows recorded their origin.
    add_column_if_missing(conn, "execution_logs", "origin", "TEXT NOT NULL DEFAULT 'run'")?;

    Ok(())
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .iter()
        .any(|name| name == column);
    if !exists {
        conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))?;
    }
    Ok(())
}
