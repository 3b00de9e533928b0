//! Database schema initialization

use sqlx::SqlitePool;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Content tree (courses, sections, lessons, steps)
CREATE TABLE IF NOT EXISTS nodes (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    remote_id INTEGER,
    parent_id INTEGER,
    position INTEGER NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_siblings ON nodes(kind, parent_id, position);
CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_remote ON nodes(kind, remote_id)
    WHERE remote_id IS NOT NULL;
"#;
