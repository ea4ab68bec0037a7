use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

/// Current schema version.  Increment when adding new migrations.
const SCHEMA_VERSION: u32 = 1;

/// Per-connection settings. Foreign keys are off by default in SQLite, so
/// every pooled connection must run this before use.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Apply all pending migrations to `conn`.
///
/// Migrations are idempotent: tables are created with `IF NOT EXISTS` and the
/// `meta` table tracks which version has been applied so we only run new ones.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    // WAL lets readers proceed while an ingestion transaction is open.
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(journal_mode = %mode, "memory store journal mode");

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    let current_version = get_schema_version(conn)?;

    if current_version >= SCHEMA_VERSION {
        debug!(version = current_version, "memory schema up to date");
        return Ok(());
    }

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    debug!(version = SCHEMA_VERSION, "memory schema migrated");
    Ok(())
}

// ---------------------------------------------------------------------------
// v1 — initial tables
// ---------------------------------------------------------------------------

fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    // ------------------------------------------------------------------
    // viabilities — one row per archived document.
    // ------------------------------------------------------------------
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS viabilities (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            title          TEXT,
            client_name    TEXT,
            viability_type TEXT,
            upload_date    TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            processed      BOOLEAN DEFAULT 0,
            file_path      TEXT,
            summary        TEXT,
            llm_feedback   TEXT,
            overall_score  REAL
        );",
    )?;

    // ------------------------------------------------------------------
    // embeddings — chunk text and its vector, stored in the same row so
    // neither can exist without the other.
    // ------------------------------------------------------------------
    adopt_legacy_table(conn, &EMBEDDINGS)?;
    conn.execute_batch(&EMBEDDINGS.create_sql(EMBEDDINGS.name))?;

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_viability_id ON embeddings(viability_id);",
    )?;

    // ------------------------------------------------------------------
    // chat_logs — conversation turns written by the chat front end.
    // ------------------------------------------------------------------
    adopt_legacy_table(conn, &CHAT_LOGS)?;
    conn.execute_batch(&CHAT_LOGS.create_sql(CHAT_LOGS.name))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Child tables of `viabilities`
// ---------------------------------------------------------------------------

/// A table holding a foreign key to `viabilities` that must cascade on delete.
struct ChildTable {
    name: &'static str,
    columns: &'static str,
    column_list: &'static str,
    /// Rows satisfying this can be copied under the foreign key.
    keep_filter: &'static str,
}

impl ChildTable {
    fn create_sql(&self, name: &str) -> String {
        format!("CREATE TABLE IF NOT EXISTS {name} ({})", self.columns)
    }
}

const EMBEDDINGS: ChildTable = ChildTable {
    name: "embeddings",
    columns: "
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        viability_id INTEGER NOT NULL REFERENCES viabilities(id) ON DELETE CASCADE,
        chunk_text   TEXT    NOT NULL,
        embedding    BLOB    NOT NULL",
    column_list: "id, viability_id, chunk_text, embedding",
    keep_filter: "viability_id IN (SELECT id FROM viabilities)
                  AND chunk_text IS NOT NULL AND embedding IS NOT NULL",
};

const CHAT_LOGS: ChildTable = ChildTable {
    name: "chat_logs",
    columns: "
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        viability_id INTEGER REFERENCES viabilities(id) ON DELETE CASCADE,
        role         TEXT,
        message      TEXT,
        timestamp    TIMESTAMP DEFAULT CURRENT_TIMESTAMP",
    column_list: "id, viability_id, role, message, timestamp",
    keep_filter: "viability_id IS NULL OR viability_id IN (SELECT id FROM viabilities)",
};

/// Rebuild a child table created without `ON DELETE CASCADE`.
///
/// Databases from earlier deployments declare a plain foreign key, which
/// `CREATE TABLE IF NOT EXISTS` would leave in place. The table is recreated
/// with the current definition and its rows copied over in one transaction.
/// Rows that cannot satisfy the new constraints (dangling ids, NULL chunk
/// data) are moved to `orphaned_<table>` rather than dropped.
fn adopt_legacy_table(conn: &Connection, table: &ChildTable) -> rusqlite::Result<()> {
    if !table_exists(conn, table.name)? || cascades_on_delete(conn, table.name)? {
        return Ok(());
    }

    let name = table.name;
    let staging = format!("{name}_rebuild");
    let orphans = format!("orphaned_{name}");
    let cols = table.column_list;
    let keep = table.keep_filter;

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(&table.create_sql(&staging))?;
    let kept = tx.execute(
        &format!("INSERT INTO {staging} ({cols}) SELECT {cols} FROM {name} WHERE {keep}"),
        [],
    )?;

    let dropped: i64 = tx.query_row(
        &format!("SELECT COUNT(*) FROM {name} WHERE id NOT IN (SELECT id FROM {staging})"),
        [],
        |row| row.get(0),
    )?;
    if dropped > 0 {
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {orphans} AS SELECT * FROM {name} WHERE 0;
             INSERT INTO {orphans} SELECT * FROM {name}
                 WHERE id NOT IN (SELECT id FROM {staging});"
        ))?;
        warn!(table = name, rows = dropped, "moved rows without a valid viability to {orphans}");
    }

    tx.execute_batch(&format!(
        "DROP TABLE {name};
         ALTER TABLE {staging} RENAME TO {name};"
    ))?;
    tx.commit()?;

    debug!(table = name, rows = kept, "rebuilt legacy table with cascading foreign key");
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn cascades_on_delete(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let on_delete: Option<String> = conn
        .query_row(
            "SELECT on_delete FROM pragma_foreign_key_list(?1) WHERE \"table\" = 'viabilities'",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(on_delete.is_some_and(|action| action.eq_ignore_ascii_case("CASCADE")))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let result = conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version'",
        [],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(v) => Ok(v.parse::<u32>().unwrap_or(0)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let names = table_names(&conn);
        for expected in ["chat_logs", "embeddings", "meta", "viabilities"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    /// Tables as created by the first deployment: plain foreign keys, no
    /// `meta` table.
    const LEGACY_DDL: &str = "
        CREATE TABLE viabilities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT, client_name TEXT, viability_type TEXT,
            upload_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            processed BOOLEAN DEFAULT 0,
            file_path TEXT, summary TEXT, llm_feedback TEXT, overall_score REAL
        );
        CREATE TABLE embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            viability_id INTEGER, chunk_text TEXT, embedding BLOB,
            FOREIGN KEY (viability_id) REFERENCES viabilities(id)
        );
        CREATE TABLE chat_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            viability_id INTEGER, role TEXT, message TEXT,
            timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (viability_id) REFERENCES viabilities(id)
        );";

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_legacy_tables_gain_cascade() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEGACY_DDL).unwrap();
        conn.execute_batch(
            "INSERT INTO viabilities (id, title) VALUES (1, 'kept');
             INSERT INTO embeddings (id, viability_id, chunk_text, embedding)
                 VALUES (10, 1, 'chunk', x'0000803f');
             INSERT INTO embeddings (id, viability_id, chunk_text, embedding)
                 VALUES (11, 99, 'dangling', x'0000803f');
             INSERT INTO chat_logs (viability_id, role, message) VALUES (1, 'user', 'hi');",
        )
        .unwrap();

        configure_connection(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert!(cascades_on_delete(&conn, "embeddings").unwrap());
        assert!(cascades_on_delete(&conn, "chat_logs").unwrap());
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM embeddings WHERE id = 10"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM orphaned_embeddings WHERE id = 11"), 1);
        assert!(!table_exists(&conn, "orphaned_chat_logs").unwrap());

        conn.execute("DELETE FROM viabilities WHERE id = 1", []).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM embeddings"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM chat_logs"), 0);
    }

    #[test]
    fn test_rebuild_keeps_ids_and_sequence() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEGACY_DDL).unwrap();
        conn.execute_batch(
            "INSERT INTO viabilities (id, title) VALUES (1, 'a');
             INSERT INTO embeddings (id, viability_id, chunk_text, embedding)
                 VALUES (40, 1, 'x', x'00000000');",
        )
        .unwrap();

        configure_connection(&conn).unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO embeddings (viability_id, chunk_text, embedding) VALUES (1, 'y', x'00000000')",
            [],
        )
        .unwrap();
        assert_eq!(conn.last_insert_rowid(), 41);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO embeddings (viability_id, chunk_text, embedding) VALUES (99, 'x', x'00000000')",
            [],
        );
        assert!(result.is_err());
    }
}
