// db/schema.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;

/// Base schema. Idempotent: every statement is IF NOT EXISTS, so this runs
/// safely on every pool open.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS threads (
    id         TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id),
    status     TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS nodes (
    id           TEXT PRIMARY KEY,
    thread_id    TEXT NOT NULL REFERENCES threads(id),
    sequence_id  INTEGER NOT NULL,
    content      TEXT NOT NULL,
    author       TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    prev_node_id TEXT,
    embedding    BLOB,
    UNIQUE(thread_id, sequence_id)
);
CREATE INDEX IF NOT EXISTS idx_nodes_thread ON nodes(thread_id, sequence_id);

CREATE TABLE IF NOT EXISTS thread_summary_cache (
    thread_id    TEXT NOT NULL,
    summary      TEXT NOT NULL,
    last_node_id TEXT NOT NULL,
    node_count   INTEGER NOT NULL,
    model_used   TEXT NOT NULL,
    tokens_used  INTEGER NOT NULL DEFAULT 0,
    generated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_summary_cache_thread
    ON thread_summary_cache(thread_id);

CREATE TABLE IF NOT EXISTS states (
    id          TEXT PRIMARY KEY,
    target_id   TEXT NOT NULL,
    target_type TEXT NOT NULL,
    summary     TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tags (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS node_tags (
    node_id TEXT NOT NULL REFERENCES nodes(id),
    tag_id  INTEGER NOT NULL REFERENCES tags(id),
    UNIQUE(node_id, tag_id)
);

CREATE TABLE IF NOT EXISTS "references" (
    id               TEXT PRIMARY KEY,
    source_node_id   TEXT NOT NULL REFERENCES nodes(id),
    target_thread_id TEXT NOT NULL REFERENCES threads(id),
    note             TEXT
);

CREATE TABLE IF NOT EXISTS code_chunks (
    id             TEXT PRIMARY KEY,
    project_id     TEXT NOT NULL,
    file_path      TEXT NOT NULL,
    file_hash      TEXT NOT NULL,
    chunk_kind     TEXT NOT NULL,
    name           TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    language       TEXT NOT NULL,
    start_line     INTEGER NOT NULL,
    end_line       INTEGER NOT NULL,
    imports        TEXT,
    class_context  TEXT,
    signature      TEXT,
    decorators     TEXT,
    docstring      TEXT,
    body           TEXT NOT NULL,
    embedding      BLOB,
    token_count    INTEGER,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_project_file ON code_chunks(project_id, file_path);
CREATE INDEX IF NOT EXISTS idx_chunks_project_name ON code_chunks(project_id, name);

CREATE TABLE IF NOT EXISTS code_nodes (
    id               TEXT NOT NULL,
    project_id       TEXT NOT NULL,
    file_path        TEXT NOT NULL,
    kind             TEXT NOT NULL,
    name             TEXT NOT NULL,
    signature        TEXT,
    line             INTEGER,
    docstring        TEXT,
    centrality_score REAL,
    PRIMARY KEY (id, project_id)
);
CREATE INDEX IF NOT EXISTS idx_code_nodes_project_file ON code_nodes(project_id, file_path);
CREATE INDEX IF NOT EXISTS idx_code_nodes_project_name ON code_nodes(project_id, name);
CREATE INDEX IF NOT EXISTS idx_code_nodes_centrality
    ON code_nodes(project_id, centrality_score DESC);

CREATE TABLE IF NOT EXISTS code_edges (
    id         TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    source_id  TEXT NOT NULL,
    target_id  TEXT NOT NULL,
    kind       TEXT NOT NULL,
    line       INTEGER,
    count      INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_code_edges_source ON code_edges(source_id);
CREATE INDEX IF NOT EXISTS idx_code_edges_target ON code_edges(target_id);

CREATE TABLE IF NOT EXISTS symbol_definitions (
    id         TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name       TEXT NOT NULL,
    file_path  TEXT NOT NULL,
    line       INTEGER NOT NULL,
    kind       TEXT NOT NULL,
    scope      TEXT,
    signature  TEXT,
    language   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_symbols_project_name ON symbol_definitions(project_id, name);
CREATE INDEX IF NOT EXISTS idx_symbols_project_file ON symbol_definitions(project_id, file_path);

CREATE TABLE IF NOT EXISTS repo_maps (
    id               TEXT PRIMARY KEY,
    project_id       TEXT NOT NULL,
    scope            TEXT,
    map_text         TEXT NOT NULL,
    token_count      INTEGER NOT NULL,
    max_tokens       INTEGER NOT NULL,
    files_included   INTEGER NOT NULL,
    symbols_included INTEGER NOT NULL,
    symbols_total    INTEGER NOT NULL,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_repo_maps_project ON repo_maps(project_id, created_at DESC);

CREATE TABLE IF NOT EXISTS oracle_sessions (
    id         TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    started_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS oracle_conversations (
    id                 TEXT PRIMARY KEY,
    project_id         TEXT NOT NULL,
    user_id            TEXT NOT NULL,
    token_budget       INTEGER NOT NULL,
    tokens_used        INTEGER NOT NULL DEFAULT 0,
    compressed_summary TEXT,
    recent_exchanges   TEXT NOT NULL DEFAULT '[]',
    status             TEXT NOT NULL DEFAULT 'active',
    last_activity      TEXT NOT NULL,
    expires_at         TEXT NOT NULL,
    compression_count  INTEGER NOT NULL DEFAULT 0,
    mentioned_symbols  TEXT NOT NULL DEFAULT '',
    mentioned_files    TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_conversations_project_user
    ON oracle_conversations(project_id, user_id, status);

CREATE TABLE IF NOT EXISTS index_delta_queue (
    id            TEXT PRIMARY KEY,
    project_id    TEXT NOT NULL,
    file_path     TEXT NOT NULL,
    change_kind   TEXT NOT NULL,
    old_hash      TEXT,
    new_hash      TEXT,
    lines_changed INTEGER NOT NULL DEFAULT 0,
    priority      INTEGER NOT NULL DEFAULT 0,
    status        TEXT NOT NULL DEFAULT 'queued',
    queued_at     TEXT NOT NULL,
    error         TEXT
);
CREATE INDEX IF NOT EXISTS idx_delta_project_status ON index_delta_queue(project_id, status);
CREATE INDEX IF NOT EXISTS idx_delta_project_priority
    ON index_delta_queue(project_id, priority DESC, queued_at ASC);
"#;

/// FTS5 index over searchable chunk fields. Not contentless: chunk ids are
/// opaque strings, so rows are maintained explicitly in the same
/// transaction as the chunk row (save_chunks / delete_file_data).
const FTS_SCHEMA: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS code_chunk_fts USING fts5(
    chunk_id UNINDEXED,
    project_id UNINDEXED,
    file_path UNINDEXED,
    name,
    qualified_name,
    signature,
    docstring,
    body,
    tokenize='porter unicode61'
);
"#;

/// Run all schema setup and migrations.
///
/// Called during database initialization. Idempotent.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute_batch(FTS_SCHEMA)?;
    Ok(())
}

/// Rebuild the FTS index from the chunk table.
///
/// Recovery path for an index that drifted out of sync (should not happen
/// while all writes go through save_chunks / delete_file_data).
pub fn rebuild_chunk_fts(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM code_chunk_fts", [])?;
    conn.execute(
        "INSERT INTO code_chunk_fts
            (chunk_id, project_id, file_path, name, qualified_name, signature, docstring, body)
         SELECT id, project_id, file_path, name, qualified_name,
                COALESCE(signature, ''), COALESCE(docstring, ''), body
         FROM code_chunks",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        run_all_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='code_chunks'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_fts_table_matches() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO code_chunk_fts (chunk_id, project_id, file_path, name, qualified_name, signature, docstring, body)
             VALUES ('c1', 'p', 'src/auth.py', 'authenticate_user', 'auth.authenticate_user', 'def authenticate_user()', 'Check credentials', 'return True')",
            [],
        )
        .unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM code_chunk_fts WHERE code_chunk_fts MATCH 'authenticate*'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);
    }
}
