// db/chunks.rs
// Code chunk persistence with explicit FTS5 maintenance
//
// The FTS index is not contentless (chunk ids are opaque strings), so every
// chunk write/delete updates code_chunk_fts inside the same transaction.

use super::parse_ts;
use rusqlite::{Connection, OptionalExtension, params};
use vlt_types::{ChunkKind, CodeChunk};

const CHUNK_COLUMNS: &str = "id, project_id, file_path, file_hash, chunk_kind, name, \
     qualified_name, language, start_line, end_line, imports, class_context, signature, \
     decorators, docstring, body, embedding, token_count, created_at, updated_at";

fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CodeChunk> {
    let kind: String = row.get(4)?;
    let created: String = row.get(18)?;
    let updated: String = row.get(19)?;
    Ok(CodeChunk {
        id: row.get(0)?,
        project_id: row.get(1)?,
        file_path: row.get(2)?,
        file_hash: row.get(3)?,
        chunk_kind: ChunkKind::parse(&kind).unwrap_or(ChunkKind::Function),
        name: row.get(5)?,
        qualified_name: row.get(6)?,
        language: row.get(7)?,
        start_line: row.get(8)?,
        end_line: row.get(9)?,
        imports: row.get(10)?,
        class_context: row.get(11)?,
        signature: row.get(12)?,
        decorators: row.get(13)?,
        docstring: row.get(14)?,
        body: row.get(15)?,
        embedding: row.get(16)?,
        token_count: row.get::<_, Option<i64>>(17)?.map(|v| v as usize),
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
    })
}

/// Insert a batch of chunks in one transaction, maintaining the FTS index.
///
/// A chunk arriving without a file hash gets one computed from its body.
pub fn save_chunks_sync(
    conn: &Connection,
    chunks: &[CodeChunk],
    project_id: &str,
) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut saved = 0;

    for chunk in chunks {
        let file_hash = if chunk.file_hash.is_empty() {
            format!("{:x}", md5::compute(chunk.body.as_bytes()))
        } else {
            chunk.file_hash.clone()
        };

        tx.execute(
            &format!(
                "INSERT INTO code_chunks ({CHUNK_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                chunk.id,
                project_id,
                chunk.file_path,
                file_hash,
                chunk.chunk_kind.as_str(),
                chunk.name,
                chunk.qualified_name,
                chunk.language,
                chunk.start_line,
                chunk.end_line,
                chunk.imports,
                chunk.class_context,
                chunk.signature,
                chunk.decorators,
                chunk.docstring,
                chunk.body,
                chunk.embedding,
                chunk.token_count.map(|v| v as i64),
                chunk.created_at.to_rfc3339(),
                chunk.updated_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "INSERT INTO code_chunk_fts
                (chunk_id, project_id, file_path, name, qualified_name, signature, docstring, body)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                chunk.id,
                project_id,
                chunk.file_path,
                chunk.name,
                chunk.qualified_name,
                chunk.signature.as_deref().unwrap_or(""),
                chunk.docstring.as_deref().unwrap_or(""),
                chunk.body,
            ],
        )?;

        saved += 1;
    }

    tx.commit()?;
    Ok(saved)
}

/// Chunks for a file, ordered by start line.
pub fn get_chunks_by_file_sync(
    conn: &Connection,
    file_path: &str,
    project_id: &str,
) -> rusqlite::Result<Vec<CodeChunk>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHUNK_COLUMNS} FROM code_chunks
         WHERE project_id = ? AND file_path = ? ORDER BY start_line"
    ))?;
    let rows = stmt
        .query_map(params![project_id, file_path], chunk_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn chunk_by_id_sync(conn: &Connection, chunk_id: &str) -> rusqlite::Result<Option<CodeChunk>> {
    conn.query_row(
        &format!("SELECT {CHUNK_COLUMNS} FROM code_chunks WHERE id = ?"),
        params![chunk_id],
        chunk_from_row,
    )
    .optional()
}

/// Remove everything derived from one file in a single transaction: chunks
/// (and their FTS rows), code nodes, edges originating in the file's nodes,
/// and symbol definitions.
pub fn delete_file_data_sync(
    conn: &Connection,
    file_path: &str,
    project_id: &str,
) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut deleted = 0;

    deleted += tx.execute(
        "DELETE FROM code_chunk_fts WHERE project_id = ? AND file_path = ?",
        params![project_id, file_path],
    )?;
    deleted += tx.execute(
        "DELETE FROM code_chunks WHERE project_id = ? AND file_path = ?",
        params![project_id, file_path],
    )?;
    // Edges first: they reference the nodes being removed
    deleted += tx.execute(
        "DELETE FROM code_edges WHERE project_id = ?1 AND source_id IN
            (SELECT id FROM code_nodes WHERE project_id = ?1 AND file_path = ?2)",
        params![project_id, file_path],
    )?;
    deleted += tx.execute(
        "DELETE FROM code_nodes WHERE project_id = ? AND file_path = ?",
        params![project_id, file_path],
    )?;
    deleted += tx.execute(
        "DELETE FROM symbol_definitions WHERE project_id = ? AND file_path = ?",
        params![project_id, file_path],
    )?;

    tx.commit()?;
    Ok(deleted)
}

/// A single FTS5 hit. `rank` is SQLite's raw (negative) BM25 value.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub chunk_id: String,
    pub rank: f64,
}

/// Run an FTS5 MATCH over the chunk index, best matches first.
pub fn fts_search_sync(
    conn: &Connection,
    fts_query: &str,
    project_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<FtsHit>> {
    let mut stmt = conn.prepare(
        "SELECT chunk_id, rank FROM code_chunk_fts
         WHERE code_chunk_fts MATCH ? AND project_id = ?
         ORDER BY rank LIMIT ?",
    )?;
    let rows = stmt
        .query_map(params![fts_query, project_id, limit as i64], |row| {
            Ok(FtsHit {
                chunk_id: row.get(0)?,
                rank: row.get(1)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// All chunks of a project that carry an embedding.
pub fn chunks_with_embeddings_sync(
    conn: &Connection,
    project_id: &str,
) -> rusqlite::Result<Vec<CodeChunk>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHUNK_COLUMNS} FROM code_chunks
         WHERE project_id = ? AND embedding IS NOT NULL"
    ))?;
    let rows = stmt
        .query_map(params![project_id], chunk_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Chunks still waiting for an embedding.
pub fn chunks_missing_embedding_sync(
    conn: &Connection,
    project_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<CodeChunk>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHUNK_COLUMNS} FROM code_chunks
         WHERE project_id = ? AND embedding IS NULL LIMIT ?"
    ))?;
    let rows = stmt
        .query_map(params![project_id, limit as i64], chunk_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn set_chunk_embedding_sync(
    conn: &Connection,
    chunk_id: &str,
    embedding: &[u8],
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE code_chunks SET embedding = ? WHERE id = ?",
        params![embedding, chunk_id],
    )?;
    Ok(())
}

pub fn count_chunks_sync(conn: &Connection, project_id: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM code_chunks WHERE project_id = ?",
        params![project_id],
        |r| r.get(0),
    )
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_all_migrations;
    use chrono::Utc;

    fn test_chunk(id: &str, file: &str, name: &str, body: &str) -> CodeChunk {
        CodeChunk {
            id: id.to_string(),
            project_id: "p".to_string(),
            file_path: file.to_string(),
            file_hash: String::new(),
            chunk_kind: ChunkKind::Function,
            name: name.to_string(),
            qualified_name: format!("m.{name}"),
            language: "python".to_string(),
            start_line: 1,
            end_line: 10,
            imports: None,
            class_context: None,
            signature: Some(format!("def {name}()")),
            decorators: None,
            docstring: Some("does things".to_string()),
            body: body.to_string(),
            embedding: None,
            token_count: Some(12),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_save_computes_file_hash() {
        let conn = test_conn();
        let chunk = test_chunk("c1", "src/a.py", "alpha", "return 1");
        save_chunks_sync(&conn, &[chunk], "p").unwrap();

        let saved = chunk_by_id_sync(&conn, "c1").unwrap().unwrap();
        assert_eq!(saved.file_hash.len(), 32);
        assert_eq!(
            saved.file_hash,
            format!("{:x}", md5::compute("return 1".as_bytes()))
        );
    }

    #[test]
    fn test_fts_search_tracks_chunk_rows() {
        let conn = test_conn();
        save_chunks_sync(
            &conn,
            &[
                test_chunk("c1", "src/auth.py", "authenticate_user", "check credentials here"),
                test_chunk("c2", "src/db.py", "open_pool", "sqlite pool setup"),
            ],
            "p",
        )
        .unwrap();

        let hits = fts_search_sync(&conn, "authenticate*", "p", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
        // SQLite FTS5 ranks are negative (lower is better)
        assert!(hits[0].rank < 0.0);
    }

    #[test]
    fn test_delete_file_data_removes_fts_rows() {
        let conn = test_conn();
        save_chunks_sync(
            &conn,
            &[test_chunk("c1", "src/auth.py", "authenticate_user", "body")],
            "p",
        )
        .unwrap();

        delete_file_data_sync(&conn, "src/auth.py", "p").unwrap();

        assert_eq!(count_chunks_sync(&conn, "p"), 0);
        let hits = fts_search_sync(&conn, "authenticate*", "p", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_chunks_by_file_ordered_by_start_line() {
        let conn = test_conn();
        let mut late = test_chunk("c1", "src/a.py", "later", "x");
        late.start_line = 50;
        let mut early = test_chunk("c2", "src/a.py", "earlier", "y");
        early.start_line = 5;
        save_chunks_sync(&conn, &[late, early], "p").unwrap();

        let chunks = get_chunks_by_file_sync(&conn, "src/a.py", "p").unwrap();
        assert_eq!(chunks[0].name, "earlier");
        assert_eq!(chunks[1].name, "later");
    }

    #[test]
    fn test_embedding_lifecycle() {
        let conn = test_conn();
        save_chunks_sync(&conn, &[test_chunk("c1", "src/a.py", "alpha", "body")], "p").unwrap();

        assert_eq!(chunks_with_embeddings_sync(&conn, "p").unwrap().len(), 0);
        assert_eq!(chunks_missing_embedding_sync(&conn, "p", 10).unwrap().len(), 1);

        set_chunk_embedding_sync(&conn, "c1", &[1, 2, 3, 4]).unwrap();
        assert_eq!(chunks_with_embeddings_sync(&conn, "p").unwrap().len(), 1);
    }
}
