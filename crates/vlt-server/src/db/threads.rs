// db/threads.rs
// Projects, threads, nodes, tags and cross-thread references

use super::parse_ts;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use vlt_types::{NodeRecord, ThreadRecord, ThreadStatus};

/// Insert the project if it does not exist yet.
pub fn get_or_create_project_sync(
    conn: &Connection,
    project_id: &str,
    name: &str,
    description: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO projects (id, name, description) VALUES (?, ?, ?)",
        params![project_id, name, description],
    )?;
    Ok(())
}

/// Insert the thread if it does not exist yet, returning its record.
pub fn get_or_create_thread_sync(
    conn: &Connection,
    thread_id: &str,
    project_id: &str,
    status: ThreadStatus,
) -> rusqlite::Result<ThreadRecord> {
    conn.execute(
        "INSERT OR IGNORE INTO threads (id, project_id, status) VALUES (?, ?, ?)",
        params![thread_id, project_id, status.as_str()],
    )?;
    get_thread_sync(conn, thread_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get_thread_sync(conn: &Connection, thread_id: &str) -> rusqlite::Result<Option<ThreadRecord>> {
    conn.query_row(
        "SELECT id, project_id, status FROM threads WHERE id = ?",
        params![thread_id],
        |row| {
            let status: String = row.get(2)?;
            Ok(ThreadRecord {
                id: row.get(0)?,
                project_id: row.get(1)?,
                status: ThreadStatus::parse(&status).unwrap_or(ThreadStatus::Active),
            })
        },
    )
    .optional()
}

pub fn list_threads_sync(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<ThreadRecord>> {
    let mut stmt =
        conn.prepare("SELECT id, project_id, status FROM threads WHERE project_id = ? ORDER BY id")?;
    let rows = stmt
        .query_map(params![project_id], |row| {
            let status: String = row.get(2)?;
            Ok(ThreadRecord {
                id: row.get(0)?,
                project_id: row.get(1)?,
                status: ThreadStatus::parse(&status).unwrap_or(ThreadStatus::Active),
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRecord> {
    let ts: String = row.get(5)?;
    Ok(NodeRecord {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        sequence_id: row.get(2)?,
        content: row.get(3)?,
        author: row.get(4)?,
        timestamp: parse_ts(&ts),
        prev_node_id: row.get(6)?,
        embedding: row.get(7)?,
    })
}

const NODE_COLUMNS: &str =
    "id, thread_id, sequence_id, content, author, timestamp, prev_node_id, embedding";

/// Append a node to a thread.
///
/// sequence_id is the previous maximum plus one (0 for the first node) and
/// prev_node_id points at the previous maximum-sequence node. Nodes are
/// immutable after this insert; embeddings are attached later by the
/// librarian path.
pub fn insert_node_sync(
    conn: &Connection,
    thread_id: &str,
    content: &str,
    author: &str,
) -> rusqlite::Result<NodeRecord> {
    let last = latest_node_sync(conn, thread_id)?;
    let (sequence_id, prev_node_id) = match &last {
        Some(node) => (node.sequence_id + 1, Some(node.id.clone())),
        None => (0, None),
    };

    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO nodes (id, thread_id, sequence_id, content, author, timestamp, prev_node_id)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            thread_id,
            sequence_id,
            content,
            author,
            now.to_rfc3339(),
            prev_node_id
        ],
    )?;

    Ok(NodeRecord {
        id,
        thread_id: thread_id.to_string(),
        sequence_id,
        content: content.to_string(),
        author: author.to_string(),
        timestamp: now,
        prev_node_id,
        embedding: None,
    })
}

/// The node with the greatest sequence number in a thread, if any.
pub fn latest_node_sync(conn: &Connection, thread_id: &str) -> rusqlite::Result<Option<NodeRecord>> {
    conn.query_row(
        &format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE thread_id = ?
             ORDER BY sequence_id DESC LIMIT 1"
        ),
        params![thread_id],
        node_from_row,
    )
    .optional()
}

pub fn node_by_id_sync(conn: &Connection, node_id: &str) -> rusqlite::Result<Option<NodeRecord>> {
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"),
        params![node_id],
        node_from_row,
    )
    .optional()
}

pub fn count_nodes_sync(conn: &Connection, thread_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM nodes WHERE thread_id = ?",
        params![thread_id],
        |r| r.get(0),
    )
}

/// All nodes of a thread in sequence order.
pub fn nodes_in_order_sync(conn: &Connection, thread_id: &str) -> rusqlite::Result<Vec<NodeRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE thread_id = ? ORDER BY sequence_id"
    ))?;
    let rows = stmt
        .query_map(params![thread_id], node_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// The last `limit` nodes of a thread, in sequence order.
pub fn recent_nodes_sync(
    conn: &Connection,
    thread_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<NodeRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE thread_id = ?
         ORDER BY sequence_id DESC LIMIT ?"
    ))?;
    let mut rows: Vec<NodeRecord> = stmt
        .query_map(params![thread_id, limit as i64], node_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    rows.reverse();
    Ok(rows)
}

/// Nodes with sequence strictly greater than `sequence`, in order.
pub fn nodes_after_sequence_sync(
    conn: &Connection,
    thread_id: &str,
    sequence: i64,
) -> rusqlite::Result<Vec<NodeRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE thread_id = ? AND sequence_id > ?
         ORDER BY sequence_id"
    ))?;
    let rows = stmt
        .query_map(params![thread_id, sequence], node_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Embedded nodes of a project's threads, as vector-search candidates.
///
/// Returns full node records (with blobs) joined through threads.
pub fn node_embedding_candidates_sync(
    conn: &Connection,
    project_id: &str,
) -> rusqlite::Result<Vec<NodeRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM nodes n JOIN threads t ON n.thread_id = t.id
         WHERE t.project_id = ? AND n.embedding IS NOT NULL",
        NODE_COLUMNS
            .split(", ")
            .map(|c| format!("n.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    ))?;
    let rows = stmt
        .query_map(params![project_id], node_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Nodes still waiting for an embedding, oldest first.
pub fn nodes_missing_embedding_sync(
    conn: &Connection,
    project_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<NodeRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM nodes n JOIN threads t ON n.thread_id = t.id
         WHERE t.project_id = ? AND n.embedding IS NULL
         ORDER BY n.timestamp LIMIT ?",
        NODE_COLUMNS
            .split(", ")
            .map(|c| format!("n.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    ))?;
    let rows = stmt
        .query_map(params![project_id, limit as i64], node_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn set_node_embedding_sync(
    conn: &Connection,
    node_id: &str,
    embedding: &[u8],
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE nodes SET embedding = ? WHERE id = ?",
        params![embedding, node_id],
    )?;
    Ok(())
}

/// Attach a tag to a node, creating the tag on first use.
pub fn add_tag_sync(conn: &Connection, node_id: &str, tag_name: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO tags (name) VALUES (?)",
        params![tag_name],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO node_tags (node_id, tag_id)
         SELECT ?, id FROM tags WHERE name = ?",
        params![node_id, tag_name],
    )?;
    Ok(())
}

/// Record a cross-thread reference from a node.
pub fn add_reference_sync(
    conn: &Connection,
    source_node_id: &str,
    target_thread_id: &str,
    note: Option<&str>,
) -> rusqlite::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO \"references\" (id, source_node_id, target_thread_id, note)
         VALUES (?, ?, ?, ?)",
        params![id, source_node_id, target_thread_id, note],
    )?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_all_migrations;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        get_or_create_project_sync(&conn, "p", "p", None).unwrap();
        get_or_create_thread_sync(&conn, "t", "p", ThreadStatus::Active).unwrap();
        conn
    }

    #[test]
    fn test_sequence_ids_are_strictly_increasing() {
        let conn = test_conn();

        let first = insert_node_sync(&conn, "t", "first thought", "user").unwrap();
        assert_eq!(first.sequence_id, 0);
        assert!(first.prev_node_id.is_none());

        let second = insert_node_sync(&conn, "t", "second thought", "claude").unwrap();
        assert_eq!(second.sequence_id, 1);
        assert_eq!(second.prev_node_id.as_deref(), Some(first.id.as_str()));

        let third = insert_node_sync(&conn, "t", "third", "user").unwrap();
        assert_eq!(third.sequence_id, 2);
        assert_eq!(third.prev_node_id.as_deref(), Some(second.id.as_str()));
    }

    #[test]
    fn test_recent_nodes_returns_sequence_order() {
        let conn = test_conn();
        for i in 0..5 {
            insert_node_sync(&conn, "t", &format!("note {i}"), "user").unwrap();
        }

        let recent = recent_nodes_sync(&conn, "t", 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].sequence_id, 2);
        assert_eq!(recent[2].sequence_id, 4);
    }

    #[test]
    fn test_nodes_after_sequence() {
        let conn = test_conn();
        for i in 0..4 {
            insert_node_sync(&conn, "t", &format!("note {i}"), "user").unwrap();
        }

        let tail = nodes_after_sequence_sync(&conn, "t", 1).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence_id, 2);
    }

    #[test]
    fn test_embedding_candidates_join_project() {
        let conn = test_conn();
        let node = insert_node_sync(&conn, "t", "embedded", "user").unwrap();
        insert_node_sync(&conn, "t", "not embedded", "user").unwrap();
        set_node_embedding_sync(&conn, &node.id, &[0u8; 8]).unwrap();

        let candidates = node_embedding_candidates_sync(&conn, "p").unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, node.id);

        let pending = nodes_missing_embedding_sync(&conn, "p", 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content, "not embedded");
    }

    #[test]
    fn test_tags_and_references() {
        let conn = test_conn();
        let node = insert_node_sync(&conn, "t", "tagged", "user").unwrap();
        add_tag_sync(&conn, &node.id, "design").unwrap();
        add_tag_sync(&conn, &node.id, "design").unwrap(); // idempotent

        let tag_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM node_tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tag_count, 1);

        get_or_create_thread_sync(&conn, "other", "p", ThreadStatus::Active).unwrap();
        add_reference_sync(&conn, &node.id, "other", Some("see also")).unwrap();
        let ref_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM \"references\"", [], |r| r.get(0))
            .unwrap();
        assert_eq!(ref_count, 1);
    }
}
