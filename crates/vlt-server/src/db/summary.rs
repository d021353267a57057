// db/summary.rs
// Thread summary cache rows

use super::parse_ts;
use rusqlite::{Connection, OptionalExtension, params};
use vlt_types::ThreadSummaryCache;

pub fn get_summary_cache_sync(
    conn: &Connection,
    thread_id: &str,
) -> rusqlite::Result<Option<ThreadSummaryCache>> {
    conn.query_row(
        "SELECT thread_id, summary, last_node_id, node_count, model_used, tokens_used, generated_at
         FROM thread_summary_cache WHERE thread_id = ?",
        params![thread_id],
        |row| {
            let generated: String = row.get(6)?;
            Ok(ThreadSummaryCache {
                thread_id: row.get(0)?,
                summary: row.get(1)?,
                last_node_id: row.get(2)?,
                node_count: row.get(3)?,
                model_used: row.get(4)?,
                tokens_used: row.get(5)?,
                generated_at: parse_ts(&generated),
            })
        },
    )
    .optional()
}

/// Insert or replace the single cache row for a thread.
pub fn upsert_summary_cache_sync(
    conn: &Connection,
    cache: &ThreadSummaryCache,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO thread_summary_cache
            (thread_id, summary, last_node_id, node_count, model_used, tokens_used, generated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(thread_id) DO UPDATE SET
            summary = excluded.summary,
            last_node_id = excluded.last_node_id,
            node_count = excluded.node_count,
            model_used = excluded.model_used,
            tokens_used = excluded.tokens_used,
            generated_at = excluded.generated_at",
        params![
            cache.thread_id,
            cache.summary,
            cache.last_node_id,
            cache.node_count,
            cache.model_used,
            cache.tokens_used,
            cache.generated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Explicit invalidation: drop the cache row entirely.
pub fn delete_summary_cache_sync(conn: &Connection, thread_id: &str) -> rusqlite::Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM thread_summary_cache WHERE thread_id = ?",
        params![thread_id],
    )?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_all_migrations;
    use chrono::Utc;

    #[test]
    fn test_upsert_is_single_row_per_thread() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        let mut cache = ThreadSummaryCache {
            thread_id: "t".to_string(),
            summary: "first".to_string(),
            last_node_id: "n1".to_string(),
            node_count: 3,
            model_used: "anthropic/claude-sonnet-4".to_string(),
            tokens_used: 120,
            generated_at: Utc::now(),
        };
        upsert_summary_cache_sync(&conn, &cache).unwrap();

        cache.summary = "second".to_string();
        cache.last_node_id = "n2".to_string();
        cache.node_count = 5;
        upsert_summary_cache_sync(&conn, &cache).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM thread_summary_cache", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let loaded = get_summary_cache_sync(&conn, "t").unwrap().unwrap();
        assert_eq!(loaded.summary, "second");
        assert_eq!(loaded.last_node_id, "n2");
        assert_eq!(loaded.node_count, 5);

        assert!(delete_summary_cache_sync(&conn, "t").unwrap());
        assert!(get_summary_cache_sync(&conn, "t").unwrap().is_none());
        assert!(!delete_summary_cache_sync(&conn, "t").unwrap());
    }
}
