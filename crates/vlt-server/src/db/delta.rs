// db/delta.rs
// Index delta queue rows
//
// Queue entries coalesce by (project, file): a newer change for a path that
// is already queued replaces the old row, keeping the higher priority.

use super::parse_ts;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use vlt_types::{ChangeKind, DeltaPriority, DeltaQueueEntry, DeltaStatus};

const DELTA_COLUMNS: &str = "id, project_id, file_path, change_kind, old_hash, new_hash, \
     lines_changed, priority, status, queued_at";

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeltaQueueEntry> {
    let change: String = row.get(3)?;
    let status: String = row.get(8)?;
    let queued_at: String = row.get(9)?;
    Ok(DeltaQueueEntry {
        id: row.get(0)?,
        project_id: row.get(1)?,
        file_path: row.get(2)?,
        change_kind: ChangeKind::parse(&change).unwrap_or(ChangeKind::Modified),
        old_hash: row.get(4)?,
        new_hash: row.get(5)?,
        lines_changed: row.get::<_, i64>(6)? as u32,
        priority: DeltaPriority::from_i64(row.get(7)?),
        status: DeltaStatus::parse(&status).unwrap_or(DeltaStatus::Queued),
        queued_at: parse_ts(&queued_at),
    })
}

/// Queue a file change, superseding any queued row for the same path.
///
/// The replacement keeps `max(old priority, new priority)` so a JIT
/// promotion is never lost to a later normal-priority re-queue.
pub fn upsert_delta_sync(conn: &Connection, entry: &DeltaQueueEntry) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;

    let existing: Option<(String, i64)> = tx
        .query_row(
            "SELECT id, priority FROM index_delta_queue
             WHERE project_id = ? AND file_path = ? AND status = 'queued'",
            params![entry.project_id, entry.file_path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let priority = match &existing {
        Some((old_id, old_priority)) => {
            tx.execute(
                "DELETE FROM index_delta_queue WHERE id = ?",
                params![old_id],
            )?;
            entry.priority.as_i64().max(*old_priority)
        }
        None => entry.priority.as_i64(),
    };

    tx.execute(
        &format!("INSERT INTO index_delta_queue ({DELTA_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
        params![
            entry.id,
            entry.project_id,
            entry.file_path,
            entry.change_kind.as_str(),
            entry.old_hash,
            entry.new_hash,
            entry.lines_changed as i64,
            priority,
            entry.status.as_str(),
            entry.queued_at.to_rfc3339(),
        ],
    )?;

    tx.commit()?;
    Ok(())
}

/// Queued entries for a project: priority descending, oldest first within a
/// priority band. This is the commit drain order.
pub fn queued_entries_sync(
    conn: &Connection,
    project_id: &str,
) -> rusqlite::Result<Vec<DeltaQueueEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DELTA_COLUMNS} FROM index_delta_queue
         WHERE project_id = ? AND status = 'queued'
         ORDER BY priority DESC, queued_at ASC"
    ))?;
    let rows = stmt
        .query_map(params![project_id], entry_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Aggregate view of the queued work for threshold checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaQueueStats {
    pub queued_files: usize,
    pub total_lines: u64,
    pub oldest_queued_at: Option<DateTime<Utc>>,
}

pub fn delta_queue_stats_sync(
    conn: &Connection,
    project_id: &str,
) -> rusqlite::Result<DeltaQueueStats> {
    let (count, lines, oldest): (i64, Option<i64>, Option<String>) = conn.query_row(
        "SELECT COUNT(*), SUM(lines_changed), MIN(queued_at)
         FROM index_delta_queue WHERE project_id = ? AND status = 'queued'",
        params![project_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    Ok(DeltaQueueStats {
        queued_files: count as usize,
        total_lines: lines.unwrap_or(0) as u64,
        oldest_queued_at: oldest.map(|s| parse_ts(&s)),
    })
}

/// Promote queued entries for the given paths to critical priority.
pub fn promote_to_critical_sync(
    conn: &Connection,
    project_id: &str,
    file_paths: &[String],
) -> rusqlite::Result<usize> {
    let mut promoted = 0;
    for path in file_paths {
        promoted += conn.execute(
            "UPDATE index_delta_queue SET priority = ?
             WHERE project_id = ? AND file_path = ? AND status = 'queued'",
            params![DeltaPriority::Critical.as_i64(), project_id, path],
        )?;
    }
    Ok(promoted)
}

/// Record the outcome of processing one queue entry.
pub fn set_delta_status_sync(
    conn: &Connection,
    entry_id: &str,
    status: DeltaStatus,
    error: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE index_delta_queue SET status = ?, error = ? WHERE id = ?",
        params![status.as_str(), error, entry_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_all_migrations;

    fn entry(path: &str, priority: DeltaPriority, lines: u32) -> DeltaQueueEntry {
        DeltaQueueEntry {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: "p".to_string(),
            file_path: path.to_string(),
            change_kind: ChangeKind::Modified,
            old_hash: Some("aaa".to_string()),
            new_hash: Some("bbb".to_string()),
            lines_changed: lines,
            priority,
            status: DeltaStatus::Queued,
            queued_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_coalesces_by_path_keeping_max_priority() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        upsert_delta_sync(&conn, &entry("src/auth.py", DeltaPriority::Critical, 10)).unwrap();
        upsert_delta_sync(&conn, &entry("src/auth.py", DeltaPriority::Normal, 25)).unwrap();

        let queued = queued_entries_sync(&conn, "p").unwrap();
        assert_eq!(queued.len(), 1);
        // Newer row supersedes, but the promotion survives
        assert_eq!(queued[0].priority, DeltaPriority::Critical);
        assert_eq!(queued[0].lines_changed, 25);
    }

    #[test]
    fn test_drain_order_priority_then_age() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        upsert_delta_sync(&conn, &entry("src/user.py", DeltaPriority::Normal, 5)).unwrap();
        upsert_delta_sync(&conn, &entry("src/util.py", DeltaPriority::Normal, 5)).unwrap();
        upsert_delta_sync(&conn, &entry("src/auth.py", DeltaPriority::Normal, 5)).unwrap();
        promote_to_critical_sync(&conn, "p", &["src/auth.py".to_string()]).unwrap();

        let queued = queued_entries_sync(&conn, "p").unwrap();
        assert_eq!(queued[0].file_path, "src/auth.py");
        assert_eq!(queued[1].file_path, "src/user.py");
        assert_eq!(queued[2].file_path, "src/util.py");
    }

    #[test]
    fn test_stats_and_status_transitions() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        upsert_delta_sync(&conn, &entry("a.py", DeltaPriority::Normal, 100)).unwrap();
        upsert_delta_sync(&conn, &entry("b.py", DeltaPriority::Normal, 200)).unwrap();

        let stats = delta_queue_stats_sync(&conn, "p").unwrap();
        assert_eq!(stats.queued_files, 2);
        assert_eq!(stats.total_lines, 300);
        assert!(stats.oldest_queued_at.is_some());

        let queued = queued_entries_sync(&conn, "p").unwrap();
        set_delta_status_sync(&conn, &queued[0].id, DeltaStatus::Done, None).unwrap();
        set_delta_status_sync(&conn, &queued[1].id, DeltaStatus::Failed, Some("parse error"))
            .unwrap();

        let stats = delta_queue_stats_sync(&conn, "p").unwrap();
        assert_eq!(stats.queued_files, 0);
        assert!(stats.oldest_queued_at.is_none());
    }
}
