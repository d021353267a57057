// db/repo_map.rs
// Repo map rows (append-only) and project index statistics

use super::parse_ts;
use rusqlite::{Connection, OptionalExtension, params};
use vlt_types::RepoMap;

const MAP_COLUMNS: &str = "id, project_id, scope, map_text, token_count, max_tokens, \
     files_included, symbols_included, symbols_total, created_at";

fn map_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepoMap> {
    let created: String = row.get(9)?;
    Ok(RepoMap {
        id: row.get(0)?,
        project_id: row.get(1)?,
        scope: row.get(2)?,
        map_text: row.get(3)?,
        token_count: row.get::<_, i64>(4)? as usize,
        max_tokens: row.get::<_, i64>(5)? as usize,
        files_included: row.get::<_, i64>(6)? as usize,
        symbols_included: row.get::<_, i64>(7)? as usize,
        symbols_total: row.get::<_, i64>(8)? as usize,
        created_at: parse_ts(&created),
    })
}

/// Append a repo map row. Maps are never updated in place.
pub fn save_repo_map_sync(conn: &Connection, map: &RepoMap, project_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        &format!("INSERT INTO repo_maps ({MAP_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
        params![
            map.id,
            project_id,
            map.scope,
            map.map_text,
            map.token_count as i64,
            map.max_tokens as i64,
            map.files_included as i64,
            map.symbols_included as i64,
            map.symbols_total as i64,
            map.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Latest repo map for (project, scope) by creation time.
pub fn get_repo_map_sync(
    conn: &Connection,
    project_id: &str,
    scope: Option<&str>,
) -> rusqlite::Result<Option<RepoMap>> {
    match scope {
        Some(s) => conn
            .query_row(
                &format!(
                    "SELECT {MAP_COLUMNS} FROM repo_maps
                     WHERE project_id = ? AND scope = ?
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![project_id, s],
                map_from_row,
            )
            .optional(),
        None => conn
            .query_row(
                &format!(
                    "SELECT {MAP_COLUMNS} FROM repo_maps
                     WHERE project_id = ? AND scope IS NULL
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![project_id],
                map_from_row,
            )
            .optional(),
    }
}

/// Index statistics for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectStats {
    pub chunks: i64,
    pub nodes: i64,
    pub edges: i64,
    pub symbols: i64,
}

pub fn project_stats_sync(conn: &Connection, project_id: &str) -> rusqlite::Result<ProjectStats> {
    let count = |sql: &str| -> rusqlite::Result<i64> {
        conn.query_row(sql, params![project_id], |r| r.get(0))
    };
    Ok(ProjectStats {
        chunks: count("SELECT COUNT(*) FROM code_chunks WHERE project_id = ?")?,
        nodes: count("SELECT COUNT(*) FROM code_nodes WHERE project_id = ?")?,
        edges: count("SELECT COUNT(*) FROM code_edges WHERE project_id = ?")?,
        symbols: count("SELECT COUNT(*) FROM symbol_definitions WHERE project_id = ?")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_all_migrations;
    use chrono::Utc;

    fn test_map(id: &str, scope: Option<&str>, created_offset_secs: i64) -> RepoMap {
        RepoMap {
            id: id.to_string(),
            project_id: "p".to_string(),
            scope: scope.map(|s| s.to_string()),
            map_text: format!("### map {id}"),
            token_count: 10,
            max_tokens: 100,
            files_included: 1,
            symbols_included: 2,
            symbols_total: 5,
            created_at: Utc::now() + chrono::Duration::seconds(created_offset_secs),
        }
    }

    #[test]
    fn test_latest_map_wins() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        save_repo_map_sync(&conn, &test_map("old", None, 0), "p").unwrap();
        save_repo_map_sync(&conn, &test_map("new", None, 60), "p").unwrap();
        save_repo_map_sync(&conn, &test_map("scoped", Some("src/api/"), 120), "p").unwrap();

        let latest = get_repo_map_sync(&conn, "p", None).unwrap().unwrap();
        assert_eq!(latest.id, "new");

        let scoped = get_repo_map_sync(&conn, "p", Some("src/api/")).unwrap().unwrap();
        assert_eq!(scoped.id, "scoped");

        assert!(get_repo_map_sync(&conn, "p", Some("lib/")).unwrap().is_none());
    }

    #[test]
    fn test_project_stats_empty() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        let stats = project_stats_sync(&conn, "p").unwrap();
        assert_eq!(
            stats,
            ProjectStats {
                chunks: 0,
                nodes: 0,
                edges: 0,
                symbols: 0
            }
        );
    }
}
