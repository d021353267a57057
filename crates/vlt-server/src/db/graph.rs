// db/graph.rs
// Code graph nodes and edges

use rusqlite::{Connection, OptionalExtension, params};
use vlt_types::{CodeEdge, CodeNode, CodeNodeKind, EdgeKind};

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CodeNode> {
    let kind: String = row.get(3)?;
    Ok(CodeNode {
        id: row.get(0)?,
        project_id: row.get(1)?,
        file_path: row.get(2)?,
        kind: CodeNodeKind::parse(&kind).unwrap_or(CodeNodeKind::Function),
        name: row.get(4)?,
        signature: row.get(5)?,
        line: row.get(6)?,
        docstring: row.get(7)?,
        centrality_score: row.get(8)?,
    })
}

fn edge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CodeEdge> {
    let kind: String = row.get(4)?;
    Ok(CodeEdge {
        id: row.get(0)?,
        project_id: row.get(1)?,
        source_id: row.get(2)?,
        target_id: row.get(3)?,
        kind: EdgeKind::parse(&kind).unwrap_or(EdgeKind::Calls),
        line: row.get(5)?,
        count: row.get(6)?,
    })
}

const NODE_COLUMNS: &str =
    "id, project_id, file_path, kind, name, signature, line, docstring, centrality_score";
const EDGE_COLUMNS: &str = "id, project_id, source_id, target_id, kind, line, count";

/// Persist graph nodes and edges in one transaction.
///
/// Nodes are keyed (qualified id, project); a re-indexed file replaces its
/// rows via INSERT OR REPLACE.
pub fn save_graph_sync(
    conn: &Connection,
    nodes: &[CodeNode],
    edges: &[CodeEdge],
    project_id: &str,
) -> rusqlite::Result<(usize, usize)> {
    let tx = conn.unchecked_transaction()?;

    for node in nodes {
        tx.execute(
            &format!("INSERT OR REPLACE INTO code_nodes ({NODE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                node.id,
                project_id,
                node.file_path,
                node.kind.as_str(),
                node.name,
                node.signature,
                node.line,
                node.docstring,
                node.centrality_score,
            ],
        )?;
    }

    for edge in edges {
        tx.execute(
            &format!("INSERT INTO code_edges ({EDGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"),
            params![
                edge.id,
                project_id,
                edge.source_id,
                edge.target_id,
                edge.kind.as_str(),
                edge.line,
                edge.count,
            ],
        )?;
    }

    tx.commit()?;
    Ok((nodes.len(), edges.len()))
}

pub fn get_code_nodes_sync(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<CodeNode>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {NODE_COLUMNS} FROM code_nodes WHERE project_id = ?"))?;
    let rows = stmt
        .query_map(params![project_id], node_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn get_code_edges_sync(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<CodeEdge>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {EDGE_COLUMNS} FROM code_edges WHERE project_id = ?"))?;
    let rows = stmt
        .query_map(params![project_id], edge_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Look up a graph node by short name.
pub fn code_node_by_name_sync(
    conn: &Connection,
    project_id: &str,
    name: &str,
) -> rusqlite::Result<Option<CodeNode>> {
    conn.query_row(
        &format!(
            "SELECT {NODE_COLUMNS} FROM code_nodes
             WHERE project_id = ? AND name = ? LIMIT 1"
        ),
        params![project_id, name],
        node_from_row,
    )
    .optional()
}

/// Edges pointing at a symbol, by exact qualified id or trailing short name.
pub fn edges_for_target_sync(
    conn: &Connection,
    project_id: &str,
    symbol: &str,
    limit: usize,
) -> rusqlite::Result<Vec<CodeEdge>> {
    let suffix = format!("%.{symbol}");
    let mut stmt = conn.prepare(&format!(
        "SELECT {EDGE_COLUMNS} FROM code_edges
         WHERE project_id = ? AND (target_id = ? OR target_id LIKE ?)
         LIMIT ?"
    ))?;
    let rows = stmt
        .query_map(params![project_id, symbol, suffix, limit as i64], edge_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Write centrality scores back onto graph nodes.
pub fn update_centrality_sync(
    conn: &Connection,
    project_id: &str,
    scores: &[(String, f64)],
) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for (id, score) in scores {
        tx.execute(
            "UPDATE code_nodes SET centrality_score = ? WHERE project_id = ? AND id = ?",
            params![score, project_id, id],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_all_migrations;

    fn test_node(id: &str, name: &str, file: &str) -> CodeNode {
        CodeNode {
            id: id.to_string(),
            project_id: "p".to_string(),
            file_path: file.to_string(),
            kind: CodeNodeKind::Function,
            name: name.to_string(),
            signature: None,
            line: Some(1),
            docstring: None,
            centrality_score: None,
        }
    }

    fn test_edge(source: &str, target: &str, kind: EdgeKind) -> CodeEdge {
        CodeEdge {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: "p".to_string(),
            source_id: source.to_string(),
            target_id: target.to_string(),
            kind,
            line: Some(3),
            count: 1,
        }
    }

    #[test]
    fn test_save_and_query_graph() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        let nodes = vec![
            test_node("m.caller", "caller", "src/a.py"),
            test_node("m.callee", "callee", "src/b.py"),
        ];
        let edges = vec![test_edge("m.caller", "m.callee", EdgeKind::Calls)];
        let (n, e) = save_graph_sync(&conn, &nodes, &edges, "p").unwrap();
        assert_eq!((n, e), (2, 1));

        let found = code_node_by_name_sync(&conn, "p", "callee").unwrap().unwrap();
        assert_eq!(found.id, "m.callee");

        // Exact qualified id and trailing short name both resolve
        assert_eq!(edges_for_target_sync(&conn, "p", "m.callee", 10).unwrap().len(), 1);
        assert_eq!(edges_for_target_sync(&conn, "p", "callee", 10).unwrap().len(), 1);
        assert!(edges_for_target_sync(&conn, "p", "nothing", 10).unwrap().is_empty());
    }

    #[test]
    fn test_update_centrality() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        save_graph_sync(&conn, &[test_node("m.f", "f", "src/a.py")], &[], "p").unwrap();
        update_centrality_sync(&conn, "p", &[("m.f".to_string(), 0.75)]).unwrap();

        let node = code_node_by_name_sync(&conn, "p", "f").unwrap().unwrap();
        assert_eq!(node.centrality_score, Some(0.75));
    }
}
