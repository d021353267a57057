// src/indexer/mod.rs
// Indexing pipeline: parse → chunk → graph → persist
//
// The delta manager is the only caller of index_file/remove_file: all
// chunk, node, edge and symbol writes flow through a delta commit.

pub mod chunking;
pub mod ctags;
pub mod graph;
pub mod parsers;

use crate::db::{self, DatabasePool};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::vector::embedding_to_bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Index statistics for one run.
#[derive(Debug, Default, Clone)]
pub struct IndexStats {
    pub files: usize,
    pub chunks: usize,
    pub nodes: usize,
    pub edges: usize,
    pub errors: usize,
    pub skipped: usize,
}

/// Source files under a root eligible for indexing.
///
/// Respects gitignore/hidden-file rules via the ignore crate, then filters
/// to supported languages and drops anything matching an exclude fragment.
pub fn scan_source_files(root: &Path, exclude: &[String]) -> Vec<String> {
    let mut files = Vec::new();

    for entry in ignore::WalkBuilder::new(root).build().flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel_str = rel.to_string_lossy().replace('\\', "/");

        if parsers::language_for_path(&rel_str).is_none() {
            continue;
        }
        if exclude.iter().any(|pattern| {
            let fragment = pattern.trim_matches('*').trim_matches('/');
            !fragment.is_empty() && rel_str.contains(fragment)
        }) {
            continue;
        }
        files.push(rel_str);
    }

    files.sort();
    files
}

/// Re-index one file: wipe its derived data, then parse, chunk, graph and
/// persist in that order. The delete and each save are transactional.
pub async fn index_file(
    pool: &Arc<DatabasePool>,
    project_id: &str,
    project_root: &Path,
    file_path: &str,
) -> Result<IndexStats> {
    let absolute = project_root.join(file_path);
    let content = std::fs::read_to_string(&absolute)?;

    let Some(language) = parsers::language_for_path(file_path) else {
        tracing::debug!(file = file_path, "Unsupported extension, skipping");
        return Ok(IndexStats {
            skipped: 1,
            ..Default::default()
        });
    };

    let parsed = parsers::parse_source(&content, language)?;
    let chunks = chunking::chunk_file(project_id, file_path, &content, &parsed);
    let (nodes, edges) = graph::build_graph(project_id, file_path, &parsed);

    let stats = IndexStats {
        files: 1,
        chunks: chunks.len(),
        nodes: nodes.len(),
        edges: edges.len(),
        ..Default::default()
    };

    let pid = project_id.to_string();
    let fp = file_path.to_string();
    pool.run_with_retry(move |conn| {
        db::delete_file_data_sync(conn, &fp, &pid)?;
        db::save_chunks_sync(conn, &chunks, &pid)?;
        db::save_graph_sync(conn, &nodes, &edges, &pid)?;
        Ok::<_, rusqlite::Error>(())
    })
    .await?;

    tracing::debug!(
        file = file_path,
        chunks = stats.chunks,
        nodes = stats.nodes,
        edges = stats.edges,
        "Indexed file"
    );
    Ok(stats)
}

/// Remove a deleted file's derived data.
pub async fn remove_file(
    pool: &Arc<DatabasePool>,
    project_id: &str,
    file_path: &str,
) -> Result<usize> {
    let pid = project_id.to_string();
    let fp = file_path.to_string();
    pool.run(move |conn| db::delete_file_data_sync(conn, &fp, &pid))
        .await
        .map_err(Into::into)
}

/// The librarian path: attach embeddings to chunks that lack them.
/// Runs outside every write path; failures leave chunks pending.
pub async fn embed_pending_chunks(
    pool: &Arc<DatabasePool>,
    llm: &LlmClient,
    project_id: &str,
    batch_size: usize,
) -> Result<usize> {
    if !llm.has_api_key() {
        tracing::debug!("No API key, leaving chunk embeddings pending");
        return Ok(0);
    }

    let pid = project_id.to_string();
    let pending = pool
        .run(move |conn| db::chunks_missing_embedding_sync(conn, &pid, batch_size))
        .await?;

    let mut embedded = 0;
    for chunk in pending {
        let text = format!(
            "{}\n{}\n{}",
            chunk.qualified_name,
            chunk.signature.as_deref().unwrap_or(""),
            chunk.body
        );
        match llm.embed(&text).await {
            Ok(vector) => {
                let blob = embedding_to_bytes(&vector);
                let chunk_id = chunk.id.clone();
                pool.run(move |conn| db::set_chunk_embedding_sync(conn, &chunk_id, &blob))
                    .await?;
                embedded += 1;
            }
            Err(e) => {
                tracing::warn!(chunk = %chunk.id, "Embedding failed: {}", e);
            }
        }
    }

    Ok(embedded)
}

/// Current stored file hashes for a project (file → hash), used by change
/// detection.
pub async fn stored_file_hashes(
    pool: &Arc<DatabasePool>,
    project_id: &str,
) -> Result<HashMap<String, String>> {
    let pid = project_id.to_string();
    pool.run(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT file_path, file_hash FROM code_chunks WHERE project_id = ? GROUP BY file_path",
        )?;
        let rows = stmt
            .query_map([&pid], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .filter_map(|r| r.ok())
            .collect::<HashMap<_, _>>();
        Ok::<_, rusqlite::Error>(rows)
    })
    .await
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_index_file_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/auth.py"),
            "def authenticate_user(username, password):\n    return True\n",
        )
        .unwrap();

        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let stats = index_file(&pool, "p", dir.path(), "src/auth.py").await.unwrap();
        assert_eq!(stats.files, 1);
        assert!(stats.chunks >= 1);
        assert!(stats.nodes >= 2); // module + function

        let chunks = pool
            .run(|conn| db::get_chunks_by_file_sync(conn, "src/auth.py", "p"))
            .await
            .unwrap();
        assert!(chunks.iter().any(|c| c.name == "authenticate_user"));

        // Re-index replaces rather than duplicates
        index_file(&pool, "p", dir.path(), "src/auth.py").await.unwrap();
        let again = pool
            .run(|conn| db::get_chunks_by_file_sync(conn, "src/auth.py", "p"))
            .await
            .unwrap();
        assert_eq!(chunks.len(), again.len());
    }

    #[test]
    fn test_scan_source_files_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("src/b.txt"), "not code\n").unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/c.py"), "x = 1\n").unwrap();

        let files = scan_source_files(dir.path(), &["**/node_modules/**".to_string()]);
        assert_eq!(files, vec!["src/a.py".to_string()]);
    }
}
