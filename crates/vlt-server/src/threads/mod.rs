// crates/vlt-server/src/threads/mod.rs
// Thread and project service: the append-only reasoning log the Oracle
// draws on. Writes never call the model; summaries are generated lazily
// on read.

use crate::db::{self, DatabasePool};
use crate::error::{Result, VltError};
use crate::llm::LlmClient;
use crate::summarizer::ThreadSummaryManager;
use crate::vector::{bytes_to_embedding, cosine_similarity, embedding_to_bytes};
use std::sync::Arc;
use vlt_types::{NodeRecord, ThreadRecord, ThreadStatus};

/// Slug an arbitrary display name into a stable id.
pub fn slugify(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

/// A thread read: lazy summary plus the most recent nodes.
#[derive(Debug, Clone)]
pub struct ThreadStateView {
    pub thread_id: String,
    pub project_id: String,
    pub summary: String,
    pub recent_nodes: Vec<NodeRecord>,
}

/// A semantic hit from thread search.
#[derive(Debug, Clone)]
pub struct SeekResult {
    pub thread_id: String,
    pub sequence_id: i64,
    pub content: String,
    pub author: String,
    pub score: f32,
}

pub struct ThreadService {
    pool: Arc<DatabasePool>,
    llm: Arc<LlmClient>,
    summarizer: Arc<ThreadSummaryManager>,
}

impl ThreadService {
    pub fn new(pool: Arc<DatabasePool>, llm: Arc<LlmClient>) -> Self {
        let summarizer = Arc::new(ThreadSummaryManager::new(pool.clone(), llm.clone()));
        Self {
            pool,
            llm,
            summarizer,
        }
    }

    pub fn summarizer(&self) -> Arc<ThreadSummaryManager> {
        self.summarizer.clone()
    }

    pub async fn create_project(&self, name: &str, description: Option<&str>) -> Result<String> {
        let project_id = slugify(name);
        let pid = project_id.clone();
        let name = name.to_string();
        let description = description.map(|d| d.to_string());
        self.pool
            .run(move |conn| {
                db::get_or_create_project_sync(conn, &pid, &name, description.as_deref())
            })
            .await?;
        Ok(project_id)
    }

    /// Append a thought, creating the project and thread on first use.
    /// This is the write path: no model calls, ever.
    pub async fn push(
        &self,
        project_id: &str,
        thread_name: &str,
        content: &str,
        author: &str,
    ) -> Result<NodeRecord> {
        if content.trim().is_empty() {
            return Err(VltError::InvalidInput("node content is empty".to_string()));
        }

        let thread_id = slugify(thread_name);
        let pid = project_id.to_string();
        let tid = thread_id.clone();
        let content = content.to_string();
        let author = author.to_string();

        self.pool
            .run_with_retry(move |conn| {
                db::get_or_create_project_sync(conn, &pid, &pid, None)?;
                db::get_or_create_thread_sync(conn, &tid, &pid, ThreadStatus::Active)?;
                db::insert_node_sync(conn, &tid, &content, &author)
            })
            .await
            .map_err(Into::into)
    }

    /// Read a thread: lazy summary plus the last `limit` nodes.
    ///
    /// A thread row missing for an id that still has nodes is repaired with
    /// status `recovered` instead of failing the read.
    pub async fn read(
        &self,
        project_id: &str,
        thread_id: &str,
        limit: usize,
    ) -> Result<ThreadStateView> {
        let tid = thread_id.to_string();
        let pid = project_id.to_string();

        let thread = self
            .pool
            .run(move |conn| {
                if let Some(thread) = db::get_thread_sync(conn, &tid)? {
                    return Ok::<_, rusqlite::Error>(Some(thread));
                }
                // Orphaned nodes: auto-repair the thread row
                let count = db::count_nodes_sync(conn, &tid)?;
                if count > 0 {
                    db::get_or_create_project_sync(conn, &pid, &pid, None)?;
                    let repaired =
                        db::get_or_create_thread_sync(conn, &tid, &pid, ThreadStatus::Recovered)?;
                    tracing::warn!(thread = %tid, "Recovered orphaned thread");
                    return Ok(Some(repaired));
                }
                Ok(None)
            })
            .await?
            .ok_or_else(|| VltError::InvalidInput(format!("thread {thread_id} not found")))?;

        // A broken summarizer (no key, model down) must not block reads
        let summary = match self.summarizer.generate_summary(thread_id, false).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(thread = thread_id, "summary generation failed: {}", e);
                "No summary available.".to_string()
            }
        };

        let tid = thread_id.to_string();
        let recent_nodes = self
            .pool
            .run(move |conn| db::recent_nodes_sync(conn, &tid, limit))
            .await?;

        Ok(ThreadStateView {
            thread_id: thread.id,
            project_id: thread.project_id,
            summary,
            recent_nodes,
        })
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<ThreadRecord>> {
        let pid = project_id.to_string();
        self.pool
            .run(move |conn| db::list_threads_sync(conn, &pid))
            .await
            .map_err(Into::into)
    }

    /// Semantic search over the project's embedded nodes. Matched threads
    /// get their summaries refreshed, best-effort.
    pub async fn seek(&self, project_id: &str, query: &str, limit: usize) -> Result<Vec<SeekResult>> {
        let query_embedding = self.llm.embed(query).await?;

        let pid = project_id.to_string();
        let candidates = self
            .pool
            .run(move |conn| db::node_embedding_candidates_sync(conn, &pid))
            .await?;

        let mut scored: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .filter_map(|(i, node)| {
                let blob = node.embedding.as_ref()?;
                let vec = bytes_to_embedding(blob);
                Some((i, cosine_similarity(&query_embedding, &vec)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let results: Vec<SeekResult> = scored
            .into_iter()
            .map(|(i, score)| {
                let node = &candidates[i];
                SeekResult {
                    thread_id: node.thread_id.clone(),
                    sequence_id: node.sequence_id,
                    content: node.content.clone(),
                    author: node.author.clone(),
                    score,
                }
            })
            .collect();

        let mut matched: Vec<&str> = Vec::new();
        for result in &results {
            if !matched.contains(&result.thread_id.as_str()) {
                matched.push(&result.thread_id);
            }
        }
        for thread_id in matched {
            if let Err(e) = self.summarizer.generate_summary(thread_id, false).await {
                tracing::warn!(thread = thread_id, "summary refresh failed: {}", e);
            }
        }

        Ok(results)
    }

    /// Project overview: thread list with node counts.
    pub async fn overview(&self, project_id: &str) -> Result<Vec<(ThreadRecord, i64)>> {
        let threads = self.list(project_id).await?;
        let mut out = Vec::with_capacity(threads.len());
        for thread in threads {
            let tid = thread.id.clone();
            let count = self
                .pool
                .run(move |conn| db::count_nodes_sync(conn, &tid))
                .await?;
            out.push((thread, count));
        }
        Ok(out)
    }

    /// The librarian path: embed nodes that are still missing vectors.
    pub async fn embed_pending_nodes(&self, project_id: &str, batch_size: usize) -> Result<usize> {
        if !self.llm.has_api_key() {
            return Ok(0);
        }

        let pid = project_id.to_string();
        let pending = self
            .pool
            .run(move |conn| db::nodes_missing_embedding_sync(conn, &pid, batch_size))
            .await?;

        let mut embedded = 0;
        for node in pending {
            match self.llm.embed(&node.content).await {
                Ok(vector) => {
                    let blob = embedding_to_bytes(&vector);
                    let node_id = node.id.clone();
                    self.pool
                        .run(move |conn| db::set_node_embedding_sync(conn, &node_id, &blob))
                        .await?;
                    embedded += 1;
                }
                Err(e) => {
                    tracing::warn!(node = %node.id, "Embedding failed: {}", e);
                }
            }
        }
        Ok(embedded)
    }

    /// Tag a node.
    pub async fn add_tag(&self, node_id: &str, tag: &str) -> Result<()> {
        let nid = node_id.to_string();
        let tag = tag.to_string();
        self.pool
            .run(move |conn| db::add_tag_sync(conn, &nid, &tag))
            .await
            .map_err(Into::into)
    }

    /// Link a node to another thread.
    pub async fn add_reference(
        &self,
        source_node_id: &str,
        target_thread: &str,
        note: Option<&str>,
    ) -> Result<String> {
        let nid = source_node_id.to_string();
        let tid = slugify(target_thread);
        let note = note.map(|n| n.to_string());
        self.pool
            .run(move |conn| db::add_reference_sync(conn, &nid, &tid, note.as_deref()))
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn service(pool: Arc<DatabasePool>) -> ThreadService {
        ThreadService::new(pool, Arc::new(LlmClient::new(Settings::default())))
    }

    #[tokio::test]
    async fn test_push_creates_thread_and_sequences() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let service = service(pool.clone());

        let first = service.push("proj", "Auth Design", "use JWT", "user").await.unwrap();
        assert_eq!(first.thread_id, "auth-design");
        assert_eq!(first.sequence_id, 0);

        let second = service.push("proj", "auth-design", "90 day expiry", "claude").await.unwrap();
        assert_eq!(second.sequence_id, 1);
        assert_eq!(second.prev_node_id.as_deref(), Some(first.id.as_str()));

        let threads = service.list("proj").await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].status, ThreadStatus::Active);
    }

    #[tokio::test]
    async fn test_push_rejects_empty_content() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let service = service(pool);
        let err = service.push("proj", "t", "   ", "user").await.unwrap_err();
        assert!(matches!(err, VltError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_read_recovers_orphaned_thread() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());

        // Nodes without a thread row (simulated partial import)
        pool.run(|conn| {
            conn.execute_batch(
                "PRAGMA foreign_keys=OFF;
                 INSERT INTO nodes (id, thread_id, sequence_id, content, author, timestamp)
                 VALUES ('n1', 'ghost', 0, 'orphaned note', 'user', '2025-01-01T00:00:00Z');",
            )?;
            Ok::<_, rusqlite::Error>(())
        })
        .await
        .unwrap();

        let service = service(pool);
        let view = service.read("proj", "ghost", 5).await.unwrap();
        assert_eq!(view.thread_id, "ghost");
        assert_eq!(view.recent_nodes.len(), 1);

        let threads = service.list("proj").await.unwrap();
        assert_eq!(threads[0].status, ThreadStatus::Recovered);
    }

    #[tokio::test]
    async fn test_read_missing_thread_is_invalid_input() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let service = service(pool);
        let err = service.read("proj", "nothing", 5).await.unwrap_err();
        assert!(matches!(err, VltError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_overview_counts_nodes() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let service = service(pool);

        service.push("proj", "alpha", "one", "user").await.unwrap();
        service.push("proj", "alpha", "two", "user").await.unwrap();
        service.push("proj", "beta", "three", "user").await.unwrap();

        let mut overview = service.overview("proj").await.unwrap();
        overview.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].1, 2);
        assert_eq!(overview[1].1, 1);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Auth Design"), "auth-design");
        assert_eq!(slugify("  Already-Slug "), "already-slug");
    }
}
