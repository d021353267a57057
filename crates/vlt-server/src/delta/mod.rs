// crates/vlt-server/src/delta/mod.rs
// Delta-based re-indexing: change detection, a coalescing queue with
// commit thresholds, and the just-in-time path that promotes files an
// incoming query is about to need

use crate::config::DeltaConfig;
use crate::db::{self, DatabasePool};
use crate::error::Result;
use crate::indexer;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use vlt_types::{ChangeKind, DeltaPriority, DeltaQueueEntry, DeltaStatus};

/// Line estimate for a deleted file (its real size is gone).
const DELETED_FILE_LINE_ESTIMATE: u32 = 100;

/// 32-hex MD5 of a file's bytes.
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(format!("{:x}", md5::compute(&bytes)))
}

/// Compare a file against its last known hash.
///
/// Returns (kind, old_hash, new_hash): added when there was no known hash,
/// deleted when the file is gone, modified when the hashes differ.
pub fn detect_file_changes(
    path: &Path,
    known_hash: Option<&str>,
) -> Result<(ChangeKind, Option<String>, Option<String>)> {
    if !path.exists() {
        return Ok((
            if known_hash.is_some() {
                ChangeKind::Deleted
            } else {
                ChangeKind::Unchanged
            },
            known_hash.map(|h| h.to_string()),
            None,
        ));
    }

    let new_hash = calculate_file_hash(path)?;
    match known_hash {
        None => Ok((ChangeKind::Added, None, Some(new_hash))),
        Some(old) if old != new_hash => {
            Ok((ChangeKind::Modified, Some(old.to_string()), Some(new_hash)))
        }
        Some(old) => Ok((ChangeKind::Unchanged, Some(old.to_string()), Some(new_hash))),
    }
}

/// Estimate how many lines a change touches.
///
/// Added files count every line; modifications are estimated at a quarter
/// of the file; deletions fall back to a fixed estimate.
pub fn count_lines_changed(path: &Path, kind: ChangeKind) -> u32 {
    match kind {
        ChangeKind::Deleted => DELETED_FILE_LINE_ESTIMATE,
        ChangeKind::Unchanged => 0,
        ChangeKind::Added | ChangeKind::Modified => {
            let lines = std::fs::read_to_string(path)
                .map(|c| c.lines().count() as u32)
                .unwrap_or(0);
            if kind == ChangeKind::Added {
                lines
            } else {
                lines / 4
            }
        }
    }
}

/// Path-shaped tokens in a query, e.g. `src/auth.py` or `auth.py`.
static PATH_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+[./_\-])*\w+\.\w+").unwrap_or_else(|_| Regex::new(r"\w+\.\w+").unwrap()));

/// Identifier-shaped tokens (PascalCase / snake_case) for stem matching.
static IDENT_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[A-Z][a-zA-Z0-9]+|[a-z][a-z0-9]*(?:_[a-z0-9]+)+)\b")
        .unwrap_or_else(|_| Regex::new(r"\w+").unwrap())
});

/// Pending files an incoming query is talking about.
///
/// First pass matches literal path tokens against pending paths; second
/// pass matches file stems against identifier tokens (UserService →
/// user_service.py).
pub fn get_files_matching_query(query: &str, pending_files: &[String]) -> Vec<String> {
    let mut matches = Vec::new();

    for token in PATH_TOKEN_RE.find_iter(query) {
        let token = token.as_str();
        for file in pending_files {
            if (file.ends_with(token) || token.ends_with(file.as_str()) || file == token)
                && !matches.contains(file)
            {
                matches.push(file.clone());
            }
        }
    }

    for ident in IDENT_TOKEN_RE.find_iter(query) {
        let stem_guess = camel_to_snake(ident.as_str());
        for file in pending_files {
            let stem = Path::new(file)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            if stem == stem_guess && !matches.contains(file) {
                matches.push(file.clone());
            }
        }
    }

    matches
}

fn camel_to_snake(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    for (i, c) in ident.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Manager for one project's delta queue.
pub struct DeltaQueueManager {
    pool: Arc<DatabasePool>,
    project_id: String,
    config: DeltaConfig,
}

impl DeltaQueueManager {
    pub fn new(pool: Arc<DatabasePool>, project_id: impl Into<String>, config: DeltaConfig) -> Self {
        Self {
            pool,
            project_id: project_id.into(),
            config,
        }
    }

    /// Queue a detected change. Coalesces by path, keeping max priority.
    pub async fn queue_file_change(
        &self,
        file_path: &str,
        change_kind: ChangeKind,
        old_hash: Option<String>,
        new_hash: Option<String>,
        lines_changed: u32,
        priority: DeltaPriority,
    ) -> Result<()> {
        let entry = DeltaQueueEntry {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: self.project_id.clone(),
            file_path: file_path.to_string(),
            change_kind,
            old_hash,
            new_hash,
            lines_changed,
            priority,
            status: DeltaStatus::Queued,
            queued_at: Utc::now(),
        };

        self.pool
            .run_with_retry(move |conn| db::upsert_delta_sync(conn, &entry))
            .await
            .map_err(Into::into)
    }

    /// True iff any commit threshold holds: queued files, line volume, or
    /// queue age.
    pub async fn check_thresholds(&self) -> Result<bool> {
        let pid = self.project_id.clone();
        let stats = self
            .pool
            .run(move |conn| db::delta_queue_stats_sync(conn, &pid))
            .await?;

        if stats.queued_files >= self.config.file_threshold {
            return Ok(true);
        }
        if stats.total_lines >= self.config.line_threshold {
            return Ok(true);
        }
        if let Some(oldest) = stats.oldest_queued_at {
            let age = Utc::now().signed_duration_since(oldest);
            if age.num_seconds() >= self.config.timeout_seconds as i64 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Pending file paths in drain order.
    pub async fn pending_files(&self) -> Result<Vec<String>> {
        let pid = self.project_id.clone();
        let entries = self
            .pool
            .run(move |conn| db::queued_entries_sync(conn, &pid))
            .await?;
        Ok(entries.into_iter().map(|e| e.file_path).collect())
    }

    /// JIT path: promote queue entries the query mentions to critical.
    /// Returns the promoted paths.
    pub async fn promote_for_query(&self, query: &str) -> Result<Vec<String>> {
        if !self.config.jit_indexing {
            return Ok(Vec::new());
        }

        let pending = self.pending_files().await?;
        let matches = get_files_matching_query(query, &pending);
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let pid = self.project_id.clone();
        let paths = matches.clone();
        self.pool
            .run(move |conn| db::promote_to_critical_sync(conn, &pid, &paths))
            .await?;

        tracing::info!(files = ?matches, "Promoted queue entries for query");
        Ok(matches)
    }

    /// Drain the queue: re-index each file (or drop its data when deleted),
    /// recording done/failed per entry. Priority order means JIT-promoted
    /// files are processed first.
    pub async fn commit_pending(&self, project_root: &Path) -> Result<CommitOutcome> {
        let pid = self.project_id.clone();
        let entries = self
            .pool
            .run(move |conn| db::queued_entries_sync(conn, &pid))
            .await?;

        let mut outcome = CommitOutcome::default();

        for entry in entries {
            let entry_id = entry.id.clone();
            self.set_status(&entry_id, DeltaStatus::Running, None).await?;

            let result = match entry.change_kind {
                ChangeKind::Deleted => {
                    indexer::remove_file(&self.pool, &self.project_id, &entry.file_path)
                        .await
                        .map(|_| ())
                }
                _ => indexer::index_file(&self.pool, &self.project_id, project_root, &entry.file_path)
                    .await
                    .map(|stats| {
                        outcome.chunks += stats.chunks;
                        outcome.nodes += stats.nodes;
                        outcome.edges += stats.edges;
                    }),
            };

            match result {
                Ok(()) => {
                    self.set_status(&entry_id, DeltaStatus::Done, None).await?;
                    outcome.processed.push(entry.file_path);
                }
                Err(e) => {
                    tracing::error!(file = %entry.file_path, "Delta commit failed: {}", e);
                    self.set_status(&entry_id, DeltaStatus::Failed, Some(e.to_string()))
                        .await?;
                    outcome.failed.push(entry.file_path);
                }
            }
        }

        tracing::info!(
            processed = outcome.processed.len(),
            failed = outcome.failed.len(),
            "Delta commit complete"
        );
        Ok(outcome)
    }

    async fn set_status(&self, entry_id: &str, status: DeltaStatus, error: Option<String>) -> Result<()> {
        let id = entry_id.to_string();
        self.pool
            .run(move |conn| db::set_delta_status_sync(conn, &id, status, error.as_deref()))
            .await
            .map_err(Into::into)
    }

    /// Scan the project tree against stored hashes and queue every change.
    pub async fn scan_and_queue(
        &self,
        project_root: &Path,
        exclude: &[String],
    ) -> Result<usize> {
        let known = indexer::stored_file_hashes(&self.pool, &self.project_id).await?;
        let on_disk = indexer::scan_source_files(project_root, exclude);

        let mut queued = 0;

        for file in &on_disk {
            let absolute = project_root.join(file);
            let (kind, old_hash, new_hash) =
                detect_file_changes(&absolute, known.get(file).map(|s| s.as_str()))?;
            if kind == ChangeKind::Unchanged {
                continue;
            }
            let lines = count_lines_changed(&absolute, kind);
            self.queue_file_change(file, kind, old_hash, new_hash, lines, DeltaPriority::Normal)
                .await?;
            queued += 1;
        }

        // Files that vanished since the last index
        let on_disk_set: HashMap<&str, ()> = on_disk.iter().map(|f| (f.as_str(), ())).collect();
        for (file, hash) in &known {
            if !on_disk_set.contains_key(file.as_str()) {
                self.queue_file_change(
                    file,
                    ChangeKind::Deleted,
                    Some(hash.clone()),
                    None,
                    DELETED_FILE_LINE_ESTIMATE,
                    DeltaPriority::Normal,
                )
                .await?;
                queued += 1;
            }
        }

        Ok(queued)
    }
}

/// Result of draining the queue.
#[derive(Debug, Default)]
pub struct CommitOutcome {
    pub processed: Vec<String>,
    pub failed: Vec<String>,
    pub chunks: usize,
    pub nodes: usize,
    pub edges: usize,
}
