// crates/vlt-types/src/lib.rs
// Shared data model for vlt: projects, threads, the code index, and the
// retrieval contract used by every retriever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Thread lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Active,
    Archived,
    /// Re-created automatically for orphaned nodes.
    Recovered,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Recovered => "recovered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            "recovered" => Some(Self::Recovered),
            _ => None,
        }
    }
}

/// Origin category of a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Code,
    Vault,
    Thread,
    Definition,
    Reference,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Vault => "vault",
            Self::Thread => "thread",
            Self::Definition => "definition",
            Self::Reference => "reference",
        }
    }
}

/// How a result was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    Vector,
    Bm25,
    Graph,
    Ctags,
    /// Reserved for a future SCIP-backed index.
    Scip,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Bm25 => "bm25",
            Self::Graph => "graph",
            Self::Ctags => "ctags",
            Self::Scip => "scip",
        }
    }
}

/// A single result from any retrieval path.
///
/// `score` is normalised to [0, 1]; `source_path` is one of
/// `file:line`, `note/path.md`, or `thread:<id>#<seq>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub source_type: SourceType,
    pub source_path: String,
    pub retrieval_method: RetrievalMethod,
    pub score: f32,
    pub token_count: usize,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Detected intent of an Oracle query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Definition,
    References,
    Conceptual,
    Behavioral,
    Unknown,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::References => "references",
            Self::Conceptual => "conceptual",
            Self::Behavioral => "behavioral",
            Self::Unknown => "unknown",
        }
    }
}

/// Kind of an indexed code chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Class,
    Method,
    Module,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "class" => Some(Self::Class),
            "method" => Some(Self::Method),
            "module" => Some(Self::Module),
            _ => None,
        }
    }
}

/// A unit of indexed source code with optional semantic embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: String,
    pub project_id: String,
    pub file_path: String,
    /// MD5 of the file content, for change detection.
    pub file_hash: String,
    pub chunk_kind: ChunkKind,
    pub name: String,
    pub qualified_name: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub imports: Option<String>,
    pub class_context: Option<String>,
    pub signature: Option<String>,
    pub decorators: Option<String>,
    pub docstring: Option<String>,
    pub body: String,
    /// Little-endian packed f32 vector, absent until the librarian runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<u8>>,
    pub token_count: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of a code graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeNodeKind {
    Function,
    Class,
    Method,
    Module,
}

impl CodeNodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "class" => Some(Self::Class),
            "method" => Some(Self::Method),
            "module" => Some(Self::Module),
            _ => None,
        }
    }
}

/// A node in the code reference graph, keyed by qualified name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeNode {
    /// Qualified name, e.g. `services.user.UserService.get_user`.
    pub id: String,
    pub project_id: String,
    pub file_path: String,
    pub kind: CodeNodeKind,
    pub name: String,
    pub signature: Option<String>,
    pub line: Option<u32>,
    pub docstring: Option<String>,
    pub centrality_score: Option<f64>,
}

/// Kind of a code graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Calls,
    Imports,
    Inherits,
    References,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Imports => "imports",
            Self::Inherits => "inherits",
            Self::References => "references",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calls" => Some(Self::Calls),
            "imports" => Some(Self::Imports),
            "inherits" => Some(Self::Inherits),
            "references" => Some(Self::References),
            _ => None,
        }
    }
}

/// A directed edge in the code reference graph.
///
/// `target_id` that matches no CodeNode in the project is an unresolved
/// external symbol (typical for imports).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeEdge {
    pub id: String,
    pub project_id: String,
    pub source_id: String,
    pub target_id: String,
    pub kind: EdgeKind,
    pub line: Option<u32>,
    pub count: u32,
}

/// A symbol from the external ctags index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolDefinition {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub file_path: String,
    pub line: u32,
    pub kind: String,
    pub scope: Option<String>,
    pub signature: Option<String>,
    pub language: String,
}

/// A rendered, token-budgeted repository map. Append-only; consumers take
/// the latest row for (project, scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMap {
    pub id: String,
    pub project_id: String,
    pub scope: Option<String>,
    pub map_text: String,
    pub token_count: usize,
    pub max_tokens: usize,
    pub files_included: usize,
    pub symbols_included: usize,
    pub symbols_total: usize,
    pub created_at: DateTime<Utc>,
}

/// A thread of reasoning notes under a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    pub project_id: String,
    pub status: ThreadStatus,
}

/// A single immutable note within a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub thread_id: String,
    /// Strictly increasing within the thread.
    pub sequence_id: i64,
    pub content: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub prev_node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<u8>>,
}

/// Cached thread summary with the staleness anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummaryCache {
    pub thread_id: String,
    pub summary: String,
    pub last_node_id: String,
    pub node_count: i64,
    pub model_used: String,
    pub tokens_used: i64,
    pub generated_at: DateTime<Utc>,
}

/// Oracle conversation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Compressed,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Compressed => "compressed",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "compressed" => Some(Self::Compressed),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// One tool invocation within an Oracle conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub tool_name: String,
    pub input_data: serde_json::Value,
    pub output_summary: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub mentioned_symbols: Vec<String>,
    #[serde(default)]
    pub mentioned_files: Vec<String>,
    #[serde(default)]
    pub token_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Per-user, per-project Oracle session state. The exchange log lives in a
/// single JSON blob that is always replaced as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConversation {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub token_budget: usize,
    pub tokens_used: usize,
    pub compressed_summary: Option<String>,
    pub recent_exchanges: Vec<Exchange>,
    pub status: ConversationStatus,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub compression_count: u32,
    pub mentioned_symbols: Vec<String>,
    pub mentioned_files: Vec<String>,
}

/// Kind of a detected file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "modified" => Some(Self::Modified),
            "deleted" => Some(Self::Deleted),
            "unchanged" => Some(Self::Unchanged),
            _ => None,
        }
    }
}

/// Priority of a queued delta. Ordering matters: Critical > High > Normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaPriority {
    Normal = 0,
    High = 1,
    Critical = 2,
}

impl DeltaPriority {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            2 => Self::Critical,
            1 => Self::High,
            _ => Self::Normal,
        }
    }
}

/// Processing state of a queued delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl DeltaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One queued file change awaiting re-indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaQueueEntry {
    pub id: String,
    pub project_id: String,
    pub file_path: String,
    pub change_kind: ChangeKind,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub lines_changed: u32,
    pub priority: DeltaPriority,
    pub status: DeltaStatus,
    pub queued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_serde() {
        let json = serde_json::to_string(&SourceType::Definition).unwrap();
        assert_eq!(json, "\"definition\"");
        let back: SourceType = serde_json::from_str("\"vault\"").unwrap();
        assert_eq!(back, SourceType::Vault);
    }

    #[test]
    fn test_delta_priority_ordering() {
        assert!(DeltaPriority::Critical > DeltaPriority::High);
        assert!(DeltaPriority::High > DeltaPriority::Normal);
        assert_eq!(DeltaPriority::from_i64(2), DeltaPriority::Critical);
        assert_eq!(DeltaPriority::from_i64(7), DeltaPriority::Normal);
    }

    #[test]
    fn test_exchange_roundtrip() {
        let exchange = Exchange {
            tool_name: "ask_oracle".to_string(),
            input_data: serde_json::json!({"question": "how does auth work?"}),
            output_summary: "JWT based".to_string(),
            key_insights: vec!["auth is defined in src/auth.py".to_string()],
            mentioned_symbols: vec!["authenticate_user".to_string()],
            mentioned_files: vec!["src/auth.py".to_string()],
            token_count: 42,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&exchange).unwrap();
        let back: Exchange = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_name, "ask_oracle");
        assert_eq!(back.token_count, 42);
        assert_eq!(back.mentioned_files, vec!["src/auth.py"]);
    }

    #[test]
    fn test_thread_status_parse() {
        assert_eq!(ThreadStatus::parse("recovered"), Some(ThreadStatus::Recovered));
        assert_eq!(ThreadStatus::parse("bogus"), None);
    }
}
