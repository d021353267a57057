// crates/vlt-server/src/retrievers/graph.rs
// Structural retriever: definition and reference lookups over the ctags
// index and the code graph

use super::Retriever;
use crate::db::{self, DatabasePool};
use crate::error::{Result, VltError};
use crate::utils::estimate_tokens;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use vlt_types::{RetrievalMethod, RetrievalResult, SourceType};

static DEFINITION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bwhere\s+is\s+(\w+)\s+defined\b",
        r"\bdefinition\s+of\s+(\w+)\b",
        r"\bfind\s+(\w+)\s+definition\b",
        r"\bshow\s+me\s+(\w+)\s+definition\b",
        r"\bwhat\s+is\s+(\w+)\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static REFERENCE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bwhere\s+is\s+(\w+)\s+used\b",
        r"\bwhat\s+calls\s+(\w+)\b",
        r"\bwho\s+calls\s+(\w+)\b",
        r"\breferences\s+to\s+(\w+)\b",
        r"\busages\s+of\s+(\w+)\b",
        r"\bfind\s+(\w+)\s+references\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// What a structural query is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StructuralQuery {
    Definition,
    Reference,
}

/// Recognise a structural query and pull out its symbol.
fn detect_structural_query(query: &str) -> Option<(StructuralQuery, String)> {
    let lower = query.to_lowercase();

    for pattern in DEFINITION_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&lower) {
            return Some((StructuralQuery::Definition, caps[1].to_string()));
        }
    }
    for pattern in REFERENCE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&lower) {
            return Some((StructuralQuery::Reference, caps[1].to_string()));
        }
    }
    None
}

/// A resolved code location.
struct Location {
    file_path: String,
    line: u32,
    kind: Option<String>,
    signature: Option<String>,
    qualified_name: Option<String>,
}

/// Retriever for "where is X defined" / "what calls Y" queries.
///
/// Definition lookups consult the ctags index first, then the code graph;
/// anything else falls through to semantic search (handled by the other
/// retrievers in the fan-out). Hits score a flat 1.0 — they are exact.
pub struct GraphRetriever {
    pool: Arc<DatabasePool>,
    project_id: String,
}

impl GraphRetriever {
    pub fn new(pool: Arc<DatabasePool>, project_id: impl Into<String>) -> Self {
        Self {
            pool,
            project_id: project_id.into(),
        }
    }

    async fn find_definition(&self, symbol: &str) -> Result<Option<Location>> {
        // ctags index first
        let project_id = self.project_id.clone();
        let name = symbol.to_string();
        let symbols = self
            .pool
            .run(move |conn| db::symbols_by_name_sync(conn, &project_id, &name))
            .await?;

        if let Some(sym) = symbols.into_iter().next() {
            return Ok(Some(Location {
                file_path: sym.file_path,
                line: sym.line,
                kind: Some(sym.kind),
                signature: sym.signature,
                qualified_name: sym.scope.map(|s| format!("{s}.{}", sym.name)),
            }));
        }

        // then the code graph
        let project_id = self.project_id.clone();
        let name = symbol.to_string();
        let node = self
            .pool
            .run(move |conn| db::code_node_by_name_sync(conn, &project_id, &name))
            .await?;

        Ok(node.map(|n| Location {
            file_path: n.file_path,
            line: n.line.unwrap_or(1),
            kind: Some(n.kind.as_str().to_string()),
            signature: n.signature,
            qualified_name: Some(n.id),
        }))
    }

    async fn find_references(&self, symbol: &str, limit: usize) -> Result<Vec<Location>> {
        let project_id = self.project_id.clone();
        let name = symbol.to_string();
        let edges = self
            .pool
            .run(move |conn| db::edges_for_target_sync(conn, &project_id, &name, limit))
            .await?;

        // The edge's source is where the reference happens; resolve each
        // source node for its file.
        let mut locations = Vec::new();
        for edge in edges {
            let project_id = self.project_id.clone();
            let source_id = edge.source_id.clone();
            let short_name = source_id.rsplit('.').next().unwrap_or(&source_id).to_string();
            let node = self
                .pool
                .run(move |conn| db::code_node_by_name_sync(conn, &project_id, &short_name))
                .await?;

            if let Some(n) = node {
                locations.push(Location {
                    file_path: n.file_path,
                    line: edge.line.or(n.line).unwrap_or(1),
                    kind: Some(edge.kind.as_str().to_string()),
                    signature: n.signature,
                    qualified_name: Some(edge.source_id),
                });
            }
        }
        Ok(locations)
    }

    fn location_to_result(
        &self,
        location: Location,
        symbol: &str,
        source_type: SourceType,
    ) -> RetrievalResult {
        let mut parts = Vec::new();
        match source_type {
            SourceType::Definition => parts.push(format!("# Definition of {symbol}")),
            _ => parts.push(format!("# Reference to {symbol}")),
        }
        parts.push(format!("**File**: {}", location.file_path));
        parts.push(format!("**Line**: {}", location.line));
        if let Some(qn) = &location.qualified_name {
            parts.push(format!("**Qualified Name**: {qn}"));
        }
        if let Some(kind) = &location.kind {
            parts.push(format!("**Kind**: {kind}"));
        }
        if let Some(sig) = &location.signature {
            parts.push(format!("**Signature**: {sig}"));
        }
        let content = parts.join("\n");

        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("file_path".to_string(), location.file_path.clone().into());
        metadata.insert("line".to_string(), location.line.into());
        if let Some(kind) = location.kind {
            metadata.insert("kind".to_string(), kind.into());
        }
        if let Some(qn) = location.qualified_name {
            metadata.insert("qualified_name".to_string(), qn.into());
        }

        RetrievalResult {
            token_count: estimate_tokens(&content),
            content,
            source_type,
            source_path: format!("{}:{}", location.file_path, location.line),
            retrieval_method: RetrievalMethod::Graph,
            // Exact structural match
            score: 1.0,
            metadata,
        }
    }
}

#[async_trait]
impl Retriever for GraphRetriever {
    fn name(&self) -> &'static str {
        "graph"
    }

    async fn available(&self) -> bool {
        true
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievalResult>> {
        let Some((kind, symbol)) = detect_structural_query(query) else {
            tracing::debug!("Query not recognised as structural");
            return Ok(Vec::new());
        };

        tracing::debug!(?kind, symbol = %symbol, "Detected structural query");

        match kind {
            StructuralQuery::Definition => {
                let location = self
                    .find_definition(&symbol)
                    .await
                    .map_err(|e| VltError::retriever(self.name(), e.to_string()))?;
                Ok(location
                    .map(|loc| vec![self.location_to_result(loc, &symbol, SourceType::Definition)])
                    .unwrap_or_default())
            }
            StructuralQuery::Reference => {
                let locations = self
                    .find_references(&symbol, limit)
                    .await
                    .map_err(|e| VltError::retriever(self.name(), e.to_string()))?;
                Ok(locations
                    .into_iter()
                    .map(|loc| self.location_to_result(loc, &symbol, SourceType::Reference))
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_definition_queries() {
        let cases = [
            "Where is authenticate_user defined?",
            "definition of UserService",
            "find parse_file definition",
            "show me Oracle definition",
            "what is DeltaManager",
        ];
        for case in cases {
            let (kind, _) = detect_structural_query(case).expect(case);
            assert_eq!(kind, StructuralQuery::Definition, "{case}");
        }

        let (_, symbol) = detect_structural_query("Where is authenticate_user defined?").unwrap();
        assert_eq!(symbol, "authenticate_user");
    }

    #[test]
    fn test_detect_reference_queries() {
        let cases = [
            "where is authenticate used",
            "what calls authenticate",
            "who calls push_node",
            "references to VectorService",
            "usages of estimate_tokens",
            "find rerank references",
        ];
        for case in cases {
            let (kind, _) = detect_structural_query(case).expect(case);
            assert_eq!(kind, StructuralQuery::Reference, "{case}");
        }
    }

    #[test]
    fn test_non_structural_query_is_none() {
        assert!(detect_structural_query("How does the token budget work?").is_none());
        assert!(detect_structural_query("explain the indexing flow").is_none());
    }
}
