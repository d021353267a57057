// crates/vlt-server/tests/test_utils.rs
// Shared helpers for integration tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use vlt::db::DatabasePool;
use vlt::error::Result;
use vlt::llm::SummaryModel;
use vlt_types::{RetrievalMethod, RetrievalResult, SourceType};

/// Fresh in-memory pool with the full schema.
pub async fn make_pool() -> Arc<DatabasePool> {
    Arc::new(
        DatabasePool::open_in_memory()
            .await
            .expect("failed to open in-memory pool"),
    )
}

/// Summary model that counts invocations and records its inputs.
pub struct CountingSummaryModel {
    pub calls: Mutex<Vec<(String, String)>>,
}

impl CountingSummaryModel {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SummaryModel for CountingSummaryModel {
    async fn generate_summary(&self, context: &str, new_content: &str) -> Result<String> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((context.to_string(), new_content.to_string()));
        Ok(format!("summary v{}", calls.len()))
    }

    fn model_name(&self) -> String {
        "counting-fake".to_string()
    }
}

/// Retriever stub returning a fixed result list.
pub struct StubRetriever {
    pub name: &'static str,
    pub results: Vec<RetrievalResult>,
}

#[async_trait]
impl vlt::retrievers::Retriever for StubRetriever {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn available(&self) -> bool {
        true
    }

    async fn retrieve(&self, _query: &str, limit: usize) -> Result<Vec<RetrievalResult>> {
        Ok(self.results.iter().take(limit).cloned().collect())
    }
}

/// A minimal code result for merge tests.
pub fn code_result(path: &str, score: f32, method: RetrievalMethod) -> RetrievalResult {
    RetrievalResult {
        content: format!("content for {path}"),
        source_type: SourceType::Code,
        source_path: path.to_string(),
        retrieval_method: method,
        score,
        token_count: 16,
        metadata: Default::default(),
    }
}
