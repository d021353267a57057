// crates/vlt-server/src/oracle/mod.rs
// Oracle orchestrator: the multi-source retrieval-and-synthesis pipeline
//
// A query fans out to the configured retrievers, merges and optionally
// reranks, assembles a token-budgeted context, synthesizes an answer with
// citations, and logs the exchange to the per-user conversation. Failures
// degrade: a dead retriever shrinks the context, a dead LLM yields an
// error answer, and an empty result set yields the honest no-context
// response instead of a hallucination.

pub mod analyzer;
pub mod assembler;
pub mod conversation;
pub mod prompts;
pub mod reranker;

use crate::config::Settings;
use crate::db::{self, DatabasePool};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::retrievers::{
    Bm25Retriever, GraphRetriever, Retriever, ThreadRetriever, VaultRetriever, VectorRetriever,
    hybrid_retrieve,
};
use crate::summarizer::ThreadSummaryManager;
use analyzer::analyze_query;
use assembler::assemble_context;
use conversation::ConversationManager;
use prompts::{build_no_context_response, build_synthesis_prompt, extract_citations_from_response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vlt_types::{QueryType, RetrievalResult, SourceType};

/// Results kept in the hybrid merge.
const TOP_K: usize = 20;

/// Sources echoed back in the response.
const RESPONSE_SOURCES: usize = 10;

/// HTTP timeout for the synthesis call.
const SYNTHESIS_TIMEOUT_SECS: u64 = 60;

/// Interim cost heuristic: $0.001 per 1K tokens, reported in cents.
const COST_PER_1K_TOKENS_CENTS: f64 = 0.001 * 100.0;

/// Tunable knobs for one Oracle query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Source filter: any of "code", "vault", "threads". None means all.
    pub sources: Option<Vec<String>>,
    pub explain: bool,
    pub max_context_tokens: usize,
    pub include_repo_map: bool,
    pub user_id: Option<String>,
    pub use_conversation: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            sources: None,
            explain: false,
            max_context_tokens: 16000,
            include_repo_map: true,
            user_id: None,
            use_conversation: true,
        }
    }
}

/// Structured Oracle response.
#[derive(Debug, Clone)]
pub struct OracleResponse {
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
    pub repo_map_slice: Option<String>,
    pub traces: Option<serde_json::Value>,
    pub query_type: QueryType,
    pub model: String,
    pub tokens_used: u64,
    pub cost_cents: f64,
    pub duration_ms: u128,
}

pub struct Oracle {
    pool: Arc<DatabasePool>,
    llm: Arc<LlmClient>,
    summarizer: Arc<ThreadSummaryManager>,
    project_id: String,
    vault_url: String,
}

impl Oracle {
    pub fn new(pool: Arc<DatabasePool>, llm: Arc<LlmClient>, project_id: impl Into<String>) -> Self {
        let summarizer = Arc::new(ThreadSummaryManager::new(pool.clone(), llm.clone()));
        let vault_url = llm.settings().vault_url.clone();
        Self {
            pool,
            llm,
            summarizer,
            project_id: project_id.into(),
            vault_url,
        }
    }

    pub fn settings(&self) -> &Settings {
        self.llm.settings()
    }

    /// Execute the full query pipeline.
    pub async fn query(&self, question: &str, options: QueryOptions) -> Result<OracleResponse> {
        let start = Instant::now();
        let mut timings: HashMap<&'static str, u64> = HashMap::new();

        tracing::info!(question = %crate::utils::truncate(question, 80), "Processing oracle query");

        // Conversation context loads first so its budget share is known
        let manager = ConversationManager::new(self.pool.clone(), self.llm.clone());
        let mut conversation = match (&options.user_id, options.use_conversation) {
            (Some(user_id), true) => Some(
                manager
                    .get_or_create_conversation(&self.project_id, user_id)
                    .await?,
            ),
            _ => None,
        };
        let conversation_context = conversation
            .as_ref()
            .map(|c| manager.get_conversation_context(c, Some(options.max_context_tokens / 4)))
            .unwrap_or_default();

        // Phase 1: query analysis
        let phase = Instant::now();
        let analysis = analyze_query(question);
        timings.insert("query_analysis", phase.elapsed().as_millis() as u64);
        tracing::info!(
            query_type = analysis.query_type.as_str(),
            confidence = analysis.confidence,
            "Query classified"
        );

        // Phase 2: hybrid retrieval
        let phase = Instant::now();
        let retrievers = self.build_retrievers(options.sources.as_deref());
        let use_rerank = self.llm.has_api_key();
        let results = hybrid_retrieve(question, &retrievers, TOP_K, use_rerank, &self.llm).await;
        timings.insert("retrieval", phase.elapsed().as_millis() as u64);

        if results.is_empty() {
            tracing::warn!("No relevant context found for query");
            return Ok(OracleResponse {
                answer: build_no_context_response(question),
                sources: Vec::new(),
                repo_map_slice: None,
                traces: None,
                query_type: analysis.query_type,
                model: "none".to_string(),
                tokens_used: 0,
                cost_cents: 0.0,
                duration_ms: start.elapsed().as_millis(),
            });
        }

        // Partition by source type for assembly; structural hits ride with code
        let code_results: Vec<RetrievalResult> = results
            .iter()
            .filter(|r| {
                matches!(
                    r.source_type,
                    SourceType::Code | SourceType::Definition | SourceType::Reference
                )
            })
            .cloned()
            .collect();
        let vault_results: Vec<RetrievalResult> = results
            .iter()
            .filter(|r| r.source_type == SourceType::Vault)
            .cloned()
            .collect();
        let thread_results: Vec<RetrievalResult> = results
            .iter()
            .filter(|r| r.source_type == SourceType::Thread)
            .cloned()
            .collect();

        tracing::info!(
            code = code_results.len(),
            vault = vault_results.len(),
            threads = thread_results.len(),
            "Retrieved results by source"
        );

        // Phase 3: repo map slice from the latest stored map
        let phase = Instant::now();
        let repo_map_slice = if options.include_repo_map {
            let project_id = self.project_id.clone();
            self.pool
                .run(move |conn| db::get_repo_map_sync(conn, &project_id, None))
                .await?
                .map(|m| m.map_text)
        } else {
            None
        };
        timings.insert("repo_map", phase.elapsed().as_millis() as u64);

        // Phase 4: context assembly, minus the conversation's share
        let phase = Instant::now();
        let retrieval_budget = if conversation_context.is_empty() {
            options.max_context_tokens
        } else {
            options.max_context_tokens - options.max_context_tokens / 4
        };
        let assembled = assemble_context(
            &code_results,
            &vault_results,
            &thread_results,
            repo_map_slice.as_deref(),
            retrieval_budget,
            analysis.query_type,
        );
        timings.insert("context_assembly", phase.elapsed().as_millis() as u64);
        tracing::info!(tokens = assembled.token_count, "Assembled context");

        // Phase 5: synthesis
        let phase = Instant::now();
        let full_context = if conversation_context.is_empty() {
            assembled.context.clone()
        } else {
            format!(
                "# Previous Conversation\n{conversation_context}\n\n# Current Context\n{}",
                assembled.context
            )
        };
        let prompt =
            build_synthesis_prompt(question, &full_context, analysis.query_type, true);
        let (answer, synthesis_tokens, synthesis_cost) = self.synthesize_answer(&prompt).await;
        timings.insert("synthesis", phase.elapsed().as_millis() as u64);

        let citations = extract_citations_from_response(&answer);
        tracing::info!(citations = citations.len(), "Generated answer");

        // Log the exchange; conversation errors must not lose the answer
        if let Some(conversation) = conversation.as_mut() {
            let source_paths: Vec<String> = results
                .iter()
                .take(RESPONSE_SOURCES)
                .map(|r| r.source_path.clone())
                .collect();
            let input_data =
                serde_json::json!({"question": question, "sources": options.sources});
            let output_data = serde_json::json!({"answer": answer, "sources": source_paths});
            if let Err(e) = manager
                .log_exchange(conversation, "ask_oracle", input_data, &output_data, true)
                .await
            {
                tracing::warn!("Failed to log conversation exchange: {}", e);
            }
        }

        let traces = if options.explain {
            Some(self.build_traces(
                &analysis,
                &code_results,
                &vault_results,
                &thread_results,
                &assembled,
                options.max_context_tokens,
                &timings,
                conversation.as_ref(),
            ))
        } else {
            None
        };

        let duration_ms = start.elapsed().as_millis();
        tracing::info!(
            duration_ms,
            tokens = synthesis_tokens,
            "Oracle query complete"
        );

        Ok(OracleResponse {
            answer,
            sources: results.into_iter().take(RESPONSE_SOURCES).collect(),
            repo_map_slice,
            traces,
            query_type: analysis.query_type,
            model: self.llm.synthesis_model().to_string(),
            tokens_used: synthesis_tokens,
            cost_cents: synthesis_cost,
            duration_ms,
        })
    }

    /// Instantiate the retriever set, honoring the source filter.
    fn build_retrievers(&self, sources: Option<&[String]>) -> Vec<Arc<dyn Retriever>> {
        let wants = |name: &str| sources.is_none_or(|s| s.iter().any(|x| x == name));
        let mut retrievers: Vec<Arc<dyn Retriever>> = Vec::new();

        if wants("code") {
            retrievers.push(Arc::new(VectorRetriever::new(
                self.pool.clone(),
                self.llm.clone(),
                self.project_id.clone(),
            )));
            retrievers.push(Arc::new(Bm25Retriever::new(
                self.pool.clone(),
                self.project_id.clone(),
            )));
            retrievers.push(Arc::new(GraphRetriever::new(
                self.pool.clone(),
                self.project_id.clone(),
            )));
        }
        if wants("vault") {
            retrievers.push(Arc::new(VaultRetriever::new(self.vault_url.clone())));
        }
        if wants("threads") {
            retrievers.push(Arc::new(ThreadRetriever::new(
                self.pool.clone(),
                self.llm.clone(),
                self.project_id.clone(),
                Some(self.summarizer.clone()),
            )));
        }

        retrievers
    }

    /// Call the synthesis model. LLM failures become an error answer with
    /// zero tokens rather than a failed query.
    async fn synthesize_answer(&self, prompt: &str) -> (String, u64, f64) {
        if !self.llm.has_api_key() {
            tracing::error!("No API key configured for synthesis");
            return (
                "Error: no API key configured. Run `vlt config set-key <key>`".to_string(),
                0,
                0.0,
            );
        }

        match self
            .llm
            .chat(
                self.llm.synthesis_model(),
                prompt,
                0.3,
                4000,
                Duration::from_secs(SYNTHESIS_TIMEOUT_SECS),
            )
            .await
        {
            Ok(outcome) => {
                let cost = outcome.total_tokens as f64 / 1000.0 * COST_PER_1K_TOKENS_CENTS;
                (outcome.content, outcome.total_tokens, cost)
            }
            Err(e) => {
                tracing::error!("Synthesis failed: {}", e);
                (format!("Error: {e}"), 0, 0.0)
            }
        }
    }

    fn build_traces(
        &self,
        analysis: &analyzer::QueryAnalysis,
        code_results: &[RetrievalResult],
        vault_results: &[RetrievalResult],
        thread_results: &[RetrievalResult],
        assembled: &assembler::AssembledContext,
        max_tokens: usize,
        timings: &HashMap<&'static str, u64>,
        conversation: Option<&vlt_types::OracleConversation>,
    ) -> serde_json::Value {
        let avg = |results: &[RetrievalResult]| -> f64 {
            if results.is_empty() {
                0.0
            } else {
                results.iter().map(|r| r.score as f64).sum::<f64>() / results.len() as f64
            }
        };

        let mut traces = serde_json::json!({
            "query_analysis": {
                "query_type": analysis.query_type.as_str(),
                "confidence": analysis.confidence,
                "extracted_symbols": analysis.extracted_symbols,
                "reasoning": analysis.reasoning,
            },
            "retrieval_stats": {
                "code": {"count": code_results.len(), "avg_score": avg(code_results)},
                "vault": {"count": vault_results.len(), "avg_score": avg(vault_results)},
                "threads": {"count": thread_results.len(), "avg_score": avg(thread_results)},
            },
            "context_stats": {
                "token_count": assembled.token_count,
                "max_tokens": max_tokens,
                "sources_included": assembled.sources_included,
                "sources_excluded": assembled.sources_excluded,
            },
            "timings_ms": timings,
        });

        if let Some(conversation) = conversation {
            traces["conversation"] = serde_json::json!({
                "tokens_used": conversation.tokens_used,
                "token_budget": conversation.token_budget,
                "compression_count": conversation.compression_count,
                "status": conversation.status.as_str(),
            });
        }

        traces
    }
}
