// crates/vlt-server/tests/integration.rs
// End-to-end scenarios over in-memory databases: oracle responses,
// hybrid merging, lazy summaries, conversation compression, and the
// delta queue's just-in-time path.

mod test_utils;

use std::sync::Arc;
use test_utils::{CountingSummaryModel, StubRetriever, code_result, make_pool};
use vlt::config::{DeltaConfig, Settings};
use vlt::db;
use vlt::delta::DeltaQueueManager;
use vlt::llm::LlmClient;
use vlt::oracle::conversation::ConversationManager;
use vlt::oracle::{Oracle, QueryOptions};
use vlt::retrievers::{Retriever, hybrid_retrieve};
use vlt::summarizer::ThreadSummaryManager;
use vlt::threads::ThreadService;
use vlt_types::{
    ChangeKind, ConversationStatus, DeltaPriority, QueryType, RetrievalMethod, SourceType,
    SymbolDefinition,
};

fn offline_llm() -> Arc<LlmClient> {
    // No API key: every LLM-dependent path must take its deterministic
    // fallback.
    Arc::new(LlmClient::new(Settings::default()))
}

// Scenario: empty database yields the honest no-context response.
#[tokio::test]
async fn test_no_context_honest_response() {
    let pool = make_pool().await;
    let oracle = Oracle::new(pool, offline_llm(), "empty-project");

    let response = oracle
        .query(
            "How does auth work?",
            QueryOptions {
                // Skip the vault so the test has no network dependency
                sources: Some(vec!["code".to_string(), "threads".to_string()]),
                user_id: None,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(response.sources.is_empty());
    assert_eq!(response.model, "none");
    assert_eq!(response.tokens_used, 0);
    assert_eq!(response.cost_cents, 0.0);
    assert!(response.answer.contains("could not find any relevant information"));
}

// Scenario: a ctags hit answers a definition query with an exact source.
#[tokio::test]
async fn test_definition_query_hits_ctags_index() {
    let pool = make_pool().await;

    let symbols = vec![SymbolDefinition {
        id: "s1".to_string(),
        project_id: "p".to_string(),
        name: "authenticate_user".to_string(),
        file_path: "src/auth.py".to_string(),
        line: 42,
        kind: "function".to_string(),
        scope: None,
        signature: Some("def authenticate_user(username, password)".to_string()),
        language: "python".to_string(),
    }];
    pool.run(move |conn| db::save_symbols_sync(conn, &symbols, "p"))
        .await
        .unwrap();

    let oracle = Oracle::new(pool, offline_llm(), "p");
    let response = oracle
        .query(
            "Where is authenticate_user defined?",
            QueryOptions {
                sources: Some(vec!["code".to_string()]),
                user_id: None,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.query_type, QueryType::Definition);
    assert!(!response.sources.is_empty());
    let top = &response.sources[0];
    assert_eq!(top.source_path, "src/auth.py:42");
    assert_eq!(top.score, 1.0);
    assert_eq!(top.source_type, SourceType::Definition);
    assert!(top.content.contains("Definition of authenticate_user"));
}

// Scenario: hybrid merge orders by score with the reranker disabled.
#[tokio::test]
async fn test_hybrid_merge_orders_by_score() {
    let retrievers: Vec<Arc<dyn Retriever>> = vec![
        Arc::new(StubRetriever {
            name: "vector",
            results: vec![code_result("src/a.py:1", 0.9, RetrievalMethod::Vector)],
        }),
        Arc::new(StubRetriever {
            name: "bm25",
            results: vec![code_result("src/b.py:1", 1.0, RetrievalMethod::Bm25)],
        }),
    ];

    let llm = offline_llm();
    let merged = hybrid_retrieve("anything", &retrievers, 2, false, &llm).await;

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].source_path, "src/b.py:1");
    assert_eq!(merged[1].source_path, "src/a.py:1");
}

// Scenario: duplicate source paths collapse, first (highest-scored) wins.
#[tokio::test]
async fn test_hybrid_merge_dedupes_by_source_path() {
    let retrievers: Vec<Arc<dyn Retriever>> = vec![
        Arc::new(StubRetriever {
            name: "vector",
            results: vec![
                code_result("src/dup.py:1", 0.7, RetrievalMethod::Vector),
                code_result("src/only.py:1", 0.4, RetrievalMethod::Vector),
            ],
        }),
        Arc::new(StubRetriever {
            name: "bm25",
            results: vec![code_result("src/dup.py:1", 0.3, RetrievalMethod::Bm25)],
        }),
    ];

    let llm = offline_llm();
    let merged = hybrid_retrieve("anything", &retrievers, 10, false, &llm).await;

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].source_path, "src/dup.py:1");
    assert!((merged[0].score - 0.7).abs() < 1e-6);
    assert_eq!(merged[0].retrieval_method, RetrievalMethod::Vector);
}

// Scenario: first read summarises everything once; appends are free until
// the next read, which folds in only the new nodes.
#[tokio::test]
async fn test_lazy_incremental_summarization() {
    let pool = make_pool().await;
    let service = ThreadService::new(pool.clone(), offline_llm());

    for i in 0..5 {
        service
            .push("p", "design", &format!("thought {i}"), "user")
            .await
            .unwrap();
    }

    let model = Arc::new(CountingSummaryModel::new());
    let manager = ThreadSummaryManager::new(pool.clone(), model.clone());

    // First read: one call, empty context, all five bullets
    manager.generate_summary("design", false).await.unwrap();
    assert_eq!(model.call_count(), 1);
    {
        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].0, "");
        assert!(calls[0].1.contains("- thought 0"));
        assert!(calls[0].1.contains("- thought 4"));
    }

    // Appending nodes does not call the model (write path is LLM-free)
    service.push("p", "design", "thought 5", "user").await.unwrap();
    service.push("p", "design", "thought 6", "user").await.unwrap();
    assert_eq!(model.call_count(), 1);

    // Second read: one incremental call over the two new bullets only
    manager.generate_summary("design", false).await.unwrap();
    assert_eq!(model.call_count(), 2);
    {
        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[1].0, "summary v1");
        assert!(calls[1].1.contains("- thought 5"));
        assert!(calls[1].1.contains("- thought 6"));
        assert!(!calls[1].1.contains("- thought 4"));
    }

    // Fresh cache verdict immediately after generation
    let staleness = pool
        .run(|conn| vlt::summarizer::check_staleness_sync(conn, "design"))
        .await
        .unwrap();
    assert!(!staleness.is_stale);
    assert_eq!(staleness.new_node_count, 0);
}

// Scenario: crossing 80% of the budget compresses down to the last five
// exchanges, keeping every mentioned symbol in the summary.
#[tokio::test]
async fn test_conversation_compression() {
    let pool = make_pool().await;
    let manager = ConversationManager::new(pool.clone(), offline_llm());

    let mut conversation = manager.get_or_create_conversation("p", "user-1").await.unwrap();

    // Shrink the budget so the scenario stays small
    conversation.token_budget = 400;

    for i in 0..10 {
        let output = serde_json::json!(format!(
            "Symbol_{i} is defined in src/mod_{i}.py and handles case {i}"
        ));
        manager
            .log_exchange(
                &mut conversation,
                "ask_oracle",
                serde_json::json!({"question": format!("q{i}")}),
                &output,
                false,
            )
            .await
            .unwrap();
    }
    assert_eq!(conversation.recent_exchanges.len(), 10);
    assert_eq!(conversation.compression_count, 0);
    let symbols_before = conversation.mentioned_symbols.clone();
    assert!(!symbols_before.is_empty());

    // Pin usage at 85% of the budget, then log one more exchange with
    // auto-compression on
    conversation.tokens_used = 340;
    manager
        .log_exchange(
            &mut conversation,
            "ask_oracle",
            serde_json::json!({"question": "final"}),
            &serde_json::json!("Final_Symbol is defined in src/final.py"),
            true,
        )
        .await
        .unwrap();

    assert_eq!(conversation.recent_exchanges.len(), 5);
    assert_eq!(conversation.status, ConversationStatus::Compressed);
    assert_eq!(conversation.compression_count, 1);

    // Deterministic fallback compression must preserve every symbol that
    // was mentioned in the compressed exchanges
    let summary = conversation.compressed_summary.clone().unwrap();
    for i in 0..6 {
        assert!(
            summary.contains(&format!("Symbol_{i}")),
            "compressed summary lost Symbol_{i}"
        );
    }

    // And the row reflects the compressed state
    let reloaded = pool
        .run(|conn| {
            db::find_active_conversation_sync(
                conn,
                "p",
                "user-1",
                chrono::Utc::now() - chrono::Duration::hours(24),
            )
        })
        .await
        .unwrap();
    // Status moved off `active`, so the active lookup comes back empty
    assert!(reloaded.is_none());
}

// Scenario: a query about a pending file promotes exactly that file and
// the commit processes it first.
#[tokio::test]
async fn test_delta_jit_promotion_and_commit_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    for name in ["auth", "user", "util"] {
        std::fs::write(
            dir.path().join(format!("src/{name}.py")),
            format!("def {name}_main():\n    return '{name}'\n"),
        )
        .unwrap();
    }

    let pool = make_pool().await;
    let manager = DeltaQueueManager::new(pool.clone(), "p", DeltaConfig::default());

    for name in ["auth", "user", "util"] {
        manager
            .queue_file_change(
                &format!("src/{name}.py"),
                ChangeKind::Added,
                None,
                Some("h".to_string()),
                2,
                DeltaPriority::Normal,
            )
            .await
            .unwrap();
    }

    let promoted = manager
        .promote_for_query("Where is authenticate in auth.py used?")
        .await
        .unwrap();
    assert_eq!(promoted, vec!["src/auth.py"]);

    // Thresholds stay quiet: 3 files, 6 lines, fresh queue
    assert!(!manager.check_thresholds().await.unwrap());

    let outcome = manager.commit_pending(dir.path()).await.unwrap();
    assert_eq!(outcome.failed.len(), 0);
    assert_eq!(outcome.processed.len(), 3);
    assert_eq!(outcome.processed[0], "src/auth.py");

    // Everything landed in the store
    let stats = pool
        .run(|conn| db::project_stats_sync(conn, "p"))
        .await
        .unwrap();
    assert!(stats.chunks >= 3);
    assert!(stats.nodes >= 6);
}

// Node ordering invariant across the service layer.
#[tokio::test]
async fn test_node_sequence_invariant() {
    let pool = make_pool().await;
    let service = ThreadService::new(pool.clone(), offline_llm());

    let mut previous: Option<vlt_types::NodeRecord> = None;
    for i in 0..6 {
        let node = service
            .push("p", "ordering", &format!("note {i}"), "user")
            .await
            .unwrap();
        match &previous {
            None => {
                assert_eq!(node.sequence_id, 0);
                assert!(node.prev_node_id.is_none());
            }
            Some(prev) => {
                assert_eq!(node.sequence_id, prev.sequence_id + 1);
                assert_eq!(node.prev_node_id.as_deref(), Some(prev.id.as_str()));
            }
        }
        previous = Some(node);
    }
}
