// crates/vlt-server/src/cli/mod.rs
// Command-line surface: thread operations, oracle queries, indexing,
// config, and sync daemon interaction

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use vlt::config::{self, Settings, VltConfig};
use vlt::daemon::client::DaemonClient;
use vlt::daemon::{self, DEFAULT_PORT};
use vlt::db::DatabasePool;
use vlt::delta::DeltaQueueManager;
use vlt::llm::LlmClient;
use vlt::oracle::{Oracle, QueryOptions};
use vlt::threads::ThreadService;

#[derive(Parser)]
#[command(name = "vlt", about = "Persistent memory and code intelligence for AI coding agents", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Thread operations (push, read, seek, list)
    Thread {
        #[command(subcommand)]
        action: ThreadAction,
    },
    /// Project overview: threads and node counts
    Overview,
    /// Ask the Oracle a question about this project
    Ask {
        /// Natural language question
        question: String,
        /// Restrict sources: code, vault, threads (repeatable)
        #[arg(long)]
        sources: Vec<String>,
        /// Include retrieval traces in the output
        #[arg(long)]
        explain: bool,
        /// User id for conversation tracking
        #[arg(long, default_value = "default")]
        user: String,
        /// Disable the shared conversation context
        #[arg(long)]
        no_conversation: bool,
        /// Token budget for context assembly
        #[arg(long, default_value_t = 16000)]
        max_context_tokens: usize,
    },
    /// Scan for changes, commit the delta queue, embed pending chunks
    Index {
        /// Project root (defaults to the vlt.toml directory)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Load a ctags tags file into the symbol index
        #[arg(long)]
        ctags: Option<PathBuf>,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Sync queue operations against the local daemon
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
    /// Local sync daemon control
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
pub enum ThreadAction {
    /// Append a thought to a thread (creates the thread on first use)
    Push {
        thread: String,
        content: String,
        #[arg(long, default_value = "user")]
        author: String,
    },
    /// Read a thread: summary plus recent nodes
    Read {
        thread: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Semantic search across the project's threads
    Seek {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List threads in this project
    List,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Store the chat/embeddings API key in ~/.vlt/.env
    SetKey { key: String },
}

#[derive(Subcommand)]
pub enum SyncAction {
    /// Enqueue a payload through the daemon (falls back to a warning)
    Enqueue {
        kind: String,
        /// JSON payload
        payload: String,
    },
    /// Requeue failed sync items
    Retry,
    /// Show queue counters
    Status,
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Run the daemon in the foreground
    Start {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Remote backend base URL
        #[arg(long)]
        backend: Option<String>,
    },
    Stop,
    Status,
    Restart,
}

/// Everything a command needs: config, pool, clients.
struct AppContext {
    config: VltConfig,
    config_dir: PathBuf,
    pool: Arc<DatabasePool>,
    llm: Arc<LlmClient>,
}

impl AppContext {
    async fn load() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let config_path = config::file::find_vlt_toml(&cwd)
            .context("no vlt.toml found in this directory or any parent")?;
        let config = config::file::load_vlt_config(&config_path)?;
        let config_dir = config_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or(cwd);

        let mut settings = Settings::from_env();
        // vlt.toml overrides for the oracle endpoints
        settings.vault_url = config.oracle.vault_url.clone();
        settings.synthesis_model = config.oracle.synthesis_model.clone();
        settings.rerank_model = config.oracle.rerank_model.clone();

        let db_path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vlt")
            .join("vlt.db");
        let pool = Arc::new(DatabasePool::open(&db_path).await?);
        let llm = Arc::new(LlmClient::new(settings));

        Ok(Self {
            config,
            config_dir,
            pool,
            llm,
        })
    }

    fn project_id(&self) -> &str {
        &self.config.project.id
    }

    fn thread_service(&self) -> ThreadService {
        ThreadService::new(self.pool.clone(), self.llm.clone())
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Thread { action } => run_thread(action).await,
        Commands::Overview => run_overview().await,
        Commands::Ask {
            question,
            sources,
            explain,
            user,
            no_conversation,
            max_context_tokens,
        } => {
            run_ask(
                question,
                sources,
                explain,
                user,
                no_conversation,
                max_context_tokens,
            )
            .await
        }
        Commands::Index { path, ctags } => run_index(path, ctags).await,
        Commands::Config { action } => run_config(action).await,
        Commands::Sync { action } => run_sync(action).await,
        Commands::Daemon { action } => run_daemon_command(action).await,
    }
}

async fn run_thread(action: ThreadAction) -> Result<()> {
    let ctx = AppContext::load().await?;
    let service = ctx.thread_service();
    let project = ctx.project_id();

    match action {
        ThreadAction::Push {
            thread,
            content,
            author,
        } => {
            let node = service.push(project, &thread, &content, &author).await?;
            println!("{}#{}", node.thread_id, node.sequence_id);
            // Best-effort librarian pass so seek stays useful
            if let Err(e) = service.embed_pending_nodes(project, 16).await {
                tracing::debug!("embedding pass skipped: {}", e);
            }
        }
        ThreadAction::Read { thread, limit } => {
            let view = service.read(project, &thread, limit).await?;
            println!("# Thread {} ({})\n", view.thread_id, view.project_id);
            println!("{}\n", view.summary);
            for node in view.recent_nodes {
                println!(
                    "[{}] {} ({}): {}",
                    node.sequence_id,
                    node.timestamp.format("%Y-%m-%d %H:%M"),
                    node.author,
                    node.content
                );
            }
        }
        ThreadAction::Seek { query, limit } => {
            let results = service.seek(project, &query, limit).await?;
            if results.is_empty() {
                println!("No matches.");
            }
            for result in results {
                println!(
                    "thread:{}#{} (score {:.2}) {}",
                    result.thread_id,
                    result.sequence_id,
                    result.score,
                    vlt::utils::truncate(&result.content, 120)
                );
            }
        }
        ThreadAction::List => {
            for thread in service.list(project).await? {
                println!("{} [{}]", thread.id, thread.status.as_str());
            }
        }
    }
    Ok(())
}

async fn run_overview() -> Result<()> {
    let ctx = AppContext::load().await?;
    let service = ctx.thread_service();

    println!(
        "# {} ({})",
        ctx.config.project.name,
        ctx.project_id()
    );
    if let Some(description) = &ctx.config.project.description {
        println!("{description}");
    }
    println!();
    for (thread, nodes) in service.overview(ctx.project_id()).await? {
        println!("{} [{}] {} nodes", thread.id, thread.status.as_str(), nodes);
    }
    Ok(())
}

async fn run_ask(
    question: String,
    sources: Vec<String>,
    explain: bool,
    user: String,
    no_conversation: bool,
    max_context_tokens: usize,
) -> Result<()> {
    let ctx = AppContext::load().await?;

    // JIT: files the question mentions jump the re-index queue
    let delta = DeltaQueueManager::new(
        ctx.pool.clone(),
        ctx.project_id(),
        ctx.config.coderag.delta.clone(),
    );
    let promoted = delta.promote_for_query(&question).await?;
    if !promoted.is_empty() {
        delta.commit_pending(&ctx.config_dir).await?;
    }

    let oracle = Oracle::new(ctx.pool.clone(), ctx.llm.clone(), ctx.project_id());
    let options = QueryOptions {
        sources: if sources.is_empty() { None } else { Some(sources) },
        explain,
        max_context_tokens,
        include_repo_map: true,
        user_id: Some(user),
        use_conversation: !no_conversation,
    };

    let response = oracle.query(&question, options).await?;

    println!("{}", response.answer);
    if !response.sources.is_empty() {
        println!("\n---\nSources:");
        for source in &response.sources {
            println!("  [{}] (score {:.2})", source.source_path, source.score);
        }
    }
    if let Some(traces) = &response.traces {
        println!("\n---\nTraces:\n{}", serde_json::to_string_pretty(traces)?);
    }
    println!(
        "\n{} | {} tokens | {:.4}¢ | {}ms",
        response.model, response.tokens_used, response.cost_cents, response.duration_ms
    );
    Ok(())
}

async fn run_index(path: Option<PathBuf>, ctags: Option<PathBuf>) -> Result<()> {
    let ctx = AppContext::load().await?;
    let root = path.unwrap_or_else(|| ctx.config_dir.clone());
    let project = ctx.project_id().to_string();

    let delta = DeltaQueueManager::new(
        ctx.pool.clone(),
        project.clone(),
        ctx.config.coderag.delta.clone(),
    );

    let queued = delta
        .scan_and_queue(&root, &ctx.config.coderag.exclude)
        .await?;
    println!("Queued {queued} changed files");

    let outcome = delta.commit_pending(&root).await?;
    println!(
        "Indexed {} files ({} chunks, {} nodes, {} edges), {} failed",
        outcome.processed.len(),
        outcome.chunks,
        outcome.nodes,
        outcome.edges,
        outcome.failed.len()
    );

    if let Some(tags_path) = ctags {
        let symbols = vlt::indexer::ctags::load_ctags_file(&tags_path, &project)?;
        let count = symbols.len();
        let pid = project.clone();
        ctx.pool
            .run(move |conn| vlt::db::save_symbols_sync(conn, &symbols, &pid))
            .await?;
        println!("Loaded {count} ctags symbols");
    }

    let embedded =
        vlt::indexer::embed_pending_chunks(&ctx.pool, &ctx.llm, &project, 256).await?;
    if embedded > 0 {
        println!("Embedded {embedded} chunks");
    }

    // Refresh the stored repo map from the new graph
    let pid = project.clone();
    let nodes = ctx
        .pool
        .run(move |conn| vlt::db::get_code_nodes_sync(conn, &pid))
        .await?;
    let pid = project.clone();
    let edges = ctx
        .pool
        .run(move |conn| vlt::db::get_code_edges_sync(conn, &pid))
        .await?;

    let symbols: Vec<vlt::repomap::MapSymbol> = nodes
        .iter()
        .map(|n| {
            let mut s = vlt::repomap::MapSymbol::new(
                n.name.clone(),
                n.id.clone(),
                n.file_path.clone(),
                n.kind.as_str(),
                n.signature.clone().unwrap_or_default(),
            )
            .with_line(n.line.unwrap_or(0));
            if let Some(doc) = &n.docstring {
                s = s.with_docstring(doc.clone());
            }
            s
        })
        .collect();
    let edge_pairs: Vec<(String, String)> = edges
        .iter()
        .map(|e| (e.source_id.clone(), e.target_id.clone()))
        .collect();

    let graph = vlt::repomap::build_reference_graph(&symbols, &edge_pairs);
    let centrality = vlt::repomap::calculate_centrality(&graph);

    let scores: Vec<(String, f64)> = centrality.iter().map(|(k, v)| (k.clone(), *v)).collect();
    let pid = project.clone();
    ctx.pool
        .run(move |conn| vlt::db::update_centrality_sync(conn, &pid, &scores))
        .await?;

    let map = vlt::repomap::generate_repo_map(
        &symbols,
        &centrality,
        ctx.config.coderag.repomap.max_tokens,
        ctx.config.coderag.repomap.include_signatures,
        ctx.config.coderag.repomap.include_docstrings,
        None,
    );
    let record = vlt_types::RepoMap {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project.clone(),
        scope: None,
        map_text: map.map_text,
        token_count: map.token_count,
        max_tokens: map.max_tokens,
        files_included: map.files_included,
        symbols_included: map.symbols_included,
        symbols_total: map.symbols_total,
        created_at: chrono::Utc::now(),
    };
    let pid = project.clone();
    ctx.pool
        .run(move |conn| vlt::db::save_repo_map_sync(conn, &record, &pid))
        .await?;
    println!(
        "Repo map: {}/{} symbols across {} files",
        map.symbols_included, map.symbols_total, map.files_included
    );

    Ok(())
}

async fn run_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::SetKey { key } => {
            let path = Settings::env_file_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            // Preserve unrelated lines, replace any existing key line
            let mut lines: Vec<String> = match std::fs::read_to_string(&path) {
                Ok(contents) => contents
                    .lines()
                    .filter(|l| !l.starts_with("OPENROUTER_API_KEY="))
                    .map(|l| l.to_string())
                    .collect(),
                Err(_) => Vec::new(),
            };
            lines.push(format!("OPENROUTER_API_KEY={key}"));
            std::fs::write(&path, lines.join("\n") + "\n")?;
            println!("Saved API key to {}", path.display());
            Ok(())
        }
    }
}

async fn run_sync(action: SyncAction) -> Result<()> {
    let client = DaemonClient::new(DEFAULT_PORT);

    if !client.health().await {
        // Degrade gracefully: the CLI must work without the daemon
        match action {
            SyncAction::Status => {
                println!("Sync daemon not running (start with `vlt daemon start`)");
                return Ok(());
            }
            _ => bail!("sync daemon not running (start with `vlt daemon start`)"),
        }
    }

    match action {
        SyncAction::Enqueue { kind, payload } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let status = client.enqueue(&kind, payload).await?;
            println!("Queued ({} pending)", status.queued);
        }
        SyncAction::Retry => {
            let requeued = client.retry().await?;
            println!("Requeued {requeued} items");
        }
        SyncAction::Status => {
            let status = client.status().await?;
            println!(
                "queued: {}  failed: {}  sent: {}",
                status.queued, status.failed, status.sent
            );
        }
    }
    Ok(())
}

async fn run_daemon_command(action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Start { port, backend } => {
            let ctx = AppContext::load().await?;
            daemon::run_daemon(ctx.pool.clone(), ctx.llm.clone(), port, backend).await?;
            Ok(())
        }
        DaemonAction::Status => {
            let client = DaemonClient::new(DEFAULT_PORT);
            if client.health().await {
                let status = client.status().await?;
                println!(
                    "running  queued: {}  failed: {}  sent: {}",
                    status.queued, status.failed, status.sent
                );
            } else {
                println!("not running");
            }
            Ok(())
        }
        DaemonAction::Stop | DaemonAction::Restart => {
            // Process management is delegated to the host (systemd, launchd,
            // or a plain kill); the daemon itself is a foreground service.
            bail!("stop/restart the daemon via your process manager; `vlt daemon start` runs in the foreground")
        }
    }
}
