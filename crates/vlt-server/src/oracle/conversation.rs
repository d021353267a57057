// crates/vlt-server/src/oracle/conversation.rs
// Multi-turn conversation log with automatic compression
//
// A session is per (project, user) and resumes while activity stays within
// the 24h window. Exchanges accumulate in a single JSON blob; crossing 80%
// of the token budget compresses everything but the last five exchanges
// into a summary that must keep every mentioned symbol and file path.

use crate::db::{self, DatabasePool};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::utils::estimate_tokens;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use vlt_types::{ConversationStatus, Exchange, OracleConversation};

pub const DEFAULT_TOKEN_BUDGET: usize = 16000;
pub const COMPRESSION_THRESHOLD: f64 = 0.8;
pub const RECENT_EXCHANGES_KEEP: usize = 5;
pub const SESSION_EXPIRY_HOURS: i64 = 24;

/// Output summaries are capped at this many characters.
const SUMMARY_TRUNCATE_CHARS: usize = 500;
const MAX_INSIGHTS_PER_EXCHANGE: usize = 5;
const MAX_SYMBOLS_PER_EXCHANGE: usize = 20;
const MAX_ACCUMULATED_SYMBOLS: usize = 100;
const MAX_ACCUMULATED_FILES: usize = 50;
const COMPRESSION_TIMEOUT_SECS: u64 = 30;

pub struct ConversationManager {
    pool: Arc<DatabasePool>,
    llm: Arc<LlmClient>,
}

impl ConversationManager {
    pub fn new(pool: Arc<DatabasePool>, llm: Arc<LlmClient>) -> Self {
        Self { pool, llm }
    }

    /// Resume the active session for (project, user) or start a new one.
    pub async fn get_or_create_conversation(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> Result<OracleConversation> {
        let pid = project_id.to_string();
        let uid = user_id.to_string();
        let cutoff = Utc::now() - Duration::hours(SESSION_EXPIRY_HOURS);

        let existing = self
            .pool
            .run(move |conn| {
                db::get_or_create_project_sync(conn, &pid, &pid, None)?;
                db::find_active_conversation_sync(conn, &pid, &uid, cutoff)
            })
            .await?;

        if let Some(conversation) = existing {
            tracing::info!(conversation = %conversation.id, user = user_id, "Resumed conversation");
            return Ok(conversation);
        }

        let now = Utc::now();
        let conversation = OracleConversation {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            token_budget: DEFAULT_TOKEN_BUDGET,
            tokens_used: 0,
            compressed_summary: None,
            recent_exchanges: Vec::new(),
            status: ConversationStatus::Active,
            last_activity: now,
            expires_at: now + Duration::hours(SESSION_EXPIRY_HOURS),
            compression_count: 0,
            mentioned_symbols: Vec::new(),
            mentioned_files: Vec::new(),
        };

        let row = conversation.clone();
        self.pool
            .run(move |conn| db::insert_conversation_sync(conn, &row))
            .await?;

        tracing::info!(conversation = %conversation.id, user = user_id, "Created new conversation");
        Ok(conversation)
    }

    /// Log one tool exchange, accumulating symbols/files and compressing
    /// when the budget threshold is crossed.
    pub async fn log_exchange(
        &self,
        conversation: &mut OracleConversation,
        tool_name: &str,
        input_data: serde_json::Value,
        output_data: &serde_json::Value,
        auto_compress: bool,
    ) -> Result<()> {
        let (output_summary, key_insights) = summarize_output(output_data);
        let mentioned_symbols = extract_symbols(&output_summary);
        let mentioned_files = extract_files(&output_summary);

        let token_count = estimate_exchange_tokens(tool_name, &input_data, &output_summary, &key_insights);

        let exchange = Exchange {
            tool_name: tool_name.to_string(),
            input_data,
            output_summary,
            key_insights,
            mentioned_symbols: mentioned_symbols.clone(),
            mentioned_files: mentioned_files.clone(),
            token_count,
            timestamp: Utc::now(),
        };

        conversation.recent_exchanges.push(exchange);
        conversation.tokens_used += token_count;
        accumulate(&mut conversation.mentioned_symbols, mentioned_symbols, MAX_ACCUMULATED_SYMBOLS);
        accumulate(&mut conversation.mentioned_files, mentioned_files, MAX_ACCUMULATED_FILES);
        conversation.last_activity = Utc::now();

        let row = conversation.clone();
        self.pool
            .run(move |conn| db::update_conversation_sync(conn, &row))
            .await?;

        tracing::info!(
            tool = tool_name,
            tokens = token_count,
            total = conversation.tokens_used,
            budget = conversation.token_budget,
            "Logged exchange"
        );

        if auto_compress {
            let threshold = (conversation.token_budget as f64 * COMPRESSION_THRESHOLD) as usize;
            if conversation.tokens_used > threshold {
                tracing::info!(
                    used = conversation.tokens_used,
                    threshold,
                    "Token budget threshold crossed, compressing"
                );
                self.compress_conversation(conversation).await?;
            }
        }

        Ok(())
    }

    /// Fold everything but the last five exchanges into the compressed
    /// summary. The summary must preserve every mentioned symbol and file;
    /// without a model the deterministic fallback concatenates them.
    pub async fn compress_conversation(&self, conversation: &mut OracleConversation) -> Result<()> {
        if conversation.recent_exchanges.len() <= RECENT_EXCHANGES_KEEP {
            tracing::info!("Not enough exchanges to compress, skipping");
            return Ok(());
        }

        let split = conversation.recent_exchanges.len() - RECENT_EXCHANGES_KEEP;
        let to_compress: Vec<Exchange> = conversation.recent_exchanges[..split].to_vec();
        let to_keep: Vec<Exchange> = conversation.recent_exchanges[split..].to_vec();

        tracing::info!(
            compressing = to_compress.len(),
            keeping = to_keep.len(),
            "Compressing conversation"
        );

        let new_summary = self
            .generate_compressed_summary(conversation.compressed_summary.as_deref(), &to_compress)
            .await;

        let kept_tokens: usize = to_keep.iter().map(|e| e.token_count).sum();
        conversation.tokens_used = estimate_tokens(&new_summary) + kept_tokens;
        conversation.compressed_summary = Some(new_summary);
        conversation.recent_exchanges = to_keep;
        conversation.compression_count += 1;
        conversation.status = ConversationStatus::Compressed;

        let row = conversation.clone();
        self.pool
            .run(move |conn| db::update_conversation_sync(conn, &row))
            .await?;

        Ok(())
    }

    async fn generate_compressed_summary(
        &self,
        existing_summary: Option<&str>,
        exchanges: &[Exchange],
    ) -> String {
        if !self.llm.has_api_key() {
            tracing::warn!("No API key for compression, using deterministic fallback");
            return simple_compression(existing_summary, exchanges);
        }

        let exchanges_text = exchanges
            .iter()
            .map(|e| {
                format!(
                    "**{}**: {}\nInsights: {}\nSymbols: {}\nFiles: {}",
                    e.tool_name,
                    e.output_summary,
                    e.key_insights.join(", "),
                    e.mentioned_symbols.join(", "),
                    e.mentioned_files.join(", "),
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!(
            "You are compressing a conversation history for an AI coding agent.\n\n\
             EXISTING COMPRESSED SUMMARY:\n{}\n\n\
             NEW EXCHANGES TO COMPRESS:\n{exchanges_text}\n\n\
             INSTRUCTIONS:\n\
             Generate a compressed summary that:\n\
             1. Preserves ALL mentioned symbols (class/function names)\n\
             2. Preserves ALL mentioned file paths\n\
             3. Preserves key insights and decisions\n\
             4. Removes redundant details and verbose explanations\n\
             5. Is 50-70% shorter than the original\n\n\
             Format as concise bullet points. Focus on FACTS not prose.\n\n\
             COMPRESSED SUMMARY:\n",
            existing_summary.unwrap_or("None"),
        );

        match self
            .llm
            .chat(
                self.llm.synthesis_model(),
                &prompt,
                0.3,
                2000,
                StdDuration::from_secs(COMPRESSION_TIMEOUT_SECS),
            )
            .await
        {
            Ok(outcome) => outcome.content,
            Err(e) => {
                tracing::error!("LLM compression failed: {}, using fallback", e);
                simple_compression(existing_summary, exchanges)
            }
        }
    }

    /// Render the conversation as a markdown block for prompt injection.
    pub fn get_conversation_context(
        &self,
        conversation: &OracleConversation,
        max_tokens: Option<usize>,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(summary) = &conversation.compressed_summary {
            parts.push("## Earlier Context (Compressed)\n".to_string());
            parts.push(summary.clone());
            parts.push("\n".to_string());
        }

        if !conversation.recent_exchanges.is_empty() {
            parts.push("## Recent Exchanges\n".to_string());
            for exchange in &conversation.recent_exchanges {
                parts.push(format!("\n### {}\n", exchange.tool_name));
                parts.push(format!("**Input**: {}\n", format_input(&exchange.input_data)));
                parts.push(format!("**Output**: {}\n", exchange.output_summary));
                if !exchange.key_insights.is_empty() {
                    parts.push("**Key Insights**:\n".to_string());
                    for insight in &exchange.key_insights {
                        parts.push(format!("- {insight}\n"));
                    }
                }
            }
        }

        let mut context = parts.concat();

        if let Some(max) = max_tokens {
            let estimated = estimate_tokens(&context);
            if estimated > max && estimated > 0 {
                let keep = context.len() * max / estimated;
                let mut end = keep.min(context.len());
                while end > 0 && !context.is_char_boundary(end) {
                    end -= 1;
                }
                context.truncate(end);
                context.push_str("\n\n[Context truncated to fit token budget]");
            }
        }

        context
    }

    pub async fn close_conversation(&self, conversation: &mut OracleConversation) -> Result<()> {
        conversation.status = ConversationStatus::Closed;
        let row = conversation.clone();
        self.pool
            .run(move |conn| db::update_conversation_sync(conn, &row))
            .await?;
        tracing::info!(conversation = %conversation.id, "Closed conversation");
        Ok(())
    }
}

/// Summarise arbitrary tool output into (summary, insights).
///
/// Strings are truncated at 500 chars; objects prefer their `answer` field;
/// arrays collapse to a count.
pub fn summarize_output(output: &serde_json::Value) -> (String, Vec<String>) {
    match output {
        serde_json::Value::String(s) => {
            let summary = clip(s, SUMMARY_TRUNCATE_CHARS);
            let insights = extract_insights(s);
            (summary, insights)
        }
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(answer)) = map.get("answer") {
                (clip(answer, SUMMARY_TRUNCATE_CHARS), extract_insights(answer))
            } else {
                let dumped = serde_json::to_string_pretty(output).unwrap_or_default();
                (clip(&dumped, SUMMARY_TRUNCATE_CHARS), Vec::new())
            }
        }
        serde_json::Value::Array(items) => (format!("Returned {} results", items.len()), Vec::new()),
        other => (clip(&other.to_string(), SUMMARY_TRUNCATE_CHARS), Vec::new()),
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

static INSIGHT_PHRASES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"is defined in",
        r"is used by",
        r"implements",
        r"calls",
        r"returns",
        r"handles",
        r"responsible for",
        r"key feature",
        r"important",
        r"note that",
        r"remember",
    ]
    .iter()
    .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
    .collect()
});

static SENTENCE_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap_or_else(|_| Regex::new(r"\.").unwrap()));

/// Sentences carrying high-signal phrases, capped at five.
pub fn extract_insights(text: &str) -> Vec<String> {
    let mut insights = Vec::new();
    for sentence in SENTENCE_SPLIT_RE.split(text).take(10) {
        if INSIGHT_PHRASES.iter().any(|re| re.is_match(sentence)) {
            insights.push(sentence.trim().to_string());
            if insights.len() >= MAX_INSIGHTS_PER_EXCHANGE {
                break;
            }
        }
    }
    insights
}

static SYMBOL_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // PascalCase
        r"\b[A-Z][a-z0-9]+(?:[A-Z][a-zA-Z0-9]*)+\b",
        // camelCase
        r"\b[a-z][a-z0-9]*(?:[A-Z][a-zA-Z0-9]*)+\b",
        // snake_case
        r"\b[a-z][a-z0-9]*(?:_[a-z0-9]+)+\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

const SYMBOL_STOP_WORDS: &[&str] = &["the", "this", "that", "with", "from", "for", "and", "or"];

/// Code-shaped identifiers in the text, sorted, capped at twenty.
pub fn extract_symbols(text: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for re in SYMBOL_RES.iter() {
        for m in re.find_iter(text) {
            let s = m.as_str().to_string();
            if SYMBOL_STOP_WORDS.contains(&s.to_lowercase().as_str()) {
                continue;
            }
            if !symbols.contains(&s) {
                symbols.push(s);
            }
        }
    }
    symbols.sort();
    symbols.truncate(MAX_SYMBOLS_PER_EXCHANGE);
    symbols
}

static FILE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:src|lib|packages|crates|tests)/[\w/.\-]+\.(?:py|ts|tsx|js|jsx|rs|go)",
        r"[\w/\-]+\.(?:md|txt|json|yaml|toml)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static CITATION_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([\w/.\-]+\.\w+)(?::\d+)?\]").unwrap_or_else(|_| Regex::new(r"\[(.+)\]").unwrap())
});

/// File paths mentioned in the text, including citation-style `[path:line]`.
pub fn extract_files(text: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for re in FILE_RES.iter() {
        for m in re.find_iter(text) {
            let f = m.as_str().to_string();
            if !files.contains(&f) {
                files.push(f);
            }
        }
    }
    for caps in CITATION_FILE_RE.captures_iter(text) {
        let f = caps[1].to_string();
        if !files.contains(&f) {
            files.push(f);
        }
    }
    files.sort();
    files
}

/// Token estimate for one exchange: tool name + serialised input + summary
/// + insights, at 4 chars per token.
fn estimate_exchange_tokens(
    tool_name: &str,
    input_data: &serde_json::Value,
    output_summary: &str,
    key_insights: &[String],
) -> usize {
    let text = format!(
        "{tool_name} {} {output_summary} {}",
        serde_json::to_string(input_data).unwrap_or_default(),
        key_insights.join(" ")
    );
    estimate_tokens(&text)
}

fn format_input(input: &serde_json::Value) -> String {
    let formatted = serde_json::to_string_pretty(input).unwrap_or_default();
    clip(&formatted, 200)
}

fn accumulate(existing: &mut Vec<String>, new_items: Vec<String>, cap: usize) {
    for item in new_items {
        if !existing.contains(&item) {
            existing.push(item);
        }
    }
    existing.sort();
    existing.truncate(cap);
}

/// Deterministic compression fallback: existing summary + accumulated
/// symbols and files + the first ten insights.
fn simple_compression(existing_summary: Option<&str>, exchanges: &[Exchange]) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(summary) = existing_summary {
        parts.push(summary.to_string());
    }

    let mut all_symbols: Vec<String> = Vec::new();
    let mut all_files: Vec<String> = Vec::new();
    let mut all_insights: Vec<String> = Vec::new();
    for exchange in exchanges {
        for s in &exchange.mentioned_symbols {
            if !all_symbols.contains(s) {
                all_symbols.push(s.clone());
            }
        }
        for f in &exchange.mentioned_files {
            if !all_files.contains(f) {
                all_files.push(f.clone());
            }
        }
        all_insights.extend(exchange.key_insights.iter().cloned());
    }
    all_symbols.sort();
    all_files.sort();

    if !all_symbols.is_empty() {
        parts.push(format!("Symbols discussed: {}", all_symbols.join(", ")));
    }
    if !all_files.is_empty() {
        parts.push(format!("Files referenced: {}", all_files.join(", ")));
    }
    if !all_insights.is_empty() {
        let bullets = all_insights
            .iter()
            .take(10)
            .map(|i| format!("- {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("Key findings:\n{bullets}"));
    }

    parts.join("\n\n")
}
