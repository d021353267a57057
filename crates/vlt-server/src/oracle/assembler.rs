// crates/vlt-server/src/oracle/assembler.rs
// Token-budgeted context assembly
//
// Budget allocation order (percentages of the remaining budget at each
// step): 10% of the total reserved for the repo map up front, then 15% of
// the remainder for definitions/references (navigation queries only), 60%
// for code, 20% for vault notes, and whatever is left (if more than 500
// tokens) for thread history. One included-paths set spans all sections so
// a source is never included twice.

use crate::utils::{CHARS_PER_TOKEN, estimate_tokens};
use std::collections::{HashMap, HashSet};
use vlt_types::{QueryType, RetrievalResult, SourceType};

/// Minimum leftover budget worth spending on thread history.
const THREAD_SECTION_MIN_TOKENS: usize = 500;

/// Score threshold above which the citation header carries the score.
const SCORE_ANNOTATION_THRESHOLD: f32 = 0.8;

/// Assembled context plus its accounting.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub context: String,
    pub sections: HashMap<String, String>,
    pub token_count: usize,
    pub max_tokens: usize,
    pub sources_included: usize,
    pub sources_excluded: usize,
}

/// Assemble the synthesis context from partitioned retrieval results.
pub fn assemble_context(
    code_results: &[RetrievalResult],
    vault_results: &[RetrievalResult],
    thread_results: &[RetrievalResult],
    repo_map: Option<&str>,
    max_tokens: usize,
    query_type: QueryType,
) -> AssembledContext {
    tracing::info!(
        code = code_results.len(),
        vault = vault_results.len(),
        threads = thread_results.len(),
        budget = max_tokens,
        query_type = query_type.as_str(),
        "Assembling context"
    );

    let mut sections: HashMap<String, String> = HashMap::new();
    let mut token_count = 0usize;
    let mut sources_included = 0usize;
    let mut sources_excluded = 0usize;
    let mut added_paths: HashSet<String> = HashSet::new();

    // Reserve a slice for structure up front
    let repo_map_budget = max_tokens / 10;
    let mut remaining = max_tokens.saturating_sub(repo_map_budget);

    // Navigation queries lead with exact matches
    if matches!(query_type, QueryType::Definition | QueryType::References) {
        let definition_budget = remaining * 15 / 100;
        let definition_results: Vec<&RetrievalResult> = code_results
            .iter()
            .filter(|r| matches!(r.source_type, SourceType::Definition | SourceType::Reference))
            .collect();

        if !definition_results.is_empty() {
            let (text, added, excluded, tokens) = fill_section(
                &definition_results,
                definition_budget,
                "## Definitions and References",
                &mut added_paths,
            );
            if !text.is_empty() {
                sections.insert("definitions".to_string(), text);
                token_count += tokens;
                sources_included += added;
                sources_excluded += excluded;
                remaining = remaining.saturating_sub(tokens);
            }
        }
    }

    // Core code content
    let code_budget = remaining * 60 / 100;
    let code_only: Vec<&RetrievalResult> = code_results
        .iter()
        .filter(|r| r.source_type == SourceType::Code)
        .collect();
    if !code_only.is_empty() {
        let (text, added, excluded, tokens) =
            fill_section(&code_only, code_budget, "## Code Context", &mut added_paths);
        if !text.is_empty() {
            sections.insert("code".to_string(), text);
            token_count += tokens;
            sources_included += added;
            sources_excluded += excluded;
            remaining = remaining.saturating_sub(tokens);
        }
    }

    // Documentation
    let vault_budget = remaining * 20 / 100;
    if !vault_results.is_empty() {
        let refs: Vec<&RetrievalResult> = vault_results.iter().collect();
        let (text, added, excluded, tokens) =
            fill_section(&refs, vault_budget, "## Documentation", &mut added_paths);
        if !text.is_empty() {
            sections.insert("vault".to_string(), text);
            token_count += tokens;
            sources_included += added;
            sources_excluded += excluded;
            remaining = remaining.saturating_sub(tokens);
        }
    }

    // Thread history takes the leftovers, if they are worth anything
    if !thread_results.is_empty() && remaining > THREAD_SECTION_MIN_TOKENS {
        let refs: Vec<&RetrievalResult> = thread_results.iter().collect();
        let (text, added, excluded, tokens) =
            fill_section(&refs, remaining, "## Development History", &mut added_paths);
        if !text.is_empty() {
            sections.insert("threads".to_string(), text);
            token_count += tokens;
            sources_included += added;
            sources_excluded += excluded;
        }
    }

    // Structural overview closes the context
    if let Some(map) = repo_map {
        let truncated = truncate_to_tokens(map, repo_map_budget);
        let map_tokens = estimate_tokens(&truncated);
        sections.insert(
            "repo_map".to_string(),
            format!("## Codebase Structure\n\n{truncated}"),
        );
        token_count += map_tokens;
    }

    let priority_order = ["definitions", "code", "vault", "threads", "repo_map"];
    let context = priority_order
        .iter()
        .filter_map(|name| sections.get(*name).cloned())
        .collect::<Vec<_>>()
        .join("\n\n");

    tracing::info!(
        tokens = token_count,
        budget = max_tokens,
        included = sources_included,
        excluded = sources_excluded,
        "Context assembly complete"
    );

    AssembledContext {
        context,
        sections,
        token_count,
        max_tokens,
        sources_included,
        sources_excluded,
    }
}

/// Greedily add results to one section within its token budget.
///
/// Duplicates (by source path, across all sections) and over-budget results
/// count as excluded.
fn fill_section(
    results: &[&RetrievalResult],
    budget: usize,
    section_title: &str,
    added_paths: &mut HashSet<String>,
) -> (String, usize, usize, usize) {
    if results.is_empty() {
        return (String::new(), 0, 0, 0);
    }

    let mut lines = vec![section_title.to_string(), String::new()];
    let mut section_tokens = estimate_tokens(section_title) + 2;
    let mut added = 0usize;
    let mut excluded = 0usize;

    for result in results {
        if added_paths.contains(&result.source_path) {
            excluded += 1;
            continue;
        }

        let text = format_result(result);
        let tokens = estimate_tokens(&text);

        if section_tokens + tokens > budget {
            excluded += 1;
            continue;
        }

        lines.push(text);
        lines.push(String::new());
        section_tokens += tokens + 1;

        added_paths.insert(result.source_path.clone());
        added += 1;
    }

    if added == 0 {
        return (String::new(), 0, excluded, 0);
    }

    (lines.join("\n"), added, excluded, section_tokens)
}

/// Render one result under its citation header.
fn format_result(result: &RetrievalResult) -> String {
    let mut citation = format!("[{}]", result.source_path);
    if result.score >= SCORE_ANNOTATION_THRESHOLD {
        citation.push_str(&format!(" (score: {:.2})", result.score));
    }

    match result.source_type {
        SourceType::Code => {
            let language = result
                .metadata
                .get("language")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let qualified_name = result
                .metadata
                .get("qualified_name")
                .and_then(|v| v.as_str())
                .unwrap_or("");

            let mut header = format!("### {citation}");
            if !qualified_name.is_empty() {
                header.push_str(&format!(" - {qualified_name}"));
            }

            let content = result.content.trim();
            if content.starts_with("```") {
                format!("{header}\n\n{content}")
            } else {
                format!("{header}\n\n```{language}\n{content}\n```")
            }
        }
        SourceType::Vault => {
            let title = result.metadata.get("title").and_then(|v| v.as_str()).unwrap_or("");
            let mut header = format!("### {citation}");
            if !title.is_empty() {
                header.push_str(&format!(" - {title}"));
            }
            format!("{header}\n\n{}", result.content)
        }
        SourceType::Thread => {
            let author = result.metadata.get("author").and_then(|v| v.as_str()).unwrap_or("");
            let timestamp = result
                .metadata
                .get("timestamp")
                .and_then(|v| v.as_str())
                .unwrap_or("");

            let mut header = format!("### {citation}");
            if !author.is_empty() {
                header.push_str(&format!(" (by {author}"));
                if timestamp.len() >= 10 {
                    header.push_str(&format!(", {}", &timestamp[..10]));
                }
                header.push(')');
            }
            format!("{header}\n\n{}", result.content)
        }
        SourceType::Definition | SourceType::Reference => {
            format!("### {citation}\n\n{}", result.content)
        }
    }
}

/// Truncate text to a token budget, preferring a newline break when one
/// falls within the last 20% of the budget, and marking the cut.
fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }

    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let mut end = max_chars.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = &text[..end];

    if let Some(last_newline) = truncated.rfind('\n') {
        if last_newline as f64 > max_chars as f64 * 0.8 {
            truncated = &truncated[..last_newline];
        }
    }

    format!("{truncated}\n\n[... truncated for token budget]")
}
