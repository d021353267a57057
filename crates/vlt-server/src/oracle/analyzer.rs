// crates/vlt-server/src/oracle/analyzer.rs
// Query intent classification: deterministic, purely lexical, no LLM.
// The result steers context-assembly budgets and synthesis instructions.

use once_cell::sync::Lazy;
use regex::Regex;
use vlt_types::QueryType;

/// Outcome of query analysis.
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub query_type: QueryType,
    /// Classification confidence in [0, 1].
    pub confidence: f32,
    pub extracted_symbols: Vec<String>,
    pub reasoning: String,
}

static DEFINITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(where\s+is\s+\w+\s+defined|definition\s+of|find\s+\w+\s+definition|show\s+me\s+\w+\s+definition|what\s+is\s+\w+)\b")
        .unwrap_or_else(|_| Regex::new(r"definition").unwrap())
});

static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(where\s+is\s+\w+\s+used|what\s+calls|who\s+calls|references\s+to|usages\s+of|callers\s+of|find\s+\w+\s+references)\b")
        .unwrap_or_else(|_| Regex::new(r"references").unwrap())
});

static BEHAVIORAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(why\s+does|why\s+is|why\s+do|purpose\s+of|reason\s+for|intended\s+to)\b")
        .unwrap_or_else(|_| Regex::new(r"why").unwrap())
});

static CONCEPTUAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(how\s+does|how\s+do|how\s+is|explain|architecture|overview|describe|work(s)?\b)")
        .unwrap_or_else(|_| Regex::new(r"how").unwrap())
});

/// PascalCase identifiers (at least two humps).
static PASCAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-z0-9]+(?:[A-Z][a-zA-Z0-9]*)+\b")
        .unwrap_or_else(|_| Regex::new(r"[A-Z]\w+").unwrap())
});

/// snake_case identifiers (must contain an underscore to avoid matching
/// every lowercase word).
static SNAKE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-z][a-z0-9]*(?:_[a-z0-9]+)+\b").unwrap_or_else(|_| Regex::new(r"\w+_\w+").unwrap())
});

/// Classify a query and extract candidate symbols.
pub fn analyze_query(question: &str) -> QueryAnalysis {
    let lower = question.to_lowercase();
    let extracted_symbols = extract_symbols(question);

    let (query_type, confidence, reasoning) = if REFERENCE_RE.is_match(&lower) {
        (
            QueryType::References,
            0.9,
            "matched a reference/caller phrase".to_string(),
        )
    } else if DEFINITION_RE.is_match(&lower) {
        (
            QueryType::Definition,
            0.9,
            "matched a definition phrase".to_string(),
        )
    } else if BEHAVIORAL_RE.is_match(&lower) {
        (
            QueryType::Behavioral,
            0.7,
            "matched a why/purpose phrase".to_string(),
        )
    } else if CONCEPTUAL_RE.is_match(&lower) {
        (
            QueryType::Conceptual,
            0.7,
            "matched a how/explain phrase".to_string(),
        )
    } else if !extracted_symbols.is_empty() {
        (
            QueryType::Conceptual,
            0.5,
            "no intent phrase, but code identifiers present".to_string(),
        )
    } else {
        (QueryType::Unknown, 0.3, "no intent phrase matched".to_string())
    };

    QueryAnalysis {
        query_type,
        confidence,
        extracted_symbols,
        reasoning,
    }
}

/// Pull capitalised and snake_case identifiers out of the question text.
pub fn extract_symbols(text: &str) -> Vec<String> {
    let mut symbols = Vec::new();
    for re in [&*PASCAL_RE, &*SNAKE_RE] {
        for m in re.find_iter(text) {
            let s = m.as_str().to_string();
            if !symbols.contains(&s) {
                symbols.push(s);
            }
        }
    }
    symbols
}

/// The symbol most likely to be the query's subject, if any.
pub fn get_primary_symbol(analysis: &QueryAnalysis) -> Option<&str> {
    analysis.extracted_symbols.first().map(|s| s.as_str())
}
