// crates/vlt-server/src/oracle/prompts.rs
// Synthesis prompt construction and citation extraction

use once_cell::sync::Lazy;
use regex::Regex;
use vlt_types::QueryType;

/// Instruction table keyed by query type.
fn type_instruction(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::Definition => {
            "You are answering a code navigation query about where a symbol is defined.\n\
             Focus on providing the exact location and surrounding context. Be precise and concise."
        }
        QueryType::References => {
            "You are answering a code navigation query about where/how a symbol is used.\n\
             List all usage locations and explain the calling context. Show the relationships between components."
        }
        QueryType::Conceptual => {
            "You are answering a conceptual question about how code works.\n\
             Explain the implementation, design patterns, and key concepts. Make it clear and educational."
        }
        QueryType::Behavioral => {
            "You are answering a question about why code behaves a certain way.\n\
             Explain the purpose, reasoning, and historical context. Connect implementation to intent."
        }
        QueryType::Unknown => {
            "You are answering a technical question about a codebase.\n\
             Provide a clear, well-structured answer based on the available context."
        }
    }
}

const CITATION_INSTRUCTION: &str = r#"
CRITICAL: You MUST cite your sources for every claim. Use these citation formats:
- Code: [src/api/routes.py:42]
- Documentation: [docs/architecture.md]
- Thread history: [thread:auth-design#15]

Example:
"The authentication system uses JWT tokens [src/services/auth.py:145]. According to the design docs [docs/auth-strategy.md], we chose JWTs for their stateless nature [thread:auth-design#8]."

If you cannot find relevant information in the context for a specific part of the question, say so explicitly rather than guessing.
"#;

/// Build the single synthesis prompt handed to the chat model.
pub fn build_synthesis_prompt(
    question: &str,
    context: &str,
    query_type: QueryType,
    include_citations: bool,
) -> String {
    let system_instruction = type_instruction(query_type);
    let citation_instruction = if include_citations {
        CITATION_INSTRUCTION
    } else {
        ""
    };

    format!(
        "{system_instruction}\n\n{citation_instruction}\n\n\
         ## Question\n{question}\n\n\
         ## Context\n{context}\n\n\
         ## Instructions\n\
         Based on the context above, answer the question thoroughly. Structure your response with:\n\
         1. A clear, direct answer to the question\n\
         2. Supporting details and explanation\n\
         3. Relevant code examples (if applicable)\n\
         4. Source citations for every claim\n\
         5. Any caveats or limitations based on available context\n\n\
         If the context does not contain sufficient information to answer the question completely, \
         state what is missing and provide the best answer you can from what's available.\n\n\
         ## Answer\n"
    )
}

/// The honest reply when every retriever came back empty. Structured, not
/// synthesised: guessing here would be worse than admitting the gap.
pub fn build_no_context_response(question: &str) -> String {
    format!(
        "I searched for relevant context to answer your question:\n\n\
         **\"{question}\"**\n\n\
         However, I could not find any relevant information in:\n\
         - Code index (no matching code chunks)\n\
         - Documentation vault (no matching notes)\n\
         - Development threads (no matching history)\n\n\
         This could mean:\n\
         1. The code/documentation hasn't been indexed yet (run `vlt index`)\n\
         2. The question uses different terminology than the codebase\n\
         3. This information genuinely doesn't exist in the indexed sources\n\n\
         **Suggestions:**\n\
         - Try rephrasing the question with different keywords\n\
         - Check if the relevant files have been indexed\n\
         - Search manually in the codebase with file paths or function names you know exist\n\n\
         I cannot provide an answer without relevant context, as I don't want to hallucinate or guess.\n"
    )
}

static CITATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]").unwrap_or_else(|_| Regex::new(r"\[(.+)\]").unwrap()));

/// Extract citation markers from a synthesised answer.
///
/// Deliberately permissive: any bracketed text containing `:`, `/` or `#`
/// counts. Deduplicates preserving first-seen order.
pub fn extract_citations_from_response(response: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut citations = Vec::new();

    for caps in CITATION_RE.captures_iter(response) {
        let inner = &caps[1];
        if !(inner.contains(':') || inner.contains('/') || inner.contains('#')) {
            continue;
        }
        if seen.insert(inner.to_string()) {
            citations.push(inner.to_string());
        }
    }

    citations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_blocks() {
        let prompt = build_synthesis_prompt(
            "How does auth work?",
            "## Code Context\n...",
            QueryType::Conceptual,
            true,
        );
        assert!(prompt.contains("## Question\nHow does auth work?"));
        assert!(prompt.contains("## Context\n## Code Context"));
        assert!(prompt.contains("conceptual question"));
        assert!(prompt.contains("MUST cite your sources"));
        assert!(prompt.trim_end().ends_with("## Answer"));
    }

    #[test]
    fn test_prompt_without_citations() {
        let prompt = build_synthesis_prompt("q", "c", QueryType::Unknown, false);
        assert!(!prompt.contains("MUST cite your sources"));
    }

    #[test]
    fn test_no_context_response_is_honest() {
        let response = build_no_context_response("How does auth work?");
        assert!(response.contains("could not find any relevant information"));
        assert!(response.contains("How does auth work?"));
    }

    #[test]
    fn test_extract_citations() {
        let text = "Auth lives in [src/auth.py:42] per [docs/auth.md], see [thread:auth-design#8]. \
                    Also [42] and [note] are not citations. Repeat [src/auth.py:42].";
        let citations = extract_citations_from_response(text);
        assert_eq!(
            citations,
            vec!["src/auth.py:42", "docs/auth.md", "thread:auth-design#8"]
        );
    }

    #[test]
    fn test_extract_citations_empty() {
        assert!(extract_citations_from_response("no brackets here").is_empty());
        assert!(extract_citations_from_response("[just words]").is_empty());
    }
}
