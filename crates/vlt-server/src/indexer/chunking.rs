// src/indexer/chunking.rs
// Turn a parsed file into code chunks
//
// One chunk per function/class/method plus a module chunk for whatever
// top-level code the symbols don't cover. Every chunk carries the context
// a retriever needs to render it standalone: signature, docstring,
// decorators, the file's import block, and the enclosing class header.

use super::parsers::{ParsedFile, ParsedSymbol};
use crate::utils::estimate_tokens;
use chrono::Utc;
use vlt_types::{ChunkKind, CodeChunk};

/// Derive a dotted module name from a file path (`src/api/routes.py` →
/// `src.api.routes`).
pub fn file_path_to_module_name(file_path: &str) -> String {
    let without_ext = match file_path.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_path,
    };
    without_ext.replace(['/', '\\'], ".")
}

/// Qualified name of a symbol within its file.
pub fn qualified_name(file_path: &str, symbol: &ParsedSymbol) -> String {
    let module = file_path_to_module_name(file_path);
    match &symbol.parent {
        Some(parent) => format!("{module}.{parent}.{}", symbol.name),
        None => format!("{module}.{}", symbol.name),
    }
}

/// Chunk one file's parse result.
pub fn chunk_file(
    project_id: &str,
    file_path: &str,
    content: &str,
    parsed: &ParsedFile,
) -> Vec<CodeChunk> {
    let lines: Vec<&str> = content.lines().collect();
    let file_hash = format!("{:x}", md5::compute(content.as_bytes()));
    let now = Utc::now();

    // The file's import block, rendered from the import statement lines
    let imports_block = {
        let mut seen = std::collections::HashSet::new();
        let block: Vec<&str> = parsed
            .imports
            .iter()
            .filter(|i| seen.insert(i.line))
            .filter_map(|i| lines.get(i.line as usize - 1).copied())
            .collect();
        if block.is_empty() {
            None
        } else {
            Some(block.join("\n"))
        }
    };

    // Class headers for method context
    let class_header = |parent: &str| -> Option<String> {
        parsed
            .symbols
            .iter()
            .find(|s| s.kind == "class" && s.name == parent)
            .and_then(|s| s.signature.clone())
    };

    let mut chunks: Vec<CodeChunk> = parsed
        .symbols
        .iter()
        .map(|symbol| {
            let start = (symbol.start_line as usize).saturating_sub(1);
            let end = (symbol.end_line as usize).min(lines.len());
            let body = if start < end {
                lines[start..end].join("\n")
            } else {
                String::new()
            };

            let kind = match symbol.kind.as_str() {
                "class" => ChunkKind::Class,
                "method" => ChunkKind::Method,
                _ => ChunkKind::Function,
            };

            CodeChunk {
                id: uuid::Uuid::new_v4().to_string(),
                project_id: project_id.to_string(),
                file_path: file_path.to_string(),
                file_hash: file_hash.clone(),
                chunk_kind: kind,
                name: symbol.name.clone(),
                qualified_name: qualified_name(file_path, symbol),
                language: parsed.language.clone(),
                start_line: symbol.start_line,
                end_line: symbol.end_line,
                imports: imports_block.clone(),
                class_context: symbol.parent.as_deref().and_then(class_header),
                signature: symbol.signature.clone(),
                decorators: if symbol.decorators.is_empty() {
                    None
                } else {
                    Some(symbol.decorators.join("\n"))
                },
                docstring: symbol.docstring.clone(),
                token_count: Some(estimate_tokens(&body)),
                body,
                embedding: None,
                created_at: now,
                updated_at: now,
            }
        })
        .collect();

    // Module chunk: top-level lines not covered by any symbol
    let covered: Vec<(usize, usize)> = parsed
        .symbols
        .iter()
        .map(|s| (s.start_line as usize, s.end_line as usize))
        .collect();
    let module_lines: Vec<&str> = lines
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let line_no = i + 1;
            !covered.iter().any(|(s, e)| line_no >= *s && line_no <= *e)
        })
        .map(|(_, l)| *l)
        .collect();
    let module_body = module_lines.join("\n");
    if !module_body.trim().is_empty() {
        let module = file_path_to_module_name(file_path);
        let name = module.rsplit('.').next().unwrap_or(&module).to_string();
        chunks.push(CodeChunk {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            file_path: file_path.to_string(),
            file_hash,
            chunk_kind: ChunkKind::Module,
            name,
            qualified_name: module,
            language: parsed.language.clone(),
            start_line: 1,
            end_line: lines.len() as u32,
            imports: imports_block,
            class_context: None,
            signature: None,
            decorators: None,
            docstring: None,
            token_count: Some(estimate_tokens(&module_body)),
            body: module_body,
            embedding: None,
            created_at: now,
            updated_at: now,
        });
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parsers::parse_source;

    const SOURCE: &str = r#"import os
from vlt.db import connect

TIMEOUT = 30

class UserService:
    """Service for user operations."""

    def get_user(self, user_id):
        """Get user by ID."""
        return connect().query(user_id)

def authenticate(username, password):
    return True
"#;

    #[test]
    fn test_file_path_to_module_name() {
        assert_eq!(file_path_to_module_name("src/api/routes.py"), "src.api.routes");
        assert_eq!(file_path_to_module_name("lib/utils.ts"), "lib.utils");
        assert_eq!(file_path_to_module_name("foo.py"), "foo");
    }

    #[test]
    fn test_chunk_file_symbols_and_module() {
        let parsed = parse_source(SOURCE, "python").unwrap();
        let chunks = chunk_file("p", "src/users.py", SOURCE, &parsed);

        // class + method + function + module remainder
        assert_eq!(chunks.len(), 4);

        let class_chunk = chunks.iter().find(|c| c.chunk_kind == ChunkKind::Class).unwrap();
        assert_eq!(class_chunk.name, "UserService");
        assert_eq!(class_chunk.qualified_name, "src.users.UserService");
        assert!(class_chunk.docstring.as_deref().unwrap().contains("Service for user"));

        let method_chunk = chunks.iter().find(|c| c.chunk_kind == ChunkKind::Method).unwrap();
        assert_eq!(method_chunk.qualified_name, "src.users.UserService.get_user");
        assert_eq!(method_chunk.class_context.as_deref(), Some("class UserService:"));
        assert!(method_chunk.body.contains("return connect().query(user_id)"));

        let module_chunk = chunks.iter().find(|c| c.chunk_kind == ChunkKind::Module).unwrap();
        assert_eq!(module_chunk.name, "users");
        assert!(module_chunk.body.contains("TIMEOUT = 30"));
        assert!(!module_chunk.body.contains("def authenticate"));

        // Every chunk shares the file hash and the import block
        let hash = &chunks[0].file_hash;
        assert_eq!(hash.len(), 32);
        assert!(chunks.iter().all(|c| &c.file_hash == hash));
        assert!(chunks
            .iter()
            .all(|c| c.imports.as_deref().unwrap().contains("from vlt.db import connect")));
    }

    #[test]
    fn test_token_counts_present() {
        let parsed = parse_source(SOURCE, "python").unwrap();
        let chunks = chunk_file("p", "src/users.py", SOURCE, &parsed);
        assert!(chunks.iter().all(|c| c.token_count.is_some()));
    }
}
