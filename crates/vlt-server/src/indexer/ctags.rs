// src/indexer/ctags.rs
// Universal-ctags tags file loader
//
// Parses the tab-separated extended format:
//   name<TAB>file<TAB>pattern;"<TAB>kind<TAB>line:N<TAB>class:Scope ...
// into typed SymbolDefinition records. Header lines (!_TAG_...) are
// skipped; entries without a resolvable line number are dropped.

use crate::error::Result;
use std::path::Path;
use vlt_types::SymbolDefinition;

/// Expand a one-letter ctags kind to its long form.
fn expand_kind(kind: &str) -> String {
    match kind {
        "f" => "function".to_string(),
        "c" => "class".to_string(),
        "m" => "member".to_string(),
        "v" => "variable".to_string(),
        "s" => "struct".to_string(),
        "i" => "interface".to_string(),
        "e" => "enum".to_string(),
        other => other.to_string(),
    }
}

fn language_for_file(file_path: &str) -> String {
    super::parsers::language_for_path(file_path)
        .unwrap_or("unknown")
        .to_string()
}

/// Parse one tags line, returning None for headers and malformed entries.
fn parse_tags_line(line: &str, project_id: &str) -> Option<SymbolDefinition> {
    if line.starts_with('!') || line.trim().is_empty() {
        return None;
    }

    let mut fields = line.split('\t');
    let name = fields.next()?.to_string();
    let file_path = fields.next()?.to_string();
    let excmd = fields.next()?;

    let mut kind = String::new();
    let mut line_no: Option<u32> = None;
    let mut scope: Option<String> = None;
    let mut signature: Option<String> = None;

    // The excmd may itself be a plain line number
    let excmd_trimmed = excmd.trim_end_matches(";\"");
    if let Ok(n) = excmd_trimmed.parse::<u32>() {
        line_no = Some(n);
    }

    for field in fields {
        if let Some((key, value)) = field.split_once(':') {
            match key {
                "line" => line_no = value.parse().ok().or(line_no),
                "kind" => kind = expand_kind(value),
                "class" | "scope" => scope = Some(value.to_string()),
                "signature" => signature = Some(value.to_string()),
                _ => {}
            }
        } else if kind.is_empty() {
            // Bare single field after the excmd is the kind letter
            kind = expand_kind(field);
        }
    }

    let line_no = line_no?;
    if kind.is_empty() {
        kind = "unknown".to_string();
    }

    Some(SymbolDefinition {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        name,
        language: language_for_file(&file_path),
        file_path,
        line: line_no,
        kind,
        scope,
        signature,
    })
}

/// Parse the contents of a tags file.
pub fn parse_ctags(content: &str, project_id: &str) -> Vec<SymbolDefinition> {
    content
        .lines()
        .filter_map(|line| parse_tags_line(line, project_id))
        .collect()
}

/// Load and parse a tags file from disk.
pub fn load_ctags_file(path: &Path, project_id: &str) -> Result<Vec<SymbolDefinition>> {
    let content = std::fs::read_to_string(path)?;
    let symbols = parse_ctags(&content, project_id);
    tracing::info!(count = symbols.len(), path = %path.display(), "Loaded ctags index");
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extended_format() {
        let tags = "!_TAG_FILE_FORMAT\t2\t/extended/\n\
                    authenticate_user\tsrc/auth.py\t/^def authenticate_user(/;\"\tf\tline:42\n\
                    UserService\tsrc/user.py\t/^class UserService:/;\"\tc\tline:10\n\
                    get_user\tsrc/user.py\t/^    def get_user(/;\"\tm\tline:15\tclass:UserService\n";

        let symbols = parse_ctags(tags, "p");
        assert_eq!(symbols.len(), 3);

        let auth = &symbols[0];
        assert_eq!(auth.name, "authenticate_user");
        assert_eq!(auth.file_path, "src/auth.py");
        assert_eq!(auth.line, 42);
        assert_eq!(auth.kind, "function");
        assert_eq!(auth.language, "python");

        let method = &symbols[2];
        assert_eq!(method.kind, "member");
        assert_eq!(method.scope.as_deref(), Some("UserService"));
    }

    #[test]
    fn test_parse_numeric_excmd() {
        let tags = "main\tsrc/main.rs\t7;\"\tf\n";
        let symbols = parse_ctags(tags, "p");
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].line, 7);
        assert_eq!(symbols[0].kind, "function");
        assert_eq!(symbols[0].language, "rust");
    }

    #[test]
    fn test_signature_field() {
        let tags = "login\tsrc/auth.ts\t/^  login(/;\"\tm\tline:5\tsignature:(username: string)\n";
        let symbols = parse_ctags(tags, "p");
        assert_eq!(symbols[0].signature.as_deref(), Some("(username: string)"));
    }

    #[test]
    fn test_malformed_lines_are_dropped() {
        let tags = "!_TAG_HEADER\nnot-enough-fields\nname_only\tfile\n\n";
        assert!(parse_ctags(tags, "p").is_empty());
    }
}
