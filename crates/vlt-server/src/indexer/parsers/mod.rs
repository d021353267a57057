// src/indexer/parsers/mod.rs
// Language parsers built on tree-sitter
//
// Each parser walks the concrete syntax tree and produces the same flat
// shape: symbols (functions, classes, methods), imports, calls, and
// inheritance links. Chunking and graph building consume this shape
// without caring which language produced it.

mod python;
mod rust;
mod typescript;

use crate::error::{Result, VltError};
use tree_sitter::{Node, Parser};

/// A definition found in a source file. Lines are 1-indexed.
#[derive(Debug, Clone)]
pub struct ParsedSymbol {
    pub name: String,
    /// "function", "class", or "method"
    pub kind: String,
    /// Enclosing class name for methods
    pub parent: Option<String>,
    /// Literal header text, e.g. `def get_user(self, id) -> User:`
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub decorators: Vec<String>,
    pub start_line: u32,
    pub end_line: u32,
}

/// An import statement.
#[derive(Debug, Clone)]
pub struct ParsedImport {
    pub path: String,
    pub line: u32,
}

/// A call expression. `caller` is the enclosing function or method name;
/// None means module level.
#[derive(Debug, Clone)]
pub struct ParsedCall {
    pub caller: Option<String>,
    pub callee: String,
    pub line: u32,
}

/// A superclass reference.
#[derive(Debug, Clone)]
pub struct ParsedInherit {
    pub class_name: String,
    pub base: String,
    pub line: u32,
}

/// Flat parse result for one file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub language: String,
    pub symbols: Vec<ParsedSymbol>,
    pub imports: Vec<ParsedImport>,
    pub calls: Vec<ParsedCall>,
    pub inherits: Vec<ParsedInherit>,
}

/// Map a file extension to a supported language id.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    match ext {
        "py" => Some("python"),
        "ts" | "tsx" => Some("typescript"),
        // The TypeScript grammar is a superset that handles plain JS
        "js" | "jsx" => Some("javascript"),
        "rs" => Some("rust"),
        _ => None,
    }
}

/// Parse source code into the flat shape, dispatching on language id.
pub fn parse_source(content: &str, language: &str) -> Result<ParsedFile> {
    let mut parser = Parser::new();
    let walker: fn(Node, &ParseContext, &mut ParsedFile) = match language {
        "python" => {
            parser
                .set_language(&tree_sitter_python::LANGUAGE.into())
                .map_err(|e| VltError::Other(format!("failed to set python grammar: {e}")))?;
            python::walk_root
        }
        "typescript" | "javascript" => {
            parser
                .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
                .map_err(|e| VltError::Other(format!("failed to set typescript grammar: {e}")))?;
            typescript::walk_root
        }
        "rust" => {
            parser
                .set_language(&tree_sitter_rust::LANGUAGE.into())
                .map_err(|e| VltError::Other(format!("failed to set rust grammar: {e}")))?;
            rust::walk_root
        }
        other => {
            return Err(VltError::InvalidInput(format!("unsupported language: {other}")));
        }
    };

    let tree = parser
        .parse(content, None)
        .ok_or_else(|| VltError::Other(format!("tree-sitter failed to parse {language} source")))?;

    let ctx = ParseContext {
        source: content.as_bytes(),
    };
    let mut parsed = ParsedFile {
        language: language.to_string(),
        ..Default::default()
    };
    walker(tree.root_node(), &ctx, &mut parsed);
    Ok(parsed)
}

/// Shared walk state.
pub(crate) struct ParseContext<'a> {
    pub source: &'a [u8],
}

/// UTF-8 text of a node.
pub(crate) fn node_text(node: Node, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or_default().to_string()
}

/// Text of a named field child, if present.
pub(crate) fn field_text(node: Node, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field).map(|n| node_text(n, source))
}

/// First line of a node's text — the literal definition header.
pub(crate) fn header_line(node: Node, source: &[u8]) -> String {
    node_text(node, source)
        .lines()
        .next()
        .unwrap_or_default()
        .trim_end()
        .to_string()
}

/// 1-indexed line span of a node.
pub(crate) fn line_span(node: Node) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path("src/auth.py"), Some("python"));
        assert_eq!(language_for_path("lib/app.tsx"), Some("typescript"));
        assert_eq!(language_for_path("lib/app.js"), Some("javascript"));
        assert_eq!(language_for_path("src/main.rs"), Some("rust"));
        assert_eq!(language_for_path("README.md"), None);
        assert_eq!(language_for_path("Makefile"), None);
    }

    #[test]
    fn test_unsupported_language_is_invalid_input() {
        let err = parse_source("x", "cobol").unwrap_err();
        assert!(matches!(err, VltError::InvalidInput(_)));
    }

    #[test]
    fn test_parse_python_symbols() {
        let source = r#"
class UserService:
    """Service for user operations."""

    def __init__(self, db):
        self.db = db

    def get_user(self, user_id: int) -> dict:
        """Get user by ID."""
        return self.db.query(user_id)

def authenticate(username: str, password: str) -> bool:
    """Authenticate user credentials."""
    return check(username, password)
"#;
        let parsed = parse_source(source, "python").unwrap();

        assert_eq!(parsed.symbols.len(), 4);

        let class_sym = parsed.symbols.iter().find(|s| s.kind == "class").unwrap();
        assert_eq!(class_sym.name, "UserService");
        assert!(class_sym.docstring.as_deref().unwrap().contains("Service for user operations"));

        let method = parsed.symbols.iter().find(|s| s.name == "get_user").unwrap();
        assert_eq!(method.kind, "method");
        assert_eq!(method.parent.as_deref(), Some("UserService"));
        assert!(method.signature.as_deref().unwrap().contains("user_id: int"));

        let func = parsed.symbols.iter().find(|s| s.name == "authenticate").unwrap();
        assert_eq!(func.kind, "function");
        assert!(func.signature.as_deref().unwrap().contains("username: str"));

        // authenticate calls check
        assert!(parsed
            .calls
            .iter()
            .any(|c| c.callee == "check" && c.caller.as_deref() == Some("authenticate")));
    }

    #[test]
    fn test_parse_python_imports_and_inherits() {
        let source = r#"
import os
from vlt.db import SessionLocal

class AdminUser(BaseUser):
    pass
"#;
        let parsed = parse_source(source, "python").unwrap();

        let paths: Vec<&str> = parsed.imports.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"os"));
        assert!(paths.contains(&"vlt.db"));

        assert_eq!(parsed.inherits.len(), 1);
        assert_eq!(parsed.inherits[0].class_name, "AdminUser");
        assert_eq!(parsed.inherits[0].base, "BaseUser");
    }

    #[test]
    fn test_parse_typescript_symbols() {
        let source = r#"
import { Token } from "./token";

class AuthService {
    login(username: string, password: string): Token {
        return issueToken(username);
    }
}

function validateToken(token: string): boolean {
    return token.length > 0;
}
"#;
        let parsed = parse_source(source, "typescript").unwrap();

        let class_sym = parsed.symbols.iter().find(|s| s.kind == "class").unwrap();
        assert_eq!(class_sym.name, "AuthService");

        let method = parsed.symbols.iter().find(|s| s.name == "login").unwrap();
        assert_eq!(method.kind, "method");
        assert_eq!(method.parent.as_deref(), Some("AuthService"));

        assert!(parsed.symbols.iter().any(|s| s.name == "validateToken" && s.kind == "function"));
        assert!(parsed.imports.iter().any(|i| i.path == "./token"));
        assert!(parsed
            .calls
            .iter()
            .any(|c| c.callee == "issueToken" && c.caller.as_deref() == Some("login")));
    }

    #[test]
    fn test_parse_rust_symbols() {
        let source = r#"
use std::collections::HashMap;

pub struct Store {
    map: HashMap<String, String>,
}

impl Store {
    pub fn get(&self, key: &str) -> Option<&String> {
        self.map.get(key)
    }
}

pub fn open_store() -> Store {
    build_default()
}
"#;
        let parsed = parse_source(source, "rust").unwrap();

        assert!(parsed.symbols.iter().any(|s| s.name == "Store" && s.kind == "class"));

        let method = parsed.symbols.iter().find(|s| s.name == "get").unwrap();
        assert_eq!(method.kind, "method");
        assert_eq!(method.parent.as_deref(), Some("Store"));

        assert!(parsed.symbols.iter().any(|s| s.name == "open_store" && s.kind == "function"));
        assert!(parsed.imports.iter().any(|i| i.path.contains("std::collections::HashMap")));
        assert!(parsed
            .calls
            .iter()
            .any(|c| c.callee == "build_default" && c.caller.as_deref() == Some("open_store")));
    }
}
