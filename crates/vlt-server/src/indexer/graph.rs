// src/indexer/graph.rs
// Build code graph nodes and edges from a parsed file
//
// Node ids are qualified names. Edge targets resolve to qualified names
// when the callee/base is defined in the same file; otherwise the raw name
// is kept as an unresolved external symbol.

use super::chunking::{file_path_to_module_name, qualified_name};
use super::parsers::ParsedFile;
use std::collections::HashMap;
use vlt_types::{CodeEdge, CodeNode, CodeNodeKind, EdgeKind};

/// Extract graph nodes and edges for one file.
pub fn build_graph(
    project_id: &str,
    file_path: &str,
    parsed: &ParsedFile,
) -> (Vec<CodeNode>, Vec<CodeEdge>) {
    let module = file_path_to_module_name(file_path);

    let mut nodes: Vec<CodeNode> = Vec::new();

    // The module itself anchors imports and module-level calls
    nodes.push(CodeNode {
        id: module.clone(),
        project_id: project_id.to_string(),
        file_path: file_path.to_string(),
        kind: CodeNodeKind::Module,
        name: module.rsplit('.').next().unwrap_or(&module).to_string(),
        signature: None,
        line: Some(1),
        docstring: None,
        centrality_score: None,
    });

    // Short name → qualified name, for resolving local references
    let mut local: HashMap<&str, String> = HashMap::new();

    for symbol in &parsed.symbols {
        let qualified = qualified_name(file_path, symbol);
        local.entry(symbol.name.as_str()).or_insert_with(|| qualified.clone());

        let kind = match symbol.kind.as_str() {
            "class" => CodeNodeKind::Class,
            "method" => CodeNodeKind::Method,
            _ => CodeNodeKind::Function,
        };

        nodes.push(CodeNode {
            id: qualified,
            project_id: project_id.to_string(),
            file_path: file_path.to_string(),
            kind,
            name: symbol.name.clone(),
            signature: symbol.signature.clone(),
            line: Some(symbol.start_line),
            docstring: symbol.docstring.clone(),
            centrality_score: None,
        });
    }

    let resolve = |name: &str| -> String {
        local.get(name).cloned().unwrap_or_else(|| name.to_string())
    };

    // Aggregate repeated (source, target, kind) into one edge with a count
    let mut edge_map: HashMap<(String, String, EdgeKind), (Option<u32>, u32)> = HashMap::new();

    for import in &parsed.imports {
        let key = (module.clone(), import.path.clone(), EdgeKind::Imports);
        let entry = edge_map.entry(key).or_insert((Some(import.line), 0));
        entry.1 += 1;
    }

    for call in &parsed.calls {
        let source = match &call.caller {
            Some(caller) => resolve(caller),
            None => module.clone(),
        };
        let target = resolve(&call.callee);
        if source == target {
            continue;
        }
        let key = (source, target, EdgeKind::Calls);
        let entry = edge_map.entry(key).or_insert((Some(call.line), 0));
        entry.1 += 1;
    }

    for inherit in &parsed.inherits {
        let source = resolve(&inherit.class_name);
        let target = resolve(&inherit.base);
        let key = (source, target, EdgeKind::Inherits);
        let entry = edge_map.entry(key).or_insert((Some(inherit.line), 0));
        entry.1 += 1;
    }

    let edges = edge_map
        .into_iter()
        .map(|((source_id, target_id, kind), (line, count))| CodeEdge {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            source_id,
            target_id,
            kind,
            line,
            count,
        })
        .collect();

    (nodes, edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parsers::parse_source;

    const SOURCE: &str = r#"from vlt.db import connect

class AdminUser(BaseUser):
    def promote(self, user):
        audit(user)
        audit(user)

def audit(user):
    return connect()
"#;

    #[test]
    fn test_build_graph_nodes() {
        let parsed = parse_source(SOURCE, "python").unwrap();
        let (nodes, _) = build_graph("p", "src/users.py", &parsed);

        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"src.users"));
        assert!(ids.contains(&"src.users.AdminUser"));
        assert!(ids.contains(&"src.users.AdminUser.promote"));
        assert!(ids.contains(&"src.users.audit"));

        let module = nodes.iter().find(|n| n.id == "src.users").unwrap();
        assert_eq!(module.kind, CodeNodeKind::Module);
    }

    #[test]
    fn test_build_graph_edges() {
        let parsed = parse_source(SOURCE, "python").unwrap();
        let (_, edges) = build_graph("p", "src/users.py", &parsed);

        // Import edge from the module
        assert!(edges.iter().any(|e| e.kind == EdgeKind::Imports
            && e.source_id == "src.users"
            && e.target_id == "vlt.db"));

        // Repeated call collapses to one edge with count 2
        let call = edges
            .iter()
            .find(|e| e.kind == EdgeKind::Calls && e.target_id == "src.users.audit")
            .unwrap();
        assert_eq!(call.source_id, "src.users.AdminUser.promote");
        assert_eq!(call.count, 2);

        // Unresolved base stays as the raw name
        let inherit = edges.iter().find(|e| e.kind == EdgeKind::Inherits).unwrap();
        assert_eq!(inherit.source_id, "src.users.AdminUser");
        assert_eq!(inherit.target_id, "BaseUser");
    }

    #[test]
    fn test_local_call_resolution() {
        let parsed = parse_source(SOURCE, "python").unwrap();
        let (_, edges) = build_graph("p", "src/users.py", &parsed);

        // `audit` resolves to its qualified name; `connect` stays external
        assert!(edges.iter().any(|e| e.target_id == "src.users.audit"));
        assert!(edges
            .iter()
            .any(|e| e.kind == EdgeKind::Calls && e.target_id == "connect"));
    }
}
