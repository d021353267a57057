// src/indexer/parsers/python.rs
// Python extraction: defs, classes, docstrings, decorators, imports, calls

use super::{
    ParseContext, ParsedCall, ParsedFile, ParsedImport, ParsedInherit, ParsedSymbol, field_text,
    header_line, line_span, node_text,
};
use tree_sitter::Node;

pub(crate) fn walk_root(root: Node, ctx: &ParseContext, out: &mut ParsedFile) {
    walk(root, ctx, out, None, None);
}

fn walk(
    node: Node,
    ctx: &ParseContext,
    out: &mut ParsedFile,
    parent_class: Option<&str>,
    current_fn: Option<&str>,
) {
    match node.kind() {
        "function_definition" => {
            if let Some(name) = field_text(node, "name", ctx.source) {
                let (start_line, end_line) = line_span(node);
                let kind = if parent_class.is_some() { "method" } else { "function" };
                out.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    kind: kind.to_string(),
                    parent: parent_class.map(|p| p.to_string()),
                    signature: Some(header_line(node, ctx.source)),
                    docstring: get_docstring(node, ctx.source),
                    decorators: get_decorators(node, ctx.source),
                    start_line,
                    end_line,
                });
                if let Some(body) = node.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    for child in body.children(&mut cursor) {
                        walk(child, ctx, out, parent_class, Some(&name));
                    }
                }
                return;
            }
        }
        "class_definition" => {
            if let Some(name) = field_text(node, "name", ctx.source) {
                let (start_line, end_line) = line_span(node);
                out.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    kind: "class".to_string(),
                    parent: None,
                    signature: Some(header_line(node, ctx.source)),
                    docstring: get_docstring(node, ctx.source),
                    decorators: get_decorators(node, ctx.source),
                    start_line,
                    end_line,
                });

                // Superclass list
                if let Some(superclasses) = node.child_by_field_name("superclasses") {
                    let mut cursor = superclasses.walk();
                    for base in superclasses.named_children(&mut cursor) {
                        if matches!(base.kind(), "identifier" | "attribute") {
                            out.inherits.push(ParsedInherit {
                                class_name: name.clone(),
                                base: node_text(base, ctx.source),
                                line: base.start_position().row as u32 + 1,
                            });
                        }
                    }
                }

                if let Some(body) = node.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    for child in body.children(&mut cursor) {
                        walk(child, ctx, out, Some(&name), current_fn);
                    }
                }
                return;
            }
        }
        "import_statement" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if matches!(child.kind(), "dotted_name" | "aliased_import") {
                    let path = if child.kind() == "aliased_import" {
                        field_text(child, "name", ctx.source).unwrap_or_default()
                    } else {
                        node_text(child, ctx.source)
                    };
                    if !path.is_empty() {
                        out.imports.push(ParsedImport {
                            path,
                            line: node.start_position().row as u32 + 1,
                        });
                    }
                }
            }
        }
        "import_from_statement" => {
            if let Some(path) = field_text(node, "module_name", ctx.source) {
                out.imports.push(ParsedImport {
                    path,
                    line: node.start_position().row as u32 + 1,
                });
            }
        }
        "call" => {
            if let Some(callee) = extract_callee(node, ctx.source) {
                out.calls.push(ParsedCall {
                    caller: current_fn.map(|c| c.to_string()),
                    callee,
                    line: node.start_position().row as u32 + 1,
                });
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, ctx, out, parent_class, current_fn);
    }
}

/// First string expression of a def/class body, stripped of quotes.
fn get_docstring(node: Node, source: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let mut cursor = body.walk();
    let first_stmt = body.named_children(&mut cursor).next()?;
    if first_stmt.kind() != "expression_statement" {
        return None;
    }
    let mut ec = first_stmt.walk();
    let expr = first_stmt.named_children(&mut ec).next()?;
    if expr.kind() != "string" {
        return None;
    }
    let raw = node_text(expr, source);
    let text = raw
        .trim_start_matches("\"\"\"")
        .trim_end_matches("\"\"\"")
        .trim_start_matches("'''")
        .trim_end_matches("'''")
        .trim_matches('"')
        .trim_matches('\'')
        .trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Decorator lines from an enclosing decorated_definition.
fn get_decorators(node: Node, source: &[u8]) -> Vec<String> {
    let Some(parent) = node.parent() else {
        return Vec::new();
    };
    if parent.kind() != "decorated_definition" {
        return Vec::new();
    }
    let mut cursor = parent.walk();
    parent
        .children(&mut cursor)
        .filter(|n| n.kind() == "decorator")
        .map(|n| node_text(n, source))
        .collect()
}

const PYTHON_BUILTINS: &[&str] = &[
    "print", "len", "str", "int", "float", "list", "dict", "set", "tuple", "range", "enumerate",
    "zip", "open", "type", "isinstance", "hasattr", "getattr", "setattr", "super", "sorted",
];

fn extract_callee(node: Node, source: &[u8]) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    let callee = match function.kind() {
        "identifier" => node_text(function, source),
        "attribute" => field_text(function, "attribute", source)?,
        _ => return None,
    };
    if PYTHON_BUILTINS.contains(&callee.as_str()) {
        return None;
    }
    Some(callee)
}
