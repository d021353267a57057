// src/indexer/parsers/typescript.rs
// TypeScript/JavaScript extraction via the TypeScript grammar

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
        "function_declaration" => {
            if let Some(name) = field_text(node, "name", ctx.source) {
                let (start_line, end_line) = line_span(node);
                out.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    kind: "function".to_string(),
                    parent: None,
                    signature: Some(header_line(node, ctx.source)),
                    docstring: leading_jsdoc(node, ctx.source),
                    decorators: Vec::new(),
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
        "class_declaration" => {
            if let Some(name) = field_text(node, "name", ctx.source) {
                let (start_line, end_line) = line_span(node);
                out.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    kind: "class".to_string(),
                    parent: None,
                    signature: Some(header_line(node, ctx.source)),
                    docstring: leading_jsdoc(node, ctx.source),
                    decorators: Vec::new(),
                    start_line,
                    end_line,
                });

                // extends clause
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    if child.kind() == "class_heritage" {
                        let mut hc = child.walk();
                        for clause in child.children(&mut hc) {
                            if clause.kind() == "extends_clause" {
                                let mut vc = clause.walk();
                                for value in clause.named_children(&mut vc) {
                                    if matches!(value.kind(), "identifier" | "member_expression") {
                                        out.inherits.push(ParsedInherit {
                                            class_name: name.clone(),
                                            base: node_text(value, ctx.source),
                                            line: value.start_position().row as u32 + 1,
                                        });
                                    }
                                }
                            }
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
        "method_definition" => {
            if let Some(name) = field_text(node, "name", ctx.source) {
                let (start_line, end_line) = line_span(node);
                out.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    kind: "method".to_string(),
                    parent: parent_class.map(|p| p.to_string()),
                    signature: Some(header_line(node, ctx.source)),
                    docstring: leading_jsdoc(node, ctx.source),
                    decorators: Vec::new(),
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
        "import_statement" => {
            if let Some(source_node) = node.child_by_field_name("source") {
                let path = node_text(source_node, ctx.source)
                    .trim_matches('"')
                    .trim_matches('\'')
                    .to_string();
                out.imports.push(ParsedImport {
                    path,
                    line: node.start_position().row as u32 + 1,
                });
            }
        }
        "call_expression" => {
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

/// A `/** ... */` comment immediately preceding the declaration.
fn leading_jsdoc(node: Node, source: &[u8]) -> Option<String> {
    let prev = node.prev_named_sibling()?;
    if prev.kind() != "comment" {
        return None;
    }
    let raw = node_text(prev, source);
    if !raw.starts_with("/**") {
        return None;
    }
    let cleaned = raw
        .trim_start_matches("/**")
        .trim_end_matches("*/")
        .lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn extract_callee(node: Node, source: &[u8]) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    match function.kind() {
        "identifier" => Some(node_text(function, source)),
        "member_expression" => field_text(function, "property", source),
        _ => None,
    }
}
