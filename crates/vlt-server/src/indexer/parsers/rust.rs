// src/indexer/parsers/rust.rs
// Rust extraction: fns, structs/enums, impl methods, use declarations, calls

use super::{
    ParseContext, ParsedCall, ParsedFile, ParsedImport, ParsedSymbol, field_text, header_line,
    line_span, node_text,
};
use tree_sitter::Node;

pub(crate) fn walk_root(root: Node, ctx: &ParseContext, out: &mut ParsedFile) {
    walk(root, ctx, out, None, None);
}

fn walk(
    node: Node,
    ctx: &ParseContext,
    out: &mut ParsedFile,
    impl_type: Option<&str>,
    current_fn: Option<&str>,
) {
    match node.kind() {
        "function_item" => {
            if let Some(name) = field_text(node, "name", ctx.source) {
                let (start_line, end_line) = line_span(node);
                let kind = if impl_type.is_some() { "method" } else { "function" };
                out.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    kind: kind.to_string(),
                    parent: impl_type.map(|t| t.to_string()),
                    signature: Some(header_line(node, ctx.source)),
                    docstring: leading_doc_comment(node, ctx.source),
                    decorators: Vec::new(),
                    start_line,
                    end_line,
                });
                if let Some(body) = node.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    for child in body.children(&mut cursor) {
                        walk(child, ctx, out, impl_type, Some(&name));
                    }
                }
                return;
            }
        }
        "struct_item" | "enum_item" | "trait_item" => {
            if let Some(name) = field_text(node, "name", ctx.source) {
                let (start_line, end_line) = line_span(node);
                out.symbols.push(ParsedSymbol {
                    name,
                    kind: "class".to_string(),
                    parent: None,
                    signature: Some(header_line(node, ctx.source)),
                    docstring: leading_doc_comment(node, ctx.source),
                    decorators: Vec::new(),
                    start_line,
                    end_line,
                });
            }
        }
        "impl_item" => {
            let type_name = field_text(node, "type", ctx.source);
            if let Some(body) = node.child_by_field_name("body") {
                let mut cursor = body.walk();
                for child in body.children(&mut cursor) {
                    walk(child, ctx, out, type_name.as_deref(), current_fn);
                }
            }
            return;
        }
        "use_declaration" => {
            let mut cursor = node.walk();
            let path = node.named_children(&mut cursor).next().map(|arg| node_text(arg, ctx.source));
            if let Some(path) = path {
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
        walk(child, ctx, out, impl_type, current_fn);
    }
}

/// Contiguous `///` lines immediately above an item.
fn leading_doc_comment(node: Node, source: &[u8]) -> Option<String> {
    let mut lines = Vec::new();
    let mut prev = node.prev_sibling();
    while let Some(sibling) = prev {
        if sibling.kind() != "line_comment" {
            break;
        }
        let text = node_text(sibling, source);
        let Some(doc) = text.strip_prefix("///") else {
            break;
        };
        lines.push(doc.trim().to_string());
        prev = sibling.prev_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}

fn extract_callee(node: Node, source: &[u8]) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    let callee = match function.kind() {
        "identifier" => node_text(function, source),
        "field_expression" => field_text(function, "field", source)?,
        "scoped_identifier" => field_text(function, "name", source)?,
        _ => return None,
    };
    Some(callee)
}
