// crates/vlt-server/src/repomap/mod.rs
// Repository map: PageRank centrality over the reference graph and a
// token-budgeted textual rendering grouped by file

use crate::utils::estimate_tokens;
use std::collections::{HashMap, HashSet};

const PAGERANK_DAMPING: f64 = 0.85;
const PAGERANK_ITERATIONS: usize = 50;
const PAGERANK_EPSILON: f64 = 1e-6;

/// A symbol candidate for the map.
#[derive(Debug, Clone)]
pub struct MapSymbol {
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub kind: String,
    pub signature: String,
    pub line: u32,
    pub docstring: Option<String>,
    pub parent: Option<String>,
}

impl MapSymbol {
    pub fn new(
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        file_path: impl Into<String>,
        kind: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            qualified_name: qualified_name.into(),
            file_path: file_path.into(),
            kind: kind.into(),
            signature: signature.into(),
            line: 0,
            docstring: None,
            parent: None,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }
}

/// Directed reference graph with lazily-built adjacency maps. Stored in
/// normal form elsewhere; this is the in-memory traversal shape only.
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    nodes: Vec<String>,
    node_set: HashSet<String>,
    edges: Vec<(String, String)>,
    out_edges: HashMap<String, Vec<String>>,
    in_edges: HashMap<String, Vec<String>>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.node_set.insert(id.clone()) {
            self.nodes.push(id);
        }
    }

    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>) {
        let source = source.into();
        let target = target.into();
        self.add_node(source.clone());
        self.add_node(target.clone());
        self.out_edges.entry(source.clone()).or_default().push(target.clone());
        self.in_edges.entry(target.clone()).or_default().push(source.clone());
        self.edges.push((source, target));
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_set.contains(id)
    }

    /// Nodes this node references.
    pub fn callees(&self, id: &str) -> &[String] {
        self.out_edges.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Nodes referencing this node.
    pub fn callers(&self, id: &str) -> &[String] {
        self.in_edges.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Build the reference graph from symbols and (source, target) edges.
pub fn build_reference_graph(symbols: &[MapSymbol], edges: &[(String, String)]) -> ReferenceGraph {
    let mut graph = ReferenceGraph::new();
    for symbol in symbols {
        graph.add_node(symbol.qualified_name.clone());
    }
    for (source, target) in edges {
        graph.add_edge(source.clone(), target.clone());
    }
    graph
}

/// Iterative PageRank over the reference graph.
///
/// Damping 0.85, up to 50 iterations, convergence when the largest delta
/// drops under 1e-6. Dangling nodes redistribute uniformly. The output is
/// normalised to sum to 1.0; an empty graph yields an empty map and a
/// singleton scores 1.0.
pub fn calculate_centrality(graph: &ReferenceGraph) -> HashMap<String, f64> {
    let nodes = graph.nodes();
    let n = nodes.len();
    if n == 0 {
        return HashMap::new();
    }
    if n == 1 {
        return HashMap::from([(nodes[0].clone(), 1.0)]);
    }

    let initial = 1.0 / n as f64;
    let mut scores: HashMap<&str, f64> = nodes.iter().map(|id| (id.as_str(), initial)).collect();

    for _ in 0..PAGERANK_ITERATIONS {
        let mut next: HashMap<&str, f64> =
            nodes.iter().map(|id| (id.as_str(), (1.0 - PAGERANK_DAMPING) / n as f64)).collect();

        let mut dangling_mass = 0.0;
        for id in nodes {
            let score = scores[id.as_str()];
            let callees = graph.callees(id);
            if callees.is_empty() {
                dangling_mass += score;
            } else {
                let share = PAGERANK_DAMPING * score / callees.len() as f64;
                for callee in callees {
                    if let Some(entry) = next.get_mut(callee.as_str()) {
                        *entry += share;
                    }
                }
            }
        }

        let dangling_share = PAGERANK_DAMPING * dangling_mass / n as f64;
        for value in next.values_mut() {
            *value += dangling_share;
        }

        let max_delta = nodes
            .iter()
            .map(|id| (next[id.as_str()] - scores[id.as_str()]).abs())
            .fold(0.0f64, f64::max);

        scores = next;
        if max_delta < PAGERANK_EPSILON {
            break;
        }
    }

    let total: f64 = scores.values().sum();
    if total > 0.0 {
        for value in scores.values_mut() {
            *value /= total;
        }
    }

    scores.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Keep only symbols whose file path starts with the scope prefix.
pub fn filter_symbols_by_scope(symbols: &[MapSymbol], scope: &str) -> Vec<MapSymbol> {
    symbols
        .iter()
        .filter(|s| s.file_path.starts_with(scope))
        .cloned()
        .collect()
}

/// A generated map plus its accounting.
#[derive(Debug, Clone)]
pub struct GeneratedMap {
    pub map_text: String,
    pub token_count: usize,
    pub max_tokens: usize,
    pub files_included: usize,
    pub symbols_included: usize,
    pub symbols_total: usize,
    pub scope: Option<String>,
}

/// Render the token-budgeted map.
///
/// Symbols are ordered by descending centrality (ties by file then line)
/// and greedily admitted until the next one would overflow the budget.
/// The rendering groups admitted symbols by file, one `### path` block per
/// file, preserving the admission order of files.
pub fn generate_repo_map(
    symbols: &[MapSymbol],
    centrality: &HashMap<String, f64>,
    max_tokens: usize,
    include_signatures: bool,
    include_docstrings: bool,
    scope: Option<&str>,
) -> GeneratedMap {
    let scoped: Vec<MapSymbol> = match scope {
        Some(prefix) => filter_symbols_by_scope(symbols, prefix),
        None => symbols.to_vec(),
    };
    let symbols_total = scoped.len();

    let mut ordered: Vec<&MapSymbol> = scoped.iter().collect();
    ordered.sort_by(|a, b| {
        let ca = centrality.get(&a.qualified_name).copied().unwrap_or(0.0);
        let cb = centrality.get(&b.qualified_name).copied().unwrap_or(0.0);
        cb.partial_cmp(&ca)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.line.cmp(&b.line))
    });

    // Greedy budget fill
    let mut admitted: Vec<&MapSymbol> = Vec::new();
    let mut used_tokens = 0usize;
    let mut seen_files: HashSet<&str> = HashSet::new();

    for symbol in ordered {
        let mut cost = estimate_tokens(&render_symbol_line(symbol, include_signatures, include_docstrings)) + 1;
        if !seen_files.contains(symbol.file_path.as_str()) {
            cost += estimate_tokens(&format!("### {}\n", symbol.file_path)) + 1;
        }
        if used_tokens + cost > max_tokens {
            continue;
        }
        used_tokens += cost;
        seen_files.insert(symbol.file_path.as_str());
        admitted.push(symbol);
    }

    // Group by file, keeping admission order of files
    let mut file_order: Vec<&str> = Vec::new();
    let mut by_file: HashMap<&str, Vec<&MapSymbol>> = HashMap::new();
    for symbol in &admitted {
        if !by_file.contains_key(symbol.file_path.as_str()) {
            file_order.push(&symbol.file_path);
        }
        by_file.entry(&symbol.file_path).or_default().push(symbol);
    }

    let mut blocks: Vec<String> = Vec::new();
    for file in &file_order {
        let mut lines = vec![format!("### {file}")];
        if let Some(file_symbols) = by_file.get(file) {
            for symbol in file_symbols {
                lines.push(render_symbol_line(symbol, include_signatures, include_docstrings));
            }
        }
        blocks.push(lines.join("\n"));
    }
    let map_text = blocks.join("\n\n");

    GeneratedMap {
        token_count: estimate_tokens(&map_text),
        map_text,
        max_tokens,
        files_included: file_order.len(),
        symbols_included: admitted.len(),
        symbols_total,
        scope: scope.map(|s| s.to_string()),
    }
}

fn render_symbol_line(symbol: &MapSymbol, include_signatures: bool, include_docstrings: bool) -> String {
    let indent = if symbol.parent.is_some() { "    " } else { "" };
    let mut line = if include_signatures && !symbol.signature.is_empty() {
        format!("{indent}{}", symbol.signature)
    } else {
        format!("{indent}{} {}", symbol.kind, symbol.name)
    };
    if include_docstrings {
        if let Some(doc) = &symbol.docstring {
            if let Some(first) = doc.lines().next() {
                line.push_str(&format!("\n{indent}    {first}"));
            }
        }
    }
    line
}
