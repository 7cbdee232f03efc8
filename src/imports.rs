//! Comment-style import resolution with cycle detection.
//!
//! An import is a structured comment of the form
//! `// [Title](file:///absolute/path.json)` on its own line, outside any JSON
//! string literal. Resolution builds the full dependency graph first, rejects
//! cycles before any expansion, then expands bottom-up so a diamond-shaped
//! descendant is read and parsed exactly once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Diagnostic, ImportError};
use crate::source_map::LineOrigin;

/// Default maximum import chain length.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// One parsed import comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDeclaration {
    pub title: String,
    pub path: PathBuf,
    /// 1-based line of the comment within its file.
    pub line_number: usize,
    /// Text on the comment line before `//` (preserved on substitution).
    pub prefix: String,
    /// Text after the closing `)`, notably a trailing comma.
    pub suffix: String,
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^//\s*\[([^\]]*)\]\(file://(/[^)]+\.json)\)\s*(.*)$").unwrap())
}

/// Byte index of `//` outside any string literal, honoring backslash escapes.
fn comment_start(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'/') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Extract all import declarations from a document.
///
/// Text matching the pattern inside a JSON string literal is not an import.
pub fn parse_imports(content: &str) -> Vec<ImportDeclaration> {
    let mut imports = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let Some(at) = comment_start(line) else {
            continue;
        };
        let Some(caps) = import_re().captures(&line[at..]) else {
            continue;
        };
        imports.push(ImportDeclaration {
            title: caps[1].to_string(),
            path: PathBuf::from(&caps[2]),
            line_number: idx + 1,
            prefix: line[..at].to_string(),
            suffix: caps[3].trim_end().to_string(),
        });
    }
    imports
}

/// Directed file-import graph, arena style: nodes in one vector, edges as
/// index pairs. Rebuilt per resolution pass, never mutated incrementally.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<PathBuf, usize>,
}

#[derive(Debug, Clone)]
struct GraphNode {
    path: PathBuf,
    imports: Vec<usize>,
    imported_by: Vec<usize>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    pub fn add_node(&mut self, path: &Path) -> usize {
        if let Some(&idx) = self.index.get(path) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(GraphNode {
            path: path.to_path_buf(),
            imports: Vec::new(),
            imported_by: Vec::new(),
        });
        self.index.insert(path.to_path_buf(), idx);
        idx
    }

    pub fn add_edge(&mut self, from: &Path, to: &Path) {
        let from_idx = self.add_node(from);
        let to_idx = self.add_node(to);
        if !self.nodes[from_idx].imports.contains(&to_idx) {
            self.nodes[from_idx].imports.push(to_idx);
        }
        if !self.nodes[to_idx].imported_by.contains(&from_idx) {
            self.nodes[to_idx].imported_by.push(from_idx);
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.nodes.iter().map(|n| n.path.as_path())
    }

    pub fn imports_of(&self, path: &Path) -> Vec<&Path> {
        self.index
            .get(path)
            .map(|&idx| {
                self.nodes[idx]
                    .imports
                    .iter()
                    .map(|&i| self.nodes[i].path.as_path())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, path: &Path) -> Vec<&Path> {
        self.index
            .get(path)
            .map(|&idx| {
                self.nodes[idx]
                    .imported_by
                    .iter()
                    .map(|&i| self.nodes[i].path.as_path())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First directed cycle, as the node path `start → … → start`.
    ///
    /// DFS with an explicit recursion stack: only nodes on the *active path*
    /// count as cycle participants, so a diamond (shared descendant reached
    /// twice) is not reported while a self-import is.
    pub fn detect_cycles(&self) -> Option<Vec<PathBuf>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit(
            graph: &DependencyGraph,
            node: usize,
            colors: &mut [Color],
            active: &mut Vec<usize>,
        ) -> Option<Vec<PathBuf>> {
            colors[node] = Color::Gray;
            active.push(node);
            for &next in &graph.nodes[node].imports {
                match colors[next] {
                    Color::Gray => {
                        let start = active.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<PathBuf> = active[start..]
                            .iter()
                            .map(|&n| graph.nodes[n].path.clone())
                            .collect();
                        cycle.push(graph.nodes[next].path.clone());
                        return Some(cycle);
                    }
                    Color::White => {
                        if let Some(cycle) = visit(graph, next, colors, active) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
            active.pop();
            colors[node] = Color::Black;
            None
        }

        let mut colors = vec![Color::White; self.nodes.len()];
        let mut active = Vec::new();
        for node in 0..self.nodes.len() {
            if colors[node] == Color::White {
                if let Some(cycle) = visit(self, node, &mut colors, &mut active) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

/// Result of one resolution pass.
#[derive(Debug)]
pub struct Expanded {
    pub text: String,
    /// One entry per output line of `text`.
    pub origins: Vec<LineOrigin>,
    pub graph: DependencyGraph,
    /// Declarations found in the root document itself.
    pub imports: Vec<ImportDeclaration>,
    pub warnings: Vec<Diagnostic>,
    /// Distinct files read from disk during this pass.
    pub files_read: usize,
}

enum FileState {
    Loaded(String),
    Missing,
}

struct Loader {
    files: HashMap<PathBuf, FileState>,
    declarations: HashMap<PathBuf, Vec<ImportDeclaration>>,
    files_read: usize,
}

struct Expansion {
    lines: Vec<(String, LineOrigin)>,
    /// True when a missing import left a void somewhere below; the JSON
    /// well-formedness check is skipped for degraded subtrees and deferred
    /// to the final parse stage.
    degraded: bool,
}

/// Resolve all imports in `content`, recursively and bottom-up.
///
/// `origin_file` names the root document in the returned source map.
///
/// # Errors
///
/// Fails on circular imports (before any expansion), import chains deeper
/// than `max_depth`, unreadable files, and imported files whose expanded
/// content is not valid JSON. A file that simply does not exist is a
/// warning: that import is skipped, leaving a void.
pub fn resolve(
    content: &str,
    origin_file: &Path,
    max_depth: usize,
) -> Result<Expanded, ImportError> {
    let mut graph = DependencyGraph::new();
    let mut loader = Loader {
        files: HashMap::new(),
        declarations: HashMap::new(),
        files_read: 0,
    };

    graph.add_node(origin_file);
    // Registering the root up front keeps a cycle back to it from triggering
    // a redundant disk read before cycle detection runs.
    loader
        .files
        .insert(origin_file.to_path_buf(), FileState::Loaded(content.to_string()));
    build_graph(origin_file, content, 0, max_depth, &mut graph, &mut loader)?;

    if let Some(cycle) = graph.detect_cycles() {
        return Err(ImportError::CircularImport { cycle });
    }
    tracing::debug!(
        nodes = graph.node_count(),
        files_read = loader.files_read,
        "import graph built, no cycles"
    );

    let mut warnings = Vec::new();
    let mut memo: HashMap<PathBuf, Expansion> = HashMap::new();
    let expansion = expand_content(origin_file, content, &loader, &mut memo, &mut warnings)?;

    let (lines, origins): (Vec<String>, Vec<LineOrigin>) = expansion.lines.into_iter().unzip();
    Ok(Expanded {
        text: lines.join("\n"),
        origins,
        graph,
        imports: loader
            .declarations
            .get(origin_file)
            .cloned()
            .unwrap_or_default(),
        warnings,
        files_read: loader.files_read,
    })
}

fn build_graph(
    file: &Path,
    content: &str,
    depth: usize,
    max_depth: usize,
    graph: &mut DependencyGraph,
    loader: &mut Loader,
) -> Result<(), ImportError> {
    let declarations = parse_imports(content);
    for decl in &declarations {
        graph.add_edge(file, &decl.path);

        if loader.files.contains_key(&decl.path) {
            continue;
        }
        if depth + 1 > max_depth {
            return Err(ImportError::DepthExceeded {
                limit: max_depth,
                path: decl.path.clone(),
            });
        }

        if !decl.path.is_file() {
            loader.files.insert(decl.path.clone(), FileState::Missing);
            continue;
        }
        let child_content =
            std::fs::read_to_string(&decl.path).map_err(|source| ImportError::Read {
                path: decl.path.clone(),
                source,
            })?;
        loader.files_read += 1;
        loader
            .files
            .insert(decl.path.clone(), FileState::Loaded(child_content.clone()));
        build_graph(&decl.path, &child_content, depth + 1, max_depth, graph, loader)?;
    }
    loader.declarations.insert(file.to_path_buf(), declarations);
    Ok(())
}

fn expand_content(
    file: &Path,
    content: &str,
    loader: &Loader,
    memo: &mut HashMap<PathBuf, Expansion>,
    warnings: &mut Vec<Diagnostic>,
) -> Result<Expansion, ImportError> {
    let empty = Vec::new();
    let declarations = loader.declarations.get(file).unwrap_or(&empty);
    let by_line: HashMap<usize, &ImportDeclaration> = declarations
        .iter()
        .map(|decl| (decl.line_number, decl))
        .collect();

    let mut lines: Vec<(String, LineOrigin)> = Vec::new();
    let mut degraded = false;

    for (idx, line) in content.lines().enumerate() {
        let origin = LineOrigin {
            file: file.to_path_buf(),
            line: idx + 1,
        };
        let Some(decl) = by_line.get(&(idx + 1)) else {
            lines.push((line.to_string(), origin));
            continue;
        };

        match loader.files.get(&decl.path) {
            Some(FileState::Loaded(_)) => {
                expand_child(&decl.path, loader, memo, warnings)?;
                let child = &memo[&decl.path];
                degraded |= child.degraded;
                splice(&mut lines, child, &decl.prefix, &decl.suffix);
            }
            Some(FileState::Missing) | None => {
                warnings.push(
                    Diagnostic::warning(
                        "W003",
                        format!("import file not found: {}", decl.path.display()),
                    )
                    .at(file.to_path_buf(), decl.line_number),
                );
                degraded = true;
                let leftover = format!("{}{}", decl.prefix, decl.suffix);
                if !leftover.trim().is_empty() {
                    lines.push((leftover, origin));
                }
            }
        }
    }

    Ok(Expansion { lines, degraded })
}

/// Expand an imported file once, memoized, and verify its expanded content
/// parses as JSON. Partial structural damage inside an imported file cannot
/// be safely patched around, so invalid JSON here is fatal.
fn expand_child(
    path: &Path,
    loader: &Loader,
    memo: &mut HashMap<PathBuf, Expansion>,
    warnings: &mut Vec<Diagnostic>,
) -> Result<(), ImportError> {
    if memo.contains_key(path) {
        return Ok(());
    }
    let Some(FileState::Loaded(content)) = loader.files.get(path) else {
        return Ok(());
    };
    let expansion = expand_content(path, content, loader, memo, warnings)?;

    if !expansion.degraded {
        let text: String = expansion
            .lines
            .iter()
            .map(|(line, _)| line.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if let Err(source) = serde_json::from_str::<serde_json::Value>(&text) {
            return Err(ImportError::InvalidImportedJson {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    memo.insert(path.to_path_buf(), expansion);
    Ok(())
}

/// Splice a child expansion into the parent's line stream, preserving the
/// punctuation that surrounded the import comment.
fn splice(lines: &mut Vec<(String, LineOrigin)>, child: &Expansion, prefix: &str, suffix: &str) {
    let count = child.lines.len();
    for (i, (text, origin)) in child.lines.iter().enumerate() {
        let mut out = String::new();
        if i == 0 {
            out.push_str(prefix);
        }
        out.push_str(text);
        if i + 1 == count {
            out.push_str(suffix);
        }
        lines.push((out, origin.clone()));
    }
    if count == 0 {
        let leftover = format!("{prefix}{suffix}");
        if !leftover.trim().is_empty() {
            lines.push((
                leftover,
                child
                    .lines
                    .first()
                    .map(|(_, o)| o.clone())
                    .unwrap_or(LineOrigin {
                        file: PathBuf::new(),
                        line: 1,
                    }),
            ));
        }
    }
}
