//! Layered source maps: final-document coordinates back to original files.
//!
//! Each transformation stage (template rendering, import expansion) produces
//! one [`SourceMapLayer`]: a per-output-line table of origins. Layers stack in
//! transformation order and are walked in reverse for error resolution, so a
//! position in the final parsed document can be traced through the expanded
//! and rendered intermediates back to the file a human actually edited.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::position::Confidence;

/// Which transformation produced a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Template,
    Import,
}

/// Origin of one output line: the input file and 1-based line that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineOrigin {
    pub file: PathBuf,
    pub line: usize,
}

/// One transformation's output-line → input-position table.
#[derive(Debug, Clone)]
pub struct SourceMapLayer {
    pub kind: LayerKind,
    /// Path by which the next layer up refers to this layer's output document.
    output_tag: PathBuf,
    origins: Vec<LineOrigin>,
}

enum Lookup<'a> {
    Exact(&'a LineOrigin),
    Nearest(&'a LineOrigin),
    Miss,
}

impl SourceMapLayer {
    pub fn new(kind: LayerKind, output_tag: PathBuf, origins: Vec<LineOrigin>) -> Self {
        SourceMapLayer {
            kind,
            output_tag,
            origins,
        }
    }

    pub fn output_tag(&self) -> &Path {
        &self.output_tag
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    fn lookup(&self, output_line: usize) -> Lookup<'_> {
        if output_line >= 1 {
            if let Some(origin) = self.origins.get(output_line - 1) {
                return Lookup::Exact(origin);
            }
        }
        // Past the end of the mapped region: nearest preceding mapped line.
        match self.origins.last() {
            Some(origin) => Lookup::Nearest(origin),
            None => Lookup::Miss,
        }
    }

    /// First output line whose origin is the given (file, line) pair.
    fn find_output_line(&self, file: &Path, line: usize) -> Option<usize> {
        self.origins
            .iter()
            .position(|origin| origin.file == file && origin.line == line)
            .map(|idx| idx + 1)
    }
}

/// A fully traced position in an original source file.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPosition {
    pub source_file: PathBuf,
    pub source_line: usize,
    /// Best-effort: layers map whole lines, so the column is carried through
    /// unchanged on exact hops. A substitution that shifted text within the
    /// line leaves it approximate even at `Exact` confidence; `confidence`
    /// describes the line. Fallback hops reset it to 1.
    pub source_col: usize,
    pub confidence: Confidence,
    /// Every intermediate (file, line) hop, outermost first.
    pub chain: Vec<(PathBuf, usize)>,
}

/// Composition of all active layers for one validation run.
///
/// `resolve_position` walks layers in reverse transformation order; with no
/// layers (the plain-JSON fast path) it is the identity map onto `file`.
#[derive(Debug, Clone)]
pub struct LayeredSourceMap {
    file: PathBuf,
    layers: Vec<SourceMapLayer>,
}

impl LayeredSourceMap {
    /// `file` is the original document being validated; `layers` are in
    /// transformation order (template first, import second).
    pub fn new(file: PathBuf, layers: Vec<SourceMapLayer>) -> Self {
        LayeredSourceMap { file, layers }
    }

    pub fn identity(file: PathBuf) -> Self {
        LayeredSourceMap {
            file,
            layers: Vec::new(),
        }
    }

    pub fn layers(&self) -> &[SourceMapLayer] {
        &self.layers
    }

    /// Trace a final-document position back to its original source.
    ///
    /// Line resolution is what the confidence level describes; the column is
    /// best-effort (see [`ResolvedPosition::source_col`]).
    pub fn resolve_position(&self, final_line: usize, final_col: usize) -> ResolvedPosition {
        let mut file = self.file.clone();
        let mut line = final_line;
        let mut col = final_col;
        let mut confidence = Confidence::Exact;
        let mut chain: Vec<(PathBuf, usize)> = Vec::new();
        let mut in_primary = true;

        for (hop, layer) in self.layers.iter().rev().enumerate() {
            // Once a hop lands in a secondary file (an imported or included
            // document), deeper layers no longer apply: that file reached the
            // final document verbatim and its coordinates are already original.
            if hop > 0 && !in_primary {
                break;
            }
            match layer.lookup(line) {
                Lookup::Exact(origin) => {
                    in_primary = origin.file == layer.output_tag || origin.file == self.file;
                    file = origin.file.clone();
                    line = origin.line;
                    chain.push((file.clone(), line));
                }
                Lookup::Nearest(origin) => {
                    tracing::debug!(
                        requested = line,
                        mapped = origin.line,
                        "source map fallback to nearest mapped line"
                    );
                    confidence = confidence.max(Confidence::Parent);
                    in_primary = origin.file == layer.output_tag || origin.file == self.file;
                    file = origin.file.clone();
                    line = origin.line;
                    col = 1;
                    chain.push((file.clone(), line));
                }
                Lookup::Miss => {
                    return ResolvedPosition {
                        source_file: self.file.clone(),
                        source_line: 1,
                        source_col: 1,
                        confidence: Confidence::Approximate,
                        chain,
                    };
                }
            }
        }

        ResolvedPosition {
            source_file: file,
            source_line: line,
            source_col: col,
            confidence,
            chain,
        }
    }

    /// Map an original-source line forward to the final document.
    ///
    /// Symmetric counterpart of [`resolve_position`](Self::resolve_position),
    /// for tooling that jumps from source to rendered output. Returns `None`
    /// when the line never reached the final document (omitted conditional
    /// block, dropped import).
    pub fn reverse_resolve(&self, source_file: &Path, source_line: usize) -> Option<usize> {
        if self.layers.is_empty() {
            return (source_file == self.file).then_some(source_line);
        }

        let mut file = source_file.to_path_buf();
        let mut line = source_line;
        let mut matched = false;

        for layer in &self.layers {
            if let Some(out_line) = layer.find_output_line(&file, line) {
                line = out_line;
                file = layer.output_tag.to_path_buf();
                matched = true;
            } else if matched {
                // Lost between layers: the intermediate line was consumed.
                return None;
            }
        }

        matched.then_some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(file: &str, line: usize) -> LineOrigin {
        LineOrigin {
            file: PathBuf::from(file),
            line,
        }
    }

    fn two_layer_map() -> LayeredSourceMap {
        // main.j2.json rendered 1:1 into 4 lines, then line 3 replaced by two
        // lines pulled from header.json during import expansion.
        let template = SourceMapLayer::new(
            LayerKind::Template,
            PathBuf::from("main.j2.json"),
            vec![
                origin("main.j2.json", 1),
                origin("main.j2.json", 2),
                origin("main.j2.json", 3),
                origin("main.j2.json", 4),
            ],
        );
        let import = SourceMapLayer::new(
            LayerKind::Import,
            PathBuf::from("main.j2.json"),
            vec![
                origin("main.j2.json", 1),
                origin("main.j2.json", 2),
                origin("header.json", 1),
                origin("header.json", 2),
                origin("main.j2.json", 4),
            ],
        );
        LayeredSourceMap::new(PathBuf::from("main.j2.json"), vec![template, import])
    }

    #[test]
    fn resolves_through_both_layers() {
        let map = two_layer_map();
        let resolved = map.resolve_position(2, 5);
        assert_eq!(resolved.source_file, PathBuf::from("main.j2.json"));
        assert_eq!(resolved.source_line, 2);
        assert_eq!(resolved.source_col, 5);
        assert_eq!(resolved.confidence, Confidence::Exact);
        assert_eq!(resolved.chain.len(), 2);
    }

    #[test]
    fn imported_lines_stop_at_imported_file() {
        let map = two_layer_map();
        let resolved = map.resolve_position(4, 1);
        assert_eq!(resolved.source_file, PathBuf::from("header.json"));
        assert_eq!(resolved.source_line, 2);
        assert_eq!(resolved.confidence, Confidence::Exact);
    }

    #[test]
    fn past_end_falls_back_to_nearest_with_parent_confidence() {
        let map = two_layer_map();
        let resolved = map.resolve_position(99, 1);
        assert_eq!(resolved.confidence, Confidence::Parent);
        assert_eq!(resolved.source_file, PathBuf::from("main.j2.json"));
        assert_eq!(resolved.source_line, 4);
    }

    #[test]
    fn empty_layer_yields_approximate_line_one() {
        let empty = SourceMapLayer::new(LayerKind::Import, PathBuf::from("a.json"), vec![]);
        let map = LayeredSourceMap::new(PathBuf::from("a.json"), vec![empty]);
        let resolved = map.resolve_position(3, 7);
        assert_eq!(resolved.confidence, Confidence::Approximate);
        assert_eq!(resolved.source_line, 1);
    }

    #[test]
    fn identity_map_for_fast_path() {
        let map = LayeredSourceMap::identity(PathBuf::from("plain.json"));
        let resolved = map.resolve_position(12, 3);
        assert_eq!(resolved.source_file, PathBuf::from("plain.json"));
        assert_eq!(resolved.source_line, 12);
        assert_eq!(resolved.source_col, 3);
        assert_eq!(resolved.confidence, Confidence::Exact);
        assert!(resolved.chain.is_empty());
    }

    #[test]
    fn reverse_resolve_main_and_imported_lines() {
        let map = two_layer_map();
        assert_eq!(
            map.reverse_resolve(Path::new("main.j2.json"), 4),
            Some(5)
        );
        assert_eq!(map.reverse_resolve(Path::new("header.json"), 2), Some(4));
        assert_eq!(map.reverse_resolve(Path::new("main.j2.json"), 3), None);
    }

    #[test]
    fn reverse_resolve_identity() {
        let map = LayeredSourceMap::identity(PathBuf::from("plain.json"));
        assert_eq!(map.reverse_resolve(Path::new("plain.json"), 9), Some(9));
        assert_eq!(map.reverse_resolve(Path::new("other.json"), 9), None);
    }
}
