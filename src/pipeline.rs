//! The validation pipeline: format detection through error re-anchoring.
//!
//! Stages run strictly forward — detect → render → expand imports → parse →
//! index → validate — and error positions flow strictly backward through the
//! [`LayeredSourceMap`] so every reported location points at the file a human
//! edited, never at an intermediate rendering artifact.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::cache::{CacheLayer, CachedEntry, CacheStats, Signature};
use crate::context;
use crate::error::{Diagnostic, ImportError, PipelineError, Severity};
use crate::imports::{self, DEFAULT_MAX_DEPTH};
use crate::position::{Confidence, PositionIndex};
use crate::source_map::{LayerKind, LayeredSourceMap, SourceMapLayer};
use crate::template::{self, contains_template_syntax, RenderLimits};

/// A single schema violation from the external validator, addressed by
/// JSON Pointer into the final parsed document.
#[derive(Debug, Clone)]
pub struct Violation {
    pub pointer: String,
    pub message: String,
}

/// The external collaborator that checks the final parsed document.
pub trait ContractValidator {
    fn check(&self, document: &Value) -> Vec<Violation>;
}

/// [`ContractValidator`] backed by a compiled JSON Schema.
pub struct JsonSchemaValidator {
    validator: jsonschema::Validator,
}

impl JsonSchemaValidator {
    pub fn new(schema: &Value) -> Result<Self, PipelineError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| PipelineError::InvalidSchema {
                message: e.to_string(),
            })?;
        Ok(JsonSchemaValidator { validator })
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let schema: Value =
            serde_json::from_str(&content).map_err(|e| PipelineError::InvalidSchema {
                message: format!("{}: {e}", path.display()),
            })?;
        JsonSchemaValidator::new(&schema)
    }
}

impl ContractValidator for JsonSchemaValidator {
    fn check(&self, document: &Value) -> Vec<Violation> {
        self.validator
            .iter_errors(document)
            .map(|e| Violation {
                pointer: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect()
    }
}

/// Per-validation options.
#[derive(Debug, Clone)]
pub struct ValidateOptions {
    /// Caller-supplied context bindings (between the sibling context file
    /// and inference in precedence).
    pub context: Option<Map<String, Value>>,
    /// Render deadline override, milliseconds.
    pub timeout_ms: Option<u64>,
    pub max_import_depth: usize,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        ValidateOptions {
            context: None,
            timeout_ms: None,
            max_import_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Resolved original-source location of a finding.
#[derive(Debug, Clone, Serialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub excerpt: String,
}

/// One error or warning in the report.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub code: String,
    /// Dotted property path, empty when not applicable.
    pub path: String,
    /// JSON Pointer, empty when not applicable.
    pub json_pointer: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// `file://<abs>#L<line>:<col>` link into the original source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub ms: f64,
}

/// Outcome of validating one file.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub file: PathBuf,
    pub success: bool,
    /// True when a fatal error short-circuited the remaining stages.
    pub fatal: bool,
    /// True when the plain-JSON fast path was taken.
    pub fast_path: bool,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub timings: Vec<StageTiming>,
    pub cache: CacheStats,
}

struct Timings {
    stages: Vec<StageTiming>,
    last: Instant,
}

impl Timings {
    fn start() -> Self {
        Timings {
            stages: Vec::new(),
            last: Instant::now(),
        }
    }

    fn record(&mut self, stage: &str) {
        let now = Instant::now();
        self.stages.push(StageTiming {
            stage: stage.to_string(),
            ms: now.duration_since(self.last).as_secs_f64() * 1000.0,
        });
        self.last = now;
    }
}

/// Orchestrates one validation run per call; owns the injected cache across
/// runs and the optional external validator.
pub struct ValidationPipeline {
    cache: CacheLayer,
    validator: Option<Box<dyn ContractValidator>>,
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        ValidationPipeline::new()
    }
}

impl ValidationPipeline {
    pub fn new() -> Self {
        ValidationPipeline {
            cache: CacheLayer::default(),
            validator: None,
        }
    }

    pub fn with_cache(mut self, cache: CacheLayer) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_validator(mut self, validator: Box<dyn ContractValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Validate one document, reporting findings against original positions.
    ///
    /// # Errors
    ///
    /// `Err` only for I/O failures on the document itself; every
    /// document-level problem (template syntax, cycles, invalid JSON) comes
    /// back as a report with `fatal: true`.
    pub fn validate(
        &mut self,
        path: &Path,
        options: &ValidateOptions,
    ) -> Result<ValidationReport, PipelineError> {
        let mut timings = Timings::start();

        if !path.exists() {
            return Err(PipelineError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        timings.record("read");

        let templated = is_templated(path, &content);
        timings.record("detect");
        tracing::debug!(file = %path.display(), templated, "format detected");

        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let (final_text, map) = if templated {
            match self.preprocess(path, &content, options, &mut timings, &mut diagnostics)? {
                Ok(result) => result,
                Err(report) => return Ok(report),
            }
        } else {
            (content.clone(), LayeredSourceMap::identity(path.to_path_buf()))
        };

        // Final JSON parse. A syntax error here is fatal, mapped back to the
        // original source through whatever layers are active.
        let document: Value = match serde_json::from_str(&final_text) {
            Ok(value) => value,
            Err(e) => {
                let resolved = map.resolve_position(e.line(), e.column());
                let finding = Finding {
                    severity: Severity::Error,
                    code: "E_JSON".to_string(),
                    path: String::new(),
                    json_pointer: String::new(),
                    message: format!("invalid JSON: {e}"),
                    source: Some(self.location(&resolved.source_file, resolved.source_line, resolved.source_col, path, &content)),
                    confidence: Some(resolved.confidence),
                    link: Some(link(&resolved.source_file, resolved.source_line, resolved.source_col)),
                };
                return Ok(self.report(path, !templated, vec![finding], diagnostics, timings, true, &content));
            }
        };
        timings.record("parse");

        let index = PositionIndex::build(&final_text);
        timings.record("index");

        let mut errors = Vec::new();
        if let Some(validator) = &self.validator {
            for violation in validator.check(&document) {
                let (info, lookup_confidence) = index.find(&violation.pointer);
                let resolved = map.resolve_position(info.line, info.column);
                let confidence = lookup_confidence.max(resolved.confidence);
                errors.push(Finding {
                    severity: Severity::Error,
                    code: "E_SCHEMA".to_string(),
                    path: pointer_to_dotted(&violation.pointer),
                    json_pointer: violation.pointer.clone(),
                    message: violation.message,
                    source: Some(self.location(
                        &resolved.source_file,
                        resolved.source_line,
                        resolved.source_col,
                        path,
                        &content,
                    )),
                    confidence: Some(confidence),
                    link: Some(link(
                        &resolved.source_file,
                        resolved.source_line,
                        resolved.source_col,
                    )),
                });
            }
        }
        timings.record("validate");

        Ok(self.report(path, !templated, errors, diagnostics, timings, false, &content))
    }

    /// Render the template and expand imports, cache-aware. The outer
    /// `Result` is I/O failure; the inner `Err` is a completed fatal report.
    #[allow(clippy::type_complexity)]
    fn preprocess(
        &mut self,
        path: &Path,
        content: &str,
        options: &ValidateOptions,
        timings: &mut Timings,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Result<(String, LayeredSourceMap), ValidationReport>, PipelineError> {
        let signature = Signature::of_content(content);

        if let Some(deps) = self.cache.peek_dependencies(path) {
            let stale = deps
                .iter()
                .any(|(dep, sig)| signature_or_missing(dep) != *sig);
            if stale {
                self.cache.invalidate(path, "dependency changed");
            }
        }
        if let Some(entry) = self.cache.get(path, &signature) {
            timings.record("cache");
            diagnostics.extend(entry.warnings.iter().cloned());
            let map = LayeredSourceMap::new(
                path.to_path_buf(),
                vec![
                    SourceMapLayer::new(
                        LayerKind::Template,
                        path.to_path_buf(),
                        entry.template_origins,
                    ),
                    SourceMapLayer::new(LayerKind::Import, path.to_path_buf(), entry.import_origins),
                ],
            );
            return Ok(Ok((entry.rendered, map)));
        }

        let (bindings, context_diags) =
            context::resolve(path, content, options.context.as_ref());
        diagnostics.extend(context_diags);
        timings.record("context");

        let limits = RenderLimits {
            timeout_ms: options.timeout_ms.unwrap_or_else(|| RenderLimits::default().timeout_ms),
        };
        let rendered = match template::render(path, content, &bindings, &limits) {
            Ok(rendered) => rendered,
            Err(e) => {
                let line = e.line().unwrap_or(1);
                let finding = Finding {
                    severity: Severity::Error,
                    code: "E_TEMPLATE".to_string(),
                    path: String::new(),
                    json_pointer: String::new(),
                    message: e.to_string(),
                    source: Some(self.location(path, line, 1, path, content)),
                    confidence: Some(Confidence::Exact),
                    link: Some(link(path, line, 1)),
                };
                return Ok(Err(self.report(
                    path,
                    false,
                    vec![finding],
                    std::mem::take(diagnostics),
                    std::mem::replace(timings, Timings::start()),
                    true,
                    content,
                )));
            }
        };
        diagnostics.extend(rendered.warnings.iter().cloned());
        timings.record("render");

        let expanded = match imports::resolve(&rendered.text, path, options.max_import_depth) {
            Ok(expanded) => expanded,
            Err(ImportError::Read { path: p, source }) => {
                return Err(PipelineError::Import(ImportError::Read { path: p, source }));
            }
            Err(e) => {
                let (file, line) = match &e {
                    ImportError::InvalidImportedJson { path: p, source } => {
                        (p.clone(), source.line())
                    }
                    _ => (path.to_path_buf(), 1),
                };
                let finding = Finding {
                    severity: Severity::Error,
                    code: "E_IMPORT".to_string(),
                    path: String::new(),
                    json_pointer: String::new(),
                    message: e.to_string(),
                    source: Some(self.location(&file, line, 1, path, content)),
                    confidence: Some(Confidence::Exact),
                    link: Some(link(&file, line, 1)),
                };
                return Ok(Err(self.report(
                    path,
                    false,
                    vec![finding],
                    std::mem::take(diagnostics),
                    std::mem::replace(timings, Timings::start()),
                    true,
                    content,
                )));
            }
        };
        diagnostics.extend(expanded.warnings.iter().cloned());
        timings.record("imports");

        let mut dependencies: Vec<(PathBuf, Signature)> = Vec::new();
        for dep in rendered
            .dependencies
            .iter()
            .map(PathBuf::as_path)
            .chain(expanded.graph.paths().filter(|p| *p != path))
        {
            dependencies.push((dep.to_path_buf(), signature_or_missing(dep)));
        }

        self.cache.put(CachedEntry {
            file_path: path.to_path_buf(),
            signature,
            rendered: expanded.text.clone(),
            template_origins: rendered.origins.clone(),
            import_origins: expanded.origins.clone(),
            warnings: diagnostics.clone(),
            dependencies,
        });

        let map = LayeredSourceMap::new(
            path.to_path_buf(),
            vec![
                SourceMapLayer::new(LayerKind::Template, path.to_path_buf(), rendered.origins),
                SourceMapLayer::new(LayerKind::Import, path.to_path_buf(), expanded.origins),
            ],
        );
        Ok(Ok((expanded.text, map)))
    }

    fn location(
        &self,
        file: &Path,
        line: usize,
        column: usize,
        main_path: &Path,
        main_content: &str,
    ) -> SourceLocation {
        let excerpt = if file == main_path {
            excerpt_line(main_content, line)
        } else {
            std::fs::read_to_string(file)
                .map(|text| excerpt_line(&text, line))
                .unwrap_or_default()
        };
        SourceLocation {
            file: file.to_path_buf(),
            line,
            column,
            excerpt,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        path: &Path,
        fast_path: bool,
        errors: Vec<Finding>,
        diagnostics: Vec<Diagnostic>,
        timings: Timings,
        fatal: bool,
        main_content: &str,
    ) -> ValidationReport {
        let warnings = diagnostics
            .into_iter()
            .map(|diag| {
                let source = diag.file.as_ref().map(|file| {
                    self.location(file, diag.line.unwrap_or(1), 1, path, main_content)
                });
                let link = diag
                    .file
                    .as_ref()
                    .map(|file| link(file, diag.line.unwrap_or(1), 1));
                Finding {
                    severity: diag.severity,
                    code: diag.code,
                    path: String::new(),
                    json_pointer: String::new(),
                    message: diag.message,
                    source,
                    confidence: None,
                    link,
                }
            })
            .collect();

        ValidationReport {
            file: path.to_path_buf(),
            success: errors.is_empty() && !fatal,
            fatal,
            fast_path,
            errors,
            warnings,
            timings: timings.stages,
            cache: self.cache.stats(),
        }
    }
}

/// Full pipeline for `.j2.json` files and any `.json` that carries template
/// or import syntax; everything else takes the plain-JSON fast path.
fn is_templated(path: &Path, content: &str) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".j2.json")
        || contains_template_syntax(content)
        || !imports::parse_imports(content).is_empty()
}

fn signature_or_missing(path: &Path) -> Signature {
    Signature::of_file(path).unwrap_or(Signature {
        len: 0,
        sha256: "missing".to_string(),
    })
}

fn excerpt_line(text: &str, line: usize) -> String {
    text.lines()
        .nth(line.saturating_sub(1))
        .map(|l| l.trim().to_string())
        .unwrap_or_default()
}

fn link(file: &Path, line: usize, column: usize) -> String {
    format!("file://{}#L{line}:{column}", file.display())
}

fn pointer_to_dotted(pointer: &str) -> String {
    pointer
        .split('/')
        .skip(1)
        .map(|seg| seg.replace("~1", "/").replace("~0", "~"))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_to_dotted_paths() {
        assert_eq!(pointer_to_dotted("/items/0/label"), "items.0.label");
        assert_eq!(pointer_to_dotted("/a~1b"), "a/b");
        assert_eq!(pointer_to_dotted(""), "");
    }

    #[test]
    fn link_format() {
        assert_eq!(
            link(Path::new("/abs/card.j2.json"), 12, 3),
            "file:///abs/card.j2.json#L12:3"
        );
    }

    #[test]
    fn detects_template_and_import_syntax() {
        let plain = Path::new("a.json");
        assert!(!is_templated(plain, r#"{"a": 1}"#));
        assert!(is_templated(plain, r#"{"a": "{{ x }}"}"#));
        assert!(is_templated(plain, "// [T](file:///t.json)"));
        assert!(is_templated(Path::new("a.j2.json"), r#"{"a": 1}"#));
    }

    #[test]
    fn excerpt_picks_requested_line() {
        assert_eq!(excerpt_line("a\n  b\nc", 2), "b");
        assert_eq!(excerpt_line("a", 9), "");
    }
}
