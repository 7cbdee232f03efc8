//! Contract Check
//!
//! Preprocessing and validation for hybrid UI contract documents: JSON
//! that may also carry Jinja-style template directives and comment-style
//! file imports.
//!
//! The pipeline renders templates, expands imports, parses and validates
//! the result, then maps every finding back through the intermediate
//! transformations so locations point at the file a human actually edited.
//!
//! # Example
//!
//! ```no_run
//! use contract_check::{ValidationPipeline, ValidateOptions};
//! use std::path::Path;
//!
//! let mut pipeline = ValidationPipeline::new();
//! let report = pipeline
//!     .validate(Path::new("card.j2.json"), &ValidateOptions::default())
//!     .unwrap();
//!
//! for finding in &report.errors {
//!     // e.g. file:///abs/card.j2.json#L12:3
//!     println!("{}: {}", finding.link.as_deref().unwrap_or("?"), finding.message);
//! }
//! ```
//!
//! # Document Formats
//!
//! | Input | Path taken |
//! |-------|------------|
//! | plain `.json`, no directives | fast path: parse, index, validate |
//! | `.j2.json`, or `{{`/`{%` present | full path: render, expand, parse, index, validate |
//! | `// [Title](file:///abs.json)` comment | full path (import expansion) |

mod cache;
mod context;
mod error;
mod imports;
mod pipeline;
mod position;
mod source_map;
mod template;

pub use cache::{CacheLayer, CacheStats, CachedEntry, Signature, DEFAULT_CAPACITY};
pub use context::{infer_bindings, resolve as resolve_context, scan_usages, Usage};
pub use error::{Diagnostic, ImportError, PipelineError, Severity, TemplateError};
pub use imports::{
    parse_imports, resolve as resolve_imports, DependencyGraph, Expanded, ImportDeclaration,
    DEFAULT_MAX_DEPTH,
};
pub use pipeline::{
    ContractValidator, Finding, JsonSchemaValidator, SourceLocation, StageTiming,
    ValidateOptions, ValidationPipeline, ValidationReport, Violation,
};
pub use position::{Confidence, PositionIndex, PositionInfo};
pub use source_map::{
    LayerKind, LayeredSourceMap, LineOrigin, ResolvedPosition, SourceMapLayer,
};
pub use template::{
    contains_template_syntax, render as render_template, RenderLimits, Rendered,
};
