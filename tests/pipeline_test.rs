//! End-to-end pipeline tests: rendering, import expansion, position mapping,
//! and validation against a schema.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use contract_check::{
    render_template, resolve_imports, JsonSchemaValidator, LayerKind, LayeredSourceMap,
    PositionIndex, RenderLimits, SourceMapLayer, ValidateOptions, ValidationPipeline,
    DEFAULT_MAX_DEPTH,
};

fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn context(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

mod position_exactness {
    use super::*;

    #[test]
    fn every_literal_path_resolves_to_its_line() {
        let text = r#"{
  "title": "Hello",
  "items": [
    {"label": "first"},
    {"label": "second"}
  ],
  "footer": {
    "text": "bye"
  }
}"#;
        let index = PositionIndex::build(text);
        for (pointer, line) in [
            ("/title", 2),
            ("/items", 3),
            ("/items/0", 4),
            ("/items/0/label", 4),
            ("/items/1/label", 5),
            ("/footer", 7),
            ("/footer/text", 8),
        ] {
            let (info, confidence) = index.find(pointer);
            assert_eq!(info.line, line, "pointer {pointer}");
            assert_eq!(confidence, contract_check::Confidence::Exact);
        }
    }
}

mod identity_composition {
    use super::*;

    #[test]
    fn single_template_layer_round_trips_substituted_tokens() {
        let template = "{\n  \"title\": \"{{ title }}\",\n  \"count\": {{ count }}\n}";
        let path = Path::new("/virtual/card.j2.json");
        let ctx = context(&[("title", json!("Hello")), ("count", json!(2))]);

        let rendered = render_template(path, template, &ctx, &RenderLimits::default()).unwrap();
        assert!(rendered.warnings.is_empty());

        let index = PositionIndex::build(&rendered.text);
        let map = LayeredSourceMap::new(
            path.to_path_buf(),
            vec![SourceMapLayer::new(
                LayerKind::Template,
                path.to_path_buf(),
                rendered.origins,
            )],
        );

        for (pointer, template_line) in [("/title", 2), ("/count", 3)] {
            let (info, _) = index.find(pointer);
            let resolved = map.resolve_position(info.line, info.column);
            assert_eq!(resolved.source_file, path);
            assert_eq!(resolved.source_line, template_line, "pointer {pointer}");
        }
    }
}

mod circular_imports {
    use super::*;

    #[test]
    fn two_file_cycle_lists_the_full_path() {
        let dir = TempDir::new().unwrap();
        let b_path = dir.path().join("b.json");
        let a = write_file(
            &dir,
            "a.json",
            &format!("// [B](file://{})\n{{}}", b_path.display()),
        );
        write_file(
            &dir,
            "b.json",
            &format!("// [A](file://{})\n{{}}", a.display()),
        );

        let content = fs::read_to_string(&a).unwrap();
        let err = resolve_imports(&content, &a, DEFAULT_MAX_DEPTH).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("circular import"), "{message}");
        assert!(message.contains("a.json"), "{message}");
        assert!(message.contains("b.json"), "{message}");
        assert!(message.contains("→"), "{message}");
        // a → b → a: the cycle path starts and ends on the same file.
        let first = message.find("a.json").unwrap();
        let last = message.rfind("a.json").unwrap();
        assert_ne!(first, last);
    }

    #[test]
    fn cycle_is_a_fatal_report_not_a_panic() {
        let dir = TempDir::new().unwrap();
        let b_path = dir.path().join("b.json");
        let a = write_file(
            &dir,
            "a.json",
            &format!("// [B](file://{})\n{{}}", b_path.display()),
        );
        write_file(
            &dir,
            "b.json",
            &format!("// [A](file://{})\n{{}}", a.display()),
        );

        let mut pipeline = ValidationPipeline::new();
        let report = pipeline.validate(&a, &ValidateOptions::default()).unwrap();
        assert!(report.fatal);
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, "E_IMPORT");
        assert!(report.errors[0].message.contains("b.json"));
    }
}

mod diamond_imports {
    use super::*;

    fn diamond(dir: &TempDir) -> PathBuf {
        let shared = write_file(dir, "shared.json", r#"{"shared": true}"#);
        let left = write_file(
            dir,
            "left.json",
            &format!("[\"left\",\n// [S](file://{})\n]", shared.display()),
        );
        let right = write_file(
            dir,
            "right.json",
            &format!("[\"right\",\n// [S](file://{})\n]", shared.display()),
        );
        write_file(
            dir,
            "root.json",
            &format!(
                "[\n// [L](file://{}),\n// [R](file://{})\n]",
                left.display(),
                right.display()
            ),
        )
    }

    #[test]
    fn shared_file_expanded_twice_but_read_once() {
        let dir = TempDir::new().unwrap();
        let root = diamond(&dir);

        let content = fs::read_to_string(&root).unwrap();
        let expanded = resolve_imports(&content, &root, DEFAULT_MAX_DEPTH).unwrap();

        // Both usage sites got the shared content.
        assert_eq!(expanded.text.matches(r#""shared": true"#).count(), 2);
        // But only left, right, and shared were read from disk.
        assert_eq!(expanded.files_read, 3);
        // And the whole thing is still one JSON document.
        let value: Value = serde_json::from_str(&expanded.text).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn expansion_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let root = diamond(&dir);

        let content = fs::read_to_string(&root).unwrap();
        let once = resolve_imports(&content, &root, DEFAULT_MAX_DEPTH).unwrap();
        let twice = resolve_imports(&once.text, &root, DEFAULT_MAX_DEPTH).unwrap();

        assert_eq!(once.text, twice.text);
        assert_eq!(twice.files_read, 0);
        assert_eq!(twice.graph.node_count(), 1);
    }
}

mod undefined_variables {
    use super::*;

    #[test]
    fn missing_binding_renders_placeholder_and_warns() {
        let path = Path::new("/virtual/card.j2.json");
        let rendered = render_template(
            path,
            r#"{"title": "{{ title }}"}"#,
            &Map::new(),
            &RenderLimits::default(),
        )
        .unwrap();

        // The placeholder keeps the document parseable.
        let value: Value = serde_json::from_str(&rendered.text).unwrap();
        assert_eq!(value["title"], "{{ title }}");

        assert_eq!(rendered.warnings.len(), 1);
        assert_eq!(rendered.warnings[0].code, "W001");
        assert!(rendered.warnings[0].message.contains("title"));
    }

    #[test]
    fn pipeline_infers_a_binding_instead_of_failing() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "card.j2.json", r#"{"title": "{{ title }}"}"#);

        let mut pipeline = ValidationPipeline::new();
        let report = pipeline
            .validate(&file, &ValidateOptions::default())
            .unwrap();
        assert!(report.success, "{:?}", report.errors);
        assert!(!report.fast_path);
    }
}

mod imported_file_errors {
    use super::*;

    #[test]
    fn schema_violation_points_into_the_imported_file() {
        let dir = TempDir::new().unwrap();
        let header = write_file(
            &dir,
            "header.json",
            "{\n  \"header\": {\n    \"size\": \"big\"\n  }\n}",
        );
        let main = write_file(
            &dir,
            "main.json",
            &format!("[\n// [Header](file://{})\n]", header.display()),
        );

        let schema = json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "header": {
                        "type": "object",
                        "properties": {
                            "size": {"type": "number"}
                        }
                    }
                }
            }
        });

        let mut pipeline = ValidationPipeline::new()
            .with_validator(Box::new(JsonSchemaValidator::new(&schema).unwrap()));
        let report = pipeline
            .validate(&main, &ValidateOptions::default())
            .unwrap();

        assert!(!report.success);
        let finding = &report.errors[0];
        assert_eq!(finding.code, "E_SCHEMA");
        assert_eq!(finding.json_pointer, "/0/header/size");
        assert_eq!(finding.path, "0.header.size");

        let source = finding.source.as_ref().unwrap();
        assert_eq!(source.file, header, "must point at the imported file");
        assert_eq!(source.line, 3);
        assert!(source.excerpt.contains("size"));

        let link = finding.link.as_ref().unwrap();
        assert!(link.starts_with("file://"));
        assert!(link.contains("header.json#L3:"));
    }

    #[test]
    fn missing_import_is_a_warning_not_an_error() {
        let dir = TempDir::new().unwrap();
        let main = write_file(
            &dir,
            "main.json",
            &format!(
                "[\n// [Nope](file://{}/nope.json)\n]",
                dir.path().display()
            ),
        );

        let mut pipeline = ValidationPipeline::new();
        let report = pipeline
            .validate(&main, &ValidateOptions::default())
            .unwrap();
        assert!(report.success);
        assert!(report.warnings.iter().any(|w| w.code == "W003"));
    }
}

mod fast_path {
    use super::*;

    #[test]
    fn plain_json_skips_render_and_import_stages() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "plain.json", r#"{"a": 1, "b": [2, 3]}"#);

        let mut pipeline = ValidationPipeline::new();
        for _ in 0..2 {
            let report = pipeline
                .validate(&file, &ValidateOptions::default())
                .unwrap();
            assert!(report.success);
            assert!(report.fast_path);
            let stages: Vec<&str> = report.timings.iter().map(|t| t.stage.as_str()).collect();
            assert!(!stages.contains(&"render"));
            assert!(!stages.contains(&"imports"));
            assert!(stages.contains(&"parse"));
        }
    }

    #[test]
    fn syntax_error_in_plain_json_reports_exact_position() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "broken.json", "{\n  \"a\": 1,\n}");

        let mut pipeline = ValidationPipeline::new();
        let report = pipeline
            .validate(&file, &ValidateOptions::default())
            .unwrap();
        assert!(report.fatal);
        assert_eq!(report.errors[0].code, "E_JSON");
        let source = report.errors[0].source.as_ref().unwrap();
        assert_eq!(source.file, file);
        assert_eq!(source.line, 3);
    }
}

mod caching {
    use super::*;

    #[test]
    fn second_validation_of_unchanged_template_is_a_hit() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "card.j2.json", r#"{"title": "{{ title }}"}"#);

        let mut pipeline = ValidationPipeline::new();
        pipeline
            .validate(&file, &ValidateOptions::default())
            .unwrap();
        let report = pipeline
            .validate(&file, &ValidateOptions::default())
            .unwrap();

        assert!(report.success);
        assert_eq!(report.cache.hits, 1);
        assert_eq!(report.cache.misses, 1);
    }

    #[test]
    fn edited_import_invalidates_the_dependent_document() {
        let dir = TempDir::new().unwrap();
        let part = write_file(&dir, "part.json", r#"{"v": 1}"#);
        let main = write_file(
            &dir,
            "main.json",
            &format!("[\n// [P](file://{})\n]", part.display()),
        );

        let mut pipeline = ValidationPipeline::new();
        pipeline
            .validate(&main, &ValidateOptions::default())
            .unwrap();

        fs::write(&part, r#"{"v": 2}"#).unwrap();
        let report = pipeline
            .validate(&main, &ValidateOptions::default())
            .unwrap();
        assert!(report.success);
        // The stale entry was dropped, so this run was a miss, not a hit.
        assert_eq!(report.cache.hits, 0);
        assert!(report.cache.invalidations >= 1);
    }
}

mod render_limits {
    use super::*;

    #[test]
    fn deadline_overrun_is_a_fatal_template_error() {
        let dir = TempDir::new().unwrap();
        let file = write_file(
            &dir,
            "card.j2.json",
            "{% for a in xs %}{% for b in xs %}.{% endfor %}{% endfor %}",
        );

        let xs: Vec<i32> = (0..1000).collect();
        let options = ValidateOptions {
            context: Some(context(&[("xs", json!(xs))])),
            timeout_ms: Some(0),
            ..ValidateOptions::default()
        };
        let mut pipeline = ValidationPipeline::new();
        let report = pipeline.validate(&file, &options).unwrap();

        assert!(report.fatal);
        assert!(!report.success);
        assert_eq!(report.errors[0].code, "E_TEMPLATE");
        assert!(report.errors[0].message.contains("exceeded"));
    }

    #[test]
    fn oversized_loop_is_a_fatal_template_error() {
        let dir = TempDir::new().unwrap();
        let file = write_file(
            &dir,
            "card.j2.json",
            "{% for x in items %}.{% endfor %}",
        );

        let items: Vec<i32> = (0..10_001).collect();
        let options = ValidateOptions {
            context: Some(context(&[("items", json!(items))])),
            ..ValidateOptions::default()
        };
        let mut pipeline = ValidationPipeline::new();
        let report = pipeline.validate(&file, &options).unwrap();

        assert!(report.fatal);
        assert_eq!(report.errors[0].code, "E_TEMPLATE");
        assert!(report.errors[0].message.contains("iterations"));
        // The loop's own line, via the error's position accessor.
        assert_eq!(report.errors[0].source.as_ref().unwrap().line, 1);
    }
}

mod explicit_context {
    use super::*;

    #[test]
    fn caller_bindings_override_inference() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "card.j2.json", "{\"count\": {{ count }}}");

        let options = ValidateOptions {
            context: Some(context(&[("count", json!(42))])),
            ..ValidateOptions::default()
        };
        let mut pipeline = ValidationPipeline::new();
        let report = pipeline.validate(&file, &options).unwrap();
        assert!(report.success, "{:?}", report.errors);
    }

    #[test]
    fn sibling_context_file_is_picked_up() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "card.context.json", r#"{"title": "From Sibling"}"#);
        let file = write_file(&dir, "card.j2.json", r#"{"title": "{{ title }}"}"#);

        let schema = json!({
            "type": "object",
            "properties": {
                "title": {"const": "From Sibling"}
            }
        });
        let mut pipeline = ValidationPipeline::new()
            .with_validator(Box::new(JsonSchemaValidator::new(&schema).unwrap()));
        let report = pipeline
            .validate(&file, &ValidateOptions::default())
            .unwrap();
        assert!(report.success, "{:?}", report.errors);
    }
}
