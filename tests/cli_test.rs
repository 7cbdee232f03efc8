//! CLI integration tests for the contract-check binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("contract-check"))
}

fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

mod validate_command {
    use super::*;

    #[test]
    fn valid_plain_json_exits_zero() {
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(&dir, "plain.json", r#"{"a": 1}"#);

        cmd()
            .args(["validate", file.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("valid"));
    }

    #[test]
    fn schema_violation_exits_one_with_source_link() {
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(&dir, "doc.json", "{\n  \"count\": \"three\"\n}");
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"type": "object", "properties": {"count": {"type": "number"}}}"#,
        );

        cmd()
            .args([
                "validate",
                file.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("E_SCHEMA"))
            .stdout(predicate::str::contains("file://"))
            .stdout(predicate::str::contains("#L2:"));
    }

    #[test]
    fn missing_file_exits_three() {
        cmd()
            .args(["validate", "/definitely/not/here.json"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn circular_import_exits_two() {
        let dir = TempDir::new().unwrap();
        let b_path = dir.path().join("b.json");
        let a = write_temp_file(
            &dir,
            "a.json",
            &format!("// [B](file://{})\n{{}}", b_path.display()),
        );
        write_temp_file(
            &dir,
            "b.json",
            &format!("// [A](file://{})\n{{}}", a.display()),
        );

        cmd()
            .args(["validate", a.to_str().unwrap()])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("E_IMPORT"))
            .stdout(predicate::str::contains("circular import"));
    }

    #[test]
    fn json_output_is_machine_readable() {
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(&dir, "doc.json", r#"{"count": "three"}"#);
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"type": "object", "properties": {"count": {"type": "number"}}}"#,
        );

        let output = cmd()
            .args([
                "validate",
                file.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--json",
            ])
            .assert()
            .code(1)
            .get_output()
            .stdout
            .clone();

        let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(report["success"], false);
        assert_eq!(report["fatal"], false);
        assert_eq!(report["errors"][0]["code"], "E_SCHEMA");
    }

    #[test]
    fn template_warnings_are_shown() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        let file = write_temp_file(
            &dir,
            "doc.json",
            &format!("[\n// [Nope](file://{})\n]", missing.display()),
        );

        cmd()
            .args(["validate", file.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("W003"));
    }

    #[test]
    fn quiet_suppresses_warnings() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        let file = write_temp_file(
            &dir,
            "doc.json",
            &format!("[\n// [Nope](file://{})\n]", missing.display()),
        );

        cmd()
            .args(["validate", file.to_str().unwrap(), "--quiet"])
            .assert()
            .success()
            .stdout(predicate::str::contains("W003").not());
    }
}

mod expand_command {
    use super::*;

    #[test]
    fn renders_templates_with_inferred_context() {
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(&dir, "card.j2.json", "{\"count\": {{ count }}}");

        cmd()
            .args(["expand", file.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"count": 3}"#));
    }

    #[test]
    fn expands_imports_inline() {
        let dir = TempDir::new().unwrap();
        let part = write_temp_file(&dir, "part.json", r#"{"part": true}"#);
        let main = write_temp_file(
            &dir,
            "main.json",
            &format!("[\n// [Part](file://{})\n]", part.display()),
        );

        cmd()
            .args(["expand", main.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"part": true}"#))
            .stdout(predicate::str::contains("// [Part]").not());
    }

    #[test]
    fn explicit_context_file_wins() {
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(&dir, "card.j2.json", r#"{"title": "{{ title }}"}"#);
        let ctx = write_temp_file(&dir, "ctx.json", r#"{"title": "From CLI"}"#);

        cmd()
            .args([
                "expand",
                file.to_str().unwrap(),
                "--context",
                ctx.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("From CLI"));
    }

    #[test]
    fn output_file_receives_the_expansion() {
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(&dir, "plain.json", r#"{"a": 1}"#);
        let out = dir.path().join("out.json");

        cmd()
            .args([
                "expand",
                file.to_str().unwrap(),
                "--output",
                out.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());

        let content = fs::read_to_string(&out).unwrap();
        assert!(content.contains(r#""a": 1"#));
    }
}

mod graph_command {
    use super::*;

    #[test]
    fn lists_the_import_tree() {
        let dir = TempDir::new().unwrap();
        let part = write_temp_file(&dir, "part.json", r#"{"part": true}"#);
        let main = write_temp_file(
            &dir,
            "main.json",
            &format!("[\n// [Part](file://{})\n]", part.display()),
        );

        cmd()
            .args(["graph", main.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("main.json"))
            .stdout(predicate::str::contains("part.json"));
    }

    #[test]
    fn no_imports_is_fine() {
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(&dir, "plain.json", r#"{"a": 1}"#);

        cmd()
            .args(["graph", file.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("no imports"));
    }

    #[test]
    fn json_graph_lists_edges() {
        let dir = TempDir::new().unwrap();
        let part = write_temp_file(&dir, "part.json", r#"{"part": true}"#);
        let main = write_temp_file(
            &dir,
            "main.json",
            &format!("[\n// [Part](file://{})\n]", part.display()),
        );

        let output = cmd()
            .args(["graph", main.to_str().unwrap(), "--json"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let nodes: serde_json::Value = serde_json::from_slice(&output).unwrap();
        let node_files: Vec<&str> = nodes
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["file"].as_str().unwrap())
            .collect();
        assert!(node_files.iter().any(|f| f.ends_with("main.json")));
        assert!(node_files.iter().any(|f| f.ends_with("part.json")));
    }
}
