//! Template context resolution: explicit bindings plus inferred stand-ins.
//!
//! Binding precedence, highest first: a sibling `<base>.context.json` file,
//! caller-supplied overrides, then stand-in values inferred from how each
//! undefined identifier is used in the template. Merging is shallow per
//! top-level key: an explicit binding fully overrides the inferred subtree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::Diagnostic;

/// How an identifier is used in a template, gathered by a static scan.
#[derive(Debug, Default, Clone)]
pub struct Usage {
    pub name: String,
    /// Iterated with `{% for x in name %}`.
    pub iterated: bool,
    /// Attribute names seen in dotted access (directly, or on the loop
    /// variable when `name` is the iterable).
    pub attributes: Vec<String>,
    /// Filters the identifier was piped through.
    pub filters: Vec<String>,
}

/// One matcher→producer stand-in rule, evaluated in priority order.
struct InferenceRule {
    name: &'static str,
    applies: fn(&Usage) -> bool,
    produce: fn(&Usage) -> Value,
}

const RULES: &[InferenceRule] = &[
    InferenceRule {
        name: "iterated-list",
        applies: |usage| usage.iterated,
        produce: |usage| {
            if usage.attributes.is_empty() {
                json!(["sample-1", "sample-2"])
            } else {
                let element = attribute_object(&usage.attributes);
                Value::Array(vec![element.clone(), element])
            }
        },
    },
    InferenceRule {
        name: "currency-filtered",
        applies: |usage| usage.filters.iter().any(|f| f == "currency"),
        produce: |_| json!(99.99),
    },
    InferenceRule {
        name: "date-filtered",
        applies: |usage| usage.filters.iter().any(|f| f == "date"),
        produce: |_| json!("2024-01-01"),
    },
    InferenceRule {
        name: "dotted-object",
        applies: |usage| !usage.attributes.is_empty(),
        produce: |usage| attribute_object(&usage.attributes),
    },
    InferenceRule {
        name: "name-heuristic",
        applies: |_| true,
        produce: |usage| guess_value(&usage.name),
    },
];

fn attribute_object(attributes: &[String]) -> Value {
    let mut map = Map::new();
    for attr in attributes {
        map.insert(attr.clone(), guess_value(attr));
    }
    Value::Object(map)
}

/// Name→value heuristic table for leaf stand-ins.
fn guess_value(name: &str) -> Value {
    let lower = name.to_lowercase();
    if lower.contains("title") || lower.contains("name") || lower.contains("label") {
        return json!(format!("Sample {name}"));
    }
    if lower.contains("amount") || lower.contains("price") || lower.contains("cost") {
        return json!(99.99);
    }
    if lower.contains("count") || lower.contains("total") || lower.contains("quantity") {
        return json!(3);
    }
    if lower.contains("date") || lower.contains("time") {
        return json!("2024-01-01");
    }
    if lower.starts_with("is_")
        || lower.starts_with("has_")
        || lower.contains("enabled")
        || lower.contains("visible")
        || lower.contains("active")
    {
        return json!(true);
    }
    if lower.contains("url") || lower.contains("link") || lower.contains("href") {
        return json!("https://example.com");
    }
    if lower.contains("email") {
        return json!("user@example.com");
    }
    if lower == "id" || lower.ends_with("_id") {
        return json!("id-123");
    }
    json!("")
}

fn for_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{%\s*for\s+(\w+)\s+in\s+([\w.]+)").unwrap())
}

fn expr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][\w.]*)\s*((?:\|[^}]*)?)\}\}").unwrap())
}

fn cond_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{%\s*(?:el)?if\s+(?:not\s+)?([A-Za-z_][\w.]*)").unwrap())
}

fn filter_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\|\s*(\w+)").unwrap())
}

/// Scan a template for identifier usages.
///
/// Loop variables are tracked so attribute access on them is attributed to
/// the iterable, and they are excluded from the result themselves.
pub fn scan_usages(content: &str) -> Vec<Usage> {
    let mut usages: HashMap<String, Usage> = HashMap::new();
    // loop variable → iterable root
    let mut loop_vars: HashMap<String, String> = HashMap::new();

    for caps in for_re().captures_iter(content) {
        let var = caps[1].to_string();
        let iterable = caps[2].split('.').next().unwrap_or(&caps[2]).to_string();
        usages
            .entry(iterable.clone())
            .or_insert_with(|| Usage {
                name: iterable.clone(),
                ..Usage::default()
            })
            .iterated = true;
        loop_vars.insert(var, iterable);
    }

    let mut record = |path: &str, filters: &str, usages: &mut HashMap<String, Usage>| {
        let mut segments = path.split('.');
        let root = segments.next().unwrap_or(path).to_string();
        let attribute = segments.next().map(str::to_string);

        // Attribute access on a loop variable describes the iterable's
        // element shape; the variable itself needs no binding.
        let (target, attribute) = match loop_vars.get(&root) {
            Some(iterable) => (iterable.clone(), attribute),
            None if root == "loop" || root == "now" => return,
            None => (root, attribute),
        };

        let usage = usages.entry(target.clone()).or_insert_with(|| Usage {
            name: target,
            ..Usage::default()
        });
        if let Some(attr) = attribute {
            if !usage.attributes.contains(&attr) {
                usage.attributes.push(attr);
            }
        }
        for filter_caps in filter_name_re().captures_iter(filters) {
            let filter = filter_caps[1].to_string();
            if !usage.filters.contains(&filter) {
                usage.filters.push(filter);
            }
        }
    };

    for caps in expr_re().captures_iter(content) {
        record(&caps[1], caps.get(2).map_or("", |m| m.as_str()), &mut usages);
    }
    for caps in cond_re().captures_iter(content) {
        record(&caps[1], "", &mut usages);
    }

    let mut result: Vec<Usage> = usages.into_values().collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    result
}

/// Generate stand-in bindings for every identifier the template uses.
pub fn infer_bindings(content: &str) -> Map<String, Value> {
    let mut bindings = Map::new();
    for usage in scan_usages(content) {
        // The last rule applies unconditionally, so every usage gets a value.
        if let Some(rule) = RULES.iter().find(|rule| (rule.applies)(&usage)) {
            tracing::debug!(identifier = %usage.name, rule = rule.name, "inferred stand-in");
            bindings.insert(usage.name.clone(), (rule.produce)(&usage));
        }
    }
    bindings
}

/// Path of the sibling context file: `card.j2.json` → `card.context.json`.
pub fn sibling_context_path(template_path: &Path) -> PathBuf {
    let name = template_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let base = name
        .strip_suffix(".j2.json")
        .or_else(|| name.strip_suffix(".json"))
        .unwrap_or(name);
    template_path.with_file_name(format!("{base}.context.json"))
}

/// Resolve the full binding set for one template.
///
/// Returns the merged bindings and any diagnostics (an unreadable or invalid
/// sibling context file is a warning, not an error).
pub fn resolve(
    template_path: &Path,
    content: &str,
    overrides: Option<&Map<String, Value>>,
) -> (Map<String, Value>, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let mut bindings = infer_bindings(content);

    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            bindings.insert(key.clone(), value.clone());
        }
    }

    let sibling = sibling_context_path(template_path);
    if sibling.is_file() {
        match std::fs::read_to_string(&sibling) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => {
                    tracing::debug!(context = %sibling.display(), keys = map.len(), "loaded sibling context");
                    for (key, value) in map {
                        bindings.insert(key, value);
                    }
                }
                Ok(_) => diagnostics.push(
                    Diagnostic::warning("W002", "context file is not a JSON object")
                        .at(sibling.clone(), 1),
                ),
                Err(e) => diagnostics.push(
                    Diagnostic::warning("W002", format!("invalid context file: {e}"))
                        .at(sibling.clone(), 1),
                ),
            },
            Err(e) => diagnostics.push(
                Diagnostic::warning("W002", format!("cannot read context file: {e}"))
                    .at(sibling.clone(), 1),
            ),
        }
    }

    (bindings, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_collects_attributes_and_filters() {
        let usages = scan_usages(r#"{{ user.name | upper }} {{ user.email }} {{ total | currency }}"#);
        let user = usages.iter().find(|u| u.name == "user").unwrap();
        assert_eq!(user.attributes, vec!["name", "email"]);
        assert_eq!(user.filters, vec!["upper"]);

        let total = usages.iter().find(|u| u.name == "total").unwrap();
        assert_eq!(total.filters, vec!["currency"]);
    }

    #[test]
    fn loop_variable_attributes_accrue_to_iterable() {
        let usages =
            scan_usages("{% for item in products %}{{ item.label }}{{ item.price }}{% endfor %}");
        assert_eq!(usages.len(), 1);
        let products = &usages[0];
        assert_eq!(products.name, "products");
        assert!(products.iterated);
        assert_eq!(products.attributes, vec!["label", "price"]);
    }

    #[test]
    fn loop_builtin_is_not_inferred() {
        let usages = scan_usages("{% for x in xs %}{{ loop.index }}{% endfor %}");
        assert!(usages.iter().all(|u| u.name != "loop"));
    }

    #[test]
    fn iterated_identifier_becomes_list_stub() {
        let bindings =
            infer_bindings("{% for item in products %}{{ item.price }}{% endfor %}");
        let products = bindings.get("products").unwrap().as_array().unwrap();
        assert_eq!(products.len(), 2);
        assert!(products[0].get("price").unwrap().is_number());
    }

    #[test]
    fn filter_rules_take_priority_over_name_heuristic() {
        let bindings = infer_bindings("{{ delivery | currency }}");
        assert!(bindings.get("delivery").unwrap().is_number());

        let bindings = infer_bindings("{{ delivery | date }}");
        assert!(bindings.get("delivery").unwrap().is_string());
    }

    #[test]
    fn name_heuristics() {
        assert_eq!(guess_value("title"), json!("Sample title"));
        assert_eq!(guess_value("unit_price"), json!(99.99));
        assert_eq!(guess_value("item_count"), json!(3));
        assert_eq!(guess_value("created_date"), json!("2024-01-01"));
        assert_eq!(guess_value("is_active"), json!(true));
        assert_eq!(guess_value("avatar_url"), json!("https://example.com"));
        assert_eq!(guess_value("whatever"), json!(""));
    }

    #[test]
    fn conditional_identifiers_are_scanned() {
        let bindings = infer_bindings("{% if is_premium %}x{% endif %}");
        assert_eq!(bindings.get("is_premium"), Some(&json!(true)));
    }

    #[test]
    fn sibling_path_for_template_and_plain_extensions() {
        assert_eq!(
            sibling_context_path(Path::new("/a/card.j2.json")),
            PathBuf::from("/a/card.context.json")
        );
        assert_eq!(
            sibling_context_path(Path::new("/a/card.json")),
            PathBuf::from("/a/card.context.json")
        );
    }

    #[test]
    fn sibling_context_overrides_inference_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("card.j2.json");
        std::fs::write(
            dir.path().join("card.context.json"),
            r#"{"title": "From File"}"#,
        )
        .unwrap();

        let mut overrides = Map::new();
        overrides.insert("title".to_string(), json!("From Caller"));
        overrides.insert("extra".to_string(), json!(1));

        let (bindings, diagnostics) =
            resolve(&template, r#"{{ title }} {{ subtitle }}"#, Some(&overrides));
        assert!(diagnostics.is_empty());
        assert_eq!(bindings.get("title"), Some(&json!("From File")));
        assert_eq!(bindings.get("extra"), Some(&json!(1)));
        // Inferred binding survives for keys nobody overrode.
        assert_eq!(bindings.get("subtitle"), Some(&json!("Sample subtitle")));
    }

    #[test]
    fn invalid_sibling_context_is_warning() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("card.j2.json");
        std::fs::write(dir.path().join("card.context.json"), "not json").unwrap();

        let (_, diagnostics) = resolve(&template, "{{ x }}", None);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, "W002");
    }
}
