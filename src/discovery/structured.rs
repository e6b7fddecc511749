use scraper::{Html, Selector};
use serde_json::{Map, Value};

/// Parses every JSON-LD block in the document
///
/// Blocks that are not valid JSON are skipped.
pub fn json_ld_values(document: &Html, json_ld: &Selector) -> Vec<Value> {
    document
        .select(json_ld)
        .filter_map(|script| {
            let raw = script.text().collect::<String>();
            serde_json::from_str::<Value>(raw.trim()).ok()
        })
        .collect()
}

/// Finds the first object whose `@type` is one of `types`
///
/// Looks through top-level arrays and `@graph` containers; `@type` may be a
/// single string or an array of strings.
pub fn find_typed_object<'a>(value: &'a Value, types: &[String]) -> Option<&'a Map<String, Value>> {
    match value {
        Value::Array(items) => items.iter().find_map(|item| find_typed_object(item, types)),
        Value::Object(object) => {
            if has_type(object, types) {
                return Some(object);
            }
            object
                .get("@graph")
                .and_then(|graph| find_typed_object(graph, types))
        }
        _ => None,
    }
}

fn has_type(object: &Map<String, Value>, types: &[String]) -> bool {
    match object.get("@type") {
        Some(Value::String(t)) => types.iter().any(|wanted| wanted == t),
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .any(|t| types.iter().any(|wanted| wanted == t)),
        _ => false,
    }
}
