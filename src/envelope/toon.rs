//! TOON rendering of JSON values.
//!
//! Objects become `key: value` lines with nested objects indented two
//! spaces. Arrays carry their length: primitive arrays are inlined
//! (`tags[2]: a,b`), arrays of same-shaped flat objects become a table
//! (`panes[2]{pane,state}:` followed by one row per element), and anything
//! else is listed with `- ` items.

use serde_json::{Map, Value};

const INDENT: &str = "  ";

pub fn render(value: &Value) -> String {
    let mut out = String::new();
    match value {
        Value::Object(map) => write_object(&mut out, map, 0),
        Value::Array(items) => write_array(&mut out, "", items, 0),
        other => out.push_str(&scalar(other)),
    }
    while out.ends_with('\n') {
        out.pop();
    }
    out
}

fn pad(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn is_primitive(v: &Value) -> bool {
    !matches!(v, Value::Array(_) | Value::Object(_))
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || s.trim() != s
        || s.contains([',', ':', '"', '\n', '\r', '\t', '[', ']', '{', '}', '#'])
        || s.starts_with("- ")
        || matches!(s, "true" | "false" | "null")
        || s.parse::<f64>().is_ok()
}

fn scalar(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if needs_quotes(s) => Value::String(s.clone()).to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => String::new(),
    }
}

fn key(k: &str) -> String {
    if !k.is_empty() && k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') {
        k.to_string()
    } else {
        Value::String(k.to_string()).to_string()
    }
}

fn write_object(out: &mut String, map: &Map<String, Value>, depth: usize) {
    for (k, v) in map {
        match v {
            Value::Object(inner) if inner.is_empty() => {
                pad(out, depth);
                out.push_str(&format!("{}: {{}}\n", key(k)));
            }
            Value::Object(inner) => {
                pad(out, depth);
                out.push_str(&format!("{}:\n", key(k)));
                write_object(out, inner, depth + 1);
            }
            Value::Array(items) => write_array(out, &key(k), items, depth),
            other => {
                pad(out, depth);
                out.push_str(&format!("{}: {}\n", key(k), scalar(other)));
            }
        }
    }
}

/// Field names when every item is an object with the same keys and only
/// primitive values.
fn table_fields(items: &[Value]) -> Option<Vec<String>> {
    let first = items.first()?.as_object()?;
    if first.is_empty() {
        return None;
    }
    let fields: Vec<String> = first.keys().cloned().collect();
    for item in items {
        let obj = item.as_object()?;
        if obj.len() != fields.len() || !fields.iter().all(|f| obj.get(f).is_some_and(is_primitive)) {
            return None;
        }
    }
    Some(fields)
}

fn write_array(out: &mut String, name: &str, items: &[Value], depth: usize) {
    pad(out, depth);
    let n = items.len();
    if items.iter().all(is_primitive) {
        let joined: Vec<String> = items.iter().map(scalar).collect();
        if joined.is_empty() {
            out.push_str(&format!("{name}[0]:\n"));
        } else {
            out.push_str(&format!("{name}[{n}]: {}\n", joined.join(",")));
        }
        return;
    }
    if let Some(fields) = table_fields(items) {
        let header: Vec<String> = fields.iter().map(|f| key(f)).collect();
        out.push_str(&format!("{name}[{n}]{{{}}}:\n", header.join(",")));
        for item in items {
            let row: Vec<String> = fields.iter().map(|f| scalar(&item[f.as_str()])).collect();
            pad(out, depth + 1);
            out.push_str(&row.join(","));
            out.push('\n');
        }
        return;
    }
    out.push_str(&format!("{name}[{n}]:\n"));
    for item in items {
        match item {
            Value::Object(map) if !map.is_empty() => {
                let mut nested = String::new();
                write_object(&mut nested, map, depth + 2);
                // First field goes on the dash line.
                let body = nested.trim_start();
                pad(out, depth + 1);
                out.push_str("- ");
                out.push_str(body);
            }
            Value::Array(inner) => {
                pad(out, depth + 1);
                out.push_str("-\n");
                write_array(out, "", inner, depth + 2);
            }
            other => {
                pad(out, depth + 1);
                out.push_str(&format!("- {}\n", scalar(other)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_object() {
        let v = json!({"success": true, "session": "proj", "count": 3, "note": null});
        assert_eq!(render(&v), "success: true\nsession: proj\ncount: 3\nnote: null");
    }

    #[test]
    fn nested_object_indents() {
        let v = json!({"meta": {"command": "status", "exit_code": 0}});
        assert_eq!(render(&v), "meta:\n  command: status\n  exit_code: 0");
    }

    #[test]
    fn primitive_arrays_inline() {
        let v = json!({"panes": ["1.2", "1.3"], "empty": []});
        assert_eq!(render(&v), "panes[2]: 1.2,1.3\nempty[0]:");
    }

    #[test]
    fn uniform_objects_become_table() {
        let v = json!({"panes": [
            {"pane": "1.2", "state": "idle"},
            {"pane": "1.3", "state": "active"}
        ]});
        assert_eq!(render(&v), "panes[2]{pane,state}:\n  1.2,idle\n  1.3,active");
    }

    #[test]
    fn mixed_objects_become_list() {
        let v = json!({"items": [{"a": 1, "b": {"c": 2}}, {"a": 3}]});
        assert_eq!(render(&v), "items[2]:\n  - a: 1\n    b:\n      c: 2\n  - a: 3");
    }

    #[test]
    fn ambiguous_strings_are_quoted() {
        let v = json!({"a": "x, y", "b": "42", "c": "", "d": "true", "e": "plain text"});
        assert_eq!(render(&v), "a: \"x, y\"\nb: \"42\"\nc: \"\"\nd: \"true\"\ne: plain text");
    }
}
