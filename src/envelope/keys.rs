//! Short aliases for envelope keys.
//!
//! The alias table is reversible: every long key has exactly one short form
//! and no two long keys share a short form. `compact`/`expand` rewrite object
//! keys recursively and leave unknown keys untouched.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{Map, Value};

const KEY_PAIRS: &[(&str, &str)] = &[
    ("success", "ok"),
    ("timestamp", "ts"),
    ("version", "v"),
    ("output_format", "of"),
    ("error", "err"),
    ("error_code", "ec"),
    ("hint", "h"),
    ("structured_error", "se"),
    ("planned_version", "pv"),
    ("meta", "m"),
    ("duration_ms", "dms"),
    ("exit_code", "xc"),
    ("command", "cmd"),
    ("_agent_hints", "ah"),
    ("summary", "sum"),
    ("next_offset", "no"),
    ("pages_remaining", "pr"),
    ("suggested_actions", "sa"),
    ("warnings", "w"),
    ("notes", "n"),
    ("session", "s"),
    ("sessions", "ss"),
    ("pane", "p"),
    ("panes", "ps"),
    ("agent_type", "at"),
    ("state", "st"),
    ("title", "t"),
    ("targets", "tg"),
    ("agents", "ag"),
    ("recommendations", "rec"),
    ("pagination", "pg"),
    ("total", "tot"),
    ("count", "c"),
    ("has_more", "hm"),
    ("next_cursor", "nc"),
];

struct KeyMap {
    short: HashMap<&'static str, &'static str>,
    long: HashMap<&'static str, &'static str>,
}

static KEY_MAP: LazyLock<KeyMap> = LazyLock::new(|| {
    let mut short = HashMap::new();
    let mut long = HashMap::new();
    for (full, alias) in KEY_PAIRS {
        assert!(
            short.insert(*full, *alias).is_none(),
            "duplicate long key in terse key map: {full}"
        );
        assert!(
            long.insert(*alias, *full).is_none(),
            "duplicate short key in terse key map: {alias}"
        );
    }
    KeyMap { short, long }
});

/// Short alias for a long key, if one exists.
pub fn short_key(key: &str) -> Option<&'static str> {
    KEY_MAP.short.get(key).copied()
}

/// Long key for a short alias, if one exists.
pub fn long_key(alias: &str) -> Option<&'static str> {
    KEY_MAP.long.get(alias).copied()
}

/// Every (long, short) pair, in declaration order.
pub fn pairs() -> &'static [(&'static str, &'static str)] {
    KEY_PAIRS
}

pub fn compact(value: &Value) -> Value {
    rewrite(value, &|k| short_key(k))
}

pub fn expand(value: &Value) -> Value {
    rewrite(value, &|k| long_key(k))
}

fn rewrite(value: &Value, map: &dyn Fn(&str) -> Option<&'static str>) -> Value {
    match value {
        Value::Object(obj) => {
            let mut out = Map::with_capacity(obj.len());
            for (k, v) in obj {
                let key = map(k).map(str::to_string).unwrap_or_else(|| k.clone());
                out.insert(key, rewrite(v, map));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| rewrite(v, map)).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_has_no_duplicate_aliases() {
        // Forces the LazyLock assertions.
        assert_eq!(KEY_MAP.short.len(), KEY_PAIRS.len());
        assert_eq!(KEY_MAP.long.len(), KEY_PAIRS.len());
    }

    #[test]
    fn known_aliases() {
        assert_eq!(short_key("success"), Some("ok"));
        assert_eq!(short_key("timestamp"), Some("ts"));
        assert_eq!(short_key("error_code"), Some("ec"));
        assert_eq!(long_key("ec"), Some("error_code"));
        assert_eq!(short_key("not_a_key"), None);
    }

    #[test]
    fn compact_then_expand_restores_keys() {
        let original = json!({
            "success": false,
            "error_code": "TIMEOUT",
            "panes": [{"pane": "1.2", "state": "idle", "custom": 1}],
            "_agent_hints": {"warnings": []}
        });
        let short = compact(&original);
        assert_eq!(short["ok"], false);
        assert_eq!(short["ps"][0]["st"], "idle");
        assert_eq!(short["ps"][0]["custom"], 1);
        assert_eq!(expand(&short), original);
    }
}
