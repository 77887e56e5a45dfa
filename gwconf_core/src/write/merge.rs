//! Merge newly exported values into files that already exist.
//!
//! Existing keys keep their position and new keys are appended. A new value
//! replaces an old one unless it is empty, so a partial export never blanks
//! out something the user already has.

use serde_json::Value;

use crate::properties::PropertyMap;

/// Whether a value counts as "not given"
fn is_empty(val: &Value) -> bool {
    match val {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Merge `new` into `existing`. Objects are merged key by key, anything
/// else is replaced wholesale by a non-empty new value.
pub(crate) fn merge_values(existing: Value, new: Value) -> Value {
    match (existing, new) {
        (Value::Object(mut existing), Value::Object(new)) => {
            for (key, val) in new {
                match existing.get_mut(&key) {
                    Some(old) => *old = merge_values(old.take(), val),
                    None => {
                        existing.insert(key, val);
                    }
                }
            }
            Value::Object(existing)
        }
        (existing, new) if is_empty(&new) && !is_empty(&existing) => existing,
        (_, new) => new,
    }
}

/// Merge properties the same way: new non-empty values win, existing keys
/// keep their place.
pub(crate) fn merge_properties(mut existing: PropertyMap, new: PropertyMap) -> PropertyMap {
    for (key, val) in new {
        match existing.get_mut(&key) {
            Some(old) if val.is_empty() => {
                if old.is_empty() {
                    *old = val;
                }
            }
            Some(old) => *old = val,
            None => {
                existing.insert(key, val);
            }
        }
    }
    existing
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_values_win_unless_empty() {
        let existing = json!({
            "orders": {"url": "/orders", "enabled": false, "httpMethods": ["GET"]},
            "legacy": {"url": "/legacy"}
        });
        let new = json!({
            "orders": {"url": "/v2/orders", "httpMethods": [], "properties": {"soap": true}},
            "audit": {"url": "/audit"}
        });
        let merged = merge_values(existing, new);
        assert_eq!(
            merged,
            json!({
                "orders": {
                    "url": "/v2/orders",
                    "enabled": false,
                    "httpMethods": ["GET"],
                    "properties": {"soap": true}
                },
                "legacy": {"url": "/legacy"},
                "audit": {"url": "/audit"}
            })
        );
    }

    #[test]
    fn existing_keys_keep_their_order() {
        let merged = merge_values(json!({"b": 1, "a": 2}), json!({"c": 3, "a": 4}));
        let keys: Vec<_> = merged.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(merged["a"], 4);
    }

    #[test]
    fn properties_merge() {
        let existing: PropertyMap = [("a", "1"), ("b", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        let new: PropertyMap = [("c", "3"), ("b", ""), ("a", "10")]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        let merged = merge_properties(existing, new);
        let pairs: Vec<_> = merged.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(pairs, vec![("a", "10"), ("b", "2"), ("c", "3")]);
    }
}
