//! Dotted-path lookup into JSON values
//!
//! Each path segment selects into a mapping by key or into an array by
//! non-negative decimal index, e.g. `toolCall.parameters.items.0.id`.

use serde_json::Value;

/// Resolve a dotted path against a JSON value.
///
/// Returns `None` when any segment fails to resolve.
///
/// # Examples
///
/// ```rust
/// use agentguard_core::paths::lookup;
/// use serde_json::json;
///
/// let root = json!({"items": [{"id": 7}, {"id": 8}]});
/// assert_eq!(lookup(&root, "items.0.id"), Some(&json!(7)));
/// assert_eq!(lookup(&root, "items.2.id"), None);
/// ```
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Mutable variant of [`lookup`].
pub fn lookup_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_mapping() {
        let root = json!({"a": {"b": {"c": 1}}});
        assert_eq!(lookup(&root, "a.b.c"), Some(&json!(1)));
        assert_eq!(lookup(&root, "a.b"), Some(&json!({"c": 1})));
    }

    #[test]
    fn test_lookup_array_index() {
        let root = json!({"items": [10, 20, 30]});
        assert_eq!(lookup(&root, "items.1"), Some(&json!(20)));
        assert_eq!(lookup(&root, "items.3"), None);
        assert_eq!(lookup(&root, "items.-1"), None);
        assert_eq!(lookup(&root, "items.x"), None);
    }

    #[test]
    fn test_lookup_missing_segment() {
        let root = json!({"a": 1});
        assert_eq!(lookup(&root, "b"), None);
        assert_eq!(lookup(&root, "a.b"), None);
    }

    #[test]
    fn test_lookup_scalar_is_not_traversable() {
        let root = json!("scalar");
        assert_eq!(lookup(&root, "anything"), None);
    }

    #[test]
    fn test_numeric_segment_against_object_is_a_key() {
        let root = json!({"0": "zero"});
        assert_eq!(lookup(&root, "0"), Some(&json!("zero")));
    }

    #[test]
    fn test_lookup_mut_allows_replacement() {
        let mut root = json!({"a": {"b": 1}});
        if let Some(slot) = lookup_mut(&mut root, "a.b") {
            *slot = json!(2);
        }
        assert_eq!(root, json!({"a": {"b": 2}}));
    }
}
