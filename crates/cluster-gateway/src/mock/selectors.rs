//! Label and field selector matching for the mock gateway

use serde_json::Value;
use std::collections::BTreeMap;

/// Whether `labels` satisfies a comma-separated equality label selector.
///
/// Supports `k=v`, `k==v`, `k!=v` and bare `k` (existence).
pub fn matches_labels(selector: Option<&str>, labels: Option<&BTreeMap<String, String>>) -> bool {
    let Some(selector) = selector.filter(|s| !s.trim().is_empty()) else {
        return true;
    };
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);

    selector.split(',').map(str::trim).all(|term| {
        if let Some((key, value)) = term.split_once("!=") {
            labels.get(key.trim()).map(String::as_str) != Some(value.trim())
        } else if let Some((key, value)) = term.split_once('=') {
            let value = value.trim_start_matches('=');
            labels.get(key.trim()).map(String::as_str) == Some(value.trim())
        } else {
            labels.contains_key(term)
        }
    })
}

/// Whether the serialized object satisfies a field selector such as
/// `spec.nodeName=node-a,status.phase=Running`.
pub fn matches_fields(selector: Option<&str>, object: &Value) -> bool {
    let Some(selector) = selector.filter(|s| !s.trim().is_empty()) else {
        return true;
    };

    selector.split(',').map(str::trim).all(|term| {
        let (path, expected, negate) = match term.split_once("!=") {
            Some((path, value)) => (path, value, true),
            None => match term.split_once('=') {
                Some((path, value)) => (path, value.trim_start_matches('='), false),
                None => return false,
            },
        };
        let actual = path
            .trim()
            .split('.')
            .try_fold(object, |node, segment| node.get(segment))
            .and_then(Value::as_str)
            .unwrap_or_default();
        (actual == expected.trim()) != negate
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector_terms() {
        let labels: BTreeMap<String, String> = [
            ("managed-by".to_string(), "op".to_string()),
            ("app".to_string(), "group-a".to_string()),
        ]
        .into();
        assert!(matches_labels(Some("managed-by=op"), Some(&labels)));
        assert!(matches_labels(Some("managed-by=op,app=group-a"), Some(&labels)));
        assert!(!matches_labels(Some("managed-by=op,app=group-b"), Some(&labels)));
        assert!(matches_labels(Some("app!=group-b"), Some(&labels)));
        assert!(matches_labels(Some("app"), Some(&labels)));
        assert!(!matches_labels(Some("missing"), None));
        assert!(matches_labels(None, None));
    }

    #[test]
    fn test_field_selector_paths() {
        let object = serde_json::json!({"spec": {"nodeName": "node-a"}, "status": {"phase": "Running"}});
        assert!(matches_fields(Some("spec.nodeName=node-a"), &object));
        assert!(matches_fields(Some("spec.nodeName=node-a,status.phase=Running"), &object));
        assert!(!matches_fields(Some("spec.nodeName=node-b"), &object));
        assert!(matches_fields(Some("spec.nodeName!=node-b"), &object));
    }
}
