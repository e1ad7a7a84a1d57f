//! Extra-condition filtering.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::context::value_as_string;

/// Returns true when every condition matches the event context.
///
/// Comparison is case-insensitive after trimming. A condition value may list
/// comma-separated alternatives, any of which matches. A blank condition
/// value places no constraint; a key missing from the context compares as
/// the empty string.
pub fn conditions_match(conditions: &BTreeMap<String, String>, context: &Map<String, Value>) -> bool {
    conditions.iter().all(|(key, expected)| {
        let actual = context
            .get(key)
            .map(value_as_string)
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let mut alternatives = expected
            .split(',')
            .map(|alt| alt.trim().to_lowercase())
            .filter(|alt| !alt.is_empty())
            .peekable();

        alternatives.peek().is_none() || alternatives.any(|alt| alt == actual)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn conds(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_conditions_always_match() {
        assert!(conditions_match(&BTreeMap::new(), &ctx(json!({"project": "x"}))));
    }

    #[test]
    fn test_case_insensitive_equality() {
        let context = ctx(json!({"project": "Core"}));
        assert!(conditions_match(&conds(&[("project", "core")]), &context));
        assert!(!conditions_match(&conds(&[("project", "web")]), &context));
    }

    #[test]
    fn test_comma_separated_alternatives() {
        let context = ctx(json!({"tag": "latest"}));
        assert!(conditions_match(&conds(&[("tag", "v2, LATEST")]), &context));
        assert!(!conditions_match(&conds(&[("tag", "v2,v3")]), &context));
    }

    #[test]
    fn test_missing_key_does_not_match_non_empty_filter() {
        let context = ctx(json!({"tag": "latest"}));
        assert!(!conditions_match(&conds(&[("branch", "main")]), &context));
        assert!(conditions_match(&conds(&[("branch", " ")]), &context));
    }

    #[test]
    fn test_all_conditions_must_hold() {
        let context = ctx(json!({"tag": "latest", "project": "core", "build": 12}));
        assert!(conditions_match(&conds(&[("tag", "latest"), ("build", "12")]), &context));
        assert!(!conditions_match(&conds(&[("tag", "latest"), ("project", "web")]), &context));
    }
}
