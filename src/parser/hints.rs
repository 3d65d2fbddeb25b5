//! Remediation hints for known rule identifiers.

use super::LogEntry;

/// Static rule id → remediation table.
const RULE_HINTS: &[(&str, &str)] = &[
    (
        "no-console",
        "Console logs are forbidden in production. Use a structured logger.",
    ),
    (
        "no-debugger",
        "Remove debugger statements before committing.",
    ),
    (
        "no-unused-vars",
        "Remove the unused variable or prefix it with an underscore.",
    ),
    (
        "eqeqeq",
        "Use strict equality (===) to avoid implicit type coercion.",
    ),
    (
        "G101",
        "Potential hardcoded credential. Use environment variables.",
    ),
    (
        "G104",
        "Unchecked error. Handle or explicitly discard the returned error.",
    ),
];

/// Looks up the hint for a rule id.
pub fn hint_for(rule_id: &str) -> Option<&'static str> {
    RULE_HINTS
        .iter()
        .find(|(id, _)| *id == rule_id)
        .map(|(_, hint)| *hint)
}

/// Attaches a hint to `entry` if its rule id is known. Unknown or missing rule
/// ids leave the entry untouched.
pub fn enrich(entry: &mut LogEntry) {
    if let Some(hint) = entry.rule_id.as_deref().and_then(hint_for) {
        entry.hint = Some(hint.to_string());
    }
}

/// Enriches every entry in place.
pub fn enrich_all(entries: &mut [LogEntry]) {
    entries.iter_mut().for_each(enrich);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Severity;

    fn entry_with_rule(rule: Option<&str>) -> LogEntry {
        let entry = LogEntry::new(Severity::Warning, "app.ts", 1, "msg", "eslint");
        match rule {
            Some(r) => entry.with_rule_id(r),
            None => entry,
        }
    }

    #[test]
    fn test_enrich_known_rule() {
        let mut entry = entry_with_rule(Some("no-console"));
        enrich(&mut entry);

        let hint = entry.hint.expect("hint should be attached");
        assert!(!hint.is_empty());
        assert!(hint.to_lowercase().contains("console"));
    }

    #[test]
    fn test_enrich_unknown_rule_leaves_hint_empty() {
        let mut entry = entry_with_rule(Some("some-custom-rule"));
        enrich(&mut entry);
        assert!(entry.hint.is_none());

        let mut bare = entry_with_rule(None);
        enrich(&mut bare);
        assert!(bare.hint.is_none());
    }

    #[test]
    fn test_hint_table_has_no_duplicate_ids() {
        let mut ids: Vec<_> = RULE_HINTS.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), RULE_HINTS.len());
    }
}
