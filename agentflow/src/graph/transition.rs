//! Transition guard construction and event descriptor matching

/// Guard for a transition from its `event` and `cond` attributes
///
/// Both present gives `event=='E' && (cond)`, only an event gives `event=='E'`,
/// only a condition gives `(cond)` and neither gives no guard.
pub fn merge_guard(event: Option<&str>, cond: Option<&str>) -> Option<String> {
    let event = event.map(str::trim).filter(|e| !e.is_empty());
    let cond = cond.map(str::trim).filter(|c| !c.is_empty());
    match (event.and_then(event_guard), cond) {
        (Some(event), Some(cond)) => Some(format!("{event} && ({cond})")),
        (Some(event), None) => Some(event),
        (None, Some(cond)) => Some(format!("({cond})")),
        (None, None) => None,
    }
}

/// Expression matching an event descriptor list
///
/// `E` matches exactly `E`, `E.*` matches `E` and anything below it, `*`
/// matches every event. Space-separated descriptors are alternatives.
pub fn event_guard(descriptor: &str) -> Option<String> {
    let tokens: Vec<&str> = descriptor.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }
    if tokens.contains(&"*") {
        return Some("event!=''".to_string());
    }

    let parts: Vec<String> = tokens.iter().map(|token| token_guard(token)).collect();
    if parts.len() == 1 {
        parts.into_iter().next()
    } else {
        Some(format!("({})", parts.join(" || ")))
    }
}

fn token_guard(token: &str) -> String {
    match token.strip_suffix(".*") {
        Some(prefix) => {
            let prefix = quote(prefix);
            format!("(event=='{prefix}' || event.startsWith('{prefix}.'))")
        }
        None => format!("event=='{}'", quote(token)),
    }
}

fn quote(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// True when `event` matches any descriptor in the space-separated list
pub fn event_matches(descriptor: &str, event: &str) -> bool {
    descriptor.split_whitespace().any(|token| {
        if token == "*" {
            return true;
        }
        match token.strip_suffix(".*") {
            Some(prefix) => {
                event == prefix
                    || event
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('.'))
            }
            None => event == token,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_guard_forms() {
        assert_eq!(
            merge_guard(Some("go"), Some("x > 1")).as_deref(),
            Some("event=='go' && (x > 1)")
        );
        assert_eq!(merge_guard(Some("go"), None).as_deref(), Some("event=='go'"));
        assert_eq!(merge_guard(None, Some("x > 1")).as_deref(), Some("(x > 1)"));
        assert_eq!(merge_guard(None, None), None);
        assert_eq!(merge_guard(Some("  "), Some("")), None);
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(event_guard("*").as_deref(), Some("event!=''"));
        assert_eq!(
            event_guard("error.*").as_deref(),
            Some("(event=='error' || event.startsWith('error.'))")
        );
        assert_eq!(
            event_guard("a b").as_deref(),
            Some("(event=='a' || event=='b')")
        );
    }

    #[test]
    fn test_event_matches() {
        assert!(event_matches("done", "done"));
        assert!(!event_matches("done", "done.state.s1"));
        assert!(event_matches("done.*", "done.state.s1"));
        assert!(!event_matches("done.*", "doneness"));
        assert!(event_matches("a b", "b"));
        assert!(event_matches("*", "anything"));
    }

    #[test]
    fn test_quotes_are_escaped() {
        assert_eq!(event_guard("it's").as_deref(), Some("event=='it\\'s'"));
    }
}
