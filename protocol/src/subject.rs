//! Subject construction and wildcard matching.

/// Builds the canonical subjects used by the core.
pub mod subjects {
    /// Subject an agent's `Registration` is published on.
    #[must_use]
    pub fn registry() -> String {
        "sekia.registry".to_owned()
    }

    /// Subject a named agent's `Heartbeat` is published on.
    #[must_use]
    pub fn heartbeat(name: &str) -> String {
        format!("sekia.heartbeat.{name}")
    }

    /// Pattern matching every agent's heartbeat subject, what the registry
    /// subscribes to.
    #[must_use]
    pub fn heartbeat_wildcard() -> &'static str {
        "sekia.heartbeat.*"
    }

    /// Subject an event from the given source is published on.
    #[must_use]
    pub fn event(source: &str) -> String {
        format!("sekia.events.{source}")
    }

    /// Pattern matching every event subject, what the workflow engine
    /// subscribes to.
    #[must_use]
    pub fn events_wildcard() -> &'static str {
        "sekia.events.>"
    }

    /// Subject a command targeted at the given agent is published on.
    #[must_use]
    pub fn command(agent: &str) -> String {
        format!("sekia.commands.{agent}")
    }

    /// Broadcast config-reload subject, delivered to every agent.
    #[must_use]
    pub fn config_reload() -> &'static str {
        "sekia.config.reload"
    }

    /// Config-reload subject targeted at a single agent.
    #[must_use]
    pub fn config_reload_for(name: &str) -> String {
        format!("sekia.config.reload.{name}")
    }
}

/// Splits a subject or pattern into its dotted tokens.
fn tokens(s: &str) -> Vec<&str> {
    s.split('.').collect()
}

/// Returns true iff `pattern` validly uses wildcards: `>` may appear only as
/// the final token.
#[must_use]
pub fn is_valid_pattern(pattern: &str) -> bool {
    let toks = tokens(pattern);
    match toks.iter().position(|t| *t == ">") {
        Some(idx) => idx == toks.len() - 1,
        None => true,
    }
}

/// Matches `subject` against `pattern` token-wise.
///
/// - `>` in the final position matches any remainder, including zero tokens.
/// - `*` matches exactly one token.
/// - Literal tokens must match verbatim.
/// - Lengths must match unless `>` was consumed.
#[must_use]
pub fn matches(pattern: &str, subject: &str) -> bool {
    let pattern_toks = tokens(pattern);
    let subject_toks = tokens(subject);

    for (i, p) in pattern_toks.iter().enumerate() {
        if *p == ">" {
            // `>` must be the final pattern token; anything beyond it is invalid
            // and treated as non-matching rather than panicking.
            return i == pattern_toks.len() - 1;
        }
        let Some(s) = subject_toks.get(i) else {
            return false;
        };
        if *p != "*" && p != s {
            return false;
        }
    }

    pattern_toks.len() == subject_toks.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_wildcard_matches_any_remainder() {
        assert!(matches(">", "sekia.events.github"));
        assert!(matches(">", "a"));
        assert!(matches("sekia.events.>", "sekia.events.github"));
        assert!(matches("sekia.events.>", "sekia.events.github.issue.opened"));
        assert!(!matches("sekia.events.>", "sekia.commands.github"));
    }

    #[test]
    fn single_wildcard_matches_exactly_one_token() {
        assert!(matches("*.*.*", "a.b.c"));
        assert!(!matches("*.*.*", "a.b"));
        assert!(!matches("*.*.*", "a.b.c.d"));
    }

    #[test]
    fn literal_tokens_must_match_verbatim() {
        assert!(matches("sekia.registry", "sekia.registry"));
        assert!(!matches("sekia.registry", "sekia.heartbeat"));
    }

    #[test]
    fn wildcard_mid_pattern_is_invalid_and_never_matches() {
        assert!(!is_valid_pattern("a.>.b"));
        assert!(!matches("a.>.b", "a.x.b"));
    }

    #[test]
    fn valid_patterns_accept_tail_or_no_wildcard() {
        assert!(is_valid_pattern("sekia.events.>"));
        assert!(is_valid_pattern("*.*.*"));
        assert!(is_valid_pattern(">"));
    }
}
