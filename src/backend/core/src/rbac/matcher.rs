//! Compiled path matching over a policy rule set.
//!
//! A request `(subject, path, action)` is allowed iff some rule has the same
//! subject, the same action, and a path pattern that matches `path`.
//!
//! Pattern syntax, segment by segment on `/` boundaries:
//!
//! | Pattern segment   | Matches                                                 |
//! |-------------------|---------------------------------------------------------|
//! | `users`           | exactly `users`                                         |
//! | `:id`             | one non-empty segment                                   |
//! | `*` (not last)    | one non-empty segment                                   |
//! | `*` (last)        | the parent path itself, or anything below it            |
//!
//! So `/api/users/*` matches `/api/users`, `/api/users/42` and
//! `/api/users/42/roles`, but never `/api/userset/1`.

use std::collections::HashMap;

use super::models::PolicyRule;

// ═══════════════════════════════════════════════════════════════════════════════
// Path Pattern
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `:name` or a non-trailing `*`.
    Single,
}

impl Segment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == segment,
            Self::Single => !segment.is_empty(),
        }
    }
}

/// A path pattern compiled into segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    trailing_wildcard: bool,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Self {
        let mut parts: Vec<&str> = pattern.split('/').collect();
        let trailing_wildcard = parts.last() == Some(&"*");
        if trailing_wildcard {
            parts.pop();
        }

        let segments = parts
            .into_iter()
            .map(|part| {
                if part == "*" || (part.len() > 1 && part.starts_with(':')) {
                    Segment::Single
                } else {
                    Segment::Literal(part.to_string())
                }
            })
            .collect();

        Self {
            raw: pattern.to_string(),
            segments,
            trailing_wildcard,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `path` falls under this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let mut request = path.split('/');

        for expected in &self.segments {
            match request.next() {
                Some(actual) if expected.matches(actual) => {}
                _ => return false,
            }
        }

        // Any remainder sits after a segment boundary, which only a trailing
        // wildcard accepts.
        self.trailing_wildcard || request.next().is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Matcher
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable, compiled form of a rule set.
///
/// Indexed by subject then action so a check only walks the patterns that
/// could possibly apply.
#[derive(Debug, Clone, Default)]
pub struct PolicyMatcher {
    index: HashMap<String, HashMap<String, Vec<PathPattern>>>,
    rule_count: usize,
}

impl PolicyMatcher {
    pub fn compile(rules: &[PolicyRule]) -> Self {
        let mut index: HashMap<String, HashMap<String, Vec<PathPattern>>> = HashMap::new();

        for rule in rules {
            index
                .entry(rule.subject.clone())
                .or_default()
                .entry(rule.action.clone())
                .or_default()
                .push(PathPattern::compile(&rule.object));
        }

        Self {
            index,
            rule_count: rules.len(),
        }
    }

    /// At least one matching allow rule means allow; everything else is deny.
    pub fn allows(&self, subject: &str, action: &str, path: &str) -> bool {
        self.index
            .get(subject)
            .and_then(|by_action| by_action.get(action))
            .map(|patterns| patterns.iter().any(|pattern| pattern.matches(path)))
            .unwrap_or(false)
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    pub fn subject_count(&self) -> usize {
        self.index.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
