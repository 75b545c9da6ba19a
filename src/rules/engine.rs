//! Rule engine: first-match classification over (path, size, age, kind).
//!
//! Rules are grouped in priority classes evaluated lowest-first; within a
//! class the first matching rule decides the label. The engine is a pure
//! function: no I/O, no clock except the supplied `now`.

#![allow(missing_docs)]

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::core::errors::{CmError, Result};
use crate::core::types::{ItemKind, RiskLabel};

/// Declarative rule description, before compilation.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub name: String,
    pub description: String,
    /// Shell-style globs over the normalized path; any match satisfies the rule.
    pub patterns: Vec<String>,
    /// Inclusive size bounds in bytes.
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    /// Bounds on `now - last_access`. `min_age` means "at least this stale".
    pub min_age: Option<Duration>,
    pub max_age: Option<Duration>,
    /// Restrict to files or directories; `None` matches both.
    pub kind: Option<ItemKind>,
    pub label: RiskLabel,
    /// Lower classes are evaluated first.
    pub priority_class: u8,
    pub rationale: String,
}

/// A compiled, matchable rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub spec: RuleSpec,
    compiled: Vec<Regex>,
}

impl Rule {
    /// Compile a spec. Fails with `BadRule` when a glob cannot be compiled.
    pub fn compile(spec: RuleSpec) -> Result<Self> {
        let compiled = spec
            .patterns
            .iter()
            .map(|pat| {
                glob_to_regex(pat).map_err(|err| CmError::BadRule {
                    name: spec.name.clone(),
                    details: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { spec, compiled })
    }

    /// Whether the rule's full predicate holds for the given facts.
    #[must_use]
    pub fn matches(
        &self,
        normalized_path: &str,
        size: u64,
        age: Option<Duration>,
        kind: ItemKind,
    ) -> bool {
        if let Some(required) = self.spec.kind
            && required != kind
        {
            return false;
        }
        if let Some(min) = self.spec.min_size
            && size < min
        {
            return false;
        }
        if let Some(max) = self.spec.max_size
            && size > max
        {
            return false;
        }
        if self.spec.min_age.is_some() || self.spec.max_age.is_some() {
            // Age-gated rules need a known access time.
            let Some(age) = age else { return false };
            if let Some(min) = self.spec.min_age
                && age < min
            {
                return false;
            }
            if let Some(max) = self.spec.max_age
                && age > max
            {
                return false;
            }
        }
        self.compiled.iter().any(|re| re.is_match(normalized_path))
    }
}

/// Result of classifying one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleVerdict {
    pub label: RiskLabel,
    pub rationale: String,
    pub matched_rules: Vec<String>,
    /// 0.9 for a single match, 0.7 for several, 0.3 for the fallback.
    pub confidence: f64,
}

/// Ordered rule set with skip-on-bad-rule behavior.
#[derive(Debug)]
pub struct RuleEngine {
    rules: Vec<Rule>,
    /// Names of rules that failed to compile and were skipped.
    skipped: Vec<String>,
}

impl RuleEngine {
    /// Compile specs in order. Bad rules are skipped, recorded, and never
    /// consulted; the remaining rules keep their relative order.
    #[must_use]
    pub fn new(specs: Vec<RuleSpec>) -> Self {
        let mut rules = Vec::with_capacity(specs.len());
        let mut skipped = Vec::new();
        for spec in specs {
            let name = spec.name.clone();
            match Rule::compile(spec) {
                Ok(rule) => rules.push(rule),
                Err(_) => skipped.push(name),
            }
        }
        rules.sort_by_key(|r| r.spec.priority_class);
        Self { rules, skipped }
    }

    /// Engine over the built-in rule classes.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new(crate::rules::builtin::builtin_rules())
    }

    /// Rules that failed to compile.
    #[must_use]
    pub fn skipped_rules(&self) -> &[String] {
        &self.skipped
    }

    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify one candidate. Pure: the only clock is the supplied `now`.
    #[must_use]
    pub fn classify(
        &self,
        path: &Path,
        size: u64,
        last_access: Option<DateTime<Utc>>,
        kind: ItemKind,
        now: DateTime<Utc>,
    ) -> RuleVerdict {
        let normalized = normalize_for_match(path);
        let age = last_access
            .and_then(|at| (now - at).to_std().ok());

        let mut first_match: Option<&Rule> = None;
        let mut matched_names = Vec::new();
        for rule in &self.rules {
            if rule.matches(&normalized, size, age, kind) {
                if first_match.is_none() {
                    first_match = Some(rule);
                }
                matched_names.push(rule.spec.name.clone());
            }
        }

        first_match.map_or_else(
            || RuleVerdict {
                label: RiskLabel::Suspicious,
                rationale: "no rule matched; treated as suspicious".to_string(),
                matched_rules: Vec::new(),
                confidence: 0.3,
            },
            |winner| {
                let confidence = if matched_names.len() == 1 { 0.9 } else { 0.7 };
                RuleVerdict {
                    label: winner.spec.label,
                    rationale: winner.spec.rationale.clone(),
                    matched_rules: matched_names,
                    confidence,
                }
            },
        )
    }
}

/// Normalize a path for glob matching: forward slashes, lowercase.
///
/// Rule patterns describe well-known junk names; matching them
/// case-insensitively keeps one pattern set working across filesystems.
#[must_use]
pub fn normalize_for_match(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

/// Compile a shell-style glob into an anchored regex.
///
/// Patterns are split on `/` and translated segment by segment, the same way
/// [`normalize_for_match`] presents candidate paths:
/// - a whole segment of `**` spans any number of path segments (or, in last
///   position, the remainder of the path),
/// - `*` and `?` inside a segment never cross a separator,
/// - everything else is literal text.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let normalized = pattern.replace('\\', "/").to_lowercase();
    let segments: Vec<&str> = normalized.split('/').collect();
    let last = segments.len() - 1;

    let mut regex_str = String::with_capacity(normalized.len() + 16);
    regex_str.push('^');
    for (index, segment) in segments.iter().enumerate() {
        if *segment == "**" {
            // The segment quantifier carries its own separator.
            regex_str.push_str(if index == last { ".*" } else { "(?:[^/]*/)*" });
            continue;
        }
        regex_str.push_str(&segment_to_regex(segment));
        if index != last {
            regex_str.push('/');
        }
    }
    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| CmError::InvalidConfig {
        details: format!("glob pattern {pattern:?} does not compile: {err}"),
    })
}

/// Translate one path segment, escaping literal runs wholesale.
fn segment_to_regex(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 8);
    let mut literal = String::new();
    for ch in segment.chars() {
        match ch {
            '*' | '?' => {
                if !literal.is_empty() {
                    out.push_str(&regex::escape(&literal));
                    literal.clear();
                }
                out.push_str(if ch == '*' { "[^/]*" } else { "[^/]" });
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        out.push_str(&regex::escape(&literal));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(name: &str, pattern: &str, label: RiskLabel, class: u8) -> RuleSpec {
        RuleSpec {
            name: name.to_string(),
            description: String::new(),
            patterns: vec![pattern.to_string()],
            min_size: None,
            max_size: None,
            min_age: None,
            max_age: None,
            kind: None,
            label,
            priority_class: class,
            rationale: format!("matched {name}"),
        }
    }

    #[test]
    fn first_match_in_lowest_class_wins() {
        let engine = RuleEngine::new(vec![
            spec("junk-tmp", "**/*.tmp", RiskLabel::Safe, 1),
            spec("sys", "/windows/**", RiskLabel::Dangerous, 0),
        ]);
        let verdict = engine.classify(
            Path::new("/Windows/Temp/a.tmp"),
            10,
            None,
            ItemKind::File,
            Utc::now(),
        );
        assert_eq!(verdict.label, RiskLabel::Dangerous);
        assert_eq!(verdict.matched_rules.len(), 2);
        assert!((verdict.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn single_match_has_high_confidence() {
        let engine = RuleEngine::new(vec![spec("tmp", "**/*.tmp", RiskLabel::Safe, 1)]);
        let verdict = engine.classify(
            Path::new("/tmp/x/a.tmp"),
            10,
            None,
            ItemKind::File,
            Utc::now(),
        );
        assert_eq!(verdict.label, RiskLabel::Safe);
        assert!((verdict.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn no_match_falls_back_to_suspicious() {
        let engine = RuleEngine::new(vec![spec("tmp", "**/*.tmp", RiskLabel::Safe, 1)]);
        let verdict = engine.classify(
            Path::new("/home/user/project/data.bin"),
            10,
            None,
            ItemKind::File,
            Utc::now(),
        );
        assert_eq!(verdict.label, RiskLabel::Suspicious);
        assert!(verdict.matched_rules.is_empty());
        assert!((verdict.confidence - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn size_bounds_are_inclusive_filters() {
        let mut wide = spec("big-cache", "**/cache/**", RiskLabel::Safe, 1);
        wide.min_size = Some(1024);
        let engine = RuleEngine::new(vec![wide]);

        let small = engine.classify(
            Path::new("/home/u/cache/tiny"),
            100,
            None,
            ItemKind::File,
            Utc::now(),
        );
        assert_eq!(small.label, RiskLabel::Suspicious);

        let big = engine.classify(
            Path::new("/home/u/cache/big"),
            4096,
            None,
            ItemKind::File,
            Utc::now(),
        );
        assert_eq!(big.label, RiskLabel::Safe);
    }

    #[test]
    fn age_gated_rule_requires_known_access_time() {
        let mut stale = spec("stale-log", "**/*.log", RiskLabel::Safe, 1);
        stale.min_age = Some(Duration::from_secs(7 * 24 * 3600));
        let engine = RuleEngine::new(vec![stale]);
        let now = Utc::now();

        // Unknown access time: the age-gated rule cannot match.
        let unknown = engine.classify(Path::new("/var/a.log"), 10, None, ItemKind::File, now);
        assert_eq!(unknown.label, RiskLabel::Suspicious);

        // Fresh file: not stale enough.
        let fresh = engine.classify(
            Path::new("/var/a.log"),
            10,
            Some(now - chrono::Duration::hours(1)),
            ItemKind::File,
            now,
        );
        assert_eq!(fresh.label, RiskLabel::Suspicious);

        // Stale file: matches.
        let old = engine.classify(
            Path::new("/var/a.log"),
            10,
            Some(now - chrono::Duration::days(30)),
            ItemKind::File,
            now,
        );
        assert_eq!(old.label, RiskLabel::Safe);
    }

    #[test]
    fn kind_filter_restricts_matches() {
        let mut dirs_only = spec("cache-dir", "**/cache", RiskLabel::Safe, 1);
        dirs_only.kind = Some(ItemKind::Dir);
        let engine = RuleEngine::new(vec![dirs_only]);

        let as_file = engine.classify(
            Path::new("/home/u/cache"),
            10,
            None,
            ItemKind::File,
            Utc::now(),
        );
        assert_eq!(as_file.label, RiskLabel::Suspicious);

        let as_dir = engine.classify(
            Path::new("/home/u/cache"),
            10,
            None,
            ItemKind::Dir,
            Utc::now(),
        );
        assert_eq!(as_dir.label, RiskLabel::Safe);
    }

    #[test]
    fn bad_rule_is_skipped_and_next_tried() {
        // A pattern long enough to blow the regex compiled-size limit fails
        // compilation; the engine must skip it and keep the rest working.
        let bad = RuleSpec {
            patterns: vec!["*".repeat(2_000_000)],
            ..spec("bad", "x", RiskLabel::Safe, 0)
        };
        let good = spec("tmp", "**/*.tmp", RiskLabel::Safe, 1);
        let engine = RuleEngine::new(vec![bad, good]);
        assert!(engine.rule_count() >= 1);
        let verdict = engine.classify(
            Path::new("/tmp/a.tmp"),
            1,
            None,
            ItemKind::File,
            Utc::now(),
        );
        assert_eq!(verdict.label, RiskLabel::Safe);
    }

    #[test]
    fn builtin_rules_all_compile() {
        let engine = RuleEngine::with_builtins();
        assert!(engine.skipped_rules().is_empty());
        assert!(engine.rule_count() > 10);
    }

    #[test]
    fn classification_is_deterministic() {
        let engine = RuleEngine::with_builtins();
        let now = Utc::now();
        let path = PathBuf::from("/tmp/session/cache.tmp");
        let a = engine.classify(&path, 123, None, ItemKind::File, now);
        let b = engine.classify(&path, 123, None, ItemKind::File, now);
        assert_eq!(a, b);
    }

    #[test]
    fn glob_star_stays_within_component() {
        let re = glob_to_regex("/tmp/build-*").unwrap();
        assert!(re.is_match("/tmp/build-abc"));
        assert!(!re.is_match("/tmp/build-abc/nested"));
    }

    #[test]
    fn glob_double_star_crosses_components() {
        let re = glob_to_regex("**/thumbs.db").unwrap();
        assert!(re.is_match("c:/users/x/pictures/thumbs.db"));
        assert!(re.is_match("thumbs.db"));
        assert!(!re.is_match("c:/users/x/thumbs.db.bak"));
    }

    #[test]
    fn glob_matching_is_case_insensitive_via_normalization() {
        let re = glob_to_regex("**/Thumbs.db").unwrap();
        let normalized = normalize_for_match(Path::new(r"C:\Users\X\THUMBS.DB"));
        assert!(re.is_match(&normalized));
    }
}
