//! Hostname access control with wildcard patterns.
//!
//! A policy is either `*` on its own, which admits every connection and
//! switches target selection into multiplex mode, or an ordered list of glob
//! patterns. In a pattern, `*` matches any run of characters (dots included)
//! and everything else matches literally.

use std::fmt;

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Pattern list that disables hostname filtering.
pub const ALLOW_ANY: &str = "*";

/// Errors raised while building a domain policy.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Empty entry in the pattern list.
    #[error("empty entry in domain list: {0:?}")]
    EmptyPattern(String),

    /// Pattern could not be compiled.
    #[error("invalid domain pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// How a connection's backend is chosen, as implied by the domain policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Hostname filtering off: spread connections across all backends.
    Multiplex,
    /// Hostname filtering on: plaintext to backend 0, TLS to backend 1.
    ByProtocol,
}

/// A single compiled wildcard pattern.
#[derive(Debug, Clone)]
pub struct DomainPattern {
    source: String,
    regex: Regex,
}

impl DomainPattern {
    /// Compile a glob pattern into an anchored, case-insensitive matcher.
    pub fn new(pattern: &str) -> Result<Self, DomainError> {
        if pattern.is_empty() {
            return Err(DomainError::EmptyPattern(pattern.to_string()));
        }

        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = RegexBuilder::new(&format!("^{}$", body))
            .case_insensitive(true)
            .build()
            .map_err(|source| DomainError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Check a hostname against this pattern.
    pub fn matches(&self, hostname: &str) -> bool {
        self.regex.is_match(hostname)
    }

    /// The pattern as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Hostname allow-list.
#[derive(Debug, Clone)]
pub enum DomainPolicy {
    /// Every hostname allowed, including none at all.
    Any,
    /// Only hostnames matching at least one pattern.
    Patterns(Vec<DomainPattern>),
}

impl DomainPolicy {
    /// Parse a comma-separated pattern list.
    ///
    /// Exactly `*` yields [`DomainPolicy::Any`].
    pub fn parse(list: &str) -> Result<Self, DomainError> {
        if list.trim() == ALLOW_ANY {
            return Ok(Self::Any);
        }

        let patterns = list
            .split(',')
            .map(|entry| {
                let entry = entry.trim();
                if entry.is_empty() {
                    return Err(DomainError::EmptyPattern(list.to_string()));
                }
                DomainPattern::new(entry)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::Patterns(patterns))
    }

    /// Decide whether a connection with this routing key may proceed.
    ///
    /// A missing hostname is matched as the empty string, so only a pattern
    /// that matches the empty string (such as `*`) admits it.
    pub fn allows(&self, hostname: Option<&str>) -> bool {
        match self {
            DomainPolicy::Any => true,
            DomainPolicy::Patterns(patterns) => {
                let host = normalize_hostname(hostname.unwrap_or(""));
                patterns.iter().any(|p| p.matches(host))
            }
        }
    }

    /// Target selection mode implied by this policy.
    pub fn routing_mode(&self) -> RoutingMode {
        match self {
            DomainPolicy::Any => RoutingMode::Multiplex,
            DomainPolicy::Patterns(_) => RoutingMode::ByProtocol,
        }
    }
}

impl fmt::Display for DomainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainPolicy::Any => f.write_str(ALLOW_ANY),
            DomainPolicy::Patterns(patterns) => {
                for (i, pattern) in patterns.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    f.write_str(pattern.as_str())?;
                }
                Ok(())
            }
        }
    }
}

/// Trim a single trailing dot (fully qualified form).
fn normalize_hostname(hostname: &str) -> &str {
    hostname.strip_suffix('.').unwrap_or(hostname)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("*.example.org", "sub.example.org", true)]
    #[case("*.example.org", "a.b.example.org", true)]
    #[case("*.example.org", "example.org", false)]
    #[case("*.example.org", "sub.example.org.evil.test", false)]
    #[case("*.example.org", "subXexample.org", false)]
    #[case("example.com", "example.com", true)]
    #[case("example.com", "EXAMPLE.com", true)]
    #[case("example.com", "example.com.", true)]
    #[case("example.com", "www.example.com", false)]
    #[case("api-*.example.com", "api-eu.example.com", true)]
    #[case("api-*.example.com", "web.example.com", false)]
    #[case("a+b.test", "a+b.test", true)]
    #[case("a+b.test", "aab.test", false)]
    fn test_pattern_matching(#[case] pattern: &str, #[case] host: &str, #[case] expected: bool) {
        let policy = DomainPolicy::parse(pattern).unwrap();
        assert_eq!(policy.allows(Some(host)), expected, "{} vs {}", pattern, host);
    }

    #[test]
    fn test_wildcard_only_allows_everything() {
        let policy = DomainPolicy::parse("*").unwrap();
        assert!(matches!(policy, DomainPolicy::Any));
        assert!(policy.allows(Some("anything.example")));
        assert!(policy.allows(Some("")));
        assert!(policy.allows(None));
        assert_eq!(policy.routing_mode(), RoutingMode::Multiplex);
    }

    #[test]
    fn test_patterns_deny_missing_routing_key() {
        let policy = DomainPolicy::parse("example.com,*.example.org").unwrap();
        assert!(!policy.allows(None));
        assert!(!policy.allows(Some("")));
        assert_eq!(policy.routing_mode(), RoutingMode::ByProtocol);
    }

    #[test]
    fn test_star_inside_a_list_is_a_pattern() {
        let policy = DomainPolicy::parse("example.com,*").unwrap();
        assert!(matches!(policy, DomainPolicy::Patterns(_)));
        assert!(policy.allows(Some("whatever.test")));
        // `*` matches the empty string, so a missing key gets through.
        assert!(policy.allows(None));
        assert!(policy.allows(Some("")));
        assert_eq!(policy.routing_mode(), RoutingMode::ByProtocol);
    }

    #[test]
    fn test_literal_pattern_denies_missing_key() {
        let policy = DomainPolicy::parse("example.com").unwrap();
        assert!(!policy.allows(None));
        assert!(!policy.allows(Some("")));
        assert!(!policy.allows(Some(".")));
    }

    #[test]
    fn test_any_of_several_patterns() {
        let policy = DomainPolicy::parse("a.test, b.test").unwrap();
        assert!(policy.allows(Some("a.test")));
        assert!(policy.allows(Some("b.test")));
        assert!(!policy.allows(Some("c.test")));
        assert_eq!(policy.to_string(), "a.test,b.test");
    }

    #[test]
    fn test_empty_entries_rejected() {
        assert!(matches!(
            DomainPolicy::parse(""),
            Err(DomainError::EmptyPattern(_))
        ));
        assert!(matches!(
            DomainPolicy::parse("a.test,,b.test"),
            Err(DomainError::EmptyPattern(_))
        ));
    }
}
