//! Injection pattern tables.
//!
//! Detection is a coarse blocklist and accepts false positives: a query
//! containing `;` or the word `update` is flagged. Patterns are
//! compiled once on first use and never change afterwards.

use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

/// What a pattern is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    SqlInjection,
    Xss,
    PathTraversal,
    CrlfInjection,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::SqlInjection => "sql_injection",
            Category::Xss => "xss",
            Category::PathTraversal => "path_traversal",
            Category::CrlfInjection => "crlf_injection",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled pattern with its category.
#[derive(Debug)]
pub struct ValidationPattern {
    pub regex: Regex,
    pub category: Category,
}

const SQL_INJECTION: &[&str] = &[
    r"\b(SELECT|INSERT|UPDATE|DELETE|DROP|UNION|ALTER|CREATE|EXEC|EXECUTE)\b",
    r"(--|#|/\*|\*/)",
    r"\bOR\b\s+\d+\s*=\s*\d+",
    r"\bAND\b\s+\d+\s*=\s*\d+",
    // The escapes match text such as a literal `\x00`, not the control byte
    r#"('|"|;|\\x00|\\n|\\r|\\x1a)"#,
    r"\b(SLEEP|BENCHMARK|WAITFOR)\b",
];

const XSS: &[&str] = &[
    r"<script[^>]*>.*?</script>",
    r"javascript:",
    r"on\w+\s*=",
    r"<iframe[^>]*>",
    r"<embed[^>]*>",
    r"<object[^>]*>",
];

/// Substrings that make a header value unsafe, checked on the lowercased value.
const HEADER_THREATS: &[(&str, Category)] = &[
    ("\r", Category::CrlfInjection),
    ("\n", Category::CrlfInjection),
    ("<script", Category::Xss),
    ("javascript:", Category::Xss),
    ("../", Category::PathTraversal),
    ("..\\", Category::PathTraversal),
];

fn compile(sources: &[&str], category: Category) -> impl Iterator<Item = ValidationPattern> {
    sources.iter().filter_map(move |source| {
        RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .ok()
            .map(|regex| ValidationPattern { regex, category })
    })
}

static PATTERNS: LazyLock<Vec<ValidationPattern>> = LazyLock::new(|| {
    compile(SQL_INJECTION, Category::SqlInjection)
        .chain(compile(XSS, Category::Xss))
        .collect()
});

/// Every compiled injection pattern, SQL first.
pub fn all() -> &'static [ValidationPattern] {
    &PATTERNS
}

/// First SQL injection or XSS pattern matching `value`.
pub fn find_injection(value: &str) -> Option<&'static ValidationPattern> {
    if value.is_empty() {
        return None;
    }
    all().iter().find(|p| p.regex.is_match(value))
}

/// First unsafe substring category in a header value.
pub fn header_threat(value: &str) -> Option<Category> {
    let lower = value.to_lowercase();
    HEADER_THREATS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, category)| *category)
}

/// Canonical hyphenated UUID text (any letter case).
pub fn is_uuid(value: &str) -> bool {
    value.len() == 36 && uuid::Uuid::try_parse(value).is_ok()
}

/// Lowercase alphanumeric words joined by single hyphens, checked after
/// lowercasing.
pub fn is_slug(value: &str) -> bool {
    let lower = value.to_lowercase();
    !lower.is_empty()
        && lower.split('-').all(|word| {
            !word.is_empty()
                && word
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_of(value: &str) -> Option<Category> {
        find_injection(value).map(|p| p.category)
    }

    #[test]
    fn test_every_pattern_compiles() {
        assert_eq!(all().len(), SQL_INJECTION.len() + XSS.len());
    }

    #[test]
    fn test_sql_patterns() {
        assert_eq!(category_of("' OR 1=1"), Some(Category::SqlInjection));
        assert_eq!(category_of("x or 1 = 1"), Some(Category::SqlInjection));
        assert_eq!(category_of("union select"), Some(Category::SqlInjection));
        assert_eq!(category_of("1; drop table"), Some(Category::SqlInjection));
        assert_eq!(category_of("admin--"), Some(Category::SqlInjection));
        assert_eq!(category_of("pg_sleep SLEEP(5)"), Some(Category::SqlInjection));
        assert_eq!(category_of(r"abc\x00"), Some(Category::SqlInjection));
    }

    #[test]
    fn test_xss_patterns() {
        assert_eq!(category_of("<SCRIPT>alert(1)</script>"), Some(Category::Xss));
        assert_eq!(category_of("JavaScript:void(0)"), Some(Category::Xss));
        assert_eq!(category_of("<img src=x onerror =1>"), Some(Category::Xss));
        assert_eq!(category_of("<iframe src=evil>"), Some(Category::Xss));
    }

    #[test]
    fn test_benign_values() {
        for value in ["", "page", "2", "machine-learning", "Rust async runtimes", "10.5"] {
            assert_eq!(category_of(value), None, "flagged {value:?}");
        }
    }

    #[test]
    fn test_header_threats() {
        assert_eq!(header_threat("Mozilla/5.0"), None);
        assert_eq!(header_threat("../../etc/passwd"), Some(Category::PathTraversal));
        assert_eq!(header_threat(r"..\windows"), Some(Category::PathTraversal));
        assert_eq!(header_threat("<ScRiPt>"), Some(Category::Xss));
        assert_eq!(header_threat("a\r\nSet-Cookie: x"), Some(Category::CrlfInjection));
    }

    #[test]
    fn test_uuid() {
        assert!(is_uuid("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_uuid("550E8400-E29B-41D4-A716-446655440000"));
        assert!(!is_uuid("550e8400e29b41d4a716446655440000"));
        assert!(!is_uuid("550e8400-e29b-41d4-a716-44665544000g"));
        assert!(!is_uuid("550e8400-e29b-41d4-a716_446655440000"));
    }

    #[test]
    fn test_slug() {
        assert!(is_slug("machine-learning"));
        assert!(is_slug("Rust-2024"));
        assert!(is_slug("a"));
        assert!(!is_slug(""));
        assert!(!is_slug("-leading"));
        assert!(!is_slug("trailing-"));
        assert!(!is_slug("double--hyphen"));
        assert!(!is_slug("under_score"));
    }
}
