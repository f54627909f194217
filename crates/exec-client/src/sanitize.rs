//! Cleans remote error text before it reaches callers or logs.

use regex::Regex;
use std::sync::OnceLock;

const REDACTED: &str = "[REDACTED]";
const FALLBACK_MESSAGE: &str = "remote command failed";

const BANNER_PREFIXES: &[&str] = &[
    "keeper commander",
    "commander version",
    "version:",
    "logging in",
    "login successful",
    "successfully authenticated",
    "syncing",
    "decrypted [",
    "type \"help\"",
];

const ERROR_LABELS: &[&str] = &["error:", "exception:", "commanderror:"];

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

static RULES: OnceLock<Vec<Rule>> = OnceLock::new();

fn rules() -> &'static [Rule] {
    RULES.get_or_init(|| {
        [
            // "password": "..." and friends inside JSON fragments.
            (
                r#"(?i)("[^"]*(?:password|passwd|secret|token|credential|api[_-]?key|private[_-]?key)[^"]*"\s*:\s*)"(?:[^"\\]|\\.)*""#,
                r#"${1}"[REDACTED]""#,
            ),
            (
                r#"(?i)\b(authorization|x-api-key|api-key)(\s*[:=]\s*)(?:(?:bearer|basic)\s+)?[^\s"',;]+"#,
                "${1}${2}[REDACTED]",
            ),
            (r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]+", "Bearer [REDACTED]"),
            (
                r#"(?i)\b(password|passwd|secret|token)(\s*[=:]\s*)[^\s"',;\[]+"#,
                "${1}${2}[REDACTED]",
            ),
            (r"\b[A-Za-z0-9][A-Za-z0-9_+=-]{31,}", REDACTED),
        ]
        .into_iter()
        .map(|(pattern, replacement)| Rule {
            pattern: Regex::new(pattern).expect("static redaction pattern"),
            replacement,
        })
        .collect()
    })
}

/// Masks credentials, auth headers and long opaque tokens.
pub fn redact(text: &str) -> String {
    rules().iter().fold(text.to_string(), |acc, rule| {
        rule.pattern.replace_all(&acc, rule.replacement).into_owned()
    })
}

/// Reduces raw CLI error output to its last meaningful line, redacted.
pub fn clean_error(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .filter(|line| !is_banner_line(line))
        .map(strip_error_label)
        .filter(|line| !line.is_empty())
        .last();
    match line {
        Some(line) => redact(line),
        None if raw.trim().is_empty() => FALLBACK_MESSAGE.to_string(),
        None => redact(raw.trim()),
    }
}

fn is_banner_line(line: &str) -> bool {
    if line.is_empty() || is_decorative(line) {
        return true;
    }
    let lower = line.to_ascii_lowercase();
    BANNER_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}

/// ASCII art and separators: mostly punctuation with few letters or digits.
fn is_decorative(line: &str) -> bool {
    let visible = line.chars().filter(|ch| !ch.is_whitespace()).count();
    let alnum = line.chars().filter(|ch| ch.is_alphanumeric()).count();
    alnum * 3 < visible
}

fn strip_error_label(line: &str) -> &str {
    let mut current = line;
    loop {
        let lower = current.to_ascii_lowercase();
        let Some(label) = ERROR_LABELS.iter().find(|label| lower.starts_with(*label)) else {
            return current;
        };
        current = current[label.len()..].trim_start();
    }
}
