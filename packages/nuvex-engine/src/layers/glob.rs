//! Shared glob matching (`*`/`?`) used by L1's in-memory pattern scan and by
//! L3's `LIKE`-based key enumeration.

use regex::Regex;

/// Translates a `*`/`?` glob into an anchored regex. Every other regex
/// metacharacter in `pattern` is escaped, so only the two glob wildcards
/// carry special meaning.
#[must_use]
pub fn glob_to_regex(pattern: &str) -> Regex {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).expect("glob-derived pattern is always valid regex")
}

/// Translates a `*`/`?` glob into a SQL `LIKE` pattern (`%`/`_`), escaping
/// any literal `%`, `_`, or `\` in the source pattern with a backslash.
#[must_use]
pub fn glob_to_sql_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}
