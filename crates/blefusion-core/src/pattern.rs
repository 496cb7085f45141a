//! Memoized shell-glob matching for device local names.
//!
//! Discovery rules and runtime callbacks filter on local names with shell
//! globs (`*`, `?`, `[seq]`). The same handful of patterns is evaluated
//! against a churning but often-repeating set of device names at high
//! frequency, so both the compiled patterns and the individual
//! `(name, pattern)` outcomes are memoized in bounded LRU caches; without
//! this the glob matching dominates per-advertisement cost under load.

use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::lru::LruCache;

/// Bound on distinct compiled patterns kept alive.
const COMPILED_CACHE_SIZE: usize = 4096;

/// Bound on memoized `(name, pattern)` outcomes.
const RESULT_CACHE_SIZE: usize = 1024;

/// Minimum fixed (non-wildcard) prefix for runtime-registered patterns.
///
/// Shorter prefixes match almost every device and defeat the purpose of
/// filtering, so registration rejects them. Static discovery rule sets are
/// exempt from this check.
pub const LOCAL_NAME_MIN_MATCH_LENGTH: usize = 3;

/// Translate a shell glob into an anchored regular expression.
///
/// Supports `*`, `?`, `[seq]`, and `[!seq]` negation. An unterminated `[` is
/// treated as a literal bracket. All other characters are escaped, so the
/// result is always a syntactically valid regex.
fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                // Find the closing bracket; the set may not be empty, so a
                // ']' directly after '[' (or after '[!') is a member.
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '!' || chars[j] == '^') {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    regex.push_str(r"\[");
                } else {
                    let set: String = chars[i + 1..j].iter().collect();
                    regex.push('[');
                    if let Some(rest) = set.strip_prefix('!') {
                        regex.push('^');
                        regex.push_str(&escape_set(rest));
                    } else {
                        regex.push_str(&escape_set(&set));
                    }
                    regex.push(']');
                    i = j;
                }
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }
    regex.push('$');
    regex
}

/// Escape characters that are special inside a regex character class.
fn escape_set(set: &str) -> String {
    let mut escaped = String::with_capacity(set.len());
    for ch in set.chars() {
        if matches!(ch, '\\' | ']' | '^') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Validate a runtime-registered local-name pattern.
///
/// The fixed prefix before the first wildcard character must be at least
/// [`LOCAL_NAME_MIN_MATCH_LENGTH`] characters, otherwise the pattern would
/// match nearly every device in range.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let fixed_prefix = pattern
        .chars()
        .take_while(|ch| !matches!(ch, '*' | '?' | '['))
        .count();
    if fixed_prefix < LOCAL_NAME_MIN_MATCH_LENGTH {
        return Err(Error::PatternTooBroad {
            pattern: pattern.to_string(),
            min_length: LOCAL_NAME_MIN_MATCH_LENGTH,
        });
    }
    Ok(())
}

/// Shared memoization cache for glob matching.
///
/// Owned by the manager and threaded into every matcher invocation so all
/// rule and callback evaluations share one cache.
#[derive(Debug)]
pub struct PatternCache {
    compiled: LruCache<String, Option<Regex>>,
    results: LruCache<(String, String), bool>,
}

impl PatternCache {
    /// Create an empty cache with the default bounds.
    pub fn new() -> Self {
        Self {
            compiled: LruCache::new(COMPILED_CACHE_SIZE),
            results: LruCache::new(RESULT_CACHE_SIZE),
        }
    }

    /// Match a device name against a shell glob.
    ///
    /// Never fails: a pattern that cannot be compiled simply never matches.
    pub fn matches(&mut self, name: &str, pattern: &str) -> bool {
        let key = (name.to_string(), pattern.to_string());
        if let Some(hit) = self.results.get_mut(&key) {
            return *hit;
        }
        let outcome = self.match_uncached(name, pattern);
        self.results.insert(key, outcome);
        outcome
    }

    fn match_uncached(&mut self, name: &str, pattern: &str) -> bool {
        if let Some(compiled) = self.compiled.get_mut(&pattern.to_string()) {
            return compiled.as_ref().is_some_and(|re| re.is_match(name));
        }
        let compiled = match Regex::new(&glob_to_regex(pattern)) {
            Ok(re) => Some(re),
            Err(err) => {
                debug!("Failed to compile local name pattern {:?}: {}", pattern, err);
                None
            }
        };
        let outcome = compiled.as_ref().is_some_and(|re| re.is_match(name));
        self.compiled.insert(pattern.to_string(), compiled);
        outcome
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let mut cache = PatternCache::new();
        assert!(cache.matches("Prodigio_1234", "Prodigio_1234"));
        assert!(!cache.matches("Prodigio_1234", "Prodigio_9999"));
    }

    #[test]
    fn test_star_and_question() {
        let mut cache = PatternCache::new();
        assert!(cache.matches("GVH5075_ABCD", "GVH5075*"));
        assert!(cache.matches("LYWSD03MMC", "LYWSD0?MMC"));
        assert!(!cache.matches("LYWSD003MMC", "LYWSD0?MMC"));
        // '*' must not spill across the anchored ends.
        assert!(!cache.matches("xGVH5075", "GVH5075*"));
    }

    #[test]
    fn test_character_sets() {
        let mut cache = PatternCache::new();
        assert!(cache.matches("sensor-a", "sensor-[abc]"));
        assert!(!cache.matches("sensor-d", "sensor-[abc]"));
        assert!(cache.matches("sensor-d", "sensor-[!abc]"));
        assert!(cache.matches("sensor-5", "sensor-[0-9]"));
    }

    #[test]
    fn test_unterminated_bracket_is_literal() {
        let mut cache = PatternCache::new();
        assert!(cache.matches("tag[1", "tag[1"));
        assert!(!cache.matches("tag1", "tag[1"));
    }

    #[test]
    fn test_regex_metachars_are_literal() {
        let mut cache = PatternCache::new();
        assert!(cache.matches("a.b+c", "a.b+c"));
        assert!(!cache.matches("aXb+c", "a.b+c"));
        assert!(cache.matches("(paren)", "(paren)"));
    }

    #[test]
    fn test_memoized_result_is_stable() {
        let mut cache = PatternCache::new();
        for _ in 0..3 {
            assert!(cache.matches("Beacon-7", "Beacon-*"));
            assert!(!cache.matches("Other", "Beacon-*"));
        }
    }

    #[test]
    fn test_validate_pattern_prefix_length() {
        assert!(validate_pattern("a").is_err());
        assert!(validate_pattern("ab*").is_err());
        assert!(validate_pattern("abc*").is_ok());
        assert!(validate_pattern("abcdef").is_ok());
        assert!(validate_pattern("ab[cd]*").is_err());
    }

    #[test]
    fn test_validate_error_message_names_pattern() {
        let err = validate_pattern("x*").unwrap_err();
        assert!(err.to_string().contains("x*"));
    }
}
