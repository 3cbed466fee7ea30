//! OSC address pattern matching.
//!
//! Patterns follow OSC 1.0 address pattern syntax, per path segment:
//!
//! - `?` matches exactly one character
//! - `*` matches zero or more characters
//! - `[abc]`, `[a-z]`, `[!a-z]` / `[^a-z]` character classes
//! - `{foo,bar}` alternation
//!
//! plus the OSC 1.1 path-traversing wildcard `//`, which matches any number
//! of intermediate levels (including none). None of the wildcards crosses a
//! `/` on its own.
//!
//! Matching is total: a malformed construct (unclosed bracket, empty group,
//! reversed range, a class or group containing `/`) is treated as literal
//! characters.

use regex::Regex;

/// A compiled OSC address pattern.
#[derive(Clone, Debug)]
pub struct AddressPattern {
    source: String,
    compiled: Option<Regex>,
}

impl AddressPattern {
    /// Compile `pattern`.
    pub fn new(pattern: &str) -> Self {
        let compiled = if has_wildcards(pattern) {
            Regex::new(&translate(pattern)).ok()
        } else {
            None
        };
        if compiled.is_none() && has_wildcards(pattern) {
            log::debug!("[MATCH] Pattern '{}' matches literally", pattern);
        }
        Self {
            source: pattern.to_string(),
            compiled,
        }
    }

    /// The pattern text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether `address` is matched by this pattern.
    pub fn matches(&self, address: &str) -> bool {
        match &self.compiled {
            Some(regex) => regex.is_match(address),
            None => self.source == address,
        }
    }
}

/// Check whether `candidate` is matched by the OSC address `pattern`.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    AddressPattern::new(pattern).matches(candidate)
}

/// Check whether an address contains pattern characters.
pub fn has_wildcards(address: &str) -> bool {
    address.contains(['?', '*', '[', '{']) || address.contains("//")
}

/// Translate an OSC pattern into an anchored regular expression.
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '/' if chars.get(i + 1) == Some(&'/') => {
                while chars.get(i + 1) == Some(&'/') {
                    i += 1;
                }
                i += 1;
                if i == chars.len() {
                    // Trailing `//`: everything below this level.
                    out.push_str("(?:/.*)?");
                } else {
                    out.push_str("(?:/[^/]*)*/");
                }
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '[' => match translate_class(&chars, i) {
                Some((class, next)) => {
                    out.push_str(&class);
                    i = next;
                }
                None => {
                    out.push_str(r"\[");
                    i += 1;
                }
            },
            '{' => match translate_alternation(&chars, i) {
                Some((group, next)) => {
                    out.push_str(&group);
                    i = next;
                }
                None => {
                    out.push_str(r"\{");
                    i += 1;
                }
            },
            c => {
                out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
                i += 1;
            }
        }
    }

    out.push('$');
    out
}

fn push_class_char(out: &mut String, c: char) {
    if matches!(c, '\\' | ']' | '[' | '^' | '-' | '&' | '~') {
        out.push('\\');
    }
    out.push(c);
}

/// Translate `[...]` starting at `start`. Returns the regex class and the
/// index after the closing bracket, or `None` if it is not a valid class.
fn translate_class(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut j = start + 1;
    let negate = matches!(chars.get(j), Some('!') | Some('^'));
    if negate {
        j += 1;
    }

    let mut members = Vec::new();
    // A `]` right after the opening bracket is a member.
    if chars.get(j) == Some(&']') {
        members.push(']');
        j += 1;
    }
    while let Some(&c) = chars.get(j) {
        if c == ']' {
            break;
        }
        members.push(c);
        j += 1;
    }
    if j >= chars.len() || members.is_empty() || members.contains(&'/') {
        return None;
    }

    let mut class = String::from("[");
    if negate {
        class.push('^');
    }
    let mut k = 0;
    while k < members.len() {
        let c = members[k];
        if members.get(k + 1) == Some(&'-') && k + 2 < members.len() {
            let end = members[k + 2];
            if c > end {
                return None;
            }
            push_class_char(&mut class, c);
            class.push('-');
            push_class_char(&mut class, end);
            k += 3;
        } else {
            push_class_char(&mut class, c);
            k += 1;
        }
    }
    // Ranges such as `.-0` would otherwise span the separator.
    if negate {
        class.push('/');
    } else {
        class.push_str("&&[^/]");
    }
    class.push(']');
    Some((class, j + 1))
}

/// Translate `{a,b,...}` starting at `start`.
fn translate_alternation(chars: &[char], start: usize) -> Option<(String, usize)> {
    let close = chars[start + 1..].iter().position(|&c| c == '}')? + start + 1;
    let body: String = chars[start + 1..close].iter().collect();
    if body.is_empty() || body.contains('/') {
        return None;
    }
    let alternatives: Vec<String> = body.split(',').map(regex::escape).collect();
    Some((format!("(?:{})", alternatives.join("|")), close + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_addresses() {
        assert!(matches("/foo/bar", "/foo/bar"));
        assert!(!matches("/foo/bar", "/foo/baz"));
        assert!(!matches("/foo", "/foo/bar"));
        // Regex metacharacters stay literal.
        assert!(matches("/a.b+c", "/a.b+c"));
        assert!(!matches("/a.b*", "/axb"));
    }

    #[test]
    fn test_star_stays_in_segment() {
        assert!(matches("/foo/*/baz", "/foo/bar/baz"));
        assert!(matches("/foo/*", "/foo/"));
        assert!(matches("/foo/b*r", "/foo/bar"));
        assert!(!matches("/foo/*", "/foo/bar/baz"));
        assert!(!matches("/foo/*/baz", "/foo/a/b/baz"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("/n_?o", "/n_go"));
        assert!(!matches("/n_?o", "/n_o"));
        assert!(!matches("/a?b", "/a/b"));
    }

    #[test]
    fn test_character_classes() {
        assert!(matches("/foo/[0-9]", "/foo/5"));
        assert!(!matches("/foo/[0-9]", "/foo/x"));
        assert!(matches("/foo/[!0-9]", "/foo/x"));
        assert!(!matches("/foo/[!0-9]", "/foo/5"));
        assert!(matches("/foo/[^abc]", "/foo/d"));
        assert!(!matches("/foo/[^abc]", "/foo/a"));
        assert!(matches("/ch/[a-cx]", "/ch/x"));
        assert!(matches("/ch/[-a]", "/ch/-"));
        assert!(matches("/ch/[]a]", "/ch/]"));
    }

    #[test]
    fn test_alternation() {
        assert!(matches("/synth/{freq,amp}", "/synth/amp"));
        assert!(matches("/synth/{freq,amp}", "/synth/freq"));
        assert!(!matches("/synth/{freq,amp}", "/synth/pan"));
        assert!(matches("/{a,b}/{c,d}", "/b/c"));
    }

    #[test]
    fn test_recursive_wildcard_two_levels() {
        assert!(matches("/a//c", "/a/c"));
        assert!(matches("/a//c", "/a/b/c"));
        assert!(!matches("/a//c", "/a/b/c/d"));
        assert!(matches("/a//d", "/a/b/c/d"));
    }

    #[test]
    fn test_recursive_wildcard_three_levels() {
        assert!(matches("/a//c", "/a/x/y/c"));
        assert!(matches("/a//*/d", "/a/b/c/d"));
        assert!(matches("//d", "/a/b/c/d"));
        assert!(!matches("/a//c", "/b/x/y/c"));
    }

    #[test]
    fn test_trailing_recursive_wildcard() {
        assert!(matches("/a//", "/a"));
        assert!(matches("/a//", "/a/b"));
        assert!(matches("/a//", "/a/b/c/d"));
        assert!(!matches("/a//", "/b/c"));
    }

    #[test]
    fn test_malformed_patterns_are_literal() {
        assert!(matches("/foo/[", "/foo/["));
        assert!(!matches("/foo/[", "/foo/a"));
        assert!(matches("/foo/[]", "/foo/[]"));
        assert!(matches("/foo/{}", "/foo/{}"));
        assert!(matches("/foo/{a,b", "/foo/{a,b"));
        assert!(matches("/foo/[z-a]", "/foo/[z-a]"));
        assert!(!matches("/foo/[z-a]", "/foo/m"));
        // The valid part of a mixed pattern still applies.
        assert!(matches("/*/[", "/x/["));
    }

    #[test]
    fn test_classes_and_groups_never_cross_segments() {
        assert!(!matches("/a[/]b", "/a/b"));
        assert!(matches("/a[/]b", "/a[/]b"));
        assert!(!matches("/a[x/]b", "/a/b"));
        assert!(!matches("/{a/b,c}", "/a/b"));
        assert!(!matches("/{a/b,c}", "/c"));
        assert!(matches("/{a/b,c}", "/{a/b,c}"));
        // A range spanning the separator still stops at it.
        assert!(!matches("/a[.-0]b", "/a/b"));
        assert!(matches("/a[.-0]b", "/a.b"));
        assert!(matches("/a[.-0]b", "/a0b"));
    }

    #[test]
    fn test_compiled_pattern_reuse() {
        let pattern = AddressPattern::new("/tr/[0-9]*");
        assert_eq!(pattern.as_str(), "/tr/[0-9]*");
        assert!(pattern.matches("/tr/1"));
        assert!(pattern.matches("/tr/12x"));
        assert!(!pattern.matches("/tr/x"));
    }

    #[test]
    fn test_has_wildcards() {
        assert!(!has_wildcards("/n_end"));
        assert!(has_wildcards("/n_*"));
        assert!(has_wildcards("/a//b"));
        assert!(has_wildcards("/{a,b}"));
    }
}
