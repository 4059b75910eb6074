//! Path template compilation.
//!
//! A template is a `/`-joined sequence of segments:
//!
//! - a literal segment matches itself (regex metacharacters are escaped),
//! - `:name` matches exactly one token (non-empty, no `/`, no whitespace,
//!   no `?` or `#`), optionally captured under `name`,
//! - `...name` greedily matches one or more such tokens joined by `/`,
//!   captured as a single grouped value,
//! - a `?` suffix makes the entire preceding segment optional.
//!
//! The literal root template `/` compiles to an anchor matching exactly one
//! slash. Ambiguous combinations (several wildcards, optional before a
//! wildcard) are accepted as written and never validated.
//!
//! Every compiled source starts with an empty marker group `()`; when the
//! per-method alternation is assembled, the marker that participated in the
//! match identifies which alternative won.

use regex::Regex;
use serde_json::{Map, Value};

const TOKEN: &str = "[^/\\s?#]+";

/// Translates a path template into regex source.
///
/// With `capture` set, `:name` and `...name` segments become named groups,
/// used for runtime parameter extraction. Without it the source is fully
/// non-capturing (apart from the leading marker group) and suitable for
/// embedding into a method-level alternation.
pub(crate) fn template_to_regex(template: &str, capture: bool) -> String {
    let mut pattern = String::from("()");

    if template == "/" {
        pattern.push_str("\\/");
        return pattern;
    }

    for raw in template.split('/') {
        if raw.is_empty() {
            continue;
        }

        let (segment, optional) = match raw.strip_suffix('?') {
            Some(stripped) => (stripped, true),
            None => (raw, false),
        };

        let mut piece = String::new();

        if let Some(name) = segment.strip_prefix(':') {
            piece.push_str("\\/");
            if capture {
                piece.push_str(&format!("(?P<{name}>{TOKEN})"));
            } else {
                piece.push_str(TOKEN);
            }
        } else if let Some(name) = segment.strip_prefix("...") {
            piece.push_str("\\/");
            let greedy = format!("(?:{TOKEN}/)*(?:{TOKEN})");
            if capture {
                piece.push_str(&format!("(?P<{name}>{greedy})"));
            } else {
                piece.push_str(&format!("(?:{greedy})"));
            }
        } else {
            piece.push('/');
            piece.push_str(&regex::escape(segment));
        }

        if optional {
            piece = format!("(?:{piece})?");
        }

        pattern.push_str(&piece);
    }

    pattern
}

/// A compiled, capturing pattern for one endpoint path.
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    regex: Regex,
}

impl PathPattern {
    /// Compiles `template` in capturing mode, anchored at both ends.
    pub fn compile(template: &str) -> Result<Self, regex::Error> {
        let source = format!("^{}$", template_to_regex(template, true));
        Ok(PathPattern { template: template.to_owned(), regex: Regex::new(&source)? })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Extracts named parameters from a concrete request path.
    ///
    /// A captured value containing `/` is the wildcard case and is split
    /// into a list. Optional segments that did not participate are absent
    /// from the result.
    pub fn params(&self, path: &str) -> Map<String, Value> {
        let mut params = Map::new();

        let Some(captures) = self.regex.captures(path) else {
            return params;
        };

        for name in self.regex.capture_names().flatten() {
            let Some(matched) = captures.name(name) else {
                continue;
            };

            let value = matched.as_str();
            if value.contains('/') {
                let parts = value.split('/').map(|part| Value::String(part.to_owned())).collect();
                params.insert(name.to_owned(), Value::Array(parts));
            } else {
                params.insert(name.to_owned(), Value::String(value.to_owned()));
            }
        }

        params
    }
}

/// The method-level alternation built from every endpoint path of one
/// HTTP method, in match-precedence order.
///
/// Alternatives are tried left to right and the first match wins; the tree
/// compiler reverses each bucket before building the matcher, which is what
/// makes the endpoint declared last win on overlapping templates.
#[derive(Debug)]
pub struct MethodMatcher {
    regex: Regex,
}

impl MethodMatcher {
    pub fn build<S: AsRef<str>>(templates: &[S]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> =
            templates.iter().map(|template| template_to_regex(template.as_ref(), false)).collect();
        let source = format!("^(?:{})$", alternatives.join("|"));
        Ok(MethodMatcher { regex: Regex::new(&source)? })
    }

    /// Returns the index of the first alternative matching `path`.
    ///
    /// Only the marker group of the winning alternative participates in the
    /// match, so its group index maps straight back to the alternative's
    /// position.
    pub fn find(&self, path: &str) -> Option<usize> {
        let captures = self.regex.captures(path)?;

        (1..captures.len()).find(|index| captures.get(*index).is_some()).map(|index| index - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_template_is_a_single_slash_anchor() {
        assert_eq!(template_to_regex("/", true), "()\\/");

        let pattern = PathPattern::compile("/").unwrap();
        assert!(pattern.matches("/"));
        assert!(!pattern.matches("/a"));
        assert!(!pattern.matches(""));
    }

    #[test]
    fn param_segment_captures_one_token() {
        let pattern = PathPattern::compile("/hello/:name").unwrap();

        assert!(pattern.matches("/hello/world"));
        assert!(!pattern.matches("/hello"));
        assert!(!pattern.matches("/hello/a/b"));

        let params = pattern.params("/hello/world");
        assert_eq!(params.get("name"), Some(&Value::String("world".into())));
    }

    #[test]
    fn optional_segment_may_be_omitted() {
        let pattern = PathPattern::compile("/items/:id?").unwrap();

        assert!(pattern.matches("/items"));
        assert!(pattern.matches("/items/7"));

        assert!(pattern.params("/items").get("id").is_none());
        assert_eq!(pattern.params("/items/7").get("id"), Some(&Value::String("7".into())));
    }

    #[test]
    fn wildcard_segment_captures_joined_tokens_as_a_list() {
        let pattern = PathPattern::compile("/files/...path").unwrap();

        assert!(!pattern.matches("/files"));
        assert!(pattern.matches("/files/a"));

        let params = pattern.params("/files/a/b/c");
        let expected: Vec<Value> = ["a", "b", "c"].iter().map(|s| Value::String((*s).into())).collect();
        assert_eq!(params.get("path"), Some(&Value::Array(expected)));

        assert_eq!(pattern.params("/files/one").get("path"), Some(&Value::String("one".into())));
    }

    #[test]
    fn literal_segments_are_escaped() {
        let pattern = PathPattern::compile("/v1.0/ping").unwrap();

        assert!(pattern.matches("/v1.0/ping"));
        assert!(!pattern.matches("/v1x0/ping"));
    }

    #[test]
    fn matcher_prefers_earlier_alternatives() {
        let matcher = MethodMatcher::build(&["/items/new", "/items/:id"]).unwrap();

        assert_eq!(matcher.find("/items/new"), Some(0));
        assert_eq!(matcher.find("/items/7"), Some(1));
        assert_eq!(matcher.find("/other"), None);
    }

    #[test]
    fn matcher_handles_optional_and_wildcard_alternatives() {
        let matcher = MethodMatcher::build(&["/a/:x?", "/files/...rest"]).unwrap();

        assert_eq!(matcher.find("/a"), Some(0));
        assert_eq!(matcher.find("/a/1"), Some(0));
        assert_eq!(matcher.find("/files/x/y"), Some(1));
    }
}
