//! # Route Metadata
//!
//! Route options, compiled path patterns and extracted parameters.
//!
//! A pattern such as `/users/:id/posts/:post` compiles to an anchored regex
//! where every `:name` placeholder captures one or more non-slash characters
//! and a single trailing slash is optional:
//!
//! ```text
//! /users/:id/posts/:post  ->  ^/users/([^/]+)/posts/([^/]+)/?$
//! ```

use crate::error::{Error, Result};
use crate::handler::{Controller, ControllerType};
use regex::Regex;
use std::fmt;
use std::time::Duration;

/// Timeout recorded for routes that leave `timeout` at zero
pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-route registration options
#[derive(Debug, Clone)]
pub struct RouteOptions {
    /// Middleware chain to run before the action
    pub middleware_group: Option<String>,
    /// Controller type that owns the action
    pub controller: ControllerType,
    /// Name of the action to bind
    pub action: String,
    /// Media type the route accepts for non-empty bodies
    pub content_type: Option<String>,
    /// Body size limit in bytes, 0 = server default
    pub max_body_bytes: u64,
    /// Advisory time budget, zero = [`DEFAULT_ROUTE_TIMEOUT`]
    pub timeout: Duration,
    /// Resolve a locale for this route
    pub i18n: bool,
}

impl RouteOptions {
    /// Options binding `action` on controller `C`, everything else defaulted
    #[must_use]
    pub fn new<C: Controller>(action: impl Into<String>) -> Self {
        Self {
            middleware_group: None,
            controller: ControllerType::of::<C>(),
            action: action.into(),
            content_type: None,
            max_body_bytes: 0,
            timeout: Duration::ZERO,
            i18n: false,
        }
    }

    /// Run the named middleware chain before the action
    #[must_use]
    pub fn middleware(mut self, group: impl Into<String>) -> Self {
        self.middleware_group = Some(group.into());
        self
    }

    /// Require this media type for requests carrying a body
    #[must_use]
    pub fn content_type(mut self, media_type: impl Into<String>) -> Self {
        self.content_type = Some(media_type.into());
        self
    }

    /// Override the body size limit
    #[must_use]
    pub fn max_body_bytes(mut self, limit: u64) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Set the advisory time budget
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable locale resolution
    #[must_use]
    pub fn localized(mut self) -> Self {
        self.i18n = true;
        self
    }

    /// The time budget with the default applied
    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_ROUTE_TIMEOUT
        } else {
            self.timeout
        }
    }
}

/// Path parameters in pattern order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Create an empty parameter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a parameter by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate `(name, value)` pairs in pattern order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameters were extracted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn push(&mut self, name: &str, value: &str) {
        self.0.push((name.to_string(), value.to_string()));
    }
}

/// A path pattern compiled into a matcher
#[derive(Clone)]
pub struct RoutePattern {
    /// Literal pattern as registered (e.g., "/a/:v1/:v2")
    pattern: String,
    /// Placeholder names, left to right
    keys: Vec<String>,
    /// Anchored matcher
    regex: Regex,
}

impl fmt::Debug for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutePattern")
            .field("pattern", &self.pattern)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl RoutePattern {
    /// Compile a pattern
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern does not start with
    /// `/` or repeats a placeholder name.
    pub fn compile(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(Error::InvalidRoutePattern {
                pattern: pattern.to_string(),
                reason: "pattern must start with '/'".to_string(),
            });
        }

        let (source, keys) = Self::parse_path_pattern(pattern);

        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                return Err(Error::InvalidRoutePattern {
                    pattern: pattern.to_string(),
                    reason: format!("duplicate placeholder ':{key}'"),
                });
            }
        }

        let regex = Regex::new(&source).map_err(|e| Error::InvalidRoutePattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            keys,
            regex,
        })
    }

    /// Build the regex source and collect placeholder names
    ///
    /// A placeholder is `:` followed by one or more ASCII alphanumerics or
    /// underscores. A `:` not followed by such a character is literal.
    fn parse_path_pattern(pattern: &str) -> (String, Vec<String>) {
        let mut source = String::with_capacity(pattern.len() + 8);
        let mut keys = Vec::new();
        let mut literal = String::new();

        source.push('^');

        let mut chars = pattern.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == ':' {
                let start = i + 1;
                let mut end = start;
                while let Some(&(j, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        end = j + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }

                if end > start {
                    source.push_str(&regex::escape(&literal));
                    literal.clear();
                    source.push_str("([^/]+)");
                    keys.push(pattern[start..end].to_string());
                    continue;
                }
            }
            literal.push(c);
        }

        source.push_str(&regex::escape(&literal));
        source.push_str("/?$");

        (source, keys)
    }

    /// The literal pattern string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Placeholder names in declaration order
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Match a full request path and extract parameters by position
    #[must_use]
    pub fn captures(&self, path: &str) -> Option<Params> {
        let caps = self.regex.captures(path)?;
        let mut params = Params::new();
        for (key, value) in self.keys.iter().zip(caps.iter().skip(1)) {
            params.push(key, value.map_or("", |m| m.as_str()));
        }
        Some(params)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_simple() {
        let p = RoutePattern::compile("/users").unwrap();
        assert!(p.keys().is_empty());
        assert!(p.captures("/users").is_some());
        assert!(p.captures("/users/").is_some());
        assert!(p.captures("/users/1").is_none());
    }

    #[test]
    fn test_pattern_with_params() {
        let p = RoutePattern::compile("/a/:v1/:v2").unwrap();
        assert_eq!(p.keys(), ["v1", "v2"]);

        let params = p.captures("/a/1/2").unwrap();
        assert_eq!(params.get("v1"), Some("1"));
        assert_eq!(params.get("v2"), Some("2"));
        let order: Vec<_> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(order, ["v1", "v2"]);

        assert!(p.captures("/a/1").is_none());
        assert!(p.captures("/a/1/2/3").is_none());
    }

    #[test]
    fn test_pattern_escapes_metacharacters() {
        let p = RoutePattern::compile("/files/:name.json").unwrap();
        assert_eq!(p.captures("/files/report.json").unwrap().get("name"), Some("report"));
        assert!(p.captures("/files/reportxjson").is_none());

        let p = RoutePattern::compile("/v1.0/(x)+").unwrap();
        assert!(p.captures("/v1.0/(x)+").is_some());
        assert!(p.captures("/v1x0/xx").is_none());
    }

    #[test]
    fn test_pattern_values_are_not_decoded() {
        let p = RoutePattern::compile("/q/:term").unwrap();
        let params = p.captures("/q/a%20b").unwrap();
        assert_eq!(params.get("term"), Some("a%20b"));
    }

    #[test]
    fn test_pattern_lone_colon_is_literal() {
        let p = RoutePattern::compile("/time/12:/x").unwrap();
        assert!(p.keys().is_empty());
        assert!(p.captures("/time/12:/x").is_some());
    }

    #[test]
    fn test_pattern_rejects_duplicate_keys() {
        let err = RoutePattern::compile("/a/:id/b/:id").unwrap_err();
        assert!(matches!(err, Error::InvalidRoutePattern { .. }));
    }

    #[test]
    fn test_pattern_requires_leading_slash() {
        assert!(RoutePattern::compile("users").is_err());
    }

    #[test]
    fn test_root_pattern() {
        let p = RoutePattern::compile("/").unwrap();
        assert!(p.captures("/").is_some());
        assert!(p.captures("/x").is_none());
    }
}
