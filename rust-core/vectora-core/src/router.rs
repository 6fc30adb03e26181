//! # Router
//!
//! Per-method route table with an exact-match fast path and a compiled
//! pattern scan for parametric routes.
//!
//! ## Matching
//!
//! 1. A pattern byte-identical to the request path wins immediately with no
//!    parameters, even if a parametric pattern would also match.
//! 2. Otherwise patterns for the method are tried in registration order;
//!    the first full match yields its parameters by position.
//! 3. Nothing matched: no route.
//!
//! Tables are filled before the listener starts and only read afterwards.

use crate::error::{Error, Result};
use crate::handler::HandlerDescriptor;
use crate::route::{Params, RouteOptions, RoutePattern};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Upper-case method name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Convert from a hyper method, `None` for methods we don't route
    #[must_use]
    pub fn from_hyper(method: &hyper::Method) -> Option<Self> {
        match *method {
            hyper::Method::GET => Some(Self::Get),
            hyper::Method::POST => Some(Self::Post),
            hyper::Method::PUT => Some(Self::Put),
            hyper::Method::DELETE => Some(Self::Delete),
            hyper::Method::PATCH => Some(Self::Patch),
            hyper::Method::HEAD => Some(Self::Head),
            hyper::Method::OPTIONS => Some(Self::Options),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            other => Err(Error::Config {
                reason: format!("unknown HTTP method '{other}'"),
            }),
        }
    }
}

/// A registered route
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// HTTP method
    pub method: Method,
    /// Compiled pattern
    pub pattern: RoutePattern,
    /// Resolved controller action
    pub handler: HandlerDescriptor,
    /// Options as registered
    pub options: RouteOptions,
}

/// Matched route with extracted parameters
#[derive(Debug)]
pub struct Match<'a> {
    /// Path parameters in pattern order
    pub params: Params,
    /// The matched entry
    pub entry: &'a RouteEntry,
}

impl<'a> Match<'a> {
    /// The matched pattern
    #[must_use]
    pub fn pattern(&self) -> &'a RoutePattern {
        &self.entry.pattern
    }

    /// The resolved handler
    #[must_use]
    pub fn handler(&self) -> &'a HandlerDescriptor {
        &self.entry.handler
    }

    /// The route options
    #[must_use]
    pub fn options(&self) -> &'a RouteOptions {
        &self.entry.options
    }
}

/// Per-method storage for routes
#[derive(Clone, Default)]
struct MethodRoutes {
    /// Literal pattern -> index into `routes`
    exact: HashMap<String, usize>,
    /// Entries in registration order
    routes: Vec<RouteEntry>,
}

/// Route table
#[derive(Clone, Default)]
pub struct Router {
    method_routes: HashMap<Method, MethodRoutes>,
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route
    ///
    /// # Errors
    ///
    /// - `Error::DuplicateRoute` if `(method, pattern)` is already registered
    /// - `Error::InvalidHandler` if the controller has no such action
    /// - `Error::InvalidRoutePattern` if the pattern does not compile
    ///
    /// A failed call leaves the table unchanged.
    pub fn add(&mut self, method: Method, pattern: &str, options: RouteOptions) -> Result<()> {
        if self
            .method_routes
            .get(&method)
            .is_some_and(|m| m.exact.contains_key(pattern))
        {
            return Err(Error::DuplicateRoute {
                method,
                pattern: pattern.to_string(),
            });
        }

        let handler =
            options
                .controller
                .bind(&options.action)
                .ok_or_else(|| Error::InvalidHandler {
                    method,
                    pattern: pattern.to_string(),
                    action: options.action.clone(),
                })?;

        let compiled = RoutePattern::compile(pattern)?;

        info!(
            method = %method,
            pattern = %pattern,
            controller = handler.controller(),
            action = handler.action(),
            "Route registered"
        );

        let method_routes = self.method_routes.entry(method).or_default();
        method_routes
            .exact
            .insert(pattern.to_string(), method_routes.routes.len());
        method_routes.routes.push(RouteEntry {
            method,
            pattern: compiled,
            handler,
            options,
        });

        Ok(())
    }

    /// Match a request path against registered routes
    #[must_use]
    pub fn match_route(&self, method: Method, path: &str) -> Option<Match<'_>> {
        let method_routes = self.method_routes.get(&method)?;

        if let Some(&index) = method_routes.exact.get(path) {
            debug!(method = %method, path = %path, "Route matched exactly");
            return Some(Match {
                params: Params::new(),
                entry: &method_routes.routes[index],
            });
        }

        for entry in &method_routes.routes {
            if let Some(params) = entry.pattern.captures(path) {
                debug!(
                    method = %method,
                    path = %path,
                    route_pattern = %entry.pattern,
                    path_params = ?params,
                    "Route matched"
                );
                return Some(Match { params, entry });
            }
        }

        debug!(method = %method, path = %path, "No route matched");
        None
    }

    /// Merge every entry of this table into `dest`
    ///
    /// Entries are re-added through `dest.add`, so duplicates are detected
    /// against `dest`. The first error stops the merge; entries added before
    /// it stay in `dest`.
    ///
    /// # Errors
    ///
    /// The first error returned by `dest.add`.
    pub fn copy_into(&self, dest: &mut Self) -> Result<()> {
        for entry in self.entries() {
            dest.add(entry.method, entry.pattern.as_str(), entry.options.clone())?;
        }
        Ok(())
    }

    /// All entries, grouped by method, in registration order within a method
    pub fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.method_routes.values().flat_map(|m| m.routes.iter())
    }

    /// Whether `(method, pattern)` is registered
    #[must_use]
    pub fn contains(&self, method: Method, pattern: &str) -> bool {
        self.method_routes
            .get(&method)
            .is_some_and(|m| m.exact.contains_key(pattern))
    }

    /// Total number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.method_routes.values().map(|m| m.routes.len()).sum()
    }

    /// Whether no route is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convenience method to add a GET route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn get(&mut self, path: &str, options: RouteOptions) -> Result<()> {
        self.add(Method::Get, path, options)
    }

    /// Convenience method to add a POST route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn post(&mut self, path: &str, options: RouteOptions) -> Result<()> {
        self.add(Method::Post, path, options)
    }

    /// Convenience method to add a PUT route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn put(&mut self, path: &str, options: RouteOptions) -> Result<()> {
        self.add(Method::Put, path, options)
    }

    /// Convenience method to add a DELETE route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn delete(&mut self, path: &str, options: RouteOptions) -> Result<()> {
        self.add(Method::Delete, path, options)
    }

    /// Convenience method to add an OPTIONS route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn options(&mut self, path: &str, options: RouteOptions) -> Result<()> {
        self.add(Method::Options, path, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::{Action, Controller};

    #[derive(Default)]
    struct TestController;

    impl TestController {
        fn invoke(&mut self, _ctx: &mut Context) {}
        fn other(&mut self, _ctx: &mut Context) {}
    }

    impl Controller for TestController {
        fn create() -> Result<Self> {
            Ok(Self)
        }

        fn action(name: &str) -> Option<Action<Self>> {
            match name {
                "invoke" => Some(Self::invoke),
                "other" => Some(Self::other),
                _ => None,
            }
        }
    }

    fn opts() -> RouteOptions {
        RouteOptions::new::<TestController>("invoke").content_type("application/json")
    }

    fn table(routes: &[(Method, &str)]) -> Router {
        let mut router = Router::new();
        for (method, path) in routes {
            router.add(*method, path, opts()).unwrap();
        }
        router
    }

    #[test]
    fn test_match_table() {
        struct Case {
            src: (Method, &'static str),
            req: (Method, &'static str),
            params: Option<Vec<(&'static str, &'static str)>>,
        }

        let cases = [
            Case { src: (Method::Post, "/c"), req: (Method::Post, "/b"), params: None },
            Case { src: (Method::Post, "/c"), req: (Method::Get, "/c"), params: None },
            Case { src: (Method::Post, "/a"), req: (Method::Post, "/a"), params: Some(vec![]) },
            Case {
                src: (Method::Post, "/a/:v1/:v2"),
                req: (Method::Post, "/a/1/2"),
                params: Some(vec![("v1", "1"), ("v2", "2")]),
            },
            Case { src: (Method::Post, "/a/:v1/:v2"), req: (Method::Post, "/a/1"), params: None },
        ];

        for case in cases {
            let router = table(&[case.src]);
            let matched = router.match_route(case.req.0, case.req.1);
            match (case.params, matched) {
                (None, None) => {}
                (Some(expected), Some(m)) => {
                    let got: Vec<_> = m.params.iter().collect();
                    assert_eq!(got, expected, "{:?} {:?}", case.src, case.req);
                }
                (expected, got) => {
                    panic!("{:?} {:?}: expected {expected:?}, got {got:?}", case.src, case.req)
                }
            }
        }
    }

    #[test]
    fn test_exact_match_wins_over_parametric() {
        let router = table(&[(Method::Get, "/users/:id"), (Method::Get, "/users/me")]);

        let m = router.match_route(Method::Get, "/users/me").unwrap();
        assert!(m.params.is_empty());
        assert_eq!(m.pattern().as_str(), "/users/me");

        let m = router.match_route(Method::Get, "/users/42").unwrap();
        assert_eq!(m.params.get("id"), Some("42"));
    }

    #[test]
    fn test_trailing_slash_matches_pattern() {
        let router = table(&[(Method::Get, "/users/:id")]);
        let m = router.match_route(Method::Get, "/users/7/").unwrap();
        assert_eq!(m.params.get("id"), Some("7"));
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let mut router = Router::new();
        router.post("/a", opts()).unwrap();

        let err = router
            .post("/a", RouteOptions::new::<TestController>("other"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Route path already in use: 'POST'->'/a'");

        assert_eq!(router.len(), 1);
        let m = router.match_route(Method::Post, "/a").unwrap();
        assert_eq!(m.handler().action(), "invoke");
    }

    #[test]
    fn test_same_pattern_different_methods() {
        let mut router = Router::new();
        router.get("/a", opts()).unwrap();
        router.post("/a", opts()).unwrap();
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let mut router = Router::new();
        let err = router
            .get("/a", RouteOptions::new::<TestController>("missing"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHandler { ref action, .. } if action == "missing"));
        assert!(router.is_empty());
    }

    #[test]
    fn test_copy_into_merges() {
        let src = table(&[(Method::Post, "/a")]);
        let mut dst = table(&[(Method::Post, "/b")]);

        src.copy_into(&mut dst).unwrap();

        assert_eq!(dst.len(), 2);
        assert!(dst.contains(Method::Post, "/a"));
        assert!(dst.contains(Method::Post, "/b"));
    }

    #[test]
    fn test_copy_into_empty() {
        let src = table(&[(Method::Post, "/a")]);
        let mut dst = Router::new();
        src.copy_into(&mut dst).unwrap();
        assert_eq!(dst.len(), 1);
        assert!(dst.contains(Method::Post, "/a"));
    }

    #[test]
    fn test_copy_into_duplicate_fails() {
        let src = table(&[(Method::Post, "/a")]);
        let mut dst = table(&[(Method::Post, "/a")]);

        let err = src.copy_into(&mut dst).unwrap_err();
        assert_eq!(err.to_string(), "Route path already in use: 'POST'->'/a'");
        assert_eq!(dst.len(), 1);
    }

    #[test]
    fn test_method_not_registered() {
        let router = table(&[(Method::Get, "/users")]);
        assert!(router.match_route(Method::Post, "/users").is_none());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!(Method::from_hyper(&hyper::Method::OPTIONS), Some(Method::Options));
        assert_eq!(Method::from_hyper(&hyper::Method::TRACE), None);
        assert!("BREW".parse::<Method>().is_err());
    }
}
