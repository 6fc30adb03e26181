//! # Middleware System
//!
//! Named, ordered chains of request interceptors. A route names at most one
//! chain; the dispatcher runs it after the controller's pre-filter and
//! before the action.
//!
//! ## Chain semantics
//!
//! - units run in registration order
//! - the first unit returning [`MiddlewareResult::Halt`] stops the chain
//!   and the action is skipped; the halting unit sets the response
//! - an empty chain name always continues
//! - an unknown chain name halts (fail closed) with a 500 unless a status
//!   was already set
//!
//! Chains are registered before the listener starts and only read
//! afterwards.

use crate::context::Context;
use crate::router::Method;
use hyper::StatusCode;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of middleware execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareResult {
    /// Continue to the next unit or the action
    Continue,
    /// Stop here; the action is skipped
    Halt,
}

impl MiddlewareResult {
    /// Whether the request may proceed
    #[must_use]
    pub fn is_continue(self) -> bool {
        self == Self::Continue
    }
}

impl From<bool> for MiddlewareResult {
    fn from(proceed: bool) -> Self {
        if proceed {
            Self::Continue
        } else {
            Self::Halt
        }
    }
}

/// Middleware trait for request interception
pub trait Middleware: Send + Sync {
    /// Inspect or modify the request context
    fn handle(&self, ctx: &mut Context) -> MiddlewareResult;

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

impl<F> Middleware for F
where
    F: Fn(&mut Context) -> MiddlewareResult + Send + Sync,
{
    fn handle(&self, ctx: &mut Context) -> MiddlewareResult {
        self(ctx)
    }

    fn name(&self) -> &'static str {
        "Closure"
    }
}

/// Named middleware chains
#[derive(Default, Clone)]
pub struct MiddlewareRegistry {
    chains: HashMap<String, Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit to the named chain, creating the chain if needed
    pub fn register<M: Middleware + 'static>(&mut self, chain: &str, unit: M) {
        self.push(chain, Arc::new(unit));
    }

    /// Append several units to the named chain, in order
    pub fn register_all<I>(&mut self, chain: &str, units: I)
    where
        I: IntoIterator<Item = Arc<dyn Middleware>>,
    {
        for unit in units {
            self.push(chain, unit);
        }
    }

    fn push(&mut self, chain: &str, unit: Arc<dyn Middleware>) {
        debug!(chain = %chain, middleware = unit.name(), "Middleware registered");
        self.chains.entry(chain.to_string()).or_default().push(unit);
    }

    /// Whether a chain with this name exists
    #[must_use]
    pub fn contains(&self, chain: &str) -> bool {
        self.chains.contains_key(chain)
    }

    /// Number of units in a chain, 0 if unknown
    #[must_use]
    pub fn len(&self, chain: &str) -> usize {
        self.chains.get(chain).map_or(0, Vec::len)
    }

    /// Check if no chain is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Run the named chain; returns whether the request may proceed
    pub fn run(&self, chain: &str, ctx: &mut Context) -> bool {
        if chain.is_empty() {
            return true;
        }

        let Some(units) = self.chains.get(chain) else {
            warn!(
                chain = %chain,
                path = %ctx.path(),
                "Unknown middleware group, halting request"
            );
            if ctx.status().is_none() {
                ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
            return false;
        };

        for unit in units {
            if !unit.handle(ctx).is_continue() {
                debug!(
                    chain = %chain,
                    middleware = unit.name(),
                    path = %ctx.path(),
                    "Middleware halted request"
                );
                return false;
            }
        }

        true
    }
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (name, units) in &self.chains {
            let names: Vec<_> = units.iter().map(|u| u.name()).collect();
            map.entry(name, &names);
        }
        map.finish()
    }
}

/// Logging middleware - logs each request passing the chain
#[derive(Default)]
pub struct LoggingMiddleware {
    log_headers: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable header logging
    #[must_use]
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl Middleware for LoggingMiddleware {
    fn handle(&self, ctx: &mut Context) -> MiddlewareResult {
        info!(
            method = %ctx.method(),
            path = %ctx.path(),
            action = ctx.action().unwrap_or("-"),
            request_id = ctx.request_id().unwrap_or("-"),
            "Request received"
        );
        if self.log_headers {
            debug!(headers = ?ctx.headers(), "Request headers");
        }
        MiddlewareResult::Continue
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

/// Cross-origin headers for browser clients
///
/// With no origins configured every origin is allowed (`*`). Otherwise the
/// request's `Origin` is echoed back only when listed, together with
/// `Vary: Origin`; unlisted origins get no CORS headers at all.
///
/// `OPTIONS` requests are answered with 204 and halt the chain.
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    origins: Vec<String>,
    methods: String,
    headers: String,
    max_age: Option<u64>,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            origins: Vec::new(),
            methods: join_methods([
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
                Method::Options,
            ]),
            headers: "Content-Type, Authorization".to_string(),
            max_age: None,
        }
    }
}

fn join_methods(methods: impl IntoIterator<Item = Method>) -> String {
    methods
        .into_iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl CorsMiddleware {
    /// Allow any origin
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to listed origins; may be called repeatedly
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.origins.push(origin.into());
        self
    }

    /// Methods advertised in `Access-Control-Allow-Methods`
    #[must_use]
    pub fn allow_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = join_methods(methods);
        self
    }

    /// Value of `Access-Control-Allow-Headers`
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.headers = headers.into();
        self
    }

    /// Let browsers cache preflight results for `seconds`
    #[must_use]
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    fn allowed_origin(&self, ctx: &Context) -> Option<String> {
        if self.origins.is_empty() {
            return Some("*".to_string());
        }
        let origin = ctx.header("origin")?;
        self.origins
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(origin))
            .then(|| origin.to_string())
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: &mut Context) -> MiddlewareResult {
        if !self.origins.is_empty() {
            ctx.set_header("Vary", "Origin");
        }

        match self.allowed_origin(ctx) {
            Some(origin) => {
                ctx.set_header("Access-Control-Allow-Origin", &origin);
                ctx.set_header("Access-Control-Allow-Methods", &self.methods);
                ctx.set_header("Access-Control-Allow-Headers", &self.headers);
                if let Some(age) = self.max_age {
                    ctx.set_header("Access-Control-Max-Age", &age.to_string());
                }
            }
            None => debug!(origin = ctx.header("origin").unwrap_or("-"), "Origin not allowed"),
        }

        if ctx.method() == Method::Options {
            ctx.set_status(StatusCode::NO_CONTENT);
            return MiddlewareResult::Halt;
        }
        MiddlewareResult::Continue
    }

    fn name(&self) -> &'static str {
        "CorsMiddleware"
    }
}

/// Clients tracked at once unless configured otherwise
const DEFAULT_MAX_CLIENTS: usize = 65_536;

/// Per-client token buckets keyed by remote IP
///
/// Each client holds up to `capacity` tokens, refilled continuously at
/// `refill_per_sec`; a request spends one. Requests with no token left get
/// 429 and halt the chain.
///
/// Buckets that have refilled completely are dropped, since a full bucket is
/// indistinguishable from a new one. At most `max_clients` buckets are kept;
/// past that the least recently seen client is forgotten.
pub struct RateLimitMiddleware {
    capacity: f64,
    refill_per_sec: f64,
    max_clients: usize,
    buckets: Mutex<Buckets>,
}

struct Buckets {
    by_client: HashMap<Option<IpAddr>, Bucket>,
    last_sweep: Instant,
}

struct Bucket {
    tokens: f64,
    seen: Instant,
}

impl RateLimitMiddleware {
    /// `capacity` requests per burst, `refill_per_sec` tokens back each second
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            max_clients: DEFAULT_MAX_CLIENTS,
            buckets: Mutex::new(Buckets {
                by_client: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Bound the number of tracked clients
    #[must_use]
    pub fn max_clients(mut self, limit: usize) -> Self {
        self.max_clients = limit.max(1);
        self
    }

    /// Number of clients currently tracked
    #[must_use]
    pub fn clients(&self) -> usize {
        self.lock().by_client.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Time for an empty bucket to fill up; `None` if buckets never refill
    fn refill_period(&self) -> Option<Duration> {
        if self.refill_per_sec > 0.0 {
            Duration::try_from_secs_f64(self.capacity / self.refill_per_sec).ok()
        } else {
            None
        }
    }

    /// Tokens in `bucket` at `now`
    fn level(&self, bucket: &Bucket, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(bucket.seen).as_secs_f64();
        (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity)
    }

    fn allow(&self, client: Option<IpAddr>) -> bool {
        let now = Instant::now();
        let mut state = self.lock();

        // Sweep at most once per full-refill period
        if let Some(period) = self.refill_period() {
            if now.saturating_duration_since(state.last_sweep) >= period {
                state.by_client.retain(|_, b| self.level(b, now) < self.capacity);
                state.last_sweep = now;
            }
        }

        if !state.by_client.contains_key(&client) && state.by_client.len() >= self.max_clients {
            let stalest = state
                .by_client
                .iter()
                .min_by_key(|(_, b)| b.seen)
                .map(|(k, _)| *k);
            if let Some(stalest) = stalest {
                state.by_client.remove(&stalest);
            }
        }

        let bucket = state.by_client.entry(client).or_insert(Bucket {
            tokens: self.capacity,
            seen: now,
        });
        bucket.tokens = self.level(bucket, now);
        bucket.seen = now;

        if bucket.tokens < 1.0 {
            return false;
        }
        bucket.tokens -= 1.0;
        true
    }
}

impl Middleware for RateLimitMiddleware {
    fn handle(&self, ctx: &mut Context) -> MiddlewareResult {
        let client = ctx.remote_addr().map(|addr| addr.ip());
        if self.allow(client) {
            return MiddlewareResult::Continue;
        }

        warn!(
            client = %client.map_or_else(|| "-".to_string(), |ip| ip.to_string()),
            path = %ctx.path(),
            "Rate limit exceeded"
        );
        ctx.error(StatusCode::TOO_MANY_REQUESTS, r#"{"error":"Rate limit exceeded"}"#);
        ctx.set_header("Content-Type", "application/json");
        MiddlewareResult::Halt
    }

    fn name(&self) -> &'static str {
        "RateLimitMiddleware"
    }
}

impl std::fmt::Debug for RateLimitMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitMiddleware")
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .field("clients", &self.clients())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::HeaderMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(method: Method) -> Context {
        Context::new(method, "/x", HeaderMap::new())
    }

    struct Recorder {
        id: usize,
        seen: Arc<Mutex<Vec<usize>>>,
        result: MiddlewareResult,
    }

    impl Middleware for Recorder {
        fn handle(&self, _ctx: &mut Context) -> MiddlewareResult {
            self.seen.lock().unwrap().push(self.id);
            self.result
        }
    }

    #[test]
    fn test_empty_chain_name_continues() {
        let registry = MiddlewareRegistry::new();
        assert!(registry.run("", &mut ctx(Method::Get)));
    }

    #[test]
    fn test_unknown_chain_fails_closed() {
        let registry = MiddlewareRegistry::new();
        let mut c = ctx(Method::Get);
        assert!(!registry.run("auth", &mut c));
        assert_eq!(c.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));

        let mut c = ctx(Method::Get);
        c.set_status(StatusCode::FORBIDDEN);
        assert!(!registry.run("auth", &mut c));
        assert_eq!(c.status(), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_units_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = MiddlewareRegistry::new();
        for id in 0..3 {
            registry.register(
                "api",
                Recorder {
                    id,
                    seen: seen.clone(),
                    result: MiddlewareResult::Continue,
                },
            );
        }

        assert!(registry.run("api", &mut ctx(Method::Get)));
        assert_eq!(*seen.lock().unwrap(), [0, 1, 2]);
        assert_eq!(registry.len("api"), 3);
    }

    #[test]
    fn test_halt_stops_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let units: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recorder { id: 0, seen: seen.clone(), result: MiddlewareResult::Continue }),
            Arc::new(Recorder { id: 1, seen: seen.clone(), result: MiddlewareResult::Halt }),
            Arc::new(Recorder { id: 2, seen: seen.clone(), result: MiddlewareResult::Continue }),
        ];

        let mut registry = MiddlewareRegistry::new();
        registry.register_all("api", units);

        assert!(!registry.run("api", &mut ctx(Method::Get)));
        assert_eq!(*seen.lock().unwrap(), [0, 1]);
    }

    #[test]
    fn test_closure_units() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut registry = MiddlewareRegistry::new();
        registry.register("api", move |ctx: &mut Context| {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.set_header("x-seen", "1");
            MiddlewareResult::Continue
        });

        let mut c = ctx(Method::Get);
        assert!(registry.run("api", &mut c));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.response_headers()["x-seen"], "1");
    }

    #[test]
    fn test_logging_middleware_name() {
        let mw = LoggingMiddleware::new();
        assert_eq!(mw.name(), "LoggingMiddleware");
        assert!(mw.handle(&mut ctx(Method::Get)).is_continue());
    }

    fn with_origin(method: Method, origin: &str) -> Context {
        let mut headers = HeaderMap::new();
        headers.insert("origin", origin.parse().unwrap());
        Context::new(method, "/x", headers)
    }

    fn from_ip(last_octet: u8) -> Context {
        let mut c = ctx(Method::Get);
        c.set_remote_addr(Some(SocketAddr::from(([10, 0, 0, last_octet], 4000))));
        c
    }

    #[test]
    fn test_cors_any_origin() {
        let mw = CorsMiddleware::new();
        let mut c = with_origin(Method::Get, "https://anywhere.test");
        assert!(mw.handle(&mut c).is_continue());

        let headers = c.response_headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(
            headers["access-control-allow-methods"],
            "GET, POST, PUT, DELETE, PATCH, OPTIONS"
        );
        assert!(headers.get("vary").is_none());
    }

    #[test]
    fn test_cors_listed_origin_echoed_on_preflight() {
        let mw = CorsMiddleware::new()
            .allow_origin("https://example.com")
            .allow_methods([Method::Get, Method::Post])
            .max_age(600);
        let mut c = with_origin(Method::Options, "https://example.com");

        assert_eq!(mw.handle(&mut c), MiddlewareResult::Halt);
        assert_eq!(c.status(), Some(StatusCode::NO_CONTENT));
        let headers = c.response_headers();
        assert_eq!(headers["access-control-allow-origin"], "https://example.com");
        assert_eq!(headers["access-control-allow-methods"], "GET, POST");
        assert_eq!(headers["access-control-max-age"], "600");
        assert_eq!(headers["vary"], "Origin");
    }

    #[test]
    fn test_cors_unlisted_origin_gets_no_grant() {
        let mw = CorsMiddleware::new().allow_origin("https://example.com");

        let mut c = with_origin(Method::Get, "https://evil.test");
        assert!(mw.handle(&mut c).is_continue());
        assert!(c.response_headers().get("access-control-allow-origin").is_none());

        let mut c = ctx(Method::Get);
        assert!(mw.handle(&mut c).is_continue());
        assert!(c.response_headers().get("access-control-allow-origin").is_none());
    }

    #[test]
    fn test_rate_limit() {
        let mw = RateLimitMiddleware::new(2, 0);
        assert!(mw.handle(&mut ctx(Method::Get)).is_continue());
        assert!(mw.handle(&mut ctx(Method::Get)).is_continue());

        let mut c = ctx(Method::Get);
        assert_eq!(mw.handle(&mut c), MiddlewareResult::Halt);
        assert_eq!(c.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(c.response_headers()["content-type"], "application/json");

        assert!(mw.handle(&mut from_ip(1)).is_continue());
    }

    #[test]
    fn test_rate_limit_forgets_refilled_clients() {
        let mw = RateLimitMiddleware::new(1, 10);
        for octet in 0..=255 {
            assert!(mw.handle(&mut from_ip(octet)).is_continue());
        }
        assert_eq!(mw.clients(), 256);

        std::thread::sleep(Duration::from_millis(150));
        assert!(mw.handle(&mut from_ip(7)).is_continue());
        assert_eq!(mw.clients(), 1);
    }

    #[test]
    fn test_rate_limit_client_cap() {
        let mw = RateLimitMiddleware::new(1, 0).max_clients(3);
        for octet in 0..10 {
            assert!(mw.handle(&mut from_ip(octet)).is_continue());
            assert!(mw.clients() <= 3);
        }

        assert_eq!(mw.handle(&mut from_ip(9)), MiddlewareResult::Halt);
    }

    #[test]
    fn test_result_from_bool() {
        assert_eq!(MiddlewareResult::from(true), MiddlewareResult::Continue);
        assert_eq!(MiddlewareResult::from(false), MiddlewareResult::Halt);
    }
}
