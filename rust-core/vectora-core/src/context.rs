//! # Request Context
//!
//! Per-request state threaded through the dispatch pipeline: the request
//! view (method, path, query, headers, path parameters, parsed body), the
//! negotiated content type and locale, and the response under construction
//! (status, headers, body bytes, first error).
//!
//! A context is owned by exactly one in-flight request and is dropped when
//! the request completes. Staged uploads still on disk at that point are
//! removed.

use crate::body::{Body, FormFields, UploadedFile};
use crate::collaborators::{TemplateEngine, Translator};
use crate::error::{Error, Result};
use crate::modules::{Module, ModuleRegistry};
use crate::route::{Params, DEFAULT_ROUTE_TIMEOUT};
use crate::router::Method;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{self, HeaderName, HeaderValue};
use hyper::{HeaderMap, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const TEXT_HTML: &str = "text/html; charset=utf-8";
const APPLICATION_JSON: &str = "application/json; charset=utf-8";

/// Per-request state
pub struct Context {
    method: Method,
    path: String,
    query: FormFields,
    headers: HeaderMap,
    params: Params,
    body: Body,
    raw_body: Bytes,
    content_type: Option<String>,
    locale: Option<String>,
    translator: Option<Translator>,
    action: Option<String>,
    timeout: Duration,
    request_id: Option<String>,
    remote_addr: Option<SocketAddr>,
    templates: Option<Arc<dyn TemplateEngine>>,
    modules: Arc<ModuleRegistry>,

    status: Option<StatusCode>,
    response_headers: HeaderMap,
    output: Vec<u8>,
    error: Option<Error>,
}

impl Context {
    /// Create a context for `method` and a request target such as
    /// `/users/7?tab=posts`
    ///
    /// The query string is parsed eagerly; repeated keys keep every value.
    #[must_use]
    pub fn new(method: Method, target: &str, headers: HeaderMap) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        Self {
            method,
            path: path.to_string(),
            query: query.map(|q| crate::body::parse_form(q.as_bytes())).unwrap_or_default(),
            headers,
            params: Params::new(),
            body: Body::Empty,
            raw_body: Bytes::new(),
            content_type: None,
            locale: None,
            translator: None,
            action: None,
            timeout: DEFAULT_ROUTE_TIMEOUT,
            request_id: None,
            remote_addr: None,
            templates: None,
            modules: Arc::default(),
            status: None,
            response_headers: HeaderMap::new(),
            output: Vec::new(),
            error: None,
        }
    }

    // ----- request view -------------------------------------------------

    /// Request method
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Request path without the query string, not percent-decoded
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get a request header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All request headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a query parameter
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// Every value of a query parameter, in order
    #[must_use]
    pub fn query_all(&self, name: &str) -> &[String] {
        self.query.get(name).map_or(&[], Vec::as_slice)
    }

    /// All query parameters
    #[must_use]
    pub fn query_map(&self) -> &FormFields {
        &self.query
    }

    /// Path parameter by placeholder name
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// All path parameters in pattern order
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Parsed request body
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Body bytes as read from the wire
    #[must_use]
    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    /// Uploaded files of a multipart request
    #[must_use]
    pub fn files(&self) -> &[UploadedFile] {
        self.body.files()
    }

    /// First value of a form field
    #[must_use]
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.body
            .fields()
            .and_then(|fields| fields.get(name))
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Negotiated media type, lower-case and without parameters
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Value of a request cookie
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|h| h.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"'))
    }

    /// Resolved locale, set on localized routes
    #[must_use]
    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Translate `key` into the request locale
    ///
    /// Without a resolved locale the key is returned unchanged.
    #[must_use]
    pub fn translate(&self, key: &str) -> String {
        self.translator
            .as_ref()
            .map_or_else(|| key.to_string(), |t| t(key))
    }

    /// Name of the bound action
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Advisory time budget of the matched route
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request id, echoed as `x-request-id`
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Peer address, when served over a socket
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Deserialize the request body into `T`
    ///
    /// JSON bodies are decoded directly. Form and multipart fields with a
    /// single value bind to scalars (numbers are parsed from their text),
    /// repeated fields bind to sequences.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedRequest` if the body does not fit `T`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.body {
            Body::Json(_) => crate::json::parse_json_bytes(&self.raw_body),
            Body::Form(fields) | Body::Multipart(fields, _) => crate::bind::from_fields(fields),
            Body::Empty => crate::bind::from_fields(&FormFields::new()),
        }
    }

    /// Shared application module registered under `name`
    #[must_use]
    pub fn module<T: Module>(&self, name: &str) -> Option<Arc<T>> {
        self.modules.get::<T>(name)
    }

    // ----- response -----------------------------------------------------

    /// Set or replace a response header
    ///
    /// Invalid names or values are logged and ignored.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.response_headers.insert(name, value);
            }
            _ => warn!(header = %name, "Ignoring invalid response header"),
        }
    }

    /// Response headers set so far
    #[must_use]
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Set the response status
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Response status set so far
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Redirect to `location` with a 3xx `status`
    pub fn redirect(&mut self, location: &str, status: StatusCode) {
        self.set_header(header::LOCATION.as_str(), location);
        self.status = Some(status);
    }

    /// Whether the response is a redirect (status set and `Location` present)
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.status.is_some() && self.response_headers.contains_key(header::LOCATION)
    }

    /// Answer with an error status and a plain-text body
    pub fn error(&mut self, status: StatusCode, body: &str) {
        self.status = Some(status);
        self.response_headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
        self.response_headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        self.output = body.as_bytes().to_vec();
        self.set_error(Error::handler(body));
    }

    /// Record an error; only the first one is kept
    pub fn set_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// First error recorded on this request
    #[must_use]
    pub fn error_value(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Answer 504 Gateway Timeout
    pub fn gateway_timeout(&mut self) {
        self.error(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout");
    }

    /// Render `template` through the template engine as HTML
    ///
    /// Engine failures are recorded as the request error.
    pub fn render(&mut self, template: &str, data: &serde_json::Value) {
        let Some(engine) = self.templates.clone() else {
            self.set_error(Error::Template {
                template: template.to_string(),
                reason: "no template engine configured".to_string(),
            });
            return;
        };

        self.response_headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_HTML));
        match engine.render(template, data) {
            Ok(bytes) => self.output = bytes,
            Err(e) => self.set_error(e),
        }
    }

    /// Answer with `data` serialized as JSON
    pub fn json<T: Serialize + ?Sized>(&mut self, data: &T) {
        let encoded = crate::json::to_json(data);
        self.write_json(encoded);
    }

    /// Answer with `data` serialized as JSON, non-ASCII escaped as `\uXXXX`
    pub fn json_ascii<T: Serialize + ?Sized>(&mut self, data: &T) {
        let encoded = crate::json::to_json_ascii(data);
        self.write_json(encoded);
    }

    fn write_json(&mut self, encoded: Result<Vec<u8>>) {
        self.response_headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        match encoded {
            Ok(bytes) => self.output = bytes,
            Err(e) => self.set_error(e),
        }
    }

    /// Answer with plain text
    pub fn plain(&mut self, text: &str) {
        self.response_headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
        self.output = text.as_bytes().to_vec();
    }

    /// Append raw bytes to the response body
    pub fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    /// Response body written so far
    #[must_use]
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Append a `Set-Cookie` header
    pub fn set_cookie(&mut self, cookie: &Cookie) {
        match HeaderValue::from_str(&cookie.header_value()) {
            Ok(value) => {
                self.response_headers.append(header::SET_COOKIE, value);
            }
            Err(e) => warn!(cookie = %cookie.name, error = %e, "Ignoring invalid cookie"),
        }
    }

    // ----- pipeline -----------------------------------------------------

    pub(crate) fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub(crate) fn set_body(&mut self, body: Body, raw: Bytes) {
        self.body = body;
        self.raw_body = raw;
    }

    pub(crate) fn set_content_type(&mut self, media_type: Option<String>) {
        self.content_type = media_type;
    }

    pub(crate) fn set_locale(&mut self, locale: String, translator: Translator) {
        self.locale = Some(locale);
        self.translator = Some(translator);
    }

    pub(crate) fn set_action(&mut self, action: &str) {
        self.action = Some(action.to_string());
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) fn set_request_id(&mut self, id: String) {
        self.request_id = Some(id);
    }

    pub(crate) fn set_remote_addr(&mut self, addr: Option<SocketAddr>) {
        self.remote_addr = addr;
    }

    pub(crate) fn set_templates(&mut self, templates: Option<Arc<dyn TemplateEngine>>) {
        self.templates = templates;
    }

    pub(crate) fn set_modules(&mut self, modules: Arc<ModuleRegistry>) {
        self.modules = modules;
    }

    /// Delete staged uploads
    ///
    /// The file list is cleared only once every file is gone; on failure it
    /// is kept and dropping the context tries again.
    pub(crate) async fn release_uploads(&mut self) {
        let files = self.body.files().to_vec();
        if files.is_empty() {
            return;
        }

        match crate::body::remove_files(&files).await {
            Ok(()) => {
                if let Body::Multipart(_, staged) = &mut self.body {
                    staged.clear();
                }
            }
            Err(e) => warn!(
                request_id = self.request_id.as_deref().unwrap_or("-"),
                files = files.len(),
                error = %e,
                "Failed to remove staged uploads"
            ),
        }
    }

    /// Turn the response state into an HTTP response
    ///
    /// - error recorded: its status (500 if unset), headers and body
    /// - redirect: status and headers only
    /// - otherwise: status (200 if unset), headers and body
    pub(crate) fn finalize(&mut self) -> Response<Full<Bytes>> {
        let (status, body) = if self.error.is_some() {
            (
                self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                std::mem::take(&mut self.output),
            )
        } else if self.is_redirect() {
            (self.status.unwrap_or(StatusCode::FOUND), Vec::new())
        } else {
            (
                self.status.unwrap_or(StatusCode::OK),
                std::mem::take(&mut self.output),
            )
        };

        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        *response.headers_mut() = std::mem::take(&mut self.response_headers);
        response
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        crate::body::discard_files(self.body.files());
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("content_type", &self.content_type)
            .field("status", &self.status)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// `Set-Cookie` builder
///
/// `\r` and `\n` in the name become `-`; in the value, path and domain
/// they become spaces, as do `;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    max_age: Option<i64>,
    path: String,
    domain: Option<String>,
    http_only: bool,
    secure: bool,
}

impl Cookie {
    /// A session cookie for path `/`
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            path: "/".to_string(),
            domain: None,
            http_only: false,
            secure: false,
        }
    }

    /// Lifetime in seconds; zero or less expires the cookie immediately
    #[must_use]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Cookie path; empty omits the attribute
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Cookie domain
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Hide the cookie from scripts (use for session cookies)
    #[must_use]
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Send only over HTTPS
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// The `Set-Cookie` header value
    #[must_use]
    pub fn header_value(&self) -> String {
        let mut out = format!(
            "{}={}",
            self.name.replace(['\r', '\n'], "-"),
            clean_attribute(&self.value)
        );

        match self.max_age {
            Some(seconds) if seconds > 0 => {
                let expires = chrono::TimeDelta::try_seconds(seconds)
                    .and_then(|delta| chrono::Utc::now().checked_add_signed(delta));
                if let Some(expires) = expires {
                    let _ = write!(out, "; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"));
                }
                let _ = write!(out, "; Max-Age={seconds}");
            }
            Some(_) => out.push_str("; Max-Age=0"),
            None => {}
        }

        if !self.path.is_empty() {
            let _ = write!(out, "; Path={}", clean_attribute(&self.path));
        }
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            let _ = write!(out, "; Domain={}", clean_attribute(domain));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }

        out
    }
}

fn clean_attribute(value: &str) -> String {
    value.replace(['\r', '\n', ';'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::FormFields;

    fn ctx(target: &str) -> Context {
        Context::new(Method::Get, target, HeaderMap::new())
    }

    fn with_header(target: &str, name: HeaderName, value: &'static str) -> Context {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        Context::new(Method::Get, target, headers)
    }

    #[test]
    fn test_query_parsing() {
        let c = ctx("/search?q=rust+lang&tag=a&tag=b&empty=");
        assert_eq!(c.path(), "/search");
        assert_eq!(c.query("q"), Some("rust lang"));
        assert_eq!(c.query_all("tag"), ["a", "b"]);
        assert_eq!(c.query("empty"), Some(""));
        assert_eq!(c.query("missing"), None);
        assert!(c.query_all("missing").is_empty());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let c = with_header("/", header::USER_AGENT, "test-agent");
        assert_eq!(c.header("User-Agent"), Some("test-agent"));
    }

    #[test]
    fn test_cookie_lookup() {
        let c = with_header("/", header::COOKIE, "lang=ru; session=\"abc\"; x=1");
        assert_eq!(c.cookie("lang"), Some("ru"));
        assert_eq!(c.cookie("session"), Some("abc"));
        assert_eq!(c.cookie("missing"), None);
    }

    #[test]
    fn test_finalize_defaults_to_ok() {
        let mut c = ctx("/");
        c.plain("hello");
        let response = c.finalize();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_PLAIN);
    }

    #[test]
    fn test_finalize_error_defaults_to_500() {
        let mut c = ctx("/");
        c.set_error(Error::handler("boom"));
        assert_eq!(c.finalize().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let mut c = ctx("/");
        c.error(StatusCode::NOT_FOUND, "missing");
        assert_eq!(c.output(), b"missing");
        assert_eq!(c.finalize().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_finalize_redirect_drops_body() {
        let mut c = ctx("/");
        c.write(b"ignored");
        c.redirect("/login", StatusCode::SEE_OTHER);
        assert!(c.is_redirect());

        let response = c.finalize();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[test]
    fn test_first_error_wins() {
        let mut c = ctx("/");
        c.set_error(Error::handler("first"));
        c.set_error(Error::handler("second"));
        assert!(c.error_value().unwrap().to_string().contains("first"));
    }

    #[test]
    fn test_gateway_timeout() {
        let mut c = ctx("/");
        c.gateway_timeout();
        assert_eq!(c.status(), Some(StatusCode::GATEWAY_TIMEOUT));
        assert!(c.error_value().is_some());
    }

    #[test]
    fn test_json_ascii_helper() {
        let mut c = ctx("/");
        c.json_ascii(&serde_json::json!({"name": "Ж"}));
        assert_eq!(c.output(), br#"{"name":"\u0416"}"#);
        assert_eq!(c.response_headers()[header::CONTENT_TYPE], APPLICATION_JSON);
    }

    #[test]
    fn test_render_without_engine_records_error() {
        let mut c = ctx("/");
        c.render("index", &serde_json::Value::Null);
        assert!(matches!(c.error_value(), Some(Error::Template { .. })));
    }

    #[test]
    fn test_invalid_header_is_ignored() {
        let mut c = ctx("/");
        c.set_header("bad header", "x");
        c.set_header("x-ok", "bad\nvalue");
        assert!(c.response_headers().is_empty());
    }

    #[test]
    fn test_cookie_header_defaults() {
        assert_eq!(Cookie::new("sid", "abc").header_value(), "sid=abc; Path=/");
    }

    #[test]
    fn test_cookie_header_sanitizes() {
        let cookie = Cookie::new("a\r\nb", "x;y\nz").path("/p;q").domain("ex\r.com");
        assert_eq!(
            cookie.header_value(),
            "a--b=x y z; Path=/p q; Domain=ex .com"
        );
    }

    #[test]
    fn test_cookie_header_attributes() {
        let header = Cookie::new("sid", "abc")
            .max_age(3600)
            .path("")
            .http_only(true)
            .secure(true)
            .header_value();
        assert!(header.starts_with("sid=abc; Expires="));
        assert!(header.contains(" GMT; Max-Age=3600"));
        assert!(header.ends_with("; HttpOnly; Secure"));
        assert!(!header.contains("Path="));

        let expired = Cookie::new("sid", "").max_age(0).header_value();
        assert_eq!(expired, "sid=; Max-Age=0; Path=/");
    }

    #[test]
    fn test_set_cookie_appends() {
        let mut c = ctx("/");
        c.set_cookie(&Cookie::new("a", "1"));
        c.set_cookie(&Cookie::new("b", "2"));
        assert_eq!(c.response_headers().get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn test_bind_form_body() {
        #[derive(serde::Deserialize)]
        struct Signup {
            name: String,
            age: u32,
            tags: Vec<String>,
        }

        let mut fields = FormFields::new();
        fields.insert("name".into(), vec!["Ann".into()]);
        fields.insert("age".into(), vec!["31".into()]);
        fields.insert("tags".into(), vec!["a".into(), "b".into()]);

        let mut c = ctx("/");
        c.set_body(Body::Form(fields), Bytes::new());

        let signup: Signup = c.bind().unwrap();
        assert_eq!(signup.name, "Ann");
        assert_eq!(signup.age, 31);
        assert_eq!(signup.tags, ["a", "b"]);
    }

    #[test]
    fn test_bind_json_body() {
        #[derive(serde::Deserialize)]
        struct Item {
            id: u64,
        }

        let raw = Bytes::from_static(br#"{"id": 9}"#);
        let mut c = ctx("/");
        c.set_body(Body::Json(serde_json::json!({"id": 9})), raw);
        assert_eq!(c.bind::<Item>().unwrap().id, 9);
    }

    #[test]
    fn test_translate_without_locale() {
        let c = ctx("/");
        assert_eq!(c.translate("greeting"), "greeting");
    }

    #[test]
    fn test_drop_removes_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload");
        std::fs::write(&path, b"data").unwrap();

        let mut c = ctx("/");
        c.set_body(
            Body::Multipart(
                FormFields::new(),
                vec![UploadedFile {
                    field_name: "f".into(),
                    file_name: None,
                    path: path.clone(),
                    size: 4,
                }],
            ),
            Bytes::new(),
        );
        drop(c);

        assert!(!path.exists());
    }

    #[test]
    fn test_release_uploads_clears_file_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload");
        std::fs::write(&path, b"data").unwrap();

        let mut c = ctx("/");
        c.set_body(
            Body::Multipart(
                FormFields::new(),
                vec![UploadedFile {
                    field_name: "f".into(),
                    file_name: Some("a.bin".into()),
                    path: path.clone(),
                    size: 4,
                }],
            ),
            Bytes::new(),
        );

        tokio_test::block_on(c.release_uploads());
        assert!(!path.exists());
        assert!(c.files().is_empty());
    }

    #[test]
    fn test_release_uploads_keeps_list_when_removal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stuck = dir.path().join("not-a-file");
        std::fs::create_dir(&stuck).unwrap();

        let mut c = ctx("/");
        c.set_body(
            Body::Multipart(
                FormFields::new(),
                vec![UploadedFile {
                    field_name: "f".into(),
                    file_name: None,
                    path: stuck.clone(),
                    size: 0,
                }],
            ),
            Bytes::new(),
        );

        tokio_test::block_on(c.release_uploads());
        assert_eq!(c.files().len(), 1);
        assert_eq!(c.files()[0].path, stuck);
    }
}
