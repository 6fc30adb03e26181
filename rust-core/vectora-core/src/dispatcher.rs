//! # Request Dispatcher
//!
//! Runs one request through the lifecycle:
//!
//! ```text
//! normalize -> route -> negotiate -> localize -> construct handler
//!   -> parse body -> init -> prepare -> middleware -> action
//!   -> finish -> release uploads -> finalize
//! ```
//!
//! Early exits:
//!
//! | step              | condition                                   | status |
//! |-------------------|---------------------------------------------|--------|
//! | normalize         | path ends with `/` (not root)               | 301    |
//! | route             | unknown method or no matching pattern       | 404    |
//! | negotiate         | body with malformed or unexpected type      | 400    |
//! | construct handler | controller fails to build                   | 500    |
//! | parse body        | undecodable, oversized or parser panic      | 400    |
//! | parse body        | staging an upload fails                     | 500    |
//!
//! A `false` from `prepare` skips middleware and the action; a halting
//! middleware skips the action. `finish`, upload release and finalize run
//! in both cases.

use crate::body::{self, BodyLimits};
use crate::collaborators::{Localizer, TemplateEngine};
use crate::context::Context;
use crate::error::Error;
use crate::middleware::MiddlewareRegistry;
use crate::modules::ModuleRegistry;
use crate::negotiate;
use crate::router::{Match, Method, Router};
use crate::telemetry::FaultLog;
use futures_util::FutureExt;
use http_body_util::Full;
use hyper::body::{Body as HttpBody, Bytes};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Routing, middleware and collaborators shared by all requests
///
/// Filled during registration; read-only once serving starts.
pub(crate) struct Dispatcher {
    pub(crate) router: Router,
    pub(crate) middleware: MiddlewareRegistry,
    pub(crate) modules: Arc<ModuleRegistry>,
    pub(crate) templates: Option<Arc<dyn TemplateEngine>>,
    pub(crate) localizer: Arc<dyn Localizer>,
    pub(crate) faults: FaultLog,
    pub(crate) default_locale: String,
    pub(crate) max_body_bytes: u64,
    pub(crate) tmp_dir: PathBuf,
}

impl Dispatcher {
    /// Handle one request; always produces a response
    pub(crate) async fn dispatch<B>(
        &self,
        request: Request<B>,
        remote: Option<SocketAddr>,
    ) -> Response<Full<Bytes>>
    where
        B: HttpBody<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|id| !id.is_empty())
            .map_or_else(generate_request_id, str::to_string);

        let mut response = self.run(request, remote, &request_id).await;

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }

    async fn run<B>(
        &self,
        request: Request<B>,
        remote: Option<SocketAddr>,
        request_id: &str,
    ) -> Response<Full<Bytes>>
    where
        B: HttpBody<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        if let Some(stripped) = path.strip_suffix('/').filter(|p| !p.is_empty()) {
            // A leading `//` would make the location protocol-relative
            let mut location = format!("/{}", stripped.trim_start_matches(|c| c == '/' || c == '\\'));
            if let Some(query) = parts.uri.query() {
                location.push('?');
                location.push_str(query);
            }
            debug!(request_id, from = %path, to = %location, "Redirecting trailing slash");
            return redirect_response(&location);
        }

        let Some(method) = Method::from_hyper(&parts.method) else {
            debug!(request_id, method = %parts.method, "Unsupported method");
            return status_response(StatusCode::NOT_FOUND);
        };
        let Some(Match { params, entry }) = self.router.match_route(method, &path) else {
            return status_response(StatusCode::NOT_FOUND);
        };
        let options = &entry.options;

        let content_type_header = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let has_body = declares_body(&parts.headers, &body);

        let media_type = match negotiate::media_type(content_type_header.as_deref()) {
            Ok(media_type) => media_type,
            Err(e) if has_body => {
                debug!(request_id, error = %e, "Rejecting request");
                return status_response(StatusCode::BAD_REQUEST);
            }
            Err(_) => None,
        };
        if has_body {
            if let Some(expected) = options.content_type.as_deref() {
                if !negotiate::media_type_matches(expected, media_type.as_deref()) {
                    debug!(
                        request_id,
                        expected,
                        declared = media_type.as_deref().unwrap_or("-"),
                        "Content type mismatch"
                    );
                    return status_response(StatusCode::BAD_REQUEST);
                }
            }
        }

        let target = parts
            .uri
            .path_and_query()
            .map_or_else(|| path.clone(), |pq| pq.as_str().to_string());
        let mut ctx = Context::new(method, &target, parts.headers);

        if options.i18n {
            let locale = negotiate::resolve_locale(
                ctx.cookie("lang"),
                ctx.header("accept-language"),
                self.localizer.as_ref(),
                &self.default_locale,
            );
            let translator = self.localizer.translator(&locale);
            ctx.set_locale(locale, translator);
        }

        let mut handler = match entry.handler.instantiate() {
            Ok(handler) => handler,
            Err(e) => {
                self.faults.report(&e);
                return status_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        ctx.set_params(params);
        ctx.set_action(entry.handler.action());
        ctx.set_timeout(options.effective_timeout());
        ctx.set_request_id(request_id.to_string());
        ctx.set_remote_addr(remote);
        ctx.set_templates(self.templates.clone());
        ctx.set_modules(self.modules.clone());
        ctx.set_content_type(media_type.clone());

        let limits = BodyLimits {
            method,
            media_type: media_type.as_deref(),
            content_type_header: content_type_header.as_deref(),
            max_bytes: if options.max_body_bytes > 0 {
                options.max_body_bytes
            } else {
                self.max_body_bytes
            },
            staging_dir: &self.tmp_dir,
        };

        match AssertUnwindSafe(body::parse_body(limits, body))
            .catch_unwind()
            .await
        {
            Ok(Ok((parsed, raw))) => ctx.set_body(parsed, raw),
            Ok(Err(e)) => {
                let status = e.status();
                if status.is_server_error() {
                    self.faults.report(&e);
                } else {
                    debug!(request_id, error = %e, "Rejecting request body");
                }
                return status_response(status);
            }
            Err(_) => {
                error!(request_id, path = %path, "Body parser panicked");
                return status_response(StatusCode::BAD_REQUEST);
            }
        }

        let chain = options.middleware_group.as_deref().unwrap_or_default();
        let lifecycle = std::panic::catch_unwind(AssertUnwindSafe(|| {
            handler.init(&mut ctx);
            if handler.prepare(&mut ctx) {
                if self.middleware.run(chain, &mut ctx) {
                    handler.invoke(&mut ctx);
                }
            } else {
                debug!(request_id, "Pre-filter stopped request");
            }
            handler.finish(&mut ctx);
        }));
        drop(handler);

        ctx.release_uploads().await;

        if lifecycle.is_err() {
            self.faults.report(&Error::handler(format!(
                "controller {} panicked in '{}'",
                entry.handler.controller(),
                entry.handler.action()
            )));
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }

        if let Some(e) = ctx.error_value() {
            warn!(request_id, path = %path, error = %e, "Request finished with error");
        }
        ctx.finalize()
    }
}

/// Whether the request carries a body: a positive `Content-Length`, or no
/// length and a stream that is not already finished
fn declares_body<B: HttpBody>(headers: &HeaderMap, body: &B) -> bool {
    match headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        Some(length) => length > 0,
        None => !body.is_end_stream(),
    }
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn redirect_response(location: &str) -> Response<Full<Bytes>> {
    let Ok(value) = HeaderValue::from_str(location) else {
        return status_response(StatusCode::BAD_REQUEST);
    };
    let mut response = status_response(StatusCode::MOVED_PERMANENTLY);
    response.headers_mut().insert(header::LOCATION, value);
    response
}

fn generate_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
