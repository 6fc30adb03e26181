//! # Vectora Core
//!
//! Request routing and dispatch for controller-based web applications.
//!
//! ## Architecture
//!
//! Applications register routes on a [`Server`]. Each route binds an HTTP
//! method and a path pattern to a controller action. Every request gets a
//! fresh controller and a [`Context`] that carries the request in and the
//! response out:
//!
//! ```text
//! Server::serve -> dispatcher -> Router::match_route
//!                             -> body parsing (JSON, form, multipart)
//!                             -> init / prepare / middleware / action / finish
//!                             -> Context::finalize
//! ```
//!
//! ## Modules
//!
//! - `server` - HTTP server built on Hyper, route registration
//! - `router` - Route table and matching
//! - `route` - Route options, path patterns and parameters
//! - `handler` - Controller trait and per-request handler construction
//! - `context` - Per-request state and response helpers
//! - `body` - Request body parsing and upload staging
//! - `bind` - Typed binding of form fields
//! - `negotiate` - Content type and locale negotiation
//! - `middleware` - Named middleware chains
//! - `modules` - Shared application modules
//! - `collaborators` - Template, mail and localization seams
//! - `config` - TOML configuration
//! - `telemetry` - Tracing setup and fault reporting
//! - `json` - JSON parsing with simd-json
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bind;
pub mod body;
pub mod collaborators;
pub mod config;
pub mod context;
mod dispatcher;
pub mod error;
pub mod handler;
pub mod json;
pub mod middleware;
pub mod modules;
pub mod negotiate;
pub mod route;
pub mod router;
pub mod server;
pub mod telemetry;

pub use body::{Body, FormFields, UploadedFile};
pub use collaborators::{Localizer, Mail, Mailer, StaticLocalizer, TemplateEngine, Translator};
pub use config::{Config, LoggingConfig, ServerConfig};
pub use context::{Context, Cookie};
pub use dispatcher::REQUEST_ID_HEADER;
pub use error::{Error, Result};
pub use handler::{Action, Controller, ControllerType, Handler, HandlerDescriptor};
pub use middleware::{
    CorsMiddleware, LoggingMiddleware, Middleware, MiddlewareRegistry, MiddlewareResult,
    RateLimitMiddleware,
};
pub use modules::{Module, ModuleRegistry};
pub use route::{Params, RouteOptions, RoutePattern};
pub use router::{Method, Router};
pub use server::Server;
pub use telemetry::{init_tracing, FaultLog};

pub use hyper::StatusCode;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
