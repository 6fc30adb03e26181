//! # Error Handling
//!
//! Centralized error types for Vectora core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Errors fall into four families:
//!
//! - **registration** (`DuplicateRoute`, `InvalidHandler`, `InvalidRoutePattern`):
//!   raised by `Router::add` at startup, never while serving
//! - **malformed request** (`MalformedRequest`, `PayloadTooLarge`): answered with 400
//! - **resource fault** (`Upload`, `HandlerConstruction`): answered with 500
//!   and logged through the deduplicating fault log
//! - **handler** (`Handler`, `Template`, `Json`): set by application code on the context

use crate::router::Method;
use hyper::StatusCode;
use thiserror::Error;

/// Result type alias for Vectora operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Vectora runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A route with the same method and literal pattern already exists
    #[error("Route path already in use: '{method}'->'{pattern}'")]
    DuplicateRoute {
        /// HTTP method of the route
        method: Method,
        /// Literal pattern string
        pattern: String,
    },

    /// The controller does not expose the requested action
    #[error("Action not found for '{method}'->'{pattern}': '{action}'")]
    InvalidHandler {
        /// HTTP method of the route
        method: Method,
        /// Literal pattern string
        pattern: String,
        /// Name of the missing action
        action: String,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// The request could not be understood (bad content type, undecodable body)
    #[error("Malformed request: {reason}")]
    MalformedRequest {
        /// What was wrong with it
        reason: String,
    },

    /// Request payload exceeded the configured limit
    #[error("Payload too large: limit={limit} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: u64,
    },

    /// Staging an uploaded file to disk failed
    #[error("Upload staging failed: {source}")]
    Upload {
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The controller could not be instantiated for a request
    #[error("Failed to construct handler {handler}: {reason}")]
    HandlerConstruction {
        /// Controller type name
        handler: &'static str,
        /// Why construction failed
        reason: String,
    },

    /// Error raised by application code inside an action
    #[error("Handler error: {message}")]
    Handler {
        /// Error message
        message: String,
    },

    /// Template rendering failed
    #[error("Template error in '{template}': {reason}")]
    Template {
        /// Template name
        template: String,
        /// Reason reported by the engine
        reason: String,
    },

    /// Mail delivery failed
    #[error("Mail error: {reason}")]
    Mail {
        /// Reason reported by the transport
        reason: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {reason}")]
    Config {
        /// What went wrong
        reason: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a `MalformedRequest` error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }

    /// Shorthand for a `Handler` error
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// HTTP status the error maps to when it terminates a request
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest { .. } | Self::PayloadTooLarge { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable short code for the error kind, used to deduplicate fault logs
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BindError { .. } => "bind",
            Self::DuplicateRoute { .. } => "duplicate_route",
            Self::InvalidHandler { .. } => "invalid_handler",
            Self::InvalidRoutePattern { .. } => "invalid_route_pattern",
            Self::MalformedRequest { .. } => "malformed_request",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Upload { .. } => "upload",
            Self::HandlerConstruction { .. } => "handler_construction",
            Self::Handler { .. } => "handler",
            Self::Template { .. } => "template",
            Self::Mail { .. } => "mail",
            Self::Config { .. } => "config",
            Self::Json(_) => "json",
        }
    }
}
