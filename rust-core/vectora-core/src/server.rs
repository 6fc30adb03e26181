//! # HTTP Server
//!
//! Route registration and the HTTP/1 listener built on Hyper and Tokio.
//!
//! Routes, middleware chains and modules are registered on a [`Server`]
//! value before [`Server::serve`] consumes it. Serving freezes everything
//! into a shared dispatcher; every connection runs on its own task.
//!
//! Ctrl-C stops accepting connections and waits up to the configured
//! shutdown timeout for in-flight connections to finish.

use crate::collaborators::{Localizer, Mailer, StaticLocalizer, TemplateEngine};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::middleware::{Middleware, MiddlewareRegistry};
use crate::modules::{Module, ModuleRegistry};
use crate::route::RouteOptions;
use crate::router::{Method, Router};
use crate::telemetry::FaultLog;
use http_body_util::Full;
use hyper::body::{Body as HttpBody, Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// HTTP server and route table
pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
}

impl Server {
    /// Create a server with no routes
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let dispatcher = Dispatcher {
            router: Router::new(),
            middleware: MiddlewareRegistry::new(),
            modules: Arc::new(ModuleRegistry::new()),
            templates: None,
            localizer: Arc::new(StaticLocalizer::new(config.supported_locales.iter().cloned())),
            faults: FaultLog::new(config.error_timeout()),
            default_locale: config.default_locale.clone(),
            max_body_bytes: config.max_body_bytes,
            tmp_dir: config.tmp_dir.clone(),
        };
        Self { config, dispatcher }
    }

    /// Server configuration
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registered routes
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.dispatcher.router
    }

    /// Register a route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn route(&mut self, method: Method, pattern: &str, options: RouteOptions) -> Result<()> {
        self.dispatcher.router.add(method, pattern, options)
    }

    /// Register a GET route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn get(&mut self, pattern: &str, options: RouteOptions) -> Result<()> {
        self.route(Method::Get, pattern, options)
    }

    /// Register a POST route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn post(&mut self, pattern: &str, options: RouteOptions) -> Result<()> {
        self.route(Method::Post, pattern, options)
    }

    /// Register a PUT route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn put(&mut self, pattern: &str, options: RouteOptions) -> Result<()> {
        self.route(Method::Put, pattern, options)
    }

    /// Register a DELETE route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn delete(&mut self, pattern: &str, options: RouteOptions) -> Result<()> {
        self.route(Method::Delete, pattern, options)
    }

    /// Register an OPTIONS route
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn options(&mut self, pattern: &str, options: RouteOptions) -> Result<()> {
        self.route(Method::Options, pattern, options)
    }

    /// Add every route of a separately built table
    ///
    /// # Errors
    ///
    /// Fails on the first route that collides with one already registered.
    pub fn mount(&mut self, routes: &Router) -> Result<()> {
        routes.copy_into(&mut self.dispatcher.router)
    }

    /// Append units to a middleware chain, creating it if needed
    pub fn middleware<I>(&mut self, chain: &str, units: I)
    where
        I: IntoIterator<Item = Arc<dyn Middleware>>,
    {
        self.dispatcher.middleware.register_all(chain, units);
    }

    /// Append one unit to a middleware chain
    pub fn use_middleware<M: Middleware + 'static>(&mut self, chain: &str, unit: M) {
        self.dispatcher.middleware.register(chain, unit);
    }

    /// Initialize and register a shared module
    ///
    /// # Errors
    ///
    /// Whatever the module's `init` returns.
    pub fn register_module<M: Module>(&mut self, name: &str, module: M) -> Result<()> {
        Arc::make_mut(&mut self.dispatcher.modules).register(name, module)
    }

    /// Registered module
    #[must_use]
    pub fn module<M: Module>(&self, name: &str) -> Option<Arc<M>> {
        self.dispatcher.modules.get(name)
    }

    /// Use a template engine for `Context::render`
    #[must_use]
    pub fn with_templates(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.dispatcher.templates = Some(engine);
        self
    }

    /// Replace the default localizer
    ///
    /// The default supports the configured locales with empty catalogs.
    #[must_use]
    pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self {
        self.dispatcher.localizer = localizer;
        self
    }

    /// Mail fault reports to the configured `admin_email`
    #[must_use]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        match &self.config.admin_email {
            Some(admin) => {
                self.dispatcher.faults =
                    FaultLog::new(self.config.error_timeout()).with_mailer(mailer, admin.clone());
            }
            None => warn!("Mailer configured without admin_email, fault reports stay in the log"),
        }
        self
    }

    /// Run one request through the full lifecycle without a socket
    pub async fn dispatch<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: HttpBody<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.dispatcher.dispatch(request, None).await
    }

    /// Bind and serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unusable host and `Error::BindError`
    /// if the listener cannot be set up.
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.address()?;
        let listener = bind(addr).map_err(|source| Error::BindError {
            address: addr.to_string(),
            source,
        })?;

        if let Err(e) = tokio::fs::create_dir_all(&self.config.tmp_dir).await {
            warn!(dir = %self.config.tmp_dir.display(), error = %e, "Cannot create upload directory");
        }

        info!(routes = self.dispatcher.router.len(), "Server listening on http://{}", addr);

        let dispatcher = Arc::new(self.dispatcher);
        let active = Arc::new(AtomicUsize::new(0));
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = match accept_result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);

                    let dispatcher = dispatcher.clone();
                    let active = active.clone();

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);

                        let service = service_fn(move |req: Request<Incoming>| {
                            let dispatcher = dispatcher.clone();
                            async move {
                                let method = req.method().clone();
                                let path = req.uri().path().to_string();
                                let version = req.version();

                                let response = dispatcher.dispatch(req, Some(remote_addr)).await;

                                info!("    {} - \"{} {} {:?}\" {}",
                                    remote_addr,
                                    method,
                                    path,
                                    version,
                                    response.status().as_u16()
                                );
                                Ok::<_, Infallible>(response)
                            }
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("Error serving connection: {:?}", err);
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let timeout = self.config.shutdown_timeout();
        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                connections = active.load(Ordering::Relaxed),
                "Shutdown timeout reached with connections still open"
            );
        }
        info!("Server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("routes", &self.dispatcher.router.len())
            .finish_non_exhaustive()
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(not(windows))]
    {
        socket.set_reuseport(true)?;
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
