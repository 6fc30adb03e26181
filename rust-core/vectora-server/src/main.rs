//! # Vectora Server
//!
//! Standalone binary serving a small demo application.
//!
//! ```text
//! vectora [config.toml]
//! ```
//!
//! Without an argument `vectora.toml` in the working directory is used; a
//! missing file falls back to built-in defaults.

use anyhow::Context as _;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use vectora_core::{
    init_tracing, Action, Context, Controller, Cookie, CorsMiddleware, LoggingMiddleware,
    Middleware, RateLimitMiddleware, RouteOptions, Server, ServerConfig, StaticLocalizer,
    StatusCode,
};

const DEFAULT_CONFIG: &str = "vectora.toml";

#[derive(Debug, Deserialize)]
struct Signup {
    name: String,
    age: u32,
    #[serde(default)]
    tags: Vec<String>,
}

/// Demo controller
struct Site;

impl Site {
    fn index(&mut self, ctx: &mut Context) {
        ctx.plain("Vectora is running\n");
    }

    fn hello(&mut self, ctx: &mut Context) {
        let name = ctx.param("name").unwrap_or("stranger").to_string();
        let greeting = ctx.translate("hello");
        let locale = ctx.locale().unwrap_or_default().to_string();

        ctx.set_cookie(&Cookie::new("lang", locale.as_str()).max_age(86_400).http_only(true));
        ctx.json(&serde_json::json!({ "greeting": greeting, "name": name, "locale": locale }));
    }

    fn echo(&mut self, ctx: &mut Context) {
        match ctx.body().json().cloned() {
            Some(value) => ctx.json(&value),
            None => ctx.error(StatusCode::BAD_REQUEST, "expected a JSON body"),
        }
    }

    fn signup(&mut self, ctx: &mut Context) {
        match ctx.bind::<Signup>() {
            Ok(form) => {
                info!(name = %form.name, age = form.age, tags = form.tags.len(), "Signup");
                ctx.set_status(StatusCode::CREATED);
                ctx.json(&serde_json::json!({ "welcome": form.name }));
            }
            Err(e) => ctx.error(StatusCode::BAD_REQUEST, &e.to_string()),
        }
    }

    fn upload(&mut self, ctx: &mut Context) {
        let files: Vec<_> = ctx
            .files()
            .iter()
            .map(|f| serde_json::json!({ "field": f.field_name, "name": f.file_name, "size": f.size }))
            .collect();
        ctx.json(&serde_json::json!({ "files": files }));
    }

    fn old_home(&mut self, ctx: &mut Context) {
        ctx.redirect("/", StatusCode::MOVED_PERMANENTLY);
    }
}

impl Controller for Site {
    fn create() -> vectora_core::Result<Self> {
        Ok(Self)
    }

    fn action(name: &str) -> Option<Action<Self>> {
        match name {
            "index" => Some(Self::index),
            "hello" => Some(Self::hello),
            "echo" => Some(Self::echo),
            "signup" => Some(Self::signup),
            "upload" => Some(Self::upload),
            "old_home" => Some(Self::old_home),
            _ => None,
        }
    }

    fn prepare(&mut self, ctx: &mut Context) -> bool {
        ctx.set_header("x-powered-by", "vectora");
        true
    }
}

fn load_config(path: &Path) -> anyhow::Result<ServerConfig> {
    if path.exists() {
        ServerConfig::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        Ok(ServerConfig::default())
    }
}

fn build(config: ServerConfig) -> anyhow::Result<Server> {
    let localizer = StaticLocalizer::new(config.supported_locales.iter().cloned())
        .with_catalog("en", [("hello", "Hello")])
        .with_catalog("ru", [("hello", "Привет")])
        .with_catalog("de", [("hello", "Hallo")]);

    let mut server = Server::new(config).with_localizer(Arc::new(localizer));

    server.middleware(
        "api",
        [
            Arc::new(LoggingMiddleware::new()) as Arc<dyn Middleware>,
            Arc::new(CorsMiddleware::new()),
            Arc::new(RateLimitMiddleware::new(100, 10)),
        ],
    );

    server.get("/", RouteOptions::new::<Site>("index"))?;
    server.get("/home", RouteOptions::new::<Site>("old_home"))?;
    server.get("/hello/:name", RouteOptions::new::<Site>("hello").localized())?;
    server.post(
        "/api/echo",
        RouteOptions::new::<Site>("echo")
            .middleware("api")
            .content_type("application/json"),
    )?;
    server.options("/api/echo", RouteOptions::new::<Site>("echo").middleware("api"))?;
    server.post("/signup", RouteOptions::new::<Site>("signup"))?;
    server.post(
        "/upload",
        RouteOptions::new::<Site>("upload")
            .middleware("api")
            .max_body_bytes(8 * 1024 * 1024),
    )?;

    Ok(server)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = load_config(Path::new(&path))?;

    init_tracing(&config.logging);
    if !Path::new(&path).exists() {
        warn!(path = %path, "Config file not found, using defaults");
    }
    info!(version = vectora_core::VERSION, "Starting Vectora");

    let server = build(config)?;
    server.serve().await?;
    Ok(())
}
