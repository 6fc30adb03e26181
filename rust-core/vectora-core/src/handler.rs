//! # Controllers and Handler Descriptors
//!
//! A controller is a user type exposing lifecycle hooks and a set of named
//! actions. Actions are resolved by name once, when the route is added; the
//! route table then stores a [`HandlerDescriptor`] holding a direct function
//! pointer to the action and a factory for fresh controller instances.
//!
//! ```ignore
//! #[derive(Default)]
//! struct Users;
//!
//! impl Users {
//!     fn show(&mut self, ctx: &mut Context) {
//!         let id = ctx.param("id").unwrap_or_default().to_string();
//!         ctx.plain(&id);
//!     }
//! }
//!
//! impl Controller for Users {
//!     fn create() -> Result<Self> {
//!         Ok(Self)
//!     }
//!
//!     fn action(name: &str) -> Option<Action<Self>> {
//!         match name {
//!             "show" => Some(Self::show),
//!             _ => None,
//!         }
//!     }
//! }
//! ```

use crate::context::Context;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// An action bound to controller `C`
pub type Action<C> = fn(&mut C, &mut Context);

/// Capability set every controller exposes
///
/// A new instance is created per request; hooks run in the order
/// `init`, `prepare`, (middleware), action, `finish`.
pub trait Controller: Send + Sized + 'static {
    /// Construct an instance for one request
    ///
    /// # Errors
    ///
    /// Any error is reported as a server fault (500).
    fn create() -> Result<Self>;

    /// Resolve an action by name
    fn action(name: &str) -> Option<Action<Self>>;

    /// Bind the request context
    fn init(&mut self, _ctx: &mut Context) {}

    /// Pre-filter; returning `false` skips middleware and the action
    fn prepare(&mut self, _ctx: &mut Context) -> bool {
        true
    }

    /// Post-filter; always runs once `init` has
    fn finish(&mut self, _ctx: &mut Context) {}
}

/// Object-safe view of a controller instance with its bound action
pub trait Handler: Send {
    /// See [`Controller::init`]
    fn init(&mut self, ctx: &mut Context);
    /// See [`Controller::prepare`]
    fn prepare(&mut self, ctx: &mut Context) -> bool;
    /// Call the bound action
    fn invoke(&mut self, ctx: &mut Context);
    /// See [`Controller::finish`]
    fn finish(&mut self, ctx: &mut Context);
}

struct Bound<C: Controller> {
    controller: C,
    action: Action<C>,
}

impl<C: Controller> Handler for Bound<C> {
    fn init(&mut self, ctx: &mut Context) {
        self.controller.init(ctx);
    }

    fn prepare(&mut self, ctx: &mut Context) -> bool {
        self.controller.prepare(ctx)
    }

    fn invoke(&mut self, ctx: &mut Context) {
        (self.action)(&mut self.controller, ctx);
    }

    fn finish(&mut self, ctx: &mut Context) {
        self.controller.finish(ctx);
    }
}

/// Reference to a controller type, carried in route options
#[derive(Clone, Copy)]
pub struct ControllerType {
    name: &'static str,
    bind: fn(&str) -> Option<HandlerDescriptor>,
}

impl ControllerType {
    /// Reference controller `C`
    #[must_use]
    pub fn of<C: Controller>() -> Self {
        Self {
            name: std::any::type_name::<C>(),
            bind: bind_action::<C>,
        }
    }

    /// Type name of the controller
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve `action` into a descriptor, `None` if the controller lacks it
    #[must_use]
    pub fn bind(&self, action: &str) -> Option<HandlerDescriptor> {
        (self.bind)(action)
    }
}

impl fmt::Debug for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ControllerType").field(&self.name).finish()
    }
}

fn bind_action<C: Controller>(name: &str) -> Option<HandlerDescriptor> {
    let action = C::action(name)?;
    let build = move || -> Result<Box<dyn Handler>> {
        let controller = C::create()?;
        Ok(Box::new(Bound { controller, action }))
    };

    Some(HandlerDescriptor {
        controller: std::any::type_name::<C>(),
        action: name.to_string(),
        build: Arc::new(build),
    })
}

type BuildFn = dyn Fn() -> Result<Box<dyn Handler>> + Send + Sync;

/// Resolved handler stored in the route table
#[derive(Clone)]
pub struct HandlerDescriptor {
    controller: &'static str,
    action: String,
    build: Arc<BuildFn>,
}

impl HandlerDescriptor {
    /// Controller type name
    #[must_use]
    pub fn controller(&self) -> &'static str {
        self.controller
    }

    /// Bound action name
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Create a fresh handler instance for one request
    ///
    /// # Errors
    ///
    /// Returns `Error::HandlerConstruction` if the controller fails to build.
    pub fn instantiate(&self) -> Result<Box<dyn Handler>> {
        (self.build)().map_err(|e| match e {
            Error::HandlerConstruction { .. } => e,
            other => Error::HandlerConstruction {
                handler: self.controller,
                reason: other.to_string(),
            },
        })
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("controller", &self.controller)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}
