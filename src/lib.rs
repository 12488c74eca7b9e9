//! # Trellis
//!
//! Controller routing with module-scoped dependency injection.
//!
//! Applications are assembled from modules. A module declares providers,
//! controllers, the tokens it imports and the tokens it exports; the
//! container resolves providers across modules (waiting on async factories
//! when needed), instantiates each controller and binds its routes. Requests
//! then flow through middleware, guards and the handler, with errors handed
//! to exception filters.
//!
//! ## Features
//!
//! - **Path schemas**: static, `:param`, `:param(num)`, `:param(str)`,
//!   `:param(<regex>)`, optional `:param?` segments and raw regex routes
//! - **Route precedence**: static before parameterized, restricted before
//!   open, optional routes last
//! - **Dependency Injection**: class, instance, factory, value and alias
//!   providers with import/export visibility and cycle detection
//! - **Request pipeline**: object or callback middleware, guards and scoped
//!   exception filters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trellis::prelude::*;
//!
//! struct UserService;
//!
//! impl Injectable for UserService {
//!     fn inject(_: &Args) -> trellis::Result<Self> {
//!         Ok(UserService)
//!     }
//! }
//!
//! impl UserService {
//!     fn find_one(&self, id: &str) -> String {
//!         format!("user {id}")
//!     }
//! }
//!
//! struct UserController {
//!     users: Arc<UserService>,
//! }
//!
//! impl Injectable for UserController {
//!     fn dependencies() -> Vec<Dependency> {
//!         vec![Dependency::class::<UserService>(0)]
//!     }
//!
//!     fn inject(args: &Args) -> trellis::Result<Self> {
//!         Ok(UserController { users: args.get(0)? })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> trellis::Result<()> {
//!     let users = ControllerDescriptor::<UserController>::new("/users").get(
//!         "/:id(num)",
//!         "find_one",
//!         Handler::sync(|c: &UserController, req, _| {
//!             Ok(c.users.find_one(req.param("id").unwrap_or_default()))
//!         }),
//!     );
//!
//!     let app = Application::builder()
//!         .module(
//!             ModuleDefinition::new("AppModule")
//!                 .root()
//!                 .provider(Provider::class::<UserService>())
//!                 .controller(users),
//!         )
//!         .build()
//!         .await?;
//!
//!     app.listen("0.0.0.0:3000").await?;
//!     Ok(())
//! }
//! ```

pub mod common;
pub mod config;
pub mod controller;
pub mod di;
pub mod dispatcher;
pub mod error;
pub mod exception;
pub mod guard;
pub mod lifecycle;
pub mod middleware;
pub mod module;
pub mod routing;

// Re-export core types
pub use common::{Reply, Request, Response};
pub use di::{Injectable, Provider, ProviderToken, TransferRegistry};
pub use error::{HandlerError, HandlerResult, Result, TrellisError};
pub use lifecycle::{Application, ApplicationBuilder};
pub use module::{Module, ModuleDefinition};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::common::{Reply, Request, Response};
    pub use crate::config::{AppConfig, ConfigService};
    pub use crate::controller::{ControllerDescriptor, Handler, RouteDefinition};
    pub use crate::di::{
        Args, Dependencies, Dependency, FactoryOutput, Injectable, Provider, ProviderToken,
    };
    pub use crate::error::{HandlerError, HandlerResult, Result, TrellisError};
    pub use crate::exception::{
        catch_type, ArgumentsHost, ExceptionFilter, HttpException, HttpExceptionFilter,
    };
    pub use crate::guard::{guard_fn, Guard, GuardError, GuardResult};
    pub use crate::lifecycle::{Application, ApplicationBuilder, ServerEvent};
    pub use crate::middleware::{Middleware, MiddlewareInvocable, Next};
    pub use crate::module::{Module, ModuleDefinition};
    pub use crate::routing::HttpMethod;
    pub use async_trait::async_trait;
    pub use axum::http::StatusCode;
}
