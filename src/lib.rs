//! A prefix-composable HTTP router built on hyper.
//!
//! ```no_run
//! use subroute::{param, Body, Request, ResponseBuilder, Router};
//!
//! async fn user(req: Request) -> anyhow::Result<hyper::Response<Body>> {
//! 	let name = param(&req, "username")?;
//! 	Ok(ResponseBuilder::default().body(format!("hello {}", name).into())?)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! 	let addr = ([127, 0, 0, 1], 3000).into();
//! 	let router = Router::new();
//! 	router.get("/user/:username", user)?;
//!
//! 	let api = router.with_prefix("/api");
//! 	api.get("/user/:username", user)?;
//! 	api.get("/static/*filepath", api.file_serve("./public"))?;
//!
//! 	hyper::Server::bind(&addr).serve(router).await?;
//! 	Ok(())
//! }
//! ```
//!
//! Patterns use `:name` for a single path segment and a trailing `*name` for the rest of the
//! path. Handlers keep the plain `Fn(Request) -> Future` shape; the parameters of the current
//! request are read through [`context`] and [`param`], which are only populated while the
//! handler runs.
//!
//! Every router created with [`Router::with_prefix`] shares the same route table, so conflicting
//! registrations are rejected no matter which sub-router they go through.

/// Per-request parameter contexts and the store that tracks them.
pub mod context;

/// Serving directories through a catch-all route.
pub mod fs;

/// Various types and utilities for defining routes and route handlers.
pub mod route;

/// Contains the core structs of the router.
pub mod router;

mod error;
mod http;

pub use context::{context, param, request_id, Context, ContextStore, RequestId};
pub use error::Error;
pub use fs::FileServer;
pub use http::*;
pub use route::{Body, Method, Params, Request, Response, Route, StatusCode};
pub use router::*;
