use crate::{
	context::ContextStore,
	fs::FileServer,
	route::{scoped, Params, Request, Response, Route},
	Error,
};
use hyper::{
	body::Body,
	header::{HeaderValue, ALLOW, LOCATION},
	Method, StatusCode,
};
use log::{debug, error, trace};
use matchit::MatchError;
use std::{
	collections::HashMap,
	fmt::{self, Debug, Formatter},
	future::Future,
	path::Path,
	sync::{Arc, PoisonError, RwLock},
};

/// A function that can convert an error into a response.
pub type InternalErrorHandler = fn(e: anyhow::Error) -> hyper::Response<Body>;
fn default_error_handler(e: anyhow::Error) -> hyper::Response<Body> {
	with_status(StatusCode::INTERNAL_SERVER_ERROR, Body::from(e.to_string()))
}

/// A function that handles unroutable requests and creates a response.
pub type NotFoundHandler = fn(req: Request) -> hyper::Response<Body>;
fn default_not_found_handler(_req: Request) -> hyper::Response<Body> {
	with_status(StatusCode::NOT_FOUND, Body::empty())
}

/// A function that handles requests whose path is only registered under other methods.
///
/// The allowed methods are also sent in the `Allow` header of the default response.
pub type MethodNotAllowedHandler = fn(req: Request, allowed: &[Method]) -> hyper::Response<Body>;
fn default_method_not_allowed_handler(_req: Request, allowed: &[Method]) -> hyper::Response<Body> {
	let mut res = with_status(StatusCode::METHOD_NOT_ALLOWED, Body::empty());
	if let Some(allow) = allow_header(allowed) {
		res.headers_mut().insert(ALLOW, allow);
	}
	res
}

fn with_status(status: StatusCode, body: Body) -> hyper::Response<Body> {
	let mut res = hyper::Response::new(body);
	*res.status_mut() = status;
	res
}

fn allow_header(allowed: &[Method]) -> Option<HeaderValue> {
	let joined = allowed
		.iter()
		.map(Method::as_str)
		.collect::<Vec<_>>()
		.join(", ");
	HeaderValue::from_str(&joined).ok()
}

struct Settings {
	internal_error: InternalErrorHandler,
	not_found: NotFoundHandler,
	method_not_allowed: MethodNotAllowedHandler,
	redirect_trailing_slash: bool,
	handle_method_not_allowed: bool,
	handle_options: bool,
}

/// Configures a [`Router`] before any routes are registered.
pub struct RouterBuilder {
	store: Option<Arc<ContextStore>>,
	internal_error_handler: Option<InternalErrorHandler>,
	not_found_handler: Option<NotFoundHandler>,
	method_not_allowed_handler: Option<MethodNotAllowedHandler>,
	redirect_trailing_slash: bool,
	handle_method_not_allowed: bool,
	handle_options: bool,
}

impl Default for RouterBuilder {
	fn default() -> Self {
		Self {
			store: None,
			internal_error_handler: None,
			not_found_handler: None,
			method_not_allowed_handler: None,
			redirect_trailing_slash: true,
			handle_method_not_allowed: true,
			handle_options: true,
		}
	}
}

impl RouterBuilder {
	/// Shares an existing context store instead of creating a private one.
	pub fn store(mut self, store: Arc<ContextStore>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn internal_error_handler(mut self, handler: InternalErrorHandler) -> Self {
		self.internal_error_handler = Some(handler);
		self
	}

	pub fn not_found_handler(mut self, handler: NotFoundHandler) -> Self {
		self.not_found_handler = Some(handler);
		self
	}

	pub fn method_not_allowed_handler(mut self, handler: MethodNotAllowedHandler) -> Self {
		self.method_not_allowed_handler = Some(handler);
		self
	}

	/// Redirect `/foo/` to `/foo` (and the other way around) when only the other form is
	/// registered. GET requests get a 301, everything else a 308.
	pub fn redirect_trailing_slash(mut self, enabled: bool) -> Self {
		self.redirect_trailing_slash = enabled;
		self
	}

	/// Answer with 405 instead of 404 when the path is registered under other methods.
	pub fn handle_method_not_allowed(mut self, enabled: bool) -> Self {
		self.handle_method_not_allowed = enabled;
		self
	}

	/// Answer OPTIONS requests automatically when no OPTIONS route matches.
	pub fn handle_options(mut self, enabled: bool) -> Self {
		self.handle_options = enabled;
		self
	}

	pub fn build(self) -> Router {
		Router {
			table: Arc::default(),
			prefix: String::new(),
			store: self.store.unwrap_or_default(),
			settings: Arc::new(Settings {
				internal_error: self.internal_error_handler.unwrap_or(default_error_handler),
				not_found: self.not_found_handler.unwrap_or(default_not_found_handler),
				method_not_allowed: self
					.method_not_allowed_handler
					.unwrap_or(default_method_not_allowed_handler),
				redirect_trailing_slash: self.redirect_trailing_slash,
				handle_method_not_allowed: self.handle_method_not_allowed,
				handle_options: self.handle_options,
			}),
		}
	}
}

enum Lookup {
	Found(Route, Params),
	Redirect(String),
	Options(Vec<Method>),
	NotAllowed(Vec<Method>),
	NotFound,
}

#[derive(Default)]
struct RouteTable {
	routes: HashMap<Method, matchit::Router<Route>>,
}

impl RouteTable {
	fn insert(&mut self, method: Method, path: String, route: Route) -> Result<(), Error> {
		self.routes
			.entry(method.clone())
			.or_default()
			.insert(path.clone(), route)
			.map_err(|source| Error::RouteConflict {
				method,
				path,
				source,
			})
	}

	fn find(&self, method: &Method, path: &str, settings: &Settings) -> Lookup {
		if let Some(matcher) = self.routes.get(method) {
			match matcher.at(path) {
				Ok(matched) => {
					let params = matched
						.params
						.iter()
						.map(|(k, v)| (k.to_owned(), v.to_owned()))
						.collect();
					return Lookup::Found(Arc::clone(matched.value), params);
				}
				Err(MatchError::ExtraTrailingSlash) if settings.redirect_trailing_slash => {
					let trimmed = path.strip_suffix('/').unwrap_or(path);
					return Lookup::Redirect(trimmed.to_owned());
				}
				Err(MatchError::MissingTrailingSlash) if settings.redirect_trailing_slash => {
					return Lookup::Redirect(format!("{}/", path));
				}
				Err(_) => {}
			}
		}

		let allowed = self.allowed(path, method);
		if allowed.is_empty() {
			Lookup::NotFound
		} else if *method == Method::OPTIONS && settings.handle_options {
			Lookup::Options(allowed)
		} else if settings.handle_method_not_allowed {
			Lookup::NotAllowed(allowed)
		} else {
			Lookup::NotFound
		}
	}

	/// Methods other than `except` that have a route matching `path`, in a stable order.
	fn allowed(&self, path: &str, except: &Method) -> Vec<Method> {
		let mut allowed: Vec<Method> = self
			.routes
			.iter()
			.filter(|(method, matcher)| *method != except && matcher.at(path).is_ok())
			.map(|(method, _)| method.clone())
			.collect();

		if !allowed.is_empty() && !allowed.contains(&Method::OPTIONS) {
			allowed.push(Method::OPTIONS);
		}
		allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
		allowed
	}
}

/// Maps requests to handlers by method and path.
///
/// Clones and sub-routers created with [`Router::with_prefix`] share the same route table and
/// context store, so routes registered through any of them are visible to all.
#[derive(Clone)]
pub struct Router {
	table: Arc<RwLock<RouteTable>>,
	prefix: String,
	store: Arc<ContextStore>,
	settings: Arc<Settings>,
}

impl Default for Router {
	fn default() -> Self {
		RouterBuilder::default().build()
	}
}

impl Debug for Router {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Router")
			.field("prefix", &self.prefix)
			.field("store", &self.store)
			.finish()
	}
}

impl Router {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn builder() -> RouterBuilder {
		RouterBuilder::default()
	}

	/// Returns a router that registers every route under `prefix`, appended to this router's own
	/// prefix.
	///
	/// Prefixes are concatenated as-is: `with_prefix("/a/")` followed by `get("/b", ..)`
	/// registers `/a//b`.
	pub fn with_prefix(&self, prefix: &str) -> Self {
		Self {
			table: Arc::clone(&self.table),
			prefix: format!("{}{}", self.prefix, prefix),
			store: Arc::clone(&self.store),
			settings: Arc::clone(&self.settings),
		}
	}

	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	pub fn store(&self) -> &Arc<ContextStore> {
		&self.store
	}

	/// Registers `handler` for `method` at this router's prefix followed by `path`.
	///
	/// Patterns may contain named parameters (`/user/:name`) and a trailing catch-all
	/// (`/static/*filepath`). Fails with [`Error::RouteConflict`] when the pattern is ambiguous
	/// with one already registered for the same method.
	pub fn register<H, F>(&self, method: Method, path: &str, handler: H) -> Result<&Self, Error>
	where
		H: Fn(Request) -> F + Send + Sync + 'static,
		F: Future<Output = anyhow::Result<hyper::Response<Body>>> + Send + 'static,
	{
		let path = format!("{}{}", self.prefix, path);
		let route = scoped(Arc::clone(&self.store), handler);

		let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
		table.insert(method.clone(), path.clone(), Arc::clone(&route))?;
		debug!("registered {} {}", method, path);

		// `/static/*filepath` should also answer `/static/`, with `filepath` bound to ""
		if let Some((parent, name)) = split_catch_all(&path) {
			let name = name.to_owned();
			let bare: Route = Arc::new(move |mut params: Params, req: Request| -> Response {
				params.push((name.clone(), String::new()));
				route(params, req)
			});
			match table.insert(method.clone(), parent.to_owned(), bare) {
				Ok(()) => debug!("registered {} {} for {}", method, parent, path),
				Err(e) => debug!("{} {} keeps its own route: {}", method, parent, e),
			}
		}
		Ok(self)
	}

	/// Returns a handler serving files below `root`.
	///
	/// Equivalent to `FileServer::new(root)`; the router itself is not involved.
	///
	/// The route it is registered under must end in a `*filepath` catch-all; the handler fails
	/// with [`Error::MissingParameter`] otherwise.
	pub fn file_serve(
		&self,
		root: impl AsRef<Path>,
	) -> impl Fn(Request) -> Response + Send + Sync + 'static {
		let server = FileServer::new(root);
		move |req| server.serve(req)
	}

	/// Routes a single request.
	///
	/// Unmatched requests are answered by the configured not-found, method-not-allowed or
	/// automatic OPTIONS handling. Errors returned by handlers are turned into responses by the
	/// internal error handler; panics are not caught.
	pub async fn dispatch(&self, req: Request) -> hyper::Response<Body> {
		let method = req.method().clone();
		let path = req.uri().path().to_owned();

		match self.lookup(&method, &path) {
			Lookup::Found(route, params) => {
				trace!("{} {} matched with {} params", method, path, params.len());
				match route(params, req).await {
					Ok(res) => res,
					Err(e) => {
						error!("handler for {} {} failed: {:#}", method, path, e);
						(self.settings.internal_error)(e)
					}
				}
			}
			Lookup::Redirect(location) => {
				trace!("{} {} redirected to {}", method, path, location);
				match redirect(&req, &location) {
					Some(res) => res,
					None => (self.settings.not_found)(req),
				}
			}
			Lookup::Options(allowed) => {
				let mut res = with_status(StatusCode::NO_CONTENT, Body::empty());
				if let Some(allow) = allow_header(&allowed) {
					res.headers_mut().insert(ALLOW, allow);
				}
				res
			}
			Lookup::NotAllowed(allowed) => {
				trace!("{} {} not allowed", method, path);
				(self.settings.method_not_allowed)(req, &allowed)
			}
			Lookup::NotFound => {
				trace!("{} {} not found", method, path);
				(self.settings.not_found)(req)
			}
		}
	}

	fn lookup(&self, method: &Method, path: &str) -> Lookup {
		self.table
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.find(method, path, &self.settings)
	}
}

/// Splits `/static/*filepath` into `/static/` and `filepath`.
fn split_catch_all(path: &str) -> Option<(&str, &str)> {
	let idx = path.rfind("/*")?;
	let name = &path[idx + 2..];
	if name.is_empty() || name.contains('/') {
		return None;
	}
	Some((&path[..=idx], name))
}

/// Builds a 301/308 to `path`, or `None` if `path` cannot be sent as a `Location` header.
fn redirect(req: &Request, path: &str) -> Option<hyper::Response<Body>> {
	let location = match req.uri().query() {
		Some(query) => format!("{}?{}", path, query),
		None => path.to_owned(),
	};
	let status = if req.method() == Method::GET {
		StatusCode::MOVED_PERMANENTLY
	} else {
		StatusCode::PERMANENT_REDIRECT
	};

	let location = HeaderValue::from_str(&location).ok()?;
	let mut res = with_status(status, Body::empty());
	res.headers_mut().insert(LOCATION, location);
	Some(res)
}

macro_rules! method_routes {
	($($(#[$doc:meta])* $name:ident => $method:ident),* $(,)?) => {
		impl Router {
			$(
				$(#[$doc])*
				pub fn $name<H, F>(&self, path: &str, handler: H) -> Result<&Self, Error>
				where
					H: Fn(Request) -> F + Send + Sync + 'static,
					F: Future<Output = anyhow::Result<hyper::Response<Body>>> + Send + 'static,
				{
					self.register(Method::$method, path, handler)
				}
			)*
		}
	};
}

method_routes! {
	/// Registers a new GET route.
	get => GET,
	/// Registers a new HEAD route.
	head => HEAD,
	/// Registers a new OPTIONS route.
	options => OPTIONS,
	/// Registers a new POST route.
	post => POST,
	/// Registers a new PUT route.
	put => PUT,
	/// Registers a new PATCH route.
	patch => PATCH,
	/// Registers a new DELETE route.
	delete => DELETE,
}
