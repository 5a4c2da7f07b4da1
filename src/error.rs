use hyper::{http::uri::InvalidUri, Method};
use thiserror::Error;

/// Errors raised while registering routes or reading request parameters.
#[derive(Debug, Error)]
pub enum Error {
	/// The pattern is ambiguous with one already registered for the same method.
	#[error("cannot register {method} {path}: {source}")]
	RouteConflict {
		method: Method,
		path: String,
		#[source]
		source: matchit::InsertError,
	},

	/// The handler asked for a parameter its route pattern does not bind.
	#[error("missing route parameter `{0}`")]
	MissingParameter(String),

	/// A rewritten request path could not be turned back into a URI.
	#[error("invalid request path: {0}")]
	InvalidPath(#[from] InvalidUri),
}
