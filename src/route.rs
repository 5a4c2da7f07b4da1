use crate::context::{ContextStore, RequestId};
use anyhow::Result;
pub use hyper::{Body, Method, StatusCode};
use std::{future::Future, pin::Pin, sync::Arc};

pub type Request = hyper::Request<Body>;
pub type Response = Pin<Box<dyn Future<Output = Result<hyper::Response<Body>>> + Send>>;

/// Path parameters extracted by the matcher, in pattern order.
pub type Params = Vec<(String, String)>;

/// A handler as stored in the route table: it receives the extracted parameters alongside the
/// request.
pub type Route = Arc<dyn Fn(Params, Request) -> Response + Send + Sync>;

/// Wraps a user handler so every invocation runs inside its own request context.
///
/// The context is registered before `handler` is called and removed when the returned future
/// completes or is dropped, including when the handler panics.
pub(crate) fn scoped<H, F>(store: Arc<ContextStore>, handler: H) -> Route
where
	H: Fn(Request) -> F + Send + Sync + 'static,
	F: Future<Output = Result<hyper::Response<Body>>> + Send + 'static,
{
	Arc::new(move |params: Params, mut req: Request| -> Response {
		let id = match req.extensions().get::<RequestId>().copied() {
			Some(id) => id,
			None => {
				let id = RequestId::new();
				req.extensions_mut().insert(id);
				id
			}
		};

		let scope = store.enter(id, params);
		req.extensions_mut().insert(scope.handle());

		let fut = handler(req);
		Box::pin(async move {
			let _scope = scope;
			fut.await
		})
	})
}
