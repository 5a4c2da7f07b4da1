use crate::{Request, Router};
use hyper::{body::Body, service::Service};
use std::{
	convert::Infallible,
	future::{ready, Future, Ready},
	pin::Pin,
	task::{Context, Poll},
};

pub use hyper;

pub use hyper::http::response::Builder as ResponseBuilder;

/// Hands every new connection a [`RouteHandler`] sharing this router's routes.
impl<T> Service<T> for Router {
	type Response = RouteHandler;
	type Error = Infallible;
	type Future = Ready<Result<Self::Response, Self::Error>>;

	fn poll_ready(&mut self, _: &mut Context) -> Poll<Result<(), Self::Error>> {
		Poll::Ready(Ok(()))
	}

	fn call(&mut self, _: T) -> Self::Future {
		ready(Ok(RouteHandler {
			router: self.clone(),
		}))
	}
}

/// Responsible for handling the actual HTTP requests from hyper.
#[derive(Clone, Debug)]
pub struct RouteHandler {
	router: Router,
}

impl Service<Request> for RouteHandler {
	type Response = hyper::Response<Body>;
	type Error = Infallible;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		Poll::Ready(Ok(()))
	}

	fn call(&mut self, req: Request) -> Self::Future {
		let router = self.router.clone();
		Box::pin(async move { Ok(router.dispatch(req).await) })
	}
}

#[cfg(test)]
mod test {
	use crate::{param, Request, ResponseBuilder, Router};
	use anyhow::Result;
	use hyper::{service::Service, Body, Method, Response, StatusCode};

	async fn hello(req: Request) -> Result<Response<Body>> {
		let name = param(&req, "name")?;
		Ok(ResponseBuilder::default()
			.status(200)
			.body(format!("hello {}", name).into())?)
	}

	#[tokio::test]
	async fn serves_through_tower_services() {
		let mut router = Router::new();
		router.get("/hello/:name", hello).unwrap();

		let mut handler = router.call(()).await.unwrap();
		let req = hyper::Request::builder()
			.method(Method::GET)
			.uri("/hello/world")
			.body(Body::empty())
			.unwrap();

		let res = handler.call(req).await.unwrap();
		assert_eq!(res.status(), StatusCode::OK);
		let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
		assert_eq!(&body[..], b"hello world");
	}
}
