use crate::{
	context::param,
	route::{Request, Response},
	Error,
};
use futures_util::stream;
use hyper::{body::HttpBody, Body, Uri};
use std::path::Path;
use tower::ServiceExt;
use tower_http::services::ServeDir;

/// Name of the catch-all parameter a file route must declare, as in `/static/*filepath`.
pub const FILEPATH_PARAM: &str = "filepath";

/// Serves files below a root directory, addressed by the `filepath` parameter of the current
/// request.
#[derive(Clone, Debug)]
pub struct FileServer {
	dir: ServeDir,
}

impl FileServer {
	pub fn new(root: impl AsRef<Path>) -> Self {
		Self {
			dir: ServeDir::new(root),
		}
	}

	pub fn serve(&self, req: Request) -> Response {
		let dir = self.dir.clone();
		Box::pin(async move {
			let req = rewrite(req)?;
			let res = match dir.oneshot(req).await {
				Ok(res) => res,
				Err(infallible) => match infallible {},
			};

			// forward chunks as `ServeDir` reads them instead of buffering the whole file
			let (parts, body) = res.into_parts();
			let chunks = stream::unfold(Box::pin(body), |mut body| async move {
				body.data().await.map(|chunk| (chunk, body))
			});
			Ok(hyper::Response::from_parts(parts, Body::wrap_stream(chunks)))
		})
	}
}

/// Replaces the request path with the bound `filepath`, keeping the query string.
fn rewrite(mut req: Request) -> Result<Request, Error> {
	let filepath = param(&req, FILEPATH_PARAM)?;
	let path = if filepath.starts_with('/') {
		filepath
	} else {
		format!("/{}", filepath)
	};
	let path_and_query = match req.uri().query() {
		Some(query) => format!("{}?{}", path, query),
		None => path,
	};

	*req.uri_mut() = path_and_query.parse::<Uri>()?;
	Ok(req)
}

#[cfg(test)]
mod test {
	use super::rewrite;
	use crate::{Error, Request, Router};
	use hyper::{body::HttpBody, Body, Method, StatusCode};
	use std::{fs, path::PathBuf};
	use uuid::Uuid;

	fn temp_root() -> PathBuf {
		let root = std::env::temp_dir().join(format!("subroute-fs-{}", Uuid::new_v4()));
		fs::create_dir_all(root.join("img")).unwrap();
		fs::write(root.join("img").join("a.png"), b"not really a png").unwrap();
		fs::write(root.join("index.html"), b"<h1>hi</h1>").unwrap();
		root
	}

	fn get(uri: &str) -> Request {
		hyper::Request::builder()
			.method(Method::GET)
			.uri(uri)
			.body(Body::empty())
			.unwrap()
	}

	#[test]
	fn rewrite_needs_a_context() {
		assert!(matches!(rewrite(get("/static/a")), Err(Error::MissingParameter(_))));
	}

	#[tokio::test]
	async fn serves_files_under_root() {
		let root = temp_root();
		let router = Router::new();
		router
			.get("/static/*filepath", router.file_serve(&root))
			.unwrap();

		let res = router.dispatch(get("/static/img/a.png?v=2")).await;
		assert_eq!(res.status(), StatusCode::OK);
		let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
		assert_eq!(&body[..], b"not really a png");

		let res = router.dispatch(get("/static/img/missing.png")).await;
		assert_eq!(res.status(), StatusCode::NOT_FOUND);
		assert!(router.store().is_empty());

		fs::remove_dir_all(root).unwrap();
	}

	#[tokio::test]
	async fn empty_filepath_serves_root_index() {
		let root = temp_root();
		let router = Router::new();
		router
			.get("/static/*filepath", router.file_serve(&root))
			.unwrap();

		let res = router.dispatch(get("/static/")).await;
		assert_eq!(res.status(), StatusCode::OK);
		let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
		assert_eq!(&body[..], b"<h1>hi</h1>");

		fs::remove_dir_all(root).unwrap();
	}

	#[tokio::test]
	async fn large_files_arrive_in_chunks() {
		let root = temp_root();
		let contents: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
		fs::write(root.join("big.bin"), &contents).unwrap();

		let router = Router::new();
		router
			.get("/static/*filepath", router.file_serve(&root))
			.unwrap();

		let res = router.dispatch(get("/static/big.bin")).await;
		assert_eq!(res.status(), StatusCode::OK);

		let mut body = res.into_body();
		let mut received = Vec::new();
		let mut chunks = 0;
		while let Some(chunk) = body.data().await {
			received.extend_from_slice(&chunk.unwrap());
			chunks += 1;
		}
		assert!(chunks > 1, "expected a streamed body, got {} chunk", chunks);
		assert_eq!(received, contents);

		fs::remove_dir_all(root).unwrap();
	}

	#[tokio::test]
	async fn file_route_without_catch_all_fails() {
		let root = temp_root();
		let router = Router::new();
		router.get("/files/:name", router.file_serve(&root)).unwrap();

		let res = router.dispatch(get("/files/index.html")).await;
		assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

		fs::remove_dir_all(root).unwrap();
	}
}
