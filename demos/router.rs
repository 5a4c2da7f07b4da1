use subroute::{
	hyper::{Body, Server},
	param, Request, ResponseBuilder, Router,
};

async fn handler(req: Request) -> anyhow::Result<hyper::Response<Body>> {
	let res = ResponseBuilder::default();
	let username = param(&req, "username")?;
	Ok(res.body(format!("hello {}\n", username).into())?)
}

async fn other_handler(_req: Request) -> anyhow::Result<hyper::Response<Body>> {
	let res = ResponseBuilder::default();
	Ok(res.body(Body::empty())?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
	env_logger::init();
	let addr = ([127, 0, 0, 1], 3000).into();

	let router = Router::new();
	router.get("/", other_handler)?;
	router.get("/user/:username", handler)?;

	let api = router.with_prefix("/api");
	api.get("/user/:username", handler)?;
	api.post("/user/:username", handler)?;
	api.get("/static/*filepath", api.file_serve("."))?;

	let server = Server::bind(&addr).serve(router);
	println!("Listening on http://{}", addr);

	server.await?;
	Ok(())
}
