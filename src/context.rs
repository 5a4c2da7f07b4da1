use crate::Error;
use log::warn;
use std::{
	collections::HashMap,
	fmt::{self, Display, Formatter},
	sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tokio::sync::watch;
use uuid::Uuid;

/// Opaque identity of one in-flight request.
///
/// Hosts that already track requests can insert their own `RequestId` into the request
/// extensions before dispatching; otherwise the router generates one. Identities must be unique
/// among requests that are in flight at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for RequestId {
	fn default() -> Self {
		Self::new()
	}
}

impl Display for RequestId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.0, f)
	}
}

/// Parameters extracted from the request path plus a cancellation signal, alive for the span of
/// a single handler invocation.
///
/// Clones share both the bindings and the signal.
#[derive(Debug, Clone)]
pub struct Context {
	params: Arc<HashMap<String, String>>,
	cancel: Arc<watch::Sender<bool>>,
}

impl Context {
	fn new<I>(bindings: I) -> Self
	where
		I: IntoIterator<Item = (String, String)>,
	{
		let (cancel, _) = watch::channel(false);
		Self {
			params: Arc::new(bindings.into_iter().collect()),
			cancel: Arc::new(cancel),
		}
	}

	/// Reads a bound parameter.
	///
	/// Fails with [`Error::MissingParameter`] if the route pattern does not declare `name`.
	pub fn param(&self, name: &str) -> Result<&str, Error> {
		self.params
			.get(name)
			.map(String::as_str)
			.ok_or_else(|| Error::MissingParameter(name.to_owned()))
	}

	pub fn params(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
		self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn is_cancelled(&self) -> bool {
		*self.cancel.borrow()
	}

	/// Resolves once the request this context belongs to has finished.
	pub async fn cancelled(&self) {
		let mut rx = self.cancel.subscribe();
		loop {
			let cancelled = *rx.borrow_and_update();
			// the sender outlives `self`, so `changed` only fails once nothing can cancel us
			if cancelled || rx.changed().await.is_err() {
				return;
			}
		}
	}

	pub(crate) fn cancel(&self) {
		self.cancel.send_replace(true);
	}
}

/// Maps in-flight requests to their [`Context`].
///
/// Lookups share the lock with each other; inserts and deletes take it exclusively. A store is
/// normally owned by the host and handed to the router through
/// [`RouterBuilder::store`](crate::RouterBuilder::store), so separate routers (and tests) can keep
/// separate stores.
#[derive(Debug, Default)]
pub struct ContextStore {
	entries: RwLock<HashMap<RequestId, Context>>,
}

impl ContextStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Allocates a fresh context seeded with `bindings` and registers it under `id`.
	pub fn create<I>(&self, id: RequestId, bindings: I) -> Context
	where
		I: IntoIterator<Item = (String, String)>,
	{
		let context = Context::new(bindings);
		if self.write().insert(id, context.clone()).is_some() {
			warn!("request {} was already in flight; its context has been replaced", id);
		}
		context
	}

	/// Returns the context registered for `id`, if that request is still being handled.
	pub fn lookup(&self, id: &RequestId) -> Option<Context> {
		self.read().get(id).cloned()
	}

	pub fn delete(&self, id: &RequestId) {
		self.write().remove(id);
	}

	pub fn len(&self) -> usize {
		self.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.read().is_empty()
	}

	/// Creates a context and ties its removal to the returned guard.
	pub(crate) fn enter<I>(self: &Arc<Self>, id: RequestId, bindings: I) -> Scope
	where
		I: IntoIterator<Item = (String, String)>,
	{
		let context = self.create(id, bindings);
		Scope {
			store: Arc::clone(self),
			id,
			context,
		}
	}

	// A panicking handler cannot leave the map half-written: every critical section is a single
	// insert, remove or read. Poisoning is therefore safe to ignore.
	fn read(&self) -> RwLockReadGuard<'_, HashMap<RequestId, Context>> {
		self.entries.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn write(&self) -> RwLockWriteGuard<'_, HashMap<RequestId, Context>> {
		self.entries.write().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Cancels and unregisters a request's context when dropped.
pub(crate) struct Scope {
	store: Arc<ContextStore>,
	id: RequestId,
	context: Context,
}

impl Scope {
	pub(crate) fn handle(&self) -> ContextHandle {
		ContextHandle {
			store: Arc::clone(&self.store),
			id: self.id,
		}
	}
}

impl Drop for Scope {
	fn drop(&mut self) {
		self.context.cancel();
		self.store.delete(&self.id);
	}
}

/// Request extension pointing handlers back at the store their context lives in.
#[derive(Clone)]
pub(crate) struct ContextHandle {
	store: Arc<ContextStore>,
	id: RequestId,
}

/// Returns the context of a request currently being handled by the router.
///
/// `None` outside the handler's span, or for requests that never went through a router.
pub fn context<B>(req: &hyper::Request<B>) -> Option<Context> {
	let handle = req.extensions().get::<ContextHandle>()?;
	handle.store.lookup(&handle.id)
}

/// Shorthand for reading one parameter of the current request.
///
/// A request without a context has no parameters, so this fails with
/// [`Error::MissingParameter`] as well.
pub fn param<B>(req: &hyper::Request<B>, name: &str) -> Result<String, Error> {
	match context(req) {
		Some(ctx) => ctx.param(name).map(str::to_owned),
		None => Err(Error::MissingParameter(name.to_owned())),
	}
}

pub fn request_id<B>(req: &hyper::Request<B>) -> Option<RequestId> {
	req.extensions().get::<RequestId>().copied()
}

#[cfg(test)]
mod test {
	use super::{context, param, ContextStore, RequestId};
	use crate::Error;
	use hyper::{Body, Request};
	use std::{sync::Arc, thread};

	fn bindings(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	#[test]
	fn creates_and_deletes() {
		let store = ContextStore::new();
		let id = RequestId::new();

		let ctx = store.create(id, bindings(&[("username", "foo")]));
		assert_eq!(ctx.param("username").unwrap(), "foo");
		assert_eq!(store.len(), 1);

		let found = store.lookup(&id).expect("context should be registered");
		assert_eq!(found.param("username").unwrap(), "foo");

		store.delete(&id);
		assert!(store.lookup(&id).is_none());
		assert!(store.is_empty());

		// deleting twice is harmless
		store.delete(&id);
	}

	#[test]
	fn unknown_ids_are_absent() {
		let store = ContextStore::new();
		store.create(RequestId::new(), bindings(&[]));
		assert!(store.lookup(&RequestId::new()).is_none());
	}

	#[test]
	fn missing_parameter() {
		let store = ContextStore::new();
		let ctx = store.create(RequestId::new(), bindings(&[("id", "1")]));

		match ctx.param("name") {
			Err(Error::MissingParameter(name)) => assert_eq!(name, "name"),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn scope_cancels_and_unregisters() {
		let store = Arc::new(ContextStore::new());
		let id = RequestId::new();

		let scope = store.enter(id, bindings(&[("a", "b")]));
		let ctx = store.lookup(&id).unwrap();
		assert!(!ctx.is_cancelled());

		drop(scope);
		assert!(ctx.is_cancelled());
		assert!(store.lookup(&id).is_none());
	}

	#[tokio::test]
	async fn cancelled_resolves_after_scope_ends() {
		let store = Arc::new(ContextStore::new());
		let id = RequestId::new();
		let scope = store.enter(id, bindings(&[]));
		let ctx = store.lookup(&id).unwrap();

		let waiter = tokio::spawn(async move { ctx.cancelled().await });
		drop(scope);
		waiter.await.unwrap();
	}

	#[test]
	fn request_helpers_follow_the_handle() {
		let store = Arc::new(ContextStore::new());
		let id = RequestId::new();
		let scope = store.enter(id, bindings(&[("user", "gordon")]));

		let mut req = Request::new(Body::empty());
		assert!(context(&req).is_none());
		assert!(matches!(param(&req, "user"), Err(Error::MissingParameter(_))));

		req.extensions_mut().insert(scope.handle());
		assert_eq!(param(&req, "user").unwrap(), "gordon");

		drop(scope);
		assert!(context(&req).is_none());
	}

	#[test]
	fn threads_see_only_their_own_bindings() {
		let store = Arc::new(ContextStore::new());

		let workers: Vec<_> = (0..32)
			.map(|i| {
				let store = Arc::clone(&store);
				thread::spawn(move || {
					let id = RequestId::new();
					let value = i.to_string();
					let scope = store.enter(id, vec![("n".to_string(), value.clone())]);
					for _ in 0..100 {
						let ctx = store.lookup(&id).unwrap();
						assert_eq!(ctx.param("n").unwrap(), value);
					}
					drop(scope);
				})
			})
			.collect();

		for worker in workers {
			worker.join().unwrap();
		}
		assert!(store.is_empty());
	}
}
