//! Forking concurrent work from inside a scope.
//!
//! Tokio tasks and OS threads never inherit the ambient context on their own:
//! a task spawned with plain `tokio::spawn` cannot open a scope at all. The
//! helpers here pick one of two explicit policies.
//!
//! * `*_suppressed` runs the forked work on a fresh call chain with no
//!   ambient scope. Scopes it opens become independent roots.
//! * [`spawn_with_ambient`] starts the task at the creator's ambient scope, so
//!   scopes it opens join the creator's unit of work. The creator must keep
//!   its scope open until the task is done; otherwise the task reports
//!   [`ScopeError::OrphanedParentScope`](crate::ScopeError::OrphanedParentScope).
//!
//! Outside a Tokio runtime the async and blocking helpers fall back to a
//! small process-wide runtime.

use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

use crate::context::AmbientContext;

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static FALLBACK_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = FALLBACK_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("ambit-scope-fallback")
			.build()
			.expect("failed to build ambit-scope fallback tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task on a fresh call chain with no ambient scope.
pub fn spawn_suppressed<F>(fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	let context = AmbientContext::current().map(|c| c.suppressed());
	tracing::trace!(has_context = context.is_some(), "scope.spawn_suppressed");
	match context {
		Some(context) => runtime_handle().spawn(context.run(fut)),
		None => runtime_handle().spawn(fut),
	}
}

/// Spawns blocking work on a fresh call chain with no ambient scope.
pub fn spawn_blocking_suppressed<F, R>(f: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let context = AmbientContext::current().map(|c| c.suppressed());
	tracing::trace!(has_context = context.is_some(), "scope.spawn_blocking_suppressed");
	runtime_handle().spawn_blocking(move || match context {
		Some(context) => context.run_sync(f),
		None => f(),
	})
}

/// Spawns a dedicated OS thread on a fresh call chain with no ambient scope.
pub fn spawn_thread_suppressed<F, R>(f: F) -> std::thread::JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let context = AmbientContext::current().map(|c| c.suppressed());
	tracing::trace!(has_context = context.is_some(), "scope.spawn_thread_suppressed");
	std::thread::spawn(move || match context {
		Some(context) => context.run_sync(f),
		None => f(),
	})
}

/// Spawns an async task that starts at the creator's ambient scope.
///
/// The task gets its own slot seeded with the creator's ambient scope id.
/// Scopes it opens join the creator's unit of work and share its resources.
pub fn spawn_with_ambient<F>(fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	let context = AmbientContext::current().map(|c| c.mirrored());
	tracing::trace!(
		ambient = ?context.as_ref().and_then(AmbientContext::ambient_id).map(crate::ScopeId::get),
		"scope.spawn_with_ambient"
	);
	match context {
		Some(context) => runtime_handle().spawn(context.run(fut)),
		None => runtime_handle().spawn(fut),
	}
}
