use std::any::TypeId;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex};

use crate::error::{Result, ScopeError};
use crate::resource::{CommitPermit, ErasedResource, OpenMode, Resource, ResourceTable};

/// One opened resource, locked independently of the rest of the collection.
///
/// The reentrant lock lets the owning thread reach other resources (or the
/// scope API) while this one is lent out; reaching this same resource again
/// from inside fails with [`ScopeError::ResourceBusy`].
struct OpenResource {
	kind: &'static str,
	state: ReentrantMutex<RefCell<ResourceState>>,
}

struct ResourceState {
	resource: Box<dyn ErasedResource>,
	closed: bool,
}

impl OpenResource {
	fn new(kind: &'static str, resource: Box<dyn ErasedResource>) -> Self {
		Self {
			kind,
			state: ReentrantMutex::new(RefCell::new(ResourceState { resource, closed: false })),
		}
	}

	fn access<T>(&self, f: impl FnOnce(&mut ResourceState) -> T) -> Result<T> {
		let guard = self.state.lock();
		let mut state = guard.try_borrow_mut().map_err(|_| ScopeError::ResourceBusy { kind: self.kind })?;
		Ok(f(&mut state))
	}
}

impl ResourceState {
	fn close(&mut self, kind: &'static str) {
		if std::mem::replace(&mut self.closed, true) {
			return;
		}
		if let Err(error) = self.resource.close() {
			tracing::warn!(kind, error = %error, "collection.close_failed");
		}
	}
}

/// Resources owned by one unit of work.
///
/// Created by a root scope and shared by every scope that joins it. Handles
/// are opened lazily, one per resource kind, and committed in the order they
/// were first opened.
pub(crate) struct ResourceCollection {
	mode: OpenMode,
	table: ResourceTable,
	open: Mutex<IndexMap<TypeId, Arc<OpenResource>>>,
	commit_blocked: AtomicBool,
	guard_disabled: AtomicBool,
	closed: AtomicBool,
}

/// Re-arms the direct-commit guard on every exit path.
struct GuardBypass<'a> {
	flag: &'a AtomicBool,
}

impl<'a> GuardBypass<'a> {
	fn engage(flag: &'a AtomicBool) -> Self {
		flag.store(true, Ordering::Release);
		Self { flag }
	}
}

impl Drop for GuardBypass<'_> {
	fn drop(&mut self) {
		self.flag.store(false, Ordering::Release);
	}
}

impl ResourceCollection {
	pub fn open(mode: OpenMode, table: ResourceTable) -> Self {
		tracing::trace!(mode = mode.as_str(), kinds = table.len(), "collection.open");
		Self {
			mode,
			table,
			open: Mutex::new(IndexMap::new()),
			commit_blocked: AtomicBool::new(false),
			guard_disabled: AtomicBool::new(false),
			closed: AtomicBool::new(false),
		}
	}

	pub fn mode(&self) -> OpenMode {
		self.mode
	}

	pub fn opened_for_writing(&self) -> bool {
		self.mode.is_write()
	}

	pub fn is_commit_blocked(&self) -> bool {
		self.commit_blocked.load(Ordering::Acquire)
	}

	pub fn block_commit(&self) {
		self.commit_blocked.store(true, Ordering::Release);
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	/// Number of resources opened so far.
	pub fn open_count(&self) -> usize {
		self.open.lock().len()
	}

	/// Returns the handle for `R`, opening the resource on first request.
	pub fn handle<R: Resource>(self: &Arc<Self>) -> Result<ResourceHandle<R>> {
		let kind = std::any::type_name::<R>();
		let mut open = self.open.lock();
		if self.is_closed() {
			return Err(ScopeError::ResourceReleased { kind });
		}

		let type_id = TypeId::of::<R>();
		if !open.contains_key(&type_id) {
			let resource = self
				.table
				.open(type_id, self.mode)
				.ok_or(ScopeError::UnknownResource { kind })?
				.map_err(|e| ScopeError::resource(kind, e))?;
			tracing::trace!(kind, mode = self.mode.as_str(), "collection.resource_opened");
			open.insert(type_id, Arc::new(OpenResource::new(kind, resource)));
		}

		Ok(ResourceHandle {
			collection: Arc::clone(self),
			_kind: PhantomData,
		})
	}

	/// Commits every open resource with the direct-commit guard disabled.
	///
	/// Stops at the first failing resource.
	pub fn commit_as_root(&self) -> Result<()> {
		let _bypass = GuardBypass::engage(&self.guard_disabled);
		self.commit_all()
	}

	fn commit_all(&self) -> Result<()> {
		let entries: Vec<_> = {
			let open = self.open.lock();
			if self.is_closed() {
				return Ok(());
			}
			open.values().cloned().collect()
		};
		for entry in entries {
			entry.access(|state| {
				if state.closed {
					return Ok(());
				}
				state
					.resource
					.commit(CommitPermit::new())
					.map_err(|e| ScopeError::resource(entry.kind, e))
			})??;
			tracing::trace!(kind = entry.kind, "collection.resource_committed");
		}
		Ok(())
	}

	/// Releases every open resource. Later calls do nothing.
	///
	/// A resource that fails to close is logged and the rest are still closed.
	/// A resource lent out on this thread is closed when its borrower returns.
	pub fn close(&self) {
		let drained = {
			let mut open = self.open.lock();
			if self.closed.swap(true, Ordering::AcqRel) {
				return;
			}
			std::mem::take(&mut *open)
		};

		let count = drained.len();
		for (_, entry) in drained {
			if entry.access(|state| state.close(entry.kind)).is_err() {
				tracing::debug!(kind = entry.kind, "collection.close_deferred");
			}
		}
		tracing::trace!(count, "collection.closed");
	}

	fn entry<R: Resource>(&self, kind: &'static str) -> Result<Arc<OpenResource>> {
		let open = self.open.lock();
		if self.is_closed() {
			return Err(ScopeError::ResourceReleased { kind });
		}
		open.get(&TypeId::of::<R>()).cloned().ok_or(ScopeError::ResourceReleased { kind })
	}

	fn with_resource<R: Resource, T>(&self, f: impl FnOnce(&mut R) -> T) -> Result<T> {
		let kind = std::any::type_name::<R>();
		let entry = self.entry::<R>(kind)?;
		entry.access(|state| {
			if state.closed {
				return Err(ScopeError::ResourceReleased { kind });
			}
			let resource = state
				.resource
				.as_any_mut()
				.downcast_mut::<R>()
				.ok_or(ScopeError::ResourceReleased { kind })?;
			let out = f(resource);
			if self.is_closed() {
				state.close(kind);
			}
			Ok(out)
		})?
	}

	fn commit_one<R: Resource>(&self) -> Result<()> {
		let kind = std::any::type_name::<R>();
		if !self.guard_disabled.load(Ordering::Acquire) {
			tracing::debug!(kind, "collection.direct_commit_blocked");
			return Err(ScopeError::DirectCommitBlocked { kind });
		}

		// The running root commit covers every open resource.
		self.entry::<R>(kind).map(|_| ())
	}
}

impl Drop for ResourceCollection {
	fn drop(&mut self) {
		self.close();
	}
}

/// Access to one resource of the ambient unit of work.
///
/// The resource itself is only lent out inside [`ResourceHandle::with`];
/// committing it is reserved for the root scope.
pub struct ResourceHandle<R> {
	collection: Arc<ResourceCollection>,
	_kind: PhantomData<fn() -> R>,
}

impl<R> Clone for ResourceHandle<R> {
	fn clone(&self) -> Self {
		Self {
			collection: Arc::clone(&self.collection),
			_kind: PhantomData,
		}
	}
}

impl<R> std::fmt::Debug for ResourceHandle<R> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResourceHandle")
			.field("kind", &std::any::type_name::<R>())
			.field("mode", &self.collection.mode())
			.field("released", &self.collection.is_closed())
			.finish()
	}
}

impl<R: Resource> ResourceHandle<R> {
	/// Runs `f` with exclusive access to the resource.
	///
	/// Other resources and the scope API stay usable from inside `f`.
	/// Reaching this same resource again from inside fails with
	/// [`ScopeError::ResourceBusy`].
	pub fn with<T>(&self, f: impl FnOnce(&mut R) -> T) -> Result<T> {
		self.collection.with_resource(f)
	}

	/// Attempts to commit this resource directly.
	///
	/// Fails with [`ScopeError::DirectCommitBlocked`] unless the owning root
	/// scope is committing; use [`Scope::request_commit`](crate::Scope::request_commit).
	pub fn commit(&self) -> Result<()> {
		self.collection.commit_one::<R>()
	}

	/// Mode the resource was opened with.
	pub fn mode(&self) -> OpenMode {
		self.collection.mode()
	}

	/// Returns true once the owning root scope has released the resource.
	pub fn is_released(&self) -> bool {
		self.collection.is_closed()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;
	use crate::error::ResourceError;

	#[derive(Default)]
	struct Counters {
		opened: AtomicUsize,
		committed: AtomicUsize,
		closed: AtomicUsize,
	}

	struct Tracked {
		counters: Arc<Counters>,
		fail_close: bool,
		rows: Vec<u32>,
	}

	impl Resource for Tracked {
		fn commit(&mut self, _permit: CommitPermit<'_>) -> std::result::Result<(), ResourceError> {
			self.counters.committed.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}

		fn close(&mut self) -> std::result::Result<(), ResourceError> {
			self.counters.closed.fetch_add(1, Ordering::SeqCst);
			if self.fail_close { Err(ResourceError::new("close refused")) } else { Ok(()) }
		}
	}

	struct Other(Arc<Counters>);

	impl Resource for Other {
		fn commit(&mut self, _permit: CommitPermit<'_>) -> std::result::Result<(), ResourceError> {
			self.0.committed.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}

		fn close(&mut self) -> std::result::Result<(), ResourceError> {
			self.0.closed.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	fn collection(counters: &Arc<Counters>, fail_close: bool) -> Arc<ResourceCollection> {
		let mut table = ResourceTable::new();
		let c = Arc::clone(counters);
		table.register(move |_| {
			c.opened.fetch_add(1, Ordering::SeqCst);
			Ok(Tracked {
				counters: Arc::clone(&c),
				fail_close,
				rows: Vec::new(),
			})
		});
		let c = Arc::clone(counters);
		table.register(move |_| Ok(Other(Arc::clone(&c))));
		Arc::new(ResourceCollection::open(OpenMode::Write, table))
	}

	#[test]
	fn handles_open_lazily_once_per_kind() {
		let counters = Arc::new(Counters::default());
		let collection = collection(&counters, false);
		assert_eq!(collection.open_count(), 0);

		let a = collection.handle::<Tracked>().unwrap();
		let b = collection.handle::<Tracked>().unwrap();
		a.with(|t| t.rows.push(1)).unwrap();
		b.with(|t| t.rows.push(2)).unwrap();

		assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
		assert_eq!(a.with(|t| t.rows.clone()).unwrap(), vec![1, 2]);
	}

	#[test]
	fn direct_commit_is_blocked() {
		let counters = Arc::new(Counters::default());
		let collection = collection(&counters, false);
		let handle = collection.handle::<Tracked>().unwrap();

		assert!(matches!(handle.commit(), Err(ScopeError::DirectCommitBlocked { .. })));
		assert_eq!(counters.committed.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn root_commit_commits_each_open_kind_and_rearms_guard() {
		let counters = Arc::new(Counters::default());
		let collection = collection(&counters, false);
		let handle = collection.handle::<Tracked>().unwrap();
		collection.handle::<Other>().unwrap();

		collection.commit_as_root().unwrap();
		assert_eq!(counters.committed.load(Ordering::SeqCst), 2);
		assert!(matches!(handle.commit(), Err(ScopeError::DirectCommitBlocked { .. })));
	}

	#[test]
	fn unknown_kind_is_reported() {
		let collection = Arc::new(ResourceCollection::open(OpenMode::Read, ResourceTable::new()));
		assert!(matches!(collection.handle::<Other>(), Err(ScopeError::UnknownResource { .. })));
	}

	#[test]
	fn close_is_idempotent_and_survives_failures() {
		let counters = Arc::new(Counters::default());
		let collection = collection(&counters, true);
		let handle = collection.handle::<Tracked>().unwrap();
		collection.handle::<Other>().unwrap();

		collection.close();
		collection.close();

		assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
		assert!(handle.is_released());
		assert!(matches!(handle.with(|_| ()), Err(ScopeError::ResourceReleased { .. })));
		assert!(matches!(collection.handle::<Tracked>(), Err(ScopeError::ResourceReleased { .. })));
	}

	#[test]
	fn nested_access_to_another_kind_does_not_block() {
		let counters = Arc::new(Counters::default());
		let collection = collection(&counters, false);
		let tracked = collection.handle::<Tracked>().unwrap();

		let nested = tracked
			.with(|t| {
				t.rows.push(7);
				let other = collection.handle::<Other>().unwrap();
				other.with(|o| Arc::ptr_eq(&o.0, &counters)).unwrap()
			})
			.unwrap();

		assert!(nested);
		assert_eq!(collection.open_count(), 2);
	}

	#[test]
	fn reentering_the_same_kind_reports_busy() {
		let counters = Arc::new(Counters::default());
		let collection = collection(&counters, false);
		let outer = collection.handle::<Tracked>().unwrap();
		let inner = outer.clone();

		let nested = outer.with(|_| inner.with(|t| t.rows.len())).unwrap();
		assert!(matches!(nested, Err(ScopeError::ResourceBusy { .. })));
		assert_eq!(inner.with(|t| t.rows.len()).unwrap(), 0);
	}

	#[test]
	fn root_commit_from_inside_a_borrow_reports_busy() {
		let counters = Arc::new(Counters::default());
		let collection = collection(&counters, false);
		let tracked = collection.handle::<Tracked>().unwrap();

		let committed = tracked.with(|_| collection.commit_as_root()).unwrap();
		assert!(matches!(committed, Err(ScopeError::ResourceBusy { .. })));
		assert!(matches!(tracked.commit(), Err(ScopeError::DirectCommitBlocked { .. })));
	}

	#[test]
	fn close_from_inside_a_borrow_waits_for_the_borrower() {
		let counters = Arc::new(Counters::default());
		let collection = collection(&counters, false);
		let tracked = collection.handle::<Tracked>().unwrap();

		tracked
			.with(|_| {
				collection.close();
				assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
			})
			.unwrap();

		assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
		assert!(matches!(tracked.with(|_| ()), Err(ScopeError::ResourceReleased { .. })));
	}

	#[test]
	fn resources_lent_on_other_threads_are_independent() {
		let counters = Arc::new(Counters::default());
		let collection = collection(&counters, false);
		let tracked = collection.handle::<Tracked>().unwrap();
		let other = collection.handle::<Other>().unwrap();

		tracked
			.with(|t| {
				t.rows.push(1);
				std::thread::scope(|s| s.spawn(|| other.with(|_| ()).unwrap()).join().unwrap());
			})
			.unwrap();
		assert_eq!(tracked.with(|t| t.rows.clone()).unwrap(), vec![1]);
	}

	#[test]
	fn commit_after_close_is_a_no_op() {
		let counters = Arc::new(Counters::default());
		let collection = collection(&counters, false);
		collection.handle::<Tracked>().unwrap();
		collection.close();

		collection.commit_as_root().unwrap();
		assert_eq!(counters.committed.load(Ordering::SeqCst), 0);
	}
}
