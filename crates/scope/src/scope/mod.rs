//! Ambient unit-of-work scopes.
//!
//! A [`Scope`] either joins the scope already ambient on the call chain or
//! becomes a root that owns a fresh resource collection. Only the root
//! commits and releases; joined scopes record intent. A writing scope that is
//! released without [`Scope::request_commit`] poisons the whole unit of work.

use std::sync::Arc;

use crate::ScopeId;
use crate::collection::{ResourceCollection, ResourceHandle};
use crate::context::AmbientContext;
use crate::error::{Result, ScopeError};
use crate::registry::ScopeRegistry;
use crate::resource::{OpenMode, Resource};


/// What a scope will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
	/// The scope only reads. Committing is not allowed.
	Reading,
	/// The scope writes. Releasing it without committing cancels the unit of work.
	Writing,
}

impl Purpose {
	pub(crate) const fn mode(self) -> OpenMode {
		match self {
			Self::Reading => OpenMode::Read,
			Self::Writing => OpenMode::Write,
		}
	}

	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Reading => "reading",
			Self::Writing => "writing",
		}
	}
}

/// Registry-visible part of a scope.
pub(crate) struct ScopeState {
	id: ScopeId,
	purpose: Purpose,
	root: bool,
	collection: Arc<ResourceCollection>,
}

impl ScopeState {
	pub(crate) fn new(purpose: Purpose, root: bool, collection: Arc<ResourceCollection>) -> Self {
		Self {
			id: ScopeId::next(),
			purpose,
			root,
			collection,
		}
	}

	pub(crate) fn id(&self) -> ScopeId {
		self.id
	}

	pub(crate) fn collection(&self) -> &Arc<ResourceCollection> {
		&self.collection
	}

	pub(crate) fn info(&self) -> ScopeInfo {
		ScopeInfo {
			id: self.id,
			purpose: self.purpose,
			root: self.root,
			opened_for_writing: self.collection.opened_for_writing(),
			commit_blocked: self.collection.is_commit_blocked(),
		}
	}
}

/// Snapshot of a scope's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeInfo {
	/// Scope identity.
	pub id: ScopeId,
	/// Declared purpose.
	pub purpose: Purpose,
	/// Whether the scope owns its resource collection.
	pub root: bool,
	/// Whether the shared collection was opened by a writing root.
	pub opened_for_writing: bool,
	/// Whether a nested scope has poisoned the unit of work.
	pub commit_blocked: bool,
}

/// Guard for one ambient unit-of-work scope.
///
/// Dropping the guard disposes it, so release happens on every exit path.
/// Call [`Scope::dispose`] to observe disposal errors instead of having them
/// logged and recorded on the context.
#[must_use = "dropping a scope disposes it immediately"]
pub struct Scope {
	state: Arc<ScopeState>,
	context: AmbientContext,
	parent: Option<ScopeId>,
	commit_requested: bool,
	disposed: bool,
}

impl Scope {
	/// Joins the ambient scope or opens a new root on the current call chain.
	pub fn open(purpose: Purpose) -> Result<Self> {
		Self::open_in(&AmbientContext::require()?, purpose)
	}

	/// Opens a new root on the current call chain even if a scope is ambient.
	///
	/// The previous ambient scope becomes ambient again once this one is disposed.
	pub fn open_new(purpose: Purpose) -> Result<Self> {
		Self::open_new_in(&AmbientContext::require()?, purpose)
	}

	/// Like [`Scope::open`] on an explicit context.
	pub fn open_in(context: &AmbientContext, purpose: Purpose) -> Result<Self> {
		Self::construct(context, purpose, false)
	}

	/// Like [`Scope::open_new`] on an explicit context.
	pub fn open_new_in(context: &AmbientContext, purpose: Purpose) -> Result<Self> {
		Self::construct(context, purpose, true)
	}

	fn construct(context: &AmbientContext, purpose: Purpose, force_root: bool) -> Result<Self> {
		let registry = ScopeRegistry::global();
		let parent = match context.slot().get() {
			None => None,
			Some(ambient) => match registry.resolve(ambient) {
				Some(state) if !state.collection.is_closed() => Some(state),
				resolved => {
					let diagnostic = match resolved {
						Some(_) => ScopeError::OrphanedParentScope {
							scope: ambient,
							parent: None,
						},
						None => ScopeError::UnresolvableAmbientScope { id: ambient },
					};
					tracing::warn!(ambient = %ambient, error = %diagnostic, "scope.ambient_unusable");
					if context.config().strict && !force_root {
						return Err(diagnostic);
					}
					context.record(diagnostic);
					None
				}
			},
		};

		let joined = parent.as_ref().filter(|_| !force_root);
		if let Some(joined) = joined
			&& purpose == Purpose::Writing
			&& !joined.collection.opened_for_writing()
		{
			return Err(ScopeError::PurposeMismatch {
				detail: "cannot open a writing scope under a root opened for reading",
			});
		}

		let (collection, root) = match joined {
			Some(joined) => (Arc::clone(&joined.collection), false),
			None => (Arc::new(ResourceCollection::open(purpose.mode(), context.resources().clone())), true),
		};

		let state = Arc::new(ScopeState::new(purpose, root, collection));
		registry.register(&state);
		context.slot().set(state.id);

		let parent = parent.map(|p| p.id);
		tracing::trace!(
			scope = %state.id,
			purpose = purpose.as_str(),
			root,
			parent = ?parent.map(ScopeId::get),
			"scope.open"
		);

		Ok(Self {
			state,
			context: context.clone(),
			parent,
			commit_requested: false,
			disposed: false,
		})
	}

	/// Scope identity.
	pub fn id(&self) -> ScopeId {
		self.state.id
	}

	/// Declared purpose.
	pub fn purpose(&self) -> Purpose {
		self.state.purpose
	}

	/// Whether this scope owns its resource collection.
	pub fn is_root(&self) -> bool {
		self.state.root
	}

	/// Whether [`Scope::request_commit`] has succeeded on this scope.
	pub fn commit_requested(&self) -> bool {
		self.commit_requested
	}

	/// Scope that becomes ambient again when this one is disposed.
	pub fn parent(&self) -> Option<ScopeId> {
		self.parent
	}

	/// Snapshot of this scope's state.
	pub fn info(&self) -> ScopeInfo {
		self.state.info()
	}

	/// Context this scope was opened on.
	pub fn context(&self) -> &AmbientContext {
		&self.context
	}

	/// Returns the handle for resource kind `R`, opening it on first use.
	pub fn handle<R: Resource>(&self) -> Result<ResourceHandle<R>> {
		if self.state.collection.is_closed() {
			return Err(ScopeError::OrphanedParentScope {
				scope: self.state.id,
				parent: self.parent,
			});
		}
		self.state.collection.handle::<R>()
	}

	/// Marks this scope's work as complete.
	///
	/// A joined scope only records the request. The root commits every open
	/// resource.
	pub fn request_commit(&mut self) -> Result<()> {
		let state = &self.state;
		if state.purpose != Purpose::Writing {
			return Err(ScopeError::PurposeMismatch {
				detail: "cannot commit a scope opened for reading",
			});
		}
		if state.collection.is_commit_blocked() {
			return Err(ScopeError::SaveBlockedByChild { scope: state.id });
		}
		if state.collection.is_closed() {
			return Err(ScopeError::OrphanedParentScope {
				scope: state.id,
				parent: self.parent,
			});
		}

		self.commit_requested = true;
		if !state.root {
			tracing::trace!(scope = %state.id, "scope.commit_deferred");
			return Ok(());
		}

		state.collection.commit_as_root()?;
		tracing::trace!(scope = %state.id, resources = state.collection.open_count(), "scope.committed");
		Ok(())
	}

	/// Releases the scope and restores the previously ambient scope.
	///
	/// Fails with [`ScopeError::DisposalOrderViolation`] if another scope
	/// opened on this chain is still ambient; the slot is left untouched.
	/// That scope later restores the nearest ancestor still open.
	pub fn dispose(mut self) -> Result<()> {
		self.release()
	}

	fn release(&mut self) -> Result<()> {
		if self.disposed {
			return Ok(());
		}
		self.disposed = true;

		let state = &self.state;
		let registry = ScopeRegistry::global();
		if state.purpose == Purpose::Writing && !self.commit_requested {
			state.collection.block_commit();
			tracing::debug!(scope = %state.id, root = state.root, "scope.abandoned");
		}

		let ambient = self.context.slot().get();
		if ambient != Some(state.id) {
			registry.forget(state.id);
			self.context.note_unwound(state.id, self.parent);
			tracing::error!(scope = %state.id, ambient = ?ambient.map(ScopeId::get), "scope.disposal_order_violation");
			return Err(ScopeError::DisposalOrderViolation { scope: state.id, ambient });
		}

		registry.forget(state.id);
		let mut orphaned = None;
		let mut next = self.parent;
		loop {
			let Some(parent) = next else {
				self.context.slot().clear();
				break;
			};
			if let Some(live) = registry.resolve(parent)
				&& !live.collection.is_closed()
			{
				self.context.slot().set(parent);
				break;
			}
			// Already reported when the parent was disposed; skip to its parent.
			if let Some(grandparent) = self.context.take_unwound(parent) {
				tracing::debug!(scope = %state.id, parent = %parent, "scope.parent_unwound");
				next = grandparent;
				continue;
			}
			self.context.slot().clear();
			orphaned = Some(ScopeError::OrphanedParentScope {
				scope: state.id,
				parent: Some(parent),
			});
			break;
		}

		if state.root {
			state.collection.close();
		}
		tracing::trace!(scope = %state.id, root = state.root, "scope.dispose");

		match orphaned {
			Some(error) => {
				tracing::warn!(scope = %state.id, error = %error, "scope.orphaned");
				if self.context.config().strict {
					return Err(error);
				}
				self.context.record(error);
				Ok(())
			}
			None => Ok(()),
		}
	}
}

impl Drop for Scope {
	fn drop(&mut self) {
		if let Err(error) = self.release() {
			tracing::error!(scope = %self.state.id, error = %error, "scope.drop_failed");
			self.context.record(error);
		}
	}
}

impl std::fmt::Debug for Scope {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Scope")
			.field("id", &self.state.id)
			.field("purpose", &self.state.purpose)
			.field("root", &self.state.root)
			.field("parent", &self.parent)
			.field("commit_requested", &self.commit_requested)
			.field("disposed", &self.disposed)
			.finish()
	}
}
