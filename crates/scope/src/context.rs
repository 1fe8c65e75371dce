//! Ambient context carried through one logical call chain.
//!
//! An [`AmbientContext`] is handed to the outermost entry point of a call
//! chain with [`AmbientContext::run`] (async) or [`AmbientContext::run_sync`].
//! Everything running inside, including code resumed after `.await`, sees the
//! same context and therefore the same [`AmbientSlot`]. Tasks spawned from
//! inside do not inherit it; see [`crate::spawn`] for the sanctioned ways to
//! fork.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::futures::TaskLocalFuture;

use crate::ScopeId;
use crate::error::{ResourceError, ScopeError};
use crate::resource::{OpenMode, Resource, ResourceTable};
use crate::slot::AmbientSlot;

tokio::task_local! {
	static CURRENT: AmbientContext;
}

/// Behaviour knobs for a context family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
	/// Turn recoverable diagnostics into errors.
	///
	/// When set, [`Scope::open`](crate::Scope::open) fails with
	/// [`ScopeError::UnresolvableAmbientScope`] instead of opening a new root
	/// ([`Scope::open_new`](crate::Scope::open_new) still succeeds), and
	/// [`Scope::dispose`](crate::Scope::dispose) returns
	/// [`ScopeError::OrphanedParentScope`] after cleaning up.
	pub strict: bool,
	/// Maximum number of diagnostics kept; the oldest are dropped first.
	pub diagnostic_capacity: usize,
}

impl Default for ContextConfig {
	fn default() -> Self {
		Self {
			strict: false,
			diagnostic_capacity: 64,
		}
	}
}

/// State shared by a context and every context derived from it.
#[derive(Debug)]
struct Shared {
	resources: ResourceTable,
	config: ContextConfig,
	diagnostics: Mutex<VecDeque<ScopeError>>,
	/// Scopes disposed out of order, mapped to their parent.
	unwound: Mutex<HashMap<ScopeId, Option<ScopeId>>>,
}

/// Explicit context object for one logical call chain.
///
/// Cloning yields the same chain. [`suppressed`](Self::suppressed) derives a
/// new chain with an empty slot that shares resources, configuration and
/// diagnostics.
#[derive(Debug, Clone)]
pub struct AmbientContext {
	shared: Arc<Shared>,
	slot: Arc<AmbientSlot>,
}

impl Default for AmbientContext {
	fn default() -> Self {
		Self::builder().build()
	}
}

impl AmbientContext {
	/// Starts building a context.
	pub fn builder() -> ContextBuilder {
		ContextBuilder::default()
	}

	/// Returns the context active on the current call chain, if any.
	pub fn current() -> Option<Self> {
		CURRENT.try_with(Clone::clone).ok()
	}

	pub(crate) fn require() -> Result<Self, ScopeError> {
		Self::current().ok_or(ScopeError::NoAmbientContext)
	}

	/// Runs `future` with this context active across all of its `.await` points.
	pub fn run<F: Future>(&self, future: F) -> TaskLocalFuture<AmbientContext, F> {
		CURRENT.scope(self.clone(), future)
	}

	/// Runs `f` with this context active.
	pub fn run_sync<R>(&self, f: impl FnOnce() -> R) -> R {
		CURRENT.sync_scope(self.clone(), f)
	}

	/// Derives a fresh call chain with no ambient scope.
	pub fn suppressed(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
			slot: Arc::new(AmbientSlot::default()),
		}
	}

	/// Derives a fresh call chain whose slot starts at this chain's ambient scope.
	pub(crate) fn mirrored(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
			slot: Arc::new(AmbientSlot::new(self.slot.get())),
		}
	}

	/// Id of the scope currently ambient on this chain.
	pub fn ambient_id(&self) -> Option<ScopeId> {
		self.slot.get()
	}

	pub(crate) fn slot(&self) -> &AmbientSlot {
		&self.slot
	}

	pub(crate) fn resources(&self) -> &ResourceTable {
		&self.shared.resources
	}

	/// Configuration shared by this context family.
	pub fn config(&self) -> &ContextConfig {
		&self.shared.config
	}

	/// Returns true if `other` is the same call chain.
	pub fn same_chain(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.slot, &other.slot)
	}

	/// Diagnostics recorded by this context family, oldest first.
	pub fn diagnostics(&self) -> Vec<ScopeError> {
		self.shared.diagnostics.lock().iter().cloned().collect()
	}

	/// Drains the recorded diagnostics.
	pub fn take_diagnostics(&self) -> Vec<ScopeError> {
		self.shared.diagnostics.lock().drain(..).collect()
	}

	pub(crate) fn note_unwound(&self, scope: ScopeId, parent: Option<ScopeId>) {
		self.shared.unwound.lock().insert(scope, parent);
	}

	/// Parent of a scope disposed out of order, consumed by the child that
	/// restores past it.
	pub(crate) fn take_unwound(&self, scope: ScopeId) -> Option<Option<ScopeId>> {
		self.shared.unwound.lock().remove(&scope)
	}

	pub(crate) fn record(&self, diagnostic: ScopeError) {
		let capacity = self.shared.config.diagnostic_capacity;
		if capacity == 0 {
			return;
		}
		let mut diagnostics = self.shared.diagnostics.lock();
		while diagnostics.len() >= capacity {
			diagnostics.pop_front();
		}
		diagnostics.push_back(diagnostic);
	}
}

/// Builder for [`AmbientContext`].
#[derive(Debug, Default)]
pub struct ContextBuilder {
	resources: ResourceTable,
	config: ContextConfig,
}

impl ContextBuilder {
	/// Registers how resources of kind `R` are opened.
	pub fn resource<R, F>(mut self, opener: F) -> Self
	where
		R: Resource,
		F: Fn(OpenMode) -> Result<R, ResourceError> + Send + Sync + 'static,
	{
		self.resources.register(opener);
		self
	}

	/// Replaces the whole resource table.
	pub fn resources(mut self, resources: ResourceTable) -> Self {
		self.resources = resources;
		self
	}

	/// Replaces the configuration.
	pub fn config(mut self, config: ContextConfig) -> Self {
		self.config = config;
		self
	}

	/// See [`ContextConfig::strict`].
	pub fn strict(mut self, strict: bool) -> Self {
		self.config.strict = strict;
		self
	}

	/// See [`ContextConfig::diagnostic_capacity`].
	pub fn diagnostic_capacity(mut self, capacity: usize) -> Self {
		self.config.diagnostic_capacity = capacity;
		self
	}

	/// Builds the root context of a new family.
	pub fn build(self) -> AmbientContext {
		AmbientContext {
			shared: Arc::new(Shared {
				resources: self.resources,
				config: self.config,
				diagnostics: Mutex::new(VecDeque::new()),
				unwound: Mutex::new(HashMap::new()),
			}),
			slot: Arc::new(AmbientSlot::default()),
		}
	}
}
