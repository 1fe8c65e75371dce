use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock, Weak};

use crate::ScopeId;
use crate::scope::ScopeState;

static GLOBAL: LazyLock<ScopeRegistry> = LazyLock::new(ScopeRegistry::new);

/// Table resolving scope ids back to live scope state.
///
/// Entries are weak: the registry never keeps a scope alive, so an id whose
/// scope is gone resolves to `None`.
#[derive(Debug, Default)]
pub(crate) struct ScopeRegistry {
	inner: RwLock<HashMap<ScopeId, Weak<ScopeState>>>,
}

impl ScopeRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Process-wide registry shared by every call chain.
	pub fn global() -> &'static Self {
		&GLOBAL
	}

	/// Tracks one scope.
	pub fn register(&self, state: &Arc<ScopeState>) {
		if let Ok(mut guard) = self.inner.write() {
			guard.insert(state.id(), Arc::downgrade(state));
		}
	}

	/// Returns the live scope for `id`, if it is still registered.
	pub fn resolve(&self, id: ScopeId) -> Option<Arc<ScopeState>> {
		let guard = self.inner.read().ok()?;
		guard.get(&id).and_then(Weak::upgrade)
	}

	/// Stops tracking one scope.
	pub fn forget(&self, id: ScopeId) {
		if let Ok(mut guard) = self.inner.write() {
			guard.remove(&id);
		}
	}

	#[cfg(test)]
	pub fn contains(&self, id: ScopeId) -> bool {
		self.inner.read().map(|guard| guard.contains_key(&id)).unwrap_or(false)
	}
}
