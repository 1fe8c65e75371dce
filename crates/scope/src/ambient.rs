//! Lookups against whatever scope is ambient on the current call chain.
//!
//! Repositories and other nested code use these instead of taking a scope or
//! resource as a parameter.

use std::sync::Arc;

use crate::ScopeId;
use crate::collection::ResourceHandle;
use crate::context::AmbientContext;
use crate::error::{Result, ScopeError};
use crate::registry::ScopeRegistry;
use crate::resource::Resource;
use crate::scope::{ScopeInfo, ScopeState};

/// Id of the ambient scope, without checking that it is still live.
pub fn current_id() -> Option<ScopeId> {
	AmbientContext::current()?.ambient_id()
}

fn current_state() -> Result<Option<Arc<ScopeState>>> {
	let Some(id) = current_id() else {
		return Ok(None);
	};
	ScopeRegistry::global()
		.resolve(id)
		.map(Some)
		.ok_or(ScopeError::UnresolvableAmbientScope { id })
}

/// Snapshot of the ambient scope.
///
/// `Ok(None)` when nothing is ambient. A slot naming a scope that is no
/// longer live yields [`ScopeError::UnresolvableAmbientScope`].
pub fn current_scope() -> Result<Option<ScopeInfo>> {
	Ok(current_state()?.map(|state| state.info()))
}

/// Handle for resource kind `R` from the ambient scope, opening it on first use.
///
/// `Ok(None)` when nothing is ambient.
pub fn handle<R: Resource>() -> Result<Option<ResourceHandle<R>>> {
	let Some(state) = current_state()? else {
		return Ok(None);
	};
	if state.collection().is_closed() {
		return Err(ScopeError::OrphanedParentScope {
			scope: state.id(),
			parent: None,
		});
	}
	state.collection().handle::<R>().map(Some)
}

/// Like [`handle`], failing with [`ScopeError::NoAmbientScope`] when nothing is ambient.
pub fn require_handle<R: Resource>() -> Result<ResourceHandle<R>> {
	handle::<R>()?.ok_or(ScopeError::NoAmbientScope {
		kind: std::any::type_name::<R>(),
	})
}
