//! Error types for scopes and the resources they own.

use std::sync::Arc;

use thiserror::Error;

use crate::ScopeId;

/// Errors raised by scope construction, commit, disposal and handle access.
///
/// Structural violations ([`PurposeMismatch`](Self::PurposeMismatch),
/// [`DisposalOrderViolation`](Self::DisposalOrderViolation)) are programming
/// errors and are never retried.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ScopeError {
	/// A scope was used for something its purpose does not allow.
	#[error("purpose mismatch: {detail}")]
	PurposeMismatch {
		/// What was attempted.
		detail: &'static str,
	},

	/// A resource was committed outside its owning root scope.
	#[error("direct commit of `{kind}` blocked; commit through the owning scope instead")]
	DirectCommitBlocked {
		/// Type name of the resource.
		kind: &'static str,
	},

	/// A nested scope was disposed without committing, poisoning the unit of work.
	#[error("commit blocked for {scope}: a nested scope was disposed without committing")]
	SaveBlockedByChild {
		/// Scope whose commit was refused.
		scope: ScopeId,
	},

	/// Scopes were disposed in a different order than they were created.
	#[error("{scope} disposed out of creation order (ambient scope is {ambient:?})")]
	DisposalOrderViolation {
		/// Scope being disposed.
		scope: ScopeId,
		/// Scope that was ambient at the time.
		ambient: Option<ScopeId>,
	},

	/// The scope a scope joined was released first.
	///
	/// This happens when concurrent work is forked from inside a scope without
	/// suppressing the ambient scope.
	#[error("{scope} outlived its parent {parent:?}; suppress the ambient scope before forking concurrent work")]
	OrphanedParentScope {
		/// Scope that observed the missing parent.
		scope: ScopeId,
		/// Parent it expected to restore, if known.
		parent: Option<ScopeId>,
	},

	/// The ambient slot names a scope that is no longer registered.
	#[error("ambient {id} has no live scope; a scope was released on another call chain or leaked")]
	UnresolvableAmbientScope {
		/// Dangling id found in the slot.
		id: ScopeId,
	},

	/// A scope was opened outside [`AmbientContext::run`](crate::AmbientContext::run)
	/// or [`AmbientContext::run_sync`](crate::AmbientContext::run_sync).
	#[error("no ambient context is active on this call chain")]
	NoAmbientContext,

	/// A resource was required but no scope is ambient.
	#[error("no ambient scope to resolve `{kind}` from")]
	NoAmbientScope {
		/// Type name of the requested resource.
		kind: &'static str,
	},

	/// No opener was registered for the requested resource kind.
	#[error("no opener registered for `{kind}`")]
	UnknownResource {
		/// Type name of the requested resource.
		kind: &'static str,
	},

	/// A resource handle was used after its collection was closed.
	#[error("`{kind}` used after its scope released it")]
	ResourceReleased {
		/// Type name of the resource.
		kind: &'static str,
	},

	/// The resource is already lent out further up the current call stack.
	#[error("`{kind}` is already in use on this thread")]
	ResourceBusy {
		/// Type name of the resource.
		kind: &'static str,
	},

	/// The opaque resource failed to open or commit.
	#[error("`{kind}` resource failed")]
	Resource {
		/// Type name of the resource.
		kind: &'static str,
		/// Underlying failure.
		#[source]
		source: Arc<ResourceError>,
	},
}

impl ScopeError {
	pub(crate) fn resource(kind: &'static str, source: ResourceError) -> Self {
		Self::Resource {
			kind,
			source: Arc::new(source),
		}
	}
}

/// Failure reported by a [`Resource`](crate::Resource) implementation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ResourceError {
	message: String,
	#[source]
	source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ResourceError {
	/// Creates an error carrying only a message.
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			source: None,
		}
	}

	/// Creates an error wrapping an underlying cause.
	pub fn with_source(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
		Self {
			message: message.into(),
			source: Some(Box::new(source)),
		}
	}

	/// Returns the message.
	pub fn message(&self) -> &str {
		&self.message
	}
}

/// Result type for scope operations.
pub type Result<T> = std::result::Result<T, ScopeError>;
