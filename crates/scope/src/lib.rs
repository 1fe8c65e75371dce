//! Ambient unit-of-work scopes.
//!
//! This crate lets nested code reach the resources of the current unit of
//! work (database sessions and the like) without threading them through every
//! call:
//! * `AmbientContext`: explicit context handed to the outermost entry point of
//!   a call chain and carried through its `.await` points
//! * `Scope`: guard that joins the ambient unit of work or starts a new root
//! * `ResourceHandle`: guarded access to one resource of the unit of work
//! * `ambient`: lookups for code that has no scope reference
//! * `spawn`: forking helpers that keep concurrent work off the creator's resources
//!
//! Only the root scope commits, and only if every nested writing scope
//! requested a commit before it was released.

#![warn(missing_docs)]

pub mod ambient;
mod collection;
pub mod context;
pub mod error;
mod id;
mod registry;
mod resource;
mod scope;
mod slot;
pub mod spawn;

pub use collection::ResourceHandle;
pub use context::{AmbientContext, ContextBuilder, ContextConfig};
pub use error::{ResourceError, Result, ScopeError};
pub use id::ScopeId;
pub use resource::{CommitPermit, OpenMode, Resource, ResourceTable};
pub use scope::{Purpose, Scope, ScopeInfo};
pub use slot::AmbientSlot;
pub use spawn::{spawn_blocking_suppressed, spawn_suppressed, spawn_thread_suppressed, spawn_with_ambient};
