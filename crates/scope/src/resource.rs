use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::ResourceError;

/// How a collection opens its resources, fixed by the root scope's purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
	/// Opened by a reading root; no commit will be requested.
	Read,
	/// Opened by a writing root.
	Write,
}

impl OpenMode {
	/// Returns true for [`OpenMode::Write`].
	pub const fn is_write(self) -> bool {
		matches!(self, Self::Write)
	}

	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Read => "read",
			Self::Write => "write",
		}
	}
}

/// Capability to commit a resource.
///
/// Only the root scope's commit path can construct a permit, so code holding
/// a `&mut` to a resource cannot commit it on its own.
pub struct CommitPermit<'a> {
	_scope: PhantomData<&'a ()>,
}

impl CommitPermit<'_> {
	pub(crate) fn new() -> Self {
		Self { _scope: PhantomData }
	}
}

impl fmt::Debug for CommitPermit<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("CommitPermit")
	}
}

/// An expensive, stateful resource owned by a unit of work.
///
/// Implementations are opened through the opener registered on the
/// [`AmbientContext`](crate::AmbientContext) and reached by user code only
/// through a [`ResourceHandle`](crate::ResourceHandle).
pub trait Resource: Any + Send {
	/// Persists pending work.
	fn commit(&mut self, permit: CommitPermit<'_>) -> Result<(), ResourceError>;

	/// Releases the resource. Called once, when the owning root scope is disposed.
	fn close(&mut self) -> Result<(), ResourceError> {
		Ok(())
	}
}

/// Object-safe view of a [`Resource`] stored in a collection.
pub(crate) trait ErasedResource: Send {
	fn commit(&mut self, permit: CommitPermit<'_>) -> Result<(), ResourceError>;
	fn close(&mut self) -> Result<(), ResourceError>;
	fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<R: Resource> ErasedResource for R {
	fn commit(&mut self, permit: CommitPermit<'_>) -> Result<(), ResourceError> {
		Resource::commit(self, permit)
	}

	fn close(&mut self) -> Result<(), ResourceError> {
		Resource::close(self)
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}

type Opener = Arc<dyn Fn(OpenMode) -> Result<Box<dyn ErasedResource>, ResourceError> + Send + Sync>;

#[derive(Clone)]
struct ResourceKind {
	name: &'static str,
	opener: Opener,
}

/// Openers for every resource kind a context can hand out, keyed by type.
#[derive(Clone, Default)]
pub struct ResourceTable {
	kinds: Arc<HashMap<TypeId, ResourceKind>>,
}

impl ResourceTable {
	/// Creates an empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers the opener for `R`, replacing any previous one.
	pub fn register<R, F>(&mut self, opener: F)
	where
		R: Resource,
		F: Fn(OpenMode) -> Result<R, ResourceError> + Send + Sync + 'static,
	{
		let opener: Opener = Arc::new(move |mode| opener(mode).map(|r| Box::new(r) as Box<dyn ErasedResource>));
		let kind = ResourceKind {
			name: std::any::type_name::<R>(),
			opener,
		};
		Arc::make_mut(&mut self.kinds).insert(TypeId::of::<R>(), kind);
	}

	/// Returns true if an opener is registered for `R`.
	pub fn contains<R: Resource>(&self) -> bool {
		self.kinds.contains_key(&TypeId::of::<R>())
	}

	/// Returns the number of registered kinds.
	pub fn len(&self) -> usize {
		self.kinds.len()
	}

	/// Returns true if no kinds are registered.
	pub fn is_empty(&self) -> bool {
		self.kinds.is_empty()
	}

	/// Opens a fresh instance of `kind`. `None` if the kind is unknown.
	pub(crate) fn open(&self, kind: TypeId, mode: OpenMode) -> Option<Result<Box<dyn ErasedResource>, ResourceError>> {
		let entry = self.kinds.get(&kind)?;
		Some((entry.opener)(mode))
	}
}

impl fmt::Debug for ResourceTable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut names: Vec<_> = self.kinds.values().map(|k| k.name).collect();
		names.sort_unstable();
		f.debug_struct("ResourceTable").field("kinds", &names).finish()
	}
}
