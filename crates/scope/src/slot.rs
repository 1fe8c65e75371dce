use parking_lot::Mutex;

use crate::ScopeId;

/// Holds the id of the scope that is ambient on one logical call chain.
///
/// Each [`AmbientContext`](crate::AmbientContext) owns exactly one slot; the
/// slot travels with the chain through task-local storage and is never
/// shared with a forked task.
#[derive(Debug, Default)]
pub struct AmbientSlot {
	current: Mutex<Option<ScopeId>>,
}

impl AmbientSlot {
	pub(crate) fn new(initial: Option<ScopeId>) -> Self {
		Self {
			current: Mutex::new(initial),
		}
	}

	/// Returns the ambient scope id, if any.
	pub fn get(&self) -> Option<ScopeId> {
		*self.current.lock()
	}

	pub(crate) fn set(&self, id: ScopeId) {
		*self.current.lock() = Some(id);
	}

	pub(crate) fn clear(&self) {
		*self.current.lock() = None;
	}
}
