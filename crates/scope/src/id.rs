use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic clock handing out scope identities.
#[derive(Debug)]
struct IdClock {
	next: AtomicU64,
}

impl IdClock {
	const fn new() -> Self {
		Self { next: AtomicU64::new(0) }
	}

	/// Returns the next id, starting at 1.
	fn next(&self) -> NonZeroU64 {
		let raw = self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
		NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN)
	}
}

static CLOCK: IdClock = IdClock::new();

/// Identity of one [`Scope`](crate::Scope) instance.
///
/// Ids are only minted by this crate. Two ids are equal only when they name
/// the same scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(NonZeroU64);

impl ScopeId {
	pub(crate) fn next() -> Self {
		Self(CLOCK.next())
	}

	/// Returns the raw numeric value, for logging.
	pub const fn get(self) -> u64 {
		self.0.get()
	}
}

impl fmt::Display for ScopeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "scope#{}", self.0)
	}
}
