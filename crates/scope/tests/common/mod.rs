#![allow(dead_code)]

use std::sync::Arc;

use ambit_scope::{AmbientContext, CommitPermit, ContextBuilder, OpenMode, Resource, ResourceError};
use parking_lot::Mutex;

/// One call made against a recorded resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
	Open(&'static str, OpenMode),
	Commit(&'static str),
	Close(&'static str),
}

/// Shared log of resource calls.
#[derive(Debug, Default, Clone)]
pub struct Journal {
	calls: Arc<Mutex<Vec<Call>>>,
}

impl Journal {
	pub fn push(&self, call: Call) {
		self.calls.lock().push(call);
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().clone()
	}

	pub fn commits(&self) -> Vec<&'static str> {
		self.calls()
			.into_iter()
			.filter_map(|c| match c {
				Call::Commit(kind) => Some(kind),
				_ => None,
			})
			.collect()
	}

	pub fn count(&self, call: &Call) -> usize {
		self.calls.lock().iter().filter(|c| *c == call).count()
	}
}

/// Orders table session.
pub struct Orders {
	journal: Journal,
	pub rows: Vec<String>,
}

/// Ledger table session.
pub struct Ledger {
	journal: Journal,
	pub entries: Vec<i64>,
}

/// Session whose close always fails.
pub struct Flaky {
	journal: Journal,
}

impl Resource for Orders {
	fn commit(&mut self, _permit: CommitPermit<'_>) -> Result<(), ResourceError> {
		self.journal.push(Call::Commit("orders"));
		Ok(())
	}

	fn close(&mut self) -> Result<(), ResourceError> {
		self.journal.push(Call::Close("orders"));
		Ok(())
	}
}

impl Resource for Ledger {
	fn commit(&mut self, _permit: CommitPermit<'_>) -> Result<(), ResourceError> {
		self.journal.push(Call::Commit("ledger"));
		Ok(())
	}

	fn close(&mut self) -> Result<(), ResourceError> {
		self.journal.push(Call::Close("ledger"));
		Ok(())
	}
}

impl Resource for Flaky {
	fn commit(&mut self, _permit: CommitPermit<'_>) -> Result<(), ResourceError> {
		Err(ResourceError::new("disk full"))
	}

	fn close(&mut self) -> Result<(), ResourceError> {
		self.journal.push(Call::Close("flaky"));
		Err(ResourceError::new("connection reset"))
	}
}

/// Builder with every recorded resource kind registered.
pub fn builder(journal: &Journal) -> ContextBuilder {
	let (j1, j2, j3) = (journal.clone(), journal.clone(), journal.clone());
	AmbientContext::builder()
		.resource(move |mode| {
			j1.push(Call::Open("orders", mode));
			Ok(Orders {
				journal: j1.clone(),
				rows: Vec::new(),
			})
		})
		.resource(move |mode| {
			j2.push(Call::Open("ledger", mode));
			Ok(Ledger {
				journal: j2.clone(),
				entries: Vec::new(),
			})
		})
		.resource(move |mode| {
			j3.push(Call::Open("flaky", mode));
			Ok(Flaky { journal: j3.clone() })
		})
}

pub fn context() -> (Journal, AmbientContext) {
	let journal = Journal::default();
	let ctx = builder(&journal).build();
	(journal, ctx)
}
