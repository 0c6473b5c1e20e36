//! Runtime conditions on operations
//!
//! A `when` block pushes a predicate for its duration. Every operation
//! declared inside captures the predicates active at that point; the executor
//! evaluates their conjunction per host right before dispatch, so a predicate
//! can depend on the outcome of earlier operations.

use crate::error::Result;
use crate::inventory::Host;
use std::fmt;
use std::sync::Arc;

/// A per-host condition evaluated at dispatch time.
pub type Predicate = Arc<dyn Fn(&Host) -> Result<bool> + Send + Sync>;

/// Wrap a closure as a [`Predicate`].
pub fn predicate<F>(f: F) -> Predicate
where
    F: Fn(&Host) -> Result<bool> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Stack of predicates active during deploy construction.
#[derive(Clone, Default)]
pub struct ConditionalStack {
    predicates: Vec<Predicate>,
}

impl fmt::Debug for ConditionalStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalStack")
            .field("depth", &self.predicates.len())
            .finish()
    }
}

impl ConditionalStack {
    pub fn push(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    pub fn pop(&mut self) -> Option<Predicate> {
        self.predicates.pop()
    }

    pub fn depth(&self) -> usize {
        self.predicates.len()
    }

    /// Predicates an operation declared now has to satisfy.
    pub fn snapshot(&self) -> Vec<Predicate> {
        self.predicates.clone()
    }
}

/// Whether every predicate holds for `host`; stops at the first false.
pub fn evaluate_all(predicates: &[Predicate], host: &Host) -> Result<bool> {
    for predicate in predicates {
        if !predicate(host)? {
            return Ok(false);
        }
    }
    Ok(true)
}
