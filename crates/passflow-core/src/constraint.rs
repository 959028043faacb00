//! Pairwise ordering constraints between passes.
//!
//! A constraint answers "may `first` run before `second`?". It is evaluated
//! for every ordered pair of distinct passes, so it must be pure.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::PassError;
use crate::pass::{PassHandle, PassId};

#[derive(Clone)]
pub struct Constraint {
    label: Arc<str>,
    allows: Arc<dyn Fn(&PassId, &PassId) -> bool + Send + Sync>,
}

impl Constraint {
    pub fn from_fn<F>(label: &str, f: F) -> Self
    where
        F: Fn(&PassId, &PassId) -> bool + Send + Sync + 'static,
    {
        Self {
            label: Arc::from(label),
            allows: Arc::new(f),
        }
    }

    /// Whether `first` may be scheduled before `second`.
    pub fn allows(&self, first: &PassId, second: &PassId) -> bool {
        (self.allows)(first, second)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Constraint").field(&self.label).finish()
    }
}

/// `this` must run before `that`.
///
/// Only the pair `(that, this)` is rejected; every other ordering is allowed.
pub fn this_before_that<A>(this: &PassHandle<A>, that: &PassHandle<A>) -> Constraint {
    let this = this.id().clone();
    let that = that.id().clone();
    let label = format!("{this} before {that}");
    Constraint::from_fn(&label, move |a, b| !(*a == that && *b == this))
}

/// Every pass whose name matches `first` must run before every pass whose
/// name matches `second`.
pub fn names_before(first: &str, second: &str) -> Result<Constraint, PassError> {
    let compile = |pattern: &str| {
        Regex::new(pattern).map_err(|e| {
            PassError::configuration(format!("invalid pass name pattern '{pattern}': {e}"))
        })
    };
    let early = compile(first)?;
    let late = compile(second)?;
    let label = format!("/{first}/ before /{second}/");
    Ok(Constraint::from_fn(&label, move |a, b| {
        !(late.is_match(a.name()) && early.is_match(b.name()))
    }))
}
