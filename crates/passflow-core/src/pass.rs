//! Passes, their identities, and the result every pass returns.
//!
//! A pass is identified by a [`PassId`] allocated when its [`PassHandle`] is
//! created. Identity is never structural: two handles wrapping passes with
//! identical behavior stay distinguishable, while clones of one handle share
//! an identity and can be referenced from any number of constraints.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::BoxError;

static NEXT_PASS_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity token of a pass. Equality and hashing use the allocated
/// token only; the name is carried for diagnostics.
#[derive(Clone)]
pub struct PassId {
    raw: u64,
    name: Arc<str>,
}

impl PassId {
    /// Allocate a fresh identity, distinct from every other one in the process.
    pub fn allocate(name: &str) -> Self {
        Self {
            raw: NEXT_PASS_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for PassId {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PassId {}

impl Hash for PassId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Debug for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.raw)
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Result of applying one pass: the (possibly replaced) artifact and whether
/// the pass changed it.
#[derive(Debug)]
pub struct PassResult<A> {
    pub artifact: A,
    pub modified: bool,
}

impl<A> PassResult<A> {
    pub fn modified(artifact: A) -> Self {
        Self {
            artifact,
            modified: true,
        }
    }

    pub fn unchanged(artifact: A) -> Self {
        Self {
            artifact,
            modified: false,
        }
    }
}

/// A transformation over an artifact of type `A`.
///
/// The pass consumes the current artifact and hands back the next one. An
/// error leaves the artifact with the pass; nothing is rolled back.
pub trait Pass<A> {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    fn run(&self, artifact: A) -> Result<PassResult<A>, BoxError>;
}

/// A shared, identity-carrying handle to a registered pass.
pub struct PassHandle<A> {
    id: PassId,
    pass: Arc<dyn Pass<A> + Send + Sync>,
}

impl<A> PassHandle<A> {
    pub fn new<P>(pass: P) -> Self
    where
        P: Pass<A> + Send + Sync + 'static,
    {
        Self {
            id: PassId::allocate(pass.name()),
            pass: Arc::new(pass),
        }
    }

    /// Wrap a closure that returns a full [`PassResult`].
    pub fn from_fn<F>(name: &str, f: F) -> Self
    where
        F: Fn(A) -> Result<PassResult<A>, BoxError> + Send + Sync + 'static,
        A: 'static,
    {
        Self::new(FnPass {
            name: name.to_string(),
            f,
        })
    }

    /// Wrap a pass that mutates the artifact in place. Always reports a
    /// modification.
    pub fn in_place<F>(name: &str, f: F) -> Self
    where
        F: Fn(&mut A) -> Result<(), BoxError> + Send + Sync + 'static,
        A: 'static,
    {
        Self::from_fn(name, move |mut artifact| {
            f(&mut artifact)?;
            Ok(PassResult::modified(artifact))
        })
    }

    /// Wrap a pass that returns a replacement artifact without saying whether
    /// it changed anything. Always reports a modification.
    pub fn replacing<F>(name: &str, f: F) -> Self
    where
        F: Fn(A) -> Result<A, BoxError> + Send + Sync + 'static,
        A: 'static,
    {
        Self::from_fn(name, move |artifact| Ok(PassResult::modified(f(artifact)?)))
    }

    pub fn id(&self) -> &PassId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub(crate) fn run(&self, artifact: A) -> Result<PassResult<A>, BoxError> {
        self.pass.run(artifact)
    }
}

// Lets schedules be validated and solved over bare ids or over handles.
impl AsRef<PassId> for PassId {
    fn as_ref(&self) -> &PassId {
        self
    }
}

impl<A> AsRef<PassId> for PassHandle<A> {
    fn as_ref(&self) -> &PassId {
        self.id()
    }
}

impl<A> Clone for PassHandle<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            pass: Arc::clone(&self.pass),
        }
    }
}

impl<A> fmt::Debug for PassHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PassHandle").field(&self.id).finish()
    }
}

struct FnPass<F> {
    name: String,
    f: F,
}

impl<A, F> Pass<A> for FnPass<F>
where
    F: Fn(A) -> Result<PassResult<A>, BoxError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, artifact: A) -> Result<PassResult<A>, BoxError> {
        (self.f)(artifact)
    }
}
