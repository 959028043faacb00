//! Hooks the pass manager consumes from the artifact being transformed.

use crate::error::BoxError;
use crate::nested::Nested;

/// An artifact a [`PassManager`](crate::PassManager) can transform.
///
/// Both hooks are optional: the defaults make `finalize` a no-op and
/// `evaluate` an error, which only surfaces when per-pass correctness checks
/// are enabled and an evaluation input is supplied.
pub trait Artifact {
    /// Normalize the artifact after a pass mutated it (e.g. regenerate code
    /// from an edited graph) so downstream passes see a consistent state.
    fn finalize(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Execute the artifact on `input`.
    fn evaluate(&self, _input: &Nested) -> Result<Nested, BoxError> {
        Err("artifact does not support evaluation".into())
    }
}
