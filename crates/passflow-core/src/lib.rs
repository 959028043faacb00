//! # passflow-core
//!
//! Schedules and executes an ordered sequence of rewriting passes over a
//! mutable artifact.
//!
//! Passes are registered with a [`PassManager`] together with pairwise
//! ordering [`Constraint`]s. On the first run the manager derives a schedule
//! with a cycle-aware topological sort, then applies the whole schedule
//! repeatedly until no pass reports a modification or the configured number
//! of steps has run. Optional per-pass checks re-run an invariant check and
//! compare the artifact's evaluation before and after every modifying pass.
//!
//! ```
//! use passflow_core::{
//!     this_before_that, Artifact, PassHandle, PassManager, PassManagerConfig, RunOptions,
//! };
//!
//! struct Log(Vec<&'static str>);
//! impl Artifact for Log {}
//!
//! let lower = PassHandle::in_place("lower", |log: &mut Log| {
//!     log.0.push("lower");
//!     Ok(())
//! });
//! let cleanup = PassHandle::in_place("cleanup", |log: &mut Log| {
//!     log.0.push("cleanup");
//!     Ok(())
//! });
//!
//! let mut pm = PassManager::new(PassManagerConfig::default()).unwrap();
//! pm.add_pass(cleanup.clone());
//! pm.add_pass(lower.clone());
//! pm.add_constraint(this_before_that(&lower, &cleanup));
//!
//! let result = pm.run(Log(Vec::new()), &RunOptions::default()).unwrap();
//! assert_eq!(result.artifact.0, vec!["lower", "cleanup"]);
//! ```

pub mod artifact;
pub mod config;
pub mod constraint;
pub mod dataflow;
pub mod equivalence;
pub mod error;
pub mod manager;
pub mod nested;
pub mod pass;
pub mod schedule;

pub use artifact::Artifact;
pub use config::{PassManagerConfig, RunOptions, Tolerance};
pub use constraint::{names_before, this_before_that, Constraint};
pub use equivalence::{check_equivalent, MismatchDetail, MismatchReport};
pub use error::{BoxError, PassError};
pub use manager::{ExecutionResult, InvariantCheck, PassManager};
pub use nested::{Device, Nested, Tensor};
pub use pass::{Pass, PassHandle, PassId, PassResult};
pub use schedule::{solve, validate_schedule, Solution};
