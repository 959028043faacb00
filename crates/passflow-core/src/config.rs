//! Configuration for pass managers and individual runs.

use serde::{Deserialize, Serialize};

use crate::error::PassError;
use crate::nested::Nested;

/// Construction-time configuration of a [`PassManager`](crate::PassManager).
///
/// ## Serialization Format
///
/// Fields are serialized in `kebab-case` (e.g., `run-checks-after-each-pass`).
/// Missing fields take their default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PassManagerConfig {
    /// Maximum number of times the whole pass list is applied. Default: 1.
    /// A cyclic constraint set is only tolerated when this is greater than 1.
    pub steps: usize,
    /// Run the invariant check (and, given an input, the equivalence check)
    /// after every pass instead of only once before the first pass.
    pub run_checks_after_each_pass: bool,
    /// Downgrade correctness mismatches to warnings instead of failing the run.
    pub suppress_check_failures: bool,
}

impl Default for PassManagerConfig {
    fn default() -> Self {
        Self {
            steps: 1,
            run_checks_after_each_pass: false,
            suppress_check_failures: false,
        }
    }
}

impl PassManagerConfig {
    pub(crate) fn validate(&self) -> Result<(), PassError> {
        if self.steps == 0 {
            return Err(PassError::configuration(
                "steps must be a positive integer, got 0",
            ));
        }
        Ok(())
    }
}

/// Relative and absolute tolerances used by the equivalence check.
///
/// Two values are close when `|after - before| <= atol + rtol * |before|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: 1e-5,
            atol: 1e-8,
        }
    }
}

impl Tolerance {
    /// Both tolerances must be finite and non-negative.
    pub fn validate(&self) -> Result<(), PassError> {
        for (name, value) in [("rtol", self.rtol), ("atol", self.atol)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(PassError::configuration(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Per-run options for [`PassManager::run`](crate::PassManager::run).
///
/// `input` and `tolerance` only matter when
/// [`PassManagerConfig::run_checks_after_each_pass`] is enabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RunOptions {
    /// Input the artifact is evaluated on before and after each pass.
    pub input: Option<Nested>,
    pub tolerance: Tolerance,
}

impl RunOptions {
    /// Options that evaluate the artifact on `input` around every pass.
    pub fn with_input(input: Nested) -> Self {
        Self {
            input: Some(input),
            ..Self::default()
        }
    }
}
