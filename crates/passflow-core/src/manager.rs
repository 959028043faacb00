//! The pass manager: schedule upkeep and the fixed-point execution loop.
//!
//! A manager accumulates passes and constraints, derives a schedule from
//! them on the first run (and again after any change), and applies the whole
//! schedule repeatedly until no pass reports a modification or the step
//! budget is spent.
//!
//! ## Failure semantics
//!
//! Errors from passes, invariant checks and artifact hooks are returned
//! immediately and never retried. Since a pass consumes the artifact it is
//! given, a failing run drops the partially transformed artifact; nothing is
//! rolled back.

use crate::artifact::Artifact;
use crate::config::{PassManagerConfig, RunOptions};
use crate::constraint::Constraint;
use crate::equivalence::{check_equivalent, MismatchReport};
use crate::error::{BoxError, PassError};
use crate::pass::{PassHandle, PassResult};
use crate::schedule::{solve, validate_schedule};

/// Invariant check run on the artifact before the first pass and, with
/// [`PassManagerConfig::run_checks_after_each_pass`], after every pass.
pub type InvariantCheck<A> = Box<dyn Fn(&A) -> Result<(), BoxError> + Send + Sync>;

/// Outcome of [`PassManager::run`].
#[derive(Debug)]
pub struct ExecutionResult<A> {
    /// The artifact produced by the last pass that ran.
    pub artifact: A,
    /// Whether any pass in any step reported a modification.
    pub modified: bool,
    /// Number of steps executed, at most `steps`.
    pub steps_run: usize,
    /// Correctness mismatches downgraded by `suppress_check_failures`.
    pub warnings: Vec<MismatchReport>,
}

pub struct PassManager<A> {
    passes: Vec<PassHandle<A>>,
    constraints: Vec<Constraint>,
    config: PassManagerConfig,
    check: Option<InvariantCheck<A>>,
    validated: bool,
}

impl<A> PassManager<A> {
    /// Create an empty manager. Fails when `config.steps` is zero.
    pub fn new(config: PassManagerConfig) -> Result<Self, PassError> {
        Self::with_passes(config, Vec::new(), Vec::new())
    }

    pub fn with_passes(
        config: PassManagerConfig,
        passes: Vec<PassHandle<A>>,
        constraints: Vec<Constraint>,
    ) -> Result<Self, PassError> {
        config.validate()?;
        Ok(Self {
            passes,
            constraints,
            config,
            check: None,
            validated: false,
        })
    }

    /// Append a pass. The current schedule must be re-solved before the next run.
    pub fn add_pass(&mut self, pass: PassHandle<A>) {
        self.passes.push(pass);
        self.validated = false;
    }

    /// Append a constraint. The current schedule must be re-solved before the next run.
    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
        self.validated = false;
    }

    /// Install the invariant check, replacing any previous one.
    ///
    /// The check takes exactly one argument, the artifact; the signature
    /// enforces that at registration.
    pub fn set_invariant_check<F>(&mut self, check: F)
    where
        F: Fn(&A) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.check = Some(Box::new(check));
    }

    /// The passes in their current order.
    pub fn schedule(&self) -> &[PassHandle<A>] {
        &self.passes
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn config(&self) -> &PassManagerConfig {
        &self.config
    }

    /// Check the current pass order against every constraint without
    /// reordering it. A no-op until a pass or constraint is added.
    pub fn validate_constraints(&mut self) -> Result<(), PassError> {
        if self.validated {
            return Ok(());
        }
        for constraint in &self.constraints {
            validate_schedule(constraint, &self.passes)?;
        }
        self.validated = true;
        Ok(())
    }

    /// Reorder the passes so every constraint holds.
    ///
    /// A cyclic constraint set is an error when `steps` is 1. With more steps
    /// the best-effort order is kept and repetition is relied on to converge;
    /// whether it does is up to the passes.
    pub fn solve_constraints(&mut self) -> Result<(), PassError> {
        let solution = solve(&self.passes, &self.constraints);
        if solution.cyclic {
            if self.config.steps == 1 {
                return Err(PassError::CyclicSchedule {
                    steps: self.config.steps,
                });
            }
            tracing::warn!(
                steps = self.config.steps,
                "circular dependency between pass constraints, relying on repeated steps"
            );
        }
        self.passes = solution.schedule;
        self.validated = true;
        tracing::debug!(
            order = ?self.passes.iter().map(PassHandle::name).collect::<Vec<_>>(),
            "solved pass schedule"
        );
        Ok(())
    }

    fn check(&self, artifact: &A) -> Result<(), PassError> {
        match &self.check {
            Some(check) => check(artifact).map_err(PassError::External),
            None => Ok(()),
        }
    }
}

impl<A: Artifact> PassManager<A> {
    /// Run the schedule over `artifact` until a fixed point or until `steps`
    /// steps have run.
    pub fn run(
        &mut self,
        artifact: A,
        options: &RunOptions,
    ) -> Result<ExecutionResult<A>, PassError> {
        if !self.validated {
            self.solve_constraints()?;
        }

        self.check(&artifact)?;

        let checking = self.config.run_checks_after_each_pass;
        let input = options.input.as_ref().filter(|_| checking);
        if input.is_some() {
            options.tolerance.validate()?;
        }

        let mut current = artifact;
        let mut overall_modified = false;
        let mut steps_run = 0;
        let mut warnings = Vec::new();

        for step in 1..=self.config.steps {
            steps_run = step;
            let mut step_modified = false;

            for pass in &self.passes {
                let before = match input {
                    Some(input) => Some(current.evaluate(input)?),
                    None => None,
                };

                let PassResult { artifact, modified } = pass.run(current)?;
                current = artifact;
                step_modified |= modified;

                current.finalize()?;
                tracing::debug!(pass = %pass.id(), step, modified, "ran pass");

                if !checking {
                    continue;
                }
                self.check(&current)?;

                if let (Some(input), Some(before), true) = (input, before.as_ref(), modified) {
                    let after = current.evaluate(input)?;
                    if let Err(report) =
                        check_equivalent(pass.id(), before, &after, &options.tolerance)
                    {
                        if !self.config.suppress_check_failures {
                            return Err(PassError::CorrectnessMismatch(report));
                        }
                        tracing::warn!(
                            pass = %report.pass,
                            leaf = report.leaf_index,
                            "pass failed correctness check"
                        );
                        warnings.push(report);
                    }
                }
            }

            overall_modified |= step_modified;
            if !step_modified {
                tracing::debug!(step, "reached fixed point");
                break;
            }
        }

        Ok(ExecutionResult {
            artifact: current,
            modified: overall_modified,
            steps_run,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::constraint::this_before_that;
    use crate::nested::{Nested, Tensor};

    /// A scalar artifact that evaluates to `value * input`.
    #[derive(Debug, Clone, PartialEq)]
    struct Scalar {
        value: f64,
        trace: Vec<&'static str>,
    }

    impl Scalar {
        fn new(value: f64) -> Self {
            Self {
                value,
                trace: Vec::new(),
            }
        }
    }

    impl Artifact for Scalar {
        fn evaluate(&self, input: &Nested) -> Result<Nested, BoxError> {
            let x = input.tensors().first().map(|t| t.data[0]).unwrap_or(1.0);
            Ok(Nested::sequence([Tensor::scalar(self.value * x).into()]))
        }
    }

    fn tracing_pass(name: &'static str) -> PassHandle<Scalar> {
        PassHandle::from_fn(name, move |mut s: Scalar| {
            s.trace.push(name);
            Ok(PassResult::unchanged(s))
        })
    }

    fn counting_pass(name: &str, calls: Arc<AtomicUsize>, modifies: bool) -> PassHandle<Scalar> {
        PassHandle::from_fn(name, move |s| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(PassResult {
                artifact: s,
                modified: modifies,
            })
        })
    }

    fn config(steps: usize) -> PassManagerConfig {
        PassManagerConfig {
            steps,
            ..PassManagerConfig::default()
        }
    }

    #[test]
    fn test_zero_steps_is_configuration_error() {
        let result = PassManager::<Scalar>::new(config(0));
        assert!(matches!(result, Err(PassError::Configuration(_))));
    }

    #[test]
    fn test_runs_in_solved_order() {
        let a = tracing_pass("a");
        let b = tracing_pass("b");
        let mut pm = PassManager::new(config(1)).unwrap();
        pm.add_pass(b.clone());
        pm.add_pass(a.clone());
        pm.add_constraint(this_before_that(&a, &b));

        let result = pm.run(Scalar::new(1.0), &RunOptions::default()).unwrap();
        assert_eq!(result.artifact.trace, vec!["a", "b"]);
    }

    #[test]
    fn test_cycle_with_single_step_fails_before_any_pass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = counting_pass("a", Arc::clone(&calls), true);
        let b = counting_pass("b", Arc::clone(&calls), true);
        let mut pm = PassManager::with_passes(
            config(1),
            vec![a.clone(), b.clone()],
            vec![this_before_that(&a, &b), this_before_that(&b, &a)],
        )
        .unwrap();

        let err = pm.run(Scalar::new(1.0), &RunOptions::default()).unwrap_err();
        assert!(matches!(err, PassError::CyclicSchedule { steps: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cycle_tolerated_with_multiple_steps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = counting_pass("a", Arc::clone(&calls), false);
        let b = counting_pass("b", Arc::clone(&calls), false);
        let mut pm = PassManager::with_passes(
            config(3),
            vec![a.clone(), b.clone()],
            vec![this_before_that(&a, &b), this_before_that(&b, &a)],
        )
        .unwrap();

        let result = pm.run(Scalar::new(1.0), &RunOptions::default()).unwrap();
        assert!(!result.modified);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fixed_point_stops_after_one_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pm = PassManager::new(config(5)).unwrap();
        pm.add_pass(counting_pass("a", Arc::clone(&calls), false));
        pm.add_pass(counting_pass("b", Arc::clone(&calls), false));

        let result = pm.run(Scalar::new(7.0), &RunOptions::default()).unwrap();
        assert!(!result.modified);
        assert_eq!(result.steps_run, 1);
        assert_eq!(result.artifact, Scalar::new(7.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_step_budget_respected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pm = PassManager::new(config(4)).unwrap();
        pm.add_pass(counting_pass("a", Arc::clone(&calls), true));
        pm.add_pass(counting_pass("b", Arc::clone(&calls), false));

        let result = pm.run(Scalar::new(1.0), &RunOptions::default()).unwrap();
        assert!(result.modified);
        assert_eq!(result.steps_run, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_invariant_check_runs_before_passes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pm = PassManager::new(config(1)).unwrap();
        pm.add_pass(counting_pass("a", Arc::clone(&calls), true));
        pm.set_invariant_check(|s: &Scalar| {
            if s.value < 0.0 {
                return Err("negative value".into());
            }
            Ok(())
        });

        let err = pm.run(Scalar::new(-1.0), &RunOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "negative value");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invariant_check_after_each_pass() {
        let mut pm = PassManager::new(PassManagerConfig {
            run_checks_after_each_pass: true,
            ..PassManagerConfig::default()
        })
        .unwrap();
        pm.add_pass(PassHandle::in_place("negate", |s: &mut Scalar| {
            s.value = -s.value;
            Ok(())
        }));
        pm.set_invariant_check(|s: &Scalar| {
            if s.value < 0.0 {
                return Err("negative value".into());
            }
            Ok(())
        });

        let err = pm.run(Scalar::new(1.0), &RunOptions::default()).unwrap_err();
        assert!(matches!(err, PassError::External(_)));
    }

    #[test]
    fn test_pass_error_propagates_unchanged() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pm = PassManager::new(config(3)).unwrap();
        pm.add_pass(PassHandle::in_place("fail", |_: &mut Scalar| {
            Err("rewrite failed".into())
        }));
        pm.add_pass(counting_pass("after", Arc::clone(&calls), true));

        let err = pm.run(Scalar::new(1.0), &RunOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "rewrite failed");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    fn scaling_manager(factor: f64, suppress: bool) -> PassManager<Scalar> {
        let mut pm = PassManager::new(PassManagerConfig {
            steps: 1,
            run_checks_after_each_pass: true,
            suppress_check_failures: suppress,
        })
        .unwrap();
        pm.add_pass(PassHandle::in_place("scale", move |s: &mut Scalar| {
            s.value *= factor;
            Ok(())
        }));
        pm
    }

    #[test]
    fn test_equivalence_mismatch_is_fatal() {
        let mut pm = scaling_manager(1.5, false);
        let options = RunOptions::with_input(Tensor::scalar(1.0).into());

        let err = pm.run(Scalar::new(1.0), &options).unwrap_err();
        match err {
            PassError::CorrectnessMismatch(report) => {
                assert_eq!(report.pass, "scale");
                assert_eq!(report.leaf_index, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_equivalence_mismatch_suppressed() {
        let mut pm = scaling_manager(1.5, true);
        let options = RunOptions::with_input(Tensor::scalar(1.0).into());

        let result = pm.run(Scalar::new(1.0), &options).unwrap();
        assert_eq!(result.artifact.value, 1.5);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].leaf_index, 0);
    }

    #[test]
    fn test_equivalence_within_tolerance() {
        let mut pm = scaling_manager(1.0 + 5e-9, false);
        let options = RunOptions::with_input(Tensor::scalar(1.0).into());

        let result = pm.run(Scalar::new(1.0), &options).unwrap();
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_negative_tolerance_rejected_before_any_pass() {
        let mut pm = scaling_manager(1.0, false);
        let mut options = RunOptions::with_input(Tensor::scalar(1.0).into());
        options.tolerance.rtol = -1.0;

        let err = pm.run(Scalar::new(1.0), &options).unwrap_err();
        assert!(matches!(err, PassError::Configuration(_)));
    }

    #[test]
    fn test_equivalence_skipped_without_per_pass_checks() {
        let mut pm = PassManager::new(config(1)).unwrap();
        pm.add_pass(PassHandle::in_place("scale", |s: &mut Scalar| {
            s.value *= 2.0;
            Ok(())
        }));
        let options = RunOptions::with_input(Tensor::scalar(1.0).into());

        let result = pm.run(Scalar::new(1.0), &options).unwrap();
        assert_eq!(result.artifact.value, 2.0);
    }

    #[test]
    fn test_adding_pass_invalidates_schedule() {
        let a = tracing_pass("a");
        let b = tracing_pass("b");
        let c = tracing_pass("c");
        let mut pm = PassManager::new(config(1)).unwrap();
        pm.add_pass(a.clone());
        pm.add_pass(b.clone());
        pm.add_constraint(this_before_that(&a, &b));
        pm.run(Scalar::new(1.0), &RunOptions::default()).unwrap();

        pm.add_pass(c.clone());
        pm.add_constraint(this_before_that(&c, &a));
        let result = pm.run(Scalar::new(1.0), &RunOptions::default()).unwrap();
        assert_eq!(result.artifact.trace, vec!["c", "a", "b"]);
        pm.validate_constraints().unwrap();
    }

    #[test]
    fn test_validate_constraints_is_idempotent() {
        let evaluations = Arc::new(AtomicUsize::new(0));
        let a = tracing_pass("a");
        let b = tracing_pass("b");
        let mut pm = PassManager::new(config(1)).unwrap();
        pm.add_pass(b.clone());
        pm.add_pass(a.clone());
        let seen = Arc::clone(&evaluations);
        pm.add_constraint(Constraint::from_fn("counted", move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            true
        }));

        pm.validate_constraints().unwrap();
        let after_first = evaluations.load(Ordering::SeqCst);
        assert_eq!(after_first, 1);

        pm.validate_constraints().unwrap();
        assert_eq!(evaluations.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn test_validate_constraints_rejects_bad_order() {
        let a = tracing_pass("a");
        let b = tracing_pass("b");
        let mut pm = PassManager::new(config(1)).unwrap();
        pm.add_pass(b.clone());
        pm.add_pass(a.clone());
        pm.add_constraint(this_before_that(&a, &b));

        let first = pm.validate_constraints().unwrap_err();
        let second = pm.validate_constraints().unwrap_err();
        assert!(matches!(first, PassError::ScheduleViolation { .. }));
        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn test_managers_do_not_share_lists() {
        let mut first = PassManager::<Scalar>::new(PassManagerConfig::default()).unwrap();
        let second = PassManager::<Scalar>::new(PassManagerConfig::default()).unwrap();
        first.add_pass(tracing_pass("a"));
        first.add_constraint(Constraint::from_fn("any", |_, _| true));

        assert_eq!(first.schedule().len(), 1);
        assert!(second.schedule().is_empty());
        assert!(second.constraints().is_empty());
    }
}
