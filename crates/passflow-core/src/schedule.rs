//! Schedule validation and constraint solving.
//!
//! [`validate_schedule`] checks a fixed order against one constraint without
//! reordering. [`solve`] derives an order from the constraints with a
//! cycle-aware depth-first topological sort and reports whether the induced
//! dependency graph was cyclic; deciding what a cycle means is left to the
//! caller.

use crate::constraint::Constraint;
use crate::error::PassError;
use crate::pass::PassId;

/// Check that every pair `(i, j)` with `i < j` in `passes` satisfies
/// `constraint`. Reports the first violating pair.
pub fn validate_schedule<T: AsRef<PassId>>(
    constraint: &Constraint,
    passes: &[T],
) -> Result<(), PassError> {
    for (i, a) in passes.iter().enumerate() {
        for (j, b) in passes.iter().enumerate().skip(i + 1) {
            let (a, b) = (a.as_ref(), b.as_ref());
            if constraint.allows(a, b) {
                continue;
            }
            return Err(PassError::ScheduleViolation {
                before: b.name().to_string(),
                after: a.name().to_string(),
                before_index: j,
                after_index: i,
            });
        }
    }
    Ok(())
}

/// Output of [`solve`].
#[derive(Debug, Clone)]
pub struct Solution<T> {
    /// Dependencies before dependents. Best effort when `cyclic` is set.
    pub schedule: Vec<T>,
    /// The constraints induced at least one dependency cycle.
    pub cyclic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Order `passes` so that every constraint holds for every scheduled pair.
///
/// With no constraints the input order is returned unchanged. Otherwise a
/// dependency edge `b -> a` ("`b` must run before `a`") is added for every
/// ordered pair `(a, b)` that some constraint rejects, and the graph is
/// topologically sorted. Traversal roots are taken in reverse input order so
/// unconstrained passes keep their relative order.
pub fn solve<T>(passes: &[T], constraints: &[Constraint]) -> Solution<T>
where
    T: AsRef<PassId> + Clone,
{
    if constraints.is_empty() {
        return Solution {
            schedule: passes.to_vec(),
            cyclic: false,
        };
    }

    let ids: Vec<&PassId> = passes.iter().map(AsRef::as_ref).collect();
    let n = ids.len();

    // successors[b] holds every pass that must run after b.
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut cyclic = false;
    for a in 0..n {
        for b in 0..n {
            if a == b || constraints.iter().all(|c| c.allows(ids[a], ids[b])) {
                continue;
            }
            if successors[a].contains(&b) {
                cyclic = true;
            }
            if !successors[b].contains(&a) {
                successors[b].push(a);
            }
        }
    }

    let mut marks = vec![Mark::Unvisited; n];
    let mut postorder = Vec::with_capacity(n);
    // (node, index of the next successor to explore)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in (0..n).rev() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::InProgress;
        stack.push((root, 0));

        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            if let Some(&succ) = successors[node].get(*next) {
                *next += 1;
                match marks[succ] {
                    Mark::Unvisited => {
                        marks[succ] = Mark::InProgress;
                        stack.push((succ, 0));
                    }
                    Mark::InProgress => cyclic = true,
                    Mark::Done => {}
                }
            } else {
                stack.pop();
                marks[node] = Mark::Done;
                postorder.push(node);
            }
        }
    }

    postorder.reverse();
    Solution {
        schedule: postorder.into_iter().map(|i| passes[i].clone()).collect(),
        cyclic,
    }
}
