//! Output equivalence check between evaluations before and after a pass.
//!
//! Both results are flattened into their tensor leaves with the same
//! traversal (see [`Nested::tensors`]) and compared pairwise. Structural
//! congruence of the two results is assumed: leaves are paired by position
//! and surplus leaves on either side are ignored.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Tolerance;
use crate::nested::{Nested, Tensor};
use crate::pass::PassId;

/// The first output leaf that differed between two evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MismatchReport {
    /// Name of the pass that produced the divergent artifact.
    pub pass: String,
    /// Position of the leaf in flattened traversal order.
    pub leaf_index: usize,
    pub detail: MismatchDetail,
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pass {} failed correctness check due to output {}",
            self.pass, self.leaf_index
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MismatchDetail {
    /// The leaves hold a different number of elements.
    Shape {
        before: Vec<usize>,
        after: Vec<usize>,
    },
    /// The first element outside tolerance.
    Value { element: usize, before: f64, after: f64 },
}

impl Tolerance {
    /// Element-wise closeness with `equal_nan` semantics.
    pub fn is_close(&self, before: f64, after: f64) -> bool {
        if before.is_nan() || after.is_nan() {
            return before.is_nan() && after.is_nan();
        }
        if before == after {
            return true;
        }
        if !before.is_finite() || !after.is_finite() {
            return false;
        }
        (after - before).abs() <= self.atol + self.rtol * before.abs()
    }
}

/// Compare every corresponding pair of tensor leaves of `before` and `after`.
///
/// Returns the first mismatching leaf, by flattened index.
pub fn check_equivalent(
    pass: &PassId,
    before: &Nested,
    after: &Nested,
    tolerance: &Tolerance,
) -> Result<(), MismatchReport> {
    let lhs = before.tensors();
    let rhs = after.tensors();

    for (leaf_index, (x, y)) in lhs.into_iter().zip(rhs).enumerate() {
        if let Some(detail) = compare_leaf(x, y, tolerance) {
            return Err(MismatchReport {
                pass: pass.name().to_string(),
                leaf_index,
                detail,
            });
        }
    }
    Ok(())
}

fn compare_leaf(before: &Tensor, after: &Tensor, tolerance: &Tolerance) -> Option<MismatchDetail> {
    // Normalize to a common location so only values are compared.
    let (before, after): (Cow<'_, Tensor>, Cow<'_, Tensor>) = if before.device != after.device {
        (Cow::Owned(before.to_host()), Cow::Owned(after.to_host()))
    } else {
        (Cow::Borrowed(before), Cow::Borrowed(after))
    };

    if before.numel() != after.numel() {
        return Some(MismatchDetail::Shape {
            before: before.shape.clone(),
            after: after.shape.clone(),
        });
    }

    before
        .data
        .iter()
        .zip(&after.data)
        .position(|(&b, &a)| !tolerance.is_close(b, a))
        .map(|element| MismatchDetail::Value {
            element,
            before: before.data[element],
            after: after.data[element],
        })
}
