//! A minimal dataflow graph artifact.
//!
//! Graphs are flat lists of element-wise tensor operations in definition
//! order: every node's arguments are defined by earlier nodes. The built-in
//! rewrites in [`passes`] operate on this representation and are what the
//! `passflow` CLI schedules.
//!
//! Node ids are only required to be unique. Rewrites may leave gaps;
//! [`Artifact::finalize`] renumbers nodes densely after every pass.

pub mod passes;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::Artifact;
use crate::error::BoxError;
use crate::nested::{Nested, Tensor};

pub type NodeId = usize;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("node {node} references undefined node {arg}")]
    UndefinedNode { node: NodeId, arg: NodeId },

    #[error("node id {0} is defined more than once")]
    DuplicateNode(NodeId),

    #[error("graph output references undefined node {0}")]
    UndefinedOutput(NodeId),

    #[error("missing graph input '{0}'")]
    MissingInput(String),

    #[error("graph input must be a mapping from input name to tensor")]
    InvalidInput,

    #[error("shape mismatch at node {node}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        node: NodeId,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Input { name: String },
    Const { value: f64 },
    Add { lhs: NodeId, rhs: NodeId },
    Mul { lhs: NodeId, rhs: NodeId },
    Neg { arg: NodeId },
}

impl Op {
    pub fn args(&self) -> Vec<NodeId> {
        match self {
            Op::Input { .. } | Op::Const { .. } => Vec::new(),
            Op::Add { lhs, rhs } | Op::Mul { lhs, rhs } => vec![*lhs, *rhs],
            Op::Neg { arg } => vec![*arg],
        }
    }

    pub(crate) fn map_args(&mut self, mut f: impl FnMut(NodeId) -> NodeId) {
        match self {
            Op::Input { .. } | Op::Const { .. } => {}
            Op::Add { lhs, rhs } | Op::Mul { lhs, rhs } => {
                *lhs = f(*lhs);
                *rhs = f(*rhs);
            }
            Op::Neg { arg } => *arg = f(*arg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(flatten)]
    pub op: Op,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub outputs: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node with the next free id and return that id.
    pub fn push(&mut self, op: Op) -> NodeId {
        let id = self.nodes.iter().map(|n| n.id + 1).max().unwrap_or(0);
        self.nodes.push(Node { id, op });
        id
    }

    pub fn input(&mut self, name: &str) -> NodeId {
        self.push(Op::Input {
            name: name.to_string(),
        })
    }

    pub fn constant(&mut self, value: f64) -> NodeId {
        self.push(Op::Const { value })
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Point every use of `from` (including graph outputs) at `to`. Returns
    /// whether any use was rewritten.
    pub(crate) fn replace_uses(&mut self, from: NodeId, to: NodeId) -> bool {
        self.remap_uses(|id| if id == from { to } else { id })
    }

    /// Rewrite every argument and output through `f`. Returns whether
    /// anything changed.
    pub(crate) fn remap_uses(&mut self, f: impl Fn(NodeId) -> NodeId) -> bool {
        let mut changed = false;
        let mut remap = |id: NodeId| {
            let new = f(id);
            changed |= new != id;
            new
        };
        for node in &mut self.nodes {
            node.op.map_args(&mut remap);
        }
        for output in &mut self.outputs {
            *output = remap(*output);
        }
        changed
    }
}

/// Structural invariants: unique ids, arguments defined before use, and
/// outputs that name existing nodes.
pub fn check_well_formed(graph: &Graph) -> Result<(), GraphError> {
    let mut defined = HashSet::new();
    for node in &graph.nodes {
        for arg in node.op.args() {
            if !defined.contains(&arg) {
                return Err(GraphError::UndefinedNode {
                    node: node.id,
                    arg,
                });
            }
        }
        if !defined.insert(node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
    }
    match graph.outputs.iter().find(|o| !defined.contains(o)) {
        Some(&missing) => Err(GraphError::UndefinedOutput(missing)),
        None => Ok(()),
    }
}

fn broadcast(
    node: NodeId,
    lhs: &Tensor,
    rhs: &Tensor,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Tensor, GraphError> {
    let (shape, data) = if lhs.numel() == rhs.numel() {
        let data = lhs.data.iter().zip(&rhs.data).map(|(&a, &b)| f(a, b)).collect();
        (lhs.shape.clone(), data)
    } else if lhs.numel() == 1 {
        let a = lhs.data[0];
        (rhs.shape.clone(), rhs.data.iter().map(|&b| f(a, b)).collect())
    } else if rhs.numel() == 1 {
        let b = rhs.data[0];
        (lhs.shape.clone(), lhs.data.iter().map(|&a| f(a, b)).collect())
    } else {
        return Err(GraphError::ShapeMismatch {
            node,
            lhs: lhs.shape.clone(),
            rhs: rhs.shape.clone(),
        });
    };
    Ok(Tensor {
        shape,
        data,
        device: Default::default(),
    })
}

impl Graph {
    /// Evaluate the graph on a mapping from input name to tensor, returning a
    /// sequence with one tensor per graph output.
    pub fn eval(&self, input: &Nested) -> Result<Nested, GraphError> {
        let Nested::Mapping { entries } = input else {
            return Err(GraphError::InvalidInput);
        };

        let mut values: HashMap<NodeId, Tensor> = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let arg = |id: NodeId| {
                values
                    .get(&id)
                    .ok_or(GraphError::UndefinedNode { node: node.id, arg: id })
            };
            let value = match &node.op {
                Op::Input { name } => match entries.get(name) {
                    Some(Nested::Tensor(t)) => t.to_host(),
                    Some(_) => return Err(GraphError::InvalidInput),
                    None => return Err(GraphError::MissingInput(name.clone())),
                },
                Op::Const { value } => Tensor::scalar(*value),
                Op::Add { lhs, rhs } => broadcast(node.id, arg(*lhs)?, arg(*rhs)?, |a, b| a + b)?,
                Op::Mul { lhs, rhs } => broadcast(node.id, arg(*lhs)?, arg(*rhs)?, |a, b| a * b)?,
                Op::Neg { arg: a } => {
                    let t = arg(*a)?;
                    Tensor {
                        shape: t.shape.clone(),
                        data: t.data.iter().map(|v| -v).collect(),
                        device: t.device,
                    }
                }
            };
            values.insert(node.id, value);
        }

        let outputs = self
            .outputs
            .iter()
            .map(|id| {
                values
                    .get(id)
                    .cloned()
                    .map(Nested::Tensor)
                    .ok_or(GraphError::UndefinedOutput(*id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Nested::Sequence { items: outputs })
    }

    /// Renumber nodes densely in definition order.
    pub fn recompile(&mut self) -> Result<(), GraphError> {
        let renumber: HashMap<NodeId, NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.id, index))
            .collect();

        for (index, node) in self.nodes.iter_mut().enumerate() {
            let mut dangling = None;
            node.op.map_args(|arg| match renumber.get(&arg) {
                Some(&new) => new,
                None => {
                    dangling.get_or_insert(arg);
                    arg
                }
            });
            if let Some(arg) = dangling {
                return Err(GraphError::UndefinedNode { node: node.id, arg });
            }
            node.id = index;
        }
        for output in &mut self.outputs {
            *output = *renumber
                .get(output)
                .ok_or(GraphError::UndefinedOutput(*output))?;
        }
        Ok(())
    }
}

impl Artifact for Graph {
    fn finalize(&mut self) -> Result<(), BoxError> {
        Ok(self.recompile()?)
    }

    fn evaluate(&self, input: &Nested) -> Result<Nested, BoxError> {
        Ok(self.eval(input)?)
    }
}
