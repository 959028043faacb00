//! Built-in rewrites over [`Graph`].
//!
//! Every rewrite reports whether it changed the graph. Rewrites that forward
//! uses of one node to another leave the bypassed node in place; it is
//! removed by `eliminate-dead`.

use std::collections::{HashMap, HashSet};

use crate::dataflow::{Graph, NodeId, Op};
use crate::pass::{PassHandle, PassResult};

/// Names accepted by [`builtin`].
pub const BUILTIN_PASSES: &[&str] = &[
    "fold-constants",
    "simplify-identities",
    "eliminate-common",
    "eliminate-dead",
];

/// Look up a built-in pass by name.
pub fn builtin(name: &str) -> Option<PassHandle<Graph>> {
    let rewrite: fn(Graph) -> PassResult<Graph> = match name {
        "fold-constants" => fold_constants,
        "simplify-identities" => simplify_identities,
        "eliminate-common" => eliminate_common,
        "eliminate-dead" => eliminate_dead,
        _ => return None,
    };
    Some(PassHandle::from_fn(name, move |graph| Ok(rewrite(graph))))
}

fn constants(graph: &Graph) -> HashMap<NodeId, f64> {
    graph
        .nodes
        .iter()
        .filter_map(|n| match n.op {
            Op::Const { value } => Some((n.id, value)),
            _ => None,
        })
        .collect()
}

/// Replace operations whose arguments are all constants with their value.
pub fn fold_constants(mut graph: Graph) -> PassResult<Graph> {
    let mut known = constants(&graph);
    let mut modified = false;

    for node in &mut graph.nodes {
        let folded = match node.op {
            Op::Add { lhs, rhs } => known.get(&lhs).zip(known.get(&rhs)).map(|(a, b)| a + b),
            Op::Mul { lhs, rhs } => known.get(&lhs).zip(known.get(&rhs)).map(|(a, b)| a * b),
            Op::Neg { arg } => known.get(&arg).map(|v| -v),
            Op::Input { .. } | Op::Const { .. } => None,
        };
        if let Some(value) = folded {
            node.op = Op::Const { value };
            known.insert(node.id, value);
            modified = true;
        }
    }

    PassResult { artifact: graph, modified }
}

/// Algebraic identities: `x + 0`, `x * 1`, `-(-x)`, and `x * 0` when `x` is
/// itself a constant.
///
/// A non-constant `x * 0` is kept: the product has the shape of `x` and is
/// NaN wherever `x` is not finite.
pub fn simplify_identities(mut graph: Graph) -> PassResult<Graph> {
    let known = constants(&graph);
    let is = |id: NodeId, v: f64| known.get(&id) == Some(&v);

    let mut forwards = Vec::new();
    let mut zeroed = Vec::new();
    for node in &graph.nodes {
        match node.op {
            Op::Add { lhs, rhs } if is(rhs, 0.0) => forwards.push((node.id, lhs)),
            Op::Add { lhs, rhs } if is(lhs, 0.0) => forwards.push((node.id, rhs)),
            Op::Mul { lhs, rhs } if is(rhs, 1.0) => forwards.push((node.id, lhs)),
            Op::Mul { lhs, rhs } if is(lhs, 1.0) => forwards.push((node.id, rhs)),
            Op::Mul { lhs, rhs } if is(lhs, 0.0) || is(rhs, 0.0) => {
                if let (Some(a), Some(b)) = (known.get(&lhs), known.get(&rhs)) {
                    zeroed.push((node.id, a * b));
                }
            }
            Op::Neg { arg } => {
                if let Some(Op::Neg { arg: inner }) = graph.node(arg).map(|n| &n.op) {
                    forwards.push((node.id, *inner));
                }
            }
            _ => {}
        }
    }

    let mut modified = !zeroed.is_empty();
    for (id, value) in zeroed {
        if let Some(node) = graph.nodes.iter_mut().find(|n| n.id == id) {
            node.op = Op::Const { value };
        }
    }
    // Forward in reverse definition order so chains collapse onto their root.
    // Bypassed nodes with no remaining users do not count as a change.
    for (from, to) in forwards.into_iter().rev() {
        modified |= graph.replace_uses(from, to);
    }

    PassResult { artifact: graph, modified }
}

#[derive(PartialEq, Eq, Hash)]
enum Key {
    Input(String),
    Const(u64),
    Add(NodeId, NodeId),
    Mul(NodeId, NodeId),
    Neg(NodeId),
}

/// Common subexpression elimination over structurally identical nodes.
pub fn eliminate_common(mut graph: Graph) -> PassResult<Graph> {
    let mut seen: HashMap<Key, NodeId> = HashMap::new();
    let mut canonical: HashMap<NodeId, NodeId> = HashMap::new();
    let resolve = |canonical: &HashMap<NodeId, NodeId>, id: NodeId| {
        canonical.get(&id).copied().unwrap_or(id)
    };

    for node in &graph.nodes {
        let key = match &node.op {
            Op::Input { name } => Key::Input(name.clone()),
            Op::Const { value } => Key::Const(value.to_bits()),
            Op::Add { lhs, rhs } => Key::Add(resolve(&canonical, *lhs), resolve(&canonical, *rhs)),
            Op::Mul { lhs, rhs } => Key::Mul(resolve(&canonical, *lhs), resolve(&canonical, *rhs)),
            Op::Neg { arg } => Key::Neg(resolve(&canonical, *arg)),
        };
        match seen.get(&key) {
            Some(&first) => {
                canonical.insert(node.id, first);
            }
            None => {
                seen.insert(key, node.id);
            }
        }
    }

    let modified = graph.remap_uses(|id| resolve(&canonical, id));

    PassResult { artifact: graph, modified }
}

/// Remove nodes that no graph output depends on.
pub fn eliminate_dead(mut graph: Graph) -> PassResult<Graph> {
    let mut live: HashSet<NodeId> = graph.outputs.iter().copied().collect();
    for node in graph.nodes.iter().rev() {
        if live.contains(&node.id) {
            live.extend(node.op.args());
        }
    }

    let before = graph.nodes.len();
    graph.nodes.retain(|n| live.contains(&n.id));
    let modified = graph.nodes.len() != before;

    PassResult { artifact: graph, modified }
}
