use std::collections::{HashMap, HashSet, VecDeque};

use weft_core::error::{Result, WeftError};
use weft_core::types::WorkflowGraph;

/// Compute a deterministic execution order for the graph using Kahn's
/// algorithm. Ties are broken by node insertion order, so same-tier nodes
/// run in the order the caller listed them.
///
/// Edges whose endpoints are not known node ids are ignored. A cycle fails
/// the whole run before any node executes.
pub fn execution_order(graph: &WorkflowGraph) -> Result<Vec<String>> {
    let node_ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    // Duplicate ids would collapse in the degree map and corrupt the count.
    let mut seen: HashSet<&str> = HashSet::with_capacity(node_ids.len());
    for id in &node_ids {
        if !seen.insert(*id) {
            return Err(WeftError::Graph(format!("duplicate node id: {id}")));
        }
    }

    let mut adjacency: HashMap<&str, Vec<&str>> =
        node_ids.iter().map(|id| (*id, Vec::new())).collect();
    let mut in_degree: HashMap<&str, usize> = node_ids.iter().map(|id| (*id, 0)).collect();

    for edge in &graph.edges {
        let source = edge.source.as_str();
        let target = edge.target.as_str();
        if !in_degree.contains_key(target) {
            continue;
        }
        if let Some(next) = adjacency.get_mut(source) {
            next.push(target);
            in_degree.entry(target).and_modify(|d| *d += 1);
        }
    }

    // FIFO queue seeded in insertion order keeps the tie-break stable.
    let mut queue: VecDeque<&str> = node_ids
        .iter()
        .filter(|id| in_degree[**id] == 0)
        .copied()
        .collect();
    let mut order = Vec::with_capacity(node_ids.len());

    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());
        for &next in &adjacency[current] {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if order.len() != node_ids.len() {
        return Err(WeftError::GraphCycle);
    }

    Ok(order)
}
