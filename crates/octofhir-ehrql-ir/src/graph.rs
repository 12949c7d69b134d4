//! Graph traversal over IR nodes

use std::collections::HashSet;

use crate::{Frame, Node, Series};

/// Every node reachable from the roots, each listed once, parents before children
pub fn walk<'a>(roots: impl IntoIterator<Item = &'a Series>) -> Vec<Node> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<Node> = roots.into_iter().map(|s| Node::Series(s.clone())).collect();
    stack.reverse();
    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        let mut children = node.children();
        children.reverse();
        stack.extend(children);
        order.push(node);
    }
    order
}

/// Table-selection frames a series reads from, in discovery order
pub fn table_nodes(series: &Series) -> Vec<Frame> {
    walk([series])
        .into_iter()
        .filter_map(|node| match node {
            Node::Frame(frame) if frame.is_table() => Some(frame),
            _ => None,
        })
        .collect()
}
