//! Arena storage for graph nodes.
//!
//! Nodes never hold references to each other; edges are [`NodeId`] indices
//! into the arena. Removed slots are left empty so existing ids stay valid.

use super::node::{GraphNode, NodeId, NodeOp};
use crate::errors::FeatgraphError;
use std::collections::{HashMap, VecDeque};

/// Owns every node of a graph or fragment.
#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<Option<GraphNode>>,
    live: usize,
}

impl NodeArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, returning its id.
    pub fn insert(&mut self, node: GraphNode) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Some(node));
        self.live += 1;
        id
    }

    /// Returns a node.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&GraphNode> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Returns a node mutably.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Returns a node that must exist.
    pub(crate) fn node(&self, id: NodeId) -> Result<&GraphNode, FeatgraphError> {
        self.get(id)
            .ok_or_else(|| FeatgraphError::Internal(format!("dangling node id {id}")))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut GraphNode, FeatgraphError> {
        self.get_mut(id)
            .ok_or_else(|| FeatgraphError::Internal(format!("dangling node id {id}")))
    }

    /// Removes a node, leaving its edges to the caller.
    pub fn remove(&mut self, id: NodeId) -> Option<GraphNode> {
        let node = self.slots.get_mut(id.0).and_then(Option::take);
        if node.is_some() {
            self.live -= 1;
        }
        node
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if there are no live nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Ids of the live nodes, in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| NodeId(i))
    }

    /// Live nodes with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|node| (NodeId(i), node)))
    }

    /// Consumes the arena, yielding the live nodes with their ids.
    pub(crate) fn into_nodes(self) -> impl Iterator<Item = (NodeId, GraphNode)> {
        self.slots
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|node| (NodeId(i), node)))
    }

    /// Adds an edge; the child's parent list keeps argument order.
    pub(crate) fn link(&mut self, parent: NodeId, child: NodeId) -> Result<(), FeatgraphError> {
        self.node_mut(parent)?.children.push(child);
        self.node_mut(child)?.parents.push(parent);
        Ok(())
    }

    /// Removes one child edge from `parent`.
    pub(crate) fn unlink_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
    ) -> Result<(), FeatgraphError> {
        let children = &mut self.node_mut(parent)?.children;
        if let Some(pos) = children.iter().position(|c| *c == child) {
            children.remove(pos);
        }
        Ok(())
    }

    /// Points every edge from `old` into `child` at `new` instead.
    pub(crate) fn replace_parent(
        &mut self,
        child: NodeId,
        old: NodeId,
        new: NodeId,
    ) -> Result<(), FeatgraphError> {
        let mut moved = 0;
        for parent in &mut self.node_mut(child)?.parents {
            if *parent == old {
                *parent = new;
                moved += 1;
            }
        }
        let new_children = &mut self.node_mut(new)?.children;
        new_children.extend(std::iter::repeat(child).take(moved));
        Ok(())
    }

    /// Clears every cached depth.
    pub(crate) fn invalidate_depths(&mut self) {
        for node in self.slots.iter_mut().flatten() {
            node.depth = None;
        }
    }

    /// Computes every depth: 0 for the root, 1 for other parentless nodes,
    /// otherwise one more than the deepest parent.
    ///
    /// Fails if the nodes do not form a DAG.
    pub(crate) fn compute_depths(&mut self) -> Result<(), FeatgraphError> {
        let mut indegree: HashMap<NodeId, usize> = self
            .iter()
            .map(|(id, node)| (id, node.parents.len()))
            .collect();
        let mut queue: VecDeque<NodeId> = self
            .iter()
            .filter(|(_, node)| node.parents.is_empty())
            .map(|(id, _)| id)
            .collect();
        let mut depths: HashMap<NodeId, usize> = HashMap::with_capacity(self.live);

        while let Some(id) = queue.pop_front() {
            let node = self.node(id)?;
            let depth = if node.parents.is_empty() {
                usize::from(!matches!(node.op, NodeOp::Root))
            } else {
                node.parents
                    .iter()
                    .map(|p| depths.get(p).copied().unwrap_or(0))
                    .max()
                    .unwrap_or(0)
                    + 1
            };
            depths.insert(id, depth);
            for child in &node.children {
                if let Some(remaining) = indegree.get_mut(child) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }

        if depths.len() < self.live {
            return Err(FeatgraphError::Internal(
                "graph contains a cycle; depths are undefined".to_string(),
            ));
        }
        for (id, depth) in depths {
            self.node_mut(id)?.depth = Some(depth);
        }
        Ok(())
    }

    /// Live ids sorted by depth (then by id), i.e. parents before children.
    ///
    /// Depths must be up to date.
    pub(crate) fn topological_order(&self) -> Vec<NodeId> {
        let mut ids: Vec<(usize, NodeId)> = self
            .iter()
            .map(|(id, node)| (node.depth.unwrap_or(usize::MAX), id))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::{feat, input};

    fn chain() -> (NodeArena, NodeId, NodeId, NodeId) {
        let mut arena = NodeArena::new();
        let root = arena.insert(GraphNode::root());
        let a = arena.insert(GraphNode::from_processor(input("a")));
        let x = arena.insert(GraphNode::from_processor(feat("x")));
        arena.link(root, a).unwrap();
        arena.link(a, x).unwrap();
        (arena, root, a, x)
    }

    #[test]
    fn test_depths() {
        let (mut arena, root, a, x) = chain();
        arena.compute_depths().unwrap();

        assert_eq!(arena.get(root).unwrap().depth(), Some(0));
        assert_eq!(arena.get(a).unwrap().depth(), Some(1));
        assert_eq!(arena.get(x).unwrap().depth(), Some(2));
        assert_eq!(arena.topological_order(), vec![root, a, x]);
    }

    #[test]
    fn test_remove_keeps_ids_stable() {
        let (mut arena, _, a, x) = chain();
        let removed = arena.remove(a).unwrap();

        assert_eq!(removed.name(), Some("a"));
        assert_eq!(arena.len(), 2);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(x).unwrap().name(), Some("x"));
        assert!(arena.remove(a).is_none());
    }

    #[test]
    fn test_replace_parent_moves_every_edge() {
        let (mut arena, root, a, x) = chain();
        let b = arena.insert(GraphNode::from_processor(input("b")));
        arena.link(root, b).unwrap();

        arena.replace_parent(x, a, b).unwrap();

        assert_eq!(arena.get(x).unwrap().parents(), &[b]);
        assert_eq!(arena.get(b).unwrap().children(), &[x]);
        // The old edge is left for the caller to drop.
        assert_eq!(arena.get(a).unwrap().children(), &[x]);
    }

    #[test]
    fn test_unlink_child_removes_one_edge() {
        let (mut arena, _, a, x) = chain();
        arena.link(a, x).unwrap();
        arena.unlink_child(a, x).unwrap();

        assert_eq!(arena.get(a).unwrap().children(), &[x]);
    }
}
