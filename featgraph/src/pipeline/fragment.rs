//! Pipeline fragments: unattached pieces of graph under construction.

use crate::errors::{codes, ErrorInfo, PipelineBuildError};
use crate::graph::{GraphNode, NodeArena, NodeId};
use crate::processors::{Processor, SampleProcessor};
use std::collections::HashMap;

/// A piece of graph built step by step before being absorbed by an
/// [`ExtractionDag`](crate::dag::ExtractionDag).
///
/// A fragment owns its nodes. `inputs` are the nodes without a parent yet,
/// `outputs` the current frontier. Composition moves nodes between fragments,
/// it never copies processors.
#[derive(Debug)]
pub struct Fragment {
    pub(crate) arena: NodeArena,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) outputs: Vec<NodeId>,
}

impl Fragment {
    /// Creates a fragment holding a single step.
    pub fn new(processor: impl Into<Processor>) -> Self {
        let mut arena = NodeArena::new();
        let id = arena.insert(GraphNode::from_processor(processor.into()));
        Self {
            arena,
            inputs: vec![id],
            outputs: vec![id],
        }
    }

    /// Connects this fragment's outputs to `next`'s inputs.
    ///
    /// - equal counts connect positionally
    /// - one output fans out to every input of `next`
    /// - several outputs merge into `next`'s single input, whose step must
    ///   accept that many arguments
    ///
    /// # Errors
    ///
    /// Returns an arity error when none of the above applies.
    pub fn then(mut self, next: impl Into<Self>) -> Result<Self, PipelineBuildError> {
        let next = next.into();
        let remap = self.absorb(next.arena);
        let next_inputs = remap_ids(&remap, &next.inputs);
        let next_outputs = remap_ids(&remap, &next.outputs);

        let (n_out, n_in) = (self.outputs.len(), next_inputs.len());
        if n_out == n_in {
            for (&out, &inp) in self.outputs.iter().zip(&next_inputs) {
                link(&mut self.arena, out, inp)?;
            }
        } else if n_out == 1 {
            let out = self.outputs[0];
            for &inp in &next_inputs {
                link(&mut self.arena, out, inp)?;
            }
        } else if n_in == 1 {
            let target = next_inputs[0];
            let node = self
                .arena
                .get(target)
                .ok_or_else(|| PipelineBuildError::new("merge target vanished"))?;
            let arity = node.arity();
            if !arity.accepts(n_out) {
                return Err(PipelineBuildError::arity(node.label(), arity.to_string(), n_out));
            }
            for &out in &self.outputs {
                link(&mut self.arena, out, target)?;
            }
        } else {
            return Err(PipelineBuildError::new(format!(
                "Cannot connect {n_out} outputs to {n_in} inputs"
            ))
            .with_error_info(
                ErrorInfo::new(codes::ARITY, "Arity mismatch")
                    .with_context_entry("outputs", n_out.to_string())
                    .with_context_entry("inputs", n_in.to_string()),
            ));
        }

        self.outputs = next_outputs;
        Ok(self)
    }

    /// Places `other` side by side with this fragment, without connecting
    /// them. Inputs and outputs are concatenated in order.
    #[must_use]
    pub fn also(mut self, other: impl Into<Self>) -> Self {
        let other = other.into();
        let remap = self.absorb(other.arena);
        self.inputs.extend(remap_ids(&remap, &other.inputs));
        self.outputs.extend(remap_ids(&remap, &other.outputs));
        self
    }

    /// Appends one step after the current outputs. With several outputs the
    /// step becomes their merge point.
    ///
    /// # Errors
    ///
    /// Returns an arity error if the step cannot take every output.
    pub fn append(self, processor: impl Into<Processor>) -> Result<Self, PipelineBuildError> {
        self.then(Self::new(processor))
    }

    /// Nodes without a parent, in declaration order.
    #[must_use]
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// The current frontier, in declaration order.
    #[must_use]
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Every node discovered so far.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> + '_ {
        self.arena.iter()
    }

    /// Returns a node of the fragment.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.arena.get(id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Always false: a fragment holds at least one step.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Names of the output features.
    #[must_use]
    pub fn output_names(&self) -> Vec<String> {
        self.outputs
            .iter()
            .filter_map(|id| self.arena.get(*id))
            .filter_map(|node| node.name().map(ToString::to_string))
            .collect()
    }

    /// Moves every node of `other` into this fragment, returning the id
    /// mapping.
    fn absorb(&mut self, other: NodeArena) -> HashMap<NodeId, NodeId> {
        let mut remap = HashMap::new();
        let mut moved = Vec::new();
        for (old, node) in other.into_nodes() {
            let new = self.arena.insert(node);
            remap.insert(old, new);
            moved.push(new);
        }
        for id in moved {
            if let Some(node) = self.arena.get_mut(id) {
                node.parents = remap_ids(&remap, &node.parents);
                node.children = remap_ids(&remap, &node.children);
            }
        }
        remap
    }
}

fn remap_ids(remap: &HashMap<NodeId, NodeId>, ids: &[NodeId]) -> Vec<NodeId> {
    ids.iter().filter_map(|id| remap.get(id).copied()).collect()
}

fn link(arena: &mut NodeArena, parent: NodeId, child: NodeId) -> Result<(), PipelineBuildError> {
    arena
        .link(parent, child)
        .map_err(|err| PipelineBuildError::new(err.to_string()))
}

impl From<Processor> for Fragment {
    fn from(processor: Processor) -> Self {
        Self::new(processor)
    }
}

impl<P: SampleProcessor + 'static> From<P> for Fragment {
    fn from(processor: P) -> Self {
        Self::new(Processor::sample(processor))
    }
}
