//! Graph node model.

use crate::cache::NodeCache;
use crate::core::{IdentityKey, ParamValue, ProcessorIdentity, SampleData, SampleId};
use crate::processors::{
    Arity, BatchProcessor, DatasetAggregator, FeatureSpec, InputSpec, NodeKind, Processor,
    SampleProcessor,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Handle of a node inside a [`NodeArena`](super::NodeArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position of the node in its arena.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Precomputed batch state, filled once per extraction.
#[derive(Debug, Default)]
pub(crate) struct BatchState {
    pub(crate) computed: bool,
    pub(crate) failed: bool,
    /// Parent values per sample, popped as samples are answered. `None`
    /// marks a sample whose parents failed.
    pub(crate) pending: HashMap<SampleId, Option<Vec<SampleData>>>,
}

/// A batch processor together with its one-shot gate.
#[derive(Debug)]
pub(crate) struct BatchNode {
    pub(crate) processor: RwLock<Box<dyn BatchProcessor>>,
    pub(crate) state: Mutex<BatchState>,
}

impl BatchNode {
    fn new(processor: Box<dyn BatchProcessor>) -> Self {
        Self {
            processor: RwLock::new(processor),
            state: Mutex::new(BatchState::default()),
        }
    }

    pub(crate) fn reset(&self) {
        *self.state.lock() = BatchState::default();
    }
}

/// What a node computes.
#[derive(Debug)]
pub(crate) enum NodeOp {
    Root,
    Input(InputSpec),
    Feature(FeatureSpec),
    Sample(Arc<dyn SampleProcessor>),
    Batch(BatchNode),
    Aggregator(Arc<dyn DatasetAggregator>),
}

impl From<Processor> for NodeOp {
    fn from(processor: Processor) -> Self {
        match processor {
            Processor::Input(spec) => Self::Input(spec),
            Processor::Feature(spec) => Self::Feature(spec),
            Processor::Sample(p) => Self::Sample(p),
            Processor::Batch(p) => Self::Batch(BatchNode::new(p)),
            Processor::Aggregator(p) => Self::Aggregator(p),
        }
    }
}

/// A node of the extraction graph.
#[derive(Debug)]
pub struct GraphNode {
    pub(crate) op: NodeOp,
    identity: ProcessorIdentity,
    pub(crate) parents: Vec<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) depth: Option<usize>,
    pub(crate) ancestor_key: Option<IdentityKey>,
    pub(crate) dataset_wide: bool,
    pub(crate) exported: bool,
    pub(crate) cache: NodeCache,
}

impl GraphNode {
    pub(crate) fn root() -> Self {
        Self::with_op(NodeOp::Root, ProcessorIdentity::new("Root").with_label("Root"))
    }

    pub(crate) fn from_processor(processor: Processor) -> Self {
        let identity = processor.identity();
        Self::with_op(processor.into(), identity)
    }

    fn with_op(op: NodeOp, identity: ProcessorIdentity) -> Self {
        Self {
            op,
            identity,
            parents: Vec::new(),
            children: Vec::new(),
            depth: None,
            ancestor_key: None,
            dataset_wide: false,
            exported: false,
            cache: NodeCache::default(),
        }
    }

    /// The node kind.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match &self.op {
            NodeOp::Root => NodeKind::Root,
            NodeOp::Input(_) => NodeKind::Input,
            NodeOp::Feature(_) => NodeKind::Feature,
            NodeOp::Sample(_) => NodeKind::SampleProcessor,
            NodeOp::Batch(_) => NodeKind::BatchProcessor,
            NodeOp::Aggregator(_) => NodeKind::Aggregator,
        }
    }

    /// The identity of the node's own step.
    #[must_use]
    pub fn identity(&self) -> &ProcessorIdentity {
        &self.identity
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> String {
        self.identity.label()
    }

    pub(crate) fn set_hparams(&mut self, values: &BTreeMap<String, ParamValue>) -> usize {
        self.identity.set_hparams(values)
    }

    /// Number of parents the node's step accepts.
    #[must_use]
    pub fn arity(&self) -> Arity {
        match &self.op {
            NodeOp::Root | NodeOp::Input(_) => Arity::exactly(0),
            NodeOp::Feature(_) => Arity::exactly(1),
            NodeOp::Sample(p) => p.arity(),
            NodeOp::Batch(b) => b.processor.read().arity(),
            NodeOp::Aggregator(p) => p.arity(),
        }
    }

    /// Parents in argument order.
    #[must_use]
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// Children, one entry per edge.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Distance from the root, once computed.
    #[must_use]
    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    /// Structural key of the node and its lineage, once absorbed in a DAG.
    #[must_use]
    pub fn ancestor_key(&self) -> Option<IdentityKey> {
        self.ancestor_key
    }

    /// Returns true if the node holds one value for the whole dataset.
    #[must_use]
    pub fn is_dataset_wide(&self) -> bool {
        self.dataset_wide
    }

    /// Returns true if the node is a registered feature.
    #[must_use]
    pub fn is_exported(&self) -> bool {
        self.exported
    }

    /// Number of readers of the node's value: one per child edge, plus the
    /// extraction driver for a registered feature.
    #[must_use]
    pub fn fan_out(&self) -> usize {
        self.children.len() + usize::from(self.exported)
    }

    /// Name of an input or feature node.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.op {
            NodeOp::Input(spec) => Some(&spec.name),
            NodeOp::Feature(spec) => Some(&spec.name),
            _ => None,
        }
    }

    /// Values currently cached at the node.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub(crate) fn input_spec(&self) -> Option<&InputSpec> {
        match &self.op {
            NodeOp::Input(spec) => Some(spec),
            _ => None,
        }
    }

    pub(crate) fn feature_spec(&self) -> Option<&FeatureSpec> {
        match &self.op {
            NodeOp::Feature(spec) => Some(spec),
            _ => None,
        }
    }

    pub(crate) fn set_dataset_wide(&mut self, dataset_wide: bool) {
        self.dataset_wide = dataset_wide;
        self.cache = if dataset_wide {
            NodeCache::single()
        } else {
            NodeCache::default()
        };
    }

    /// Turns a feature used in input position into a feature reference.
    pub(crate) fn make_feature_reference(&mut self) {
        if let NodeOp::Feature(spec) = &self.op {
            let input = spec.as_input();
            self.identity = input.identity();
            self.op = NodeOp::Input(input);
        }
    }

    /// Flags an input as standing for a feature.
    pub(crate) fn require_feature(&mut self) {
        if let NodeOp::Input(spec) = &mut self.op {
            spec.required_feature = true;
        }
    }

    /// Detaches the node from any graph, keeping its step and scope.
    pub(crate) fn detached(mut self) -> Self {
        self.parents.clear();
        self.children.clear();
        self.depth = None;
        self
    }

    pub(crate) fn reset(&self) {
        self.cache.reset();
        if let NodeOp::Batch(batch) = &self.op {
            batch.reset();
        }
    }
}
