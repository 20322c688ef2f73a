//! The extraction DAG.
//!
//! An [`ExtractionDag`] owns the merged graph of every pipeline added to it.
//! Fragments are absorbed with structural sharing: a node whose lineage
//! (ancestor key) matches an existing node is replaced by that node. Inputs
//! that name declared features are rewired to them by
//! [`solve_dependencies`](ExtractionDag::solve_dependencies).
//!
//! Lifecycle: `Building` (pipelines being added) -> `Resolved` (dependencies
//! solved) -> `Extracting` (dataset bound, caches live) -> back to `Resolved`
//! after [`finish`](ExtractionDag::finish).

mod failures;
#[cfg(test)]
mod integration_tests;

pub use failures::{FailureCollector, FailureRecord};

use crate::config::ExtractionPolicy;
use crate::core::{FeatureName, IdentityKey, ParamValue, SampleData, SampleId};
use crate::errors::{
    CycleDetectedError, DependencyError, DuplicateSampleError, FeatgraphError,
    PipelineBuildError, SampleError,
};
use crate::graph::{GraphNode, NodeArena, NodeId, PullError, Puller, DATASET_SCOPE_ID};
use crate::pipeline::Fragment;
use crate::processors::{InputSpec, NodeKind, Scope};
use crate::samples::{Dataset, DictSample, Sample};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle state of an [`ExtractionDag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DagState {
    /// Pipelines are being added; dependencies are unresolved.
    Building,
    /// Dependencies are solved and the structure is frozen.
    Resolved,
    /// A dataset is bound and pulls are in flight.
    Extracting,
}

impl fmt::Display for DagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Resolved => write!(f, "resolved"),
            Self::Extracting => write!(f, "extracting"),
        }
    }
}

/// Which features survive [`ExtractionDag::prune_features`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureSelection {
    /// Keep only these features.
    KeepOnly(HashSet<FeatureName>),
    /// Remove these features.
    Remove(HashSet<FeatureName>),
}

impl FeatureSelection {
    /// Keep only the named features.
    pub fn keep_only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<FeatureName>,
    {
        Self::KeepOnly(names.into_iter().map(Into::into).collect())
    }

    /// Remove the named features.
    pub fn remove<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<FeatureName>,
    {
        Self::Remove(names.into_iter().map(Into::into).collect())
    }

    fn names(&self) -> &HashSet<FeatureName> {
        match self {
            Self::KeepOnly(names) | Self::Remove(names) => names,
        }
    }
}

/// The merged, shared computation graph.
#[derive(Debug)]
pub struct ExtractionDag {
    arena: NodeArena,
    root: NodeId,
    features: BTreeMap<FeatureName, NodeId>,
    by_ancestor: HashMap<IdentityKey, NodeId>,
    state: DagState,
    dirty: bool,
    dataset: Option<Arc<dyn Dataset>>,
    policy: ExtractionPolicy,
    failures: FailureCollector,
}

impl Default for ExtractionDag {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionDag {
    /// Creates an empty DAG holding only the root.
    #[must_use]
    pub fn new() -> Self {
        let mut arena = NodeArena::new();
        let mut root_node = GraphNode::root();
        root_node.depth = Some(0);
        let root = arena.insert(root_node);
        Self {
            arena,
            root,
            features: BTreeMap::new(),
            by_ancestor: HashMap::new(),
            state: DagState::Building,
            dirty: false,
            dataset: None,
            policy: ExtractionPolicy::default(),
            failures: FailureCollector::new(),
        }
    }

    // ------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------

    /// Validates `fragment` and merges it into the graph.
    ///
    /// Output features are registered under their names. Every other node is
    /// shared with an existing node of identical lineage when there is one;
    /// inputs are attached to the root. Returns the ids of the registered
    /// feature nodes, in output order.
    ///
    /// # Errors
    ///
    /// Fails on an invalid fragment or a feature name that is already
    /// declared. The DAG is unchanged on error.
    pub fn add_pipeline(&mut self, fragment: Fragment) -> Result<Vec<NodeId>, FeatgraphError> {
        if self.state == DagState::Extracting {
            return Err(FeatgraphError::invalid_state(
                "building or resolved",
                self.state.to_string(),
            ));
        }
        let fragment = fragment.check()?;

        let mut names = Vec::with_capacity(fragment.outputs.len());
        for id in &fragment.outputs {
            let name = fragment
                .node(*id)
                .and_then(GraphNode::name)
                .ok_or_else(|| PipelineBuildError::malformed(id.to_string(), "unnamed output"))?;
            if self.features.contains_key(name) || names.iter().any(|n: &String| n == name) {
                return Err(PipelineBuildError::duplicate_feature(name).into());
            }
            names.push(name.to_string());
        }

        let Fragment {
            mut arena, outputs, ..
        } = fragment;
        let order = arena.topological_order();
        let keys = ancestor_keys(&arena, &order)?;

        let mut placed: HashMap<NodeId, NodeId> = HashMap::with_capacity(order.len());
        let mut shared = 0usize;
        for id in order {
            let key = keys
                .get(&id)
                .copied()
                .ok_or_else(|| FeatgraphError::Internal(format!("no key for {id}")))?;

            if let Some(&existing) = self.by_ancestor.get(&key) {
                let node = arena.node(id)?;
                if node.input_spec().is_some_and(|spec| spec.required_feature) {
                    self.arena.node_mut(existing)?.require_feature();
                }
                debug!(node = %node.label(), existing = %existing, "sharing existing node");
                placed.insert(id, existing);
                shared += 1;
                continue;
            }

            let node = arena
                .remove(id)
                .ok_or_else(|| FeatgraphError::Internal(format!("fragment node {id} vanished")))?;
            let parents: Vec<NodeId> = node
                .parents
                .iter()
                .filter_map(|p| placed.get(p).copied())
                .collect();
            let is_input = node.kind() == NodeKind::Input;
            let mut node = node.detached();
            node.ancestor_key = Some(key);

            let new_id = self.arena.insert(node);
            if is_input {
                self.arena.link(self.root, new_id)?;
            }
            for parent in parents {
                self.arena.link(parent, new_id)?;
            }
            self.by_ancestor.insert(key, new_id);
            placed.insert(id, new_id);
        }

        let mut registered = Vec::with_capacity(outputs.len());
        for (id, name) in outputs.iter().zip(&names) {
            let dag_id = placed
                .get(id)
                .copied()
                .ok_or_else(|| FeatgraphError::Internal(format!("output {id} not placed")))?;
            self.arena.node_mut(dag_id)?.exported = true;
            self.features.insert(name.clone(), dag_id);
            registered.push(dag_id);
        }

        self.refresh_depths()?;
        self.dirty = true;
        self.state = DagState::Building;
        info!(features = ?names, shared, nodes = self.arena.len(), "added pipeline");
        Ok(registered)
    }

    /// Rewires every root input that names a declared feature to that
    /// feature, and removes the input.
    ///
    /// Does nothing if no pipeline was added since the last call.
    ///
    /// # Errors
    ///
    /// Fails if an input declared as a feature has no matching feature, if
    /// the scopes disagree, or if the rewiring would create a cycle.
    pub fn solve_dependencies(&mut self) -> Result<(), FeatgraphError> {
        match self.state {
            DagState::Extracting => {
                return Err(FeatgraphError::invalid_state(
                    "building or resolved",
                    self.state.to_string(),
                ))
            }
            DagState::Resolved if !self.dirty => return Ok(()),
            _ => {}
        }

        let mut inputs = self.arena.node(self.root)?.children.clone();
        inputs.dedup();
        for input_id in inputs {
            let Some(spec) = self.arena.node(input_id)?.input_spec().cloned() else {
                continue;
            };
            match self.features.get(&spec.name).copied() {
                Some(feature_id) => self.resolve_input(input_id, &spec, feature_id)?,
                None if spec.required_feature => {
                    return Err(DependencyError::new(
                        spec.name,
                        "it is used as a feature but no pipeline declares it",
                    )
                    .into());
                }
                None => {}
            }
        }

        self.refresh_depths()?;
        self.dirty = false;
        self.state = DagState::Resolved;
        info!(
            features = self.features.len(),
            nodes = self.arena.len(),
            "dependencies resolved"
        );
        Ok(())
    }

    fn resolve_input(
        &mut self,
        input_id: NodeId,
        spec: &InputSpec,
        feature_id: NodeId,
    ) -> Result<(), FeatgraphError> {
        let feature = self.arena.node(feature_id)?;
        let feature_scope = feature.feature_spec().map_or(Scope::Sample, |f| f.scope);
        if feature_scope != spec.scope {
            return Err(DependencyError::new(
                spec.name.clone(),
                format!(
                    "input scope {:?} does not match feature scope {feature_scope:?}",
                    spec.scope
                ),
            )
            .into());
        }

        if let Some(path) = self.find_path(input_id, feature_id)? {
            let mut cycle = vec![feature.label()];
            for id in path.iter().skip(1) {
                cycle.push(self.arena.node(*id)?.label());
            }
            return Err(CycleDetectedError::new(cycle).into());
        }

        let mut children = self.arena.node(input_id)?.children.clone();
        children.sort_unstable();
        children.dedup();
        for child in children {
            self.arena.replace_parent(child, input_id, feature_id)?;
        }
        self.arena.unlink_child(self.root, input_id)?;
        if let Some(node) = self.arena.remove(input_id) {
            if let Some(key) = node.ancestor_key {
                self.by_ancestor.insert(key, feature_id);
            }
        }
        debug!(feature = %spec.name, "rewired input to feature");
        Ok(())
    }

    /// Path of node ids from `from` down to `to`, if `to` is a descendant.
    fn find_path(&self, from: NodeId, to: NodeId) -> Result<Option<Vec<NodeId>>, FeatgraphError> {
        let mut stack = vec![from];
        let mut came_from: HashMap<NodeId, NodeId> = HashMap::new();
        let mut seen: HashSet<NodeId> = HashSet::from([from]);

        while let Some(id) = stack.pop() {
            if id == to {
                let mut path = vec![to];
                let mut current = to;
                while let Some(&previous) = came_from.get(&current) {
                    path.push(previous);
                    current = previous;
                }
                path.reverse();
                return Ok(Some(path));
            }
            for child in &self.arena.node(id)?.children {
                if seen.insert(*child) {
                    came_from.insert(*child, id);
                    stack.push(*child);
                }
            }
        }
        Ok(None)
    }

    /// Removes features and garbage-collects the nodes only they needed.
    ///
    /// A removed feature that other nodes still read from is kept in the
    /// graph but no longer registered. Returns the removed names, sorted.
    ///
    /// # Errors
    ///
    /// Fails unless the DAG is resolved, or if a named feature is unknown.
    pub fn prune_features(
        &mut self,
        selection: FeatureSelection,
    ) -> Result<Vec<FeatureName>, FeatgraphError> {
        if self.state != DagState::Resolved || self.dirty {
            return Err(FeatgraphError::invalid_state(
                DagState::Resolved.to_string(),
                self.state.to_string(),
            ));
        }
        if let Some(unknown) = selection
            .names()
            .iter()
            .find(|name| !self.features.contains_key(*name))
        {
            return Err(FeatgraphError::UnknownFeature(unknown.clone()));
        }

        let mut removed: Vec<FeatureName> = match &selection {
            FeatureSelection::KeepOnly(keep) => self
                .features
                .keys()
                .filter(|name| !keep.contains(*name))
                .cloned()
                .collect(),
            FeatureSelection::Remove(names) => names.iter().cloned().collect(),
        };
        removed.sort();

        let mut stack = Vec::new();
        for name in &removed {
            let Some(id) = self.features.remove(name) else {
                continue;
            };
            let node = self.arena.node_mut(id)?;
            node.exported = false;
            if node.children.is_empty() {
                stack.push(id);
            } else {
                if let Some(key) = node.ancestor_key {
                    self.by_ancestor.remove(&key);
                }
                debug!(feature = %name, "unregistered feature kept as a dependency");
            }
        }

        let mut collected = 0usize;
        while let Some(id) = stack.pop() {
            let Some(node) = self.arena.get(id) else {
                continue;
            };
            if id == self.root || node.exported || !node.children.is_empty() {
                continue;
            }
            let Some(node) = self.arena.remove(id) else {
                continue;
            };
            self.by_ancestor.retain(|_, target| *target != id);
            collected += 1;
            for parent in node.parents {
                self.arena.unlink_child(parent, id)?;
                let parent_node = self.arena.node(parent)?;
                if parent != self.root && parent_node.children.is_empty() && !parent_node.exported
                {
                    stack.push(parent);
                }
            }
        }

        self.refresh_depths()?;
        info!(removed = ?removed, collected, "pruned features");
        Ok(removed)
    }

    /// Names of the hyperparameters declared by the graph's processors and
    /// not yet set, sorted.
    #[must_use]
    pub fn hparams(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .arena
            .iter()
            .flat_map(|(_, node)| node.identity().unset_hparams())
            .map(ToString::to_string)
            .collect();
        names.into_iter().collect()
    }

    /// Sets hyperparameter values on every processor declaring them.
    ///
    /// `values` must name exactly the unset hyperparameters. Structural
    /// sharing was decided when the pipelines were added, so setting values
    /// never splits or merges nodes.
    ///
    /// # Errors
    ///
    /// Fails while extracting, or if the names do not match [`hparams`](Self::hparams).
    pub fn set_hparams(
        &mut self,
        values: &BTreeMap<String, ParamValue>,
    ) -> Result<(), FeatgraphError> {
        if self.state == DagState::Extracting {
            return Err(FeatgraphError::invalid_state(
                "building or resolved",
                self.state.to_string(),
            ));
        }
        let expected = self.hparams();
        let given: Vec<String> = values.keys().cloned().collect();
        if expected != given {
            return Err(PipelineBuildError::hparam_mismatch(&expected, &given).into());
        }

        let ids: Vec<NodeId> = self.arena.ids().collect();
        let mut filled = 0;
        for id in ids {
            filled += self.arena.node_mut(id)?.set_hparams(values);
        }
        info!(hparams = ?given, filled, "hyperparameters set");
        Ok(())
    }

    fn check_hparams(&self) -> Result<(), FeatgraphError> {
        let unset = self.hparams();
        if unset.is_empty() {
            return Ok(());
        }
        Err(PipelineBuildError::unset_hparams(&unset).into())
    }

    fn refresh_depths(&mut self) -> Result<(), FeatgraphError> {
        self.arena.invalidate_depths();
        self.arena.compute_depths()
    }

    // ------------------------------------------------------------------
    // Extraction
    // ------------------------------------------------------------------

    /// Binds a dataset and a policy, entering the `Extracting` state.
    /// Dependencies are solved first if needed.
    ///
    /// # Errors
    ///
    /// Fails if an extraction is already running, dependencies cannot be
    /// solved or hyperparameters are unset.
    pub fn bind(
        &mut self,
        dataset: Arc<dyn Dataset>,
        policy: ExtractionPolicy,
    ) -> Result<(), FeatgraphError> {
        if self.state == DagState::Extracting {
            return Err(FeatgraphError::invalid_state(
                DagState::Resolved.to_string(),
                self.state.to_string(),
            ));
        }
        self.solve_dependencies()?;
        self.check_hparams()?;
        self.dataset = Some(dataset);
        self.policy = policy;
        self.state = DagState::Extracting;
        debug!(?policy, "dataset bound");
        Ok(())
    }

    /// Ends an extraction: clears every cache, unbinds the dataset and
    /// returns the failures recorded during the run.
    pub fn finish(&mut self) -> Vec<FailureRecord> {
        self.reset_caches();
        self.dataset = None;
        if self.state == DagState::Extracting {
            self.state = DagState::Resolved;
        }
        self.failures.drain()
    }

    /// Clears every node cache and batch state.
    pub fn reset_caches(&self) {
        for (_, node) in self.arena.iter() {
            node.reset();
        }
    }

    /// Extracts one feature over the whole dataset, skipping bad samples.
    ///
    /// # Errors
    ///
    /// Fails on an unknown feature, a duplicate sample id, or a processing
    /// error under a strict policy.
    pub fn extract_feature_wise(
        &self,
        name: &str,
    ) -> Result<BTreeMap<SampleId, SampleData>, FeatgraphError> {
        let dataset = self.bound_dataset()?;
        let node = self.feature_node(name)?;
        let puller = self.puller();

        let mut seen = HashSet::new();
        let mut values = BTreeMap::new();
        let mut skipped = 0usize;
        for sample in dataset.samples() {
            let sample_id = sample.id();
            if !seen.insert(sample_id.clone()) {
                return Err(DuplicateSampleError::new(sample_id).into());
            }
            match puller.pull(node, sample.as_ref()) {
                Ok(value) => {
                    values.insert(sample_id, value);
                }
                Err(PullError::BadSample) => skipped += 1,
                Err(PullError::Fatal(err)) => return Err(err),
            }
        }
        info!(feature = name, extracted = values.len(), skipped, "extracted feature");
        Ok(values)
    }

    /// Extracts every registered feature for one sample, skipping the
    /// features the sample is bad for.
    ///
    /// # Errors
    ///
    /// Fails on a processing error under a strict policy.
    pub fn extract_sample_wise(
        &self,
        sample: &dyn Sample,
    ) -> Result<BTreeMap<FeatureName, SampleData>, FeatgraphError> {
        let names: Vec<FeatureName> = self.features.keys().cloned().collect();
        self.extract_sample_features(sample, &names)
    }

    /// Extracts the named features for one sample.
    ///
    /// # Errors
    ///
    /// Fails on an unknown feature or a processing error under a strict
    /// policy.
    pub fn extract_sample_features(
        &self,
        sample: &dyn Sample,
        names: &[FeatureName],
    ) -> Result<BTreeMap<FeatureName, SampleData>, FeatgraphError> {
        self.bound_dataset()?;
        let puller = self.puller();
        let mut values = BTreeMap::new();
        for name in names {
            let node = self.feature_node(name)?;
            match puller.pull(node, sample) {
                Ok(value) => {
                    values.insert(name.clone(), value);
                }
                Err(PullError::BadSample) => {
                    debug!(feature = %name, sample_id = %sample.id(), "feature skipped");
                }
                Err(PullError::Fatal(err)) => return Err(err),
            }
        }
        Ok(values)
    }

    /// Computes a dataset-wide feature. Returns `None` if it failed under a
    /// skip-errors policy.
    ///
    /// # Errors
    ///
    /// Fails on an unknown or per-sample feature, or a processing error
    /// under a strict policy.
    pub fn extract_dataset_feature(&self, name: &str) -> Result<Option<SampleData>, FeatgraphError> {
        self.bound_dataset()?;
        let node = self.feature_node(name)?;
        if !self.arena.node(node)?.is_dataset_wide() {
            return Err(FeatgraphError::invalid_state(
                "a dataset-wide feature",
                format!("per-sample feature '{name}'"),
            ));
        }
        let scope = DictSample::new(DATASET_SCOPE_ID, serde_json::Map::new());
        match self.puller().pull(node, &scope) {
            Ok(value) => Ok(Some(value)),
            Err(PullError::BadSample) => Ok(None),
            Err(PullError::Fatal(err)) => Err(err),
        }
    }

    fn bound_dataset(&self) -> Result<&dyn Dataset, FeatgraphError> {
        if self.state != DagState::Extracting {
            return Err(FeatgraphError::invalid_state(
                DagState::Extracting.to_string(),
                self.state.to_string(),
            ));
        }
        self.dataset
            .as_deref()
            .ok_or(FeatgraphError::Sample(SampleError::NoDataset))
    }

    fn puller(&self) -> Puller<'_> {
        Puller::new(
            &self.arena,
            self.dataset.as_deref(),
            self.policy,
            &self.failures,
        )
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DagState {
        self.state
    }

    /// Returns true if pipelines were added since dependencies were solved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.arena.get(id)
    }

    /// Every live node.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> + '_ {
        self.arena.iter()
    }

    /// Number of live nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Registered feature names, sorted.
    #[must_use]
    pub fn feature_names(&self) -> Vec<FeatureName> {
        self.features.keys().cloned().collect()
    }

    /// Registered per-sample feature names, sorted.
    #[must_use]
    pub fn sample_feature_names(&self) -> Vec<FeatureName> {
        self.features_by_scope(false)
    }

    /// Registered dataset-wide feature names, sorted.
    #[must_use]
    pub fn dataset_feature_names(&self) -> Vec<FeatureName> {
        self.features_by_scope(true)
    }

    fn features_by_scope(&self, dataset_wide: bool) -> Vec<FeatureName> {
        self.features
            .iter()
            .filter(|(_, id)| {
                self.arena
                    .get(**id)
                    .is_some_and(|node| node.is_dataset_wide() == dataset_wide)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns true if `name` is a registered feature.
    #[must_use]
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    /// The node registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`FeatgraphError::UnknownFeature`] if no such feature exists.
    pub fn feature_node(&self, name: &str) -> Result<NodeId, FeatgraphError> {
        self.features
            .get(name)
            .copied()
            .ok_or_else(|| FeatgraphError::UnknownFeature(name.to_string()))
    }

    /// Names read from samples or the dataset, i.e. inputs still attached to
    /// the root, sorted.
    #[must_use]
    pub fn input_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .arena
            .get(self.root)
            .map(|root| {
                root.children
                    .iter()
                    .filter_map(|id| self.arena.get(*id))
                    .filter_map(|node| node.name().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names.dedup();
        names
    }

    /// Depth of a node.
    #[must_use]
    pub fn depth(&self, id: NodeId) -> Option<usize> {
        self.arena.get(id).and_then(GraphNode::depth)
    }

    /// The policy of the current (or last) extraction.
    #[must_use]
    pub fn policy(&self) -> ExtractionPolicy {
        self.policy
    }

    /// The bound dataset, while extracting.
    #[must_use]
    pub fn dataset(&self) -> Option<&dyn Dataset> {
        self.dataset.as_deref()
    }

    /// Failures recorded so far in the current extraction.
    #[must_use]
    pub fn failures(&self) -> &FailureCollector {
        &self.failures
    }
}

/// Structural keys of the fragment nodes, in topological order. Inputs and
/// features use their own identity; other nodes fold in their parents'
/// keys, in argument order.
fn ancestor_keys(
    arena: &NodeArena,
    order: &[NodeId],
) -> Result<HashMap<NodeId, IdentityKey>, FeatgraphError> {
    let mut keys = HashMap::with_capacity(order.len());
    for id in order {
        let node = arena.node(*id)?;
        let local = node.identity().key();
        let key = match node.kind() {
            NodeKind::Root | NodeKind::Input | NodeKind::Feature => local,
            _ => {
                let parents: Vec<IdentityKey> = node
                    .parents()
                    .iter()
                    .filter_map(|p| keys.get(p).copied())
                    .collect();
                local.with_ancestors(&parents)
            }
        };
        keys.insert(*id, key);
    }
    Ok(keys)
}
