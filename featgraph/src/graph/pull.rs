//! The pull protocol: compute-or-retrieve a node's value for one sample.
//!
//! A pull on a node first consults the node's cache (when more than one
//! reader exists), then pulls every parent in argument order and applies the
//! node's step. Failures are infectious: once a parent reports a bad sample,
//! every descendant records the same sample as failed without computing.

use super::arena::NodeArena;
use super::node::{BatchNode, BatchState, GraphNode, NodeId, NodeOp};
use crate::cache::CacheLookup;
use crate::config::ExtractionPolicy;
use crate::core::{SampleData, SampleId};
use crate::dag::{FailureCollector, FailureRecord};
use crate::errors::{FeatgraphError, ProcessingError, SampleError};
use crate::processors::{
    pack_args, DatasetAggregator, InputSpec, ProcessContext, SampleProcessor, Scope,
};
use crate::samples::{Dataset, Sample};
use tracing::{debug, warn};

/// Sample id used when a failure concerns the dataset as a whole.
pub const DATASET_SCOPE_ID: &str = "<dataset>";

/// Why a pull produced no value.
#[derive(Debug)]
pub(crate) enum PullError {
    /// The sample failed at this node or upstream and is skipped.
    BadSample,
    /// The run must stop.
    Fatal(FeatgraphError),
}

impl From<FeatgraphError> for PullError {
    fn from(err: FeatgraphError) -> Self {
        Self::Fatal(err)
    }
}

pub(crate) type PullResult = Result<SampleData, PullError>;

/// Everything a pull needs besides the sample.
#[derive(Clone, Copy)]
pub(crate) struct Puller<'a> {
    arena: &'a NodeArena,
    dataset: Option<&'a dyn Dataset>,
    policy: ExtractionPolicy,
    failures: &'a FailureCollector,
}

impl<'a> Puller<'a> {
    pub(crate) fn new(
        arena: &'a NodeArena,
        dataset: Option<&'a dyn Dataset>,
        policy: ExtractionPolicy,
        failures: &'a FailureCollector,
    ) -> Self {
        Self {
            arena,
            dataset,
            policy,
            failures,
        }
    }

    /// Computes or retrieves the value of `id` for `sample`.
    pub(crate) fn pull(&self, id: NodeId, sample: &dyn Sample) -> PullResult {
        let node = self.arena.node(id)?;
        if matches!(node.op, NodeOp::Root) {
            return Ok(SampleData::Null);
        }
        if node.dataset_wide {
            return self.pull_single(node, sample);
        }

        let sample_id = sample.id();
        if node.cache.is_failed(&sample_id) {
            return Err(PullError::BadSample);
        }
        let readers = node.fan_out();
        let cached = readers > 1 && !self.policy.no_cache;
        if cached {
            match node.cache.get(&sample_id) {
                CacheLookup::Hit(value) => return Ok(value),
                CacheLookup::Failed => return Err(PullError::BadSample),
                CacheLookup::Miss => {}
            }
        }

        match self.compute(node, sample, &sample_id) {
            Ok(value) => {
                if cached {
                    node.cache.put(&sample_id, value.clone(), readers);
                }
                Ok(value)
            }
            Err(PullError::BadSample) => {
                node.cache.mark_failed(&sample_id);
                Err(PullError::BadSample)
            }
            Err(fatal) => Err(fatal),
        }
    }

    /// Pulls a dataset-wide node: computed once per extraction, under the
    /// cache gate.
    fn pull_single(&self, node: &GraphNode, sample: &dyn Sample) -> PullResult {
        let lookup = node.cache.get(DATASET_SCOPE_ID);
        if let Some(result) = Self::single_hit(lookup) {
            return result;
        }
        let _gate = node.cache.compute_gate();
        if let Some(result) = Self::single_hit(node.cache.get(DATASET_SCOPE_ID)) {
            return result;
        }

        match self.compute(node, sample, DATASET_SCOPE_ID) {
            Ok(value) => {
                node.cache.put(DATASET_SCOPE_ID, value.clone(), 1);
                Ok(value)
            }
            Err(PullError::BadSample) => {
                node.cache.mark_failed(DATASET_SCOPE_ID);
                Err(PullError::BadSample)
            }
            Err(fatal) => Err(fatal),
        }
    }

    fn single_hit(lookup: CacheLookup) -> Option<PullResult> {
        match lookup {
            CacheLookup::Hit(value) => Some(Ok(value)),
            CacheLookup::Failed => Some(Err(PullError::BadSample)),
            CacheLookup::Miss => None,
        }
    }

    fn compute(&self, node: &GraphNode, sample: &dyn Sample, sample_id: &str) -> PullResult {
        match &node.op {
            NodeOp::Root => Ok(SampleData::Null),
            NodeOp::Input(spec) => self.read_input(node, spec, sample, sample_id),
            NodeOp::Feature(_) => {
                let parent = node.parents.first().copied().ok_or_else(|| {
                    FeatgraphError::Internal(format!("{} has no parent", node.label()))
                })?;
                self.pull(parent, sample)
            }
            NodeOp::Sample(processor) => {
                let args = self.pull_parents(node, sample)?;
                self.apply(node, processor.as_ref(), sample, sample_id, &args)
            }
            NodeOp::Batch(batch) => self.pull_batch(node, batch, sample, sample_id),
            NodeOp::Aggregator(aggregator) => self.aggregate(node, aggregator.as_ref()),
        }
    }

    fn read_input(
        &self,
        node: &GraphNode,
        spec: &InputSpec,
        sample: &dyn Sample,
        sample_id: &str,
    ) -> PullResult {
        let result = match spec.scope {
            Scope::Sample => sample.lookup(&spec.name),
            Scope::Dataset => self
                .dataset
                .ok_or(SampleError::NoDataset)
                .and_then(|dataset| dataset.lookup(&spec.name)),
        };
        result.map_err(|err| self.fail(node, sample_id, err.into()))
    }

    /// Pulls every parent in argument order; any bad parent makes the whole
    /// tuple bad.
    ///
    /// Parents after a bad one are still pulled: a shared parent keeps its
    /// cached value until each child has read it once, so skipping the read
    /// would leave the entry behind for the rest of the run.
    fn pull_parents(
        &self,
        node: &GraphNode,
        sample: &dyn Sample,
    ) -> Result<Vec<SampleData>, PullError> {
        let mut args = Vec::with_capacity(node.parents.len());
        let mut bad = false;
        for parent in &node.parents {
            match self.pull(*parent, sample) {
                Ok(value) => args.push(value),
                Err(PullError::BadSample) => bad = true,
                Err(fatal) => return Err(fatal),
            }
        }
        if bad {
            return Err(PullError::BadSample);
        }
        Ok(args)
    }

    fn apply(
        &self,
        node: &GraphNode,
        processor: &dyn SampleProcessor,
        sample: &dyn Sample,
        sample_id: &str,
        args: &[SampleData],
    ) -> PullResult {
        let ctx = ProcessContext::new(sample, self.dataset).with_identity(node.identity());
        processor
            .process(&ctx, args)
            .map_err(|err| self.fail(node, sample_id, err))
    }

    fn pull_batch(
        &self,
        node: &GraphNode,
        batch: &BatchNode,
        sample: &dyn Sample,
        sample_id: &str,
    ) -> PullResult {
        let prepared = {
            let mut state = batch.state.lock();
            if !state.computed {
                self.prepare_batch(node, batch, &mut state)?;
            }
            if state.failed {
                return Err(PullError::BadSample);
            }
            state.pending.remove(sample_id)
        };

        let args = match prepared {
            Some(Some(args)) => args,
            Some(None) => return Err(PullError::BadSample),
            // Not part of the bound dataset, or already answered once.
            None => self.pull_parents(node, sample)?,
        };
        let ctx = ProcessContext::new(sample, self.dataset).with_identity(node.identity());
        let processor = batch.processor.read();
        processor
            .process(&ctx, &args)
            .map_err(|err| self.fail(node, sample_id, err))
    }

    /// Pulls the parents of every sample and runs the whole-dataset step.
    /// Runs under the batch gate, so exactly once per extraction.
    fn prepare_batch(
        &self,
        node: &GraphNode,
        batch: &BatchNode,
        state: &mut BatchState,
    ) -> Result<(), PullError> {
        let dataset = self.dataset.ok_or(FeatgraphError::Sample(SampleError::NoDataset))?;
        debug!(node = %node.label(), "running batch over the full dataset");

        let mut ids: Vec<SampleId> = Vec::new();
        let mut data: Vec<SampleData> = Vec::new();
        for item in dataset.samples() {
            let id = item.id();
            match self.pull_parents(node, item.as_ref()) {
                Ok(args) => {
                    ids.push(id.clone());
                    data.push(pack_args(args.clone()));
                    state.pending.insert(id, Some(args));
                }
                Err(PullError::BadSample) => {
                    state.pending.insert(id, None);
                }
                Err(fatal) => return Err(fatal),
            }
        }

        state.computed = true;
        let outcome = batch.processor.write().full_dataset_process(&ids, &data);
        if let Err(err) = outcome {
            state.failed = true;
            state.pending.clear();
            return Err(self.fail(node, DATASET_SCOPE_ID, err));
        }
        Ok(())
    }

    fn aggregate(&self, node: &GraphNode, aggregator: &dyn DatasetAggregator) -> PullResult {
        let dataset = self.dataset.ok_or(FeatgraphError::Sample(SampleError::NoDataset))?;
        let mut values = Vec::with_capacity(dataset.sample_count().unwrap_or(0));
        for item in dataset.samples() {
            match self.pull_parents(node, item.as_ref()) {
                Ok(args) => values.push(pack_args(args)),
                Err(PullError::BadSample) => {
                    debug!(node = %node.label(), sample_id = %item.id(), "excluded from aggregate");
                }
                Err(fatal) => return Err(fatal),
            }
        }
        aggregator
            .aggregate(values)
            .map_err(|err| self.fail(node, DATASET_SCOPE_ID, err))
    }

    /// Converts a processing error according to the policy.
    fn fail(&self, node: &GraphNode, sample_id: &str, err: anyhow::Error) -> PullError {
        let label = node.label();
        if self.policy.skip_errors {
            warn!(node = %label, sample_id, error = %err, "skipping bad sample");
            self.failures
                .record(FailureRecord::new(label, sample_id, format!("{err:#}")));
            PullError::BadSample
        } else {
            PullError::Fatal(ProcessingError::new(label, sample_id, err).into())
        }
    }
}
