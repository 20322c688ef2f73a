//! Processor traits and pipeline steps.
//!
//! Processors are the units of computation wired into the extraction graph.
//! Three flavours exist:
//!
//! - [`SampleProcessor`]: maps one sample's parent values to one value
//! - [`BatchProcessor`]: sees the whole dataset before answering per sample
//! - [`DatasetAggregator`]: reduces the whole dataset to a single value
//!
//! A [`Processor`] is the step a user places in a pipeline: one of the three
//! above, or an input/feature boundary marker.

mod builtins;
mod functions;

pub use builtins::{ds_feat, ds_input, feat, input, FeatureSpec, InputSpec, Scope};
pub use functions::{FnAggregator, FnProcessor, ListMap};

use crate::core::{ParamValue, ProcessorIdentity, SampleData, SampleId};
use crate::errors::PipelineBuildError;
use crate::pipeline::Fragment;
use crate::samples::{Dataset, Sample};
use std::fmt::{self, Debug};
use std::sync::Arc;

/// The number of inputs a processor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Arity {
    count: usize,
    variadic: bool,
}

impl Arity {
    /// Exactly `count` inputs.
    #[must_use]
    pub const fn exactly(count: usize) -> Self {
        Self {
            count,
            variadic: false,
        }
    }

    /// At least `count` inputs.
    #[must_use]
    pub const fn at_least(count: usize) -> Self {
        Self {
            count,
            variadic: true,
        }
    }

    /// Returns true if `n` inputs are acceptable.
    #[must_use]
    pub const fn accepts(&self, n: usize) -> bool {
        if self.variadic {
            n >= self.count
        } else {
            n == self.count
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variadic {
            write!(f, "at least {}", self.count)
        } else {
            write!(f, "exactly {}", self.count)
        }
    }
}

/// What a processor can see while processing one sample.
#[derive(Clone, Copy)]
pub struct ProcessContext<'a> {
    sample: &'a dyn Sample,
    dataset: Option<&'a dyn Dataset>,
    identity: Option<&'a ProcessorIdentity>,
}

impl<'a> ProcessContext<'a> {
    /// Creates a context for one sample.
    #[must_use]
    pub fn new(sample: &'a dyn Sample, dataset: Option<&'a dyn Dataset>) -> Self {
        Self {
            sample,
            dataset,
            identity: None,
        }
    }

    /// Attaches the identity of the node being computed, which carries the
    /// values of hyperparameters set on it.
    #[must_use]
    pub fn with_identity(mut self, identity: &'a ProcessorIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// A parameter of the node being computed, hyperparameters included
    /// once set.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&'a ParamValue> {
        self.identity.and_then(|identity| identity.param(name))
    }

    /// The sample being processed.
    #[must_use]
    pub fn sample(&self) -> &'a dyn Sample {
        self.sample
    }

    /// The id of the sample being processed.
    #[must_use]
    pub fn sample_id(&self) -> SampleId {
        self.sample.id()
    }

    /// The dataset bound to the current extraction, if any.
    #[must_use]
    pub fn dataset(&self) -> Option<&'a dyn Dataset> {
        self.dataset
    }
}

impl Debug for ProcessContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("sample", &self.sample.id())
            .field("has_dataset", &self.dataset.is_some())
            .finish()
    }
}

/// A processor applied independently to each sample.
pub trait SampleProcessor: Send + Sync + Debug {
    /// Structural identity of the processor and its configuration.
    fn identity(&self) -> ProcessorIdentity;

    /// Number of parent values the processor accepts.
    fn arity(&self) -> Arity {
        Arity::exactly(1)
    }

    /// Processes one sample's parent values, in parent order.
    fn process(&self, ctx: &ProcessContext<'_>, args: &[SampleData]) -> anyhow::Result<SampleData>;
}

/// A processor that must see every sample before producing any output.
pub trait BatchProcessor: Send + Sync + Debug {
    /// Structural identity of the processor and its configuration.
    fn identity(&self) -> ProcessorIdentity;

    /// Number of parent values the processor accepts.
    fn arity(&self) -> Arity {
        Arity::exactly(1)
    }

    /// Called once with every sample's parent values before any
    /// per-sample call. With several parents each entry is a JSON array.
    fn full_dataset_process(
        &mut self,
        sample_ids: &[SampleId],
        data: &[SampleData],
    ) -> anyhow::Result<()>;

    /// Processes one sample's parent values.
    fn process(&self, ctx: &ProcessContext<'_>, args: &[SampleData]) -> anyhow::Result<SampleData>;
}

/// Reduces the whole dataset to one value.
pub trait DatasetAggregator: Send + Sync + Debug {
    /// Structural identity of the aggregator and its configuration.
    fn identity(&self) -> ProcessorIdentity;

    /// Number of parent values the aggregator accepts per sample.
    fn arity(&self) -> Arity {
        Arity::at_least(1)
    }

    /// Aggregates every sample's parent values. With several parents each
    /// entry is a JSON array.
    fn aggregate(&self, data: Vec<SampleData>) -> anyhow::Result<SampleData>;
}

/// Packs one sample's parent values the way batch processors and
/// aggregators receive them.
pub(crate) fn pack_args(mut args: Vec<SampleData>) -> SampleData {
    if args.len() == 1 {
        args.pop().unwrap_or(SampleData::Null)
    } else {
        SampleData::Array(args)
    }
}

/// The kind of node a step becomes in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The single root representing the current sample.
    Root,
    /// Reads named data from the sample or dataset.
    Input,
    /// A named, externally visible output.
    Feature,
    /// Applies a [`SampleProcessor`].
    SampleProcessor,
    /// Applies a [`BatchProcessor`].
    BatchProcessor,
    /// Applies a [`DatasetAggregator`].
    Aggregator,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Input => write!(f, "input"),
            Self::Feature => write!(f, "feature"),
            Self::SampleProcessor => write!(f, "sample_processor"),
            Self::BatchProcessor => write!(f, "batch_processor"),
            Self::Aggregator => write!(f, "aggregator"),
        }
    }
}

/// A step placed in a pipeline.
#[derive(Debug)]
pub enum Processor {
    /// Reads named data.
    Input(InputSpec),
    /// Names an output.
    Feature(FeatureSpec),
    /// A per-sample processor.
    Sample(Arc<dyn SampleProcessor>),
    /// A whole-dataset batch processor.
    Batch(Box<dyn BatchProcessor>),
    /// A dataset aggregator.
    Aggregator(Arc<dyn DatasetAggregator>),
}

impl Processor {
    /// Wraps a sample processor.
    pub fn sample(processor: impl SampleProcessor + 'static) -> Self {
        Self::Sample(Arc::new(processor))
    }

    /// Wraps a batch processor.
    pub fn batch(processor: impl BatchProcessor + 'static) -> Self {
        Self::Batch(Box::new(processor))
    }

    /// Wraps an aggregator.
    pub fn aggregator(processor: impl DatasetAggregator + 'static) -> Self {
        Self::Aggregator(Arc::new(processor))
    }

    /// Returns the structural identity of the step.
    #[must_use]
    pub fn identity(&self) -> ProcessorIdentity {
        match self {
            Self::Input(spec) => spec.identity(),
            Self::Feature(spec) => spec.identity(),
            Self::Sample(p) => p.identity(),
            Self::Batch(p) => p.identity(),
            Self::Aggregator(p) => p.identity(),
        }
    }

    /// Returns the number of parents the step accepts.
    #[must_use]
    pub fn arity(&self) -> Arity {
        match self {
            Self::Input(_) => Arity::exactly(0),
            Self::Feature(_) => Arity::exactly(1),
            Self::Sample(p) => p.arity(),
            Self::Batch(p) => p.arity(),
            Self::Aggregator(p) => p.arity(),
        }
    }

    /// Returns the kind of node the step becomes.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Input(_) => NodeKind::Input,
            Self::Feature(_) => NodeKind::Feature,
            Self::Sample(_) => NodeKind::SampleProcessor,
            Self::Batch(_) => NodeKind::BatchProcessor,
            Self::Aggregator(_) => NodeKind::Aggregator,
        }
    }

    /// Chains this step into `next`.
    ///
    /// # Errors
    ///
    /// Returns an error on arity mismatch.
    pub fn then(self, next: impl Into<Fragment>) -> Result<Fragment, PipelineBuildError> {
        Fragment::from(self).then(next)
    }

    /// Places this step side by side with `other`.
    #[must_use]
    pub fn also(self, other: impl Into<Fragment>) -> Fragment {
        Fragment::from(self).also(other)
    }
}

impl<P: SampleProcessor + 'static> From<P> for Processor {
    fn from(processor: P) -> Self {
        Self::sample(processor)
    }
}
