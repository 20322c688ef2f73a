//! The extraction driver.
//!
//! An [`Extractor`] owns an [`ExtractionDag`], collects pipelines into it and
//! drives extraction runs: it binds the dataset and policy, walks the
//! dataset in the configured order, hands values to a [`StorageSink`] and
//! resets every cache afterwards, whatever the outcome.

mod concurrent;
mod report;

pub use report::ExtractionReport;

use crate::config::{ExtractionOrder, ExtractorConfig};
use crate::core::{FeatureName, ParamValue, SampleData};
use crate::dag::{ExtractionDag, FailureRecord, FeatureSelection};
use crate::errors::{DuplicateSampleError, FeatgraphError};
use crate::observability::{extraction_span, SpanTimer};
use crate::pipeline::Fragment;
use crate::samples::Dataset;
use crate::storage::{DictStorage, JsonStorage, StorageSink};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds an extraction DAG from pipelines and runs it over datasets.
#[derive(Debug)]
pub struct Extractor {
    dag: Arc<ExtractionDag>,
    config: ExtractorConfig,
    dropped: BTreeSet<FeatureName>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            dag: Arc::new(ExtractionDag::new()),
            config: ExtractorConfig::default(),
            dropped: BTreeSet::new(),
        }
    }
}

impl Extractor {
    /// Creates an extractor.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ExtractorConfig) -> Result<Self, FeatgraphError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// The underlying DAG.
    #[must_use]
    pub fn dag(&self) -> &ExtractionDag {
        &self.dag
    }

    /// Features computed but never handed to storage.
    #[must_use]
    pub fn dropped_features(&self) -> &BTreeSet<FeatureName> {
        &self.dropped
    }

    /// Features handed to storage, per-sample ones first.
    #[must_use]
    pub fn stored_features(&self) -> Vec<FeatureName> {
        let mut names = self.stored_sample_features();
        names.extend(self.stored_dataset_features());
        names
    }

    fn stored_sample_features(&self) -> Vec<FeatureName> {
        self.without_dropped(self.dag.sample_feature_names())
    }

    fn stored_dataset_features(&self) -> Vec<FeatureName> {
        self.without_dropped(self.dag.dataset_feature_names())
    }

    fn without_dropped(&self, names: Vec<FeatureName>) -> Vec<FeatureName> {
        names
            .into_iter()
            .filter(|name| !self.dropped.contains(name))
            .collect()
    }

    /// Removes dropped features from one sample's values. Dropped features
    /// are still pulled, since any feature they feed counts on that read to
    /// release the cached value.
    fn drop_unstored(
        &self,
        mut values: BTreeMap<FeatureName, SampleData>,
    ) -> BTreeMap<FeatureName, SampleData> {
        values.retain(|name, _| !self.dropped.contains(name));
        values
    }

    fn dag_mut(&mut self) -> Result<&mut ExtractionDag, FeatgraphError> {
        Arc::get_mut(&mut self.dag).ok_or_else(|| {
            FeatgraphError::invalid_state("exclusive access to the DAG", "extraction in flight")
        })
    }

    /// Adds a pipeline. With `drop_on_save` its features are computed (they
    /// may feed other features) but not stored.
    ///
    /// # Errors
    ///
    /// Returns the DAG's build error.
    pub fn add_extraction(
        &mut self,
        fragment: Fragment,
        drop_on_save: bool,
    ) -> Result<Vec<FeatureName>, FeatgraphError> {
        let names = fragment.output_names();
        self.dag_mut()?.add_pipeline(fragment)?;
        if drop_on_save {
            self.dropped.extend(names.iter().cloned());
        }
        debug!(features = ?names, drop_on_save, "extraction added");
        Ok(names)
    }

    /// Solves dependencies now rather than at the first run.
    ///
    /// # Errors
    ///
    /// Returns the DAG's dependency error.
    pub fn resolve(&mut self) -> Result<(), FeatgraphError> {
        self.dag_mut()?.solve_dependencies()
    }

    /// Removes features from the DAG.
    ///
    /// # Errors
    ///
    /// Returns the DAG's dependency or pruning error.
    pub fn prune(&mut self, selection: FeatureSelection) -> Result<Vec<FeatureName>, FeatgraphError> {
        let dag = self.dag_mut()?;
        dag.solve_dependencies()?;
        let removed = dag.prune_features(selection)?;
        for name in &removed {
            self.dropped.remove(name);
        }
        Ok(removed)
    }

    /// Hyperparameters declared by the added pipelines and not yet set.
    #[must_use]
    pub fn hparams(&self) -> Vec<String> {
        self.dag.hparams()
    }

    /// Sets every hyperparameter listed by [`hparams`](Self::hparams).
    /// Extraction is refused until this has been done.
    ///
    /// # Errors
    ///
    /// Fails if `values` does not name exactly the unset hyperparameters.
    pub fn set_hparams(
        &mut self,
        values: &BTreeMap<String, ParamValue>,
    ) -> Result<(), FeatgraphError> {
        self.dag_mut()?.set_hparams(values)
    }

    /// Runs an extraction into `sink` following the configured order.
    ///
    /// Caches are reset and the dataset unbound even when the run fails.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate sample id, a processing error under a strict
    /// policy, or a storage error.
    pub fn extract(
        &mut self,
        dataset: Arc<dyn Dataset>,
        sink: &mut dyn StorageSink,
    ) -> Result<ExtractionReport, FeatgraphError> {
        let order = self.config.extraction_order;
        let policy = self.config.policy;
        self.dag_mut()?.bind(Arc::clone(&dataset), policy)?;
        let mut report = ExtractionReport::start(order, self.stored_features());
        let span = extraction_span(&report.run_id, &format!("{order:?}"));
        let _entered = span.enter();

        let outcome = match order {
            ExtractionOrder::Feature => self.run_feature_wise(sink, &mut report),
            ExtractionOrder::Sample => self.run_sample_wise(dataset.as_ref(), sink, &mut report),
        };
        self.close_run(outcome, sink, report)
    }

    /// Ends a run: resets the DAG, then reports or fails.
    fn close_run(
        &mut self,
        outcome: Result<(), FeatgraphError>,
        sink: &mut dyn StorageSink,
        mut report: ExtractionReport,
    ) -> Result<ExtractionReport, FeatgraphError> {
        let failures: Vec<FailureRecord> = self.dag_mut()?.finish();
        report.complete(failures);
        outcome?;
        sink.finalize()?;
        info!(
            run_id = %report.run_id,
            samples = report.sample_count,
            skipped = report.skipped_cells,
            failures = report.failures.len(),
            "extraction finished"
        );
        Ok(report)
    }

    fn run_feature_wise(
        &self,
        sink: &mut dyn StorageSink,
        report: &mut ExtractionReport,
    ) -> Result<(), FeatgraphError> {
        for name in self.dag.sample_feature_names() {
            let timer = SpanTimer::start(&name);
            let values = self.dag.extract_feature_wise(&name)?;
            if self.dropped.contains(&name) {
                // Pulled only to release the reads it owes its cached parent.
                debug!(feature = %name, elapsed_ms = timer.elapsed_ms(), "feature dropped");
                continue;
            }
            let sample_count = self.dataset_len()?;
            report.sample_count = report.sample_count.max(sample_count);
            report.skipped_cells += sample_count.saturating_sub(values.len());
            debug!(feature = %name, elapsed_ms = timer.elapsed_ms(), "feature stored");
            sink.store_feature(&name, values)?;
        }
        self.store_dataset_features(sink)
    }

    fn run_sample_wise(
        &self,
        dataset: &dyn Dataset,
        sink: &mut dyn StorageSink,
        report: &mut ExtractionReport,
    ) -> Result<(), FeatgraphError> {
        let names = self.dag.sample_feature_names();
        let stored = self.stored_sample_features().len();
        let mut seen = HashSet::new();
        for sample in dataset.samples() {
            let sample_id = sample.id();
            if !seen.insert(sample_id.clone()) {
                return Err(DuplicateSampleError::new(sample_id).into());
            }
            let values = self.dag.extract_sample_features(sample.as_ref(), &names)?;
            let values = self.drop_unstored(values);
            report.sample_count += 1;
            report.skipped_cells += stored - values.len();
            sink.store_sample(&sample_id, values)?;
        }
        self.store_dataset_features(sink)
    }

    fn store_dataset_features(&self, sink: &mut dyn StorageSink) -> Result<(), FeatgraphError> {
        for name in self.stored_dataset_features() {
            if let Some(value) = self.dag.extract_dataset_feature(&name)? {
                sink.store_dataset_feature(&name, value)?;
            }
        }
        Ok(())
    }

    fn dataset_len(&self) -> Result<usize, FeatgraphError> {
        let dataset = self.bound_dataset()?;
        Ok(dataset
            .sample_count()
            .unwrap_or_else(|| dataset.samples().count()))
    }

    fn bound_dataset(&self) -> Result<&dyn Dataset, FeatgraphError> {
        self.dag
            .dataset()
            .ok_or(FeatgraphError::Sample(crate::errors::SampleError::NoDataset))
    }

    /// Runs an extraction into an in-memory store indexed as configured.
    ///
    /// # Errors
    ///
    /// See [`extract`](Self::extract).
    pub fn extract_to_dict(
        &mut self,
        dataset: Arc<dyn Dataset>,
    ) -> Result<(DictStorage, ExtractionReport), FeatgraphError> {
        let mut storage = DictStorage::new(self.config.storage_indexing);
        let report = self.extract(dataset, &mut storage)?;
        Ok((storage, report))
    }

    /// Runs an extraction into a JSON file.
    ///
    /// # Errors
    ///
    /// See [`extract`](Self::extract); also fails if the file cannot be
    /// written.
    pub fn extract_to_json(
        &mut self,
        dataset: Arc<dyn Dataset>,
        path: impl AsRef<Path>,
    ) -> Result<ExtractionReport, FeatgraphError> {
        let mut storage = JsonStorage::create(path, self.config.storage_indexing)?;
        self.extract(dataset, &mut storage)
    }

    /// Computes only the dataset-wide features, dropped ones included.
    ///
    /// # Errors
    ///
    /// Fails on a processing error under a strict policy.
    pub fn extract_aggregations(
        &mut self,
        dataset: Arc<dyn Dataset>,
    ) -> Result<BTreeMap<FeatureName, SampleData>, FeatgraphError> {
        let policy = self.config.policy;
        self.dag_mut()?.bind(dataset, policy)?;
        let outcome = self.collect_aggregations();
        let failures = self.dag_mut()?.finish();
        if !failures.is_empty() {
            debug!(failures = failures.len(), "aggregations skipped failures");
        }
        outcome
    }

    fn collect_aggregations(&self) -> Result<BTreeMap<FeatureName, SampleData>, FeatgraphError> {
        let mut values = BTreeMap::new();
        for name in self.dag.dataset_feature_names() {
            if let Some(value) = self.dag.extract_dataset_feature(&name)? {
                values.insert(name, value);
            }
        }
        Ok(values)
    }
}
