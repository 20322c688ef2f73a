//! Concurrent sample-wise extraction.
//!
//! Samples are extracted on tokio's blocking pool, `concurrency` at a time.
//! Results are consumed in dataset order, so the sink sees the same
//! sequence as with [`Extractor::extract`].

use super::{Extractor, ExtractionReport};
use crate::config::ExtractionOrder;
use crate::core::{FeatureName, SampleData, SampleId};
use crate::dag::{ExtractionDag, FailureRecord};
use crate::errors::{DuplicateSampleError, FeatgraphError, ProcessingError};
use crate::observability::extraction_span;
use crate::samples::{Dataset, Sample};
use crate::storage::StorageSink;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{warn, Instrument};

type SampleValues = BTreeMap<FeatureName, SampleData>;
type SampleTask = JoinHandle<Result<SampleValues, FeatgraphError>>;

/// Label used for failures caused by the per-sample timeout.
const TIMEOUT_ORIGIN: &str = "<timeout>";

enum SampleOutcome {
    Done {
        sample_id: SampleId,
        result: Result<SampleValues, FeatgraphError>,
    },
    TimedOut {
        sample_id: SampleId,
        task: SampleTask,
    },
    Skipped,
}

impl Extractor {
    /// Runs a sample-wise extraction with up to `concurrency` samples in
    /// flight, honouring the per-sample timeout if one is configured.
    ///
    /// Timed-out samples are reported as failures under a skip-errors
    /// policy and abort the run otherwise. Their work is awaited before the
    /// DAG is reset.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate sample id, a processing error or timeout under
    /// a strict policy, or a storage error.
    pub async fn extract_concurrent(
        &mut self,
        dataset: Arc<dyn Dataset>,
        sink: &mut dyn StorageSink,
    ) -> Result<ExtractionReport, FeatgraphError> {
        let policy = self.config.policy;
        self.dag_mut()?.bind(Arc::clone(&dataset), policy)?;
        let mut report = ExtractionReport::start(ExtractionOrder::Sample, self.stored_features());
        let span = extraction_span(&report.run_id, "concurrent");

        let outcome = self
            .run_concurrent(dataset.as_ref(), sink, &mut report)
            .instrument(span)
            .await;
        self.close_run(outcome, sink, report)
    }

    async fn run_concurrent(
        &self,
        dataset: &dyn Dataset,
        sink: &mut dyn StorageSink,
        report: &mut ExtractionReport,
    ) -> Result<(), FeatgraphError> {
        let mut seen = HashSet::new();
        let mut samples = Vec::with_capacity(dataset.sample_count().unwrap_or(0));
        for sample in dataset.samples() {
            let sample_id = sample.id();
            if !seen.insert(sample_id.clone()) {
                return Err(DuplicateSampleError::new(sample_id).into());
            }
            samples.push(sample);
        }

        let names = Arc::new(self.dag.sample_feature_names());
        let stored = self.stored_sample_features().len();
        let timeout = self.config.sample_timeout();
        let abort = Arc::new(AtomicBool::new(false));
        let skip_errors = self.config.policy.skip_errors;

        let mut outcomes = stream::iter(samples)
            .map(|sample| {
                extract_one(
                    Arc::clone(&self.dag),
                    sample,
                    Arc::clone(&names),
                    timeout,
                    Arc::clone(&abort),
                )
            })
            .buffered(self.config.concurrency);

        let mut first_error: Option<FeatgraphError> = None;
        let mut stalled: Vec<SampleTask> = Vec::new();
        while let Some(outcome) = outcomes.next().await {
            if first_error.is_some() {
                if let SampleOutcome::TimedOut { task, .. } = outcome {
                    stalled.push(task);
                }
                continue;
            }
            let step = match outcome {
                SampleOutcome::Done { sample_id, result } => result.and_then(|values| {
                    let values = self.drop_unstored(values);
                    report.sample_count += 1;
                    report.skipped_cells += stored - values.len();
                    sink.store_sample(&sample_id, values)
                }),
                SampleOutcome::TimedOut { sample_id, task } => {
                    stalled.push(task);
                    report.sample_count += 1;
                    timed_out(report, &sample_id, stored, timeout, skip_errors)
                }
                SampleOutcome::Skipped => Ok(()),
            };
            if let Err(err) = step {
                abort.store(true, Ordering::Release);
                first_error = Some(err);
            }
        }
        drop(outcomes);

        for task in stalled {
            // Results of abandoned samples are discarded.
            let _ = task.await;
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        self.store_dataset_features(sink)
    }
}

fn timed_out(
    report: &mut ExtractionReport,
    sample_id: &str,
    feature_count: usize,
    timeout: Option<Duration>,
    skip_errors: bool,
) -> Result<(), FeatgraphError> {
    let limit = timeout.map_or(0.0, |d| d.as_secs_f64());
    let message = format!("sample exceeded the {limit}s timeout");
    if !skip_errors {
        return Err(
            ProcessingError::new(TIMEOUT_ORIGIN, sample_id, anyhow::anyhow!(message)).into(),
        );
    }
    warn!(sample_id, timeout_s = limit, "sample timed out");
    report.skipped_cells += feature_count;
    report.timed_out.push(sample_id.to_string());
    report
        .failures
        .push(FailureRecord::new(TIMEOUT_ORIGIN, sample_id, message));
    Ok(())
}

async fn extract_one(
    dag: Arc<ExtractionDag>,
    sample: Arc<dyn Sample>,
    names: Arc<Vec<FeatureName>>,
    timeout: Option<Duration>,
    abort: Arc<AtomicBool>,
) -> SampleOutcome {
    if abort.load(Ordering::Acquire) {
        return SampleOutcome::Skipped;
    }
    let sample_id = sample.id();
    let mut task: SampleTask =
        tokio::task::spawn_blocking(move || dag.extract_sample_features(sample.as_ref(), &names));

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => return SampleOutcome::TimedOut { sample_id, task },
        },
        None => task.await,
    };
    let result = joined
        .map_err(|err| FeatgraphError::Internal(format!("extraction task failed: {err}")))
        .and_then(|values| values);
    SampleOutcome::Done { sample_id, result }
}

#[cfg(test)]
mod tests {
    use crate::config::ExtractorConfig;
    use crate::errors::FeatgraphError;
    use crate::extractor::Extractor;
    use crate::processors::{feat, input};
    use crate::testing::{
        numbers_dataset, plus_one, shared, times_two, CountingProcessor, FailingProcessor,
        RecordingSink, SlowProcessor,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_matches_sequential_order() {
        let mut extractor = Extractor::new(ExtractorConfig::default().with_concurrency(3)).unwrap();
        extractor
            .add_extraction(input("a").then(times_two()).unwrap().then(feat("double")).unwrap(), false)
            .unwrap();
        let mut sink = RecordingSink::new();

        let report = extractor
            .extract_concurrent(shared(numbers_dataset(&[1, 2, 3, 4, 5])), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.stored_samples(), vec!["0", "1", "2", "3", "4"]);
        assert_eq!(report.sample_count, 5);
        assert!(sink.is_finalized());
    }

    #[tokio::test]
    async fn test_shared_node_runs_once_per_sample_concurrently() {
        let counter = CountingProcessor::new("shared");
        let mut extractor = Extractor::new(ExtractorConfig::default().with_concurrency(4)).unwrap();
        extractor
            .add_extraction(
                input("a")
                    .then(counter.clone())
                    .unwrap()
                    .then(feat("x").also(feat("y")))
                    .unwrap(),
                false,
            )
            .unwrap();
        let mut sink = RecordingSink::new();

        extractor
            .extract_concurrent(shared(numbers_dataset(&[1, 2, 3, 4, 5, 6])), &mut sink)
            .await
            .unwrap();

        assert_eq!(counter.calls(), 6);
    }

    #[tokio::test]
    async fn test_timeout_recorded_under_skip_errors() {
        let config = ExtractorConfig::default()
            .with_skip_errors(true)
            .with_sample_timeout(0.05);
        let mut extractor = Extractor::new(config).unwrap();
        extractor
            .add_extraction(
                input("a")
                    .then(SlowProcessor::new("slow", Duration::from_millis(300)))
                    .unwrap()
                    .then(feat("x"))
                    .unwrap(),
                false,
            )
            .unwrap();
        let mut sink = RecordingSink::new();

        let report = extractor
            .extract_concurrent(shared(numbers_dataset(&[1])), &mut sink)
            .await
            .unwrap();

        assert_eq!(report.timed_out, vec!["0"]);
        assert_eq!(report.failures[0].node, "<timeout>");
        assert!(sink.stored_samples().is_empty());
        // The abandoned work was drained, so the DAG is usable again.
        assert!(extractor.resolve().is_ok());
    }

    #[tokio::test]
    async fn test_strict_failure_aborts() {
        let mut extractor = Extractor::new(ExtractorConfig::default().with_concurrency(2)).unwrap();
        extractor
            .add_extraction(
                input("a")
                    .then(FailingProcessor::new("picky", ["2"]))
                    .unwrap()
                    .then(feat("x"))
                    .unwrap(),
                false,
            )
            .unwrap();
        let mut sink = RecordingSink::new();

        let err = extractor
            .extract_concurrent(shared(numbers_dataset(&[1, 2, 3, 4, 5, 6])), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, FeatgraphError::Processing(_)));
        assert!(!sink.is_finalized());
        assert_eq!(sink.stored_samples(), vec!["0", "1"]);
    }

    #[tokio::test]
    async fn test_dropped_feature_is_pulled_not_stored() {
        let mut extractor = Extractor::new(ExtractorConfig::default().with_concurrency(2)).unwrap();
        extractor
            .add_extraction(input("a").then(times_two()).unwrap().then(feat("double")).unwrap(), true)
            .unwrap();
        extractor
            .add_extraction(feat("double").then(plus_one()).unwrap().then(feat("next")).unwrap(), false)
            .unwrap();
        let mut sink = RecordingSink::new();

        let report = extractor
            .extract_concurrent(shared(numbers_dataset(&[1, 2, 3])), &mut sink)
            .await
            .unwrap();

        assert_eq!(report.skipped_cells, 0);
        for call in sink.calls() {
            if let crate::testing::SinkCall::Sample(_, values) = call {
                assert_eq!(values.keys().collect::<Vec<_>>(), vec!["next"]);
            }
        }
    }

    #[tokio::test]
    async fn test_skip_errors_concurrently() {
        let config = ExtractorConfig::default().with_skip_errors(true).with_concurrency(2);
        let mut extractor = Extractor::new(config).unwrap();
        extractor
            .add_extraction(
                input("a")
                    .then(FailingProcessor::new("picky", ["1"]))
                    .unwrap()
                    .then(feat("x"))
                    .unwrap(),
                false,
            )
            .unwrap();
        let mut sink = RecordingSink::new();

        let report = extractor
            .extract_concurrent(shared(numbers_dataset(&[1, 2, 3])), &mut sink)
            .await
            .unwrap();

        assert_eq!(report.skipped_cells, 1);
        let stored: Vec<_> = sink
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                crate::testing::SinkCall::Sample(id, values) => Some((id, values)),
                _ => None,
            })
            .collect();
        assert_eq!(stored[1], ("1".to_string(), BTreeMap::new()));
        assert_eq!(stored[2].1.get("x"), Some(&json!(3)));
    }
}
