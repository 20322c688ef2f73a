//! Mock processors and sinks for testing.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{FeatureName, ProcessorIdentity, SampleData, SampleId};
use crate::errors::FeatgraphError;
use crate::processors::{BatchProcessor, ProcessContext, SampleProcessor};
use crate::storage::StorageSink;

fn first(args: &[SampleData]) -> SampleData {
    args.first().cloned().unwrap_or(SampleData::Null)
}

/// A pass-through processor that counts its invocations.
///
/// Clones share the counter, so a test can keep one handle while the graph
/// owns another.
#[derive(Debug, Clone)]
pub struct CountingProcessor {
    name: String,
    calls: Arc<AtomicUsize>,
}

impl CountingProcessor {
    /// Creates a new counting processor.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the number of times the processor ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resets the counter.
    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

impl SampleProcessor for CountingProcessor {
    fn identity(&self) -> ProcessorIdentity {
        ProcessorIdentity::new("Count")
            .with_param("name", self.name.as_str())
            .with_label(format!("Count({})", self.name))
    }

    fn process(&self, _ctx: &ProcessContext<'_>, args: &[SampleData]) -> anyhow::Result<SampleData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(first(args))
    }
}

/// A pass-through processor that fails for selected samples.
#[derive(Debug, Clone)]
pub struct FailingProcessor {
    name: String,
    fail_on: HashSet<SampleId>,
}

impl FailingProcessor {
    /// Creates a processor failing for every listed sample id.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, fail_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SampleId>,
    {
        Self {
            name: name.into(),
            fail_on: fail_on.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a processor that fails for every sample.
    #[must_use]
    pub fn always(name: impl Into<String>) -> Self {
        Self::new(name, ["*"])
    }
}

impl SampleProcessor for FailingProcessor {
    fn identity(&self) -> ProcessorIdentity {
        let mut fail_on: Vec<&str> = self.fail_on.iter().map(String::as_str).collect();
        fail_on.sort_unstable();
        ProcessorIdentity::new("Fail")
            .with_param("name", self.name.as_str())
            .with_param("fail_on", fail_on.join(","))
            .with_label(format!("Fail({})", self.name))
    }

    fn process(&self, ctx: &ProcessContext<'_>, args: &[SampleData]) -> anyhow::Result<SampleData> {
        let sample_id = ctx.sample_id();
        if self.fail_on.contains("*") || self.fail_on.contains(&sample_id) {
            anyhow::bail!("{} refused sample {sample_id}", self.name);
        }
        Ok(first(args))
    }
}

/// A pass-through processor that sleeps before answering.
#[derive(Debug, Clone)]
pub struct SlowProcessor {
    name: String,
    delay: Duration,
}

impl SlowProcessor {
    /// Creates a new slow processor.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

impl SampleProcessor for SlowProcessor {
    fn identity(&self) -> ProcessorIdentity {
        ProcessorIdentity::new("Slow")
            .with_param("name", self.name.as_str())
            .with_param("delay_ms", i64::try_from(self.delay.as_millis()).unwrap_or(i64::MAX))
            .with_label(format!("Slow({})", self.name))
    }

    fn process(&self, _ctx: &ProcessContext<'_>, args: &[SampleData]) -> anyhow::Result<SampleData> {
        std::thread::sleep(self.delay);
        Ok(first(args))
    }
}

/// Batch processor subtracting the dataset mean from each numeric value.
#[derive(Debug, Clone, Default)]
pub struct MeanCenter {
    mean: Option<f64>,
    fits: Arc<AtomicUsize>,
}

impl MeanCenter {
    /// Creates a new centering processor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of full-dataset passes so far; shared between clones.
    #[must_use]
    pub fn fits(&self) -> usize {
        self.fits.load(Ordering::SeqCst)
    }
}

impl BatchProcessor for MeanCenter {
    fn identity(&self) -> ProcessorIdentity {
        ProcessorIdentity::new("MeanCenter").with_label("MeanCenter")
    }

    fn full_dataset_process(
        &mut self,
        _sample_ids: &[SampleId],
        data: &[SampleData],
    ) -> anyhow::Result<()> {
        self.fits.fetch_add(1, Ordering::SeqCst);
        let values: Vec<f64> = data.iter().filter_map(SampleData::as_f64).collect();
        if values.is_empty() {
            anyhow::bail!("no numeric values to center");
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        self.mean = Some(mean);
        Ok(())
    }

    fn process(&self, _ctx: &ProcessContext<'_>, args: &[SampleData]) -> anyhow::Result<SampleData> {
        let mean = self
            .mean
            .ok_or_else(|| anyhow::anyhow!("centering used before the dataset pass"))?;
        let value = first(args)
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("expected a number"))?;
        Ok(serde_json::json!(value - mean))
    }
}

/// What a [`RecordingSink`] received.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    /// A feature-wise store.
    Feature(FeatureName, BTreeMap<SampleId, SampleData>),
    /// A sample-wise store.
    Sample(SampleId, BTreeMap<FeatureName, SampleData>),
    /// A dataset-wide feature.
    DatasetFeature(FeatureName, SampleData),
    /// The final flush.
    Finalize,
}

/// A sink that records every call, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    /// Creates a new recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    /// Ids of the samples stored sample-wise, in order.
    #[must_use]
    pub fn stored_samples(&self) -> Vec<SampleId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::Sample(id, _) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of the features stored feature-wise, in order.
    #[must_use]
    pub fn stored_features(&self) -> Vec<FeatureName> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::Feature(name, _) | SinkCall::DatasetFeature(name, _) => {
                    Some(name.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Returns true if the sink was finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.calls.lock().contains(&SinkCall::Finalize)
    }
}

impl StorageSink for RecordingSink {
    fn store_feature(
        &mut self,
        name: &str,
        values: BTreeMap<SampleId, SampleData>,
    ) -> Result<(), FeatgraphError> {
        self.calls
            .lock()
            .push(SinkCall::Feature(name.to_string(), values));
        Ok(())
    }

    fn store_sample(
        &mut self,
        sample_id: &str,
        values: BTreeMap<FeatureName, SampleData>,
    ) -> Result<(), FeatgraphError> {
        self.calls
            .lock()
            .push(SinkCall::Sample(sample_id.to_string(), values));
        Ok(())
    }

    fn store_dataset_feature(&mut self, name: &str, value: SampleData) -> Result<(), FeatgraphError> {
        self.calls
            .lock()
            .push(SinkCall::DatasetFeature(name.to_string(), value));
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), FeatgraphError> {
        self.calls.lock().push(SinkCall::Finalize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::DictSample;
    use serde_json::json;

    fn ctx_for(sample: &DictSample) -> ProcessContext<'_> {
        ProcessContext::new(sample, None)
    }

    #[test]
    fn test_counting_processor_shares_counter() {
        let counter = CountingProcessor::new("c");
        let handle = counter.clone();
        let sample = DictSample::from_record(0, json!({})).unwrap();

        let out = counter.process(&ctx_for(&sample), &[json!(7)]).unwrap();

        assert_eq!(out, json!(7));
        assert_eq!(handle.calls(), 1);
    }

    #[test]
    fn test_failing_processor_targets_samples() {
        let failing = FailingProcessor::new("f", ["1"]);
        let good = DictSample::from_record(0, json!({})).unwrap();
        let bad = DictSample::from_record(1, json!({})).unwrap();

        assert!(failing.process(&ctx_for(&good), &[json!(1)]).is_ok());
        assert!(failing.process(&ctx_for(&bad), &[json!(1)]).is_err());
    }

    #[test]
    fn test_mean_center() {
        let mut center = MeanCenter::new();
        let sample = DictSample::from_record(0, json!({})).unwrap();
        center
            .full_dataset_process(&[], &[json!(1), json!(2), json!(3)])
            .unwrap();

        assert_eq!(center.process(&ctx_for(&sample), &[json!(3)]).unwrap(), json!(1.0));
        assert_eq!(center.fits(), 1);
    }
}
