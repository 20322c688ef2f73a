//! Closure-backed processors.

use super::{Arity, DatasetAggregator, ProcessContext, SampleProcessor};
use crate::core::{ParamValue, ProcessorIdentity, SampleData};
use crate::errors::PipelineBuildError;
use std::any::{type_name, TypeId};
use std::fmt::{self, Debug};
use std::sync::Arc;

type BoxedFn =
    Box<dyn Fn(&ProcessContext<'_>, &[SampleData]) -> anyhow::Result<SampleData> + Send + Sync>;
type BoxedAggFn = Box<dyn Fn(Vec<SampleData>) -> anyhow::Result<SampleData> + Send + Sync>;

/// Identifies a closure by its concrete type.
///
/// Every closure expression has its own type, so two closures are never
/// considered the same computation, even when their bodies are identical.
/// State captured by the closure is invisible here and must be declared
/// with [`FnProcessor::with_param`].
fn code_fingerprint<F: 'static>() -> String {
    format!("{}#{:?}", type_name::<F>(), TypeId::of::<F>())
}

/// A sample processor wrapping a function.
pub struct FnProcessor {
    identity: ProcessorIdentity,
    arity: Arity,
    func: BoxedFn,
}

impl FnProcessor {
    fn build<F: 'static>(name: &str, arity: Arity, func: BoxedFn) -> Self {
        let identity = ProcessorIdentity::new("F")
            .with_param("name", name)
            .with_param("code", code_fingerprint::<F>())
            .with_label(format!("F({name})"));
        Self {
            identity,
            arity,
            func,
        }
    }

    /// Wraps a one-argument function.
    pub fn unary<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&SampleData) -> anyhow::Result<SampleData> + Send + Sync + 'static,
    {
        let name = name.into();
        Self::build::<F>(&name, Arity::exactly(1), Box::new(move |_, args| f(&args[0])))
    }

    /// Wraps a two-argument function.
    pub fn binary<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&SampleData, &SampleData) -> anyhow::Result<SampleData> + Send + Sync + 'static,
    {
        let name = name.into();
        Self::build::<F>(
            &name,
            Arity::exactly(2),
            Box::new(move |_, args| f(&args[0], &args[1])),
        )
    }

    /// Wraps a function over a slice of arguments.
    pub fn variadic<F>(name: impl Into<String>, arity: Arity, f: F) -> Self
    where
        F: Fn(&[SampleData]) -> anyhow::Result<SampleData> + Send + Sync + 'static,
    {
        let name = name.into();
        Self::build::<F>(&name, arity, Box::new(move |_, args| f(args)))
    }

    /// Wraps a function that also receives the [`ProcessContext`], through
    /// which it reads the sample, the dataset and its own parameters.
    pub fn contextual<F>(name: impl Into<String>, arity: Arity, f: F) -> Self
    where
        F: Fn(&ProcessContext<'_>, &[SampleData]) -> anyhow::Result<SampleData>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        Self::build::<F>(&name, arity, Box::new(f))
    }

    /// Declares parameter `name` as the hyperparameter `hparam`. Its value
    /// is supplied by [`Extractor::set_hparams`](crate::extractor::Extractor::set_hparams)
    /// and read with [`ProcessContext::param`].
    #[must_use]
    pub fn with_hparam(mut self, name: impl Into<String>, hparam: impl Into<String>) -> Self {
        self.identity = self.identity.with_hparam(name, hparam);
        self
    }

    /// Declares a configuration parameter (typically a captured value).
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.identity = self.identity.with_param(name, value);
        self
    }

    /// Declares a configuration parameter given as JSON.
    ///
    /// # Errors
    ///
    /// Returns a build error if the value is not hashable.
    pub fn try_with_json_param(
        mut self,
        name: impl Into<String>,
        value: &serde_json::Value,
    ) -> Result<Self, PipelineBuildError> {
        self.identity = self.identity.try_with_json_param(name, value)?;
        Ok(self)
    }
}

impl Debug for FnProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProcessor")
            .field("label", &self.identity.label())
            .field("arity", &self.arity)
            .finish()
    }
}

impl SampleProcessor for FnProcessor {
    fn identity(&self) -> ProcessorIdentity {
        self.identity.clone()
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn process(&self, ctx: &ProcessContext<'_>, args: &[SampleData]) -> anyhow::Result<SampleData> {
        (self.func)(ctx, args)
    }
}

/// A dataset aggregator wrapping a function.
pub struct FnAggregator {
    identity: ProcessorIdentity,
    arity: Arity,
    func: BoxedAggFn,
}

impl FnAggregator {
    /// Wraps a function over every sample's value.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<SampleData>) -> anyhow::Result<SampleData> + Send + Sync + 'static,
    {
        let name = name.into();
        let identity = ProcessorIdentity::new("Agg")
            .with_param("name", name.as_str())
            .with_param("code", code_fingerprint::<F>())
            .with_label(format!("Agg({name})"));
        Self {
            identity,
            arity: Arity::at_least(1),
            func: Box::new(f),
        }
    }

    /// Restricts the number of parents.
    #[must_use]
    pub fn with_arity(mut self, arity: Arity) -> Self {
        self.arity = arity;
        self
    }

    /// Declares a configuration parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.identity = self.identity.with_param(name, value);
        self
    }
}

impl Debug for FnAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAggregator")
            .field("label", &self.identity.label())
            .finish()
    }
}

impl DatasetAggregator for FnAggregator {
    fn identity(&self) -> ProcessorIdentity {
        self.identity.clone()
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn aggregate(&self, data: Vec<SampleData>) -> anyhow::Result<SampleData> {
        (self.func)(data)
    }
}

/// Applies a sample processor to every element of a list value.
#[derive(Debug, Clone)]
pub struct ListMap {
    inner: Arc<dyn SampleProcessor>,
}

impl ListMap {
    /// Wraps `inner`, which must accept exactly one argument.
    ///
    /// # Errors
    ///
    /// Returns a build error if `inner` does not accept one argument.
    pub fn new(inner: impl SampleProcessor + 'static) -> Result<Self, PipelineBuildError> {
        if !inner.arity().accepts(1) {
            return Err(PipelineBuildError::arity(
                inner.identity().label(),
                inner.arity().to_string(),
                1,
            ));
        }
        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

impl SampleProcessor for ListMap {
    fn identity(&self) -> ProcessorIdentity {
        let inner = self.inner.identity();
        // The inner processor reads its hyperparameters from this node.
        inner.hparam_slots().iter().fold(
            ProcessorIdentity::new("L")
                .with_param("proc", inner.key().to_hex())
                .with_label(format!("L({})", inner.label())),
            |identity, (param, hparam)| identity.with_hparam(param.as_str(), hparam.as_str()),
        )
    }

    fn process(&self, ctx: &ProcessContext<'_>, args: &[SampleData]) -> anyhow::Result<SampleData> {
        let Some(SampleData::Array(items)) = args.first() else {
            anyhow::bail!("{} expects a list value", self.identity().label());
        };
        items
            .iter()
            .map(|item| self.inner.process(ctx, std::slice::from_ref(item)))
            .collect::<anyhow::Result<Vec<_>>>()
            .map(SampleData::Array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::DictSample;
    use serde_json::json;

    fn add_one(x: &SampleData) -> anyhow::Result<SampleData> {
        Ok(json!(x.as_i64().unwrap_or(0) + 1))
    }

    #[test]
    fn test_same_function_same_identity() {
        let a = FnProcessor::unary("add_one", add_one);
        let b = FnProcessor::unary("add_one", add_one);

        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_distinct_closures_differ() {
        let a = FnProcessor::unary("f", |x| Ok(x.clone()));
        let b = FnProcessor::unary("f", |x| Ok(x.clone()));

        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_declared_params_distinguish_captures() {
        let make = |k: i64| {
            FnProcessor::unary("times", move |x| Ok(json!(x.as_i64().unwrap_or(0) * k)))
                .with_param("k", k)
        };

        assert_ne!(make(2).identity(), make(3).identity());
        assert_eq!(make(2).identity(), make(2).identity());
    }

    #[test]
    fn test_non_hashable_json_param() {
        let result = FnProcessor::unary("f", add_one).try_with_json_param("w", &json!({"a": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn test_binary_process() {
        let sample = DictSample::from_record(0, json!({})).unwrap();
        let ctx = ProcessContext::new(&sample, None);
        let add = FnProcessor::binary("add", |a, b| {
            Ok(json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)))
        });

        assert_eq!(add.arity(), Arity::exactly(2));
        assert_eq!(add.process(&ctx, &[json!(3), json!(4)]).unwrap(), json!(7));
        assert_eq!(add.identity().label(), "F(add)");
    }

    #[test]
    fn test_contextual_reads_hparam() {
        let scale = FnProcessor::contextual("scale", Arity::exactly(1), |ctx, args| {
            let factor = match ctx.param("factor") {
                Some(ParamValue::Int(factor)) => *factor,
                _ => anyhow::bail!("factor is not set"),
            };
            Ok(json!(args[0].as_i64().unwrap_or(0) * factor))
        })
        .with_hparam("factor", "scale_factor");
        let sample = DictSample::from_record(0, json!({})).unwrap();

        assert_eq!(scale.identity().unset_hparams(), vec!["scale_factor"]);
        let ctx = ProcessContext::new(&sample, None);
        assert!(scale.process(&ctx, &[json!(2)]).is_err());

        let mut identity = scale.identity();
        identity.set_hparams(&std::collections::BTreeMap::from([(
            "scale_factor".to_string(),
            ParamValue::Int(5),
        )]));
        let ctx = ProcessContext::new(&sample, None).with_identity(&identity);
        assert_eq!(scale.process(&ctx, &[json!(2)]).unwrap(), json!(10));
    }

    #[test]
    fn test_aggregator() {
        let sum = FnAggregator::new("sum", |values| {
            Ok(json!(values.iter().filter_map(SampleData::as_i64).sum::<i64>()))
        });

        assert_eq!(sum.aggregate(vec![json!(1), json!(2), json!(3)]).unwrap(), json!(6));
        assert_eq!(sum.identity().label(), "Agg(sum)");
    }

    #[test]
    fn test_list_map() {
        let sample = DictSample::from_record(0, json!({})).unwrap();
        let ctx = ProcessContext::new(&sample, None);
        let map = ListMap::new(FnProcessor::unary("add_one", add_one)).unwrap();

        assert_eq!(map.process(&ctx, &[json!([1, 2])]).unwrap(), json!([2, 3]));
        assert!(map.process(&ctx, &[json!(1)]).is_err());
        assert_eq!(map.identity().label(), "L(F(add_one))");
    }

    #[test]
    fn test_list_map_rejects_binary() {
        let add = FnProcessor::binary("add", |a, _| Ok(a.clone()));
        assert!(ListMap::new(add).is_err());
    }
}
