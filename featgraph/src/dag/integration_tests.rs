//! End-to-end scenarios over the extraction DAG.

use super::{DagState, ExtractionDag, FeatureSelection};
use crate::config::ExtractionPolicy;
use crate::core::ParamValue;
use crate::errors::{codes, FeatgraphError};
use crate::graph::{NodeId, DATASET_SCOPE_ID};
use crate::processors::{
    ds_feat, ds_input, feat, input, Arity, FnAggregator, FnProcessor, NodeKind, Processor,
};
use crate::samples::{Dataset, DictSample, ListDataset, Sample};
use crate::testing::{
    add, numbers_dataset, plus_one, shared, times_two, CountingProcessor, FailingProcessor,
    MeanCenter,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;

fn sum() -> Processor {
    Processor::aggregator(FnAggregator::new("sum", |values| {
        Ok(json!(values.iter().filter_map(|v| v.as_i64()).sum::<i64>()))
    }))
}

fn bound(mut dag: ExtractionDag, dataset: ListDataset, policy: ExtractionPolicy) -> ExtractionDag {
    dag.bind(shared(dataset), policy).unwrap();
    dag
}

fn parent_of(dag: &ExtractionDag, id: NodeId) -> NodeId {
    dag.node(id).unwrap().parents()[0]
}

#[test]
fn test_identical_prefixes_share_nodes() {
    let mut dag = ExtractionDag::new();
    let x = dag
        .add_pipeline(input("a").then(times_two()).unwrap().then(feat("x")).unwrap())
        .unwrap()[0];
    let y = dag
        .add_pipeline(
            input("a")
                .then(times_two())
                .unwrap()
                .then(plus_one())
                .unwrap()
                .then(feat("y"))
                .unwrap(),
        )
        .unwrap()[0];

    let x_double = parent_of(&dag, x);
    let y_double = parent_of(&dag, parent_of(&dag, y));
    assert_eq!(x_double, y_double);
    assert_eq!(parent_of(&dag, x_double), parent_of(&dag, y_double));
    // Root, Input(a), times_two, Feat(x), plus_one, Feat(y)
    assert_eq!(dag.node_count(), 6);
    assert_eq!(dag.node(x_double).unwrap().children().len(), 2);
}

#[test]
fn test_same_step_on_different_lineage_is_not_shared() {
    let mut dag = ExtractionDag::new();
    let x = dag
        .add_pipeline(input("a").then(times_two()).unwrap().then(feat("x")).unwrap())
        .unwrap()[0];
    let y = dag
        .add_pipeline(input("b").then(times_two()).unwrap().then(feat("y")).unwrap())
        .unwrap()[0];

    assert_ne!(parent_of(&dag, x), parent_of(&dag, y));
}

#[test]
fn test_cache_lives_until_every_child_read() {
    let counter = CountingProcessor::new("shared");
    let mut dag = ExtractionDag::new();
    let fragment = input("a")
        .then(counter.clone())
        .unwrap()
        .then(
            Processor::from(times_two())
                .also(plus_one())
                .also(FnProcessor::unary("neg", |x| Ok(json!(-x.as_i64().unwrap_or(0))))),
        )
        .unwrap()
        .then(feat("x").also(feat("y")).also(feat("z")))
        .unwrap();
    let ids = dag.add_pipeline(fragment).unwrap();
    let shared_node = parent_of(&dag, parent_of(&dag, ids[0]));
    let dag = bound(dag, numbers_dataset(&[5]), ExtractionPolicy::default());
    let sample = DictSample::from_record(0, json!({"a": 5})).unwrap();

    for (i, name) in ["x", "y", "z"].iter().enumerate() {
        assert_eq!(dag.node(shared_node).unwrap().cached_len(), usize::from(i > 0));
        dag.extract_sample_features(&sample, &[(*name).to_string()])
            .unwrap();
    }
    assert_eq!(dag.node(shared_node).unwrap().cached_len(), 0);
    assert_eq!(counter.calls(), 1);

    // A fourth read recomputes rather than returning stale state.
    dag.extract_sample_features(&sample, &["x".to_string()])
        .unwrap();
    assert_eq!(counter.calls(), 2);
}

#[test]
fn test_processor_runs_once_per_node_per_sample() {
    let counter = CountingProcessor::new("count");
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(
        input("a")
            .then(counter.clone())
            .unwrap()
            .then(feat("x").also(feat("y")))
            .unwrap(),
    )
    .unwrap();
    let dag = bound(dag, numbers_dataset(&[1, 2, 3]), ExtractionPolicy::default());

    for name in ["x", "y"] {
        dag.extract_feature_wise(name).unwrap();
    }

    assert_eq!(counter.calls(), 3);
}

#[test]
fn test_dependency_resolution_rewires_input() {
    let mut dag = ExtractionDag::new();
    let double = dag
        .add_pipeline(input("a").then(times_two()).unwrap().then(feat("double")).unwrap())
        .unwrap()[0];
    let next = dag
        .add_pipeline(input("double").then(plus_one()).unwrap().then(feat("next")).unwrap())
        .unwrap()[0];
    let plus = parent_of(&dag, next);
    assert_eq!(dag.input_names(), vec!["a", "double"]);

    dag.solve_dependencies().unwrap();

    assert_eq!(dag.input_names(), vec!["a"]);
    assert_eq!(parent_of(&dag, plus), double);
    assert!(dag.node(double).unwrap().children().contains(&plus));
    assert_eq!(dag.depth(next), Some(5));
    assert!(dag
        .nodes()
        .all(|(_, n)| !(n.kind() == NodeKind::Input && n.name() == Some("double"))));

    let dag = bound(dag, numbers_dataset(&[1, 2]), ExtractionPolicy::default());
    let values = dag.extract_feature_wise("next").unwrap();
    assert_eq!(
        values,
        BTreeMap::from([("0".to_string(), json!(3)), ("1".to_string(), json!(5))])
    );
}

#[test]
fn test_feature_reference_declared_before_its_pipeline() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(feat("double").then(plus_one()).unwrap().then(feat("next")).unwrap())
        .unwrap();
    dag.add_pipeline(input("a").then(times_two()).unwrap().then(feat("double")).unwrap())
        .unwrap();

    dag.solve_dependencies().unwrap();

    let dag = bound(dag, numbers_dataset(&[4]), ExtractionPolicy::default());
    assert_eq!(dag.extract_feature_wise("next").unwrap()["0"], json!(9));
}

#[test]
fn test_unresolved_feature_reference() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(feat("missing").then(plus_one()).unwrap().then(feat("next")).unwrap())
        .unwrap();

    let err = dag.solve_dependencies().unwrap_err();

    assert!(matches!(err, FeatgraphError::Dependency(ref e) if e.feature == "missing"));
}

#[test]
fn test_dependency_cycle_detected() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("b").then(plus_one()).unwrap().then(feat("a")).unwrap())
        .unwrap();
    dag.add_pipeline(input("a").then(times_two()).unwrap().then(feat("b")).unwrap())
        .unwrap();

    let err = dag.solve_dependencies().unwrap_err();

    match err {
        FeatgraphError::CycleDetected(cycle) => {
            assert_eq!(cycle.cycle_path.first(), cycle.cycle_path.last());
            assert!(cycle.cycle_path.len() >= 3);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn test_dependency_scope_mismatch() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(sum()).unwrap().then(ds_feat("total")).unwrap())
        .unwrap();
    dag.add_pipeline(input("total").then(plus_one()).unwrap().then(feat("bumped")).unwrap())
        .unwrap();

    let err = dag.solve_dependencies().unwrap_err();

    assert!(matches!(err, FeatgraphError::Dependency(_)));
}

#[test]
fn test_prune_keep_only_removes_private_nodes() {
    let mut dag = ExtractionDag::new();
    let f1 = dag
        .add_pipeline(input("a").then(times_two()).unwrap().then(feat("f1")).unwrap())
        .unwrap()[0];
    dag.add_pipeline(input("b").then(plus_one()).unwrap().then(feat("f2")).unwrap())
        .unwrap();
    dag.solve_dependencies().unwrap();

    let before = {
        let mut reference = ExtractionDag::new();
        reference
            .add_pipeline(input("a").then(times_two()).unwrap().then(feat("f1")).unwrap())
            .unwrap();
        let reference = bound(reference, numbers_dataset(&[1, 2, 3]), ExtractionPolicy::default());
        reference.extract_feature_wise("f1").unwrap()
    };

    let removed = dag
        .prune_features(FeatureSelection::keep_only(["f1"]))
        .unwrap();

    assert_eq!(removed, vec!["f2"]);
    assert_eq!(dag.feature_names(), vec!["f1"]);
    assert_eq!(dag.input_names(), vec!["a"]);
    // Root, Input(a), times_two, Feat(f1)
    assert_eq!(dag.node_count(), 4);
    assert!(dag.node(f1).is_some());

    let dag = bound(dag, numbers_dataset(&[1, 2, 3]), ExtractionPolicy::default());
    assert_eq!(dag.extract_feature_wise("f1").unwrap(), before);
}

#[test]
fn test_prune_keeps_shared_ancestry() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(times_two()).unwrap().then(feat("x")).unwrap())
        .unwrap();
    dag.add_pipeline(
        input("a")
            .then(times_two())
            .unwrap()
            .then(plus_one())
            .unwrap()
            .then(feat("y"))
            .unwrap(),
    )
    .unwrap();
    dag.solve_dependencies().unwrap();

    dag.prune_features(FeatureSelection::remove(["y"])).unwrap();

    // plus_one and Feat(y) are gone; times_two still feeds Feat(x).
    assert_eq!(dag.node_count(), 4);
    let x = dag.feature_node("x").unwrap();
    assert_eq!(dag.node(parent_of(&dag, x)).unwrap().children().len(), 1);
}

#[test]
fn test_pruned_feature_still_feeding_others_is_unregistered() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(times_two()).unwrap().then(feat("double")).unwrap())
        .unwrap();
    dag.add_pipeline(feat("double").then(plus_one()).unwrap().then(feat("next")).unwrap())
        .unwrap();
    dag.solve_dependencies().unwrap();
    let count = dag.node_count();

    dag.prune_features(FeatureSelection::remove(["double"])).unwrap();

    assert_eq!(dag.feature_names(), vec!["next"]);
    assert_eq!(dag.node_count(), count);
    let dag = bound(dag, numbers_dataset(&[1]), ExtractionPolicy::default());
    assert_eq!(dag.extract_feature_wise("next").unwrap()["0"], json!(3));
}

#[test]
fn test_chain_scenario_sample_wise() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(times_two()).unwrap().then(feat("double")).unwrap())
        .unwrap();
    let dataset = numbers_dataset(&[1, 2]);
    let dag = bound(dag, dataset.clone(), ExtractionPolicy::default());

    let mut result = BTreeMap::new();
    for sample in dataset.samples() {
        result.insert(sample.id(), dag.extract_sample_wise(sample.as_ref()).unwrap());
    }

    assert_eq!(
        serde_json::to_value(result).unwrap(),
        json!({"0": {"double": 2}, "1": {"double": 4}})
    );
}

#[test]
fn test_merge_scenario() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").also(input("b")).then(add()).unwrap().then(feat("sum")).unwrap())
        .unwrap();
    let input_a = dag
        .nodes()
        .find(|(_, n)| n.kind() == NodeKind::Input && n.name() == Some("a"))
        .map(|(id, _)| id)
        .unwrap();
    assert_eq!(dag.node(input_a).unwrap().children().len(), 1);

    let dataset = ListDataset::from_records(vec![json!({"a": 3, "b": 4})]).unwrap();
    let dag = bound(dag, dataset, ExtractionPolicy::default());
    let sample = DictSample::from_record(0, json!({"a": 3, "b": 4})).unwrap();

    let values = dag.extract_sample_wise(&sample).unwrap();
    assert_eq!(values["sum"], json!(7));
}

#[test]
fn test_failure_skip_scenario() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(
        input("a")
            .then(FailingProcessor::new("picky", ["1"]))
            .unwrap()
            .then(feat("x"))
            .unwrap(),
    )
    .unwrap();
    let mut dag = bound(
        dag,
        numbers_dataset(&[10, 11, 12]),
        ExtractionPolicy::new().with_skip_errors(true),
    );

    let values = dag.extract_feature_wise("x").unwrap();

    assert_eq!(values.keys().cloned().collect::<Vec<_>>(), vec!["0", "2"]);
    let failures = dag.finish();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].sample_id, "1");
    assert_eq!(dag.state(), DagState::Resolved);
}

#[test]
fn test_failed_sibling_still_releases_shared_parent() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(times_two()).unwrap().then(feat("x")).unwrap())
        .unwrap();
    dag.add_pipeline(
        input("a")
            .then(Processor::from(FailingProcessor::always("bad")).also(times_two()))
            .unwrap()
            .then(add())
            .unwrap()
            .then(feat("y"))
            .unwrap(),
    )
    .unwrap();
    let mut dag = bound(
        dag,
        numbers_dataset(&[1, 2, 3, 4, 5]),
        ExtractionPolicy::new().with_skip_errors(true),
    );
    let shared_node = parent_of(&dag, dag.feature_node("x").unwrap());
    assert_eq!(dag.node(shared_node).unwrap().fan_out(), 2);

    let dataset = numbers_dataset(&[1, 2, 3, 4, 5]);
    for (i, sample) in dataset.samples().enumerate() {
        // Either pull order must leave nothing behind.
        let names = if i % 2 == 0 { ["x", "y"] } else { ["y", "x"] };
        let names: Vec<String> = names.iter().map(|name| (*name).to_string()).collect();
        let values = dag.extract_sample_features(sample.as_ref(), &names).unwrap();
        assert!(values.contains_key("x"));
        assert!(!values.contains_key("y"));
    }

    let leaked: usize = dag.nodes().map(|(_, node)| node.cached_len()).sum();
    assert_eq!(leaked, 0);
    assert_eq!(dag.finish().len(), 5);
}

#[test]
fn test_strict_failure_names_processor_and_sample() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(
        input("a")
            .then(FailingProcessor::new("picky", ["1"]))
            .unwrap()
            .then(feat("x"))
            .unwrap(),
    )
    .unwrap();
    let dag = bound(dag, numbers_dataset(&[10, 11]), ExtractionPolicy::default());

    let err = dag.extract_feature_wise("x").unwrap_err();

    match err {
        FeatgraphError::Processing(e) => {
            assert_eq!(e.processor, "Fail(picky)");
            assert_eq!(e.sample_id, "1");
        }
        other => panic!("expected a processing error, got {other:?}"),
    }
}

#[test]
fn test_duplicate_sample_id() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(feat("x")).unwrap()).unwrap();
    let dataset = ListDataset::from_records(vec![
        json!({"id": "s1", "a": 1}),
        json!({"id": "s1", "a": 2}),
    ])
    .unwrap();
    let mut dag = bound(dag, dataset, ExtractionPolicy::default());

    let err = dag.extract_feature_wise("x").unwrap_err();
    assert!(matches!(err, FeatgraphError::DuplicateSample(ref e) if e.sample_id == "s1"));

    // The DAG is still usable afterwards.
    dag.finish();
    let dag = bound(dag, numbers_dataset(&[1]), ExtractionPolicy::default());
    assert_eq!(dag.extract_feature_wise("x").unwrap()["0"], json!(1));
}

#[test]
fn test_duplicate_feature_name_across_pipelines() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(feat("x")).unwrap()).unwrap();

    let err = dag
        .add_pipeline(input("b").then(feat("x")).unwrap())
        .unwrap_err();

    match err {
        FeatgraphError::Build(e) => assert_eq!(e.code(), Some(codes::DUPLICATE_FEATURE)),
        other => panic!("expected a build error, got {other:?}"),
    }
}

#[test]
fn test_batch_processor_sees_whole_dataset_once() {
    let center = MeanCenter::new();
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(
        input("a")
            .then(Processor::batch(center.clone()))
            .unwrap()
            .then(feat("centered"))
            .unwrap(),
    )
    .unwrap();
    let dag = bound(dag, numbers_dataset(&[1, 2, 3]), ExtractionPolicy::default());

    let values = dag.extract_feature_wise("centered").unwrap();

    assert_eq!(
        values,
        BTreeMap::from([
            ("0".to_string(), json!(-1.0)),
            ("1".to_string(), json!(0.0)),
            ("2".to_string(), json!(1.0)),
        ])
    );
    assert_eq!(center.fits(), 1);
}

#[test]
fn test_batch_failure_fails_every_sample() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(
        input("a")
            .then(Processor::batch(MeanCenter::new()))
            .unwrap()
            .then(feat("centered"))
            .unwrap(),
    )
    .unwrap();
    let dataset = crate::testing::field_dataset("a", &[json!("x"), json!("y")]);
    let mut dag = bound(dag, dataset, ExtractionPolicy::new().with_skip_errors(true));

    let values = dag.extract_feature_wise("centered").unwrap();

    assert!(values.is_empty());
    let failures = dag.finish();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].sample_id, DATASET_SCOPE_ID);
}

#[test]
fn test_aggregator_and_dataset_feature() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(sum()).unwrap().then(ds_feat("total")).unwrap())
        .unwrap();
    dag.add_pipeline(
        input("a")
            .also(ds_input("offset"))
            .then(Processor::aggregator(FnAggregator::new("weighted", |values| {
                Ok(json!(values.len()))
            })))
            .unwrap()
            .then(ds_feat("count"))
            .unwrap(),
    )
    .unwrap();
    let dataset = numbers_dataset(&[1, 2, 3]).with_dataset_value("offset", json!(10));
    let dag = bound(dag, dataset, ExtractionPolicy::default());

    assert_eq!(dag.dataset_feature_names(), vec!["count", "total"]);
    assert_eq!(dag.extract_dataset_feature("total").unwrap(), Some(json!(6)));
    assert_eq!(dag.extract_dataset_feature("count").unwrap(), Some(json!(3)));
    // Dataset-wide values survive repeated reads.
    assert_eq!(dag.extract_dataset_feature("total").unwrap(), Some(json!(6)));
}

#[test]
fn test_aggregate_skips_bad_samples() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(
        input("a")
            .then(FailingProcessor::new("picky", ["1"]))
            .unwrap()
            .then(sum())
            .unwrap()
            .then(ds_feat("total"))
            .unwrap(),
    )
    .unwrap();
    let dag = bound(
        dag,
        numbers_dataset(&[1, 2, 3]),
        ExtractionPolicy::new().with_skip_errors(true),
    );

    assert_eq!(dag.extract_dataset_feature("total").unwrap(), Some(json!(4)));
}

#[test]
fn test_dataset_feature_feeds_dataset_feature() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(sum()).unwrap().then(ds_feat("total")).unwrap())
        .unwrap();
    dag.add_pipeline(
        ds_feat("total")
            .then(plus_one())
            .unwrap()
            .then(ds_feat("total_plus"))
            .unwrap(),
    )
    .unwrap();
    let dag = bound(dag, numbers_dataset(&[1, 2]), ExtractionPolicy::default());

    assert_eq!(dag.extract_dataset_feature("total_plus").unwrap(), Some(json!(4)));
    assert!(dag.extract_dataset_feature("missing").is_err());
}

#[test]
fn test_rebinding_requires_finish() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(feat("x")).unwrap()).unwrap();
    let mut dag = bound(dag, numbers_dataset(&[1]), ExtractionPolicy::default());

    assert!(dag
        .bind(shared(numbers_dataset(&[2])), ExtractionPolicy::default())
        .is_err());
    assert!(dag.add_pipeline(input("b").then(feat("y")).unwrap()).is_err());

    dag.finish();
    assert!(dag.add_pipeline(input("b").then(feat("y")).unwrap()).is_ok());
    assert_eq!(dag.state(), DagState::Building);
}

fn scaled() -> FnProcessor {
    FnProcessor::contextual("scaled", Arity::exactly(1), |ctx, args| {
        let Some(ParamValue::Int(factor)) = ctx.param("factor") else {
            anyhow::bail!("factor is unset");
        };
        Ok(json!(args[0].as_i64().unwrap_or(0) * factor))
    })
    .with_hparam("factor", "scale")
}

#[test]
fn test_hparams_must_be_set_before_binding() {
    let mut dag = ExtractionDag::new();
    dag.add_pipeline(input("a").then(scaled()).unwrap().then(feat("x")).unwrap())
        .unwrap();
    dag.add_pipeline(
        input("a")
            .then(scaled())
            .unwrap()
            .then(plus_one())
            .unwrap()
            .then(feat("y"))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(dag.hparams(), vec!["scale"]);

    let err = dag
        .bind(shared(numbers_dataset(&[1, 2])), ExtractionPolicy::default())
        .unwrap_err();
    let FeatgraphError::Build(err) = err else {
        panic!("expected a build error, got {err}");
    };
    assert_eq!(err.code(), Some(codes::HYPERPARAMETER));
    assert!(err.to_string().contains("scale"));
    assert_eq!(dag.state(), DagState::Resolved);

    let wrong = BTreeMap::from([("factor".to_string(), ParamValue::Int(3))]);
    assert!(dag.set_hparams(&wrong).is_err());

    dag.set_hparams(&BTreeMap::from([("scale".to_string(), ParamValue::Int(3))]))
        .unwrap();
    assert!(dag.hparams().is_empty());
    let dag = bound(dag, numbers_dataset(&[1, 2]), ExtractionPolicy::default());

    assert_eq!(dag.extract_feature_wise("x").unwrap()["1"], json!(6));
    assert_eq!(dag.extract_feature_wise("y").unwrap()["1"], json!(7));
}
