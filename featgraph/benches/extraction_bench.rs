//! Benchmarks for extraction runs.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use featgraph::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn times_two() -> FnProcessor {
    FnProcessor::unary("times_two", |x| Ok(json!(x.as_i64().unwrap_or(0) * 2)))
}

fn plus_one() -> FnProcessor {
    FnProcessor::unary("plus_one", |x| Ok(json!(x.as_i64().unwrap_or(0) + 1)))
}

fn dataset(n: i64) -> Arc<dyn Dataset> {
    let records = (0..n).map(|i| json!({"a": i})).collect();
    Arc::new(ListDataset::from_records(records).unwrap())
}

/// Ten features sharing one `times_two` prefix.
fn shared_extractor(config: ExtractorConfig) -> Extractor {
    let mut extractor = Extractor::new(config).unwrap();
    for i in 0..10 {
        let mut fragment = input("a").then(times_two()).unwrap();
        for _ in 0..i {
            fragment = fragment.append(plus_one()).unwrap();
        }
        let fragment = fragment.then(feat(format!("f{i}"))).unwrap();
        extractor.add_extraction(fragment, false).unwrap();
    }
    extractor
}

fn extraction_benchmark(c: &mut Criterion) {
    let data = dataset(1_000);

    let mut cached = shared_extractor(ExtractorConfig::default());
    c.bench_function("sample_wise_cached", |b| {
        b.iter(|| black_box(cached.extract_to_dict(Arc::clone(&data)).unwrap()))
    });

    let mut uncached = shared_extractor(ExtractorConfig::default().with_no_cache(true));
    c.bench_function("sample_wise_no_cache", |b| {
        b.iter(|| black_box(uncached.extract_to_dict(Arc::clone(&data)).unwrap()))
    });

    let mut feature_wise = shared_extractor(
        ExtractorConfig::default().with_extraction_order(ExtractionOrder::Feature),
    );
    c.bench_function("feature_wise", |b| {
        b.iter(|| black_box(feature_wise.extract_to_dict(Arc::clone(&data)).unwrap()))
    });
}

criterion_group!(benches, extraction_benchmark);
criterion_main!(benches);
