//! Dataset and pipeline fixtures.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::processors::FnProcessor;
use crate::samples::{Dataset, ListDataset};

/// Builds a dataset whose samples each hold one value under `field`.
/// Sample ids are the positions `"0"`, `"1"`, ...
#[must_use]
pub fn field_dataset(field: &str, values: &[Value]) -> ListDataset {
    let records = values
        .iter()
        .map(|value| {
            let mut record = serde_json::Map::new();
            record.insert(field.to_string(), value.clone());
            Value::Object(record)
        })
        .collect();
    // Every record is an object, so this cannot fail.
    ListDataset::from_records(records).unwrap_or_default()
}

/// `[{"a": 1}, {"a": 2}, ...]` for the given numbers.
#[must_use]
pub fn numbers_dataset(values: &[i64]) -> ListDataset {
    let values: Vec<Value> = values.iter().map(|v| json!(v)).collect();
    field_dataset("a", &values)
}

/// Wraps a dataset for binding to a DAG.
#[must_use]
pub fn shared(dataset: ListDataset) -> Arc<dyn Dataset> {
    Arc::new(dataset)
}

/// Multiplies a number by two.
#[must_use]
pub fn times_two() -> FnProcessor {
    FnProcessor::unary("times_two", |x| match x.as_i64() {
        Some(n) => Ok(json!(n * 2)),
        None => anyhow::bail!("expected an integer, got {x}"),
    })
}

/// Adds two numbers.
#[must_use]
pub fn add() -> FnProcessor {
    FnProcessor::binary("add", |a, b| match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => Ok(json!(a + b)),
        _ => anyhow::bail!("expected two integers, got {a} and {b}"),
    })
}

/// Adds one to a number.
#[must_use]
pub fn plus_one() -> FnProcessor {
    FnProcessor::unary("plus_one", |x| match x.as_i64() {
        Some(n) => Ok(json!(n + 1)),
        None => anyhow::bail!("expected an integer, got {x}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::Sample;

    #[test]
    fn test_numbers_dataset() {
        let dataset = numbers_dataset(&[1, 2, 3]);
        assert_eq!(dataset.len(), 3);

        let ids: Vec<String> = dataset.samples().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
        let first = dataset.samples().next().unwrap();
        assert_eq!(first.lookup("a").unwrap(), json!(1));
    }
}
