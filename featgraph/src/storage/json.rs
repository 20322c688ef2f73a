//! JSON file storage.

use super::{DictStorage, StorageIndexing, StorageSink};
use crate::core::{FeatureName, SampleData, SampleId};
use crate::errors::FeatgraphError;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Buffers every value and writes a single JSON document on
/// [`finalize`](StorageSink::finalize).
pub struct JsonStorage<W: Write + Send> {
    buffer: DictStorage,
    writer: W,
    pretty: bool,
    finalized: bool,
}

impl<W: Write + Send> fmt::Debug for JsonStorage<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonStorage")
            .field("buffer", &self.buffer)
            .field("finalized", &self.finalized)
            .field("pretty", &self.pretty)
            .finish()
    }
}

impl JsonStorage<BufWriter<File>> {
    /// Creates (or truncates) a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`FeatgraphError::Io`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>, indexing: StorageIndexing) -> Result<Self, FeatgraphError> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened json storage");
        Ok(Self::new(BufWriter::new(file), indexing))
    }
}

impl<W: Write + Send> JsonStorage<W> {
    /// Wraps a writer.
    pub fn new(writer: W, indexing: StorageIndexing) -> Self {
        Self {
            buffer: DictStorage::new(indexing),
            writer,
            pretty: false,
            finalized: false,
        }
    }

    /// Pretty-prints the document.
    #[must_use]
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    /// Values buffered so far.
    #[must_use]
    pub fn buffered(&self) -> &DictStorage {
        &self.buffer
    }

    /// Returns the underlying writer.
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn ensure_open(&self) -> Result<(), FeatgraphError> {
        if self.finalized {
            return Err(FeatgraphError::Storage(
                "json storage already finalized".to_string(),
            ));
        }
        Ok(())
    }
}

impl<W: Write + Send> StorageSink for JsonStorage<W> {
    fn store_feature(
        &mut self,
        name: &str,
        values: BTreeMap<SampleId, SampleData>,
    ) -> Result<(), FeatgraphError> {
        self.ensure_open()?;
        self.buffer.store_feature(name, values)
    }

    fn store_sample(
        &mut self,
        sample_id: &str,
        values: BTreeMap<FeatureName, SampleData>,
    ) -> Result<(), FeatgraphError> {
        self.ensure_open()?;
        self.buffer.store_sample(sample_id, values)
    }

    fn store_dataset_feature(&mut self, name: &str, value: SampleData) -> Result<(), FeatgraphError> {
        self.ensure_open()?;
        self.buffer.store_dataset_feature(name, value)
    }

    fn finalize(&mut self) -> Result<(), FeatgraphError> {
        self.ensure_open()?;
        let document = self.buffer.to_json();
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.writer, &document)?;
        } else {
            serde_json::to_writer(&mut self.writer, &document)?;
        }
        self.writer.flush()?;
        self.finalized = true;
        debug!(cells = self.buffer.cell_count(), "json storage written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_writes_document_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.json");

        let mut storage = JsonStorage::create(&path, StorageIndexing::Sample).unwrap();
        storage
            .store_feature(
                "double",
                BTreeMap::from([("0".to_string(), json!(2)), ("1".to_string(), json!(4))]),
            )
            .unwrap();
        storage.finalize().unwrap();
        drop(storage);

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, json!({"0": {"double": 2}, "1": {"double": 4}}));
    }

    #[test]
    fn test_writes_to_any_writer() {
        let mut storage = JsonStorage::new(Vec::new(), StorageIndexing::Feature).pretty();
        storage
            .store_sample("a", BTreeMap::from([("x".to_string(), json!(1))]))
            .unwrap();
        storage.store_dataset_feature("total", json!(1)).unwrap();
        storage.finalize().unwrap();

        assert!(storage.finalize().is_err());
        let bytes = storage.into_writer();
        let written: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(written, json!({"x": {"a": 1}, "<dataset>": {"total": 1}}));
    }
}
