use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::fingerprint::{Fingerprint, Fingerprinter, HashAlgorithm};
use crate::storage::IndexStore;
use crate::types::{IndexEntry, Occurrence};

/// Read-only lookups against an index.
pub struct QueryEngine<'a> {
    store: &'a dyn IndexStore,
    fingerprinter: Arc<dyn Fingerprinter>,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a dyn IndexStore, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        Self { store, fingerprinter }
    }

    /// Use whatever algorithm the store was built with.
    pub fn for_store(store: &'a dyn IndexStore) -> Result<Self> {
        let algorithm = HashAlgorithm::from_name(store.algorithm())
            .ok_or_else(|| StoreError::UnknownAlgorithm(store.algorithm().to_string()))?;
        Ok(Self::new(store, algorithm.fingerprinter()))
    }

    pub fn fingerprint(&self, text: &[u8]) -> Fingerprint {
        self.fingerprinter.fingerprint(text)
    }

    /// Occurrences of exactly `text`. Other texts chained under the same
    /// fingerprint are excluded.
    pub fn lookup(&self, text: &[u8]) -> Result<BTreeSet<Occurrence>> {
        let fingerprint = self.fingerprint(text);
        let bucket = self.store.get(fingerprint)?;
        debug!("Fingerprint {} holds {} text(s)", fingerprint, bucket.len());

        Ok(bucket
            .into_iter()
            .filter(|entry| entry.text == text)
            .flat_map(|entry| entry.occurrences)
            .collect())
    }

    /// Every occurrence under a fingerprint, whatever the text.
    pub fn lookup_by_fingerprint(&self, fingerprint: Fingerprint) -> Result<BTreeSet<Occurrence>> {
        Ok(self
            .store
            .get(fingerprint)?
            .into_iter()
            .flat_map(|entry| entry.occurrences)
            .collect())
    }

    /// The raw collision chain for a fingerprint.
    pub fn entries(&self, fingerprint: Fingerprint) -> Result<Vec<IndexEntry>> {
        Ok(self.store.get(fingerprint)?)
    }
}
