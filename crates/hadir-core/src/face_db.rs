//! Labeled reference set built from backend identity records.

use crate::types::{Embedding, IdentityId, IdentityRecord};

/// One known identity and its reference embeddings.
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub id: IdentityId,
    pub name: String,
    pub embeddings: Vec<Embedding>,
}

/// Immutable set of (identity, embeddings) pairs a live detection is compared against.
///
/// Iteration order is the order the records were supplied in; the matcher's
/// tie-break relies on it.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    entries: Vec<ReferenceEntry>,
    dimension: Option<usize>,
}

impl ReferenceSet {
    /// Build the set from a snapshot of identity records.
    ///
    /// `expected_dim` is the embedding length the live embedder produces.
    /// Records whose descriptor is absent, unparseable or of another length
    /// are skipped with a warning. Without an expected length, the most
    /// common descriptor length wins (earliest on a tie). Never fails; an
    /// empty result is valid.
    pub fn build(records: &[IdentityRecord], expected_dim: Option<usize>) -> Self {
        let mut skipped = 0usize;
        let mut parsed = Vec::with_capacity(records.len());

        for record in records {
            let Some(raw) = record.descriptor.as_ref().filter(|v| !v.is_null()) else {
                tracing::debug!(id = %record.id, name = %record.name, "no face descriptor enrolled");
                skipped += 1;
                continue;
            };
            match Embedding::from_descriptor(raw) {
                Ok(embedding) => parsed.push((record, embedding)),
                Err(err) => {
                    tracing::warn!(id = %record.id, name = %record.name, error = %err, "skipping malformed face descriptor");
                    skipped += 1;
                }
            }
        }

        let dim = expected_dim.or_else(|| dominant_len(parsed.iter().map(|(_, e)| e.len())));
        let mut set = Self {
            entries: Vec::new(),
            dimension: dim,
        };

        for (record, embedding) in parsed {
            if Some(embedding.len()) != dim {
                tracing::warn!(
                    id = %record.id,
                    name = %record.name,
                    expected = ?dim,
                    actual = embedding.len(),
                    "skipping face descriptor with mismatched dimension"
                );
                skipped += 1;
                continue;
            }
            set.insert(record.id, &record.name, embedding);
        }

        tracing::info!(
            identities = set.len(),
            embeddings = set.embedding_count(),
            dimension = ?set.dimension,
            skipped,
            "face reference set built"
        );

        set
    }

    /// Add an embedding, appending to an existing identity if already present.
    pub fn insert(&mut self, id: IdentityId, name: &str, embedding: Embedding) {
        self.dimension.get_or_insert(embedding.len());
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => entry.embeddings.push(embedding),
            None => self.entries.push(ReferenceEntry {
                id,
                name: name.to_string(),
                embeddings: vec![embedding],
            }),
        }
    }

    /// Number of distinct identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn embedding_count(&self) -> usize {
        self.entries.iter().map(|e| e.embeddings.len()).sum()
    }

    /// Embedding dimension every entry shares.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn name_of(&self, id: IdentityId) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.as_str())
    }
}

/// Most frequent length; the earliest seen wins a tie.
fn dominant_len(lens: impl Iterator<Item = usize>) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for len in lens {
        match counts.iter_mut().find(|(l, _)| *l == len) {
            Some((_, n)) => *n += 1,
            None => counts.push((len, 1)),
        }
    }
    counts
        .iter()
        .fold(None, |best: Option<(usize, usize)>, &(len, n)| match best {
            Some((_, top)) if top >= n => best,
            _ => Some((len, n)),
        })
        .map(|(len, _)| len)
}
