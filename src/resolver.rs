use crate::identifier::{MalformedRequest, MatchingKey, RetrieveIdentifier, RetrieveLevel};
use crate::types::MatchedObject;

/// An index of stored instances which can be searched by matching keys.
pub trait StorageIndex {
    /// Find the instances at `level` and below it which match all of the `keys`.
    ///
    /// The order of the returned instances must be stable, and each instance must appear
    /// at most once. Finding nothing is not an error.
    fn find(
        &self,
        level: RetrieveLevel,
        keys: &[MatchingKey],
    ) -> Result<Vec<MatchedObject>, StorageIndexError>;
}

impl<T: StorageIndex + ?Sized> StorageIndex for std::sync::Arc<T> {
    fn find(
        &self,
        level: RetrieveLevel,
        keys: &[MatchingKey],
    ) -> Result<Vec<MatchedObject>, StorageIndexError> {
        (**self).find(level, keys)
    }
}

/// The storage index could not be searched.
#[derive(thiserror::Error, Debug)]
#[error("Storage index error: {0}")]
pub struct StorageIndexError(pub String);

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Malformed(#[from] MalformedRequest),

    #[error(transparent)]
    Index(#[from] StorageIndexError),
}

/// Resolves the identifier of a C-GET request to the instances to send.
pub struct QueryResolver<I> {
    index: I,
}

impl<I: StorageIndex> QueryResolver<I> {
    pub fn new(index: I) -> Self {
        Self { index }
    }

    /// Find all instances matching the identifier. Keys below the retrieval level are ignored.
    ///
    /// Nothing matches if the unique key of the retrieval level has no value, and the index
    /// is not searched at all.
    pub fn resolve(
        &self,
        identifier: &RetrieveIdentifier,
    ) -> Result<Vec<MatchedObject>, ResolveError> {
        let level = identifier.level()?;
        if !identifier.has_unique_key(level) {
            tracing::info!(
                level = level.to_string(),
                "C-GET identifier has no value for the unique key of its level"
            );
            return Ok(Vec::new());
        }
        let keys: Vec<MatchingKey> = identifier.keys_in_scope(level).cloned().collect();
        let matches = self.index.find(level, &keys)?;
        tracing::debug!(
            level = level.to_string(),
            keys = keys.len(),
            matches = matches.len(),
            "resolved C-GET identifier"
        );
        Ok(matches)
    }
}
