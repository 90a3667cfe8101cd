//! Registry of in-flight batches.
//!
//! The first registered batch is the default one; its first open changeset
//! is the default changeset. Batches are single use: `BatchClient::submit`
//! removes a batch once its response has been dispatched.

use crate::batch::Batch;
use crate::boundary::{BoundaryContainer, BoundaryId};
use crate::changeset::ChangeSet;
use crate::error::BatchError;

/// Handle to a registered batch.
pub type BatchId = BoundaryId;

#[derive(Debug, Default)]
pub struct BatchManager {
    batches: Vec<Batch>,
}

impl BatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new empty batch.
    pub fn add(&mut self) -> BatchId {
        let batch = Batch::new();
        let id = batch.id().clone();
        self.batches.push(batch);
        id
    }

    pub fn has(&self, id: &BatchId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &BatchId) -> Option<&Batch> {
        self.batches.iter().find(|batch| batch.id() == id)
    }

    pub fn get_mut(&mut self, id: &BatchId) -> Option<&mut Batch> {
        self.batches.iter_mut().find(|batch| batch.id() == id)
    }

    /// Like `get_mut`, failing with `BatchNotFound`.
    pub fn batch_mut(&mut self, id: &BatchId) -> Result<&mut Batch, BatchError> {
        self.get_mut(id)
            .ok_or_else(|| BatchError::BatchNotFound(id.to_string()))
    }

    /// Unregister a batch, handing it back to the caller.
    pub fn remove(&mut self, id: &BatchId) -> Option<Batch> {
        self.position(id).map(|index| self.batches.remove(index))
    }

    pub fn default_batch(&self) -> Option<&Batch> {
        self.batches.first()
    }

    pub fn default_batch_mut(&mut self) -> Option<&mut Batch> {
        self.batches.first_mut()
    }

    pub fn default_change_set(&self) -> Option<&ChangeSet> {
        self.default_batch()?.default_change_set()
    }

    pub fn default_change_set_mut(&mut self) -> Option<&mut ChangeSet> {
        self.default_batch_mut()?.default_change_set_mut()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    fn position(&self, id: &BatchId) -> Option<usize> {
        self.batches.iter().position(|batch| batch.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::request::Request;

    #[test]
    fn first_batch_is_default() {
        let mut manager = BatchManager::new();
        assert!(manager.default_batch().is_none());
        let first = manager.add();
        let second = manager.add();
        assert_ne!(first, second);
        assert_eq!(manager.default_batch().map(|b| b.id().clone()), Some(first.clone()));

        manager.remove(&first).unwrap();
        assert_eq!(manager.default_batch().map(|b| b.id().clone()), Some(second));
    }

    #[test]
    fn default_change_set_comes_from_default_batch() {
        let mut manager = BatchManager::new();
        assert!(manager.default_change_set().is_none());

        let id = manager.add();
        assert!(manager.default_change_set().is_none());

        let batch = manager.batch_mut(&id).unwrap();
        let mut sealed = ChangeSet::new();
        sealed.commit();
        batch.add_change_set(sealed);
        let open = ChangeSet::new();
        let open_id = open.id().clone();
        batch.add_change_set(open);

        assert_eq!(manager.default_change_set().map(|c| c.id().clone()), Some(open_id));
        manager
            .default_change_set_mut()
            .unwrap()
            .add(Request::new(HttpMethod::Delete, "Products(1)"))
            .unwrap();
        assert_eq!(manager.default_change_set().map(ChangeSet::len), Some(1));
    }

    #[test]
    fn removed_batch_is_gone() {
        let mut manager = BatchManager::new();
        let id = manager.add();
        assert!(manager.has(&id));
        assert!(manager.remove(&id).is_some());
        assert!(!manager.has(&id));
        assert!(manager.remove(&id).is_none());
        assert!(matches!(manager.batch_mut(&id), Err(BatchError::BatchNotFound(_))));
    }
}
