use std::collections::BTreeMap;
use tracing::debug;

use crate::service::CollabService;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DocumentId(pub u32);

/// The documents an editor has open. Each document has exactly one service.
#[derive(Debug, Default)]
pub struct DocumentSet {
    documents: BTreeMap<DocumentId, CollabService>,
    next_id: u32,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, service: CollabService) -> DocumentId {
        let id = DocumentId(self.next_id);
        self.next_id += 1;
        debug!(id = id.0, user = %service.user(), "document opened");
        self.documents.insert(id, service);
        id
    }

    pub fn close(&mut self, id: DocumentId) -> Option<CollabService> {
        let service = self.documents.remove(&id);
        if service.is_some() {
            debug!(id = id.0, "document closed");
        }
        service
    }

    pub fn get(&self, id: DocumentId) -> Option<&CollabService> {
        self.documents.get(&id)
    }

    pub fn get_mut(&mut self, id: DocumentId) -> Option<&mut CollabService> {
        self.documents.get_mut(&id)
    }

    pub fn len(&self) -> usize { self.documents.len() }

    pub fn is_empty(&self) -> bool { self.documents.is_empty() }

    pub fn ids(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.documents.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DocumentId, &CollabService)> {
        self.documents.iter().map(|(id, s)| (*id, s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (DocumentId, &mut CollabService)> {
        self.documents.iter_mut().map(|(id, s)| (*id, s))
    }
}
