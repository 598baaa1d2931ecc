//! Document catalogue query capability.

use shared::pagination::PageCursor;
use std::sync::RwLock;

use crate::error::RepositoryError;
use crate::models::{DocumentEstimate, DocumentRef, FilterSpec};

/// Read-only queries over the document catalogue.
#[async_trait::async_trait]
pub trait DocumentCatalog: Send + Sync {
    /// Returns up to `limit` documents matching the filter, ordered by
    /// `created_at DESC, id DESC`, starting strictly after `after`.
    async fn find_page(
        &self,
        filter: &FilterSpec,
        after: Option<PageCursor>,
        limit: usize,
    ) -> Result<Vec<DocumentRef>, RepositoryError>;

    /// Count and total declared size of the matching documents.
    async fn aggregate(&self, filter: &FilterSpec) -> Result<DocumentEstimate, RepositoryError>;
}

/// Catalogue held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDocumentCatalog {
    documents: RwLock<Vec<DocumentRef>>,
}

impl InMemoryDocumentCatalog {
    pub fn new(documents: Vec<DocumentRef>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    pub fn insert(&self, document: DocumentRef) {
        self.documents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(document);
    }

    fn matching(&self, filter: &FilterSpec) -> Vec<DocumentRef> {
        self.documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl DocumentCatalog for InMemoryDocumentCatalog {
    async fn find_page(
        &self,
        filter: &FilterSpec,
        after: Option<PageCursor>,
        limit: usize,
    ) -> Result<Vec<DocumentRef>, RepositoryError> {
        let mut docs: Vec<DocumentRef> = self
            .matching(filter)
            .into_iter()
            .filter(|d| after.map_or(true, |c| c.precedes(d.created_at, d.id)))
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        docs.truncate(limit);
        Ok(docs)
    }

    async fn aggregate(&self, filter: &FilterSpec) -> Result<DocumentEstimate, RepositoryError> {
        let docs = self.matching(filter);
        Ok(DocumentEstimate {
            document_count: docs.len() as i64,
            estimated_size_bytes: docs.iter().map(|d| d.size_bytes.max(0)).sum(),
        })
    }
}
