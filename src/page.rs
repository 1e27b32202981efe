//! Session pages and the ordered page store.
//!
//! A [`Page`] wraps one [`Document`] with its session-local state: whether
//! the upload finished and the last error. The [`PageStore`] keeps pages in
//! insertion order, which drives presentation order and the order in which
//! uploads and retries are issued.
//!
//! ## Invariants
//!
//! - All pages share one [`DocumentType`] or the store is empty.
//! - `len() <= max_pages` at all times.
//! - A page is never both uploaded and in error.
//! - Lookups and reorders go through [`DocumentId`], never through a
//!   position a caller remembered earlier.

use crate::document::{contains_different_types, Document, DocumentId, DocumentType};
use crate::error::{AdmissionError, PageError, SessionError};
use serde::Serialize;
use std::collections::HashSet;

/// A document plus its upload/error state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    document: Document,
    is_uploaded: bool,
    error: Option<PageError>,
}

impl Page {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            is_uploaded: false,
            error: None,
        }
    }

    /// A page that failed structural validation.
    pub fn with_error(document: Document, error: PageError) -> Self {
        Self {
            document,
            is_uploaded: false,
            error: Some(error),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn id(&self) -> DocumentId {
        self.document.id()
    }

    pub fn is_uploaded(&self) -> bool {
        self.is_uploaded
    }

    pub fn error(&self) -> Option<&PageError> {
        self.error.as_ref()
    }

    pub fn mark_uploaded(&mut self) {
        self.is_uploaded = true;
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: PageError) {
        self.is_uploaded = false;
        self.error = Some(error);
    }

    /// Reset the error ahead of a retry.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Swap in an edited version of the same document.
    ///
    /// Upload state is kept; the service is told about the edit separately.
    pub(crate) fn replace_document(&mut self, document: Document) {
        debug_assert_eq!(self.document.id(), document.id());
        self.document = document;
    }
}

/// Ordered collection of session pages.
#[derive(Debug, Clone)]
pub struct PageStore {
    pages: Vec<Page>,
    max_pages: usize,
}

impl PageStore {
    pub fn new(max_pages: usize) -> Self {
        Self {
            pages: Vec::new(),
            max_pages,
        }
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn documents(&self) -> Vec<Document> {
        self.pages.iter().map(|p| p.document.clone()).collect()
    }

    pub fn first(&self) -> Option<&Page> {
        self.pages.first()
    }

    /// Append pages, keeping the type and ceiling invariants.
    ///
    /// The admission pipeline checks the same rules before structural
    /// validation; this is the last line that keeps the store consistent.
    pub fn append(&mut self, pages: Vec<Page>) -> Result<(), AdmissionError> {
        let all = self
            .pages
            .iter()
            .chain(pages.iter())
            .map(Page::document);
        if contains_different_types(all) {
            return Err(AdmissionError::MixedTypes);
        }
        let requested = self.pages.len() + pages.len();
        if requested > self.max_pages {
            return Err(AdmissionError::PageLimitExceeded {
                max: self.max_pages,
                requested,
            });
        }
        self.pages.extend(pages);
        Ok(())
    }

    /// Remove the page wrapping `id`.
    pub fn remove(&mut self, id: DocumentId) -> Option<Page> {
        let index = self.index_of(id)?;
        Some(self.pages.remove(index))
    }

    /// Put pages in the order given by `order`.
    ///
    /// `order` must name every current page exactly once; otherwise the
    /// store is left untouched. Each page moves with its own upload/error
    /// state.
    pub fn reorder(&mut self, order: &[DocumentId]) -> Result<(), SessionError> {
        let invalid = SessionError::InvalidOrder {
            expected: self.pages.len(),
            got: order.len(),
        };
        if order.len() != self.pages.len() {
            return Err(invalid);
        }
        let mut seen = HashSet::with_capacity(order.len());
        if !order
            .iter()
            .all(|id| self.index_of(*id).is_some() && seen.insert(*id))
        {
            return Err(invalid);
        }

        let mut remaining = std::mem::take(&mut self.pages);
        for id in order {
            if let Some(index) = remaining.iter().position(|p| p.id() == *id) {
                self.pages.push(remaining.swap_remove(index));
            }
        }
        Ok(())
    }

    pub fn index_of(&self, id: DocumentId) -> Option<usize> {
        self.pages.iter().position(|p| p.id() == id)
    }

    pub fn get(&self, id: DocumentId) -> Option<&Page> {
        self.pages.iter().find(|p| p.id() == id)
    }

    pub fn get_mut(&mut self, id: DocumentId) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| p.id() == id)
    }

    /// The shared type of all pages, or `None` when empty.
    pub fn type_of_all(&self) -> Option<DocumentType> {
        self.pages.first().map(|p| p.document.document_type())
    }

    /// True when the store is non-empty and every page finished uploading.
    pub fn all_uploaded(&self) -> bool {
        !self.pages.is_empty() && self.pages.iter().all(Page::is_uploaded)
    }

    /// Number of pages not yet uploaded.
    pub fn pending_uploads(&self) -> usize {
        self.pages.iter().filter(|p| !p.is_uploaded).count()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(n: usize) -> Vec<Page> {
        (0..n)
            .map(|i| Page::new(Document::image(vec![i as u8 + 1])))
            .collect()
    }

    #[test]
    fn reorder_moves_state_with_identity() {
        let mut store = PageStore::new(10);
        store.append(images(3)).unwrap();
        let ids: Vec<_> = store.iter().map(Page::id).collect();
        store.get_mut(ids[0]).unwrap().mark_uploaded();
        store.get_mut(ids[2]).unwrap().mark_failed(PageError::UploadFailed {
            detail: "boom".into(),
        });

        store.reorder(&[ids[2], ids[0], ids[1]]).unwrap();

        let order: Vec<_> = store.iter().map(Page::id).collect();
        assert_eq!(order, vec![ids[2], ids[0], ids[1]]);
        assert!(store.pages()[0].error().is_some());
        assert!(store.pages()[1].is_uploaded());
        assert!(!store.pages()[2].is_uploaded());
    }

    #[test]
    fn reorder_rejects_non_permutations_without_change() {
        let mut store = PageStore::new(10);
        store.append(images(2)).unwrap();
        let ids: Vec<_> = store.iter().map(Page::id).collect();

        let stranger = DocumentId::new();
        assert!(matches!(
            store.reorder(&[ids[1], stranger]),
            Err(SessionError::InvalidOrder { .. })
        ));
        assert!(store.reorder(&[ids[1], ids[1]]).is_err());
        assert!(store.reorder(&[ids[1]]).is_err());

        let order: Vec<_> = store.iter().map(Page::id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn append_rejects_mixed_types_and_overflow() {
        let mut store = PageStore::new(2);
        store.append(images(1)).unwrap();

        let pdf = vec![Page::new(Document::pdf(b"%PDF".to_vec()))];
        assert_eq!(store.append(pdf), Err(AdmissionError::MixedTypes));

        assert_eq!(
            store.append(images(2)),
            Err(AdmissionError::PageLimitExceeded {
                max: 2,
                requested: 3
            })
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_store_is_not_all_uploaded() {
        let mut store = PageStore::new(3);
        assert!(!store.all_uploaded());
        store.append(images(1)).unwrap();
        let id = store.first().unwrap().id();
        store.get_mut(id).unwrap().mark_uploaded();
        assert!(store.all_uploaded());
        assert_eq!(store.pending_uploads(), 0);
    }

    #[test]
    fn edit_keeps_identity_and_state() {
        let mut page = Page::new(Document::image(vec![1u8]));
        page.mark_uploaded();
        let id = page.id();
        let edited = page.document().edited(vec![2u8]);
        page.replace_document(edited);
        assert_eq!(page.id(), id);
        assert_eq!(page.document().data(), &[2u8]);
        assert!(page.is_uploaded());
    }
}
