//! Upload bookkeeping.
//!
//! The [`UploadCoordinator`] tracks which pages have an upload in flight and
//! what should happen when it completes. It never talks to the service
//! itself: the session spawns the call and feeds the completion back
//! through [`UploadCoordinator::finish`], which matches it to its page by
//! [`DocumentId`] and attempt number. Completions for pages that were
//! deleted, or for attempts superseded by a reset, come back as
//! [`UploadResolution::Orphaned`].

use crate::document::DocumentId;
use crate::error::{PageError, ServiceError};
use crate::page::PageStore;
use std::collections::HashMap;
use tracing::debug;

/// What a successful upload leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPolicy {
    /// Single-page chain: start the analysis once everything is uploaded.
    AnalyzeOnSuccess,
    /// Multipage: just record the upload.
    StoreOnly,
}

/// Identifies one upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTicket {
    pub document: DocumentId,
    pub attempt: u64,
}

/// The outcome of feeding a completion back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResolution {
    Uploaded { policy: UploadPolicy },
    Failed { policy: UploadPolicy, error: PageError },
    /// The page or the attempt no longer exists.
    Orphaned,
}

#[derive(Debug, Default)]
pub struct UploadCoordinator {
    in_flight: HashMap<DocumentId, (u64, UploadPolicy)>,
    next_attempt: u64,
}

impl UploadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an upload for `id`.
    ///
    /// Returns `None` when the page is unknown, already uploaded, or already
    /// has an upload in flight. A later request for the analysing policy
    /// upgrades an in-flight store-only upload.
    pub fn begin(
        &mut self,
        store: &PageStore,
        id: DocumentId,
        policy: UploadPolicy,
    ) -> Option<UploadTicket> {
        let page = store.get(id)?;
        if page.is_uploaded() {
            return None;
        }
        if let Some((_, current)) = self.in_flight.get_mut(&id) {
            if policy == UploadPolicy::AnalyzeOnSuccess {
                *current = policy;
            }
            return None;
        }
        self.next_attempt += 1;
        self.in_flight.insert(id, (self.next_attempt, policy));
        debug!(%id, attempt = self.next_attempt, ?policy, "Upload started");
        Some(UploadTicket {
            document: id,
            attempt: self.next_attempt,
        })
    }

    /// Apply a completion to the store.
    pub fn finish(
        &mut self,
        store: &mut PageStore,
        ticket: UploadTicket,
        outcome: Result<(), ServiceError>,
    ) -> UploadResolution {
        let policy = match self.in_flight.get(&ticket.document) {
            Some((attempt, policy)) if *attempt == ticket.attempt => *policy,
            _ => {
                debug!(id = %ticket.document, attempt = ticket.attempt, "Dropping stale upload completion");
                return UploadResolution::Orphaned;
            }
        };
        self.in_flight.remove(&ticket.document);

        let Some(page) = store.get_mut(ticket.document) else {
            return UploadResolution::Orphaned;
        };
        match outcome {
            Ok(()) => {
                page.mark_uploaded();
                UploadResolution::Uploaded { policy }
            }
            Err(e) => {
                let error = PageError::UploadFailed {
                    detail: e.to_string(),
                };
                page.mark_failed(error.clone());
                UploadResolution::Failed { policy, error }
            }
        }
    }

    pub fn is_in_flight(&self, id: DocumentId) -> bool {
        self.in_flight.contains_key(&id)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Forget one page's upload; its completion will be orphaned.
    pub fn abandon(&mut self, id: DocumentId) {
        self.in_flight.remove(&id);
    }

    /// Forget every in-flight upload.
    pub fn reset(&mut self) {
        self.in_flight.clear();
    }
}
