//! An offline [`DocumentService`] that answers from a recorded result.
//!
//! Useful for demos, the CLI and tests: uploads are accepted locally, the
//! remote order follows `sort_documents`, and every analysis returns the
//! same [`ExtractionResult`].

use crate::document::{Document, DocumentId};
use crate::error::ServiceError;
use crate::extraction::ExtractionResult;
use crate::service::{DocumentService, RemoteDocument};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct ReplayState {
    remote: Vec<DocumentId>,
    feedback: Vec<ExtractionResult>,
    resets: usize,
}

#[derive(Debug)]
pub struct ReplayService {
    result: ExtractionResult,
    failing_uploads: AtomicUsize,
    analysis_delay: Duration,
    cancel: Notify,
    state: Mutex<ReplayState>,
}

impl ReplayService {
    pub fn new(result: ExtractionResult) -> Self {
        Self {
            result,
            failing_uploads: AtomicUsize::new(0),
            analysis_delay: Duration::ZERO,
            cancel: Notify::new(),
            state: Mutex::new(ReplayState::default()),
        }
    }

    /// Load the canned result from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(ExtractionResult::from_json(json)?))
    }

    /// Fail the next `n` uploads with a network error.
    pub fn fail_first_uploads(self, n: usize) -> Self {
        self.failing_uploads.store(n, Ordering::SeqCst);
        self
    }

    /// Make each analysis take `delay` (and so be cancellable).
    pub fn with_analysis_delay(mut self, delay: Duration) -> Self {
        self.analysis_delay = delay;
        self
    }

    /// Documents the backend holds, in remote order.
    pub fn remote_order(&self) -> Vec<DocumentId> {
        self.lock().remote.clone()
    }

    /// Every feedback submission received so far.
    pub fn feedback(&self) -> Vec<ExtractionResult> {
        self.lock().feedback.clone()
    }

    pub fn resets(&self) -> usize {
        self.lock().resets
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplayState> {
        // State stays consistent even if a holder panicked; every update is a
        // single push or assignment.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentService for ReplayService {
    async fn upload(&self, document: &Document) -> Result<RemoteDocument, ServiceError> {
        let failing = self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            debug!(id = %document.id(), "Replay: failing upload");
            return Err(ServiceError::Network("simulated upload failure".into()));
        }

        let mut state = self.lock();
        if !state.remote.contains(&document.id()) {
            state.remote.push(document.id());
        }
        Ok(RemoteDocument::new(document.id().to_string()))
    }

    async fn start_analysis(&self) -> Result<ExtractionResult, ServiceError> {
        if !self.analysis_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.analysis_delay) => {}
                _ = self.cancel.notified() => return Err(ServiceError::RequestCancelled),
            }
        }
        if self.lock().remote.is_empty() {
            return Err(ServiceError::Other("nothing uploaded".into()));
        }
        Ok(self.result.clone())
    }

    fn cancel_analysis(&self) {
        self.cancel.notify_waiters();
    }

    async fn remove(&self, document: &Document) -> Result<(), ServiceError> {
        self.lock().remote.retain(|id| *id != document.id());
        Ok(())
    }

    async fn reset_to_initial_state(&self) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.remote.clear();
        state.resets += 1;
        Ok(())
    }

    async fn update(&self, document: &Document) -> Result<(), ServiceError> {
        if self.lock().remote.contains(&document.id()) {
            Ok(())
        } else {
            Err(ServiceError::NotFound(document.id().to_string()))
        }
    }

    async fn sort_documents(&self, documents: &[Document]) -> Result<(), ServiceError> {
        let mut state = self.lock();
        let order: Vec<DocumentId> = documents
            .iter()
            .map(Document::id)
            .filter(|id| state.remote.contains(id))
            .collect();
        state.remote = order;
        Ok(())
    }

    async fn send_feedback(&self, result: &ExtractionResult) -> Result<(), ServiceError> {
        self.lock().feedback.push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::Extraction;

    fn result() -> ExtractionResult {
        ExtractionResult::from_extractions([Extraction::new("iban", "DE00")])
    }

    #[tokio::test]
    async fn fails_the_requested_number_of_uploads() {
        let service = ReplayService::new(result()).fail_first_uploads(1);
        let doc = Document::image(vec![1u8]);
        assert!(service.upload(&doc).await.is_err());
        assert!(service.upload(&doc).await.is_ok());
        assert_eq!(service.remote_order(), vec![doc.id()]);
    }

    #[tokio::test]
    async fn sort_mirrors_local_order() {
        let service = ReplayService::new(result());
        let a = Document::image(vec![1u8]);
        let b = Document::image(vec![2u8]);
        service.upload(&a).await.unwrap();
        service.upload(&b).await.unwrap();
        service.sort_documents(&[b.clone(), a.clone()]).await.unwrap();
        assert_eq!(service.remote_order(), vec![b.id(), a.id()]);
    }

    #[tokio::test]
    async fn analysis_needs_an_upload() {
        let service = ReplayService::new(result());
        assert!(service.start_analysis().await.is_err());
        service.upload(&Document::pdf(b"%PDF".to_vec())).await.unwrap();
        assert_eq!(service.start_analysis().await.unwrap(), result());
    }

    #[tokio::test]
    async fn delayed_analysis_can_be_cancelled() {
        let service = std::sync::Arc::new(
            ReplayService::new(result()).with_analysis_delay(Duration::from_secs(30)),
        );
        service.upload(&Document::image(vec![1u8])).await.unwrap();
        let running = tokio::spawn({
            let service = service.clone();
            async move { service.start_analysis().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.cancel_analysis();
        let outcome = running.await.unwrap();
        assert_eq!(outcome, Err(ServiceError::RequestCancelled));
    }
}
