//! The external document service.
//!
//! The session talks to the remote backend only through
//! [`DocumentService`]. A network client, a test double and the offline
//! [`crate::replay::ReplayService`] all plug in here.

use crate::document::Document;
use crate::error::ServiceError;
use crate::extraction::ExtractionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The service's handle for an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl RemoteDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: None,
        }
    }
}

/// Operations the session needs from the remote backend.
///
/// `upload` and `start_analysis` run on spawned tasks and may take as long
/// as they need. The bookkeeping calls (`remove`, `reset_to_initial_state`,
/// `update`, `sort_documents`, `send_feedback`) are awaited by the session
/// in order and should return promptly; their failures are logged and do
/// not interrupt the session.
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn upload(&self, document: &Document) -> Result<RemoteDocument, ServiceError>;

    /// Analyse every document uploaded so far, as one composite document.
    async fn start_analysis(&self) -> Result<ExtractionResult, ServiceError>;

    /// Ask the backend to stop the running analysis.
    ///
    /// A cancelled `start_analysis` should resolve with
    /// [`ServiceError::RequestCancelled`]; the session ignores its result
    /// either way.
    fn cancel_analysis(&self);

    async fn remove(&self, document: &Document) -> Result<(), ServiceError>;

    async fn reset_to_initial_state(&self) -> Result<(), ServiceError>;

    /// Re-submit a document after the user edited it.
    async fn update(&self, document: &Document) -> Result<(), ServiceError>;

    /// Mirror the local page order on the backend.
    async fn sort_documents(&self, documents: &[Document]) -> Result<(), ServiceError>;

    /// Report the user's corrected extractions.
    async fn send_feedback(&self, result: &ExtractionResult) -> Result<(), ServiceError>;
}
