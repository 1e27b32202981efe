//! Error types for the capture-flow library.
//!
//! Failures fall into two severities:
//!
//! * [`SessionError`]: a call on the session could not be carried out at all
//!   (invalid transition, unknown document, rejected batch, closed session).
//!   Returned as `Err(SessionError)` from [`crate::session::SessionHandle`].
//!
//! * [`PageError`]: **non-fatal**, one page failed structural validation or
//!   its upload failed. Stored on the [`crate::page::Page`] itself so the
//!   rest of the session keeps going and the page can be retried on its own.
//!
//! The remaining enums describe one failure family each: admission of a
//! batch ([`AdmissionError`]), the external document service
//! ([`ServiceError`]), line-item parsing ([`LineItemError`]) and price
//! arithmetic ([`PriceError`]).

use crate::document::{DocumentId, DocumentType};
use crate::navigation::Stage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by session calls.
#[derive(Debug, Error)]
pub enum SessionError {
    // ── Admission ─────────────────────────────────────────────────────────
    /// The batch was rejected as a whole; the page store is unchanged.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    // ── Import ────────────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'")]
    FileNotFound { path: String },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The content is neither a PDF nor a supported image.
    #[error("Unsupported document '{input}'")]
    UnsupportedDocument { input: String },

    /// The configuration does not allow this kind of import.
    #[error("Importing {document_type} documents is not enabled")]
    ImportNotAllowed { document_type: DocumentType },

    // ── Navigation ────────────────────────────────────────────────────────
    /// The action is not available in the current stage.
    #[error("Cannot {action} while in stage {stage:?}")]
    InvalidTransition { stage: Stage, action: &'static str },

    /// Analysis cannot start before every page is uploaded.
    #[error("{pending} page(s) are not uploaded yet")]
    PagesNotReady { pending: usize },

    // ── Lookups ───────────────────────────────────────────────────────────
    /// No page in the store wraps this document.
    #[error("Unknown document {0}")]
    UnknownDocument(DocumentId),

    /// A reorder request was not a permutation of the current pages.
    #[error("Reorder must list every page exactly once ({expected} pages, got {got})")]
    InvalidOrder { expected: usize, got: usize },

    /// The retry token was never issued or was already acknowledged.
    #[error("Unknown or already acknowledged retry token {0}")]
    UnknownRetryToken(u64),

    /// The invoice total could not be computed.
    #[error(transparent)]
    Price(#[from] PriceError),

    /// Line-item index outside the current invoice.
    #[error("Line item {index} is out of range (invoice has {len} items)")]
    LineItemOutOfRange { index: usize, len: usize },

    // ── Lifecycle ─────────────────────────────────────────────────────────
    /// The session actor has finished; no further calls are accepted.
    #[error("Session is closed")]
    Closed,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Reasons a batch of candidate documents is refused as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Candidates plus existing pages span more than one document type.
    #[error("Documents of different types cannot be combined in one session")]
    MixedTypes,

    /// Candidates plus existing pages exceed the page ceiling.
    #[error("Too many pages: {requested} requested, at most {max} allowed")]
    PageLimitExceeded { max: usize, requested: usize },

    /// More than one image outside multipage mode.
    #[error("Only one image page is allowed without multipage mode, {requested} requested")]
    SinglePageOnly { requested: usize },

    /// The import source refused access.
    #[error("Permission denied for import source '{source_name}'")]
    PermissionDenied { source_name: String },

    /// A structural failure that is fatal outside multipage image mode.
    #[error(transparent)]
    InvalidDocument(PageError),
}

/// A non-fatal failure recorded on a single page.
///
/// Stored on [`crate::page::Page`]; cleared when the page is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PageError {
    /// The document has no payload.
    #[error("Document is empty")]
    EmptyDocument,

    /// Payload exceeds the configured size limit.
    #[error("Document is {size} bytes, maximum is {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    /// Image header could not be decoded or the format is not supported.
    #[error("Image format is not valid: {detail}")]
    ImageFormatNotValid { detail: String },

    /// The PDF is structurally broken.
    #[error("PDF is not valid: {detail}")]
    PdfNotValid { detail: String },

    /// The PDF is encrypted.
    #[error("PDF is password protected")]
    PdfPasswordProtected,

    /// The PDF has no pages or more pages than allowed.
    #[error("PDF has {pages} pages, allowed range is 1-{max}")]
    PdfPageLimitExceeded { pages: usize, max: usize },

    /// The QR payload is not a supported payment code.
    #[error("QR code format is not valid")]
    QrCodeFormatNotValid,

    /// The external upload failed.
    #[error("Upload failed: {detail}")]
    UploadFailed { detail: String },
}

/// Failures reported by the external [`crate::service::DocumentService`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The request was cancelled; not an error from the user's point of view.
    #[error("Request was cancelled")]
    RequestCancelled,

    /// Transport-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials were rejected.
    #[error("Not authorized")]
    Unauthorized,

    /// The remote document or resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The service answered with an error status.
    #[error("Service error {status}: {message}")]
    Server { status: u16, message: String },

    /// The service did not answer.
    #[error("No response from service")]
    NoResponse,

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// True for [`ServiceError::RequestCancelled`].
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ServiceError::RequestCancelled)
    }
}

/// Raised while building a line item from its raw extractions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineItemError {
    #[error("Extraction result has no line items")]
    LineItemsMissing,

    #[error("Line item has no description")]
    NameMissing,

    #[error("Line item has no quantity")]
    QuantityMissing,

    #[error("Line item has no price")]
    PriceMissing,

    #[error("Cannot parse quantity '{0}'")]
    CannotParseQuantity(String),

    #[error("Cannot parse price '{0}'")]
    CannotParsePrice(String),
}

/// Price parsing and arithmetic failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    #[error("Cannot combine prices in {left} and {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("Cannot parse price '{0}'")]
    Unparseable(String),

    #[error("Price arithmetic overflowed")]
    Overflow,
}
