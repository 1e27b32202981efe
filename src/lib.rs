//! # capture-flow
//!
//! Orchestrates a document capture session: collect pages, validate them,
//! upload them to an analysis service, run the analysis and route the result
//! to the right follow-up screen.
//!
//! ## Session Overview
//!
//! ```text
//! capture / import
//!  │
//!  ├─ 1. Admit     mixed-type and page-limit checks, structural validation
//!  ├─ 2. Review    single image or multipage list (reorder, delete, edit)
//!  ├─ 3. Upload    per page, bounded concurrency, keyed by document id
//!  ├─ 4. Analyse   one live attempt, cancellable, retryable
//!  └─ 5. Route     results │ digital invoice review │ no results
//! ```
//!
//! Failures that need the user (a failed upload, a failed analysis) go to an
//! [`ErrorSurface`] with a one-shot [`RetryToken`]. When no surface is
//! attached the error is deferred and handed over on the next attach.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use capture_flow::{Document, ReplayService, SessionConfig, SessionHandle};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Arc::new(ReplayService::from_json(r#"{"extractions":{}}"#)?);
//!     let session = SessionHandle::open(SessionConfig::default(), service, Vec::new()).await?;
//!
//!     session.import(&["invoice.pdf"]).await?;
//!     let snapshot = session.snapshot().await?;
//!     println!("{:?}", snapshot.stage);
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `capture-flow` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! capture-flow = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod extraction;
pub mod invoice;
pub mod navigation;
pub mod page;
pub mod pipeline;
pub mod replay;
pub mod router;
pub mod service;
pub mod session;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FileImportSupport, SessionConfig, SessionConfigBuilder, MAX_PAGES_LIMIT};
pub use document::{Document, DocumentId, DocumentSource, DocumentType};
pub use error::{AdmissionError, LineItemError, PageError, PriceError, ServiceError, SessionError};
pub use extraction::{Extraction, ExtractionResult};
pub use invoice::{DigitalInvoice, LineItem, Price, ReturnReason, SelectedState};
pub use navigation::Stage;
pub use page::{Page, PageStore};
pub use pipeline::analysis::{AnalysisOutcome, AnalysisState};
pub use replay::ReplayService;
pub use router::{ErrorSurface, PendingError, RetryAction, RetryToken};
pub use service::{DocumentService, RemoteDocument};
pub use session::{SessionHandle, SessionSnapshot};
pub use stream::{EventStream, SessionEvent};
