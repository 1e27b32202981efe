//! Pipeline stages a document passes through in a session.
//!
//! Each submodule owns one step. The session actor drives them and is the
//! only place where their results touch the page store.
//!
//! ## Data Flow
//!
//! ```text
//! import ──▶ validate ──▶ upload ──▶ analysis
//! (path/URL)  (+preview)   (service)   (service + routing)
//! ```
//!
//! 1. [`import`]  : resolve a path, URL or QR payload to a `Document`
//! 2. [`validate`]: batch admission and per-document structural checks;
//!    decoding runs in `spawn_blocking`
//! 3. [`preview`] : PNG thumbnails for admitted images
//! 4. [`upload`]  : in-flight upload bookkeeping keyed by document id
//! 5. [`analysis`]: the single live analysis attempt and routing of its
//!    result to invoice, plain extractions or no-results

pub mod analysis;
pub mod import;
pub mod preview;
pub mod upload;
pub mod validate;
