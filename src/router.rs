//! Deferred error routing.
//!
//! Upload and analysis failures are reported here. When a presentation
//! surface is attached the error is shown at once; otherwise it waits in a
//! single pending slot until a surface attaches. A newer undelivered error
//! replaces the older one.
//!
//! The retry continuation is not a closure: each report gets a
//! [`RetryToken`] and the router keeps a table from token to
//! [`RetryAction`]. Acknowledging a token hands the action back exactly once.
//! Only one error is visible at a time, so showing a new one drops the
//! action of the error it covers.

use crate::document::DocumentId;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Handle for one reported error's retry continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RetryToken(u64);

impl RetryToken {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RetryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What to do when the user acknowledges an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "document", rename_all = "camelCase")]
pub enum RetryAction {
    /// Upload this page again; nothing else.
    Upload(DocumentId),
    /// Upload this page again, then start the analysis.
    UploadAndAnalyze(DocumentId),
    /// Start the analysis again.
    StartAnalysis,
}

impl RetryAction {
    /// The page this action uploads, if any.
    pub fn document(&self) -> Option<DocumentId> {
        match self {
            RetryAction::Upload(id) | RetryAction::UploadAndAnalyze(id) => Some(*id),
            RetryAction::StartAnalysis => None,
        }
    }
}

/// An error waiting for, or shown on, a surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingError {
    pub message: String,
    pub token: RetryToken,
}

/// Where errors are shown.
///
/// Implementations must not call back into the session from `show_error`;
/// they hand the token to whatever later calls
/// [`crate::session::SessionHandle::acknowledge_error`].
pub trait ErrorSurface: Send + Sync {
    fn show_error(&self, error: &PendingError);
}

/// How a report was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Shown,
    Deferred,
}

#[derive(Default)]
pub struct ErrorRouter {
    surface: Option<Arc<dyn ErrorSurface>>,
    pending: Option<PendingError>,
    /// Token of the error last handed to a surface.
    shown: Option<RetryToken>,
    actions: HashMap<RetryToken, RetryAction>,
    next_token: u64,
}

impl ErrorRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an error with its retry action.
    pub fn report(&mut self, message: impl Into<String>, action: RetryAction) -> (RetryToken, Delivery) {
        self.next_token += 1;
        let token = RetryToken(self.next_token);
        let error = PendingError {
            message: message.into(),
            token,
        };
        self.actions.insert(token, action);

        match &self.surface {
            Some(surface) => {
                debug!(%token, "Showing error on attached surface");
                surface.show_error(&error);
                self.mark_shown(token);
                (token, Delivery::Shown)
            }
            None => {
                if let Some(previous) = self.pending.replace(error) {
                    debug!(dropped = %previous.token, %token, "Replacing undelivered error");
                    self.actions.remove(&previous.token);
                } else {
                    debug!(%token, "No surface attached, deferring error");
                }
                (token, Delivery::Deferred)
            }
        }
    }

    /// Attach a surface; a pending error is delivered to it and cleared.
    pub fn attach(&mut self, surface: Arc<dyn ErrorSurface>) -> Option<PendingError> {
        let delivered = self.pending.take();
        if let Some(error) = &delivered {
            debug!(token = %error.token, "Delivering deferred error");
            surface.show_error(error);
            self.mark_shown(error.token);
        }
        self.surface = Some(surface);
        delivered
    }

    pub fn detach(&mut self) {
        self.surface = None;
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    pub fn pending(&self) -> Option<&PendingError> {
        self.pending.as_ref()
    }

    /// Take the retry action for `token`. Returns `None` for unknown or
    /// already acknowledged tokens.
    pub fn acknowledge(&mut self, token: RetryToken) -> Option<RetryAction> {
        if self.pending.as_ref().is_some_and(|p| p.token == token) {
            self.pending = None;
        }
        if self.shown == Some(token) {
            self.shown = None;
        }
        self.actions.remove(&token)
    }

    /// Drop every entry whose action matches `predicate`.
    pub fn withdraw(&mut self, predicate: impl Fn(&RetryAction) -> bool) {
        self.actions.retain(|token, action| {
            let keep = !predicate(action);
            if !keep {
                debug!(%token, ?action, "Withdrawing retry action");
            }
            keep
        });
        if let Some(pending) = &self.pending {
            if !self.actions.contains_key(&pending.token) {
                self.pending = None;
            }
        }
    }

    /// Forget all errors and actions. The surface stays attached.
    pub fn clear(&mut self) {
        self.pending = None;
        self.shown = None;
        self.actions.clear();
    }

    fn mark_shown(&mut self, token: RetryToken) {
        if let Some(previous) = self.shown.replace(token) {
            if self.actions.remove(&previous).is_some() {
                debug!(dropped = %previous, %token, "Replacing unacknowledged error");
            }
        }
    }
}

impl fmt::Debug for ErrorRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRouter")
            .field("surface", &self.surface.as_ref().map(|_| "<dyn ErrorSurface>"))
            .field("pending", &self.pending)
            .field("shown", &self.shown)
            .field("actions", &self.actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PendingError>>);

    impl ErrorSurface for Recorder {
        fn show_error(&self, error: &PendingError) {
            self.0.lock().unwrap().push(error.clone());
        }
    }

    impl Recorder {
        fn shown(&self) -> Vec<PendingError> {
            self.0.lock().unwrap().clone()
        }
    }

    #[test]
    fn deferred_error_is_delivered_once_on_attach() {
        let mut router = ErrorRouter::new();
        let (token, delivery) = router.report("upload failed", RetryAction::StartAnalysis);
        assert_eq!(delivery, Delivery::Deferred);

        let surface = Arc::new(Recorder::default());
        router.attach(surface.clone());
        assert_eq!(surface.shown().len(), 1);
        assert_eq!(surface.shown()[0].token, token);
        assert!(router.pending().is_none());

        router.detach();
        router.attach(surface.clone());
        assert_eq!(surface.shown().len(), 1);
    }

    #[test]
    fn acknowledge_returns_the_action_exactly_once() {
        let mut router = ErrorRouter::new();
        let id = DocumentId::new();
        let (token, _) = router.report("x", RetryAction::UploadAndAnalyze(id));
        assert_eq!(router.acknowledge(token), Some(RetryAction::UploadAndAnalyze(id)));
        assert_eq!(router.acknowledge(token), None);
    }

    #[test]
    fn newer_pending_error_replaces_older() {
        let mut router = ErrorRouter::new();
        let (first, _) = router.report("first", RetryAction::StartAnalysis);
        let (second, _) = router.report("second", RetryAction::StartAnalysis);

        let surface = Arc::new(Recorder::default());
        router.attach(surface.clone());
        let shown = surface.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].message, "second");
        assert_eq!(router.acknowledge(first), None);
        assert!(router.acknowledge(second).is_some());
    }

    #[test]
    fn attached_surface_shows_immediately() {
        let mut router = ErrorRouter::new();
        let surface = Arc::new(Recorder::default());
        router.attach(surface.clone());
        let (_, delivery) = router.report("now", RetryAction::StartAnalysis);
        assert_eq!(delivery, Delivery::Shown);
        assert_eq!(surface.shown().len(), 1);
        assert!(router.pending().is_none());
    }

    #[test]
    fn unacknowledged_shown_errors_do_not_pile_up() {
        let mut router = ErrorRouter::new();
        router.attach(Arc::new(Recorder::default()));
        let tokens: Vec<RetryToken> = (0..50)
            .map(|_| router.report("failed", RetryAction::StartAnalysis).0)
            .collect();
        assert_eq!(router.actions.len(), 1);
        assert_eq!(router.acknowledge(tokens[0]), None);
        assert_eq!(router.acknowledge(tokens[49]), Some(RetryAction::StartAnalysis));
        assert!(router.actions.is_empty());
    }

    #[test]
    fn delivered_error_is_replaced_by_the_next_shown_one() {
        let mut router = ErrorRouter::new();
        let (deferred, _) = router.report("deferred", RetryAction::StartAnalysis);
        router.attach(Arc::new(Recorder::default()));
        let (shown, _) = router.report("shown", RetryAction::StartAnalysis);
        assert_eq!(router.acknowledge(deferred), None);
        assert!(router.acknowledge(shown).is_some());
    }

    #[test]
    fn withdraw_clears_matching_pending_entry() {
        let mut router = ErrorRouter::new();
        let id = DocumentId::new();
        let (token, _) = router.report("x", RetryAction::Upload(id));
        router.withdraw(|a| a.document() == Some(id));
        assert!(router.pending().is_none());
        assert_eq!(router.acknowledge(token), None);
    }
}
