//! Analysis state and outcome interpretation.
//!
//! At most one analysis attempt is live per session. Each attempt gets a
//! number; a completion is acted on only if it belongs to the live attempt
//! and the attempt was not cancelled meanwhile. Cancellation is therefore a
//! local decision: the remote call may still finish, but its result is
//! dropped and can never reach the error path.

use crate::config::SessionConfig;
use crate::error::ServiceError;
use crate::extraction::ExtractionResult;
use crate::invoice::DigitalInvoice;
use crate::navigation::OutcomeKind;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum AnalysisState {
    Idle,
    Starting { attempt: u64 },
    Succeeded,
    Failed,
    Cancelled,
}

/// What to do with a finished call.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisCompletion {
    Succeeded(ExtractionResult),
    /// A genuine failure; route it with a retry.
    Failed(ServiceError),
    /// Stale, cancelled or reported as cancelled: nothing to do.
    Ignored,
}

#[derive(Debug)]
pub struct AnalysisController {
    state: AnalysisState,
    next_attempt: u64,
}

impl Default for AnalysisController {
    fn default() -> Self {
        Self {
            state: AnalysisState::Idle,
            next_attempt: 0,
        }
    }
}

impl AnalysisController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, AnalysisState::Starting { .. })
    }

    /// Start a new attempt.
    ///
    /// Returns `None` while an attempt is already running (the caller
    /// joins it) and after a success.
    pub fn begin(&mut self) -> Option<u64> {
        match self.state {
            AnalysisState::Starting { attempt } => {
                debug!(attempt, "Analysis already running");
                None
            }
            AnalysisState::Succeeded => {
                debug!("Analysis already succeeded");
                None
            }
            AnalysisState::Idle | AnalysisState::Failed | AnalysisState::Cancelled => {
                self.next_attempt += 1;
                self.state = AnalysisState::Starting {
                    attempt: self.next_attempt,
                };
                info!(attempt = self.next_attempt, "Analysis started");
                Some(self.next_attempt)
            }
        }
    }

    /// Cancel the running attempt. Returns false when nothing was running.
    pub fn cancel(&mut self) -> bool {
        if let AnalysisState::Starting { attempt } = self.state {
            info!(attempt, "Analysis cancelled");
            self.state = AnalysisState::Cancelled;
            true
        } else {
            false
        }
    }

    pub fn complete(
        &mut self,
        attempt: u64,
        result: Result<ExtractionResult, ServiceError>,
    ) -> AnalysisCompletion {
        if self.state != (AnalysisState::Starting { attempt }) {
            debug!(attempt, state = ?self.state, "Ignoring analysis completion");
            return AnalysisCompletion::Ignored;
        }
        match result {
            Ok(result) => {
                self.state = AnalysisState::Succeeded;
                AnalysisCompletion::Succeeded(result)
            }
            Err(e) if e.is_cancellation() => {
                debug!(attempt, "Analysis reported cancellation");
                self.state = AnalysisState::Cancelled;
                AnalysisCompletion::Ignored
            }
            Err(e) => {
                warn!(attempt, "Analysis failed: {e}");
                self.state = AnalysisState::Failed;
                AnalysisCompletion::Failed(e)
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = AnalysisState::Idle;
    }
}

/// Where a successful analysis leads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "camelCase")]
pub enum AnalysisOutcome {
    Extractions(ExtractionResult),
    Invoice(DigitalInvoice),
    NoResults,
}

impl AnalysisOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            AnalysisOutcome::Extractions(_) => OutcomeKind::Extractions,
            AnalysisOutcome::Invoice(_) => OutcomeKind::Invoice,
            AnalysisOutcome::NoResults => OutcomeKind::NoResults,
        }
    }
}

/// Route a result: invoice when it has line items (and the return
/// assistant is on), no-results when empty, plain extractions otherwise.
///
/// A malformed line item never fails the analysis; the result is shown as
/// plain extractions instead.
pub fn interpret(result: ExtractionResult, config: &SessionConfig) -> AnalysisOutcome {
    if result.is_empty() {
        return AnalysisOutcome::NoResults;
    }
    if result.has_line_items() && config.return_assistant_enabled {
        match DigitalInvoice::new(&result, &config.default_currency) {
            Ok(invoice) => return AnalysisOutcome::Invoice(invoice),
            Err(e) => warn!("Line items unusable, showing plain extractions: {e}"),
        }
    }
    AnalysisOutcome::Extractions(result)
}
