//! The navigation state machine.
//!
//! [`transition`] is a pure function from the current [`Stage`], a
//! [`Trigger`] and the page collection's shape to the next stage plus the
//! side effects the session must run. The session actor owns the current
//! stage; presentation follows from it.

use crate::document::DocumentType;
use crate::error::SessionError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Capture,
    Review,
    MultipageReview,
    Analysis,
    Results,
    DigitalInvoiceReview,
    NoResults,
}

/// Which screen an analysis outcome leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeKind {
    Extractions,
    Invoice,
    NoResults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Pages were admitted to the store.
    Captured,
    /// Continue to the next step (analyse, pay).
    Advance,
    AnalysisFinished(OutcomeKind),
    Back,
    Close,
    /// Start over from the no-results screen.
    Retry,
    /// The last page was deleted from the multipage review.
    AllPagesDeleted,
    /// Return from the camera to the kept pages.
    ShowReview,
}

/// Side effects the session runs when taking a transition, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Remove the single reviewed document from the service.
    DiscardPendingDocument,
    CancelAnalysis,
    /// Clear the page store and reset the service to its initial state.
    ResetSession,
    /// Upload the first page if needed, then analyse.
    UploadAndAnalyze,
    /// Analyse pages that are already uploaded.
    BeginAnalysis,
    DetachSurface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stage(Stage),
    /// The session ends.
    Terminate { send_feedback: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub target: Target,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(stage: Stage) -> Self {
        Self {
            target: Target::Stage(stage),
            effects: Vec::new(),
        }
    }

    fn terminate(send_feedback: bool) -> Self {
        Self {
            target: Target::Terminate { send_feedback },
            effects: Vec::new(),
        }
    }

    fn with(mut self, effects: &[Effect]) -> Self {
        self.effects.extend_from_slice(effects);
        self
    }
}

/// The page collection's shape, as far as navigation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavContext {
    pub document_type: Option<DocumentType>,
    pub multipage: bool,
}

impl NavContext {
    /// The review stage for the current mode.
    fn review_stage(&self) -> Stage {
        if self.multipage {
            Stage::MultipageReview
        } else {
            Stage::Review
        }
    }
}

/// The stage a freshly captured or seeded collection starts in.
pub fn entry_stage(ctx: NavContext) -> Stage {
    match ctx.document_type {
        None => Stage::Capture,
        Some(DocumentType::Image) => ctx.review_stage(),
        Some(DocumentType::Pdf | DocumentType::QrCode) => Stage::Analysis,
    }
}

/// Compute the transition for `trigger` in `stage`.
pub fn transition(stage: Stage, trigger: Trigger, ctx: NavContext) -> Result<Transition, SessionError> {
    use Effect::*;
    use Stage::*;

    let t = match (stage, trigger) {
        (_, Trigger::Close) => {
            let send_feedback = matches!(stage, Results | DigitalInvoiceReview);
            let t = Transition::terminate(send_feedback);
            if stage == Analysis {
                t.with(&[CancelAnalysis, DetachSurface])
            } else {
                t
            }
        }

        (Capture, Trigger::Captured) => match entry_stage(ctx) {
            Capture => return Err(invalid(stage, trigger)),
            next => Transition::to(next),
        },
        (Capture, Trigger::Back) => Transition::terminate(false),
        (Capture, Trigger::ShowReview)
            if ctx.multipage && ctx.document_type == Some(DocumentType::Image) =>
        {
            Transition::to(MultipageReview)
        }

        (Review, Trigger::Advance) => Transition::to(Analysis).with(&[UploadAndAnalyze]),
        (Review, Trigger::Back) => Transition::to(Capture).with(&[DiscardPendingDocument, ResetSession]),

        (MultipageReview, Trigger::Advance) => Transition::to(Analysis).with(&[BeginAnalysis]),
        (MultipageReview, Trigger::Back | Trigger::AllPagesDeleted) => Transition::to(Capture),

        (Analysis, Trigger::AnalysisFinished(kind)) => {
            let next = match kind {
                OutcomeKind::Extractions => Results,
                OutcomeKind::Invoice => DigitalInvoiceReview,
                OutcomeKind::NoResults => NoResults,
            };
            Transition::to(next).with(&[DetachSurface])
        }
        (Analysis, Trigger::Back) => match ctx.document_type {
            Some(DocumentType::Image) => {
                Transition::to(ctx.review_stage()).with(&[CancelAnalysis, DetachSurface])
            }
            _ => Transition::to(Capture).with(&[CancelAnalysis, DetachSurface, ResetSession]),
        },

        (DigitalInvoiceReview, Trigger::Advance) => Transition::to(Results),
        (Results | DigitalInvoiceReview, Trigger::Back) => Transition::terminate(true),

        (NoResults, Trigger::Retry | Trigger::Back) => Transition::to(Capture).with(&[ResetSession]),

        _ => return Err(invalid(stage, trigger)),
    };
    Ok(t)
}

fn invalid(stage: Stage, trigger: Trigger) -> SessionError {
    let action = match trigger {
        Trigger::Captured => "capture",
        Trigger::Advance => "advance",
        Trigger::AnalysisFinished(_) => "finish analysis",
        Trigger::Back => "go back",
        Trigger::Close => "close",
        Trigger::Retry => "retry",
        Trigger::AllPagesDeleted => "delete all pages",
        Trigger::ShowReview => "show the page review",
    };
    SessionError::InvalidTransition { stage, action }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(document_type: Option<DocumentType>, multipage: bool) -> NavContext {
        NavContext {
            document_type,
            multipage,
        }
    }

    fn next(stage: Stage, trigger: Trigger, c: NavContext) -> Target {
        transition(stage, trigger, c).unwrap().target
    }

    #[test]
    fn capture_routes_by_type_and_mode() {
        let image = Some(DocumentType::Image);
        assert_eq!(
            next(Stage::Capture, Trigger::Captured, ctx(image, false)),
            Target::Stage(Stage::Review)
        );
        assert_eq!(
            next(Stage::Capture, Trigger::Captured, ctx(image, true)),
            Target::Stage(Stage::MultipageReview)
        );
        for t in [DocumentType::Pdf, DocumentType::QrCode] {
            assert_eq!(
                next(Stage::Capture, Trigger::Captured, ctx(Some(t), true)),
                Target::Stage(Stage::Analysis)
            );
        }
    }

    #[test]
    fn outcomes_route_to_their_screens() {
        let c = ctx(Some(DocumentType::Pdf), false);
        let cases = [
            (OutcomeKind::Extractions, Stage::Results),
            (OutcomeKind::Invoice, Stage::DigitalInvoiceReview),
            (OutcomeKind::NoResults, Stage::NoResults),
        ];
        for (kind, stage) in cases {
            assert_eq!(
                next(Stage::Analysis, Trigger::AnalysisFinished(kind), c),
                Target::Stage(stage)
            );
        }
    }

    #[test]
    fn only_review_analysis_and_no_results_reset_on_the_way_to_capture() {
        let image = ctx(Some(DocumentType::Image), false);
        let resets = |stage, trigger, c| {
            transition(stage, trigger, c)
                .unwrap()
                .effects
                .contains(&Effect::ResetSession)
        };
        assert!(resets(Stage::Review, Trigger::Back, image));
        assert!(resets(Stage::NoResults, Trigger::Retry, image));
        assert!(resets(Stage::Analysis, Trigger::Back, ctx(Some(DocumentType::Pdf), false)));
        assert!(!resets(
            Stage::MultipageReview,
            Trigger::Back,
            ctx(Some(DocumentType::Image), true)
        ));
    }

    #[test]
    fn leaving_analysis_backward_cancels() {
        let t = transition(
            Stage::Analysis,
            Trigger::Back,
            ctx(Some(DocumentType::Image), true),
        )
        .unwrap();
        assert_eq!(t.target, Target::Stage(Stage::MultipageReview));
        assert!(t.effects.contains(&Effect::CancelAnalysis));
        assert!(!t.effects.contains(&Effect::ResetSession));
    }

    #[test]
    fn closing_results_sends_feedback() {
        let c = ctx(Some(DocumentType::Pdf), false);
        assert_eq!(
            next(Stage::Results, Trigger::Close, c),
            Target::Terminate {
                send_feedback: true
            }
        );
        assert_eq!(
            next(Stage::Capture, Trigger::Close, c),
            Target::Terminate {
                send_feedback: false
            }
        );
    }

    #[test]
    fn capture_returns_to_kept_pages_only_in_multipage() {
        assert_eq!(
            next(Stage::Capture, Trigger::ShowReview, ctx(Some(DocumentType::Image), true)),
            Target::Stage(Stage::MultipageReview)
        );
        assert!(transition(Stage::Capture, Trigger::ShowReview, ctx(None, true)).is_err());
        assert!(transition(
            Stage::Capture,
            Trigger::ShowReview,
            ctx(Some(DocumentType::Image), false)
        )
        .is_err());
        assert!(transition(
            Stage::Review,
            Trigger::ShowReview,
            ctx(Some(DocumentType::Image), true)
        )
        .is_err());
    }

    #[test]
    fn invalid_triggers_are_errors() {
        let c = ctx(None, false);
        assert!(matches!(
            transition(Stage::Capture, Trigger::Advance, c),
            Err(SessionError::InvalidTransition {
                stage: Stage::Capture,
                ..
            })
        ));
        assert!(transition(Stage::Capture, Trigger::Captured, c).is_err());
        assert!(transition(Stage::Results, Trigger::Retry, c).is_err());
    }
}
