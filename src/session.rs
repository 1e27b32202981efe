//! The capture session.
//!
//! A session is an actor task. [`SessionHandle`] methods send commands on an
//! unbounded channel and wait for a `oneshot` reply. Validation, uploads and
//! analysis run on spawned tasks; their completions come back on a second
//! channel and are applied by the same actor, so the page store, the
//! navigation stage and the error router are only ever touched from one
//! place. A reorder can therefore never interleave with the bookkeeping of
//! an upload completion.
//!
//! ## Lifecycle
//!
//! ```text
//! open ──▶ Capture ──capture──▶ Review / MultipageReview ──advance──▶ Analysis
//!                   (pdf, qr) ─────────────────────────────────────▶ Analysis
//! Analysis ──▶ Results | DigitalInvoiceReview | NoResults ──close──▶ finished
//! ```
//!
//! The actor ends when the session terminates (close, or back from the
//! first/last stage) or when every handle is dropped. Calls after that fail
//! with [`SessionError::Closed`].

use crate::config::SessionConfig;
use crate::document::{Document, DocumentId};
use crate::error::{ServiceError, SessionError};
use crate::extraction::ExtractionResult;
use crate::invoice::{DigitalInvoice, LineItem, ReturnReason};
use crate::navigation::{entry_stage, transition, Effect, NavContext, Stage, Target, Transition, Trigger};
use crate::page::{Page, PageStore};
use crate::pipeline::analysis::{interpret, AnalysisCompletion, AnalysisController, AnalysisOutcome, AnalysisState};
use crate::pipeline::upload::{UploadCoordinator, UploadPolicy, UploadResolution, UploadTicket};
use crate::pipeline::{import, validate};
use crate::router::{Delivery, ErrorRouter, ErrorSurface, PendingError, RetryAction, RetryToken};
use crate::service::DocumentService;
use crate::stream::{subscribe, EventStream, SessionEvent};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tracing::{debug, info, warn};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

// ── Public surface ───────────────────────────────────────────────────────

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub stage: Stage,
    pub pages: Vec<Page>,
    pub all_uploaded: bool,
    pub analysis: AnalysisState,
    pub outcome: Option<AnalysisOutcome>,
    pub pending_error: Option<PendingError>,
    pub surface_attached: bool,
}

impl SessionSnapshot {
    pub fn invoice(&self) -> Option<&DigitalInvoice> {
        match &self.outcome {
            Some(AnalysisOutcome::Invoice(invoice)) => Some(invoice),
            _ => None,
        }
    }
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<broadcast::Receiver<SessionEvent>>,
    config: Arc<SessionConfig>,
}

impl SessionHandle {
    /// Start a session, optionally pre-seeded with documents.
    ///
    /// Seeded documents go through the same admission as captured ones. An
    /// empty session starts in `Capture`; seeded images start in review and
    /// (in multipage mode) begin uploading; seeded PDFs or QR codes go
    /// straight to `Analysis`.
    ///
    /// Fails with [`SessionError::InvalidConfig`] when `config` breaks a
    /// builder constraint. Must be called from within a Tokio runtime.
    pub async fn open(
        config: SessionConfig,
        service: Arc<dyn DocumentService>,
        initial_documents: Vec<Document>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let config = Arc::new(config);
        let mut store = PageStore::new(config.max_pages);
        if !initial_documents.is_empty() {
            let pages = validate::admit(initial_documents, &store, config.clone()).await?;
            store.append(pages)?;
        }

        let stage = entry_stage(NavContext {
            document_type: store.type_of_all(),
            multipage: config.multipage_enabled,
        });
        info!(?stage, pages = store.len(), "Opening session");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = broadcast::channel(config.event_capacity);

        let session = Session {
            upload_slots: Arc::new(Semaphore::new(config.upload_concurrency)),
            config: config.clone(),
            service,
            stage,
            store,
            uploads: UploadCoordinator::new(),
            analysis: AnalysisController::new(),
            router: ErrorRouter::new(),
            outcome: None,
            events: event_tx,
            completions: completion_tx,
            finished: false,
        };
        tokio::spawn(session.run(command_rx, completion_rx));

        Ok(Self {
            commands: command_tx,
            events: Arc::new(event_rx),
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to events from now on.
    pub fn events(&self) -> EventStream {
        subscribe(&self.events)
    }

    /// True once the session has ended.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Wait until the session has ended.
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    /// Add captured documents. Valid in `Capture`.
    ///
    /// Resolves after admission: either every document joined the session
    /// or none did.
    pub async fn capture(&self, documents: Vec<Document>) -> Result<(), SessionError> {
        self.call(|reply| Command::Capture { documents, reply }).await
    }

    /// Import local files or URLs and add them as one batch.
    pub async fn import<S: AsRef<str>>(&self, inputs: &[S]) -> Result<(), SessionError> {
        let documents = try_join_all(
            inputs
                .iter()
                .map(|input| import::import(input.as_ref(), &self.config)),
        )
        .await?;
        self.capture(documents).await
    }

    /// Add a scanned payment QR code.
    pub async fn capture_qr(&self, payload: &str) -> Result<(), SessionError> {
        let document = import::qr_document(payload, &self.config)?;
        self.capture(vec![document]).await
    }

    /// Continue: analyse from review, pay from the digital invoice.
    pub async fn advance(&self) -> Result<(), SessionError> {
        self.call(Command::Advance).await
    }

    pub async fn back(&self) -> Result<(), SessionError> {
        self.call(Command::Back).await
    }

    /// End the session from any stage.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.call(Command::Close).await
    }

    /// Start over from the no-results screen.
    pub async fn retry(&self) -> Result<(), SessionError> {
        self.call(Command::Retry).await
    }

    /// Put the pages in the given order; `order` must list every page once.
    pub async fn reorder(&self, order: Vec<DocumentId>) -> Result<(), SessionError> {
        self.call(|reply| Command::Reorder { order, reply }).await
    }

    pub async fn delete(&self, id: DocumentId) -> Result<(), SessionError> {
        self.call(|reply| Command::Delete { id, reply }).await
    }

    /// Return from `Capture` to the multipage review of the kept pages.
    pub async fn show_review(&self) -> Result<(), SessionError> {
        self.call(Command::ShowReview).await
    }

    /// Clear a page's error and upload it again. Valid in `Capture` and
    /// `MultipageReview`.
    pub async fn retry_page(&self, id: DocumentId) -> Result<(), SessionError> {
        self.call(|reply| Command::RetryPage { id, reply }).await
    }

    /// Replace a page with an edited version of the same document.
    pub async fn update_document(&self, document: Document) -> Result<(), SessionError> {
        self.call(|reply| Command::UpdateDocument { document, reply })
            .await
    }

    /// Attach the presentation surface. Returns the deferred error it was
    /// handed, if any.
    pub async fn attach_surface(
        &self,
        surface: Arc<dyn ErrorSurface>,
    ) -> Result<Option<PendingError>, SessionError> {
        self.call(|reply| Command::AttachSurface { surface, reply })
            .await
    }

    pub async fn detach_surface(&self) -> Result<(), SessionError> {
        self.call(Command::DetachSurface).await
    }

    /// Acknowledge a shown error, running its retry action.
    pub async fn acknowledge_error(&self, token: RetryToken) -> Result<(), SessionError> {
        self.call(|reply| Command::AcknowledgeError { token, reply })
            .await
    }

    pub async fn select_line_item(&self, index: usize) -> Result<(), SessionError> {
        self.call(|reply| Command::SelectLineItem { index, reply })
            .await
    }

    pub async fn deselect_line_item(
        &self,
        index: usize,
        reason: Option<ReturnReason>,
    ) -> Result<(), SessionError> {
        self.call(|reply| Command::DeselectLineItem {
            index,
            reason,
            reply,
        })
        .await
    }

    /// Store an edited line item.
    pub async fn save_line_item(&self, index: usize, item: LineItem) -> Result<(), SessionError> {
        self.call(|reply| Command::SaveLineItem { index, item, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.call(Command::Snapshot).await
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

// ── Actor ────────────────────────────────────────────────────────────────

enum Command {
    Capture {
        documents: Vec<Document>,
        reply: Reply<()>,
    },
    Advance(Reply<()>),
    Back(Reply<()>),
    Close(Reply<()>),
    Retry(Reply<()>),
    ShowReview(Reply<()>),
    Reorder {
        order: Vec<DocumentId>,
        reply: Reply<()>,
    },
    Delete {
        id: DocumentId,
        reply: Reply<()>,
    },
    RetryPage {
        id: DocumentId,
        reply: Reply<()>,
    },
    UpdateDocument {
        document: Document,
        reply: Reply<()>,
    },
    AttachSurface {
        surface: Arc<dyn ErrorSurface>,
        reply: Reply<Option<PendingError>>,
    },
    DetachSurface(Reply<()>),
    AcknowledgeError {
        token: RetryToken,
        reply: Reply<()>,
    },
    SelectLineItem {
        index: usize,
        reply: Reply<()>,
    },
    DeselectLineItem {
        index: usize,
        reason: Option<ReturnReason>,
        reply: Reply<()>,
    },
    SaveLineItem {
        index: usize,
        item: LineItem,
        reply: Reply<()>,
    },
    Snapshot(Reply<SessionSnapshot>),
}

enum Completion {
    Validated {
        pages: Vec<Page>,
        reply: Reply<()>,
    },
    Uploaded {
        ticket: UploadTicket,
        outcome: Result<(), ServiceError>,
    },
    Analysed {
        attempt: u64,
        result: Result<ExtractionResult, ServiceError>,
    },
}

struct Session {
    config: Arc<SessionConfig>,
    service: Arc<dyn DocumentService>,
    stage: Stage,
    store: PageStore,
    uploads: UploadCoordinator,
    analysis: AnalysisController,
    router: ErrorRouter,
    outcome: Option<AnalysisOutcome>,
    events: broadcast::Sender<SessionEvent>,
    completions: mpsc::UnboundedSender<Completion>,
    upload_slots: Arc<Semaphore>,
    finished: bool,
}

impl Session {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let seeded: Vec<DocumentId> = self.store.iter().map(Page::id).collect();
        for id in seeded {
            self.process(id);
        }

        while !self.finished {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All handles dropped");
                        self.cancel_analysis();
                        break;
                    }
                },
                Some(completion) = completions.recv() => self.handle_completion(completion).await,
            }
        }
        info!(stage = ?self.stage, "Session ended");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Capture { documents, reply } => self.capture(documents, reply),
            Command::Advance(reply) => {
                let _ = reply.send(self.advance().await);
            }
            Command::Back(reply) => {
                let _ = reply.send(self.go(Trigger::Back).await);
            }
            Command::Close(reply) => {
                let _ = reply.send(self.go(Trigger::Close).await);
            }
            Command::Retry(reply) => {
                let _ = reply.send(self.go(Trigger::Retry).await);
            }
            Command::ShowReview(reply) => {
                let _ = reply.send(self.go(Trigger::ShowReview).await);
            }
            Command::Reorder { order, reply } => {
                let _ = reply.send(self.reorder(order).await);
            }
            Command::Delete { id, reply } => {
                let _ = reply.send(self.delete(id).await);
            }
            Command::RetryPage { id, reply } => {
                let _ = reply.send(self.retry_page(id));
            }
            Command::UpdateDocument { document, reply } => {
                let _ = reply.send(self.update_document(document).await);
            }
            Command::AttachSurface { surface, reply } => {
                let delivered = self.router.attach(surface);
                if let Some(error) = &delivered {
                    self.emit(SessionEvent::ErrorShown {
                        error: error.clone(),
                    });
                }
                let _ = reply.send(Ok(delivered));
            }
            Command::DetachSurface(reply) => {
                self.router.detach();
                let _ = reply.send(Ok(()));
            }
            Command::AcknowledgeError { token, reply } => {
                let _ = reply.send(self.acknowledge(token));
            }
            Command::SelectLineItem { index, reply } => {
                let _ = reply.send(self.edit_invoice(|invoice| invoice.select(index)));
            }
            Command::DeselectLineItem {
                index,
                reason,
                reply,
            } => {
                let _ = reply.send(self.edit_invoice(|invoice| invoice.deselect(index, reason)));
            }
            Command::SaveLineItem { index, item, reply } => {
                let _ = reply.send(self.edit_invoice(|invoice| invoice.replace(index, item)));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(Ok(self.snapshot()));
            }
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Validated { pages, reply } => {
                let _ = reply.send(self.admit_validated(pages).await);
            }
            Completion::Uploaded { ticket, outcome } => self.on_uploaded(ticket, outcome),
            Completion::Analysed { attempt, result } => self.on_analysed(attempt, result).await,
        }
    }

    // ── Navigation ───────────────────────────────────────────────────────

    fn ctx(&self) -> NavContext {
        NavContext {
            document_type: self.store.type_of_all(),
            multipage: self.config.multipage_enabled,
        }
    }

    async fn go(&mut self, trigger: Trigger) -> Result<(), SessionError> {
        let t = transition(self.stage, trigger, self.ctx())?;
        self.apply(t).await;
        Ok(())
    }

    /// Enter the target stage, then run the effects in order.
    async fn apply(&mut self, t: Transition) {
        match t.target {
            Target::Stage(next) => {
                self.set_stage(next);
                for effect in t.effects {
                    self.run_effect(effect).await;
                }
            }
            Target::Terminate { send_feedback } => {
                for effect in t.effects {
                    self.run_effect(effect).await;
                }
                self.finish(send_feedback).await;
            }
        }
    }

    fn set_stage(&mut self, next: Stage) {
        if next == self.stage {
            return;
        }
        info!(from = ?self.stage, to = ?next, "Stage changed");
        let from = std::mem::replace(&mut self.stage, next);
        self.emit(SessionEvent::StageChanged { from, to: next });
    }

    async fn run_effect(&mut self, effect: Effect) {
        debug!(?effect, "Running effect");
        match effect {
            Effect::DiscardPendingDocument => {
                if let Some(document) = self.store.first().map(|p| p.document().clone()) {
                    if let Err(e) = self.service.remove(&document).await {
                        warn!(id = %document.id(), "Service remove failed: {e}");
                    }
                }
            }
            Effect::CancelAnalysis => self.cancel_analysis(),
            Effect::ResetSession => self.reset().await,
            Effect::UploadAndAnalyze => {
                if let Some(id) = self.store.first().map(Page::id) {
                    if let Some(page) = self.store.get_mut(id) {
                        page.clear_error();
                    }
                    self.router.withdraw(|a| a.document() == Some(id));
                    self.start_upload(id, UploadPolicy::AnalyzeOnSuccess);
                }
            }
            Effect::BeginAnalysis => self.begin_analysis(),
            Effect::DetachSurface => self.router.detach(),
        }
    }

    async fn advance(&mut self) -> Result<(), SessionError> {
        match self.stage {
            Stage::MultipageReview if !self.store.all_uploaded() => {
                return Err(SessionError::PagesNotReady {
                    pending: self.store.pending_uploads(),
                });
            }
            Stage::DigitalInvoiceReview => {
                if let Some(AnalysisOutcome::Invoice(invoice)) = &self.outcome {
                    let result = invoice.extraction_result()?;
                    self.go(Trigger::Advance).await?;
                    self.outcome = Some(AnalysisOutcome::Extractions(result));
                    return Ok(());
                }
            }
            _ => {}
        }
        self.go(Trigger::Advance).await
    }

    async fn finish(&mut self, send_feedback: bool) {
        let mut feedback_sent = false;
        if send_feedback {
            match self.feedback_result() {
                Ok(Some(result)) => match self.service.send_feedback(&result).await {
                    Ok(()) => feedback_sent = true,
                    Err(e) => warn!("Sending feedback failed: {e}"),
                },
                Ok(None) => debug!("No result to send feedback for"),
                Err(e) => warn!("Cannot build feedback: {e}"),
            }
        }
        info!(feedback_sent, "Session finished");
        self.emit(SessionEvent::Finished { feedback_sent });
        self.finished = true;
    }

    fn feedback_result(&self) -> Result<Option<ExtractionResult>, SessionError> {
        match &self.outcome {
            Some(AnalysisOutcome::Extractions(result)) => Ok(Some(result.clone())),
            Some(AnalysisOutcome::Invoice(invoice)) => Ok(Some(invoice.extraction_result()?)),
            Some(AnalysisOutcome::NoResults) | None => Ok(None),
        }
    }

    /// Forget all pages and results and reset the service.
    async fn reset(&mut self) {
        let removed: Vec<DocumentId> = self.store.iter().map(Page::id).collect();
        self.cancel_analysis();
        self.store.clear();
        self.uploads.reset();
        self.analysis.reset();
        self.router.clear();
        self.outcome = None;
        for id in removed {
            self.emit(SessionEvent::PageRemoved { id });
        }
        if let Err(e) = self.service.reset_to_initial_state().await {
            warn!("Service reset failed: {e}");
        }
    }

    // ── Pages ────────────────────────────────────────────────────────────

    fn capture(&mut self, documents: Vec<Document>, reply: Reply<()>) {
        if self.stage != Stage::Capture {
            let _ = reply.send(Err(SessionError::InvalidTransition {
                stage: self.stage,
                action: "capture",
            }));
            return;
        }
        if let Err(e) = validate::check_batch(&documents, &self.store, &self.config) {
            info!(%e, "Batch rejected");
            let _ = reply.send(Err(e.into()));
            return;
        }

        let config = self.config.clone();
        let done = self.completions.clone();
        tokio::spawn(async move {
            let pages = validate::validate_all(documents, config).await;
            let _ = done.send(Completion::Validated { pages, reply });
        });
    }

    async fn admit_validated(&mut self, pages: Vec<Page>) -> Result<(), SessionError> {
        let pages = validate::settle(pages, &self.config)?;
        if self.stage != Stage::Capture {
            return Err(SessionError::InvalidTransition {
                stage: self.stage,
                action: "capture",
            });
        }
        let added: Vec<(DocumentId, _)> = pages.iter().map(|p| (p.id(), p.error().cloned())).collect();
        self.store.append(pages)?;
        for (id, error) in &added {
            self.emit(SessionEvent::PageAdded {
                id: *id,
                error: error.clone(),
            });
        }
        self.go(Trigger::Captured).await?;
        for (id, _) in added {
            self.process(id);
        }
        Ok(())
    }

    /// Drive one page according to its kind and the mode.
    ///
    /// Non-reviewable documents upload and analyse right away; reviewable
    /// images upload immediately only in multipage mode. Pages with an error
    /// wait for an explicit retry.
    fn process(&mut self, id: DocumentId) {
        let Some(page) = self.store.get(id) else {
            return;
        };
        if page.error().is_some() || page.is_uploaded() {
            return;
        }
        if !page.document().is_reviewable() {
            self.start_upload(id, UploadPolicy::AnalyzeOnSuccess);
        } else if self.config.multipage_enabled {
            self.start_upload(id, UploadPolicy::StoreOnly);
        }
    }

    async fn reorder(&mut self, order: Vec<DocumentId>) -> Result<(), SessionError> {
        if !matches!(self.stage, Stage::Capture | Stage::MultipageReview) {
            return Err(SessionError::InvalidTransition {
                stage: self.stage,
                action: "reorder pages",
            });
        }
        self.store.reorder(&order)?;
        self.emit(SessionEvent::PagesReordered { order });
        if self.config.multipage_enabled {
            if let Err(e) = self.service.sort_documents(&self.store.documents()).await {
                warn!("Service sort failed: {e}");
            }
        }
        Ok(())
    }

    async fn delete(&mut self, id: DocumentId) -> Result<(), SessionError> {
        if !matches!(self.stage, Stage::Capture | Stage::MultipageReview) {
            return Err(SessionError::InvalidTransition {
                stage: self.stage,
                action: "delete a page",
            });
        }
        let page = self.store.remove(id).ok_or(SessionError::UnknownDocument(id))?;
        self.uploads.abandon(id);
        self.router.withdraw(|a| a.document() == Some(id));
        if let Err(e) = self.service.remove(page.document()).await {
            warn!(%id, "Service remove failed: {e}");
        }
        self.emit(SessionEvent::PageRemoved { id });

        if self.store.is_empty() && self.stage == Stage::MultipageReview {
            self.go(Trigger::AllPagesDeleted).await?;
        }
        Ok(())
    }

    fn retry_page(&mut self, id: DocumentId) -> Result<(), SessionError> {
        if !matches!(self.stage, Stage::Capture | Stage::MultipageReview) {
            return Err(SessionError::InvalidTransition {
                stage: self.stage,
                action: "retry a page",
            });
        }
        let page = self
            .store
            .get_mut(id)
            .ok_or(SessionError::UnknownDocument(id))?;
        page.clear_error();
        self.router.withdraw(|a| a.document() == Some(id));
        let ids: Vec<DocumentId> = self.store.iter().map(Page::id).collect();
        for id in ids {
            self.process(id);
        }
        Ok(())
    }

    async fn update_document(&mut self, document: Document) -> Result<(), SessionError> {
        if !matches!(self.stage, Stage::Review | Stage::MultipageReview) {
            return Err(SessionError::InvalidTransition {
                stage: self.stage,
                action: "edit a page",
            });
        }
        let id = document.id();
        let page = self
            .store
            .get_mut(id)
            .ok_or(SessionError::UnknownDocument(id))?;
        page.replace_document(document.clone());
        if let Err(e) = self.service.update(&document).await {
            warn!(%id, "Service update failed: {e}");
        }
        self.emit(SessionEvent::PageUpdated { id });
        Ok(())
    }

    // ── Uploads ──────────────────────────────────────────────────────────

    fn start_upload(&mut self, id: DocumentId, policy: UploadPolicy) {
        let Some(ticket) = self.uploads.begin(&self.store, id, policy) else {
            let uploaded = self.store.get(id).is_some_and(Page::is_uploaded);
            if uploaded && policy == UploadPolicy::AnalyzeOnSuccess {
                self.maybe_begin_analysis();
            }
            return;
        };
        let Some(document) = self.store.get(id).map(|p| p.document().clone()) else {
            return;
        };

        let service = self.service.clone();
        let slots = self.upload_slots.clone();
        let done = self.completions.clone();
        tokio::spawn(async move {
            let _permit = slots.acquire_owned().await.ok();
            let outcome = service.upload(&document).await.map(|remote| {
                debug!(id = %document.id(), remote = %remote.id, "Uploaded");
            });
            let _ = done.send(Completion::Uploaded { ticket, outcome });
        });
    }

    fn on_uploaded(&mut self, ticket: UploadTicket, outcome: Result<(), ServiceError>) {
        let id = ticket.document;
        match self.uploads.finish(&mut self.store, ticket, outcome) {
            UploadResolution::Uploaded { policy } => {
                info!(%id, "Page uploaded");
                self.emit(SessionEvent::PageUploaded { id });
                self.router.withdraw(|a| a.document() == Some(id));
                if policy == UploadPolicy::AnalyzeOnSuccess {
                    self.maybe_begin_analysis();
                }
            }
            UploadResolution::Failed { policy, error } => {
                warn!(%id, %error, "Page upload failed");
                self.emit(SessionEvent::PageFailed {
                    id,
                    error: error.clone(),
                });
                let action = match policy {
                    UploadPolicy::AnalyzeOnSuccess => RetryAction::UploadAndAnalyze(id),
                    UploadPolicy::StoreOnly => RetryAction::Upload(id),
                };
                self.report(error.to_string(), action);
            }
            UploadResolution::Orphaned => {}
        }
    }

    // ── Analysis ─────────────────────────────────────────────────────────

    /// Start the analysis once every page is uploaded.
    fn maybe_begin_analysis(&mut self) {
        if self.store.all_uploaded() {
            self.begin_analysis();
        } else {
            debug!(pending = self.store.pending_uploads(), "Waiting for uploads before analysis");
        }
    }

    fn begin_analysis(&mut self) {
        if self.stage != Stage::Analysis {
            debug!(stage = ?self.stage, "Not in analysis, not starting");
            return;
        }
        let Some(attempt) = self.analysis.begin() else {
            return;
        };
        self.emit(SessionEvent::AnalysisStarted { attempt });

        let service = self.service.clone();
        let done = self.completions.clone();
        tokio::spawn(async move {
            let result = service.start_analysis().await;
            let _ = done.send(Completion::Analysed { attempt, result });
        });
    }

    fn cancel_analysis(&mut self) {
        if self.analysis.cancel() {
            self.service.cancel_analysis();
            self.emit(SessionEvent::AnalysisCancelled);
        }
    }

    async fn on_analysed(&mut self, attempt: u64, result: Result<ExtractionResult, ServiceError>) {
        match self.analysis.complete(attempt, result) {
            AnalysisCompletion::Succeeded(result) => {
                let outcome = interpret(result, &self.config);
                let kind = outcome.kind();
                match transition(self.stage, Trigger::AnalysisFinished(kind), self.ctx()) {
                    Ok(t) => {
                        info!(?kind, "Analysis finished");
                        self.outcome = Some(outcome);
                        self.emit(SessionEvent::AnalysisFinished { outcome: kind });
                        self.apply(t).await;
                    }
                    Err(e) => warn!("Dropping analysis result: {e}"),
                }
            }
            AnalysisCompletion::Failed(_) => {
                let message = self.config.analysis_error_message.clone();
                self.report(message, RetryAction::StartAnalysis);
            }
            AnalysisCompletion::Ignored => {}
        }
    }

    // ── Errors ───────────────────────────────────────────────────────────

    fn report(&mut self, message: String, action: RetryAction) {
        let (token, delivery) = self.router.report(message.clone(), action);
        let error = PendingError { message, token };
        self.emit(match delivery {
            Delivery::Shown => SessionEvent::ErrorShown { error },
            Delivery::Deferred => SessionEvent::ErrorDeferred { error },
        });
    }

    fn acknowledge(&mut self, token: RetryToken) -> Result<(), SessionError> {
        let action = self
            .router
            .acknowledge(token)
            .ok_or(SessionError::UnknownRetryToken(token.raw()))?;
        info!(%token, ?action, "Error acknowledged");
        match action {
            RetryAction::Upload(id) => self.retry_upload(id, UploadPolicy::StoreOnly),
            RetryAction::UploadAndAnalyze(id) => self.retry_upload(id, UploadPolicy::AnalyzeOnSuccess),
            RetryAction::StartAnalysis => {
                self.begin_analysis();
                Ok(())
            }
        }
    }

    fn retry_upload(&mut self, id: DocumentId, policy: UploadPolicy) -> Result<(), SessionError> {
        let page = self
            .store
            .get_mut(id)
            .ok_or(SessionError::UnknownDocument(id))?;
        page.clear_error();
        self.router.withdraw(|a| a.document() == Some(id));
        self.start_upload(id, policy);
        Ok(())
    }

    // ── Invoice ──────────────────────────────────────────────────────────

    fn edit_invoice(
        &mut self,
        edit: impl FnOnce(&mut DigitalInvoice) -> Result<(), SessionError>,
    ) -> Result<(), SessionError> {
        let invoice = match (self.stage, &mut self.outcome) {
            (Stage::DigitalInvoiceReview, Some(AnalysisOutcome::Invoice(invoice))) => invoice,
            _ => {
                return Err(SessionError::InvalidTransition {
                    stage: self.stage,
                    action: "edit line items",
                })
            }
        };
        edit(invoice)?;
        let total = invoice.total().ok().flatten();
        self.emit(SessionEvent::InvoiceUpdated { total });
        Ok(())
    }

    // ── Misc ─────────────────────────────────────────────────────────────

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            stage: self.stage,
            pages: self.store.pages().to_vec(),
            all_uploaded: self.store.all_uploaded(),
            analysis: self.analysis.state(),
            outcome: self.outcome.clone(),
            pending_error: self.router.pending().cloned(),
            surface_attached: self.router.has_surface(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Only fails when nobody listens.
        let _ = self.events.send(event);
    }
}
