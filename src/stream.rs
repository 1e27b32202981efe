//! Session events as a stream.
//!
//! The session publishes every observable change on a broadcast channel.
//! [`EventStream`] is one subscriber's view of it: events arrive in the
//! order the session applied them. A subscriber that falls more than
//! `event_capacity` events behind skips the ones it missed and logs how
//! many.

use crate::document::DocumentId;
use crate::error::PageError;
use crate::invoice::Price;
use crate::navigation::{OutcomeKind, Stage};
use crate::router::PendingError;
use futures::StreamExt;
use serde::Serialize;
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::warn;

/// Something that happened in a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    StageChanged { from: Stage, to: Stage },
    /// Admitted; `error` is set for a soft structural failure.
    PageAdded { id: DocumentId, error: Option<PageError> },
    PageUploaded { id: DocumentId },
    PageFailed { id: DocumentId, error: PageError },
    PageRemoved { id: DocumentId },
    PageUpdated { id: DocumentId },
    PagesReordered { order: Vec<DocumentId> },
    AnalysisStarted { attempt: u64 },
    AnalysisCancelled,
    AnalysisFinished { outcome: OutcomeKind },
    /// No surface was attached; the error waits.
    ErrorDeferred { error: PendingError },
    /// The error reached a surface.
    ErrorShown { error: PendingError },
    InvoiceUpdated { total: Option<Price> },
    /// The session ended; nothing follows.
    Finished { feedback_sent: bool },
}

/// A boxed stream of session events.
pub type EventStream = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

/// A new subscription next to `receiver`, starting from the next event.
pub(crate) fn subscribe(receiver: &broadcast::Receiver<SessionEvent>) -> EventStream {
    let s = BroadcastStream::new(receiver.resubscribe()).filter_map(|item| async move {
        match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "Event subscriber lagged");
                None
            }
        }
    });
    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_order_and_ends_with_sender() {
        let (tx, rx) = broadcast::channel(8);
        let mut events = subscribe(&rx);
        drop(rx);
        tx.send(SessionEvent::AnalysisStarted { attempt: 1 }).unwrap();
        tx.send(SessionEvent::AnalysisCancelled).unwrap();
        drop(tx);

        assert_eq!(
            events.next().await,
            Some(SessionEvent::AnalysisStarted { attempt: 1 })
        );
        assert_eq!(events.next().await, Some(SessionEvent::AnalysisCancelled));
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let (tx, rx) = broadcast::channel(2);
        let mut events = subscribe(&rx);
        drop(rx);
        for attempt in 0..5 {
            tx.send(SessionEvent::AnalysisStarted { attempt }).unwrap();
        }
        drop(tx);
        let seen: Vec<_> = events.by_ref().collect().await;
        assert_eq!(
            seen,
            vec![
                SessionEvent::AnalysisStarted { attempt: 3 },
                SessionEvent::AnalysisStarted { attempt: 4 },
            ]
        );
    }

    #[test]
    fn serialises_with_event_tag() {
        let json = serde_json::to_string(&SessionEvent::AnalysisCancelled).unwrap();
        assert_eq!(json, r#"{"event":"analysisCancelled"}"#);
    }
}
