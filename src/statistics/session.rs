//! Subscription session driver.
//!
//! Forwards updates from an event source to a client sink and keeps the
//! engine statistics in step. The subscription is released when the session
//! returns or when the task running it is aborted.

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::statistics::guard::ConnectionGuard;
use crate::statistics::tracker::{StatisticsError, SubscriptionId};
use crate::statistics::trigger::TriggerSource;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// The event source completed.
    SourceClosed,
    /// The client stopped receiving.
    ClientGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub subscription: SubscriptionId,
    pub messages: u64,
    pub end: SessionEnd,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Statistics(#[from] StatisticsError),

    #[error("event source failed after {messages} messages: {reason}")]
    Source { messages: u64, reason: String },
}

/// Run one subscription on `connection` until the source ends or the client leaves.
pub async fn run_subscription<S, T, E>(
    connection: &ConnectionGuard,
    source: &TriggerSource,
    mut events: S,
    sink: mpsc::Sender<T>,
) -> Result<SessionSummary, SessionError>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: std::fmt::Display,
{
    let subscription = connection.subscribe(source)?;
    let mut messages = 0u64;

    let end = loop {
        tokio::select! {
            _ = sink.closed() => break SessionEnd::ClientGone,
            next = events.next() => match next {
                Some(Ok(update)) => {
                    if sink.send(update).await.is_err() {
                        break SessionEnd::ClientGone;
                    }
                    subscription.message_sent();
                    messages += 1;
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        subscription_id = %subscription.id(),
                        error = %err,
                        "Event source failed"
                    );
                    return Err(SessionError::Source {
                        messages,
                        reason: err.to_string(),
                    });
                }
                None => break SessionEnd::SourceClosed,
            },
        }
    };

    tracing::debug!(
        subscription_id = %subscription.id(),
        messages,
        ?end,
        "Subscription session finished"
    );
    Ok(SessionSummary {
        subscription: subscription.id(),
        messages,
        end,
    })
}
