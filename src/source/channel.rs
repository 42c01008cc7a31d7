//! In-memory event source.
//!
//! [`channel`] returns three ends:
//!
//! - [`ChannelSource`] — handed to [`Router::serve`](crate::router::Router::serve).
//! - [`ChannelFeed`] — cloneable; application code pushes notifications here.
//!   Dropping every feed exhausts the subscription.
//! - a receiver of [`QueryResponse`]s — one per successful `respond`.
//!
//! Query ids pushed through the feed are tracked as pending until answered
//! or released; answering an unknown or already-settled id fails.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use super::{
    Category, EventSource, IncomingNotification, Kind, PendingQueries, Responder, Subscription,
};
use crate::error::{ResponseError, SubscriptionError};

/// A query answer observed on the response side of the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub query_id: u64,
    pub payload: Vec<u8>,
}

/// Build a connected source / feed / response-receiver triple.
pub fn channel(
    buffer: usize,
) -> (ChannelSource, ChannelFeed, mpsc::UnboundedReceiver<QueryResponse>) {
    let (tx, rx) = mpsc::channel(buffer);
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let pending = PendingQueries::default();

    let source = ChannelSource {
        rx: Mutex::new(Some(rx)),
        pending: pending.clone(),
        response_tx,
    };
    let feed = ChannelFeed { tx, pending };
    (source, feed, response_rx)
}

// ── ChannelFeed ───────────────────────────────────────────────────────────────

/// Sending end: pushes notifications into the source.
#[derive(Clone)]
pub struct ChannelFeed {
    tx: mpsc::Sender<IncomingNotification>,
    pending: PendingQueries,
}

impl ChannelFeed {
    /// Push any notification.  Queries are registered as pending.
    ///
    /// Returns the notification back if the source side is gone.
    pub async fn send(&self, notification: IncomingNotification) -> Result<(), IncomingNotification> {
        let query_id = notification.query_id.filter(|_| notification.is_query());
        if let Some(id) = query_id {
            self.pending.insert(id);
        }
        self.tx.send(notification).await.map_err(|e| {
            if let Some(id) = query_id {
                self.pending.release(id);
            }
            e.0
        })
    }

    pub async fn event(
        &self,
        name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), IncomingNotification> {
        self.send(IncomingNotification::event(name, payload)).await
    }

    pub async fn query(
        &self,
        name: impl Into<String>,
        query_id: u64,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), IncomingNotification> {
        self.send(IncomingNotification::query(name, query_id, payload)).await
    }

    pub async fn member(
        &self,
        kind: Kind,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), IncomingNotification> {
        self.send(IncomingNotification::membership(kind, payload)).await
    }
}

// ── ChannelSource ─────────────────────────────────────────────────────────────

/// Receiving end: an [`EventSource`] that supports a single subscription.
pub struct ChannelSource {
    rx: Mutex<Option<mpsc::Receiver<IncomingNotification>>>,
    pending: PendingQueries,
    response_tx: mpsc::UnboundedSender<QueryResponse>,
}

impl ChannelSource {
    /// Ids pushed as queries and neither answered nor released.
    pub fn pending_queries(&self) -> usize {
        self.pending.len()
    }
}

impl Responder for ChannelSource {
    async fn respond(&self, query_id: u64, payload: &[u8]) -> Result<(), ResponseError> {
        if !self.pending.take(query_id) {
            return Err(ResponseError::UnknownQuery(query_id));
        }
        trace!(query_id, len = payload.len(), "query answered");
        self.response_tx
            .send(QueryResponse {
                query_id,
                payload: payload.to_vec(),
            })
            .map_err(|_| ResponseError::Delivery("response receiver dropped".into()))
    }

    fn release(&self, query_id: u64) {
        trace!(query_id, "query released unanswered");
        self.pending.release(query_id);
    }
}

impl EventSource for ChannelSource {
    async fn subscribe(&self, categories: &[Category]) -> Result<Subscription, SubscriptionError> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SubscriptionError::AlreadySubscribed)?;
        Ok(Subscription::new(rx, categories).releasing(self.pending.clone()))
    }
}
