//! Event source contracts — what the serve loop consumes.
//!
//! The membership transport itself lives outside this crate.  A source only
//! has to do two things: hand out a [`Subscription`] over the notification
//! categories the router cares about, and deliver query answers back to the
//! asking peer through [`Responder::respond`].
//!
//! Two concrete sources ship with the crate:
//!
//! - [`channel`] — in-memory, fed from application code (embedding, tests).
//! - [`lines`] — JSON objects, one per line, over any async reader/writer pair
//!   (stdin/stdout in the demo binary).

pub mod channel;
#[cfg(feature = "source-lines")]
pub mod lines;

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ResponseError, SubscriptionError};

// ── Notification kinds ────────────────────────────────────────────────────────

/// Discriminator carried by every [`IncomingNotification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    MemberJoin,
    MemberLeave,
    MemberFailed,
    User,
    Query,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::MemberJoin => "member-join",
            Kind::MemberLeave => "member-leave",
            Kind::MemberFailed => "member-failed",
            Kind::User => "user",
            Kind::Query => "query",
        }
    }

    /// The subscription category this kind is delivered under.
    pub fn category(&self) -> Category {
        match self {
            Kind::MemberJoin | Kind::MemberLeave | Kind::MemberFailed => Category::Membership,
            Kind::User => Category::User,
            Kind::Query => Category::Query,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Membership,
    User,
    Query,
}

impl Category {
    /// Everything the serve loop listens to.
    pub const ALL: [Category; 3] = [Category::Membership, Category::User, Category::Query];
}

// ── IncomingNotification ──────────────────────────────────────────────────────

/// A single record pulled off the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingNotification {
    pub name: String,
    pub payload: Vec<u8>,
    pub kind: Kind,
    /// Correlation id; `Some` only for queries.
    pub query_id: Option<u64>,
}

impl IncomingNotification {
    /// A user event.
    pub fn event(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            kind: Kind::User,
            query_id: None,
        }
    }

    /// A query that expects exactly one answer correlated by `query_id`.
    pub fn query(name: impl Into<String>, query_id: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            kind: Kind::Query,
            query_id: Some(query_id),
        }
    }

    /// A membership event.  The name is the kind name (`"member-join"`, …)
    /// so membership handlers resolve like any other event.
    ///
    /// Passing a non-membership kind yields a user event named after it.
    pub fn membership(kind: Kind, payload: impl Into<Vec<u8>>) -> Self {
        let kind = match kind.category() {
            Category::Membership => kind,
            _ => Kind::User,
        };
        Self {
            name: kind.as_str().to_string(),
            payload: payload.into(),
            kind,
            query_id: None,
        }
    }

    pub fn is_query(&self) -> bool {
        self.kind == Kind::Query
    }
}

// ── Pending queries ───────────────────────────────────────────────────────────

/// Query ids a source has handed out and not yet settled.
///
/// An id leaves the set when it is answered ([`take`](Self::take)) or given
/// up on ([`release`](Self::release)).
#[derive(Debug, Clone, Default)]
pub struct PendingQueries(Arc<Mutex<HashSet<u64>>>);

impl PendingQueries {
    pub fn insert(&self, query_id: u64) {
        self.lock().insert(query_id);
    }

    /// Remove `query_id` for answering; `false` if it was not pending.
    pub fn take(&self, query_id: u64) -> bool {
        self.lock().remove(&query_id)
    }

    pub fn release(&self, query_id: u64) {
        self.lock().remove(&query_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u64>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Subscription ──────────────────────────────────────────────────────────────

/// Receiving end of a subscription.
///
/// Yields notifications in arrival order, skipping any whose kind falls
/// outside the subscribed categories.  Exhausted once every sender is gone.
pub struct Subscription {
    rx: mpsc::Receiver<IncomingNotification>,
    categories: Vec<Category>,
    pending: Option<PendingQueries>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<IncomingNotification>, categories: &[Category]) -> Self {
        Self {
            rx,
            categories: categories.to_vec(),
            pending: None,
        }
    }

    /// Release the id of every query this subscription skips from `pending`.
    pub fn releasing(mut self, pending: PendingQueries) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Next notification, or `None` when the source is exhausted.
    pub async fn next(&mut self) -> Option<IncomingNotification> {
        while let Some(n) = self.rx.recv().await {
            if self.categories.contains(&n.kind.category()) {
                return Some(n);
            }
            if let (Some(pending), Some(id)) = (&self.pending, n.query_id) {
                pending.release(id);
            }
        }
        None
    }
}

// ── Collaborator traits ───────────────────────────────────────────────────────

/// Delivers a computed query answer back to the asking peer.
pub trait Responder: Send + Sync {
    fn respond(
        &self,
        query_id: u64,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), ResponseError>> + Send;

    /// The query will not be answered; forget any state kept for it.
    fn release(&self, _query_id: u64) {}
}

/// A feed of membership events, user events and queries.
pub trait EventSource: Responder {
    /// Open one combined stream over `categories`.
    fn subscribe(
        &self,
        categories: &[Category],
    ) -> impl Future<Output = Result<Subscription, SubscriptionError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_categories() {
        assert_eq!(Kind::MemberJoin.category(), Category::Membership);
        assert_eq!(Kind::MemberLeave.category(), Category::Membership);
        assert_eq!(Kind::MemberFailed.category(), Category::Membership);
        assert_eq!(Kind::User.category(), Category::User);
        assert_eq!(Kind::Query.category(), Category::Query);
    }

    #[test]
    fn membership_notification_named_after_kind() {
        let n = IncomingNotification::membership(Kind::MemberFailed, b"node-3".to_vec());
        assert_eq!(n.name, "member-failed");
        assert_eq!(n.kind, Kind::MemberFailed);
        assert!(n.query_id.is_none());
    }

    #[test]
    fn membership_with_non_membership_kind_is_user_event() {
        let n = IncomingNotification::membership(Kind::Query, Vec::new());
        assert_eq!(n.kind, Kind::User);
        assert!(!n.is_query());
    }

    #[test]
    fn query_carries_id() {
        let n = IncomingNotification::query("deploy/start", 42, b"go".to_vec());
        assert!(n.is_query());
        assert_eq!(n.query_id, Some(42));
    }

    #[test]
    fn kind_serde_names() {
        let k: Kind = serde_json::from_str("\"member-join\"").unwrap();
        assert_eq!(k, Kind::MemberJoin);
        assert_eq!(serde_json::to_string(&Kind::User).unwrap(), "\"user\"");
    }

    #[tokio::test]
    async fn subscription_skips_unsubscribed_categories() {
        let (tx, rx) = mpsc::channel(8);
        let mut sub = Subscription::new(rx, &[Category::Query]);
        tx.send(IncomingNotification::event("ignored", Vec::new())).await.unwrap();
        tx.send(IncomingNotification::query("q", 1, Vec::new())).await.unwrap();
        drop(tx);

        let n = sub.next().await.unwrap();
        assert_eq!(n.name, "q");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn skipped_query_is_released() {
        let pending = PendingQueries::default();
        pending.insert(5);
        pending.insert(6);

        let (tx, rx) = mpsc::channel(8);
        let mut sub = Subscription::new(rx, &[Category::User]).releasing(pending.clone());
        tx.send(IncomingNotification::query("q", 5, Vec::new())).await.unwrap();
        tx.send(IncomingNotification::event("e", Vec::new())).await.unwrap();
        drop(tx);

        assert_eq!(sub.next().await.unwrap().name, "e");
        assert!(sub.next().await.is_none());
        assert!(!pending.take(5));
        assert!(pending.take(6));
        assert!(pending.is_empty());
    }
}
