//! Serve loop — bridge an [`EventSource`] to the dispatcher.
//!
//! `Idle → Subscribed → (Dispatching)* → Terminated`.  One subscription
//! carries membership events, user events and queries.  Notifications are
//! dispatched strictly one at a time, in arrival order; a slow handler delays
//! everything behind it.

use tracing::{debug, info};

use crate::dispatch::{dispatch_event, dispatch_query};
use crate::error::SubscriptionError;
use crate::router::Router;
use crate::source::{Category, EventSource};

impl Router {
    /// Subscribe to `source` and dispatch every notification against this
    /// router until the subscription is exhausted.
    ///
    /// Returns `Err` only when the subscription cannot be opened.  Handler and
    /// delivery failures are logged and never end the loop.  To stop serving,
    /// close the source (or drop the future).
    pub async fn serve<S: EventSource>(&self, source: &S) -> Result<(), SubscriptionError> {
        let mut subscription = source.subscribe(&Category::ALL).await?;
        info!(categories = ?subscription.categories(), "event stream subscribed");

        let mut processed: u64 = 0;
        while let Some(notification) = subscription.next().await {
            debug!(
                name = %notification.name,
                kind = %notification.kind,
                query_id = ?notification.query_id,
                "notification received"
            );
            if notification.is_query() {
                dispatch_query(self, &notification, source).await;
            } else {
                dispatch_event(self, &notification);
            }
            processed += 1;
        }

        info!(processed, "event stream closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;
    use crate::error::ResponseError;
    use crate::source::{IncomingNotification, Responder, Subscription};

    /// Hands out a pre-filled subscription once; refuses afterwards.
    struct ScriptedSource {
        script: Mutex<Option<Vec<IncomingNotification>>>,
        responses: Mutex<Vec<(u64, Vec<u8>)>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<IncomingNotification>) -> Self {
            Self {
                script: Mutex::new(Some(script)),
                responses: Mutex::new(Vec::new()),
            }
        }
    }

    impl Responder for ScriptedSource {
        async fn respond(&self, query_id: u64, payload: &[u8]) -> Result<(), ResponseError> {
            self.responses.lock().unwrap().push((query_id, payload.to_vec()));
            Ok(())
        }
    }

    impl EventSource for ScriptedSource {
        async fn subscribe(&self, categories: &[Category]) -> Result<Subscription, SubscriptionError> {
            let script = self
                .script
                .lock()
                .unwrap()
                .take()
                .ok_or(SubscriptionError::AlreadySubscribed)?;
            let (tx, rx) = mpsc::channel(script.len().max(1));
            for n in script {
                tx.try_send(n).unwrap();
            }
            Ok(Subscription::new(rx, categories))
        }
    }

    #[tokio::test]
    async fn serves_until_exhausted() {
        let r = Router::new();
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        r.on_event("tick", move |_, payload| {
            sink.lock().unwrap().push(payload.to_vec());
            Ok(())
        });
        r.on_query("ping", |_, _| Ok(b"pong".to_vec()));

        let source = ScriptedSource::new(vec![
            IncomingNotification::event("tick", b"1".to_vec()),
            IncomingNotification::query("ping", 5, Vec::new()),
            IncomingNotification::event("tick", b"2".to_vec()),
        ]);

        r.serve(&source).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![b"1".to_vec(), b"2".to_vec()]);
        assert_eq!(*source.responses.lock().unwrap(), vec![(5, b"pong".to_vec())]);
    }

    #[tokio::test]
    async fn subscription_failure_is_propagated() {
        let r = Router::new();
        let source = ScriptedSource::new(Vec::new());
        r.serve(&source).await.unwrap();

        let err = r.serve(&source).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::AlreadySubscribed));
    }
}
