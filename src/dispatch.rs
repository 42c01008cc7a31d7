//! Dispatcher — invoke the resolved entry for one notification.
//!
//! Every failure below the serve loop is absorbed here.  [`dispatch_event`]
//! and [`dispatch_query`] log according to the outcome and hand the
//! [`DispatchOutcome`] back so callers (and tests) can inspect what happened
//! without a log sink.
//!
//! | outcome             | level |
//! |---------------------|-------|
//! | unresolved/mismatch | info  |
//! | handler failed      | info  |
//! | delivery failed     | error |

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, info};

use crate::error::HandlerError;
use crate::router::{HandlerEntry, Route, Router};
use crate::source::{IncomingNotification, Responder};

/// What happened to a single notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Event handler ran and reported success.
    Handled,
    /// Responder ran and its answer was delivered.
    Responded,
    /// Nothing is registered under the name.
    Unresolved,
    /// An entry was found but of the other variant.
    Mismatch,
    /// The handler or responder returned an error or panicked.
    HandlerFailed(String),
    /// The responder's answer could not be delivered.
    DeliveryFailed(String),
}

impl DispatchOutcome {
    /// Emit the log record for this outcome.
    pub fn log(&self, notification: &IncomingNotification) {
        let what = if notification.is_query() { "query" } else { "event" };
        let name = notification.name.as_str();
        match self {
            DispatchOutcome::Handled | DispatchOutcome::Responded => {
                debug!(%name, kind = %notification.kind, "{what} handled");
            }
            DispatchOutcome::Unresolved | DispatchOutcome::Mismatch => {
                info!(%name, "no handler for {what}");
            }
            DispatchOutcome::HandlerFailed(e) => {
                info!(%name, error = %e, "{what} handler failed");
            }
            DispatchOutcome::DeliveryFailed(e) => {
                error!(
                    %name,
                    query_id = ?notification.query_id,
                    error = %e,
                    "responding to query failed"
                );
            }
        }
    }
}

/// Dispatch a fire-and-forget event.
pub fn dispatch_event(router: &Router, notification: &IncomingNotification) -> DispatchOutcome {
    let outcome = match router.resolve_route(&notification.name) {
        None => DispatchOutcome::Unresolved,
        Some(Route { entry: HandlerEntry::Responder(_), .. }) => DispatchOutcome::Mismatch,
        Some(Route { entry: HandlerEntry::Handler(f), name }) => {
            match invoke(|| f(&name, &notification.payload)) {
                Ok(()) => DispatchOutcome::Handled,
                Err(e) => DispatchOutcome::HandlerFailed(e),
            }
        }
    };
    outcome.log(notification);
    outcome
}

/// Dispatch a query and deliver the answer through `responder`.
///
/// At most one `respond` call is made; a failed delivery is not retried.
/// Any outcome other than [`DispatchOutcome::Responded`] releases the query
/// id on the responder.
pub async fn dispatch_query<R: Responder>(
    router: &Router,
    notification: &IncomingNotification,
    responder: &R,
) -> DispatchOutcome {
    let outcome = answer_query(router, notification, responder).await;
    if outcome != DispatchOutcome::Responded {
        if let Some(query_id) = notification.query_id {
            responder.release(query_id);
        }
    }
    outcome.log(notification);
    outcome
}

async fn answer_query<R: Responder>(
    router: &Router,
    notification: &IncomingNotification,
    responder: &R,
) -> DispatchOutcome {
    let (f, name) = match router.resolve_route(&notification.name) {
        None => return DispatchOutcome::Unresolved,
        Some(Route { entry: HandlerEntry::Handler(_), .. }) => return DispatchOutcome::Mismatch,
        Some(Route { entry: HandlerEntry::Responder(f), name }) => (f, name),
    };

    let response = match invoke(|| f(&name, &notification.payload)) {
        Ok(response) => response,
        Err(e) => return DispatchOutcome::HandlerFailed(e),
    };

    let Some(query_id) = notification.query_id else {
        return DispatchOutcome::DeliveryFailed("query carries no id".into());
    };

    match responder.respond(query_id, &response).await {
        Ok(()) => DispatchOutcome::Responded,
        Err(e) => DispatchOutcome::DeliveryFailed(e.to_string()),
    }
}

/// Run a user callback, folding both error returns and panics into a message.
fn invoke<T>(f: impl FnOnce() -> Result<T, HandlerError>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("handler panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
