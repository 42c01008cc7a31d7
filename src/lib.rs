//! Serfer — prefix-routed dispatch for cluster membership events and queries.
//!
//! Register handlers on a [`Router`] under exact names or mount sub-routers
//! under name prefixes, then [`Router::serve`] an [`EventSource`]:
//!
//! ```no_run
//! # async fn wire() -> Result<(), serfer::SubscriptionError> {
//! use serfer::{Router, source::channel};
//!
//! let router = Router::new();
//! router.on_member_join(|_, payload| {
//!     tracing::info!(len = payload.len(), "member joined");
//!     Ok(())
//! });
//! router.sub_router("deploy/").on_query("start", |_, _| Ok(b"ok".to_vec()));
//!
//! let (source, _feed, _responses) = channel::channel(64);
//! router.serve(&source).await
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logger;
pub mod router;
mod serve;
pub mod source;

pub use dispatch::DispatchOutcome;
pub use error::{HandlerError, ResponseError, SubscriptionError};
pub use router::{HandlerEntry, Route, Router};
pub use source::{
    Category, EventSource, IncomingNotification, Kind, PendingQueries, Responder, Subscription,
};
