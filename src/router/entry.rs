//! Registered callbacks.

use std::fmt;
use std::sync::Arc;

use crate::error::HandlerError;

/// Fire-and-forget event callback: `(name, payload)`.
pub type HandlerFn = dyn Fn(&str, &[u8]) -> Result<(), HandlerError> + Send + Sync;

/// Query callback: `(name, request)` → response bytes.
pub type ResponderFn = dyn Fn(&str, &[u8]) -> Result<Vec<u8>, HandlerError> + Send + Sync;

/// What a name resolves to.  Exactly one variant per registered name.
///
/// Clones share the underlying callback.
#[derive(Clone)]
pub enum HandlerEntry {
    Handler(Arc<HandlerFn>),
    Responder(Arc<ResponderFn>),
}

impl HandlerEntry {
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(&str, &[u8]) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        HandlerEntry::Handler(Arc::new(f))
    }

    pub fn responder<F>(f: F) -> Self
    where
        F: Fn(&str, &[u8]) -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static,
    {
        HandlerEntry::Responder(Arc::new(f))
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            HandlerEntry::Handler(_) => "handler",
            HandlerEntry::Responder(_) => "responder",
        }
    }

    /// `true` when both entries share the same callback allocation.
    pub fn same_callback(&self, other: &HandlerEntry) -> bool {
        match (self, other) {
            (HandlerEntry::Handler(a), HandlerEntry::Handler(b)) => Arc::ptr_eq(a, b),
            (HandlerEntry::Responder(a), HandlerEntry::Responder(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_str())
    }
}
