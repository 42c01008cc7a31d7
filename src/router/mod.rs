//! Prefix router — exact-name handlers plus prefix-mounted sub-routers.
//!
//! # Resolution
//!
//! A name resolves against a node in two steps:
//!
//! 1. An exact entry in the node's handler table wins outright.
//! 2. Otherwise every mounted prefix that the name literally starts with is a
//!    candidate.  Candidates are tried in descending lexicographic order of
//!    the prefix; each one recurses into its child with the prefix stripped.
//!    The first hit wins.
//!
//! Every matching candidate is itself a prefix of the name, so a shorter
//! candidate is always a proper prefix of a longer one and sorts below it:
//! descending lexicographic order is longest-prefix-first.
//!
//! Matching is plain `starts_with`: prefix `"a"` matches `"abc"`.  Segment
//! separators carry no meaning, so mount `"deploy/"` rather than `"deploy"`
//! when the slash should be consumed.
//!
//! # Concurrency
//!
//! Each node guards both of its tables with one `RwLock`.  Lookups hold the
//! read side only while copying out the matching entry or candidate list;
//! callbacks always run with no router lock held, so a handler may register
//! further handlers on any router, including its own.
//!
//! A router mounted under an empty prefix inside its own subtree never
//! terminates resolution.

mod entry;

pub use entry::{HandlerEntry, HandlerFn, ResponderFn};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::HandlerError;
use crate::source::Kind;

// ── Route ─────────────────────────────────────────────────────────────────────

/// A successful resolution.
#[derive(Debug, Clone)]
pub struct Route {
    pub entry: HandlerEntry,
    /// The name relative to the router that owns `entry` (all mount prefixes
    /// along the way stripped).
    pub name: String,
}

// ── Router ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RouteTable {
    handlers: HashMap<String, HandlerEntry>,
    children: BTreeMap<String, Arc<Node>>,
}

struct Node {
    /// Prefix this node was first mounted under.  Diagnostics only.
    prefix: OnceLock<String>,
    table: RwLock<RouteTable>,
}

impl Node {
    fn new() -> Self {
        Self {
            prefix: OnceLock::new(),
            table: RwLock::new(RouteTable::default()),
        }
    }

    // Writers never leave a table half-updated, so a poisoned lock still
    // guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RouteTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, name: &str) -> Option<Route> {
        let candidates: Vec<(String, Arc<Node>)> = {
            let table = self.read();
            if let Some(entry) = table.handlers.get(name) {
                return Some(Route {
                    entry: entry.clone(),
                    name: name.to_string(),
                });
            }
            table
                .children
                .iter()
                .rev()
                .filter(|(prefix, _)| name.starts_with(prefix.as_str()))
                .map(|(prefix, child)| (prefix.clone(), Arc::clone(child)))
                .collect()
        };

        candidates
            .iter()
            .find_map(|(prefix, child)| child.resolve(&name[prefix.len()..]))
    }
}

/// Handle to a router node.
///
/// Cloning yields another handle to the same node; registrations through any
/// handle are visible through all of them.
#[derive(Clone)]
pub struct Router {
    node: Arc<Node>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            node: Arc::new(Node::new()),
        }
    }

    /// Prefix this router was mounted under, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.node.prefix.get().map(String::as_str)
    }

    /// Insert `entry` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, entry: HandlerEntry) {
        let name = name.into();
        debug!(router = self.prefix().unwrap_or(""), %name, kind = entry.kind_str(), "entry registered");
        self.node.write().handlers.insert(name, entry);
    }

    /// Mount `child` under `prefix`, replacing any router already there.
    pub fn mount(&self, prefix: impl Into<String>, child: &Router) {
        let prefix = prefix.into();
        if child.node.prefix.set(prefix.clone()).is_err() {
            debug!(
                %prefix,
                kept = child.prefix().unwrap_or(""),
                "sub-router already mounted; keeping its first prefix"
            );
        }
        debug!(router = self.prefix().unwrap_or(""), %prefix, "sub-router mounted");
        self.node.write().children.insert(prefix, Arc::clone(&child.node));
    }

    /// Create a child, mount it under `prefix` and return it.
    pub fn sub_router(&self, prefix: impl Into<String>) -> Router {
        let child = Router::new();
        self.mount(prefix, &child);
        child
    }

    /// Resolve `name` to a single entry.
    pub fn resolve(&self, name: &str) -> Option<HandlerEntry> {
        self.resolve_route(name).map(|route| route.entry)
    }

    /// Resolve `name`, also reporting the name relative to the owning router.
    pub fn resolve_route(&self, name: &str) -> Option<Route> {
        self.node.resolve(name)
    }

    pub fn on_event<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&str, &[u8]) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(name, HandlerEntry::handler(handler));
    }

    pub fn on_query<F>(&self, name: impl Into<String>, responder: F)
    where
        F: Fn(&str, &[u8]) -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static,
    {
        self.register(name, HandlerEntry::responder(responder));
    }

    pub fn on_member_join<F>(&self, handler: F)
    where
        F: Fn(&str, &[u8]) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_event(Kind::MemberJoin.as_str(), handler);
    }

    pub fn on_member_leave<F>(&self, handler: F)
    where
        F: Fn(&str, &[u8]) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_event(Kind::MemberLeave.as_str(), handler);
    }

    pub fn on_member_failed<F>(&self, handler: F)
    where
        F: Fn(&str, &[u8]) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_event(Kind::MemberFailed.as_str(), handler);
    }

    /// Exact names registered directly on this router, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.node.read().handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Prefixes mounted directly on this router, sorted ascending.
    pub fn prefixes(&self) -> Vec<String> {
        self.node.read().children.keys().cloned().collect()
    }
}
