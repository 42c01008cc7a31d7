//! JSON-lines event source over an async reader/writer pair.
//!
//! Input: one JSON object per line.
//!
//! ```text
//! {"kind":"member-join","payload":"bm9kZS0x"}
//! {"kind":"user","name":"deploy/stop","payload":"bm93"}
//! {"kind":"query","name":"deploy/start","id":42,"payload":"Z28="}
//! ```
//!
//! `payload` is standard base64 and may be omitted (empty).  `name` defaults
//! to the kind name for membership events and is required otherwise.  Blank
//! lines are ignored; malformed lines are logged and skipped.
//!
//! Reading stops at EOF or when the shutdown token is cancelled; either way
//! the subscription is exhausted and the serve loop returns.
//!
//! Output: one `{"id":<u64>,"payload":"<base64>"}` line per answered query.
//!
//! [`StdioSource`] wires this to the process's stdin/stdout, which is why
//! logging goes to stderr.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    Category, EventSource, IncomingNotification, Kind, PendingQueries, Responder, Subscription,
};
use crate::error::{ResponseError, SubscriptionError};

/// Line source bound to stdin/stdout.
pub type StdioSource = LineSource<tokio::io::Stdin, tokio::io::Stdout>;

impl StdioSource {
    pub fn stdio(buffer: usize) -> Self {
        LineSource::new(tokio::io::stdin(), tokio::io::stdout(), buffer)
    }
}

// ── Wire format ───────────────────────────────────────────────────────────────

mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Deserialize)]
struct WireNotification {
    kind: Kind,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, with = "b64")]
    payload: Vec<u8>,
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Serialize)]
struct WireResponse<'a> {
    id: u64,
    #[serde(serialize_with = "b64::serialize")]
    payload: &'a [u8],
}

/// Parse one input line.
fn parse_line(line: &str) -> Result<IncomingNotification, String> {
    let wire: WireNotification = serde_json::from_str(line).map_err(|e| e.to_string())?;
    match wire.kind {
        Kind::MemberJoin | Kind::MemberLeave | Kind::MemberFailed => {
            let mut n = IncomingNotification::membership(wire.kind, wire.payload);
            if let Some(name) = wire.name {
                n.name = name;
            }
            Ok(n)
        }
        Kind::User => {
            let name = wire.name.ok_or("user event without name")?;
            Ok(IncomingNotification::event(name, wire.payload))
        }
        Kind::Query => {
            let name = wire.name.ok_or("query without name")?;
            let id = wire.id.ok_or("query without id")?;
            Ok(IncomingNotification::query(name, id, wire.payload))
        }
    }
}

// ── LineSource ────────────────────────────────────────────────────────────────

/// Event source reading notifications from `R` and writing answers to `W`.
///
/// Supports a single subscription; the subscription is exhausted at EOF or
/// on shutdown.
pub struct LineSource<R, W> {
    reader: Mutex<Option<R>>,
    writer: tokio::sync::Mutex<W>,
    pending: PendingQueries,
    buffer: usize,
    shutdown: CancellationToken,
}

impl<R, W> LineSource<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, buffer: usize) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(writer),
            pending: PendingQueries::default(),
            buffer: buffer.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop reading when `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

impl<R, W> Responder for LineSource<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    async fn respond(&self, query_id: u64, payload: &[u8]) -> Result<(), ResponseError> {
        if !self.pending.take(query_id) {
            return Err(ResponseError::UnknownQuery(query_id));
        }

        let mut line = serde_json::to_string(&WireResponse { id: query_id, payload })
            .map_err(|e| ResponseError::Delivery(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ResponseError::Delivery(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ResponseError::Delivery(e.to_string()))
    }

    fn release(&self, query_id: u64) {
        trace!(query_id, "query released unanswered");
        self.pending.release(query_id);
    }
}

impl<R, W> EventSource for LineSource<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    async fn subscribe(&self, categories: &[Category]) -> Result<Subscription, SubscriptionError> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SubscriptionError::AlreadySubscribed)?;

        let (tx, rx) = mpsc::channel(self.buffer);
        let pending = self.pending.clone();
        let shutdown = self.shutdown.clone();
        let wanted = categories.to_vec();

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!("line source shutting down");
                        break;
                    }
                    next = lines.next_line() => next,
                };
                let line = match next {
                    Ok(Some(l)) => l,
                    Ok(None) => {
                        info!("line source reached end of input");
                        break;
                    }
                    Err(e) => {
                        warn!("line source read error: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let notification = match parse_line(&line) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "skipping malformed line");
                        continue;
                    }
                };
                debug!(name = %notification.name, kind = %notification.kind, "line parsed");

                if !wanted.contains(&notification.kind.category()) {
                    continue;
                }
                if let Some(id) = notification.query_id {
                    pending.insert(id);
                }
                if tx.send(notification).await.is_err() {
                    debug!("subscription dropped; line reader stopping");
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, categories).releasing(self.pending.clone()))
    }
}
