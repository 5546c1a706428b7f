//! Request/reply correlation over one engine's stdin/stdout pair.
//!
//! Outbound requests get a fresh `id`, are serialized as a single JSON line and handed to the
//! process writer. Inbound stdout lines are parsed and routed to the waiter registered under
//! the same `id`. Replies are matched by id only; arrival order is irrelevant.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::error::{EngineError, Result};
use crate::metrics;

pub struct RequestCorrelator {
    engine: String,
    nonce: u32,
    next_id: AtomicU64,
    pending: DashMap<String, oneshot::Sender<Value>>,
    outbound: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
}

/// Removes a pending entry when the waiting future finishes or is dropped.
struct PendingGuard<'a> {
    correlator: &'a RequestCorrelator,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.correlator.pending.remove(&self.id).is_some() {
            self.correlator.publish_pending();
        }
    }
}

impl RequestCorrelator {
    /// `outbound` receives complete, newline-terminated request lines.
    pub fn new(engine: &str, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            engine: engine.to_string(),
            nonce: rand::random(),
            next_id: AtomicU64::new(0),
            pending: DashMap::new(),
            outbound,
            closed: AtomicBool::new(false),
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    fn next_request_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req_{:08x}_{}", self.nonce, n)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn publish_pending(&self) {
        metrics::set_pending(&self.engine, self.pending.len());
    }

    /// Send `payload` with a fresh id and wait up to `timeout` for the matching reply.
    pub async fn send(&self, payload: Value, timeout: Duration) -> Result<Value> {
        let mut object: Map<String, Value> = match payload {
            Value::Object(object) => object,
            _ => return Err(EngineError::InvalidPayload),
        };

        let id = self.next_request_id();
        object.insert("id".to_string(), Value::String(id.clone()));

        let mut line =
            serde_json::to_string(&object).map_err(|_| EngineError::InvalidPayload)?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        let _guard = PendingGuard {
            correlator: self,
            id: id.clone(),
        };
        self.publish_pending();

        // Registered before this check, so a concurrent `fail_all` cannot miss the request.
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ProcessExited(self.engine.clone()));
        }

        if self.outbound.send(line).is_err() {
            debug!("[{}] writer closed, dropping request {}", self.engine, id);
            return Err(EngineError::WriteFailed(self.engine.clone()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(EngineError::ProcessExited(self.engine.clone())),
            Err(_) => {
                debug!("[{}] request {} timed out after {:?}", self.engine, id, timeout);
                metrics::request_timed_out(&self.engine);
                Err(EngineError::Timeout {
                    name: self.engine.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Fail every pending request with `ProcessExited` and refuse new ones.
    ///
    /// Called once the process is gone; returns how many waiters were released.
    pub fn fail_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        let released = ids
            .iter()
            .filter(|id| self.pending.remove(id.as_str()).is_some())
            .count();
        if released > 0 {
            debug!("[{}] {} pending request(s) failed on exit", self.engine, released);
        }
        self.publish_pending();
        released
    }

    /// Route one stdout line. Returns `true` when it completed a pending request.
    ///
    /// Unparsable lines, lines without an `id`, and replies whose request already timed out
    /// are dropped without error.
    pub fn dispatch_line(&self, line: &str) -> bool {
        let reply: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                trace!("[{}] non-JSON output ignored", self.engine);
                return false;
            }
        };

        let id = match reply.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => return false,
        };

        match self.pending.remove(&id) {
            Some((_, waiter)) => {
                self.publish_pending();
                waiter.send(reply).is_ok()
            }
            None => {
                trace!("[{}] orphan reply {} discarded", self.engine, id);
                false
            }
        }
    }
}
