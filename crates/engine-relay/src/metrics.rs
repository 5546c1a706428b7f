// engine-relay/crates/engine-relay/src/metrics.rs

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    static ref INIT_LOCK: Mutex<()> = Mutex::new(());
}

struct RelayMetrics {
    requests: IntCounterVec,
    spawns: IntCounterVec,
    exits: IntCounterVec,
    timeouts: IntCounterVec,
    ready: IntGaugeVec,
    pending: IntGaugeVec,
}

static METRICS: OnceLock<RelayMetrics> = OnceLock::new();

/// Register all collectors. Calling it twice is harmless.
pub fn init_metrics() -> anyhow::Result<()> {
    let _init = INIT_LOCK
        .lock()
        .map_err(|_| anyhow::anyhow!("metrics init lock poisoned"))?;
    if METRICS.get().is_some() {
        return Ok(());
    }

    let metrics = RelayMetrics {
        requests: IntCounterVec::new(
            prometheus::opts!("requests_total", "Total requests per route"),
            &["route", "status"],
        )?,
        spawns: IntCounterVec::new(
            prometheus::opts!("engine_spawns_total", "Engine processes started"),
            &["engine"],
        )?,
        exits: IntCounterVec::new(
            prometheus::opts!("engine_exits_total", "Engine processes that exited"),
            &["engine"],
        )?,
        timeouts: IntCounterVec::new(
            prometheus::opts!(
                "engine_request_timeouts_total",
                "Engine requests abandoned after their deadline"
            ),
            &["engine"],
        )?,
        ready: IntGaugeVec::new(
            prometheus::opts!("engine_ready", "1 when the engine passed its warmup probe"),
            &["engine"],
        )?,
        pending: IntGaugeVec::new(
            prometheus::opts!("engine_pending_requests", "Requests awaiting a reply"),
            &["engine"],
        )?,
    };

    REGISTRY.register(Box::new(metrics.requests.clone())).ok();
    REGISTRY.register(Box::new(metrics.spawns.clone())).ok();
    REGISTRY.register(Box::new(metrics.exits.clone())).ok();
    REGISTRY.register(Box::new(metrics.timeouts.clone())).ok();
    REGISTRY.register(Box::new(metrics.ready.clone())).ok();
    REGISTRY.register(Box::new(metrics.pending.clone())).ok();

    let _ = METRICS.set(metrics);
    Ok(())
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(m) = METRICS.get() {
        m.requests.with_label_values(&[route, status]).inc();
    }
}

pub fn engine_spawned(engine: &str) {
    if let Some(m) = METRICS.get() {
        m.spawns.with_label_values(&[engine]).inc();
    }
}

pub fn engine_exited(engine: &str) {
    if let Some(m) = METRICS.get() {
        m.exits.with_label_values(&[engine]).inc();
    }
}

pub fn request_timed_out(engine: &str) {
    if let Some(m) = METRICS.get() {
        m.timeouts.with_label_values(&[engine]).inc();
    }
}

pub fn set_engine_ready(engine: &str, ready: bool) {
    if let Some(m) = METRICS.get() {
        m.ready.with_label_values(&[engine]).set(i64::from(ready));
    }
}

pub fn set_pending(engine: &str, pending: usize) {
    if let Some(m) = METRICS.get() {
        m.pending.with_label_values(&[engine]).set(pending as i64);
    }
}

/// Text exposition of everything registered.
pub fn render() -> anyhow::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}
