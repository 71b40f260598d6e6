// ===============================
// src/metrics.rs
// ===============================
/*
=============================================================================
Project : qflow_bot — Telegram status relay for a Bybit trading account
Module  : metrics.rs
Version : 2.1.1
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Keeps bot state (balance, positions, daily trades, PnL) in a JSON
          document versioned on GitHub, checkpoints it every cycle, relays
          status to Telegram, and answers read-only chat commands.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{header, Body, Request, Response, Server};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- State store (GitHub contents) --------
pub static STORE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("store_requests_total", "state store HTTP calls (labels: op, result)"),
        &["op", "result"],
    )
    .unwrap()
});

pub static STORE_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("store_request_latency_ms", "state store round-trip (ms)")
            .buckets(vec![25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]),
    )
    .unwrap()
});

pub static STORE_RETRIES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("store_retries_total", "transient-fault retries").unwrap());

// -------- Session --------
pub static CHECKPOINTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("checkpoints_total", "state checkpoints (label: result)"),
        &["result"],
    )
    .unwrap()
});

pub static CYCLES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("cycles_total", "operating cycles run").unwrap());

pub static TRADES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("trades_recorded_total", "trades appended to today_trades").unwrap());

pub static BALANCE: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("state_balance", "in-memory balance").unwrap());

pub static PNL: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("state_pnl", "cumulative realized PnL").unwrap());

pub static OPEN_POSITIONS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("state_open_positions", "open positions").unwrap());

pub static JOURNAL_DROPPED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("journal_dropped_total", "journal events dropped (channel full/closed)").unwrap());

// -------- Chat --------
pub static COMMANDS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("chat_commands_total", "chat commands answered (label: command)"),
        &["command"],
    )
    .unwrap()
});

pub static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("notifications_total", "outgoing chat messages (label: result)"),
        &["result"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(STORE_REQUESTS.clone())),
        REGISTRY.register(Box::new(STORE_LATENCY.clone())),
        REGISTRY.register(Box::new(STORE_RETRIES.clone())),
        REGISTRY.register(Box::new(CHECKPOINTS.clone())),
        REGISTRY.register(Box::new(CYCLES.clone())),
        REGISTRY.register(Box::new(TRADES.clone())),
        REGISTRY.register(Box::new(BALANCE.clone())),
        REGISTRY.register(Box::new(PNL.clone())),
        REGISTRY.register(Box::new(OPEN_POSITIONS.clone())),
        REGISTRY.register(Box::new(JOURNAL_DROPPED.clone())),
        REGISTRY.register(Box::new(COMMANDS.clone())),
        REGISTRY.register(Box::new(NOTIFICATIONS.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

async fn handle(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let rsp = Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
        .body(Body::from(encode_metrics()))
        .unwrap_or_else(|_| Response::new(Body::from("# no metrics\n")));
    Ok(rsp)
}

/// Serve GET / and /metrics until the shutdown future resolves.
pub async fn serve_metrics<F>(port: u16, shutdown: F)
where
    F: std::future::Future<Output = ()>,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let builder = match Server::try_bind(&addr) {
        Ok(b) => b,
        Err(e) => {
            error!(?e, %addr, "metrics bind failed");
            return;
        }
    };
    info!(%addr, "metrics listening (GET /metrics)");

    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });
    if let Err(e) = builder.serve(make_svc).with_graceful_shutdown(shutdown).await {
        error!(?e, "metrics server error");
    }
}
