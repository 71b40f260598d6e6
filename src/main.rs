// ===============================
// src/main.rs
// ===============================
/*
 # satu cycle lalu keluar (mirip cron job)
 cargo run --release -- --once

 # metrics: hasil checkpoint & state gauge
 curl -s localhost:9898/metrics | egrep '^(checkpoints_total|state_)'
*/
/*
=============================================================================
Project : qflow_bot — Telegram status relay for a Bybit trading account
Module  : main.rs
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
mod commands;
mod config;
mod domain;
mod metrics;
mod recorder;
mod session;
mod store;
mod telegram;
#[cfg(test)]
mod testkit;

use clap::Parser;
use tokio::{
    select,
    sync::{mpsc, watch},
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::session::BotSession;
use crate::store::ContentStore;
use crate::telegram::{Notifier, TelegramClient};

/// Ctrl-C dan SIGTERM (systemd/docker/k8s) sama-sama berujung ke shutdown + flush.
/// Listener dipasang sekali supaya sinyal yang datang di tengah cycle tidak hilang.
struct StopSignal {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

impl StopSignal {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            interrupt: signal(SignalKind::interrupt())?,
            #[cfg(unix)]
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(?e, "ctrl-c listener failed");
        }
        "ctrl-c"
    }
}

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Load config ----
    let cli = config::Cli::parse();
    let settings = match config::load(&cli) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "config error");
            std::process::exit(2);
        }
    };

    info!(
        environment = settings.environment.as_str(),
        repo = %settings.store.repo,
        branch = %settings.store.branch,
        key = settings.environment.state_key(),
        telegram = settings.telegram.is_some(),
        interval_secs = settings.cycle_interval.as_secs(),
        daily_reset = ?settings.daily_reset,
        once = cli.once,
        "startup config"
    );

    // ---- Shutdown signal (dibagikan ke semua task) ----
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ---- Metrics ----
    metrics::init();
    {
        let mut rx = shutdown_rx.clone();
        tokio::spawn(metrics::serve_metrics(settings.metrics_port, async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }));
    }

    // ---- Recorder (optional) ----
    let journal = settings.record_file.clone().map(|path| {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(recorder::run(rx, path));
        tx
    });

    // ---- State store + session ----
    let store = match ContentStore::new(settings.store.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot build state store client");
            std::process::exit(2);
        }
    };
    let tg_client = settings.telegram.clone().and_then(|cfg| match TelegramClient::new(cfg) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(error = %e, "telegram disabled");
            None
        }
    });
    let notifier = Notifier::new(tg_client.clone(), settings.environment);

    let mut session = BotSession::new(settings.environment, store, notifier, settings.daily_reset);
    if let Some(tx) = journal {
        session = session.with_journal(tx);
    }
    session.initialize().await;

    // ---- Chat commands ----
    let poller = tg_client.map(|client| {
        tokio::spawn(telegram::run_poller(client, session.subscribe(), shutdown_rx.clone()))
    });

    // ---- Cycle loop ----
    if cli.once {
        session.run_cycle().await;
    } else {
        session.notifier().notify("✅ Bot online").await;

        let mut tick = interval(settings.cycle_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop = match StopSignal::install() {
            Ok(s) => s,
            Err(e) => {
                error!(?e, "cannot install signal handlers");
                std::process::exit(2);
            }
        };

        loop {
            select! {
                name = stop.recv() => {
                    info!(signal = name, "stop signal received, shutting down");
                    break;
                }
                _ = tick.tick() => session.run_cycle().await,
            }
        }
    }

    // ---- Shutdown: hentikan task lain, flush state ----
    let _ = shutdown_tx.send(true);
    let flushed = session.shutdown().await;
    if let Some(handle) = poller {
        let _ = handle.await;
    }
    info!(flushed, key = session.key(), pnl = %session.state().pnl, "bye");
}
