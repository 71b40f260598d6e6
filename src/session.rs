// ===============================
// src/session.rs (in-memory state owner + checkpoints)
// ===============================
/*
=============================================================================
Project : qflow_bot — Telegram status relay for a Bybit trading account
Module  : session.rs
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
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::config::DailyReset;
use crate::domain::{fmt_ts, now_ts, BotState, Environment, Event, Position, Trade};
use crate::metrics::{BALANCE, CHECKPOINTS, CYCLES, JOURNAL_DROPPED, OPEN_POSITIONS, PNL, TRADES};
use crate::store::{ContentStore, LoadOutcome};
use crate::telegram::Notifier;

/// Owns the authoritative in-memory [`BotState`] for the process lifetime.
///
/// Mutations are permissive: no cross-field checks (balance may go negative,
/// positions are not capped). The in-memory copy stays the source of truth
/// even when a checkpoint fails.
pub struct BotSession {
    environment: Environment,
    key: String,
    store: ContentStore,
    notifier: Notifier,
    daily_reset: DailyReset,
    state: BotState,
    snapshot_tx: watch::Sender<BotState>,
    journal: Option<mpsc::Sender<Event>>,
}

impl BotSession {
    pub fn new(environment: Environment, store: ContentStore, notifier: Notifier, daily_reset: DailyReset) -> Self {
        let state = BotState::new(environment);
        let (snapshot_tx, _rx) = watch::channel(state.clone());
        Self {
            environment,
            key: environment.state_key().to_string(),
            store,
            notifier,
            daily_reset,
            state,
            snapshot_tx,
            journal: None,
        }
    }

    pub fn with_journal(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.journal = Some(tx);
        self
    }

    pub fn state(&self) -> &BotState { &self.state }
    pub fn key(&self) -> &str { &self.key }
    pub fn notifier(&self) -> &Notifier { &self.notifier }

    /// Read-only view for the chat layer.
    pub fn subscribe(&self) -> watch::Receiver<BotState> { self.snapshot_tx.subscribe() }

    fn record(&self, ev: Event) {
        if let Some(tx) = &self.journal {
            if let Err(e) = tx.try_send(ev) {
                JOURNAL_DROPPED.inc();
                debug!(error = %e, "journal event dropped");
            }
        }
    }

    fn publish(&self) {
        BALANCE.set(self.state.balance.to_f64().unwrap_or(0.0));
        PNL.set(self.state.pnl.to_f64().unwrap_or(0.0));
        OPEN_POSITIONS.set(self.state.open_positions() as i64);
        self.snapshot_tx.send_replace(self.state.clone());
    }

    fn touch(&mut self) {
        self.state.last_update = now_ts();
        self.publish();
    }

    /// Load stored state for this environment; fall back to an empty state
    /// when the document is absent or unreadable.
    pub async fn initialize(&mut self) {
        match self.store.load_outcome(&self.key).await {
            LoadOutcome::Found(st) if st.environment() != self.environment => {
                // Dokumen milik environment lain tidak boleh diadopsi
                error!(
                    key = %self.key,
                    stored = st.environment().as_str(),
                    expected = self.environment.as_str(),
                    "stored state tagged with another environment, starting from empty state"
                );
                self.state = BotState::new(self.environment);
            }
            LoadOutcome::Found(st) => {
                info!(
                    key = %self.key,
                    balance = %st.balance,
                    positions = st.open_positions(),
                    daily_trades = st.daily_trades,
                    "state loaded"
                );
                self.state = st;
            }
            LoadOutcome::Absent => {
                info!(key = %self.key, "no stored state, starting fresh");
                self.state = BotState::new(self.environment);
            }
            LoadOutcome::Failed(e) => {
                error!(key = %self.key, error = %e, "state load failed, starting from empty state");
                self.state = BotState::new(self.environment);
            }
        }
        self.publish();
    }

    /// Persist the current state. Failure is logged and counted only.
    pub async fn checkpoint(&self) -> bool {
        let ok = self.store.save(&self.state, &self.key).await;
        CHECKPOINTS.with_label_values(&[if ok { "ok" } else { "failed" }]).inc();
        if ok {
            info!(key = %self.key, "checkpoint saved");
        } else {
            warn!(key = %self.key, "checkpoint failed, state kept in memory only");
        }
        self.record(Event::Checkpoint { ts: now_ts(), key: self.key.clone(), ok });
        ok
    }

    /// Clear the daily counters when the UTC date moved past `trading_day`.
    /// Returns true when a reset happened.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        if self.daily_reset == DailyReset::Off {
            return false;
        }
        let today = now.date_naive();
        match self.state.trading_day {
            Some(day) if day == today => false,
            Some(day) => {
                info!(%day, %today, trades = self.state.daily_trades, "new trading day, resetting daily counters");
                self.state.daily_trades = 0;
                self.state.today_trades.clear();
                self.state.trading_day = Some(today);
                self.touch();
                true
            }
            None => {
                // Dokumen lama tanpa trading_day: anggap milik hari ini
                self.state.trading_day = Some(today);
                false
            }
        }
    }

    pub fn record_trade(&mut self, trade: Trade) {
        self.roll_day(Utc::now());
        self.state.pnl += trade.pnl;
        self.state.daily_trades += 1;
        info!(symbol = %trade.symbol, pnl = %trade.pnl, total_pnl = %self.state.pnl, "trade recorded");
        TRADES.inc();
        self.record(Event::Trade(trade.clone()));
        self.state.today_trades.push(trade);
        self.touch();
    }

    pub fn update_position(&mut self, symbol: &str, position: Position) {
        self.state.positions.insert(symbol.to_string(), position);
        self.touch();
    }

    pub fn close_position(&mut self, symbol: &str) -> Option<Position> {
        let removed = self.state.positions.remove(symbol);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub fn adjust_balance(&mut self, delta: Decimal) {
        self.state.balance += delta;
        self.touch();
    }

    /// One operating cycle: announce, roll the day, run the (empty) trading
    /// stages, checkpoint, then send the status summary.
    pub async fn run_cycle(&mut self) {
        let now = Utc::now();
        CYCLES.inc();
        self.notifier
            .notify(&format!("🔄 Starting trading cycle\nTime: {} UTC", fmt_ts(now)))
            .await;

        self.roll_day(now);
        // market data / position check / strategy: belum ada di bot ini
        self.record(Event::Cycle { ts: fmt_ts(now), environment: self.environment });

        if !self.checkpoint().await {
            self.notifier.notify("⚠️ State checkpoint failed, keeping state in memory").await;
        }
        self.notifier.notify(&commands::status_update(&self.state, Utc::now())).await;
    }

    /// Final flush before exit.
    pub async fn shutdown(&mut self) -> bool {
        info!(key = %self.key, "shutdown: flushing state");
        let ok = self.checkpoint().await;
        self.record(Event::Note(format!("shutdown flushed={ok}")));
        self.notifier
            .notify(if ok { "🛑 Bot stopped, state saved" } else { "🛑 Bot stopped, state NOT saved" })
            .await;
        ok
    }
}
