// ===============================
// src/commands.rs (read-only chat commands)
// ===============================
/*
=============================================================================
Project : qflow_bot — Telegram status relay for a Bybit trading account
Module  : commands.rs
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
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{fmt_ts, BotState};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command { Start, Balance, Status, Positions, Trades, Help, Version }

impl Command {
    /// "/status", "/status@QuantumFlowBot extra" -> Status
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?.strip_prefix('/')?;
        let name = word.split('@').next().unwrap_or(word);
        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Command::Start),
            "balance" => Some(Command::Balance),
            "status" => Some(Command::Status),
            "positions" => Some(Command::Positions),
            "trades" => Some(Command::Trades),
            "help" => Some(Command::Help),
            "version" => Some(Command::Version),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Balance => "balance",
            Command::Status => "status",
            Command::Positions => "positions",
            Command::Trades => "trades",
            Command::Help => "help",
            Command::Version => "version",
        }
    }
}

const COMMAND_LIST: &str = "/balance - Check balance\n\
/status - Check status\n\
/positions - View open positions\n\
/trades - View today's trades\n\
/help - Show this help\n\
/version - Show version info";

/// Dua desimal tetap, mis. 12.5 -> "12.50"
pub fn money(d: Decimal) -> String {
    let mut r = d.round_dp(2);
    r.rescale(2);
    r.to_string()
}

/// Escape karakter entity Markdown (legacy) untuk teks dari data state.
pub fn md_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn render(cmd: Command, state: &BotState, now: DateTime<Utc>) -> String {
    match cmd {
        Command::Start => format!(
            "🚀 *Welcome to QuantumFlow Elite Bot!*\n\n\
             Relaying the {} account. Use these commands:\n{}",
            state.environment().as_str(),
            COMMAND_LIST
        ),
        Command::Help => format!("ℹ️ *QuantumFlow Elite Bot Help*\n\nAvailable commands:\n/start - Start the bot\n{COMMAND_LIST}"),
        Command::Version => format!(
            "🤖 *QuantumFlow Elite Bot*\n\nVersion: {VERSION}\nEnvironment: {}",
            state.environment().as_str()
        ),
        Command::Balance => format!(
            "💰 *Account Balance*\n\nBalance: ${}\nP/L: ${}",
            money(state.balance),
            money(state.pnl)
        ),
        Command::Status => {
            let last = if state.last_update.is_empty() { "never".to_string() } else { md_escape(&state.last_update) };
            format!(
                "📊 *Bot Status*\n\n\
                 Environment: {}\n\
                 Status: Running\n\
                 Open Positions: {}\n\
                 Today's Trades: {}\n\
                 P/L: ${}\n\
                 Last Update: {}\n\
                 Last Check: {} UTC",
                state.environment().as_str(),
                state.open_positions(),
                state.daily_trades,
                money(state.pnl),
                last,
                fmt_ts(now)
            )
        }
        Command::Positions => {
            if state.positions.is_empty() {
                return "📈 *Open Positions*\n\nNo open positions".to_string();
            }
            let mut out = String::from("📈 *Open Positions*\n");
            for (symbol, p) in &state.positions {
                let _ = write!(
                    out,
                    "\n{} {} size {} @ {} (now {}, uPnL ${})",
                    md_escape(symbol),
                    p.side.as_str(),
                    p.size.normalize(),
                    p.entry_price.normalize(),
                    p.current_price.normalize(),
                    money(p.unrealized_pnl)
                );
            }
            out
        }
        Command::Trades => {
            if state.today_trades.is_empty() {
                return "🎯 *Today's Trades*\n\nNo trades today".to_string();
            }
            let mut out = format!("🎯 *Today's Trades* ({})\n", state.daily_trades);
            for t in &state.today_trades {
                let _ = write!(
                    out,
                    "\n{} {} {} -> {} P/L ${} ({})",
                    md_escape(&t.symbol),
                    t.kind.as_str(),
                    t.entry_price.normalize(),
                    t.exit_price.normalize(),
                    money(t.pnl),
                    md_escape(&t.timestamp)
                );
            }
            out
        }
    }
}

pub fn unknown_reply() -> String {
    "❓ Unknown command. Send /help for the list of commands.".to_string()
}

/// Ringkasan yang dikirim setelah tiap cycle.
pub fn status_update(state: &BotState, now: DateTime<Utc>) -> String {
    format!(
        "📊 *Status Update*\n\n\
         🕒 Time: {} UTC\n\
         💰 Balance: ${}\n\
         📈 Open Positions: {}\n\
         🎯 Today's Trades: {}\n\
         📗 P/L: ${}",
        fmt_ts(now),
        money(state.balance),
        state.open_positions(),
        state.daily_trades,
        money(state.pnl)
    )
}
