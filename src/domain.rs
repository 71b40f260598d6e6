// ===============================
// src/domain.rs
// ===============================
/*
=============================================================================
Project : qflow_bot — Telegram status relay for a Bybit trading account
Module  : domain.rs
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
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Format timestamp yang dipakai di dokumen state dan pesan Telegram (UTC).
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_ts(ts: DateTime<Utc>) -> String { ts.format(TS_FORMAT).to_string() }
pub fn now_ts() -> String { fmt_ts(Utc::now()) }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment { Testnet, Mainnet }

impl Environment {
    pub fn from_testnet_flag(use_testnet: bool) -> Self {
        if use_testnet { Environment::Testnet } else { Environment::Mainnet }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Testnet => "TESTNET",
            Environment::Mainnet => "MAINNET",
        }
    }

    /// Nama file state di store; satu dokumen per environment.
    pub fn state_key(&self) -> &'static str {
        match self {
            Environment::Testnet => "bot_state_testnet.json",
            Environment::Mainnet => "bot_state_mainnet.json",
        }
    }

    pub fn message_prefix(&self) -> &'static str {
        match self {
            Environment::Testnet => "🧪 TESTNET: ",
            Environment::Mainnet => "🚀 LIVE: ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side { Long, Short }

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self { Side::Long => "LONG", Side::Short => "SHORT" }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub size: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub current_price: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: Side,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub exit_price: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub pnl: Decimal,
    pub timestamp: String,
}

/// Dokumen state yang dipersist ke store (selalu ditimpa penuh, bukan diff).
///
/// Semua field selain `environment` punya default supaya dokumen lama
/// (tanpa `today_trades` / `last_update`) tetap bisa dibaca. Field yang tidak
/// dikenal (mis. `last_run`) diabaikan dan hilang pada checkpoint berikutnya.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotState {
    environment: Environment,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    pub balance: Decimal,
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub daily_trades: u32,
    #[serde(default)]
    pub today_trades: Vec<Trade>,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    pub pnl: Decimal,
    #[serde(default)]
    pub last_update: String,
    /// Hari (UTC) pemilik counter harian; `None` untuk dokumen lama.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trading_day: Option<NaiveDate>,
}

impl BotState {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            balance: Decimal::ZERO,
            positions: BTreeMap::new(),
            daily_trades: 0,
            today_trades: Vec::new(),
            pnl: Decimal::ZERO,
            last_update: String::new(),
            trading_day: None,
        }
    }

    pub fn environment(&self) -> Environment { self.environment }

    pub fn open_positions(&self) -> usize { self.positions.len() }

    /// Encoding JSON kanonik: urutan field tetap, key posisi terurut.
    pub fn to_document(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_document(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// Journal events (ditulis recorder sebagai JSONL)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Cycle { ts: String, environment: Environment },
    Trade(Trade),
    Checkpoint { ts: String, key: String, ok: bool },
    Note(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn state_keys_follow_environment() {
        assert_eq!(Environment::Testnet.state_key(), "bot_state_testnet.json");
        assert_eq!(Environment::Mainnet.state_key(), "bot_state_mainnet.json");
        assert_eq!(Environment::from_testnet_flag(false), Environment::Mainnet);
    }

    #[test]
    fn legacy_document_without_trade_log_loads() {
        let raw = br#"{"environment":"TESTNET","last_run":null,"positions":{},"daily_trades":3,"balance":0,"pnl":-1.25}"#;
        let st = BotState::from_document(raw).expect("legacy doc");
        assert_eq!(st.environment(), Environment::Testnet);
        assert_eq!(st.daily_trades, 3);
        assert_eq!(st.balance, Decimal::ZERO);
        assert_eq!(st.pnl, dec!(-1.25));
        assert!(st.today_trades.is_empty());
        assert!(st.trading_day.is_none());

        // field yang tidak dikenal (last_run) tidak ditulis ulang
        let v: serde_json::Value = serde_json::from_slice(&st.to_document().unwrap()).unwrap();
        assert!(v.get("last_run").is_none());
        assert_eq!(v["daily_trades"], 3);
    }

    #[test]
    fn document_uses_wire_field_names() {
        let mut st = BotState::new(Environment::Mainnet);
        st.pnl = dec!(12.5);
        st.positions.insert(
            "GBPUSD".into(),
            Position {
                side: Side::Short,
                size: dec!(0.01),
                entry_price: dec!(1.27),
                current_price: dec!(1.26),
                unrealized_pnl: dec!(0.0001),
            },
        );
        st.today_trades.push(Trade {
            symbol: "EURUSD".into(),
            kind: Side::Long,
            entry_price: dec!(1.08),
            exit_price: dec!(1.09),
            pnl: dec!(12.5),
            timestamp: "2025-03-29 18:13:19".into(),
        });

        let v: serde_json::Value = serde_json::from_slice(&st.to_document().unwrap()).unwrap();
        assert_eq!(v["environment"], "MAINNET");
        assert_eq!(v["pnl"], 12.5);
        assert_eq!(v["positions"]["GBPUSD"]["side"], "SHORT");
        assert_eq!(v["today_trades"][0]["type"], "LONG");
        assert!(v.get("trading_day").is_none());

        let back = BotState::from_document(&st.to_document().unwrap()).unwrap();
        assert_eq!(back, st);
    }
}
