use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};

use crate::core::indicators::IndicatorSnapshot;
use crate::models::{Position, Side};

/// Lifecycle of a per-side slot. `Opening` and `Closing` mark a claim held
/// between lock releases so no exchange call ever runs under the lock.
#[derive(Debug, Clone)]
pub enum SlotState {
    Flat,
    Opening,
    Open(Position),
    Closing(Position),
}

/// Owns the one position a side may hold. Every transition goes through
/// these methods; `try_begin_open` and `begin_close` are the only gates,
/// the rest are unconditional moves by whoever won the gate.
pub struct PositionSlot {
    side: Side,
    state: Mutex<SlotState>,
}

impl PositionSlot {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            state: Mutex::new(SlotState::Flat),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Claim the slot for an open. Returns false if anything already holds
    /// it, which makes concurrent entry attempts collapse to one.
    pub async fn try_begin_open(&self) -> bool {
        let mut state = self.state.lock().await;
        match *state {
            SlotState::Flat => {
                *state = SlotState::Opening;
                true
            }
            _ => false,
        }
    }

    /// Roll a failed open back to flat.
    pub async fn abort_open(&self) {
        let mut state = self.state.lock().await;
        *state = SlotState::Flat;
    }

    pub async fn commit_open(&self, position: Position) {
        let mut state = self.state.lock().await;
        *state = SlotState::Open(position);
    }

    /// Take over a position the exchange already holds. Only lands on a
    /// flat slot.
    pub async fn adopt(&self, position: Position) -> bool {
        let mut state = self.state.lock().await;
        match *state {
            SlotState::Flat => {
                *state = SlotState::Open(position);
                true
            }
            _ => false,
        }
    }

    /// Claim the open position for closing. None when there is nothing to
    /// close or a close is already underway, so a second close is a no-op.
    pub async fn begin_close(&self) -> Option<Position> {
        let mut state = self.state.lock().await;
        match &*state {
            SlotState::Open(position) => {
                let position = position.clone();
                *state = SlotState::Closing(position.clone());
                Some(position)
            }
            _ => None,
        }
    }

    pub async fn finish_close(&self) {
        let mut state = self.state.lock().await;
        *state = SlotState::Flat;
    }

    pub async fn current(&self) -> Option<Position> {
        let state = self.state.lock().await;
        match &*state {
            SlotState::Open(position) | SlotState::Closing(position) => Some(position.clone()),
            _ => None,
        }
    }

    pub async fn is_flat(&self) -> bool {
        matches!(*self.state.lock().await, SlotState::Flat)
    }
}

#[derive(Debug, Default)]
pub struct TradeCounters {
    long_success: AtomicU64,
    long_fail: AtomicU64,
    short_success: AtomicU64,
    short_fail: AtomicU64,
}

impl TradeCounters {
    pub fn record(&self, side: Side, win: bool) {
        let counter = match (side, win) {
            (Side::Long, true) => &self.long_success,
            (Side::Long, false) => &self.long_fail,
            (Side::Short, true) => &self.short_success,
            (Side::Short, false) => &self.short_fail,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            long_success: self.long_success.load(Ordering::Relaxed),
            long_fail: self.long_fail.load(Ordering::Relaxed),
            short_success: self.short_success.load(Ordering::Relaxed),
            short_fail: self.short_fail.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CounterSnapshot {
    pub long_success: u64,
    pub long_fail: u64,
    pub short_success: u64,
    pub short_fail: u64,
}

impl CounterSnapshot {
    pub fn total(&self) -> u64 {
        self.long_success + self.long_fail + self.short_success + self.short_fail
    }
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "long {}W/{}L, short {}W/{}L",
            self.long_success, self.long_fail, self.short_success, self.short_fail
        )
    }
}

/// Latest market readings, refreshed by the poll loop and the monitors.
#[derive(Debug, Clone, Default)]
pub struct MarketView {
    pub balance: f64,
    pub last_price: f64,
    pub snapshot: Option<IndicatorSnapshot>,
    pub unrealized_profit: f64,
    pub last_trade_profit: f64,
}

/// Process-wide bot state shared between the controller, the position
/// manager and the monitor tasks.
pub struct BotState {
    running: AtomicBool,
    pub counters: TradeCounters,
    long_slot: PositionSlot,
    short_slot: PositionSlot,
    market: RwLock<MarketView>,
}

impl BotState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            counters: TradeCounters::default(),
            long_slot: PositionSlot::new(Side::Long),
            short_slot: PositionSlot::new(Side::Short),
            market: RwLock::new(MarketView::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn slot(&self, side: Side) -> &PositionSlot {
        match side {
            Side::Long => &self.long_slot,
            Side::Short => &self.short_slot,
        }
    }

    pub async fn market(&self) -> MarketView {
        self.market.read().await.clone()
    }

    pub async fn update_market(
        &self,
        balance: f64,
        last_price: f64,
        snapshot: Option<IndicatorSnapshot>,
    ) {
        let mut market = self.market.write().await;
        market.balance = balance;
        market.last_price = last_price;
        market.snapshot = snapshot;
    }

    pub async fn set_last_price(&self, price: f64) {
        self.market.write().await.last_price = price;
    }

    pub async fn set_unrealized(&self, profit: f64) {
        self.market.write().await.unrealized_profit = profit;
    }

    /// Record the realized profit of a finished trade and clear the
    /// running unrealized figure.
    pub async fn record_trade_profit(&self, profit: f64) {
        let mut market = self.market.write().await;
        market.last_trade_profit = profit;
        market.unrealized_profit = 0.0;
    }
}
