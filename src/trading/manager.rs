use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SideSettings;
use crate::error::BotError;
use crate::exchange::{OrderSide, OrderStatus, SharedGateway};
use crate::models::{CloseReason, ClosedTrade, Position, Side};
use crate::notify::SharedNotifier;
use crate::state::BotState;

/// Entries are refused while the account holds less than this many quote
/// units. Matches the exchange-side minimum order value.
const MIN_NOTIONAL: f64 = 5.0;

/// Owns the open and close protocol for both position slots. All slot
/// transitions funnel through here so that an entry or exit is attempted at
/// most once per trade.
pub struct PositionManager {
    gateway: SharedGateway,
    state: Arc<BotState>,
    notifier: SharedNotifier,
}

impl PositionManager {
    pub fn new(gateway: SharedGateway, state: Arc<BotState>, notifier: SharedNotifier) -> Self {
        Self {
            gateway,
            state,
            notifier,
        }
    }

    /// Opens a market position staking `size` quote units. Returns
    /// `Ok(None)` when the slot is already taken; any exchange failure rolls
    /// the slot back to flat before the error surfaces.
    pub async fn open(
        &self,
        side: Side,
        settings: &SideSettings,
        size: f64,
    ) -> Result<Option<Position>, BotError> {
        let balance = self.gateway.get_balance().await?;
        if balance < MIN_NOTIONAL {
            return Err(BotError::InsufficientBalance {
                balance,
                required: MIN_NOTIONAL,
            });
        }

        let slot = self.state.slot(side);
        if !slot.try_begin_open().await {
            debug!("{} slot busy, entry skipped", side);
            return Ok(None);
        }

        let leverage = settings.leverage();
        if let Err(e) = self.gateway.set_leverage(&settings.symbol, leverage).await {
            slot.abort_open().await;
            return Err(e);
        }

        let entry_side = match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        };
        let order = match self
            .gateway
            .place_order(&settings.symbol, entry_side, size)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                slot.abort_open().await;
                return Err(e);
            }
        };
        if order.status != OrderStatus::Filled || order.remaining_size > 0.0 {
            slot.abort_open().await;
            return Err(BotError::OrderRejected(format!(
                "entry order {} ended {:?} with {} unfilled",
                order.id, order.status, order.remaining_size
            )));
        }

        let entry_price = match order.fill_price.filter(|p| *p > 0.0) {
            Some(p) => p,
            None => self.state.market().await.last_price,
        };
        if entry_price <= 0.0 {
            // no price to anchor TP/SL on; unwind the fill instead of
            // holding a position we cannot level
            let unwind_side = match entry_side {
                OrderSide::Buy => OrderSide::Sell,
                OrderSide::Sell => OrderSide::Buy,
            };
            if order.filled_size > 0.0 {
                if let Err(e) = self
                    .gateway
                    .close_position(&settings.symbol, unwind_side, order.filled_size)
                    .await
                {
                    warn!("Unwind of unpriced {} entry failed: {}", side, e);
                }
            }
            slot.abort_open().await;
            return Err(BotError::OrderRejected(format!(
                "entry order {} reported no usable fill price",
                order.id
            )));
        }
        let position = Position::new(
            &settings.symbol,
            side,
            entry_price,
            size,
            leverage,
            settings.tp_percent,
            settings.sl_percent,
        )
        .with_contracts(order.filled_size);
        slot.commit_open(position.clone()).await;

        info!(
            "Opened {} {} @ {:.6} (stake {:.2}, x{})",
            side, position.symbol, entry_price, size, leverage
        );
        let tp = fmt_level(position.tp_price);
        let sl = fmt_level(position.sl_price);
        self.notifier
            .notify(&format!(
                "Opened {} {} @ {:.6}\nstake {:.2} x{} | tp {} sl {}",
                side, position.symbol, entry_price, size, leverage, tp, sl
            ))
            .await;

        Ok(Some(position))
    }

    /// Closes the open position on `side` with a single opposite-side
    /// reduce-only market order for the quantity filled at entry. The slot
    /// always returns to flat and the trade is counted, even when the
    /// exchange refuses the exit; the caller gets `CloseFailed` in that case
    /// and the operator reconciles by hand.
    pub async fn close(
        &self,
        side: Side,
        exit_price: f64,
        reason: CloseReason,
    ) -> Result<Option<ClosedTrade>, BotError> {
        let slot = self.state.slot(side);
        let position = match slot.begin_close().await {
            Some(p) => p,
            None => return Ok(None),
        };

        let exit_side = match side {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        };
        let order = self
            .gateway
            .close_position(&position.symbol, exit_side, position.contracts)
            .await;

        let profit = position.profit_at(exit_price);
        self.state.counters.record(side, profit > 0.0);
        self.state.record_trade_profit(profit).await;
        slot.finish_close().await;

        match order {
            Err(e) => {
                warn!("Failed to close {} {}: {}", side, position.symbol, e);
                self.notifier
                    .notify(&format!(
                        "FAILED to close {} {} ({}): {}",
                        side, position.symbol, reason, e
                    ))
                    .await;
                Err(BotError::CloseFailed(e.to_string()))
            }
            Ok(_) => {
                self.verify_flat(side, &position).await;
                info!(
                    "Closed {} {} @ {:.6} ({}) profit {:+.4}",
                    side, position.symbol, exit_price, reason, profit
                );
                self.notifier
                    .notify(&format!(
                        "Closed {} {} @ {:.6} ({})\nprofit {:+.4} | {}",
                        side,
                        position.symbol,
                        exit_price,
                        reason,
                        profit,
                        self.state.counters.snapshot()
                    ))
                    .await;
                Ok(Some(ClosedTrade {
                    position,
                    exit_price,
                    profit,
                    reason,
                }))
            }
        }
    }

    /// Running profit of the open position on `side` at `price`, stored for
    /// display. None when the slot is flat.
    pub async fn unrealized(&self, side: Side, price: f64) -> Option<f64> {
        let position = self.state.slot(side).current().await?;
        let profit = position.profit_at(price);
        self.state.set_unrealized(profit).await;
        Some(profit)
    }

    /// Exchange-side size should be zero after a close, unless the opposite
    /// slot holds the same contract.
    async fn verify_flat(&self, side: Side, position: &Position) {
        let other = self.state.slot(side.opposite()).current().await;
        if other.map(|p| p.symbol == position.symbol).unwrap_or(false) {
            return;
        }
        match self.gateway.get_position(&position.symbol).await {
            Ok(info) if info.size != 0.0 => {
                warn!(
                    "Residual exposure on {} after close: size {}",
                    position.symbol, info.size
                );
            }
            Ok(_) => {}
            Err(e) => debug!("Post-close position check failed: {}", e),
        }
    }
}

fn fmt_level(level: Option<f64>) -> String {
    match level {
        Some(p) => format!("{:.6}", p),
        None => "off".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use crate::test_helpers::{default_test_config, MockGateway};
    use std::sync::atomic::Ordering;

    fn setup() -> (Arc<MockGateway>, Arc<BotState>, PositionManager) {
        let gateway = Arc::new(MockGateway::new());
        let state = Arc::new(BotState::new());
        let manager = PositionManager::new(gateway.clone(), state.clone(), Arc::new(LogNotifier));
        (gateway, state, manager)
    }

    #[tokio::test]
    async fn open_fills_and_tracks() {
        let (gateway, state, manager) = setup();
        gateway.set_price(0.08);
        let cfg = default_test_config();

        let opened = manager
            .open(Side::Long, &cfg.long, 100.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(opened.side, Side::Long);
        assert!((opened.entry_price - 0.08).abs() < 1e-12);
        assert!((opened.size - 100.0).abs() < 1e-9);
        assert!((opened.contracts - 1250.0).abs() < 1e-9);
        assert_eq!(opened.leverage, 15);
        assert!((opened.tp_price.unwrap() - 0.08 * 1.01).abs() < 1e-12);
        assert!((opened.sl_price.unwrap() - 0.08 * 0.983).abs() < 1e-12);

        assert!(!state.slot(Side::Long).is_flat().await);
        assert_eq!(gateway.order_count(), 1);
        let (symbol, order_side, notional) = gateway.orders.lock().unwrap()[0].clone();
        assert_eq!(symbol, "DOGE_USDT");
        assert_eq!(order_side, OrderSide::Buy);
        assert!((notional - 100.0).abs() < 1e-9);
        let leverage_calls = gateway.leverage_calls.lock().unwrap();
        assert_eq!(leverage_calls[0], ("DOGE_USDT".to_string(), 15));
    }

    #[tokio::test]
    async fn open_requires_min_balance() {
        let (gateway, state, manager) = setup();
        gateway.set_balance(4.0);
        let cfg = default_test_config();

        let err = manager
            .open(Side::Long, &cfg.long, 0.4)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BotError::InsufficientBalance {
                balance: 4.0,
                required: 5.0
            }
        );
        assert!(state.slot(Side::Long).is_flat().await);
        assert_eq!(gateway.order_count(), 0);
    }

    #[tokio::test]
    async fn open_rolls_back_when_order_fails() {
        let (gateway, state, manager) = setup();
        gateway.fail_orders.store(true, Ordering::SeqCst);
        let cfg = default_test_config();

        let err = manager
            .open(Side::Short, &cfg.short, 100.0)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::OrderRejected(_)));
        assert!(state.slot(Side::Short).is_flat().await);
    }

    #[tokio::test]
    async fn open_skips_when_slot_busy() {
        let (gateway, state, manager) = setup();
        let cfg = default_test_config();
        assert!(state.slot(Side::Long).try_begin_open().await);

        let result = manager.open(Side::Long, &cfg.long, 100.0).await.unwrap();
        assert!(result.is_none());
        assert_eq!(gateway.order_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_opens_yield_one_position() {
        let (gateway, _state, manager) = setup();
        let cfg = default_test_config();

        let (a, b) = tokio::join!(
            manager.open(Side::Long, &cfg.long, 50.0),
            manager.open(Side::Long, &cfg.long, 50.0),
        );
        let opened = [a.unwrap(), b.unwrap()];
        assert_eq!(opened.iter().filter(|o| o.is_some()).count(), 1);
        assert_eq!(gateway.order_count(), 1);
    }

    #[tokio::test]
    async fn close_round_trip_records_a_win() {
        let (gateway, state, manager) = setup();
        gateway.set_price(0.08);
        let cfg = default_test_config();

        let opened = manager
            .open(Side::Long, &cfg.long, 100.0)
            .await
            .unwrap()
            .unwrap();
        let exit = opened.entry_price * 1.01;
        let trade = manager
            .close(Side::Long, exit, CloseReason::TakeProfit)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(trade.reason, CloseReason::TakeProfit);
        assert!(trade.profit > 0.0);
        assert!(state.slot(Side::Long).is_flat().await);

        let counters = state.counters.snapshot();
        assert_eq!(counters.long_success, 1);
        assert_eq!(counters.total(), 1);

        assert_eq!(gateway.order_count(), 2);
        let (_, exit_side, contracts) = gateway.orders.lock().unwrap()[1].clone();
        assert_eq!(exit_side, OrderSide::Sell);
        assert!((contracts - 1250.0).abs() < 1e-9);

        let market = state.market().await;
        assert!((market.last_trade_profit - trade.profit).abs() < 1e-9);
        assert!(market.unrealized_profit.abs() < 1e-12);
    }

    #[tokio::test]
    async fn close_reuses_the_entry_quantity() {
        let (gateway, _state, manager) = setup();
        gateway.set_price(0.08);
        let cfg = default_test_config();

        let opened = manager
            .open(Side::Long, &cfg.long, 100.0)
            .await
            .unwrap()
            .unwrap();
        assert!((opened.contracts - 1250.0).abs() < 1e-9);

        // converting the stake at the risen price would give 1237, not 1250
        gateway.set_price(0.0808);
        manager
            .close(Side::Long, 0.0808, CloseReason::TakeProfit)
            .await
            .unwrap()
            .unwrap();

        let (_, exit_side, contracts) = gateway.orders.lock().unwrap()[1].clone();
        assert_eq!(exit_side, OrderSide::Sell);
        assert!(
            (contracts - 1250.0).abs() < 1e-9,
            "the exit must carry the entry fill quantity, got {}",
            contracts
        );
    }

    #[tokio::test]
    async fn open_aborts_without_a_usable_entry_price() {
        let (gateway, state, manager) = setup();
        gateway.set_price(0.08);
        gateway.blank_fills.store(true, Ordering::SeqCst);
        let cfg = default_test_config();

        // nothing has primed the market cache, so there is no fallback
        let err = manager
            .open(Side::Long, &cfg.long, 100.0)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::OrderRejected(_)));
        assert!(state.slot(Side::Long).is_flat().await);
        assert_eq!(state.counters.snapshot().total(), 0);

        // the fill that did land was unwound, not left dangling
        assert_eq!(gateway.order_count(), 2);
        let (_, unwind_side, contracts) = gateway.orders.lock().unwrap()[1].clone();
        assert_eq!(unwind_side, OrderSide::Sell);
        assert!((contracts - 1250.0).abs() < 1e-9);

        // a warm cache gives the same blank fill a price to fall back on
        state.set_last_price(0.08).await;
        let opened = manager
            .open(Side::Long, &cfg.long, 100.0)
            .await
            .unwrap()
            .unwrap();
        assert!((opened.entry_price - 0.08).abs() < 1e-12);
        assert!(opened.tp_price.unwrap() > 0.08);
    }

    #[tokio::test]
    async fn order_fill_price_beats_the_ticker() {
        let (gateway, _state, manager) = setup();
        gateway.set_price(0.08);
        *gateway.fill_price.lock().unwrap() = Some(0.0805);
        let cfg = default_test_config();

        let opened = manager
            .open(Side::Long, &cfg.long, 100.0)
            .await
            .unwrap()
            .unwrap();
        assert!((opened.entry_price - 0.0805).abs() < 1e-12);
        // the quantity still reflects what actually filled
        assert!((opened.contracts - 1250.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn close_when_flat_is_noop() {
        let (_gateway, state, manager) = setup();
        let result = manager
            .close(Side::Short, 1.0, CloseReason::StopLoss)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(state.counters.snapshot().total(), 0);
    }

    #[tokio::test]
    async fn failed_close_still_frees_the_slot() {
        let (gateway, state, manager) = setup();
        gateway.set_price(0.08);
        let cfg = default_test_config();

        let opened = manager
            .open(Side::Long, &cfg.long, 100.0)
            .await
            .unwrap()
            .unwrap();
        gateway.fail_orders.store(true, Ordering::SeqCst);

        let err = manager
            .close(Side::Long, opened.entry_price * 0.983, CloseReason::StopLoss)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::CloseFailed(_)));
        assert!(state.slot(Side::Long).is_flat().await);
        assert_eq!(state.counters.snapshot().long_fail, 1);

        // a second close finds nothing to do
        let result = manager
            .close(Side::Long, 1.0, CloseReason::StopLoss)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(state.counters.snapshot().total(), 1);
    }

    #[tokio::test]
    async fn unrealized_tracks_open_position() {
        let (gateway, state, manager) = setup();
        gateway.set_price(0.08);
        let cfg = default_test_config();

        let opened = manager
            .open(Side::Long, &cfg.long, 100.0)
            .await
            .unwrap()
            .unwrap();
        let profit = manager
            .unrealized(Side::Long, opened.entry_price * 1.005)
            .await
            .unwrap();
        assert!(profit > 0.0);
        assert!((state.market().await.unrealized_profit - profit).abs() < 1e-9);

        assert!(manager.unrealized(Side::Short, 1.0).await.is_none());
    }
}
