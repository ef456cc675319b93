use chrono::{DateTime, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, SharedConfig};
use crate::core::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::error::BotError;
use crate::exchange::SharedGateway;
use crate::models::{CandleSeries, DisabledSide, Interval, Position, Side};
use crate::notify::SharedNotifier;
use crate::state::BotState;
use crate::strategies::SignalEvaluator;
use crate::trading::{PositionManager, PositionMonitor};

/// Transient fetch failures are retried this many times per tick before the
/// tick gives up and waits for the next round.
const RETRY_BUDGET: u32 = 3;
/// Longest single sleep while waiting out an unfinished candle, so shutdown
/// stays responsive.
const MAX_CANDLE_WAIT_SECS: u64 = 60;

/// Top-level controller: owns the poll loop, spawns one monitor task per
/// open position and wires config, state, gateway and notifier together.
pub struct TradingBot {
    config: SharedConfig,
    state: Arc<BotState>,
    gateway: SharedGateway,
    notifier: SharedNotifier,
    manager: Arc<PositionManager>,
    engine: IndicatorEngine,
    evaluator: SignalEvaluator,
    shutdown: CancellationToken,
    monitors: Vec<JoinHandle<()>>,
}

impl TradingBot {
    pub async fn new(
        config: SharedConfig,
        gateway: SharedGateway,
        notifier: SharedNotifier,
    ) -> Self {
        let cfg = config.read().await.clone();

        info!("{}", "=".repeat(60));
        info!("Futures signal bot starting up");
        info!("Data source: {}", cfg.data_source);
        info!(
            "Interval: {} | poll every {}s | candle gate: {}",
            cfg.interval,
            cfg.poll_interval_secs,
            if cfg.wait_for_candle_close { "on" } else { "off" }
        );
        for side in [Side::Long, Side::Short] {
            let s = cfg.side(side);
            info!(
                "  {}: {} rsi {} {:?} | tp {:?} sl {:?} | x{}",
                side,
                s.symbol,
                s.rsi_condition,
                s.rsi_threshold,
                s.tp_percent,
                s.sl_percent,
                s.leverage()
            );
        }
        if cfg.disabled_side != DisabledSide::None_ {
            info!("Disabled side: {}", cfg.disabled_side);
        }
        info!("{}", "=".repeat(60));

        let state = Arc::new(BotState::new());
        let manager = Arc::new(PositionManager::new(
            gateway.clone(),
            state.clone(),
            notifier.clone(),
        ));

        Self {
            config,
            state,
            gateway,
            notifier,
            manager,
            engine: IndicatorEngine::new(),
            evaluator: SignalEvaluator::new(),
            shutdown: CancellationToken::new(),
            monitors: Vec::new(),
        }
    }

    pub fn state(&self) -> Arc<BotState> {
        self.state.clone()
    }

    /// Validates the configured symbols, adopts any position the exchange
    /// already holds and marks the bot running. A second call while running
    /// is a no-op.
    pub async fn start(&mut self) -> Result<(), BotError> {
        if self.state.is_running() {
            return Ok(());
        }

        let cfg = self.config.read().await.clone();
        for symbol in unique_symbols(&cfg) {
            if !self.gateway.symbol_exists(&symbol).await? {
                return Err(BotError::UnknownSymbol(symbol));
            }
        }

        // prime the last price so early closes have a fallback
        if let Ok(price) = self.gateway.last_price(&cfg.long.symbol).await {
            self.state.set_last_price(price).await;
        }

        // a fresh token per start keeps stop/start cycles independent
        self.shutdown = CancellationToken::new();
        self.reconcile(&cfg).await;
        self.state.set_running(true);
        info!("Bot started");
        self.notifier.notify("Bot started").await;
        Ok(())
    }

    /// Stops the loop and cancels every monitor. Monitors close their
    /// positions on the way out; this waits for all of them.
    pub async fn stop(&mut self) {
        if !self.state.is_running() {
            return;
        }
        info!("Shutting down...");
        self.state.set_running(false);
        self.shutdown.cancel();
        for handle in self.monitors.drain(..) {
            if let Err(e) = handle.await {
                warn!("Monitor task failed: {}", e);
            }
        }
        self.print_status().await;
        self.notifier
            .notify(&format!(
                "Bot stopped ({})",
                self.state.counters.snapshot()
            ))
            .await;
        info!("Bot stopped.");
    }

    pub async fn run(&mut self) -> Result<(), BotError> {
        self.start().await?;
        info!("Bot is now running. Press Ctrl+C to stop.");
        self.print_status().await;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    self.stop().await;
                    return Ok(());
                }
                _ = self.tick() => {}
            }
        }
    }

    /// One round of the poll loop: refresh balance and indicators, evaluate
    /// both sides, open what qualifies, then sleep out the poll interval.
    pub async fn tick(&mut self) {
        let cfg = self.config.read().await.clone();
        if !self.state.is_running() {
            tokio::time::sleep(Duration::from_secs(cfg.poll_interval_secs.max(1))).await;
            return;
        }

        self.monitors.retain(|h| !h.is_finished());

        if cfg.wait_for_candle_close {
            let remaining = time_until_candle_close(Utc::now(), cfg.interval);
            if remaining < cfg.interval.as_seconds() {
                debug!("Candle closes in {}s, holding entries", remaining);
                tokio::time::sleep(Duration::from_secs(remaining.min(MAX_CANDLE_WAIT_SECS)))
                    .await;
                return;
            }
        }

        let balance = match self.fetch_balance_with_retry().await {
            Some(b) => b,
            None => {
                self.notifier
                    .notify("Exchange unreachable, skipping this round")
                    .await;
                tokio::time::sleep(Duration::from_secs(cfg.poll_interval_secs.max(1))).await;
                return;
            }
        };

        let mut snapshots: HashMap<String, IndicatorSnapshot> = HashMap::new();
        let mut closes: HashMap<String, f64> = HashMap::new();
        for symbol in unique_symbols(&cfg) {
            let series = match self
                .fetch_candles_with_retry(&symbol, cfg.interval, cfg.candle_limit)
                .await
            {
                Some(s) => s,
                None => continue,
            };
            if let Some(last) = series.last() {
                closes.insert(symbol.clone(), last.close);
            }
            match self.engine.snapshot(&series) {
                Ok(snap) => {
                    snapshots.insert(symbol.clone(), snap);
                }
                Err(e) => debug!("Indicators unavailable for {}: {}", symbol, e),
            }
        }

        let last_price = match closes.get(&cfg.long.symbol).or_else(|| closes.values().next()) {
            Some(p) => *p,
            None => self.state.market().await.last_price,
        };
        let primary = snapshots.get(&cfg.long.symbol).copied();
        self.state.update_market(balance, last_price, primary).await;

        let hour = Utc::now().hour();
        for side in [Side::Long, Side::Short] {
            let settings = cfg.side(side);
            let snapshot = match snapshots.get(&settings.symbol) {
                Some(s) => s,
                None => continue,
            };
            let has_open = !self.state.slot(side).is_flat().await;
            if !self
                .evaluator
                .should_open(side, settings, cfg.disabled_side, snapshot, hour, has_open)
            {
                continue;
            }

            let stake = balance * cfg.entry_fraction;
            info!(
                "{} entry signal on {} (rsi {:.2}, stake {:.2})",
                side, settings.symbol, snapshot.rsi, stake
            );
            match self.manager.open(side, settings, stake).await {
                Ok(Some(position)) => self.spawn_monitor(position).await,
                Ok(None) => {}
                Err(e) => {
                    warn!("Entry {} failed: {}", side, e);
                    self.notifier
                        .notify(&format!("Entry {} failed: {}", side, e))
                        .await;
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(cfg.poll_interval_secs)).await;
    }

    pub async fn print_status(&self) {
        let market = self.state.market().await;
        let counters = self.state.counters.snapshot();

        info!("Balance: {:.4}", market.balance);
        info!("Last price: {:.6}", market.last_price);
        if let Some(snap) = market.snapshot {
            info!(
                "RSI {:.2} | ma {:+.4} | boll {:+.4} | vol {:.3}",
                snap.rsi, snap.ma_distance, snap.bollinger_break, snap.volatility
            );
        }
        info!("Trades: {} ({})", counters.total(), counters);
        info!(
            "Unrealized: {:+.4} | last trade: {:+.4}",
            market.unrealized_profit, market.last_trade_profit
        );
        for side in [Side::Long, Side::Short] {
            if let Some(p) = self.state.slot(side).current().await {
                info!(
                    "Open {}: {} @ {:.6} stake {:.2} x{}",
                    side, p.symbol, p.entry_price, p.size, p.leverage
                );
            }
        }
    }

    /// Adopts whatever the exchange already holds so a restart keeps
    /// managing open positions instead of orphaning them. TP/SL levels are
    /// rebuilt from the reported entry price and the current settings.
    async fn reconcile(&mut self, cfg: &Config) {
        for side in [Side::Long, Side::Short] {
            let settings = cfg.side(side);
            let info = match self.gateway.get_position(&settings.symbol).await {
                Ok(i) => i,
                Err(e) => {
                    warn!("Reconciliation failed for {}: {}", settings.symbol, e);
                    continue;
                }
            };
            let matches_side = match side {
                Side::Long => info.size > 0.0,
                Side::Short => info.size < 0.0,
            };
            if !matches_side {
                continue;
            }

            let entry_price = match info.entry_price {
                Some(p) => p,
                None => self.state.market().await.last_price,
            };
            if entry_price <= 0.0 {
                warn!("Cannot adopt {} {}: no entry price", side, settings.symbol);
                continue;
            }

            let stake = info.size.abs() * entry_price;
            let position = Position::new(
                &settings.symbol,
                side,
                entry_price,
                stake,
                settings.leverage(),
                settings.tp_percent,
                settings.sl_percent,
            )
            .with_contracts(info.size.abs());
            if self.state.slot(side).adopt(position.clone()).await {
                warn!(
                    "Adopted existing {} {} @ {:.6} (stake {:.2})",
                    side, settings.symbol, entry_price, stake
                );
                self.notifier
                    .notify(&format!(
                        "Adopted existing {} {} @ {:.6}",
                        side, settings.symbol, entry_price
                    ))
                    .await;
                self.spawn_monitor(position).await;
            }
        }
    }

    async fn spawn_monitor(&mut self, position: Position) {
        let interval = Duration::from_millis(self.config.read().await.monitor_interval_ms);
        let handle = PositionMonitor::new(
            self.manager.clone(),
            self.gateway.clone(),
            self.state.clone(),
            self.shutdown.clone(),
            interval,
            position,
        )
        .spawn();
        self.monitors.push(handle);
    }

    async fn fetch_balance_with_retry(&self) -> Option<f64> {
        for attempt in 1..=RETRY_BUDGET {
            match self.gateway.get_balance().await {
                Ok(b) => return Some(b),
                Err(e) => {
                    warn!(
                        "Balance fetch attempt {}/{} failed: {}",
                        attempt, RETRY_BUDGET, e
                    );
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
        None
    }

    async fn fetch_candles_with_retry(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Option<CandleSeries> {
        for attempt in 1..=RETRY_BUDGET {
            match self.gateway.fetch_candles(symbol, interval, limit).await {
                Ok(series) => return Some(series),
                Err(e) => {
                    warn!(
                        "Candle fetch attempt {}/{} for {} failed: {}",
                        attempt, RETRY_BUDGET, symbol, e
                    );
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
        None
    }
}

fn unique_symbols(cfg: &Config) -> Vec<String> {
    let mut symbols = vec![cfg.long.symbol.clone()];
    if cfg.short.symbol != cfg.long.symbol {
        symbols.push(cfg.short.symbol.clone());
    }
    symbols
}

/// Seconds until the candle containing `now` closes. Exactly on a boundary
/// this returns the full interval: the previous candle just finished, so the
/// caller should evaluate rather than wait.
pub fn time_until_candle_close(now: DateTime<Utc>, interval: Interval) -> u64 {
    let secs = interval.as_seconds();
    let elapsed = now.timestamp().rem_euclid(secs as i64) as u64;
    secs - elapsed
}
