use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exchange::SharedGateway;
use crate::models::{CloseReason, Position, Side};
use crate::state::BotState;
use crate::trading::manager::PositionManager;

/// One task per open position. Polls the price, mirrors unrealized profit
/// into shared state and fires the close when a TP or SL level prints.
pub struct PositionMonitor {
    manager: Arc<PositionManager>,
    gateway: SharedGateway,
    state: Arc<BotState>,
    shutdown: CancellationToken,
    interval: Duration,
    position: Position,
}

impl PositionMonitor {
    pub fn new(
        manager: Arc<PositionManager>,
        gateway: SharedGateway,
        state: Arc<BotState>,
        shutdown: CancellationToken,
        interval: Duration,
        position: Position,
    ) -> Self {
        Self {
            manager,
            gateway,
            state,
            shutdown,
            interval,
            position,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let side = self.position.side;
        info!(
            "Monitoring {} {} from {:.6} (tp {:?} sl {:?})",
            side,
            self.position.symbol,
            self.position.entry_price,
            self.position.tp_price,
            self.position.sl_price
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.close_on_stop().await;
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            // the slot may have been closed or refilled behind our back
            if !self.still_ours().await {
                debug!("{} position gone, monitor exiting", side);
                return;
            }

            let price = match self.gateway.last_price(&self.position.symbol).await {
                Ok(p) => p,
                Err(e) => {
                    debug!("Price fetch failed in {} monitor: {}", side, e);
                    continue;
                }
            };

            self.state.set_last_price(price).await;
            let _ = self.manager.unrealized(side, price).await;

            if let Some(reason) = self.position.exit_reason(price) {
                info!(
                    "{} {} hit {} at {:.6}",
                    side, self.position.symbol, reason, price
                );
                if let Err(e) = self.manager.close(side, price, reason).await {
                    warn!("Exit for {} {} failed: {}", side, self.position.symbol, e);
                }
                return;
            }
        }
    }

    async fn still_ours(&self) -> bool {
        self.state
            .slot(self.position.side)
            .current()
            .await
            .map(|p| p.opened_at == self.position.opened_at)
            .unwrap_or(false)
    }

    /// Stop path: close at the freshest price available, falling back to the
    /// last seen price and finally the entry price.
    async fn close_on_stop(&self) {
        let side = self.position.side;
        if !self.still_ours().await {
            return;
        }

        let price = match self.gateway.last_price(&self.position.symbol).await {
            Ok(p) => p,
            Err(_) => {
                let last = self.state.market().await.last_price;
                if last > 0.0 {
                    last
                } else {
                    self.position.entry_price
                }
            }
        };

        match self.manager.close(side, price, CloseReason::ManualStop).await {
            Ok(Some(trade)) => info!(
                "Stopped {} {} with profit {:+.4}",
                side, trade.position.symbol, trade.profit
            ),
            Ok(None) => {}
            Err(e) => warn!("Stop-close failed for {}: {}", side, e),
        }
    }
}
