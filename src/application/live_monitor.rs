//! Live Monitor (spec §4.K): fast 5 s poll loop over open positions,
//! observe-only for TP/SL (never re-attaches — that's the Sentinel's job),
//! triggers partial-close, and surfaces externally-closed positions for
//! outcome reconciliation.
//!
//! Grounded in the teacher's `agents/sentinel.rs` poll/heartbeat loop shape
//! (renamed here to avoid colliding with the domain's own Sentinel, spec
//! §4.L, which is a different authority).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::info;

use crate::application::order_manager::{OrderManager, partial_close_roi_threshold};
use crate::domain::decision::Signal;
use crate::domain::ports::ExchangeGateway;
use crate::domain::position::{Position, PositionState};
use crate::domain::symbol::SymbolFilters;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
const LOG_DEBOUNCE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub enum LiveMonitorEvent {
    PositionClosedExternally { symbol: String, position: Position },
    TpslMissing { symbol: String, missing_tp: bool, missing_sl: bool },
    PartialCloseTriggered { symbol: String },
}

/// `(symbol -> last-logged-at)`, shared across poll cycles so log lines are
/// debounced at 60 s per symbol (spec §4.K).
pub type LogDebounceState = Arc<Mutex<HashMap<String, Instant>>>;

pub struct LiveMonitor {
    gateway: Arc<dyn ExchangeGateway>,
    order_manager: Arc<OrderManager>,
    poll_interval: Duration,
}

impl LiveMonitor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, order_manager: Arc<OrderManager>, poll_interval: Duration) -> Self {
        Self { gateway, order_manager, poll_interval }
    }

    /// One poll pass over every known position. Positions that close are
    /// removed from `positions` by the caller after handling the returned
    /// event (ownership of the map stays with the orchestrator).
    pub async fn poll_once(
        &self,
        positions: &mut HashMap<String, Position>,
        filters: &HashMap<String, SymbolFilters>,
        debounce: &LogDebounceState,
    ) -> Vec<LiveMonitorEvent> {
        let mut events = Vec::new();
        let symbols: Vec<String> = positions.keys().cloned().collect();

        for symbol in symbols {
            let Some(position) = positions.get(&symbol) else { continue };
            if !matches!(position.state, PositionState::Open | PositionState::Monitoring) {
                continue;
            }

            let Ok(info) = self.gateway.get_position_info(&symbol).await else { continue };

            if info.is_flat() {
                let mut closed = positions.remove(&symbol).expect("checked present above");
                let _ = closed.mark_closing();
                let _ = closed.mark_closed();
                events.push(LiveMonitorEvent::PositionClosedExternally {
                    symbol: symbol.clone(),
                    position: closed,
                });
                continue;
            }

            let open_orders = self.gateway.get_open_orders(&symbol).await.unwrap_or_default();
            let has_tp = position
                .tp_order_id
                .as_ref()
                .map(|id| open_orders.iter().any(|o| &o.order_id == id))
                .unwrap_or(false);
            let has_sl = position
                .sl_order_id
                .as_ref()
                .map(|id| open_orders.iter().any(|o| &o.order_id == id))
                .unwrap_or(false);

            if !has_tp || !has_sl {
                if self.should_log(&symbol, debounce).await {
                    events.push(LiveMonitorEvent::TpslMissing {
                        symbol: symbol.clone(),
                        missing_tp: !has_tp,
                        missing_sl: !has_sl,
                    });
                }
            }

            if !position.partial_close_done
                && roi(position.side, position.entry_price, info.mark_price) >= partial_close_roi_threshold()
            {
                if let Some(position_mut) = positions.get_mut(&symbol)
                    && let Some(sym_filters) = filters.get(&symbol)
                    && self.order_manager.schedule_partial_close(position_mut, sym_filters).await.is_ok()
                {
                    events.push(LiveMonitorEvent::PartialCloseTriggered { symbol: symbol.clone() });
                }
            }
        }

        events
    }

    async fn should_log(&self, symbol: &str, debounce: &LogDebounceState) -> bool {
        let mut state = debounce.lock().await;
        let now = Instant::now();
        let should = match state.get(symbol) {
            Some(last) => now.duration_since(*last) >= LOG_DEBOUNCE,
            None => true,
        };
        if should {
            state.insert(symbol.to_string(), now);
            info!(symbol, "live monitor: tp/sl leg missing (observe-only)");
        }
        should
    }

    /// Runs the 5 s poll loop until cancelled.
    pub async fn run(
        self,
        positions: Arc<Mutex<HashMap<String, Position>>>,
        filters: Arc<Mutex<HashMap<String, SymbolFilters>>>,
        debounce: LogDebounceState,
        mut event_tx: tokio::sync::mpsc::Sender<LiveMonitorEvent>,
    ) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            let mut positions_guard = positions.lock().await;
            let filters_guard = filters.lock().await;
            let events = self.poll_once(&mut positions_guard, &filters_guard, &debounce).await;
            drop(positions_guard);
            drop(filters_guard);
            for event in events {
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Signed ROI as a fraction of entry price, positive when favorable.
fn roi(side: Signal, entry: Decimal, mark: Decimal) -> Decimal {
    if entry.is_zero() {
        return Decimal::ZERO;
    }
    match side {
        Signal::Long => (mark - entry) / entry,
        Signal::Short => (entry - mark) / entry,
        Signal::Hold => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    use crate::domain::errors::GatewayError;
    use crate::domain::ports::{
        AccountBalance, Candle, OpenOrder, PlaceOrderParams, PlacedOrder, PositionInfo,
    };

    struct MockGateway {
        position: StdMutex<PositionInfo>,
        open_orders: StdMutex<Vec<OpenOrder>>,
    }

    #[async_trait]
    impl ExchangeGateway for MockGateway {
        async fn get_klines(&self, _: &str, _: &str, _: u32) -> Result<Vec<Candle>, GatewayError> {
            Ok(vec![])
        }
        async fn get_ticker(&self, _: &str) -> Result<Decimal, GatewayError> {
            Ok(dec!(100))
        }
        async fn get_open_orders(&self, _: &str) -> Result<Vec<OpenOrder>, GatewayError> {
            Ok(self.open_orders.lock().unwrap().clone())
        }
        async fn get_position_info(&self, _: &str) -> Result<PositionInfo, GatewayError> {
            Ok(*self.position.lock().unwrap())
        }
        async fn get_balance(&self) -> Result<AccountBalance, GatewayError> {
            Ok(AccountBalance { balance: dec!(10000), available_balance: dec!(10000) })
        }
        async fn get_book_ticker(&self, _: &str) -> Result<crate::domain::ports::BookTicker, GatewayError> {
            Ok(crate::domain::ports::BookTicker { bid_price: dec!(100), ask_price: dec!(100) })
        }
        async fn get_funding_rate(&self, _: &str) -> Result<Decimal, GatewayError> {
            Ok(Decimal::ZERO)
        }
        async fn place_order(&self, _: PlaceOrderParams) -> Result<PlacedOrder, GatewayError> {
            Ok(PlacedOrder { order_id: "x".to_string() })
        }
        async fn cancel_order(&self, _: &str, _: &str) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn set_leverage(&self, _: &str, _: u32) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn get_filters(&self, symbol: &str) -> Result<SymbolFilters, GatewayError> {
            Ok(SymbolFilters {
                symbol: symbol.to_string(),
                tick_size: dec!(0.01),
                step_size: dec!(0.001),
                min_qty: dec!(0.001),
                min_notional: dec!(10),
            })
        }
    }

    fn monitored_position() -> Position {
        let mut p = Position::new(
            "BTCUSDT".to_string(),
            Signal::Long,
            dec!(1.0),
            dec!(100),
            2,
            1000,
            "d1".to_string(),
            dec!(0.02),
            dec!(0.01),
        );
        p.mark_monitoring("tp-1".to_string(), "sl-1".to_string(), "hash".to_string());
        p
    }

    #[tokio::test]
    async fn flat_position_emits_closed_externally() {
        let gateway = Arc::new(MockGateway {
            position: StdMutex::new(PositionInfo {
                position_amt: Decimal::ZERO,
                entry_price: Decimal::ZERO,
                leverage: 2,
                mark_price: Decimal::ZERO,
                unrealized_profit: Decimal::ZERO,
            }),
            open_orders: StdMutex::new(vec![]),
        });
        let order_manager = Arc::new(OrderManager::new(gateway.clone()));
        let monitor = LiveMonitor::new(gateway, order_manager, POLL_INTERVAL);

        let mut positions = HashMap::new();
        positions.insert("BTCUSDT".to_string(), monitored_position());
        let filters = HashMap::new();
        let debounce: LogDebounceState = Arc::new(Mutex::new(HashMap::new()));

        let events = monitor.poll_once(&mut positions, &filters, &debounce).await;
        assert!(matches!(events[0], LiveMonitorEvent::PositionClosedExternally { .. }));
        assert!(!positions.contains_key("BTCUSDT"));
    }

    #[tokio::test]
    async fn missing_tpsl_leg_is_observed_not_repaired() {
        let gateway = Arc::new(MockGateway {
            position: StdMutex::new(PositionInfo {
                position_amt: dec!(1.0),
                entry_price: dec!(100),
                leverage: 2,
                mark_price: dec!(100),
                unrealized_profit: Decimal::ZERO,
            }),
            open_orders: StdMutex::new(vec![]), // neither leg present
        });
        let order_manager = Arc::new(OrderManager::new(gateway.clone()));
        let monitor = LiveMonitor::new(gateway, order_manager, POLL_INTERVAL);

        let mut positions = HashMap::new();
        positions.insert("BTCUSDT".to_string(), monitored_position());
        let filters = HashMap::new();
        let debounce: LogDebounceState = Arc::new(Mutex::new(HashMap::new()));

        let events = monitor.poll_once(&mut positions, &filters, &debounce).await;
        assert!(matches!(events[0], LiveMonitorEvent::TpslMissing { missing_tp: true, missing_sl: true, .. }));
        // Position still present and still MONITORING: observe-only, no repair.
        assert_eq!(positions["BTCUSDT"].state, PositionState::Monitoring);
    }

    #[tokio::test]
    async fn log_debounce_suppresses_repeat_events_within_60s() {
        let gateway = Arc::new(MockGateway {
            position: StdMutex::new(PositionInfo {
                position_amt: dec!(1.0),
                entry_price: dec!(100),
                leverage: 2,
                mark_price: dec!(100),
                unrealized_profit: Decimal::ZERO,
            }),
            open_orders: StdMutex::new(vec![]),
        });
        let order_manager = Arc::new(OrderManager::new(gateway.clone()));
        let monitor = LiveMonitor::new(gateway, order_manager, POLL_INTERVAL);

        let mut positions = HashMap::new();
        positions.insert("BTCUSDT".to_string(), monitored_position());
        let filters = HashMap::new();
        let debounce: LogDebounceState = Arc::new(Mutex::new(HashMap::new()));

        let first = monitor.poll_once(&mut positions, &filters, &debounce).await;
        let second = monitor.poll_once(&mut positions, &filters, &debounce).await;
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0);
    }
}
