//! Sentinel (spec §4.L): 60 s poll loop, sole authority for TP/SL repair.
//! Never initiates partial closes (that's the Live Monitor's job) and never
//! re-sets leverage mid-position — it recomputes geometry from the position's
//! original `entry_price`/`tp_frac`/`sl_frac` and reattaches missing legs.
//!
//! Grounded in the teacher's `agents/sentinel.rs` poll/heartbeat/self-heal
//! shape (renamed `StreamGuardian` there to avoid collision with this
//! module, which is a different, narrower authority: TP/SL repair only).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::application::order_manager::OrderManager;
use crate::domain::decision::Signal;
use crate::domain::errors::{GatewayError, OrderManagerError};
use crate::domain::ports::ExchangeGateway;
use crate::domain::position::{Position, PositionState, SymbolMutexState};
use crate::domain::symbol::SymbolFilters;

pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub enum SentinelEvent {
    ReattachSucceeded { symbol: String },
    ReattachSkippedMargin { symbol: String },
    ReattachSkippedDebounced { symbol: String },
    ReattachFailed { symbol: String, reason: String },
}

pub struct Sentinel {
    gateway: Arc<dyn ExchangeGateway>,
    order_manager: Arc<OrderManager>,
    poll_interval: Duration,
}

impl Sentinel {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, order_manager: Arc<OrderManager>, poll_interval: Duration) -> Self {
        Self { gateway, order_manager, poll_interval }
    }

    /// One repair pass over positions missing a TP or SL leg. `current_cycle`
    /// is the Sentinel's own cycle counter (incremented once per call by the
    /// caller), used for the dual-layer debounce alongside wall-clock time.
    pub async fn repair_once(
        &self,
        positions: &mut HashMap<String, Position>,
        mutex_states: &mut HashMap<String, SymbolMutexState>,
        filters: &HashMap<String, SymbolFilters>,
        current_cycle: u64,
    ) -> Vec<SentinelEvent> {
        let mut events = Vec::new();
        let now = Instant::now();

        for (symbol, position) in positions.iter_mut() {
            if !matches!(position.state, PositionState::Open | PositionState::Monitoring) {
                continue;
            }
            if position.side == Signal::Hold {
                continue;
            }

            let Some(sym_filters) = filters.get(symbol) else { continue };

            let open_orders = self.gateway.get_open_orders(symbol).await.unwrap_or_default();
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

            if has_tp && has_sl {
                continue;
            }

            let mutex_state = mutex_states
                .entry(symbol.clone())
                .or_insert_with(|| SymbolMutexState::new(symbol.clone()));

            if !mutex_state.reattach_allowed(now, current_cycle) {
                events.push(SentinelEvent::ReattachSkippedDebounced { symbol: symbol.clone() });
                continue;
            }
            mutex_state.record_reattach_attempt(now, current_cycle);

            // Recompute geometry from the position's original entry price and
            // fractions — never from a possibly-changed current regime.
            let (tp_price, sl_price) = recompute_tpsl_prices(
                position.side,
                position.entry_price,
                position.tp_frac,
                position.sl_frac,
            );
            let rounded_tp = sym_filters.round_price(tp_price);
            let rounded_sl = sym_filters.round_price(sl_price);

            match self
                .order_manager
                .attach_tpsl(symbol, position.side, rounded_tp, rounded_sl, position.quantity)
                .await
            {
                Ok((tp_id, sl_id)) => {
                    position.tp_order_id = Some(tp_id);
                    position.sl_order_id = Some(sl_id);
                    if position.state == PositionState::Open {
                        position.state = PositionState::Monitoring;
                    }
                    info!(symbol, "sentinel: tp/sl reattached");
                    events.push(SentinelEvent::ReattachSucceeded { symbol: symbol.clone() });
                }
                Err(OrderManagerError::Gateway(ref e)) if e.treat_as_success() => {
                    // -2011 / -4164: venue already considers the leg handled.
                    info!(symbol, "sentinel: reattach treated as success ({e})");
                    events.push(SentinelEvent::ReattachSucceeded { symbol: symbol.clone() });
                }
                Err(OrderManagerError::Gateway(GatewayError::MarginInsufficient)) => {
                    warn!(symbol, "sentinel: reattach skipped, margin insufficient");
                    events.push(SentinelEvent::ReattachSkippedMargin { symbol: symbol.clone() });
                }
                Err(e) => {
                    warn!(symbol, error = %e, "sentinel: reattach failed");
                    events.push(SentinelEvent::ReattachFailed {
                        symbol: symbol.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        events
    }

    /// Runs the 60 s poll loop until cancelled.
    pub async fn run(
        self,
        positions: Arc<tokio::sync::Mutex<HashMap<String, Position>>>,
        mutex_states: Arc<tokio::sync::Mutex<HashMap<String, SymbolMutexState>>>,
        filters: Arc<tokio::sync::Mutex<HashMap<String, SymbolFilters>>>,
        mut event_tx: tokio::sync::mpsc::Sender<SentinelEvent>,
    ) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut cycle: u64 = 0;
        loop {
            ticker.tick().await;
            cycle += 1;
            let mut positions_guard = positions.lock().await;
            let mut mutex_guard = mutex_states.lock().await;
            let filters_guard = filters.lock().await;
            let events = self
                .repair_once(&mut positions_guard, &mut mutex_guard, &filters_guard, cycle)
                .await;
            drop(positions_guard);
            drop(mutex_guard);
            drop(filters_guard);
            for event in events {
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn recompute_tpsl_prices(
    side: Signal,
    entry: rust_decimal::Decimal,
    tp_frac: rust_decimal::Decimal,
    sl_frac: rust_decimal::Decimal,
) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
    use rust_decimal::Decimal;
    match side {
        Signal::Long => (entry * (Decimal::ONE + tp_frac), entry * (Decimal::ONE - sl_frac)),
        Signal::Short => (entry * (Decimal::ONE - tp_frac), entry * (Decimal::ONE + sl_frac)),
        Signal::Hold => (entry, entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    use crate::domain::ports::{
        AccountBalance, BookTicker, Candle, OpenOrder, PlaceOrderParams, PlacedOrder, PositionInfo,
    };

    struct MockGateway {
        open_orders: StdMutex<Vec<OpenOrder>>,
        place_order_calls: StdMutex<u32>,
        reject_with: StdMutex<Option<GatewayError>>,
    }

    impl MockGateway {
        fn empty() -> Self {
            Self {
                open_orders: StdMutex::new(vec![]),
                place_order_calls: StdMutex::new(0),
                reject_with: StdMutex::new(None),
            }
        }
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
            Ok(PositionInfo {
                position_amt: dec!(1.0),
                entry_price: dec!(100),
                leverage: 2,
                mark_price: dec!(100),
                unrealized_profit: Decimal::ZERO,
            })
        }
        async fn get_balance(&self) -> Result<AccountBalance, GatewayError> {
            Ok(AccountBalance { balance: dec!(10000), available_balance: dec!(10000) })
        }
        async fn get_book_ticker(&self, _: &str) -> Result<BookTicker, GatewayError> {
            Ok(BookTicker { bid_price: dec!(100), ask_price: dec!(100) })
        }
        async fn get_funding_rate(&self, _: &str) -> Result<Decimal, GatewayError> {
            Ok(Decimal::ZERO)
        }
        async fn place_order(&self, params: PlaceOrderParams) -> Result<PlacedOrder, GatewayError> {
            if let Some(e) = self.reject_with.lock().unwrap().clone() {
                return Err(e);
            }
            let mut count = self.place_order_calls.lock().unwrap();
            *count += 1;
            let id = format!("order-{count}");
            self.open_orders.lock().unwrap().push(OpenOrder {
                order_id: id.clone(),
                symbol: params.symbol,
                side: params.side,
                order_type: format!("{:?}", params.order_type),
                stop_price: params.stop_price,
                close_position: params.close_position,
                reduce_only: params.reduce_only,
                quantity: params.quantity,
                status: "NEW".to_string(),
            });
            Ok(PlacedOrder { order_id: id })
        }
        async fn cancel_order(&self, _: &str, _: &str) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn set_leverage(&self, _: &str, _: u32) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn get_filters(&self, symbol: &str) -> Result<SymbolFilters, GatewayError> {
            Ok(filters(symbol))
        }
    }

    fn filters(symbol: &str) -> SymbolFilters {
        SymbolFilters {
            symbol: symbol.to_string(),
            tick_size: dec!(0.01),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(10),
        }
    }

    fn monitoring_position_missing_legs() -> Position {
        let mut p = Position::new(
            "BTCUSDT".to_string(),
            Signal::Long,
            dec!(1.0),
            dec!(100),
            2,
            1000,
            "dec-1".to_string(),
            dec!(0.02),
            dec!(0.01),
        );
        p.state = PositionState::Monitoring;
        p.tp_order_id = Some("tp-gone".to_string());
        p.sl_order_id = Some("sl-gone".to_string());
        p
    }

    #[tokio::test]
    async fn reattaches_missing_legs_and_emits_success() {
        let gateway = Arc::new(MockGateway::empty());
        let order_manager = Arc::new(OrderManager::new(gateway.clone()));
        let sentinel = Sentinel::new(gateway, order_manager, POLL_INTERVAL);

        let mut positions = HashMap::new();
        positions.insert("BTCUSDT".to_string(), monitoring_position_missing_legs());
        let mut mutex_states = HashMap::new();
        let mut filter_map = HashMap::new();
        filter_map.insert("BTCUSDT".to_string(), filters("BTCUSDT"));

        let events = sentinel.repair_once(&mut positions, &mut mutex_states, &filter_map, 10).await;
        assert!(matches!(events[0], SentinelEvent::ReattachSucceeded { .. }));
        assert!(positions["BTCUSDT"].has_both_legs());
    }

    #[tokio::test]
    async fn debounce_blocks_repeat_reattach_within_60s_and_3_cycles() {
        let gateway = Arc::new(MockGateway::empty());
        let order_manager = Arc::new(OrderManager::new(gateway.clone()));
        let sentinel = Sentinel::new(gateway, order_manager, POLL_INTERVAL);

        let mut positions = HashMap::new();
        positions.insert("BTCUSDT".to_string(), monitoring_position_missing_legs());
        let mut mutex_states = HashMap::new();
        let mut filter_map = HashMap::new();
        filter_map.insert("BTCUSDT".to_string(), filters("BTCUSDT"));

        let first = sentinel.repair_once(&mut positions, &mut mutex_states, &filter_map, 1).await;
        assert!(matches!(first[0], SentinelEvent::ReattachSucceeded { .. }));

        // Re-break the legs and try again immediately, same cycle window.
        positions.get_mut("BTCUSDT").unwrap().tp_order_id = Some("tp-gone-again".to_string());
        let second = sentinel.repair_once(&mut positions, &mut mutex_states, &filter_map, 2).await;
        assert!(matches!(second[0], SentinelEvent::ReattachSkippedDebounced { .. }));
    }

    #[tokio::test]
    async fn margin_insufficient_is_skipped_not_retried() {
        let gateway = Arc::new(MockGateway::empty());
        *gateway.reject_with.lock().unwrap() = Some(GatewayError::MarginInsufficient);
        let order_manager = Arc::new(OrderManager::new(gateway.clone()));
        let sentinel = Sentinel::new(gateway, order_manager, POLL_INTERVAL);

        let mut positions = HashMap::new();
        positions.insert("BTCUSDT".to_string(), monitoring_position_missing_legs());
        let mut mutex_states = HashMap::new();
        let mut filter_map = HashMap::new();
        filter_map.insert("BTCUSDT".to_string(), filters("BTCUSDT"));

        let events = sentinel.repair_once(&mut positions, &mut mutex_states, &filter_map, 1).await;
        assert!(matches!(events[0], SentinelEvent::ReattachSkippedMargin { .. }));
        assert!(!positions["BTCUSDT"].has_both_legs());
    }

    #[tokio::test]
    async fn fully_attached_position_is_left_untouched() {
        let gateway = Arc::new(MockGateway::empty());
        let order_manager = Arc::new(OrderManager::new(gateway.clone()));
        let sentinel = Sentinel::new(gateway.clone(), order_manager, POLL_INTERVAL);

        let mut p = monitoring_position_missing_legs();
        gateway.open_orders.lock().unwrap().push(OpenOrder {
            order_id: "tp-gone".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: crate::domain::ports::OrderSide::Sell,
            order_type: "TakeProfitMarket".to_string(),
            stop_price: Some(dec!(102)),
            close_position: true,
            reduce_only: false,
            quantity: None,
            status: "NEW".to_string(),
        });
        gateway.open_orders.lock().unwrap().push(OpenOrder {
            order_id: "sl-gone".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: crate::domain::ports::OrderSide::Sell,
            order_type: "StopMarket".to_string(),
            stop_price: Some(dec!(99)),
            close_position: true,
            reduce_only: false,
            quantity: None,
            status: "NEW".to_string(),
        });
        p.tp_order_id = Some("tp-gone".to_string());
        p.sl_order_id = Some("sl-gone".to_string());

        let mut positions = HashMap::new();
        positions.insert("BTCUSDT".to_string(), p);
        let mut mutex_states = HashMap::new();
        let mut filter_map = HashMap::new();
        filter_map.insert("BTCUSDT".to_string(), filters("BTCUSDT"));

        let events = sentinel.repair_once(&mut positions, &mut mutex_states, &filter_map, 1).await;
        assert!(events.is_empty());
    }
}
