//! Order Manager (spec §4.I) — hardest subsystem. Owns the entry protocol
//! (mutex guard → leverage → market entry → confirm → TP/SL attach →
//! verify), the exit protocol (state-machine-gated, debounced, filter-
//! rounded), and partial-close scheduling.
//!
//! Grounded in the teacher's `agents/executor.rs` idempotent
//! persist-before-execute shape (generalized here to "confirm before
//! attach") and `risk_management/order_monitor.rs`'s timeout/replace
//! pattern (generalized to the TP/SL attach retry-once-then-fallback
//! rule).

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::domain::decision::Signal;
use crate::domain::errors::{GatewayError, OrderManagerError};
use crate::domain::ports::{ExchangeGateway, OrderSide, OrderType, PlaceOrderParams, PositionInfo};
use crate::domain::position::{Position, SymbolMutexState, TpslHashRegistry, tpsl_hash};
use crate::domain::symbol::SymbolFilters;

const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(2);
const CONFIRMATION_POLL: Duration = Duration::from_millis(200);
const DEFAULT_MIN_NOTIONAL: Decimal = Decimal::TEN;
const PARTIAL_CLOSE_ROI_THRESHOLD: Decimal = Decimal::from_parts(3, 0, 0, false, 3); // 0.003 == 0.3%

pub struct EntryRequest {
    pub symbol: String,
    pub side: Signal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub tp_frac: Decimal,
    pub sl_frac: Decimal,
    pub decision_ref: String,
    pub existing_open_same_direction: bool,
}

pub struct OrderManager {
    gateway: Arc<dyn ExchangeGateway>,
}

impl OrderManager {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    /// Entry protocol, spec §4.I steps 1-9. `mutex_state` and `hash_registry`
    /// are caller-owned so the orchestrator can serialize per-symbol access.
    #[instrument(skip(self, mutex_state, hash_registry, filters), fields(symbol = %req.symbol, side = ?req.side))]
    pub async fn submit_entry(
        &self,
        req: EntryRequest,
        mutex_state: &mut SymbolMutexState,
        hash_registry: &mut TpslHashRegistry,
        filters: &SymbolFilters,
        now_secs: i64,
        reversal_cooldown_secs: i64,
    ) -> Result<Position, OrderManagerError> {
        // Step 1: per-symbol mutex cooldowns.
        if !mutex_state.entry_allowed(now_secs, req.side, reversal_cooldown_secs) {
            let elapsed = mutex_state.last_entry_time.map(|t| now_secs - t).unwrap_or(0);
            let is_same_direction = mutex_state.last_entry_side == Some(req.side);
            let remaining = if is_same_direction {
                (900 - elapsed).max(0)
            } else {
                (reversal_cooldown_secs - elapsed).max(0)
            };
            return Err(if is_same_direction {
                OrderManagerError::SameDirectionCooldown { remaining_secs: remaining }
            } else {
                OrderManagerError::ReversalCooldown { remaining_secs: remaining }
            });
        }

        // Step 2: duplicate-direction guard, debounced.
        if req.existing_open_same_direction {
            use std::time::Instant;
            if mutex_state.should_log_conflict(Instant::now()) {
                warn!(symbol = %req.symbol, "duplicate same-direction entry rejected");
            }
            return Err(OrderManagerError::DuplicatePosition);
        }

        // Step 3: leverage is idempotent on the venue.
        self.gateway.set_leverage(&req.symbol, req.leverage).await?;

        // Step 4: market entry.
        let order_side = match req.side {
            Signal::Long => OrderSide::Buy,
            Signal::Short => OrderSide::Sell,
            Signal::Hold => {
                return Err(OrderManagerError::EntryUnconfirmed);
            }
        };
        self.gateway
            .place_order(PlaceOrderParams {
                symbol: req.symbol.clone(),
                side: order_side,
                order_type: OrderType::Market,
                quantity: Some(req.quantity),
                stop_price: None,
                close_position: false,
                reduce_only: false,
                working_type_mark_price: false,
            })
            .await?;

        // Step 5: confirm position on venue.
        let info = match self.wait_for_position_confirmation(&req.symbol, req.side).await {
            Some(info) => info,
            None => {
                warn!(symbol = %req.symbol, "entry unconfirmed within timeout, no TP/SL attached");
                return Err(OrderManagerError::EntryUnconfirmed);
            }
        };

        mutex_state.record_entry(now_secs, req.side);

        // Step 6: TP/SL geometry.
        let (tp_price, sl_price) = compute_tpsl_prices(req.side, info.entry_price, req.tp_frac, req.sl_frac);
        if !geometry_is_valid(req.side, info.entry_price, tp_price, sl_price) {
            warn!(symbol = %req.symbol, %tp_price, %sl_price, entry = %info.entry_price, "invalid TP/SL geometry, closing immediately");
            self.emergency_close_unprotected_entry(&req, &info, now_secs).await;
            return Err(OrderManagerError::InvalidTpslGeometry {
                symbol: req.symbol.clone(),
                side: req.side,
                tp: tp_price,
                sl: sl_price,
                entry: info.entry_price,
            });
        }

        let rounded_tp = filters.round_price(tp_price);
        let rounded_sl = filters.round_price(sl_price);

        let mut position = Position::new(
            req.symbol.clone(),
            req.side,
            req.quantity,
            info.entry_price,
            req.leverage,
            now_secs,
            req.decision_ref,
            req.tp_frac,
            req.sl_frac,
        );

        // Step 7: dedup.
        let hash = tpsl_hash(&req.symbol, req.side, rounded_tp, rounded_sl);
        if hash_registry.is_duplicate(&hash) {
            info!(symbol = %req.symbol, "tp/sl hash already active, skipping attach");
            return Ok(position);
        }

        // Steps 8-9: attach + verify.
        match self.attach_tpsl(&req.symbol, req.side, rounded_tp, rounded_sl, req.quantity).await {
            Ok((tp_id, sl_id)) => {
                position.mark_monitoring(tp_id, sl_id, hash.clone());
                hash_registry.register(hash);
            }
            Err(OrderManagerError::TpslIncomplete { .. }) => {
                position.state = crate::domain::position::PositionState::Monitoring;
                warn!(symbol = %req.symbol, "tp/sl incomplete after retry, promoted to MONITORING for Sentinel repair");
            }
            Err(e) => return Err(e),
        }

        Ok(position)
    }

    /// The market entry already landed on the venue (step 4/5) with no TP/SL
    /// protection once geometry is rejected, so it cannot simply be dropped —
    /// it is flattened here before the caller ever sees a `Position` for it.
    async fn emergency_close_unprotected_entry(&self, req: &EntryRequest, info: &PositionInfo, now_secs: i64) {
        let mut position = Position::new(
            req.symbol.clone(),
            req.side,
            req.quantity,
            info.entry_price,
            req.leverage,
            now_secs,
            req.decision_ref.clone(),
            req.tp_frac,
            req.sl_frac,
        );
        if position.mark_closing().is_err() {
            return;
        }
        let closing_side = match req.side {
            Signal::Long => OrderSide::Sell,
            Signal::Short => OrderSide::Buy,
            Signal::Hold => return,
        };
        match self
            .gateway
            .place_order(PlaceOrderParams {
                symbol: req.symbol.clone(),
                side: closing_side,
                order_type: OrderType::Market,
                quantity: Some(req.quantity),
                stop_price: None,
                close_position: true,
                reduce_only: true,
                working_type_mark_price: false,
            })
            .await
        {
            Ok(_) => {
                let _ = position.mark_closed();
                warn!(symbol = %req.symbol, "unprotected entry closed as emergency safety action");
            }
            Err(e) => {
                warn!(symbol = %req.symbol, error = %e, "emergency close of unprotected entry failed, position remains open on venue and untracked");
            }
        }
    }

    async fn wait_for_position_confirmation(&self, symbol: &str, side: Signal) -> Option<PositionInfo> {
        let deadline = tokio::time::Instant::now() + CONFIRMATION_TIMEOUT;
        loop {
            if let Ok(info) = self.gateway.get_position_info(symbol).await
                && !info.is_flat()
                && info.side() == Some(side)
            {
                return Some(info);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(CONFIRMATION_POLL).await;
        }
    }

    /// Attaches TP and SL as two separate orders (spec §4.I step 8), each
    /// preferring `closePosition=true, workingType=MARK_PRICE`; on
    /// `-1106` retries once with `reduceOnly=true, quantity=normalized_qty`.
    /// Verifies both legs via a fresh `get_open_orders` read; a missing leg
    /// is retried once before giving up with `TpslIncomplete`.
    #[instrument(skip(self))]
    pub async fn attach_tpsl(
        &self,
        symbol: &str,
        side: Signal,
        tp_price: Decimal,
        sl_price: Decimal,
        quantity: Decimal,
    ) -> Result<(String, String), OrderManagerError> {
        let closing_side = match side {
            Signal::Long => OrderSide::Sell,
            Signal::Short => OrderSide::Buy,
            Signal::Hold => unreachable!("attach_tpsl only called for directional positions"),
        };

        let tp_id = self
            .attach_leg(symbol, closing_side, OrderType::TakeProfitMarket, tp_price, quantity)
            .await;
        let sl_id = self
            .attach_leg(symbol, closing_side, OrderType::StopMarket, sl_price, quantity)
            .await;

        // Verify both legs landed on the venue.
        let open_orders = self.gateway.get_open_orders(symbol).await.unwrap_or_default();
        let has_tp = open_orders.iter().any(|o| Some(o.order_id.clone()) == tp_id);
        let has_sl = open_orders.iter().any(|o| Some(o.order_id.clone()) == sl_id);

        match (tp_id, sl_id, has_tp, has_sl) {
            (Some(tp), Some(sl), true, true) => Ok((tp, sl)),
            (tp, sl, _, _) => {
                // One retry for whichever leg is missing.
                let tp = if tp.is_none() || !has_tp {
                    self.attach_leg(symbol, closing_side, OrderType::TakeProfitMarket, tp_price, quantity)
                        .await
                } else {
                    tp
                };
                let sl = if sl.is_none() || !has_sl {
                    self.attach_leg(symbol, closing_side, OrderType::StopMarket, sl_price, quantity)
                        .await
                } else {
                    sl
                };
                match (tp, sl) {
                    (Some(tp), Some(sl)) => Ok((tp, sl)),
                    _ => Err(OrderManagerError::TpslIncomplete {
                        symbol: symbol.to_string(),
                    }),
                }
            }
        }
    }

    async fn attach_leg(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        stop_price: Decimal,
        quantity: Decimal,
    ) -> Option<String> {
        let preferred = PlaceOrderParams {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity: None,
            stop_price: Some(stop_price),
            close_position: true,
            reduce_only: false,
            working_type_mark_price: true,
        };
        match self.gateway.place_order(preferred).await {
            Ok(placed) => Some(placed.order_id),
            Err(GatewayError::ReduceOnlyNotRequired) => {
                let fallback = PlaceOrderParams {
                    symbol: symbol.to_string(),
                    side,
                    order_type,
                    quantity: Some(quantity),
                    stop_price: Some(stop_price),
                    close_position: false,
                    reduce_only: true,
                    working_type_mark_price: true,
                };
                self.gateway.place_order(fallback).await.ok().map(|p| p.order_id)
            }
            Err(e) => {
                warn!(symbol, ?order_type, error = %e, "tp/sl leg attach failed");
                None
            }
        }
    }

    /// Exit protocol (spec §4.I "Exit protocol"): accepted only if the
    /// position is in an exitable state and not debounced; quantities are
    /// filter-rounded and rejected below minimum.
    #[instrument(skip(self, position, mutex_state, filters))]
    pub async fn close(
        &self,
        position: &mut Position,
        mutex_state: &mut SymbolMutexState,
        filters: &SymbolFilters,
        mark_price: Decimal,
    ) -> Result<(), OrderManagerError> {
        use crate::domain::position::PositionState;
        if !matches!(position.state, PositionState::Open | PositionState::Monitoring) {
            return Err(OrderManagerError::NotExitable);
        }

        let now = std::time::Instant::now();
        if !mutex_state.is_exit_allowed(now) {
            return Err(OrderManagerError::ExitDebounced);
        }

        let qty = filters.round_qty(position.quantity);
        if qty < filters.min_qty || qty * mark_price < filters.min_notional.max(DEFAULT_MIN_NOTIONAL) {
            return Err(OrderManagerError::BelowMinimum);
        }

        mutex_state.record_exit_attempt(now);
        position.mark_closing().map_err(|_| OrderManagerError::NotExitable)?;

        let closing_side = match position.side {
            Signal::Long => OrderSide::Sell,
            Signal::Short => OrderSide::Buy,
            Signal::Hold => unreachable!("positions are never opened HOLD"),
        };

        self.gateway
            .place_order(PlaceOrderParams {
                symbol: position.symbol.clone(),
                side: closing_side,
                order_type: OrderType::Market,
                quantity: Some(qty),
                stop_price: None,
                close_position: true,
                reduce_only: true,
                working_type_mark_price: false,
            })
            .await?;

        Ok(())
    }

    /// Partial close (spec §4.I "Partial close"): closes half the current
    /// quantity when triggered by the Live Monitor. Caller is responsible
    /// for the ROI ≥ +0.3% and `partial_close_done=false` gate; this
    /// function performs the close + SL breakeven move bookkeeping once
    /// invoked.
    #[instrument(skip(self, position, filters))]
    pub async fn schedule_partial_close(
        &self,
        position: &mut Position,
        filters: &SymbolFilters,
    ) -> Result<(), OrderManagerError> {
        if position.partial_close_done {
            return Err(OrderManagerError::NotExitable);
        }
        let half = position.quantity / Decimal::TWO;
        let qty = filters.round_qty(half);
        if qty < filters.min_qty {
            return Err(OrderManagerError::BelowMinimum);
        }

        let closing_side = match position.side {
            Signal::Long => OrderSide::Sell,
            Signal::Short => OrderSide::Buy,
            Signal::Hold => unreachable!("positions are never opened HOLD"),
        };

        self.gateway
            .place_order(PlaceOrderParams {
                symbol: position.symbol.clone(),
                side: closing_side,
                order_type: OrderType::Market,
                quantity: Some(qty),
                stop_price: None,
                close_position: false,
                reduce_only: true,
                working_type_mark_price: false,
            })
            .await?;

        position.quantity -= qty;
        position.partial_close_done = true;
        Ok(())
    }
}

/// ROI threshold for triggering a partial close (spec §4.I, DESIGN.md Open
/// Question 1: fixed, not symbol-tuned).
pub fn partial_close_roi_threshold() -> Decimal {
    PARTIAL_CLOSE_ROI_THRESHOLD
}

fn compute_tpsl_prices(side: Signal, entry: Decimal, tp_frac: Decimal, sl_frac: Decimal) -> (Decimal, Decimal) {
    match side {
        Signal::Long => (entry * (Decimal::ONE + tp_frac), entry * (Decimal::ONE - sl_frac)),
        Signal::Short => (entry * (Decimal::ONE - tp_frac), entry * (Decimal::ONE + sl_frac)),
        Signal::Hold => (entry, entry),
    }
}

/// Direction rule (spec §4.I "Direction rule"): LONG requires tp > entry >
/// sl; SHORT requires tp < entry < sl.
fn geometry_is_valid(side: Signal, entry: Decimal, tp: Decimal, sl: Decimal) -> bool {
    match side {
        Signal::Long => tp > entry && entry > sl,
        Signal::Short => tp < entry && entry < sl,
        Signal::Hold => false,
    }
}
