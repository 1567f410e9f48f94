//! Trait boundaries to the outside world. `ExchangeGateway` is implemented
//! in `infrastructure::gateway`; `DecisionProvider` is the opaque AI/LLM
//! decision source (spec §1 "out of scope, interfaces only").

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::decision::{Decision, Signal};
use crate::domain::errors::{DecisionError, GatewayError};
use crate::domain::symbol::SymbolFilters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    TakeProfitMarket,
    StopMarket,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderParams {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub close_position: bool,
    pub reduce_only: bool,
    pub working_type_mark_price: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: String,
    pub stop_price: Option<Decimal>,
    pub close_position: bool,
    pub reduce_only: bool,
    pub quantity: Option<Decimal>,
    pub status: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionInfo {
    /// Signed: positive for long exposure, negative for short.
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub mark_price: Decimal,
    pub unrealized_profit: Decimal,
}

impl PositionInfo {
    pub fn is_flat(&self) -> bool {
        self.position_amt.is_zero()
    }

    pub fn side(&self) -> Option<Signal> {
        if self.position_amt > Decimal::ZERO {
            Some(Signal::Long)
        } else if self.position_amt < Decimal::ZERO {
            Some(Signal::Short)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccountBalance {
    pub balance: Decimal,
    pub available_balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
}

/// Best bid/ask snapshot feeding the quote-spread circuit breaker (spec §4.H).
#[derive(Debug, Clone, Copy)]
pub struct BookTicker {
    pub bid_price: Decimal,
    pub ask_price: Decimal,
}

impl BookTicker {
    /// `(ask - bid) / mid`, as a fraction (0.0015 == 0.15%).
    pub fn spread_pct(&self) -> Decimal {
        let mid = (self.bid_price + self.ask_price) / Decimal::TWO;
        if mid.is_zero() {
            return Decimal::ZERO;
        }
        (self.ask_price - self.bid_price) / mid
    }
}

/// Bit-thin calls to the external venue (spec §4.A). Every operation retries
/// on transport/5xx with exponential backoff, but short-circuits on mapped
/// exchange errors — implementations are expected to apply that policy
/// internally and return `GatewayError` variants rather than raw codes.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError>;

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, GatewayError>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, GatewayError>;

    async fn get_position_info(&self, symbol: &str) -> Result<PositionInfo, GatewayError>;

    async fn get_balance(&self) -> Result<AccountBalance, GatewayError>;

    async fn get_book_ticker(&self, symbol: &str) -> Result<BookTicker, GatewayError>;

    /// Most recent funding rate, as a fraction (0.0001 == 0.01%).
    async fn get_funding_rate(&self, symbol: &str) -> Result<Decimal, GatewayError>;

    async fn place_order(&self, params: PlaceOrderParams) -> Result<PlacedOrder, GatewayError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), GatewayError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError>;

    async fn get_filters(&self, symbol: &str) -> Result<SymbolFilters, GatewayError>;
}

/// Opaque AI/LLM decision source (spec §4.D). Never mutates state.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(
        &self,
        agent_id: &str,
        symbol: &str,
        market_snapshot: &serde_json::Value,
        recent_performance: f64,
    ) -> Result<Decision, DecisionError>;
}
