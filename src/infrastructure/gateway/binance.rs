//! Perpetual-futures exchange gateway (spec §4.A, §6). HMAC-SHA256 signed
//! REST calls over a retry-middleware client, wrapped in a sustained-failure
//! circuit breaker. Retries handle transient transport noise; mapped
//! exchange error codes (§6/§7) short-circuit instead of retrying blindly.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromStr;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::config::GatewayEnvConfig;
use crate::domain::errors::GatewayError;
use crate::domain::ports::{
    AccountBalance, Candle, ExchangeGateway, OpenOrder, OrderSide, PlaceOrderParams, PlacedOrder,
    PositionInfo,
};
use crate::domain::symbol::SymbolFilters;
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

type HmacSha256 = Hmac<Sha256>;

pub struct BinanceFuturesGateway {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
    filter_cache: RwLock<HashMap<String, SymbolFilters>>,
}

impl BinanceFuturesGateway {
    pub fn new(config: &GatewayEnvConfig) -> Self {
        let client =
            HttpClientFactory::create_client(Duration::from_secs(config.request_timeout_secs));
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            "exchange-gateway",
            5,
            3,
            Duration::from_secs(60),
        ));
        Self {
            client,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            base_url: config.base_url.clone(),
            circuit_breaker,
            filter_cache: RwLock::new(HashMap::new()),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts a key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, mut params: Vec<(String, String)>) -> String {
        let timestamp = chrono::Utc::now().timestamp_millis();
        params.push(("timestamp".to_string(), timestamp.to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
    }

    /// Wraps a single attempt in the sustained-failure breaker; transport
    /// retry already happened inside `self.client` via middleware.
    async fn guarded<F, Fut, T>(&self, op: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        self.circuit_breaker
            .call(op())
            .await
            .map_err(|e| match e {
                CircuitBreakerError::Open(msg) => GatewayError::Transient { reason: msg },
                CircuitBreakerError::Inner(inner) => inner,
            })
    }

    async fn parse_mapped_error(status: reqwest::StatusCode, body: &str) -> GatewayError {
        if status.as_u16() == 429 {
            return GatewayError::RateLimited { retry_after_secs: 1 };
        }
        #[derive(Deserialize)]
        struct ErrBody {
            code: i64,
            msg: String,
        }
        match serde_json::from_str::<ErrBody>(body) {
            Ok(err) => GatewayError::from_code(err.code, err.msg),
            Err(_) => GatewayError::Transient {
                reason: format!("http {status}: {body}"),
            },
        }
    }
}

#[async_trait]
impl ExchangeGateway for BinanceFuturesGateway {
    #[instrument(skip(self))]
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError> {
        self.guarded(|| async {
            let url = format!(
                "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
                self.base_url, symbol, interval, limit
            );
            let resp = self.client.get(&url).send().await.map_err(|e| GatewayError::Transient {
                reason: e.to_string(),
            })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::parse_mapped_error(status, &body).await);
            }
            let raw: Vec<Vec<serde_json::Value>> =
                resp.json().await.map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            Ok(raw
                .into_iter()
                .filter_map(|row| {
                    let get_dec = |i: usize| -> Option<Decimal> {
                        row.get(i)?.as_str().and_then(|s| Decimal::from_str(s).ok())
                    };
                    let get_i64 = |i: usize| -> Option<i64> { row.get(i)?.as_i64() };
                    Some(Candle {
                        open_time: get_i64(0)?,
                        open: get_dec(1)?,
                        high: get_dec(2)?,
                        low: get_dec(3)?,
                        close: get_dec(4)?,
                        volume: get_dec(5)?,
                        close_time: get_i64(6)?,
                    })
                })
                .collect())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        self.guarded(|| async {
            let url = format!("{}/fapi/v1/ticker/price?symbol={}", self.base_url, symbol);
            let resp = self.client.get(&url).send().await.map_err(|e| GatewayError::Transient {
                reason: e.to_string(),
            })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::parse_mapped_error(status, &body).await);
            }
            #[derive(Deserialize)]
            struct Ticker {
                price: String,
            }
            let ticker: Ticker =
                resp.json().await.map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            Decimal::from_str(&ticker.price).map_err(|e| GatewayError::Transient {
                reason: e.to_string(),
            })
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, GatewayError> {
        self.guarded(|| async {
            let query = self.signed_query(vec![("symbol".to_string(), symbol.to_string())]);
            let url = format!("{}/fapi/v1/openOrders?{}", self.base_url, query);
            let resp = self
                .client
                .get(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await
                .map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::parse_mapped_error(status, &body).await);
            }
            #[derive(Deserialize)]
            struct RawOrder {
                #[serde(rename = "orderId")]
                order_id: i64,
                symbol: String,
                side: String,
                #[serde(rename = "type")]
                order_type: String,
                #[serde(rename = "stopPrice")]
                stop_price: String,
                #[serde(rename = "closePosition")]
                close_position: bool,
                #[serde(rename = "reduceOnly")]
                reduce_only: bool,
                #[serde(rename = "origQty")]
                orig_qty: String,
                status: String,
            }
            let raw: Vec<RawOrder> =
                resp.json().await.map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            Ok(raw
                .into_iter()
                .map(|o| OpenOrder {
                    order_id: o.order_id.to_string(),
                    symbol: o.symbol,
                    side: if o.side == "BUY" { OrderSide::Buy } else { OrderSide::Sell },
                    order_type: o.order_type,
                    stop_price: Decimal::from_str(&o.stop_price).ok().filter(|d| !d.is_zero()),
                    close_position: o.close_position,
                    reduce_only: o.reduce_only,
                    quantity: Decimal::from_str(&o.orig_qty).ok().filter(|d| !d.is_zero()),
                    status: o.status,
                })
                .collect())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_position_info(&self, symbol: &str) -> Result<PositionInfo, GatewayError> {
        self.guarded(|| async {
            let query = self.signed_query(vec![("symbol".to_string(), symbol.to_string())]);
            let url = format!("{}/fapi/v2/positionRisk?{}", self.base_url, query);
            let resp = self
                .client
                .get(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await
                .map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::parse_mapped_error(status, &body).await);
            }
            #[derive(Deserialize)]
            struct RawPosition {
                #[serde(rename = "positionAmt")]
                position_amt: String,
                #[serde(rename = "entryPrice")]
                entry_price: String,
                leverage: String,
                #[serde(rename = "markPrice")]
                mark_price: String,
                #[serde(rename = "unRealizedProfit")]
                unrealized_profit: String,
            }
            let mut rows: Vec<RawPosition> =
                resp.json().await.map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            let row = rows.pop().ok_or(GatewayError::InvalidSymbolFilter {
                symbol: symbol.to_string(),
            })?;
            Ok(PositionInfo {
                position_amt: Decimal::from_str(&row.position_amt).unwrap_or(Decimal::ZERO),
                entry_price: Decimal::from_str(&row.entry_price).unwrap_or(Decimal::ZERO),
                leverage: row.leverage.parse().unwrap_or(1),
                mark_price: Decimal::from_str(&row.mark_price).unwrap_or(Decimal::ZERO),
                unrealized_profit: Decimal::from_str(&row.unrealized_profit)
                    .unwrap_or(Decimal::ZERO),
            })
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_balance(&self) -> Result<AccountBalance, GatewayError> {
        self.guarded(|| async {
            let query = self.signed_query(vec![]);
            let url = format!("{}/fapi/v2/balance?{}", self.base_url, query);
            let resp = self
                .client
                .get(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await
                .map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::parse_mapped_error(status, &body).await);
            }
            #[derive(Deserialize)]
            struct RawBalance {
                asset: String,
                balance: String,
                #[serde(rename = "availableBalance")]
                available_balance: String,
            }
            let rows: Vec<RawBalance> =
                resp.json().await.map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            let usdt = rows
                .into_iter()
                .find(|b| b.asset == "USDT")
                .ok_or(GatewayError::Unmapped {
                    code: 0,
                    message: "no USDT balance entry".to_string(),
                })?;
            Ok(AccountBalance {
                balance: Decimal::from_str(&usdt.balance).unwrap_or(Decimal::ZERO),
                available_balance: Decimal::from_str(&usdt.available_balance)
                    .unwrap_or(Decimal::ZERO),
            })
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_book_ticker(&self, symbol: &str) -> Result<crate::domain::ports::BookTicker, GatewayError> {
        self.guarded(|| async {
            let url = format!("{}/fapi/v1/ticker/bookTicker?symbol={}", self.base_url, symbol);
            let resp = self.client.get(&url).send().await.map_err(|e| GatewayError::Transient {
                reason: e.to_string(),
            })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::parse_mapped_error(status, &body).await);
            }
            #[derive(Deserialize)]
            struct RawBookTicker {
                #[serde(rename = "bidPrice")]
                bid_price: String,
                #[serde(rename = "askPrice")]
                ask_price: String,
            }
            let raw: RawBookTicker =
                resp.json().await.map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            Ok(crate::domain::ports::BookTicker {
                bid_price: Decimal::from_str(&raw.bid_price).unwrap_or(Decimal::ZERO),
                ask_price: Decimal::from_str(&raw.ask_price).unwrap_or(Decimal::ZERO),
            })
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_funding_rate(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        self.guarded(|| async {
            let url = format!(
                "{}/fapi/v1/fundingRate?symbol={}&limit=1",
                self.base_url, symbol
            );
            let resp = self.client.get(&url).send().await.map_err(|e| GatewayError::Transient {
                reason: e.to_string(),
            })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::parse_mapped_error(status, &body).await);
            }
            #[derive(Deserialize)]
            struct RawFunding {
                #[serde(rename = "fundingRate")]
                funding_rate: String,
            }
            let mut rows: Vec<RawFunding> =
                resp.json().await.map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            let row = rows.pop().ok_or(GatewayError::InvalidSymbolFilter {
                symbol: symbol.to_string(),
            })?;
            Ok(Decimal::from_str(&row.funding_rate).unwrap_or(Decimal::ZERO))
        })
        .await
    }

    #[instrument(skip(self, params), fields(symbol = %params.symbol, side = ?params.side))]
    async fn place_order(&self, params: PlaceOrderParams) -> Result<PlacedOrder, GatewayError> {
        self.guarded(|| async {
            let mut query_params = vec![
                ("symbol".to_string(), params.symbol.clone()),
                (
                    "side".to_string(),
                    match params.side {
                        OrderSide::Buy => "BUY".to_string(),
                        OrderSide::Sell => "SELL".to_string(),
                    },
                ),
                (
                    "type".to_string(),
                    match params.order_type {
                        crate::domain::ports::OrderType::Market => "MARKET".to_string(),
                        crate::domain::ports::OrderType::TakeProfitMarket => {
                            "TAKE_PROFIT_MARKET".to_string()
                        }
                        crate::domain::ports::OrderType::StopMarket => "STOP_MARKET".to_string(),
                    },
                ),
            ];
            if let Some(qty) = params.quantity {
                query_params.push(("quantity".to_string(), qty.to_string()));
            }
            if let Some(stop) = params.stop_price {
                query_params.push(("stopPrice".to_string(), stop.to_string()));
            }
            if params.close_position {
                query_params.push(("closePosition".to_string(), "true".to_string()));
            }
            if params.reduce_only {
                query_params.push(("reduceOnly".to_string(), "true".to_string()));
            }
            if params.working_type_mark_price {
                query_params.push(("workingType".to_string(), "MARK_PRICE".to_string()));
            }

            let query = self.signed_query(query_params);
            let url = format!("{}/fapi/v1/order?{}", self.base_url, query);
            let resp = self
                .client
                .post(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await
                .map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::parse_mapped_error(status, &body).await);
            }
            #[derive(Deserialize)]
            struct RawOrder {
                #[serde(rename = "orderId")]
                order_id: i64,
            }
            let raw: RawOrder =
                resp.json().await.map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            Ok(PlacedOrder {
                order_id: raw.order_id.to_string(),
            })
        })
        .await
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), GatewayError> {
        self.guarded(|| async {
            let query = self.signed_query(vec![
                ("symbol".to_string(), symbol.to_string()),
                ("orderId".to_string(), order_id.to_string()),
            ]);
            let url = format!("{}/fapi/v1/order?{}", self.base_url, query);
            let resp = self
                .client
                .delete(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await
                .map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                let mapped = Self::parse_mapped_error(status, &body).await;
                if mapped.treat_as_success() {
                    return Ok(());
                }
                return Err(mapped);
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        self.guarded(|| async {
            let query = self.signed_query(vec![
                ("symbol".to_string(), symbol.to_string()),
                ("leverage".to_string(), leverage.to_string()),
            ]);
            let url = format!("{}/fapi/v1/leverage?{}", self.base_url, query);
            let resp = self
                .client
                .post(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await
                .map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::parse_mapped_error(status, &body).await);
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_filters(&self, symbol: &str) -> Result<SymbolFilters, GatewayError> {
        if let Some(cached) = self.filter_cache.read().await.get(symbol) {
            return Ok(cached.clone());
        }
        let filters = self
            .guarded(|| async {
                let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
                let resp =
                    self.client.get(&url).send().await.map_err(|e| GatewayError::Transient {
                        reason: e.to_string(),
                    })?;
                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Self::parse_mapped_error(status, &body).await);
                }
                #[derive(Deserialize)]
                struct RawFilter {
                    #[serde(rename = "filterType")]
                    filter_type: String,
                    #[serde(rename = "tickSize")]
                    tick_size: Option<String>,
                    #[serde(rename = "stepSize")]
                    step_size: Option<String>,
                    #[serde(rename = "minQty")]
                    min_qty: Option<String>,
                    notional: Option<String>,
                }
                #[derive(Deserialize)]
                struct RawSymbol {
                    symbol: String,
                    filters: Vec<RawFilter>,
                }
                #[derive(Deserialize)]
                struct ExchangeInfo {
                    symbols: Vec<RawSymbol>,
                }
                let info: ExchangeInfo =
                    resp.json().await.map_err(|e| GatewayError::Transient { reason: e.to_string() })?;
                let sym = info
                    .symbols
                    .into_iter()
                    .find(|s| s.symbol == symbol)
                    .ok_or_else(|| GatewayError::InvalidSymbolFilter {
                        symbol: symbol.to_string(),
                    })?;

                let mut tick_size = Decimal::ZERO;
                let mut step_size = Decimal::ZERO;
                let mut min_qty = Decimal::ZERO;
                let mut min_notional = Decimal::TEN;
                for f in sym.filters {
                    match f.filter_type.as_str() {
                        "PRICE_FILTER" => {
                            tick_size =
                                f.tick_size.and_then(|s| Decimal::from_str(&s).ok()).unwrap_or(tick_size);
                        }
                        "LOT_SIZE" => {
                            step_size =
                                f.step_size.and_then(|s| Decimal::from_str(&s).ok()).unwrap_or(step_size);
                            min_qty =
                                f.min_qty.and_then(|s| Decimal::from_str(&s).ok()).unwrap_or(min_qty);
                        }
                        "MIN_NOTIONAL" => {
                            min_notional = f
                                .notional
                                .and_then(|s| Decimal::from_str(&s).ok())
                                .unwrap_or(min_notional);
                        }
                        _ => {}
                    }
                }

                Ok(SymbolFilters {
                    symbol: symbol.to_string(),
                    tick_size,
                    step_size,
                    min_qty,
                    min_notional,
                })
            })
            .await?;

        self.filter_cache
            .write()
            .await
            .insert(symbol.to_string(), filters.clone());
        Ok(filters)
    }
}
