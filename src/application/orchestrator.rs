//! Orchestrator (spec §4.M): the single authoritative cycle driver. Owns
//! per-symbol mutex state jointly with the Sentinel, drives the Decision →
//! Arbitration → Risk → Order Manager pipeline, and performs periodic equity
//! reconciliation and CSV flushing.
//!
//! Grounded in the teacher's `application/system/mod.rs::Application::start`
//! main-loop shape and `bin/server.rs`'s cadence/timeout handling.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{error, info, warn};

use crate::application::agent_status::AgentStatusRegistry;
use crate::application::arbitrator::arbitrate;
use crate::application::circuit_breakers::EntryCircuitBreakers;
use crate::application::confidence::ConfidenceNormalizer;
use crate::application::decision_provider::CachingDecisionProvider;
use crate::application::equity;
use crate::application::live_monitor::LiveMonitorEvent;
use crate::application::market_data::MarketDataCache;
use crate::application::order_manager::{EntryRequest, OrderManager};
use crate::application::outcome;
use crate::application::regime;
use crate::application::risk::kill_switch::{KillSwitchConfig, KillSwitchInputs, KillSwitchState};
use crate::application::risk::{PipelineConfig, PipelineInputs, SizedEntry, evaluate_entry};
use crate::application::risk::correlation::OpenExposure;
use crate::application::risk::leverage::LeverageGovernor;
use crate::application::sentinel::SentinelEvent;
use crate::domain::agent::Agent;
use crate::domain::decision::{Decision, Signal};
use crate::domain::errors::RiskViolation;
use crate::domain::ports::{ExchangeGateway, OrderSide};
use crate::domain::position::{
    ExitReason, Position, PositionState, SymbolMutexState, TpslHashRegistry, TradeOutcome, tpsl_hash,
};
use crate::domain::symbol::SymbolFilters;
use crate::infrastructure::observability::metrics::Metrics;
use crate::infrastructure::persistence::CsvLog;
use crate::infrastructure::persistence::records::{
    DecisionLogRow, EquityCurveRow, ErrorLogRow, LearningLogRow, TradeLogRow,
};

/// Shared handles the Live Monitor and Sentinel also hold. Kept as a single
/// struct so `bootstrap` constructs it once and clones the `Arc`s into every
/// task.
#[derive(Clone)]
pub struct SharedState {
    pub positions: Arc<Mutex<HashMap<String, Position>>>,
    pub mutex_states: Arc<Mutex<HashMap<String, SymbolMutexState>>>,
    pub filters: Arc<Mutex<HashMap<String, SymbolFilters>>>,
}

pub struct OrchestratorConfig {
    pub cadence: Duration,
    pub cycle_timeout: Duration,
    pub reversal_cooldown_secs: i64,
    pub equity_reconciliation_every_n_cycles: u64,
    pub csv_flush_every_n_cycles: u64,
}

pub struct PersistedLogs {
    pub equity: CsvLog<EquityCurveRow>,
    pub trades: CsvLog<TradeLogRow>,
    pub decisions: CsvLog<DecisionLogRow>,
    pub errors: CsvLog<ErrorLogRow>,
    pub learning: CsvLog<LearningLogRow>,
}

impl PersistedLogs {
    fn flush_all(&mut self) {
        for (name, result) in [
            ("equity_curve", self.equity.flush()),
            ("trades_log", self.trades.flush()),
            ("decisions_log", self.decisions.flush()),
            ("errors_log", self.errors.flush()),
            ("learning_log", self.learning.flush()),
        ] {
            if let Err(e) = result {
                warn!(log = name, error = %e, "failed to flush csv log");
            }
        }
    }
}

pub struct Orchestrator {
    gateway: Arc<dyn ExchangeGateway>,
    market_data: Arc<MarketDataCache>,
    decision_provider: Arc<CachingDecisionProvider>,
    order_manager: Arc<OrderManager>,
    metrics: Arc<Metrics>,

    agents: Vec<Agent>,
    symbols: Vec<String>,

    shared: SharedState,
    hash_registry: TpslHashRegistry,
    leverage_governor: LeverageGovernor,
    confidence_normalizer: ConfidenceNormalizer,
    entry_breakers: EntryCircuitBreakers,
    agent_status: AgentStatusRegistry,

    pipeline_config: PipelineConfig,
    kill_switch_config: KillSwitchConfig,
    kill_switch_state: KillSwitchState,
    orchestrator_config: OrchestratorConfig,

    realized_cum: Decimal,
    peak_equity: Decimal,
    last_unrealized: Decimal,
    recent_latencies_ms: VecDeque<u64>,
    decisions_by_ref: HashMap<String, Decision>,

    logs: PersistedLogs,

    live_monitor_rx: mpsc::Receiver<LiveMonitorEvent>,
    sentinel_rx: mpsc::Receiver<SentinelEvent>,

    cycle: u64,
}

#[allow(clippy::too_many_arguments)]
impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        market_data: Arc<MarketDataCache>,
        decision_provider: Arc<CachingDecisionProvider>,
        order_manager: Arc<OrderManager>,
        metrics: Arc<Metrics>,
        agents: Vec<Agent>,
        shared: SharedState,
        pipeline_config: PipelineConfig,
        kill_switch_config: KillSwitchConfig,
        orchestrator_config: OrchestratorConfig,
        logs: PersistedLogs,
        live_monitor_rx: mpsc::Receiver<LiveMonitorEvent>,
        sentinel_rx: mpsc::Receiver<SentinelEvent>,
        max_leverage: u32,
    ) -> Self {
        let mut symbols: Vec<String> = agents.iter().map(|a| a.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();

        let agent_status = AgentStatusRegistry::new(metrics.clone());

        Self {
            gateway,
            market_data,
            decision_provider,
            order_manager,
            metrics,
            agents,
            symbols,
            shared,
            hash_registry: TpslHashRegistry::default(),
            leverage_governor: LeverageGovernor::new(max_leverage),
            confidence_normalizer: ConfidenceNormalizer::new(),
            entry_breakers: EntryCircuitBreakers::new(),
            agent_status,
            pipeline_config,
            kill_switch_config,
            kill_switch_state: KillSwitchState::new(),
            orchestrator_config,
            realized_cum: Decimal::ZERO,
            peak_equity: Decimal::ZERO,
            last_unrealized: Decimal::ZERO,
            recent_latencies_ms: VecDeque::with_capacity(20),
            decisions_by_ref: HashMap::new(),
            logs,
            live_monitor_rx,
            sentinel_rx,
            cycle: 0,
        }
    }

    /// Runs cadence-paced cycles until `shutdown` is flipped true. Finishes
    /// the in-flight cycle before returning (spec §5: no abrupt cutoff for
    /// the orchestrator).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.reconcile_on_startup().await;

        let mut ticker = tokio::time::interval(self.orchestrator_config.cadence);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "cycle failed");
                    }
                    let elapsed = started.elapsed();
                    self.metrics.cycle_duration_seconds.set(elapsed.as_secs_f64());
                    if elapsed > self.orchestrator_config.cycle_timeout {
                        warn!(elapsed_secs = elapsed.as_secs_f64(), "CycleTimeout");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("orchestrator: shutdown signalled, finishing in-flight cycle then stopping");
                        self.logs.flush_all();
                        return;
                    }
                }
            }
        }
    }

    /// Startup reconciliation (spec.md:70 "Orphaned venue positions... trigger
    /// a reconcile path that adopts them into MONITORING and re-attaches
    /// TP/SL"): runs once before the first cycle, since local position state
    /// always starts empty at boot. Any nonzero venue position for a
    /// configured symbol is adopted directly into MONITORING; a position
    /// missing one or both TP/SL legs is left for the Sentinel to repair on
    /// its next pass rather than re-attached here.
    async fn reconcile_on_startup(&mut self) {
        let symbols = self.symbols.clone();
        for symbol in symbols {
            let info = match self.gateway.get_position_info(&symbol).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "startup reconciliation: could not fetch position info");
                    continue;
                }
            };
            if info.is_flat() {
                continue;
            }
            let Some(side) = info.side() else { continue };
            if self.shared.positions.lock().await.contains_key(&symbol) {
                continue;
            }

            let filters = match self.gateway.get_filters(&symbol).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "startup reconciliation: could not fetch filters, skipping orphan adoption");
                    continue;
                }
            };
            self.shared.filters.lock().await.insert(symbol.clone(), filters);

            let closing_side = match side {
                Signal::Long => OrderSide::Sell,
                Signal::Short => OrderSide::Buy,
                Signal::Hold => continue,
            };
            let open_orders = self.gateway.get_open_orders(&symbol).await.unwrap_or_default();
            let tp_id = open_orders
                .iter()
                .find(|o| o.side == closing_side && o.order_type.contains("TakeProfit"))
                .map(|o| o.order_id.clone());
            let sl_id = open_orders
                .iter()
                .find(|o| o.side == closing_side && o.order_type.contains("Stop"))
                .map(|o| o.order_id.clone());

            let quantity = info.position_amt.abs();
            let mut position = Position::new(
                symbol.clone(),
                side,
                quantity,
                info.entry_price,
                info.leverage.max(1),
                chrono::Utc::now().timestamp(),
                format!("orphan-{symbol}"),
                Decimal::ZERO,
                Decimal::ZERO,
            );

            match (tp_id, sl_id) {
                (Some(tp), Some(sl)) => {
                    let hash = tpsl_hash(&symbol, side, Decimal::ZERO, Decimal::ZERO);
                    position.mark_monitoring(tp, sl, hash.clone());
                    self.hash_registry.register(hash);
                }
                _ => {
                    position.state = PositionState::Monitoring;
                    warn!(symbol = %symbol, "startup reconciliation: orphan position missing tp/sl leg(s), left for Sentinel repair");
                }
            }

            info!(symbol = %symbol, ?side, %quantity, "startup reconciliation: adopted orphaned venue position into MONITORING");
            self.shared.positions.lock().await.insert(symbol.clone(), position);
            self.shared
                .mutex_states
                .lock()
                .await
                .entry(symbol.clone())
                .or_insert_with(|| SymbolMutexState::new(symbol));
        }
    }

    /// One full pass of the 8-step cycle (spec §4.M).
    pub async fn run_cycle(&mut self) -> anyhow::Result<()> {
        self.cycle += 1;
        let now = chrono::Utc::now().timestamp();

        self.drain_live_monitor_events(now).await;
        self.drain_sentinel_events();

        self.metrics.open_positions.set(self.shared.positions.lock().await.len() as f64);

        // Step 1: refresh balance, snapshot equity, log equity curve.
        let latency_start = Instant::now();
        let balance = self.gateway.get_balance().await?;
        self.record_latency(latency_start.elapsed());

        let (snapshot, drift) = equity::reconcile(
            self.realized_cum,
            self.last_unrealized,
            balance.balance,
            self.peak_equity,
            now,
        );
        self.peak_equity = self.peak_equity.max(snapshot.total_equity);
        self.metrics.total_equity_usd.set(snapshot.total_equity.to_f64().unwrap_or(0.0));
        self.metrics.drawdown_current.set(snapshot.drawdown_from_peak.to_f64().unwrap_or(0.0));
        self.logs.equity.append(equity::to_row(&snapshot, self.peak_equity));
        if let Some(drift) = drift {
            self.logs.errors.append(ErrorLogRow {
                ts: now,
                symbol: None,
                kind: "EquityDrift".to_string(),
                detail: format!("expected={} actual={} diff={}", drift.expected, drift.actual, drift.diff_fraction),
            });
        }

        // Step 2: per-symbol market data / regime / circuit breakers.
        let mut regimes = HashMap::new();
        for symbol in self.symbols.clone() {
            match self.market_data.features(&symbol, false).await {
                Ok(features) => {
                    let regime_output = regime::classify(&features);
                    let book_ticker = self.gateway.get_book_ticker(&symbol).await.ok();
                    let funding_rate = self.gateway.get_funding_rate(&symbol).await.ok();
                    self.entry_breakers.evaluate(
                        &symbol,
                        &features,
                        book_ticker.as_ref(),
                        funding_rate,
                        std::time::Instant::now(),
                    );
                    let paused_now = self.entry_breakers.entries_paused(&symbol, std::time::Instant::now());
                    self.metrics
                        .circuit_breaker_status
                        .with_label_values(&[&symbol])
                        .set(if paused_now { 1.0 } else { 0.0 });
                    if let Some(r) = regime_output {
                        regimes.insert(symbol.clone(), (r, features));
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "market data refresh failed, skipping symbol this cycle");
                    self.logs.errors.append(ErrorLogRow {
                        ts: now,
                        symbol: Some(symbol.clone()),
                        kind: "DataStaleness".to_string(),
                        detail: e.to_string(),
                    });
                }
            }
        }

        // Step 3: global kill-switch ladder.
        let kill_switch_inputs = KillSwitchInputs {
            starting_equity: self.peak_equity.max(snapshot.total_equity),
            daily_realized_pnl: self.realized_cum,
            drawdown_from_peak: snapshot.drawdown_from_peak,
            consecutive_losses: self.max_consecutive_losses().await,
            recent_call_latencies_ms: self.recent_latencies_ms.iter().copied().collect(),
        };
        let kill_switch_trip = self.kill_switch_state.evaluate(&self.kill_switch_config, &kill_switch_inputs);
        let entries_allowed = kill_switch_trip.is_none();
        if let Some(trip) = &kill_switch_trip {
            self.metrics.kill_switch_active.set(1.0);
            warn!(?trip, "global kill-switch tripped, new entries suspended this cycle");
        } else {
            self.metrics.kill_switch_active.set(0.0);
        }

        // Steps 4-6: per-symbol decisions -> arbitration -> sizing/entry.
        for symbol in self.symbols.clone() {
            let Some((regime_output, features)) = regimes.get(&symbol).cloned() else {
                continue;
            };

            let mut decisions = Vec::new();
            for agent in self.agents.iter().filter(|a| a.symbol == symbol) {
                let market_snapshot = serde_json::json!({ "symbol": symbol });
                match self
                    .decision_provider
                    .decide(&agent.agent_id, &symbol, &market_snapshot, 0.0, self.cycle)
                    .await
                {
                    Ok(mut decision) => {
                        decision.timestamp = now;
                        decision.normalized_confidence =
                            self.confidence_normalizer.normalize(&agent.agent_id, decision.raw_confidence, &regime_output);
                        self.logs.decisions.append(DecisionLogRow {
                            ts: now,
                            agent_id: decision.agent_id.clone(),
                            symbol: decision.symbol.clone(),
                            raw_signal: format!("{:?}", decision.raw_signal),
                            raw_confidence: decision.raw_confidence,
                            normalized_confidence: decision.normalized_confidence,
                            strategy_tag: decision.strategy_tag.clone(),
                        });
                        let decision_ref = outcome::decision_ref(&decision);
                        self.agent_status
                            .record_decision(&agent.agent_id, &format!("{:?}", decision.raw_signal))
                            .await;
                        self.decisions_by_ref.insert(decision_ref, decision.clone());
                        decisions.push(decision);
                    }
                    Err(e) => {
                        warn!(symbol = %symbol, agent = %agent.agent_id, error = %e, "decision provider error");
                        self.agent_status.record_error(&agent.agent_id).await;
                    }
                }
            }

            if decisions.is_empty() {
                continue;
            }

            let intent = arbitrate(&symbol, &decisions, &self.agents);
            if !intent.side.is_directional() {
                continue;
            }

            let paused = self.entry_breakers.entries_paused(&symbol, std::time::Instant::now());
            if paused {
                continue;
            }

            self.handle_directional_intent(
                &symbol,
                intent.side,
                &regime_output,
                &features,
                entries_allowed,
                kill_switch_inputs.clone(),
                now,
            )
            .await;
        }

        // Step 7: every N cycles, authoritative equity reconciliation.
        if self.cycle % self.orchestrator_config.equity_reconciliation_every_n_cycles == 0 {
            self.run_equity_reconciliation(now).await?;
        }

        // Step 8: every N cycles, flush buffered CSV logs.
        if self.cycle % self.orchestrator_config.csv_flush_every_n_cycles == 0 {
            self.logs.flush_all();
        }

        self.metrics.cycles_total.with_label_values(&["ok"]).inc();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_directional_intent(
        &mut self,
        symbol: &str,
        side: Signal,
        regime_output: &regime::RegimeOutput,
        features: &crate::application::market_data::FeatureSet,
        entries_allowed: bool,
        kill_switch_inputs: KillSwitchInputs,
        now: i64,
    ) {
        let existing_side = {
            let positions = self.shared.positions.lock().await;
            positions.get(symbol).map(|p| p.side)
        };

        match existing_side {
            Some(open_side) if open_side != side => {
                self.close_position(symbol, now).await;
            }
            Some(_) => {}
            None => {
                if entries_allowed {
                    self.try_open_position(symbol, side, regime_output, features, kill_switch_inputs, now).await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_open_position(
        &mut self,
        symbol: &str,
        side: Signal,
        regime_output: &regime::RegimeOutput,
        features: &crate::application::market_data::FeatureSet,
        kill_switch_inputs: KillSwitchInputs,
        now: i64,
    ) {
        let (Some(atr_fast), Some(price)) = (features.atr_fast, features.last_price) else {
            return;
        };
        if price.is_zero() {
            return;
        }
        let atr_pct = atr_fast / price;
        let tp_frac = atr_pct * regime_output.tp_atr_multiplier;
        let sl_frac = atr_pct * regime_output.sl_atr_multiplier;
        if tp_frac.is_zero() || sl_frac.is_zero() {
            return;
        }

        let cached_filters = self.shared.filters.lock().await.get(symbol).cloned();
        let filters = match cached_filters {
            Some(f) => f,
            None => match self.gateway.get_filters(symbol).await {
                Ok(f) => {
                    self.shared.filters.lock().await.insert(symbol.to_string(), f.clone());
                    f
                }
                Err(e) => {
                    warn!(symbol, error = %e, "could not fetch symbol filters");
                    return;
                }
            },
        };

        let own_returns = self
            .market_data
            .candles(symbol)
            .await
            .map(|candles| {
                let closes: Vec<f64> = candles.iter().map(|c| c.close.to_f64().unwrap_or(0.0)).collect();
                crate::application::risk::correlation::returns(&closes)
            })
            .unwrap_or_default();

        let open_positions_same_symbol = {
            let positions = self.shared.positions.lock().await;
            positions.values().filter(|p| p.symbol == symbol).count() as u32
        };

        let pipeline_inputs = PipelineInputs {
            symbol,
            side,
            equity: self.peak_equity.max(self.realized_cum),
            price,
            stop_distance_fraction: sl_frac,
            regime: regime_output,
            kill_switch_inputs,
            own_returns: &own_returns,
            open_exposures: &[] as &[OpenExposure],
            open_positions_same_symbol,
            filters: &filters,
        };

        let sized: Result<SizedEntry, RiskViolation> =
            evaluate_entry(&self.pipeline_config, &self.leverage_governor, &pipeline_inputs);

        let sized = match sized {
            Ok(s) => s,
            Err(e) => {
                info!(symbol, error = %e, "risk pipeline rejected entry");
                return;
            }
        };

        let decision_ref = format!("agg-{symbol}-{now}");
        let req = EntryRequest {
            symbol: symbol.to_string(),
            side,
            quantity: sized.quantity,
            leverage: sized.leverage,
            tp_frac,
            sl_frac,
            decision_ref,
            existing_open_same_direction: false,
        };

        let mut mutex_states = self.shared.mutex_states.lock().await;
        let mutex_state = mutex_states.entry(symbol.to_string()).or_insert_with(|| SymbolMutexState::new(symbol.to_string()));

        match self
            .order_manager
            .submit_entry(req, mutex_state, &mut self.hash_registry, &filters, now, self.orchestrator_config.reversal_cooldown_secs)
            .await
        {
            Ok(position) => {
                self.metrics.orders_total.with_label_values(&["entry", "ok"]).inc();
                self.shared.positions.lock().await.insert(symbol.to_string(), position);
            }
            Err(e @ crate::domain::errors::OrderManagerError::InvalidTpslGeometry { .. }) => {
                self.metrics.orders_total.with_label_values(&["entry", "err"]).inc();
                error!(symbol, error = %e, "entry placed then emergency-closed: invalid tp/sl geometry");
            }
            Err(e) => {
                self.metrics.orders_total.with_label_values(&["entry", "err"]).inc();
                info!(symbol, error = %e, "entry rejected");
            }
        }
    }

    async fn close_position(&mut self, symbol: &str, now: i64) {
        let mut positions = self.shared.positions.lock().await;
        let Some(position) = positions.get_mut(symbol) else { return };
        let filters = self.shared.filters.lock().await.get(symbol).cloned();
        let Some(filters) = filters else { return };
        let mark_price = self.gateway.get_ticker(symbol).await.unwrap_or(position.entry_price);

        let mut mutex_states = self.shared.mutex_states.lock().await;
        let mutex_state = mutex_states.entry(symbol.to_string()).or_insert_with(|| SymbolMutexState::new(symbol.to_string()));

        if let Err(e) = self.order_manager.close(position, mutex_state, &filters, mark_price).await {
            info!(symbol, error = %e, "reversal-driven exit rejected");
            return;
        }

        let realized_pnl = realized_pnl_estimate(position, mark_price);
        let was_loss = realized_pnl < Decimal::ZERO;
        mutex_state.record_exit(now, was_loss);
        self.leverage_governor.record_trade_outcome(was_loss);
        self.realized_cum += realized_pnl;

        let outcome_record = TradeOutcome {
            position_ref: symbol.to_string(),
            exit_reason: ExitReason::Manual,
            exit_price: mark_price,
            realized_pnl,
            hold_duration_secs: now - position.opened_at,
            market_snapshot_at_exit: serde_json::Value::Null,
            decision_ref: position.decision_ref.clone(),
        };
        self.record_outcome(&outcome_record, now);
    }

    async fn drain_live_monitor_events(&mut self, now: i64) {
        while let Ok(event) = self.live_monitor_rx.try_recv() {
            match event {
                LiveMonitorEvent::PositionClosedExternally { symbol, position } => {
                    info!(symbol, "position closed externally, reconciling outcome");
                    let outcome_record = TradeOutcome {
                        position_ref: symbol.clone(),
                        exit_reason: ExitReason::Tp,
                        exit_price: position.entry_price,
                        realized_pnl: Decimal::ZERO,
                        hold_duration_secs: now - position.opened_at,
                        market_snapshot_at_exit: serde_json::Value::Null,
                        decision_ref: position.decision_ref.clone(),
                    };
                    self.leverage_governor.record_trade_outcome(false);
                    self.record_outcome(&outcome_record, now);
                }
                LiveMonitorEvent::TpslMissing { symbol, .. } => {
                    warn!(symbol, "tp/sl leg missing, awaiting sentinel repair");
                }
                LiveMonitorEvent::PartialCloseTriggered { symbol } => {
                    info!(symbol, "partial close triggered by live monitor");
                }
            }
        }
    }

    fn drain_sentinel_events(&mut self) {
        while let Ok(event) = self.sentinel_rx.try_recv() {
            match event {
                SentinelEvent::ReattachSucceeded { symbol } => {
                    self.metrics.reattach_total.with_label_values(&["ok"]).inc();
                    info!(symbol, "sentinel reattached tp/sl");
                }
                SentinelEvent::ReattachSkippedMargin { symbol } => {
                    self.metrics.reattach_total.with_label_values(&["margin_skip"]).inc();
                    warn!(symbol, "sentinel skipped reattach: margin insufficient");
                }
                SentinelEvent::ReattachSkippedDebounced { symbol } => {
                    self.metrics.reattach_total.with_label_values(&["debounced"]).inc();
                }
                SentinelEvent::ReattachFailed { symbol, reason } => {
                    self.metrics.reattach_total.with_label_values(&["failed"]).inc();
                    warn!(symbol, reason, "sentinel reattach failed");
                }
            }
        }
    }

    /// Resolves the decision behind `outcome.decision_ref`, updates the
    /// Confidence Normalizer, appends the learning and trade logs (spec
    /// §4.O).
    fn record_outcome(&mut self, outcome_record: &TradeOutcome, now: i64) {
        if let Some(decision) = self.decisions_by_ref.remove(&outcome_record.decision_ref) {
            if let Some(row) = outcome::resolve_outcome(
                outcome_record,
                std::slice::from_ref(&decision),
                &mut self.confidence_normalizer,
                now,
            ) {
                self.logs.learning.append(row);
            }
            self.logs.trades.append(TradeLogRow {
                ts: now,
                symbol: decision.symbol.clone(),
                side: format!("{:?}", decision.raw_signal),
                entry_price: Decimal::ZERO,
                exit_price: outcome_record.exit_price,
                quantity: Decimal::ZERO,
                leverage: 0,
                exit_reason: format!("{:?}", outcome_record.exit_reason),
                realized_pnl: outcome_record.realized_pnl,
                hold_duration_secs: outcome_record.hold_duration_secs,
                decision_ref: outcome_record.decision_ref.clone(),
            });
        }
    }

    async fn run_equity_reconciliation(&mut self, now: i64) -> anyhow::Result<()> {
        let open_positions: Vec<Position> = self.shared.positions.lock().await.values().cloned().collect();
        let refs: Vec<&Position> = open_positions.iter().collect();
        self.last_unrealized = equity::unrealized_pnl(self.gateway.as_ref(), &refs).await;

        let balance = self.gateway.get_balance().await?;
        let (snapshot, drift) = equity::reconcile(self.realized_cum, self.last_unrealized, balance.balance, self.peak_equity, now);
        self.peak_equity = self.peak_equity.max(snapshot.total_equity);
        self.logs.equity.append(equity::to_row(&snapshot, self.peak_equity));
        if let Some(drift) = drift {
            warn!(?drift, "equity reconciliation drift");
        }
        Ok(())
    }

    async fn max_consecutive_losses(&self) -> u32 {
        self.shared
            .mutex_states
            .lock()
            .await
            .values()
            .map(|s| s.consecutive_losses)
            .max()
            .unwrap_or(0)
    }

    fn record_latency(&mut self, elapsed: Duration) {
        self.recent_latencies_ms.push_back(elapsed.as_millis() as u64);
        if self.recent_latencies_ms.len() > 20 {
            self.recent_latencies_ms.pop_front();
        }
    }
}

/// Crude realized-PnL estimate for a manually-closed (reversal) position;
/// externally-closed positions resolve their true PnL from the venue fill,
/// not this helper.
fn realized_pnl_estimate(position: &Position, exit_price: Decimal) -> Decimal {
    let diff = match position.side {
        Signal::Long => exit_price - position.entry_price,
        Signal::Short => position.entry_price - exit_price,
        Signal::Hold => Decimal::ZERO,
    };
    diff * position.quantity
}
