//! Wires concrete infrastructure adapters into the application services the
//! Orchestrator, Live Monitor, and Sentinel depend on. Grounded in the
//! teacher's `application/bootstrap/{persistence,services,agents}.rs` split;
//! collapsed into one module here since this crate has a single exchange
//! adapter and no database layer to stand up separately.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Mutex, mpsc};

use crate::application::decision_provider::CachingDecisionProvider;
use crate::application::live_monitor::{LiveMonitor, LiveMonitorEvent, LogDebounceState};
use crate::application::market_data::MarketDataCache;
use crate::application::order_manager::OrderManager;
use crate::application::orchestrator::{Orchestrator, OrchestratorConfig, PersistedLogs, SharedState};
use crate::application::risk::kill_switch::KillSwitchConfig;
use crate::application::risk::PipelineConfig;
use crate::application::sentinel::{Sentinel, SentinelEvent};
use crate::config::Config;
use crate::domain::agent::Agent;
use crate::domain::ports::ExchangeGateway;
use crate::infrastructure::decision_source::StubDecisionProvider;
use crate::infrastructure::gateway::binance::BinanceFuturesGateway;
use crate::infrastructure::observability::metrics::Metrics;
use crate::infrastructure::persistence::CsvLog;
use crate::infrastructure::persistence::records::{
    DecisionLogRow, EquityCurveRow, ErrorLogRow, LearningLogRow, TradeLogRow,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Every long-lived component the three concurrent actors (orchestrator,
/// live monitor, sentinel) need, plus the join handles for the two
/// background tasks so `system` can manage their lifetime.
pub struct Bootstrapped {
    pub orchestrator: Orchestrator,
    pub live_monitor: LiveMonitor,
    pub live_monitor_shared: LiveMonitorShared,
    pub sentinel: Sentinel,
    pub sentinel_shared: SentinelShared,
}

#[derive(Clone)]
pub struct LiveMonitorShared {
    pub positions: Arc<Mutex<HashMap<String, crate::domain::position::Position>>>,
    pub filters: Arc<Mutex<HashMap<String, crate::domain::symbol::SymbolFilters>>>,
    pub debounce: LogDebounceState,
    pub event_tx: mpsc::Sender<LiveMonitorEvent>,
}

#[derive(Clone)]
pub struct SentinelShared {
    pub positions: Arc<Mutex<HashMap<String, crate::domain::position::Position>>>,
    pub mutex_states: Arc<Mutex<HashMap<String, crate::domain::position::SymbolMutexState>>>,
    pub filters: Arc<Mutex<HashMap<String, crate::domain::symbol::SymbolFilters>>>,
    pub event_tx: mpsc::Sender<SentinelEvent>,
}

fn open_csv_logs(data_dir: &str) -> PersistedLogs {
    let dir = Path::new(data_dir);
    PersistedLogs {
        equity: CsvLog::<EquityCurveRow>::new(dir.join("equity_curve.csv")),
        trades: CsvLog::<TradeLogRow>::new(dir.join("trades_log.csv")),
        decisions: CsvLog::<DecisionLogRow>::new(dir.join("decisions_log.csv")),
        errors: CsvLog::<ErrorLogRow>::new(dir.join("errors_log.csv")),
        learning: CsvLog::<LearningLogRow>::new(dir.join("learning_log.csv")),
    }
}

/// Builds every service from `Config`, loading agent definitions from
/// `config.agents_dir`. The returned `Bootstrapped` owns everything
/// `system::Application` needs to spawn the three concurrent actors.
pub fn bootstrap(config: &Config, metrics: Arc<Metrics>, agents: Vec<Agent>) -> Result<Bootstrapped> {
    std::fs::create_dir_all(&config.orchestrator.data_dir)?;

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(BinanceFuturesGateway::new(&config.gateway));
    let market_data = Arc::new(MarketDataCache::new(gateway.clone()));
    let decision_provider = Arc::new(CachingDecisionProvider::new(Arc::new(StubDecisionProvider)));
    let order_manager = Arc::new(OrderManager::new(gateway.clone()));

    let positions = Arc::new(Mutex::new(HashMap::new()));
    let mutex_states = Arc::new(Mutex::new(HashMap::new()));
    let filters = Arc::new(Mutex::new(HashMap::new()));

    let (live_monitor_tx, live_monitor_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (sentinel_tx, sentinel_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let pipeline_config = PipelineConfig {
        kill_switch: KillSwitchConfig {
            max_daily_loss_pct: config.risk.max_daily_loss_pct,
            max_drawdown: config.risk.max_drawdown,
            consecutive_loss_limit: config.risk.consecutive_loss_limit,
            max_avg_latency_ms: config.risk.max_avg_latency_ms,
        },
        risk_fraction: config.risk.risk_fraction,
        risk_fraction_ceiling: config.risk.risk_fraction_ceiling,
        max_margin_per_trade: config.risk.max_margin_per_trade,
        min_margin_per_trade: config.risk.min_margin_per_trade,
        max_positions_per_symbol: config.risk.max_positions_per_symbol,
    };
    let kill_switch_config = pipeline_config.kill_switch.clone();

    let orchestrator_config = OrchestratorConfig {
        cadence: std::time::Duration::from_secs(config.orchestrator.cycle_cadence_secs),
        cycle_timeout: std::time::Duration::from_secs(config.orchestrator.cycle_timeout_secs),
        reversal_cooldown_secs: config.orchestrator.reversal_cooldown_secs,
        equity_reconciliation_every_n_cycles: config.orchestrator.equity_reconciliation_every_n_cycles,
        csv_flush_every_n_cycles: config.orchestrator.csv_flush_every_n_cycles,
    };

    let shared = SharedState {
        positions: positions.clone(),
        mutex_states: mutex_states.clone(),
        filters: filters.clone(),
    };

    let orchestrator = Orchestrator::new(
        gateway.clone(),
        market_data,
        decision_provider,
        order_manager.clone(),
        metrics,
        agents,
        shared,
        pipeline_config,
        kill_switch_config,
        orchestrator_config,
        open_csv_logs(&config.orchestrator.data_dir),
        live_monitor_rx,
        sentinel_rx,
        config.risk.max_leverage,
    );

    let live_monitor = LiveMonitor::new(
        gateway.clone(),
        order_manager.clone(),
        std::time::Duration::from_secs(config.orchestrator.live_monitor_poll_secs),
    );
    let live_monitor_shared = LiveMonitorShared {
        positions: positions.clone(),
        filters: filters.clone(),
        debounce: Arc::new(Mutex::new(HashMap::new())),
        event_tx: live_monitor_tx,
    };

    let sentinel = Sentinel::new(
        gateway,
        order_manager,
        std::time::Duration::from_secs(config.orchestrator.sentinel_poll_secs),
    );
    let sentinel_shared = SentinelShared {
        positions,
        mutex_states,
        filters,
        event_tx: sentinel_tx,
    };

    Ok(Bootstrapped {
        orchestrator,
        live_monitor,
        live_monitor_shared,
        sentinel,
        sentinel_shared,
    })
}
