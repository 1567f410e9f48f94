//! Risk validation pipeline (spec §4.G): fail-fast ordered gate that turns
//! an arbitrated LONG/SHORT intent into a sized, leverage-assigned entry or
//! a structured rejection. Grounded in the teacher's
//! `risk_management/pipeline/validation_pipeline.rs` ordered-validator
//! shape, collapsed here into one function since every check here is a
//! plain synchronous calculation rather than an injectable trait object.

use rust_decimal::Decimal;
use tracing::info;

use crate::application::regime::RegimeOutput;
use crate::application::risk::correlation::{self, OpenExposure};
use crate::application::risk::kill_switch::{self, KillSwitchConfig, KillSwitchInputs};
use crate::application::risk::leverage::LeverageGovernor;
use crate::application::risk::sizing::{self, SizingInputs, SizingOutcome};
use crate::domain::decision::Signal;
use crate::domain::errors::RiskViolation;
use crate::domain::symbol::SymbolFilters;

pub struct PipelineConfig {
    pub kill_switch: KillSwitchConfig,
    pub risk_fraction: Decimal,
    pub risk_fraction_ceiling: Decimal,
    pub max_margin_per_trade: Decimal,
    pub min_margin_per_trade: Decimal,
    pub max_positions_per_symbol: u32,
}

pub struct PipelineInputs<'a> {
    pub symbol: &'a str,
    pub side: Signal,
    pub equity: Decimal,
    pub price: Decimal,
    pub stop_distance_fraction: Decimal,
    pub regime: &'a RegimeOutput,
    pub kill_switch_inputs: KillSwitchInputs,
    pub own_returns: &'a [f64],
    pub open_exposures: &'a [OpenExposure<'a>],
    pub open_positions_same_symbol: u32,
    pub filters: &'a SymbolFilters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizedEntry {
    pub quantity: Decimal,
    pub leverage: u32,
}

/// Runs the ordered gate: kill-switch → regime → position-count → sizing.
/// Circuit breakers (spec §4.H) are evaluated separately by the caller since
/// they are per-symbol and independent of sizing math.
pub fn evaluate_entry(
    config: &PipelineConfig,
    leverage_governor: &LeverageGovernor,
    inputs: &PipelineInputs,
) -> Result<SizedEntry, RiskViolation> {
    if let Some(trip) = kill_switch::check(&config.kill_switch, &inputs.kill_switch_inputs) {
        return Err(RiskViolation::KillSwitchActive {
            reason: format!("{trip:?}"),
        });
    }

    if inputs.regime.skips_entry() {
        return Err(RiskViolation::RegimeSkipsEntry {
            regime: format!("{:?}", inputs.regime.regime),
        });
    }

    if inputs.open_positions_same_symbol >= config.max_positions_per_symbol {
        return Err(RiskViolation::MaxPositionsExceeded {
            max: config.max_positions_per_symbol,
        });
    }

    let correlation_adjustment = Decimal::try_from(correlation::correlation_adjustment(
        inputs.side,
        inputs.own_returns,
        inputs.open_exposures,
    ))
    .unwrap_or(Decimal::ONE);

    let leverage = leverage_governor.effective_leverage(inputs.regime.regime);

    let sizing_inputs = SizingInputs {
        equity: inputs.equity,
        price: inputs.price,
        stop_distance_fraction: inputs.stop_distance_fraction,
        regime_size_multiplier: inputs.regime.size_multiplier,
        correlation_adjustment,
        risk_fraction: config.risk_fraction,
        risk_fraction_ceiling: config.risk_fraction_ceiling,
        leverage,
        max_margin_per_trade: config.max_margin_per_trade,
        min_margin_per_trade: config.min_margin_per_trade,
    };

    match sizing::calculate_quantity(&sizing_inputs, inputs.symbol, inputs.filters) {
        SizingOutcome::Quantity(quantity) => {
            info!(symbol = inputs.symbol, %quantity, leverage, "risk pipeline approved entry");
            Ok(SizedEntry { quantity, leverage })
        }
        SizingOutcome::ZeroSize => Err(RiskViolation::ZeroSize),
        SizingOutcome::BelowMinMargin { notional, min_margin } => {
            Err(RiskViolation::BelowMinMargin { notional, min_margin })
        }
        SizingOutcome::AboveMaxMargin { notional, max_margin } => {
            Err(RiskViolation::AboveMaxMargin { notional, max_margin })
        }
    }
}
