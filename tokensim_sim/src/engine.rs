//! Reference tokenomics engine for simulation.
//!
//! The engine stands in for the external simulation API:
//! - Monthly supply evolution (inflation, burns, staking, vesting)
//! - Shock events applied at their month
//! - Injectable failures and virtual latency
//!
//! Both the direct provider path and the simulated streaming server compute
//! results here, so a scenario produces the same series either way.

use crate::context::SimContext;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokensim_core::model::{BurnKind, InflationConfig, InflationKind, VestingConfig};
use tokensim_core::{
    EventType, ProviderError, ScenarioParams, ShockEvent, SimulationProvider, SimulationResult, SummaryMetrics,
    TokenPoint,
};
use tokensim_env::TokenSimContext;
use tracing::{debug, info};

/// Running supply totals between steps.
#[derive(Debug, Clone, Copy, Default)]
struct Ledger {
    total: f64,
    burned: f64,
    staked: f64,
    vested: f64,
    /// Vesting allocations not yet released
    locked: f64,
    /// Liquidity pulled out of circulation by shocks
    withdrawn: f64,
}

impl Ledger {
    fn burn(&mut self, amount: f64) {
        let amount = amount.clamp(0.0, self.total);
        self.total -= amount;
        self.burned += amount;
    }

    fn point(&self, time: u32) -> TokenPoint {
        let circulating = self.total - self.staked - self.locked - self.withdrawn;
        TokenPoint {
            time,
            total_supply: self.total,
            circulating_supply: circulating.max(0.0),
            burned_supply: self.burned,
            staked_supply: self.staked,
            vested_supply: self.vested,
        }
    }
}

/// Annual inflation rate (%) in effect at `month`.
fn inflation_rate(config: &InflationConfig, month: u32) -> f64 {
    match config.kind {
        InflationKind::Constant => config.initial_rate,
        InflationKind::Dynamic => {
            let decay = config.decay_rate.unwrap_or(0.0) / 100.0;
            let years = f64::from(month) / 12.0;
            let decayed = config.initial_rate * (1.0 - decay).powf(years);
            decayed.max(config.min_rate.unwrap_or(0.0))
        }
        InflationKind::Halving => {
            let period = config.halving_period.unwrap_or(u32::MAX).max(1);
            let halvings = (month.saturating_sub(1) / period).min(63);
            config.initial_rate / 2f64.powi(halvings as i32)
        }
    }
}

/// Tokens released by `month`, cliffs included.
fn vested_by(config: &VestingConfig, month: u32) -> f64 {
    config
        .periods
        .iter()
        .map(|period| {
            if month < period.start_period + period.cliff_duration {
                return 0.0;
            }
            let elapsed = month.saturating_sub(period.start_period);
            let fraction = (f64::from(elapsed) / f64::from(period.duration.max(1))).min(1.0);
            period.amount * fraction
        })
        .sum()
}

/// Runs one scenario. Deterministic: same inputs, same series.
pub fn simulate(params: &ScenarioParams, shocks: &[ShockEvent]) -> Result<SimulationResult, ProviderError> {
    params.validate().map_err(|e| ProviderError::remote(e.to_string()))?;
    let horizon = params.duration_in_months();
    for shock in shocks {
        shock.validate(horizon).map_err(|e| ProviderError::remote(e.to_string()))?;
    }

    let months_per_step = params.time_step.months();
    let step_years = f64::from(months_per_step) / 12.0;
    let staking = params.staking_config.as_ref().filter(|s| s.enabled);

    let mut ledger = Ledger {
        total: params.initial_supply,
        ..Default::default()
    };
    if let Some(staking) = staking {
        ledger.staked = params.initial_supply * staking.target_rate.unwrap_or(0.0) / 100.0;
    }
    if let Some(vesting) = &params.vesting_config {
        let allocated: f64 = vesting.periods.iter().map(|p| p.amount).sum();
        ledger.locked = allocated.min(params.initial_supply - ledger.staked).max(0.0);
    }

    let mut evolution = Vec::with_capacity(params.duration as usize + 1);
    evolution.push(ledger.point(0));

    for step in 1..=params.duration {
        let month = step * months_per_step;
        let previous = month - months_per_step;
        let shocks_now: Vec<&ShockEvent> = shocks
            .iter()
            .filter(|s| s.normalized_month() > previous && s.normalized_month() <= month)
            .collect();

        // Issuance
        if let Some(inflation) = &params.inflation_config {
            let mut rate = inflation_rate(inflation, month);
            for shock in shocks_now.iter().filter(|s| s.event_type == EventType::InflationSpike) {
                rate *= 1.0 + shock.value;
            }
            ledger.total += ledger.total * rate.max(0.0) / 100.0 * step_years;
        }
        if let Some(staking) = staking {
            let reward = ledger.staked * staking.reward_rate.unwrap_or(0.0) / 100.0 * step_years;
            ledger.total += reward;
        }

        // Burns
        if let Some(burn) = &params.burn_config {
            if let (BurnKind::Continuous, Some(rate)) = (burn.kind, burn.rate) {
                ledger.burn(ledger.total * rate / 100.0 * step_years);
            }
            let scheduled: f64 = burn
                .events
                .iter()
                .filter(|e| e.month > previous && e.month <= month)
                .map(|e| e.amount)
                .sum();
            ledger.burn(scheduled);
        }

        for shock in &shocks_now {
            let magnitude = shock.value.abs();
            match shock.event_type {
                EventType::MassBurn => ledger.burn(ledger.total * magnitude),
                EventType::LiquidityInjection => {
                    ledger.total += ledger.total * magnitude;
                }
                EventType::LiquidityRemoval => {
                    let free = (ledger.total - ledger.staked - ledger.locked - ledger.withdrawn).max(0.0);
                    ledger.withdrawn += free * magnitude;
                }
                EventType::MarketShock => {
                    ledger.staked = (ledger.staked * (1.0 + shock.value)).clamp(0.0, ledger.total);
                }
                EventType::InflationSpike => {}
            }
            debug!(month, event = %shock.event_type, value = shock.value, "Shock applied");
        }

        // Releases
        if let Some(vesting) = &params.vesting_config {
            let released = vested_by(vesting, month).min(ledger.vested + ledger.locked);
            let delta = (released - ledger.vested).max(0.0);
            ledger.vested += delta;
            ledger.locked -= delta;
        }
        ledger.staked = ledger.staked.min(ledger.total);

        evolution.push(ledger.point(step));
    }

    let metrics = SummaryMetrics {
        final_supply: ledger.total,
        total_burned: ledger.burned,
        total_staked: ledger.staked,
        total_vested: ledger.vested,
    };
    SimulationResult::new(evolution, metrics)
}

/// Failures queued for upcoming calls.
#[derive(Debug, Default)]
struct Faults {
    next: VecDeque<String>,
    always: Option<String>,
}

/// [`SimulationProvider`] backed by [`simulate`], with fault injection.
pub struct ReferenceEngine {
    clock: Option<Arc<SimContext>>,
    latency: Duration,
    faults: Mutex<Faults>,
    calls: AtomicU64,
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self {
            clock: None,
            latency: Duration::ZERO,
            faults: Mutex::new(Faults::default()),
            calls: AtomicU64::new(0),
        }
    }

    /// Every call spends `latency` of virtual time on `clock`.
    pub fn with_latency(mut self, clock: Arc<SimContext>, latency: Duration) -> Self {
        self.clock = Some(clock);
        self.latency = latency;
        self
    }

    /// The next call fails with `message` (queued, one per call).
    pub fn fail_next(&self, message: impl Into<String>) {
        self.faults.lock().next.push_back(message.into());
    }

    /// Every call fails with `message` until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, message: impl Into<String>) {
        self.faults.lock().always = Some(message.into());
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Calls served so far, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(clock) = &self.clock {
            if !self.latency.is_zero() {
                clock.sleep(self.latency).await;
            }
        }
        let mut faults = self.faults.lock();
        if let Some(message) = faults.next.pop_front().or_else(|| faults.always.clone()) {
            info!(%message, "Injected provider failure");
            return Err(ProviderError::remote(message));
        }
        Ok(())
    }
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimulationProvider for ReferenceEngine {
    async fn simulate(
        &self,
        params: &ScenarioParams,
        shock_events: &[ShockEvent],
    ) -> Result<SimulationResult, ProviderError> {
        self.begin_call().await?;
        simulate(params, shock_events)
    }

    async fn compare(&self, scenarios: &[ScenarioParams]) -> Result<Vec<SimulationResult>, ProviderError> {
        self.begin_call().await?;
        scenarios.iter().map(|params| simulate(params, &[])).collect()
    }
}
