//! Scenario parameters and simulation results.
//!
//! The field names follow the simulation API's JSON (`initial_supply`,
//! `inflation_config`, `evolution`, ...) so these types go over the wire
//! unchanged. Rates are percentages (`5.0` = 5%); shock event values are
//! fractions and live in [`crate::shock`].

use crate::error::{ProviderError, ValidationError};
use serde::{Deserialize, Serialize};

/// Longest simulation horizon the provider accepts, in `time_step` units.
pub const MAX_DURATION: u32 = 360;

// =============================================================================
// SCENARIO PARAMETERS
// =============================================================================

/// Granularity of the simulation clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeStep {
    Monthly,
    Yearly,
}

impl TimeStep {
    /// Months per step.
    pub fn months(&self) -> u32 {
        match self {
            TimeStep::Monthly => 1,
            TimeStep::Yearly => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InflationKind {
    Constant,
    Dynamic,
    Halving,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InflationConfig {
    #[serde(rename = "type")]
    pub kind: InflationKind,
    pub initial_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay_rate: Option<f64>,
    /// Months between halvings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halving_period: Option<u32>,
}

impl InflationConfig {
    /// Constant annual inflation at `rate` percent.
    pub fn constant(rate: f64) -> Self {
        Self {
            kind: InflationKind::Constant,
            initial_rate: rate,
            min_rate: None,
            decay_rate: None,
            halving_period: None,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check_range("inflation_config.initial_rate", self.initial_rate, 0.0, 100.0)?;
        if let Some(min) = self.min_rate {
            ValidationError::check_range("inflation_config.min_rate", min, 0.0, 100.0)?;
        }
        if let Some(decay) = self.decay_rate {
            ValidationError::check_range("inflation_config.decay_rate", decay, 0.0, 100.0)?;
        }
        match self.kind {
            InflationKind::Dynamic if self.min_rate.is_none() => Err(ValidationError::MissingField {
                field: "inflation_config.min_rate",
                context: "dynamic inflation",
            }),
            InflationKind::Dynamic if self.decay_rate.is_none() => Err(ValidationError::MissingField {
                field: "inflation_config.decay_rate",
                context: "dynamic inflation",
            }),
            InflationKind::Halving => match self.halving_period {
                None => Err(ValidationError::MissingField {
                    field: "inflation_config.halving_period",
                    context: "halving inflation",
                }),
                Some(0) => Err(ValidationError::OutOfRange {
                    field: "inflation_config.halving_period",
                    value: 0.0,
                    min: 1.0,
                    max: f64::from(u32::MAX),
                }),
                Some(_) => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BurnKind {
    #[serde(rename = "continuous")]
    Continuous,
    #[serde(rename = "event-based")]
    EventBased,
}

/// A scheduled burn of a fixed token amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnEvent {
    pub month: u32,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnConfig {
    #[serde(rename = "type")]
    pub kind: BurnKind,
    /// Annual burn rate (%) for continuous burns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<BurnEvent>,
}

impl BurnConfig {
    /// Continuous burn at `rate` percent.
    pub fn continuous(rate: f64) -> Self {
        Self {
            kind: BurnKind::Continuous,
            rate: Some(rate),
            events: Vec::new(),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match (self.kind, self.rate) {
            (BurnKind::Continuous, None) => {
                return Err(ValidationError::MissingField {
                    field: "burn_config.rate",
                    context: "continuous burn",
                })
            }
            (_, Some(rate)) => ValidationError::check_range("burn_config.rate", rate, 0.0, 100.0)?,
            _ => {}
        }
        for event in &self.events {
            ValidationError::check_range("burn_config.events.month", f64::from(event.month), 1.0, f64::from(u32::MAX))?;
            if !(event.amount > 0.0) {
                return Err(ValidationError::OutOfRange {
                    field: "burn_config.events.amount",
                    value: event.amount,
                    min: f64::MIN_POSITIVE,
                    max: f64::MAX,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StakingConfig {
    pub enabled: bool,
    /// Target participation (%)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_rate: Option<f64>,
    /// Annual reward rate (%)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_rate: Option<f64>,
    /// Lock period in months
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_duration: Option<u32>,
}

impl StakingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(target) = self.target_rate {
            ValidationError::check_range("staking_config.target_rate", target, 0.0, 100.0)?;
        }
        if let Some(reward) = self.reward_rate {
            ValidationError::check_range("staking_config.reward_rate", reward, 0.0, 1000.0)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VestingPeriod {
    pub start_period: u32,
    pub duration: u32,
    pub amount: f64,
    #[serde(default)]
    pub cliff_duration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VestingConfig {
    pub periods: Vec<VestingPeriod>,
}

impl VestingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.periods.is_empty() {
            return Err(ValidationError::MissingField {
                field: "vesting_config.periods",
                context: "vesting",
            });
        }
        for period in &self.periods {
            ValidationError::check_range("vesting_config.duration", f64::from(period.duration), 1.0, f64::from(u32::MAX))?;
            if !(period.amount > 0.0) {
                return Err(ValidationError::OutOfRange {
                    field: "vesting_config.amount",
                    value: period.amount,
                    min: f64::MIN_POSITIVE,
                    max: f64::MAX,
                });
            }
        }
        Ok(())
    }
}

/// Immutable parameter snapshot of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub initial_supply: f64,
    pub time_step: TimeStep,
    /// Horizon in `time_step` units
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inflation_config: Option<InflationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burn_config: Option<BurnConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staking_config: Option<StakingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vesting_config: Option<VestingConfig>,
}

impl ScenarioParams {
    /// Monthly scenario with only an initial supply set.
    pub fn monthly(initial_supply: f64, duration: u32) -> Self {
        Self {
            initial_supply,
            time_step: TimeStep::Monthly,
            duration,
            inflation_config: None,
            burn_config: None,
            staking_config: None,
            vesting_config: None,
        }
    }

    pub fn with_inflation(mut self, inflation: InflationConfig) -> Self {
        self.inflation_config = Some(inflation);
        self
    }

    pub fn with_burn(mut self, burn: BurnConfig) -> Self {
        self.burn_config = Some(burn);
        self
    }

    pub fn with_staking(mut self, staking: StakingConfig) -> Self {
        self.staking_config = Some(staking);
        self
    }

    pub fn with_vesting(mut self, vesting: VestingConfig) -> Self {
        self.vesting_config = Some(vesting);
        self
    }

    /// Horizon in months; bounds the month index of shock events.
    pub fn duration_in_months(&self) -> u32 {
        self.duration.saturating_mul(self.time_step.months())
    }

    /// Checks every field against the provider's accepted domain.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.initial_supply > 0.0) || !self.initial_supply.is_finite() {
            return Err(ValidationError::OutOfRange {
                field: "initial_supply",
                value: self.initial_supply,
                min: f64::MIN_POSITIVE,
                max: f64::MAX,
            });
        }
        ValidationError::check_range("duration", f64::from(self.duration), 1.0, f64::from(MAX_DURATION))?;

        if let Some(inflation) = &self.inflation_config {
            inflation.validate()?;
        }
        if let Some(burn) = &self.burn_config {
            burn.validate()?;
        }
        if let Some(staking) = &self.staking_config {
            staking.validate()?;
        }
        if let Some(vesting) = &self.vesting_config {
            vesting.validate()?;
        }
        Ok(())
    }
}

// =============================================================================
// SIMULATION RESULTS
// =============================================================================

/// One sample of the supply time series.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenPoint {
    pub time: u32,
    #[serde(default)]
    pub total_supply: f64,
    #[serde(default)]
    pub circulating_supply: f64,
    #[serde(default)]
    pub burned_supply: f64,
    #[serde(default)]
    pub staked_supply: f64,
    #[serde(default)]
    pub vested_supply: f64,
}

/// Selects one numeric column of [`TokenPoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplyField {
    TotalSupply,
    CirculatingSupply,
    BurnedSupply,
    StakedSupply,
    VestedSupply,
}

impl SupplyField {
    pub fn of(&self, point: &TokenPoint) -> f64 {
        match self {
            SupplyField::TotalSupply => point.total_supply,
            SupplyField::CirculatingSupply => point.circulating_supply,
            SupplyField::BurnedSupply => point.burned_supply,
            SupplyField::StakedSupply => point.staked_supply,
            SupplyField::VestedSupply => point.vested_supply,
        }
    }
}

/// Headline numbers of one run, reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SummaryMetrics {
    #[serde(default)]
    pub final_supply: f64,
    #[serde(default)]
    pub total_burned: f64,
    #[serde(default)]
    pub total_staked: f64,
    #[serde(default)]
    pub total_vested: f64,
}

/// Time series plus summary of one simulation run.
///
/// Construct through [`SimulationResult::new`] or check with
/// [`SimulationResult::validate`] after decoding: points must be strictly
/// increasing in `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub evolution: Vec<TokenPoint>,
    pub metrics: SummaryMetrics,
}

impl SimulationResult {
    pub fn new(evolution: Vec<TokenPoint>, metrics: SummaryMetrics) -> Result<Self, ProviderError> {
        let result = Self { evolution, metrics };
        result.validate()?;
        Ok(result)
    }

    /// Rejects series whose `time` is not strictly increasing.
    pub fn validate(&self) -> Result<(), ProviderError> {
        for pair in self.evolution.windows(2) {
            if pair[1].time <= pair[0].time {
                return Err(ProviderError::malformed(format!(
                    "time {} follows {}; points must be strictly increasing",
                    pair[1].time, pair[0].time
                )));
            }
        }
        Ok(())
    }

    pub fn points(&self) -> &[TokenPoint] {
        &self.evolution
    }

    pub fn len(&self) -> usize {
        self.evolution.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evolution.is_empty()
    }

    /// Extracts one column as a plain series, for annotation.
    pub fn series(&self, field: SupplyField) -> Vec<f64> {
        self.evolution.iter().map(|p| field.of(p)).collect()
    }
}
