//! Scenario Registry: named parameter sets and the active-for-comparison set.
//!
//! Configurations are replaced wholesale on every edit; the parameter block
//! is shared behind an `Arc`, so a session that copied a config at dispatch
//! time keeps the old snapshot no matter what the registry does afterwards.

use crate::error::{RegistryError, ValidationError};
use crate::model::{BurnConfig, InflationConfig, ScenarioParams, StakingConfig};
use crate::shock::{ShockEvent, ShockSchedule};
use crate::types::ScenarioId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// One named scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub id: ScenarioId,
    pub name: String,
    pub params: Arc<ScenarioParams>,
    /// Shock events, ordered by normalized month
    #[serde(default)]
    pub shocks: ShockSchedule,
}

impl ScenarioConfig {
    /// Horizon shock events are validated against.
    pub fn max_time_steps(&self) -> u32 {
        self.params.duration_in_months()
    }
}

/// Input to [`ScenarioRegistry::add`].
#[derive(Debug, Clone)]
pub struct NewScenario {
    /// Generated when absent
    pub id: Option<ScenarioId>,
    pub name: String,
    pub params: ScenarioParams,
    pub shocks: ShockSchedule,
}

impl NewScenario {
    pub fn new(name: impl Into<String>, params: ScenarioParams) -> Self {
        Self {
            id: None,
            name: name.into(),
            params,
            shocks: ShockSchedule::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<ScenarioId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_shocks(mut self, shocks: ShockSchedule) -> Self {
        self.shocks = shocks;
        self
    }
}

/// Ordered collection of scenarios plus the ids selected for comparison.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    entries: Vec<ScenarioConfig>,
    active: Vec<ScenarioId>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the two stock scenarios, both active.
    ///
    /// - `scenario-a`: 5% constant inflation, 1% continuous burn
    /// - `scenario-b`: 7% constant inflation, 2% continuous burn
    ///
    /// Both start at 1,000,000 tokens and run monthly for 12 months.
    pub fn with_defaults() -> Self {
        let stock = |inflation: f64, burn: f64| {
            ScenarioParams::monthly(1_000_000.0, 12)
                .with_inflation(InflationConfig::constant(inflation))
                .with_burn(BurnConfig::continuous(burn))
                .with_staking(StakingConfig::default())
        };

        let mut registry = Self::new();
        registry.entries.push(ScenarioConfig {
            id: ScenarioId::new("scenario-a"),
            name: "Scenario A".to_string(),
            params: Arc::new(stock(5.0, 1.0)),
            shocks: ShockSchedule::new(),
        });
        registry.entries.push(ScenarioConfig {
            id: ScenarioId::new("scenario-b"),
            name: "Scenario B".to_string(),
            params: Arc::new(stock(7.0, 2.0)),
            shocks: ShockSchedule::new(),
        });
        registry.active = registry.entries.iter().map(|c| c.id.clone()).collect();
        registry
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Adds a scenario and marks it active. Returns its id.
    pub fn add(&mut self, scenario: NewScenario) -> Result<ScenarioId, RegistryError> {
        let id = match scenario.id {
            Some(id) if self.contains(&id) => return Err(RegistryError::DuplicateId(id)),
            Some(id) => id,
            None => loop {
                let candidate = ScenarioId::generate();
                if !self.contains(&candidate) {
                    break candidate;
                }
            },
        };

        scenario.params.validate()?;
        scenario.shocks.validate(scenario.params.duration_in_months())?;

        info!(scenario = %id, name = %scenario.name, "Scenario added");
        self.entries.push(ScenarioConfig {
            id: id.clone(),
            name: scenario.name,
            params: Arc::new(scenario.params),
            shocks: scenario.shocks,
        });
        self.active.push(id.clone());
        Ok(id)
    }

    /// Replaces the parameter snapshot of `id`.
    ///
    /// Existing shock events are kept even when the new duration is shorter;
    /// annotation clamps them onto the last point.
    pub fn update(&mut self, id: &ScenarioId, params: ScenarioParams) -> Result<(), RegistryError> {
        let index = self.index_of(id)?;
        params.validate()?;
        self.entries[index].params = Arc::new(params);
        debug!(scenario = %id, "Scenario parameters replaced");
        Ok(())
    }

    pub fn rename(&mut self, id: &ScenarioId, name: impl Into<String>) -> Result<(), RegistryError> {
        let index = self.index_of(id)?;
        self.entries[index].name = name.into();
        Ok(())
    }

    /// Removes `id` from the registry and from the active set.
    pub fn remove(&mut self, id: &ScenarioId) -> Result<ScenarioConfig, RegistryError> {
        let index = self.index_of(id)?;
        self.active.retain(|a| a != id);
        info!(scenario = %id, "Scenario removed");
        Ok(self.entries.remove(index))
    }

    /// Replaces the active set. Fails on the first id that is not registered.
    pub fn set_active(&mut self, ids: &[ScenarioId]) -> Result<(), RegistryError> {
        if let Some(missing) = ids.iter().find(|id| !self.contains(id)) {
            return Err(RegistryError::NotFound(missing.clone()));
        }
        let mut active: Vec<ScenarioId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !active.contains(id) {
                active.push(id.clone());
            }
        }
        self.active = active;
        Ok(())
    }

    /// Inserts a shock event into the scenario's schedule.
    pub fn add_shock(&mut self, id: &ScenarioId, event: ShockEvent) -> Result<(), RegistryError> {
        let index = self.index_of(id)?;
        let entry = &mut self.entries[index];
        entry.shocks = entry.shocks.with_event(event, entry.max_time_steps())?;
        Ok(())
    }

    pub fn remove_shock(&mut self, id: &ScenarioId, index: usize) -> Result<ShockEvent, RegistryError> {
        let at = self.index_of(id)?;
        let entry = &mut self.entries[at];
        let removed = entry
            .shocks
            .events()
            .get(index)
            .cloned()
            .ok_or(ValidationError::NoSuchEvent(index))?;
        entry.shocks = entry.shocks.without_event(index)?;
        Ok(removed)
    }

    /// Replaces the whole schedule after validating it against the duration.
    pub fn set_shocks(&mut self, id: &ScenarioId, shocks: ShockSchedule) -> Result<(), RegistryError> {
        let index = self.index_of(id)?;
        let entry = &mut self.entries[index];
        shocks.validate(entry.max_time_steps())?;
        entry.shocks = shocks;
        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn get(&self, id: &ScenarioId) -> Option<&ScenarioConfig> {
        self.entries.iter().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &ScenarioId) -> bool {
        self.get(id).is_some()
    }

    /// Scenarios in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ScenarioConfig> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids selected for comparison, in selection order.
    pub fn active(&self) -> &[ScenarioId] {
        &self.active
    }

    /// Configs of the active set, in selection order.
    pub fn active_configs(&self) -> Vec<ScenarioConfig> {
        self.active.iter().filter_map(|id| self.get(id).cloned()).collect()
    }

    fn index_of(&self, id: &ScenarioId) -> Result<usize, RegistryError> {
        self.entries
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shock::{EventType, TimeUnit};

    fn params(duration: u32) -> ScenarioParams {
        ScenarioParams::monthly(500_000.0, duration).with_inflation(InflationConfig::constant(3.0))
    }

    #[test]
    fn test_defaults() {
        let registry = ScenarioRegistry::with_defaults();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active(), &[ScenarioId::new("scenario-a"), ScenarioId::new("scenario-b")]);

        let a = registry.get(&ScenarioId::new("scenario-a")).unwrap();
        assert_eq!(a.name, "Scenario A");
        assert_eq!(a.params.initial_supply, 1_000_000.0);
        assert_eq!(a.params.inflation_config.as_ref().unwrap().initial_rate, 5.0);
        assert_eq!(a.params.burn_config.as_ref().unwrap().rate, Some(1.0));

        let b = registry.get(&ScenarioId::new("scenario-b")).unwrap();
        assert_eq!(b.params.inflation_config.as_ref().unwrap().initial_rate, 7.0);
        assert_eq!(b.params.burn_config.as_ref().unwrap().rate, Some(2.0));
    }

    #[test]
    fn test_add_generates_id_and_activates() {
        let mut registry = ScenarioRegistry::new();
        let id = registry.add(NewScenario::new("Custom", params(12))).unwrap();
        assert!(id.as_str().starts_with("scenario-"));
        assert_eq!(registry.active(), &[id.clone()]);
        assert_eq!(registry.get(&id).unwrap().name, "Custom");
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let mut registry = ScenarioRegistry::with_defaults();
        let err = registry
            .add(NewScenario::new("Again", params(12)).with_id("scenario-a"))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId(ScenarioId::new("scenario-a")));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_add_rejects_invalid_params() {
        let mut registry = ScenarioRegistry::new();
        let err = registry.add(NewScenario::new("Bad", params(0))).unwrap_err();
        assert!(matches!(err, RegistryError::Validation(ValidationError::OutOfRange { field: "duration", .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_replaces_snapshot_without_touching_old_copies() {
        let mut registry = ScenarioRegistry::with_defaults();
        let id = ScenarioId::new("scenario-a");
        let before = registry.get(&id).cloned().unwrap();

        registry.update(&id, params(24)).unwrap();

        assert_eq!(before.params.duration, 12);
        assert_eq!(registry.get(&id).unwrap().params.duration, 24);
        assert_eq!(registry.get(&id).unwrap().id, id);
    }

    #[test]
    fn test_update_missing() {
        let mut registry = ScenarioRegistry::new();
        let id = ScenarioId::new("nope");
        assert_eq!(registry.update(&id, params(12)), Err(RegistryError::NotFound(id)));
    }

    #[test]
    fn test_remove_drops_from_active() {
        let mut registry = ScenarioRegistry::with_defaults();
        let id = ScenarioId::new("scenario-a");
        registry.remove(&id).unwrap();
        assert_eq!(registry.active(), &[ScenarioId::new("scenario-b")]);
        assert_eq!(registry.remove(&id), Err(RegistryError::NotFound(id)));
    }

    #[test]
    fn test_set_active_reports_first_missing() {
        let mut registry = ScenarioRegistry::with_defaults();
        let ids = [
            ScenarioId::new("scenario-b"),
            ScenarioId::new("ghost-1"),
            ScenarioId::new("ghost-2"),
        ];
        assert_eq!(
            registry.set_active(&ids),
            Err(RegistryError::NotFound(ScenarioId::new("ghost-1")))
        );
        // unchanged on failure
        assert_eq!(registry.active().len(), 2);

        registry.set_active(&[ScenarioId::new("scenario-b")]).unwrap();
        assert_eq!(registry.active_configs().len(), 1);
        assert_eq!(registry.active_configs()[0].name, "Scenario B");
    }

    #[test]
    fn test_shocks_validated_against_duration() {
        let mut registry = ScenarioRegistry::with_defaults();
        let id = ScenarioId::new("scenario-a");

        let inside = ShockEvent::new(6, TimeUnit::Months, EventType::MassBurn, -0.3);
        registry.add_shock(&id, inside).unwrap();

        let outside = ShockEvent::new(2, TimeUnit::Years, EventType::MassBurn, -0.3);
        assert!(matches!(
            registry.add_shock(&id, outside),
            Err(RegistryError::Validation(ValidationError::OutOfRange { .. }))
        ));

        assert_eq!(registry.get(&id).unwrap().shocks.len(), 1);
        let removed = registry.remove_shock(&id, 0).unwrap();
        assert_eq!(removed.time_step, 6);
        assert!(registry.get(&id).unwrap().shocks.is_empty());
        assert!(registry.remove_shock(&id, 0).is_err());
    }

    #[test]
    fn test_set_shocks_from_wire_keeps_month_order() {
        let mut registry = ScenarioRegistry::with_defaults();
        let id = ScenarioId::new("scenario-a");
        let schedule: ShockSchedule = serde_json::from_value(serde_json::json!([
            {"time_step": 9, "time_unit": "months", "event_type": "mass_burn", "value": -0.3},
            {"time_step": 2, "time_unit": "months", "event_type": "liquidity_injection", "value": 0.1},
        ]))
        .unwrap();

        registry.set_shocks(&id, schedule).unwrap();
        let months: Vec<u32> = registry
            .get(&id)
            .unwrap()
            .shocks
            .iter()
            .map(|e| e.normalized_month())
            .collect();
        assert_eq!(months, vec![2, 9]);

        let late: ShockSchedule = serde_json::from_value(serde_json::json!([
            {"time_step": 2, "time_unit": "years", "event_type": "mass_burn", "value": -0.3},
        ]))
        .unwrap();
        assert!(registry.set_shocks(&id, late).is_err());
    }

    #[test]
    fn test_shortening_duration_keeps_shocks() {
        let mut registry = ScenarioRegistry::with_defaults();
        let id = ScenarioId::new("scenario-a");
        registry
            .add_shock(&id, ShockEvent::new(10, TimeUnit::Months, EventType::MarketShock, -0.2))
            .unwrap();
        registry.update(&id, params(6)).unwrap();
        assert_eq!(registry.get(&id).unwrap().shocks.len(), 1);
    }
}
