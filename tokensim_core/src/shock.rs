//! Shock events: validation, chronological ordering and chart annotation.
//!
//! A shock event is a discrete perturbation scheduled at a month offset of
//! a scenario (a mass burn at month 6, an inflation spike in year 2, ...).
//! Schedules are persistent values: every edit returns a new schedule and
//! leaves the old one intact, so callers can keep an undo history by simply
//! holding on to previous values.
//!
//! # Ordering
//!
//! Events are kept sorted by *normalized month* (`years` × 12). Insertion is
//! stable: an event landing on an occupied month goes after the events that
//! were already there.
//!
//! # Annotation
//!
//! [`annotate`] maps events onto result indices. An event past the end of
//! the series (possible after the scenario's duration was shortened) is
//! clamped onto the last point and logged, not rejected.

use crate::error::ValidationError;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Longest accepted free-text description.
pub const MAX_DESCRIPTION_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Months,
    Years,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MassBurn,
    InflationSpike,
    LiquidityInjection,
    LiquidityRemoval,
    MarketShock,
}

impl EventType {
    pub fn all() -> [EventType; 5] {
        [
            EventType::MassBurn,
            EventType::InflationSpike,
            EventType::LiquidityInjection,
            EventType::LiquidityRemoval,
            EventType::MarketShock,
        ]
    }

    /// Stable display string used in annotation labels.
    pub fn display_name(&self) -> &'static str {
        match self {
            EventType::MassBurn => "Mass Burn",
            EventType::InflationSpike => "Inflation Spike",
            EventType::LiquidityInjection => "Liquidity Injection",
            EventType::LiquidityRemoval => "Liquidity Removal",
            EventType::MarketShock => "Market Shock",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One scheduled perturbation.
///
/// `value` is a fraction in `[-1, 1]` (`-0.3` = a 30% reduction). Percentage
/// inputs from a form must be divided by 100 before they get here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShockEvent {
    pub time_step: u32,
    pub time_unit: TimeUnit,
    pub event_type: EventType,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ShockEvent {
    pub fn new(time_step: u32, time_unit: TimeUnit, event_type: EventType, value: f64) -> Self {
        Self {
            time_step,
            time_unit,
            event_type,
            value,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Month offset of the event.
    pub fn normalized_month(&self) -> u32 {
        match self.time_unit {
            TimeUnit::Months => self.time_step,
            TimeUnit::Years => self.time_step.saturating_mul(12),
        }
    }

    /// Checks the event against a horizon of `max_time_steps` months.
    pub fn validate(&self, max_time_steps: u32) -> Result<(), ValidationError> {
        ValidationError::check_range(
            "time_step",
            f64::from(self.normalized_month()),
            1.0,
            f64::from(max_time_steps),
        )?;
        ValidationError::check_range("value", self.value, -1.0, 1.0)?;
        if let Some(description) = &self.description {
            let len = description.chars().count();
            if len > MAX_DESCRIPTION_LEN {
                return Err(ValidationError::DescriptionTooLong(len));
            }
        }
        Ok(())
    }

    /// `"<Event Type>: <signed percentage with one decimal>%"`.
    pub fn label(&self) -> String {
        let pct = self.value * 100.0;
        // -0.0 would otherwise render as "-0.0%"
        let pct = if pct == 0.0 { 0.0 } else { pct };
        format!("{}: {:+.1}%", self.event_type.display_name(), pct)
    }
}

/// Inserts `event` into an ordered list and returns the new list.
///
/// The input is left untouched. Fails with [`ValidationError::OutOfRange`]
/// when the event's month falls outside `[1, max_time_steps]` or its value
/// outside `[-1, 1]`.
pub fn add_event(
    events: &[ShockEvent],
    event: ShockEvent,
    max_time_steps: u32,
) -> Result<Vec<ShockEvent>, ValidationError> {
    event.validate(max_time_steps)?;

    let month = event.normalized_month();
    // First position whose month is strictly greater keeps ties stable.
    let at = events.partition_point(|e| e.normalized_month() <= month);

    let mut out = Vec::with_capacity(events.len() + 1);
    out.extend_from_slice(&events[..at]);
    out.push(event);
    out.extend_from_slice(&events[at..]);
    Ok(out)
}

/// Removes the event at `index` and returns the new list.
pub fn remove_event(events: &[ShockEvent], index: usize) -> Result<Vec<ShockEvent>, ValidationError> {
    if index >= events.len() {
        return Err(ValidationError::NoSuchEvent(index));
    }
    let mut out = events.to_vec();
    out.remove(index);
    Ok(out)
}

/// An ordered, validated set of shock events belonging to one scenario.
///
/// Deserialized schedules are put in month order on the way in; the range
/// check needs the owning scenario and happens when the schedule is stored.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ShockSchedule {
    events: Vec<ShockEvent>,
}

impl From<Vec<ShockEvent>> for ShockSchedule {
    fn from(mut events: Vec<ShockEvent>) -> Self {
        // sort_by_key is stable, so ties keep their given order
        events.sort_by_key(ShockEvent::normalized_month);
        Self { events }
    }
}

impl<'de> Deserialize<'de> for ShockSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<ShockEvent>::deserialize(deserializer).map(Self::from)
    }
}

impl ShockSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schedule by inserting `events` one at a time, in order.
    pub fn from_events(
        events: impl IntoIterator<Item = ShockEvent>,
        max_time_steps: u32,
    ) -> Result<Self, ValidationError> {
        events
            .into_iter()
            .try_fold(Self::new(), |schedule, event| schedule.with_event(event, max_time_steps))
    }

    /// Returns a new schedule with `event` inserted.
    pub fn with_event(&self, event: ShockEvent, max_time_steps: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            events: add_event(&self.events, event, max_time_steps)?,
        })
    }

    /// Returns a new schedule without the event at `index`.
    pub fn without_event(&self, index: usize) -> Result<Self, ValidationError> {
        Ok(Self {
            events: remove_event(&self.events, index)?,
        })
    }

    /// Re-checks every event against a horizon.
    pub fn validate(&self, max_time_steps: u32) -> Result<(), ValidationError> {
        self.events.iter().try_for_each(|e| e.validate(max_time_steps))
    }

    pub fn events(&self) -> &[ShockEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ShockEvent> {
        self.events.iter()
    }
}

/// A chart marker for one shock event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Index into the series
    pub x: usize,
    /// Series value at `x`
    pub y: f64,
    pub label: String,
    /// True when the event's month was past the end of the series
    pub clamped: bool,
}

/// Places each event on the series at its normalized month.
///
/// Indices are clamped to `[0, len - 1]`; an empty series yields no
/// annotations.
pub fn annotate(series: &[f64], events: &[ShockEvent]) -> Vec<Annotation> {
    let Some(last) = series.len().checked_sub(1) else {
        return Vec::new();
    };

    events
        .iter()
        .map(|event| {
            let month = event.normalized_month() as usize;
            let x = month.min(last);
            let clamped = x != month;
            if clamped {
                warn!(
                    month,
                    series_len = series.len(),
                    event = %event.event_type,
                    "Shock event past end of series; clamping to last point"
                );
            }
            Annotation {
                x,
                y: series[x],
                label: event.label(),
                clamped,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn burn(step: u32, unit: TimeUnit) -> ShockEvent {
        ShockEvent::new(step, unit, EventType::MassBurn, -0.3)
    }

    #[test]
    fn test_years_normalize_to_months() {
        assert_eq!(burn(2, TimeUnit::Years).normalized_month(), 24);
        assert_eq!(burn(7, TimeUnit::Months).normalized_month(), 7);
    }

    #[test]
    fn test_add_event_orders_by_normalized_month() {
        let events = add_event(&[], burn(18, TimeUnit::Months), 60).unwrap();
        let events = add_event(&events, burn(1, TimeUnit::Years), 60).unwrap();
        let events = add_event(&events, burn(3, TimeUnit::Months), 60).unwrap();

        let months: Vec<u32> = events.iter().map(|e| e.normalized_month()).collect();
        assert_eq!(months, vec![3, 12, 18]);
    }

    #[test]
    fn test_add_event_is_stable_on_ties() {
        let first = burn(12, TimeUnit::Months).with_description("first");
        let second = burn(1, TimeUnit::Years).with_description("second");
        let events = add_event(&[], first, 24).unwrap();
        let events = add_event(&events, second, 24).unwrap();

        assert_eq!(events[0].description.as_deref(), Some("first"));
        assert_eq!(events[1].description.as_deref(), Some("second"));
    }

    #[test]
    fn test_add_event_does_not_mutate_input() {
        let original = vec![burn(5, TimeUnit::Months)];
        let updated = add_event(&original, burn(2, TimeUnit::Months), 12).unwrap();
        assert_eq!(original.len(), 1);
        assert_eq!(updated.len(), 2);
    }

    #[test]
    fn test_add_event_range_checks() {
        assert!(matches!(
            add_event(&[], burn(0, TimeUnit::Months), 12),
            Err(ValidationError::OutOfRange { field: "time_step", .. })
        ));
        assert!(matches!(
            add_event(&[], burn(13, TimeUnit::Months), 12),
            Err(ValidationError::OutOfRange { field: "time_step", .. })
        ));
        // 2 years = 24 months, past a 12-month horizon
        assert!(add_event(&[], burn(2, TimeUnit::Years), 12).is_err());

        let too_big = ShockEvent::new(1, TimeUnit::Months, EventType::InflationSpike, 1.5);
        assert!(matches!(
            add_event(&[], too_big, 12),
            Err(ValidationError::OutOfRange { field: "value", .. })
        ));
    }

    #[test]
    fn test_description_limit() {
        let ok = burn(1, TimeUnit::Months).with_description("x".repeat(200));
        assert!(ok.validate(12).is_ok());
        let long = burn(1, TimeUnit::Months).with_description("x".repeat(201));
        assert_eq!(long.validate(12), Err(ValidationError::DescriptionTooLong(201)));
    }

    #[test]
    fn test_remove_event() {
        let schedule = ShockSchedule::from_events(
            vec![burn(1, TimeUnit::Months), burn(2, TimeUnit::Months)],
            12,
        )
        .unwrap();
        let smaller = schedule.without_event(0).unwrap();
        assert_eq!(smaller.len(), 1);
        assert_eq!(smaller.events()[0].time_step, 2);
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.without_event(5), Err(ValidationError::NoSuchEvent(5)));
    }

    #[test]
    fn test_labels() {
        assert_eq!(burn(1, TimeUnit::Months).label(), "Mass Burn: -30.0%");
        let spike = ShockEvent::new(1, TimeUnit::Months, EventType::InflationSpike, 0.05);
        assert_eq!(spike.label(), "Inflation Spike: +5.0%");
        let flat = ShockEvent::new(1, TimeUnit::Months, EventType::MarketShock, -0.0);
        assert_eq!(flat.label(), "Market Shock: +0.0%");
        let injection = ShockEvent::new(1, TimeUnit::Months, EventType::LiquidityInjection, 0.125);
        assert_eq!(injection.label(), "Liquidity Injection: +12.5%");
    }

    #[test]
    fn test_annotate_places_and_clamps() {
        let series: Vec<f64> = (0..13).map(|i| 1000.0 + i as f64).collect();
        let events = vec![burn(6, TimeUnit::Months), burn(2, TimeUnit::Years)];

        let annotations = annotate(&series, &events);
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].x, 6);
        assert_eq!(annotations[0].y, 1006.0);
        assert!(!annotations[0].clamped);

        assert_eq!(annotations[1].x, 12);
        assert_eq!(annotations[1].y, 1012.0);
        assert!(annotations[1].clamped);
    }

    #[test]
    fn test_annotate_empty_series() {
        assert!(annotate(&[], &[burn(1, TimeUnit::Months)]).is_empty());
    }

    #[test]
    fn test_event_wire_format() {
        let event = ShockEvent::new(2, TimeUnit::Years, EventType::LiquidityRemoval, -0.1);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["time_unit"], "years");
        assert_eq!(json["event_type"], "liquidity_removal");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_deserialized_schedule_is_ordered() {
        let json = serde_json::json!([
            {"time_step": 9, "time_unit": "months", "event_type": "mass_burn", "value": -0.1, "description": "first nine"},
            {"time_step": 2, "time_unit": "months", "event_type": "market_shock", "value": 0.2},
            {"time_step": 9, "time_unit": "months", "event_type": "mass_burn", "value": -0.2, "description": "second nine"},
            {"time_step": 1, "time_unit": "years", "event_type": "inflation_spike", "value": 0.05},
        ]);
        let schedule: ShockSchedule = serde_json::from_value(json).unwrap();

        let months: Vec<u32> = schedule.iter().map(|e| e.normalized_month()).collect();
        assert_eq!(months, vec![2, 9, 9, 12]);
        assert_eq!(schedule.events()[1].description.as_deref(), Some("first nine"));
        assert_eq!(schedule.events()[2].description.as_deref(), Some("second nine"));

        // Serializes back as a plain list
        assert!(serde_json::to_value(&schedule).unwrap().is_array());
    }

    fn arb_event() -> impl Strategy<Value = ShockEvent> {
        (1u32..=10, prop::bool::ANY, 0usize..5, -1.0f64..=1.0).prop_map(|(step, years, kind, value)| {
            let unit = if years { TimeUnit::Years } else { TimeUnit::Months };
            ShockEvent::new(step, unit, EventType::all()[kind], value)
        })
    }

    proptest! {
        #[test]
        fn prop_insertion_keeps_order_and_stability(events in prop::collection::vec(arb_event(), 0..40)) {
            let mut list: Vec<ShockEvent> = Vec::new();
            let mut accepted = 0usize;
            for event in events {
                let tagged = event.with_description(accepted.to_string());
                if let Ok(next) = add_event(&list, tagged, 120) {
                    list = next;
                    accepted += 1;
                }
            }
            prop_assert_eq!(list.len(), accepted);
            for pair in list.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(a.normalized_month() <= b.normalized_month());
                if a.normalized_month() == b.normalized_month() {
                    let ia: usize = a.description.as_deref().unwrap().parse().unwrap();
                    let ib: usize = b.description.as_deref().unwrap().parse().unwrap();
                    prop_assert!(ia < ib);
                }
            }
        }

        #[test]
        fn prop_annotate_stays_in_bounds(
            len in 0usize..50,
            events in prop::collection::vec(arb_event(), 0..20),
        ) {
            let series: Vec<f64> = (0..len).map(|i| i as f64).collect();
            let annotations = annotate(&series, &events);
            if len == 0 {
                prop_assert!(annotations.is_empty());
            } else {
                prop_assert_eq!(annotations.len(), events.len());
                for a in annotations {
                    prop_assert!(a.x < len);
                    prop_assert_eq!(a.y, series[a.x]);
                }
            }
        }
    }
}
