//! Comparison Aggregator: side-by-side view of completed sessions.
//!
//! ```text
//!   session ids ──► checks (count, known, completed)
//!                          │
//!                          ▼
//!   ┌───────────────────────────────────────────────┐
//!   │ ComparisonResult                              │
//!   │  scenarios: [A, B, ...]   (caller order)      │
//!   │  series:    [(t0,A) (t0,B) (t1,A) (t1,B) ...] │
//!   │  metrics:   metric × column table             │
//!   └───────────────────────────────────────────────┘
//! ```
//!
//! Metric values are read verbatim from each result's summary, never
//! recomputed from the series.

use crate::error::CompareError;
use crate::model::{SimulationResult, SummaryMetrics, TokenPoint};
use crate::session::SessionStatus;
use crate::session_registry::SessionRegistry;
use crate::types::{ScenarioId, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    FinalSupply,
    TotalBurned,
    TotalStaked,
    TotalVested,
}

impl Metric {
    pub fn all() -> Vec<Metric> {
        vec![
            Metric::FinalSupply,
            Metric::TotalBurned,
            Metric::TotalStaked,
            Metric::TotalVested,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Metric::FinalSupply => "Final Supply",
            Metric::TotalBurned => "Total Burned",
            Metric::TotalStaked => "Total Staked",
            Metric::TotalVested => "Total Vested",
        }
    }

    pub fn of(&self, summary: &SummaryMetrics) -> f64 {
        match self {
            Metric::FinalSupply => summary.final_supply,
            Metric::TotalBurned => summary.total_burned,
            Metric::TotalStaked => summary.total_staked,
            Metric::TotalVested => summary.total_vested,
        }
    }
}

/// Which rows the metrics table carries, top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOptions {
    pub metrics: Vec<Metric>,
}

impl Default for ComparisonOptions {
    fn default() -> Self {
        Self { metrics: Metric::all() }
    }
}

impl ComparisonOptions {
    pub fn with_metrics(metrics: impl IntoIterator<Item = Metric>) -> Self {
        Self {
            metrics: metrics.into_iter().collect(),
        }
    }
}

/// One compared column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSeries {
    /// Absent for remote comparisons, which run outside any session
    pub session_id: Option<SessionId>,
    pub scenario_id: ScenarioId,
    pub scenario_name: String,
    pub result: Arc<SimulationResult>,
}

/// A series point labelled with the column it belongs to.
///
/// Two sessions of one scenario share `scenario_id` and `scenario_name`;
/// `column` and `session_id` tell them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedPoint {
    /// Index into [`ComparisonResult::scenarios`]
    pub column: usize,
    pub session_id: Option<SessionId>,
    pub scenario_id: ScenarioId,
    pub scenario_name: String,
    #[serde(flatten)]
    pub point: TokenPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub metric: Metric,
    pub label: String,
    /// One value per column
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsTable {
    /// Scenario names, in column order
    pub columns: Vec<String>,
    pub rows: Vec<MetricsRow>,
}

impl MetricsTable {
    pub fn row(&self, metric: Metric) -> Option<&MetricsRow> {
        self.rows.iter().find(|r| r.metric == metric)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub scenarios: Vec<ScenarioSeries>,
    /// Ordered by time, then by column
    pub series: Vec<TaggedPoint>,
    pub metrics: MetricsTable,
}

impl ComparisonResult {
    /// Builds the view from columns already in display order.
    pub fn build(scenarios: Vec<ScenarioSeries>, options: &ComparisonOptions) -> Self {
        let mut series: Vec<(u32, usize, TaggedPoint)> = scenarios
            .iter()
            .enumerate()
            .flat_map(|(column, s)| {
                s.result.points().iter().map(move |p| {
                    (
                        p.time,
                        column,
                        TaggedPoint {
                            column,
                            session_id: s.session_id,
                            scenario_id: s.scenario_id.clone(),
                            scenario_name: s.scenario_name.clone(),
                            point: *p,
                        },
                    )
                })
            })
            .collect();
        series.sort_by_key(|(time, column, _)| (*time, *column));

        let rows = options
            .metrics
            .iter()
            .map(|metric| MetricsRow {
                metric: *metric,
                label: metric.label().to_string(),
                values: scenarios.iter().map(|s| metric.of(&s.result.metrics)).collect(),
            })
            .collect();

        let columns = scenarios.iter().map(|s| s.scenario_name.clone()).collect();

        Self {
            scenarios,
            series: series.into_iter().map(|(_, _, p)| p).collect(),
            metrics: MetricsTable { columns, rows },
        }
    }

    /// Smallest and largest value of `metric` across columns.
    ///
    /// `None` when the metric has no row or there are no columns.
    pub fn range(&self, metric: Metric) -> Option<MetricRange> {
        let row = self.metrics.row(metric)?;
        let mut values = row.values.iter().copied();
        let first = values.next()?;
        Some(values.fold(MetricRange { min: first, max: first }, |r, v| MetricRange {
            min: r.min.min(v),
            max: r.max.max(v),
        }))
    }

    /// Result of the first column running `scenario`.
    pub fn result_for(&self, scenario: &ScenarioId) -> Option<&SimulationResult> {
        self.scenarios
            .iter()
            .find(|s| &s.scenario_id == scenario)
            .map(|s| s.result.as_ref())
    }

    /// Result of the column built from `session`.
    pub fn result_for_session(&self, session: SessionId) -> Option<&SimulationResult> {
        self.scenarios
            .iter()
            .find(|s| s.session_id == Some(session))
            .map(|s| s.result.as_ref())
    }

    /// Points of one column, in time order.
    pub fn column_series(&self, column: usize) -> impl Iterator<Item = &TaggedPoint> {
        self.series.iter().filter(move |p| p.column == column)
    }
}

/// Builds a comparison of completed sessions, columns in `ids` order.
pub fn compare(
    sessions: &SessionRegistry,
    ids: &[SessionId],
    options: &ComparisonOptions,
) -> Result<ComparisonResult, CompareError> {
    if ids.len() < 2 {
        return Err(CompareError::InsufficientScenarios(ids.len()));
    }

    let mut columns = Vec::with_capacity(ids.len());
    for id in ids {
        let session = sessions.get(*id).ok_or(CompareError::UnknownSession(*id))?;
        if session.status() != SessionStatus::Completed {
            return Err(CompareError::NotReady(*id));
        }
        let (Some(result), Some(scenario)) = (session.result(), session.scenario()) else {
            return Err(CompareError::NotReady(*id));
        };
        columns.push(ScenarioSeries {
            session_id: Some(*id),
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            result: result.clone(),
        });
    }

    Ok(ComparisonResult::build(columns, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioRegistry;
    use crate::session::DispatchMode;
    use approx::assert_relative_eq;

    fn result(final_supply: f64, burned: f64) -> Arc<SimulationResult> {
        let evolution = (0..3)
            .map(|time| TokenPoint {
                time,
                total_supply: final_supply - (2 - time) as f64,
                ..Default::default()
            })
            .collect();
        let metrics = SummaryMetrics {
            final_supply,
            total_burned: burned,
            total_staked: 0.0,
            total_vested: 0.0,
        };
        Arc::new(SimulationResult::new(evolution, metrics).unwrap())
    }

    fn completed(sessions: &SessionRegistry, seed: u64, scenario: &str, res: Arc<SimulationResult>) -> SessionId {
        let config = ScenarioRegistry::with_defaults()
            .get(&ScenarioId::new(scenario))
            .cloned()
            .unwrap();
        let id = sessions.open(SessionId::from_seed(seed)).id();
        sessions
            .transition(id, |s| s.dispatch(config, DispatchMode::Direct))
            .unwrap();
        sessions.apply(id, |s| s.complete(1, res));
        id
    }

    #[test]
    fn test_columns_follow_caller_order() {
        let sessions = SessionRegistry::new();
        let a = completed(&sessions, 1, "scenario-a", result(1_039_000.0, 10_000.0));
        let b = completed(&sessions, 2, "scenario-b", result(1_050_000.0, 20_000.0));

        let view = compare(&sessions, &[b, a], &ComparisonOptions::default()).unwrap();
        assert_eq!(view.metrics.columns, vec!["Scenario B", "Scenario A"]);

        let final_supply = view.metrics.row(Metric::FinalSupply).unwrap();
        assert_eq!(final_supply.label, "Final Supply");
        assert_eq!(final_supply.values, vec![1_050_000.0, 1_039_000.0]);

        let labels: Vec<_> = view.metrics.rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Final Supply", "Total Burned", "Total Staked", "Total Vested"]);
    }

    #[test]
    fn test_merged_series_is_time_major() {
        let sessions = SessionRegistry::new();
        let a = completed(&sessions, 1, "scenario-a", result(100.0, 1.0));
        let b = completed(&sessions, 2, "scenario-b", result(200.0, 2.0));

        let view = compare(&sessions, &[a, b], &ComparisonOptions::default()).unwrap();
        assert_eq!(view.series.len(), 6);
        let order: Vec<(u32, &str)> = view
            .series
            .iter()
            .map(|p| (p.point.time, p.scenario_id.as_str()))
            .collect();
        assert_eq!(order[0], (0, "scenario-a"));
        assert_eq!(order[1], (0, "scenario-b"));
        assert_eq!(order[5], (2, "scenario-b"));
    }

    #[test]
    fn test_same_scenario_twice_stays_distinguishable() {
        let sessions = SessionRegistry::new();
        let before = completed(&sessions, 1, "scenario-a", result(1_000.0, 1.0));
        let after = completed(&sessions, 2, "scenario-a", result(2_000.0, 5.0));

        let view = compare(&sessions, &[before, after], &ComparisonOptions::default()).unwrap();
        assert_eq!(view.metrics.columns, vec!["Scenario A", "Scenario A"]);
        assert!(view.series.iter().all(|p| p.scenario_name == "Scenario A"));

        let first: Vec<f64> = view.column_series(0).map(|p| p.point.total_supply).collect();
        let second: Vec<f64> = view.column_series(1).map(|p| p.point.total_supply).collect();
        assert_eq!(first, vec![998.0, 999.0, 1_000.0]);
        assert_eq!(second, vec![1_998.0, 1_999.0, 2_000.0]);
        assert!(view.column_series(0).all(|p| p.session_id == Some(before)));
        assert!(view.column_series(1).all(|p| p.session_id == Some(after)));

        assert_eq!(view.result_for_session(after).unwrap().metrics.final_supply, 2_000.0);
        assert_eq!(view.result_for_session(before).unwrap().metrics.final_supply, 1_000.0);

        let json = serde_json::to_value(&view.series[1]).unwrap();
        assert_eq!(json["scenario_name"], "Scenario A");
        assert_eq!(json["column"], 1);
    }

    #[test]
    fn test_ranges_and_metric_selection() {
        let sessions = SessionRegistry::new();
        let a = completed(&sessions, 1, "scenario-a", result(1_000.5, 3.25));
        let b = completed(&sessions, 2, "scenario-b", result(900.25, 7.5));

        let options = ComparisonOptions::with_metrics([Metric::TotalBurned]);
        let view = compare(&sessions, &[a, b], &options).unwrap();
        assert_eq!(view.metrics.rows.len(), 1);
        assert!(view.range(Metric::FinalSupply).is_none());

        let burned = view.range(Metric::TotalBurned).unwrap();
        assert_relative_eq!(burned.min, 3.25);
        assert_relative_eq!(burned.max, 7.5);
        assert!(view.result_for(&ScenarioId::new("scenario-b")).is_some());
    }

    #[test]
    fn test_precondition_errors() {
        let sessions = SessionRegistry::new();
        let a = completed(&sessions, 1, "scenario-a", result(1.0, 0.0));

        assert_eq!(
            compare(&sessions, &[a], &ComparisonOptions::default()),
            Err(CompareError::InsufficientScenarios(1))
        );

        let ghost = SessionId::from_seed(42);
        assert_eq!(
            compare(&sessions, &[a, ghost], &ComparisonOptions::default()),
            Err(CompareError::UnknownSession(ghost))
        );

        let idle = sessions.open(SessionId::from_seed(3)).id();
        assert_eq!(
            compare(&sessions, &[a, idle], &ComparisonOptions::default()),
            Err(CompareError::NotReady(idle))
        );
    }
}
