//! JSON exporters.
//!
//! Comparison surfaces go out through [`JsonFileExporter`]; a whole harness
//! run is written as a [`SimReport`].

use crate::runner::ScenarioResult;

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokensim_core::{ComparisonResult, ReportExporter};
use tracing::{debug, warn};

/// Writes each comparison as pretty-printed JSON into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileExporter {
    dir: PathBuf,
}

impl JsonFileExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write(&self, surface: &ComparisonResult, filename: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.join(filename);
        let json = serde_json::to_string_pretty(surface)?;
        let mut file = File::create(&path)?;
        file.write_all(json.as_bytes())?;
        Ok(path)
    }
}

impl ReportExporter for JsonFileExporter {
    fn export(&self, surface: &ComparisonResult, filename: &str) -> bool {
        match self.write(surface, filename) {
            Ok(path) => {
                debug!(path = %path.display(), columns = surface.metrics.columns.len(), "Comparison written");
                true
            }
            Err(e) => {
                warn!(dir = %self.dir.display(), %filename, error = %e, "Comparison export failed");
                false
            }
        }
    }
}

/// Complete harness run.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    /// Seed used
    pub seed: u64,

    /// True when every scenario passed
    pub passed: bool,

    pub results: Vec<ScenarioResult>,
}

impl SimReport {
    /// Creates an empty report.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            passed: true,
            results: Vec::new(),
        }
    }

    /// Adds a scenario result.
    pub fn add(&mut self, result: ScenarioResult) {
        self.passed &= result.passed;
        self.results.push(result);
    }

    pub fn failed(&self) -> impl Iterator<Item = &ScenarioResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioMetrics;
    use crate::scenarios::ChaosScenario;
    use std::sync::Arc;
    use tokensim_core::compare::ScenarioSeries;
    use tokensim_core::model::{BurnConfig, InflationConfig};
    use tokensim_core::{ComparisonOptions, ScenarioId, ScenarioParams};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tokensim-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn surface() -> ComparisonResult {
        let columns = [("scenario-a", "Scenario A", 5.0), ("scenario-b", "Scenario B", 7.0)]
            .into_iter()
            .map(|(id, name, inflation)| {
                let params = ScenarioParams::monthly(1_000_000.0, 3)
                    .with_inflation(InflationConfig::constant(inflation))
                    .with_burn(BurnConfig::continuous(1.0));
                ScenarioSeries {
                    session_id: None,
                    scenario_id: ScenarioId::new(id),
                    scenario_name: name.to_string(),
                    result: Arc::new(crate::engine::simulate(&params, &[]).unwrap()),
                }
            })
            .collect();
        ComparisonResult::build(columns, &ComparisonOptions::default())
    }

    fn result(scenario: ChaosScenario, passed: bool) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: 42,
            passed,
            total_ticks: 3,
            final_time_secs: 0.3,
            failure_reason: (!passed).then(|| "assertion failed: boom".to_string()),
            metrics: ScenarioMetrics::default(),
        }
    }

    #[test]
    fn test_json_exporter_writes_surface() {
        let dir = temp_dir("json-exporter");
        let exporter = JsonFileExporter::new(&dir);

        assert!(exporter.export(&surface(), "out.json"));

        let text = std::fs::read_to_string(dir.join("out.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["metrics"]["columns"], serde_json::json!(["Scenario A", "Scenario B"]));
        assert_eq!(value["series"].as_array().unwrap().len(), 8);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_json_exporter_reports_failure() {
        let exporter = JsonFileExporter::new(std::env::temp_dir().join("tokensim-missing-dir/nested"));
        assert!(!exporter.export(&surface(), "out.json"));
    }

    #[test]
    fn test_report_tracks_failures() {
        let mut report = SimReport::new(42);
        report.add(result(ChaosScenario::DirectRoundTrip, true));
        assert!(report.passed);

        report.add(result(ChaosScenario::StaleGeneration, false));
        assert!(!report.passed);
        assert_eq!(report.failed().count(), 1);

        let dir = temp_dir("report");
        let path = dir.join("report.json");
        report.write_to_file(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["results"][1]["scenario"], "stale_generation");
        assert_eq!(value["results"][1]["failure_reason"], "assertion failed: boom");
        assert!(value["results"][0].get("failure_reason").is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
