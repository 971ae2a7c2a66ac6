//! Simulation provider: the external service that computes results.
//!
//! The orchestrator only sees [`SimulationProvider`]. Production uses
//! [`HttpProvider`] against the simulation API; the simulation harness plugs
//! in a local engine with injectable failures.

use crate::error::ProviderError;
use crate::model::{ScenarioParams, SimulationResult};
use crate::shock::ShockEvent;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Computes simulation results for the orchestrator.
#[async_trait]
pub trait SimulationProvider: Send + Sync + 'static {
    /// Runs one scenario with its shock events.
    async fn simulate(
        &self,
        params: &ScenarioParams,
        shock_events: &[ShockEvent],
    ) -> Result<SimulationResult, ProviderError>;

    /// Runs several scenarios in one call. Results come back in input order.
    async fn compare(&self, scenarios: &[ScenarioParams]) -> Result<Vec<SimulationResult>, ProviderError>;
}

#[derive(Serialize)]
struct ScenarioRequest<'a> {
    #[serde(flatten)]
    params: &'a ScenarioParams,
    #[serde(skip_serializing_if = "no_shocks")]
    shock_events: &'a [ShockEvent],
}

fn no_shocks(events: &&[ShockEvent]) -> bool {
    events.is_empty()
}

#[derive(Serialize)]
struct CompareRequest<'a> {
    scenarios: &'a [ScenarioParams],
}

/// Pulls the human-readable message out of an error body.
///
/// The API answers `{"detail": "..."}`; anything else is passed through
/// as-is so no information is lost.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match value.get("detail") {
            Some(serde_json::Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

/// Simulation API client over HTTP.
#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
}

impl HttpProvider {
    /// Creates a client for `base_url` (e.g. `http://localhost:8000/api`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let resp = self.client.post(self.url(path)).json(body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            debug!(%status, path, "Simulation API returned an error");
            let message = if text.is_empty() {
                status.to_string()
            } else {
                error_message(&text)
            };
            return Err(ProviderError::remote(message));
        }

        resp.json().await.map_err(|e| ProviderError::malformed(e.to_string()))
    }
}

#[async_trait]
impl SimulationProvider for HttpProvider {
    async fn simulate(
        &self,
        params: &ScenarioParams,
        shock_events: &[ShockEvent],
    ) -> Result<SimulationResult, ProviderError> {
        let request = ScenarioRequest { params, shock_events };
        let result: SimulationResult = self.post("/simulate/scenario", &request).await?;
        result.validate()?;
        info!(points = result.len(), "Scenario simulated");
        Ok(result)
    }

    async fn compare(&self, scenarios: &[ScenarioParams]) -> Result<Vec<SimulationResult>, ProviderError> {
        let request = CompareRequest { scenarios };
        let results: Vec<SimulationResult> = self.post("/simulate/compare", &request).await?;
        for result in &results {
            result.validate()?;
        }
        info!(scenarios = results.len(), "Scenarios compared");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BurnConfig, InflationConfig};
    use crate::shock::{EventType, TimeUnit};

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"detail":"duration must be <= 360"}"#), "duration must be <= 360");
        assert_eq!(
            error_message(r#"{"detail":[{"loc":["body","duration"]}]}"#),
            r#"[{"loc":["body","duration"]}]"#
        );
        assert_eq!(error_message("Internal Server Error"), "Internal Server Error");
    }

    #[test]
    fn test_scenario_request_body() {
        let params = ScenarioParams::monthly(1_000_000.0, 12)
            .with_inflation(InflationConfig::constant(5.0))
            .with_burn(BurnConfig::continuous(1.0));

        let bare = serde_json::to_value(ScenarioRequest { params: &params, shock_events: &[] }).unwrap();
        assert_eq!(bare["initial_supply"], 1_000_000.0);
        assert!(bare.get("shock_events").is_none());

        let shocks = [ShockEvent::new(6, TimeUnit::Months, EventType::MassBurn, -0.3)];
        let with_shocks = serde_json::to_value(ScenarioRequest { params: &params, shock_events: &shocks }).unwrap();
        assert_eq!(with_shocks["shock_events"][0]["event_type"], "mass_burn");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider = HttpProvider::new("http://localhost:8000/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(provider.url("/simulate/scenario"), "http://localhost:8000/api/simulate/scenario");
    }

    #[tokio::test]
    async fn test_unreachable_api_is_request_error() {
        let provider = HttpProvider::new("http://127.0.0.1:1/api", Duration::from_secs(2)).unwrap();
        let err = provider
            .simulate(&ScenarioParams::monthly(1.0, 1), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Request(_)));
    }
}
