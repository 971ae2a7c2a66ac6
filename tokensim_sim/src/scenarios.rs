//! Chaos engineering scenarios for DST.

use serde::{Serialize, Serializer};

/// Chaos scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChaosScenario {
    /// DST-001: Non-streamed dispatch, comparison and annotation
    DirectRoundTrip,

    /// DST-002: Streamed session from dispatch to completion
    StreamedHappyPath,

    /// DST-003: Progress frames arrive 10, 5, 50
    OutOfOrderProgress,

    /// DST-004: Cancel while frames are still in flight
    CancelMidStream,

    /// DST-005: Channel drops mid-stream, sessions re-subscribe
    ReconnectResubscribe,

    /// DST-006: Every reconnect attempt refused
    ReconnectExhaustion,

    /// DST-007: Credential swapped under a live stream
    CredentialRotation,

    /// DST-008: Several sessions side by side, local and remote comparison
    ParallelComparison,

    /// DST-009: Provider rejects one run, siblings unaffected
    ProviderFailure,

    /// DST-010: Events of a superseded dispatch arrive late
    StaleGeneration,

    /// DST-011: Server fails one streamed session
    StreamedServerError,

    /// DST-012: Market data tick refreshes subscriptions
    MarketDataRefresh,

    /// DST-013: Operator closes the channel under streamed sessions
    OperatorDisconnect,

    /// DST-014: Live channel drops under streams, every reconnect refused
    DropThenExhaustion,
}

impl ChaosScenario {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ChaosScenario> {
        vec![
            ChaosScenario::DirectRoundTrip,
            ChaosScenario::StreamedHappyPath,
            ChaosScenario::OutOfOrderProgress,
            ChaosScenario::CancelMidStream,
            ChaosScenario::ReconnectResubscribe,
            ChaosScenario::ReconnectExhaustion,
            ChaosScenario::CredentialRotation,
            ChaosScenario::ParallelComparison,
            ChaosScenario::ProviderFailure,
            ChaosScenario::StaleGeneration,
            ChaosScenario::StreamedServerError,
            ChaosScenario::MarketDataRefresh,
            ChaosScenario::OperatorDisconnect,
            ChaosScenario::DropThenExhaustion,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ChaosScenario::DirectRoundTrip => "direct_round_trip",
            ChaosScenario::StreamedHappyPath => "streamed_happy_path",
            ChaosScenario::OutOfOrderProgress => "out_of_order_progress",
            ChaosScenario::CancelMidStream => "cancel_mid_stream",
            ChaosScenario::ReconnectResubscribe => "reconnect_resubscribe",
            ChaosScenario::ReconnectExhaustion => "reconnect_exhaustion",
            ChaosScenario::CredentialRotation => "credential_rotation",
            ChaosScenario::ParallelComparison => "parallel_comparison",
            ChaosScenario::ProviderFailure => "provider_failure",
            ChaosScenario::StaleGeneration => "stale_generation",
            ChaosScenario::StreamedServerError => "streamed_server_error",
            ChaosScenario::MarketDataRefresh => "market_data_refresh",
            ChaosScenario::OperatorDisconnect => "operator_disconnect",
            ChaosScenario::DropThenExhaustion => "drop_then_exhaustion",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ChaosScenario::DirectRoundTrip => "Scenario A over the provider, then compare with B and annotate shocks",
            ChaosScenario::StreamedHappyPath => "Streamed run with partial updates, monotonic progress to 100",
            ChaosScenario::OutOfOrderProgress => "Progress 10, 5, 50 settles on 50; the 5 is discarded",
            ChaosScenario::CancelMidStream => "Cancel after the first frame; late frames never land",
            ChaosScenario::ReconnectResubscribe => "Connection dropped mid-stream, backoff, re-subscribe, completion",
            ChaosScenario::ReconnectExhaustion => "All reconnects refused: each streamed session fails exactly once",
            ChaosScenario::CredentialRotation => "New credential forces a reconnect; the stream carries on",
            ChaosScenario::ParallelComparison => "Direct and streamed runs compared, plus the remote comparison",
            ChaosScenario::ProviderFailure => "Provider error attached verbatim; reset and re-dispatch succeed",
            ChaosScenario::StaleGeneration => "Frames for a canceled generation do not touch the new one",
            ChaosScenario::StreamedServerError => "Server error frame fails only the targeted session",
            ChaosScenario::MarketDataRefresh => "data_update triggers a re-subscribe of streaming sessions",
            ChaosScenario::OperatorDisconnect => "Explicit disconnect fails streamed sessions with ConnectionLost",
            ChaosScenario::DropThenExhaustion => "Drop under two live streams, five refused retries, one failure each",
        }
    }

    /// True if the scenario injects channel faults.
    pub fn is_network_fault(&self) -> bool {
        matches!(
            self,
            ChaosScenario::ReconnectResubscribe
                | ChaosScenario::ReconnectExhaustion
                | ChaosScenario::CredentialRotation
                | ChaosScenario::OperatorDisconnect
                | ChaosScenario::DropThenExhaustion
        )
    }
}

impl std::fmt::Display for ChaosScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ChaosScenario {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl std::str::FromStr for ChaosScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "direct_round_trip" | "direct" | "dst_001" => Ok(ChaosScenario::DirectRoundTrip),
            "streamed_happy_path" | "streamed" | "dst_002" => Ok(ChaosScenario::StreamedHappyPath),
            "out_of_order_progress" | "out_of_order" | "dst_003" => Ok(ChaosScenario::OutOfOrderProgress),
            "cancel_mid_stream" | "cancel" | "dst_004" => Ok(ChaosScenario::CancelMidStream),
            "reconnect_resubscribe" | "reconnect" | "dst_005" => Ok(ChaosScenario::ReconnectResubscribe),
            "reconnect_exhaustion" | "exhaustion" | "dst_006" => Ok(ChaosScenario::ReconnectExhaustion),
            "credential_rotation" | "credential" | "dst_007" => Ok(ChaosScenario::CredentialRotation),
            "parallel_comparison" | "compare" | "dst_008" => Ok(ChaosScenario::ParallelComparison),
            "provider_failure" | "dst_009" => Ok(ChaosScenario::ProviderFailure),
            "stale_generation" | "stale" | "dst_010" => Ok(ChaosScenario::StaleGeneration),
            "streamed_server_error" | "server_error" | "dst_011" => Ok(ChaosScenario::StreamedServerError),
            "market_data_refresh" | "data_update" | "dst_012" => Ok(ChaosScenario::MarketDataRefresh),
            "operator_disconnect" | "disconnect" | "dst_013" => Ok(ChaosScenario::OperatorDisconnect),
            "drop_then_exhaustion" | "drop_exhaustion" | "dst_014" => Ok(ChaosScenario::DropThenExhaustion),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ChaosScenario::all() {
            assert_eq!(scenario.name().parse::<ChaosScenario>(), Ok(scenario));
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("DST-006".parse(), Ok(ChaosScenario::ReconnectExhaustion));
        assert_eq!("out-of-order".parse(), Ok(ChaosScenario::OutOfOrderProgress));
        assert_eq!("dst-014".parse(), Ok(ChaosScenario::DropThenExhaustion));
        assert!("split_brain".parse::<ChaosScenario>().is_err());
    }

    #[test]
    fn test_serializes_as_name() {
        let json = serde_json::to_string(&ChaosScenario::StaleGeneration).unwrap();
        assert_eq!(json, r#""stale_generation""#);
    }
}
