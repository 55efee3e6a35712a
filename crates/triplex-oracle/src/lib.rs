//! Triplex Oracle - Generative service clients
//!
//! Implements the [`Oracle`] trait for OpenAI-compatible and Ollama APIs,
//! plus an offline oracle and a timeout guard.

pub mod client;
pub mod fallback;

pub use client::{OllamaClient, OpenAiClient};
pub use fallback::{FallbackOracle, OfflineOracle, FALLBACK_RESPONSE};

use std::time::Duration;
use triplex_core::{Oracle, OracleConfig, OracleProvider};

// ============================================================================
// Factory function
// ============================================================================

/// Create an oracle from config. Network clients are wrapped in a
/// [`FallbackOracle`] with the configured timeout; a missing API key
/// selects the offline oracle.
pub fn create_oracle(config: &OracleConfig) -> Box<dyn Oracle> {
    let client: Box<dyn Oracle> = match config.provider {
        OracleProvider::OpenAI | OracleProvider::Azure => match OpenAiClient::from_config(config) {
            Ok(client) => Box::new(client),
            Err(e) => {
                tracing::warn!(provider = ?config.provider, error = %e, "Falling back to offline oracle");
                return Box::new(OfflineOracle);
            }
        },
        OracleProvider::Ollama => Box::new(OllamaClient::from_config(config)),
        OracleProvider::Offline => return Box::new(OfflineOracle),
    };

    tracing::info!(
        oracle = client.name(),
        model = %config.model,
        timeout_secs = config.timeout_secs,
        "Oracle configured"
    );
    Box::new(FallbackOracle::new(
        client,
        Duration::from_secs(config.timeout_secs.max(1)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_selects_offline() {
        let config = OracleConfig::default();
        assert_eq!(create_oracle(&config).name(), "offline");
    }

    #[test]
    fn test_provider_selection() {
        let mut config = OracleConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert_eq!(create_oracle(&config).name(), "openai");

        config.provider = OracleProvider::Ollama;
        assert_eq!(create_oracle(&config).name(), "ollama");

        config.provider = OracleProvider::Offline;
        assert_eq!(create_oracle(&config).name(), "offline");
    }
}
