//! Degrading oracles
//!
//! [`OfflineOracle`] answers deterministically without any network access.
//! [`FallbackOracle`] bounds another oracle with a timeout and turns every
//! failure into the same deterministic answer.

use std::time::Duration;

use async_trait::async_trait;
use triplex_core::{Oracle, Result};

/// Answer used whenever no real response is available: an empty triple
/// list, which also names no schema
pub const FALLBACK_RESPONSE: &str = "[]";

/// Oracle that never leaves the process
#[derive(Debug, Clone, Default)]
pub struct OfflineOracle;

#[async_trait]
impl Oracle for OfflineOracle {
    fn name(&self) -> &str {
        "offline"
    }

    async fn generate(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
        Ok(FALLBACK_RESPONSE.to_string())
    }
}

/// Timeout and error guard around another oracle
pub struct FallbackOracle {
    inner: Box<dyn Oracle>,
    timeout: Duration,
}

impl FallbackOracle {
    pub fn new(inner: Box<dyn Oracle>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Oracle for FallbackOracle {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        match tokio::time::timeout(
            self.timeout,
            self.inner.generate(prompt, max_tokens, temperature),
        )
        .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                tracing::warn!(oracle = self.inner.name(), error = %e, "Oracle failed, using fallback response");
                Ok(FALLBACK_RESPONSE.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    oracle = self.inner.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Oracle timed out, using fallback response"
                );
                Ok(FALLBACK_RESPONSE.to_string())
            }
        }
    }
}
