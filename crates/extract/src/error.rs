use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// The external collaborator a call was made to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Embedding,
    VectorIndex,
    Completion,
    Extraction,
    GraphStore,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Embedding => "embedding",
            ProviderKind::VectorIndex => "vector index",
            ProviderKind::Completion => "completion",
            ProviderKind::Extraction => "extraction",
            ProviderKind::GraphStore => "graph store",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("{provider} call timed out after {timeout_ms}ms")]
    Timeout { provider: ProviderKind, timeout_ms: u64 },
    #[error("{provider} call failed: {message}")]
    Failed { provider: ProviderKind, message: String },
    #[error("{provider} returned a malformed response: {message}")]
    Malformed { provider: ProviderKind, message: String },
}

impl ProviderError {
    pub fn failed(provider: ProviderKind, err: impl fmt::Display) -> Self {
        Self::Failed {
            provider,
            message: format!("{:#}", err),
        }
    }

    pub fn malformed(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::Malformed {
            provider,
            message: message.into(),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Timeout { provider, .. }
            | Self::Failed { provider, .. }
            | Self::Malformed { provider, .. } => *provider,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Bound a provider call. An elapsed timer becomes [`ProviderError::Timeout`]
/// and the inner future is dropped.
pub async fn with_timeout<T, F>(
    provider: ProviderKind,
    timeout: Duration,
    future: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            provider,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
