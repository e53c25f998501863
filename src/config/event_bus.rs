//! Transport selection

use serde::Deserialize;

use crate::domain::diagnostics::ProviderType;

/// Event bus configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventBusConfig {
    /// `redis` (default) or `kafka`; `inmemory` for single-process setups
    #[serde(default)]
    pub provider: ProviderType,
}
