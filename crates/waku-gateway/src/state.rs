//! Gateway shared state.

use std::sync::Arc;

use waku_core::config::Config;
use waku_core::pairing::PairingTimeouts;

use crate::registry::SessionRegistry;

/// Shared state accessible from all request handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    /// Bearer token for protected routes; `None` leaves them open.
    pub api_token: Option<String>,
    pub pairing_timeouts: PairingTimeouts,
    pub pairing_code_ttl_secs: u64,
    #[cfg(feature = "metrics")]
    pub prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Arc<Config>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            api_token: config.api_token(),
            pairing_timeouts: config.pairing_timeouts(),
            pairing_code_ttl_secs: config.sessions().pairing_code_ttl_secs,
            config,
            registry,
            #[cfg(feature = "metrics")]
            prometheus: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_prometheus(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
