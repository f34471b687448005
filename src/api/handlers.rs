//! REST API handlers.

use std::sync::Arc;

use axum::{extract::State, Json};

use super::types::ListSessionsResponse;
use super::websocket::BridgeSettings;
use crate::backend::{BackendAdapter, BackendOptions, Multiplexer, TmuxMultiplexer};
use crate::session::ConnectionRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub adapter: Arc<BackendAdapter>,
    pub settings: BridgeSettings,
}

impl AppState {
    /// State backed by tmux with default settings.
    pub fn new() -> Self {
        Self::with_multiplexer(
            Arc::new(TmuxMultiplexer::new()),
            BackendOptions::default(),
            BridgeSettings::default(),
        )
    }

    pub fn with_multiplexer(
        mux: Arc<dyn Multiplexer>,
        options: BackendOptions,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            adapter: Arc::new(BackendAdapter::new(mux, options)),
            settings,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "shell-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// List live multiplexer sessions.
pub async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let multiplexer_available = state.adapter.multiplexer_available().await;
    let sessions = if multiplexer_available {
        state.adapter.list_sessions().await
    } else {
        Vec::new()
    };

    Json(ListSessionsResponse {
        multiplexer_available,
        sessions,
        connections: state.registry.count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NoMultiplexer;

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = health().await;
        assert_eq!(response, "OK");
    }

    #[tokio::test]
    async fn test_api_info_endpoint() {
        let response = api_info().await;
        let json = response.0;
        assert_eq!(json["name"], "shell-bridge");
        assert_eq!(json["status"], "running");
    }

    #[tokio::test]
    async fn test_list_sessions_without_multiplexer() {
        let state = AppState::with_multiplexer(
            Arc::new(NoMultiplexer),
            BackendOptions::default(),
            BridgeSettings::default(),
        );
        let Json(response) = list_sessions(State(state)).await;
        assert!(!response.multiplexer_available);
        assert!(response.sessions.is_empty());
        assert_eq!(response.connections, 0);
    }
}
