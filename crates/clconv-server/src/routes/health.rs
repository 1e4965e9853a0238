// SPDX-License-Identifier: AGPL-3.0-only

//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    /// Device name once the accelerator is initialized
    pub device: Option<String>,
    pub sync_mode: String,
    pub broadcast_mode: String,
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let context = state.ready_context();
    let pipeline = &state.config.pipeline;

    Json(HealthResponse {
        status: if context.is_some() { "ok" } else { "starting" }.to_string(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        device: context.map(|c| c.device().info().name.clone()),
        sync_mode: pipeline.sync_mode.to_string(),
        broadcast_mode: pipeline.broadcast_mode.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::fixture;

    #[tokio::test]
    async fn reports_device_once_ready() {
        let (_dir, state) = fixture(&[0.0; 8]);

        let Json(before) = health_check(State(state.clone())).await;
        assert_eq!(before.status, "starting");
        assert!(before.device.is_none());

        state.context().unwrap();
        let Json(after) = health_check(State(state)).await;
        assert_eq!(after.status, "ok");
        assert_eq!(after.device.as_deref(), Some("clconv software device"));
        assert_eq!(after.sync_mode, "drain");
    }
}
