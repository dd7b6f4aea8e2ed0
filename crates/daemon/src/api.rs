//! HTTP control surface.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Local;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::acquisition::{AcquisitionService, ControlError};
use crate::config::DaemonConfig;
use crate::export;
use crate::state::{SettingsPatch, SharedState};

const DEFAULT_EXPORT_ROWS: usize = 5000;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AcquisitionService>,
    pub shared: Arc<SharedState>,
    pub config: Arc<DaemonConfig>,
    /// Signaled when an experiment file lands via the live-update transport.
    pub experiment_ready: Arc<Notify>,
}

async fn start_analysis(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.start().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "analysis started"}))),
        Err(err @ ControlError::Conflict(_)) => {
            warn!("start refused: {err}");
            (
                StatusCode::CONFLICT,
                Json(json!({"status": format!("{err}. Resolve the conflict before starting.")})),
            )
        }
        Err(err) => {
            error!("start failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": err.to_string()})),
            )
        }
    }
}

async fn stop_analysis(State(state): State<AppState>) -> impl IntoResponse {
    state.service.stop().await;
    Json(json!({"status": "analysis stopped"}))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> impl IntoResponse {
    let merged = state.shared.update_settings(&patch);
    info!("settings updated: {merged:?}");
    Json(json!({"status": "settings updated", "settings": merged}))
}

async fn run_calibration(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.calibrate().await {
        Ok(values) => (
            StatusCode::OK,
            Json(json!({"status": "calibration complete", "calibration": values})),
        ),
        Err(err) => {
            error!("calibration failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": err.to_string()})),
            )
        }
    }
}

#[derive(Deserialize)]
struct ExportParams {
    num_rows: Option<usize>,
}

async fn export_data(
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> Response {
    let max_rows = params.num_rows.unwrap_or(DEFAULT_EXPORT_ROWS);
    let rendered = {
        let buffers = state.shared.buffers.read().unwrap();
        export::render_csv(&buffers, max_rows)
    };
    match rendered {
        Ok(csv) => {
            let disposition = format!(
                "attachment;filename=eeg_data_{}.csv",
                Local::now().format("%Y-%m-%d_%H-%M")
            );
            (
                [
                    (header::CONTENT_TYPE, "text/csv".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                csv,
            )
                .into_response()
        }
        Err(err) => {
            error!("export failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

async fn current_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "run_state": state.shared.run_state(),
        "settings": state.shared.snapshot_settings(),
        "board_channels": state.service.board_channels().await,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/start-analysis", post(start_analysis))
        .route("/stop-analysis", post(stop_analysis))
        .route("/update-settings", post(update_settings))
        .route("/calibrate", post(run_calibration))
        .route("/export-data", get(export_data))
        .route("/state", get(current_state))
}
