//! History Route
//!
//! - GET /history?type=24h|7d|30d - averaged readings, oldest first

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::HistoryQuery;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::history::{HistoryPoint, HistoryWindow};

/// GET /history
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HistoryPoint>>> {
    let window: HistoryWindow = params
        .window
        .as_deref()
        .ok_or_else(|| ApiError::Validation("Missing type parameter".to_string()))?
        .parse()?;

    let points = state.history.query(window).await?;
    Ok(Json(points))
}
