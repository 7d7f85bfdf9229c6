//! Logging routes: view and change the active log filter.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_filter).put(set_filter))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilterBody {
    pub filter: String,
}

async fn get_filter(State(state): State<AppState>) -> ApiResult<Json<FilterBody>> {
    let logging = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging is not configured"))?;
    Ok(Json(FilterBody {
        filter: logging.get_filter(),
    }))
}

async fn set_filter(
    State(state): State<AppState>,
    Json(body): Json<FilterBody>,
) -> ApiResult<Json<FilterBody>> {
    let logging = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging is not configured"))?;
    logging.set_filter(&body.filter)?;
    Ok(Json(FilterBody {
        filter: logging.get_filter(),
    }))
}
