use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::ReportPeriod;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub period: Option<String>,
    /// Any instant inside the wanted period; defaults to now.
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

pub async fn get_revenue_report(
    State(state): State<AppState>,
    Query(params): Query<ReportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let period = match params.period.as_deref() {
        Some(raw) => raw.parse::<ReportPeriod>().map_err(AppError::Validation)?,
        None => ReportPeriod::Month,
    };
    let at = params.at.unwrap_or_else(Utc::now);

    let window = state.revenue.report(period, at).await?;
    Ok(Json(window))
}

pub async fn get_revenue_window(
    State(state): State<AppState>,
    Query(params): Query<WindowQuery>,
) -> Result<impl IntoResponse, AppError> {
    let window = state.revenue.aggregate(params.since, params.until).await?;
    Ok(Json(window))
}
