use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::AppState;

/// Guards operator routes with the `OPERATOR_API_KEY` bearer token.
/// Without a configured key every operator request is refused.
pub async fn operator_auth<B>(
    State(state): State<AppState>,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, StatusCode> {
    let Some(operator_key) = state.config.operator_api_key.as_deref() else {
        tracing::warn!("Operator request refused: OPERATOR_API_KEY is not set");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    match auth_header.and_then(|auth| auth.strip_prefix("Bearer ")) {
        Some(token) if token == operator_key => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
