use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
    routing::post,
};

use crate::{
    dto::manager::PinRequest, error::AppError, services::manager_service, state::SharedState,
};

/// Header carrying the manager PIN on privileged requests.
pub const MANAGER_PIN_HEADER: &str = "x-manager-pin";

/// Manager mode entry point.
pub fn router() -> Router<SharedState> {
    Router::new().route("/manager/login", post(login))
}

/// Check a manager PIN so the client can unlock its manager controls.
#[utoipa::path(
    post,
    path = "/manager/login",
    tag = "manager",
    request_body = PinRequest,
    responses(
        (status = 204, description = "PIN accepted"),
        (status = 401, description = "PIN rejected")
    )
)]
pub async fn login(
    State(state): State<SharedState>,
    Json(payload): Json<PinRequest>,
) -> Result<StatusCode, AppError> {
    manager_service::verify_pin(&state, &payload.pin)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reject requests lacking the manager PIN header or carrying a wrong PIN.
pub async fn require_manager_pin(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(MANAGER_PIN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .ok_or_else(|| {
            AppError::Unauthorized("missing manager PIN header `X-Manager-Pin`".into())
        })?;

    manager_service::verify_pin(&state, &provided)?;
    Ok(next.run(req).await)
}
