use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use encore_gateway::auth::bearer_token;
use encore_types::error::ChatError;

use crate::error::ApiError;
use crate::state::AppState;

/// Verify the bearer token and stash the `Principal` in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(ChatError::Unauthorized)?;

    let principal = state.chat.sessions.authenticate(Some(token))?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
