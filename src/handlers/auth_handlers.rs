use crate::{
    auth::Caller, errors::AppError, models::user::User,
    services::account_service::IssuedCredentials, state::AppState,
};
use axum::{Json, extract::State};

/// `POST /api/auth/rotate-keys`: the new secret is returned this once.
pub async fn rotate_keys(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<IssuedCredentials>, AppError> {
    Ok(Json(state.accounts.rotate_keys(&caller).await?))
}

/// `GET /api/auth/me`
pub async fn me(State(state): State<AppState>, Caller(caller): Caller) -> Result<Json<User>, AppError> {
    Ok(Json(state.accounts.profile(&caller).await?))
}
