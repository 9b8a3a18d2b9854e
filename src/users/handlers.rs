use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    gateway::Mapping,
    identity::{AuthAccessor, IdentityService},
    state::AppState,
    users::{
        dto::{LoginResponse, StatusResponse, UserResponse, ValidationErrors},
        entity::User,
        forms::{validate_login, FieldSpec, LOGIN_FORM},
        store::StoreError,
    },
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/login-form", get(login_form))
        .route("/auth/logout", post(logout))
        .route("/auth/status", get(status))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

fn store_error(err: StoreError) -> (axum::http::StatusCode, String) {
    match &err {
        StoreError::NotFound(_) => {
            warn!("{err}");
            (axum::http::StatusCode::NOT_FOUND, err.to_string())
        }
        StoreError::DuplicateUsername(_) => {
            warn!("{err}");
            (axum::http::StatusCode::CONFLICT, err.to_string())
        }
        StoreError::Hash(_) | StoreError::Storage(_) => {
            error!(error = %err, "store operation failed");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
            )
        }
    }
}

#[instrument(skip(state, form))]
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<LoginResponse>, axum::response::Response> {
    let data = match validate_login(&form) {
        Ok(data) => data,
        Err(errors) => {
            warn!(errors = errors.len(), "login form failed validation");
            return Err((
                axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                Json(ValidationErrors { errors }),
            )
                .into_response());
        }
    };

    let ok = match state
        .users
        .verify_credentials(&data.username, &data.password)
        .await
    {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "verify_credentials failed");
            return Err((
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
            )
                .into_response());
        }
    };

    if !ok {
        warn!(username = %data.username, "login rejected");
        return Err((
            axum::http::StatusCode::UNAUTHORIZED,
            "Credenciales inválidas".to_string(),
        )
            .into_response());
    }

    state.auth.service().remember(&data.username).await;

    info!(username = %data.username, "user logged in");
    Ok(Json(LoginResponse {
        username: data.username,
        remember_me: data.remember_me,
    }))
}

#[instrument(skip(auth))]
pub async fn logout(
    State(auth): State<AuthAccessor<IdentityService>>,
) -> axum::http::StatusCode {
    auth.service().forget().await;
    info!("identity cleared");
    axum::http::StatusCode::NO_CONTENT
}

#[instrument(skip(auth))]
pub async fn status(State(auth): State<AuthAccessor<IdentityService>>) -> Json<StatusResponse> {
    let service = auth.service();
    Json(StatusResponse {
        authenticated: service.has_identity().await,
        identity: service.current().await,
    })
}

/// The field table the rendering collaborator consumes verbatim.
#[instrument]
pub async fn login_form() -> Json<&'static [FieldSpec]> {
    Json(LOGIN_FORM)
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserResponse>>, (axum::http::StatusCode, String)> {
    let users = state.users.fetch_all().await.map_err(store_error)?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, (axum::http::StatusCode, String)> {
    let user = state.users.get_user(id).await.map_err(store_error)?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<Mapping>,
) -> Result<(axum::http::StatusCode, Json<UserResponse>), (axum::http::StatusCode, String)> {
    let mut user = User::from_mapping(&payload);
    user.id = None;
    let username = user.username.clone().unwrap_or_default();

    state.users.save_user(&user).await.map_err(store_error)?;
    let created = state
        .users
        .get_user_by_username(&username)
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            error!(username = %username, "created user cannot be read back");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "user was not persisted".to_string(),
            )
        })?;

    info!(username = %username, "user created");
    Ok((axum::http::StatusCode::CREATED, Json(created.into())))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<Mapping>,
) -> Result<Json<UserResponse>, (axum::http::StatusCode, String)> {
    let mut user = User::from_mapping(&payload);
    user.id = Some(id);

    state.users.save_user(&user).await.map_err(store_error)?;
    let updated = state.users.get_user(id).await.map_err(store_error)?;

    info!(user_id = id, "user updated");
    Ok(Json(updated.into()))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<axum::http::StatusCode, (axum::http::StatusCode, String)> {
    state.users.delete_user(id).await.map_err(store_error)?;
    info!(user_id = id, "user deleted");
    Ok(axum::http::StatusCode::NO_CONTENT)
}
