//! Administrative and per-user endpoints over [`AdminApi`].

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use modhub::{AuditView, EffectiveState, ModuleView, UserModuleEntry};
use serde_json::{json, Value};
use tracing::field::Empty;

use super::problem::Problem;
use super::AppState;

type ApiResult<T> = Result<T, Problem>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/modules", get(list_modules))
        .route("/modules/{id}", get(get_module))
        .route("/modules/{id}/{action}", post(module_action))
        .route("/audit", get(audit_log))
        .route("/users/{uid}/modules", get(user_modules).delete(purge_user))
        .route("/users/{uid}/modules/{id}/{action}", post(user_action))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_modules(State(st): State<AppState>) -> Json<Vec<ModuleView>> {
    Json(st.admin.list_modules())
}

async fn get_module(State(st): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<ModuleView>> {
    Ok(Json(st.admin.module(&id)?))
}

async fn audit_log(State(st): State<AppState>) -> Json<Vec<AuditView>> {
    Json(st.admin.audit_log())
}

#[tracing::instrument(name = "admin.module_action", skip(st), fields(outcome = Empty))]
async fn module_action(
    State(st): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> ApiResult<Response> {
    let view = match action.as_str() {
        "enable" => st.admin.enable(&id).await?,
        "disable" => st.admin.disable(&id).await?,
        "uninstall" => {
            st.admin.uninstall(&id).await?;
            tracing::Span::current().record("outcome", "uninstalled");
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        other => return Err(unknown_action(other)),
    };
    tracing::Span::current().record("outcome", view.state.as_str());
    Ok(Json(view).into_response())
}

async fn user_modules(
    State(st): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<Vec<UserModuleEntry>>> {
    Ok(Json(st.admin.user_modules(&uid).await?))
}

async fn purge_user(State(st): State<AppState>, Path(uid): Path<String>) -> ApiResult<Json<Value>> {
    let deleted = st.admin.user_purge(&uid).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[tracing::instrument(name = "admin.user_action", skip(st))]
async fn user_action(
    State(st): State<AppState>,
    Path((uid, id, action)): Path<(String, String, String)>,
) -> ApiResult<Json<EffectiveState>> {
    let state = match action.as_str() {
        "install" => st.admin.user_install(&uid, &id).await?,
        "uninstall" => st.admin.user_uninstall(&uid, &id).await?,
        "enable" => st.admin.user_set_enabled(&uid, &id, true).await?,
        "disable" => st.admin.user_set_enabled(&uid, &id, false).await?,
        other => return Err(unknown_action(other)),
    };
    Ok(Json(state))
}

fn unknown_action(action: &str) -> Problem {
    Problem::not_found(format!("unknown action '{action}'"))
}
