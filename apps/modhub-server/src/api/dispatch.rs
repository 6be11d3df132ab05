//! Fallback handler: forwards a request to the router of the enabled module
//! mounted under the longest matching prefix.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;

use super::problem::Problem;
use super::AppState;

/// Caller identity; when present the module must be enabled for that user.
pub const USER_HEADER: &str = "x-user-id";

pub async fn dispatch(State(st): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    let Some(hit) = st.routes.resolve(&path) else {
        return Problem::not_found(format!("no module serves '{path}'")).into_response();
    };

    if let Some(user) = req.headers().get(USER_HEADER).and_then(|v| v.to_str().ok()) {
        match st.admin.user_effective_state(user, &hit.module_id).await {
            Ok(state) if state.enabled => {}
            Ok(_) => {
                tracing::debug!(user = %user, module = %hit.module_id, "Module hidden for user");
                return Problem::not_found(format!("no module serves '{path}'")).into_response();
            }
            Err(e) => return Problem::from(e).into_response(),
        }
    }

    let (mut parts, body) = req.into_parts();
    let relative = match parts.uri.query() {
        Some(q) => format!("{}?{q}", hit.path),
        None => hit.path.clone(),
    };
    parts.uri = match relative.parse::<PathAndQuery>().map(Uri::from) {
        Ok(uri) => uri,
        Err(e) => {
            return Problem::new(StatusCode::BAD_REQUEST, "Bad Request", e.to_string())
                .into_response()
        }
    };

    tracing::trace!(module = %hit.module_id, prefix = %hit.prefix, path = %hit.path, "Dispatching");
    match hit.router.oneshot(Request::from_parts(parts, body)).await {
        Ok(resp) => resp,
        Err(never) => match never {},
    }
}
