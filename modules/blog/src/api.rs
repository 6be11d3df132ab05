//! REST routes, relative to the module's `/blog` prefix.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::domain::{Post, PostStore};

#[derive(Clone)]
struct ApiState {
    store: Arc<PostStore>,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NewPost {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

pub fn routes(store: Arc<PostStore>, page_size: usize) -> Router {
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", get(get_post))
        .with_state(ApiState { store, page_size })
}

async fn list_posts(State(st): State<ApiState>, Query(q): Query<ListQuery>) -> Json<Vec<Post>> {
    let limit = q.limit.unwrap_or(st.page_size).min(st.page_size);
    Json(st.store.latest(limit))
}

async fn create_post(
    State(st): State<ApiState>,
    Json(req): Json<NewPost>,
) -> Result<(StatusCode, Json<Post>), StatusCode> {
    if req.title.trim().is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let post = st.store.create(req.title, req.body);
    tracing::debug!(post_id = post.id, "Blog post created");
    Ok((StatusCode::CREATED, Json(post)))
}

async fn get_post(State(st): State<ApiState>, Path(id): Path<u64>) -> Result<Json<Post>, StatusCode> {
    st.store.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn create_then_list() {
        let store = Arc::new(PostStore::default());
        let app = routes(store.clone(), 2);

        let req = Request::post("/posts")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"Hello"}"#))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .oneshot(Request::get("/posts?limit=50").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let posts: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(posts[0]["title"], "Hello");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let app = routes(Arc::new(PostStore::default()), 10);
        let req = Request::post("/posts")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"  "}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
