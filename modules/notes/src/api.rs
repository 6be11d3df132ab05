//! Notes of the calling user, identified by the `x-user-id` header.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    pub text: String,
}

#[derive(Debug, Default)]
pub struct NoteBook {
    by_user: DashMap<String, Vec<Note>>,
}

impl NoteBook {
    pub fn add(&self, user_id: &str, note: Note) {
        self.by_user.entry(user_id.to_string()).or_default().push(note);
    }

    pub fn of(&self, user_id: &str) -> Vec<Note> {
        self.by_user
            .get(user_id)
            .map(|n| n.value().clone())
            .unwrap_or_default()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }
}

pub fn routes(book: Arc<NoteBook>) -> Router {
    Router::new()
        .route("/", get(list_notes).post(add_note))
        .with_state(book)
}

fn user_of(headers: &HeaderMap) -> Result<String, StatusCode> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(StatusCode::UNAUTHORIZED)
}

async fn list_notes(
    State(book): State<Arc<NoteBook>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Note>>, StatusCode> {
    let user = user_of(&headers)?;
    Ok(Json(book.of(&user)))
}

async fn add_note(
    State(book): State<Arc<NoteBook>>,
    headers: HeaderMap,
    Json(note): Json<Note>,
) -> Result<StatusCode, StatusCode> {
    let user = user_of(&headers)?;
    book.add(&user, note);
    Ok(StatusCode::CREATED)
}
