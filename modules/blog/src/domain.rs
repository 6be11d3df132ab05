use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory post storage, newest last.
#[derive(Debug, Default)]
pub struct PostStore {
    posts: RwLock<Vec<Post>>,
    next_id: AtomicU64,
}

impl PostStore {
    pub fn create(&self, title: impl Into<String>, body: impl Into<String>) -> Post {
        let post = Post {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            title: title.into(),
            body: body.into(),
            created_at: Utc::now(),
        };
        self.posts.write().push(post.clone());
        post
    }

    /// Newest first, at most `limit` posts.
    pub fn latest(&self, limit: usize) -> Vec<Post> {
        self.posts.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn get(&self, id: u64) -> Option<Post> {
        self.posts.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.posts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.read().is_empty()
    }

    pub fn clear(&self) {
        self.posts.write().clear();
    }
}
