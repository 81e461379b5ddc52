use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Author;

#[derive(Debug, Error, PartialEq)]
pub enum UploadError {
    #[error("user {0} already has an upload in progress")]
    SessionActive(Uuid),
    #[error("upload is empty")]
    Empty,
}

/// Track metadata announced when a streamed upload begins.
#[derive(Debug, Clone)]
pub struct UploadMeta {
    pub title: String,
    pub description: String,
    pub original_file_name: String,
}

/// Registry of open streamed uploads: at most one per author.
#[derive(Debug, Default)]
pub struct UploadSessions {
    active: Mutex<HashSet<Uuid>>,
}

impl UploadSessions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opens a session for `author`. Fails while another one is still open.
    pub fn begin(
        self: &Arc<Self>,
        author: Author,
        meta: UploadMeta,
    ) -> Result<UploadSession, UploadError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(author.id) {
            return Err(UploadError::SessionActive(author.id));
        }

        Ok(UploadSession {
            registry: Arc::clone(self),
            author,
            meta,
            body: String::new(),
        })
    }

    pub fn is_active(&self, author_id: Uuid) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&author_id)
    }

    fn release(&self, author_id: Uuid) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&author_id);
    }
}

/// One in-flight streamed upload. Chunks accumulate here until [`finish`];
/// dropping the handle releases the author's slot.
///
/// [`finish`]: UploadSession::finish
#[derive(Debug)]
pub struct UploadSession {
    registry: Arc<UploadSessions>,
    author: Author,
    meta: UploadMeta,
    body: String,
}

/// Everything needed to create the track once the upload is complete.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub author: Author,
    pub meta: UploadMeta,
    pub body: String,
}

impl UploadSession {
    pub fn add(&mut self, chunk: &str) {
        self.body.push_str(chunk);
    }

    pub fn finish(mut self) -> Result<CompletedUpload, UploadError> {
        let body = std::mem::take(&mut self.body);
        if body.trim().is_empty() {
            return Err(UploadError::Empty);
        }
        Ok(CompletedUpload {
            author: self.author.clone(),
            meta: self.meta.clone(),
            body,
        })
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        self.registry.release(self.author.id);
    }
}
