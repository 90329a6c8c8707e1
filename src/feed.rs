use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::api::{ApiError, FeedScope, Post};
use crate::data::{FeedService, PostService};
use crate::session::Guard;

pub const LOAD_FAILED: &str = "Failed to load feed. Please try again.";
pub const DELETE_FAILED: &str = "Failed to delete post.";
pub const DELETE_PROMPT: &str = "Are you sure you want to delete this post?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
}

/// Identifies one issued refresh and the scope it fetches; only the newest
/// may write the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    seq: u64,
    scope: FeedScope,
}

impl Ticket {
    pub fn scope(&self) -> FeedScope {
        self.scope
    }
}

/// Posts in server order plus load status for one scope.
#[derive(Debug, Clone, Default)]
pub struct FeedCache {
    scope: FeedScope,
    posts: Vec<Post>,
    status: Status,
    error: Option<String>,
    issued: u64,
}

impl FeedCache {
    pub fn scope(&self) -> FeedScope {
        self.scope
    }

    /// Switching scope drops the current posts and invalidates refreshes in
    /// flight. Returns whether the scope changed.
    pub fn set_scope(&mut self, scope: FeedScope) -> bool {
        if self.scope == scope {
            return false;
        }
        self.scope = scope;
        self.reset();
        true
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn begin_load(&mut self) -> Ticket {
        self.issued += 1;
        self.status = Status::Loading;
        Ticket {
            seq: self.issued,
            scope: self.scope,
        }
    }

    /// Applies a load result unless a newer refresh has been issued since.
    /// Returns whether the result was applied.
    pub fn finish_load(&mut self, ticket: Ticket, result: Result<Vec<Post>, String>) -> bool {
        if !self.is_current(ticket) {
            debug!(ticket = ticket.seq, newest = self.issued, "feed: stale response dropped");
            return false;
        }
        match result {
            Ok(posts) => {
                self.posts = posts;
                self.status = Status::Ready;
                self.error = None;
            }
            Err(message) => {
                self.status = Status::Error;
                self.error = Some(message);
            }
        }
        true
    }

    /// Gives up on a load without recording an error. The cache is cleared
    /// when the ticket is still the newest; returns whether it was.
    pub fn abandon(&mut self, ticket: Ticket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.reset();
        true
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        ticket.seq == self.issued
    }

    /// Removes the post with `id`; an unknown id leaves the cache as it was.
    pub fn remove(&mut self, id: &str) -> Option<Post> {
        let idx = self.posts.iter().position(|post| post.id == id)?;
        Some(self.posts.remove(idx))
    }

    /// Forgets all posts. Refreshes still in flight are invalidated.
    pub fn reset(&mut self) {
        self.posts.clear();
        self.status = Status::Idle;
        self.error = None;
        self.issued += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Loaded(usize),
    /// A newer refresh was issued while this one was in flight.
    Stale,
    Redirected,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Cancelled,
    Deleted,
    Redirected,
    Failed(String),
}

/// Blocking yes/no decision from the user.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

pub struct Feed {
    service: Arc<dyn FeedService>,
    posts: Arc<dyn PostService>,
    guard: Arc<Guard>,
    cache: Mutex<FeedCache>,
}

impl Feed {
    pub fn new(
        service: Arc<dyn FeedService>,
        posts: Arc<dyn PostService>,
        guard: Arc<Guard>,
    ) -> Self {
        Self {
            service,
            posts,
            guard,
            cache: Mutex::new(FeedCache::default()),
        }
    }

    pub fn scope(&self) -> FeedScope {
        self.cache.lock().scope()
    }

    /// Switching scope drops the current posts; call `refresh` afterwards.
    pub fn set_scope(&self, scope: FeedScope) {
        if self.cache.lock().set_scope(scope) {
            debug!(?scope, "feed: scope changed");
        }
    }

    pub fn snapshot(&self) -> FeedCache {
        self.cache.lock().clone()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.cache.lock().posts().to_vec()
    }

    pub fn status(&self) -> Status {
        self.cache.lock().status()
    }

    pub fn reset(&self) {
        self.cache.lock().reset();
    }

    pub fn refresh(&self) -> RefreshOutcome {
        if self.guard.ensure_authenticated().is_err() {
            return RefreshOutcome::Redirected;
        }

        let ticket = self.cache.lock().begin_load();
        let scope = ticket.scope();
        let result = self.service.load_feed(scope);

        match result {
            Ok(posts) => {
                let count = posts.len();
                if self.cache.lock().finish_load(ticket, Ok(posts)) {
                    info!(count, ?scope, "feed: loaded");
                    RefreshOutcome::Loaded(count)
                } else {
                    RefreshOutcome::Stale
                }
            }
            // The credential vanished after the guard check: a redirect, not
            // a load failure.
            Err(ApiError::Unauthenticated) => {
                self.cache.lock().abandon(ticket);
                self.guard.absorb(&ApiError::Unauthenticated);
                RefreshOutcome::Redirected
            }
            Err(err) => {
                warn!(error = %err, "feed: load failed");
                let applied = self
                    .cache
                    .lock()
                    .finish_load(ticket, Err(LOAD_FAILED.to_string()));
                if self.guard.absorb(&err) {
                    RefreshOutcome::Redirected
                } else if applied {
                    RefreshOutcome::Failed(LOAD_FAILED.to_string())
                } else {
                    RefreshOutcome::Stale
                }
            }
        }
    }

    /// Runs `refresh` on a worker thread; the outcome arrives on the
    /// returned channel.
    pub fn refresh_in_background(self: &Arc<Self>) -> Receiver<RefreshOutcome> {
        let (tx, rx) = bounded(1);
        let feed = Arc::clone(self);
        thread::spawn(move || {
            let outcome = feed.refresh();
            let _ = tx.send(outcome);
        });
        rx
    }

    /// Deletes after the server confirms; the cache is not touched on
    /// failure, so there is nothing to roll back.
    pub fn delete_post(&self, id: &str, confirm: &dyn Confirm) -> DeleteOutcome {
        if !confirm.confirm(DELETE_PROMPT) {
            return DeleteOutcome::Cancelled;
        }
        if self.guard.ensure_authenticated().is_err() {
            return DeleteOutcome::Redirected;
        }

        match self.posts.delete(id) {
            Ok(()) => {
                let removed = self.cache.lock().remove(id).is_some();
                info!(id, removed, "feed: post deleted");
                DeleteOutcome::Deleted
            }
            Err(err) => {
                warn!(id, error = %err, "feed: delete failed");
                if self.guard.absorb(&err) {
                    DeleteOutcome::Redirected
                } else {
                    DeleteOutcome::Failed(DELETE_FAILED.to_string())
                }
            }
        }
    }
}
