#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use pixelshare::api::{ApiError, FeedScope, Post, UserProfile};
use pixelshare::credentials::{Credential, CredentialStore, MemoryCredentials};
use pixelshare::data::{AuthService, FeedService, PostService};
use pixelshare::feed::Feed;
use pixelshare::media::MediaFile;
use pixelshare::session::{Guard, Navigator, Redirect};
use pixelshare::upload::{Coordinator, Preview, PreviewProvider};

pub fn post(id: &str) -> Post {
    Post {
        id: id.into(),
        caption: format!("caption {id}"),
        media_url: format!("https://cdn.example.test/{id}.jpg"),
        file_type: Some("image/jpeg".into()),
        file_name: Some(format!("{id}.jpg")),
        created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        author: None,
        user_id: Some("user-1".into()),
    }
}

pub fn ids(posts: &[Post]) -> Vec<String> {
    posts.iter().map(|p| p.id.clone()).collect()
}

pub fn server_error() -> ApiError {
    ApiError::RequestFailed {
        status: 500,
        detail: None,
    }
}

pub fn image_file(name: &str) -> MediaFile {
    MediaFile::from_bytes(name, "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0])
}

#[derive(Default)]
pub struct RecordingNavigator {
    reasons: Mutex<Vec<Redirect>>,
}

impl RecordingNavigator {
    pub fn redirects(&self) -> usize {
        self.reasons.lock().len()
    }

    pub fn reasons(&self) -> Vec<Redirect> {
        self.reasons.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn to_login(&self, reason: Redirect) {
        self.reasons.lock().push(reason);
    }
}

/// Replays scripted feed responses; an empty script yields an empty feed.
/// When a gate is installed, the next load takes its scripted response,
/// announces itself on `started` and blocks until released. Later loads pass
/// straight through.
#[derive(Default)]
pub struct ScriptedFeed {
    responses: Mutex<VecDeque<Result<Vec<Post>, ApiError>>>,
    calls: AtomicUsize,
    scopes: Mutex<Vec<FeedScope>>,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl ScriptedFeed {
    pub fn push(&self, response: Result<Vec<Post>, ApiError>) {
        self.responses.lock().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn scopes(&self) -> Vec<FeedScope> {
        self.scopes.lock().clone()
    }

    pub fn install_gate(&self, started: Sender<()>, release: Receiver<()>) {
        *self.gate.lock() = Some((started, release));
    }
}

impl FeedService for ScriptedFeed {
    fn load_feed(&self, scope: FeedScope) -> Result<Vec<Post>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scopes.lock().push(scope);
        let response = self.responses.lock().pop_front().unwrap_or(Ok(Vec::new()));
        let gate = self.gate.lock().take();
        if let Some((started, release)) = gate {
            started.send(()).unwrap();
            release.recv().unwrap();
        }
        response
    }
}

/// Post mutations with scripted results. When a gate is installed, uploads
/// announce themselves on `started` and block until the gate releases them.
#[derive(Default)]
pub struct ScriptedPosts {
    upload_results: Mutex<VecDeque<Result<(), ApiError>>>,
    delete_results: Mutex<VecDeque<Result<(), ApiError>>>,
    uploads: Mutex<Vec<(String, String)>>,
    deletes: Mutex<Vec<String>>,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl ScriptedPosts {
    pub fn push_upload(&self, result: Result<(), ApiError>) {
        self.upload_results.lock().push_back(result);
    }

    pub fn push_delete(&self, result: Result<(), ApiError>) {
        self.delete_results.lock().push_back(result);
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }

    pub fn install_gate(&self, started: Sender<()>, release: Receiver<()>) {
        *self.gate.lock() = Some((started, release));
    }
}

impl PostService for ScriptedPosts {
    fn upload(&self, file: &MediaFile, caption: &str) -> Result<(), ApiError> {
        self.uploads
            .lock()
            .push((file.file_name.clone(), caption.to_string()));
        let gate = self.gate.lock().clone();
        if let Some((started, release)) = gate {
            started.send(()).unwrap();
            release.recv().unwrap();
        }
        self.upload_results.lock().pop_front().unwrap_or(Ok(()))
    }

    fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.deletes.lock().push(id.to_string());
        self.delete_results.lock().pop_front().unwrap_or(Ok(()))
    }
}

pub struct ScriptedAuth {
    pub login_result: Mutex<Option<Result<Credential, ApiError>>>,
    pub register_result: Mutex<Option<Result<(), ApiError>>>,
    pub profile: Mutex<Option<Result<UserProfile, ApiError>>>,
    pub profile_calls: AtomicUsize,
}

impl Default for ScriptedAuth {
    fn default() -> Self {
        Self {
            login_result: Mutex::new(None),
            register_result: Mutex::new(None),
            profile: Mutex::new(None),
            profile_calls: AtomicUsize::new(0),
        }
    }
}

impl AuthService for ScriptedAuth {
    fn login(&self, _email: &str, _password: &str) -> Result<Credential, ApiError> {
        self.login_result
            .lock()
            .take()
            .unwrap_or_else(|| Err(ApiError::AuthRejected))
    }

    fn register(&self, _email: &str, _password: &str) -> Result<(), ApiError> {
        self.register_result.lock().take().unwrap_or(Ok(()))
    }

    fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.profile
            .lock()
            .take()
            .unwrap_or_else(|| Err(server_error()))
    }
}

/// Hands out numbered preview references and counts releases.
#[derive(Default)]
pub struct CountingPreviews {
    acquired: AtomicUsize,
    released: Mutex<Vec<String>>,
    fail_next: Mutex<bool>,
}

impl CountingPreviews {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    pub fn outstanding(&self) -> usize {
        self.acquired() - self.released.lock().len()
    }
}

impl PreviewProvider for CountingPreviews {
    fn acquire(&self, file: &MediaFile) -> io::Result<Preview> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Preview::new(format!("preview-{n}-{}", file.file_name)))
    }

    fn release(&self, preview: Preview) {
        self.released
            .lock()
            .push(preview.path().display().to_string());
    }
}

/// A fully wired session against fakes.
pub struct Harness {
    pub credentials: Arc<MemoryCredentials>,
    pub navigator: Arc<RecordingNavigator>,
    pub guard: Arc<Guard>,
    pub feed_api: Arc<ScriptedFeed>,
    pub posts_api: Arc<ScriptedPosts>,
    pub previews: Arc<CountingPreviews>,
    pub feed: Arc<Feed>,
    pub uploads: Coordinator,
}

impl Harness {
    pub fn signed_in() -> Self {
        Self::build(Some(Credential::new("token-123").unwrap()))
    }

    pub fn signed_out() -> Self {
        Self::build(None)
    }

    fn build(credential: Option<Credential>) -> Self {
        let credentials = Arc::new(match credential {
            Some(credential) => MemoryCredentials::with(credential),
            None => MemoryCredentials::new(),
        });
        let navigator = Arc::new(RecordingNavigator::default());
        let guard = Arc::new(Guard::new(
            credentials.clone() as Arc<dyn CredentialStore>,
            navigator.clone() as Arc<dyn Navigator>,
        ));
        let feed_api = Arc::new(ScriptedFeed::default());
        let posts_api = Arc::new(ScriptedPosts::default());
        let previews = Arc::new(CountingPreviews::default());
        let feed = Arc::new(Feed::new(
            feed_api.clone() as Arc<dyn FeedService>,
            posts_api.clone() as Arc<dyn PostService>,
            guard.clone(),
        ));
        let uploads = Coordinator::new(
            posts_api.clone() as Arc<dyn PostService>,
            previews.clone() as Arc<dyn PreviewProvider>,
            guard.clone(),
            feed.clone(),
        );
        Self {
            credentials,
            navigator,
            guard,
            feed_api,
            posts_api,
            previews,
            feed,
            uploads,
        }
    }

    pub fn load(&self, posts: Vec<Post>) {
        self.feed_api.push(Ok(posts));
        self.feed.refresh();
    }
}
