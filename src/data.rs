use std::sync::Arc;

use crate::api::{self, ApiError, FeedScope, Post, RegisterRequest, UserProfile};
use crate::credentials::Credential;
use crate::media::MediaFile;

pub trait AuthService: Send + Sync {
    fn login(&self, email: &str, password: &str) -> Result<Credential, ApiError>;
    fn register(&self, email: &str, password: &str) -> Result<(), ApiError>;
    fn current_user(&self) -> Result<UserProfile, ApiError>;
}

pub trait FeedService: Send + Sync {
    fn load_feed(&self, scope: FeedScope) -> Result<Vec<Post>, ApiError>;
}

pub trait PostService: Send + Sync {
    fn upload(&self, file: &MediaFile, caption: &str) -> Result<(), ApiError>;
    fn delete(&self, id: &str) -> Result<(), ApiError>;
}

pub struct ApiAuthService {
    client: Arc<api::Client>,
}

impl ApiAuthService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl AuthService for ApiAuthService {
    fn login(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        self.client.login(email, password)
    }

    fn register(&self, email: &str, password: &str) -> Result<(), ApiError> {
        self.client.register(&RegisterRequest::new(email, password))
    }

    fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.client.me()
    }
}

pub struct ApiFeedService {
    client: Arc<api::Client>,
}

impl ApiFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ApiFeedService {
    fn load_feed(&self, scope: FeedScope) -> Result<Vec<Post>, ApiError> {
        self.client.feed(scope)
    }
}

pub struct ApiPostService {
    client: Arc<api::Client>,
}

impl ApiPostService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl PostService for ApiPostService {
    fn upload(&self, file: &MediaFile, caption: &str) -> Result<(), ApiError> {
        self.client.upload(file, caption)
    }

    fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.client.delete_post(id)
    }
}
