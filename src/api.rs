use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::credentials::{Credential, CredentialStore};
use crate::media::{MediaFile, MediaType};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/";
pub const DEFAULT_LOGIN_PATH: &str = "/auth/jwt/login";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api: no credential present")]
    Unauthenticated,
    #[error("api: credential rejected")]
    AuthRejected,
    #[error("api: request failed with status {status}")]
    RequestFailed { status: u16, detail: Option<String> },
    #[error("api: transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("api: decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("api: login response carried no access token")]
    MissingToken,
    #[error("api: invalid url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, ApiError::AuthRejected)
    }

    /// `detail` field of a JSON error body, when the server sent one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::RequestFailed { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthRejected => Some(401),
            ApiError::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub login_path: Option<String>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedScope {
    #[default]
    All,
    Mine,
}

impl FeedScope {
    fn segments(&self) -> &'static [&'static str] {
        match self {
            FeedScope::All => &["feed"],
            FeedScope::Mine => &["feed", "mine"],
        }
    }
}

enum Auth {
    Public,
    Bearer,
}

enum Body {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart(Form),
}

/// The single configured transport every network call goes through.
///
/// Protected calls read the bearer credential from the store on each request
/// and are never sent when the store is empty.
pub struct Client {
    credentials: Arc<dyn CredentialStore>,
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    login_path: Vec<String>,
}

impl Client {
    pub fn new(credentials: Arc<dyn CredentialStore>, config: ClientConfig) -> Result<Self, ApiError> {
        let base = config
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base).map_err(|err| ApiError::InvalidUrl(format!("{base}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base));
        }
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };
        let user_agent = if config.user_agent.trim().is_empty() {
            format!("pixelshare/{}", crate::VERSION)
        } else {
            config.user_agent
        };
        let login_path = split_path(
            config
                .login_path
                .as_deref()
                .unwrap_or(DEFAULT_LOGIN_PATH),
        );

        Ok(Client {
            credentials,
            http,
            user_agent,
            base_url,
            login_path,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        let form = vec![
            ("username".to_string(), email.to_string()),
            ("password".to_string(), password.to_string()),
        ];
        let segments = self.login_path.iter().map(String::as_str).collect::<Vec<_>>();
        let resp = self.request(Method::POST, &segments, Auth::Public, Body::Form(form))?;
        let payload: TokenResponse = decode(resp)?;
        Credential::new(payload.access_token).ok_or(ApiError::MissingToken)
    }

    pub fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        let body = serde_json::to_value(request)?;
        self.request(
            Method::POST,
            &["auth", "register"],
            Auth::Public,
            Body::Json(body),
        )?;
        Ok(())
    }

    pub fn me(&self) -> Result<UserProfile, ApiError> {
        let resp = self.request(Method::GET, &["users", "me"], Auth::Bearer, Body::Empty)?;
        decode(resp)
    }

    pub fn feed(&self, scope: FeedScope) -> Result<Vec<Post>, ApiError> {
        let resp = self.request(Method::GET, scope.segments(), Auth::Bearer, Body::Empty)?;
        decode(resp)
    }

    pub fn upload(&self, file: &MediaFile, caption: &str) -> Result<(), ApiError> {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.mime)?;
        let form = Form::new()
            .part("file", part)
            .text("caption", caption.to_string());
        self.request(Method::POST, &["upload"], Auth::Bearer, Body::Multipart(form))?;
        Ok(())
    }

    pub fn delete_post(&self, id: &str) -> Result<(), ApiError> {
        self.request(Method::DELETE, &["posts", id], Auth::Bearer, Body::Empty)?;
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        auth: Auth,
        body: Body,
    ) -> Result<Response, ApiError> {
        let credential = match auth {
            Auth::Public => None,
            Auth::Bearer => Some(self.credentials.get().ok_or(ApiError::Unauthenticated)?),
        };
        let url = self.endpoint(segments)?;
        debug!(%method, path = url.path(), "api: request");

        let mut req: RequestBuilder = self.http.request(method.clone(), url.clone());
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(credential) = credential {
            req = req.header(AUTHORIZATION, credential.bearer());
        }
        req = match body {
            Body::Empty => req.header(CONTENT_TYPE, "application/json"),
            Body::Json(value) => req.json(&value),
            Body::Form(form) => req.form(&form),
            Body::Multipart(form) => req.multipart(form),
        };

        let resp = req.send()?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().unwrap_or_default();
        warn!(%method, path = url.path(), status = status.as_u16(), "api: request failed");
        match status.as_u16() {
            401 => Err(ApiError::AuthRejected),
            code => Err(ApiError::RequestFailed {
                status: code,
                detail: error_detail(&body),
            }),
        }
    }
}

fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let body = resp.text()?;
    Ok(serde_json::from_str(&body)?)
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// FastAPI error bodies look like `{"detail": ...}`; the detail is usually a
/// string code but may be a validation object.
pub fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
}

impl RegisterRequest {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            is_active: true,
            is_superuser: false,
            is_verified: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub caption: String,
    #[serde(rename = "url")]
    pub media_url: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Post {
    pub fn media_type(&self) -> MediaType {
        MediaType::from_mime(self.file_type.as_deref())
    }

    pub fn author_id(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or_else(|| self.author.as_ref().and_then(|a| a.id.as_deref()))
            .filter(|id| !id.is_empty())
    }

    pub fn author_email(&self) -> Option<&str> {
        self.author
            .as_ref()
            .and_then(|a| a.email.as_deref())
            .filter(|email| !email.is_empty())
    }

    pub fn display_author(&self) -> String {
        if let Some(email) = self.author_email() {
            return email.split('@').next().unwrap_or(email).to_string();
        }
        match self.author_id() {
            Some(id) => format!("User {}", id.chars().take(5).collect::<String>()),
            None => "Unknown".to_string(),
        }
    }

    /// Without a known identity nothing is treated as owned.
    pub fn is_owned_by(&self, user_id: Option<&str>) -> bool {
        match (user_id, self.author_id()) {
            (Some(user), Some(author)) => user.eq_ignore_ascii_case(author),
            _ => false,
        }
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw:?}")))
}

/// Accepts RFC 3339 and the zone-less ISO form the backend emits for UTC
/// columns.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
