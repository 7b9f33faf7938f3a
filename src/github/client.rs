//! GitHub REST client implementing [`RemoteStore`].
//!
//! Thin HTTP wrapper over the issues endpoints. Status classification and
//! payload parsing are pure functions so they can be tested without a server.

use std::time::Duration;

use reqwest::RequestBuilder;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::debug;

use super::{Message, NewResource, RemoteStore, Resource, StoreError, require_token};
use crate::settings::{BoardSettings, RepoRef};

const USER_AGENT_VALUE: &str = "issueboard";
const ACCEPT_VALUE: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";
const ERROR_BODY_LIMIT: usize = 512;

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    repo: RepoRef,
    page_size: u32,
}

impl GithubClient {
    /// Build a client for the repository named in `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::HttpClientBuild`] if the HTTP client cannot be constructed.
    pub fn new(settings: &BoardSettings) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeouts.request_secs.max(1)))
            .connect_timeout(Duration::from_secs(settings.timeouts.connect_secs.max(1)))
            .build()
            .map_err(|e| StoreError::HttpClientBuild(e.to_string()))?;

        Ok(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            repo: settings.repo.clone(),
            page_size: settings.page_size.clamp(1, 100),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{path}", self.api_base, self.repo.owner, self.repo.name)
    }

    async fn execute(&self, what: &str, request: RequestBuilder, token: Option<&str>) -> Result<String, StoreError> {
        let request = match token.map(str::trim) {
            Some(t) if !t.is_empty() => request.bearer_auth(t),
            _ => request,
        };

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let remaining = header_string(response.headers(), "x-ratelimit-remaining");
        let retry_after = header_string(response.headers(), "retry-after");
        let text = response.text().await.map_err(transport_error)?;

        if !(200..300).contains(&status) {
            debug!(what, status, "github request failed");
            return Err(classify_status(status, remaining.as_deref(), retry_after.as_deref(), &text, what));
        }
        Ok(text)
    }

    /// Follow `page` pagination until a short page comes back.
    async fn paginate<T, F>(&self, what: &str, token: Option<&str>, build: F) -> Result<Vec<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(u32) -> RequestBuilder,
    {
        let mut rows = Vec::new();
        let mut page = 1_u32;
        loop {
            let text = self.execute(what, build(page), token).await?;
            let chunk: Vec<T> = serde_json::from_str(&text).map_err(|e| StoreError::Parse(e.to_string()))?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < self.page_size as usize {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl RemoteStore for GithubClient {
    async fn read_resource(&self, token: Option<&str>, id: u64) -> Result<Resource, StoreError> {
        let what = format!("issue #{id}");
        let text = self
            .execute(&what, self.http.get(self.repo_url(&format!("/issues/{id}"))), token)
            .await?;
        parse_issue(&text)
    }

    async fn list_resources(&self, token: Option<&str>, label: &str) -> Result<Vec<Resource>, StoreError> {
        let url = self.repo_url("/issues");
        let per_page = self.page_size.to_string();
        let rows: Vec<IssueWire> = self
            .paginate("issue list", token, |page| {
                self.http.get(&url).query(&[
                    ("labels", label),
                    ("state", "all"),
                    ("sort", "created"),
                    ("direction", "asc"),
                    ("per_page", per_page.as_str()),
                    ("page", page.to_string().as_str()),
                ])
            })
            .await?;
        Ok(rows
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(IssueWire::into_resource)
            .collect())
    }

    async fn list_comments(&self, token: Option<&str>, id: u64) -> Result<Vec<Message>, StoreError> {
        let url = self.repo_url(&format!("/issues/{id}/comments"));
        let what = format!("comments of issue #{id}");
        let per_page = self.page_size.to_string();
        let rows: Vec<CommentWire> = self
            .paginate(&what, token, |page| {
                self.http
                    .get(&url)
                    .query(&[("per_page", per_page.as_str()), ("page", page.to_string().as_str())])
            })
            .await?;
        Ok(rows.into_iter().map(CommentWire::into_message).collect())
    }

    async fn create_resource(&self, token: &str, fields: &NewResource) -> Result<Resource, StoreError> {
        let token = require_token(token)?;
        let body = serde_json::json!({
            "title": fields.title,
            "body": fields.body,
            "labels": fields.labels,
        });
        let text = self
            .execute("new issue", self.http.post(self.repo_url("/issues")).json(&body), Some(token))
            .await?;
        parse_issue(&text)
    }

    async fn append_comment(&self, token: &str, id: u64, body: &str) -> Result<(), StoreError> {
        let token = require_token(token)?;
        let what = format!("issue #{id}");
        let request = self
            .http
            .post(self.repo_url(&format!("/issues/{id}/comments")))
            .json(&serde_json::json!({ "body": body }));
        self.execute(&what, request, Some(token)).await?;
        Ok(())
    }

    async fn patch_resource_body(&self, token: &str, id: u64, body: &str) -> Result<(), StoreError> {
        let token = require_token(token)?;
        let what = format!("issue #{id}");
        let request = self
            .http
            .patch(self.repo_url(&format!("/issues/{id}")))
            .json(&serde_json::json!({ "body": body }));
        self.execute(&what, request, Some(token)).await?;
        Ok(())
    }

    async fn whoami(&self, token: &str) -> Result<String, StoreError> {
        #[derive(Deserialize)]
        struct Viewer {
            login: String,
        }

        let token = require_token(token)?;
        let url = format!("{}/user", self.api_base);
        let text = self.execute("authenticated user", self.http.get(url), Some(token)).await?;
        let viewer: Viewer = serde_json::from_str(&text).map_err(|e| StoreError::Parse(e.to_string()))?;
        Ok(viewer.login)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct IssueWire {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<LabelWire>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct LabelWire {
    name: String,
}

impl IssueWire {
    fn into_resource(self) -> Resource {
        Resource {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            labels: self.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

#[derive(Deserialize)]
struct CommentWire {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<UserWire>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

#[derive(Deserialize)]
struct UserWire {
    login: String,
}

impl CommentWire {
    fn into_message(self) -> Message {
        Message {
            author: self.user.map_or_else(|| "ghost".to_string(), |u| u.login),
            body: self.body.unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_issue(json: &str) -> Result<Resource, StoreError> {
    let wire: IssueWire = serde_json::from_str(json).map_err(|e| StoreError::Parse(e.to_string()))?;
    Ok(wire.into_resource())
}

/// Map a non-success HTTP status to the store error taxonomy.
fn classify_status(
    status: u16,
    ratelimit_remaining: Option<&str>,
    retry_after: Option<&str>,
    body: &str,
    what: &str,
) -> StoreError {
    let retry_after_secs = retry_after.and_then(|v| v.trim().parse::<u64>().ok());
    let exhausted = ratelimit_remaining.is_some_and(|v| v.trim() == "0");
    match status {
        404 | 410 => StoreError::NotFound(what.to_string()),
        401 => StoreError::Unauthorized(format!("status 401: {}", truncate_body(body))),
        429 => StoreError::RateLimited { retry_after_secs },
        403 if exhausted || retry_after_secs.is_some() => StoreError::RateLimited { retry_after_secs },
        403 => StoreError::Unauthorized(format!("status 403: {}", truncate_body(body))),
        _ => StoreError::Api { status, body: truncate_body(body) },
    }
}

fn truncate_body(body: &str) -> String {
    crate::validate::truncate_text(body.trim(), ERROR_BODY_LIMIT)
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Network(err.to_string())
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
