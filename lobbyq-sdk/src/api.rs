//! Request/response fallback client.
//!
//! The push channel delivers low-latency fan-out; this client is the
//! durability path. Chat sends always go through `post_message` regardless
//! of push-channel state, and the unread count can be pulled here when the
//! push channel is down.

use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::frame::{ChatMessage, LobbyId};
use crate::unread::UnreadSource;

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct UnreadCountResponse {
    count: u32,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            auth_token: None,
            http: reqwest::Client::new(),
        }
    }

    /// Attach a bearer token minted by the external auth service.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Persist a chat message in `lobby_id`. This is the sender's
    /// durability path; failures must reach the user.
    pub async fn post_message(
        &self,
        lobby_id: LobbyId,
        text: &str,
    ) -> Result<ChatMessage, ApiError> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/api/lobbies/{lobby_id}/messages"))
            .json(&json!({ "text": text }))
            .send()
            .await?;
        Self::expect_ok(resp).await?.json().await.map_err(Into::into)
    }

    /// Current unread-notification count.
    pub async fn fetch_unread_count(&self) -> Result<u32, ApiError> {
        let resp = self
            .request(reqwest::Method::GET, "/api/notifications/unread-count")
            .send()
            .await?;
        let body: UnreadCountResponse = Self::expect_ok(resp).await?.json().await?;
        Ok(body.count)
    }

    /// Acknowledge one notification as read.
    pub async fn mark_read(&self, notification_id: u64) -> Result<(), ApiError> {
        let resp = self
            .request(
                reqwest::Method::PATCH,
                &format!("/api/notifications/{notification_id}/read"),
            )
            .send()
            .await?;
        Self::expect_ok(resp).await.map(|_| ())
    }

    /// Acknowledge every notification as read.
    pub async fn mark_all_read(&self) -> Result<(), ApiError> {
        let resp = self
            .request(reqwest::Method::PATCH, "/api/notifications/read-all")
            .send()
            .await?;
        Self::expect_ok(resp).await.map(|_| ())
    }

    async fn expect_ok(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(ApiError::Status { status, body })
        }
    }
}

impl UnreadSource for ApiClient {
    async fn fetch_unread(&self) -> Result<u32, ApiError> {
        self.fetch_unread_count().await
    }
}
