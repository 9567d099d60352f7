//! HTTP client for the messages API.

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::client::ClientError;
use crate::client::reconcile::HistorySource;
use crate::model::{Message, MessageContent, PresenceView, UserId};

#[derive(Clone)]
pub struct MessagesApi {
    http: reqwest::Client,
    base_url: String,
    auth: Vec<(String, String)>,
}

impl MessagesApi {
    /// `base_url` is the server root (`http://host:port`). `auth` is sent as
    /// query parameters on every call.
    pub fn new(base_url: impl Into<String>, auth: Vec<(String, String)>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http: reqwest::Client::new(), base_url, auth }
    }

    /// Persist and deliver a message.
    ///
    /// # Errors
    ///
    /// Network failure or a non-201 response (400 for empty content).
    pub async fn send(&self, receiver: &UserId, content: &MessageContent) -> Result<Message, ClientError> {
        let response = self
            .http
            .post(format!("{}/api/messages/send/{}", self.base_url, receiver))
            .query(&self.auth)
            .json(content)
            .send()
            .await?;
        expect_status(response, StatusCode::CREATED).await?.json().await.map_err(Into::into)
    }

    /// Conversation with `partner`, oldest first.
    ///
    /// # Errors
    ///
    /// Network failure or a non-200 response.
    pub async fn conversation(&self, partner: &UserId) -> Result<Vec<Message>, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/messages/{}", self.base_url, partner))
            .query(&self.auth)
            .send()
            .await?;
        expect_status(response, StatusCode::OK).await?.json().await.map_err(Into::into)
    }

    /// Current online set.
    ///
    /// # Errors
    ///
    /// Network failure or a non-200 response.
    pub async fn presence(&self) -> Result<PresenceView, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/presence", self.base_url))
            .query(&self.auth)
            .send()
            .await?;
        expect_status(response, StatusCode::OK).await?.json().await.map_err(Into::into)
    }
}

#[async_trait]
impl HistorySource for MessagesApi {
    // The server derives `me` from the auth parameters.
    async fn history(&self, _me: &UserId, partner: &UserId) -> Result<Vec<Message>, ClientError> {
        self.conversation(partner).await
    }
}

async fn expect_status(response: reqwest::Response, expected: StatusCode) -> Result<reqwest::Response, ClientError> {
    if response.status() == expected {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status { status, body })
}
