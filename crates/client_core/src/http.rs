use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ChannelId, CourseId, MessageId},
    error::{ApiError, ErrorCode},
    protocol::{
        ChannelSummary, CreateMessageRequest, ListMessagesQuery, LockChannelRequest, MessagePage,
        MessagePayload, ModerationActionRecord, ReportMessageRequest,
    },
};

use crate::{error::TransportError, transport::RestTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationRequest {
    Pin,
    Unpin,
    MarkAnswer,
    UnmarkAnswer,
    LockThread,
    UnlockThread,
    Hide,
    Restore,
}

impl ModerationRequest {
    fn route(self) -> (Method, &'static str) {
        match self {
            Self::Pin => (Method::PUT, "pin"),
            Self::Unpin => (Method::DELETE, "pin"),
            Self::MarkAnswer => (Method::PUT, "answer"),
            Self::UnmarkAnswer => (Method::DELETE, "answer"),
            Self::LockThread => (Method::PUT, "lock"),
            Self::UnlockThread => (Method::DELETE, "lock"),
            Self::Hide => (Method::POST, "hide"),
            Self::Restore => (Method::POST, "restore"),
        }
    }
}

/// Bearer-authenticated client for the request/response surface.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    server_url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), server_url, token)
    }

    pub fn with_client(
        http: Client,
        server_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            server_url,
            token: token.into(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn moderate(
        &self,
        message_id: MessageId,
        request: ModerationRequest,
    ) -> Result<MessagePayload, TransportError> {
        let (method, action) = request.route();
        let path = format!("/messages/{}/{action}", message_id.0);
        self.fetch(self.request(method, &path)).await
    }

    pub async fn report(&self, message_id: MessageId, reason: &str) -> Result<(), TransportError> {
        let path = format!("/messages/{}/report", message_id.0);
        let request = self
            .request(Method::POST, &path)
            .json(&ReportMessageRequest {
                reason: reason.to_string(),
            });
        send(request).await.map(|_| ())
    }

    pub async fn moderation_log(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<ModerationActionRecord>, TransportError> {
        let path = format!("/messages/{}/moderation", message_id.0);
        self.fetch(self.request(Method::GET, &path)).await
    }

    pub async fn lock_channel(
        &self,
        channel_id: ChannelId,
        locked: bool,
    ) -> Result<ChannelSummary, TransportError> {
        let path = format!("/channels/{}/lock", channel_id.0);
        let request = self
            .request(Method::PUT, &path)
            .json(&LockChannelRequest { locked });
        self.fetch(request).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.server_url))
            .bearer_auth(&self.token)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TransportError> {
        send(request)
            .await?
            .json()
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))
    }
}

async fn send(request: RequestBuilder) -> Result<Response, TransportError> {
    let response = request
        .send()
        .await
        .map_err(|err| TransportError::Unreachable(err.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let error = serde_json::from_str::<ApiError>(&body).unwrap_or_else(|_| {
        ApiError::new(ErrorCode::Internal, format!("unexpected status {status}"))
    });
    Err(TransportError::Rejected(error))
}

#[async_trait]
impl RestTransport for HttpTransport {
    async fn list_channels(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<ChannelSummary>, TransportError> {
        let path = format!("/courses/{}/channels", course_id.0);
        self.fetch(self.request(Method::GET, &path)).await
    }

    async fn list_messages(
        &self,
        channel_id: ChannelId,
        query: &ListMessagesQuery,
    ) -> Result<MessagePage, TransportError> {
        let path = format!("/channels/{}/messages", channel_id.0);
        self.fetch(self.request(Method::GET, &path).query(query))
            .await
    }

    async fn create_message(
        &self,
        channel_id: ChannelId,
        request: &CreateMessageRequest,
    ) -> Result<MessagePayload, TransportError> {
        let path = format!("/channels/{}/messages", channel_id.0);
        self.fetch(self.request(Method::POST, &path).json(request))
            .await
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
