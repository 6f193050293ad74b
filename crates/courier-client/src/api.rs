//! REST client for the Courier server.

use chrono::{DateTime, Utc};
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use courier_shared::constants::USER_ID_HEADER;
use courier_shared::{Message, MessageId, SendMessageRequest, UnreadCounts, UserId};

use crate::error::ClientError;

/// Response of the mark-read endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_ids: Vec<MessageId>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    me: UserId,
}

impl ApiClient {
    pub fn new(server_url: &str, me: UserId) -> Result<Self, ClientError> {
        let base = Url::parse(server_url.trim_end_matches('/'))
            .map_err(|e| ClientError::InvalidUrl(format!("{server_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(server_url.to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            me,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.me
    }

    /// Build `<base>/<segments...>` with every segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// WebSocket URL for the push channel, with identity in the query.
    pub fn ws_url(&self) -> Result<Url, ClientError> {
        let mut url = self.endpoint(&["ws"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidUrl(url.to_string()))?;
        url.query_pairs_mut().append_pair("user_id", self.me.as_str());
        Ok(url)
    }

    pub async fn send_message(
        &self,
        to: &UserId,
        request: &SendMessageRequest,
    ) -> Result<Message, ClientError> {
        let url = self.endpoint(&["messages", to.as_str()])?;
        let resp = self
            .http
            .post(url)
            .header(USER_ID_HEADER, self.me.as_str())
            .json(request)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn messages(
        &self,
        counterpart: &UserId,
        limit: Option<u32>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, ClientError> {
        let mut url = self.endpoint(&["messages", counterpart.as_str()])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
            if let Some(before) = before {
                query.append_pair("before", &before.to_rfc3339());
            }
        }
        self.get(url).await
    }

    pub async fn mark_read(&self, counterpart: &UserId) -> Result<ReadReceipt, ClientError> {
        let url = self.endpoint(&["messages", counterpart.as_str(), "read"])?;
        let resp = self
            .http
            .post(url)
            .header(USER_ID_HEADER, self.me.as_str())
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn unread_counts(&self) -> Result<UnreadCounts, ClientError> {
        self.get(self.endpoint(&["unread-counts"])?).await
    }

    pub async fn presence(&self) -> Result<Vec<UserId>, ClientError> {
        self.get(self.endpoint(&["presence"])?).await
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        let resp = self
            .http
            .get(url)
            .header(USER_ID_HEADER, self.me.as_str())
            .send()
            .await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    debug!(status = status.as_u16(), error = %message, "Request failed");
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}
