//! REST access to the chat backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use parlor_shared::error::TransportError;
use parlor_shared::protocol::{self, ConversationSnapshot};
use parlor_shared::transport::{ChatApi, FetchTarget, TokenSource};
use parlor_shared::types::{ChatId, UserId};

use crate::error::NetError;

/// JSON-over-HTTPS client for the chat endpoints.
///
/// Every call attaches the current bearer token; without one the call fails
/// with [`TransportError::NotAuthenticated`] before anything is sent.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base: Url,
    tokens: Arc<dyn TokenSource>,
}

impl RestClient {
    pub fn new(
        base_url: &str,
        tokens: Arc<dyn TokenSource>,
        timeout: Duration,
    ) -> Result<Self, NetError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(NetError::NotABase(base_url.to_string()));
        }
        if !matches!(base.scheme(), "http" | "https") {
            return Err(NetError::UnsupportedScheme(base.scheme().to_string()));
        }

        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("parlor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, base, tokens })
    }

    /// `{base}/seg/seg/...`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn token(&self) -> Result<String, TransportError> {
        self.tokens
            .bearer_token()
            .ok_or(TransportError::NotAuthenticated)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Value, TransportError> {
        let token = self.token()?;
        let response = request.bearer_auth(token).send().await.map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), url = %response.url(), "Request rejected");
            return Err(TransportError::from_status(status.as_u16()));
        }

        let body = response.text().await.map_err(map_reqwest)?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn get(&self, segments: &[&str]) -> Result<Value, TransportError> {
        let url = self.endpoint(segments);
        debug!(url = %url, "GET");
        self.execute(self.http.get(url)).await
    }

    async fn post(&self, segments: &[&str], body: &Value) -> Result<Value, TransportError> {
        let url = self.endpoint(segments);
        debug!(url = %url, "POST");
        self.execute(self.http.post(url).json(body)).await
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

#[async_trait]
impl ChatApi for RestClient {
    async fn resolve_or_create(
        &self,
        counterpart: &UserId,
    ) -> Result<ConversationSnapshot, TransportError> {
        let body = self
            .post(&["chats", "resolve"], &json!({ "counterpartId": counterpart }))
            .await?;
        let snapshot = ConversationSnapshot::from_body(&body)?;
        if snapshot.chat_id.is_none() {
            warn!(counterpart = %counterpart, "Resolve response carried no chat id");
        }
        Ok(snapshot)
    }

    async fn send_message(&self, chat_id: &ChatId, text: &str) -> Result<Value, TransportError> {
        self.post(&["chats", chat_id.as_str(), "messages"], &json!({ "text": text }))
            .await
    }

    async fn fetch_conversation(
        &self,
        target: &FetchTarget,
    ) -> Result<ConversationSnapshot, TransportError> {
        let body = match target {
            FetchTarget::Chat(chat_id) => self.get(&["chats", chat_id.as_str()]).await?,
            FetchTarget::Counterpart(user) => self.get(&["chats", "with", user.as_str()]).await?,
        };
        let mut snapshot = ConversationSnapshot::from_body(&body)?;
        if let (None, FetchTarget::Chat(chat_id)) = (&snapshot.chat_id, target) {
            snapshot.chat_id = Some(chat_id.clone());
        }
        Ok(snapshot)
    }

    async fn current_user(&self) -> Result<UserId, TransportError> {
        let body = self.get(&["users", "me"]).await?;
        protocol::user_ref(&body)
            .ok_or_else(|| TransportError::Decode("profile response carried no user id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    fn client(base: &str) -> RestClient {
        RestClient::new(base, Arc::new(StaticToken::new("t")), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let c = client("http://localhost:5000/api");
        assert_eq!(
            c.endpoint(&["chats", "resolve"]).as_str(),
            "http://localhost:5000/api/chats/resolve"
        );

        let c = client("http://localhost:5000/api/");
        assert_eq!(
            c.endpoint(&["chats", "a b/c", "messages"]).as_str(),
            "http://localhost:5000/api/chats/a%20b%2Fc/messages"
        );
    }

    #[test]
    fn test_rejects_bad_base_urls() {
        let tokens: Arc<dyn TokenSource> = Arc::new(StaticToken::none());
        assert!(RestClient::new("not a url", tokens.clone(), Duration::from_secs(1)).is_err());
        assert!(RestClient::new("mailto:x@y.z", tokens.clone(), Duration::from_secs(1)).is_err());
        assert!(RestClient::new("ftp://host/api", tokens, Duration::from_secs(1)).is_err());
    }
}
