use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::{Result, TencordError};

use super::types::{
    Channel, Guild, LoginRequest, LoginResponse, OutgoingMessage, RawMessage, UploadFile,
    UploadRequest, UploadResponse, UploadSlot, User,
};
use super::{ChannelId, ChatApi};

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: String,
    rate_limit_retry: Duration,
    transfer_timeout: Duration,
}

impl Client {
    pub fn new(config: &ApiConfig, token: &str) -> Result<Self> {
        Ok(Self {
            http: build_http(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            rate_limit_retry: config.rate_limit_retry(),
            transfer_timeout: config.transfer_timeout(),
        })
    }

    /// Exchange account credentials for a token. No token is needed for this call.
    pub async fn login(config: &ApiConfig, email: &str, password: &str) -> Result<LoginResponse> {
        let http = build_http(config)?;
        let url = format!("{}/auth/login", config.base_url.trim_end_matches('/'));
        let body = LoginRequest {
            login: email.to_string(),
            password: password.to_string(),
            undelete: false,
        };

        debug!("POST {url}");
        read_json(http.post(&url).json(&body)).await
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        debug!("GET {url}");
        self.http.get(url).header(AUTHORIZATION, self.token.as_str())
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        debug!("POST {url}");
        self.http.post(url).header(AUTHORIZATION, self.token.as_str())
    }

    async fn fetch_user(&self, user_id: &str) -> Result<User> {
        read_json(self.get(&format!("/users/{user_id}"))).await
    }
}

fn build_http(config: &ApiConfig) -> Result<reqwest::Client> {
    let http = reqwest::Client::builder()
        .timeout(config.timeout())
        .user_agent(config.user_agent.as_str())
        .build()?;
    Ok(http)
}

/// Turn a non-2xx response into a classified error.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TencordError::from_status(status, body))
}

async fn read_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T> {
    let resp = check(req.send().await?).await?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl ChatApi for Client {
    async fn fetch_messages(&self, channel: &ChannelId, limit: u32) -> Result<Vec<RawMessage>> {
        let req = self
            .get(&format!("/channels/{channel}/messages"))
            .query(&[("limit", limit.to_string())]);
        read_json(req).await
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        message: &OutgoingMessage,
    ) -> Result<RawMessage> {
        let req = self
            .post(&format!("/channels/{channel}/messages"))
            .json(message);
        read_json(req).await
    }

    async fn resolve_username(&self, user_id: &str) -> Result<String> {
        let user = match self.fetch_user(user_id).await {
            Err(e) if e.is_rate_limited() => {
                warn!(
                    "User lookup for {user_id} rate limited, retrying in {}ms",
                    self.rate_limit_retry.as_millis()
                );
                tokio::time::sleep(self.rate_limit_retry).await;
                self.fetch_user(user_id).await?
            }
            other => other?,
        };
        Ok(user.username)
    }

    async fn negotiate_upload(
        &self,
        channel: &ChannelId,
        filename: &str,
        size: u64,
    ) -> Result<UploadSlot> {
        let body = UploadRequest {
            files: vec![UploadFile {
                filename: filename.to_string(),
                file_size: size,
            }],
        };
        let req = self
            .post(&format!("/channels/{channel}/attachments"))
            .json(&body);
        let resp: UploadResponse = read_json(req).await?;
        resp.attachments.into_iter().next().ok_or_else(|| {
            TencordError::InvalidRequest("upload negotiation returned no slot".to_string())
        })
    }

    async fn transfer(&self, upload_url: &str, bytes: Vec<u8>) -> Result<()> {
        // Pre-signed storage URL: the account token stays off this request.
        debug!("PUT {upload_url} ({} bytes)", bytes.len());
        let resp = self
            .http
            .put(upload_url)
            .timeout(self.transfer_timeout)
            .body(bytes)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<User> {
        read_json(self.get("/users/@me")).await
    }

    async fn list_private_channels(&self) -> Result<Vec<Channel>> {
        read_json(self.get("/users/@me/channels")).await
    }

    async fn list_guilds(&self) -> Result<Vec<Guild>> {
        read_json(self.get("/users/@me/guilds")).await
    }

    async fn list_guild_channels(&self, guild_id: &str) -> Result<Vec<Channel>> {
        read_json(self.get(&format!("/guilds/{guild_id}/channels"))).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {url}");
        let req = self.http.get(url).timeout(self.transfer_timeout);
        let resp = check(req.send().await?).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ApiConfig {
        ApiConfig {
            base_url: server.uri(),
            rate_limit_retry_ms: 10,
            ..ApiConfig::default()
        }
    }

    fn message_json(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "timestamp": "2023-06-01T10:15:30+00:00",
            "author": {"id": "1", "username": "alice"},
            "content": format!("message {id}"),
            "attachments": []
        })
    }

    #[test]
    fn test_client_construction() {
        let config = ApiConfig {
            base_url: "https://example.com/api/v9/".into(),
            ..ApiConfig::default()
        };
        let client = Client::new(&config, "tok").unwrap();
        assert_eq!(client.base_url, "https://example.com/api/v9");
        assert_eq!(client.token, "tok");
    }

    #[tokio::test]
    async fn test_fetch_messages_sends_limit_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/42/messages"))
            .and(query_param("limit", "100"))
            .and(header("authorization", "tok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([message_json("2"), message_json("1")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new(&config_for(&server), "tok").unwrap();
        let messages = client
            .fetch_messages(&ChannelId::new("42"), 100)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "2");
    }

    #[tokio::test]
    async fn test_unauthorized_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/42/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("401: Unauthorized"))
            .mount(&server)
            .await;

        let client = Client::new(&config_for(&server), "bad").unwrap();
        let err = client
            .fetch_messages(&ChannelId::new("42"), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, TencordError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_resolve_username_retries_once_when_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/7"))
            .respond_with(ResponseTemplate::new(429).set_body_string("You are being rate limited."))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/7"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "7", "username": "bob"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new(&config_for(&server), "tok").unwrap();
        assert_eq!(client.resolve_username("7").await.unwrap(), "bob");
    }

    #[tokio::test]
    async fn test_resolve_username_gives_up_after_one_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/7"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let client = Client::new(&config_for(&server), "tok").unwrap();
        let err = client.resolve_username("7").await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_resolve_username_does_not_retry_other_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/7"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new(&config_for(&server), "tok").unwrap();
        let err = client.resolve_username("7").await.unwrap_err();
        assert!(matches!(err, TencordError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_negotiate_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/42/attachments"))
            .and(body_json(json!({"files": [{"filename": "cat.png", "file_size": 3}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "attachments": [{
                    "id": 0,
                    "upload_url": "https://storage.example/abc/cat.png?upload_id=xyz",
                    "upload_filename": "abc/cat.png"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new(&config_for(&server), "tok").unwrap();
        let slot = client
            .negotiate_upload(&ChannelId::new("42"), "cat.png", 3)
            .await
            .unwrap();
        assert_eq!(slot.upload_filename, "abc/cat.png");
    }

    #[tokio::test]
    async fn test_negotiate_upload_rejected_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/42/attachments"))
            .respond_with(ResponseTemplate::new(400).set_body_string("File too large"))
            .mount(&server)
            .await;

        let client = Client::new(&config_for(&server), "tok").unwrap();
        let err = client
            .negotiate_upload(&ChannelId::new("42"), "huge.bin", 1 << 40)
            .await
            .unwrap_err();
        assert!(matches!(err, TencordError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_transfer_puts_raw_bytes_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/abc/cat.png"))
            .and(query_param("upload_id", "xyz"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new(&config_for(&server), "tok").unwrap();
        let url = format!("{}/abc/cat.png?upload_id=xyz", server.uri());
        client.transfer(&url, b"png".to_vec()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].body, b"png");
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_slow_transfer_outlasts_api_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/abc/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1500)))
            .expect(1)
            .mount(&server)
            .await;

        let config = ApiConfig {
            timeout_secs: 1,
            transfer_timeout_secs: 10,
            ..config_for(&server)
        };
        let client = Client::new(&config, "tok").unwrap();
        let url = format!("{}/abc/big.bin", server.uri());
        client.transfer(&url, vec![0; 1024]).await.unwrap();
    }

    #[tokio::test]
    async fn test_transfer_still_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/abc/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let config = ApiConfig {
            transfer_timeout_secs: 1,
            ..config_for(&server)
        };
        let client = Client::new(&config, "tok").unwrap();
        let url = format!("{}/abc/big.bin", server.uri());
        let err = client.transfer(&url, vec![0; 1024]).await.unwrap_err();
        assert!(matches!(err, TencordError::Network(_)));
    }

    #[tokio::test]
    async fn test_slow_download_outlasts_api_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachments/cat.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"png".to_vec())
                    .set_delay(Duration::from_millis(1500)),
            )
            .mount(&server)
            .await;

        let config = ApiConfig {
            timeout_secs: 1,
            transfer_timeout_secs: 10,
            ..config_for(&server)
        };
        let client = Client::new(&config, "tok").unwrap();
        let url = format!("{}/attachments/cat.png", server.uri());
        assert_eq!(client.download(&url).await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"user_id": "1", "token": "fresh"})),
            )
            .mount(&server)
            .await;

        let login = Client::login(&config_for(&server), "me@example.com", "pw")
            .await
            .unwrap();
        assert_eq!(login.token, "fresh");
        assert_eq!(login.user_id, "1");
    }
}
