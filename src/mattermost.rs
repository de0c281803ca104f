//! Minimal Mattermost REST client (v4 API): identity, direct channels, posts.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

const ME_ENDPOINT: &str = "/api/v4/users/me";
const DIRECT_CHANNEL_ENDPOINT: &str = "/api/v4/channels/direct";
const POSTS_ENDPOINT: &str = "/api/v4/posts";

/// HTTP client settings shared by every call of one run.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub verify_tls: bool,
    pub timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            verify_tls: true,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
}

#[derive(Debug, Serialize)]
struct CreatePost<'a> {
    channel_id: &'a str,
    message: &'a str,
}

#[derive(Debug, Clone)]
pub struct MattermostClient {
    http: Client,
    base_url: String,
    token: String,
}

impl MattermostClient {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        base_url: S1,
        token: S2,
        options: &ClientOptions,
    ) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::InvalidArgument("bot token is empty".to_string()));
        }

        let mut builder = Client::builder()
            .user_agent(format!("dm_blaster/{}", env!("CARGO_PKG_VERSION")));

        if !options.verify_tls {
            warn!("TLS certificate verification is DISABLED for all Mattermost requests in this run");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let http = builder
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// The account the token belongs to. Anything but 200 is an authentication failure.
    pub async fn me(&self) -> Result<User> {
        let response = self
            .http
            .get(self.url(ME_ENDPOINT))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(Error::Authentication {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Get or create the one-to-one channel between `bot_id` and `user_id`.
    pub async fn create_direct_channel(&self, bot_id: &str, user_id: &str) -> Result<Channel> {
        let response = self
            .http
            .post(self.url(DIRECT_CHANNEL_ENDPOINT))
            .bearer_auth(&self.token)
            .json(&[bot_id, user_id])
            .send()
            .await?;

        let body = expect_created(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Post `message` into the channel. A 201 is success whatever the reply body holds.
    pub async fn create_post(&self, channel_id: &str, message: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(POSTS_ENDPOINT))
            .bearer_auth(&self.token)
            .json(&CreatePost {
                channel_id,
                message,
            })
            .send()
            .await?;

        expect_created(response).await?;
        Ok(())
    }
}

/// Body of a 201 response; any other status is `ApiStatus`.
async fn expect_created(response: Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;

    if status != StatusCode::CREATED {
        return Err(Error::ApiStatus {
            status: status.as_u16(),
            body,
        });
    }

    Ok(body)
}
