//! Direct-message delivery loop
//!
//! One identity lookup per run, then for every recipient: resolve the direct
//! channel, post the message. A recipient whose channel or post call is
//! rejected by the server is recorded and skipped; the loop always moves on.
//! Transport and decoding failures are not per-recipient and end the run.

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::mattermost::{ClientOptions, MattermostClient};
use crate::metrics;

/// Everything one broadcast run needs.
#[derive(Clone)]
pub struct DeliveryRequest {
    pub server_url: String,
    pub bot_token: String,
    pub recipients: Vec<String>,
    pub message: String,
    pub verify_tls: bool,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for DeliveryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryRequest")
            .field("server_url", &self.server_url)
            .field("bot_token", &"<redacted>")
            .field("recipients", &self.recipients)
            .field("message_len", &self.message.len())
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Server response body of the rejected direct-channel call.
    ChannelResolutionFailed(String),
    /// Server response body of the rejected post call.
    PostFailed(String),
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent)
    }

    fn metric_label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::ChannelResolutionFailed(_) => "channel_failed",
            DeliveryOutcome::PostFailed(_) => "post_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientResult {
    pub recipient: String,
    pub outcome: DeliveryOutcome,
}

/// Per-recipient results in recipient-list order.
///
/// A report means the run completed; it says nothing about how many
/// recipients actually received the message.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub bot_user_id: String,
    pub results: Vec<RecipientResult>,
}

impl DeliveryReport {
    pub fn sent(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_sent()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.sent()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} of {} recipients sent, {} failed",
            self.sent(),
            self.results.len(),
            self.failed()
        )
    }
}

/// Run a broadcast with a fresh client built from the request.
pub async fn deliver(request: &DeliveryRequest) -> Result<DeliveryReport> {
    let options = ClientOptions {
        verify_tls: request.verify_tls,
        timeout: request.timeout,
    };
    let client = MattermostClient::new(&request.server_url, &request.bot_token, &options)?;
    deliver_with(&client, &request.recipients, &request.message).await
}

pub async fn deliver_with(
    client: &MattermostClient,
    recipients: &[String],
    message: &str,
) -> Result<DeliveryReport> {
    let me = client.me().await?;
    info!(
        bot_user_id = %me.id,
        username = me.username.as_deref().unwrap_or("-"),
        recipients = recipients.len(),
        "Authenticated as bot"
    );

    let mut results = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let outcome = deliver_one(client, &me.id, recipient, message).await?;
        metrics::record_delivery(outcome.metric_label());
        results.push(RecipientResult {
            recipient: recipient.clone(),
            outcome,
        });
    }

    let report = DeliveryReport {
        bot_user_id: me.id,
        results,
    };
    info!(
        sent = report.sent(),
        failed = report.failed(),
        "Process completed"
    );
    Ok(report)
}

async fn deliver_one(
    client: &MattermostClient,
    bot_id: &str,
    recipient: &str,
    message: &str,
) -> Result<DeliveryOutcome> {
    let channel = match client.create_direct_channel(bot_id, recipient).await {
        Ok(channel) => channel,
        Err(Error::ApiStatus { status, body }) => {
            warn!(
                recipient,
                status,
                error = %body,
                "Failed to get or create DM channel"
            );
            return Ok(DeliveryOutcome::ChannelResolutionFailed(body));
        }
        Err(err) => return Err(err),
    };

    match client.create_post(&channel.id, message).await {
        Ok(()) => {
            info!(recipient, channel_id = %channel.id, "Sent message");
            Ok(DeliveryOutcome::Sent)
        }
        Err(Error::ApiStatus { status, body }) => {
            warn!(recipient, status, error = %body, "Failed to send message");
            Ok(DeliveryOutcome::PostFailed(body))
        }
        Err(err) => Err(err),
    }
}
