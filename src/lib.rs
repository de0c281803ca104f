//! Mattermost Direct Message Broadcaster
//!
//! This library provides tools to:
//! - Resolve a broadcast (server, bot token, recipients, message) from the
//!   environment, CSV/message files, or interactive prompts
//! - Deliver one message as a direct message to every recipient, isolating
//!   per-recipient failures
//! - Trigger broadcasts over HTTP behind a shared-secret header
//! - Export Prometheus metrics for runs and deliveries

pub mod config;
pub mod delivery;
pub mod error;
pub mod mattermost;
pub mod metrics;
pub mod server;

// Re-export common types
pub use config::{resolve_request, NoPrompt, Prompter, Settings, TerminalPrompter};
pub use delivery::{deliver, DeliveryOutcome, DeliveryReport, DeliveryRequest, RecipientResult};
pub use error::{Error, Result};
pub use mattermost::{ClientOptions, MattermostClient};
pub use server::TriggerServer;
