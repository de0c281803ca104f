//! Settings and input resolution
//!
//! Settings are captured once at startup (environment variables, `.env`, or
//! CLI flags). Turning them into a [`DeliveryRequest`] reads recipient CSV
//! files and message files, and may ask the operator for anything missing
//! when a terminal is available.

use std::fmt;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::delivery::DeliveryRequest;
use crate::error::{Error, Result};

pub const ENV_SERVER_URL: &str = "MATTERMOST_URL";
pub const ENV_BOT_TOKEN: &str = "BOT_API_KEY";
pub const ENV_RECIPIENTS: &str = "USER_IDS_OR_CSV_PATH";
pub const ENV_MESSAGE: &str = "MESSAGE";
pub const ENV_MESSAGE_FILE: &str = "MESSAGE_FILE_PATH";
pub const ENV_SHARED_SECRET: &str = "SHARED_SECRET";
pub const ENV_VERIFY_TLS: &str = "VERIFY_SSL";
pub const ENV_RUN_MODE: &str = "RUN_MODE";
pub const ENV_LISTEN_ADDR: &str = "LISTEN_ADDR";
pub const ENV_HTTP_TIMEOUT: &str = "HTTP_TIMEOUT_SECS";

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

/// Process-wide configuration, read-only after startup.
#[derive(Clone)]
pub struct Settings {
    pub server_url: Option<String>,
    pub bot_token: Option<String>,
    /// Comma-separated user IDs or a path to a CSV file.
    pub recipients: Option<String>,
    pub message: Option<String>,
    pub message_file: Option<PathBuf>,
    pub shared_secret: Option<String>,
    pub verify_tls: bool,
    /// `None` keeps the HTTP client's default (no overall request timeout).
    pub http_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: None,
            bot_token: None,
            recipients: None,
            message: None,
            message_file: None,
            shared_secret: None,
            verify_tls: true,
            http_timeout: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("server_url", &self.server_url)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("recipients", &self.recipients)
            .field("message", &self.message.as_ref().map(|m| m.len()))
            .field("message_file", &self.message_file)
            .field(
                "shared_secret",
                &self.shared_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("verify_tls", &self.verify_tls)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl Settings {
    /// Fail on the first mandatory setting that is missing.
    pub fn check_required(&self) -> Result<()> {
        if self.server_url.is_none() {
            return Err(Error::MissingEnv(ENV_SERVER_URL.to_string()));
        }
        if self.bot_token.is_none() {
            return Err(Error::MissingEnv(ENV_BOT_TOKEN.to_string()));
        }
        Ok(())
    }
}

/// Treat empty and whitespace-only values as unset.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Unset means verify; otherwise only a case-insensitive `true` keeps verification on.
pub fn parse_verify_flag(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => v.trim().eq_ignore_ascii_case("true"),
    }
}

/// Source of values that the environment did not provide.
pub trait Prompter {
    /// Ask for the value `var` would have supplied.
    fn ask(&mut self, var: &str, question: &str) -> Result<String>;
}

/// Prompts on a terminal (or any reader/writer pair, for tests).
pub struct TerminalPrompter<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> TerminalPrompter<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl TerminalPrompter<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter for TerminalPrompter<R, W> {
    fn ask(&mut self, var: &str, question: &str) -> Result<String> {
        write!(self.writer, "{} ", question)?;
        self.writer.flush()?;

        let mut input = String::new();
        self.reader.read_line(&mut input)?;
        let answer = input.trim();
        if answer.is_empty() {
            return Err(Error::MissingEnv(var.to_string()));
        }
        Ok(answer.to_string())
    }
}

/// Used where nobody can answer (the HTTP trigger).
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn ask(&mut self, var: &str, _question: &str) -> Result<String> {
        Err(Error::MissingEnv(var.to_string()))
    }
}

fn setting_or_ask(
    value: &Option<String>,
    var: &str,
    question: &str,
    prompter: &mut dyn Prompter,
) -> Result<String> {
    match value {
        Some(v) => Ok(v.clone()),
        None => prompter.ask(var, question),
    }
}

/// Parse a recipient list: a CSV file path (first column, no header) or a
/// comma-separated literal. Identifiers are trimmed and blanks dropped.
pub fn parse_recipients(input: &str) -> Result<Vec<String>> {
    let input = input.trim();
    let path = Path::new(input);

    let raw = if !input.is_empty() && path.is_file() {
        read_csv_recipients(path)?
    } else {
        input.split(',').map(str::to_string).collect()
    };

    let recipients: Vec<String> = raw
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    if recipients.is_empty() {
        return Err(Error::NoRecipients);
    }
    Ok(recipients)
}

fn read_csv_recipients(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(first) = record.get(0) {
            ids.push(first.to_string());
        }
    }
    Ok(ids)
}

/// Message text from `MESSAGE`, or the file named by `MESSAGE_FILE_PATH`.
pub fn resolve_message(settings: &Settings, prompter: &mut dyn Prompter) -> Result<String> {
    if let Some(message) = &settings.message {
        return Ok(message.clone());
    }

    let path = match &settings.message_file {
        Some(path) => path.clone(),
        None => PathBuf::from(prompter.ask(
            ENV_MESSAGE_FILE,
            "Enter the path to the message file:",
        )?),
    };

    let message = fs::read_to_string(&path).map_err(|source| Error::MessageFile {
        path: path.display().to_string(),
        source,
    })?;

    if message.trim().is_empty() {
        return Err(Error::EmptyMessage);
    }
    Ok(message)
}

/// Build a complete [`DeliveryRequest`]. Nothing here touches the network.
pub fn resolve_request(settings: &Settings, prompter: &mut dyn Prompter) -> Result<DeliveryRequest> {
    let server_url = setting_or_ask(
        &settings.server_url,
        ENV_SERVER_URL,
        "Enter your Mattermost server URL:",
        prompter,
    )?;

    let recipients_input = setting_or_ask(
        &settings.recipients,
        ENV_RECIPIENTS,
        "Enter the list of user IDs (comma-separated) or path to CSV file:",
        prompter,
    )?;
    let recipients = parse_recipients(&recipients_input)?;

    let message = resolve_message(settings, prompter)?;

    let bot_token = setting_or_ask(
        &settings.bot_token,
        ENV_BOT_TOKEN,
        "Enter the bot API key:",
        prompter,
    )?;

    Ok(DeliveryRequest {
        server_url: server_url.trim().trim_end_matches('/').to_string(),
        bot_token,
        recipients,
        message,
        verify_tls: settings.verify_tls,
        timeout: settings.http_timeout,
    })
}
