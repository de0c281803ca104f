//! End-to-end tests for the HTTP trigger over a real socket.

use std::net::SocketAddr;

use dm_blaster::{Settings, TriggerServer};
use httpmock::prelude::*;

async fn start_trigger(settings: Settings) -> SocketAddr {
    let server = TriggerServer::bind("127.0.0.1:0".parse().unwrap(), settings)
        .await
        .expect("bind trigger");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(server.serve());
    addr
}

fn settings_for(mattermost: &MockServer) -> Settings {
    Settings {
        server_url: Some(mattermost.base_url()),
        bot_token: Some("bot-token".to_string()),
        recipients: Some("u1,u2".to_string()),
        message: Some("Deploy freeze starts now".to_string()),
        shared_secret: Some("s3cret".to_string()),
        ..Settings::default()
    }
}

#[tokio::test]
async fn test_send_command_broadcasts() {
    let mattermost = MockServer::start_async().await;
    let me = mattermost.mock(|when, then| {
        when.method(GET).path("/api/v4/users/me");
        then.status(200).json_body(serde_json::json!({ "id": "bot" }));
    });
    let channels = mattermost.mock(|when, then| {
        when.method(POST).path("/api/v4/channels/direct");
        then.status(201).json_body(serde_json::json!({ "id": "c" }));
    });
    let posts = mattermost.mock(|when, then| {
        when.method(POST).path("/api/v4/posts");
        then.status(201).json_body(serde_json::json!({ "id": "p" }));
    });

    let addr = start_trigger(settings_for(&mattermost)).await;
    let response = reqwest::Client::new()
        .post(format!("http://{}/send_message", addr))
        .header("X-Shared-Secret", "s3cret")
        .json(&serde_json::json!({ "text": "send" }))
        .send()
        .await
        .expect("trigger response");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["response_type"], "in_channel");
    assert_eq!(body["text"], "Messages sent successfully!");

    me.assert_calls(1);
    channels.assert_calls(2);
    posts.assert_calls(2);
}

#[tokio::test]
async fn test_bad_secret_is_rejected_without_delivery() {
    let mattermost = MockServer::start_async().await;
    let me = mattermost.mock(|when, then| {
        when.method(GET).path("/api/v4/users/me");
        then.status(200).json_body(serde_json::json!({ "id": "bot" }));
    });

    let addr = start_trigger(settings_for(&mattermost)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/send_message", addr))
        .header("X-Shared-Secret", "wrong")
        .json(&serde_json::json!({ "text": "send" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    let response = client
        .post(format!("http://{}/send_message", addr))
        .json(&serde_json::json!({ "text": "send" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    me.assert_calls(0);
}

#[tokio::test]
async fn test_unknown_command_reply() {
    let mattermost = MockServer::start_async().await;
    let addr = start_trigger(settings_for(&mattermost)).await;

    let body: serde_json::Value = reqwest::Client::new()
        .post(format!("http://{}/send_message", addr))
        .header("X-Shared-Secret", "s3cret")
        .json(&serde_json::json!({ "text": "help" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        body,
        serde_json::json!({ "response_type": "ephemeral", "text": "Unknown command." })
    );
}

#[tokio::test(flavor = "current_thread")]
async fn test_files_are_reread_on_each_send() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("recipients.csv");
    let message_path = dir.path().join("message.md");
    std::fs::write(&csv_path, "u1\nu2\n").unwrap();
    std::fs::write(&message_path, "First notice").unwrap();

    let mattermost = MockServer::start_async().await;
    mattermost.mock(|when, then| {
        when.method(GET).path("/api/v4/users/me");
        then.status(200).json_body(serde_json::json!({ "id": "bot" }));
    });
    let channels = mattermost.mock(|when, then| {
        when.method(POST).path("/api/v4/channels/direct");
        then.status(201).json_body(serde_json::json!({ "id": "c" }));
    });
    let first = mattermost.mock(|when, then| {
        when.method(POST)
            .path("/api/v4/posts")
            .json_body(serde_json::json!({ "channel_id": "c", "message": "First notice" }));
        then.status(201);
    });
    let second = mattermost.mock(|when, then| {
        when.method(POST)
            .path("/api/v4/posts")
            .json_body(serde_json::json!({ "channel_id": "c", "message": "Second notice" }));
        then.status(201);
    });

    let settings = Settings {
        recipients: Some(csv_path.display().to_string()),
        message: None,
        message_file: Some(message_path.clone()),
        ..settings_for(&mattermost)
    };
    let addr = start_trigger(settings).await;
    let client = reqwest::Client::new();
    let send = || {
        client
            .post(format!("http://{}/send_message", addr))
            .header("X-Shared-Secret", "s3cret")
            .json(&serde_json::json!({ "text": "send" }))
            .send()
    };

    let body: serde_json::Value = send().await.unwrap().json().await.unwrap();
    assert_eq!(body["text"], "Messages sent successfully!");

    std::fs::write(&csv_path, "u3\n").unwrap();
    std::fs::write(&message_path, "Second notice").unwrap();
    let body: serde_json::Value = send().await.unwrap().json().await.unwrap();
    assert_eq!(body["text"], "Messages sent successfully!");

    first.assert_calls(2);
    second.assert_calls(1);
    channels.assert_calls(3);
}

#[tokio::test]
async fn test_server_survives_broken_connection() {
    use tokio::io::AsyncWriteExt;

    let mattermost = MockServer::start_async().await;
    let addr = start_trigger(settings_for(&mattermost)).await;

    let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"\x16\x03\x01 not http at all\r\n\r\n").await.unwrap();
    drop(raw);

    let response = reqwest::Client::new()
        .get(format!("http://{}/nope", addr))
        .send()
        .await
        .expect("server still accepting");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
