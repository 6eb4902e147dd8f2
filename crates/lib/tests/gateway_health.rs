//! Integration test: start the gateway on a free port, check health, the webhook
//! handshake and webhook acknowledgement. Does not need Messenger, Wit or PayPal.
//! The server task is left running when each test ends.

use farebot::config::Config;
use farebot::gateway;
use std::path::PathBuf;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn temp_config_dir() -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!("farebot-gateway-test-{}", uuid::Uuid::new_v4()));
    let config_path = dir.join("config.json");
    farebot::init::init_config_dir(&config_path).expect("init config dir");
    (dir, config_path)
}

/// Starts the gateway and waits for GET / to answer. Returns the base URL.
async fn start_gateway(verify_token: &str) -> String {
    let port = free_port();
    let (_dir, config_path) = temp_config_dir();

    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    config.messenger.verify_token = Some(verify_token.to_string());

    tokio::spawn(async move {
        if let Err(e) = gateway::run_gateway(config, config_path).await {
            eprintln!("gateway exited: {:#}", e);
        }
    });

    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/", base)).send().await {
            if resp.status().is_success() {
                return base;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway at {} did not come up within 5s", base);
}

#[tokio::test]
async fn gateway_health_http_responds_with_running() {
    let base = start_gateway("verify-me").await;
    let json: serde_json::Value = reqwest::get(format!("{}/", base))
        .await
        .expect("GET /")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    let port: u64 = base.rsplit(':').next().unwrap().parse().unwrap();
    assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port));
}

#[tokio::test]
async fn webhook_handshake_echoes_challenge_only_for_the_right_token() {
    let base = start_gateway("verify-me").await;
    let client = reqwest::Client::new();

    let ok = client
        .get(format!("{}/webhook", base))
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.verify_token", "verify-me"),
            ("hub.challenge", "12345"),
        ])
        .send()
        .await
        .expect("GET /webhook");
    assert_eq!(ok.status(), reqwest::StatusCode::OK);
    assert_eq!(ok.text().await.unwrap(), "12345");

    let denied = client
        .get(format!("{}/webhook", base))
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.verify_token", "wrong"),
            ("hub.challenge", "12345"),
        ])
        .send()
        .await
        .expect("GET /webhook");
    assert_eq!(denied.status(), reqwest::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_post_is_acknowledged() {
    let base = start_gateway("verify-me").await;
    let client = reqwest::Client::new();

    let ignored = client
        .post(format!("{}/webhook", base))
        .json(&serde_json::json!({ "object": "user", "entry": [] }))
        .send()
        .await
        .expect("POST /webhook");
    assert_eq!(ignored.status(), reqwest::StatusCode::OK);

    let malformed = client
        .post(format!("{}/webhook", base))
        .body("not json")
        .send()
        .await
        .expect("POST /webhook");
    assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_ticket_callback_is_not_found() {
    let base = start_gateway("verify-me").await;
    let resp = reqwest::get(format!("{}/purchase/success/nope", base))
        .await
        .expect("GET /purchase/success");
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let scan = reqwest::get(format!("{}/scans/missing-se.png", base))
        .await
        .expect("GET /scans");
    assert_eq!(scan.status(), reqwest::StatusCode::NOT_FOUND);
}
